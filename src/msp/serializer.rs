//! MSP frame serialization.
//!
//! Encoding is fully deterministic from `{direction, command, payload}` (and
//! `flag` for v2, default 0) — the checksum is computed in one pass over the
//! same bytes the parser would reconstruct it from.

use super::checksum::{crc8_dvb_s2, msp_v1};
use super::packet::{Direction, MspVersion};

/// Serialize an MSP v1 frame: `$M<dir> length command payload... xor`.
pub fn serialize_v1(direction: Direction, command: u8, payload: &[u8]) -> Vec<u8> {
    let length = payload.len() as u8;
    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.push(b'$');
    frame.push(b'M');
    frame.push(direction.to_byte());
    frame.push(length);
    frame.push(command);
    frame.extend_from_slice(payload);
    frame.push(msp_v1(length, command, payload));
    frame
}

/// Serialize an MSP v2 frame: `$X<dir> flag cmd_lo cmd_hi len_lo len_hi payload... crc8dvbs2`.
pub fn serialize_v2(direction: Direction, flag: u8, command: u16, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let mut body = Vec::with_capacity(5 + payload.len());
    body.push(flag);
    body.push((command & 0xFF) as u8);
    body.push((command >> 8) as u8);
    body.push((len & 0xFF) as u8);
    body.push((len >> 8) as u8);
    body.extend_from_slice(payload);

    let crc = crc8_dvb_s2(&body);

    let mut frame = Vec::with_capacity(3 + body.len() + 1);
    frame.push(b'$');
    frame.push(b'X');
    frame.push(direction.to_byte());
    frame.extend_from_slice(&body);
    frame.push(crc);
    frame
}

/// Serialize a request using whichever version is appropriate for `command`.
/// v1 is chosen whenever the command and payload fit within v1's limits;
/// callers that need v2 unconditionally (e.g. for an `MSP2_*` command ID)
/// should call [`serialize_v2`] directly.
pub fn serialize(direction: Direction, command: u16, payload: &[u8]) -> Vec<u8> {
    if command <= 0xFF && payload.len() <= 255 {
        serialize_v1(direction, command as u8, payload)
    } else {
        serialize_v2(direction, 0, command, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msp::parser::MspParser;

    #[test]
    fn v2_crc_matches_spec_scenario_2() {
        let payload = [0x01, 0x02, 0x03];
        let frame = serialize_v2(Direction::Request, 0x00, 0x1F03, &payload);

        assert_eq!(
            &frame[..8],
            &[b'$', b'X', b'<', 0x00, 0x03, 0x1F, 0x03, 0x00]
        );
        assert_eq!(&frame[8..11], &payload);

        let crc_input = &frame[3..11];
        let expected_crc = crc8_dvb_s2(crc_input);
        assert_eq!(*frame.last().unwrap(), expected_crc);
    }

    #[test]
    fn v1_serialize_round_trips_through_parser() {
        let frame = serialize_v1(Direction::Response, 100, &[1, 2, 3, 4]);
        let mut parser = MspParser::new();
        let packets = parser.feed(&frame);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].command, 100);
        assert_eq!(packets[0].payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn v2_serialize_round_trips_through_parser() {
        let frame = serialize_v2(Direction::Request, 0, 0x2000, &[9, 8, 7]);
        let mut parser = MspParser::new();
        let packets = parser.feed(&frame);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].command, 0x2000);
        assert_eq!(packets[0].version, MspVersion::V2);
    }

    #[test]
    fn generic_serialize_picks_v1_for_small_commands() {
        let frame = serialize(Direction::Request, 100, &[]);
        assert_eq!(&frame[..2], b"$M");
    }

    #[test]
    fn generic_serialize_picks_v2_for_large_commands() {
        let frame = serialize(Direction::Request, 0x2000, &[]);
        assert_eq!(&frame[..2], b"$X");
    }

    #[test]
    fn boundary_payload_lengths_v1() {
        for len in [0usize, 1, 255] {
            let payload = vec![0xAAu8; len];
            let frame = serialize_v1(Direction::Request, 1, &payload);
            let mut parser = MspParser::new();
            let packets = parser.feed(&frame);
            assert_eq!(packets.len(), 1, "failed at len {len}");
            assert_eq!(packets[0].payload.len(), len);
        }
    }
}
