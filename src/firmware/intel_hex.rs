//! Intel HEX parser: `:LLAAAARR[DD...]CC` ASCII records.

use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};

use super::image::{FirmwareImage, Segment};

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
const RECORD_START_SEGMENT_ADDRESS: u8 = 0x03;
const RECORD_EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
const RECORD_START_LINEAR_ADDRESS: u8 = 0x05;

fn hex_byte(s: &str, at: usize) -> CoreResult<u8> {
    s.get(at..at + 2)
        .and_then(|h| u8::from_str_radix(h, 16).ok())
        .ok_or_else(|| CoreError::ParseError {
            reason: format!("malformed hex digit at offset {at}"),
        })
}

struct Record {
    record_type: u8,
    address: u16,
    data: Vec<u8>,
}

fn parse_record(line: &str) -> CoreResult<Record> {
    let line = line.trim_end();
    if !line.starts_with(':') {
        return Err(CoreError::ParseError {
            reason: "record does not start with ':'".to_string(),
        });
    }
    let body = &line[1..];
    if body.len() < 8 {
        return Err(CoreError::ParseError {
            reason: "record too short".to_string(),
        });
    }

    let byte_count = hex_byte(body, 0)? as usize;
    let address = ((hex_byte(body, 2)? as u16) << 8) | hex_byte(body, 4)? as u16;
    let record_type = hex_byte(body, 6)?;

    let expected_len = 8 + byte_count * 2 + 2;
    if body.len() < expected_len {
        return Err(CoreError::ParseError {
            reason: "record shorter than declared byte count".to_string(),
        });
    }

    let mut data = Vec::with_capacity(byte_count);
    for i in 0..byte_count {
        data.push(hex_byte(body, 8 + i * 2)?);
    }
    let checksum = hex_byte(body, 8 + byte_count * 2)?;

    let mut sum: u8 = byte_count as u8;
    sum = sum.wrapping_add((address >> 8) as u8);
    sum = sum.wrapping_add((address & 0xFF) as u8);
    sum = sum.wrapping_add(record_type);
    for &b in &data {
        sum = sum.wrapping_add(b);
    }
    let expected_checksum = (!sum).wrapping_add(1);
    if checksum != expected_checksum {
        return Err(CoreError::ParseError {
            reason: format!(
                "checksum mismatch: expected 0x{expected_checksum:02X}, got 0x{checksum:02X}"
            ),
        });
    }

    Ok(Record {
        record_type,
        address,
        data,
    })
}

/// Parse a complete Intel HEX file into a [`FirmwareImage`].
pub fn parse(text: &str) -> CoreResult<FirmwareImage> {
    let mut bytes: BTreeMap<u32, u8> = BTreeMap::new();
    let mut base: u32 = 0;
    let mut saw_eof = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(line)?;
        match record.record_type {
            RECORD_DATA => {
                for (i, &b) in record.data.iter().enumerate() {
                    let addr = base.wrapping_add(record.address as u32).wrapping_add(i as u32);
                    bytes.insert(addr, b);
                }
            }
            RECORD_EOF => {
                saw_eof = true;
                break;
            }
            RECORD_EXTENDED_SEGMENT_ADDRESS => {
                if record.data.len() != 2 {
                    return Err(CoreError::ParseError {
                        reason: "extended segment address record must carry 2 bytes".to_string(),
                    });
                }
                let segment = ((record.data[0] as u32) << 8) | record.data[1] as u32;
                base = segment << 4;
            }
            RECORD_EXTENDED_LINEAR_ADDRESS => {
                if record.data.len() != 2 {
                    return Err(CoreError::ParseError {
                        reason: "extended linear address record must carry 2 bytes".to_string(),
                    });
                }
                let upper = ((record.data[0] as u32) << 8) | record.data[1] as u32;
                base = upper << 16;
            }
            RECORD_START_SEGMENT_ADDRESS => {
                // Recorded format only, no downstream effect.
            }
            RECORD_START_LINEAR_ADDRESS => {
                // Recorded format only, no downstream effect.
            }
            other => {
                return Err(CoreError::ParseError {
                    reason: format!("unsupported record type 0x{other:02X}"),
                });
            }
        }
    }

    if !saw_eof {
        return Err(CoreError::ParseError {
            reason: "file is missing an EOF record".to_string(),
        });
    }

    let segments = coalesce(bytes);
    FirmwareImage::new(segments)
}

fn coalesce(bytes: BTreeMap<u32, u8>) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current_start: Option<u32> = None;
    let mut current_data: Vec<u8> = Vec::new();
    let mut expected_next: u32 = 0;

    for (addr, byte) in bytes {
        match current_start {
            Some(_) if addr == expected_next => {
                current_data.push(byte);
                expected_next = expected_next.wrapping_add(1);
            }
            _ => {
                if let Some(start) = current_start.take() {
                    segments.push(Segment::new(start, std::mem::take(&mut current_data)));
                }
                current_start = Some(addr);
                current_data.push(byte);
                expected_next = addr.wrapping_add(1);
            }
        }
    }
    if let Some(start) = current_start {
        segments.push(Segment::new(start, current_data));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum_line(byte_count: u8, address: u16, record_type: u8, data: &[u8]) -> String {
        let mut sum = byte_count;
        sum = sum.wrapping_add((address >> 8) as u8);
        sum = sum.wrapping_add((address & 0xFF) as u8);
        sum = sum.wrapping_add(record_type);
        for &b in data {
            sum = sum.wrapping_add(b);
        }
        let checksum = (!sum).wrapping_add(1);

        let mut line = format!(":{byte_count:02X}{address:04X}{record_type:02X}");
        for &b in data {
            line.push_str(&format!("{b:02X}"));
        }
        line.push_str(&format!("{checksum:02X}"));
        line
    }

    #[test]
    fn two_adjacent_records_merge_into_one_segment() {
        let rec1 = checksum_line(16, 0x0000, RECORD_DATA, &[0xAA; 16]);
        let rec2 = checksum_line(16, 0x0010, RECORD_DATA, &[0xBB; 16]);
        let eof = ":00000001FF".to_string();

        // Extended linear address record sets the upper 16 bits to 0x0800.
        let ela = checksum_line(2, 0x0000, RECORD_EXTENDED_LINEAR_ADDRESS, &[0x08, 0x00]);

        let text = format!("{ela}\n{rec1}\n{rec2}\n{eof}\n");
        let image = parse(&text).unwrap();

        assert_eq!(image.segments.len(), 1);
        assert_eq!(image.segments[0].address, 0x0800_0000);
        assert_eq!(image.segments[0].data.len(), 32);
        assert_eq!(&image.segments[0].data[..16], &[0xAAu8; 16][..]);
        assert_eq!(&image.segments[0].data[16..], &[0xBBu8; 16][..]);
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let mut rec = checksum_line(1, 0x0000, RECORD_DATA, &[0x42]);
        rec.pop();
        rec.push_str("00"); // corrupt the checksum
        let text = format!("{rec}\n:00000001FF\n");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn missing_eof_is_rejected() {
        let rec = checksum_line(1, 0x0000, RECORD_DATA, &[0x42]);
        assert!(parse(&format!("{rec}\n")).is_err());
    }

    #[test]
    fn zero_length_data_record_is_accepted() {
        let rec = checksum_line(0, 0x0000, RECORD_DATA, &[]);
        let text = format!("{rec}\n:00000001FF\n");
        let image = parse(&text).unwrap();
        assert!(image.segments.is_empty());
    }

    #[test]
    fn extended_linear_address_changes_base_mid_file() {
        let ela_low = checksum_line(2, 0x0000, RECORD_EXTENDED_LINEAR_ADDRESS, &[0x08, 0x00]);
        let rec_low = checksum_line(4, 0x0000, RECORD_DATA, &[1, 2, 3, 4]);
        let ela_high = checksum_line(2, 0x0000, RECORD_EXTENDED_LINEAR_ADDRESS, &[0x08, 0x01]);
        let rec_high = checksum_line(4, 0x0000, RECORD_DATA, &[5, 6, 7, 8]);
        let eof = ":00000001FF";

        let text = format!("{ela_low}\n{rec_low}\n{ela_high}\n{rec_high}\n{eof}\n");
        let image = parse(&text).unwrap();

        assert_eq!(image.segments.len(), 2);
        assert_eq!(image.segments[0].address, 0x0800_0000);
        assert_eq!(image.segments[1].address, 0x0801_0000);
    }
}
