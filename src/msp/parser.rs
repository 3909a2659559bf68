//! Resumable MSP v1/v2 parser.
//!
//! Single-threaded, cooperative: the caller repeatedly hands in chunks of
//! received bytes via [`MspParser::feed`], which consumes as many bytes as
//! possible and yields zero or more validated packets per call. There are no
//! suspension points inside the parser and it never performs I/O, so the
//! same byte stream split into arbitrarily different chunk sizes always
//! yields the same sequence of packets.

use super::checksum::{crc8_dvb_s2, msp_v1};
use super::packet::{Direction, MspPacket, MspVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    HeaderM,
    HeaderDirection,
    V1Length,
    V1Command,
    V1Payload,
    V1Checksum,
    V2Flag,
    V2CommandLo,
    V2CommandHi,
    V2LengthLo,
    V2LengthHi,
    V2Payload,
    V2Crc,
}

/// Running counters. All fields monotonically increase for the lifetime of
/// a parser unless [`MspParser::reset_stats`] is called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MspStats {
    pub packets_received: u64,
    pub packets_v1: u64,
    pub packets_v2: u64,
    pub errors: u64,
    pub bad_length: u64,
    pub bad_checksum: u64,
}

/// A resumable MSP v1/v2 parser. See module docs for the scheduling model.
pub struct MspParser {
    state: State,
    version: MspVersion,
    direction: Direction,
    flag: u8,
    command: u16,
    length: usize,
    payload: Vec<u8>,
    /// For v2, accumulated over [flag, cmd_lo, cmd_hi, len_lo, len_hi, payload...].
    v2_crc_bytes: Vec<u8>,
    stats: MspStats,
    now_ms: u64,
}

impl Default for MspParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MspParser {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            version: MspVersion::V1,
            direction: Direction::Request,
            flag: 0,
            command: 0,
            length: 0,
            payload: Vec::new(),
            v2_crc_bytes: Vec::new(),
            stats: MspStats::default(),
            now_ms: 0,
        }
    }

    /// Consume `bytes`, returning every packet completed while processing
    /// them, in wire order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<MspPacket> {
        let mut out = Vec::new();
        for &byte in bytes {
            self.now_ms = self.now_ms.wrapping_add(1);
            if let Some(packet) = self.feed_byte(byte) {
                out.push(packet);
            }
        }
        out
    }

    /// Clear parsing state (mid-frame progress) without touching statistics.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.payload.clear();
        self.v2_crc_bytes.clear();
    }

    /// Clear statistics counters only.
    pub fn reset_stats(&mut self) {
        self.stats = MspStats::default();
    }

    pub fn stats(&self) -> MspStats {
        self.stats
    }

    fn feed_byte(&mut self, byte: u8) -> Option<MspPacket> {
        match self.state {
            State::Idle => {
                if byte == b'$' {
                    self.payload.clear();
                    self.v2_crc_bytes.clear();
                    self.state = State::HeaderM;
                }
                // Any other byte: stray, silently dropped, stay in IDLE.
                None
            }
            State::HeaderM => {
                match byte {
                    b'M' => {
                        self.version = MspVersion::V1;
                        self.state = State::HeaderDirection;
                    }
                    b'X' => {
                        self.version = MspVersion::V2;
                        self.state = State::HeaderDirection;
                    }
                    _ => self.state = State::Idle,
                }
                None
            }
            State::HeaderDirection => {
                match Direction::from_byte(byte) {
                    Some(dir) => {
                        if dir == Direction::Error {
                            self.stats.errors += 1;
                        }
                        self.direction = dir;
                        self.state = match self.version {
                            MspVersion::V1 => State::V1Length,
                            MspVersion::V2 => State::V2Flag,
                        };
                    }
                    None => self.state = State::Idle,
                }
                None
            }

            // ---- MSP v1 ----
            State::V1Length => {
                if byte as usize > MspPacket::max_payload_len(MspVersion::V1) {
                    self.stats.bad_length += 1;
                    self.state = State::Idle;
                    return None;
                }
                self.length = byte as usize;
                self.state = State::V1Command;
                None
            }
            State::V1Command => {
                self.command = byte as u16;
                self.state = if self.length > 0 {
                    State::V1Payload
                } else {
                    State::V1Checksum
                };
                None
            }
            State::V1Payload => {
                self.payload.push(byte);
                if self.payload.len() >= self.length {
                    self.state = State::V1Checksum;
                }
                None
            }
            State::V1Checksum => {
                self.state = State::Idle;
                let expected = msp_v1(self.length as u8, self.command as u8, &self.payload);
                if byte == expected {
                    self.stats.packets_received += 1;
                    self.stats.packets_v1 += 1;
                    Some(self.build_packet(byte))
                } else {
                    self.stats.bad_checksum += 1;
                    None
                }
            }

            // ---- MSP v2 ----
            State::V2Flag => {
                self.flag = byte;
                self.v2_crc_bytes.clear();
                self.v2_crc_bytes.push(byte);
                self.state = State::V2CommandLo;
                None
            }
            State::V2CommandLo => {
                self.command = byte as u16;
                self.v2_crc_bytes.push(byte);
                self.state = State::V2CommandHi;
                None
            }
            State::V2CommandHi => {
                self.command |= (byte as u16) << 8;
                self.v2_crc_bytes.push(byte);
                self.state = State::V2LengthLo;
                None
            }
            State::V2LengthLo => {
                self.length = byte as usize;
                self.v2_crc_bytes.push(byte);
                self.state = State::V2LengthHi;
                None
            }
            State::V2LengthHi => {
                self.length |= (byte as usize) << 8;
                self.v2_crc_bytes.push(byte);
                if self.length > MspPacket::max_payload_len(MspVersion::V2) {
                    self.stats.bad_length += 1;
                    self.state = State::Idle;
                    return None;
                }
                self.state = if self.length > 0 {
                    State::V2Payload
                } else {
                    State::V2Crc
                };
                None
            }
            State::V2Payload => {
                self.payload.push(byte);
                self.v2_crc_bytes.push(byte);
                if self.payload.len() >= self.length {
                    self.state = State::V2Crc;
                }
                None
            }
            State::V2Crc => {
                self.state = State::Idle;
                let expected = crc8_dvb_s2(&self.v2_crc_bytes);
                if byte == expected {
                    self.stats.packets_received += 1;
                    self.stats.packets_v2 += 1;
                    Some(self.build_packet(byte))
                } else {
                    self.stats.bad_checksum += 1;
                    None
                }
            }
        }
    }

    fn build_packet(&mut self, checksum: u8) -> MspPacket {
        let packet = MspPacket {
            version: self.version,
            direction: self.direction,
            flag: if self.version == MspVersion::V2 {
                self.flag
            } else {
                0
            },
            command: self.command,
            payload: std::mem::take(&mut self.payload),
            checksum,
            timestamp: self.now_ms,
        };
        self.v2_crc_bytes.clear();
        packet
    }
}
