//! Multiwii Serial Protocol (MSP) v1/v2 stack.
//!
//! This module provides a complete implementation of MSP request/response
//! communication with iNav and Betaflight-family flight controllers:
//!
//! 1. **Checksums** - XOR (v1) and CRC-8/DVB-S2 (v2) over the frame body.
//! 2. **Parser** - a resumable, single-threaded state machine that turns
//!    arbitrary byte chunks into validated [`MspPacket`]s.
//! 3. **Serializer** - deterministic frame construction for outbound requests.
//! 4. **Registry** - known command IDs with typed decoders for telemetry.
//! 5. **Transport** - request/response correlation, timeouts, the
//!    configuration lock, and CLI escape over a byte-oriented connection.
//!
//! # Example
//!
//! ```ignore
//! use flightcore_lib::msp::parser::MspParser;
//!
//! let mut parser = MspParser::new();
//! for packet in parser.feed(b"$M>\x00\x79\x79") {
//!     println!("command {:#x}", packet.command);
//! }
//! ```

pub mod buffer;
pub mod checksum;
pub mod packet;
pub mod parser;
pub mod registry;
pub mod serializer;
pub mod transport;

pub use packet::{Direction, MspPacket, MspVersion};
pub use parser::{MspParser, MspStats};
pub use serializer::serialize;
pub use transport::{ConnectionContext, MspTransport};
