//! Request/response coordination on top of the MSP parser.
//!
//! [`MspTransport`] owns a byte stream and the parser, serializes outbound
//! requests, and matches replies back to the request that caused them. Only
//! one request per command ID may be outstanding at a time; a second send
//! for the same command while the first is still pending is rejected rather
//! than queued, since MSP gives no way to distinguish two in-flight replies
//! to the same command.
//!
//! [`ConnectionContext`] is the higher-level session handle commands reach
//! for: it drives the handshake (API version / FC variant / board info),
//! tracks whether the link is parked in CLI mode, and exposes the
//! configuration lock that pauses telemetry dispatch while a multi-step
//! settings change is in progress.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult};

use super::packet::{Direction, MspPacket};
use super::parser::MspParser;
use super::serializer::serialize;

/// Default per-request timeout. Erase-adjacent commands need a longer
/// budget, passed explicitly via [`MspTransport::send_with_timeout`].
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1_000;
/// Upper bound accepted by [`MspTransport::send_with_timeout`] (e.g. for a
/// command that triggers a chip erase on the flight controller side).
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Minimal byte-stream abstraction `MspTransport` needs from its carrier.
/// Implemented by a serial port in production and by an in-memory buffer
/// in tests.
pub trait ByteStream: Send {
    fn write(&mut self, data: &[u8]) -> CoreResult<()>;
    /// Read up to `buffer.len()` bytes, waiting at most `timeout_ms`.
    /// Returns `Ok(0)` on timeout rather than an error, matching the
    /// underlying serial port's semantics.
    fn read(&mut self, buffer: &mut [u8], timeout_ms: u64) -> CoreResult<usize>;
}

/// Request/response engine over a single MSP-speaking byte stream.
pub struct MspTransport<S: ByteStream> {
    stream: S,
    parser: MspParser,
    /// Guards against overlapping sends; held only for the duration of a
    /// single `send_with_timeout` call, but kept as an explicit field so a
    /// transport shared behind `Arc<Mutex<_>>` at the command layer can
    /// observe contention instead of silently serializing on the outer lock.
    request_lock: Mutex<()>,
    in_flight: HashSet<u16>,
    /// Packets observed that didn't match the request awaited. Surfaced to
    /// callers via `drain_telemetry` rather than dropped, unless config-lock
    /// depth is nonzero.
    telemetry: Vec<MspPacket>,
    config_lock_depth: u32,
}

impl<S: ByteStream> MspTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            parser: MspParser::new(),
            request_lock: Mutex::new(()),
            in_flight: HashSet::new(),
            telemetry: Vec::new(),
            config_lock_depth: 0,
        }
    }

    /// Send `command`/`payload` and wait up to [`DEFAULT_REQUEST_TIMEOUT_MS`]
    /// for the matching reply.
    pub fn send(&mut self, command: u16, payload: &[u8]) -> CoreResult<MspPacket> {
        self.send_with_timeout(command, payload, DEFAULT_REQUEST_TIMEOUT_MS)
    }

    /// Send `command`/`payload`, waiting up to `timeout_ms` (clamped to
    /// [`MAX_REQUEST_TIMEOUT_MS`]) for the matching reply.
    pub fn send_with_timeout(
        &mut self,
        command: u16,
        payload: &[u8],
        timeout_ms: u64,
    ) -> CoreResult<MspPacket> {
        let timeout_ms = timeout_ms.min(MAX_REQUEST_TIMEOUT_MS);
        let _guard = self
            .request_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.in_flight.insert(command) {
            return Err(CoreError::Rejected {
                command: format!("{command:#06x} (already outstanding)"),
            });
        }

        let result = self.send_with_timeout_locked(command, payload, timeout_ms);
        self.in_flight.remove(&command);
        result
    }

    fn send_with_timeout_locked(
        &mut self,
        command: u16,
        payload: &[u8],
        timeout_ms: u64,
    ) -> CoreResult<MspPacket> {
        let frame = serialize(Direction::Request, command, payload);
        self.stream.write(&frame)?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut buf = [0u8; 256];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::timeout(
                    format!("response to command {command:#06x}"),
                    Duration::from_millis(timeout_ms),
                ));
            }

            let n = self.stream.read(&mut buf, remaining.as_millis() as u64)?;
            if n == 0 {
                continue;
            }

            for packet in self.parser.feed(&buf[..n]) {
                if packet.command == command {
                    if packet.direction == Direction::Error {
                        return Err(CoreError::UnsupportedCommand { command });
                    }
                    return Ok(packet);
                }
                self.push_telemetry(packet);
            }
        }
    }

    fn push_telemetry(&mut self, packet: MspPacket) {
        if self.config_lock_depth == 0 {
            self.telemetry.push(packet);
        }
        // Dropped while the configuration lock is held: the caller is mid
        // multi-step settings change and isn't polling telemetry anyway.
    }

    /// Take any packets that arrived while awaiting a different command's
    /// reply (or were pushed by passive reads, once those are wired in).
    pub fn drain_telemetry(&mut self) -> Vec<MspPacket> {
        std::mem::take(&mut self.telemetry)
    }

    /// Enter the configuration lock: telemetry arriving from here on is
    /// dropped instead of queued, until every nested guard is dropped.
    /// Reentrant, matching settings flows that call several MSP setters in
    /// sequence without wanting telemetry interleaved with the responses.
    pub fn lock_config(&mut self) {
        self.config_lock_depth += 1;
    }

    pub fn unlock_config(&mut self) {
        self.config_lock_depth = self.config_lock_depth.saturating_sub(1);
    }

    pub fn config_locked(&self) -> bool {
        self.config_lock_depth > 0
    }

    pub fn parser_stats(&self) -> super::parser::MspStats {
        self.parser.stats()
    }
}

/// `#`-escape CLI fallback, used when a command isn't supported over MSP.
const CLI_ESCAPE_BYTE: u8 = b'#';
const CLI_EXIT_COMMAND: &str = "exit\r\n";
const CLI_READ_TIMEOUT_MS: u64 = 2_000;

/// Session-level handle: wraps [`MspTransport`] with the identity
/// information gathered during connect, and tracks whether the link is
/// currently parked in the text CLI instead of speaking MSP frames.
pub struct ConnectionContext<S: ByteStream> {
    transport: MspTransport<S>,
    in_cli_mode: bool,
    pub api_version: Option<super::registry::ApiVersion>,
    pub fc_variant: Option<super::registry::FirmwareVariant>,
    pub board_info: Option<super::registry::BoardInfo>,
}

impl<S: ByteStream> ConnectionContext<S> {
    pub fn new(stream: S) -> Self {
        Self {
            transport: MspTransport::new(stream),
            in_cli_mode: false,
            api_version: None,
            fc_variant: None,
            board_info: None,
        }
    }

    /// Run the identity handshake: API version, FC variant, board info.
    /// A command that the firmware doesn't support is tolerated — older
    /// firmware may not answer `MSP_BOARD_INFO`'s extended tail, for
    /// instance — and simply leaves that field `None`.
    pub fn handshake(&mut self) -> CoreResult<()> {
        if let Ok(packet) = self.transport.send(super::registry::command::MSP_API_VERSION, &[]) {
            self.api_version = super::registry::decode_api_version(&packet.payload).ok();
        }
        if let Ok(packet) = self.transport.send(super::registry::command::MSP_FC_VARIANT, &[]) {
            self.fc_variant = super::registry::decode_fc_variant(&packet.payload).ok();
        }
        if let Ok(packet) = self.transport.send(super::registry::command::MSP_BOARD_INFO, &[]) {
            self.board_info = super::registry::decode_board_info(&packet.payload).ok();
        }
        Ok(())
    }

    pub fn transport(&mut self) -> &mut MspTransport<S> {
        &mut self.transport
    }

    pub fn is_cli_mode(&self) -> bool {
        self.in_cli_mode
    }

    /// Escape into the text CLI. Once here, callers use [`Self::cli_send`]
    /// instead of MSP requests until [`Self::exit_cli`].
    pub fn enter_cli(&mut self) -> CoreResult<()> {
        self.transport.stream.write(&[CLI_ESCAPE_BYTE])?;
        self.in_cli_mode = true;
        Ok(())
    }

    /// Send a raw CLI line and collect whatever text arrives within the CLI
    /// read timeout. The CLI has no frame boundary, so this is best-effort:
    /// callers that need a specific prompt should poll again.
    pub fn cli_send(&mut self, line: &str) -> CoreResult<String> {
        if !self.in_cli_mode {
            return Err(CoreError::Rejected {
                command: "cli_send called outside CLI mode".to_string(),
            });
        }
        let mut out = String::new();
        out.push_str(line);
        out.push_str("\r\n");
        self.transport.stream.write(out.as_bytes())?;

        let mut buf = [0u8; 512];
        let n = self.transport.stream.read(&mut buf, CLI_READ_TIMEOUT_MS)?;
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// Leave the CLI and resume MSP framing.
    pub fn exit_cli(&mut self) -> CoreResult<()> {
        self.transport.stream.write(CLI_EXIT_COMMAND.as_bytes())?;
        self.in_cli_mode = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory stand-in for a serial port: `to_send` is what `read` hands
    /// back (pre-seeded with encoded response frames), `written` records
    /// every `write` call for assertions.
    struct MockStream {
        to_send: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl MockStream {
        fn with_reply(frame: &[u8]) -> Self {
            Self {
                to_send: frame.iter().copied().collect(),
                written: Vec::new(),
            }
        }
    }

    impl ByteStream for MockStream {
        fn write(&mut self, data: &[u8]) -> CoreResult<()> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn read(&mut self, buffer: &mut [u8], _timeout_ms: u64) -> CoreResult<usize> {
            let mut n = 0;
            while n < buffer.len() {
                match self.to_send.pop_front() {
                    Some(b) => {
                        buffer[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    #[test]
    fn send_matches_reply_by_command_id() {
        let reply = serialize(Direction::Response, 100, &[1, 2, 3]);
        let stream = MockStream::with_reply(&reply);
        let mut transport = MspTransport::new(stream);

        let packet = transport.send(100, &[]).unwrap();
        assert_eq!(packet.command, 100);
        assert_eq!(packet.payload, vec![1, 2, 3]);
    }

    #[test]
    fn send_times_out_when_no_reply_arrives() {
        let stream = MockStream {
            to_send: VecDeque::new(),
            written: Vec::new(),
        };
        let mut transport = MspTransport::new(stream);
        let result = transport.send_with_timeout(101, &[], 1);
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }

    #[test]
    fn error_direction_reply_surfaces_unsupported_command() {
        let reply = serialize(Direction::Error, 200, &[]);
        let stream = MockStream::with_reply(&reply);
        let mut transport = MspTransport::new(stream);
        let result = transport.send(200, &[]);
        assert!(matches!(
            result,
            Err(CoreError::UnsupportedCommand { command: 200 })
        ));
    }

    #[test]
    fn unrelated_reply_is_queued_as_telemetry_not_dropped() {
        let mut reply = serialize(Direction::Response, 102, &[9, 9]); // unrelated
        reply.extend(serialize(Direction::Response, 100, &[])); // the one we want
        let stream = MockStream::with_reply(&reply);
        let mut transport = MspTransport::new(stream);

        let packet = transport.send(100, &[]).unwrap();
        assert_eq!(packet.command, 100);

        let telemetry = transport.drain_telemetry();
        assert_eq!(telemetry.len(), 1);
        assert_eq!(telemetry[0].command, 102);
    }

    #[test]
    fn telemetry_is_dropped_while_config_locked() {
        let mut reply = serialize(Direction::Response, 102, &[]);
        reply.extend(serialize(Direction::Response, 100, &[]));
        let stream = MockStream::with_reply(&reply);
        let mut transport = MspTransport::new(stream);

        transport.lock_config();
        let _ = transport.send(100, &[]).unwrap();
        assert!(transport.drain_telemetry().is_empty());

        transport.unlock_config();
        assert!(!transport.config_locked());
    }

    #[test]
    fn duplicate_in_flight_command_is_rejected() {
        // Exercise the guard directly: mark a command in-flight, then try
        // to send it again before it's cleared.
        let stream = MockStream {
            to_send: VecDeque::new(),
            written: Vec::new(),
        };
        let mut transport = MspTransport::new(stream);
        transport.in_flight.insert(100);
        let result = transport.send_with_timeout(100, &[], 1);
        assert!(matches!(result, Err(CoreError::Rejected { .. })));
    }

    #[test]
    fn cli_send_outside_cli_mode_is_rejected() {
        let stream = MockStream {
            to_send: VecDeque::new(),
            written: Vec::new(),
        };
        let mut ctx = ConnectionContext::new(stream);
        assert!(ctx.cli_send("status").is_err());
    }

    #[test]
    fn enter_and_exit_cli_mode_toggles_state() {
        let stream = MockStream {
            to_send: VecDeque::new(),
            written: Vec::new(),
        };
        let mut ctx = ConnectionContext::new(stream);
        ctx.enter_cli().unwrap();
        assert!(ctx.is_cli_mode());
        ctx.exit_cli().unwrap();
        assert!(!ctx.is_cli_mode());
    }
}
