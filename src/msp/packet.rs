//! MSP packet types shared by the parser and serializer.

/// Protocol generation a frame was encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MspVersion {
    V1,
    V2,
}

/// The direction character in the frame header: `<` request, `>` response,
/// `!` error (the target flipped the direction bit to report a failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    Error,
}

impl Direction {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'<' => Some(Direction::Request),
            b'>' => Some(Direction::Response),
            b'!' => Some(Direction::Error),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Direction::Request => b'<',
            Direction::Response => b'>',
            Direction::Error => b'!',
        }
    }
}

/// A validated MSP frame, as yielded by the parser or consumed by the
/// serializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MspPacket {
    pub version: MspVersion,
    pub direction: Direction,
    /// Always 0 for v1 frames (v1 carries no flag byte).
    pub flag: u8,
    pub command: u16,
    pub payload: Vec<u8>,
    pub checksum: u8,
    /// Monotonic milliseconds at the time the frame was fully parsed.
    pub timestamp: u64,
}

impl MspPacket {
    /// Maximum payload length for the given version (255 for v1, 65535 for v2).
    pub fn max_payload_len(version: MspVersion) -> usize {
        match version {
            MspVersion::V1 => 255,
            MspVersion::V2 => 65535,
        }
    }
}
