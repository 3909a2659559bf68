//! Error taxonomy for the flight-controller communication and firmware-update core.

use thiserror::Error;

/// Result type alias used throughout the core.
pub type CoreResult<T> = Result<T, CoreError>;

/// DFU device state, reported by `GETSTATUS`, carried on [`CoreError::Dfu`]
/// for diagnostic context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuState {
    AppIdle,
    AppDetach,
    DfuIdle,
    DfuDnloadSync,
    DfuDnBusy,
    DfuDnloadIdle,
    DfuManifestSync,
    DfuManifest,
    DfuManifestWaitReset,
    DfuUploadIdle,
    DfuError,
}

/// DFU status codes (the `bStatus` field of `GETSTATUS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuStatus {
    Ok,
    ErrTarget,
    ErrFile,
    ErrWrite,
    ErrErase,
    ErrCheckErased,
    ErrProg,
    ErrVerify,
    ErrAddress,
    ErrNotDone,
    ErrFirmware,
    ErrVendor,
    ErrUsbr,
    ErrPor,
    ErrUnknown,
    ErrStalledPkt,
}

impl DfuStatus {
    /// Human-readable description, used both for logging and the
    /// surfaced [`CoreError::Dfu`] message.
    pub fn description(&self) -> &'static str {
        match self {
            DfuStatus::Ok => "No error",
            DfuStatus::ErrTarget => "File is not targeted for this device",
            DfuStatus::ErrFile => "File is for this device but fails vendor checks",
            DfuStatus::ErrWrite => "Device is unable to write memory",
            DfuStatus::ErrErase => "Memory erase failed",
            DfuStatus::ErrCheckErased => "Memory erase check failed",
            DfuStatus::ErrProg => "Program memory function failed",
            DfuStatus::ErrVerify => "Verification failed",
            DfuStatus::ErrAddress => "Address out of range",
            DfuStatus::ErrNotDone => "Device did not receive enough data",
            DfuStatus::ErrFirmware => "Firmware is corrupt and cannot be used",
            DfuStatus::ErrVendor => "Vendor-specific error",
            DfuStatus::ErrUsbr => "USB reset signalled while in DFU mode",
            DfuStatus::ErrPor => "Device detected unexpected power-on reset",
            DfuStatus::ErrUnknown => "Unknown error",
            DfuStatus::ErrStalledPkt => "Device stalled an unexpected request",
        }
    }
}

/// Error kinds surfaced by any layer of the core.
///
/// Every fallible transport/protocol/file operation returns this type so
/// callers can match on a single taxonomy rather than per-module errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Fewer bytes remained in a reader than the caller requested.
    #[error("short read: requested {requested} bytes, {available} available")]
    ShortRead { requested: usize, available: usize },

    /// A declared frame length exceeded the protocol maximum.
    #[error("bad length: {length} exceeds protocol maximum {max}")]
    BadLength { length: usize, max: usize },

    /// A frame's checksum/CRC did not match.
    #[error("bad checksum: expected 0x{expected:02X}, got 0x{actual:02X}")]
    BadChecksum { expected: u32, actual: u32 },

    /// A request or bootloader wait exceeded its deadline.
    #[error("timed out after {elapsed_ms}ms waiting for {what}")]
    Timeout { what: String, elapsed_ms: u64 },

    /// A bootloader replied with NACK to a command.
    #[error("command rejected (NACK): {command}")]
    Rejected { command: String },

    /// MSP responded in error direction (`!`).
    #[error("command {command:#06x} not supported by firmware")]
    UnsupportedCommand { command: u16 },

    /// DFU upload-after-write verification did not match the source image.
    #[error("verification failed at offset 0x{offset:08X}")]
    VerifyFailed { offset: u32 },

    /// USART `WRITE_MEMORY` chunk retries were exhausted.
    #[error("write failed at address 0x{address:08X} after exhausting retries")]
    WriteFailed { address: u32 },

    /// The firmware image is larger than the chip's advertised flash size.
    #[error(
        "firmware image is {image_size} bytes, exceeds {flash_size} bytes of flash on {chip}"
    )]
    FirmwareTooLarge {
        chip: String,
        image_size: u64,
        flash_size: u64,
    },

    /// Operation was cancelled by the caller.
    #[error("operation aborted")]
    Aborted,

    /// The underlying transport (serial port or USB device) closed mid-operation.
    #[error("transport closed unexpectedly")]
    TransportClosed,

    /// A firmware file failed to parse.
    #[error("failed to parse firmware file: {reason}")]
    ParseError { reason: String },

    /// Low-level USB control-transfer failure.
    #[error("USB error: {0}")]
    Usb(String),

    /// Low-level serial port failure.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Generic I/O failure (file system, or a transport's underlying stream).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// DFU-specific error carrying device state and status for diagnostics.
    #[error("DFU error in state {state:?}: {}", status.description())]
    Dfu { state: DfuState, status: DfuStatus },

    /// The process-wide flash mutex is already held.
    #[error("another flash operation is already in progress")]
    LockBusy,

    /// Network failure while downloading firmware.
    #[error("network error: {0}")]
    Network(String),

    /// JSON (de)serialization failure, e.g. settings or cache index.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether retrying the same operation unchanged has a reasonable chance
    /// of succeeding. Matches the bootloaders' own retry policy: transient
    /// timing issues are retriable, structural/content errors are not.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CoreError::Timeout { .. } | CoreError::Rejected { .. }
        )
    }

    /// Convenience constructor for a timeout with an elapsed duration.
    pub fn timeout(what: impl Into<String>, elapsed: std::time::Duration) -> Self {
        CoreError::Timeout {
            what: what.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// The recovery-oriented message shown to a user when the USART
    /// bootloader fails to synchronize.
    pub fn usart_sync_failure_message() -> String {
        "Could not reach the STM32 bootloader over the serial port. Short the BOOT pads \
         (or hold the BOOT button), reconnect the USB cable, and try again."
            .to_string()
    }
}
