//! Flight-controller communication and firmware-update core.
//!
//! Three tightly coupled subsystems, per module:
//!
//! - [`msp`] — the Multiwii Serial Protocol v1/v2 parser, serializer,
//!   message registry, and request/response transport.
//! - [`firmware`] and [`flash`] — firmware image loading (Intel HEX,
//!   DfuSe, raw binary) and the two STM32 flashers (USART/AN3155, USB
//!   DFU/DfuSe) that consume it.
//! - [`board`], [`cache`], [`download`] — board detection, the
//!   flash-operation mutex, and the firmware downloader/cache that
//!   coordinate a flash from the UI's perspective.
//!
//! [`error`] defines the single error taxonomy every fallible operation in
//! the crate returns. [`traits`] defines the transport-facing
//! abstractions (`SerialTransport`, `UsbTransport`) the protocol and
//! flasher code is generic over, so it can run against real hardware or a
//! mock in tests without a feature flag.

pub mod board;
pub mod cache;
pub mod commands;
pub mod download;
pub mod error;
pub mod firmware;
pub mod flash;
pub mod msp;
pub mod settings;
pub mod traits;

#[cfg(test)]
pub mod test_helpers;
