//! STM32 flashing: two independent drivers (USART/AN3155 and USB DFU/DfuSe)
//! sharing a firmware-image input, a progress-event protocol, and a
//! process-wide mutex that keeps them from running concurrently against
//! the same board.

pub mod dfu_usb;
pub mod lock;
pub mod memory_layout;
pub mod options;
pub mod progress;
pub mod usart;

pub use lock::{FlashHolder, FlashLock};
pub use options::FlashOptions;
pub use progress::{FlashStage, ProgressEvent};
