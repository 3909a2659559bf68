pub mod transport;

#[allow(unused_imports)]
pub use transport::{ControlDirection, SerialTransport, UsbTransport};

#[cfg(test)]
pub use transport::{MockSerialTransport, MockUsbTransport};
