//! Transport-facing abstractions the flashers and MSP stack are generic
//! over, mocked in tests with `mockall`.
//!
//! DTR/RTS control-line manipulation is an explicit capability on the
//! transport rather than an ad hoc downcast.

use crate::error::{CoreError, CoreResult};

#[cfg(test)]
use mockall::automock;

/// Byte-oriented serial transport used by the USART bootloader flasher and
/// (via `crate::msp::transport::ByteStream`) the MSP stack. A production
/// implementation wraps a `Box<dyn serialport::SerialPort>`; tests use an
/// in-memory stand-in or this trait's `automock`.
#[cfg_attr(test, automock)]
pub trait SerialTransport: Send {
    fn write(&mut self, data: &[u8]) -> CoreResult<()>;
    /// Read up to `buffer.len()` bytes, waiting at most `timeout_ms`.
    /// Returns `Ok(0)` on timeout, matching `serialport`'s blocking-read
    /// semantics translated at the edge.
    fn read(&mut self, buffer: &mut [u8], timeout_ms: u64) -> CoreResult<usize>;
    /// Discard any buffered input, used before bootloader retry attempts.
    fn clear_input(&mut self) -> CoreResult<()>;
    fn set_dtr(&mut self, level: bool) -> CoreResult<()>;
    fn set_rts(&mut self, level: bool) -> CoreResult<()>;
    /// Re-open the underlying port at a new baud rate, used when the
    /// USART sync loop steps down the baud ladder.
    fn set_baud_rate(&mut self, baud: u32) -> CoreResult<()>;
}

/// A single USB control transfer direction/target, as issued by the DFU
/// flasher. Mirrors the `bmRequestType` byte without requiring callers to
/// hand-assemble it: `0x21` (host-to-device, class, interface) and `0xA1`
/// (device-to-host, class, interface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlDirection {
    Out,
    In,
}

/// USB transport used by the DFU/DfuSe flasher: class-level control
/// transfers targeting the DFU interface, plus the interface claim/release
/// lifecycle and the functional/string descriptors the flasher needs to
/// read once at open time.
#[cfg_attr(test, automock)]
pub trait UsbTransport: Send {
    /// Issue a control transfer. `request` is the DFU bRequest value,
    /// `value`/`index` are the wValue/wIndex fields, `data` is written for
    /// [`ControlDirection::Out`] and filled for [`ControlDirection::In`]
    /// (the returned `usize` is the number of bytes actually transferred).
    fn control_transfer(
        &mut self,
        direction: ControlDirection,
        request: u8,
        value: u16,
        data: &mut [u8],
    ) -> CoreResult<usize>;

    /// The DFU functional descriptor's `transferSize` field, or the DFU 1.0
    /// default of 2048 bytes if the descriptor couldn't be parsed.
    fn transfer_size(&self) -> u16;

    /// The DFU interface's string descriptor (interface 0's string, index
    /// `iInterface`), used to parse the memory layout via
    /// [`crate::flash::memory_layout::MemoryLayout`].
    fn interface_string(&self) -> CoreResult<String>;

    /// Issue a USB bus reset, used after `READ_UNPROTECT` and at the end
    /// of a manifest that leaves the device unresponsive to further
    /// control transfers.
    fn reset(&mut self) -> CoreResult<()>;
}

/// `SerialTransport` backed by a real `serialport` port, mirroring
/// `dfu::transport::SerialTransport`'s open-with-retry and DTR/RTS
/// handling but generalized to the USART bootloader's baud-ladder sync
/// (which needs to change the baud rate on an already-open port rather
/// than only at open time).
pub struct SerialPortTransport {
    port: Box<dyn serialport::SerialPort>,
}

const OPEN_RETRY_ATTEMPTS: u32 = 10;
const OPEN_RETRY_DELAY_MS: u64 = 200;

impl SerialPortTransport {
    /// Open `port_name` at `baud`, retrying past the transient failures a
    /// device re-enumerating into bootloader mode can produce.
    pub fn open(port_name: &str, baud: u32) -> CoreResult<Self> {
        let normalized = normalize_port_name(port_name);
        let mut last_err = None;

        for attempt in 0..OPEN_RETRY_ATTEMPTS {
            match serialport::new(&normalized, baud)
                .timeout(std::time::Duration::from_millis(250))
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::Even)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .open()
            {
                Ok(port) => return Ok(Self { port }),
                Err(e) => {
                    let transient = e.to_string().to_lowercase().contains("not functioning")
                        || e.to_string().to_lowercase().contains("temporarily unavailable")
                        || e.to_string().to_lowercase().contains("interrupted");
                    if transient && attempt + 1 < OPEN_RETRY_ATTEMPTS {
                        std::thread::sleep(std::time::Duration::from_millis(OPEN_RETRY_DELAY_MS));
                        last_err = Some(e);
                        continue;
                    }
                    return Err(CoreError::Serial(e));
                }
            }
        }
        Err(CoreError::Serial(
            last_err.expect("loop always assigns before exhausting retries"),
        ))
    }
}

impl SerialTransport for SerialPortTransport {
    fn write(&mut self, data: &[u8]) -> CoreResult<()> {
        use std::io::Write;
        self.port.write_all(data).map_err(CoreError::Io)
    }

    fn read(&mut self, buffer: &mut [u8], timeout_ms: u64) -> CoreResult<usize> {
        use std::io::Read;
        self.port
            .set_timeout(std::time::Duration::from_millis(timeout_ms))
            .map_err(CoreError::Serial)?;
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    fn clear_input(&mut self) -> CoreResult<()> {
        self.port.clear(serialport::ClearBuffer::Input).map_err(CoreError::Serial)
    }

    fn set_dtr(&mut self, level: bool) -> CoreResult<()> {
        self.port.write_data_terminal_ready(level).map_err(CoreError::Serial)
    }

    fn set_rts(&mut self, level: bool) -> CoreResult<()> {
        self.port.write_request_to_send(level).map_err(CoreError::Serial)
    }

    fn set_baud_rate(&mut self, baud: u32) -> CoreResult<()> {
        self.port.set_baud_rate(baud).map_err(CoreError::Serial)
    }
}

/// Cross-platform port-name normalization: macOS prefers `/dev/cu.*` over
/// `/dev/tty.*` (the latter blocks waiting for DCD), Windows needs the
/// `\\.\` prefix for COM ports above 9.
fn normalize_port_name(name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        if name.starts_with("/dev/tty.") {
            return name.replace("/dev/tty.", "/dev/cu.");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Some(digits) = name.strip_prefix("COM") {
            if let Ok(n) = digits.parse::<u32>() {
                if n > 9 {
                    return format!("\\\\.\\{name}");
                }
            }
        }
    }
    name.to_string()
}

/// DFU functional descriptor type, read from an interface's "extra"
/// descriptor bytes; `LENGTH` includes the 2-byte header.
const DFU_FUNCTIONAL_DESCRIPTOR_TYPE: u8 = 0x21;
const DFU_FUNCTIONAL_DESCRIPTOR_LENGTH: usize = 9;
const DFU_INTERFACE_CLASS: u8 = 0xFE;
const DFU_INTERFACE_SUBCLASS: u8 = 0x01;
const DEFAULT_DFU_TRANSFER_SIZE: u16 = 2048;

/// `UsbTransport` backed by a real `nusb` device/interface, grounded on the
/// DFU interface discovery and functional-descriptor scan used to read a
/// Black Magic Probe's DFU endpoint.
pub struct NusbTransport {
    interface: nusb::Interface,
    transfer_size: u16,
    interface_number: u8,
    string_index: Option<u8>,
    language: u16,
    device: nusb::Device,
}

impl NusbTransport {
    /// Open the first device matching `vid`/`pid`, claim its DFU interface
    /// (class `0xFE`, subclass `0x01`), and parse the functional
    /// descriptor for `wTransferSize`.
    pub fn open(vid: u16, pid: u16) -> CoreResult<Self> {
        let device_info = nusb::list_devices()
            .map_err(|e| CoreError::Usb(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or_else(|| CoreError::Usb(format!("no USB device matching {vid:04x}:{pid:04x}")))?;

        let device = device_info.open().map_err(|e| CoreError::Usb(e.to_string()))?;
        let config = device
            .active_configuration()
            .map_err(|e| CoreError::Usb(e.to_string()))?;

        let dfu_interface = config
            .interfaces()
            .find(|iface| {
                iface
                    .alt_settings()
                    .any(|alt| alt.class() == DFU_INTERFACE_CLASS && alt.subclass() == DFU_INTERFACE_SUBCLASS)
            })
            .ok_or_else(|| CoreError::Usb("no DFU interface on device".to_string()))?;

        let alt = dfu_interface
            .alt_settings()
            .next()
            .ok_or_else(|| CoreError::Usb("DFU interface has no alt setting".to_string()))?;
        let interface_number = alt.interface_number();
        let string_index = alt.interface_string_index();

        let transfer_size = alt
            .descriptors()
            .as_bytes()
            .windows(DFU_FUNCTIONAL_DESCRIPTOR_LENGTH)
            .find(|w| w[1] == DFU_FUNCTIONAL_DESCRIPTOR_TYPE)
            .map(|w| u16::from_le_bytes([w[4], w[5]]))
            .unwrap_or(DEFAULT_DFU_TRANSFER_SIZE);

        let interface = device
            .claim_interface(interface_number)
            .map_err(|e| CoreError::Usb(e.to_string()))?;

        let language = device
            .get_string_descriptor_supported_languages(std::time::Duration::from_secs(2))
            .ok()
            .and_then(|mut langs| langs.next())
            .unwrap_or(0x0409);

        Ok(Self {
            interface,
            transfer_size,
            interface_number,
            string_index,
            language,
            device,
        })
    }
}

impl UsbTransport for NusbTransport {
    fn control_transfer(
        &mut self,
        direction: ControlDirection,
        request: u8,
        value: u16,
        data: &mut [u8],
    ) -> CoreResult<usize> {
        let control = nusb::transfer::Control {
            control_type: nusb::transfer::ControlType::Class,
            recipient: nusb::transfer::Recipient::Interface,
            request,
            value,
            index: self.interface_number as u16,
        };
        let timeout = std::time::Duration::from_secs(5);
        match direction {
            ControlDirection::Out => self
                .interface
                .control_out_blocking(control, data, timeout)
                .map_err(|e| CoreError::Usb(e.to_string())),
            ControlDirection::In => self
                .interface
                .control_in_blocking(control, data, timeout)
                .map_err(|e| CoreError::Usb(e.to_string())),
        }
    }

    fn transfer_size(&self) -> u16 {
        self.transfer_size
    }

    fn interface_string(&self) -> CoreResult<String> {
        let index = self
            .string_index
            .ok_or_else(|| CoreError::Usb("DFU interface has no string descriptor".to_string()))?;
        self.device
            .get_string_descriptor(index, self.language, std::time::Duration::from_secs(2))
            .map_err(|e| CoreError::Usb(e.to_string()))
    }

    fn reset(&mut self) -> CoreResult<()> {
        self.interface.reset().map_err(|e| CoreError::Usb(e.to_string()))
    }
}
