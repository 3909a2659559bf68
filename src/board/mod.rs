//! Serial-port board detection.
//!
//! Scans `serialport::available_ports()`, filters by VID/PID, and dedupes
//! macOS `tty.*`/`cu.*` pairs against a small static board table plus an
//! ArduPilot fallback.

use serde::{Deserialize, Serialize};
use serialport::SerialPortType;

/// STM32's built-in USB DFU bootloader PID, shared across the whole family.
pub const STM32_DFU_VID: u16 = 0x0483;
pub const STM32_DFU_PID: u16 = 0xDF11;

/// ArduPilot's pid.codes-assigned vendor ID, covering every ChibiOS board
/// that hasn't been given its own [`KNOWN_BOARDS`] entry.
pub const ARDUPILOT_VID: u16 = 0x1209;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flasher {
    Dfu,
    Serial,
    Ardupilot,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    VidPid,
    Bootloader,
    Msp,
}

/// One row of the static board table: a known VID:PID pair and the
/// metadata that lookup fills into a [`DetectedBoard`].
struct KnownBoard {
    vid: u16,
    pid: u16,
    name: &'static str,
    mcu_type: &'static str,
    flasher: Flasher,
    in_bootloader: bool,
}

/// Recognized VID:PID pairs for common flight-controller and bootloader
/// presentations. Not exhaustive; misses fall through to the ArduPilot
/// vendor-ID heuristic or are left unidentified for higher-level probing.
static KNOWN_BOARDS: &[KnownBoard] = &[
    KnownBoard {
        vid: STM32_DFU_VID,
        pid: STM32_DFU_PID,
        name: "STM32 DFU Bootloader",
        mcu_type: "STM32",
        flasher: Flasher::Dfu,
        in_bootloader: true,
    },
    KnownBoard {
        vid: 0x0483,
        pid: 0x5740,
        name: "STM32 Virtual COM Port",
        mcu_type: "STM32F4",
        flasher: Flasher::Serial,
        in_bootloader: false,
    },
    KnownBoard {
        vid: 0x0403,
        pid: 0x6001,
        name: "FTDI USB-Serial (USART bootloader adapter)",
        mcu_type: "STM32",
        flasher: Flasher::Serial,
        in_bootloader: false,
    },
    KnownBoard {
        vid: 0x1EAF,
        pid: 0x0003,
        name: "Leaflabs Maple (STM32F1) Bootloader",
        mcu_type: "STM32F1",
        flasher: Flasher::Dfu,
        in_bootloader: true,
    },
];

fn lookup(vid: u16, pid: u16) -> Option<&'static KnownBoard> {
    KNOWN_BOARDS.iter().find(|b| b.vid == vid && b.pid == pid)
}

/// A board found by enumeration, or refined afterwards by a non-destructive
/// bootloader probe (`detection_method = bootloader`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedBoard {
    pub name: String,
    pub board_id: String,
    pub mcu_type: Option<String>,
    pub flasher: Flasher,
    pub port: Option<String>,
    pub usb_vid: u16,
    pub usb_pid: u16,
    pub in_bootloader: bool,
    pub detection_method: DetectionMethod,
    pub chip_id: Option<u16>,
    pub detected_mcu: Option<String>,
}

impl DetectedBoard {
    /// `true` iff the VID:PID is the STM32 DFU presentation or the
    /// matched known-board entry flags `in_bootloader`.
    pub fn is_bootloader_pid(vid: u16, pid: u16) -> bool {
        (vid, pid) == (STM32_DFU_VID, STM32_DFU_PID)
    }

    /// Record a refined chip identification from a non-destructive
    /// `GET_ID` probe, bumping `detection_method` to `bootloader`.
    pub fn with_bootloader_probe(mut self, chip_id: u16, detected_mcu: impl Into<String>) -> Self {
        self.chip_id = Some(chip_id);
        self.detected_mcu = Some(detected_mcu.into());
        self.detection_method = DetectionMethod::Bootloader;
        self
    }
}

/// One serial port as the host OS reports it, independent of the
/// `serialport` crate's type so detection logic is testable without a
/// real port list.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub manufacturer: Option<String>,
    pub friendly_name: Option<String>,
}

/// Run the detection algorithm over an already-collected port list. Split
/// out from [`detect_boards`] so tests can exercise it without touching
/// real hardware.
pub fn detect_from_ports(ports: Vec<PortInfo>) -> Vec<DetectedBoard> {
    let mut seen_vid_pid = Vec::new();
    let mut candidates: Vec<PortInfo> = ports
        .into_iter()
        .filter(|p| p.vendor_id.is_some() && p.product_id.is_some())
        .collect();

    // Deterministic "keep the first" across OS enumeration-order jitter:
    // the SPEC_FULL supplement to step 2, a stable sort by path before
    // deduplication.
    candidates.sort_by(|a, b| a.path.cmp(&b.path));

    let mut boards = Vec::new();
    for port in candidates {
        let vid = port.vendor_id.expect("filtered to Some above");
        let pid = port.product_id.expect("filtered to Some above");
        let key = (vid, pid);
        if seen_vid_pid.contains(&key) {
            continue;
        }
        seen_vid_pid.push(key);

        let in_bootloader_pid = DetectedBoard::is_bootloader_pid(vid, pid);

        if let Some(known) = lookup(vid, pid) {
            boards.push(DetectedBoard {
                name: known.name.to_string(),
                board_id: format!("{:04x}:{:04x}", vid, pid),
                mcu_type: Some(known.mcu_type.to_string()),
                flasher: known.flasher,
                port: Some(port.path.clone()),
                usb_vid: vid,
                usb_pid: pid,
                in_bootloader: known.in_bootloader || in_bootloader_pid,
                detection_method: DetectionMethod::VidPid,
                chip_id: None,
                detected_mcu: None,
            });
            continue;
        }

        if vid == ARDUPILOT_VID {
            boards.push(DetectedBoard {
                name: port
                    .friendly_name
                    .clone()
                    .unwrap_or_else(|| "ArduPilot ChibiOS board".to_string()),
                board_id: format!("{:04x}:{:04x}", vid, pid),
                mcu_type: None,
                flasher: Flasher::Ardupilot,
                port: Some(port.path.clone()),
                usb_vid: vid,
                usb_pid: pid,
                in_bootloader: in_bootloader_pid,
                detection_method: DetectionMethod::VidPid,
                chip_id: None,
                detected_mcu: None,
            });
            continue;
        }

        // Unidentified candidate: still surfaced for higher-level MSP
        // auto-detect.
        boards.push(DetectedBoard {
            name: port
                .friendly_name
                .clone()
                .unwrap_or_else(|| format!("Unknown device ({:04x}:{:04x})", vid, pid)),
            board_id: format!("{:04x}:{:04x}", vid, pid),
            mcu_type: None,
            flasher: Flasher::Unknown,
            port: Some(port.path.clone()),
            usb_vid: vid,
            usb_pid: pid,
            in_bootloader: in_bootloader_pid,
            detection_method: DetectionMethod::VidPid,
            chip_id: None,
            detected_mcu: None,
        });
    }

    boards
}

/// Enumerate attached boards via the OS's serial-port list. On macOS, skips
/// `tty.*` entries since every USB serial device also enumerates as the
/// equivalent `cu.*` path.
pub fn detect_boards() -> Vec<DetectedBoard> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(_) => return Vec::new(),
    };

    let infos = ports
        .into_iter()
        .filter(|p| {
            #[cfg(target_os = "macos")]
            {
                !p.port_name.contains("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (vendor_id, product_id, manufacturer, friendly_name) = match &p.port_type {
                SerialPortType::UsbPort(usb) => (
                    Some(usb.vid),
                    Some(usb.pid),
                    usb.manufacturer.clone(),
                    usb.product.clone(),
                ),
                _ => (None, None, None, None),
            };
            PortInfo {
                path: p.port_name,
                vendor_id,
                product_id,
                manufacturer,
                friendly_name,
            }
        })
        .collect();

    detect_from_ports(infos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(path: &str, vid: u16, pid: u16) -> PortInfo {
        PortInfo {
            path: path.to_string(),
            vendor_id: Some(vid),
            product_id: Some(pid),
            manufacturer: None,
            friendly_name: None,
        }
    }

    #[test]
    fn filters_out_ports_without_vid_pid() {
        let ports = vec![PortInfo {
            path: "/dev/ttyS0".to_string(),
            vendor_id: None,
            product_id: None,
            manufacturer: None,
            friendly_name: None,
        }];
        assert!(detect_from_ports(ports).is_empty());
    }

    #[test]
    fn known_board_lookup_fills_name_and_flasher() {
        let boards = detect_from_ports(vec![port("/dev/ttyACM0", STM32_DFU_VID, STM32_DFU_PID)]);
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].flasher, Flasher::Dfu);
        assert!(boards[0].in_bootloader);
        assert_eq!(boards[0].detection_method, DetectionMethod::VidPid);
    }

    #[test]
    fn ardupilot_vendor_id_classifies_unknown_pid() {
        let boards = detect_from_ports(vec![port("/dev/ttyACM1", ARDUPILOT_VID, 0x5E41)]);
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].flasher, Flasher::Ardupilot);
    }

    #[test]
    fn unrecognized_board_is_included_as_unidentified_candidate() {
        let boards = detect_from_ports(vec![port("/dev/ttyUSB9", 0xCAFE, 0xBABE)]);
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].flasher, Flasher::Unknown);
    }

    #[test]
    fn composite_device_dedup_keeps_only_first_by_stable_path_sort() {
        let ports = vec![
            port("/dev/ttyACM1", STM32_DFU_VID, STM32_DFU_PID),
            port("/dev/ttyACM0", STM32_DFU_VID, STM32_DFU_PID),
        ];
        let boards = detect_from_ports(ports);
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].port.as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn bootloader_pid_predicate_matches_only_stm32_dfu() {
        assert!(DetectedBoard::is_bootloader_pid(STM32_DFU_VID, STM32_DFU_PID));
        assert!(!DetectedBoard::is_bootloader_pid(0x0483, 0x5740));
    }

    #[test]
    fn bootloader_probe_refines_detection_method() {
        let board = detect_from_ports(vec![port("/dev/ttyACM0", 0xCAFE, 0xBABE)])
            .remove(0)
            .with_bootloader_probe(0x0449, "STM32F7x5/7x6");
        assert_eq!(board.detection_method, DetectionMethod::Bootloader);
        assert_eq!(board.detected_mcu.as_deref(), Some("STM32F7x5/7x6"));
    }
}
