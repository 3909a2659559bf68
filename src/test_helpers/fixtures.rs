//! Builder-pattern test fixtures: a `new()` with sane defaults, chained
//! setters, named presets for common real-world shapes, and a `build()`
//! that produces the real domain type.

use crate::board::{DetectedBoard, DetectionMethod, Flasher};
use crate::cache::CacheEntry;
use crate::firmware::{FirmwareImage, Segment};

/// Builder for [`DetectedBoard`] test fixtures.
pub struct DetectedBoardBuilder {
    name: String,
    board_id: String,
    mcu_type: Option<String>,
    flasher: Flasher,
    port: Option<String>,
    usb_vid: u16,
    usb_pid: u16,
    in_bootloader: bool,
    detection_method: DetectionMethod,
    chip_id: Option<u16>,
    detected_mcu: Option<String>,
}

impl DetectedBoardBuilder {
    pub fn new() -> Self {
        Self {
            name: "Unknown board".to_string(),
            board_id: "0000:0000".to_string(),
            mcu_type: None,
            flasher: Flasher::Unknown,
            port: Some("/dev/ttyACM0".to_string()),
            usb_vid: 0x0000,
            usb_pid: 0x0000,
            in_bootloader: false,
            detection_method: DetectionMethod::VidPid,
            chip_id: None,
            detected_mcu: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn port(mut self, port: &str) -> Self {
        self.port = Some(port.to_string());
        self
    }

    pub fn vid_pid(mut self, vid: u16, pid: u16) -> Self {
        self.usb_vid = vid;
        self.usb_pid = pid;
        self.board_id = format!("{:04x}:{:04x}", vid, pid);
        self
    }

    pub fn in_bootloader(mut self, value: bool) -> Self {
        self.in_bootloader = value;
        self
    }

    pub fn flasher(mut self, flasher: Flasher) -> Self {
        self.flasher = flasher;
        self
    }

    /// Preset: an STM32F4 board already in its USB DFU bootloader.
    pub fn stm32f4_dfu(self) -> Self {
        self.name("STM32 DFU Bootloader")
            .vid_pid(0x0483, 0xDF11)
            .flasher(Flasher::Dfu)
            .in_bootloader(true)
            .mcu_type("STM32F4")
    }

    /// Preset: an application-mode STM32F4 exposing a virtual COM port
    /// (the USART bootloader must be synced over DTR/RTS first).
    pub fn stm32f4_serial(self) -> Self {
        self.name("STM32 Virtual COM Port")
            .vid_pid(0x0483, 0x5740)
            .flasher(Flasher::Serial)
            .mcu_type("STM32F4")
    }

    /// Preset: an ArduPilot ChibiOS board carrying the pid.codes vendor ID.
    pub fn ardupilot(self) -> Self {
        self.name("ArduPilot ChibiOS board")
            .vid_pid(0x1209, 0x5E41)
            .flasher(Flasher::Ardupilot)
    }

    pub fn mcu_type(mut self, mcu_type: &str) -> Self {
        self.mcu_type = Some(mcu_type.to_string());
        self
    }

    pub fn build(self) -> DetectedBoard {
        DetectedBoard {
            name: self.name,
            board_id: self.board_id,
            mcu_type: self.mcu_type,
            flasher: self.flasher,
            port: self.port,
            usb_vid: self.usb_vid,
            usb_pid: self.usb_pid,
            in_bootloader: self.in_bootloader,
            detection_method: self.detection_method,
            chip_id: self.chip_id,
            detected_mcu: self.detected_mcu,
        }
    }
}

impl Default for DetectedBoardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`CacheEntry`] test fixtures.
pub struct CacheEntryBuilder {
    board_id: String,
    version: String,
    file_size: u64,
    sha256_hash: String,
    cached_at: String,
    is_custom: bool,
}

impl CacheEntryBuilder {
    pub fn new(board_id: &str, version: &str) -> Self {
        Self {
            board_id: board_id.to_string(),
            version: version.to_string(),
            file_size: 1024,
            sha256_hash: "abc123def456789012345678901234567890123456789012345678901234".to_string(),
            cached_at: "2024-01-01T00:00:00Z".to_string(),
            is_custom: false,
        }
    }

    pub fn file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    pub fn sha256_hash(mut self, hash: &str) -> Self {
        self.sha256_hash = hash.to_string();
        self
    }

    pub fn cached_at(mut self, timestamp: &str) -> Self {
        self.cached_at = timestamp.to_string();
        self
    }

    pub fn custom(mut self) -> Self {
        self.is_custom = true;
        self
    }

    pub fn build(self) -> CacheEntry {
        CacheEntry {
            board_id: self.board_id,
            version: self.version,
            file_size: self.file_size,
            sha256_hash: self.sha256_hash,
            cached_at: self.cached_at,
            is_custom: self.is_custom,
        }
    }
}

impl Default for CacheEntryBuilder {
    fn default() -> Self {
        Self::new("0483:df11", "1.0.0")
    }
}

/// Builder for [`FirmwareImage`] test fixtures: a single contiguous
/// segment at a configurable base address, or explicit multi-segment
/// layouts for overlap/gap tests.
pub struct FirmwareImageBuilder {
    segments: Vec<Segment>,
    target_name: Option<String>,
    target_alt: Option<u8>,
}

impl FirmwareImageBuilder {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            target_name: None,
            target_alt: None,
        }
    }

    /// A single segment of `len` bytes (0xAA-filled) at `address`.
    pub fn segment_at(mut self, address: u32, len: usize) -> Self {
        self.segments.push(Segment {
            address,
            data: vec![0xAA; len],
        });
        self
    }

    pub fn raw_segment(mut self, address: u32, data: Vec<u8>) -> Self {
        self.segments.push(Segment { address, data });
        self
    }

    pub fn target_name(mut self, name: &str) -> Self {
        self.target_name = Some(name.to_string());
        self
    }

    /// Preset: a 4 KiB image at the default STM32 flash start address.
    pub fn stm32_default(self) -> Self {
        self.segment_at(0x0800_0000, 4096)
    }

    pub fn build(self) -> FirmwareImage {
        let mut segments = self.segments;
        segments.sort_by_key(|s| s.address);
        let total_size = segments.iter().map(|s| s.data.len() as u64).sum();
        FirmwareImage {
            segments,
            total_size,
            target_name: self.target_name,
            target_alt: self.target_alt,
        }
    }
}

impl Default for FirmwareImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detected_board_builder_stm32f4_dfu_preset() {
        let board = DetectedBoardBuilder::new().stm32f4_dfu().build();
        assert_eq!(board.board_id, "0483:df11");
        assert_eq!(board.flasher, Flasher::Dfu);
        assert!(board.in_bootloader);
    }

    #[test]
    fn cache_entry_builder_defaults_to_non_custom() {
        let entry = CacheEntryBuilder::default().build();
        assert!(!entry.is_custom);
        assert_eq!(entry.board_id, "0483:df11");
    }

    #[test]
    fn firmware_image_builder_sums_total_size() {
        let image = FirmwareImageBuilder::new()
            .segment_at(0x0800_0000, 16)
            .segment_at(0x0800_1000, 32)
            .build();
        assert_eq!(image.total_size, 48);
        assert_eq!(image.segments[0].address, 0x0800_0000);
        assert_eq!(image.segments[1].address, 0x0800_1000);
    }
}
