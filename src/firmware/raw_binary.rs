//! Raw `.bin` loader: the file is opaque bytes anchored at a base address.

use crate::error::{CoreError, CoreResult};

use super::image::{FirmwareImage, Segment};

/// Default STM32 flash origin, used when no address is supplied or
/// recoverable from the filename.
pub const DEFAULT_BASE_ADDRESS: u32 = 0x0800_0000;

const FLASH_REGION_START: u32 = 0x0800_0000;
const FLASH_REGION_END: u32 = 0x2000_0000;

/// Load `data` as a raw binary image at `base_address` (or
/// [`DEFAULT_BASE_ADDRESS`] if `None`).
pub fn load(data: Vec<u8>, base_address: Option<u32>) -> CoreResult<FirmwareImage> {
    if data.is_empty() {
        return Err(CoreError::ParseError {
            reason: "raw binary file is empty".to_string(),
        });
    }
    let address = base_address.unwrap_or(DEFAULT_BASE_ADDRESS);
    FirmwareImage::new(vec![Segment::new(address, data)])
}

/// Look for a `_0xAAAAAAAA`-style hex literal in a filename and return it
/// only if it falls within the STM32 flash address window
/// `[0x08000000, 0x20000000)`.
pub fn detect_base_address_from_filename(filename: &str) -> Option<u32> {
    let idx = filename.find("0x").or_else(|| filename.find("0X"))?;
    let rest = &filename[idx + 2..];
    let hex_len = rest
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_hexdigit())
        .count();
    if hex_len == 0 {
        return None;
    }
    let literal = &rest[..hex_len];
    let address = u32::from_str_radix(literal, 16).ok()?;
    if (FLASH_REGION_START..FLASH_REGION_END).contains(&address) {
        Some(address)
    } else {
        None
    }
}
