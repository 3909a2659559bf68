//! Common firmware-image representation plus loaders for the three file
//! formats the flashers accept: Intel HEX, DfuSe, and raw binary.
//!
//! Every loader returns an [`image::FirmwareImage`]; the two STM32
//! flashers (`crate::flash::usart`, `crate::flash::dfu_usb`) consume that
//! type and never parse a file format directly.

pub mod dfuse;
pub mod image;
pub mod intel_hex;
pub mod raw_binary;

pub use image::{FirmwareImage, Segment};

use std::path::Path;

use crate::error::{CoreError, CoreResult};

/// Load a [`FirmwareImage`] from `path`, dispatching on its extension:
/// `.hex` to the Intel HEX parser, `.dfu`/`.dfuse` to the DfuSe parser,
/// and anything else (`.bin` or no extension) to the raw-binary loader,
/// which autodetects a base address from the filename and falls back to
/// the STM32 flash start `0x08000000`.
pub fn load_from_path(path: &Path) -> CoreResult<FirmwareImage> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("hex") => {
            let text = std::fs::read_to_string(path)?;
            intel_hex::parse(&text)
        }
        Some("dfu") | Some("dfuse") => {
            let bytes = std::fs::read(path)?;
            dfuse::parse(&bytes)
        }
        _ => {
            let data = std::fs::read(path)?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| CoreError::ParseError {
                    reason: "firmware path has no file name".to_string(),
                })?;
            let base_address = raw_binary::detect_base_address_from_filename(filename);
            raw_binary::load(data, base_address)
        }
    }
}
