//! Per-flash configuration, threaded through both drivers.

use serde::{Deserialize, Serialize};

/// Options a caller may set for a single flash operation. Every field has a
/// default matching the conservative, safest behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FlashOptions {
    /// Upload and compare the written image after programming (DFU only —
    /// the USART bootloader has no fast read-back path).
    pub verify: bool,
    /// Mass-erase the whole chip instead of only the sectors the image touches.
    pub force_full_erase: bool,
    /// Skip issuing the manifest/detach sequence that normally reboots the
    /// target into its application after a DFU flash.
    pub leave_in_dfu_mode: bool,
    /// Skip the DTR/RTS reset pulse sequence before a USART sync attempt,
    /// for boards already parked in bootloader mode.
    pub no_reboot_sequence: bool,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            verify: true,
            force_full_erase: false,
            leave_in_dfu_mode: false,
            no_reboot_sequence: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_favor_verification_over_speed() {
        let options = FlashOptions::default();
        assert!(options.verify);
        assert!(!options.force_full_erase);
        assert!(!options.leave_in_dfu_mode);
        assert!(!options.no_reboot_sequence);
    }
}
