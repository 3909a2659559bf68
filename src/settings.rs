//! Persisted, user-overridable flashing/connection settings.
//!
//! Covers the small set of knobs this core's callers actually need to
//! override: the default MSP request timeout, the USART baud ladder to try
//! during sync, any known-board overrides a user adds for a custom board,
//! and a cache directory override. Persisted as a JSON file in the app
//! data directory, loaded with defaults when absent — but with
//! `deny_unknown_fields` so a stale settings file from an older build
//! surfaces as a clear parse error instead of silently
//! dropping fields.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::flash::usart::BAUD_LADDER;

/// A user-added board the static [`crate::board`] table doesn't know
/// about: enough metadata to classify it exactly like a [`KNOWN_BOARDS`]
/// entry would.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BoardOverride {
    pub vid: u16,
    pub pid: u16,
    pub name: String,
    pub mcu_type: String,
}

/// Persisted settings for the flashing/connection core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FlasherSettings {
    /// Default MSP request timeout, in milliseconds (default 1000).
    #[serde(default = "default_request_timeout_ms")]
    pub default_request_timeout_ms: u64,

    /// USART bootloader sync baud ladder, tried in order (default
    /// `{115200, 57600, 38400, 19200, 9600}`).
    #[serde(default = "default_baud_ladder")]
    pub usart_baud_ladder: Vec<u32>,

    /// User-added board identifications, consulted before the static
    /// `KNOWN_BOARDS` table falls through to the ArduPilot heuristic.
    #[serde(default)]
    pub board_overrides: Vec<BoardOverride>,

    /// Override for the firmware cache directory; `None` uses the OS temp
    /// dir plus a fixed subdirectory name.
    #[serde(default)]
    pub cache_dir_override: Option<PathBuf>,
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_baud_ladder() -> Vec<u32> {
    BAUD_LADDER.to_vec()
}

impl Default for FlasherSettings {
    fn default() -> Self {
        Self {
            default_request_timeout_ms: default_request_timeout_ms(),
            usart_baud_ladder: default_baud_ladder(),
            board_overrides: Vec::new(),
            cache_dir_override: None,
        }
    }
}

/// Settings file name stored in the app data directory.
const SETTINGS_FILENAME: &str = "flasher_settings.json";

/// Loads/saves [`FlasherSettings`] to a JSON file in the app data directory.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    pub fn new(app_data_dir: &Path) -> Self {
        Self {
            settings_file_path: app_data_dir.join(SETTINGS_FILENAME),
        }
    }

    /// Load settings from disk, returning defaults if the file doesn't
    /// exist or is empty. A present-but-malformed file is a hard error —
    /// silently falling back to defaults would mask a broken upgrade.
    pub fn load(&self) -> CoreResult<FlasherSettings> {
        if !self.settings_file_path.exists() {
            return Ok(FlasherSettings::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path)?;
        if contents.trim().is_empty() {
            return Ok(FlasherSettings::default());
        }

        serde_json::from_str(&contents).map_err(CoreError::from)
    }

    pub fn save(&self, settings: &FlasherSettings) -> CoreResult<()> {
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_file_path, contents)?;
        Ok(())
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}
