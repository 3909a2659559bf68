//! Tauri commands for board detection.

use serde::{Deserialize, Serialize};

use crate::board::{self, DetectedBoard, Flasher};

/// Enumerate attached boards over the OS's serial-port list.
///
/// Runs the blocking `serialport::available_ports()` scan on a worker
/// thread so it never stalls the async runtime.
#[tauri::command]
pub async fn detect_boards() -> Result<Vec<DetectedBoard>, String> {
    tokio::task::spawn_blocking(board::detect_boards)
        .await
        .map_err(|e| format!("board detection task panicked: {e}"))
}

/// Whether a VID:PID pair presents as a bootloader (the STM32 DFU PID, or
/// a known-board entry that flags `in_bootloader`). Exposed standalone so
/// the frontend can re-check a single device without a full rescan.
#[tauri::command]
pub fn is_bootloader_vid_pid(vid: u16, pid: u16) -> bool {
    DetectedBoard::is_bootloader_pid(vid, pid)
}

/// Which flasher a previously detected board should use, surfaced
/// separately from the full [`DetectedBoard`] for UI elements that only
/// need to decide which flash command to invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlasherChoice {
    pub board_id: String,
    pub flasher: Flasher,
}

#[tauri::command]
pub async fn recommended_flasher(board_id: String) -> Result<Option<FlasherChoice>, String> {
    let boards = tokio::task::spawn_blocking(board::detect_boards)
        .await
        .map_err(|e| format!("board detection task panicked: {e}"))?;

    Ok(boards
        .into_iter()
        .find(|b| b.board_id == board_id)
        .map(|b| FlasherChoice {
            board_id: b.board_id,
            flasher: b.flasher,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootloader_pid_matches_stm32_dfu() {
        assert!(is_bootloader_vid_pid(0x0483, 0xDF11));
        assert!(!is_bootloader_vid_pid(0x0483, 0x5740));
    }
}
