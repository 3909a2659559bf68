//! Tauri commands for flashing firmware to an STM32 target: the USART
//! bootloader driver and the USB DFU/DfuSe driver, sharing the
//! process-wide [`FlashLock`] and the [`ProgressEvent`] channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tauri::ipc::Channel;

use crate::board::{STM32_DFU_PID, STM32_DFU_VID};
use crate::firmware;
use crate::flash::lock::FlashLock;
use crate::flash::options::FlashOptions;
use crate::flash::progress::ProgressEvent;
use crate::flash::{dfu_usb, usart};
use crate::traits::transport::{NusbTransport, SerialPortTransport};

/// The process-wide flash mutex, shared by both flashers so a USART
/// flash and a DFU flash can never run against the same board at once.
/// One instance per process; `FlashLock` is a value the top-level
/// application owns and injects.
fn flash_lock() -> &'static FlashLock {
    static LOCK: OnceLock<FlashLock> = OnceLock::new();
    LOCK.get_or_init(FlashLock::new)
}

/// Cancellation flag for whichever flash is currently running. The flash
/// mutex already guarantees only one flash runs at a time, so one static
/// flag (reset at the start of each call) is sufficient to carry the
/// cancellation token across the `spawn_blocking` boundary.
static FLASH_CANCELLED: AtomicBool = AtomicBool::new(false);

fn load_image(firmware_path: &str) -> Result<crate::firmware::FirmwareImage, String> {
    firmware::load_from_path(std::path::Path::new(firmware_path)).map_err(|e| e.to_string())
}

/// Flash `firmware_path` to the STM32 USART bootloader (AN3155) reachable
/// at `port`.
#[tauri::command]
pub async fn flash_usart_firmware(
    port: String,
    firmware_path: String,
    options: FlashOptions,
    progress: Channel<ProgressEvent>,
) -> Result<(), String> {
    FLASH_CANCELLED.store(false, Ordering::SeqCst);

    tokio::task::spawn_blocking(move || {
        let image = load_image(&firmware_path)?;
        let mut transport = SerialPortTransport::open(&port, usart::BAUD_LADDER[0])
            .map_err(|e| e.to_string())?;

        usart::flash(
            &mut transport,
            &image,
            &options,
            flash_lock(),
            &FLASH_CANCELLED,
            move |event: ProgressEvent| {
                let _ = progress.send(event);
            },
        )
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("USART flash task panicked: {e}"))?
}

/// Flash `firmware_path` to the first STM32 device presenting the USB DFU
/// bootloader PID (`0483:DF11`).
#[tauri::command]
pub async fn flash_dfu_firmware(
    firmware_path: String,
    options: FlashOptions,
    progress: Channel<ProgressEvent>,
) -> Result<(), String> {
    FLASH_CANCELLED.store(false, Ordering::SeqCst);

    tokio::task::spawn_blocking(move || {
        let image = load_image(&firmware_path)?;
        let mut transport =
            NusbTransport::open(STM32_DFU_VID, STM32_DFU_PID).map_err(|e| e.to_string())?;

        dfu_usb::flash(
            &mut transport,
            &image,
            &options,
            flash_lock(),
            &FLASH_CANCELLED,
            move |event: ProgressEvent| {
                let _ = progress.send(event);
            },
        )
        .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("DFU flash task panicked: {e}"))?
}

/// Signal cancellation to whichever flash is currently in progress.
#[tauri::command]
pub fn cancel_flash() {
    FLASH_CANCELLED.store(true, Ordering::SeqCst);
}

/// Whether a flash is currently holding the process-wide lock.
#[tauri::command]
pub fn is_flash_in_progress() -> bool {
    flash_lock().is_held()
}

/// Force-release the flash lock, for recovery after a crashed or
/// unresponsive flash left it held.
#[tauri::command]
pub fn force_release_flash_lock() {
    flash_lock().force_release();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_lock_is_a_singleton_across_calls() {
        assert!(!flash_lock().is_held());
        assert!(std::ptr::eq(flash_lock(), flash_lock()));
    }
}
