// Prevents additional console window on Windows in release
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use flightcore_lib::commands::device::{
    detect_boards,
    is_bootloader_vid_pid,
    recommended_flasher,
};
use flightcore_lib::commands::dfu::{
    cancel_flash,
    flash_dfu_firmware,
    flash_usart_firmware,
    force_release_flash_lock,
    is_flash_in_progress,
};
use flightcore_lib::commands::firmware::{
    calculate_sha256,
    cancel_download,
    clear_all_cache,
    copy_custom_firmware,
    delete_cached_firmware,
    download_firmware,
    get_cache_entry,
    get_cached_firmware,
    verify_cache_integrity,
};
use flightcore_lib::commands::settings::{get_flasher_settings, save_flasher_settings};

fn main() {
    env_logger::init();

    tauri::Builder::default()
        .plugin(tauri_plugin_fs::init())
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_http::init())
        .plugin(tauri_plugin_shell::init())
        .plugin(tauri_plugin_process::init())
        .setup(|app| {
            #[cfg(desktop)]
            app.handle()
                .plugin(tauri_plugin_updater::Builder::new().build())?;
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Board detection
            detect_boards,
            is_bootloader_vid_pid,
            recommended_flasher,
            // Flashing (USART/AN3155 and USB DFU/DfuSe)
            flash_usart_firmware,
            flash_dfu_firmware,
            cancel_flash,
            is_flash_in_progress,
            force_release_flash_lock,
            // Firmware downloader and cache
            download_firmware,
            cancel_download,
            get_cached_firmware,
            get_cache_entry,
            delete_cached_firmware,
            clear_all_cache,
            verify_cache_integrity,
            copy_custom_firmware,
            calculate_sha256,
            // Settings
            get_flasher_settings,
            save_flasher_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
