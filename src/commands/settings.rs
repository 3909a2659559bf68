//! Tauri commands for persisted flasher/connection settings.

use tauri::Manager;

use crate::settings::{FlasherSettings, SettingsManager};

fn settings_manager(app_handle: &tauri::AppHandle) -> Result<SettingsManager, String> {
    let app_data_dir = app_handle
        .path()
        .app_data_dir()
        .map_err(|e| format!("failed to resolve app data directory: {e}"))?;
    Ok(SettingsManager::new(&app_data_dir))
}

/// Load current settings from disk, returning defaults if none are saved yet.
#[tauri::command]
pub async fn get_flasher_settings(
    app_handle: tauri::AppHandle,
) -> Result<FlasherSettings, String> {
    settings_manager(&app_handle)?.load().map_err(|e| e.to_string())
}

/// Persist settings to disk so they survive an app restart.
#[tauri::command]
pub async fn save_flasher_settings(
    settings: FlasherSettings,
    app_handle: tauri::AppHandle,
) -> Result<(), String> {
    settings_manager(&app_handle)?
        .save(&settings)
        .map_err(|e| e.to_string())
}
