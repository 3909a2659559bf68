//! Tauri commands for the firmware downloader and cache.

use std::sync::atomic::{AtomicBool, Ordering};

use tauri::ipc::Channel;
use tauri::Manager;

use crate::cache::{CacheEntry, CacheManager};
use crate::download::{self, DownloadRequest};
use crate::flash::progress::ProgressEvent;

fn cache_manager(app_handle: &tauri::AppHandle) -> Result<CacheManager, String> {
    let app_data_dir = app_handle
        .path()
        .app_data_dir()
        .map_err(|e| format!("failed to resolve app data directory: {e}"))?;
    Ok(CacheManager::new(app_data_dir.join("firmware_cache")))
}

/// Cancellation flag for the in-flight download. Only one download per
/// version key runs at a time from this command surface, so a single
/// static flag (reset at the start of each call) is enough.
static DOWNLOAD_CANCELLED: AtomicBool = AtomicBool::new(false);

/// Download firmware for `board_id`/`version` from `url` into the cache,
/// unless it's already cached at the expected size. Streams progress
/// through `progress` as `downloading` [`ProgressEvent`]s.
#[tauri::command]
pub async fn download_firmware(
    url: String,
    board_id: String,
    version: String,
    expected_size: Option<u64>,
    app_handle: tauri::AppHandle,
    progress: Channel<ProgressEvent>,
) -> Result<String, String> {
    let manager = cache_manager(&app_handle)?;
    let ext = crate::cache::infer_extension(&url);

    if manager.is_cached(&board_id, &version, ext, expected_size) {
        let path = manager.cache_path(&board_id, &version, ext);
        return Ok(path.to_string_lossy().to_string());
    }

    DOWNLOAD_CANCELLED.store(false, Ordering::SeqCst);
    let destination = manager.cache_path(&board_id, &version, ext);

    let request = DownloadRequest {
        url,
        destination: destination.clone(),
        expected_size,
    };

    download::download(request, &DOWNLOAD_CANCELLED, move |event: ProgressEvent| {
        let _ = progress.send(event);
    })
    .await
    .map_err(|e| e.to_string())?;

    let file_size = tokio::fs::metadata(&destination)
        .await
        .map_err(|e| format!("failed to stat downloaded firmware: {e}"))?
        .len();
    let sha256_hash = CacheManager::calculate_sha256(&destination).map_err(|e| e.to_string())?;

    manager
        .record_entry(CacheEntry {
            board_id,
            version,
            file_size,
            sha256_hash,
            cached_at: chrono::Utc::now().to_rfc3339(),
            is_custom: false,
        })
        .map_err(|e| e.to_string())?;

    Ok(destination.to_string_lossy().to_string())
}

/// Abort the in-flight download started by [`download_firmware`], if any.
#[tauri::command]
pub fn cancel_download() {
    DOWNLOAD_CANCELLED.store(true, Ordering::SeqCst);
}

/// Look up a cached firmware path without downloading, returning `None`
/// on a cache miss (or a size mismatch, when `expected_size` is given).
#[tauri::command]
pub async fn get_cached_firmware(
    board_id: String,
    version: String,
    ext: String,
    expected_size: Option<u64>,
    app_handle: tauri::AppHandle,
) -> Result<Option<String>, String> {
    let manager = cache_manager(&app_handle)?;
    if manager.is_cached(&board_id, &version, &ext, expected_size) {
        Ok(Some(
            manager
                .cache_path(&board_id, &version, &ext)
                .to_string_lossy()
                .to_string(),
        ))
    } else {
        Ok(None)
    }
}

#[tauri::command]
pub async fn get_cache_entry(
    board_id: String,
    version: String,
    app_handle: tauri::AppHandle,
) -> Result<Option<CacheEntry>, String> {
    let manager = cache_manager(&app_handle)?;
    manager.get_entry(&board_id, &version).map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn delete_cached_firmware(
    board_id: String,
    version: String,
    ext: String,
    app_handle: tauri::AppHandle,
) -> Result<(), String> {
    let manager = cache_manager(&app_handle)?;
    manager
        .remove_entry(&board_id, &version, &ext)
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn clear_all_cache(app_handle: tauri::AppHandle) -> Result<(), String> {
    let manager = cache_manager(&app_handle)?;
    manager.clear_cache().map_err(|e| e.to_string())
}

/// Cache entries whose backing file is missing from disk, e.g. after an
/// external deletion. Returned rather than silently pruned, so the
/// caller can decide whether to re-download or just drop the stale entry.
#[tauri::command]
pub async fn verify_cache_integrity(app_handle: tauri::AppHandle) -> Result<Vec<String>, String> {
    let manager = cache_manager(&app_handle)?;
    manager.verify_integrity().map_err(|e| e.to_string())
}

/// Adopt a user-supplied firmware file into the cache.
#[tauri::command]
pub async fn copy_custom_firmware(
    source_path: String,
    board_id: String,
    version: String,
    app_handle: tauri::AppHandle,
) -> Result<String, String> {
    let manager = cache_manager(&app_handle)?;
    let destination = manager
        .copy_custom_firmware(std::path::Path::new(&source_path), &board_id, &version)
        .map_err(|e| e.to_string())?;
    Ok(destination.to_string_lossy().to_string())
}

#[tauri::command]
pub async fn calculate_sha256(path: String) -> Result<String, String> {
    CacheManager::calculate_sha256(std::path::Path::new(&path)).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn calculate_sha256_matches_known_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        std::fs::write(&path, b"hello").unwrap();
        let hash = CacheManager::calculate_sha256(&path).unwrap();
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
