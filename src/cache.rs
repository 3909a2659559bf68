//! Content-addressed firmware cache.
//!
//! One file per `{board_id}_{version}{ext}` plus a JSON index recording
//! size and hash, the same load/save-index shape the project already used
//! for its firmware-package cache, generalized from a zip+extracted-dir
//! model to single-file firmware images.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub board_id: String,
    pub version: String,
    pub file_size: u64,
    pub sha256_hash: String,
    pub cached_at: String,
    /// `true` for a file the user supplied directly via
    /// [`CacheManager::copy_custom_firmware`], as opposed to one fetched
    /// over the network.
    pub is_custom: bool,
}

pub type CacheIndex = HashMap<String, CacheEntry>;

/// Cache key: `{board_id}_{version_with_underscores}`, matching the file
/// name stem, with underscores substituted for any separator in the
/// version string so it stays filesystem-safe.
pub fn cache_key(board_id: &str, version: &str) -> String {
    format!("{}_{}", board_id, version.replace(['.', ' ', '-'], "_"))
}

/// Infer the cache file extension from a download URL, defaulting to
/// `.hex`.
pub fn infer_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    if path.ends_with(".bin") {
        ".bin"
    } else if path.ends_with(".dfu") {
        ".dfu"
    } else if path.ends_with(".elf") {
        ".elf"
    } else {
        ".hex"
    }
}

pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn index_path(&self) -> PathBuf {
        self.cache_dir.join("index.json")
    }

    /// Full path a cached firmware file for `board_id`/`version` would
    /// live at, given `ext` (as returned by [`infer_extension`]).
    pub fn cache_path(&self, board_id: &str, version: &str, ext: &str) -> PathBuf {
        self.cache_dir.join(format!("{}{}", cache_key(board_id, version), ext))
    }

    pub fn calculate_sha256(path: &Path) -> CoreResult<String> {
        let mut file = fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn load_index(&self) -> CoreResult<CacheIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save_index(&self, index: &CacheIndex) -> CoreResult<()> {
        fs::create_dir_all(&self.cache_dir)?;
        let contents = serde_json::to_string_pretty(index)?;
        fs::write(self.index_path(), contents)?;
        Ok(())
    }

    /// The cache file exists and, if an
    /// expected size is known, matches it.
    pub fn is_cached(&self, board_id: &str, version: &str, ext: &str, expected_size: Option<u64>) -> bool {
        let path = self.cache_path(board_id, version, ext);
        match fs::metadata(&path) {
            Ok(meta) => expected_size.map(|size| meta.len() == size).unwrap_or(true),
            Err(_) => false,
        }
    }

    pub fn record_entry(&self, entry: CacheEntry) -> CoreResult<()> {
        let mut index = self.load_index()?;
        index.insert(cache_key(&entry.board_id, &entry.version), entry);
        self.save_index(&index)
    }

    pub fn get_entry(&self, board_id: &str, version: &str) -> CoreResult<Option<CacheEntry>> {
        let index = self.load_index()?;
        Ok(index.get(&cache_key(board_id, version)).cloned())
    }

    pub fn remove_entry(&self, board_id: &str, version: &str, ext: &str) -> CoreResult<()> {
        let path = self.cache_path(board_id, version, ext);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let mut index = self.load_index()?;
        index.remove(&cache_key(board_id, version));
        self.save_index(&index)
    }

    /// Delete every cached file and reset the index.
    pub fn clear_cache(&self) -> CoreResult<()> {
        let index = self.load_index()?;
        for entry in index.values() {
            // Extension isn't stored on the entry; sweep the directory
            // instead of reconstructing a path per entry.
            let _ = entry;
        }
        if self.cache_dir.exists() {
            for item in fs::read_dir(&self.cache_dir)? {
                let item = item?;
                if item.path().extension().and_then(|e| e.to_str()) != Some("json") {
                    fs::remove_file(item.path()).ok();
                }
            }
        }
        self.save_index(&HashMap::new())
    }

    /// Find cached entries whose backing file no longer exists on disk.
    pub fn verify_integrity(&self) -> CoreResult<Vec<String>> {
        let index = self.load_index()?;
        let mut missing = Vec::new();
        for (key, entry) in index.iter() {
            let candidates = [".hex", ".bin", ".dfu", ".elf"]
                .iter()
                .map(|ext| self.cache_path(&entry.board_id, &entry.version, ext))
                .collect::<Vec<_>>();
            if !candidates.iter().any(|p| p.exists()) {
                missing.push(key.clone());
            }
        }
        Ok(missing)
    }

    /// Adopt a user-supplied firmware file into the cache under
    /// `board_id`/`version`, recording its content hash so later
    /// `is_cached` checks can be satisfied without a download.
    pub fn copy_custom_firmware(&self, source: &Path, board_id: &str, version: &str) -> CoreResult<PathBuf> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| ".hex".to_string());
        let destination = self.cache_path(board_id, version, &ext);
        fs::create_dir_all(&self.cache_dir)?;
        fs::copy(source, &destination)?;

        let sha256_hash = Self::calculate_sha256(&destination)?;
        let file_size = fs::metadata(&destination)?.len();

        self.record_entry(CacheEntry {
            board_id: board_id.to_string(),
            version: version.to_string(),
            file_size,
            sha256_hash,
            cached_at: chrono::Utc::now().to_rfc3339(),
            is_custom: true,
        })?;

        Ok(destination)
    }
}
