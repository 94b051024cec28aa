//! On-disk cache index.
//!
//! A flat JSON list of entries, least recently used first. Written to a
//! sibling temp file and renamed into place so a crash never leaves a
//! truncated index behind.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::CacheEntry;
use crate::downloader::DownloadError;

pub const INDEX_FILE: &str = "cache_index.json";

pub fn index_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(INDEX_FILE)
}

/// Read the index; a missing or unreadable index yields an empty list.
pub fn load(cache_dir: &Path) -> Vec<CacheEntry> {
    let path = index_path(cache_dir);
    if !path.exists() {
        return Vec::new();
    }

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read cache index, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<CacheEntry>>(&content) {
        Ok(entries) => {
            debug!(path = %path.display(), count = entries.len(), "Loaded cache index");
            entries
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse cache index, starting empty");
            Vec::new()
        }
    }
}

pub fn save<'a, I>(cache_dir: &Path, entries: I) -> Result<(), DownloadError>
where
    I: IntoIterator<Item = &'a CacheEntry>,
{
    let entries: Vec<&CacheEntry> = entries.into_iter().collect();
    let content = serde_json::to_string_pretty(&entries)
        .map_err(|e| DownloadError::Cache(format!("Failed to serialize cache index: {}", e)))?;

    let path = index_path(cache_dir);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}
