//! Bounded media cache.
//!
//! Finished downloads live in `<cache_dir>/<video_id>.<ext>`. The cache keeps
//! at most `max_entries` of them in access order and deletes the least
//! recently used file when a new one pushes it over the limit. The index is
//! persisted on every change and reloaded on startup.
//!
//! Files deleted behind the cache's back are noticed on the next lookup.

mod index;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::downloader::{DownloadError, FetchedArtifact};

pub use index::INDEX_FILE;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: dirs::download_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
                .unwrap_or_else(std::env::temp_dir)
                .join("OfflineYT_Server"),
            max_entries: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub video_id: String,
    pub storage_path: PathBuf,
    pub byte_size: u64,
    pub quality_label: String,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    pub display_filename: String,
}

/// Read-only view for the `/cache` endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub max_entries: usize,
    pub total_bytes: u64,
    /// Least recently used first
    pub entries: Vec<CacheEntry>,
}

pub struct MediaCache {
    dir: PathBuf,
    max_entries: usize,
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MediaCache {
    /// Open the cache directory and reload its index.
    ///
    /// Entries whose file is gone are dropped; an index larger than
    /// `max_entries` is trimmed from the least recently used end.
    pub fn open(config: CacheConfig) -> Result<Self, DownloadError> {
        fs::create_dir_all(&config.dir)?;

        let loaded = index::load(&config.dir);
        let loaded_count = loaded.len();
        let mut entries = LruCache::unbounded();
        for entry in loaded {
            if entry.storage_path.is_file() {
                entries.put(entry.video_id.clone(), entry);
            } else {
                debug!(video_id = %entry.video_id, "Dropping cache entry with missing file");
            }
        }

        let cache = Self {
            dir: config.dir,
            max_entries: config.max_entries.max(1),
            entries: Mutex::new(entries),
        };

        {
            let mut entries = cache.entries.lock();
            cache.evict_locked(&mut entries);
            if entries.len() != loaded_count {
                cache.persist_locked(&entries)?;
            }
            info!(
                dir = %cache.dir.display(),
                entries = entries.len(),
                max_entries = cache.max_entries,
                "Media cache ready"
            );
        }

        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return a usable entry and mark it most recently used.
    ///
    /// An entry whose file is missing or has the wrong size is purged and
    /// reported as a miss.
    pub fn lookup(&self, video_id: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get(video_id)?.clone();

        let intact = fs::metadata(&entry.storage_path)
            .map(|m| m.is_file() && m.len() == entry.byte_size)
            .unwrap_or(false);

        if !intact {
            warn!(video_id, path = %entry.storage_path.display(), "Cached file missing or changed, purging");
            entries.pop(video_id);
            remove_file_quiet(&entry.storage_path);
        }

        if let Err(e) = self.persist_locked(&entries) {
            warn!(error = %e, "Failed to persist cache index");
        }

        intact.then_some(entry)
    }

    /// Entry for `video_id` without touching recency or the filesystem
    pub fn peek(&self, video_id: &str) -> Option<CacheEntry> {
        self.entries.lock().peek(video_id).cloned()
    }

    /// Move a fresh download into the cache and record it as most recently used.
    pub fn insert(
        &self,
        video_id: &str,
        artifact: &FetchedArtifact,
    ) -> Result<CacheEntry, DownloadError> {
        let ext = artifact
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let storage_path = self.dir.join(format!("{}.{}", video_id, ext));

        relocate(&artifact.path, &storage_path)?;
        let byte_size = fs::metadata(&storage_path)?.len();

        let entry = CacheEntry {
            video_id: video_id.to_string(),
            storage_path,
            byte_size,
            quality_label: artifact.quality_label.clone(),
            cached_at: OffsetDateTime::now_utc(),
            display_filename: artifact.display_filename.clone(),
        };

        let mut entries = self.entries.lock();
        if let Some(old) = entries.pop(video_id) {
            if old.storage_path != entry.storage_path {
                remove_file_quiet(&old.storage_path);
            }
        }
        entries.put(video_id.to_string(), entry.clone());
        self.evict_locked(&mut entries);
        self.persist_locked(&entries)?;

        info!(
            video_id,
            quality = %entry.quality_label,
            size_mb = format!("{:.1}", byte_size as f64 / 1_048_576.0),
            entries = entries.len(),
            "Cached"
        );
        Ok(entry)
    }

    /// Evict least recently used entries until the limit holds; returns their ids.
    pub fn evict_over_capacity(&self) -> Result<Vec<String>, DownloadError> {
        let mut entries = self.entries.lock();
        let evicted = self.evict_locked(&mut entries);
        if !evicted.is_empty() {
            self.persist_locked(&entries)?;
        }
        Ok(evicted)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let entries = self.entries.lock();
        let list: Vec<CacheEntry> = entries.iter().rev().map(|(_, e)| e.clone()).collect();
        CacheSnapshot {
            max_entries: self.max_entries,
            total_bytes: list.iter().map(|e| e.byte_size).sum(),
            entries: list,
        }
    }

    fn evict_locked(&self, entries: &mut LruCache<String, CacheEntry>) -> Vec<String> {
        let mut evicted = Vec::new();
        while entries.len() > self.max_entries {
            let Some((video_id, entry)) = entries.pop_lru() else {
                break;
            };
            remove_file_quiet(&entry.storage_path);
            info!(video_id = %video_id, "Evicted from cache");
            evicted.push(video_id);
        }
        evicted
    }

    fn persist_locked(&self, entries: &LruCache<String, CacheEntry>) -> Result<(), DownloadError> {
        index::save(&self.dir, entries.iter().rev().map(|(_, e)| e))
    }
}

/// Rename, falling back to copy + remove across filesystems
fn relocate(src: &Path, dest: &Path) -> io::Result<()> {
    if src == dest {
        return Ok(());
    }
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    fs::copy(src, dest)?;
    fs::remove_file(src)
}

fn remove_file_quiet(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed cached file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cached file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        cache_dir: PathBuf,
        temp_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let cache_dir = root.path().join("cache");
            let temp_dir = root.path().join("temp");
            fs::create_dir_all(&temp_dir).unwrap();
            Self {
                _root: root,
                cache_dir,
                temp_dir,
            }
        }

        fn open(&self, max_entries: usize) -> MediaCache {
            MediaCache::open(CacheConfig {
                dir: self.cache_dir.clone(),
                max_entries,
            })
            .unwrap()
        }

        fn artifact(&self, video_id: &str, body: &[u8]) -> FetchedArtifact {
            let path = self.temp_dir.join(format!("{}_Title.mp4", video_id));
            fs::write(&path, body).unwrap();
            FetchedArtifact {
                path,
                byte_size: body.len() as u64,
                quality_label: "1080p".to_string(),
                display_filename: "Title.mp4".to_string(),
            }
        }
    }

    fn ids(cache: &MediaCache) -> Vec<String> {
        cache
            .snapshot()
            .entries
            .into_iter()
            .map(|e| e.video_id)
            .collect()
    }

    #[test]
    fn test_insert_relocates_into_cache_dir() {
        let fx = Fixture::new();
        let cache = fx.open(3);
        let artifact = fx.artifact("a", b"aaaa");

        let entry = cache.insert("a", &artifact).unwrap();
        assert_eq!(entry.storage_path, fx.cache_dir.join("a.mp4"));
        assert_eq!(entry.byte_size, 4);
        assert!(!artifact.path.exists());
        assert_eq!(cache.lookup("a"), Some(entry));
    }

    #[test]
    fn test_size_bound_evicts_least_recently_used() {
        let fx = Fixture::new();
        let cache = fx.open(3);

        for id in ["a", "b", "c", "d"] {
            cache.insert(id, &fx.artifact(id, id.as_bytes())).unwrap();
            assert!(cache.len() <= 3);
        }

        assert_eq!(ids(&cache), vec!["b", "c", "d"]);
        assert!(!fx.cache_dir.join("a.mp4").exists());
        assert!(cache.lookup("a").is_none());
    }

    #[test]
    fn test_lookup_promotes_entry() {
        let fx = Fixture::new();
        let cache = fx.open(3);
        for id in ["a", "b", "c"] {
            cache.insert(id, &fx.artifact(id, b"x")).unwrap();
        }

        assert!(cache.lookup("a").is_some());
        cache.insert("d", &fx.artifact("d", b"x")).unwrap();

        assert_eq!(ids(&cache), vec!["c", "a", "d"]);
        assert!(cache.lookup("b").is_none());
    }

    #[test]
    fn test_reinsert_replaces_entry() {
        let fx = Fixture::new();
        let cache = fx.open(3);
        cache.insert("a", &fx.artifact("a", b"old")).unwrap();
        cache.insert("b", &fx.artifact("b", b"x")).unwrap();

        let entry = cache.insert("a", &fx.artifact("a", b"newer")).unwrap();
        assert_eq!(entry.byte_size, 5);
        assert_eq!(ids(&cache), vec!["b", "a"]);
        assert_eq!(fs::read(fx.cache_dir.join("a.mp4")).unwrap(), b"newer");
    }

    #[test]
    fn test_missing_file_is_purged_on_lookup() {
        let fx = Fixture::new();
        let cache = fx.open(3);
        let entry = cache.insert("a", &fx.artifact("a", b"data")).unwrap();

        fs::remove_file(&entry.storage_path).unwrap();
        assert!(cache.lookup("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_size_mismatch_is_purged_on_lookup() {
        let fx = Fixture::new();
        let cache = fx.open(3);
        let entry = cache.insert("a", &fx.artifact("a", b"data")).unwrap();

        fs::write(&entry.storage_path, b"truncated-or-grown").unwrap();
        assert!(cache.lookup("a").is_none());
        assert!(!entry.storage_path.exists());
    }

    #[test]
    fn test_index_round_trip_keeps_order() {
        let fx = Fixture::new();
        {
            let cache = fx.open(3);
            for id in ["a", "b", "c"] {
                cache.insert(id, &fx.artifact(id, b"x")).unwrap();
            }
            cache.lookup("a");
        }

        let reopened = fx.open(3);
        assert_eq!(ids(&reopened), vec!["b", "c", "a"]);
        let entry = reopened.peek("b").unwrap();
        assert_eq!(entry.quality_label, "1080p");
        assert_eq!(entry.display_filename, "Title.mp4");
    }

    #[test]
    fn test_load_drops_missing_files_and_trims() {
        let fx = Fixture::new();
        {
            let cache = fx.open(5);
            for id in ["a", "b", "c", "d"] {
                cache.insert(id, &fx.artifact(id, b"x")).unwrap();
            }
        }
        fs::remove_file(fx.cache_dir.join("b.mp4")).unwrap();

        let reopened = fx.open(2);
        assert_eq!(ids(&reopened), vec!["c", "d"]);
        assert!(!fx.cache_dir.join("a.mp4").exists());

        let persisted: Vec<CacheEntry> =
            serde_json::from_str(&fs::read_to_string(fx.cache_dir.join(INDEX_FILE)).unwrap())
                .unwrap();
        assert_eq!(persisted.len(), 2);
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let fx = Fixture::new();
        fs::create_dir_all(&fx.cache_dir).unwrap();
        fs::write(fx.cache_dir.join(INDEX_FILE), b"{not json").unwrap();

        let cache = fx.open(3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_over_capacity_is_noop_within_bound() {
        let fx = Fixture::new();
        let cache = fx.open(2);
        cache.insert("a", &fx.artifact("a", b"x")).unwrap();
        assert!(cache.evict_over_capacity().unwrap().is_empty());
        assert_eq!(cache.snapshot().total_bytes, 1);
    }
}
