//! Per-request orchestration.
//!
//! `prepare` takes a video from request to a file ready to send:
//! admission, cache, failure memory, pacing, yt-dlp with fallback, cache
//! insertion. `stream` then sends it. The active registry entry claimed in
//! `prepare` lives in [`PreparedTransfer`] until the transfer ends.

pub mod active;
pub mod transfer;

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tracing::{info, warn};

use crate::cache::{CacheEntry, CacheSnapshot, MediaCache};
use crate::downloader::{
    ActiveRequestState, ActiveStatus, DownloadError, Downloader, Phase, QualityTier,
};
use crate::throttle::{FailureMemory, FailureSnapshot, RateController};

pub use active::{ActiveGuard, ActiveRegistry};
pub use transfer::{TransferReport, CHUNK_SIZE};

lazy_static::lazy_static! {
    static ref VIDEO_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
}

pub fn validate_video_id(video_id: &str) -> Result<(), DownloadError> {
    if VIDEO_ID_RE.is_match(video_id) {
        Ok(())
    } else {
        Err(DownloadError::InvalidIdentifier(video_id.to_string()))
    }
}

/// A file ready to be sent, holding the request's registry entry
#[derive(Debug)]
pub struct PreparedTransfer {
    pub entry: CacheEntry,
    pub from_cache: bool,
    guard: ActiveGuard,
}

impl PreparedTransfer {
    pub fn video_id(&self) -> &str {
        self.guard.video_id()
    }
}

/// Answer to a single-video status query
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VideoStatus {
    Active {
        video_id: String,
        request: ActiveRequestState,
    },
    Cached {
        video_id: String,
        entry: CacheEntry,
    },
    Blocked {
        video_id: String,
        reason: Option<String>,
        retry_after: u64,
        fail_count: u32,
    },
    NotFound {
        video_id: String,
    },
}

pub struct DownloadService {
    downloader: Downloader,
    cache: Arc<MediaCache>,
    failures: FailureMemory,
    rate: Arc<RateController>,
    active: Arc<ActiveRegistry>,
}

impl DownloadService {
    pub fn new(
        downloader: Downloader,
        cache: Arc<MediaCache>,
        failures: FailureMemory,
        rate: Arc<RateController>,
    ) -> Self {
        Self {
            downloader,
            cache,
            failures,
            rate,
            active: ActiveRegistry::new(),
        }
    }

    /// Run [`prepare`](Self::prepare) on its own task.
    ///
    /// Dropping the returned future (client gone) does not stop the fetch;
    /// it runs to completion, failure or timeout and still lands in the cache.
    pub async fn prepare_detached(
        self: &Arc<Self>,
        video_id: String,
        quality: QualityTier,
    ) -> Result<PreparedTransfer, DownloadError> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.prepare(&video_id, quality).await })
            .await
            .map_err(|e| DownloadError::upstream(format!("Download task failed: {}", e)))?
    }

    pub async fn prepare(
        &self,
        video_id: &str,
        quality: QualityTier,
    ) -> Result<PreparedTransfer, DownloadError> {
        validate_video_id(video_id)?;

        let guard = self.active.try_begin(video_id, quality).ok_or_else(|| {
            DownloadError::AlreadyInFlight {
                video_id: video_id.to_string(),
            }
        })?;

        let cache = Arc::clone(&self.cache);
        let id = video_id.to_string();
        let cached = tokio::task::spawn_blocking(move || cache.lookup(&id))
            .await
            .map_err(|e| DownloadError::Cache(format!("Cache lookup task failed: {}", e)))?;

        if let Some(entry) = cached {
            info!(video_id, quality = %entry.quality_label, "Serving from cache");
            mark_ready(&guard, &entry, "Serving from cache");
            return Ok(PreparedTransfer {
                entry,
                from_cache: true,
                guard,
            });
        }

        let check = self.failures.check(video_id);
        if check.blocked {
            warn!(video_id, fail_count = check.fail_count, "Video temporarily blocked");
            return Err(DownloadError::IdentifierBlocked {
                reason: check
                    .reason
                    .unwrap_or_else(|| "Video temporarily blocked".to_string()),
                retry_after_seconds: check.retry_after_seconds,
                fail_count: check.fail_count,
            });
        }

        guard.update(|s| {
            s.status = ActiveStatus::Queued;
            s.progress_text = "Waiting for rate limit...".to_string();
        });
        self.rate.wait_before_next_attempt().await;
        guard.update(|s| {
            s.status = ActiveStatus::Starting;
            s.progress_text = "Connecting to YouTube...".to_string();
        });

        let artifact = match self
            .downloader
            .fetch_with_fallback(video_id, quality, &guard)
            .await
        {
            Ok(artifact) => artifact,
            Err(err) => {
                if let Some(is_block_detected) = err.failure_kind() {
                    self.failures.record_failure(video_id, is_block_detected);
                }
                return Err(err);
            }
        };

        let fetched_path = artifact.path.clone();
        let cache = Arc::clone(&self.cache);
        let id = video_id.to_string();
        let inserted = tokio::task::spawn_blocking(move || cache.insert(&id, &artifact))
            .await
            .map_err(|e| DownloadError::Cache(format!("Cache insert task failed: {}", e)))
            .and_then(|r| r);

        let entry = match inserted {
            Ok(entry) => entry,
            Err(err) => {
                warn!(video_id, error = %err, "Failed to cache download, discarding it");
                if let Err(e) = tokio::fs::remove_file(&fetched_path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %fetched_path.display(), error = %e, "Failed to remove download");
                    }
                }
                return Err(err);
            }
        };

        self.failures.clear(video_id);

        mark_ready(&guard, &entry, "Ready to send");
        Ok(PreparedTransfer {
            entry,
            from_cache: false,
            guard,
        })
    }

    /// Send a prepared file; the registry entry is released when this returns.
    pub async fn stream<W>(
        &self,
        prepared: PreparedTransfer,
        writer: &mut W,
    ) -> std::io::Result<TransferReport>
    where
        W: AsyncWrite + Unpin,
    {
        let PreparedTransfer {
            entry,
            from_cache,
            guard,
        } = prepared;

        let report =
            transfer::stream_file(&entry.storage_path, entry.byte_size, &guard, writer).await?;

        info!(
            video_id = guard.video_id(),
            from_cache,
            completed = report.completed,
            sent_mb = format!("{:.1}", report.bytes_sent as f64 / 1_048_576.0),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Transfer ended"
        );
        Ok(report)
    }

    pub fn status(&self, video_id: &str) -> VideoStatus {
        let video_id = video_id.to_string();

        if let Some(request) = self.active.get(&video_id) {
            return VideoStatus::Active { video_id, request };
        }

        if let Some(entry) = self.cache.peek(&video_id) {
            return VideoStatus::Cached { video_id, entry };
        }

        let check = self.failures.check(&video_id);
        if check.blocked {
            return VideoStatus::Blocked {
                video_id,
                reason: check.reason,
                retry_after: check.retry_after_seconds,
                fail_count: check.fail_count,
            };
        }

        VideoStatus::NotFound { video_id }
    }

    pub fn active(&self) -> Vec<String> {
        self.active.ids()
    }

    pub fn active_states(&self) -> BTreeMap<String, ActiveRequestState> {
        self.active.snapshot()
    }

    pub fn cache_snapshot(&self) -> CacheSnapshot {
        self.cache.snapshot()
    }

    pub fn failure_snapshot(&self) -> Vec<FailureSnapshot> {
        self.failures.snapshot()
    }

    pub fn backend_name(&self) -> &'static str {
        self.downloader.backend_name()
    }
}

fn mark_ready(guard: &ActiveGuard, entry: &CacheEntry, text: &str) {
    guard.update(|s| {
        s.status = ActiveStatus::Ready;
        s.phase = Phase::Transfer;
        s.progress = 100.0;
        s.progress_text = text.to_string();
        s.format_label = Some(entry.quality_label.clone());
        s.file_size = Some(entry.byte_size);
    });
}
