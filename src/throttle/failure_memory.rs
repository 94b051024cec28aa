//! Per-video failure memory.
//!
//! A video that failed `max_fails` times inside the memory window is refused
//! until the window has elapsed since its most recent failure. Records expire
//! on their own; a success clears them early.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct FailureMemoryConfig {
    /// How long a failure is remembered.
    pub window: Duration,
    /// Failures within the window that block the video.
    pub max_fails: u32,
}

impl Default for FailureMemoryConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            max_fails: 2,
        }
    }
}

#[derive(Debug, Clone)]
struct FailureRecord {
    fail_count: u32,
    last_fail: Instant,
    is_block_detected: bool,
}

/// Result of [`FailureMemory::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCheck {
    pub blocked: bool,
    pub reason: Option<String>,
    pub retry_after_seconds: u64,
    pub fail_count: u32,
}

impl FailureCheck {
    fn allowed(fail_count: u32) -> Self {
        Self {
            blocked: false,
            reason: None,
            retry_after_seconds: 0,
            fail_count,
        }
    }
}

/// Serializable view of one remembered failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureSnapshot {
    pub video_id: String,
    pub fail_count: u32,
    pub is_block_detected: bool,
    pub seconds_since_last_fail: u64,
    pub blocked: bool,
}

pub struct FailureMemory {
    config: FailureMemoryConfig,
    records: Mutex<HashMap<String, FailureRecord>>,
}

impl FailureMemory {
    pub fn new(config: FailureMemoryConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether `video_id` may be fetched now.
    ///
    /// Purges every expired record first.
    pub fn check(&self, video_id: &str) -> FailureCheck {
        let now = Instant::now();
        let window = self.config.window;
        let mut records = self.records.lock();

        records.retain(|_, r| now.duration_since(r.last_fail) <= window);

        let Some(record) = records.get(video_id) else {
            return FailureCheck::allowed(0);
        };

        if record.fail_count < self.config.max_fails {
            return FailureCheck::allowed(record.fail_count);
        }

        let remaining = window.saturating_sub(now.duration_since(record.last_fail));
        let retry_after_seconds = ceil_secs(remaining).max(1);
        let reason = if record.is_block_detected {
            format!(
                "YouTube bot detection triggered for this video. Retry in {} seconds",
                retry_after_seconds
            )
        } else {
            format!(
                "Video failed {} times recently. Retry in {} seconds",
                record.fail_count, retry_after_seconds
            )
        };

        FailureCheck {
            blocked: true,
            reason: Some(reason),
            retry_after_seconds,
            fail_count: record.fail_count,
        }
    }

    pub fn record_failure(&self, video_id: &str, is_block_detected: bool) {
        let mut records = self.records.lock();
        let record = records
            .entry(video_id.to_string())
            .or_insert_with(|| FailureRecord {
                fail_count: 0,
                last_fail: Instant::now(),
                is_block_detected: false,
            });
        record.fail_count += 1;
        record.last_fail = Instant::now();
        record.is_block_detected |= is_block_detected;

        info!(
            video_id,
            fail_count = record.fail_count,
            is_block_detected = record.is_block_detected,
            "Recorded failure"
        );
    }

    pub fn clear(&self, video_id: &str) {
        if self.records.lock().remove(video_id).is_some() {
            debug!(video_id, "Cleared failure record");
        }
    }

    /// Unexpired records, most recent failure first.
    pub fn snapshot(&self) -> Vec<FailureSnapshot> {
        let now = Instant::now();
        let records = self.records.lock();
        let mut out: Vec<FailureSnapshot> = records
            .iter()
            .map(|(id, r)| (id, r, now.duration_since(r.last_fail)))
            .filter(|(_, _, elapsed)| *elapsed <= self.config.window)
            .map(|(id, r, elapsed)| FailureSnapshot {
                video_id: id.clone(),
                fail_count: r.fail_count,
                is_block_detected: r.is_block_detected,
                seconds_since_last_fail: elapsed.as_secs(),
                blocked: r.fail_count >= self.config.max_fails,
            })
            .collect();
        out.sort_by_key(|s| s.seconds_since_last_fail);
        out
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> FailureMemory {
        FailureMemory::new(FailureMemoryConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_does_not_block() {
        let memory = memory();
        memory.record_failure("abc", false);

        let check = memory.check("abc");
        assert!(!check.blocked);
        assert_eq!(check.fail_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_after_max_fails_until_window_elapses() {
        let memory = memory();
        memory.record_failure("abc", false);
        memory.record_failure("abc", false);

        let first = memory.check("abc");
        assert!(first.blocked);
        assert_eq!(first.fail_count, 2);
        assert_eq!(first.retry_after_seconds, 300);
        assert!(first.reason.unwrap().contains("failed 2 times"));

        tokio::time::advance(Duration::from_millis(100_500)).await;
        let second = memory.check("abc");
        assert!(second.blocked);
        assert_eq!(second.retry_after_seconds, 200);
        assert!(second.retry_after_seconds < first.retry_after_seconds);

        tokio::time::advance(Duration::from_secs(150)).await;
        let third = memory.check("abc");
        assert!(third.blocked);
        assert!(third.retry_after_seconds <= second.retry_after_seconds);

        tokio::time::advance(Duration::from_secs(50)).await;
        let after = memory.check("abc");
        assert!(!after.blocked);
        assert_eq!(after.fail_count, 0);
        assert!(memory.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_expires_only_after_window() {
        let memory = memory();
        memory.record_failure("abc", false);
        memory.record_failure("abc", false);

        tokio::time::advance(Duration::from_secs(300)).await;
        let at_boundary = memory.check("abc");
        assert!(at_boundary.blocked);
        assert_eq!(at_boundary.retry_after_seconds, 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!memory.check("abc").blocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_counts_from_most_recent_failure() {
        let memory = memory();
        memory.record_failure("abc", false);
        tokio::time::advance(Duration::from_secs(200)).await;
        memory.record_failure("abc", false);
        tokio::time::advance(Duration::from_secs(200)).await;

        let check = memory.check("abc");
        assert!(check.blocked);
        assert_eq!(check.retry_after_seconds, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_flag_is_sticky() {
        let memory = memory();
        memory.record_failure("abc", true);
        memory.record_failure("abc", false);

        let check = memory.check("abc");
        assert!(check.blocked);
        assert!(check.reason.unwrap().contains("bot detection"));
        assert!(memory.snapshot()[0].is_block_detected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_on_success() {
        let memory = memory();
        memory.record_failure("abc", false);
        memory.record_failure("abc", false);
        memory.clear("abc");

        assert!(!memory.check("abc").blocked);
        assert!(memory.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_purges_other_expired_records() {
        let memory = memory();
        memory.record_failure("old", false);
        tokio::time::advance(Duration::from_secs(301)).await;
        memory.record_failure("new", false);

        memory.check("unrelated");
        let ids: Vec<_> = memory.snapshot().into_iter().map(|s| s.video_id).collect();
        assert_eq!(ids, vec!["new".to_string()]);
        assert_eq!(memory.records.lock().len(), 1);
    }
}
