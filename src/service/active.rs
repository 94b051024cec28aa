//! In-flight request registry.
//!
//! One entry per video id. Inserting is the admission check: a second
//! request for a video that is already being served is turned away instead
//! of queued. The entry is dropped together with its [`ActiveGuard`].

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::downloader::{ActiveRequestState, ProgressEvent, ProgressSink, QualityTier};

#[derive(Default)]
pub struct ActiveRegistry {
    entries: DashMap<String, ActiveRequestState>,
}

impl ActiveRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `video_id`, or `None` if another request holds it.
    pub fn try_begin(self: &Arc<Self>, video_id: &str, quality: QualityTier) -> Option<ActiveGuard> {
        match self.entries.entry(video_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(ActiveRequestState::new(quality));
                debug!(video_id, "Request admitted");
                Some(ActiveGuard {
                    registry: Arc::clone(self),
                    video_id: video_id.to_string(),
                })
            }
        }
    }

    pub fn get(&self, video_id: &str) -> Option<ActiveRequestState> {
        self.entries.get(video_id).map(|s| s.clone())
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.entries.contains_key(video_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> BTreeMap<String, ActiveRequestState> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn update(&self, video_id: &str, f: impl FnOnce(&mut ActiveRequestState)) {
        if let Some(mut state) = self.entries.get_mut(video_id) {
            f(&mut state);
        }
    }
}

/// Ownership of one registry entry; removes it on drop.
pub struct ActiveGuard {
    registry: Arc<ActiveRegistry>,
    video_id: String,
}

impl ActiveGuard {
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn update(&self, f: impl FnOnce(&mut ActiveRequestState)) {
        self.registry.update(&self.video_id, f);
    }
}

impl ProgressSink for ActiveGuard {
    fn emit(&self, event: ProgressEvent) {
        self.update(|state| state.apply(&event));
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.registry.entries.remove(&self.video_id);
        debug!(video_id = %self.video_id, "Request finished");
    }
}

impl std::fmt::Debug for ActiveGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveGuard")
            .field("video_id", &self.video_id)
            .finish()
    }
}
