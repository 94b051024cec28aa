// Orchestrator with quality fallback logic

use std::sync::Arc;

use tracing::{info, warn};

use super::errors::{DownloadError, FetchClass};
use super::format_selector::FormatSelector;
use super::models::{FetchedArtifact, QualityTier};
use super::traits::{FetchBackend, FetchRequest, ProgressSink};
use crate::throttle::RateController;

/// What the loop does after one attempt
enum Step {
    Done(FetchedArtifact),
    NextFormat,
    Abort(DownloadError),
}

pub struct Downloader {
    backend: Arc<dyn FetchBackend>,
    rate: Arc<RateController>,
}

impl Downloader {
    pub fn new(backend: Arc<dyn FetchBackend>, rate: Arc<RateController>) -> Self {
        Self { backend, rate }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Try every format for `quality`, best first, until one succeeds.
    ///
    /// A rejected format moves on to the next one. Bot detection and any
    /// other failure stop the loop with that error.
    pub async fn fetch_with_fallback(
        &self,
        video_id: &str,
        quality: QualityTier,
        progress: &dyn ProgressSink,
    ) -> Result<FetchedArtifact, DownloadError> {
        let formats = FormatSelector::select_formats(quality);

        for (attempt, format) in formats.iter().enumerate() {
            info!(
                video_id,
                backend = self.backend.name(),
                format = format.label,
                attempt = attempt + 1,
                of = formats.len(),
                "Trying format"
            );

            self.rate.record_attempt();
            let outcome = self
                .backend
                .invoke(FetchRequest { video_id, format }, progress)
                .await;

            match self.step(video_id, outcome) {
                Step::Done(artifact) => return Ok(artifact),
                Step::NextFormat => continue,
                Step::Abort(err) => return Err(err),
            }
        }

        warn!(video_id, attempted = formats.len(), "All formats failed");
        Err(DownloadError::FormatsExhausted {
            attempted: formats.len(),
        })
    }

    fn step(&self, video_id: &str, outcome: Result<FetchedArtifact, DownloadError>) -> Step {
        let err = match outcome {
            Ok(artifact) => {
                info!(video_id, format = %artifact.quality_label, "Fetch succeeded");
                return Step::Done(artifact);
            }
            Err(err) => err,
        };

        match err.class() {
            FetchClass::FormatRejected => {
                info!(video_id, error = %err, "Format blocked, trying next");
                Step::NextFormat
            }
            FetchClass::BlockDetected => {
                self.rate.record_block_detected();
                warn!(video_id, error = %err, "Bot detection, aborting fallback");
                Step::Abort(err)
            }
            FetchClass::OtherFailure | FetchClass::Success => {
                warn!(video_id, error = %err, "Fetch failed");
                Step::Abort(err)
            }
        }
    }
}
