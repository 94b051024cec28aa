// Fetch backend trait definition

use async_trait::async_trait;

use super::errors::DownloadError;
use super::models::{FetchedArtifact, FormatDescriptor, ProgressEvent};

/// One attempt: a video id and the format to ask for
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub video_id: &'a str,
    pub format: &'a FormatDescriptor,
}

/// Trait for fetch tool implementations
#[async_trait]
pub trait FetchBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Run the tool once for one format.
    ///
    /// Implementations must delete any partial output for the video before
    /// returning an error.
    async fn invoke(
        &self,
        request: FetchRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<FetchedArtifact, DownloadError>;
}

/// Receiver for structured progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that drops every event
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}
