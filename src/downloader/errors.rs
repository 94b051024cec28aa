// Error types for the download pipeline

use thiserror::Error;

/// How one fetch attempt ended, as seen by the fallback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchClass {
    Success,
    /// Upstream refused this particular format; the next descriptor may work
    FormatRejected,
    /// Upstream suspects automated access; stop immediately
    BlockDetected,
    /// Anything else that ends the request
    OtherFailure,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Upstream refused the requested format (403, unavailable format, ...)
    #[error("Format {format} rejected: {message}")]
    FormatRejected { format: String, message: String },

    /// Upstream asked us to sign in / prove we are not a bot
    #[error("YouTube bot detection triggered: {message}")]
    BlockDetected { message: String },

    /// The fetch tool failed for another reason
    #[error("Download failed: {message}")]
    UpstreamFailure { message: String },

    /// The fetch tool ran longer than allowed and was killed
    #[error("Download timed out ({seconds} seconds)")]
    Timeout { seconds: u64 },

    /// Every format descriptor was rejected
    #[error("All {attempted} quality formats failed - video may be protected")]
    FormatsExhausted { attempted: usize },

    #[error("Download already in progress for {video_id}")]
    AlreadyInFlight { video_id: String },

    #[error("{reason}")]
    IdentifierBlocked {
        reason: String,
        retry_after_seconds: u64,
        fail_count: u32,
    },

    #[error("Invalid video id: {0:?}")]
    InvalidIdentifier(String),

    /// yt-dlp could not be started
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamFailure {
            message: message.into(),
        }
    }

    pub fn class(&self) -> FetchClass {
        match self {
            Self::FormatRejected { .. } => FetchClass::FormatRejected,
            Self::BlockDetected { .. } => FetchClass::BlockDetected,
            _ => FetchClass::OtherFailure,
        }
    }

    /// Whether this failure should be remembered against the video id.
    ///
    /// Returns `Some(is_block_detected)` for failures that count toward the
    /// per-id limit and `None` for local or admission errors.
    pub fn failure_kind(&self) -> Option<bool> {
        match self {
            Self::BlockDetected { .. } => Some(true),
            Self::UpstreamFailure { .. }
            | Self::Timeout { .. }
            | Self::FormatsExhausted { .. }
            | Self::FormatRejected { .. } => Some(false),
            _ => None,
        }
    }
}
