// Common data models for the download pipeline

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Quality tier requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QualityTier {
    #[serde(rename = "max")]
    Max,
    #[default]
    #[serde(rename = "1080")]
    P1080,
    #[serde(rename = "720")]
    P720,
    #[serde(rename = "360")]
    P360,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [Self::Max, Self::P1080, Self::P720, Self::P360];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::P1080 => "1080",
            Self::P720 => "720",
            Self::P360 => "360",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidQuality(pub String);

impl fmt::Display for InvalidQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid quality {:?}. Use: max, 1080, 720, 360", self.0)
    }
}

impl std::error::Error for InvalidQuality {}

impl FromStr for QualityTier {
    type Err = InvalidQuality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| InvalidQuality(s.to_string()))
    }
}

/// One yt-dlp format selector with a human label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatDescriptor {
    /// Display label (e.g. "1080p60")
    pub label: &'static str,
    /// yt-dlp `-f` expression
    pub selector: &'static str,
}

/// Structured progress reported by a fetch backend
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A new format attempt began
    Started { format_label: String },
    /// Download percentage (never decreasing within one attempt)
    Downloading { percent: f32, detail: String },
    /// Video and audio are being merged
    Merging,
    /// Tool exited successfully
    Finished,
}

/// A file produced by a successful fetch, still in the temp directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub byte_size: u64,
    pub quality_label: String,
    pub display_filename: String,
}

/// Lifecycle of an in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveStatus {
    /// Waiting on the rate controller
    Queued,
    Starting,
    Downloading,
    Merging,
    /// File is in the cache, transfer not yet started
    Ready,
    Transferring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Fetch,
    Merge,
    Transfer,
}

/// Live state of one in-flight request, exposed through `/status`
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRequestState {
    pub status: ActiveStatus,
    pub phase: Phase,
    pub progress: f32,
    pub progress_text: String,
    pub quality: QualityTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_label: Option<String>,
    pub bytes_sent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

impl ActiveRequestState {
    pub fn new(quality: QualityTier) -> Self {
        Self {
            status: ActiveStatus::Starting,
            phase: Phase::Init,
            progress: 0.0,
            progress_text: "Starting...".to_string(),
            quality,
            format_label: None,
            bytes_sent: 0,
            file_size: None,
            started_at: OffsetDateTime::now_utc(),
        }
    }

    /// Fold a backend progress event into this state
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { format_label } => {
                self.status = ActiveStatus::Starting;
                self.phase = Phase::Fetch;
                self.progress = 0.0;
                self.progress_text = format!("Trying {}...", format_label);
                self.format_label = Some(format_label.clone());
            }
            ProgressEvent::Downloading { percent, detail } => {
                self.status = ActiveStatus::Downloading;
                self.phase = Phase::Fetch;
                self.progress = *percent;
                self.progress_text = format!("YouTube: {}", detail);
            }
            ProgressEvent::Merging => {
                self.status = ActiveStatus::Merging;
                self.phase = Phase::Merge;
                self.progress = 100.0;
                self.progress_text = "Merging video and audio...".to_string();
            }
            ProgressEvent::Finished => {
                self.progress = 100.0;
                self.progress_text = "Download finished".to_string();
            }
        }
    }
}
