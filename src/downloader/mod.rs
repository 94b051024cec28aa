// Downloader module - yt-dlp invocation with quality fallback

pub mod backends;
pub mod diagnostics;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod tools;
pub mod traits;
pub mod utils;

pub use backends::{YtDlpBackend, YtDlpConfig};
pub use diagnostics::ErrorVocabulary;
pub use errors::{DownloadError, FetchClass};
pub use format_selector::FormatSelector;
pub use models::{
    ActiveRequestState, ActiveStatus, FetchedArtifact, FormatDescriptor, Phase, ProgressEvent,
    QualityTier,
};
pub use orchestrator::Downloader;
pub use traits::{FetchBackend, FetchRequest, ProgressSink};
