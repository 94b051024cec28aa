// Fetch tool backends

pub mod ytdlp;

pub use ytdlp::{YtDlpBackend, YtDlpConfig};
