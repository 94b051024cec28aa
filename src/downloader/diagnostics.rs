// Blocking diagnostics - classifies yt-dlp error output
//
// Two layers:
// - ErrorVocabulary decides what the fallback loop does next
//   (bot detection vs. format rejection vs. anything else).
//   The substrings are configurable because upstream wording changes.
// - diagnose_error attaches a human-readable reason to the failure message.

use serde::Serialize;

/// Outcome of scanning the error lines of one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorVerdict {
    BlockDetected,
    FormatRejected,
    Other,
}

/// Substrings (matched case-insensitively) that classify error text
#[derive(Debug, Clone, Serialize)]
pub struct ErrorVocabulary {
    pub block_patterns: Vec<String>,
    pub format_patterns: Vec<String>,
}

impl Default for ErrorVocabulary {
    fn default() -> Self {
        Self::new(
            ["sign in", "bot", "confirm you're not", "confirm you are not"],
            ["403", "forbidden", "format"],
        )
    }
}

impl ErrorVocabulary {
    pub fn new<B, F>(block: B, format: F) -> Self
    where
        B: IntoIterator,
        B::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let normalize = |p: &str| p.trim().to_lowercase();
        Self {
            block_patterns: block
                .into_iter()
                .map(|p| normalize(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
            format_patterns: format
                .into_iter()
                .map(|p| normalize(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_block_line(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.block_patterns.iter().any(|p| lower.contains(p.as_str()))
    }

    pub fn is_format_line(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.format_patterns.iter().any(|p| lower.contains(p.as_str()))
    }

    /// Classify all error lines of one attempt.
    ///
    /// Block detection wins over everything else, wherever it appears.
    pub fn classify<'a, I>(&self, lines: I) -> ErrorVerdict
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut verdict = ErrorVerdict::Other;
        for line in lines {
            if self.is_block_line(line) {
                return ErrorVerdict::BlockDetected;
            }
            if self.is_format_line(line) {
                verdict = ErrorVerdict::FormatRejected;
            }
        }
        verdict
    }
}

/// Reasons why YouTube might refuse a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockingReason {
    /// HTTP 403 Forbidden - general access denied
    Http403Forbidden,
    /// Age-restricted content requiring login
    AgeRestricted,
    /// Private video requiring authorization
    PrivateVideo,
    /// Video deleted or unavailable
    VideoUnavailable,
    /// Geographic restriction
    GeoBlocked,
    /// Rate limiting (429 or similar)
    RateLimited,
    /// DRM-protected content
    DrmProtected,
    /// Network timeout (soft IP block)
    NetworkTimeout,
    Unknown,
}

impl BlockingReason {
    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Http403Forbidden => "Access denied (HTTP 403)",
            Self::AgeRestricted => "Age-restricted content",
            Self::PrivateVideo => "Private video",
            Self::VideoUnavailable => "Video unavailable",
            Self::GeoBlocked => "Geographic restriction",
            Self::RateLimited => "Rate limited by YouTube",
            Self::DrmProtected => "DRM-protected content",
            Self::NetworkTimeout => "Network timeout (possible IP throttling)",
            Self::Unknown => "Unknown error",
        }
    }

    /// Permanent restrictions never succeed on retry
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DrmProtected | Self::VideoUnavailable)
    }
}

/// Analyze error text and return the most specific reason
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    let lower = error.to_lowercase();

    if lower.contains("drm")
        || lower.contains("widevine")
        || lower.contains("youtube premium")
        || lower.contains("requires purchase")
    {
        return Some(BlockingReason::DrmProtected);
    }

    if lower.contains("age-restricted") || lower.contains("confirm your age") {
        return Some(BlockingReason::AgeRestricted);
    }

    if lower.contains("private video") || lower.contains("video is private") {
        return Some(BlockingReason::PrivateVideo);
    }

    if lower.contains("video unavailable")
        || lower.contains("video has been removed")
        || lower.contains("no longer available")
    {
        return Some(BlockingReason::VideoUnavailable);
    }

    if lower.contains("not available in your country") || lower.contains("blocked in your country") {
        return Some(BlockingReason::GeoBlocked);
    }

    if lower.contains("429") || lower.contains("too many requests") {
        return Some(BlockingReason::RateLimited);
    }

    if lower.contains("403") || lower.contains("forbidden") {
        return Some(BlockingReason::Http403Forbidden);
    }

    if lower.contains("timed out") || lower.contains("timeout") || lower.contains("connection refused") {
        return Some(BlockingReason::NetworkTimeout);
    }

    if !error.trim().is_empty() {
        return Some(BlockingReason::Unknown);
    }

    None
}

/// First useful line of an error dump, prefixed with the diagnosis
pub fn summarize(error: &str) -> String {
    let context = error
        .lines()
        .map(str::trim)
        .find(|l| l.to_lowercase().starts_with("error"))
        .or_else(|| error.lines().map(str::trim).rfind(|l| !l.is_empty()))
        .unwrap_or("");

    match diagnose_error(error) {
        Some(reason) if reason != BlockingReason::Unknown => {
            format!("{}: {}", reason.description(), context)
        }
        _ => context.to_string(),
    }
}
