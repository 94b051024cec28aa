// yt-dlp output line parser
//
// Every line of tool output goes through `parse_line` exactly once.
// Unknown or malformed lines map to `OutputLine::Other` and are never an error.

use regex::Regex;

/// One classified line of yt-dlp output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    /// `[download]  12.5% of ~ 310.04MiB at 374.36KiB/s ETA 11:59`
    /// or the bare form produced by our `--progress-template`
    Progress {
        percent: f32,
        total: Option<String>,
        speed: Option<String>,
        eta: Option<String>,
    },
    /// `[download] Destination: /tmp/x/abc_Title.f137.mp4`
    Destination(String),
    /// `[Merger] Merging formats into "/tmp/x/abc_Title.mp4"`
    Merging(Option<String>),
    /// `[download] /tmp/x/abc_Title.mp4 has already been downloaded`
    AlreadyDownloaded(String),
    Error(String),
    Other,
}

impl OutputLine {
    /// Short status text for a progress line
    pub fn describe(&self) -> Option<String> {
        match self {
            Self::Progress {
                percent,
                total,
                speed,
                eta,
            } => {
                let mut text = format!("{:.1}%", percent);
                if let Some(total) = total {
                    text.push_str(&format!(" of {}", total));
                }
                if let Some(speed) = speed {
                    text.push_str(&format!(" at {}", speed));
                }
                if let Some(eta) = eta {
                    text.push_str(&format!(" ETA {}", eta));
                }
                Some(text)
            }
            _ => None,
        }
    }
}

lazy_static::lazy_static! {
    static ref PROGRESS_RE: Regex = Regex::new(
        r"^(?:\[download\]\s+)?(\d{1,3}(?:\.\d+)?)%(?:\s+of\s+~?\s*(\S+))?(?:\s+at\s+(\S+))?(?:\s+ETA\s+(\S+))?"
    ).unwrap();
    static ref DEST_RE: Regex = Regex::new(r"^\[download\]\s+Destination:\s+(.+)$").unwrap();
    static ref MERGE_RE: Regex = Regex::new(r#"^\[Merger?\]\s+Merging(?:\s+formats\s+into\s+"?([^"]+)"?)?"#).unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"^\[download\]\s+(.+?)\s+has already been downloaded").unwrap();
}

/// Classify one line of tool output
pub fn parse_line(line: &str) -> OutputLine {
    let line = line.trim();
    if line.is_empty() {
        return OutputLine::Other;
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<f32>().ok())
            .filter(|p| (0.0..=100.0).contains(p));
        if let Some(percent) = percent {
            let field = |i: usize| {
                caps.get(i)
                    .map(|m| m.as_str().to_string())
                    .filter(|s| !s.eq_ignore_ascii_case("unknown") && !s.starts_with("NA"))
            };
            return OutputLine::Progress {
                percent,
                total: field(2),
                speed: field(3),
                eta: field(4),
            };
        }
    }

    if let Some(caps) = DEST_RE.captures(line) {
        return OutputLine::Destination(caps[1].trim().to_string());
    }

    if let Some(caps) = MERGE_RE.captures(line) {
        return OutputLine::Merging(caps.get(1).map(|m| m.as_str().trim().to_string()));
    }

    if let Some(caps) = ALREADY_RE.captures(line) {
        return OutputLine::AlreadyDownloaded(caps[1].to_string());
    }

    if line.contains("ERROR") || line.to_lowercase().starts_with("error") {
        return OutputLine::Error(line.to_string());
    }

    OutputLine::Other
}

/// Keeps the forwarded percentage from moving backwards.
///
/// yt-dlp restarts at 0% for the audio stream after the video stream;
/// the client sees a single climbing number per attempt.
#[derive(Debug, Default)]
pub struct PercentTracker {
    last: f32,
}

impl PercentTracker {
    pub fn update(&mut self, percent: f32) -> f32 {
        if percent > self.last {
            self.last = percent;
        }
        self.last
    }
}
