// External tool detection (yt-dlp, ffmpeg)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::utils::run_output_with_timeout;

const VERSION_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

pub struct ToolManager;

impl ToolManager {
    /// Resolve the yt-dlp binary: explicit path, then `~/.local/bin` (pip), then PATH
    pub fn resolve_ytdlp(configured: Option<&Path>) -> PathBuf {
        if let Some(path) = configured {
            return path.to_path_buf();
        }

        if let Some(local) = dirs::home_dir().map(|h| h.join(".local").join("bin").join("yt-dlp")) {
            if local.exists() {
                return local;
            }
        }

        PathBuf::from("yt-dlp")
    }

    /// Probe a tool by running its version command
    pub async fn get_tool_info(tool_type: ToolType, program: &Path) -> ToolInfo {
        let program_str = program.to_string_lossy().into_owned();
        let output = run_output_with_timeout(
            &program_str,
            vec![tool_type.version_arg().to_string()],
            VERSION_TIMEOUT_SECS,
        )
        .await;

        let version = match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            Ok(out) => {
                debug!(tool = tool_type.as_str(), status = ?out.status, "Version probe failed");
                None
            }
            Err(e) => {
                debug!(tool = tool_type.as_str(), error = %e, "Version probe failed");
                None
            }
        };

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            is_available: version.is_some(),
            path: version.as_ref().map(|_| program_str),
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_wins() {
        let path = ToolManager::resolve_ytdlp(Some(Path::new("/opt/yt/yt-dlp")));
        assert_eq!(path, PathBuf::from("/opt/yt/yt-dlp"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() {
        let info =
            ToolManager::get_tool_info(ToolType::YtDlp, Path::new("/nonexistent/yt-dlp-xyz")).await;
        assert!(!info.is_available);
        assert!(info.version.is_none());
        assert!(info.path.is_none());
        assert_eq!(info.name, "yt-dlp");
    }
}
