// Helper functions for backend implementations

use std::path::{Path, PathBuf};
use std::process::Stdio;

use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::errors::DownloadError;

const MAX_FILENAME_LEN: usize = 100;

/// Extensions yt-dlp may leave behind as a finished artifact
pub const MEDIA_EXTENSIONS: [&str; 4] = ["mp4", "mkv", "webm", "m4a"];

lazy_static::lazy_static! {
    static ref INVALID_CHARS_RE: Regex = Regex::new(r#"[<>:"/\\|?*]"#).unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Make a name safe for the filesystem and, optionally, for an HTTP header.
///
/// Header-safe names are ASCII only. Falls back to "video" when nothing is left.
pub fn sanitize_filename(name: &str, for_http_header: bool) -> String {
    let mut sanitized = INVALID_CHARS_RE.replace_all(name, "").into_owned();

    if for_http_header {
        sanitized = sanitized
            .replace('？', "")
            .replace('：', "-")
            .replace('！', "!")
            .chars()
            .filter(|c| c.is_ascii() && !c.is_ascii_control())
            .collect();
    }

    let collapsed = WHITESPACE_RE.replace_all(&sanitized, " ");
    let trimmed: String = collapsed.trim().chars().take(MAX_FILENAME_LEN).collect();
    let trimmed = trimmed.trim();

    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Client-facing filename for an artifact named `<id>_<title>.<ext>`
pub fn display_filename(path: &Path, video_id: &str) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let title = stem
        .strip_prefix(&format!("{}_", video_id))
        .unwrap_or(&stem);
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());

    format!("{}.{}", sanitize_filename(title, true), ext)
}

/// Files in `dir` produced for `video_id` (named `<id>_...`)
pub fn files_for_video(dir: &Path, video_id: &str) -> Vec<PathBuf> {
    let prefix = format!("{}_", video_id);
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect()
}

/// Delete partial output left behind by a failed attempt
pub fn remove_partial_files(dir: &Path, video_id: &str) -> usize {
    let mut removed = 0;
    for path in files_for_video(dir, video_id) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed partial file");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
        }
    }
    removed
}

/// Most recently modified finished media file for `video_id`
pub fn find_artifact(dir: &Path, video_id: &str) -> Option<PathBuf> {
    files_for_video(dir, video_id)
        .into_iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| MEDIA_EXTENSIONS.contains(&e))
        })
        .max_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
}

/// Empty `dir`, including per-video work directories; returns how many
/// entries were removed
pub fn clear_directory(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            let removed = if p.is_dir() {
                std::fs::remove_dir_all(p)
            } else {
                std::fs::remove_file(p)
            };
            match removed {
                Ok(()) => true,
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "Failed to remove temp entry");
                    false
                }
            }
        })
        .count()
}

/// Run command with timeout (shared utility)
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DownloadError::ToolNotFound(format!("Failed to start {}: {}", program, e)))?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<Vec<u8>, std::io::Error>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<Vec<u8>, std::io::Error>(buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = stdout_task
                .await
                .map_err(|e| DownloadError::upstream(format!("stdout task failed: {}", e)))??;
            let stderr = stderr_task
                .await
                .map_err(|e| DownloadError::upstream(format!("stderr task failed: {}", e)))??;
            Ok(std::process::Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::Timeout {
                seconds: timeout_secs,
            })
        }
    }
}
