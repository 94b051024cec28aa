use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::downloader::diagnostics::{diagnose_error, summarize, ErrorVerdict, ErrorVocabulary};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{FetchedArtifact, FormatDescriptor, ProgressEvent};
use crate::downloader::progress::{parse_line, OutputLine, PercentTracker};
use crate::downloader::traits::{FetchBackend, FetchRequest, ProgressSink};
use crate::downloader::utils;

const PROGRESS_TEMPLATE: &str = "download:%(progress._percent_str)s of %(progress._total_bytes_str)s at %(progress._speed_str)s ETA %(progress._eta_str)s";

/// Settings for running the yt-dlp binary
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub binary: PathBuf,
    /// Root of the per-video work directories `<temp_dir>/<id>/`
    pub temp_dir: PathBuf,
    pub timeout: Duration,
    pub cookies_file: Option<PathBuf>,
    pub proxy: Option<String>,
    pub vocabulary: ErrorVocabulary,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            temp_dir: std::env::temp_dir().join("yt_server_temp"),
            timeout: Duration::from_secs(600),
            cookies_file: None,
            proxy: None,
            vocabulary: ErrorVocabulary::default(),
        }
    }
}

pub struct YtDlpBackend {
    config: YtDlpConfig,
}

impl YtDlpBackend {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    pub fn watch_url(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", video_id)
    }

    fn build_args(&self, video_id: &str, format: &FormatDescriptor) -> Vec<String> {
        let template = self
            .work_dir(video_id)
            .join(format!("{}_%(title)s.%(ext)s", video_id));

        let mut args = vec![
            "-f".to_string(),
            format.selector.to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            "--no-playlist".to_string(),
            // one progress record per line
            "--newline".to_string(),
            // resuming a partial file tends to 403
            "--no-continue".to_string(),
            "--no-part".to_string(),
            // fail fast per format, the fallback loop tries the next one
            "--retries".to_string(),
            "3".to_string(),
            "--fragment-retries".to_string(),
            "3".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
        ];

        if let Some(cookies) = &self.config.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }

        if let Some(proxy) = &self.config.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(Self::watch_url(video_id));
        args
    }

    async fn run(
        &self,
        video_id: &str,
        format: &FormatDescriptor,
        progress: &dyn ProgressSink,
    ) -> Result<FetchedArtifact, DownloadError> {
        let args = self.build_args(video_id, format);
        debug!(video_id, args = %args.join(" "), "yt-dlp command");

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DownloadError::ToolNotFound(format!(
                    "Failed to start {}: {}",
                    self.config.binary.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::upstream("Failed to capture yt-dlp stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::upstream("Failed to capture yt-dlp stderr"))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    collected.push(line);
                }
            }
            collected
        });

        let mut output = AttemptOutput::default();
        let waited = timeout(self.config.timeout, async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                output.observe(&line, progress);
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(status)
        })
        .await;

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    video_id,
                    format = format.label,
                    timeout_secs = self.config.timeout.as_secs(),
                    "yt-dlp timed out, killing"
                );
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(DownloadError::Timeout {
                    seconds: self.config.timeout.as_secs(),
                });
            }
        };

        let stderr_lines = stderr_task.await.unwrap_or_default();
        for line in &stderr_lines {
            debug!(video_id, "[yt-dlp stderr] {}", line);
        }

        if !status.success() {
            output.error_lines.extend(stderr_lines);
            return Err(self.classify_failure(video_id, format, status.code(), &output.error_lines));
        }

        progress.emit(ProgressEvent::Finished);

        let path = output
            .artifact_candidates()
            .find(|p| p.is_file())
            .cloned()
            .or_else(|| utils::find_artifact(&self.work_dir(video_id), video_id))
            .ok_or_else(|| DownloadError::upstream("Output file not found after download"))?;

        let byte_size = tokio::fs::metadata(&path).await?.len();
        let display_filename = utils::display_filename(&path, video_id);

        info!(
            video_id,
            format = format.label,
            file = %path.display(),
            size_mb = format!("{:.1}", byte_size as f64 / 1_048_576.0),
            "yt-dlp finished"
        );

        Ok(FetchedArtifact {
            path,
            byte_size,
            quality_label: format.label.to_string(),
            display_filename,
        })
    }

    fn classify_failure(
        &self,
        video_id: &str,
        format: &FormatDescriptor,
        code: Option<i32>,
        error_lines: &[String],
    ) -> DownloadError {
        let text = if error_lines.is_empty() {
            match code {
                Some(code) => format!("yt-dlp exited with code {}", code),
                None => "yt-dlp was terminated by a signal".to_string(),
            }
        } else {
            error_lines.join("\n")
        };

        let verdict = self
            .config
            .vocabulary
            .classify(error_lines.iter().map(String::as_str));
        let message = summarize(&text);

        match verdict {
            ErrorVerdict::BlockDetected => {
                warn!(video_id, format = format.label, %message, "Bot detection triggered");
                DownloadError::BlockDetected { message }
            }
            ErrorVerdict::FormatRejected => {
                info!(video_id, format = format.label, %message, "Format rejected");
                DownloadError::FormatRejected {
                    format: format.label.to_string(),
                    message,
                }
            }
            ErrorVerdict::Other => {
                let permanent = diagnose_error(&text).is_some_and(|r| r.is_permanent());
                warn!(video_id, format = format.label, permanent, %message, "yt-dlp failed");
                DownloadError::UpstreamFailure { message }
            }
        }
    }

    /// Only one request per id runs at a time, so nothing else writes here.
    fn work_dir(&self, video_id: &str) -> PathBuf {
        self.config.temp_dir.join(video_id)
    }
}

/// What one attempt printed on stdout
#[derive(Default)]
struct AttemptOutput {
    tracker: PercentTracker,
    error_lines: Vec<String>,
    destinations: Vec<PathBuf>,
    merge_target: Option<PathBuf>,
    already_downloaded: Option<PathBuf>,
}

impl AttemptOutput {
    fn observe(&mut self, line: &str, progress: &dyn ProgressSink) {
        let parsed = parse_line(line);
        match &parsed {
            OutputLine::Progress { percent, .. } => {
                let percent = self.tracker.update(*percent);
                let detail = parsed.describe().unwrap_or_default();
                progress.emit(ProgressEvent::Downloading { percent, detail });
            }
            OutputLine::Destination(path) => {
                debug!("[yt-dlp] {}", line);
                self.destinations.push(PathBuf::from(path));
            }
            OutputLine::Merging(target) => {
                info!("[yt-dlp] {}", line);
                if let Some(target) = target {
                    self.merge_target = Some(PathBuf::from(target));
                }
                progress.emit(ProgressEvent::Merging);
            }
            OutputLine::AlreadyDownloaded(path) => {
                self.already_downloaded = Some(PathBuf::from(path));
            }
            OutputLine::Error(text) => {
                warn!("[yt-dlp] {}", text);
                self.error_lines.push(text.clone());
            }
            OutputLine::Other => {
                if line.starts_with('[') {
                    debug!("[yt-dlp] {}", line);
                }
            }
        }
    }

    /// Where the finished file should be, best guess first
    fn artifact_candidates(&self) -> impl Iterator<Item = &PathBuf> + '_ {
        self.merge_target
            .iter()
            .chain(self.already_downloaded.iter())
            .chain(self.destinations.iter().rev())
    }
}

#[async_trait]
impl FetchBackend for YtDlpBackend {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn invoke(
        &self,
        request: FetchRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<FetchedArtifact, DownloadError> {
        let FetchRequest { video_id, format } = request;
        let work_dir = self.work_dir(video_id);
        tokio::fs::create_dir_all(&work_dir).await?;

        info!(
            video_id,
            format = format.label,
            selector = format.selector,
            "Starting yt-dlp"
        );
        progress.emit(ProgressEvent::Started {
            format_label: format.label.to_string(),
        });

        let result = self.run(video_id, format, progress).await;
        if result.is_err() {
            let removed = utils::remove_partial_files(&work_dir, video_id);
            if removed > 0 {
                debug!(video_id, removed, "Cleaned up partial files");
            }
            let _ = tokio::fs::remove_dir(&work_dir).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::format_selector::FORMAT_TABLE;
    use parking_lot::Mutex;
    use std::path::Path;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn emit(&self, event: ProgressEvent) {
            self.0.lock().push(event);
        }
    }

    fn backend_with(binary: PathBuf, temp_dir: &Path, timeout: Duration) -> YtDlpBackend {
        YtDlpBackend::new(YtDlpConfig {
            binary,
            temp_dir: temp_dir.to_path_buf(),
            timeout,
            ..YtDlpConfig::default()
        })
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-yt-dlp.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_build_args() {
        let backend = YtDlpBackend::new(YtDlpConfig {
            temp_dir: PathBuf::from("/tmp/yt"),
            cookies_file: Some(PathBuf::from("/etc/cookies.txt")),
            proxy: Some("socks5://127.0.0.1:1080".to_string()),
            ..YtDlpConfig::default()
        });
        let args = backend.build_args("abc123", &FORMAT_TABLE[5]);

        assert_eq!(args[0], "-f");
        assert_eq!(args[1], FORMAT_TABLE[5].selector);
        assert!(args.contains(&"/tmp/yt/abc123/abc123_%(title)s.%(ext)s".to_string()));
        assert!(args.contains(&"--newline".to_string()));
        let cookies = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(args[cookies + 1], "/etc/cookies.txt");
        let proxy = args.iter().position(|a| a == "--proxy").unwrap();
        assert_eq!(args[proxy + 1], "socks5://127.0.0.1:1080");
        assert_eq!(
            args.last().unwrap(),
            "https://www.youtube.com/watch?v=abc123"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_reports_progress_and_artifact() {
        let tools = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("vid").join("vid_My Video.mp4");
        let script = write_script(
            tools.path(),
            &format!(
                "echo '[youtube] vid: Downloading webpage'\n\
                 echo ' 10.0% of 1.00MiB at 1.00MiB/s ETA 00:01'\n\
                 echo ' 60.0% of 1.00MiB at 1.00MiB/s ETA 00:01'\n\
                 echo '  5.0% of 0.20MiB at 1.00MiB/s ETA 00:01'\n\
                 printf 'media-bytes' > '{out}'\n\
                 echo '[Merger] Merging formats into \"{out}\"'\n\
                 exit 0",
                out = out.display()
            ),
        );

        let backend = backend_with(script, temp.path(), Duration::from_secs(30));
        let recorder = Recorder::default();
        let artifact = backend
            .invoke(
                FetchRequest {
                    video_id: "vid",
                    format: &FORMAT_TABLE[3],
                },
                &recorder,
            )
            .await
            .unwrap();

        assert_eq!(artifact.path, out);
        assert_eq!(artifact.byte_size, "media-bytes".len() as u64);
        assert_eq!(artifact.quality_label, "1080p");
        assert_eq!(artifact.display_filename, "My Video.mp4");

        let events = recorder.0.lock().clone();
        let percents: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Downloading { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![10.0, 60.0, 60.0]);
        assert!(events.contains(&ProgressEvent::Merging));
        assert_eq!(events.last(), Some(&ProgressEvent::Finished));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bot_detection_wins_and_partials_are_removed() {
        let tools = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let partial = temp.path().join("vid").join("vid_Title.f137.mp4");
        let script = write_script(
            tools.path(),
            &format!(
                "printf 'partial' > '{}'\n\
                 echo 'ERROR: unable to download video data: HTTP Error 403: Forbidden' >&2\n\
                 echo \"ERROR: [youtube] vid: Sign in to confirm you're not a bot\" >&2\n\
                 exit 1",
                partial.display()
            ),
        );

        let backend = backend_with(script, temp.path(), Duration::from_secs(30));
        let err = backend
            .invoke(
                FetchRequest {
                    video_id: "vid",
                    format: &FORMAT_TABLE[0],
                },
                &Recorder::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::BlockDetected { .. }));
        assert!(!partial.exists());
        assert!(!temp.path().join("vid").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_leaves_prefixed_id_untouched() {
        let tools = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let neighbour_dir = temp.path().join("abc_def");
        std::fs::create_dir_all(&neighbour_dir).unwrap();
        let neighbour = neighbour_dir.join("abc_def_Other Title.mp4");
        std::fs::write(&neighbour, b"in flight").unwrap();

        let script = write_script(
            tools.path(),
            "echo 'ERROR: HTTP Error 403: Forbidden' >&2\nexit 1",
        );
        let backend = backend_with(script, temp.path(), Duration::from_secs(30));
        let err = backend
            .invoke(
                FetchRequest {
                    video_id: "abc",
                    format: &FORMAT_TABLE[0],
                },
                &Recorder::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::FormatRejected { .. }));
        assert!(neighbour.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_artifact_search_ignores_prefixed_id() {
        let tools = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let neighbour_dir = temp.path().join("abc_def");
        std::fs::create_dir_all(&neighbour_dir).unwrap();
        std::fs::write(neighbour_dir.join("abc_def_Other Title.mp4"), b"other").unwrap();

        let script = write_script(tools.path(), "exit 0");
        let backend = backend_with(script, temp.path(), Duration::from_secs(30));
        let err = backend
            .invoke(
                FetchRequest {
                    video_id: "abc",
                    format: &FORMAT_TABLE[8],
                },
                &Recorder::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::UpstreamFailure { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_forbidden_is_format_rejected() {
        let tools = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(
            tools.path(),
            "echo 'ERROR: unable to download video data: HTTP Error 403: Forbidden'\nexit 1",
        );

        let backend = backend_with(script, temp.path(), Duration::from_secs(30));
        let err = backend
            .invoke(
                FetchRequest {
                    video_id: "vid",
                    format: &FORMAT_TABLE[0],
                },
                &Recorder::default(),
            )
            .await
            .unwrap_err();

        match err {
            DownloadError::FormatRejected { format, message } => {
                assert_eq!(format, "4K60");
                assert!(message.contains("403"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_failure_is_upstream_failure() {
        let tools = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(tools.path(), "exit 2");

        let backend = backend_with(script, temp.path(), Duration::from_secs(30));
        let err = backend
            .invoke(
                FetchRequest {
                    video_id: "vid",
                    format: &FORMAT_TABLE[8],
                },
                &Recorder::default(),
            )
            .await
            .unwrap_err();

        match err {
            DownloadError::UpstreamFailure { message } => {
                assert_eq!(message, "yt-dlp exited with code 2");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_without_output_file() {
        let tools = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(tools.path(), "exit 0");

        let backend = backend_with(script, temp.path(), Duration::from_secs(30));
        let err = backend
            .invoke(
                FetchRequest {
                    video_id: "vid",
                    format: &FORMAT_TABLE[8],
                },
                &Recorder::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::UpstreamFailure { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let tools = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let script = write_script(tools.path(), "sleep 30");

        let backend = backend_with(script, temp.path(), Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = backend
            .invoke(
                FetchRequest {
                    video_id: "vid",
                    format: &FORMAT_TABLE[8],
                },
                &Recorder::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let temp = tempfile::tempdir().unwrap();
        let backend = backend_with(
            PathBuf::from("/nonexistent/yt-dlp-xyz"),
            temp.path(),
            Duration::from_secs(5),
        );
        let err = backend
            .invoke(
                FetchRequest {
                    video_id: "vid",
                    format: &FORMAT_TABLE[8],
                },
                &Recorder::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
}
