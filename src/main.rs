use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use youtube_download_server::api::{ApiServer, AppState};
use youtube_download_server::cache::MediaCache;
use youtube_download_server::config::Config;
use youtube_download_server::downloader::tools::{ToolManager, ToolType};
use youtube_download_server::downloader::{utils, Downloader, YtDlpBackend};
use youtube_download_server::service::DownloadService;
use youtube_download_server::throttle::{FailureMemory, RateController};
use youtube_download_server::{logging, Error};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    logging::init();
    config.validate()?;

    let ytdlp_path = ToolManager::resolve_ytdlp(config.ytdlp_path.as_deref());
    let ytdlp = ToolManager::get_tool_info(ToolType::YtDlp, &ytdlp_path).await;
    if !ytdlp.is_available {
        error!(path = %ytdlp_path.display(), "yt-dlp not found. Install it with: pip install yt-dlp");
        return Err(Error::ToolMissing(ytdlp_path.display().to_string()).into());
    }
    info!(
        path = %ytdlp_path.display(),
        version = ytdlp.version.as_deref().unwrap_or("unknown"),
        "Found yt-dlp"
    );

    let ffmpeg = ToolManager::get_tool_info(ToolType::Ffmpeg, &config.ffmpeg_path).await;
    if !ffmpeg.is_available {
        warn!("ffmpeg not found. Some videos may not merge properly");
    }

    let temp_dir = config.temp_dir();
    std::fs::create_dir_all(&temp_dir)
        .with_context(|| format!("creating temp dir {}", temp_dir.display()))?;

    let cache = Arc::new(MediaCache::open(config.cache_config())?);
    let rate = Arc::new(RateController::new(config.rate_config()));
    let backend = Arc::new(YtDlpBackend::new(config.ytdlp_config(ytdlp_path)));
    let service = Arc::new(DownloadService::new(
        Downloader::new(backend, rate.clone()),
        cache.clone(),
        FailureMemory::new(config.failure_config()),
        rate,
    ));

    info!(
        cache_dir = %cache.dir().display(),
        temp_dir = %temp_dir.display(),
        cached = cache.len(),
        max_entries = cache.max_entries(),
        auth = config.api_key.as_deref().is_some_and(|k| !k.is_empty()),
        "YouTube download server starting"
    );

    let server = ApiServer::new(
        config.server_config(),
        AppState::new(service, ytdlp.version.clone()),
    );
    let cancel_token = server.cancel_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel_token.cancel();
    });

    let result = server.run().await;

    let removed = utils::clear_directory(&temp_dir);
    if removed > 0 {
        info!(removed, "Cleaned up temp files");
    }
    info!("Server stopped");

    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
