//! `GET /download`: fetch (or reuse) a video and stream it back.

use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::downloader::utils::sanitize_filename;
use crate::downloader::QualityTier;
use crate::service::CHUNK_SIZE;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub video_id: Option<String>,
    pub quality: Option<String>,
}

pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let video_id = query
        .video_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing video_id parameter"))?;
    let quality = match query.quality.as_deref() {
        Some(q) if !q.is_empty() => q.parse::<QualityTier>()?,
        _ => QualityTier::default(),
    };

    info!(video_id = %video_id, %quality, "Download request");

    let prepared = state
        .service
        .prepare_detached(video_id.clone(), quality)
        .await?;

    let entry = prepared.entry.clone();
    let from_cache = prepared.from_cache;
    let filename = sanitize_filename(&entry.display_filename, true);
    let content_type = content_type_for(&entry.storage_path);

    let (mut writer, reader) = tokio::io::duplex(CHUNK_SIZE);
    let service = state.service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.stream(prepared, &mut writer).await {
            warn!(error = %e, "Transfer failed");
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, entry.byte_size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .header("X-Video-Id", video_id.as_str())
        .header("X-Quality", entry.quality_label.as_str())
        .header("X-From-Cache", if from_cache { "true" } else { "false" })
        .body(Body::from_stream(ReaderStream::with_capacity(reader, CHUNK_SIZE)))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("m4a") => "audio/mp4",
        _ => "video/mp4",
    }
}
