//! Health check route (no authentication).

use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ytdlp_version: Option<String>,
    pub active_downloads: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        backend: state.service.backend_name(),
        ytdlp_version: state.ytdlp_version.as_ref().map(|v| v.to_string()),
        active_downloads: state.service.active().len(),
    })
}
