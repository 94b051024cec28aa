//! Read-only views: per-video status, in-flight ids, cache and failure memory.

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::server::AppState;
use crate::cache::CacheSnapshot;
use crate::downloader::ActiveRequestState;
use crate::throttle::FailureSnapshot;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub video_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActiveStatesResponse {
    pub active: BTreeMap<String, ActiveRequestState>,
}

#[derive(Debug, Serialize)]
pub struct ActiveListResponse {
    pub active: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct FailuresResponse {
    pub failures: Vec<FailureSnapshot>,
}

pub async fn status(State(state): State<AppState>, Query(query): Query<StatusQuery>) -> Response {
    match query.video_id.filter(|id| !id.is_empty()) {
        Some(video_id) => Json(state.service.status(&video_id)).into_response(),
        None => Json(ActiveStatesResponse {
            active: state.service.active_states(),
        })
        .into_response(),
    }
}

pub async fn active(State(state): State<AppState>) -> Json<ActiveListResponse> {
    let active = state.service.active();
    Json(ActiveListResponse {
        count: active.len(),
        active,
    })
}

pub async fn cache(State(state): State<AppState>) -> Json<CacheSnapshot> {
    Json(state.service.cache_snapshot())
}

pub async fn failures(State(state): State<AppState>) -> Json<FailuresResponse> {
    Json(FailuresResponse {
        failures: state.service.failure_snapshot(),
    })
}
