//! API route definitions.

pub mod download;
pub mod health;
pub mod status;

use axum::{middleware, routing::get, Router};

use super::auth::{api_key_auth, ApiKeyAuth};
use super::server::AppState;

/// All routes; everything except `/health` sits behind the API key check.
pub fn create_router(state: AppState, auth: ApiKeyAuth) -> Router {
    let protected = Router::new()
        .route("/download", get(download::download))
        .route("/status", get(status::status))
        .route("/active", get(status::active))
        .route("/cache", get(status::cache))
        .route("/failures", get(status::failures))
        .route_layer(middleware::from_fn_with_state(auth, api_key_auth));

    Router::new()
        .route("/health", get(health::health))
        .merge(protected)
        .with_state(state)
}
