//! HTTP API.
//!
//! `GET /download` streams a video; the other routes report state.
//! Everything except `/health` requires `X-API-Key` when a key is configured.

pub mod auth;
pub mod error;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
