//! Caching yt-dlp download server.
//!
//! A request for a video id and quality tier is served from the media cache
//! when possible. Otherwise yt-dlp is run through a quality fallback list,
//! paced by the rate controller and guarded by per-video failure memory, and
//! the result is cached and streamed back in 1 MiB chunks.

pub mod api;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod service;
pub mod throttle;

pub use error::{Error, Result};
