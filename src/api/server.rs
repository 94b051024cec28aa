//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Request, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use super::auth::ApiKeyAuth;
use super::routes;
use crate::error::{Error, Result};
use crate::service::DownloadService;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Required in `X-API-Key` when set
    pub api_key: Option<String>,
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8765,
            api_key: None,
            enable_cors: true,
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DownloadService>,
    /// Reported by `/health`
    pub ytdlp_version: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: Arc<DownloadService>, ytdlp_version: Option<String>) -> Self {
        Self {
            service,
            ytdlp_version: ytdlp_version.map(Arc::from),
        }
    }
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Cancel to stop accepting connections and drain in-flight ones.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn build_router(&self) -> Router {
        let auth = ApiKeyAuth::new(self.config.api_key.clone());
        let mut router = routes::create_router(self.state.clone(), auth);

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any);
            router = router.layer(cors);
        }

        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path() == "/health" {
                        Span::none()
                    } else {
                        tracing::info_span!("http", method = %req.method(), uri = %req.uri())
                    }
                })
                .on_request(|_req: &Request, _span: &Span| {})
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        tracing::info!(
                            status = res.status().as_u16(),
                            latency_ms = latency.as_millis() as u64,
                            "Response"
                        );
                    },
                ),
        )
    }

    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen address: {}", e)))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!(
            auth = self.config.api_key.is_some(),
            "API server listening on http://{}",
            addr
        );

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::Server(format!("Server error: {}", e)))?;

        Ok(())
    }
}
