//! API key authentication for protected endpoints.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::error::ApiError;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// The configured key; `None` disables authentication.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyAuth {
    api_key: Option<Arc<str>>,
}

impl ApiKeyAuth {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn is_valid(&self, key: &str) -> bool {
        self.api_key.as_deref().map_or(true, |expected| expected == key)
    }
}

pub async fn api_key_auth(
    State(auth): State<ApiKeyAuth>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !auth.is_enabled() {
        return Ok(next.run(request).await);
    }

    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match api_key {
        Some(key) if auth.is_valid(key) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Invalid API key provided");
            Err(ApiError::unauthorized("Invalid or missing API key"))
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "Missing API key in request");
            Err(ApiError::unauthorized("Invalid or missing API key"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        let auth = ApiKeyAuth::new(Some("secret".to_string()));
        assert!(auth.is_enabled());
        assert!(auth.is_valid("secret"));
        assert!(!auth.is_valid("wrong"));

        let open = ApiKeyAuth::new(Some(String::new()));
        assert!(!open.is_enabled());
        assert!(open.is_valid("anything"));
    }
}
