//! API error handling.
//!
//! Every failure is answered with `{"error": ..., "success": false}` plus
//! optional retry hints.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::downloader::models::InvalidQuality;
use crate::downloader::DownloadError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after: Option<u64>,
    pub fail_count: Option<u32>,
    pub blocked: Option<bool>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
            fail_count: None,
            blocked: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after;
        let body = ApiErrorResponse {
            error: self.message,
            success: false,
            retry_after,
            fail_count: self.fail_count,
            blocked: self.blocked,
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        let message = err.to_string();
        match err {
            DownloadError::InvalidIdentifier(_) => ApiError::bad_request(message),
            DownloadError::AlreadyInFlight { .. } => ApiError::conflict(message),
            DownloadError::IdentifierBlocked {
                reason,
                retry_after_seconds,
                fail_count,
            } => ApiError {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: reason,
                retry_after: Some(retry_after_seconds),
                fail_count: Some(fail_count),
                blocked: Some(true),
            },
            DownloadError::BlockDetected { .. } => {
                let mut api = ApiError::new(StatusCode::SERVICE_UNAVAILABLE, message);
                api.blocked = Some(true);
                api
            }
            DownloadError::Timeout { .. } => ApiError::new(StatusCode::GATEWAY_TIMEOUT, message),
            DownloadError::UpstreamFailure { .. }
            | DownloadError::FormatsExhausted { .. }
            | DownloadError::FormatRejected { .. } => ApiError::bad_gateway(message),
            DownloadError::ToolNotFound(_) | DownloadError::Cache(_) | DownloadError::Io(_) => {
                tracing::error!("Internal download error: {}", message);
                ApiError::internal(message)
            }
        }
    }
}

impl From<InvalidQuality> for ApiError {
    fn from(err: InvalidQuality) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                DownloadError::InvalidIdentifier("x y".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                DownloadError::AlreadyInFlight {
                    video_id: "abc".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                DownloadError::BlockDetected {
                    message: "bot".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                DownloadError::Timeout { seconds: 600 },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                DownloadError::FormatsExhausted { attempted: 9 },
                StatusCode::BAD_GATEWAY,
            ),
            (
                DownloadError::upstream("Video unavailable"),
                StatusCode::BAD_GATEWAY,
            ),
            (
                DownloadError::ToolNotFound("yt-dlp".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn test_blocked_response_carries_retry_hints() {
        let response = ApiError::from(DownloadError::IdentifierBlocked {
            reason: "Video failed 2 times recently".into(),
            retry_after_seconds: 120,
            fail_count: 2,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "120");
    }

    #[test]
    fn test_error_body_shape() {
        let body = ApiErrorResponse {
            error: "nope".into(),
            success: false,
            retry_after: None,
            fail_count: None,
            blocked: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"error": "nope", "success": false}));
    }
}
