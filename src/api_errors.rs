use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::errors::LoggerError;

/// Permits left in the current window.
pub const REMAINING_HEADER: &str = "ratelimit-remaining";
/// Seconds until the next permit, sent on 429 responses.
pub const RETRY_AFTER_HEADER: &str = "ratelimit-retryafter";

/// Errors as the HTTP layer reports them.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("rate limit exceeded")]
    TooManyRequests { remaining: u32, retry_after_secs: u64 },
    #[error("request timed out")]
    Timeout,
    /// Detail is logged, never returned to the caller.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// JSON error envelope. `path` and `method` are filled in by
/// [`error_envelope`] when the response leaves the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let AppError::Internal(detail) = &self {
            error!(detail = %detail, "Request failed");
        }

        let body = ErrorBody {
            message: self.public_message(),
            status_code: status.as_u16(),
            path: None,
            method: None,
            timestamp: Utc::now(),
        };

        let mut response = (status, Json(body.clone())).into_response();
        if let AppError::TooManyRequests {
            remaining,
            retry_after_secs,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
            headers.insert(RETRY_AFTER_HEADER, HeaderValue::from(retry_after_secs));
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response.extensions_mut().insert(body);
        response
    }
}

impl From<LoggerError> for AppError {
    fn from(err: LoggerError) -> Self {
        match err {
            LoggerError::Validation { .. } => AppError::BadRequest(err.to_string()),
            LoggerError::Timeout { .. } => AppError::Timeout,
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Adds the request path and method to error bodies produced by [`AppError`].
pub async fn error_envelope(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;
    let Some(body) = response.extensions_mut().remove::<ErrorBody>() else {
        return response;
    };

    let enriched = ErrorBody {
        path: Some(path),
        method: Some(method),
        ..body
    };
    match serde_json::to_vec(&enriched) {
        Ok(bytes) => {
            let (mut parts, _) = response.into_parts();
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            error!(error = %e, "Failed to encode error body");
            response
        }
    }
}
