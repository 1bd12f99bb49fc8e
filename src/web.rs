use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, DefaultBodyLimit, Query, Request, State,
    },
    http::{HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api_errors::{error_envelope, AppError, REMAINING_HEADER};
use crate::app_state::AppState;
use crate::errors::LoggerError;
use crate::input_validator::{parse_log_query, validate_create_request};
use crate::log_record::{LogCreateRequest, LogRecord, PaginatedResult};
use crate::rate_limiter::client_ip;

/// Raw query string of `GET /logger/logs`. Everything is optional and
/// malformed values fall back to defaults one parameter at a time.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LogQueryParams {
    pub limit: Option<String>,
    pub page: Option<String>,
    pub offset: Option<String>,
    pub level_filter: Option<String>,
    pub date_filter: Option<String>,
}

impl LogQueryParams {
    /// Collect known parameters from decoded pairs. When a name repeats, the
    /// first value wins; unknown names are ignored.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (name, value) in pairs {
            let slot = match name.as_str() {
                "limit" => &mut params.limit,
                "page" => &mut params.page,
                "offset" => &mut params.offset,
                "level_filter" | "levelFilter" => &mut params.level_filter,
                "date_filter" | "dateFilter" => &mut params.date_filter,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        params
    }
}

/// Strict create body: unknown fields are rejected on this path.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateLogBody {
    #[serde(alias = "logLevel")]
    pub level: String,
    pub source: String,
    pub message: String,
}

/// Build the HTTP router. The rate limiter guards the read path only.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let logs = get(get_logs)
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .post(create_log);

    Router::new()
        .nest("/logger", Router::new().route("/logs", logs))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(middleware::from_fn(error_envelope))
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .with_state(state)
}

async fn get_logs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<PaginatedResult<LogRecord>>, AppError> {
    let params = query
        .map(|Query(pairs)| LogQueryParams::from_pairs(pairs))
        .unwrap_or_default();
    let (filter, pagination) = parse_log_query(
        params.limit.as_deref(),
        params.page.as_deref(),
        params.offset.as_deref(),
        params.level_filter.as_deref(),
        params.date_filter.as_deref(),
    );

    let page = tokio::time::timeout(
        state.request_timeout,
        state.query_service.get_logs(&filter, &pagination),
    )
    .await
    .map_err(|_| LoggerError::timeout("query logs"))??;

    Ok(Json(page))
}

async fn create_log(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateLogBody>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge("Payload too large".to_string())
        } else {
            AppError::bad_request(format!("Invalid payload: {}", rejection.body_text()))
        }
    })?;

    let request = LogCreateRequest {
        level: body.level,
        source: body.source,
        message: body.message,
    };
    let record = validate_create_request(&request)?;

    let event = LogCreateRequest::new(record.level, record.source, record.message);
    let payload = serde_json::to_vec(&event).map_err(LoggerError::from)?;
    state.publisher.publish(&state.topic, payload);

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    ))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(req.headers(), peer);

    let decision = tokio::time::timeout(state.request_timeout, state.rate_limiter.check(&ip))
        .await
        .map_err(|_| LoggerError::timeout("rate limit check"))??;

    if !decision.allowed {
        warn!(client = %ip, "Rate limit exceeded");
        return Err(AppError::TooManyRequests {
            remaining: decision.remaining,
            retry_after_secs: decision.retry_after_secs().unwrap_or(1),
        });
    }

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    Ok(response)
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        peer = %peer,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn repeated_parameter_keeps_first_value_only() {
        let params = LogQueryParams::from_pairs(pairs(&[
            ("limit", "5"),
            ("limit", "6"),
            ("level_filter", "fatal"),
        ]));
        assert_eq!(params.limit.as_deref(), Some("5"));
        assert_eq!(params.level_filter.as_deref(), Some("fatal"));
    }

    #[test]
    fn camel_case_aliases_and_unknown_names() {
        let params = LogQueryParams::from_pairs(pairs(&[
            ("levelFilter", "info"),
            ("dateFilter", "a,b"),
            ("sort", "desc"),
        ]));
        assert_eq!(
            params,
            LogQueryParams {
                level_filter: Some("info".into()),
                date_filter: Some("a,b".into()),
                ..LogQueryParams::default()
            }
        );
    }
}
