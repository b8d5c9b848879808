mod rate_limit;

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Json, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use concierge_agents::{ConciergeAgent, LegacyChatRequest};
use concierge_core::{ConciergeAsk, ConciergeChatRequest, ConciergeError};
use concierge_observability::{AppMetrics, MetricsSnapshot};
use concierge_providers::Providers;
use concierge_storage::{ChatHistoryEntry, Store};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use url::Url;

pub use crate::rate_limit::IpRateLimiter;

const DEFAULT_API_KEY: &str = "dev-concierge-key";
const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];
const MAX_BODY_BYTES: usize = 64 * 1024;

/// HTTP-facing settings, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: String,
    pub api_key: String,
    pub database_url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    /// Key the rate limiter on `X-Forwarded-For`; only safe behind a proxy that sets it.
    pub trust_forwarded_for: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            database_url: None,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 60,
            trust_forwarded_for: false,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: env::var("CONCIERGE_BIND").unwrap_or(defaults.bind),
            api_key: env::var("CONCIERGE_API_KEY").unwrap_or(defaults.api_key),
            database_url: env::var("CONCIERGE_DATABASE_URL")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            allowed_origins: env::var("CONCIERGE_ALLOWED_ORIGINS")
                .ok()
                .map(|value| parse_allowed_origins(&value))
                .unwrap_or(defaults.allowed_origins),
            rate_limit_window: env::var("CONCIERGE_RATE_LIMIT_WINDOW_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            rate_limit_max: env::var("CONCIERGE_RATE_LIMIT_MAX")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.rate_limit_max),
            trust_forwarded_for: env::var("CONCIERGE_TRUST_FORWARDED_FOR")
                .ok()
                .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
                .unwrap_or(defaults.trust_forwarded_for),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<ConciergeAgent<Store>>,
    pub metrics: Arc<AppMetrics>,
    pub api_key: String,
    pub limiter: IpRateLimiter,
    pub trust_forwarded_for: bool,
    pub allowed_origins: Arc<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    model: String,
    providers: ProviderKeys,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct ProviderKeys {
    gemini: bool,
    tavily: bool,
    openweather: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    booking_id: Option<i64>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    history: Vec<ChatHistoryEntry>,
}

pub async fn build_app_with(config: ApiConfig, providers: Providers) -> Result<Router> {
    let state = build_state(config, providers).await?;
    Ok(build_router(state))
}

pub async fn build_state(config: ApiConfig, providers: Providers) -> Result<ApiState> {
    let metrics = AppMetrics::shared();

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url)
            .await
            .context("failed to open concierge database")?,
        None => Store::memory(),
    };
    let store = Arc::new(store);

    let agent = Arc::new(ConciergeAgent::new(providers, store, metrics.clone()));

    Ok(ApiState {
        agent,
        metrics,
        api_key: config.api_key,
        limiter: IpRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
        trust_forwarded_for: config.trust_forwarded_for,
        allowed_origins: Arc::new(config.allowed_origins),
    })
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/concierge", post(concierge))
        .route("/v1/concierge/chat", post(concierge_chat))
        .route("/v1/chat", post(legacy_chat))
        .route("/v1/history", get(history))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let providers = state.agent.providers();
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        model: providers.model_name().to_string(),
        providers: ProviderKeys {
            gemini: providers.config.gemini_api_key.is_some(),
            tavily: providers.config.tavily_api_key.is_some(),
            openweather: providers.config.openweather_api_key.is_some(),
        },
        metrics: state.metrics.snapshot(),
    };
    (StatusCode::OK, Json(payload))
}

async fn concierge(
    State(state): State<ApiState>,
    payload: Result<Json<ConciergeAsk>, JsonRejection>,
) -> Response {
    let Json(ask) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_request(rejection),
    };

    match state.agent.plan(ask).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn concierge_chat(
    State(state): State<ApiState>,
    payload: Result<Json<ConciergeChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_request(rejection),
    };

    let response = state.agent.chat(request).await;
    (StatusCode::OK, Json(response)).into_response()
}

async fn legacy_chat(
    State(state): State<ApiState>,
    payload: Result<Json<LegacyChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_request(rejection),
    };

    match state.agent.legacy_chat(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn history(State(state): State<ApiState>, Query(query): Query<HistoryQuery>) -> Response {
    match state.agent.history(query.booking_id, query.limit).await {
        Ok(history) => (StatusCode::OK, Json(HistoryResponse { history })).into_response(),
        Err(err) => error_response(err),
    }
}

fn invalid_request(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "invalid_request",
            "message": rejection.body_text()
        })),
    )
        .into_response()
}

/// Client mistakes map to 400/404; anything else is an internal error.
fn error_response(err: anyhow::Error) -> Response {
    if let Some(concierge_err) = err.downcast_ref::<ConciergeError>() {
        let status = if concierge_err.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::BAD_REQUEST
        };
        return (
            status,
            Json(serde_json::json!({
                "error": concierge_err.code(),
                "message": concierge_err.to_string()
            })),
        )
            .into_response();
    }

    error!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": "internal_error",
            "message": "internal error"
        })),
    )
        .into_response()
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if request.method() == Method::OPTIONS || is_public_endpoint(path) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if header_key == state.api_key {
        return next.run(request).await;
    }

    // First-party browser pages call without a key.
    if request_origin_is_allowed(&state, request.headers()) {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "unauthorized",
            "message": "missing or invalid x-api-key, and request origin is not allowed"
        })),
    )
        .into_response()
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let ip = request_ip(&request, state.trust_forwarded_for);
    if !state.limiter.allow(&ip) {
        info!(ip = %ip, path = %request.uri().path(), "rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "message": "rate limit exceeded for this IP"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/health")
}

fn request_origin_is_allowed(state: &ApiState, headers: &HeaderMap) -> bool {
    request_origin_from_headers(headers)
        .is_some_and(|origin| state.allowed_origins.iter().any(|allowed| allowed == &origin))
}

fn request_origin_from_headers(headers: &HeaderMap) -> Option<String> {
    let direct_origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty());
    if direct_origin.is_some() {
        return direct_origin;
    }

    headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Url::parse(value).ok())
        .map(|url| url.origin().ascii_serialization())
        .filter(|value| value != "null")
}

fn parse_allowed_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:3000")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
}

/// Socket peer address, or the first `X-Forwarded-For` hop when the proxy is trusted.
fn request_ip(request: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(forwarded) = forwarded {
            return forwarded.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "local".to_string())
}
