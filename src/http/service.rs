//! Routes and the admission middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::SecondsFormat;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::error::TurnstileError;
use crate::ratelimit::{Decision, RateLimiter};

pub const X_RATELIMIT_ALGORITHM: HeaderName = HeaderName::from_static("x-ratelimit-algorithm");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Identity used when neither a forwarded address nor a peer address is known.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Shared state for the admission middleware.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The rate limiter instance
    limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    /// Create a new AppState around the given rate limiter.
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }
}

/// Build the application router.
///
/// `/limited` passes through the limiter; `/unlimited` never does.
pub fn router(limiter: Arc<dyn RateLimiter>) -> Router {
    let state = AppState::new(limiter);

    Router::new()
        .route("/limited", get(limited))
        .route_layer(middleware::from_fn_with_state(state, admit))
        .route("/unlimited", get(unlimited))
}

async fn unlimited() -> Json<serde_json::Value> {
    Json(json!({ "message": "Unlimited, have fun!" }))
}

async fn limited() -> Json<serde_json::Value> {
    Json(json!({ "message": "Limited, don't overuse me!" }))
}

/// Resolve the caller's identity: the first `X-Forwarded-For` hop, then the
/// peer address, then [`UNKNOWN_IDENTITY`].
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    match (forwarded, peer) {
        (Some(hop), _) => hop.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => UNKNOWN_IDENTITY.to_string(),
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
async fn admit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer);

    match state.limiter.allow(&identity).await {
        Ok(decision) => {
            info!(
                identity = %identity,
                algorithm = %decision.algorithm,
                capacity = decision.capacity,
                remaining = decision.remaining,
                "Request admitted"
            );
            let mut response = next.run(request).await;
            insert_decision_headers(response.headers_mut(), &decision);
            response
        }
        Err(err) => {
            match &err {
                TurnstileError::RateLimitExceeded(_) => {
                    debug!(identity = %identity, "Request rejected")
                }
                TurnstileError::StoreUnavailable(reason) => {
                    warn!(identity = %identity, reason = %reason, "State store unavailable")
                }
                TurnstileError::Configuration(reason) => {
                    error!(identity = %identity, reason = %reason, "Limiter misconfigured")
                }
            }
            err.into_response()
        }
    }
}

/// Write the `X-RateLimit-*` headers describing `decision`.
pub fn insert_decision_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(
        X_RATELIMIT_ALGORITHM,
        HeaderValue::from_static(decision.algorithm.as_str()),
    );
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.capacity));
    headers.insert(
        X_RATELIMIT_REMAINING,
        HeaderValue::from(decision.remaining_clamped()),
    );
    let reset = decision.reset.to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(X_RATELIMIT_RESET, value);
    }
}

impl IntoResponse for TurnstileError {
    fn into_response(self) -> Response {
        let status = match &self {
            TurnstileError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            TurnstileError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TurnstileError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut response = (status, Json(json!({ "message": self.to_string() }))).into_response();
        if let TurnstileError::RateLimitExceeded(decision) = &self {
            let headers = response.headers_mut();
            insert_decision_headers(headers, decision);
            headers.insert(
                RETRY_AFTER,
                HeaderValue::from(decision.seconds_until_reset().max(1)),
            );
        }
        response
    }
}
