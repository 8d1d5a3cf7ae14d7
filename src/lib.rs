use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use thiserror::Error;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod fetch;
pub mod freshness;
pub mod metrics;
pub mod proxy;
pub mod transform;
pub mod url_codec;

use crate::config::{DEFAULT_CACHE_CONTROL, OUTPUT_CONTENT_TYPE};
use crate::proxy::{Conditions, Delivery, ImageProxy};
use crate::transform::{Operation, SizeQuery};

/// Every failure a request can end in. Mapped to a status code in one place
/// ([`IntoResponse`] below); detail beyond the 400 message stays in the logs.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Bad token, bad size parameter or refused source URL (400)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Source unreachable, timed out, non-2xx, not an image or too large (500)
    #[error("Upstream fetch error: {0}")]
    UpstreamFetch(String),
    /// Source could not be decoded or the result could not be encoded (500)
    #[error("Transformation error: {0}")]
    TransformError(String),
    /// Cache directory unwritable, or an entry vanished mid-read (500)
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// 4xx are logged at WARN with the message echoed to the client; 5xx at
/// ERROR with a generic body.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match &self {
            ProxyError::InvalidArgument(msg) => {
                tracing::warn!("Rejected request: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone()).into_response()
            }
            ProxyError::UpstreamFetch(_)
            | ProxyError::TransformError(_)
            | ProxyError::StorageError(_) => {
                tracing::error!("{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server error").into_response()
            }
        }
    }
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(DEFAULT_CACHE_CONTROL));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OUTPUT_CONTENT_TYPE));

        match self {
            Delivery::NotModified => (StatusCode::NOT_MODIFIED, headers).into_response(),
            Delivery::Image { bytes, validators } => {
                if let Some(v) = validators {
                    if let Ok(etag) = HeaderValue::from_str(&v.etag) {
                        headers.insert(header::ETAG, etag);
                    }
                    if let Ok(date) = HeaderValue::from_str(&v.last_modified) {
                        headers.insert(header::LAST_MODIFIED, date);
                    }
                }
                (headers, Body::from(bytes)).into_response()
            }
        }
    }
}

pub type AppState = Arc<ImageProxy>;

async fn serve_image(
    proxy: &ImageProxy,
    token: &str,
    op: Operation,
    query: &SizeQuery,
    headers: &HeaderMap,
) -> Response {
    let conditions = Conditions {
        if_none_match: header_str(headers, header::IF_NONE_MATCH),
        if_modified_since: header_str(headers, header::IF_MODIFIED_SINCE),
    };

    match proxy.deliver(token, op, query.size.as_deref(), conditions).await {
        Ok(delivery) => delivery.into_response(),
        Err(e) => {
            metrics::Metrics::incr(&proxy.metrics().errors);
            e.into_response()
        }
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `GET /img/:encoded_url/fit?size=WxH`
async fn fit_handler(
    State(proxy): State<AppState>,
    Path(encoded_url): Path<String>,
    Query(query): Query<SizeQuery>,
    headers: HeaderMap,
) -> Response {
    serve_image(&proxy, &encoded_url, Operation::Fit, &query, &headers).await
}

/// `GET /img/:encoded_url/resize?size=W`
async fn resize_handler(
    State(proxy): State<AppState>,
    Path(encoded_url): Path<String>,
    Query(query): Query<SizeQuery>,
    headers: HeaderMap,
) -> Response {
    serve_image(&proxy, &encoded_url, Operation::Resize, &query, &headers).await
}

/// Health check endpoint
async fn health_handler(State(proxy): State<AppState>) -> impl IntoResponse {
    use serde_json::json;

    let cache = if proxy.caching_enabled() { "enabled" } else { "disabled" };
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "webp-proxy",
        "cache": cache,
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler(State(proxy): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        proxy.metrics().render(),
    )
}

/// Builds the full application: image routes, health, metrics and, when the
/// store has a directory, static access to raw artifacts under `/cache`.
pub fn router(proxy: ImageProxy) -> Router {
    let static_root = proxy
        .store()
        .and_then(|store| store.root())
        .map(|root| root.to_path_buf());
    let state: AppState = Arc::new(proxy);

    let mut app = Router::new()
        .route("/img/:encoded_url/fit", get(fit_handler))
        .route("/img/:encoded_url/resize", get(resize_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    if let Some(root) = static_root {
        app = app.nest_service("/cache", ServeDir::new(root));
    }

    app.layer(TraceLayer::new_for_http())
}
