//! HTTP API
//!
//! axum router over the shared [`AppState`], JSON bodies in and out.
//!
//! Routes:
//! - `POST /ingestion` trigger a run (202, 409 or 422)
//! - `GET  /ingestion/{run_id}` poll a run (200 or 404)
//! - `POST /mcp/tools/fetch_rss_feed`, `/mcp/tools/store_articles`,
//!   `/mcp/tools/upsert_author` the orchestrator's sub-calls
//! - `GET  /health`, `GET /metrics`
//!
//! Malformed or out-of-range bodies answer 422 with `{"detail": ...}`;
//! bodies over the configured limit answer 413.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use validator::Validate;

use crate::app::AppState;
use crate::article_store::ArticleSink;
use crate::author::AuthorSink;
use crate::error::Result;
use crate::feeds::FeedFetcher;
use crate::metrics::gather_metrics;
use crate::orchestrator::TriggerOutcome;
use crate::schemas::{FeedRequest, StoreArticlesRequest, TriggerIngestionRequest, UpsertAuthorRequest};

/// Builds the router with every route and the body limit applied
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/ingestion", post(trigger_ingestion))
        .route("/ingestion/{run_id}", get(get_run_status))
        .route("/mcp/tools/fetch_rss_feed", post(fetch_rss_feed))
        .route("/mcp/tools/store_articles", post(store_articles))
        .route("/mcp/tools/upsert_author", post(upsert_author))
        .route("/health", get(health));

    if state.metrics_enabled {
        router = router.route("/metrics", get(metrics));
    }

    let body_limit = state.max_body_bytes;
    router
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

/// Serves the API until a shutdown signal arrives, letting open requests finish
pub async fn serve(listener: TcpListener, state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    info!(address = %listener.local_addr()?, "HTTP API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            info!("HTTP API shutting down");
        })
        .await?;

    Ok(())
}

/// JSON body extractor: an empty body parses as `{}`, anything unparsable
/// is a 422 carrying the serde message
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| detail(rejection.status(), rejection.body_text()))?;
        let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) { b"{}" } else { &body };

        serde_json::from_slice(body)
            .map(ApiJson)
            .map_err(|e| detail(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
    }
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

async fn trigger_ingestion(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TriggerIngestionRequest>,
) -> Response {
    if let Err(e) = request.validate() {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
    }

    match state.orchestrator.trigger(&request).await {
        Ok(TriggerOutcome::Accepted(body)) => (StatusCode::ACCEPTED, Json(body)).into_response(),
        Ok(TriggerOutcome::Conflict(body)) => (StatusCode::CONFLICT, Json(body)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to trigger ingestion");
            detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn get_run_status(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    match state.registry.get_status(&run_id).await {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => detail(StatusCode::NOT_FOUND, format!("Run {run_id} not found")),
        Err(e) => {
            error!(run_id = %run_id, error = %e, "Failed to read run status");
            detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn fetch_rss_feed(State(state): State<AppState>, ApiJson(request): ApiJson<FeedRequest>) -> Response {
    if let Err(e) = request.validate() {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
    }

    match state.fetcher.fetch(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            warn!(feed_url = %request.feed_url, error = %e, "Feed fetch failed");
            detail(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn store_articles(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<StoreArticlesRequest>,
) -> Response {
    match state.articles.store_articles(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn upsert_author(State(state): State<AppState>, ApiJson(request): ApiJson<UpsertAuthorRequest>) -> Response {
    match state.authors.upsert_author(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn metrics() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], gather_metrics())
}

async fn not_found() -> Response {
    detail(StatusCode::NOT_FOUND, "Not Found")
}
