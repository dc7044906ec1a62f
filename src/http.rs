//! HTTP API.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /health` | `OK` |
//! | `GET /health/db` | backend connectivity |
//! | `GET /api/search` | one page of canonical results |
//! | `GET /api/metrics` | metrics over that page |
//! | `GET /api/paper_details?source=&id=` | one canonical result |
//! | `GET /api/sources` | enabled source catalog |
//!
//! Errors render as `{"error": {"kind", "message"}}`; internal details stay in
//! the logs.

use crate::error::SearchError;
use crate::metrics::MetricsSnapshot;
use crate::normalize::CanonicalResult;
use crate::query::SearchParams;
use crate::service::{SearchResponse, SearchService};
use crate::sources::SourceTable;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

type AppState = Arc<SearchService>;

/// Build the application router over a shared service.
pub fn router(service: Arc<SearchService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/db", get(db_health_handler))
        .route("/api/search", get(search_handler))
        .route("/api/metrics", get(metrics_handler))
        .route("/api/paper_details", get(paper_details_handler))
        .route("/api/sources", get(sources_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(service)
}

impl SearchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            error!(error = %self, "Request failed");
        } else {
            warn!(kind = self.kind(), error = %self, "Request rejected");
        }

        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": self.public_message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

async fn db_health_handler(State(service): State<AppState>) -> Response {
    match service.ping().await {
        Ok(()) => Json(json!({"status": "ok", "database": service.backend_name()})).into_response(),
        Err(e) => {
            error!(error = %e, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "error", "database": service.backend_name()})),
            )
                .into_response()
        }
    }
}

/// Unwrap query parameters, reporting malformed ones as a validation error.
fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, SearchError> {
    params
        .map(|Query(params)| params)
        .map_err(|rejection| SearchError::Validation(rejection.body_text()))
}

async fn search_handler(
    State(service): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, SearchError> {
    let params = query_params(params)?;
    let request = service.validate(&params)?;
    info!(
        query = request.filters.text.as_deref().unwrap_or(""),
        page = request.page,
        per_page = request.per_page,
        "Search request"
    );
    Ok(Json(service.search(&request).await?))
}

async fn metrics_handler(
    State(service): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<MetricsSnapshot>, SearchError> {
    let params = query_params(params)?;
    let request = service.validate(&params)?;
    Ok(Json(service.metrics(&request).await?))
}

#[derive(Debug, Deserialize)]
struct PaperDetailsParams {
    source: Option<String>,
    id: Option<String>,
}

async fn paper_details_handler(
    State(service): State<AppState>,
    params: Result<Query<PaperDetailsParams>, QueryRejection>,
) -> Result<Json<CanonicalResult>, SearchError> {
    let params = query_params(params)?;
    let (Some(source), Some(id)) = (params.source, params.id) else {
        return Err(SearchError::Validation("source and id are required".into()));
    };
    Ok(Json(service.paper_details(&source, &id).await?))
}

async fn sources_handler(State(service): State<AppState>) -> Json<Vec<&'static SourceTable>> {
    Json(
        service
            .enabled_sources()
            .iter()
            .map(|name| name.table())
            .collect(),
    )
}
