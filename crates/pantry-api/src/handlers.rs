//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its parameters via axum extractors, calls into the
//! shared query engine or ingestion pipeline, and returns JSON.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use pantry_core::config::EmbeddingProvider;
use pantry_core::types::{IngestSummary, QueryResult};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub k: Option<i64>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Number of recipes currently in the index.
    pub entries: u64,
    pub uptime_secs: u64,
    /// `mock` means rankings are not semantic.
    pub embedding_provider: EmbeddingProvider,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<QueryResult>,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health - liveness plus index size.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let entries = state.clients.index().count().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        entries: entries as u64,
        uptime_secs: state.start_time.elapsed().as_secs(),
        embedding_provider: state.config.embedding.provider,
    }))
}

/// GET /rag/search?q=<text>&k=<n> - ranked recipes for a free-text query.
///
/// `k` defaults to `search.default_k` and is clamped to `[1, search.max_results]`.
pub async fn rag_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = params
        .q
        .ok_or_else(|| ApiError::InvalidQuery("missing query parameter 'q'".to_string()))?;
    let k = params.k.unwrap_or(state.config.search.default_k as i64);

    let results = state
        .engine
        .search_cancellable(&query, k, &state.shutdown)
        .await?;

    Ok(Json(SearchResponse { query, results }))
}

/// POST /ingest - normalize, embed and index a JSON batch of recipes.
///
/// Individual bad records are reported in the summary. Only a body that is
/// not a recognizable batch at all is rejected with 422.
pub async fn ingest(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<IngestSummary>, ApiError> {
    let summary = state.pipeline.ingest(&body).await?;
    info!(
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        "Ingest request completed"
    );
    Ok(Json(summary))
}
