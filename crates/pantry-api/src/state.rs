//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use pantry_core::config::PantryConfig;
use tokio_util::sync::CancellationToken;
use pantry_vector::{Clients, IngestionPipeline, QueryEngine};

/// Shared application state.
///
/// Every field is cheap to clone; handlers receive it through axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PantryConfig>,
    pub clients: Clients,
    pub engine: Arc<QueryEngine>,
    pub pipeline: Arc<IngestionPipeline>,
    /// Fired at shutdown; in-flight searches stop waiting on backends.
    pub shutdown: CancellationToken,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire the query engine and ingestion pipeline onto one set of clients.
    pub fn new(config: PantryConfig, clients: Clients) -> Self {
        let engine = QueryEngine::with_config(clients.clone(), &config.search);
        let pipeline = IngestionPipeline::with_config(clients.clone(), &config.ingest);
        Self {
            config: Arc::new(config),
            clients,
            engine: Arc::new(engine),
            pipeline: Arc::new(pipeline),
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }
}
