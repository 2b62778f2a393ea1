//! Pantry API crate - axum HTTP server exposing recipe ingestion and search.
//!
//! Routes: `GET /health`, `GET /rag/search`, `POST /ingest`.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
