//! Pantry retrieval crate: recipe normalization, embedding, the vector
//! index, batch ingestion and similarity search.
//!
//! [`Clients`] owns the embedder and index for the life of the process.
//! [`IngestionPipeline`] writes through it and [`QueryEngine`] reads through it.

pub mod clients;
pub mod embedding;
pub mod index;
pub mod normalizer;
pub mod pipeline;
pub mod retry;
pub mod search;

pub use clients::Clients;
pub use embedding::{EmbeddingClient, EmbeddingService, MockEmbedding, OllamaEmbedding};
pub use index::{IndexClient, VectorIndex, VectorStore};
pub use normalizer::{normalize, split_batch};
pub use pipeline::IngestionPipeline;
pub use retry::RetryPolicy;
pub use search::QueryEngine;
