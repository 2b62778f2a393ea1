//! Embedding service trait and implementations.
//!
//! - `OllamaEmbedding` calls an Ollama server's `/api/embeddings` endpoint.
//!   This is the production embedding backend.
//! - `MockEmbedding` provides deterministic feature-hashed vectors for testing.
//! - `EmbeddingClient` wraps any backend with a timeout, bounded retry, and the
//!   process-wide dimension lock.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use pantry_core::config::EmbeddingConfig;
use pantry_core::error::{PantryError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::retry::{retry, with_timeout, RetryPolicy};

/// Service for generating text embeddings.
///
/// Implementations must be deterministic for a fixed model version: the same
/// text always maps to the same vector.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Dimensionality of produced vectors, if known before the first call.
    fn dimensions(&self) -> Option<usize>;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// A blanket implementation is provided so that every `EmbeddingService`
/// automatically implements `DynEmbeddingService`.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>>;

    fn dimensions(&self) -> Option<usize>;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> Option<usize> {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// OllamaEmbedding - HTTP backend
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

/// Embedding backend talking to an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OllamaEmbedding {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(PantryError::Config("missing embedding model name".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PantryError::Config(format!("failed to build HTTP client: {}", e)))?;
        let endpoint = format!("{}/api/embeddings", base_url.trim_end_matches('/'));

        info!(endpoint = %endpoint, model = %model, "Ollama embedding backend configured");

        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.model.clone(),
            config.dimensions,
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EmbeddingService for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| PantryError::EmbeddingService(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| PantryError::EmbeddingService(format!("provider error: {}", e)))?;

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| PantryError::EmbeddingService(format!("invalid response: {}", e)))?;

        if body.embedding.is_empty() {
            return Err(PantryError::EmbeddingService(
                "provider returned an empty embedding".to_string(),
            ));
        }

        Ok(body.embedding)
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Default dimensionality of [`MockEmbedding`].
pub const MOCK_DIMENSIONS: usize = 384;

/// Mock embedding service that returns deterministic vectors.
///
/// Each lowercase word is hashed into one signed bucket, so texts that share
/// words land close together in cosine space. That is enough to exercise
/// ranking without a real model.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(MOCK_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(token: &str, salt: u64) -> u64 {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        salt.hash(&mut hasher);
        hasher.finish()
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let slot = (Self::bucket(token, 0) % self.dimensions as u64) as usize;
            let sign = if Self::bucket(token, 1) & 1 == 0 { 1.0 } else { -1.0 };
            result[slot] += sign;
        }

        // Punctuation-only input has no words; fall back to hashing the whole text.
        if result.iter().all(|v| *v == 0.0) {
            for (i, val) in result.iter_mut().enumerate() {
                let h = Self::bucket(text, i as u64);
                *val = (((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0) as f32;
            }
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(PantryError::EmbeddingService(
                "Cannot embed empty text".to_string(),
            ));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }
}

// ---------------------------------------------------------------------------
// EmbeddingClient - timeout + retry + dimension lock
// ---------------------------------------------------------------------------

/// The embedder as seen by the ingestion pipeline and query engine.
///
/// The first successful call fixes the dimension D unless one was preset;
/// later calls returning a different length fail with
/// [`PantryError::DimensionMismatch`]. Vectors are never truncated or padded.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Arc<dyn DynEmbeddingService>,
    dimension: Arc<OnceLock<usize>>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(backend: impl EmbeddingService + 'static) -> Self {
        Self::from_dyn(Arc::new(backend))
    }

    pub fn from_dyn(backend: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            backend,
            dimension: Arc::new(OnceLock::new()),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fix D up front instead of learning it from the first call.
    pub fn with_dimension(self, dimension: usize) -> Self {
        let _ = self.dimension.set(dimension);
        self
    }

    /// The locked dimension, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = retry(&self.retry, "embed", || {
            with_timeout("embed", self.timeout, self.backend.embed_boxed(text))
        })
        .await
        .map_err(|e| e.attribute_timeout(PantryError::EmbeddingService))?;

        if vector.is_empty() {
            return Err(PantryError::EmbeddingService(
                "embedder returned an empty vector".to_string(),
            ));
        }
        if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
            return Err(PantryError::EmbeddingService(format!(
                "embedder returned a non-finite component at position {}",
                position
            )));
        }

        let expected = *self.dimension.get_or_init(|| {
            info!(dimension = vector.len(), "Embedding dimension fixed");
            vector.len()
        });
        if vector.len() != expected {
            return Err(PantryError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        debug!(text_len = text.len(), dimension = expected, "Text embedded");
        Ok(vector)
    }
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("dimension", &self.dimension())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}
