//! Process-lifetime handle to the embedder and the vector index.
//!
//! Built once at startup, cloned into the ingestion pipeline and the query
//! engine, and closed explicitly at shutdown. Clones share the same backends.

use std::path::PathBuf;
use std::time::Duration;

use pantry_core::config::{EmbeddingProvider, PantryConfig};
use pantry_core::error::{PantryError, Result};
use tracing::{info, warn};

use crate::embedding::{EmbeddingClient, MockEmbedding, OllamaEmbedding};
use crate::index::{IndexClient, VectorIndex};
use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct Clients {
    embedder: EmbeddingClient,
    index: IndexClient,
}

impl Clients {
    pub fn new(embedder: EmbeddingClient, index: IndexClient) -> Self {
        Self { embedder, index }
    }

    /// Mock embedder over a memory-only index, with no retry delays.
    pub fn in_memory() -> Self {
        Self::new(
            EmbeddingClient::new(MockEmbedding::new()).with_retry(RetryPolicy::immediate(3)),
            IndexClient::new(VectorIndex::new()).with_retry(RetryPolicy::immediate(3)),
        )
    }

    /// Build the embedder and index described by `config`.
    ///
    /// When the snapshot already fixes a dimension it must agree with
    /// `embedding.dimensions`, and it becomes the embedder's D. The snapshot
    /// stays locked until every clone of the returned clients is dropped, so
    /// a second process pointed at the same file fails here.
    pub fn from_config(config: &PantryConfig) -> Result<Self> {
        let retry = RetryPolicy::from_config(&config.retry);

        let index = match config.index.snapshot_path.as_deref() {
            Some(path) => VectorIndex::open(expand_home(path))?,
            None => VectorIndex::new(),
        };

        let dimension = match (index.dimension(), config.embedding.dimensions) {
            (Some(stored), Some(configured)) if stored != configured => {
                return Err(PantryError::Config(format!(
                    "embedding.dimensions is {} but the index snapshot holds {}-dimensional vectors",
                    configured, stored
                )));
            }
            (stored, configured) => stored.or(configured),
        };

        let mut embedder = match config.embedding.provider {
            EmbeddingProvider::Mock => {
                warn!(
                    "Using the mock embedder: search ranks by token overlap, not meaning. \
                     Set embedding.provider = \"ollama\" for real embeddings"
                );
                EmbeddingClient::new(MockEmbedding::with_dimensions(
                    dimension.unwrap_or(crate::embedding::MOCK_DIMENSIONS),
                ))
            }
            EmbeddingProvider::Ollama => {
                EmbeddingClient::new(OllamaEmbedding::from_config(&config.embedding)?)
            }
        }
        .with_timeout(Duration::from_millis(config.embedding.timeout_ms))
        .with_retry(retry.clone());
        if let Some(d) = dimension {
            embedder = embedder.with_dimension(d);
        }

        let index = IndexClient::new(index)
            .with_timeout(Duration::from_millis(config.index.timeout_ms))
            .with_retry(retry);

        info!(
            provider = ?config.embedding.provider,
            dimension = ?dimension,
            snapshot = ?config.index.snapshot_path,
            "Clients initialized"
        );

        Ok(Self::new(embedder, index))
    }

    pub fn embedder(&self) -> &EmbeddingClient {
        &self.embedder
    }

    pub fn index(&self) -> &IndexClient {
        &self.index
    }

    /// Flush the index. Call once at shutdown.
    pub async fn close(&self) -> Result<()> {
        self.index.flush().await?;
        info!("Clients closed");
        Ok(())
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE");
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME");
        if let Ok(home) = home {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantry_core::types::IndexEntry;
    use serde_json::json;

    fn config_with_snapshot(path: &std::path::Path) -> PantryConfig {
        let mut config = PantryConfig::default();
        config.index.snapshot_path = Some(path.to_string_lossy().to_string());
        config
    }

    #[tokio::test]
    async fn test_from_config_memory_only() {
        let mut config = PantryConfig::default();
        config.index.snapshot_path = None;
        config.embedding.dimensions = Some(32);

        let clients = Clients::from_config(&config).unwrap();
        assert_eq!(clients.embedder().dimension(), Some(32));
        let vector = clients.embedder().embed("gin").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn test_close_flushes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let clients = Clients::from_config(&config_with_snapshot(&path)).unwrap();

        let vector = clients.embedder().embed("daiquiri").await.unwrap();
        clients
            .index()
            .upsert(IndexEntry {
                id: "daiquiri".into(),
                vector,
                text: "daiquiri".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        clients.close().await.unwrap();
        drop(clients);

        let reopened = Clients::from_config(&config_with_snapshot(&path)).unwrap();
        assert_eq!(reopened.index().count().await.unwrap(), 1);
        assert_eq!(
            reopened.embedder().dimension(),
            Some(crate::embedding::MOCK_DIMENSIONS)
        );
    }

    #[tokio::test]
    async fn test_conflicting_dimension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut config = config_with_snapshot(&path);
        config.embedding.dimensions = Some(8);
        let clients = Clients::from_config(&config).unwrap();
        let vector = clients.embedder().embed("sazerac").await.unwrap();
        clients
            .index()
            .upsert(IndexEntry {
                id: "sazerac".into(),
                vector,
                text: String::new(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        clients.close().await.unwrap();
        drop(clients);

        config.embedding.dimensions = Some(16);
        assert!(matches!(
            Clients::from_config(&config),
            Err(PantryError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_second_process_on_same_snapshot_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let config = config_with_snapshot(&path);

        let server = Clients::from_config(&config).unwrap();
        let err = Clients::from_config(&config).unwrap_err();
        assert!(matches!(err, PantryError::IndexUnavailable(_)));

        server.close().await.unwrap();
        drop(server);
        assert!(Clients::from_config(&config).is_ok());
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/lib/pantry/index.json"), PathBuf::from("/var/lib/pantry/index.json"));
    }
}
