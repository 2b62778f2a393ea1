//! Query engine: embed the request, search the index, rank the hits.
//!
//! A query is one unit of work. Any failure on the way is returned whole;
//! there are no partial results.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pantry_core::config::SearchConfig;
use pantry_core::error::{PantryError, Result};
use pantry_core::types::QueryResult;

use crate::clients::Clients;

pub struct QueryEngine {
    clients: Clients,
    max_results: usize,
}

impl QueryEngine {
    pub fn new(clients: Clients, max_results: usize) -> Self {
        Self {
            clients,
            max_results: max_results.max(1),
        }
    }

    pub fn with_config(clients: Clients, config: &SearchConfig) -> Self {
        Self::new(clients, config.max_results)
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Clamp a caller-supplied `k` into `[1, max_results]`.
    pub fn clamp_k(&self, k: i64) -> usize {
        k.clamp(1, self.max_results as i64) as usize
    }

    /// Return up to `k` recipes most similar to `query`, best first.
    ///
    /// Dropping the returned future abandons any in-flight embed or index call.
    pub async fn search(&self, query: &str, k: i64) -> Result<Vec<QueryResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PantryError::InvalidQuery(
                "query text must not be empty".to_string(),
            ));
        }

        let k = self.clamp_k(k);
        debug!(query, k, "Searching recipes");

        let vector = self.clients.embedder().embed(query).await?;
        let hits = self.clients.index().query(&vector, k).await?;

        let results: Vec<QueryResult> = hits
            .into_iter()
            .enumerate()
            .map(|(position, hit)| QueryResult {
                id: hit.entry.id,
                text: hit.entry.text,
                metadata: hit.entry.metadata,
                score: hit.score,
                rank: position + 1,
            })
            .collect();

        info!(query, k, results = results.len(), "Search completed");
        Ok(results)
    }

    /// Like [`search`](Self::search), but gives up with
    /// [`PantryError::Cancelled`] as soon as `cancel` fires.
    pub async fn search_cancellable(
        &self,
        query: &str,
        k: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueryResult>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(query, "Search cancelled by caller");
                Err(PantryError::Cancelled)
            }
            result = self.search(query, k) => result,
        }
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }
}
