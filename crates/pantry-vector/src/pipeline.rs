//! Recipe ingestion pipeline.
//!
//! Every record of a batch is normalized, then embedded and upserted on its
//! own. A failure at any stage is recorded against the record's position in
//! the batch and the remaining records carry on. Records run concurrently,
//! bounded by a semaphore so only `max_in_flight` embed calls are outstanding.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use pantry_core::config::IngestConfig;
use pantry_core::error::{PantryError, Result};
use pantry_core::types::{CanonicalDocument, IndexEntry, IngestSummary};

use crate::clients::Clients;
use crate::normalizer;

pub struct IngestionPipeline {
    clients: Clients,
    max_in_flight: usize,
}

impl IngestionPipeline {
    pub fn new(clients: Clients, max_in_flight: usize) -> Self {
        Self {
            clients,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn with_config(clients: Clients, config: &IngestConfig) -> Self {
        Self::new(clients, config.max_in_flight)
    }

    /// Ingest a JSON file from disk.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestSummary> {
        let source = tokio::fs::read_to_string(path).await?;
        info!(path = %path.display(), bytes = source.len(), "Ingesting recipe file");
        self.ingest(&source).await
    }

    /// Ingest a raw JSON source document.
    ///
    /// Fails as a whole only when the source is not JSON or its top-level
    /// shape is unsupported; per-record failures land in the summary.
    pub async fn ingest(&self, source: &str) -> Result<IngestSummary> {
        let document: Value = serde_json::from_str(source).map_err(|e| {
            PantryError::MalformedRecord(format!("source is not valid JSON: {}", e))
        })?;
        self.ingest_value(document).await
    }

    /// Ingest an already-parsed source document.
    pub async fn ingest_value(&self, document: Value) -> Result<IngestSummary> {
        let records = normalizer::split_batch(document)?;
        Ok(self.ingest_records(records).await)
    }

    /// Ingest a list of raw records.
    ///
    /// Records are normalized up front. When several records share an id,
    /// the last one in source order is stored and the earlier ones are
    /// reported as skipped.
    pub async fn ingest_records(&self, records: Vec<Value>) -> IngestSummary {
        let total = records.len();
        let mut summary = IngestSummary::default();

        let mut by_id: HashMap<String, (usize, CanonicalDocument)> = HashMap::new();
        for (index, record) in records.iter().enumerate() {
            let document = match normalizer::normalize(record) {
                Ok(document) => document,
                Err(e) => {
                    warn!(index, error = %e, "Record skipped");
                    summary.skip(index, e.reason());
                    continue;
                }
            };
            let id = document.id.clone();
            if let Some((shadowed, _)) = by_id.insert(id.clone(), (index, document)) {
                warn!(index = shadowed, id = %id, superseded_by = index, "Duplicate id in batch");
                summary.skip(
                    shadowed,
                    format!("duplicate id {} superseded by record {}", id, index),
                );
            }
        }

        let mut documents: Vec<(usize, CanonicalDocument)> = by_id.into_values().collect();
        documents.sort_by_key(|(index, _)| *index);

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        let mut pending: BTreeSet<usize> = BTreeSet::new();

        for (index, document) in documents {
            pending.insert(index);
            let clients = self.clients.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => store_document(&clients, document).await,
                    Err(_) => Err(PantryError::EmbeddingService(
                        "ingest worker pool closed".to_string(),
                    )),
                };
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Ingest task aborted");
                    continue;
                }
            };
            pending.remove(&index);

            match outcome {
                Ok(id) => {
                    debug!(index, id = %id, "Record ingested");
                    summary.succeeded += 1;
                }
                Err(e) => {
                    warn!(index, error = %e, "Record skipped");
                    summary.skip(index, e.reason());
                }
            }
        }

        // Tasks that panicked never reported back; they still count as skipped.
        for index in pending {
            summary.skip(index, "ingest task panicked".to_string());
        }
        summary.errors.sort_by_key(|failure| failure.index);

        if summary.succeeded > 0 {
            if let Err(e) = self.clients.index().flush().await {
                warn!(error = %e, "Index flush after ingest failed");
            }
        }

        info!(
            total,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            "Batch ingested"
        );
        summary
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

/// embed -> upsert for one normalized record. Returns the stored id.
async fn store_document(clients: &Clients, document: CanonicalDocument) -> Result<String> {
    let vector = clients.embedder().embed(&document.text).await?;
    let id = document.id.clone();
    clients
        .index()
        .upsert(IndexEntry {
            id: document.id,
            vector,
            text: document.text,
            metadata: document.metadata,
        })
        .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClient, EmbeddingService, MockEmbedding};
    use crate::index::{IndexClient, VectorIndex};
    use crate::retry::RetryPolicy;
    use pantry_core::types::RecordFailure;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn make_pipeline() -> (IngestionPipeline, VectorIndex) {
        let index = VectorIndex::new();
        let clients = Clients::new(
            EmbeddingClient::new(MockEmbedding::new()),
            IndexClient::new(index.clone()),
        );
        (IngestionPipeline::new(clients, 4), index)
    }

    fn recipes() -> Value {
        json!([
            {
                "name": "Mojito",
                "ingredients": [
                    {"ingredient": "white rum", "amount": 60, "unit": "ml"},
                    {"ingredient": "mint leaves", "amount": 8}
                ],
                "method": "Muddle mint, add rum and lime, top with soda.",
                "serve": "Highball",
                "dietary": ["vegan"]
            },
            {
                "name": "Negroni",
                "ingredients": ["30 ml gin", "30 ml campari", "30 ml sweet vermouth"],
                "method": "Stir over ice.",
                "serve": "Rocks"
            },
            {
                "title": "Espresso Martini",
                "ingredients": ["50 ml vodka", "25 ml coffee liqueur", "1 shot espresso"],
                "instructions": "Shake hard and double strain.",
                "cooking_time": 5
            }
        ])
    }

    #[tokio::test]
    async fn test_ingest_stores_every_record() {
        let (pipeline, index) = make_pipeline();
        let summary = pipeline.ingest_value(recipes()).await.unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.skipped, 0);
        assert!(summary.errors.is_empty());
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let (pipeline, index) = make_pipeline();
        pipeline.ingest_value(recipes()).await.unwrap();
        let once = index.len();

        pipeline.ingest_value(recipes()).await.unwrap();
        assert_eq!(index.len(), once);
    }

    #[tokio::test]
    async fn test_reordered_source_does_not_duplicate() {
        let (pipeline, index) = make_pipeline();
        pipeline.ingest_value(recipes()).await.unwrap();

        let mut reversed = recipes().as_array().cloned().unwrap();
        reversed.reverse();
        pipeline.ingest_value(Value::Array(reversed)).await.unwrap();

        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let (pipeline, index) = make_pipeline();
        let batch = json!([
            {"name": "Daiquiri", "ingredients": ["rum", "lime", "sugar"]},
            {"name": "Broken", "ingredients": null},
            {"name": "Gimlet", "ingredients": ["gin", "lime cordial"]}
        ]);

        let summary = pipeline.ingest_value(batch).await.unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                succeeded: 2,
                skipped: 1,
                errors: vec![RecordFailure {
                    index: 1,
                    reason: "malformed ingredients".to_string(),
                }],
            }
        );
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_non_object_records_are_reported() {
        let (pipeline, _) = make_pipeline();
        let summary = pipeline
            .ingest_value(json!([{"name": "Ok"}, "not a recipe", 42]))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 2);
        let indices: Vec<usize> = summary.errors.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert!(summary.errors.iter().all(|e| e.reason == "record is not an object"));
    }

    #[tokio::test]
    async fn test_wrapped_and_single_sources() {
        let (pipeline, index) = make_pipeline();
        let summary = pipeline
            .ingest(r#"{"cocktails": [{"name": "Paloma"}, {"name": "Margarita"}]}"#)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 2);

        let summary = pipeline
            .ingest(r#"{"name": "Aperol Spritz", "ingredients": ["aperol", "prosecco"]}"#)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_source_fails_whole_batch() {
        let (pipeline, _) = make_pipeline();
        assert!(matches!(
            pipeline.ingest("not json").await,
            Err(PantryError::MalformedRecord(_))
        ));
        assert!(matches!(
            pipeline.ingest("\"just a string\"").await,
            Err(PantryError::MalformedRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (pipeline, index) = make_pipeline();
        let summary = pipeline.ingest("[]").await.unwrap();
        assert_eq!(summary, IngestSummary::default());
        assert!(index.is_empty());
    }

    /// Fails every call whose text mentions "poison".
    struct SelectiveEmbedding;

    impl EmbeddingService for SelectiveEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.to_lowercase().contains("poison") {
                Err(PantryError::EmbeddingService("provider returned 500".into()))
            } else {
                MockEmbedding::new().embed(text).await
            }
        }

        fn dimensions(&self) -> Option<usize> {
            None
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_after_retries_is_recorded() {
        let index = VectorIndex::new();
        let clients = Clients::new(
            EmbeddingClient::new(SelectiveEmbedding).with_retry(RetryPolicy::immediate(2)),
            IndexClient::new(index.clone()),
        );
        let pipeline = IngestionPipeline::new(clients, 2);

        let summary = pipeline
            .ingest_value(json!([
                {"name": "Poison Punch"},
                {"name": "Tom Collins"}
            ]))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].index, 0);
        assert!(summary.errors[0].reason.contains("Embedding service error"));
        assert_eq!(index.len(), 1);
    }

    /// Tracks the peak number of concurrent embed calls.
    struct CountingEmbedding {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl EmbeddingService for CountingEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            MockEmbedding::new().embed(text).await
        }

        fn dimensions(&self) -> Option<usize> {
            None
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let backend = Arc::new(CountingEmbedding {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let clients = Clients::new(
            EmbeddingClient::from_dyn(backend.clone()),
            IndexClient::new(VectorIndex::new()),
        );
        let pipeline = IngestionPipeline::new(clients, 2);

        let batch: Vec<Value> = (0..12)
            .map(|i| json!({"name": format!("Recipe {}", i)}))
            .collect();
        let summary = pipeline.ingest_records(batch).await;

        assert_eq!(summary.succeeded, 12);
        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_ingest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipes.json");
        std::fs::write(&path, recipes().to_string()).unwrap();

        let (pipeline, index) = make_pipeline();
        let summary = pipeline.ingest_file(&path).await.unwrap();
        assert_eq!(summary.succeeded, 3);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_ids_keep_last_occurrence() {
        let (pipeline, index) = make_pipeline();
        let batch = json!([
            {"id": "house-sour", "name": "Whiskey Sour", "ingredients": ["bourbon"]},
            {"id": "house-sour", "name": "Pisco Sour", "ingredients": ["pisco"]},
            {"name": "Sidecar"},
            {"id": "house-sour", "name": "Amaretto Sour", "ingredients": ["amaretto"]}
        ]);

        // Run repeatedly: the winner must not depend on task scheduling.
        for _ in 0..5 {
            let summary = pipeline.ingest_value(batch.clone()).await.unwrap();
            assert_eq!(summary.succeeded, 2);
            assert_eq!(summary.skipped, 2);
            let indices: Vec<usize> = summary.errors.iter().map(|e| e.index).collect();
            assert_eq!(indices, vec![0, 1]);
            assert!(summary.errors[0].reason.contains("superseded by record 1"));
            assert!(summary.errors[1].reason.contains("superseded by record 3"));

            let stored = index.get("house-sour").unwrap();
            assert_eq!(stored.metadata["name"], "Amaretto Sour");
        }
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_max_in_flight_is_at_least_one() {
        let pipeline = IngestionPipeline::new(Clients::in_memory(), 0);
        assert_eq!(pipeline.max_in_flight(), 1);
    }
}
