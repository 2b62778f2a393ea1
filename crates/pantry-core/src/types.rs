use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical form of one recipe record, ready to be embedded.
///
/// Transient: produced by the normalizer and consumed immediately by the
/// ingestion pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    /// Stable content key (explicit source id or hash of `text`).
    pub id: String,
    /// Deterministic text derived from the record, used as embedding input.
    pub text: String,
    /// Filterable attributes carried alongside the vector.
    pub metadata: Value,
}

/// A persisted vector index entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Value,
}

/// An index entry paired with its cosine similarity to a query vector.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f64,
}

/// One ranked search result returned to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub text: String,
    pub metadata: Value,
    pub score: f64,
    /// 1-based position in the result list.
    pub rank: usize,
}

/// A record that could not be ingested.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Position of the record inside the batch.
    pub index: usize,
    pub reason: String,
}

/// Outcome of ingesting one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub errors: Vec<RecordFailure>,
}

impl IngestSummary {
    /// Total number of records seen.
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped
    }

    /// Record a skipped record and why.
    pub fn skip(&mut self, index: usize, reason: impl Into<String>) {
        self.skipped += 1;
        self.errors.push(RecordFailure {
            index,
            reason: reason.into(),
        });
    }

    /// Whether every record made it into the index.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
