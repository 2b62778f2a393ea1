//! In-memory vector index with brute-force cosine similarity search.
//!
//! Vectors are L2-normalized on insert and on query, so the score is a plain
//! dot product. All operations are O(n) for search, which is fine for recipe
//! collections. The index can be snapshotted to a JSON file and reloaded.
//!
//! A snapshot has a single owner: [`VectorIndex::open`] takes an exclusive
//! advisory lock on a sibling `.lock` file and fails while another handle
//! holds it. The lock is released when the last clone of the index drops;
//! the lock file itself stays behind and is reused by the next open.

use std::collections::HashMap;
use std::fs::{self, File};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use pantry_core::error::{PantryError, Result};
use pantry_core::types::{IndexEntry, ScoredEntry};

use crate::retry::{retry, with_timeout, RetryPolicy};

/// Snapshot file format version.
const SNAPSHOT_VERSION: u32 = 1;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A store supporting keyed upsert and k-nearest-neighbor queries.
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite the entry with `entry.id`.
    fn upsert(&self, entry: IndexEntry) -> impl Future<Output = Result<()>> + Send;

    /// Up to `k` entries ordered by descending similarity, ties by ascending id.
    fn query(
        &self,
        vector: &[f32],
        k: usize,
    ) -> impl Future<Output = Result<Vec<ScoredEntry>>> + Send;

    fn count(&self) -> impl Future<Output = Result<usize>> + Send;

    /// Persist pending writes, if the store has anywhere to put them.
    fn flush(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Object-safe version of [`VectorStore`], with a blanket impl.
pub trait DynVectorStore: Send + Sync {
    fn upsert_boxed(&self, entry: IndexEntry) -> BoxFuture<'_, Result<()>>;

    fn query_boxed<'a>(
        &'a self,
        vector: &'a [f32],
        k: usize,
    ) -> BoxFuture<'a, Result<Vec<ScoredEntry>>>;

    fn count_boxed(&self) -> BoxFuture<'_, Result<usize>>;

    fn flush_boxed(&self) -> BoxFuture<'_, Result<()>>;
}

impl<T: VectorStore> DynVectorStore for T {
    fn upsert_boxed(&self, entry: IndexEntry) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.upsert(entry))
    }

    fn query_boxed<'a>(
        &'a self,
        vector: &'a [f32],
        k: usize,
    ) -> BoxFuture<'a, Result<Vec<ScoredEntry>>> {
        Box::pin(self.query(vector, k))
    }

    fn count_boxed(&self) -> BoxFuture<'_, Result<usize>> {
        Box::pin(self.count())
    }

    fn flush_boxed(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.flush())
    }
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<String, IndexEntry>,
    /// Fixed by the first upsert (or the loaded snapshot).
    dimension: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    dimension: Option<usize>,
    saved_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

/// Exclusive ownership of a snapshot file, held for the life of the index.
#[derive(Debug)]
struct SnapshotLock {
    _file: File,
}

impl SnapshotLock {
    fn lock_path(snapshot: &Path) -> PathBuf {
        let mut name = snapshot
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        snapshot.with_file_name(name)
    }

    /// Take the lock without blocking, or fail if another handle owns it.
    fn acquire(snapshot: &Path) -> Result<Self> {
        let path = Self::lock_path(snapshot);
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let errno = std::io::Error::last_os_error();
                if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
                    return Err(PantryError::IndexUnavailable(format!(
                        "snapshot {} is in use by another process (lock file {})",
                        snapshot.display(),
                        path.display()
                    )));
                }
                return Err(errno.into());
            }
        }

        #[cfg(not(unix))]
        tracing::warn!(path = %path.display(), "Snapshot locking is not supported on this platform");

        debug!(path = %path.display(), "Snapshot lock acquired");
        Ok(Self { _file: file })
    }
}

/// In-memory vector index using brute-force cosine similarity.
///
/// Thread-safe via interior RwLock; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    state: Arc<RwLock<IndexState>>,
    snapshot_path: Option<PathBuf>,
    /// Serializes snapshot writes across clones.
    save_guard: Arc<Mutex<()>>,
    /// Held, never read; dropping the last clone releases it.
    _snapshot_lock: Option<Arc<SnapshotLock>>,
}

impl VectorIndex {
    /// Create a new empty, memory-only index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index whose dimension is fixed up front.
    pub fn with_dimension(dimension: usize) -> Self {
        let index = Self::new();
        if let Ok(mut state) = index.state.write() {
            state.dimension = Some(dimension);
        }
        index
    }

    /// Open an index backed by a JSON snapshot file.
    ///
    /// A missing file yields an empty index that will be written on flush.
    /// Fails with [`PantryError::IndexUnavailable`] while another open index
    /// owns the same snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock = SnapshotLock::acquire(&path)?;
        let mut state = IndexState::default();

        if path.exists() {
            let data = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&data)?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(PantryError::IndexUnavailable(format!(
                    "unsupported snapshot version {} in {}",
                    snapshot.version,
                    path.display()
                )));
            }
            state.dimension = snapshot.dimension;
            for entry in snapshot.entries {
                if Some(entry.vector.len()) != state.dimension {
                    return Err(PantryError::DimensionMismatch {
                        expected: state.dimension.unwrap_or(0),
                        actual: entry.vector.len(),
                    });
                }
                state.entries.insert(entry.id.clone(), entry);
            }
            info!(
                path = %path.display(),
                entries = state.entries.len(),
                saved_at = %snapshot.saved_at,
                "Vector index loaded from snapshot"
            );
        } else {
            info!(path = %path.display(), "No snapshot found, starting with an empty index");
        }

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Some(path),
            save_guard: Arc::default(),
            _snapshot_lock: Some(Arc::new(lock)),
        })
    }

    /// Insert or overwrite an entry.
    ///
    /// The vector is stored L2-normalized. The first insert into an index
    /// without a dimension fixes it.
    pub fn insert(
        &self,
        id: impl Into<String>,
        vector: Vec<f32>,
        text: impl Into<String>,
        metadata: Value,
    ) -> Result<()> {
        let id = id.into();
        let mut state = self.write_state()?;

        let expected = *state.dimension.get_or_insert(vector.len());
        if vector.len() != expected {
            return Err(PantryError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let replaced = state
            .entries
            .insert(
                id.clone(),
                IndexEntry {
                    id: id.clone(),
                    vector: l2_normalize(vector),
                    text: text.into(),
                    metadata,
                },
            )
            .is_some();

        debug!(id = %id, replaced, "Index entry upserted");
        Ok(())
    }

    /// Search for the `k` nearest neighbors by cosine similarity.
    ///
    /// `k == 0` and an empty index both yield an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        let state = self.read_state()?;
        if k == 0 || state.entries.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(expected) = state.dimension {
            if query.len() != expected {
                return Err(PantryError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let query = l2_normalize(query.to_vec());
        let mut scored: Vec<(f64, &IndexEntry)> = state
            .entries
            .values()
            .map(|entry| (dot(&query, &entry.vector), entry))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| ScoredEntry {
                entry: entry.clone(),
                score,
            })
            .collect())
    }

    pub fn get(&self, id: &str) -> Option<IndexEntry> {
        self.read_state().ok()?.entries.get(id).cloned()
    }

    /// Delete an entry by ID. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write_state()?.entries.remove(id).is_some())
    }

    /// Return the number of entries currently stored in the index.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Return true if the index contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.state.read().ok().and_then(|s| s.dimension)
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Write the snapshot file, if this index has one.
    ///
    /// Writes to a sibling temp file first and renames it into place so a
    /// crash never leaves a truncated snapshot behind. Concurrent saves run
    /// one at a time and each writes the state as of when it got its turn.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };
        let _turn = self.save_guard.lock().await;

        let data = {
            let state = self.read_state()?;
            let mut entries: Vec<IndexEntry> = state.entries.values().cloned().collect();
            entries.sort_by(|a, b| a.id.cmp(&b.id));
            serde_json::to_string(&Snapshot {
                version: SNAPSHOT_VERSION,
                dimension: state.dimension,
                saved_at: Utc::now(),
                entries,
            })?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(path = %path.display(), entries = self.len(), "Vector index snapshot written");
        Ok(())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, IndexState>> {
        self.state
            .read()
            .map_err(|e| PantryError::IndexUnavailable(format!("Lock poisoned: {}", e)))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, IndexState>> {
        self.state
            .write()
            .map_err(|e| PantryError::IndexUnavailable(format!("Lock poisoned: {}", e)))
    }
}

impl VectorStore for VectorIndex {
    async fn upsert(&self, entry: IndexEntry) -> Result<()> {
        self.insert(entry.id, entry.vector, entry.text, entry.metadata)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        self.search(vector, k)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read_state()?.entries.len())
    }

    async fn flush(&self) -> Result<()> {
        self.save().await
    }
}

/// Scale to unit length. Zero vectors are returned unchanged and score 0.
fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f64 = vector
        .iter()
        .map(|x| (*x as f64).powi(2))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        for val in &mut vector {
            *val = (*val as f64 / norm) as f32;
        }
    }
    vector
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

// ---------------------------------------------------------------------------
// IndexClient - timeout + retry around any VectorStore
// ---------------------------------------------------------------------------

/// The index as seen by the ingestion pipeline and query engine.
#[derive(Clone)]
pub struct IndexClient {
    store: Arc<dyn DynVectorStore>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl IndexClient {
    pub fn new(store: impl VectorStore + 'static) -> Self {
        Self::from_dyn(Arc::new(store))
    }

    pub fn from_dyn(store: Arc<dyn DynVectorStore>) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(5),
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

    // A stalled store surfaces as IndexUnavailable, never as a bare timeout.

    pub async fn upsert(&self, entry: IndexEntry) -> Result<()> {
        retry(&self.retry, "upsert", || {
            with_timeout("upsert", self.timeout, self.store.upsert_boxed(entry.clone()))
        })
        .await
        .map_err(|e| e.attribute_timeout(PantryError::IndexUnavailable))
    }

    pub async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        retry(&self.retry, "query", || {
            with_timeout("query", self.timeout, self.store.query_boxed(vector, k))
        })
        .await
        .map_err(|e| e.attribute_timeout(PantryError::IndexUnavailable))
    }

    pub async fn count(&self) -> Result<usize> {
        with_timeout("count", self.timeout, self.store.count_boxed())
            .await
            .map_err(|e| e.attribute_timeout(PantryError::IndexUnavailable))
    }

    pub async fn flush(&self) -> Result<()> {
        retry(&self.retry, "flush", || self.store.flush_boxed()).await
    }
}

impl std::fmt::Debug for IndexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexClient")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}
