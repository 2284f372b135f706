//! In-memory vector index with snapshot-swap concurrency.
//!
//! One index per corpus (cases, methodologies). Readers clone the current
//! [`Snapshot`] behind an `Arc` and search without holding any lock; writers
//! serialize on a writer mutex, build the next snapshot, and swap it in
//! under a short write lock. Embedding always happens before either lock is
//! taken, so a slow or stalled embedding service can never block queries.
//!
//! Entries are never deleted. Superseded versions are retired, invalidated
//! entries are flagged stale, and both remain addressable by explicit
//! `(entity_id, version)` while being excluded from similarity queries.

use crate::embedding::{EmbeddingClient, cosine_similarity};
use crate::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// A single indexed entity version.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Logical entity id (case or methodology id).
    pub entity_id: String,
    /// Version of the entity this vector was computed from.
    pub version: u32,
    /// Id of the model that produced the vector.
    pub model_id: String,
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Set by invalidation; stale entries are skipped in queries.
    pub stale: bool,
    /// Set when a newer version of the same entity is indexed.
    pub retired: bool,
    /// Insertion order, used for deterministic tie-breaking.
    pub seq: u64,
}

impl IndexEntry {
    fn is_queryable(&self, index_model_id: &str) -> bool {
        !self.stale && !self.retired && self.model_id == index_model_id
    }
}

/// Immutable view of the index contents at a point in time.
#[derive(Debug, Default)]
struct Snapshot {
    entries: Vec<IndexEntry>,
    next_seq: u64,
}

/// Embedding-backed similarity index over one corpus.
pub struct EmbeddingIndex {
    name: &'static str,
    model_id: String,
    client: Arc<dyn EmbeddingClient>,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl EmbeddingIndex {
    /// Creates an empty index bound to the given embedding client.
    ///
    /// `name` labels log lines and metrics so the two corpus indices can be
    /// told apart.
    #[must_use]
    pub fn new(name: &'static str, client: Arc<dyn EmbeddingClient>) -> Self {
        let model_id = client.model_id().to_string();
        Self {
            name,
            model_id,
            client,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
        }
    }

    /// The model id all queryable entries must carry.
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Total number of entries, including stale and retired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.load().entries.len()
    }

    /// Returns true when the index holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.load().entries.is_empty()
    }

    fn load(&self) -> Arc<Snapshot> {
        // Lock poisoning only happens if a writer panicked; recover the
        // guarded value rather than propagating the poison.
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Takes the writer lock that serializes load-modify-swap sequences.
    /// Readers are unaffected; they only touch the snapshot `RwLock`.
    fn begin_write(&self) -> MutexGuard<'_, ()> {
        match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn swap(&self, next: Snapshot) {
        let next = Arc::new(next);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Indexes an entity version, embedding `text` through the client.
    ///
    /// Older versions of the same entity are retired; they stay fetchable by
    /// explicit version through [`Self::get`] but no longer appear in query
    /// results. Re-upserting an existing `(entity_id, version)` replaces its
    /// vector and clears its stale flag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] for blank text and
    /// [`Error::EmbeddingUnavailable`] when the embedding client fails.
    pub fn upsert(&self, entity_id: &str, version: u32, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::MalformedInput(format!(
                "refusing to index blank text for {entity_id}@v{version}"
            )));
        }

        // Embed before touching any lock.
        let vector = self.client.embed(text).map_err(|err| match err {
            Error::EmbeddingUnavailable(_) => err,
            other => Error::EmbeddingUnavailable(other.to_string()),
        })?;

        // Hold the writer lock across load-modify-swap so a concurrent
        // writer cannot build from the same base and clobber this write.
        let _writer = self.begin_write();
        let current = self.load();
        let mut entries = current.entries.clone();
        let mut next_seq = current.next_seq;

        entries.retain(|e| !(e.entity_id == entity_id && e.version == version));
        let newer_exists = entries
            .iter()
            .any(|e| e.entity_id == entity_id && e.version > version);
        for entry in &mut entries {
            if entry.entity_id == entity_id && entry.version < version {
                entry.retired = true;
            }
        }
        entries.push(IndexEntry {
            entity_id: entity_id.to_string(),
            version,
            model_id: self.model_id.clone(),
            vector,
            stale: false,
            retired: newer_exists,
            seq: next_seq,
        });
        next_seq += 1;

        let total = entries.len();
        self.swap(Snapshot { entries, next_seq });

        metrics::counter!("index_upserts_total", "index" => self.name).increment(1);
        metrics::gauge!("index_entries", "index" => self.name).set(total as f64);
        tracing::debug!(index = self.name, entity_id, version, "indexed entity");
        Ok(())
    }

    /// Returns the top `k` queryable entries by cosine similarity.
    ///
    /// `k == 0` and an empty corpus both yield an empty vec. Stale, retired,
    /// and model-mismatched entries are skipped; skipped stale entries are
    /// counted and logged at debug level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmbeddingUnavailable`] when the query text cannot be
    /// embedded.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<(String, u32, f32)>> {
        metrics::counter!("index_queries_total", "index" => self.name).increment(1);
        if k == 0 {
            return Ok(Vec::new());
        }
        let snapshot = self.load();
        if snapshot.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.client.embed(text).map_err(|err| match err {
            Error::EmbeddingUnavailable(_) => err,
            other => Error::EmbeddingUnavailable(other.to_string()),
        })?;

        let mut skipped_stale = 0u64;
        let mut scored: Vec<(&IndexEntry, f32)> = Vec::new();
        for entry in &snapshot.entries {
            if entry.is_queryable(&self.model_id) {
                scored.push((entry, cosine_similarity(&query_vector, &entry.vector)));
            } else if entry.stale || entry.model_id != self.model_id {
                skipped_stale += 1;
            }
        }
        if skipped_stale > 0 {
            metrics::counter!("index_stale_skipped_total", "index" => self.name)
                .increment(skipped_stale);
            tracing::debug!(
                index = self.name,
                skipped_stale,
                "skipped stale or model-mismatched entries"
            );
        }

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| a.seq.cmp(&b.seq))
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(entry, score)| (entry.entity_id.clone(), entry.version, score))
            .collect())
    }

    /// Fetches a specific entity version, including stale and retired ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleIndex`] when the stored vector was produced by a
    /// different model than the index is configured for, and
    /// [`Error::OperationFailed`] when the version is not present.
    pub fn get(&self, entity_id: &str, version: u32) -> Result<IndexEntry> {
        let snapshot = self.load();
        let entry = snapshot
            .entries
            .iter()
            .find(|e| e.entity_id == entity_id && e.version == version)
            .ok_or_else(|| Error::OperationFailed {
                operation: "index_get".to_string(),
                cause: format!("{entity_id}@v{version} not indexed"),
            })?;
        if entry.model_id != self.model_id {
            return Err(Error::StaleIndex {
                entity_id: entity_id.to_string(),
                version,
                found: entry.model_id.clone(),
                expected: self.model_id.clone(),
            });
        }
        Ok(entry.clone())
    }

    /// Marks every version of an entity stale without deleting it.
    pub fn invalidate(&self, entity_id: &str) {
        self.mark_stale(|entry| entry.entity_id == entity_id);
        tracing::debug!(index = self.name, entity_id, "invalidated entity");
    }

    /// Marks the whole index stale, e.g. after an embedding model change.
    pub fn invalidate_all(&self) {
        self.mark_stale(|_| true);
        tracing::warn!(index = self.name, "invalidated all entries");
    }

    fn mark_stale(&self, predicate: impl Fn(&IndexEntry) -> bool) {
        let _writer = self.begin_write();
        let current = self.load();
        let mut entries = current.entries.clone();
        let mut changed = 0u64;
        for entry in &mut entries {
            if !entry.stale && predicate(entry) {
                entry.stale = true;
                changed += 1;
            }
        }
        if changed > 0 {
            metrics::counter!("index_invalidations_total", "index" => self.name)
                .increment(changed);
            self.swap(Snapshot {
                entries,
                next_seq: current.next_seq,
            });
        }
    }
}
