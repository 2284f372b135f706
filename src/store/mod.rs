//! Case and methodology storage.
//!
//! Storage is behind traits so the in-memory backends can be swapped for a
//! durable store without touching ingestion or retrieval. Cases form
//! append-only version chains per logical id; methodology cards are a small
//! curated set keyed by id.

use crate::models::{CaseId, ChainOfThoughtCase, MethodId, MethodologyCard};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Versioned storage for chain-of-thought cases.
pub trait CaseStore: Send + Sync {
    /// Stores a case version. Versions are append-only; storing an existing
    /// `(id, version)` pair overwrites it in place.
    fn put(&self, case: ChainOfThoughtCase);

    /// Fetches a specific version.
    fn get(&self, id: &CaseId, version: u32) -> Option<ChainOfThoughtCase>;

    /// Fetches the highest stored version for a logical id.
    fn latest(&self, id: &CaseId) -> Option<ChainOfThoughtCase>;

    /// Returns the highest version number stored for a logical id.
    fn latest_version(&self, id: &CaseId) -> Option<u32>;

    /// Finds a case whose content hash matches, at any version of any id.
    fn find_by_hash(&self, content_hash: &str) -> Option<ChainOfThoughtCase>;

    /// Flags a stored version as missing from the embedding index.
    fn mark_unindexed(&self, id: &CaseId, version: u32);

    /// Clears the unindexed flag after a successful (re)index.
    fn mark_indexed(&self, id: &CaseId, version: u32);

    /// Returns all versions currently flagged unindexed.
    fn unindexed(&self) -> Vec<ChainOfThoughtCase>;

    /// Number of logical case ids stored.
    fn len(&self) -> usize;

    /// Returns true when no cases are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage for methodology cards.
pub trait MethodologyStore: Send + Sync {
    /// Stores or replaces a card.
    fn put(&self, card: MethodologyCard);

    /// Fetches a card by id.
    fn get(&self, id: &MethodId) -> Option<MethodologyCard>;

    /// Returns all stored cards.
    fn all(&self) -> Vec<MethodologyCard>;

    /// Number of stored cards.
    fn len(&self) -> usize;

    /// Returns true when no cards are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct CaseShelves {
    // Version chains keyed by logical id, each sorted by version ascending.
    chains: HashMap<String, Vec<ChainOfThoughtCase>>,
    hashes: HashMap<String, (String, u32)>,
    unindexed: HashSet<(String, u32)>,
}

/// In-memory case store.
#[derive(Default)]
pub struct InMemoryCaseStore {
    inner: RwLock<CaseShelves>,
}

impl InMemoryCaseStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CaseShelves> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CaseShelves> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CaseStore for InMemoryCaseStore {
    fn put(&self, case: ChainOfThoughtCase) {
        let id = case.id.to_string();
        let version = case.metadata.version;
        let hash = case.content_hash();
        let mut shelves = self.write();
        shelves.hashes.insert(hash, (id.clone(), version));
        let chain = shelves.chains.entry(id).or_default();
        chain.retain(|c| c.metadata.version != version);
        chain.push(case);
        chain.sort_by_key(|c| c.metadata.version);
    }

    fn get(&self, id: &CaseId, version: u32) -> Option<ChainOfThoughtCase> {
        self.read()
            .chains
            .get(id.as_str())?
            .iter()
            .find(|c| c.metadata.version == version)
            .cloned()
    }

    fn latest(&self, id: &CaseId) -> Option<ChainOfThoughtCase> {
        self.read().chains.get(id.as_str())?.last().cloned()
    }

    fn latest_version(&self, id: &CaseId) -> Option<u32> {
        self.read()
            .chains
            .get(id.as_str())?
            .last()
            .map(|c| c.metadata.version)
    }

    fn find_by_hash(&self, content_hash: &str) -> Option<ChainOfThoughtCase> {
        let shelves = self.read();
        let (id, version) = shelves.hashes.get(content_hash)?;
        shelves
            .chains
            .get(id)?
            .iter()
            .find(|c| c.metadata.version == *version)
            .cloned()
    }

    fn mark_unindexed(&self, id: &CaseId, version: u32) {
        self.write().unindexed.insert((id.to_string(), version));
    }

    fn mark_indexed(&self, id: &CaseId, version: u32) {
        self.write().unindexed.remove(&(id.to_string(), version));
    }

    fn unindexed(&self) -> Vec<ChainOfThoughtCase> {
        let shelves = self.read();
        let mut flagged: Vec<ChainOfThoughtCase> = shelves
            .unindexed
            .iter()
            .filter_map(|(id, version)| {
                shelves
                    .chains
                    .get(id)?
                    .iter()
                    .find(|c| c.metadata.version == *version)
                    .cloned()
            })
            .collect();
        flagged.sort_by(|a, b| {
            a.id.as_str()
                .cmp(b.id.as_str())
                .then(a.metadata.version.cmp(&b.metadata.version))
        });
        flagged
    }

    fn len(&self) -> usize {
        self.read().chains.len()
    }
}

/// In-memory methodology store.
#[derive(Default)]
pub struct InMemoryMethodologyStore {
    inner: RwLock<HashMap<String, MethodologyCard>>,
}

impl InMemoryMethodologyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, MethodologyCard>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MethodologyStore for InMemoryMethodologyStore {
    fn put(&self, card: MethodologyCard) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.insert(card.method_id.to_string(), card);
    }

    fn get(&self, id: &MethodId) -> Option<MethodologyCard> {
        self.read().get(id.as_str()).cloned()
    }

    fn all(&self) -> Vec<MethodologyCard> {
        let mut cards: Vec<MethodologyCard> = self.read().values().cloned().collect();
        cards.sort_by(|a, b| a.method_id.as_str().cmp(b.method_id.as_str()));
        cards
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}
