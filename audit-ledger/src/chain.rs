//! Shared hash-chain core behind both ledgers.
//!
//! A [`HashChain`] is the single writer for one chain: computing the next
//! position from the last published hash and publishing the new entry
//! happen under one write lock, so two appends can never observe the same
//! `prev_hash`. Readers take snapshots under the read lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::error::{LedgerError, Result};
use crate::store::ChainStore;

/// Page size used when replaying a chain from a store.
const RESTORE_BATCH: usize = 512;

/// An entry that can live in a [`HashChain`].
pub trait ChainRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Position of the entry, starting at 0.
    fn index(&self) -> u64;

    /// Stored hash of the entry.
    fn hash(&self) -> &str;

    /// Stored hash of the preceding entry, `None` at genesis.
    fn prev_hash(&self) -> Option<&str>;

    /// Recompute the hash from the entry's content.
    fn compute_hash(&self) -> Result<String>;
}

/// Where the next entry will be placed.
#[derive(Debug, Clone)]
pub struct ChainPosition {
    /// Index the entry will occupy
    pub index: u64,
    /// Hash of the current tail, `None` for an empty chain
    pub prev_hash: Option<String>,
    /// Timestamp assigned to the entry
    pub timestamp: DateTime<Utc>,
}

struct ChainInner<T> {
    entries: Vec<T>,
    last_hash: Option<String>,
}

/// Append-only, hash-linked sequence of records.
///
/// There is deliberately no API that removes or edits an entry.
pub struct HashChain<T: ChainRecord> {
    namespace: String,
    inner: RwLock<ChainInner<T>>,
    store: Option<Arc<dyn ChainStore>>,
}

impl<T: ChainRecord> HashChain<T> {
    /// Create an empty in-memory chain.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            inner: RwLock::new(ChainInner {
                entries: Vec::new(),
                last_hash: None,
            }),
            store: None,
        }
    }

    /// Create an empty chain mirrored to a store.
    pub fn with_store(namespace: impl Into<String>, store: Arc<dyn ChainStore>) -> Self {
        let mut chain = Self::new(namespace);
        chain.store = Some(store);
        chain
    }

    /// Replay a chain from a store, verifying it before use.
    ///
    /// A chain that fails verification, or whose replay does not cover
    /// every record the store reports, is never returned.
    pub async fn restore(namespace: impl Into<String>, store: Arc<dyn ChainStore>) -> Result<Self> {
        let namespace = namespace.into();
        let mut entries: Vec<T> = Vec::new();

        loop {
            let page = store
                .read(&namespace, entries.len() as u64, RESTORE_BATCH)
                .await?;
            if page.is_empty() {
                break;
            }
            for value in page {
                entries.push(serde_json::from_value(value)?);
            }
        }

        let persisted = store.len(&namespace).await?;
        if persisted != entries.len() as u64 {
            error!(
                namespace = %namespace,
                persisted,
                replayed = entries.len(),
                "Store length disagrees with replayed chain"
            );
            return Err(LedgerError::integrity(
                entries.len() as u64,
                format!("store holds {} records, replay returned {}", persisted, entries.len()),
            ));
        }

        if let Err(err) = verify_sequence(&entries) {
            error!(namespace = %namespace, error = %err, "Refusing to restore corrupt chain");
            return Err(err);
        }

        let last_hash = entries.last().map(|e| e.hash().to_string());
        debug!(namespace = %namespace, entries = entries.len(), "Chain restored");

        Ok(Self {
            namespace,
            inner: RwLock::new(ChainInner { entries, last_hash }),
            store: Some(store),
        })
    }

    /// Namespace used for the store and for logging.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Append a new entry built from the next chain position.
    ///
    /// `build` runs inside the critical section and must produce an entry
    /// placed exactly at the given position.
    pub async fn append_with<F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(ChainPosition) -> Result<T>,
    {
        let mut inner = self.inner.write().await;

        let position = ChainPosition {
            index: inner.entries.len() as u64,
            prev_hash: inner.last_hash.clone(),
            timestamp: Utc::now(),
        };
        let index = position.index;
        let expected_prev = position.prev_hash.clone();

        let entry = build(position)?;
        if entry.index() != index || entry.prev_hash() != expected_prev.as_deref() {
            return Err(LedgerError::integrity(
                index,
                "entry built for a different chain position",
            ));
        }

        if let Some(store) = &self.store {
            store
                .append(&self.namespace, index, serde_json::to_value(&entry)?)
                .await?;
        }

        inner.last_hash = Some(entry.hash().to_string());
        inner.entries.push(entry.clone());

        Ok(entry)
    }

    /// Ordered entries starting at `from`; call again from the last index + 1
    /// to continue.
    pub async fn read(&self, from: usize, limit: usize) -> Vec<T> {
        let inner = self.inner.read().await;
        inner.entries.iter().skip(from).take(limit).cloned().collect()
    }

    /// The newest `limit` entries, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<T> {
        let inner = self.inner.read().await;
        let start = inner.entries.len().saturating_sub(limit);
        inner.entries[start..].to_vec()
    }

    /// Entry at a position.
    pub async fn get(&self, index: u64) -> Option<T> {
        let inner = self.inner.read().await;
        inner.entries.get(index as usize).cloned()
    }

    /// Entries matching a predicate, oldest first.
    pub async fn filter<P>(&self, predicate: P, limit: usize) -> Vec<T>
    where
        P: Fn(&T) -> bool,
    {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .filter(|e| predicate(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Full copy of the chain.
    pub async fn snapshot(&self) -> Vec<T> {
        self.inner.read().await.entries.clone()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the chain has no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Hash of the tail entry.
    pub async fn last_hash(&self) -> Option<String> {
        self.inner.read().await.last_hash.clone()
    }

    /// Verify the whole chain.
    pub async fn verify(&self) -> Result<()> {
        let inner = self.inner.read().await;
        verify_sequence(&inner.entries)
    }
}

/// Verify a sequence of entries as a complete chain.
///
/// Checks positions are `0..n`, the first entry has no predecessor, every
/// other entry links to its predecessor's hash, and every stored hash
/// matches its recomputed value.
pub fn verify_sequence<T: ChainRecord>(entries: &[T]) -> Result<()> {
    for (position, entry) in entries.iter().enumerate() {
        let position = position as u64;

        if entry.index() != position {
            return Err(LedgerError::integrity(
                position,
                format!("expected index {}, found {}", position, entry.index()),
            ));
        }

        let expected_prev = match position {
            0 => None,
            _ => Some(entries[position as usize - 1].hash()),
        };
        if entry.prev_hash() != expected_prev {
            return Err(LedgerError::integrity(position, "previous hash link mismatch"));
        }

        if entry.compute_hash()? != entry.hash() {
            return Err(LedgerError::integrity(position, "entry hash mismatch"));
        }
    }

    Ok(())
}
