//! Durable storage seam for ledger chains.
//!
//! The ledgers own no file or network format. A deployment that needs
//! durability attaches a [`ChainStore`]; records are mirrored to it inside
//! the append critical section and can be replayed with `restore`.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{LedgerError, Result};

/// Append/read primitives a ledger chain can be mirrored to.
///
/// Records are opaque JSON values keyed by namespace and position.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Persist the record at `index`. Implementations must reject any index
    /// other than the current length of the namespace.
    async fn append(&self, namespace: &str, index: u64, record: serde_json::Value) -> Result<()>;

    /// Read up to `limit` records starting at `from`, in chain order.
    async fn read(&self, namespace: &str, from: u64, limit: usize)
        -> Result<Vec<serde_json::Value>>;

    /// Number of records persisted under a namespace.
    async fn len(&self, namespace: &str) -> Result<u64>;
}

/// In-process store, used for tests and single-node embedding.
pub struct MemoryChainStore {
    namespaces: DashMap<String, Vec<serde_json::Value>>,
}

impl MemoryChainStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
        }
    }

    /// Overwrite a persisted record in place.
    ///
    /// Only for exercising tamper detection on restore; ledgers never call it.
    #[doc(hidden)]
    pub fn overwrite(&self, namespace: &str, index: u64, record: serde_json::Value) -> bool {
        match self.namespaces.get_mut(namespace) {
            Some(mut records) => match records.get_mut(index as usize) {
                Some(slot) => {
                    *slot = record;
                    true
                }
                None => false,
            },
            None => false,
        }
    }
}

impl Default for MemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainStore for MemoryChainStore {
    async fn append(&self, namespace: &str, index: u64, record: serde_json::Value) -> Result<()> {
        let mut records = self.namespaces.entry(namespace.to_string()).or_default();
        let expected = records.len() as u64;
        if index != expected {
            return Err(LedgerError::Storage(format!(
                "out of order append to {}: expected index {}, got {}",
                namespace, expected, index
            )));
        }
        records.push(record);
        Ok(())
    }

    async fn read(
        &self,
        namespace: &str,
        from: u64,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .namespaces
            .get(namespace)
            .map(|records| {
                records
                    .iter()
                    .skip(from as usize)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn len(&self, namespace: &str) -> Result<u64> {
        Ok(self
            .namespaces
            .get(namespace)
            .map(|records| records.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_rejects_gaps() {
        let store = MemoryChainStore::new();

        store.append("events", 0, serde_json::json!({"n": 0})).await.unwrap();
        store.append("events", 1, serde_json::json!({"n": 1})).await.unwrap();

        let err = store
            .append("events", 3, serde_json::json!({"n": 3}))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));

        assert_eq!(store.len("events").await.unwrap(), 2);
        assert_eq!(store.len("blocks").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_reads_in_order() {
        let store = MemoryChainStore::new();
        for n in 0..5u64 {
            store.append("events", n, serde_json::json!({"n": n})).await.unwrap();
        }

        let page = store.read("events", 2, 2).await.unwrap();
        assert_eq!(page, vec![serde_json::json!({"n": 2}), serde_json::json!({"n": 3})]);

        assert!(store.read("missing", 0, 10).await.unwrap().is_empty());
    }
}
