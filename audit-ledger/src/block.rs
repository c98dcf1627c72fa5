//! BlockLedger: formally registered governance blocks.
//!
//! Structurally the same chain as the EventLedger, kept in its own
//! namespace so governance-level history can be verified and replayed
//! independently of audit detail.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::chain::{ChainRecord, HashChain};
use crate::error::Result;
use crate::event::LedgerConfig;
use crate::hash::chain_hash;
use crate::store::ChainStore;

/// Governance domain a block is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockDomain {
    Identity,
    Cognition,
    Governance,
    Economy,
    Guardians,
    Protocols,
    Security,
    Xr,
}

impl BlockDomain {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Cognition => "cognition",
            Self::Governance => "governance",
            Self::Economy => "economy",
            Self::Guardians => "guardians",
            Self::Protocols => "protocols",
            Self::Security => "security",
            Self::Xr => "xr",
        }
    }
}

impl fmt::Display for BlockDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller asks the ledger to register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload {
    pub domain: BlockDomain,
    #[serde(rename = "type")]
    pub block_type: String,
    pub data: serde_json::Value,
}

impl BlockPayload {
    pub fn new(domain: BlockDomain, block_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            domain,
            block_type: block_type.into(),
            data,
        }
    }
}

/// One immutable entry of the BlockLedger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBlock {
    /// Position in the chain, starting at 0
    pub index: u64,
    pub domain: BlockDomain,
    #[serde(rename = "type")]
    pub block_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    /// `None` only for the genesis block
    pub prev_hash: Option<String>,
}

#[derive(Serialize)]
struct BlockBody<'a> {
    domain: BlockDomain,
    block_type: &'a str,
    data: &'a serde_json::Value,
}

impl ChainRecord for LedgerBlock {
    fn index(&self) -> u64 {
        self.index
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn prev_hash(&self) -> Option<&str> {
        self.prev_hash.as_deref()
    }

    fn compute_hash(&self) -> Result<String> {
        let body = BlockBody {
            domain: self.domain,
            block_type: &self.block_type,
            data: &self.data,
        };
        chain_hash(self.index, &body, self.timestamp, self.prev_hash.as_deref())
    }
}

/// Summary of the block chain.
///
/// The state returned with an append describes the chain right after that
/// block, even when other appends have landed since.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    /// Number of blocks
    pub length: u64,
    pub last_hash: Option<String>,
    pub last_index: Option<u64>,
    /// When the ledger instance was created
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Result of registering a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendResult {
    pub block: LedgerBlock,
    pub state: ChainState,
}

/// Append-only, hash-chained log of governance blocks.
pub struct BlockLedger {
    chain: HashChain<LedgerBlock>,
    created_at: DateTime<Utc>,
    last_update: RwLock<DateTime<Utc>>,
    context_tag: String,
}

impl BlockLedger {
    /// Create an in-memory ledger with default configuration.
    pub fn new() -> Self {
        Self::with_config(&LedgerConfig::default())
    }

    /// Create an in-memory ledger.
    pub fn with_config(config: &LedgerConfig) -> Self {
        Self::from_chain(HashChain::new(config.block_namespace.clone()), config)
    }

    /// Create an empty ledger mirrored to a store.
    pub fn with_store(config: &LedgerConfig, store: Arc<dyn ChainStore>) -> Self {
        Self::from_chain(
            HashChain::with_store(config.block_namespace.clone(), store),
            config,
        )
    }

    /// Replay and verify a ledger previously mirrored to a store.
    pub async fn restore(config: &LedgerConfig, store: Arc<dyn ChainStore>) -> Result<Self> {
        let chain = HashChain::restore(config.block_namespace.clone(), store).await?;
        let ledger = Self::from_chain(chain, config);
        if let Some(last) = ledger.chain.recent(1).await.pop() {
            *ledger.last_update.write().await = last.timestamp;
        }
        Ok(ledger)
    }

    fn from_chain(chain: HashChain<LedgerBlock>, config: &LedgerConfig) -> Self {
        let now = Utc::now();
        Self {
            chain,
            created_at: now,
            last_update: RwLock::new(now),
            context_tag: config.context_tag.clone(),
        }
    }

    /// Register a block. The only mutating operation of the ledger.
    pub async fn append(&self, payload: BlockPayload) -> Result<AppendResult> {
        let block = self
            .chain
            .append_with(|position| {
                let mut block = LedgerBlock {
                    index: position.index,
                    domain: payload.domain,
                    block_type: payload.block_type,
                    data: payload.data,
                    timestamp: position.timestamp,
                    hash: String::new(),
                    prev_hash: position.prev_hash,
                };
                block.hash = block.compute_hash()?;
                Ok(block)
            })
            .await?;

        {
            let mut last_update = self.last_update.write().await;
            if block.timestamp > *last_update {
                *last_update = block.timestamp;
            }
        }

        info!(
            context = %self.context_tag,
            index = block.index,
            domain = %block.domain,
            block_type = %block.block_type,
            "Block registered"
        );

        let state = ChainState {
            length: block.index + 1,
            last_hash: Some(block.hash.clone()),
            last_index: Some(block.index),
            created_at: self.created_at,
            last_update: block.timestamp,
        };
        Ok(AppendResult { block, state })
    }

    /// Current chain summary.
    pub async fn state(&self) -> ChainState {
        let length = self.chain.len().await as u64;
        ChainState {
            length,
            last_hash: self.chain.last_hash().await,
            last_index: length.checked_sub(1),
            created_at: self.created_at,
            last_update: *self.last_update.read().await,
        }
    }

    /// Ordered blocks starting at `from` (restartable).
    pub async fn read(&self, from: usize, limit: usize) -> Vec<LedgerBlock> {
        self.chain.read(from, limit).await
    }

    /// The newest blocks, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<LedgerBlock> {
        self.chain.recent(limit).await
    }

    pub async fn get(&self, index: u64) -> Option<LedgerBlock> {
        self.chain.get(index).await
    }

    /// Blocks of a domain, oldest first.
    pub async fn by_domain(&self, domain: BlockDomain, limit: usize) -> Vec<LedgerBlock> {
        self.chain.filter(|b| b.domain == domain, limit).await
    }

    /// Blocks of a type, oldest first.
    pub async fn by_type(&self, block_type: &str, limit: usize) -> Vec<LedgerBlock> {
        self.chain
            .filter(|b| b.block_type == block_type, limit)
            .await
    }

    pub async fn snapshot(&self) -> Vec<LedgerBlock> {
        self.chain.snapshot().await
    }

    pub async fn len(&self) -> usize {
        self.chain.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.chain.is_empty().await
    }

    pub async fn last_hash(&self) -> Option<String> {
        self.chain.last_hash().await
    }

    /// Verify the chain, reporting where it broke.
    pub async fn check_integrity(&self) -> Result<()> {
        self.chain.verify().await
    }

    /// Verify the chain.
    pub async fn verify_integrity(&self) -> bool {
        match self.chain.verify().await {
            Ok(()) => true,
            Err(err) => {
                warn!(context = %self.context_tag, error = %err, "Block ledger failed verification");
                false
            }
        }
    }
}

impl Default for BlockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::verify_sequence;
    use crate::store::MemoryChainStore;

    fn payload(n: u32) -> BlockPayload {
        BlockPayload::new(
            BlockDomain::Guardians,
            "threat_signal",
            serde_json::json!({"n": n}),
        )
    }

    #[tokio::test]
    async fn test_genesis_block() {
        let ledger = BlockLedger::new();
        let result = ledger.append(payload(0)).await.unwrap();

        assert_eq!(result.block.index, 0);
        assert!(result.block.prev_hash.is_none());
        assert_eq!(result.state.length, 1);
        assert_eq!(result.state.last_index, Some(0));
        assert_eq!(result.state.last_hash, Some(result.block.hash.clone()));
    }

    #[tokio::test]
    async fn test_empty_state() {
        let ledger = BlockLedger::new();
        let state = ledger.state().await;

        assert_eq!(state.length, 0);
        assert!(state.last_hash.is_none());
        assert!(state.last_index.is_none());
        assert!(ledger.verify_integrity().await);
    }

    #[tokio::test]
    async fn test_chain_verifies_and_detects_relink() {
        let ledger = BlockLedger::new();
        for n in 0..5 {
            ledger.append(payload(n)).await.unwrap();
        }
        assert!(ledger.verify_integrity().await);

        let mut blocks = ledger.snapshot().await;
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].prev_hash.as_deref(), Some(pair[0].hash.as_str()));
        }

        blocks[0].prev_hash = Some("0".repeat(64));
        assert!(verify_sequence(&blocks).is_err());

        let mut reordered = ledger.snapshot().await;
        reordered.swap(1, 2);
        assert!(verify_sequence(&reordered).is_err());
    }

    #[tokio::test]
    async fn test_by_domain() {
        let ledger = BlockLedger::new();
        ledger.append(payload(0)).await.unwrap();
        ledger
            .append(BlockPayload::new(
                BlockDomain::Governance,
                "constitution_published",
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let governance = ledger.by_domain(BlockDomain::Governance, 10).await;
        assert_eq!(governance.len(), 1);
        assert_eq!(governance[0].block_type, "constitution_published");
        assert_eq!(ledger.by_type("threat_signal", 10).await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_form_one_chain() {
        let ledger = Arc::new(BlockLedger::new());

        let tasks = (0..32).map(|n| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.append(payload(n)).await })
        });
        let results = futures::future::join_all(tasks).await;
        assert!(results.iter().all(|r| matches!(r, Ok(Ok(_)))));

        let blocks = ledger.snapshot().await;
        assert_eq!(blocks.len(), 32);
        assert!(verify_sequence(&blocks).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_append_state_describes_its_own_block() {
        let ledger = Arc::new(BlockLedger::new());

        let tasks = (0..256).map(|n| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.append(payload(n)).await.unwrap() })
        });

        for result in futures::future::join_all(tasks).await {
            let AppendResult { block, state } = result.unwrap();
            assert_eq!(state.last_index, Some(block.index));
            assert_eq!(state.last_hash.as_deref(), Some(block.hash.as_str()));
            assert_eq!(state.length, block.index + 1);
        }
        assert_eq!(ledger.state().await.length, 256);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_chain_unchanged() {
        let store = Arc::new(MemoryChainStore::new());
        let config = LedgerConfig::default();

        store
            .append(&config.block_namespace, 0, serde_json::json!({"foreign": true}))
            .await
            .unwrap();

        let ledger = BlockLedger::with_store(&config, store);
        assert!(ledger.append(payload(0)).await.is_err());
        assert!(ledger.is_empty().await);
    }

    /// Store whose reads stop one record short of what it holds.
    struct TruncatingStore(MemoryChainStore);

    #[async_trait::async_trait]
    impl ChainStore for TruncatingStore {
        async fn append(&self, namespace: &str, index: u64, record: serde_json::Value) -> Result<()> {
            self.0.append(namespace, index, record).await
        }

        async fn read(
            &self,
            namespace: &str,
            from: u64,
            limit: usize,
        ) -> Result<Vec<serde_json::Value>> {
            let held = self.0.len(namespace).await?;
            let limit = limit.min(held.saturating_sub(1).saturating_sub(from) as usize);
            self.0.read(namespace, from, limit).await
        }

        async fn len(&self, namespace: &str) -> Result<u64> {
            self.0.len(namespace).await
        }
    }

    #[tokio::test]
    async fn test_restore_refuses_short_replay() {
        let store = Arc::new(TruncatingStore(MemoryChainStore::new()));
        let config = LedgerConfig::default();

        let ledger = BlockLedger::with_store(&config, store.clone());
        for n in 0..3 {
            ledger.append(payload(n)).await.unwrap();
        }

        let err = BlockLedger::restore(&config, store).await.err().unwrap();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn test_restore_keeps_index_sequence() {
        let store = Arc::new(MemoryChainStore::new());
        let config = LedgerConfig::default();

        let ledger = BlockLedger::with_store(&config, store.clone());
        ledger.append(payload(0)).await.unwrap();
        ledger.append(payload(1)).await.unwrap();

        let restored = BlockLedger::restore(&config, store).await.unwrap();
        let result = restored.append(payload(2)).await.unwrap();

        assert_eq!(result.block.index, 2);
        assert_eq!(result.state.length, 3);
        assert!(restored.verify_integrity().await);
    }
}
