//! EventLedger: audit anchors for externally observed events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::{ChainRecord, HashChain};
use crate::error::Result;
use crate::hash::chain_hash;
use crate::store::ChainStore;

/// Audit level of an anchored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Low,
    Normal,
    High,
    Critical,
}

impl AuditLevel {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for AuditLevel {
    fn default() -> Self {
        Self::Normal
    }
}

/// What a caller asks the ledger to anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorPayload {
    /// Subsystem the event belongs to (e.g. `guardians`, `threat`)
    pub domain: String,
    /// Event type (e.g. `guardian_status_changed`)
    #[serde(rename = "type")]
    pub event_type: String,
    /// Audit level
    pub level: AuditLevel,
    /// Event body
    pub data: serde_json::Value,
    /// Whether the event should also be registered as a governance block
    pub candidate_for_ledger: bool,
    /// Optional subject the event is about
    pub subject: Option<String>,
}

impl AnchorPayload {
    /// Create a payload that is not a ledger candidate.
    pub fn new(
        domain: impl Into<String>,
        event_type: impl Into<String>,
        level: AuditLevel,
        data: serde_json::Value,
    ) -> Self {
        Self {
            domain: domain.into(),
            event_type: event_type.into(),
            level,
            data,
            candidate_for_ledger: false,
            subject: None,
        }
    }

    /// Builder: set the ledger candidate flag.
    pub fn candidate(mut self, candidate: bool) -> Self {
        self.candidate_for_ledger = candidate;
        self
    }

    /// Builder: set the subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// One immutable entry of the EventLedger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditAnchor {
    /// Unique anchor ID
    pub id: String,
    /// Position in the chain
    pub sequence: u64,
    pub domain: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub level: AuditLevel,
    pub data: serde_json::Value,
    pub subject: Option<String>,
    pub candidate_for_ledger: bool,
    /// When the anchor was appended
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub prev_hash: Option<String>,
}

/// Borrowed view of the hashed part of an anchor.
#[derive(Serialize)]
struct AnchorBody<'a> {
    id: &'a str,
    domain: &'a str,
    event_type: &'a str,
    level: AuditLevel,
    data: &'a serde_json::Value,
    subject: Option<&'a str>,
    candidate_for_ledger: bool,
}

impl AuditAnchor {
    fn body(&self) -> AnchorBody<'_> {
        AnchorBody {
            id: &self.id,
            domain: &self.domain,
            event_type: &self.event_type,
            level: self.level,
            data: &self.data,
            subject: self.subject.as_deref(),
            candidate_for_ledger: self.candidate_for_ledger,
        }
    }
}

impl ChainRecord for AuditAnchor {
    fn index(&self) -> u64 {
        self.sequence
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn prev_hash(&self) -> Option<&str> {
        self.prev_hash.as_deref()
    }

    fn compute_hash(&self) -> Result<String> {
        chain_hash(
            self.sequence,
            &self.body(),
            self.timestamp,
            self.prev_hash.as_deref(),
        )
    }
}

/// Ledger configuration shared by both chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Store namespace of the event chain
    pub event_namespace: String,
    /// Store namespace of the block chain
    pub block_namespace: String,
    /// Tag attached to ledger log lines
    pub context_tag: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            event_namespace: "bookpi".to_string(),
            block_namespace: "msr".to_string(),
            context_tag: "tamv".to_string(),
        }
    }
}

/// Append-only, hash-chained log of audit anchors.
pub struct EventLedger {
    chain: HashChain<AuditAnchor>,
    context_tag: String,
}

impl EventLedger {
    /// Create an in-memory ledger with default configuration.
    pub fn new() -> Self {
        Self::with_config(&LedgerConfig::default())
    }

    /// Create an in-memory ledger.
    pub fn with_config(config: &LedgerConfig) -> Self {
        Self {
            chain: HashChain::new(config.event_namespace.clone()),
            context_tag: config.context_tag.clone(),
        }
    }

    /// Create an empty ledger mirrored to a store.
    pub fn with_store(config: &LedgerConfig, store: Arc<dyn ChainStore>) -> Self {
        Self {
            chain: HashChain::with_store(config.event_namespace.clone(), store),
            context_tag: config.context_tag.clone(),
        }
    }

    /// Replay and verify a ledger previously mirrored to a store.
    pub async fn restore(config: &LedgerConfig, store: Arc<dyn ChainStore>) -> Result<Self> {
        Ok(Self {
            chain: HashChain::restore(config.event_namespace.clone(), store).await?,
            context_tag: config.context_tag.clone(),
        })
    }

    /// Anchor an event. The only mutating operation of the ledger.
    pub async fn anchor(&self, payload: AnchorPayload) -> Result<AuditAnchor> {
        let anchor = self
            .chain
            .append_with(|position| {
                let mut anchor = AuditAnchor {
                    id: format!("bpi_{}", uuid::Uuid::new_v4().simple()),
                    sequence: position.index,
                    domain: payload.domain,
                    event_type: payload.event_type,
                    level: payload.level,
                    data: payload.data,
                    subject: payload.subject,
                    candidate_for_ledger: payload.candidate_for_ledger,
                    timestamp: position.timestamp,
                    hash: String::new(),
                    prev_hash: position.prev_hash,
                };
                anchor.hash = anchor.compute_hash()?;
                Ok(anchor)
            })
            .await?;

        debug!(
            context = %self.context_tag,
            anchor_id = %anchor.id,
            sequence = anchor.sequence,
            domain = %anchor.domain,
            event_type = %anchor.event_type,
            level = anchor.level.as_str(),
            "Event anchored"
        );

        Ok(anchor)
    }

    /// Ordered anchors starting at `from` (restartable).
    pub async fn read(&self, from: usize, limit: usize) -> Vec<AuditAnchor> {
        self.chain.read(from, limit).await
    }

    /// The newest anchors, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditAnchor> {
        self.chain.recent(limit).await
    }

    /// Anchor at a sequence number.
    pub async fn get(&self, sequence: u64) -> Option<AuditAnchor> {
        self.chain.get(sequence).await
    }

    /// Anchors of an event type, oldest first.
    pub async fn by_type(&self, event_type: &str, limit: usize) -> Vec<AuditAnchor> {
        self.chain
            .filter(|a| a.event_type == event_type, limit)
            .await
    }

    /// Anchors of a domain, oldest first.
    pub async fn by_domain(&self, domain: &str, limit: usize) -> Vec<AuditAnchor> {
        self.chain.filter(|a| a.domain == domain, limit).await
    }

    /// Anchors flagged as governance-ledger candidates.
    pub async fn candidates(&self, limit: usize) -> Vec<AuditAnchor> {
        self.chain.filter(|a| a.candidate_for_ledger, limit).await
    }

    /// Full copy of the chain.
    pub async fn snapshot(&self) -> Vec<AuditAnchor> {
        self.chain.snapshot().await
    }

    /// Number of anchors.
    pub async fn len(&self) -> usize {
        self.chain.len().await
    }

    /// Whether nothing has been anchored yet.
    pub async fn is_empty(&self) -> bool {
        self.chain.is_empty().await
    }

    /// Hash of the newest anchor.
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
                warn!(context = %self.context_tag, error = %err, "Event ledger failed verification");
                false
            }
        }
    }
}

impl Default for EventLedger {
    fn default() -> Self {
        Self::new()
    }
}
