//! Tamper-evident ledgers for the governance engine
//!
//! Two independent append-only chains share one hash-chain core:
//!
//! - **EventLedger**: audit anchors, one per externally observed event
//! - **BlockLedger**: formally registered governance blocks (threat
//!   episodes, anchoring completions, constitution publication)
//!
//! Every entry hash binds its position, payload, timestamp and the hash of
//! its predecessor. Appends are serialized behind a single writer lock per
//! chain; reads work on snapshots.
//!
//! # Key Components
//!
//! - [`HashChain`]: Generic single-writer chain with verification
//! - [`EventLedger`] / [`BlockLedger`]: The two governance chains
//! - [`ChainStore`]: Optional durable-storage seam, with [`MemoryChainStore`]
//!
//! # Example
//!
//! ```ignore
//! use audit_ledger::{AnchorPayload, AuditLevel, EventLedger};
//!
//! let ledger = EventLedger::new();
//! let anchor = ledger
//!     .anchor(AnchorPayload::new("guardians", "probe", AuditLevel::Normal, json!({})))
//!     .await?;
//! assert!(ledger.verify_integrity().await);
//! ```

pub mod block;
pub mod chain;
pub mod error;
pub mod event;
pub mod hash;
pub mod store;

pub use block::{AppendResult, BlockDomain, BlockLedger, BlockPayload, ChainState, LedgerBlock};
pub use chain::{verify_sequence, ChainPosition, ChainRecord, HashChain};
pub use error::{LedgerError, Result};
pub use event::{AnchorPayload, AuditAnchor, AuditLevel, EventLedger, LedgerConfig};
pub use hash::{chain_hash, compute_hash};
pub use store::{ChainStore, MemoryChainStore};
