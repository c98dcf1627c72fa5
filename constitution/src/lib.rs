//! Constitution and gates for the governance engine
//!
//! This crate holds the versioned rule document and the two checkpoints
//! that read it:
//!
//! - **DecisionGate**: reviews proposed actions article by article, rule by
//!   rule, in a fixed five-step precedence
//! - **ProtocolGate**: arms irreversible sovereign protocols only for the
//!   right authority, threat level and legitimacy
//!
//! Both gates fail closed: once the [`ConstitutionStore`] detects a hash or
//! signature mismatch, every evaluation returns an integrity error.
//!
//! # Key Components
//!
//! - [`ConstitutionStore`]: Active document, version history, fail-closed state
//! - [`DecisionGate`] / [`RuleCheck`]: Rule evaluation
//! - [`ProtocolGate`]: Sovereign protocol checkpoint
//! - [`ConstitutionPublisher`]: Anchors publications in both ledgers
//! - [`ArticleProvider`]: Per-domain canonical articles
//!
//! # Example
//!
//! ```ignore
//! use constitution::{canonical_constitution, ConstitutionStore, Decision, DecisionGate, DecisionScope};
//!
//! let store = Arc::new(ConstitutionStore::new());
//! store.load(canonical_constitution("council")?).await?;
//!
//! let gate = DecisionGate::new(store);
//! let verdict = gate
//!     .evaluate(&Decision::new("send_notice", 0.2, DecisionScope::Local))
//!     .await?;
//! ```

pub mod articles;
pub mod error;
pub mod gate;
pub mod protocol;
pub mod publisher;
pub mod store;
pub mod types;
pub mod verification;

// Re-export main types
pub use articles::{canonical_constitution, ArticleProvider};
pub use error::{ConstitutionError, Result};
pub use gate::{evaluate_against, DecisionGate, RuleCheck};
pub use protocol::{canonical_rules, ProtocolGate, ProtocolRule, PROTOCOL_BLACK_HOLE, PROTOCOL_PHOENIX};
pub use publisher::{ConstitutionPublisher, PublishKind, PublishRequest, PublishResult, PUBLISHED_BLOCK};
pub use store::{ConstitutionStore, VersionRecord};
pub use types::*;
pub use verification::{hash_articles, seal, DigestSignatureVerifier, SignatureVerifier};
