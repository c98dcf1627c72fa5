//! Guardian runtime for the governance engine
//!
//! Watches the system and decides when humans have to be involved:
//!
//! - **Risk tracking**: mood, risk and legitimacy with hysteretic guardian
//!   status (watching, alert, escalated)
//! - **Threat aggregation**: rolling per-domain matrix and episode phases
//! - **Escalation**: channel selection, per-channel timeouts, anti-spam
//! - **Meta-governance**: advisory dampening when the system overreaches
//!
//! Every state change is anchored in the event ledger; critical ones are
//! also registered as governance blocks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    GovernanceKernel                      │
//! │                                                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │ RiskTracker  │  │   Threats    │──│  Escalation   │   │
//! │  └──────┬───────┘  └──────┬───────┘  └───────┬───────┘   │
//! │         │                 │                  │           │
//! │  ┌──────▼─────────────────▼──────────────────▼───────┐   │
//! │  │        EventLedger  /  BlockLedger                │   │
//! │  └───────────────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │ DecisionGate │  │ ProtocolGate │  │ Constitution  │   │
//! │  └──────────────┘  └──────────────┘  └───────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use guardian::{GovernanceConfig, GovernanceKernel, RiskUpdate};
//!
//! let kernel = GovernanceKernel::builder(GovernanceConfig::new("kernel-1"))
//!     .build()
//!     .await?;
//!
//! kernel.update_risk_state(RiskUpdate::new().risk(0.9)).await?;
//! let snapshot = kernel.derive_guardian_status().await?;
//! ```

pub mod config;
pub mod error;
pub mod escalation;
pub mod governor;
pub mod kernel;
pub mod risk;
pub mod threat;
pub mod types;

// Re-export main types
pub use config::{BootMode, EscalationConfig, GovernanceConfig, GuardianConfig, ThreatConfig};
pub use error::{GuardianError, Result};
pub use escalation::{channels_for, ConsoleSink, EscalationNotifier, HumanOpsSink, MockSink};
pub use governor::{assess, GovernanceAssessment};
pub use kernel::{GovernanceKernel, KernelBuilder, DEFAULT_SIGNER};
pub use risk::{classify, RiskStateTracker};
pub use threat::{ThreatAggregator, ThreatAnchoring};
pub use types::*;
