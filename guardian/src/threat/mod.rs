//! Threat aggregation
//!
//! Signals from guardians, radars and operators are folded into a single
//! [`ThreatContext`](crate::types::ThreatContext): a per-domain matrix over
//! a rolling window, counters, and the phase of the current episode.
//!
//! ```text
//! stable -> degrading -> critical -> recovery -> stable
//!              |  ^                     |
//!              +--+ (below medium)      +-> critical (new high signal)
//! ```

pub mod aggregator;
pub mod anchoring;

pub use aggregator::{suggested_protocol, ThreatAggregator};
pub use anchoring::{EpisodeRecord, SignalRecord, ThreatAnchoring};
