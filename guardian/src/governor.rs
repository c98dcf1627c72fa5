//! Meta-governance: advisory dampening over the risk state.

use serde::{Deserialize, Serialize};

use crate::types::RiskState;

/// Active protocols at which pressure saturates.
const PROTOCOL_SATURATION: f64 = 5.0;
/// Pending irreversible actions at which overreaction risk saturates.
const PENDING_SATURATION: f64 = 3.0;

const MIN_LEGITIMACY: f64 = 0.7;
const MAX_PROTOCOL_PRESSURE: f64 = 0.6;
const MAX_OVERREACTION_RISK: f64 = 0.5;

/// Outcome of a meta-governance assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceAssessment {
    pub legitimacy: f64,
    /// Share of the protocol budget in use (0.0-1.0)
    pub protocol_pressure: f64,
    /// Pending irreversible actions relative to the tolerated maximum (0.0-1.0)
    pub overreaction_risk: f64,
    /// Whether callers should hold back further escalation
    pub should_dampen: bool,
}

/// Assess whether the system is overreaching. Advisory only.
pub fn assess(state: &RiskState, pending_irreversible: usize) -> GovernanceAssessment {
    let protocol_pressure = (state.active_protocols.len() as f64 / PROTOCOL_SATURATION).min(1.0);
    let overreaction_risk = (pending_irreversible as f64 / PENDING_SATURATION).min(1.0);
    let legitimacy = state.legitimacy;

    GovernanceAssessment {
        legitimacy,
        protocol_pressure,
        overreaction_risk,
        should_dampen: legitimacy < MIN_LEGITIMACY
            || protocol_pressure > MAX_PROTOCOL_PRESSURE
            || overreaction_risk > MAX_OVERREACTION_RISK,
    }
}
