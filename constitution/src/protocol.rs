//! ProtocolGate: the checkpoint for irreversible sovereign protocols.
//!
//! Checks run in a fixed order and the first failure wins:
//! authority, minimum threat level, minimum legitimacy. Passing the gate
//! authorizes arming a protocol; the review and vote flags still apply.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConstitutionError, Result};
use crate::store::ConstitutionStore;
use crate::types::{Authority, ProtocolDecision, ProtocolTrigger, ThreatLevel};

/// Containment protocol.
pub const PROTOCOL_BLACK_HOLE: &str = "protocolo-hoyo-negro";
/// Resurrection protocol.
pub const PROTOCOL_PHOENIX: &str = "protocolo-fenix";

/// Thresholds for one sovereign protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRule {
    pub id: String,
    /// Minimum legitimacy to arm (0.0-1.0)
    pub min_legitimacy: f64,
    /// Stricter minimum applied under existential threat
    pub min_legitimacy_existential: Option<f64>,
    pub allowed_authorities: Vec<Authority>,
    pub min_threat_level: ThreatLevel,
    pub requires_human_review: bool,
    pub requires_on_chain_vote: bool,
    /// Irreversibility weight reported on approval
    pub ethical_cost: f64,
    /// Audit note quoted in approvals
    pub doctrine_note: String,
}

impl ProtocolRule {
    /// Legitimacy required at a given threat level.
    pub fn required_legitimacy(&self, threat_level: ThreatLevel) -> f64 {
        match (threat_level, self.min_legitimacy_existential) {
            (ThreatLevel::Existential, Some(strict)) => strict,
            _ => self.min_legitimacy,
        }
    }

    fn deny(&self, reason: String, legitimacy: Option<f64>) -> ProtocolDecision {
        ProtocolDecision {
            protocol_id: self.id.clone(),
            allowed: false,
            escalate: true,
            reason,
            requires_human_review: self.requires_human_review,
            requires_on_chain_vote: self.requires_on_chain_vote,
            legitimacy_at_decision: legitimacy,
            ethical_cost: None,
        }
    }
}

/// The two canonical protocols.
pub fn canonical_rules() -> Vec<ProtocolRule> {
    vec![
        ProtocolRule {
            id: PROTOCOL_BLACK_HOLE.to_string(),
            min_legitimacy: 0.6,
            min_legitimacy_existential: Some(0.75),
            allowed_authorities: vec![Authority::Guardian, Authority::HumanOps],
            min_threat_level: ThreatLevel::High,
            requires_human_review: true,
            requires_on_chain_vote: false,
            ethical_cost: 0.6,
            doctrine_note: "Extreme but reversible containment; never armed with low legitimacy"
                .to_string(),
        },
        ProtocolRule {
            id: PROTOCOL_PHOENIX.to_string(),
            min_legitimacy: 0.8,
            min_legitimacy_existential: Some(0.9),
            allowed_authorities: vec![Authority::HumanOps],
            min_threat_level: ThreatLevel::Existential,
            requires_human_review: true,
            requires_on_chain_vote: true,
            ethical_cost: 0.9,
            doctrine_note: "Civilizational restart; only under existential threat and near-total legitimacy"
                .to_string(),
        },
    ]
}

/// Gate for sovereign protocol triggers.
#[derive(Clone)]
pub struct ProtocolGate {
    rules: Arc<HashMap<String, ProtocolRule>>,
    store: Arc<ConstitutionStore>,
}

impl ProtocolGate {
    /// Create a gate with the canonical protocol rules.
    pub fn new(store: Arc<ConstitutionStore>) -> Self {
        Self::with_rules(store, canonical_rules())
    }

    /// Create a gate with a custom rule table.
    pub fn with_rules(store: Arc<ConstitutionStore>, rules: Vec<ProtocolRule>) -> Self {
        Self {
            rules: Arc::new(rules.into_iter().map(|r| (r.id.clone(), r)).collect()),
            store,
        }
    }

    /// Rule for a protocol id.
    pub fn rule(&self, protocol_id: &str) -> Option<&ProtocolRule> {
        self.rules.get(protocol_id)
    }

    /// Decide whether a trigger may arm its protocol.
    ///
    /// Refuses to decide while the constitution store is failed or empty.
    pub async fn decide(&self, trigger: &ProtocolTrigger, legitimacy: f64) -> Result<ProtocolDecision> {
        self.store.current().await?;
        self.evaluate(trigger, legitimacy)
    }

    /// The pure decision procedure.
    pub fn evaluate(&self, trigger: &ProtocolTrigger, legitimacy: f64) -> Result<ProtocolDecision> {
        if !legitimacy.is_finite() {
            warn!(
                protocol_id = %trigger.protocol_id,
                trigger_id = %trigger.id,
                "Rejecting protocol trigger with non-finite legitimacy"
            );
            return Ok(ProtocolDecision {
                protocol_id: trigger.protocol_id.clone(),
                allowed: false,
                escalate: true,
                reason: "Invalid legitimacy (NaN or infinite)".to_string(),
                requires_human_review: true,
                requires_on_chain_vote: true,
                legitimacy_at_decision: None,
                ethical_cost: None,
            });
        }

        let rule = self
            .rules
            .get(&trigger.protocol_id)
            .ok_or_else(|| ConstitutionError::UnknownProtocol(trigger.protocol_id.clone()))?;

        let legitimacy = legitimacy.clamp(0.0, 1.0);

        let decision = if !rule.allowed_authorities.contains(&trigger.authority) {
            rule.deny(
                format!(
                    "Authority {} is not authorized for {}",
                    trigger.authority, trigger.protocol_id
                ),
                None,
            )
        } else if trigger.threat_level < rule.min_threat_level {
            rule.deny(
                format!(
                    "Threat level {} is insufficient for {}; at least {} is required",
                    trigger.threat_level, trigger.protocol_id, rule.min_threat_level
                ),
                None,
            )
        } else if legitimacy < rule.required_legitimacy(trigger.threat_level) {
            rule.deny(
                format!(
                    "Legitimacy {:.2} is below the required minimum {:.2} for {}",
                    legitimacy,
                    rule.required_legitimacy(trigger.threat_level),
                    trigger.protocol_id
                ),
                Some(legitimacy),
            )
        } else {
            ProtocolDecision {
                protocol_id: rule.id.clone(),
                allowed: true,
                escalate: false,
                reason: format!("Authorized by the constitution ({})", rule.doctrine_note),
                requires_human_review: rule.requires_human_review,
                requires_on_chain_vote: rule.requires_on_chain_vote,
                legitimacy_at_decision: Some(legitimacy),
                ethical_cost: Some(rule.ethical_cost),
            }
        };

        if decision.allowed {
            info!(
                protocol_id = %decision.protocol_id,
                authority = %trigger.authority,
                legitimacy = legitimacy,
                "Protocol armed"
            );
        } else {
            warn!(
                protocol_id = %decision.protocol_id,
                authority = %trigger.authority,
                reason = %decision.reason,
                "Protocol trigger denied"
            );
        }

        Ok(decision)
    }
}
