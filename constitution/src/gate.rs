//! DecisionGate: reviews a proposed action against the constitution.
//!
//! Evaluation is a pure function of `(Constitution, Decision)`. The gate
//! itself only adds the fail-closed lookup of the active document.

use std::sync::Arc;

use tracing::debug;

use crate::error::{ConstitutionError, Result};
use crate::store::ConstitutionStore;
use crate::types::{Article, Constitution, Decision, DecisionScope, Rule, RuleViolation, Verdict};

/// Urgency above which a protocol-requiring rule blocks when it sets no
/// ceiling of its own.
pub const DEFAULT_PROTOCOL_URGENCY: f64 = 0.9;

/// The checks derived from one rule, in fixed precedence order.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleCheck<'a> {
    /// The action is explicitly forbidden
    ForbidsAction(&'a [String]),
    /// Urgency must not exceed the ceiling
    UrgencyCeiling(f64),
    /// Urgency at or above the floor needs human review
    UrgencyFloorWithReview(f64),
    /// The target is explicitly forbidden
    ForbidsTarget(&'a [String]),
    /// Urgency above the threshold needs one of the protocols
    RequiresProtocolAboveUrgency {
        protocols: &'a [String],
        threshold: f64,
    },
}

impl<'a> RuleCheck<'a> {
    /// Derive the applicable checks of a rule, in precedence order.
    pub fn for_rule(rule: &'a Rule) -> Vec<RuleCheck<'a>> {
        let mut checks = Vec::with_capacity(5);

        if !rule.forbids_actions.is_empty() {
            checks.push(Self::ForbidsAction(&rule.forbids_actions));
        }
        if let Some(max) = rule.max_urgency {
            checks.push(Self::UrgencyCeiling(max));
        }
        if let (Some(min), true) = (rule.min_urgency, rule.requires_human_review) {
            checks.push(Self::UrgencyFloorWithReview(min));
        }
        if !rule.forbids_targets.is_empty() {
            checks.push(Self::ForbidsTarget(&rule.forbids_targets));
        }
        if !rule.requires_protocol.is_empty() && rule.requires_human_review {
            checks.push(Self::RequiresProtocolAboveUrgency {
                protocols: &rule.requires_protocol,
                threshold: rule.max_urgency.unwrap_or(DEFAULT_PROTOCOL_URGENCY),
            });
        }

        checks
    }

    /// Evaluate this check. `None` means the decision passes it.
    pub fn evaluate(&self, rule: &Rule, decision: &Decision) -> Option<RuleViolation> {
        let violation = |requires_human_review: bool, reason: String| RuleViolation {
            rule_id: rule.id.clone(),
            allowed: false,
            requires_human_review,
            reason,
            requires_protocol: Vec::new(),
        };

        match *self {
            Self::ForbidsAction(actions) => actions
                .iter()
                .any(|a| *a == decision.action)
                .then(|| {
                    violation(
                        rule.requires_human_review,
                        format!("Action {} is forbidden by rule {}", decision.action, rule.id),
                    )
                }),
            Self::UrgencyCeiling(max) => (decision.urgency > max).then(|| {
                violation(
                    rule.requires_human_review,
                    format!("Urgency {} exceeds the maximum of {}", decision.urgency, max),
                )
            }),
            Self::UrgencyFloorWithReview(min) => (decision.urgency >= min).then(|| {
                violation(
                    true,
                    format!(
                        "Urgency {} at or above {} requires human review before execution",
                        decision.urgency, min
                    ),
                )
            }),
            Self::ForbidsTarget(targets) => {
                // a missing target matches a rule forbidding the empty target
                let target = decision.target.as_deref().unwrap_or("");
                targets.iter().any(|t| t == target).then(|| {
                    violation(
                        rule.requires_human_review,
                        format!("Target {} is forbidden by rule {}", target, rule.id),
                    )
                })
            }
            Self::RequiresProtocolAboveUrgency {
                protocols,
                threshold,
            } => (decision.urgency > threshold).then(|| RuleViolation {
                requires_protocol: protocols.to_vec(),
                ..violation(
                    true,
                    format!(
                        "High-urgency action without an active protocol or human review (needs one of: {})",
                        protocols.join(", ")
                    ),
                )
            }),
        }
    }
}

/// Whether an article applies to a decision.
pub fn article_applies(article: &Article, decision: &Decision) -> bool {
    match article.domain.as_deref() {
        None | Some("global") => true,
        Some("cognition") => decision.scope == DecisionScope::Sovereign,
        Some("security") => decision.action.starts_with("activate_protocol_"),
        Some("economy") => decision.action.starts_with("economic_"),
        Some(_) => false,
    }
}

/// Evaluate one rule: the first failing check wins.
pub fn evaluate_rule(rule: &Rule, decision: &Decision) -> Option<RuleViolation> {
    RuleCheck::for_rule(rule)
        .iter()
        .find_map(|check| check.evaluate(rule, decision))
}

/// Reject malformed decisions before any rule is looked at.
pub fn validate_decision(decision: &Decision) -> Result<()> {
    if decision.action.trim().is_empty() {
        return Err(ConstitutionError::Validation(
            "decision action must not be empty".to_string(),
        ));
    }
    if !decision.urgency.is_finite() || !(0.0..=1.0).contains(&decision.urgency) {
        return Err(ConstitutionError::Validation(format!(
            "decision urgency must be within [0, 1], got {}",
            decision.urgency
        )));
    }
    Ok(())
}

/// Review a decision against a constitution.
pub fn evaluate_against(constitution: &Constitution, decision: &Decision) -> Result<Verdict> {
    validate_decision(decision)?;

    let violations: Vec<RuleViolation> = constitution
        .articles
        .iter()
        .filter(|article| article_applies(article, decision))
        .flat_map(|article| article.rules.iter())
        .filter_map(|rule| evaluate_rule(rule, decision))
        .collect();

    let sovereign = decision.scope == DecisionScope::Sovereign;

    if violations.is_empty() {
        return Ok(Verdict {
            allowed: true,
            requires_human_review: sovereign,
            reason: if sovereign {
                "Compatible with the constitution; sovereign scope requires human review".to_string()
            } else {
                "Compatible with the constitution".to_string()
            },
            violations,
        });
    }

    let requires_human_review = sovereign || violations.iter().any(|v| v.requires_human_review);

    Ok(Verdict {
        allowed: false,
        requires_human_review,
        reason: format!("{} constitutional rule(s) would be violated", violations.len()),
        violations,
    })
}

/// Gate reading the active constitution from a store.
#[derive(Clone)]
pub struct DecisionGate {
    store: Arc<ConstitutionStore>,
}

impl DecisionGate {
    pub fn new(store: Arc<ConstitutionStore>) -> Self {
        Self { store }
    }

    /// Review a decision.
    ///
    /// Refuses to evaluate when the store is failed or empty.
    pub async fn evaluate(&self, decision: &Decision) -> Result<Verdict> {
        let constitution = self.store.current().await?;
        let verdict = evaluate_against(&constitution, decision)?;

        debug!(
            action = %decision.action,
            allowed = verdict.allowed,
            violations = verdict.violations.len(),
            "Decision evaluated"
        );

        Ok(verdict)
    }
}
