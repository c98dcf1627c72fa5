//! Core types for the constitution and its gates.
//!
//! With the `typescript` feature enabled, these types can be exported to
//! TypeScript using ts-rs for the presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// How strongly a rule binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RuleLevel {
    /// Can never be violated
    Absolute,
    /// Only with human review and a governance block
    Critical,
    /// May degrade actions
    Protective,
}

/// One rule of an article.
///
/// Rules are plain data; how each field is checked lives in
/// [`RuleCheck`](crate::gate::RuleCheck).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Rule {
    /// Unique identifier
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<RuleLevel>,
    /// Human-readable statement of the rule
    pub description: String,
    /// Actions explicitly forbidden
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbids_actions: Vec<String>,
    /// Targets explicitly forbidden (e.g. `user_harm`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbids_targets: Vec<String>,
    /// Urgency at or above which human review is mandatory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_urgency: Option<f64>,
    /// Urgency ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_urgency: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_human_review: bool,
    /// Protocols that must be active for high-urgency actions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_protocol: Vec<String>,
}

impl Rule {
    /// Create a rule with only an id and description.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            level: None,
            description: description.into(),
            forbids_actions: Vec::new(),
            forbids_targets: Vec::new(),
            min_urgency: None,
            max_urgency: None,
            requires_human_review: false,
            requires_protocol: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: RuleLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn forbidding_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forbids_actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn forbidding_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forbids_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_urgency(mut self, min: f64) -> Self {
        self.min_urgency = Some(min);
        self
    }

    pub fn with_max_urgency(mut self, max: f64) -> Self {
        self.max_urgency = Some(max);
        self
    }

    pub fn requiring_human_review(mut self) -> Self {
        self.requires_human_review = true;
        self
    }

    pub fn requiring_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires_protocol = protocols.into_iter().map(Into::into).collect();
        self
    }
}

/// A titled group of rules applying to one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Article {
    pub id: String,
    pub title: String,
    /// Applicability domain. `None` and `global` apply to every decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub rules: Vec<Rule>,
}

/// The versioned, signed rule document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Constitution {
    /// Unique identifier
    pub id: String,
    /// Semantic version
    pub version: String,
    pub created_at: DateTime<Utc>,
    /// Who signed the document
    pub signer: String,
    /// SHA256 over the canonical serialization of `articles`
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub articles: Vec<Article>,
}

impl Constitution {
    /// Total number of rules across all articles.
    pub fn rule_count(&self) -> usize {
        self.articles.iter().map(|a| a.rules.len()).sum()
    }
}

/// Scope of a proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum DecisionScope {
    Local,
    Global,
    /// Always requires human review, even when allowed
    Sovereign,
}

/// A proposed action submitted for constitutional review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Decision {
    pub action: String,
    /// In [0, 1]
    pub urgency: f64,
    pub scope: DecisionScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn new(action: impl Into<String>, urgency: f64, scope: DecisionScope) -> Self {
        Self {
            action: action.into(),
            urgency,
            scope,
            target: None,
            reason: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A single rule that a decision failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct RuleViolation {
    pub rule_id: String,
    pub allowed: bool,
    pub requires_human_review: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_protocol: Vec<String>,
}

/// Outcome of reviewing a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Verdict {
    pub allowed: bool,
    pub requires_human_review: bool,
    pub reason: String,
    pub violations: Vec<RuleViolation>,
}

/// Threat severity, ordered by weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Existential,
}

impl ThreatLevel {
    /// Severity weight (none=0 .. existential=4)
    pub fn weight(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Existential => 4,
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Existential => "existential",
        }
    }

    /// High or existential.
    pub fn is_severe(&self) -> bool {
        *self >= Self::High
    }
}

impl Default for ThreatLevel {
    fn default() -> Self {
        Self::None
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking for a sovereign protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    /// Automated guardian subsystem
    Guardian,
    /// Human operations council
    HumanOps,
    System,
}

impl Authority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guardian => "guardian",
            Self::HumanOps => "human_ops",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to arm a sovereign protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ProtocolTrigger {
    pub id: String,
    pub protocol_id: String,
    pub authority: Authority,
    pub threat_level: ThreatLevel,
    pub reason: String,
    /// Identity of the requester
    pub requested_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProtocolTrigger {
    pub fn new(protocol_id: impl Into<String>, authority: Authority, threat_level: ThreatLevel) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            protocol_id: protocol_id.into(),
            authority,
            threat_level,
            reason: String::new(),
            requested_by: authority.as_str().to_string(),
            target: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn requested_by(mut self, requester: impl Into<String>) -> Self {
        self.requested_by = requester.into();
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Outcome of a protocol gate check.
///
/// `allowed` authorizes arming the protocol, not executing it: the flags
/// still apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ProtocolDecision {
    pub protocol_id: String,
    pub allowed: bool,
    /// Whether human ops should be notified
    pub escalate: bool,
    pub reason: String,
    pub requires_human_review: bool,
    pub requires_on_chain_vote: bool,
    /// Sanitized legitimacy the decision was taken at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legitimacy_at_decision: Option<f64>,
    /// Irreversibility weight for downstream consumers (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethical_cost: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threat_level_ordering() {
        assert!(ThreatLevel::Existential > ThreatLevel::High);
        assert!(ThreatLevel::Medium > ThreatLevel::Low);
        assert_eq!(ThreatLevel::None.weight(), 0);
        assert_eq!(ThreatLevel::Existential.weight(), 4);
        assert!(ThreatLevel::High.is_severe());
        assert!(!ThreatLevel::Medium.is_severe());
    }

    #[test]
    fn test_rule_serialization_skips_unset_fields() {
        let rule = Rule::new("r-1", "no harm").forbidding_targets(["user_harm"]);
        let json = serde_json::to_value(&rule).unwrap();

        assert_eq!(json["forbids_targets"], serde_json::json!(["user_harm"]));
        assert!(json.get("max_urgency").is_none());
        assert!(json.get("requires_human_review").is_none());

        let back: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_authority_serialization() {
        assert_eq!(
            serde_json::to_value(Authority::HumanOps).unwrap(),
            serde_json::json!("human_ops")
        );
    }
}
