//! Core types for the guardian runtime.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use constitution::ThreatLevel;

/// Mood of the governing system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Calm,
    Alert,
    /// Forces at least `alert`
    Protective,
    /// Escalates immediately, regardless of duration
    Chaotic,
    Reflective,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calm => "calm",
            Self::Alert => "alert",
            Self::Protective => "protective",
            Self::Chaotic => "chaotic",
            Self::Reflective => "reflective",
        }
    }
}

impl Default for Mood {
    fn default() -> Self {
        Self::Calm
    }
}

/// Current cognitive and risk state.
///
/// Only mutated through [`RiskStateTracker::update`](crate::risk::RiskStateTracker::update).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub mood: Mood,
    /// Perceived risk (0.0-1.0)
    pub risk: f64,
    /// Authority to act without broader ratification (0.0-1.0)
    pub legitimacy: f64,
    /// Internal consistency (0.0-1.0)
    pub coherence: f64,
    /// Operational load (0.0-1.0)
    pub load: f64,
    /// Sovereign protocols currently armed
    pub active_protocols: BTreeSet<String>,
    pub last_update: DateTime<Utc>,
}

impl Default for RiskState {
    fn default() -> Self {
        Self {
            mood: Mood::Calm,
            risk: 0.0,
            legitimacy: 1.0,
            coherence: 1.0,
            load: 0.0,
            active_protocols: BTreeSet::new(),
            last_update: Utc::now(),
        }
    }
}

/// Partial update merged into [`RiskState`]. Unset fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<Mood>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legitimacy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_protocols: Option<BTreeSet<String>>,
}

impl RiskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mood(mut self, mood: Mood) -> Self {
        self.mood = Some(mood);
        self
    }

    pub fn risk(mut self, risk: f64) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn legitimacy(mut self, legitimacy: f64) -> Self {
        self.legitimacy = Some(legitimacy);
        self
    }

    pub fn coherence(mut self, coherence: f64) -> Self {
        self.coherence = Some(coherence);
        self
    }

    pub fn load(mut self, load: f64) -> Self {
        self.load = Some(load);
        self
    }

    pub fn active_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_protocols = Some(protocols.into_iter().map(Into::into).collect());
        self
    }
}

/// Guardian alert status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardianStatus {
    /// Not yet evaluated
    Idle,
    Watching,
    Alert,
    Escalated,
}

impl GuardianStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Alert => "alert",
            Self::Escalated => "escalated",
        }
    }
}

impl std::fmt::Display for GuardianStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state values a status was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSample {
    pub mood: Mood,
    pub risk: f64,
    pub active_protocols: BTreeSet<String>,
}

/// Result of a status derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianSnapshot {
    /// Guardian identifier
    pub id: String,
    pub name: String,
    pub status: GuardianStatus,
    /// When the status last changed
    pub last_change: DateTime<Utc>,
    pub sample: StateSample,
}

/// Subsystem a threat signal concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatDomain {
    Security,
    Infrastructure,
    Economy,
    Identity,
    Governance,
    Xr,
    Unknown,
}

/// Who reported a threat signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatSource {
    Guardian,
    Radar,
    HumanOps,
    System,
    External,
}

/// One discrete threat observation. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatSignal {
    pub id: String,
    pub level: ThreatLevel,
    pub domain: ThreatDomain,
    pub source: ThreatSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Id of the detecting guardian, radar or operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_by: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Continuous severity for finer calculations (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_score: Option<f64>,
}

impl ThreatSignal {
    pub fn new(level: ThreatLevel, domain: ThreatDomain, source: ThreatSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            level,
            domain,
            source,
            description: None,
            detected_by: None,
            timestamp: Utc::now(),
            tags: BTreeSet::new(),
            severity_score: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn detected_by(mut self, detector: impl Into<String>) -> Self {
        self.detected_by = Some(detector.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_severity_score(mut self, score: f64) -> Self {
        self.severity_score = Some(score);
        self
    }
}

/// Lifecycle phase of a threat episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatPhase {
    Stable,
    Degrading,
    Critical,
    Recovery,
}

impl ThreatPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Degrading => "degrading",
            Self::Critical => "critical",
            Self::Recovery => "recovery",
        }
    }
}

impl std::fmt::Display for ThreatPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated view by domain and by source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatMatrix {
    /// Highest level per domain inside the level window
    pub by_domain: BTreeMap<ThreatDomain, ThreatLevel>,
    /// Accumulated severity weight per source
    pub by_source: BTreeMap<ThreatSource, u64>,
}

/// Signal counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatMetrics {
    pub total_signals: u64,
    pub by_level: BTreeMap<ThreatLevel, u64>,
    pub last_1h: u64,
    pub last_24h: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_high_or_above: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_existential: Option<DateTime<Utc>>,
}

/// Aggregated threat context owned by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatContext {
    pub current_level: ThreatLevel,
    /// Never decreases for the lifetime of the context
    pub highest_level_seen: ThreatLevel,
    pub phase: ThreatPhase,
    pub matrix: ThreatMatrix,
    pub metrics: ThreatMetrics,
    /// Advisory only; activation is always re-checked by the protocol gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_protocol: Option<String>,
    pub escalation_required: bool,
    pub human_ops_notified: bool,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_signal: Option<ThreatSignal>,
    pub anchored_in_event_ledger: bool,
    pub anchored_in_block_ledger: bool,
}

impl Default for ThreatContext {
    fn default() -> Self {
        Self {
            current_level: ThreatLevel::None,
            highest_level_seen: ThreatLevel::None,
            phase: ThreatPhase::Stable,
            matrix: ThreatMatrix::default(),
            metrics: ThreatMetrics::default(),
            suggested_protocol: None,
            escalation_required: false,
            human_ops_notified: false,
            last_update: Utc::now(),
            last_signal: None,
            anchored_in_event_ledger: false,
            anchored_in_block_ledger: false,
        }
    }
}

/// Human-ops notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Console,
    Webhook,
    Pager,
    Chat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Webhook => "webhook",
            Self::Pager => "pager",
            Self::Chat => "chat",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a human-ops sink reports for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotifyOutcome {
    pub fn ok() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// One channel attempt made by the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub channel: Channel,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timed_out: bool,
}

/// Outcome of an escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationResult {
    pub ok: bool,
    /// Last channel attempted
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Level the notification was sent for
    pub level: ThreatLevel,
    /// Every attempt, in order
    pub attempts: Vec<NotificationAttempt>,
    pub at: DateTime<Utc>,
}
