//! Configuration for a governance kernel.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use audit_ledger::LedgerConfig;

/// Kernel operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    Normal,
    /// Restart after an incident; the constitution is published as a rollback
    Safe,
    /// Shortened escalation windows for drills and testing
    Diagnostic,
}

impl BootMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Safe => "safe",
            Self::Diagnostic => "diagnostic",
        }
    }
}

impl Default for BootMode {
    fn default() -> Self {
        Self::Normal
    }
}

/// Configuration for a governance kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Kernel ID
    pub kernel_id: String,
    /// Operating mode
    pub mode: BootMode,
    /// Actor recorded on bootstrap anchors
    pub actor: String,
    /// Reason recorded on bootstrap anchors, defaulted per mode
    pub boot_reason: Option<String>,
    /// Guardian status configuration
    pub guardian: GuardianConfig,
    /// Threat aggregation configuration
    pub threat: ThreatConfig,
    /// Human-ops escalation configuration
    pub escalation: EscalationConfig,
    /// Ledger namespaces
    pub ledger: LedgerConfig,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            kernel_id: uuid::Uuid::new_v4().to_string(),
            mode: BootMode::Normal,
            actor: "bootstrap".to_string(),
            boot_reason: None,
            guardian: GuardianConfig::default(),
            threat: ThreatConfig::default(),
            escalation: EscalationConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl GovernanceConfig {
    /// Create a new config with kernel ID.
    pub fn new(kernel_id: impl Into<String>) -> Self {
        Self {
            kernel_id: kernel_id.into(),
            ..Default::default()
        }
    }

    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Minimum time at high risk before escalation, for the configured mode.
    pub fn min_escalation_duration(&self) -> Duration {
        match self.mode {
            BootMode::Diagnostic => {
                Duration::from_millis(self.guardian.diagnostic_min_escalation_duration_ms)
            }
            _ => Duration::from_millis(self.guardian.min_escalation_duration_ms),
        }
    }

    /// Reason recorded at bootstrap.
    pub fn boot_reason(&self) -> String {
        match (&self.boot_reason, self.mode) {
            (Some(reason), _) => reason.clone(),
            (None, BootMode::Safe) => "Safe-mode restart after an incident".to_string(),
            (None, BootMode::Diagnostic) => "Diagnostic kernel start".to_string(),
            (None, BootMode::Normal) => "Normal kernel start".to_string(),
        }
    }

    /// Reject thresholds that cannot work.
    pub fn validate(&self) -> Result<(), String> {
        let g = &self.guardian;
        for (name, value) in [
            ("alert_threshold", g.alert_threshold),
            ("escalate_threshold", g.escalate_threshold),
            ("high_risk_threshold", g.high_risk_threshold),
            ("high_risk_candidate_threshold", g.high_risk_candidate_threshold),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(format!("guardian.{} must be within [0, 1], got {}", name, value));
            }
        }
        if g.alert_threshold > g.escalate_threshold {
            return Err(format!(
                "guardian.alert_threshold ({}) must not exceed escalate_threshold ({})",
                g.alert_threshold, g.escalate_threshold
            ));
        }
        if self.threat.level_window_ms == 0 {
            return Err("threat.level_window_ms must be positive".to_string());
        }
        if self.escalation.channel_timeout_ms == 0 {
            return Err("escalation.channel_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// Guardian status configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// Guardian ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Risk at or above which status is at least `alert`
    pub alert_threshold: f64,
    /// Risk at or above which escalation starts counting
    pub escalate_threshold: f64,
    /// Time at high risk before escalation (ms)
    pub min_escalation_duration_ms: u64,
    /// Same, in diagnostic mode (ms)
    pub diagnostic_min_escalation_duration_ms: u64,
    /// Risk above which updates are anchored as `high_risk_state`
    pub high_risk_threshold: f64,
    /// Risk above which those anchors are ledger candidates
    pub high_risk_candidate_threshold: f64,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            id: "guardian-main".to_string(),
            name: "Main Guardian".to_string(),
            alert_threshold: 0.6,
            escalate_threshold: 0.85,
            min_escalation_duration_ms: 20_000, // 20s
            diagnostic_min_escalation_duration_ms: 5_000,
            high_risk_threshold: 0.7,
            high_risk_candidate_threshold: 0.9,
        }
    }
}

/// Threat aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// How long a signal counts towards its domain's level (ms)
    pub level_window_ms: u64,
    /// Time below `high` before critical turns into recovery (ms)
    pub recovery_window_ms: u64,
    /// Time at `none` before recovery turns stable (ms)
    pub stabilize_window_ms: u64,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            level_window_ms: 15 * 60 * 1000, // 15 minutes
            recovery_window_ms: 5 * 60 * 1000,
            stabilize_window_ms: 10 * 60 * 1000,
        }
    }
}

impl ThreatConfig {
    pub fn level_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.level_window_ms as i64)
    }

    pub fn recovery_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.recovery_window_ms as i64)
    }

    pub fn stabilize_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.stabilize_window_ms as i64)
    }
}

/// Human-ops escalation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Minimum interval between notifications at the same level (ms)
    pub min_interval_ms: u64,
    /// Timeout for a single channel attempt (ms)
    pub channel_timeout_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 60_000,
            channel_timeout_ms: 5_000,
        }
    }
}

impl EscalationConfig {
    pub fn min_interval(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.min_interval_ms as i64)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}
