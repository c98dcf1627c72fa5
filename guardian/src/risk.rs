//! RiskStateTracker: risk state and hysteretic guardian status.
//!
//! Status derivation keeps a `high_risk_since` marker: risk must stay at or
//! above the escalate threshold for the minimum duration before the guardian
//! escalates. A chaotic mood escalates immediately.

use std::sync::Arc;
use std::time::Duration;

use audit_ledger::{AnchorPayload, AuditLevel, BlockDomain, BlockLedger, BlockPayload, EventLedger};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GuardianConfig;
use crate::error::{GuardianError, Result};
use crate::types::{GuardianSnapshot, GuardianStatus, Mood, RiskState, RiskUpdate, StateSample};

/// Ledger domain for guardian anchors.
const GUARDIAN_DOMAIN: &str = "guardians";

/// Pure status derivation.
///
/// `high_risk_since` is the start of the current uninterrupted stretch at
/// or above the escalate threshold, if any.
pub fn classify(
    state: &RiskState,
    high_risk_since: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &GuardianConfig,
    min_duration: Duration,
) -> GuardianStatus {
    if state.mood == Mood::Chaotic {
        return GuardianStatus::Escalated;
    }

    if state.risk >= config.escalate_threshold {
        let held = high_risk_since
            .map(|since| now.signed_duration_since(since))
            .and_then(|d| d.to_std().ok())
            .unwrap_or(Duration::ZERO);
        return if held >= min_duration {
            GuardianStatus::Escalated
        } else {
            GuardianStatus::Alert
        };
    }

    if state.risk >= config.alert_threshold || state.mood == Mood::Protective {
        GuardianStatus::Alert
    } else {
        GuardianStatus::Watching
    }
}

struct TrackerInner {
    state: RiskState,
    status: GuardianStatus,
    high_risk_since: Option<DateTime<Utc>>,
    last_change: DateTime<Utc>,
}

/// Single-writer holder of the risk state.
pub struct RiskStateTracker {
    config: GuardianConfig,
    min_duration: Duration,
    events: Arc<EventLedger>,
    blocks: Arc<BlockLedger>,
    inner: Mutex<TrackerInner>,
}

impl RiskStateTracker {
    /// Create a tracker with the configured minimum escalation duration.
    pub fn new(config: GuardianConfig, events: Arc<EventLedger>, blocks: Arc<BlockLedger>) -> Self {
        let min_duration = Duration::from_millis(config.min_escalation_duration_ms);
        Self::with_min_duration(config, min_duration, events, blocks)
    }

    /// Create a tracker with an explicit minimum escalation duration.
    pub fn with_min_duration(
        config: GuardianConfig,
        min_duration: Duration,
        events: Arc<EventLedger>,
        blocks: Arc<BlockLedger>,
    ) -> Self {
        let now = Utc::now();
        Self {
            config,
            min_duration,
            events,
            blocks,
            inner: Mutex::new(TrackerInner {
                state: RiskState {
                    last_update: now,
                    ..RiskState::default()
                },
                status: GuardianStatus::Idle,
                high_risk_since: None,
                last_change: now,
            }),
        }
    }

    /// Guardian ID.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Minimum time at high risk before escalation.
    pub fn min_duration(&self) -> Duration {
        self.min_duration
    }

    /// Merge an update into the state.
    pub async fn update(&self, update: RiskUpdate) -> Result<RiskState> {
        self.update_at(update, Utc::now()).await
    }

    /// Merge an update, stamping it with `now`.
    pub async fn update_at(&self, update: RiskUpdate, now: DateTime<Utc>) -> Result<RiskState> {
        let update = sanitize(update)?;

        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;

        if let Some(mood) = update.mood {
            state.mood = mood;
        }
        if let Some(risk) = update.risk {
            state.risk = risk;
        }
        if let Some(legitimacy) = update.legitimacy {
            state.legitimacy = legitimacy;
        }
        if let Some(coherence) = update.coherence {
            state.coherence = coherence;
        }
        if let Some(load) = update.load {
            state.load = load;
        }
        if let Some(protocols) = update.active_protocols {
            state.active_protocols = protocols;
        }
        state.last_update = now;

        let state = state.clone();

        if state.risk > self.config.high_risk_threshold {
            self.events
                .anchor(
                    AnchorPayload::new(
                        "cognition",
                        "high_risk_state",
                        AuditLevel::High,
                        serde_json::json!({
                            "guardian_id": self.config.id,
                            "mood": state.mood,
                            "risk": state.risk,
                            "legitimacy": state.legitimacy,
                            "active_protocols": state.active_protocols,
                        }),
                    )
                    .candidate(state.risk > self.config.high_risk_candidate_threshold),
                )
                .await?;
        }

        debug!(
            guardian_id = %self.config.id,
            mood = state.mood.as_str(),
            risk = state.risk,
            legitimacy = state.legitimacy,
            "Risk state updated"
        );

        Ok(state)
    }

    /// Add an armed protocol to the state.
    pub async fn arm_protocol(&self, protocol_id: &str) -> RiskState {
        let mut inner = self.inner.lock().await;
        if inner.state.active_protocols.insert(protocol_id.to_string()) {
            inner.state.last_update = Utc::now();
            info!(guardian_id = %self.config.id, protocol_id, "Protocol added to active set");
        }
        inner.state.clone()
    }

    /// Copy of the current state.
    pub async fn state(&self) -> RiskState {
        self.inner.lock().await.state.clone()
    }

    /// Last derived status, `idle` before the first derivation.
    pub async fn status(&self) -> GuardianStatus {
        self.inner.lock().await.status
    }

    /// Derive the guardian status now.
    pub async fn derive_status(&self) -> Result<GuardianSnapshot> {
        self.derive_status_at(Utc::now()).await
    }

    /// Derive the guardian status at `now`.
    ///
    /// Transitions anchor `guardian_status_changed`. Every derivation that
    /// ends in `escalated` anchors `guardian_escalation_required` and
    /// registers it as a block, so a silent consumer cannot miss it.
    pub async fn derive_status_at(&self, now: DateTime<Utc>) -> Result<GuardianSnapshot> {
        let mut inner = self.inner.lock().await;

        if inner.state.risk >= self.config.escalate_threshold {
            if inner.high_risk_since.is_none() {
                inner.high_risk_since = Some(now);
            }
        } else {
            inner.high_risk_since = None;
        }

        let status = classify(
            &inner.state,
            inner.high_risk_since,
            now,
            &self.config,
            self.min_duration,
        );
        let sample = StateSample {
            mood: inner.state.mood,
            risk: inner.state.risk,
            active_protocols: inner.state.active_protocols.clone(),
        };

        if status != inner.status {
            let previous = inner.status;
            inner.status = status;
            inner.last_change = now;

            info!(
                guardian_id = %self.config.id,
                previous = %previous,
                status = %status,
                risk = sample.risk,
                "Guardian status changed"
            );

            self.events
                .anchor(AnchorPayload::new(
                    GUARDIAN_DOMAIN,
                    "guardian_status_changed",
                    AuditLevel::High,
                    serde_json::json!({
                        "guardian_id": self.config.id,
                        "name": self.config.name,
                        "previous_status": previous,
                        "new_status": status,
                        "mood": sample.mood,
                        "risk": sample.risk,
                        "active_protocols": sample.active_protocols,
                    }),
                ))
                .await?;
        }

        if status == GuardianStatus::Escalated {
            warn!(
                guardian_id = %self.config.id,
                risk = sample.risk,
                mood = sample.mood.as_str(),
                "Guardian escalation required"
            );

            let anchor = self
                .events
                .anchor(
                    AnchorPayload::new(
                        GUARDIAN_DOMAIN,
                        "guardian_escalation_required",
                        AuditLevel::Critical,
                        serde_json::json!({
                            "guardian_id": self.config.id,
                            "name": self.config.name,
                            "mood": sample.mood,
                            "risk": sample.risk,
                            "active_protocols": sample.active_protocols,
                        }),
                    )
                    .candidate(true)
                    .with_subject(self.config.id.clone()),
                )
                .await?;

            self.blocks
                .append(BlockPayload::new(
                    BlockDomain::Guardians,
                    "guardian_escalation_required",
                    serde_json::json!({
                        "guardian_id": self.config.id,
                        "risk": sample.risk,
                        "mood": sample.mood,
                        "anchor_id": anchor.id,
                        "anchor_hash": anchor.hash,
                    }),
                ))
                .await?;
        }

        Ok(GuardianSnapshot {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            status,
            last_change: inner.last_change,
            sample,
        })
    }
}

/// Reject non-finite values and clamp the rest to [0, 1].
fn sanitize(mut update: RiskUpdate) -> Result<RiskUpdate> {
    for (name, value) in [
        ("risk", &mut update.risk),
        ("legitimacy", &mut update.legitimacy),
        ("coherence", &mut update.coherence),
        ("load", &mut update.load),
    ] {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(GuardianError::Validation(format!(
                    "{} must be a finite number, got {}",
                    name, v
                )));
            }
            *v = v.clamp(0.0, 1.0);
        }
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn tracker() -> (RiskStateTracker, Arc<EventLedger>, Arc<BlockLedger>) {
        let events = Arc::new(EventLedger::new());
        let blocks = Arc::new(BlockLedger::new());
        (
            RiskStateTracker::new(GuardianConfig::default(), events.clone(), blocks.clone()),
            events,
            blocks,
        )
    }

    #[tokio::test]
    async fn test_starts_idle_then_watching() {
        let (tracker, events, _) = tracker();
        assert_eq!(tracker.status().await, GuardianStatus::Idle);

        let snapshot = tracker.derive_status().await.unwrap();
        assert_eq!(snapshot.status, GuardianStatus::Watching);
        assert_eq!(events.by_type("guardian_status_changed", 10).await.len(), 1);

        // no transition, no new anchor
        tracker.derive_status().await.unwrap();
        assert_eq!(events.len().await, 1);
    }

    #[tokio::test]
    async fn test_escalation_waits_for_min_duration() {
        let (tracker, _, _) = tracker();
        let t0 = Utc::now();

        tracker.update_at(RiskUpdate::new().risk(0.9), t0).await.unwrap();

        let snapshot = tracker.derive_status_at(t0).await.unwrap();
        assert_eq!(snapshot.status, GuardianStatus::Alert);

        let snapshot = tracker
            .derive_status_at(t0 + ChronoDuration::milliseconds(19_999))
            .await
            .unwrap();
        assert_eq!(snapshot.status, GuardianStatus::Alert);

        let snapshot = tracker
            .derive_status_at(t0 + ChronoDuration::milliseconds(20_000))
            .await
            .unwrap();
        assert_eq!(snapshot.status, GuardianStatus::Escalated);
    }

    #[tokio::test]
    async fn test_dip_below_threshold_resets_window() {
        let (tracker, _, _) = tracker();
        let t0 = Utc::now();

        tracker.update_at(RiskUpdate::new().risk(0.9), t0).await.unwrap();
        tracker.derive_status_at(t0).await.unwrap();

        let t1 = t0 + ChronoDuration::seconds(15);
        tracker.update_at(RiskUpdate::new().risk(0.5), t1).await.unwrap();
        assert_eq!(tracker.derive_status_at(t1).await.unwrap().status, GuardianStatus::Watching);

        let t2 = t1 + ChronoDuration::seconds(1);
        tracker.update_at(RiskUpdate::new().risk(0.9), t2).await.unwrap();
        tracker.derive_status_at(t2).await.unwrap();

        let snapshot = tracker
            .derive_status_at(t0 + ChronoDuration::seconds(25))
            .await
            .unwrap();
        assert_eq!(snapshot.status, GuardianStatus::Alert);
    }

    #[tokio::test]
    async fn test_chaotic_mood_escalates_immediately() {
        let (tracker, _, blocks) = tracker();

        tracker
            .update(RiskUpdate::new().mood(Mood::Chaotic).risk(0.1))
            .await
            .unwrap();
        let snapshot = tracker.derive_status().await.unwrap();

        assert_eq!(snapshot.status, GuardianStatus::Escalated);
        assert_eq!(blocks.by_domain(BlockDomain::Guardians, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_protective_mood_is_alert() {
        let (tracker, _, _) = tracker();
        tracker
            .update(RiskUpdate::new().mood(Mood::Protective))
            .await
            .unwrap();
        assert_eq!(tracker.derive_status().await.unwrap().status, GuardianStatus::Alert);
    }

    #[tokio::test]
    async fn test_escalated_reanchors_every_tick() {
        let (tracker, events, blocks) = tracker();
        tracker.update(RiskUpdate::new().mood(Mood::Chaotic)).await.unwrap();

        for _ in 0..3 {
            tracker.derive_status().await.unwrap();
        }

        let required = events.by_type("guardian_escalation_required", 10).await;
        assert_eq!(required.len(), 3);
        assert!(required.iter().all(|a| a.level == AuditLevel::Critical && a.candidate_for_ledger));
        assert_eq!(events.by_type("guardian_status_changed", 10).await.len(), 1);
        assert_eq!(blocks.len().await, 3);
    }

    #[tokio::test]
    async fn test_update_clamps_and_rejects_nan() {
        let (tracker, _, _) = tracker();

        let state = tracker
            .update(RiskUpdate::new().risk(1.4).legitimacy(-0.2))
            .await
            .unwrap();
        assert_eq!(state.risk, 1.0);
        assert_eq!(state.legitimacy, 0.0);

        let err = tracker.update(RiskUpdate::new().risk(f64::NAN)).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(tracker.state().await.risk, 1.0);
    }

    #[tokio::test]
    async fn test_high_risk_updates_are_anchored() {
        let (tracker, events, _) = tracker();

        tracker.update(RiskUpdate::new().risk(0.5)).await.unwrap();
        assert!(events.is_empty().await);

        tracker.update(RiskUpdate::new().risk(0.8)).await.unwrap();
        tracker.update(RiskUpdate::new().risk(0.95)).await.unwrap();

        let anchors = events.by_type("high_risk_state", 10).await;
        assert_eq!(anchors.len(), 2);
        assert!(!anchors[0].candidate_for_ledger);
        assert!(anchors[1].candidate_for_ledger);
    }

    #[test]
    fn test_classify_is_pure() {
        let config = GuardianConfig::default();
        let now = Utc::now();
        let state = RiskState {
            risk: 0.9,
            ..RiskState::default()
        };

        let min = Duration::from_secs(20);
        assert_eq!(classify(&state, None, now, &config, min), GuardianStatus::Alert);
        assert_eq!(
            classify(&state, Some(now - ChronoDuration::seconds(20)), now, &config, min),
            GuardianStatus::Escalated
        );
    }
}
