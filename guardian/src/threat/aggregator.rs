//! ThreatAggregator: rolling threat matrix, metrics and episode phase.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use constitution::{PROTOCOL_BLACK_HOLE, PROTOCOL_PHOENIX};

use crate::config::ThreatConfig;
use crate::error::{GuardianError, Result};
use crate::types::{ThreatContext, ThreatLevel, ThreatPhase, ThreatSignal};

use super::anchoring::ThreatAnchoring;

/// How long signals are kept for the rolling metrics.
const RETENTION_HOURS: i64 = 24;

/// Advisory protocol for a level. The protocol gate still decides.
pub fn suggested_protocol(level: ThreatLevel) -> Option<&'static str> {
    match level {
        ThreatLevel::Existential => Some(PROTOCOL_PHOENIX),
        ThreatLevel::High => Some(PROTOCOL_BLACK_HOLE),
        _ => None,
    }
}

/// Next phase for a single step, or the same phase if nothing applies.
///
/// `below_high_at` is when the level last dropped under `high`;
/// `none_at` is when it last dropped to `none`.
fn step_phase(
    phase: ThreatPhase,
    current: ThreatLevel,
    below_high_at: Option<DateTime<Utc>>,
    none_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &ThreatConfig,
) -> ThreatPhase {
    let sustained = |since: Option<DateTime<Utc>>, window: Duration| match since {
        Some(since) => now >= since + window,
        None => true,
    };

    match phase {
        ThreatPhase::Stable if current >= ThreatLevel::Medium => ThreatPhase::Degrading,
        ThreatPhase::Degrading if current >= ThreatLevel::High => ThreatPhase::Critical,
        ThreatPhase::Degrading if current < ThreatLevel::Medium => ThreatPhase::Stable,
        ThreatPhase::Critical
            if current < ThreatLevel::High
                && sustained(below_high_at, config.recovery_window()) =>
        {
            ThreatPhase::Recovery
        }
        ThreatPhase::Recovery if current >= ThreatLevel::High => ThreatPhase::Critical,
        ThreatPhase::Recovery
            if current == ThreatLevel::None
                && sustained(none_at, config.stabilize_window()) =>
        {
            ThreatPhase::Stable
        }
        phase => phase,
    }
}

struct AggregatorState {
    context: ThreatContext,
    /// Signals inside the retention window, oldest first
    signals: VecDeque<ThreatSignal>,
    /// Timestamp of the most recent signal above `none`
    last_active: Option<DateTime<Utc>>,
}

impl AggregatorState {
    fn new() -> Self {
        Self {
            context: ThreatContext::default(),
            signals: VecDeque::new(),
            last_active: None,
        }
    }

    fn record(&mut self, signal: ThreatSignal) {
        let ts = signal.timestamp;
        let metrics = &mut self.context.metrics;

        metrics.total_signals += 1;
        *metrics.by_level.entry(signal.level).or_insert(0) += 1;
        if signal.level.is_severe() {
            metrics.last_high_or_above = metrics.last_high_or_above.max(Some(ts));
        }
        if signal.level == ThreatLevel::Existential {
            metrics.last_existential = metrics.last_existential.max(Some(ts));
        }
        if signal.level > ThreatLevel::None {
            self.last_active = self.last_active.max(Some(ts));
        }

        *self
            .context
            .matrix
            .by_source
            .entry(signal.source)
            .or_insert(0) += u64::from(signal.level.weight());

        // keep the deque ordered by timestamp; late signals are rare
        let pos = self
            .signals
            .iter()
            .rposition(|s| s.timestamp <= ts)
            .map_or(0, |i| i + 1);
        self.signals.insert(pos, signal.clone());
        self.context.last_signal = Some(signal);
    }

    /// Recompute windows and phase at `now`. Returns the previous phase if it
    /// changed.
    fn recompute(&mut self, now: DateTime<Utc>, config: &ThreatConfig) -> Option<ThreatPhase> {
        let retention = now - Duration::hours(RETENTION_HOURS);
        while self.signals.front().is_some_and(|s| s.timestamp < retention) {
            self.signals.pop_front();
        }

        let window_start = now - config.level_window();
        let hour_start = now - Duration::hours(1);
        let mut by_domain = BTreeMap::new();
        let mut last_1h = 0;
        for signal in &self.signals {
            if signal.timestamp >= window_start {
                let level = by_domain.entry(signal.domain).or_insert(ThreatLevel::None);
                *level = (*level).max(signal.level);
            }
            if signal.timestamp >= hour_start {
                last_1h += 1;
            }
        }

        let context = &mut self.context;
        let current = by_domain.values().copied().max().unwrap_or(ThreatLevel::None);
        context.matrix.by_domain = by_domain;
        context.metrics.last_1h = last_1h;
        context.metrics.last_24h = self.signals.len() as u64;
        context.current_level = current;
        context.highest_level_seen = context.highest_level_seen.max(current);

        let below_high_at = context
            .metrics
            .last_high_or_above
            .map(|ts| ts + config.level_window());
        let none_at = self.last_active.map(|ts| ts + config.level_window());

        let previous = context.phase;
        let mut phase = previous;
        loop {
            let next = step_phase(phase, current, below_high_at, none_at, now, config);
            if next == phase {
                break;
            }
            phase = next;
        }
        context.phase = phase;

        context.escalation_required = current.is_severe() || phase == ThreatPhase::Critical;
        context.suggested_protocol = suggested_protocol(current).map(str::to_string);
        context.last_update = now;

        if phase == previous {
            return None;
        }
        if phase == ThreatPhase::Stable {
            context.human_ops_notified = false;
        }
        Some(previous)
    }
}

/// Single-writer aggregator of threat signals.
pub struct ThreatAggregator {
    config: ThreatConfig,
    anchoring: ThreatAnchoring,
    inner: Mutex<AggregatorState>,
}

impl ThreatAggregator {
    pub fn new(config: ThreatConfig, anchoring: ThreatAnchoring) -> Self {
        Self {
            config,
            anchoring,
            inner: Mutex::new(AggregatorState::new()),
        }
    }

    /// Ingest a signal now.
    pub async fn ingest(&self, signal: ThreatSignal) -> Result<ThreatContext> {
        self.ingest_at(signal, Utc::now()).await
    }

    /// Ingest a signal, evaluating windows at `now`.
    ///
    /// The signal is anchored before the context changes; a phase change
    /// additionally registers an episode in the block ledger.
    pub async fn ingest_at(&self, signal: ThreatSignal, now: DateTime<Utc>) -> Result<ThreatContext> {
        validate_signal(&signal)?;

        let mut inner = self.inner.lock().await;

        self.anchoring.record_signal(&signal).await?;
        inner.context.anchored_in_event_ledger = true;

        info!(
            signal_id = %signal.id,
            level = %signal.level,
            domain = ?signal.domain,
            source = ?signal.source,
            "Threat signal ingested"
        );

        inner.record(signal);
        self.settle(&mut inner, now).await?;
        Ok(inner.context.clone())
    }

    /// Re-evaluate windows and phase without a new signal.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<ThreatContext> {
        let mut inner = self.inner.lock().await;
        self.settle(&mut inner, now).await?;
        Ok(inner.context.clone())
    }

    /// Copy of the current context.
    pub async fn context(&self) -> ThreatContext {
        self.inner.lock().await.context.clone()
    }

    /// Record that human ops were reached for the current episode.
    pub async fn mark_human_ops_notified(&self) {
        self.inner.lock().await.context.human_ops_notified = true;
    }

    async fn settle(&self, inner: &mut AggregatorState, now: DateTime<Utc>) -> Result<()> {
        let Some(previous) = inner.recompute(now, &self.config) else {
            debug!(
                level = %inner.context.current_level,
                phase = %inner.context.phase,
                "Threat context updated"
            );
            return Ok(());
        };

        let context = &mut inner.context;
        if context.phase == ThreatPhase::Critical {
            warn!(
                from = %previous,
                level = %context.current_level,
                suggested_protocol = ?context.suggested_protocol,
                "Threat episode critical"
            );
        } else {
            info!(from = %previous, to = %context.phase, level = %context.current_level, "Threat phase changed");
        }

        self.anchoring.record_episode(context, previous).await?;
        context.anchored_in_event_ledger = true;
        context.anchored_in_block_ledger = true;
        Ok(())
    }
}

fn validate_signal(signal: &ThreatSignal) -> Result<()> {
    if signal.id.trim().is_empty() {
        return Err(GuardianError::Validation("threat signal id is empty".to_string()));
    }
    if let Some(score) = signal.severity_score {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(GuardianError::Validation(format!(
                "severity_score must be within [0, 1], got {}",
                score
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ThreatDomain, ThreatSource};
    use audit_ledger::{BlockLedger, EventLedger};
    use std::sync::Arc;

    fn aggregator() -> (ThreatAggregator, Arc<EventLedger>, Arc<BlockLedger>) {
        let events = Arc::new(EventLedger::new());
        let blocks = Arc::new(BlockLedger::new());
        let anchoring = ThreatAnchoring::new(events.clone(), blocks.clone());
        (
            ThreatAggregator::new(ThreatConfig::default(), anchoring),
            events,
            blocks,
        )
    }

    fn signal(level: ThreatLevel, domain: ThreatDomain, at: DateTime<Utc>) -> ThreatSignal {
        ThreatSignal::new(level, domain, ThreatSource::Radar).at(at)
    }

    #[tokio::test]
    async fn test_starts_stable() {
        let (agg, _, _) = aggregator();
        let ctx = agg.context().await;
        assert_eq!(ctx.phase, ThreatPhase::Stable);
        assert_eq!(ctx.current_level, ThreatLevel::None);
        assert!(!ctx.escalation_required);
    }

    #[tokio::test]
    async fn test_medium_signal_degrades() {
        let (agg, _, _) = aggregator();
        let t0 = Utc::now();

        let ctx = agg
            .ingest_at(signal(ThreatLevel::Medium, ThreatDomain::Economy, t0), t0)
            .await
            .unwrap();

        assert_eq!(ctx.phase, ThreatPhase::Degrading);
        assert!(!ctx.escalation_required);
        assert_eq!(ctx.suggested_protocol, None);
        assert_eq!(ctx.matrix.by_source[&ThreatSource::Radar], 2);
    }

    #[tokio::test]
    async fn test_high_signal_goes_critical_and_suggests_protocol() {
        let (agg, events, blocks) = aggregator();
        let t0 = Utc::now();

        let ctx = agg
            .ingest_at(signal(ThreatLevel::High, ThreatDomain::Security, t0), t0)
            .await
            .unwrap();

        assert_eq!(ctx.phase, ThreatPhase::Critical);
        assert!(ctx.escalation_required);
        assert_eq!(ctx.suggested_protocol.as_deref(), Some(PROTOCOL_BLACK_HOLE));
        assert!(ctx.anchored_in_block_ledger);

        assert_eq!(events.by_type("threat_signal", 10).await.len(), 1);
        assert_eq!(events.by_type("threat_context_snapshot", 10).await.len(), 1);
        // signal block + snapshot + completion
        assert_eq!(blocks.len().await, 3);
    }

    #[tokio::test]
    async fn test_existential_suggests_phoenix() {
        let (agg, _, _) = aggregator();
        let t0 = Utc::now();
        let ctx = agg
            .ingest_at(signal(ThreatLevel::Existential, ThreatDomain::Governance, t0), t0)
            .await
            .unwrap();
        assert_eq!(ctx.suggested_protocol.as_deref(), Some(PROTOCOL_PHOENIX));
        assert_eq!(ctx.metrics.last_existential, Some(t0));
    }

    #[tokio::test]
    async fn test_full_episode_lifecycle() {
        let (agg, _, _) = aggregator();
        let config = ThreatConfig::default();
        let t0 = Utc::now() - Duration::hours(2);

        agg.ingest_at(signal(ThreatLevel::High, ThreatDomain::Security, t0), t0)
            .await
            .unwrap();

        // high still inside the level window
        let t1 = t0 + Duration::minutes(10);
        let ctx = agg.refresh(t1).await.unwrap();
        assert_eq!(ctx.phase, ThreatPhase::Critical);

        // aged out, but not for the whole recovery window
        let t2 = t0 + config.level_window() + Duration::minutes(1);
        let ctx = agg.refresh(t2).await.unwrap();
        assert_eq!(ctx.current_level, ThreatLevel::None);
        assert_eq!(ctx.phase, ThreatPhase::Critical);
        assert!(ctx.escalation_required);

        let t3 = t0 + config.level_window() + config.recovery_window();
        let ctx = agg.refresh(t3).await.unwrap();
        assert_eq!(ctx.phase, ThreatPhase::Recovery);
        assert!(!ctx.escalation_required);

        let t4 = t0 + config.level_window() + config.stabilize_window();
        let ctx = agg.refresh(t4).await.unwrap();
        assert_eq!(ctx.phase, ThreatPhase::Stable);
        assert_eq!(ctx.highest_level_seen, ThreatLevel::High);
    }

    #[tokio::test]
    async fn test_recovery_returns_to_critical_on_high() {
        let (agg, _, _) = aggregator();
        let config = ThreatConfig::default();
        let t0 = Utc::now() - Duration::hours(2);

        agg.ingest_at(signal(ThreatLevel::High, ThreatDomain::Economy, t0), t0)
            .await
            .unwrap();
        let t1 = t0 + config.level_window() + config.recovery_window();
        assert_eq!(agg.refresh(t1).await.unwrap().phase, ThreatPhase::Recovery);

        let ctx = agg
            .ingest_at(signal(ThreatLevel::High, ThreatDomain::Xr, t1), t1)
            .await
            .unwrap();
        assert_eq!(ctx.phase, ThreatPhase::Critical);
    }

    #[tokio::test]
    async fn test_recovery_waits_for_none() {
        let (agg, _, _) = aggregator();
        let config = ThreatConfig::default();
        let t0 = Utc::now() - Duration::hours(2);

        agg.ingest_at(signal(ThreatLevel::High, ThreatDomain::Economy, t0), t0)
            .await
            .unwrap();
        let t1 = t0 + config.level_window() + config.recovery_window();
        agg.refresh(t1).await.unwrap();

        // a low signal keeps the episode in recovery
        let ctx = agg
            .ingest_at(signal(ThreatLevel::Low, ThreatDomain::Economy, t1), t1)
            .await
            .unwrap();
        assert_eq!(ctx.phase, ThreatPhase::Recovery);

        let ctx = agg.refresh(t1 + Duration::minutes(20)).await.unwrap();
        assert_eq!(ctx.phase, ThreatPhase::Recovery);

        let ctx = agg
            .refresh(t1 + config.level_window() + config.stabilize_window())
            .await
            .unwrap();
        assert_eq!(ctx.phase, ThreatPhase::Stable);
    }

    #[tokio::test]
    async fn test_degrading_back_to_stable() {
        let (agg, _, _) = aggregator();
        let config = ThreatConfig::default();
        let t0 = Utc::now() - Duration::hours(1);

        agg.ingest_at(signal(ThreatLevel::Medium, ThreatDomain::Identity, t0), t0)
            .await
            .unwrap();
        let ctx = agg
            .refresh(t0 + config.level_window() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(ctx.phase, ThreatPhase::Stable);
    }

    #[tokio::test]
    async fn test_highest_level_never_decreases() {
        let (agg, _, _) = aggregator();
        let t0 = Utc::now() - Duration::hours(3);

        let levels = [
            ThreatLevel::Low,
            ThreatLevel::Existential,
            ThreatLevel::None,
            ThreatLevel::Medium,
            ThreatLevel::Low,
        ];
        let mut highest = ThreatLevel::None;
        for (i, level) in levels.into_iter().enumerate() {
            let at = t0 + Duration::minutes(30 * i as i64);
            let ctx = agg
                .ingest_at(signal(level, ThreatDomain::Governance, at), at)
                .await
                .unwrap();
            assert!(ctx.highest_level_seen >= highest);
            highest = ctx.highest_level_seen;
        }
        assert_eq!(highest, ThreatLevel::Existential);
    }

    #[tokio::test]
    async fn test_human_ops_flag_resets_when_stable() {
        let (agg, _, _) = aggregator();
        let t0 = Utc::now() - Duration::hours(1);

        agg.ingest_at(signal(ThreatLevel::Medium, ThreatDomain::Economy, t0), t0)
            .await
            .unwrap();
        agg.mark_human_ops_notified().await;
        assert!(agg.context().await.human_ops_notified);

        let ctx = agg.refresh(t0 + Duration::minutes(16)).await.unwrap();
        assert_eq!(ctx.phase, ThreatPhase::Stable);
        assert!(!ctx.human_ops_notified);
    }

    #[tokio::test]
    async fn test_rejects_malformed_signals() {
        let (agg, events, _) = aggregator();

        let mut empty = ThreatSignal::new(ThreatLevel::Low, ThreatDomain::Unknown, ThreatSource::External);
        empty.id = "  ".to_string();
        assert!(agg.ingest(empty).await.unwrap_err().is_validation());

        let scored = ThreatSignal::new(ThreatLevel::Low, ThreatDomain::Unknown, ThreatSource::External)
            .with_severity_score(f64::NAN);
        assert!(agg.ingest(scored).await.unwrap_err().is_validation());

        assert!(events.is_empty().await);
        assert_eq!(agg.context().await.metrics.total_signals, 0);
    }

    #[tokio::test]
    async fn test_metrics_windows() {
        let (agg, _, _) = aggregator();
        let now = Utc::now();

        for minutes in [30 * 60, 3 * 60, 30] {
            let at = now - Duration::minutes(minutes);
            agg.ingest_at(signal(ThreatLevel::Low, ThreatDomain::Economy, at), now)
                .await
                .unwrap();
        }

        let ctx = agg.context().await;
        assert_eq!(ctx.metrics.total_signals, 3);
        assert_eq!(ctx.metrics.last_24h, 2);
        assert_eq!(ctx.metrics.last_1h, 1);
        assert_eq!(ctx.metrics.by_level[&ThreatLevel::Low], 3);
    }
}
