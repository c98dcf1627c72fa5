//! EscalationNotifier: hands escalations to human operations.
//!
//! Channels are tried in order until one succeeds. Each attempt is bounded
//! by the channel timeout, so a stuck channel cannot stall later
//! escalations. Every attempt is anchored, successful or not.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use audit_ledger::{AnchorPayload, AuditLevel, EventLedger};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EscalationConfig;
use crate::error::{GuardianError, Result};
use crate::types::{
    Channel, NotificationAttempt, NotificationResult, NotifyOutcome, ThreatContext, ThreatLevel,
};

/// Ledger domain for human-ops anchors.
const HUMAN_OPS_DOMAIN: &str = "human_ops";

/// External human-operations interface.
#[async_trait]
pub trait HumanOpsSink: Send + Sync {
    /// Deliver the context on one channel.
    async fn notify(&self, context: &ThreatContext, channel: Channel) -> NotifyOutcome;
}

/// Sink that only emits a tracing event.
#[derive(Debug, Default, Clone)]
pub struct ConsoleSink;

#[async_trait]
impl HumanOpsSink for ConsoleSink {
    async fn notify(&self, context: &ThreatContext, channel: Channel) -> NotifyOutcome {
        warn!(
            channel = %channel,
            level = %context.current_level,
            phase = %context.phase,
            suggested_protocol = ?context.suggested_protocol,
            "Human ops escalation"
        );
        NotifyOutcome::ok()
    }
}

/// Configurable sink for tests and drills.
pub struct MockSink {
    failing: HashSet<Channel>,
    delay: Option<Duration>,
    call_count: AtomicU32,
}

impl MockSink {
    /// A sink that accepts every notification.
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            delay: None,
            call_count: AtomicU32::new(0),
        }
    }

    /// Fail every attempt on `channel`.
    pub fn failing(mut self, channel: Channel) -> Self {
        self.failing.insert(channel);
        self
    }

    /// Wait before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the number of times notify was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HumanOpsSink for MockSink {
    async fn notify(&self, _context: &ThreatContext, channel: Channel) -> NotifyOutcome {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&channel) {
            NotifyOutcome::failed(format!("{} unavailable", channel))
        } else {
            NotifyOutcome::ok()
        }
    }
}

/// Channels for a level, in the order they are tried.
pub fn channels_for(level: ThreatLevel) -> &'static [Channel] {
    match level {
        ThreatLevel::Existential => &[Channel::Pager, Channel::Webhook],
        ThreatLevel::High => &[Channel::Webhook],
        _ => &[Channel::Console],
    }
}

impl NotificationResult {
    /// Surface an all-channels failure as an error.
    pub fn into_result(self) -> Result<NotificationResult> {
        if self.ok {
            Ok(self)
        } else {
            Err(GuardianError::NotificationFailed {
                channel: self.channel.to_string(),
                reason: self.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

/// Last successful notification, for deduplication.
#[derive(Debug, Clone, Copy)]
struct LastNotification {
    level: ThreatLevel,
    at: DateTime<Utc>,
}

/// Notifies human ops with anti-spam deduplication.
pub struct EscalationNotifier {
    config: EscalationConfig,
    sink: Arc<dyn HumanOpsSink>,
    events: Arc<EventLedger>,
    last: Mutex<Option<LastNotification>>,
}

impl EscalationNotifier {
    pub fn new(config: EscalationConfig, sink: Arc<dyn HumanOpsSink>, events: Arc<EventLedger>) -> Self {
        Self {
            config,
            sink,
            events,
            last: Mutex::new(None),
        }
    }

    /// Escalate now.
    pub async fn escalate(&self, context: &mut ThreatContext) -> Result<Option<NotificationResult>> {
        self.escalate_at(context, Utc::now()).await
    }

    /// Escalate the context at `now`.
    ///
    /// Returns `None` when nothing needs escalating or the notification is
    /// suppressed as a repeat. A result with `ok == false` means every
    /// channel failed; see [`NotificationResult::into_result`].
    pub async fn escalate_at(
        &self,
        context: &mut ThreatContext,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationResult>> {
        let level = context.current_level;
        if !context.escalation_required && level != ThreatLevel::Existential {
            return Ok(None);
        }

        let mut last = self.last.lock().await;

        if let Some(previous) = *last {
            if previous.level == level && now - previous.at < self.config.min_interval() {
                debug!(level = %level, last_at = %previous.at, "Escalation suppressed as repeat");
                return Ok(None);
            }
        }

        let mut attempts = Vec::new();
        for &channel in channels_for(level) {
            let attempt = self.attempt(context, channel).await;

            if attempt.ok {
                info!(channel = %channel, level = %level, "Human ops notified");
                self.events
                    .anchor(
                        AnchorPayload::new(
                            HUMAN_OPS_DOMAIN,
                            "human_ops_notified",
                            if level == ThreatLevel::Existential {
                                AuditLevel::Critical
                            } else {
                                AuditLevel::High
                            },
                            json!({
                                "channel": channel,
                                "level": level,
                                "phase": context.phase,
                                "suggested_protocol": context.suggested_protocol,
                                "attempts": attempts.len() + 1,
                            }),
                        )
                        .candidate(level.is_severe()),
                    )
                    .await?;

                attempts.push(attempt);
                *last = Some(LastNotification { level, at: now });
                context.human_ops_notified = true;

                return Ok(Some(NotificationResult {
                    ok: true,
                    channel,
                    error: None,
                    level,
                    attempts,
                    at: now,
                }));
            }

            warn!(
                channel = %channel,
                level = %level,
                timed_out = attempt.timed_out,
                error = attempt.error.as_deref().unwrap_or(""),
                "Human ops notification attempt failed"
            );
            self.events
                .anchor(AnchorPayload::new(
                    HUMAN_OPS_DOMAIN,
                    "human_ops_notification_failed",
                    AuditLevel::High,
                    json!({
                        "channel": channel,
                        "level": level,
                        "error": attempt.error,
                        "timed_out": attempt.timed_out,
                    }),
                ))
                .await?;
            attempts.push(attempt);
        }

        let (channel, error) = attempts
            .last()
            .map(|a| (a.channel, a.error.clone()))
            .unwrap_or((Channel::Console, None));
        error!(channel = %channel, level = %level, "All human ops channels failed");

        Ok(Some(NotificationResult {
            ok: false,
            channel,
            error,
            level,
            attempts,
            at: now,
        }))
    }

    async fn attempt(&self, context: &ThreatContext, channel: Channel) -> NotificationAttempt {
        let timeout = self.config.channel_timeout();
        match tokio::time::timeout(timeout, self.sink.notify(context, channel)).await {
            Ok(outcome) => NotificationAttempt {
                channel,
                ok: outcome.ok,
                error: if outcome.ok {
                    None
                } else {
                    Some(outcome.error.unwrap_or_else(|| "notification rejected".to_string()))
                },
                timed_out: false,
            },
            Err(_) => NotificationAttempt {
                channel,
                ok: false,
                error: Some(format!("timed out after {}ms", timeout.as_millis())),
                timed_out: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn escalated(level: ThreatLevel) -> ThreatContext {
        ThreatContext {
            current_level: level,
            highest_level_seen: level,
            escalation_required: level.is_severe(),
            ..ThreatContext::default()
        }
    }

    fn notifier(sink: Arc<dyn HumanOpsSink>) -> (EscalationNotifier, Arc<EventLedger>) {
        let events = Arc::new(EventLedger::new());
        (
            EscalationNotifier::new(EscalationConfig::default(), sink, events.clone()),
            events,
        )
    }

    #[test]
    fn test_channel_selection() {
        assert_eq!(channels_for(ThreatLevel::Existential), &[Channel::Pager, Channel::Webhook]);
        assert_eq!(channels_for(ThreatLevel::High), &[Channel::Webhook]);
        assert_eq!(channels_for(ThreatLevel::Medium), &[Channel::Console]);
    }

    #[tokio::test]
    async fn test_not_required_does_nothing() {
        let sink = Arc::new(MockSink::new());
        let (notifier, events) = notifier(sink.clone());

        let mut ctx = escalated(ThreatLevel::Medium);
        assert!(notifier.escalate(&mut ctx).await.unwrap().is_none());
        assert_eq!(sink.call_count(), 0);
        assert!(events.is_empty().await);
    }

    #[tokio::test]
    async fn test_existential_is_forced() {
        let (notifier, _) = notifier(Arc::new(MockSink::new()));

        let mut ctx = escalated(ThreatLevel::Existential);
        ctx.escalation_required = false;
        let result = notifier.escalate(&mut ctx).await.unwrap().unwrap();
        assert!(result.ok);
        assert_eq!(result.channel, Channel::Pager);
        assert!(ctx.human_ops_notified);
    }

    #[tokio::test]
    async fn test_repeat_within_interval_is_suppressed() {
        let (notifier, events) = notifier(Arc::new(MockSink::new()));
        let t0 = Utc::now();

        let mut ctx = escalated(ThreatLevel::High);
        assert!(notifier.escalate_at(&mut ctx, t0).await.unwrap().is_some());
        assert!(notifier
            .escalate_at(&mut ctx, t0 + ChronoDuration::seconds(30))
            .await
            .unwrap()
            .is_none());

        // level change bypasses suppression
        let mut ctx = escalated(ThreatLevel::Existential);
        let result = notifier
            .escalate_at(&mut ctx, t0 + ChronoDuration::seconds(31))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.level, ThreatLevel::Existential);

        // interval elapsed
        let mut ctx = escalated(ThreatLevel::Existential);
        assert!(notifier
            .escalate_at(&mut ctx, t0 + ChronoDuration::seconds(92))
            .await
            .unwrap()
            .is_some());

        assert_eq!(events.by_type("human_ops_notified", 10).await.len(), 3);
    }

    #[tokio::test]
    async fn test_falls_through_to_next_channel() {
        let sink = Arc::new(MockSink::new().failing(Channel::Pager));
        let (notifier, events) = notifier(sink.clone());

        let mut ctx = escalated(ThreatLevel::Existential);
        let result = notifier.escalate(&mut ctx).await.unwrap().unwrap();

        assert!(result.ok);
        assert_eq!(result.channel, Channel::Webhook);
        assert_eq!(result.attempts.len(), 2);
        assert!(!result.attempts[0].ok);
        assert_eq!(sink.call_count(), 2);
        assert_eq!(events.by_type("human_ops_notification_failed", 10).await.len(), 1);
        assert_eq!(events.by_type("human_ops_notified", 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_all_channels_failing_is_reported() {
        let sink = Arc::new(MockSink::new().failing(Channel::Webhook));
        let (notifier, events) = notifier(sink);

        let mut ctx = escalated(ThreatLevel::High);
        let result = notifier.escalate(&mut ctx).await.unwrap().unwrap();

        assert!(!result.ok);
        assert_eq!(result.channel, Channel::Webhook);
        assert!(!ctx.human_ops_notified);
        assert_eq!(events.by_type("human_ops_notification_failed", 10).await.len(), 1);

        let err = result.into_result().unwrap_err();
        assert!(matches!(err, GuardianError::NotificationFailed { .. }));

        // failures are not remembered for deduplication
        assert!(notifier.escalate(&mut ctx).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_channel_times_out() {
        let sink = Arc::new(MockSink::new().with_delay(Duration::from_secs(30)));
        let events = Arc::new(EventLedger::new());
        let config = EscalationConfig {
            channel_timeout_ms: 100,
            ..EscalationConfig::default()
        };
        let notifier = EscalationNotifier::new(config, sink, events);

        let mut ctx = escalated(ThreatLevel::Existential);
        let result = notifier.escalate(&mut ctx).await.unwrap().unwrap();

        assert!(!result.ok);
        assert_eq!(result.attempts.len(), 2);
        assert!(result.attempts.iter().all(|a| a.timed_out));
    }

    #[tokio::test]
    async fn test_console_sink_accepts() {
        let outcome = ConsoleSink
            .notify(&escalated(ThreatLevel::Low), Channel::Console)
            .await;
        assert!(outcome.ok);
    }
}
