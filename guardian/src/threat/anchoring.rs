//! Maps threat signals and context snapshots onto the ledgers.

use std::sync::Arc;

use audit_ledger::{
    AnchorPayload, AuditAnchor, AuditLevel, BlockDomain, BlockLedger, BlockPayload, EventLedger,
    LedgerBlock,
};
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::types::{ThreatContext, ThreatDomain, ThreatLevel, ThreatPhase, ThreatSignal, ThreatSource};

/// Ledger domain for threat anchors.
const THREAT_DOMAIN: &str = "threat";

/// Audit level for a signal of the given threat level.
pub fn audit_level(level: ThreatLevel) -> AuditLevel {
    match level {
        ThreatLevel::Existential => AuditLevel::Critical,
        ThreatLevel::High => AuditLevel::High,
        ThreatLevel::Medium => AuditLevel::Normal,
        ThreatLevel::Low | ThreatLevel::None => AuditLevel::Low,
    }
}

/// Block domain a severe signal is registered under.
///
/// Signals raised by guardians or radars stay with the guardians; the rest
/// follow the subsystem they concern.
pub fn block_domain(signal: &ThreatSignal) -> BlockDomain {
    if matches!(signal.source, ThreatSource::Guardian | ThreatSource::Radar) {
        return BlockDomain::Guardians;
    }
    match signal.domain {
        ThreatDomain::Security | ThreatDomain::Identity => BlockDomain::Identity,
        ThreatDomain::Economy => BlockDomain::Economy,
        ThreatDomain::Governance => BlockDomain::Governance,
        ThreatDomain::Xr => BlockDomain::Cognition,
        ThreatDomain::Infrastructure | ThreatDomain::Unknown => BlockDomain::Guardians,
    }
}

fn signal_body(signal: &ThreatSignal) -> serde_json::Value {
    json!({
        "id": signal.id,
        "level": signal.level,
        "domain": signal.domain,
        "source": signal.source,
        "description": signal.description,
        "detected_by": signal.detected_by,
        "tags": signal.tags,
        "severity_score": signal.severity_score,
        "ts": signal.timestamp,
    })
}

/// What was written for a single signal.
#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub anchor: AuditAnchor,
    /// Present for signals at `high` or above
    pub block: Option<LedgerBlock>,
}

/// What was written for a phase change.
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub anchor: AuditAnchor,
    pub snapshot: LedgerBlock,
    pub completion: LedgerBlock,
}

/// Writes threat evidence into both ledgers.
#[derive(Clone)]
pub struct ThreatAnchoring {
    events: Arc<EventLedger>,
    blocks: Arc<BlockLedger>,
}

impl ThreatAnchoring {
    pub fn new(events: Arc<EventLedger>, blocks: Arc<BlockLedger>) -> Self {
        Self { events, blocks }
    }

    /// Anchor a signal; severe signals also become blocks.
    pub async fn record_signal(&self, signal: &ThreatSignal) -> Result<SignalRecord> {
        let anchor = self
            .events
            .anchor(
                AnchorPayload::new(THREAT_DOMAIN, "threat_signal", audit_level(signal.level), signal_body(signal))
                    .candidate(signal.level.is_severe())
                    .with_subject(signal.id.clone()),
            )
            .await?;

        let block = if signal.level.is_severe() {
            let mut data = signal_body(signal);
            data["anchor_id"] = json!(anchor.id);
            let result = self
                .blocks
                .append(BlockPayload::new(block_domain(signal), "threat_signal", data))
                .await?;
            Some(result.block)
        } else {
            None
        };

        debug!(
            signal_id = %signal.id,
            level = %signal.level,
            block = block.as_ref().map(|b| b.index),
            "Threat signal anchored"
        );

        Ok(SignalRecord { anchor, block })
    }

    /// Anchor a context snapshot after a phase change and register the
    /// episode, closing with an anchoring-completed block.
    pub async fn record_episode(
        &self,
        context: &ThreatContext,
        previous: ThreatPhase,
    ) -> Result<EpisodeRecord> {
        let last_signal = context.last_signal.as_ref().map(|s| {
            json!({
                "id": s.id,
                "level": s.level,
                "domain": s.domain,
                "source": s.source,
                "ts": s.timestamp,
                "tags": s.tags,
            })
        });
        let body = json!({
            "previous_phase": previous,
            "phase": context.phase,
            "current_level": context.current_level,
            "highest_level_seen": context.highest_level_seen,
            "suggested_protocol": context.suggested_protocol,
            "escalation_required": context.escalation_required,
            "human_ops_notified": context.human_ops_notified,
            "matrix": context.matrix,
            "metrics": context.metrics,
            "last_signal": last_signal,
            "ts": context.last_update,
        });

        let severe = context.current_level.is_severe() || context.phase == ThreatPhase::Critical;
        let anchor = self
            .events
            .anchor(
                AnchorPayload::new(
                    THREAT_DOMAIN,
                    "threat_context_snapshot",
                    if severe { AuditLevel::Critical } else { AuditLevel::High },
                    body.clone(),
                )
                .candidate(true),
            )
            .await?;

        let snapshot = self
            .blocks
            .append(BlockPayload::new(BlockDomain::Governance, "threat_episode_snapshot", body))
            .await?
            .block;

        let completion = self
            .blocks
            .append(BlockPayload::new(
                BlockDomain::Governance,
                "threat_anchoring_completed",
                json!({
                    "block_index": snapshot.index,
                    "block_hash": snapshot.hash,
                    "anchor_id": anchor.id,
                }),
            ))
            .await?
            .block;

        Ok(EpisodeRecord {
            anchor,
            snapshot,
            completion,
        })
    }
}
