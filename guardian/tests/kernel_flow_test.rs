//! Governance kernel integration tests
//!
//! Drives the kernel through its external interface:
//! - Bootstrap, publication and chain verification
//! - Decision and protocol gating with anchoring
//! - Threat episodes with human-ops escalation
//! - Concurrent anchoring without forks
//! - Fail-closed behavior on tampered constitutions and chains

use std::sync::Arc;

use audit_ledger::{
    AnchorPayload, AuditLevel, BlockDomain, BlockPayload, ChainStore, MemoryChainStore,
};
use chrono::{Duration, Utc};
use constitution::{
    canonical_constitution, seal, Authority, ConstitutionError, Decision, DecisionScope,
    ProtocolTrigger, PROTOCOL_BLACK_HOLE, PROTOCOL_PHOENIX,
};
use guardian::{
    Channel, GovernanceConfig, GovernanceKernel, GuardianError, GuardianStatus, MockSink, Mood,
    RiskUpdate, ThreatDomain, ThreatLevel, ThreatPhase, ThreatSignal, ThreatSource,
};
use serde_json::json;

async fn kernel_with(sink: Arc<MockSink>) -> GovernanceKernel {
    GovernanceKernel::builder(GovernanceConfig::new("integration"))
        .sink(sink)
        .build()
        .await
        .expect("kernel boots")
}

// =============================================================================
// Bootstrap & Ledgers
// =============================================================================

#[tokio::test]
async fn test_fresh_kernel_verifies() {
    let kernel = kernel_with(Arc::new(MockSink::new())).await;

    assert!(kernel.verify_chain().await);
    let first = kernel.events().get(0).await.expect("genesis anchor");
    assert_eq!(first.prev_hash, None);
    assert_eq!(first.event_type, "constitution_published");
}

#[tokio::test]
async fn test_external_anchors_and_blocks() {
    let kernel = kernel_with(Arc::new(MockSink::new())).await;

    let anchor = kernel
        .anchor_event(AnchorPayload::new("identity", "session_opened", AuditLevel::Low, json!({"user": "u-1"})))
        .await
        .unwrap();
    let previous = kernel.events().get(anchor.sequence - 1).await.unwrap();
    assert_eq!(anchor.prev_hash.as_deref(), Some(previous.hash.as_str()));

    let appended = kernel
        .append_block(BlockPayload::new(BlockDomain::Economy, "ledger_checkpoint", json!({"epoch": 7})))
        .await
        .unwrap();
    assert_eq!(appended.state.length, appended.block.index + 1);
    assert_eq!(appended.state.last_hash.as_deref(), Some(appended.block.hash.as_str()));
    assert!(kernel.verify_chain().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_anchoring_never_forks() {
    let kernel = Arc::new(kernel_with(Arc::new(MockSink::new())).await);

    let tasks = (0..32).map(|n| {
        let kernel = kernel.clone();
        tokio::spawn(async move {
            kernel
                .anchor_event(AnchorPayload::new("system", "probe", AuditLevel::Low, json!({ "n": n })))
                .await
                .unwrap();
            kernel
                .append_block(BlockPayload::new(BlockDomain::Security, "probe", json!({ "n": n })))
                .await
                .unwrap();
        })
    });
    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    let anchors = kernel.events().snapshot().await;
    let mut prev_hashes: Vec<_> = anchors.iter().map(|a| a.prev_hash.clone()).collect();
    prev_hashes.sort();
    prev_hashes.dedup();
    assert_eq!(prev_hashes.len(), anchors.len());
    assert!(kernel.verify_chain().await);
}

#[tokio::test]
async fn test_tampered_store_is_detected_on_restore() {
    let chain_store = Arc::new(MemoryChainStore::new());
    let config = GovernanceConfig::new("durable");

    let kernel = GovernanceKernel::builder(config.clone())
        .chain_store(chain_store.clone())
        .build()
        .await
        .unwrap();
    let anchors = chain_store.read(&config.ledger.event_namespace, 0, 1).await.unwrap();
    assert_eq!(anchors.len(), 1);
    drop(kernel);

    let mut forged = anchors[0].clone();
    forged["data"]["actor"] = json!("intruder");
    chain_store.overwrite(&config.ledger.event_namespace, 0, forged);

    let err = GovernanceKernel::builder(config)
        .chain_store(chain_store)
        .build()
        .await
        .err()
        .expect("restore fails");
    assert!(err.is_integrity());
}

// =============================================================================
// Constitution & Gates
// =============================================================================

#[tokio::test]
async fn test_decision_evaluation_is_repeatable() {
    let kernel = kernel_with(Arc::new(MockSink::new())).await;
    let decision = Decision::new("activate_protocol_lockdown", 0.95, DecisionScope::Sovereign)
        .with_reason("Coordinated intrusion");

    let first = kernel.evaluate_decision(&decision).await.unwrap();
    let second = kernel.evaluate_decision(&decision).await.unwrap();

    assert_eq!(first, second);
    assert!(first.requires_human_review);
}

#[tokio::test]
async fn test_protocol_gate_outcomes() {
    let kernel = kernel_with(Arc::new(MockSink::new())).await;

    let phoenix = ProtocolTrigger::new(PROTOCOL_PHOENIX, Authority::Guardian, ThreatLevel::High);
    assert!(!kernel.decide_protocol(&phoenix, 1.0).await.unwrap().allowed);

    let black_hole = ProtocolTrigger::new(PROTOCOL_BLACK_HOLE, Authority::Guardian, ThreatLevel::High);
    let denied = kernel.decide_protocol(&black_hole, 0.55).await.unwrap();
    assert!(!denied.allowed);
    assert!(denied.reason.contains("0.60"));

    let allowed = kernel.decide_protocol(&black_hole, 0.65).await.unwrap();
    assert!(allowed.allowed);
    assert!(allowed.requires_human_review);

    let nan = kernel.decide_protocol(&black_hole, f64::NAN).await.unwrap();
    assert!(!nan.allowed && nan.requires_human_review && nan.requires_on_chain_vote);

    assert_eq!(kernel.events().by_type("protocol_decision", 10).await.len(), 4);
}

#[tokio::test]
async fn test_unknown_protocol_is_a_validation_error() {
    let kernel = kernel_with(Arc::new(MockSink::new())).await;
    let trigger = ProtocolTrigger::new("protocolo-desconocido", Authority::HumanOps, ThreatLevel::High);

    let err = kernel.decide_protocol(&trigger, 0.9).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_failed_constitution_closes_every_gate() {
    let kernel = kernel_with(Arc::new(MockSink::new())).await;
    let current = kernel.constitution_store().current().await.unwrap();

    let mut forged = seal(&current.id, "2.0.0", "council", current.articles.clone()).unwrap();
    forged.articles.clear();
    let err = kernel
        .publish_constitution(forged, "council", "Remove every rule")
        .await
        .unwrap_err();
    assert!(err.is_integrity());

    let decision = Decision::new("send_notice", 0.1, DecisionScope::Local);
    assert!(kernel.evaluate_decision(&decision).await.unwrap_err().is_integrity());

    let trigger = ProtocolTrigger::new(PROTOCOL_BLACK_HOLE, Authority::HumanOps, ThreatLevel::High);
    assert!(kernel.decide_protocol(&trigger, 0.9).await.unwrap_err().is_integrity());
    assert!(!kernel.verify_chain().await);
}

#[tokio::test]
async fn test_republishing_same_version_is_rejected() {
    let kernel = kernel_with(Arc::new(MockSink::new())).await;
    let err = kernel
        .publish_constitution(canonical_constitution("council").unwrap(), "council", "Again")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GuardianError::Constitution(ConstitutionError::AlreadyPublished { .. })
    ));
}

// =============================================================================
// Guardian & Threats
// =============================================================================

#[tokio::test]
async fn test_guardian_hysteresis_through_kernel() {
    let kernel = kernel_with(Arc::new(MockSink::new())).await;
    let t0 = Utc::now();

    kernel
        .update_risk_state(RiskUpdate::new().risk(0.9))
        .await
        .unwrap();
    let tracker = kernel.tracker();
    assert_eq!(tracker.derive_status_at(t0).await.unwrap().status, GuardianStatus::Alert);
    assert_eq!(
        tracker
            .derive_status_at(t0 + Duration::milliseconds(19_999))
            .await
            .unwrap()
            .status,
        GuardianStatus::Alert
    );
    assert_eq!(
        tracker
            .derive_status_at(t0 + Duration::milliseconds(20_000))
            .await
            .unwrap()
            .status,
        GuardianStatus::Escalated
    );

    kernel
        .update_risk_state(RiskUpdate::new().risk(0.1).mood(Mood::Chaotic))
        .await
        .unwrap();
    assert_eq!(
        kernel.derive_guardian_status().await.unwrap().status,
        GuardianStatus::Escalated
    );
    assert_eq!(
        kernel.events().by_type("guardian_escalation_required", 10).await.len(),
        2
    );
}

#[tokio::test]
async fn test_threat_episode_escalates_once_per_level() {
    let sink = Arc::new(MockSink::new());
    let kernel = kernel_with(sink.clone()).await;

    let high = || ThreatSignal::new(ThreatLevel::High, ThreatDomain::Security, ThreatSource::Radar);

    let ctx = kernel.ingest_threat_signal(high()).await.unwrap();
    assert_eq!(ctx.phase, ThreatPhase::Critical);
    assert!(ctx.human_ops_notified);
    assert_eq!(sink.call_count(), 1);

    // same level inside the anti-spam interval
    kernel.ingest_threat_signal(high()).await.unwrap();
    assert_eq!(sink.call_count(), 1);

    // a level change goes straight through
    let ctx = kernel
        .ingest_threat_signal(ThreatSignal::new(
            ThreatLevel::Existential,
            ThreatDomain::Infrastructure,
            ThreatSource::System,
        ))
        .await
        .unwrap();
    assert_eq!(ctx.highest_level_seen, ThreatLevel::Existential);
    assert_eq!(sink.call_count(), 2);

    let notified = kernel.events().by_type("human_ops_notified", 10).await;
    assert_eq!(notified[1].data["channel"], json!(Channel::Pager));
    assert!(!kernel
        .blocks()
        .by_type("threat_anchoring_completed", 10)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_threat_episode_recovers_to_stable() {
    let kernel = kernel_with(Arc::new(MockSink::new())).await;
    let threat = kernel.config().threat.clone();
    let t0 = Utc::now();

    kernel
        .ingest_threat_signal(
            ThreatSignal::new(ThreatLevel::High, ThreatDomain::Economy, ThreatSource::HumanOps).at(t0),
        )
        .await
        .unwrap();

    let recovering = kernel
        .refresh_threats(t0 + threat.level_window() + threat.recovery_window())
        .await
        .unwrap();
    assert_eq!(recovering.phase, ThreatPhase::Recovery);

    let stable = kernel
        .refresh_threats(t0 + threat.level_window() + threat.stabilize_window())
        .await
        .unwrap();
    assert_eq!(stable.phase, ThreatPhase::Stable);
    assert_eq!(stable.highest_level_seen, ThreatLevel::High);
    assert!(!stable.human_ops_notified);
}

#[tokio::test]
async fn test_unreachable_human_ops_is_anchored() {
    let sink = Arc::new(MockSink::new().failing(Channel::Webhook));
    let kernel = kernel_with(sink).await;

    let err = kernel
        .ingest_threat_signal(ThreatSignal::new(ThreatLevel::High, ThreatDomain::Identity, ThreatSource::External))
        .await
        .unwrap_err();

    assert!(matches!(err, GuardianError::NotificationFailed { .. }));
    let ctx = kernel.threats().context().await;
    assert_eq!(ctx.phase, ThreatPhase::Critical);
    assert!(!ctx.human_ops_notified);
    assert_eq!(kernel.events().by_type("threat_signal", 10).await.len(), 1);
    assert_eq!(
        kernel.events().by_type("human_ops_notification_failed", 10).await.len(),
        1
    );
}
