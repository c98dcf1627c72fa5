//! GovernanceKernel: one owned instance wiring every component together.

use std::sync::Arc;

use audit_ledger::{
    AnchorPayload, AppendResult, AuditAnchor, AuditLevel, BlockDomain, BlockLedger, BlockPayload,
    ChainStore, EventLedger,
};
use chrono::{DateTime, Utc};
use constitution::{
    canonical_constitution, Constitution, ConstitutionError, ConstitutionPublisher,
    ConstitutionStore, Decision, DecisionGate, ProtocolDecision, ProtocolGate, ProtocolTrigger,
    PublishKind, PublishRequest, PublishResult, SignatureVerifier, Verdict,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::{BootMode, GovernanceConfig};
use crate::error::{GuardianError, Result};
use crate::escalation::{ConsoleSink, EscalationNotifier, HumanOpsSink};
use crate::governor::{self, GovernanceAssessment};
use crate::risk::RiskStateTracker;
use crate::threat::{ThreatAggregator, ThreatAnchoring};
use crate::types::{
    GuardianSnapshot, NotificationResult, RiskState, RiskUpdate, ThreatContext, ThreatSignal,
};

/// Signer of the canonical constitution when none is supplied.
pub const DEFAULT_SIGNER: &str = "constitutional-council";

/// The governance kernel.
///
/// Owns both ledgers, the constitution store and every gate and tracker
/// reading or writing them. There are no process-wide instances; create one
/// kernel per logical deployment.
pub struct GovernanceKernel {
    config: GovernanceConfig,
    events: Arc<EventLedger>,
    blocks: Arc<BlockLedger>,
    store: Arc<ConstitutionStore>,
    publisher: ConstitutionPublisher,
    decisions: DecisionGate,
    protocols: ProtocolGate,
    tracker: RiskStateTracker,
    threats: ThreatAggregator,
    notifier: EscalationNotifier,
}

impl GovernanceKernel {
    /// Bootstrap a kernel with the console sink and in-memory ledgers.
    pub async fn bootstrap(config: GovernanceConfig, constitution: Constitution) -> Result<Self> {
        KernelBuilder::new(config).constitution(constitution).build().await
    }

    /// Start building a kernel.
    pub fn builder(config: GovernanceConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    pub fn id(&self) -> &str {
        &self.config.kernel_id
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventLedger> {
        &self.events
    }

    pub fn blocks(&self) -> &Arc<BlockLedger> {
        &self.blocks
    }

    pub fn constitution_store(&self) -> &Arc<ConstitutionStore> {
        &self.store
    }

    pub fn tracker(&self) -> &RiskStateTracker {
        &self.tracker
    }

    pub fn threats(&self) -> &ThreatAggregator {
        &self.threats
    }

    /// Anchor an externally observed event.
    pub async fn anchor_event(&self, payload: AnchorPayload) -> Result<AuditAnchor> {
        Ok(self.events.anchor(payload).await?)
    }

    /// Register a governance block.
    pub async fn append_block(&self, payload: BlockPayload) -> Result<AppendResult> {
        Ok(self.blocks.append(payload).await?)
    }

    /// Verify both chains and the active constitution.
    ///
    /// A constitution mismatch also puts the store into its failed state.
    pub async fn verify_chain(&self) -> bool {
        let events = self.events.verify_integrity().await;
        let blocks = self.blocks.verify_integrity().await;
        let constitution = self.store.verify_integrity().await;

        if !(events && blocks && constitution) {
            error!(
                kernel_id = %self.config.kernel_id,
                events,
                blocks,
                constitution,
                "Integrity verification failed"
            );
        }
        events && blocks && constitution
    }

    /// Review a decision. Denials are anchored.
    pub async fn evaluate_decision(&self, decision: &Decision) -> Result<Verdict> {
        let verdict = self.decisions.evaluate(decision).await?;

        if !verdict.allowed {
            info!(
                action = %decision.action,
                violations = verdict.violations.len(),
                "Decision denied"
            );
            self.events
                .anchor(
                    AnchorPayload::new(
                        "constitution",
                        "policy_denial",
                        AuditLevel::High,
                        json!({
                            "decision": decision,
                            "reason": verdict.reason,
                            "requires_human_review": verdict.requires_human_review,
                            "violations": verdict.violations,
                        }),
                    )
                    .with_subject(decision.action.clone()),
                )
                .await?;
        }

        Ok(verdict)
    }

    pub async fn update_risk_state(&self, update: RiskUpdate) -> Result<RiskState> {
        self.tracker.update(update).await
    }

    pub async fn derive_guardian_status(&self) -> Result<GuardianSnapshot> {
        self.tracker.derive_status().await
    }

    /// Ingest a threat signal, notifying human ops when the context
    /// requires escalation.
    ///
    /// Returns [`GuardianError::NotificationFailed`] when every channel
    /// failed. The signal and the failed attempts are anchored either way.
    pub async fn ingest_threat_signal(&self, signal: ThreatSignal) -> Result<ThreatContext> {
        let mut context = self.threats.ingest(signal).await?;

        if context.escalation_required {
            if let Some(result) = self.escalate(&mut context).await? {
                Self::surface(result, "Threat escalation could not reach human ops")?;
            }
        }

        Ok(context)
    }

    /// Re-evaluate threat windows without a new signal.
    pub async fn refresh_threats(&self, now: DateTime<Utc>) -> Result<ThreatContext> {
        self.threats.refresh(now).await
    }

    /// Escalate a context to human ops.
    pub async fn escalate(&self, context: &mut ThreatContext) -> Result<Option<NotificationResult>> {
        let result = self.notifier.escalate(context).await?;
        if context.human_ops_notified {
            self.threats.mark_human_ops_notified().await;
        }
        Ok(result)
    }

    fn surface(result: NotificationResult, message: &str) -> Result<NotificationResult> {
        if !result.ok {
            warn!(
                level = %result.level,
                channel = %result.channel,
                attempts = result.attempts.len(),
                "{}",
                message
            );
        }
        result.into_result()
    }

    /// Ask the protocol gate to arm a sovereign protocol.
    ///
    /// Every decision is anchored; armed protocols are also registered as
    /// blocks and added to the risk state. Decisions flagged for
    /// escalation are forwarded to human ops; when no channel reaches them
    /// the call fails with [`GuardianError::NotificationFailed`] after the
    /// decision has been anchored.
    pub async fn decide_protocol(
        &self,
        trigger: &ProtocolTrigger,
        legitimacy: f64,
    ) -> Result<ProtocolDecision> {
        let decision = self.protocols.decide(trigger, legitimacy).await?;

        let anchor = self
            .events
            .anchor(
                AnchorPayload::new(
                    "protocols",
                    "protocol_decision",
                    if decision.allowed {
                        AuditLevel::Critical
                    } else {
                        AuditLevel::High
                    },
                    json!({
                        "trigger": trigger,
                        "decision": decision,
                    }),
                )
                .candidate(decision.allowed)
                .with_subject(trigger.protocol_id.clone()),
            )
            .await?;

        if decision.allowed {
            self.blocks
                .append(BlockPayload::new(
                    BlockDomain::Protocols,
                    "protocol_armed",
                    json!({
                        "protocol_id": trigger.protocol_id,
                        "trigger_id": trigger.id,
                        "authority": trigger.authority,
                        "threat_level": trigger.threat_level,
                        "requires_human_review": decision.requires_human_review,
                        "requires_on_chain_vote": decision.requires_on_chain_vote,
                        "ethical_cost": decision.ethical_cost,
                        "anchor_id": anchor.id,
                    }),
                ))
                .await?;
            self.tracker.arm_protocol(&trigger.protocol_id).await;
        }

        if decision.escalate {
            let mut context = self.threats.context().await;
            context.escalation_required = true;
            context.current_level = context.current_level.max(trigger.threat_level);
            if let Some(result) = self.escalate(&mut context).await? {
                Self::surface(result, "Protocol denial could not reach human ops")?;
            }
        }

        Ok(decision)
    }

    /// Publish an amendment of the active constitution.
    pub async fn publish_constitution(
        &self,
        document: Constitution,
        actor: &str,
        reason: &str,
    ) -> Result<PublishResult> {
        let current = self.store.current().await?;
        let request = PublishRequest::amendment(document, current.version.clone(), actor, reason);
        Ok(self.publisher.publish(request).await?)
    }

    /// Advisory meta-governance assessment of the current risk state.
    pub async fn assess_governance(&self, pending_irreversible: usize) -> GovernanceAssessment {
        governor::assess(&self.tracker.state().await, pending_irreversible)
    }
}

/// Builder for [`GovernanceKernel`].
pub struct KernelBuilder {
    config: GovernanceConfig,
    constitution: Option<Constitution>,
    sink: Option<Arc<dyn HumanOpsSink>>,
    chain_store: Option<Arc<dyn ChainStore>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl KernelBuilder {
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            config,
            constitution: None,
            sink: None,
            chain_store: None,
            verifier: None,
        }
    }

    /// Constitution to boot with. Defaults to the canonical one.
    pub fn constitution(mut self, constitution: Constitution) -> Self {
        self.constitution = Some(constitution);
        self
    }

    /// Human-ops sink. Defaults to [`ConsoleSink`].
    pub fn sink(mut self, sink: Arc<dyn HumanOpsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Durable store the ledgers mirror to and restore from.
    pub fn chain_store(mut self, store: Arc<dyn ChainStore>) -> Self {
        self.chain_store = Some(store);
        self
    }

    /// Signature verifier for the constitution store.
    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Bootstrap the kernel.
    pub async fn build(self) -> Result<GovernanceKernel> {
        let config = self.config;
        config.validate().map_err(GuardianError::Config)?;

        let (events, blocks) = match &self.chain_store {
            Some(store) => (
                EventLedger::restore(&config.ledger, store.clone()).await?,
                BlockLedger::restore(&config.ledger, store.clone()).await?,
            ),
            None => (
                EventLedger::with_config(&config.ledger),
                BlockLedger::with_config(&config.ledger),
            ),
        };
        let events = Arc::new(events);
        let blocks = Arc::new(blocks);

        let store = Arc::new(match self.verifier {
            Some(verifier) => ConstitutionStore::with_verifier(verifier),
            None => ConstitutionStore::new(),
        });

        let publisher = match ConstitutionPublisher::restore(
            store.clone(),
            events.clone(),
            blocks.clone(),
        )
        .await
        {
            Ok(publisher) => publisher,
            Err(err) if err.is_integrity() => {
                return abort_bootstrap(&config, &events, "restore", None, err).await;
            }
            Err(err) => return Err(err.into()),
        };

        let reason = config.boot_reason();
        let published =
            install_constitution(&config, &store, &publisher, &events, self.constitution, &reason)
                .await?;
        let active = store.current().await?;

        let tracker = RiskStateTracker::with_min_duration(
            config.guardian.clone(),
            config.min_escalation_duration(),
            events.clone(),
            blocks.clone(),
        );
        let threats = ThreatAggregator::new(
            config.threat.clone(),
            ThreatAnchoring::new(events.clone(), blocks.clone()),
        );
        let sink = self.sink.unwrap_or_else(|| Arc::new(ConsoleSink));
        let notifier = EscalationNotifier::new(config.escalation.clone(), sink, events.clone());

        events
            .anchor(
                AnchorPayload::new(
                    "system",
                    "kernel_bootstrap",
                    if config.mode == BootMode::Safe {
                        AuditLevel::Critical
                    } else {
                        AuditLevel::High
                    },
                    json!({
                        "kernel_id": config.kernel_id,
                        "mode": config.mode,
                        "actor": config.actor,
                        "reason": reason,
                        "constitution_id": active.id,
                        "version": active.version,
                        "hash": active.hash,
                        "published": published.is_some(),
                    }),
                )
                .candidate(true)
                .with_subject(config.kernel_id.clone()),
            )
            .await?;

        info!(
            kernel_id = %config.kernel_id,
            mode = config.mode.as_str(),
            constitution_id = %active.id,
            version = %active.version,
            restored = published.is_none(),
            "Governance kernel bootstrapped"
        );

        Ok(GovernanceKernel {
            decisions: DecisionGate::new(store.clone()),
            protocols: ProtocolGate::new(store.clone()),
            config,
            events,
            blocks,
            store,
            publisher,
            tracker,
            threats,
            notifier,
        })
    }
}

/// Bring the constitution store up to date for a new kernel.
///
/// On empty ledgers the boot document, canonical unless given, is the first
/// publication. When the ledgers already hold publications the restored
/// active version stands unless a different document is given explicitly;
/// that one must follow the active version like any amendment. Returns
/// `None` when nothing was published.
async fn install_constitution(
    config: &GovernanceConfig,
    store: &ConstitutionStore,
    publisher: &ConstitutionPublisher,
    events: &EventLedger,
    boot: Option<Constitution>,
    reason: &str,
) -> Result<Option<PublishResult>> {
    let request = match publisher.active_version().await {
        None => {
            let document = match boot {
                Some(document) => document,
                None => canonical_constitution(DEFAULT_SIGNER)?,
            };
            let kind = match config.mode {
                BootMode::Safe => PublishKind::Rollback,
                _ => PublishKind::Initial,
            };
            PublishRequest::initial(document, config.actor.clone(), reason).with_kind(kind)
        }
        Some(active) => {
            let document = match boot {
                Some(document) => document,
                None => return Ok(None),
            };
            let current = store.current().await?;
            if current.id == document.id
                && current.version == document.version
                && current.hash == document.hash
            {
                return Ok(None);
            }
            let kind = match config.mode {
                BootMode::Safe => PublishKind::Rollback,
                _ => PublishKind::Amendment,
            };
            PublishRequest::amendment(document, active, config.actor.clone(), reason).with_kind(kind)
        }
    };

    let constitution_id = request.constitution.id.clone();
    let version = request.constitution.version.clone();
    match publisher.publish(request).await {
        Ok(published) => Ok(Some(published)),
        Err(err) if err.is_integrity() => {
            abort_bootstrap(config, events, "publish", Some((&constitution_id, &version)), err).await
        }
        Err(err) => Err(err.into()),
    }
}

/// Anchor an integrity failure found while bootstrapping and fail.
async fn abort_bootstrap<T>(
    config: &GovernanceConfig,
    events: &EventLedger,
    stage: &str,
    constitution: Option<(&str, &str)>,
    err: ConstitutionError,
) -> Result<T> {
    error!(
        kernel_id = %config.kernel_id,
        stage,
        constitution_id = constitution.map(|(id, _)| id).unwrap_or(""),
        version = constitution.map(|(_, version)| version).unwrap_or(""),
        error = %err,
        "Constitution failed verification, aborting bootstrap"
    );
    events
        .anchor(
            AnchorPayload::new(
                "constitution",
                "integrity_failure",
                AuditLevel::Critical,
                json!({
                    "kernel_id": config.kernel_id,
                    "stage": stage,
                    "constitution_id": constitution.map(|(id, _)| id),
                    "version": constitution.map(|(_, version)| version),
                    "reason": err.to_string(),
                }),
            )
            .candidate(true),
        )
        .await?;
    Err(GuardianError::Integrity(err.to_string()))
}
