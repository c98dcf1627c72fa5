//! Publication of constitution versions into both ledgers.

use std::collections::HashSet;
use std::sync::Arc;

use audit_ledger::{
    AnchorPayload, AuditAnchor, AuditLevel, BlockDomain, BlockLedger, BlockPayload, EventLedger,
    LedgerBlock,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{ConstitutionError, Result};
use crate::store::ConstitutionStore;
use crate::types::Constitution;

/// Why a version is being published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishKind {
    /// First publication
    Initial,
    /// A new version replacing the active one
    Amendment,
    /// Re-establishing a known-good document after an incident
    Rollback,
}

impl PublishKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Amendment => "amendment",
            Self::Rollback => "rollback",
        }
    }
}

/// A request to publish a constitution version.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub constitution: Constitution,
    pub kind: PublishKind,
    /// Who is publishing
    pub actor: String,
    pub reason: String,
    /// Required for every publication after the first
    pub previous_version: Option<String>,
}

impl PublishRequest {
    /// Request for the first publication.
    pub fn initial(constitution: Constitution, actor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            constitution,
            kind: PublishKind::Initial,
            actor: actor.into(),
            reason: reason.into(),
            previous_version: None,
        }
    }

    /// Request for an amendment of `previous_version`.
    pub fn amendment(
        constitution: Constitution,
        previous_version: impl Into<String>,
        actor: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            constitution,
            kind: PublishKind::Amendment,
            actor: actor.into(),
            reason: reason.into(),
            previous_version: Some(previous_version.into()),
        }
    }

    pub fn with_kind(mut self, kind: PublishKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Evidence of a publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    pub constitution_id: String,
    pub version: String,
    pub hash: String,
    pub kind: PublishKind,
    /// The audit anchor, always a ledger candidate
    pub anchor: AuditAnchor,
    /// The governance block referencing the anchor
    pub block: LedgerBlock,
}

/// Block type registered for every publication.
pub const PUBLISHED_BLOCK: &str = "constitution_published";

/// The part of a publication block needed to rebuild publisher state.
#[derive(Debug, Deserialize)]
struct PublishedBlock {
    constitution_id: String,
    version: String,
    hash: String,
    #[serde(default)]
    document: Option<Constitution>,
}

/// Publishes constitution versions, one at a time.
pub struct ConstitutionPublisher {
    store: Arc<ConstitutionStore>,
    events: Arc<EventLedger>,
    blocks: Arc<BlockLedger>,
    published: Mutex<PublishedVersions>,
}

#[derive(Default)]
struct PublishedVersions {
    seen: HashSet<(String, String)>,
    active: Option<String>,
}

impl ConstitutionPublisher {
    pub fn new(
        store: Arc<ConstitutionStore>,
        events: Arc<EventLedger>,
        blocks: Arc<BlockLedger>,
    ) -> Self {
        Self {
            store,
            events,
            blocks,
            published: Mutex::new(PublishedVersions::default()),
        }
    }

    /// Rebuild a publisher from the publication blocks of a restored ledger.
    ///
    /// Every version found is marked as published, and the last one is
    /// verified and loaded into the store as the active document. Ledgers
    /// without publications give the same publisher as [`new`](Self::new).
    pub async fn restore(
        store: Arc<ConstitutionStore>,
        events: Arc<EventLedger>,
        blocks: Arc<BlockLedger>,
    ) -> Result<Self> {
        let history = blocks.by_type(PUBLISHED_BLOCK, usize::MAX).await;

        let mut published = PublishedVersions::default();
        let mut last = None;
        for block in history {
            let record: PublishedBlock = serde_json::from_value(block.data)?;
            published
                .seen
                .insert((record.constitution_id.clone(), record.version.clone()));
            last = Some(record);
        }

        if let Some(mut record) = last {
            let document = match record.document.take() {
                Some(document) if document.hash == record.hash => document,
                Some(_) => {
                    return Err(Self::broken_history(
                        &record,
                        "document hash differs from the published hash",
                    ));
                }
                None => {
                    return Err(Self::broken_history(
                        &record,
                        "publication block carries no document",
                    ));
                }
            };
            store.load(document).await?;
            published.active = Some(record.version.clone());

            info!(
                constitution_id = %record.constitution_id,
                version = %record.version,
                versions = published.seen.len(),
                "Constitution restored from ledger"
            );
        }

        Ok(Self {
            store,
            events,
            blocks,
            published: Mutex::new(published),
        })
    }

    fn broken_history(record: &PublishedBlock, reason: &str) -> ConstitutionError {
        error!(
            constitution_id = %record.constitution_id,
            version = %record.version,
            reason,
            "Cannot restore published constitution"
        );
        ConstitutionError::Integrity(format!(
            "{} v{}: {}",
            record.constitution_id, record.version, reason
        ))
    }

    /// Version most recently published, if any.
    pub async fn active_version(&self) -> Option<String> {
        self.published.lock().await.active.clone()
    }

    /// Whether a version of a constitution has been published.
    pub async fn is_published(&self, id: &str, version: &str) -> bool {
        self.published
            .lock()
            .await
            .seen
            .contains(&(id.to_string(), version.to_string()))
    }

    /// Publish a version: install it in the store, anchor it and register
    /// a governance block.
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishResult> {
        let mut published = self.published.lock().await;

        Self::validate(&request, &published)?;

        let PublishRequest {
            constitution,
            kind,
            actor,
            reason,
            previous_version,
        } = request;

        let key = (constitution.id.clone(), constitution.version.clone());
        let installed = match &previous_version {
            None => self.store.load(constitution).await?,
            Some(previous) => self.store.supersede(constitution, previous).await?,
        };

        let anchor = self
            .events
            .anchor(
                AnchorPayload::new(
                    "constitution",
                    PUBLISHED_BLOCK,
                    AuditLevel::Critical,
                    serde_json::json!({
                        "id": installed.id,
                        "version": installed.version,
                        "hash": installed.hash,
                        "signer": installed.signer,
                        "kind": kind.as_str(),
                        "actor": actor,
                        "reason": reason,
                        "previous_version": previous_version,
                        "articles": installed.articles.len(),
                        "rules": installed.rule_count(),
                    }),
                )
                .candidate(true)
                .with_subject(installed.id.clone()),
            )
            .await?;

        let appended = self
            .blocks
            .append(BlockPayload::new(
                BlockDomain::Governance,
                PUBLISHED_BLOCK,
                serde_json::json!({
                    "constitution_id": installed.id,
                    "version": installed.version,
                    "hash": installed.hash,
                    "kind": kind.as_str(),
                    "previous_version": previous_version,
                    "anchor_id": anchor.id,
                    "anchor_hash": anchor.hash,
                    "document": installed.as_ref(),
                }),
            ))
            .await?;

        published.seen.insert(key);
        published.active = Some(installed.version.clone());

        info!(
            constitution_id = %installed.id,
            version = %installed.version,
            kind = kind.as_str(),
            actor = %actor,
            block_index = appended.block.index,
            "Constitution published"
        );

        Ok(PublishResult {
            constitution_id: installed.id.clone(),
            version: installed.version.clone(),
            hash: installed.hash.clone(),
            kind,
            anchor,
            block: appended.block,
        })
    }

    fn validate(request: &PublishRequest, published: &PublishedVersions) -> Result<()> {
        if request.actor.trim().is_empty() {
            return Err(ConstitutionError::Validation("publish actor must not be empty".to_string()));
        }
        if request.reason.trim().is_empty() {
            return Err(ConstitutionError::Validation("publish reason must not be empty".to_string()));
        }

        let id = &request.constitution.id;
        let version = &request.constitution.version;
        if published.seen.contains(&(id.clone(), version.clone())) {
            return Err(ConstitutionError::AlreadyPublished {
                id: id.clone(),
                version: version.clone(),
            });
        }

        match (&published.active, &request.previous_version) {
            (None, Some(previous)) => Err(ConstitutionError::Validation(format!(
                "nothing is published yet, but previous version {} was given",
                previous
            ))),
            (None, None) if request.kind == PublishKind::Amendment => Err(
                ConstitutionError::Validation("an amendment needs a published version".to_string()),
            ),
            (Some(active), None) => Err(ConstitutionError::Validation(format!(
                "version {} is published; a new version must reference it",
                active
            ))),
            (Some(active), Some(previous)) if active != previous => {
                Err(ConstitutionError::Validation(format!(
                    "previous version {} does not match published version {}",
                    previous, active
                )))
            }
            (Some(_), Some(_)) if request.kind == PublishKind::Initial => Err(
                ConstitutionError::Validation("only the first publication is initial".to_string()),
            ),
            _ => Ok(()),
        }
    }
}
