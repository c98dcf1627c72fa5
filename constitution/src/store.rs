//! ConstitutionStore: holds the active constitution and fails closed.
//!
//! Once any integrity check fails the store is permanently failed: every
//! later read returns an integrity error and nothing can be loaded again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::{ConstitutionError, Result};
use crate::types::Constitution;
use crate::verification::{hash_articles, verify_constitution, DigestSignatureVerifier, SignatureVerifier};

/// One version the store has held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: String,
    pub version: String,
    pub hash: String,
    /// Version this one replaced, `None` for the first
    pub previous_version: Option<String>,
    pub installed_at: DateTime<Utc>,
}

enum StoreState {
    Empty,
    Active(Arc<Constitution>),
    Failed { reason: String },
}

struct StoreInner {
    state: StoreState,
    history: Vec<VersionRecord>,
}

/// Versioned holder of the active constitution.
pub struct ConstitutionStore {
    inner: RwLock<StoreInner>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl ConstitutionStore {
    /// Create an empty store using the digest signature verifier.
    pub fn new() -> Self {
        Self::with_verifier(Arc::new(DigestSignatureVerifier))
    }

    /// Create an empty store with a custom signature verifier.
    pub fn with_verifier(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                state: StoreState::Empty,
                history: Vec::new(),
            }),
            verifier,
        }
    }

    /// Load the first constitution.
    ///
    /// Loading the document already held is a no-op. Replacing it requires
    /// [`supersede`](Self::supersede).
    pub async fn load(&self, document: Constitution) -> Result<Arc<Constitution>> {
        let mut inner = self.inner.write().await;

        match &inner.state {
            StoreState::Failed { reason } => {
                return Err(ConstitutionError::Integrity(reason.clone()));
            }
            StoreState::Active(current) => {
                if current.id == document.id
                    && current.version == document.version
                    && current.hash == document.hash
                {
                    return Ok(current.clone());
                }
                return Err(ConstitutionError::Validation(format!(
                    "constitution {} v{} is already loaded; a new version must name it as previous version",
                    current.id, current.version
                )));
            }
            StoreState::Empty => {}
        }

        self.install(&mut inner, document, None)
    }

    /// Replace the active constitution with a new version.
    pub async fn supersede(
        &self,
        document: Constitution,
        previous_version: &str,
    ) -> Result<Arc<Constitution>> {
        let mut inner = self.inner.write().await;

        let current = match &inner.state {
            StoreState::Failed { reason } => {
                return Err(ConstitutionError::Integrity(reason.clone()));
            }
            StoreState::Empty => return Err(ConstitutionError::NotLoaded),
            StoreState::Active(current) => current.clone(),
        };

        if current.version != previous_version {
            return Err(ConstitutionError::Validation(format!(
                "previous version {} does not match active version {}",
                previous_version, current.version
            )));
        }
        if current.version == document.version && current.id == document.id {
            return Err(ConstitutionError::Validation(format!(
                "new version must differ from {}",
                current.version
            )));
        }

        self.install(&mut inner, document, Some(previous_version.to_string()))
    }

    fn install(
        &self,
        inner: &mut StoreInner,
        document: Constitution,
        previous_version: Option<String>,
    ) -> Result<Arc<Constitution>> {
        if let Err(err) = verify_constitution(&document, self.verifier.as_ref()) {
            let reason = err.to_string();
            error!(
                constitution_id = %document.id,
                version = %document.version,
                reason = %reason,
                "Constitution failed verification, store is now failed"
            );
            inner.state = StoreState::Failed { reason };
            return Err(err);
        }

        let document = Arc::new(document);
        inner.history.push(VersionRecord {
            id: document.id.clone(),
            version: document.version.clone(),
            hash: document.hash.clone(),
            previous_version,
            installed_at: Utc::now(),
        });
        inner.state = StoreState::Active(document.clone());

        info!(
            constitution_id = %document.id,
            version = %document.version,
            articles = document.articles.len(),
            rules = document.rule_count(),
            "Constitution loaded"
        );

        Ok(document)
    }

    /// The active constitution.
    ///
    /// Errors when the store is failed or nothing has been loaded.
    pub async fn current(&self) -> Result<Arc<Constitution>> {
        let inner = self.inner.read().await;
        match &inner.state {
            StoreState::Active(current) => Ok(current.clone()),
            StoreState::Empty => Err(ConstitutionError::NotLoaded),
            StoreState::Failed { reason } => Err(ConstitutionError::Integrity(reason.clone())),
        }
    }

    /// Recompute the hash of the active document.
    ///
    /// A mismatch permanently fails the store. An empty store verifies.
    pub async fn verify_integrity(&self) -> bool {
        let mut inner = self.inner.write().await;

        let current = match &inner.state {
            StoreState::Failed { .. } => return false,
            StoreState::Empty => return true,
            StoreState::Active(current) => current.clone(),
        };

        let failure = match hash_articles(&current.articles) {
            Ok(hash) if hash == current.hash => return true,
            Ok(hash) => format!(
                "hash mismatch for {} v{}: stored {}, computed {}",
                current.id, current.version, current.hash, hash
            ),
            Err(err) => err.to_string(),
        };

        error!(constitution_id = %current.id, reason = %failure, "Constitution integrity lost");
        inner.state = StoreState::Failed { reason: failure };
        false
    }

    /// Whether the store has permanently failed.
    pub async fn is_failed(&self) -> bool {
        matches!(self.inner.read().await.state, StoreState::Failed { .. })
    }

    /// Every version installed, oldest first.
    pub async fn history(&self) -> Vec<VersionRecord> {
        self.inner.read().await.history.clone()
    }
}

impl Default for ConstitutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Article, Rule};
    use crate::verification::seal;

    fn document(version: &str) -> Constitution {
        seal(
            "tamv",
            version,
            "council",
            vec![Article {
                id: "art-1".to_string(),
                title: "Dignity".to_string(),
                domain: None,
                rules: vec![Rule::new("no-harm", "No harm").forbidding_targets(["user_harm"])],
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_load_and_current() {
        let store = ConstitutionStore::new();
        assert!(matches!(store.current().await, Err(ConstitutionError::NotLoaded)));

        store.load(document("1.0.0")).await.unwrap();
        assert_eq!(store.current().await.unwrap().version, "1.0.0");
        assert!(store.verify_integrity().await);

        // same document again is idempotent
        store.load(document("1.0.0")).await.unwrap();
        assert_eq!(store.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_document_fails_store_permanently() {
        let store = ConstitutionStore::new();

        let mut corrupt = document("1.0.0");
        corrupt.articles[0].rules[0].forbids_targets.clear();

        let err = store.load(corrupt).await.unwrap_err();
        assert!(err.is_integrity());
        assert!(store.is_failed().await);

        // a valid document can no longer be loaded
        assert!(store.load(document("1.0.0")).await.unwrap_err().is_integrity());
        assert!(store.current().await.unwrap_err().is_integrity());
        assert!(!store.verify_integrity().await);
    }

    #[tokio::test]
    async fn test_no_silent_overwrite() {
        let store = ConstitutionStore::new();
        store.load(document("1.0.0")).await.unwrap();

        let err = store.load(document("1.1.0")).await.unwrap_err();
        assert!(err.is_validation());

        let err = store.supersede(document("1.1.0"), "0.9.0").await.unwrap_err();
        assert!(err.is_validation());

        store.supersede(document("1.1.0"), "1.0.0").await.unwrap();
        let history = store.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].previous_version.as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn test_supersede_requires_loaded() {
        let store = ConstitutionStore::new();
        let err = store.supersede(document("1.1.0"), "1.0.0").await.unwrap_err();
        assert!(matches!(err, ConstitutionError::NotLoaded));
    }
}
