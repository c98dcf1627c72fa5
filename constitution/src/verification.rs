//! Integrity verification for constitution documents.
//!
//! The document hash is SHA256 over the canonical JSON of its articles
//! (object keys sorted, unset optional fields omitted). Signatures are
//! checked through the [`SignatureVerifier`] seam.

use audit_ledger::compute_hash;
use chrono::Utc;

use crate::error::{ConstitutionError, Result};
use crate::types::{Article, Constitution};

/// Canonical byte serialization of a set of articles.
pub fn canonical_articles(articles: &[Article]) -> Result<Vec<u8>> {
    // serde_json::Value maps are ordered by key, so a round trip through
    // Value yields a stable key order.
    let value = serde_json::to_value(articles)?;
    Ok(serde_json::to_vec(&value)?)
}

/// Compute the document hash of a set of articles.
pub fn hash_articles(articles: &[Article]) -> Result<String> {
    Ok(compute_hash(&canonical_articles(articles)?))
}

/// Trait for checking a constitution's signature.
pub trait SignatureVerifier: Send + Sync {
    /// Check `signature` for the given document hash and signer.
    fn verify(&self, hash: &str, signer: &str, signature: &str) -> bool;
}

/// Default verifier: the signature is SHA256 of `signer:hash`.
///
/// Detects accidental or careless edits; it is not a cryptographic
/// signature scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSignatureVerifier;

impl DigestSignatureVerifier {
    /// Produce the signature for a hash and signer.
    pub fn sign(&self, hash: &str, signer: &str) -> String {
        compute_hash(format!("{}:{}", signer, hash).as_bytes())
    }
}

impl SignatureVerifier for DigestSignatureVerifier {
    fn verify(&self, hash: &str, signer: &str, signature: &str) -> bool {
        self.sign(hash, signer) == signature
    }
}

/// Check a document's hash and, when present, its signature.
pub fn verify_constitution(
    constitution: &Constitution,
    verifier: &dyn SignatureVerifier,
) -> Result<()> {
    let expected = hash_articles(&constitution.articles)?;
    if expected != constitution.hash {
        return Err(ConstitutionError::Integrity(format!(
            "hash mismatch for {} v{}: stored {}, computed {}",
            constitution.id, constitution.version, constitution.hash, expected
        )));
    }

    if let Some(signature) = &constitution.signature {
        if !verifier.verify(&constitution.hash, &constitution.signer, signature) {
            return Err(ConstitutionError::Integrity(format!(
                "signature mismatch for {} v{} (signer {})",
                constitution.id, constitution.version, constitution.signer
            )));
        }
    }

    Ok(())
}

/// Build a hashed and signed constitution.
pub fn seal(
    id: impl Into<String>,
    version: impl Into<String>,
    signer: impl Into<String>,
    articles: Vec<Article>,
) -> Result<Constitution> {
    let signer = signer.into();
    let hash = hash_articles(&articles)?;
    let signature = DigestSignatureVerifier.sign(&hash, &signer);

    Ok(Constitution {
        id: id.into(),
        version: version.into(),
        created_at: Utc::now(),
        signer,
        hash,
        signature: Some(signature),
        articles,
    })
}
