//! Chain fingerprints.
//!
//! Every entry hash binds the entry's position, its serialized payload, its
//! timestamp and the hash of the entry before it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Compute SHA256 hash of content.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Compute the chain hash of one entry.
///
/// `prev_hash` of `None` (the genesis position) and `Some("")` hash
/// differently.
pub fn chain_hash<P: Serialize + ?Sized>(
    index: u64,
    payload: &P,
    timestamp: DateTime<Utc>,
    prev_hash: Option<&str>,
) -> Result<String> {
    let body = serde_json::to_vec(payload)?;

    let mut hasher = Sha256::new();
    hasher.update(index.to_be_bytes());
    hasher.update((body.len() as u64).to_be_bytes());
    hasher.update(&body);
    hasher.update(timestamp.timestamp_millis().to_be_bytes());
    match prev_hash {
        Some(prev) => {
            hasher.update([1u8]);
            hasher.update(prev.as_bytes());
        }
        None => hasher.update([0u8]),
    }

    Ok(hex::encode(hasher.finalize()))
}
