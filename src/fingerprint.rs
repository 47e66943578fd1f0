use crate::models::BusinessRecord;
use sha2::{Digest, Sha256};

/// SHA-256 fingerprint of a business document's content.
///
/// Storage timestamps are excluded, so replaying the same extraction
/// produces the same fingerprint and the store can answer `Unchanged`
/// instead of rewriting the row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Computes the fingerprint of `record`.
    pub fn of(record: &BusinessRecord) -> Self {
        let mut canonical = record.clone();
        canonical.created_at = None;
        canonical.updated_at = None;
        let serialized = serde_json::to_string(&canonical).unwrap_or_default();
        Self(Self::compute_checksum(&serialized))
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
