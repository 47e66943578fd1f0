use crate::errors::AppError;
use crate::fingerprint::ContentFingerprint;
use crate::models::{BusinessRecord, IdentityKeys, UpsertOutcome};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable business storage keyed by identity.
///
/// Every `upsert` is a single-document atomic operation: either the merged
/// document is stored under the identity's storage key or nothing changes.
/// Replaying the same call is harmless.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn upsert(
        &self,
        keys: &IdentityKeys,
        record: &BusinessRecord,
    ) -> Result<UpsertOutcome, AppError>;

    async fn find(&self, keys: &IdentityKeys) -> Result<Option<BusinessRecord>, AppError>;
}

/// Resolves the storage key or refuses the write.
pub fn require_storage_key(keys: &IdentityKeys, name: &str) -> Result<String, AppError> {
    keys.storage_key().ok_or_else(|| {
        AppError::MissingIdentity(format!(
            "business '{}' has neither a listing URL nor a usable phone",
            name
        ))
    })
}

#[derive(Debug, Clone)]
struct StoredDocument {
    record: BusinessRecord,
    fingerprint: ContentFingerprint,
}

/// In-process [`DedupStore`] with the same merge rules as the Postgres store.
///
/// The write lock is held across the read-merge-write, which makes each
/// upsert atomic with respect to concurrent callers.
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<BusinessRecord> {
        self.documents
            .read()
            .await
            .values()
            .map(|doc| doc.record.clone())
            .collect()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn upsert(
        &self,
        keys: &IdentityKeys,
        record: &BusinessRecord,
    ) -> Result<UpsertOutcome, AppError> {
        let key = require_storage_key(keys, &record.name)?;
        let fingerprint = ContentFingerprint::of(record);
        let now = Utc::now();

        let mut documents = self.documents.write().await;
        match documents.get_mut(&key) {
            Some(existing) if existing.fingerprint == fingerprint => {
                tracing::debug!("No changes for business: {} | {}", record.name, key);
                Ok(UpsertOutcome::Unchanged)
            }
            Some(existing) => {
                let mut merged = existing.record.clone();
                merged.merge_from(record);
                merged.updated_at = Some(now);
                existing.record = merged;
                existing.fingerprint = fingerprint;
                tracing::info!("Updated existing business: {} | {}", record.name, key);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let mut inserted = record.clone();
                inserted.created_at = Some(now);
                inserted.updated_at = Some(now);
                documents.insert(
                    key.clone(),
                    StoredDocument {
                        record: inserted,
                        fingerprint,
                    },
                );
                tracing::info!("Inserted new business: {} | {}", record.name, key);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn find(&self, keys: &IdentityKeys) -> Result<Option<BusinessRecord>, AppError> {
        let Some(key) = keys.storage_key() else {
            return Ok(None);
        };
        Ok(self
            .documents
            .read()
            .await
            .get(&key)
            .map(|doc| doc.record.clone()))
    }
}
