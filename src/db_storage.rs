use crate::circuit_breaker::{create_db_circuit_breaker, DbCircuitBreaker};
use crate::dedup_store::{require_storage_key, DedupStore};
use crate::errors::{AppError, ResultExt};
use crate::fingerprint::ContentFingerprint;
use crate::models::{BusinessRecord, EnrichedEmailSet, IdentityKeys, UpsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Single-statement upsert. Text fields only override when the incoming
/// value is non-blank after trimming; the email set is replaced when one is supplied.
/// The `WHERE` clause skips the write when the same content is replayed,
/// in which case no row is returned.
const UPSERT_BUSINESS: &str = r#"
    INSERT INTO businesses (
        id, identity_key, listing_url, fallback_key, name, phone, website,
        hours, category, location, rating, review_count, emails,
        email_enriched_at, enrichment_methods, content_hash
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
    ON CONFLICT (identity_key) DO UPDATE SET
        listing_url = COALESCE(NULLIF(btrim(EXCLUDED.listing_url), ''), businesses.listing_url),
        fallback_key = COALESCE(EXCLUDED.fallback_key, businesses.fallback_key),
        name = COALESCE(NULLIF(btrim(EXCLUDED.name), ''), businesses.name),
        phone = COALESCE(NULLIF(btrim(EXCLUDED.phone), ''), businesses.phone),
        website = COALESCE(NULLIF(btrim(EXCLUDED.website), ''), businesses.website),
        hours = COALESCE(NULLIF(btrim(EXCLUDED.hours), ''), businesses.hours),
        category = COALESCE(NULLIF(btrim(EXCLUDED.category), ''), businesses.category),
        location = COALESCE(NULLIF(btrim(EXCLUDED.location), ''), businesses.location),
        rating = COALESCE(EXCLUDED.rating, businesses.rating),
        review_count = COALESCE(EXCLUDED.review_count, businesses.review_count),
        emails = COALESCE(EXCLUDED.emails, businesses.emails),
        email_enriched_at = COALESCE(EXCLUDED.email_enriched_at, businesses.email_enriched_at),
        enrichment_methods = CASE
            WHEN EXCLUDED.emails IS NULL THEN businesses.enrichment_methods
            ELSE EXCLUDED.enrichment_methods
        END,
        content_hash = EXCLUDED.content_hash,
        updated_at = now()
    WHERE businesses.content_hash IS DISTINCT FROM EXCLUDED.content_hash
    RETURNING (xmax = 0) AS inserted
"#;

const SELECT_COLUMNS: &str = r#"
    SELECT name, listing_url, phone, website, hours, category, location, rating,
           review_count, emails, created_at, updated_at
    FROM businesses
"#;

/// Postgres-backed [`DedupStore`]. Writes go through a circuit breaker so a
/// failing database turns into fast per-write failures instead of a pile-up.
pub struct PgDedupStore {
    pool: PgPool,
    breaker: DbCircuitBreaker,
}

impl PgDedupStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            breaker: create_db_circuit_breaker(),
        }
    }

    /// Businesses that have never been through email discovery, oldest first.
    pub async fn load_pending(&self, limit: i64) -> Result<Vec<BusinessRecord>, AppError> {
        let sql = format!(
            "{} WHERE email_enriched_at IS NULL ORDER BY created_at ASC LIMIT $1",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load businesses pending enrichment")?;

        rows.iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl DedupStore for PgDedupStore {
    async fn upsert(
        &self,
        keys: &IdentityKeys,
        record: &BusinessRecord,
    ) -> Result<UpsertOutcome, AppError> {
        let identity_key = require_storage_key(keys, &record.name)?;
        let fingerprint = ContentFingerprint::of(record);

        let emails_json = record
            .emails
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| AppError::InternalError(format!("Failed to serialize emails: {}", e)))?;
        let email_enriched_at = record.emails.as_ref().map(|set| set.email_enriched_at());
        let methods: Vec<String> = record
            .emails
            .as_ref()
            .map(|set| {
                set.enrichment_methods()
                    .iter()
                    .map(|m| m.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let review_count = record
            .review_count
            .map(|n| i32::try_from(n).unwrap_or(i32::MAX));

        let write = sqlx::query(UPSERT_BUSINESS)
            .bind(Uuid::new_v4())
            .bind(&identity_key)
            .bind(&record.listing_url)
            .bind(&keys.fallback_key)
            .bind(&record.name)
            .bind(&record.phone)
            .bind(&record.website)
            .bind(&record.hours)
            .bind(&record.category)
            .bind(&record.location)
            .bind(record.rating)
            .bind(review_count)
            .bind(emails_json)
            .bind(email_enriched_at)
            .bind(&methods)
            .bind(fingerprint.as_str())
            .fetch_optional(&self.pool);

        let row = match self.breaker.call(write).await {
            Ok(row) => row,
            Err(failsafe::Error::Rejected) => {
                tracing::error!(
                    "Business store circuit open, dropping write for {}",
                    identity_key
                );
                return Err(AppError::PersistenceConflict(
                    "business store unavailable (circuit open)".to_string(),
                ));
            }
            Err(failsafe::Error::Inner(e)) => {
                tracing::error!("Error saving business {} | {}: {}", record.name, identity_key, e);
                return Err(classify_write_error(e));
            }
        };

        let outcome = match row {
            None => UpsertOutcome::Unchanged,
            Some(row) => {
                let inserted: bool = row.try_get("inserted").map_err(AppError::DatabaseError)?;
                if inserted {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::Updated
                }
            }
        };

        match outcome {
            UpsertOutcome::Inserted => {
                tracing::info!("Inserted new business: {} | {}", record.name, identity_key)
            }
            UpsertOutcome::Updated => {
                tracing::info!("Updated existing business: {} | {}", record.name, identity_key)
            }
            UpsertOutcome::Unchanged => {
                tracing::debug!("No changes for business: {} | {}", record.name, identity_key)
            }
        }
        Ok(outcome)
    }

    async fn find(&self, keys: &IdentityKeys) -> Result<Option<BusinessRecord>, AppError> {
        let Some(identity_key) = keys.storage_key() else {
            return Ok(None);
        };
        let sql = format!("{} WHERE identity_key = $1 LIMIT 1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(&identity_key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load business {}", identity_key))?;

        row.as_ref().map(row_to_record).transpose()
    }
}

/// Unique violations on anything but the identity key, serialization
/// failures and deadlocks are per-write conflicts; the rest stays a
/// database error.
fn classify_write_error(err: sqlx::Error) -> AppError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|c| c.to_string());
    match code.as_deref() {
        Some("23505") | Some("40001") | Some("40P01") => {
            AppError::PersistenceConflict(err.to_string())
        }
        _ => AppError::DatabaseError(err),
    }
}

fn row_to_record(row: &PgRow) -> Result<BusinessRecord, AppError> {
    let emails: Option<serde_json::Value> = row.try_get("emails")?;
    let emails = emails
        .map(serde_json::from_value::<EnrichedEmailSet>)
        .transpose()
        .map_err(|e| AppError::InternalError(format!("Stored email set is malformed: {}", e)))?;
    let review_count: Option<i32> = row.try_get("review_count")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(BusinessRecord {
        name: row.try_get("name")?,
        listing_url: row.try_get("listing_url")?,
        phone: row.try_get("phone")?,
        website: row.try_get("website")?,
        hours: row.try_get("hours")?,
        category: row.try_get("category")?,
        location: row.try_get("location")?,
        rating: row.try_get("rating")?,
        review_count: review_count.and_then(|n| u32::try_from(n).ok()),
        emails,
        created_at: Some(created_at),
        updated_at: Some(updated_at),
    })
}
