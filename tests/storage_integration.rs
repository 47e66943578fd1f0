use std::env;
use uuid::Uuid;

use rust_lead_harvester::db::Database;
use rust_lead_harvester::db_storage::PgDedupStore;
use rust_lead_harvester::dedup_store::{DedupStore, InMemoryDedupStore};
use rust_lead_harvester::models::{BusinessRecord, UpsertOutcome};

/// Integration smoke test for the Postgres dedup store.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn upsert_is_idempotent_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.migrate().await?;
    let store = PgDedupStore::new(db.pool.clone());

    // Use a unique listing URL to avoid conflicts on repeated runs.
    let listing = format!("https://maps.example.com/place/{}", Uuid::new_v4());
    let mut record = BusinessRecord::new("Smoke Test Plumbing", Some(listing));
    record.phone = Some("(212) 736-5000".to_string());
    let keys = record.identity_keys("US");

    let first = store
        .upsert(&keys, &record)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(first, UpsertOutcome::Inserted);

    let replay = store
        .upsert(&keys, &record)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(replay, UpsertOutcome::Unchanged);

    record.website = Some("https://smoke-test.example.com/".to_string());
    let changed = store
        .upsert(&keys, &record)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(changed, UpsertOutcome::Updated);

    let stored = store
        .find(&keys)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .ok_or_else(|| anyhow::anyhow!("record not found after upsert"))?;
    assert_eq!(stored.name, "Smoke Test Plumbing");
    assert_eq!(stored.phone.as_deref(), Some("(212) 736-5000"));
    assert_eq!(stored.website.as_deref(), Some("https://smoke-test.example.com/"));
    Ok(())
}

/// Records without any identity key are refused, never stored.
#[tokio::test]
#[ignore]
async fn record_without_identity_is_rejected() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.migrate().await?;
    let store = PgDedupStore::new(db.pool.clone());

    let record = BusinessRecord::new("Nameless", None);
    let result = store.upsert(&record.identity_keys("US"), &record).await;
    assert!(result.is_err());
    Ok(())
}

/// Whitespace-only fields merge the same way in Postgres and in memory.
#[tokio::test]
#[ignore]
async fn blank_text_fields_keep_stored_values() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.migrate().await?;
    let postgres = PgDedupStore::new(db.pool.clone());
    let memory = InMemoryDedupStore::new();

    let listing = format!("https://maps.example.com/place/{}", Uuid::new_v4());
    let mut record = BusinessRecord::new("Blank Field Bakery", Some(listing));
    record.phone = Some("(212) 736-5000".to_string());
    let keys = record.identity_keys("US");

    let mut update = record.clone();
    update.phone = Some("   ".to_string());
    update.website = Some("  https://blank-field.example.com/ ".to_string());

    for store in [&postgres as &dyn DedupStore, &memory as &dyn DedupStore] {
        store
            .upsert(&keys, &record)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        store
            .upsert(&keys, &update)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        let stored = store
            .find(&keys)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?
            .ok_or_else(|| anyhow::anyhow!("record not found after upsert"))?;
        assert_eq!(stored.phone.as_deref(), Some("(212) 736-5000"));
        assert_eq!(stored.website.as_deref(), Some("https://blank-field.example.com/"));
    }
    Ok(())
}
