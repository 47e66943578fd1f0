use sqlx::{postgres::PgPoolOptions, PgPool};

/// Schema for the business store. Completeness flags are generated columns so
/// they always reflect the merged row, whichever writer produced it.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS businesses (
        id UUID PRIMARY KEY,
        identity_key TEXT NOT NULL UNIQUE,
        listing_url TEXT,
        fallback_key TEXT,
        name TEXT NOT NULL,
        phone TEXT,
        website TEXT,
        hours TEXT,
        category TEXT,
        location TEXT,
        rating DOUBLE PRECISION,
        review_count INTEGER,
        emails JSONB,
        email_enriched_at TIMESTAMPTZ,
        enrichment_methods TEXT[] NOT NULL DEFAULT '{}',
        content_hash TEXT NOT NULL,
        has_phone BOOLEAN GENERATED ALWAYS AS (COALESCE(length(phone) >= 6, false)) STORED,
        has_website BOOLEAN GENERATED ALWAYS AS (COALESCE(website LIKE 'http%', false)) STORED,
        has_email BOOLEAN GENERATED ALWAYS AS (
            COALESCE(jsonb_array_length(emails -> 'emails') > 0, false)
        ) STORED,
        is_complete BOOLEAN GENERATED ALWAYS AS (
            COALESCE(length(phone) >= 6 AND website LIKE 'http%', false)
        ) STORED,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS businesses_fallback_key_idx ON businesses (fallback_key)",
    "CREATE INDEX IF NOT EXISTS businesses_email_enriched_at_idx ON businesses (email_enriched_at)",
];

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates the business table and indexes if they do not exist yet.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Database schema is up to date");
        Ok(())
    }
}
