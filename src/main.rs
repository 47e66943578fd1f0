use anyhow::Context;
use rust_lead_harvester::config::Config;
use rust_lead_harvester::db::Database;
use rust_lead_harvester::db_storage::PgDedupStore;
use rust_lead_harvester::detail_parser::MapsDetailParser;
use rust_lead_harvester::enrichment::{EmailDiscovery, EnrichmentCoordinator};
use rust_lead_harvester::fetcher::HttpFetcher;
use rust_lead_harvester::identity::IdentityRotator;
use rust_lead_harvester::rate_limiter::TokioClock;
use rust_lead_harvester::retry::{CrawlDependencies, RetryOrchestrator};
use rust_lead_harvester::stats::CrawlStats;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Businesses loaded per run when no limit is given on the command line.
const DEFAULT_BATCH_LIMIT: i64 = 500;

enum RunMode {
    /// Enrich stored businesses that have not been through email discovery.
    Pending { limit: i64 },
    /// Crawl a search results page, then enrich what it listed.
    Harvest {
        query: String,
        location: String,
        max_results: Option<usize>,
    },
}

fn parse_args(args: &[String]) -> anyhow::Result<RunMode> {
    match args {
        [] => Ok(RunMode::Pending {
            limit: DEFAULT_BATCH_LIMIT,
        }),
        [mode, rest @ ..] if mode == "harvest" => match rest {
            [query, location] => Ok(RunMode::Harvest {
                query: query.clone(),
                location: location.clone(),
                max_results: None,
            }),
            [query, location, max] => {
                let max_results = max
                    .parse::<usize>()
                    .ok()
                    .filter(|m| *m > 0)
                    .with_context(|| format!("MAX must be a positive number, got '{}'", max))?;
                Ok(RunMode::Harvest {
                    query: query.clone(),
                    location: location.clone(),
                    max_results: Some(max_results),
                })
            }
            _ => anyhow::bail!("usage: rust-lead-harvester harvest <QUERY> <LOCATION> [MAX]"),
        },
        [limit] => {
            let limit = limit
                .parse::<i64>()
                .with_context(|| format!("LIMIT must be a positive number, got '{}'", limit))?;
            if limit <= 0 {
                anyhow::bail!("LIMIT must be a positive number, got {}", limit);
            }
            Ok(RunMode::Pending { limit })
        }
        _ => anyhow::bail!("usage: rust-lead-harvester [LIMIT]"),
    }
}

/// Main entry point for the harvester.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and schema.
/// - Identity pools, fetcher, crawl state machine and email discovery.
///
/// It then enriches every stored business that has not been through email
/// discovery yet, or with `harvest` first reads the businesses from a search
/// results page. Ctrl-C stops the batch between businesses.
///
/// Usage: `rust-lead-harvester [LIMIT]` or
/// `rust-lead-harvester harvest <QUERY> <LOCATION> [MAX]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_harvester=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_args(&args)?;

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");
    db.migrate().await?;

    let store = Arc::new(PgDedupStore::new(db.pool.clone()));

    // Identity pools are loaded once and shared by every enrichment
    let rotator = Arc::new(IdentityRotator::from_files(
        &config.crawl.proxy_list_path,
        &config.crawl.user_agents_path,
    ));

    let fetcher = Arc::new(HttpFetcher::new(config.crawl.fetch_timeout()));
    let stats = Arc::new(CrawlStats::new());

    let crawler = Arc::new(RetryOrchestrator::from_settings(
        CrawlDependencies {
            fetcher: fetcher.clone(),
            extractor: Arc::new(MapsDetailParser::new()),
            rotator: rotator.clone(),
            store: store.clone(),
            stats: stats.clone(),
            clock: Arc::new(TokioClock),
        },
        &config.crawl,
        config.default_phone_region.clone(),
    ));
    let discovery = Arc::new(EmailDiscovery::from_settings(
        &config.email,
        config.confidence,
        fetcher,
        rotator,
    ));
    let coordinator =
        EnrichmentCoordinator::new(crawler.clone(), discovery, config.crawl.batch_concurrency);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, finishing in-flight businesses");
            ctrl_c_token.cancel();
        }
    });

    let pending = match mode {
        RunMode::Pending { limit } => store.load_pending(limit).await?,
        RunMode::Harvest {
            query,
            location,
            max_results,
        } => {
            let max_results = max_results.unwrap_or(config.crawl.max_search_results);
            let harvest = crawler.harvest(&query, &location, max_results).await;
            if let Some(error) = &harvest.error {
                anyhow::bail!("Search page {} could not be read: {}", harvest.search_url, error);
            }
            harvest.records
        }
    };
    if pending.is_empty() {
        tracing::info!("No businesses pending enrichment");
        return Ok(());
    }

    let report = coordinator.enrich_batch(pending, cancel).await;
    tracing::info!(
        "Crawl stats: {} attempted, {} persisted, {} captchas, {} detail ok, {} detail failed ({:.1}% success)",
        report.stats.total_attempted,
        report.stats.total_successful,
        report.stats.captcha_encounters,
        report.stats.detail_successes,
        report.stats.detail_failures,
        report.stats.success_rate()
    );

    Ok(())
}
