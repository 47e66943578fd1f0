//! One-shot email discovery for a single domain, printed as JSON.
//!
//! Usage: `discover_emails <domain> [First:Last ...]`

use anyhow::Context;
use rust_lead_harvester::config::{ConfidencePriors, CrawlSettings, EmailSettings};
use rust_lead_harvester::enrichment::{extract_domain, EmailDiscovery};
use rust_lead_harvester::fetcher::HttpFetcher;
use rust_lead_harvester::identity::IdentityRotator;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parses `First:Last` arguments; a bare word is taken as a first name.
fn parse_names(args: &[String]) -> Vec<(String, String)> {
    args.iter()
        .map(|arg| match arg.split_once(':') {
            Some((first, last)) => (first.to_string(), last.to_string()),
            None => (arg.to_string(), String::new()),
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_harvester=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let target = args
        .first()
        .context("usage: discover_emails <domain> [First:Last ...]")?;
    let domain = extract_domain(target)
        .with_context(|| format!("'{}' is not a domain or website URL", target))?;
    let names = parse_names(&args[1..]);

    let crawl = CrawlSettings::from_env()?;
    let email = EmailSettings::from_env()?;
    let priors = ConfidencePriors::from_env()?;

    let rotator = Arc::new(IdentityRotator::from_files(
        &crawl.proxy_list_path,
        &crawl.user_agents_path,
    ));
    let fetcher = Arc::new(HttpFetcher::new(email.scrape_timeout()));
    let discovery = EmailDiscovery::from_settings(&email, priors, fetcher, rotator);

    let set = discovery.discover(&domain, &names).await;
    println!("{}", serde_json::to_string_pretty(&set)?);
    Ok(())
}
