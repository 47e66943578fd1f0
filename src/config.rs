use serde::Deserialize;
use std::time::Duration;

/// Timing and retry knobs for the listing detail crawl.
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlSettings {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub fetch_timeout_secs: u64,
    pub proxy_list_path: String,
    pub user_agents_path: String,
    pub batch_concurrency: usize,
    /// Root of the search results endpoint used by harvest runs.
    pub search_base_url: String,
    pub max_search_results: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            min_delay_ms: 1000,
            max_delay_ms: 3500,
            max_attempts: 3,
            base_backoff_ms: 2000,
            fetch_timeout_secs: 20,
            proxy_list_path: "proxies.txt".to_string(),
            user_agents_path: "user_agents.txt".to_string(),
            batch_concurrency: 4,
            search_base_url: crate::search_parser::DEFAULT_SEARCH_BASE_URL.to_string(),
            max_search_results: 25,
        }
    }
}

impl CrawlSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Settings for the email discovery sources.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    pub smtp_timeout_secs: u64,
    pub whois_timeout_secs: u64,
    pub scrape_timeout_secs: u64,
    pub contact_page_concurrency: usize,
    pub max_smtp_probes: usize,
    pub smtp_sender: String,
    pub smtp_helo_name: String,
    pub whois_server: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_timeout_secs: 10,
            whois_timeout_secs: 10,
            scrape_timeout_secs: 10,
            contact_page_concurrency: 4,
            max_smtp_probes: 25,
            smtp_sender: "verify@leadgen.local".to_string(),
            smtp_helo_name: "leadgen.local".to_string(),
            whois_server: "whois.iana.org".to_string(),
        }
    }
}

impl EmailSettings {
    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_secs)
    }

    pub fn whois_timeout(&self) -> Duration {
        Duration::from_secs(self.whois_timeout_secs)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }
}

/// Prior confidence assigned to each discovery outcome.
///
/// These are hard-coded priors rather than measured rates, so they are
/// tunable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ConfidencePriors {
    pub pattern_smtp: u8,
    pub scraped: u8,
    pub whois: u8,
    pub unknown: u8,
}

impl Default for ConfidencePriors {
    fn default() -> Self {
        Self {
            pattern_smtp: 90,
            scraped: 95,
            whois: 40,
            unknown: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub default_phone_region: String,
    pub crawl: CrawlSettings,
    pub email: EmailSettings,
    pub confidence: ConfidencePriors,
}

impl CrawlSettings {
    /// Reads the crawl section, falling back to defaults for unset variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let crawl = Self {
            min_delay_ms: env_number("MIN_DELAY_MS", defaults.min_delay_ms)?,
            max_delay_ms: env_number("MAX_DELAY_MS", defaults.max_delay_ms)?,
            max_attempts: env_number("MAX_DETAIL_ATTEMPTS", defaults.max_attempts)?,
            base_backoff_ms: env_number("BASE_BACKOFF_MS", defaults.base_backoff_ms)?,
            fetch_timeout_secs: env_number("FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs)?,
            proxy_list_path: env_string("PROXY_LIST_PATH", &defaults.proxy_list_path),
            user_agents_path: env_string("USER_AGENTS_PATH", &defaults.user_agents_path),
            batch_concurrency: env_number("BATCH_CONCURRENCY", defaults.batch_concurrency)?,
            search_base_url: env_string("SEARCH_BASE_URL", &defaults.search_base_url),
            max_search_results: env_number("MAX_SEARCH_RESULTS", defaults.max_search_results)?,
        };

        if crawl.min_delay_ms > crawl.max_delay_ms {
            anyhow::bail!("MIN_DELAY_MS cannot exceed MAX_DELAY_MS");
        }
        if crawl.max_attempts == 0 {
            anyhow::bail!("MAX_DETAIL_ATTEMPTS must be at least 1");
        }
        if crawl.batch_concurrency == 0 {
            anyhow::bail!("BATCH_CONCURRENCY must be at least 1");
        }
        if url::Url::parse(&crawl.search_base_url).is_err() {
            anyhow::bail!("SEARCH_BASE_URL must be an absolute URL");
        }
        Ok(crawl)
    }
}

impl EmailSettings {
    /// Reads the email discovery section, falling back to defaults for unset variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let email = Self {
            smtp_timeout_secs: env_number("SMTP_TIMEOUT_SECS", defaults.smtp_timeout_secs)?,
            whois_timeout_secs: env_number("WHOIS_TIMEOUT_SECS", defaults.whois_timeout_secs)?,
            scrape_timeout_secs: env_number("SCRAPE_TIMEOUT_SECS", defaults.scrape_timeout_secs)?,
            contact_page_concurrency: env_number(
                "CONTACT_PAGE_CONCURRENCY",
                defaults.contact_page_concurrency,
            )?,
            max_smtp_probes: env_number("MAX_SMTP_PROBES", defaults.max_smtp_probes)?,
            smtp_sender: env_string("SMTP_SENDER", &defaults.smtp_sender),
            smtp_helo_name: env_string("SMTP_HELO_NAME", &defaults.smtp_helo_name),
            whois_server: env_string("WHOIS_SERVER", &defaults.whois_server),
        };

        if !email.smtp_sender.contains('@') {
            anyhow::bail!("SMTP_SENDER must be an email address");
        }
        if email.contact_page_concurrency == 0 {
            anyhow::bail!("CONTACT_PAGE_CONCURRENCY must be at least 1");
        }
        Ok(email)
    }
}

impl ConfidencePriors {
    /// Reads the confidence priors, each validated to 0..=100.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            pattern_smtp: env_confidence("CONFIDENCE_PATTERN_SMTP", defaults.pattern_smtp)?,
            scraped: env_confidence("CONFIDENCE_SCRAPED", defaults.scraped)?,
            whois: env_confidence("CONFIDENCE_WHOIS", defaults.whois)?,
            unknown: env_confidence("CONFIDENCE_UNKNOWN", defaults.unknown)?,
        })
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            default_phone_region: default_phone_region(),
            crawl: CrawlSettings::from_env()?,
            email: EmailSettings::from_env()?,
            confidence: ConfidencePriors::from_env()?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Database URL: {}...", redacted_prefix(&config.database_url));
        tracing::debug!(
            "Crawl delays: {}-{}ms, {} attempts, {}ms base backoff",
            config.crawl.min_delay_ms,
            config.crawl.max_delay_ms,
            config.crawl.max_attempts,
            config.crawl.base_backoff_ms
        );
        tracing::debug!("Confidence priors: {:?}", config.confidence);

        Ok(config)
    }
}

/// `DEFAULT_PHONE_REGION`, uppercased; `US` when unset.
pub fn default_phone_region() -> String {
    env_string("DEFAULT_PHONE_REGION", "US").to_uppercase()
}

/// First characters of a connection string, cut on a character boundary.
fn redacted_prefix(url: &str) -> String {
    url.chars().take(20).collect()
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid non-negative number", key)),
        _ => Ok(default),
    }
}

fn env_confidence(key: &str, default: u8) -> anyhow::Result<u8> {
    let value: u8 = env_number(key, default)?;
    if value > 100 {
        anyhow::bail!("{} must be between 0 and 100", key);
    }
    Ok(value)
}
