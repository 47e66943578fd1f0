use crate::captcha::CaptchaSignal;
use crate::config::CrawlSettings;
use crate::dedup_store::DedupStore;
use crate::detail_parser::DetailExtractor;
use crate::errors::AppError;
use crate::fetcher::Fetch;
use crate::identity::IdentityRotator;
use crate::models::{BusinessRecord, DetailFields, Identity, UpsertOutcome};
use crate::rate_limiter::{Clock, RateLimiter};
use crate::search_parser::{parse_cards, search_url, DEFAULT_SEARCH_BASE_URL};
use crate::stats::CrawlStats;
use std::sync::Arc;
use std::time::Duration;

/// Attempt budget and backoff schedule for one business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    /// Upper bound for one fetch; keeps a hung connection from holding the attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &CrawlSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_backoff_ms: settings.base_backoff_ms,
            attempt_timeout: settings.fetch_timeout(),
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `base × attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&CrawlSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Success,
    Exhausted,
    /// A failure no retry can fix (no listing URL, page gone, non-transient error).
    Failed,
}

/// States of the per-business detail crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Init,
    Attempting { attempt: u32 },
    RetryWait { attempt: u32, backoff: Duration },
    Terminal(TerminalState),
}

/// Typed result of one attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T = DetailFields> {
    Success(T),
    /// A challenge page was served; carries the indicator that matched.
    Blocked(&'static str),
    Failed(AppError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrawlOutcome {
    /// Detail fields were extracted; `record` is the business with them applied.
    Success { record: BusinessRecord },
    Exhausted { last_error: String },
    Failed { reason: String },
}

/// Everything that happened while crawling one business.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,
    pub attempts: u32,
    pub captcha_encounters: u32,
    pub transitions: Vec<CrawlState>,
    /// What the store did with the enriched record, when it was written.
    pub persisted: Option<UpsertOutcome>,
}

impl CrawlReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CrawlOutcome::Success { .. })
    }

    pub fn record(&self) -> Option<&BusinessRecord> {
        match &self.outcome {
            CrawlOutcome::Success { record } => Some(record),
            _ => None,
        }
    }

    pub fn final_state(&self) -> Option<CrawlState> {
        self.transitions.last().copied()
    }
}

/// Result of crawling one search results page into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestReport {
    pub search_url: String,
    /// Businesses read from the page, capped at the requested maximum.
    pub records: Vec<BusinessRecord>,
    pub attempts: u32,
    pub captcha_encounters: u32,
    pub transitions: Vec<CrawlState>,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Why the page could not be read, when it could not.
    pub error: Option<String>,
}

impl HarvestReport {
    pub fn final_state(&self) -> Option<CrawlState> {
        self.transitions.last().copied()
    }
}

enum LoopFailure {
    Exhausted(AppError),
    Failed(AppError),
}

struct LoopOutcome<T> {
    result: Result<T, LoopFailure>,
    attempts: u32,
    captcha_encounters: u32,
}

/// Collaborators of the detail crawl, built once by the composition root.
#[derive(Clone)]
pub struct CrawlDependencies {
    pub fetcher: Arc<dyn Fetch>,
    pub extractor: Arc<dyn DetailExtractor>,
    pub rotator: Arc<IdentityRotator>,
    pub store: Arc<dyn DedupStore>,
    pub stats: Arc<CrawlStats>,
    pub clock: Arc<dyn Clock>,
}

/// Bounded-attempt state machine for extracting one business's detail page.
///
/// Attempts run strictly one after another. Each attempt paces itself through
/// the rate limiter, fetches with the current identity, checks for a
/// challenge page and extracts. Blocked pages and transient failures consume
/// an attempt, wait `base × attempt` and rotate identity. Exhaustion is a
/// non-fatal outcome: the business keeps the fields it already had.
///
/// Search results pages go through the same loop via [`RetryOrchestrator::harvest`].
pub struct RetryOrchestrator {
    deps: CrawlDependencies,
    captcha: CaptchaSignal,
    rate_limiter: RateLimiter,
    policy: RetryPolicy,
    default_region: String,
    search_base_url: String,
}

impl RetryOrchestrator {
    pub fn new(
        deps: CrawlDependencies,
        rate_limiter: RateLimiter,
        policy: RetryPolicy,
        default_region: impl Into<String>,
    ) -> Self {
        Self {
            deps,
            captcha: CaptchaSignal::new(),
            rate_limiter,
            policy,
            default_region: default_region.into(),
            search_base_url: DEFAULT_SEARCH_BASE_URL.to_string(),
        }
    }

    /// Builds the orchestrator from crawl settings, pacing on the injected clock.
    pub fn from_settings(
        deps: CrawlDependencies,
        settings: &CrawlSettings,
        default_region: impl Into<String>,
    ) -> Self {
        let rate_limiter =
            RateLimiter::new(settings.min_delay_ms, settings.max_delay_ms, deps.clock.clone());
        Self::new(deps, rate_limiter, RetryPolicy::from_settings(settings), default_region)
            .with_search_base_url(settings.search_base_url.clone())
    }

    pub fn with_search_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.search_base_url = base_url.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn DedupStore> {
        &self.deps.store
    }

    pub fn stats(&self) -> &Arc<CrawlStats> {
        &self.deps.stats
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// Crawls the detail page of `business` and persists the result.
    pub async fn run(&self, business: &BusinessRecord) -> CrawlReport {
        let stats = &self.deps.stats;
        stats.record_attempted();

        let mut transitions = vec![CrawlState::Init];
        let Some(url) = business
            .listing_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
        else {
            tracing::warn!("Business '{}' has no listing URL, skipping detail crawl", business.name);
            stats.record_detail_failure();
            transitions.push(CrawlState::Terminal(TerminalState::Failed));
            return CrawlReport {
                outcome: CrawlOutcome::Failed {
                    reason: "no listing URL".to_string(),
                },
                attempts: 0,
                captcha_encounters: 0,
                transitions,
                persisted: None,
            };
        };

        let extractor = &self.deps.extractor;
        let crawl = self
            .attempt_loop(url, &business.name, &mut transitions, |text| {
                extractor
                    .extract(text)
                    .map(|detail| Some(detail).filter(DetailFields::is_populated))
            })
            .await;

        let (outcome, persisted) = match crawl.result {
            Ok(detail) => {
                stats.record_detail_success();
                let mut record = business.clone();
                record.apply_detail(&detail);
                let persisted = self.persist(&record).await;
                tracing::info!(
                    listing_url = %url,
                    attempt = crawl.attempts,
                    "Detail extracted for '{}'",
                    business.name
                );
                (CrawlOutcome::Success { record }, persisted)
            }
            Err(LoopFailure::Exhausted(e)) => {
                stats.record_detail_failure();
                (
                    CrawlOutcome::Exhausted {
                        last_error: e.to_string(),
                    },
                    None,
                )
            }
            Err(LoopFailure::Failed(e)) => {
                stats.record_detail_failure();
                (
                    CrawlOutcome::Failed {
                        reason: e.to_string(),
                    },
                    None,
                )
            }
        };

        CrawlReport {
            outcome,
            attempts: crawl.attempts,
            captcha_encounters: crawl.captcha_encounters,
            transitions,
            persisted,
        }
    }

    /// Crawls the search results page for `query` in `location` and upserts
    /// up to `max_results` of the listed businesses.
    ///
    /// Stored records keep fields the search page does not show.
    pub async fn harvest(&self, query: &str, location: &str, max_results: usize) -> HarvestReport {
        let url = search_url(&self.search_base_url, query, location);
        let subject = format!("{} in {}", query.trim(), location.trim());
        tracing::info!(search_url = %url, "🔎 Harvesting '{}'", subject);

        let mut transitions = vec![CrawlState::Init];
        let crawl = self
            .attempt_loop(&url, &subject, &mut transitions, |text| {
                let cards = parse_cards(text, &url);
                Ok(Some(cards).filter(|c| !c.is_empty()))
            })
            .await;

        let mut report = HarvestReport {
            search_url: url.clone(),
            records: Vec::new(),
            attempts: crawl.attempts,
            captcha_encounters: crawl.captcha_encounters,
            transitions,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            error: None,
        };

        let mut records = match crawl.result {
            Ok(records) => records,
            Err(LoopFailure::Exhausted(e)) | Err(LoopFailure::Failed(e)) => {
                report.error = Some(e.to_string());
                return report;
            }
        };
        records.truncate(max_results);

        for record in &records {
            match self.upsert(record).await {
                Some(UpsertOutcome::Inserted) => report.inserted += 1,
                Some(UpsertOutcome::Updated) => report.updated += 1,
                Some(UpsertOutcome::Unchanged) => report.unchanged += 1,
                None => {}
            }
        }

        tracing::info!(
            search_url = %url,
            "✅ Harvested {} businesses ({} new, {} updated, {} unchanged)",
            records.len(),
            report.inserted,
            report.updated,
            report.unchanged
        );
        report.records = records;
        report
    }

    /// Attempts `url` until `extract` yields a value, the budget runs out or
    /// a failure no retry can fix. `extract` returning `Ok(None)` means the
    /// page held nothing usable and counts as a transient failure.
    async fn attempt_loop<T, F>(
        &self,
        url: &str,
        subject: &str,
        transitions: &mut Vec<CrawlState>,
        extract: F,
    ) -> LoopOutcome<T>
    where
        F: Fn(&str) -> Result<Option<T>, AppError>,
    {
        let mut identity = self.deps.rotator.next();
        let mut attempt: u32 = 0;
        let mut captcha_encounters: u32 = 0;

        loop {
            attempt += 1;
            transitions.push(CrawlState::Attempting { attempt });

            let last_error = match self.attempt(url, &identity, &extract).await {
                AttemptOutcome::Success(value) => {
                    transitions.push(CrawlState::Terminal(TerminalState::Success));
                    return LoopOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        captcha_encounters,
                    };
                }
                AttemptOutcome::Blocked(marker) => {
                    captcha_encounters += 1;
                    self.deps.stats.record_captcha();
                    tracing::warn!(url = %url, attempt, "Challenge page detected ({})", marker);
                    AppError::Blocked(marker.to_string())
                }
                AttemptOutcome::Failed(e) if e.is_transient() => {
                    tracing::warn!(url = %url, attempt, "Attempt failed: {}", e);
                    e
                }
                AttemptOutcome::Failed(e) => {
                    tracing::warn!(url = %url, attempt, "Giving up on '{}': {}", subject, e);
                    transitions.push(CrawlState::Terminal(TerminalState::Failed));
                    return LoopOutcome {
                        result: Err(LoopFailure::Failed(e)),
                        attempts: attempt,
                        captcha_encounters,
                    };
                }
            };

            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    url = %url,
                    "Crawl of '{}' exhausted after {} attempts: {}",
                    subject,
                    attempt,
                    last_error
                );
                transitions.push(CrawlState::Terminal(TerminalState::Exhausted));
                return LoopOutcome {
                    result: Err(LoopFailure::Exhausted(last_error)),
                    attempts: attempt,
                    captcha_encounters,
                };
            }

            let backoff = self.policy.backoff_for(attempt);
            transitions.push(CrawlState::RetryWait { attempt, backoff });
            tracing::debug!(url = %url, attempt, "Backing off {:?} before retry", backoff);
            self.deps.clock.sleep(backoff).await;
            identity = self.deps.rotator.next();
        }
    }

    /// One attempt. The fetched page lives only inside this call, so it is
    /// released before the next attempt can start on every path.
    async fn attempt<T, F>(&self, url: &str, identity: &Identity, extract: &F) -> AttemptOutcome<T>
    where
        F: Fn(&str) -> Result<Option<T>, AppError>,
    {
        self.rate_limiter.wait().await;

        let fetch = self.deps.fetcher.fetch(url, identity);
        let page = match tokio::time::timeout(self.policy.attempt_timeout, fetch).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => return AttemptOutcome::Failed(e),
            Err(_) => {
                return AttemptOutcome::Failed(AppError::TransientFetch(format!(
                    "fetch of {} timed out after {:?}",
                    url, self.policy.attempt_timeout
                )))
            }
        };

        if let Some(marker) = self.captcha.detect(&page.text) {
            return AttemptOutcome::Blocked(marker);
        }

        if !page.is_success() {
            let error = match page.status {
                404 | 410 => AppError::InvalidInput(format!("{} returned {}", url, page.status)),
                status => AppError::TransientFetch(format!("{} returned {}", url, status)),
            };
            return AttemptOutcome::Failed(error);
        }

        match extract(&page.text) {
            Ok(Some(value)) => AttemptOutcome::Success(value),
            Ok(None) => AttemptOutcome::Failed(AppError::TransientFetch(format!(
                "nothing to extract on {}",
                url
            ))),
            Err(e) => AttemptOutcome::Failed(AppError::TransientFetch(format!(
                "extraction failed on {}: {}",
                url, e
            ))),
        }
    }

    /// Upserts `record` and counts it as persisted.
    async fn persist(&self, record: &BusinessRecord) -> Option<UpsertOutcome> {
        let outcome = self.upsert(record).await;
        if outcome.is_some() {
            self.deps.stats.record_successful();
        }
        outcome
    }

    async fn upsert(&self, record: &BusinessRecord) -> Option<UpsertOutcome> {
        let keys = record.identity_keys(&self.default_region);
        match self.deps.store.upsert(&keys, record).await {
            Ok(outcome) => Some(outcome),
            Err(AppError::MissingIdentity(msg)) => {
                tracing::warn!("Not persisting '{}': {}", record.name, msg);
                None
            }
            Err(e) => {
                tracing::error!("Failed to persist '{}': {}", record.name, e);
                None
            }
        }
    }
}
