//! Per-business enrichment workflow.
//!
//! This module ties the two halves of the harvester together:
//! 1. Crawl the listing detail page (RetryOrchestrator)
//! 2. Discover emails for the business website (pattern+SMTP, contact pages, WHOIS)
//! 3. Merge candidates into one ranked set (EmailMergeEngine)
//! 4. Write the business through the DedupStore
use crate::config::{ConfidencePriors, EmailSettings};
use crate::contact_pages::ContactPageExtractor;
use crate::fetcher::Fetch;
use crate::identity::IdentityRotator;
use crate::merge::EmailMergeEngine;
use crate::models::{BusinessRecord, EmailCandidate, EmailMethod, EnrichedEmailSet, UpsertOutcome};
use crate::patterns;
use crate::retry::{CrawlReport, RetryOrchestrator};
use crate::smtp::{DnsMxResolver, SmtpHandshake, SmtpVerifier};
use crate::stats::StatsSnapshot;
use crate::whois::{TcpWhoisClient, WhoisLookup};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    // RFC 5322 simplified email regex
    // Matches: local@domain.tld
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("Email validation regex is hardcoded and valid")
});

/// Validate email address
///
/// Checks for:
/// - Basic email format (contains @ and .)
/// - Fake/placeholder patterns (repeated digits like 9999, 1111)
/// - Minimum length requirements
/// - Valid domain structure
pub fn is_valid_email(email: &str) -> bool {
    // Basic checks
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    // Detect fake patterns (repeated digits)
    let fake_patterns = [
        "999999",    // 1199999999333@gmail.com
        "111111",    // 1111111111@
        "000000",    // 000000@
        "123456789", // Sequential fake
    ];

    for pattern in &fake_patterns {
        if email.contains(pattern) {
            tracing::warn!(
                "❌ Invalid email detected (fake pattern '{}'): {}",
                pattern,
                email
            );
            return false;
        }
    }

    if !EMAIL_REGEX.is_match(email) {
        tracing::warn!("❌ Invalid email format: {}", email);
        return false;
    }

    true
}

/// Normalize a phone number into a dedup key
///
/// Uses phonenumber library (port of Google's libphonenumber) to:
/// - Parse the number against `default_region` (ISO 3166 alpha-2, e.g. "US")
/// - Return E.164 format (+14155550100) when the number is valid
/// - Fall back to the bare digits when it cannot be parsed
///
/// Returns `None` when fewer than 6 digits remain.
pub fn normalize_phone(raw: &str, default_region: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 6 {
        return None;
    }

    let region = default_region.trim().to_uppercase().parse::<CountryId>().ok();
    match phonenumber::parse(region, raw.trim()) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::trace!("✓ Normalized phone: {} → {}", raw, formatted);
            Some(formatted)
        }
        Ok(_) | Err(_) => {
            tracing::debug!("Phone '{}' not parseable for region {}, using digits", raw, default_region);
            Some(digits)
        }
    }
}

/// Registrable host of a website URL: lowercase, scheme optional, `www.` stripped.
pub fn extract_domain(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = url::Url::parse(&with_scheme).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    if host.contains('.') {
        Some(host)
    } else {
        None
    }
}

/// Multi-source email discovery for one domain.
pub struct EmailDiscovery {
    verifier: SmtpVerifier,
    scraper: ContactPageExtractor,
    whois: WhoisLookup,
    merge: EmailMergeEngine,
    priors: ConfidencePriors,
    max_smtp_probes: usize,
}

impl EmailDiscovery {
    pub fn new(
        verifier: SmtpVerifier,
        scraper: ContactPageExtractor,
        whois: WhoisLookup,
        settings: &EmailSettings,
        priors: ConfidencePriors,
    ) -> Self {
        Self {
            verifier,
            scraper,
            whois,
            merge: EmailMergeEngine::new(),
            priors,
            max_smtp_probes: settings.max_smtp_probes,
        }
    }

    /// Wires the production adapters: DNS MX lookups, SMTP on port 25,
    /// WHOIS on port 43 and contact pages through `fetcher`.
    pub fn from_settings(
        email: &EmailSettings,
        priors: ConfidencePriors,
        fetcher: Arc<dyn Fetch>,
        rotator: Arc<IdentityRotator>,
    ) -> Self {
        let verifier = SmtpVerifier::new(
            Arc::new(DnsMxResolver::new()),
            Arc::new(SmtpHandshake::new(
                email.smtp_helo_name.clone(),
                email.smtp_sender.clone(),
            )),
            email.smtp_timeout(),
            priors,
        );
        let scraper = ContactPageExtractor::new(
            fetcher,
            rotator,
            email.contact_page_concurrency,
            email.scrape_timeout(),
            priors,
        );
        let whois = WhoisLookup::new(
            Arc::new(TcpWhoisClient::new(
                email.whois_server.clone(),
                email.whois_timeout(),
            )),
            email.whois_timeout(),
            priors,
        );
        Self::new(verifier, scraper, whois, email, priors)
    }

    /// Runs all three sources concurrently and merges their candidates.
    ///
    /// Source failures only shrink the result; the call itself never fails.
    pub async fn discover(&self, domain: &str, names: &[(String, String)]) -> EnrichedEmailSet {
        let domain = domain.trim().trim_start_matches('@').to_lowercase();
        if domain.is_empty() {
            return self.merge.merge(Vec::new());
        }

        let (pattern, scraped, whois) = tokio::join!(
            self.pattern_candidates(&domain, names),
            self.scraper.extract(&domain),
            self.whois.lookup(&domain),
        );
        tracing::debug!(
            domain = %domain,
            "Candidates: {} pattern, {} scraped, {} whois",
            pattern.len(),
            scraped.len(),
            whois.len()
        );

        let candidates: Vec<EmailCandidate> = pattern
            .into_iter()
            .chain(scraped)
            .chain(whois)
            .filter(|c| is_valid_email(c.address()))
            .collect();

        let set = self.merge.merge(candidates);
        tracing::info!(
            domain = %domain,
            "📧 Discovered {} email(s), {} verified",
            set.len(),
            set.verified_count()
        );
        set
    }

    /// Generated addresses probed one by one, up to the probe cap.
    /// Rejected addresses are dropped; unknown ones stay at the unknown prior.
    async fn pattern_candidates(
        &self,
        domain: &str,
        names: &[(String, String)],
    ) -> Vec<EmailCandidate> {
        let generated = patterns::generate(domain, names);
        let mut candidates = Vec::new();
        for pattern in generated
            .into_iter()
            .filter(|p| is_valid_email(&p.address))
            .take(self.max_smtp_probes)
        {
            let verification = self.verifier.verify(&pattern.address).await;
            let candidate = EmailCandidate::scored(
                &pattern.address,
                EmailMethod::PatternSmtp,
                verification.deliverable,
                Some(pattern.template),
                &self.priors,
            );
            if candidate.confidence() > 0 {
                candidates.push(candidate);
            }
        }
        candidates
    }
}

/// What enrichment did for one business.
#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub record: BusinessRecord,
    /// Detail crawl report, when a crawl was needed and possible.
    pub crawl: Option<CrawlReport>,
    /// Size of the discovered email set, when discovery ran.
    pub email_count: Option<usize>,
    pub persisted: Option<UpsertOutcome>,
}

impl EnrichmentOutcome {
    /// Whether this run added anything to the business.
    pub fn is_enriched(&self) -> bool {
        self.crawl.as_ref().is_some_and(CrawlReport::is_success)
            || self.email_count.is_some_and(|n| n > 0)
    }
}

/// Summary of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub enriched: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stats: StatsSnapshot,
}

/// Per-business orchestrator: detail crawl, email discovery, persistence.
pub struct EnrichmentCoordinator {
    crawler: Arc<RetryOrchestrator>,
    discovery: Arc<EmailDiscovery>,
    batch_concurrency: usize,
}

impl EnrichmentCoordinator {
    pub fn new(
        crawler: Arc<RetryOrchestrator>,
        discovery: Arc<EmailDiscovery>,
        batch_concurrency: usize,
    ) -> Self {
        Self {
            crawler,
            discovery,
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    /// `EnrichBusiness`: returns the business with detail fields and emails
    /// populated, or unchanged when nothing could be added.
    pub async fn enrich_business(&self, business: BusinessRecord) -> BusinessRecord {
        self.enrich_detailed(business).await.record
    }

    /// `DiscoverEmails`: ranked candidates for `domain`.
    pub async fn discover_emails(
        &self,
        domain: &str,
        names: &[(String, String)],
    ) -> EnrichedEmailSet {
        self.discovery.discover(domain, names).await
    }

    /// Like [`enrich_business`](Self::enrich_business) with the full outcome.
    ///
    /// The detail crawl only runs for records with a listing URL that are not
    /// complete yet. Email discovery runs whenever a website is known and
    /// replaces the previous email set.
    pub async fn enrich_detailed(&self, business: BusinessRecord) -> EnrichmentOutcome {
        let mut record = business;
        let mut crawl = None;

        let has_listing = record
            .listing_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        if has_listing && !record.completeness().is_complete() {
            let report = self.crawler.run(&record).await;
            if let Some(updated) = report.record() {
                record = updated.clone();
            }
            crawl = Some(report);
        }

        let domain = record.website.as_deref().and_then(extract_domain);
        let Some(domain) = domain else {
            tracing::debug!("No website for '{}', skipping email discovery", record.name);
            let persisted = crawl.as_ref().and_then(|c| c.persisted);
            return EnrichmentOutcome {
                record,
                crawl,
                email_count: None,
                persisted,
            };
        };

        let emails = self.discovery.discover(&domain, &[]).await;
        let email_count = emails.len();
        record.emails = Some(emails);

        let keys = record.identity_keys(self.crawler.default_region());
        let persisted = match self.crawler.store().upsert(&keys, &record).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!("Failed to store emails for '{}': {}", record.name, e);
                None
            }
        };

        EnrichmentOutcome {
            record,
            crawl,
            email_count: Some(email_count),
            persisted,
        }
    }

    /// Enriches `businesses` with bounded concurrency.
    ///
    /// Cancellation is checked before each business starts; businesses
    /// already in flight run to completion.
    pub async fn enrich_batch(
        &self,
        businesses: Vec<BusinessRecord>,
        cancel: CancellationToken,
    ) -> BatchReport {
        let total = businesses.len();
        tracing::info!("🚀 Starting enrichment batch of {} businesses", total);

        let results: Vec<Option<EnrichmentOutcome>> = stream::iter(businesses)
            .map(|business| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(self.enrich_detailed(business).await)
                }
            })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;

        let mut report = BatchReport {
            processed: 0,
            enriched: 0,
            failed: 0,
            skipped: 0,
            stats: StatsSnapshot::default(),
        };
        for result in results {
            match result {
                None => report.skipped += 1,
                Some(outcome) => {
                    report.processed += 1;
                    if outcome.is_enriched() {
                        report.enriched += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }
        report.stats = self.crawler.stats().snapshot();

        tracing::info!(
            "✅ Batch done: {} processed, {} enriched, {} not enriched, {} skipped",
            report.processed,
            report.enriched,
            report.failed,
            report.skipped
        );
        report
    }
}
