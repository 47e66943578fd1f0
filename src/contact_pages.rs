use crate::config::ConfidencePriors;
use crate::fetcher::Fetch;
use crate::identity::IdentityRotator;
use crate::models::{Deliverability, EmailCandidate, EmailMethod};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Pages most likely to carry a published address.
pub const CONTACT_PATHS: &[&str] = &["/", "/contact", "/about", "/team"];

/// Asset suffixes that look like addresses (`logo@2x.png`) but are not.
const ASSET_SUFFIXES: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".bmp", ".css", ".js",
];

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("Email regex is hardcoded and valid")
});

/// Scrapes a business website for addresses on its own domain.
pub struct ContactPageExtractor {
    fetcher: Arc<dyn Fetch>,
    rotator: Arc<IdentityRotator>,
    concurrency: usize,
    timeout: Duration,
    priors: ConfidencePriors,
}

impl ContactPageExtractor {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        rotator: Arc<IdentityRotator>,
        concurrency: usize,
        timeout: Duration,
        priors: ConfidencePriors,
    ) -> Self {
        Self {
            fetcher,
            rotator,
            concurrency: concurrency.max(1),
            timeout,
            priors,
        }
    }

    /// Scrapes `https://{domain}` and its contact paths.
    pub async fn extract(&self, domain: &str) -> Vec<EmailCandidate> {
        let root = format!("https://{}", domain.trim().trim_end_matches('/'));
        self.extract_from_root(&root, domain).await
    }

    /// Scrapes the contact paths under `root_url`, keeping addresses on `domain`.
    ///
    /// Each path is fetched independently: one failing or timing out never
    /// affects the others.
    pub async fn extract_from_root(&self, root_url: &str, domain: &str) -> Vec<EmailCandidate> {
        let root = root_url.trim_end_matches('/');
        let domain = domain.trim().to_lowercase();

        let pages: Vec<Option<String>> = stream::iter(CONTACT_PATHS.iter().map(|path| {
            let url = if *path == "/" {
                format!("{}/", root)
            } else {
                format!("{}{}", root, path)
            };
            self.fetch_page(url)
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let mut found = BTreeSet::new();
        for text in pages.into_iter().flatten() {
            found.extend(emails_in(&text, &domain));
        }

        tracing::debug!(domain = %domain, "Scraped {} address(es) from contact pages", found.len());
        found
            .into_iter()
            .map(|address| {
                EmailCandidate::scored(
                    &address,
                    EmailMethod::Scraped,
                    Deliverability::Unknown,
                    None,
                    &self.priors,
                )
            })
            .collect()
    }

    async fn fetch_page(&self, url: String) -> Option<String> {
        let identity = self.rotator.next();
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(&url, &identity)).await {
            Ok(Ok(page)) if page.is_success() => Some(page.text),
            Ok(Ok(page)) => {
                tracing::debug!("Skipping {} (status {})", url, page.status);
                None
            }
            Ok(Err(e)) => {
                tracing::debug!("Could not fetch {}: {}", url, e);
                None
            }
            Err(_) => {
                tracing::debug!("Fetching {} timed out", url);
                None
            }
        }
    }
}

/// Lowercased addresses in `text` whose domain is `domain` or one of its subdomains.
pub fn emails_in(text: &str, domain: &str) -> BTreeSet<String> {
    let suffix = format!(".{}", domain);
    EMAIL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|address| !ASSET_SUFFIXES.iter().any(|ext| address.ends_with(ext)))
        .filter(|address| {
            address
                .rsplit_once('@')
                .is_some_and(|(_, host)| host == domain || host.ends_with(&suffix))
        })
        .collect()
}
