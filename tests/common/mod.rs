//! Hand-written fakes for the external interfaces, shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use rust_lead_harvester::config::{ConfidencePriors, EmailSettings};
use rust_lead_harvester::contact_pages::ContactPageExtractor;
use rust_lead_harvester::dedup_store::{DedupStore, InMemoryDedupStore};
use rust_lead_harvester::enrichment::EmailDiscovery;
use rust_lead_harvester::errors::AppError;
use rust_lead_harvester::fetcher::Fetch;
use rust_lead_harvester::identity::IdentityRotator;
use rust_lead_harvester::models::{BusinessRecord, FetchedPage, Identity, IdentityKeys, UpsertOutcome};
use rust_lead_harvester::rate_limiter::Clock;
use rust_lead_harvester::smtp::{HandshakeVerdict, MailHandshake, MxResolver, SmtpVerifier};
use rust_lead_harvester::whois::{WhoisLookup, WhoisQuery};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LISTING_URL: &str = "https://maps.example.com/place/acme-plumbing";

pub const CAPTCHA_PAGE: &str = r#"<html><body>
    <form id="captcha-form" action="/sorry/index">
      <iframe src="https://www.google.com/recaptcha/api2/anchor?k=abc"></iframe>
    </form>
</body></html>"#;

pub const DETAIL_PAGE: &str = r#"<html><body>
    <h1>Acme Plumbing</h1>
    <div class="F7nice"><span aria-hidden="true">4.6</span></div>
    <span aria-label="87 reviews">(87)</span>
    <button jsaction="pane.rating.category">Plumber</button>
    <button data-item-id="address" aria-label="Address: 1 Main St, Springfield">1 Main St</button>
    <a data-item-id="authority" href="https://acme.com/">acme.com</a>
    <button data-item-id="phone:tel:+12127365000">(212) 736-5000</button>
</body></html>"#;

pub fn page(url: &str, status: u16, text: &str) -> FetchedPage {
    FetchedPage {
        url: url.to_string(),
        status,
        text: text.to_string(),
    }
}

/// Returns scripted responses in order, then repeats the last one.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<FetchedPage, AppError>>>,
    last: Mutex<Option<Result<FetchedPage, AppError>>>,
    pub identities: Mutex<Vec<Identity>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Result<FetchedPage, AppError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            identities: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.identities.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetch for ScriptedFetcher {
    async fn fetch(&self, _url: &str, identity: &Identity) -> Result<FetchedPage, AppError> {
        self.identities.lock().unwrap().push(identity.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(response) => {
                *self.last.lock().unwrap() = Some(response.clone());
                response
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(AppError::TransientFetch("script empty".to_string()))),
        }
    }
}

/// Serves fixed bodies by exact URL; anything else is a 404.
#[derive(Default)]
pub struct RoutedFetcher {
    routes: HashMap<String, String>,
    pub requested: Mutex<Vec<String>>,
}

impl RoutedFetcher {
    pub fn new(routes: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            routes: routes
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
            requested: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Fetch for RoutedFetcher {
    async fn fetch(&self, url: &str, _identity: &Identity) -> Result<FetchedPage, AppError> {
        self.requested.lock().unwrap().push(url.to_string());
        Ok(match self.routes.get(url) {
            Some(body) => page(url, 200, body),
            None => page(url, 404, "not found"),
        })
    }
}

/// Records every sleep instead of waiting.
#[derive(Default)]
pub struct RecordingClock {
    pub sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// In-memory store that remembers the identity keys of every upsert.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: InMemoryDedupStore,
    pub keys: Mutex<Vec<IdentityKeys>>,
}

#[async_trait]
impl DedupStore for RecordingStore {
    async fn upsert(
        &self,
        keys: &IdentityKeys,
        record: &BusinessRecord,
    ) -> Result<UpsertOutcome, AppError> {
        self.keys.lock().unwrap().push(keys.clone());
        self.inner.upsert(keys, record).await
    }

    async fn find(&self, keys: &IdentityKeys) -> Result<Option<BusinessRecord>, AppError> {
        self.inner.find(keys).await
    }
}

pub struct StaticMx(pub Vec<String>);

#[async_trait]
impl MxResolver for StaticMx {
    async fn resolve_mx(&self, _domain: &str) -> Result<Vec<String>, AppError> {
        Ok(self.0.clone())
    }
}

/// Answers every probe with the same verdict and counts the calls.
pub struct FixedHandshake {
    verdict: HandshakeVerdict,
    pub calls: AtomicUsize,
}

impl FixedHandshake {
    pub fn new(verdict: HandshakeVerdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailHandshake for FixedHandshake {
    async fn probe(
        &self,
        _host: &str,
        _address: &str,
        _timeout: Duration,
    ) -> Result<HandshakeVerdict, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict)
    }
}

pub struct CannedWhois(pub String);

#[async_trait]
impl WhoisQuery for CannedWhois {
    async fn query(&self, _domain: &str) -> Result<String, AppError> {
        Ok(self.0.clone())
    }
}

pub fn rotator() -> Arc<IdentityRotator> {
    Arc::new(IdentityRotator::new(
        vec![],
        vec!["ua-1".to_string(), "ua-2".to_string(), "ua-3".to_string()],
    ))
}

/// Email discovery over fakes: fixed MX hosts, fixed handshake verdict,
/// routed contact pages and a canned WHOIS record.
pub fn discovery(
    mx_hosts: Vec<String>,
    handshake: Arc<FixedHandshake>,
    pages: Arc<dyn Fetch>,
    whois: &str,
) -> EmailDiscovery {
    let priors = ConfidencePriors::default();
    let timeout = Duration::from_secs(2);
    EmailDiscovery::new(
        SmtpVerifier::new(Arc::new(StaticMx(mx_hosts)), handshake, timeout, priors),
        ContactPageExtractor::new(pages, rotator(), 4, timeout, priors),
        WhoisLookup::new(Arc::new(CannedWhois(whois.to_string())), timeout, priors),
        &EmailSettings::default(),
        priors,
    )
}
