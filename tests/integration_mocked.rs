/// Integration tests with mocked HTTP endpoints
/// Exercises the real reqwest fetcher, the contact page scraper and the
/// detail crawl without hitting real external services
mod common;

use common::*;
use rust_lead_harvester::config::ConfidencePriors;
use rust_lead_harvester::contact_pages::ContactPageExtractor;
use rust_lead_harvester::dedup_store::InMemoryDedupStore;
use rust_lead_harvester::detail_parser::MapsDetailParser;
use rust_lead_harvester::errors::AppError;
use rust_lead_harvester::fetcher::{Fetch, HttpFetcher};
use rust_lead_harvester::identity::IdentityRotator;
use rust_lead_harvester::models::{BusinessRecord, EmailMethod, Identity};
use rust_lead_harvester::rate_limiter::RateLimiter;
use rust_lead_harvester::retry::{
    CrawlDependencies, CrawlOutcome, CrawlState, RetryOrchestrator, RetryPolicy, TerminalState,
};
use rust_lead_harvester::stats::CrawlStats;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_orchestrator(
    rotator: Arc<IdentityRotator>,
    store: Arc<InMemoryDedupStore>,
    stats: Arc<CrawlStats>,
    clock: Arc<RecordingClock>,
) -> RetryOrchestrator {
    RetryOrchestrator::new(
        CrawlDependencies {
            fetcher: Arc::new(HttpFetcher::new(Duration::from_secs(5))),
            extractor: Arc::new(MapsDetailParser::new()),
            rotator,
            store,
            stats,
            clock: clock.clone(),
        },
        RateLimiter::new(0, 0, clock),
        RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 100,
            attempt_timeout: Duration::from_secs(5),
        },
        "US",
    )
}

fn identity(user_agent: &str) -> Identity {
    Identity {
        proxy: None,
        user_agent: user_agent.to_string(),
    }
}

#[tokio::test]
async fn test_fetch_presents_identity_user_agent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/place/acme"))
        .and(header("user-agent", "HarvesterTest/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Acme</h1>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(Duration::from_secs(5));
    let url = format!("{}/place/acme", mock_server.uri());
    let page = fetcher
        .fetch(&url, &identity("HarvesterTest/1.0"))
        .await
        .unwrap();

    assert_eq!(page.status, 200);
    assert_eq!(page.text, "<h1>Acme</h1>");
    assert!(page.is_success());
}

#[tokio::test]
async fn test_fetch_server_error_returns_page_with_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(Duration::from_secs(5));
    let page = fetcher
        .fetch(&format!("{}/place/acme", mock_server.uri()), &identity("ua"))
        .await
        .unwrap();

    assert_eq!(page.status, 503);
    assert_eq!(page.text, "busy");
    assert!(!page.is_success());
}

#[tokio::test]
async fn test_fetch_throttling_keeps_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_string(CAPTCHA_PAGE))
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(Duration::from_secs(5));
    let page = fetcher
        .fetch(&format!("{}/x", mock_server.uri()), &identity("ua"))
        .await
        .unwrap();

    assert_eq!(page.status, 429);
    assert_eq!(page.text, CAPTCHA_PAGE);
}

#[tokio::test]
async fn test_fetch_not_found_returns_page_with_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(Duration::from_secs(5));
    let page = fetcher
        .fetch(&format!("{}/gone", mock_server.uri()), &identity("ua"))
        .await
        .unwrap();

    assert_eq!(page.status, 404);
    assert!(!page.is_success());
}

#[tokio::test]
async fn test_fetch_connection_refused_is_transient() {
    let fetcher = HttpFetcher::new(Duration::from_secs(2));
    // Port 9 (discard) is not expected to be listening on test hosts
    let result = fetcher
        .fetch("http://127.0.0.1:9/place", &identity("ua"))
        .await;

    assert!(matches!(result, Err(AppError::TransientFetch(_))));
}

#[tokio::test]
async fn test_contact_pages_survive_failing_path() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<p>Questions? info@acme.com</p>"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contact"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/team"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<ul><li>Jane: jane@sales.acme.com</li><li>Logo: logo@2x.png</li></ul>",
        ))
        .mount(&mock_server)
        .await;
    // /about falls through to wiremock's default 404

    let extractor = ContactPageExtractor::new(
        Arc::new(HttpFetcher::new(Duration::from_secs(5))),
        rotator(),
        4,
        Duration::from_secs(5),
        ConfidencePriors::default(),
    );

    let candidates = extractor
        .extract_from_root(&mock_server.uri(), "acme.com")
        .await;

    let addresses: Vec<&str> = candidates.iter().map(|c| c.address()).collect();
    assert_eq!(addresses, vec!["info@acme.com", "jane@sales.acme.com"]);
    for candidate in &candidates {
        assert_eq!(candidate.method(), EmailMethod::Scraped);
        assert_eq!(candidate.confidence(), 95);
        assert!(!candidate.verified());
    }
}

#[tokio::test]
async fn test_detail_crawl_recovers_after_challenge_pages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/place/acme-plumbing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CAPTCHA_PAGE))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/place/acme-plumbing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
        .mount(&mock_server)
        .await;

    let clock = Arc::new(RecordingClock::default());
    let stats = Arc::new(CrawlStats::new());
    let store = Arc::new(InMemoryDedupStore::new());
    let orchestrator = http_orchestrator(rotator(), store.clone(), stats.clone(), clock.clone());

    let listing = format!("{}/place/acme-plumbing", mock_server.uri());
    let report = orchestrator
        .run(&BusinessRecord::new("Acme Plumbing", Some(listing)))
        .await;

    assert!(report.is_success());
    assert_eq!(report.attempts, 3);
    assert_eq!(report.captcha_encounters, 2);
    assert_eq!(stats.snapshot().captcha_encounters, 2);
    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::ZERO,
            Duration::from_millis(100),
            Duration::ZERO,
            Duration::from_millis(200),
            Duration::ZERO,
        ]
    );

    let record = report.record().unwrap();
    assert_eq!(record.rating, Some(4.6));
    assert_eq!(record.review_count, Some(87));
    assert_eq!(record.category.as_deref(), Some("Plumber"));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_throttled_challenge_pages_count_as_captchas() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/place/acme-plumbing"))
        .respond_with(ResponseTemplate::new(429).set_body_string(CAPTCHA_PAGE))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/place/acme-plumbing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
        .mount(&mock_server)
        .await;

    let clock = Arc::new(RecordingClock::default());
    let stats = Arc::new(CrawlStats::new());
    let store = Arc::new(InMemoryDedupStore::new());
    let orchestrator = http_orchestrator(rotator(), store, stats.clone(), clock);

    let listing = format!("{}/place/acme-plumbing", mock_server.uri());
    let report = orchestrator
        .run(&BusinessRecord::new("Acme Plumbing", Some(listing)))
        .await;

    assert!(report.is_success());
    assert_eq!(report.attempts, 3);
    assert_eq!(report.captcha_encounters, 2);
    assert_eq!(stats.snapshot().captcha_encounters, 2);
}

#[tokio::test]
async fn test_server_errors_exhaust_without_captchas() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/place/acme-plumbing"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let clock = Arc::new(RecordingClock::default());
    let stats = Arc::new(CrawlStats::new());
    let store = Arc::new(InMemoryDedupStore::new());
    let orchestrator = http_orchestrator(rotator(), store.clone(), stats.clone(), clock);

    let listing = format!("{}/place/acme-plumbing", mock_server.uri());
    let report = orchestrator
        .run(&BusinessRecord::new("Acme Plumbing", Some(listing)))
        .await;

    assert!(matches!(report.outcome, CrawlOutcome::Exhausted { .. }));
    assert_eq!(report.attempts, 3);
    assert_eq!(report.captcha_encounters, 0);
    assert_eq!(stats.snapshot().captcha_encounters, 0);
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn test_malformed_proxy_rotates_to_next_identity() {
    let mock_server = MockServer::start().await;

    // The mock server stands in as the forward proxy for the second identity.
    Mock::given(method("GET"))
        .and(path("/place/acme-plumbing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let rotator = Arc::new(IdentityRotator::new(
        vec!["http://[::1".to_string(), mock_server.uri()],
        vec!["ua-1".to_string()],
    ));
    let clock = Arc::new(RecordingClock::default());
    let stats = Arc::new(CrawlStats::new());
    let store = Arc::new(InMemoryDedupStore::new());
    let orchestrator = http_orchestrator(rotator, store, stats.clone(), clock);

    let report = orchestrator
        .run(&BusinessRecord::new(
            "Acme Plumbing",
            Some("http://maps.example.test/place/acme-plumbing".to_string()),
        ))
        .await;

    assert!(report.is_success());
    assert_eq!(report.attempts, 2);
    assert!(report.transitions.contains(&CrawlState::RetryWait {
        attempt: 1,
        backoff: Duration::from_millis(100),
    }));
    assert_eq!(
        report.final_state(),
        Some(CrawlState::Terminal(TerminalState::Success))
    );
    assert_eq!(stats.snapshot().detail_failures, 0);
}
