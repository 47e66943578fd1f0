use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Crawl counters shared by every concurrent enrichment.
///
/// Owned by the composition root and passed down; tests create a fresh
/// instance per run.
#[derive(Debug, Default)]
pub struct CrawlStats {
    total_attempted: AtomicU64,
    total_successful: AtomicU64,
    captcha_encounters: AtomicU64,
    detail_failures: AtomicU64,
    detail_successes: AtomicU64,
}

/// Point-in-time copy of [`CrawlStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_attempted: u64,
    pub total_successful: u64,
    pub captcha_encounters: u64,
    pub detail_failures: u64,
    pub detail_successes: u64,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// One business entered the detail crawl.
    pub fn record_attempted(&self) {
        self.total_attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// One business finished with its detail fields persisted.
    pub fn record_successful(&self) {
        self.total_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_captcha(&self) {
        self.captcha_encounters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detail_success(&self) {
        self.detail_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detail_failure(&self) {
        self.detail_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_attempted: self.total_attempted.load(Ordering::Relaxed),
            total_successful: self.total_successful.load(Ordering::Relaxed),
            captcha_encounters: self.captcha_encounters.load(Ordering::Relaxed),
            detail_failures: self.detail_failures.load(Ordering::Relaxed),
            detail_successes: self.detail_successes.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Share of attempted businesses whose detail crawl succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.total_attempted == 0 {
            return 0.0;
        }
        (self.detail_successes as f64 / self.total_attempted as f64) * 100.0
    }
}
