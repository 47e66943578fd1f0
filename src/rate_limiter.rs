use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Suspension point used for every deliberate wait in the crawl.
///
/// Production code sleeps on the tokio timer; tests inject a recording clock
/// so backoff schedules can be asserted without waiting.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Jittered delay generator for human-like request pacing.
#[derive(Clone)]
pub struct RateLimiter {
    min_delay_ms: u64,
    max_delay_ms: u64,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter sampling uniformly from `[min_delay_ms, max_delay_ms]`.
    /// Swapped bounds are reordered rather than rejected.
    pub fn new(min_delay_ms: u64, max_delay_ms: u64, clock: Arc<dyn Clock>) -> Self {
        let (min_delay_ms, max_delay_ms) = if min_delay_ms <= max_delay_ms {
            (min_delay_ms, max_delay_ms)
        } else {
            (max_delay_ms, min_delay_ms)
        };
        Self {
            min_delay_ms,
            max_delay_ms,
            clock,
        }
    }

    /// Samples a delay without waiting.
    pub fn peek_delay(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.min_delay_ms..=self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Suspends for a freshly sampled delay and returns it.
    pub async fn wait(&self) -> Duration {
        let delay = self.peek_delay();
        tracing::trace!("Rate limiter waiting {:?}", delay);
        self.clock.sleep(delay).await;
        delay
    }

    pub fn bounds(&self) -> (u64, u64) {
        (self.min_delay_ms, self.max_delay_ms)
    }
}
