//! Token-bucket rate limiter.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{AdmissionPolicy, Outcome, Permit};

/// Configuration for a [`TokenBucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Time to refill one token.
    pub refill_every: Duration,
    /// Bucket capacity; also the number of calls admitted back to back.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            refill_every: Duration::from_secs(1),
            burst: 100,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Non-blocking token bucket. Starts full.
///
/// A call takes one token; a call that finds less than one token is refused
/// immediately rather than queued.
pub struct TokenBucket {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: f64::from(config.burst),
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    /// Tokens currently available, after refilling for elapsed time.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.last_refill = now;

        if self.config.refill_every.is_zero() {
            state.tokens = f64::from(self.config.burst);
            return;
        }
        let earned = elapsed.as_secs_f64() / self.config.refill_every.as_secs_f64();
        state.tokens = (state.tokens + earned).min(f64::from(self.config.burst));
    }
}

impl AdmissionPolicy for TokenBucket {
    fn attempt(&self) -> Option<Permit> {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Some(Permit::default())
        } else {
            None
        }
    }

    fn record(&self, _permit: Permit, _outcome: Outcome) {}
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
