//! Admission policies consulted by endpoint middleware.
//!
//! A policy decides whether a call may proceed (`attempt`) and learns how
//! admitted calls ended (`record`). Two implementations ship:
//! - [`TokenBucket`]: fixed-rate admission control with a burst allowance.
//! - [`CircuitBreaker`]: Closed/Open/HalfOpen failure isolation.
//!
//! Both are internally synchronized; share them behind an `Arc`.

pub mod circuit_breaker;
pub mod token_bucket;

use std::fmt;

pub use circuit_breaker::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, Counts, StateListener, TripPolicy,
};
pub use token_bucket::{RateLimitConfig, TokenBucket};

// ---------------------------------------------------------------------------
// Permit / Outcome
// ---------------------------------------------------------------------------

/// Proof of admission handed out by [`AdmissionPolicy::attempt`].
///
/// Carries the policy generation the call was admitted under, so outcomes
/// reported after a state change can be told apart from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permit {
    generation: u64,
}

impl Permit {
    #[must_use]
    pub fn new(generation: u64) -> Self {
        Self { generation }
    }

    #[must_use]
    pub fn generation(self) -> u64 {
        self.generation
    }
}

/// How an admitted call ended, from the policy's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// The call ended without a verdict (caller fault or the call was dropped).
    /// Releases any slot the permit held without counting either way.
    Ignored,
}

// ---------------------------------------------------------------------------
// AdmissionPolicy
// ---------------------------------------------------------------------------

/// Gate in front of an endpoint.
///
/// `attempt` must not block: it either admits the call now or refuses it.
pub trait AdmissionPolicy: fmt::Debug + Send + Sync {
    /// Returns a permit when the call may proceed, `None` to reject it.
    fn attempt(&self) -> Option<Permit>;

    /// Reports the outcome of a call admitted with `permit`.
    fn record(&self, permit: Permit, outcome: Outcome);
}
