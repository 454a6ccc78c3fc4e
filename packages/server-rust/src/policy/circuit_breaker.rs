//! Circuit breaker state machine.
//!
//! State machine: Closed -> Open -> HalfOpen -> (Closed | Open)
//!
//! - **Closed**: calls pass; outcomes are counted. When the trip policy fires
//!   the breaker opens. Counts are cleared every `interval`, if one is set.
//! - **Open**: every call is refused until `open_timeout` elapses.
//! - **HalfOpen**: at most `half_open_max_calls` trial calls are admitted.
//!   That many consecutive successes close the breaker; any failure reopens it.
//!
//! Every state change starts a new generation. Outcomes recorded against a
//! permit from an older generation are dropped, so calls admitted before a
//! trip cannot disturb the counts of the state that followed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{AdmissionPolicy, Outcome, Permit};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Condition evaluated after each failure in the Closed state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TripPolicy {
    /// Open after this many failures in a row.
    ConsecutiveFailures(u32),
    /// Open once at least `min_calls` have completed in the current window
    /// and the failed fraction reaches `ratio`.
    FailureRatio { ratio: f64, min_calls: u32 },
}

impl TripPolicy {
    fn should_trip(self, counts: &Counts) -> bool {
        match self {
            Self::ConsecutiveFailures(threshold) => counts.consecutive_failures >= threshold,
            Self::FailureRatio { ratio, min_calls } => {
                let completed = counts.total_successes + counts.total_failures;
                completed >= min_calls.max(1)
                    && f64::from(counts.total_failures) / f64::from(completed) >= ratio
            }
        }
    }
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    /// When to leave Closed for Open.
    pub trip: TripPolicy,
    /// How long the breaker stays Open before admitting trial calls.
    pub open_timeout: Duration,
    /// Trial calls admitted while HalfOpen; also the successes needed to close.
    pub half_open_max_calls: u32,
    /// Period after which Closed-state counts are cleared. `None` keeps them
    /// until the next state change.
    pub interval: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            trip: TripPolicy::ConsecutiveFailures(6),
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
            interval: None,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Call statistics for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Calls admitted and not yet released as ignored.
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Callback invoked on every state change with `(name, from, to)`.
pub type StateListener = Arc<dyn Fn(&str, BreakerState, BreakerState) + Send + Sync>;

struct Inner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    /// Closed: when counts reset. Open: when trials may start. HalfOpen: unused.
    expiry: Option<Instant>,
}

type Transition = (BreakerState, BreakerState);

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Failure-isolation gate for one endpoint.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    listener: Option<StateListener>,
}

impl CircuitBreaker {
    /// Creates a Closed breaker. `name` identifies it in logs and callbacks.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: config.interval.map(|interval| now + interval),
            }),
            config,
            listener: None,
        }
    }

    /// Registers a callback for state changes. It runs outside the breaker's lock.
    #[must_use]
    pub fn with_state_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, after applying any pending time-based transition.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.advance(&mut inner, Instant::now());
            (inner.state, transition)
        };
        self.notify(transition);
        state
    }

    /// Counts for the current generation.
    #[must_use]
    pub fn counts(&self) -> Counts {
        let (counts, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.advance(&mut inner, Instant::now());
            (inner.counts, transition)
        };
        self.notify(transition);
        counts
    }

    /// Applies time-based transitions: Open -> HalfOpen once the cooldown
    /// elapses, and Closed-window resets.
    fn advance(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        match inner.state {
            BreakerState::Closed => {
                if inner.expiry.is_some_and(|at| at <= now) {
                    self.new_generation(inner, now);
                }
                None
            }
            BreakerState::Open => {
                if inner.expiry.is_some_and(|at| at <= now) {
                    self.set_state(inner, BreakerState::HalfOpen, now)
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => None,
        }
    }

    fn set_state(&self, inner: &mut Inner, to: BreakerState, now: Instant) -> Option<Transition> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        self.new_generation(inner, now);
        Some((from, to))
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            BreakerState::Closed => self.config.interval.map(|interval| now + interval),
            BreakerState::Open => Some(now + self.config.open_timeout),
            BreakerState::HalfOpen => None,
        };
    }

    fn notify(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        tracing::info!(
            breaker = %self.name,
            from = from.as_str(),
            to = to.as_str(),
            "circuit breaker state change"
        );
        if let Some(listener) = &self.listener {
            listener(&self.name, from, to);
        }
    }
}

impl AdmissionPolicy for CircuitBreaker {
    fn attempt(&self) -> Option<Permit> {
        let (permit, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.advance(&mut inner, Instant::now());
            let admitted = match inner.state {
                BreakerState::Closed => true,
                BreakerState::Open => false,
                BreakerState::HalfOpen => inner.counts.requests < self.config.half_open_max_calls,
            };
            let permit = admitted.then(|| {
                inner.counts.requests = inner.counts.requests.saturating_add(1);
                Permit::new(inner.generation)
            });
            (permit, transition)
        };
        self.notify(transition);
        permit
    }

    fn record(&self, permit: Permit, outcome: Outcome) {
        let transition = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let mut transition = self.advance(&mut inner, now);
            if permit.generation() == inner.generation {
                let next = match outcome {
                    Outcome::Success => {
                        inner.counts.on_success();
                        (inner.state == BreakerState::HalfOpen
                            && inner.counts.consecutive_successes
                                >= self.config.half_open_max_calls)
                            .then_some(BreakerState::Closed)
                    }
                    Outcome::Failure => {
                        inner.counts.on_failure();
                        match inner.state {
                            BreakerState::Closed
                                if self.config.trip.should_trip(&inner.counts) =>
                            {
                                Some(BreakerState::Open)
                            }
                            BreakerState::HalfOpen => Some(BreakerState::Open),
                            _ => None,
                        }
                    }
                    Outcome::Ignored => {
                        inner.counts.requests = inner.counts.requests.saturating_sub(1);
                        None
                    }
                };
                if let Some(to) = next {
                    transition = self.set_state(&mut inner, to, now).or(transition);
                }
            }
            transition
        };
        self.notify(transition);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
