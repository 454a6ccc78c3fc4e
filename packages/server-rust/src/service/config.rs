use std::time::Duration;

use crate::policy::{CircuitBreakerConfig, RateLimitConfig};

/// One middleware slot in an endpoint stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum MiddlewareKind {
    /// One OpenTelemetry span per call.
    Tracing,
    /// Token-bucket admission control.
    RateLimit,
    /// Closed/Open/HalfOpen failure isolation.
    CircuitBreaker,
    /// Per-endpoint timeout of [`PipelineConfig::call_timeout`].
    Timeout,
    /// One structured log event per call.
    Logging,
}

/// Endpoint pipeline configuration, shared by the server set and clients.
///
/// `stack` lists middleware outermost first. The first entry sees every
/// call, including the ones later entries refuse.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Bound applied by [`MiddlewareKind::Timeout`].
    pub call_timeout: Duration,
    pub stack: Vec<MiddlewareKind>,
}

impl PipelineConfig {
    /// Server-side defaults: tracing, rate limiting, the breaker, then logging.
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Client-side defaults: tracing, rate limiting, and a breaker with a
    /// 30 s cooldown. Logging is left to the caller.
    #[must_use]
    pub fn client() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig {
                open_timeout: Duration::from_secs(30),
                ..CircuitBreakerConfig::default()
            },
            stack: vec![
                MiddlewareKind::Tracing,
                MiddlewareKind::RateLimit,
                MiddlewareKind::CircuitBreaker,
            ],
            ..Self::default()
        }
    }

    /// Whether the endpoint stack logs every call itself.
    #[must_use]
    pub fn logs_calls(&self) -> bool {
        self.stack.contains(&MiddlewareKind::Logging)
    }

    /// Replaces the middleware order.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<Vec<MiddlewareKind>>) -> Self {
        self.stack = stack.into();
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            call_timeout: Duration::from_secs(30),
            stack: vec![
                MiddlewareKind::Tracing,
                MiddlewareKind::RateLimit,
                MiddlewareKind::CircuitBreaker,
                MiddlewareKind::Logging,
            ],
        }
    }
}
