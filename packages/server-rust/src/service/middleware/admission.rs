//! Admission middleware: rate limiting and circuit breaking.
//!
//! Consults an [`AdmissionPolicy`] before every call. A refused call fails
//! immediately with a [`Rejection`] and never reaches the wrapped endpoint.
//! An admitted call reports its outcome back to the policy; a call whose
//! future is dropped before completing reports [`Outcome::Ignored`].

use std::sync::Arc;
use std::task::{Context, Poll};

use preamble_core::{CallError, Rejection};
use tower::{Layer, Service};

use super::ResponseFuture;
use crate::policy::{AdmissionPolicy, Outcome, Permit};
use crate::service::endpoint::Call;

// ---------------------------------------------------------------------------
// AdmissionLayer
// ---------------------------------------------------------------------------

/// Tower layer gating calls through a shared admission policy.
///
/// Every service produced by one layer shares the same policy instance.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    policy: Arc<dyn AdmissionPolicy>,
    rejection: Rejection,
}

impl AdmissionLayer {
    /// Refusals are reported as [`Rejection::RateLimited`].
    #[must_use]
    pub fn rate_limit(policy: Arc<dyn AdmissionPolicy>) -> Self {
        Self {
            policy,
            rejection: Rejection::RateLimited,
        }
    }

    /// Refusals are reported as [`Rejection::CircuitOpen`].
    #[must_use]
    pub fn circuit_breaker(policy: Arc<dyn AdmissionPolicy>) -> Self {
        Self {
            policy,
            rejection: Rejection::CircuitOpen,
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            policy: Arc::clone(&self.policy),
            rejection: self.rejection,
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionService
// ---------------------------------------------------------------------------

/// Service wrapper that admits or rejects each call.
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    policy: Arc<dyn AdmissionPolicy>,
    rejection: Rejection,
}

impl<S, Req, Resp> Service<Call<Req>> for AdmissionService<S>
where
    S: Service<Call<Req>, Response = Resp, Error = CallError> + Send,
    S::Future: Send + 'static,
    Resp: Send + 'static,
{
    type Response = Resp;
    type Error = CallError;
    type Future = ResponseFuture<Resp>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let Some(permit) = self.policy.attempt() else {
            let rejection = self.rejection;
            tracing::debug!(policy = ?self.policy, %rejection, "call refused");
            return Box::pin(async move { Err(rejection.into()) });
        };

        let admitted = Admitted {
            policy: Arc::clone(&self.policy),
            permit: Some(permit),
        };
        let fut = self.inner.call(call);
        Box::pin(async move {
            let result = fut.await;
            admitted.record(match &result {
                Ok(_) => Outcome::Success,
                Err(err) if err.is_breaker_failure() => Outcome::Failure,
                Err(_) => Outcome::Ignored,
            });
            result
        })
    }
}

/// Outstanding permit; reports `Ignored` if the call never finishes.
struct Admitted {
    policy: Arc<dyn AdmissionPolicy>,
    permit: Option<Permit>,
}

impl Admitted {
    fn record(mut self, outcome: Outcome) {
        if let Some(permit) = self.permit.take() {
            self.policy.record(permit, outcome);
        }
    }
}

impl Drop for Admitted {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.policy.record(permit, Outcome::Ignored);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
