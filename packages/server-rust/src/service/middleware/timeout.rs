//! Timeout middleware for endpoints.
//!
//! Tightens the call's deadline to at most `timeout` from now and fails the
//! call with [`CallError::DeadlineExceeded`] once it passes. An earlier
//! deadline already on the context is left alone.

use std::task::{Context, Poll};
use std::time::Duration;

use preamble_core::CallError;
use tokio::time::Instant;
use tower::{Layer, Service};

use super::ResponseFuture;
use crate::service::endpoint::Call;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds every call through the wrapped endpoint.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces the per-endpoint timeout.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout: Duration,
}

impl<S, Req, Resp> Service<Call<Req>> for TimeoutService<S>
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
        let Call { ctx, request } = call;
        let deadline = Instant::now() + self.timeout;
        let ctx = match ctx.deadline() {
            Some(existing) if existing <= deadline => ctx,
            _ => ctx.with_deadline(deadline),
        };

        let scope = ctx.clone();
        let fut = self.inner.call(Call::new(ctx, request));
        Box::pin(async move { scope.run(fut).await? })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
