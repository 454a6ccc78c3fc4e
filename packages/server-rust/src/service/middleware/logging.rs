//! Logging middleware for endpoints.
//!
//! Emits one structured event per call with the method name, the request,
//! the elapsed time, and the error if any. The event is written from a drop
//! guard, so a call abandoned by its caller is still logged.

use std::fmt;
use std::task::{Context, Poll};
use std::time::Instant;

use preamble_core::CallError;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::ResponseFuture;
use crate::service::endpoint::Call;

// ---------------------------------------------------------------------------
// CallLog
// ---------------------------------------------------------------------------

/// Pending log event for one call; emitted on [`CallLog::finish`] or on drop.
pub(crate) struct CallLog {
    method: &'static str,
    input: String,
    start: Instant,
    finished: bool,
}

impl CallLog {
    pub(crate) fn start(method: &'static str, input: String) -> Self {
        Self {
            method,
            input,
            start: Instant::now(),
            finished: false,
        }
    }

    pub(crate) fn finish<T>(mut self, result: &Result<T, CallError>) {
        self.finished = true;
        let method = self.method;
        let input = self.input.as_str();
        let elapsed_ms = self.elapsed_ms();
        match result {
            Ok(_) => tracing::info!(method, input, elapsed_ms, "call complete"),
            Err(err) => tracing::warn!(
                method,
                input,
                elapsed_ms,
                code = ?err.code(),
                error = %err,
                "call failed"
            ),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Drop for CallLog {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                method = self.method,
                input = self.input.as_str(),
                elapsed_ms = self.elapsed_ms(),
                "call abandoned before completion"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

/// Tower layer that logs every call through the wrapped endpoint.
#[derive(Debug, Clone, Copy)]
pub struct LoggingLayer {
    method: &'static str,
}

impl LoggingLayer {
    #[must_use]
    pub fn new(method: &'static str) -> Self {
        Self { method }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            method: self.method,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingService
// ---------------------------------------------------------------------------

/// Service wrapper that logs each call's input, duration, and outcome.
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
    method: &'static str,
}

impl<S, Req, Resp> Service<Call<Req>> for LoggingService<S>
where
    S: Service<Call<Req>, Response = Resp, Error = CallError> + Send,
    S::Future: Send + 'static,
    Req: fmt::Debug,
    Resp: Send + 'static,
{
    type Response = Resp;
    type Error = CallError;
    type Future = ResponseFuture<Resp>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let span = info_span!("endpoint", method = self.method);
        let log = CallLog::start(self.method, format!("{:?}", call.request));
        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let result = fut.await;
                log.finish(&result);
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
