//! Logging decorator for [`PreambleService`] implementations.

use async_trait::async_trait;
use preamble_core::{operation_names, CallContext, CallError, PreambleService};

use crate::service::middleware::logging::CallLog;

/// Wraps a service and logs every call with its argument, duration, and
/// error. Results pass through untouched.
#[derive(Debug, Clone)]
pub struct LoggingDecorator<S> {
    inner: S,
}

impl<S> LoggingDecorator<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S> PreambleService for LoggingDecorator<S>
where
    S: PreambleService,
{
    async fn preamble(&self, ctx: &CallContext, msg: i64) -> Result<i64, CallError> {
        let log = CallLog::start(operation_names::PREAMBLE, format!("msg={msg}"));
        let result = self.inner.preamble(ctx, msg).await;
        log.finish(&result);
        result
    }
}
