use std::sync::Arc;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::CallError;

/// The `Preamble` service contract.
///
/// Implementations must tolerate concurrent calls with independent contexts
/// and must not retain request data beyond the call. Decorators, endpoint
/// sets, and transport clients all implement this same trait, so any of them
/// can stand in for the business implementation.
#[async_trait]
pub trait PreambleService: Send + Sync {
    /// # Errors
    ///
    /// Business implementations return [`CallError::Business`]; pipeline
    /// wrappers may also return validation, rejection, cancellation, or
    /// transport errors.
    async fn preamble(&self, ctx: &CallContext, msg: i64) -> Result<i64, CallError>;
}

#[async_trait]
impl<S: PreambleService + ?Sized> PreambleService for Arc<S> {
    async fn preamble(&self, ctx: &CallContext, msg: i64) -> Result<i64, CallError> {
        (**self).preamble(ctx, msg).await
    }
}
