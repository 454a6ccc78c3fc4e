//! Endpoint abstraction: one uniform call shape per operation.
//!
//! An endpoint is a `tower::Service<Call<Req>>` that answers with `Resp` or a
//! [`CallError`]. Request and response types stay generic parameters, so a
//! mismatch between what a transport decodes and what an endpoint expects is a
//! compile error instead of a runtime cast.

use std::future::Future;
use std::sync::Arc;

use preamble_core::{
    CallContext, CallError, PreambleRequest, PreambleResponse, PreambleService, Validate,
};
use tower::util::BoxCloneSyncService;
use tower::service_fn;

/// One invocation: the caller's context plus the operation's request value.
#[derive(Debug, Clone)]
pub struct Call<Req> {
    pub ctx: CallContext,
    pub request: Req,
}

impl<Req> Call<Req> {
    pub fn new(ctx: CallContext, request: Req) -> Self {
        Self { ctx, request }
    }
}

/// Type-erased endpoint for one operation.
///
/// Cheap to clone; all clones share the state captured by their middleware.
pub type Endpoint<Req, Resp> = BoxCloneSyncService<Call<Req>, Resp, CallError>;

/// Adapts an operation handler into an [`Endpoint`].
///
/// The request is validated first; an invalid request never reaches the
/// handler. The handler is raced against the context's cancellation token
/// and deadline, so an endpoint stops waiting as soon as its caller does.
pub fn endpoint_fn<Req, Resp, F, Fut>(handler: F) -> Endpoint<Req, Resp>
where
    Req: Validate + Send + 'static,
    Resp: Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, CallError>> + Send + 'static,
{
    BoxCloneSyncService::new(service_fn(move |call: Call<Req>| {
        let handler = handler.clone();
        async move {
            let Call { ctx, request } = call;
            request.validate()?;
            let scope = ctx.clone();
            scope.run(handler(ctx, request)).await?
        }
    }))
}

/// Builds the endpoint that invokes `Preamble` on `service`.
pub fn make_preamble_endpoint<S>(service: Arc<S>) -> Endpoint<PreambleRequest, PreambleResponse>
where
    S: PreambleService + ?Sized + 'static,
{
    endpoint_fn(move |ctx: CallContext, request: PreambleRequest| {
        let service = Arc::clone(&service);
        async move {
            let rs = service.preamble(&ctx, request.msg).await?;
            Ok::<_, CallError>(PreambleResponse::new(rs))
        }
    })
}
