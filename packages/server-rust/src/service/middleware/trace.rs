//! Tracing middleware for endpoints.
//!
//! Opens one OpenTelemetry span per call, named after the operation, as a
//! child of whatever span the call context carries. The inner endpoint sees a
//! context whose active span is the new one, so transports further in
//! propagate it and nested calls parent correctly.

use std::task::{Context, Poll};

use opentelemetry::trace::{FutureExt, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::KeyValue;
use preamble_core::messages::wire;
use preamble_core::CallError;
use tower::{Layer, Service};

use super::ResponseFuture;
use crate::instrumentation::Instrumentation;
use crate::service::endpoint::Call;

const RPC_SYSTEM: &str = "rpc.system";
const RPC_SERVICE: &str = "rpc.service";
const RPC_METHOD: &str = "rpc.method";
const RPC_GRPC_STATUS_CODE: &str = "rpc.grpc.status_code";

// ---------------------------------------------------------------------------
// TraceLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps each call in a span.
#[derive(Debug, Clone)]
pub struct TraceLayer {
    instrumentation: Instrumentation,
    operation: &'static str,
    kind: SpanKind,
}

impl TraceLayer {
    #[must_use]
    pub fn new(instrumentation: Instrumentation, operation: &'static str, kind: SpanKind) -> Self {
        Self {
            instrumentation,
            operation,
            kind,
        }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            layer: self.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// TraceService
// ---------------------------------------------------------------------------

/// Service wrapper that records each call as a span.
#[derive(Debug, Clone)]
pub struct TraceService<S> {
    inner: S,
    layer: TraceLayer,
}

impl<S, Req, Resp> Service<Call<Req>> for TraceService<S>
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
        let tracer = self.layer.instrumentation.tracer();
        let span = tracer
            .span_builder(self.layer.operation)
            .with_kind(self.layer.kind.clone())
            .with_attributes([
                KeyValue::new(RPC_SYSTEM, "grpc"),
                KeyValue::new(RPC_SERVICE, wire::SERVICE_NAME),
                KeyValue::new(RPC_METHOD, self.layer.operation),
            ])
            .start_with_context(tracer, ctx.trace_context());

        let cx = ctx.trace_context().with_span(span);
        let guard = SpanGuard(cx.clone());
        let fut = self
            .inner
            .call(Call::new(ctx.with_trace_context(cx.clone()), request));

        Box::pin(
            async move {
                let result = fut.await;
                guard.record(&result);
                result
            }
            .with_context(cx),
        )
    }
}

/// Ends the span when the call finishes or its future is dropped.
struct SpanGuard(opentelemetry::Context);

impl SpanGuard {
    fn record<T>(&self, result: &Result<T, CallError>) {
        let span = self.0.span();
        match result {
            Ok(_) => span.set_status(Status::Ok),
            Err(err) => {
                span.set_attribute(KeyValue::new(
                    RPC_GRPC_STATUS_CODE,
                    i64::from(i32::from(err.code())),
                ));
                if err.is_rejection() {
                    span.add_event("rejected", vec![]);
                }
                span.set_status(Status::error(err.to_string()));
            }
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.0.span().end();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use opentelemetry::trace::SpanId;
    use parking_lot::Mutex;
    use preamble_core::{CallContext, DomainError, PreambleRequest, PreambleResponse};
    use tower::ServiceExt;

    use super::*;
    use crate::service::endpoint::{endpoint_fn, Endpoint};
    use crate::test_support::recording_instrumentation;

    /// Echoes `msg`, fails for negative input, and reports the span id it saw.
    fn endpoint(seen: Arc<Mutex<Option<SpanId>>>) -> Endpoint<PreambleRequest, PreambleResponse> {
        endpoint_fn(move |ctx: CallContext, req: PreambleRequest| {
            *seen.lock() = Some(ctx.trace_context().span().span_context().span_id());
            async move {
                if req.msg < 0 {
                    return Err(DomainError::new("negative preamble").into());
                }
                Ok::<_, CallError>(PreambleResponse::new(req.msg))
            }
        })
    }

    #[tokio::test]
    async fn records_one_span_per_call_and_exposes_it_inward() {
        let (inst, exporter, _provider) = recording_instrumentation();
        let seen = Arc::new(Mutex::new(None));
        let svc = TraceLayer::new(inst, "Preamble", SpanKind::Server)
            .layer(endpoint(Arc::clone(&seen)));

        svc.oneshot(Call::new(CallContext::new(), PreambleRequest { msg: 1 }))
            .await
            .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "Preamble");
        assert_eq!(span.span_kind, SpanKind::Server);
        assert_eq!(span.status, Status::Ok);
        assert_eq!(*seen.lock(), Some(span.span_context.span_id()));
        assert!(span
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == RPC_METHOD && kv.value.as_str() == "Preamble"));
    }

    #[tokio::test]
    async fn failed_call_marks_span_as_error() {
        let (inst, exporter, _provider) = recording_instrumentation();
        let svc = TraceLayer::new(inst, "Preamble", SpanKind::Client).layer(endpoint(Arc::default()));

        let err = svc
            .oneshot(Call::new(CallContext::new(), PreambleRequest { msg: -1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Business(_)));

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error("negative preamble"));
    }

    #[tokio::test]
    async fn span_is_child_of_context_span() {
        let (inst, exporter, _provider) = recording_instrumentation();
        let parent = inst.tracer().start("parent");
        let parent_cx = opentelemetry::Context::new().with_span(parent);
        let parent_id = parent_cx.span().span_context().span_id();
        let ctx = CallContext::new().with_trace_context(parent_cx.clone());

        let svc = TraceLayer::new(inst, "Preamble", SpanKind::Server).layer(endpoint(Arc::default()));
        svc.oneshot(Call::new(ctx, PreambleRequest { msg: 2 }))
            .await
            .unwrap();
        parent_cx.span().end();

        let spans = exporter.get_finished_spans().unwrap();
        let child = spans.iter().find(|s| s.name == "Preamble").unwrap();
        assert_eq!(child.parent_span_id, parent_id);
        assert_eq!(
            child.span_context.trace_id(),
            parent_cx.span().span_context().trace_id()
        );
    }
}
