//! Client → in-process gRPC → server round trips through the full pipelines.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::trace::{SpanKind, TracerProvider as _};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
use parking_lot::Mutex;
use preamble_core::messages::wire;
use preamble_core::messages::wire::preamblesvc_client::PreamblesvcClient;
use preamble_core::{CallContext, CallError, DomainError, PreambleRequest, PreambleService, Rejection};
use preamble_server::policy::{
    AdmissionPolicy, BreakerState, CircuitBreaker, CircuitBreakerConfig, RateLimitConfig,
    TokenBucket, TripPolicy,
};
use preamble_server::service::endpoint::{endpoint_fn, make_preamble_endpoint, Call};
use preamble_server::service::middleware::{AdmissionLayer, EndpointBuilder, StackParts};
use preamble_server::service::{new_service, PipelineConfig, PreambleEndpoints};
use preamble_server::{GrpcClient, GrpcServer, Instrumentation};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Server};
use tonic::Code;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn recording() -> (Instrumentation, InMemorySpanExporter, SdkTracerProvider) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    (
        Instrumentation::new(provider.tracer("end-to-end")),
        exporter,
        provider,
    )
}

fn client_for<S>(service: Arc<S>, inst: &Instrumentation) -> GrpcClient
where
    S: PreambleService + ?Sized + 'static,
{
    let endpoints = PreambleEndpoints::new(service, inst, &PipelineConfig::server());
    let server = GrpcServer::new(&endpoints, inst);
    GrpcClient::new(server, inst, &PipelineConfig::client())
}

/// Fails every call with "not found", optionally registered as `NotFound`.
struct NotFound {
    registered: bool,
}

#[async_trait]
impl PreambleService for NotFound {
    async fn preamble(&self, _ctx: &CallContext, _msg: i64) -> Result<i64, CallError> {
        let err = if self.registered {
            DomainError::with_status(Code::NotFound, "not found")
        } else {
            DomainError::new("not found")
        };
        Err(err.into())
    }
}

struct Stalled;

#[async_trait]
impl PreambleService for Stalled {
    async fn preamble(&self, _ctx: &CallContext, _msg: i64) -> Result<i64, CallError> {
        std::future::pending().await
    }
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn count(&self, needle: &str) -> usize {
        String::from_utf8_lossy(&self.0.lock()).matches(needle).count()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn echo_round_trip() {
    let client = client_for(new_service(&PipelineConfig::server()), &Instrumentation::noop());
    assert_eq!(client.preamble(&CallContext::new(), 5).await.unwrap(), 5);
}

#[tokio::test]
async fn registered_business_error_reaches_client_with_its_code() {
    let client = client_for(Arc::new(NotFound { registered: true }), &Instrumentation::noop());
    let err = client.preamble(&CallContext::new(), 1).await.unwrap_err();

    assert_eq!(err.code(), Code::NotFound);
    assert!(matches!(err, CallError::Remote(ref status) if status.message() == "not found"));
}

#[tokio::test]
async fn unregistered_business_error_is_opaque_to_client() {
    let client = client_for(Arc::new(NotFound { registered: false }), &Instrumentation::noop());
    let err = client.preamble(&CallContext::new(), 1).await.unwrap_err();

    assert_eq!(err.code(), Code::Internal);
    assert!(matches!(err, CallError::Remote(ref status) if status.message() == "internal server error"));
    assert!(!err.to_string().contains("not found"));
}

#[tokio::test]
async fn cancelled_context_ends_slow_call_promptly() {
    let client = client_for(Arc::new(Stalled), &Instrumentation::noop());
    let token = CancellationToken::new();
    let ctx = CallContext::new().with_cancellation(token.clone());

    let call = tokio::spawn(async move { client.preamble(&ctx, 1).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let err = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("call did not stop after cancellation")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, CallError::Cancelled));
}

// ---------------------------------------------------------------------------
// Over a real connection
// ---------------------------------------------------------------------------

/// Serves the default stack on a loopback port and returns a channel to it.
async fn serve_on_loopback<S>(
    service: Arc<S>,
    inst: &Instrumentation,
) -> (Channel, tokio::task::JoinHandle<Result<(), tonic::transport::Error>>)
where
    S: PreambleService + ?Sized + 'static,
{
    let endpoints = PreambleEndpoints::new(service, inst, &PipelineConfig::server());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(
        Server::builder()
            .add_service(GrpcServer::new(&endpoints, inst).into_service())
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    (channel, server)
}

#[tokio::test]
async fn grpc_client_and_server_talk_over_tcp() {
    let inst = Instrumentation::noop();
    let (channel, server) =
        serve_on_loopback(new_service(&PipelineConfig::server()), &inst).await;

    let client = GrpcClient::from_channel(channel, &inst, &PipelineConfig::client());
    assert_eq!(client.preamble(&CallContext::new(), 11).await.unwrap(), 11);

    server.abort();
}

#[tokio::test]
async fn missing_field_over_tcp_is_invalid_argument() {
    let inst = Instrumentation::noop();
    let (channel, server) =
        serve_on_loopback(new_service(&PipelineConfig::server()), &inst).await;

    let status = PreamblesvcClient::new(channel)
        .preamble(wire::PreambleRequest { msg: None })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    server.abort();
}

#[tokio::test]
async fn registered_business_error_crosses_tcp_with_its_code() {
    let inst = Instrumentation::noop();
    let (channel, server) = serve_on_loopback(Arc::new(NotFound { registered: true }), &inst).await;

    let client = GrpcClient::from_channel(channel, &inst, &PipelineConfig::client());
    let err = client.preamble(&CallContext::new(), 1).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert!(matches!(err, CallError::Remote(ref status) if status.message() == "not found"));

    server.abort();
}

// ---------------------------------------------------------------------------
// Policies under load
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_open_breaker_exactly_once() {
    let opens = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&opens);
    let breaker = Arc::new(
        CircuitBreaker::new(
            "Preamble",
            CircuitBreakerConfig {
                trip: TripPolicy::ConsecutiveFailures(10),
                ..CircuitBreakerConfig::default()
            },
        )
        .with_state_listener(Arc::new(
            move |_name: &str, _from: BreakerState, to: BreakerState| {
                if to == BreakerState::Open {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        )),
    );
    let invoked = Arc::new(AtomicU32::new(0));
    let calls = Arc::clone(&invoked);
    let failing = endpoint_fn(move |_ctx: CallContext, _req: PreambleRequest| {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::task::yield_now().await;
            Err::<preamble_core::PreambleResponse, CallError>(DomainError::new("down").into())
        }
    });
    let endpoint = EndpointBuilder::new()
        .layer(AdmissionLayer::circuit_breaker(
            Arc::clone(&breaker) as Arc<dyn AdmissionPolicy>
        ))
        .build(failing);

    let tasks: Vec<_> = (0..1000)
        .map(|msg| {
            let endpoint = endpoint.clone();
            tokio::spawn(endpoint.oneshot(Call::new(CallContext::new(), PreambleRequest { msg })))
        })
        .collect();

    let mut rejected = 0;
    let mut failed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Err(CallError::Rejected(Rejection::CircuitOpen)) => rejected += 1,
            Err(CallError::Business(_)) => failed += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(rejected + failed, 1000);
    assert!(failed >= 10);
    assert_eq!(invoked.load(Ordering::SeqCst), failed);
}

#[tokio::test]
async fn default_stack_runs_tracing_then_limiter_then_breaker_then_logging() {
    let logs = Captured::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (inst, exporter, _provider) = recording();
    let limiter = Arc::new(TokenBucket::new(RateLimitConfig {
        refill_every: Duration::from_secs(3600),
        burst: 2,
    }));
    let breaker = Arc::new(CircuitBreaker::new(
        "Preamble",
        CircuitBreakerConfig {
            trip: TripPolicy::ConsecutiveFailures(1),
            ..CircuitBreakerConfig::default()
        },
    ));
    let endpoint = EndpointBuilder::from_config(
        &PipelineConfig::server(),
        StackParts {
            operation: "Preamble",
            span_kind: SpanKind::Server,
            instrumentation: &inst,
            limiter: Arc::clone(&limiter) as Arc<dyn AdmissionPolicy>,
            breaker: Arc::clone(&breaker) as Arc<dyn AdmissionPolicy>,
        },
    )
    .build(make_preamble_endpoint(Arc::new(NotFound { registered: false })));
    let call = || Call::new(CallContext::new(), PreambleRequest { msg: 1 });

    // 1: admitted everywhere; fails in the service and opens the breaker.
    let first = endpoint.clone().oneshot(call()).await.unwrap_err();
    assert!(matches!(first, CallError::Business(_)));
    assert_eq!(breaker.state(), BreakerState::Open);

    // 2: the limiter spends its last token, then the open breaker refuses.
    let second = endpoint.clone().oneshot(call()).await.unwrap_err();
    assert!(matches!(second, CallError::Rejected(Rejection::CircuitOpen)));
    assert!(limiter.available() < 1.0);

    // 3: the limiter refuses before the breaker is consulted.
    let third = endpoint.oneshot(call()).await.unwrap_err();
    assert!(matches!(third, CallError::Rejected(Rejection::RateLimited)));
    assert_eq!(breaker.counts().requests, 0);

    // Tracing saw all three calls; logging, innermost, only the admitted one.
    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 3);
    let rejected = spans
        .iter()
        .filter(|s| s.events.events.iter().any(|e| e.name == "rejected"))
        .count();
    assert_eq!(rejected, 2);
    assert_eq!(logs.count("call failed"), 1);
}

// ---------------------------------------------------------------------------
// Distributed tracing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_span_is_child_of_client_span() {
    let (inst, exporter, _provider) = recording();
    let client = client_for(new_service(&PipelineConfig::server()), &inst);

    assert_eq!(client.preamble(&CallContext::new(), 7).await.unwrap(), 7);

    let spans = exporter.get_finished_spans().unwrap();
    let client_span = spans
        .iter()
        .find(|s| s.span_kind == SpanKind::Client)
        .expect("client span");
    let server_span = spans
        .iter()
        .find(|s| s.span_kind == SpanKind::Server)
        .expect("server span");

    assert_eq!(
        server_span.span_context.trace_id(),
        client_span.span_context.trace_id()
    );
    assert_eq!(server_span.parent_span_id, client_span.span_context.span_id());
}
