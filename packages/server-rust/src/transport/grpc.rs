//! gRPC adapters for the `pb.Preamblesvc` service.
//!
//! [`GrpcServer`] implements the generated `Preamblesvc` server trait over an
//! endpoint set. It mounts on `tonic::transport::Server` via
//! [`GrpcServer::into_service`] and is itself a connection service for
//! in-process use. [`GrpcClient`] turns a tonic `Channel`, or any other such
//! connection, back into a [`PreambleService`] with its own client-side
//! middleware.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::trace::SpanKind;
use preamble_core::messages::wire;
use preamble_core::messages::wire::preamblesvc_client::PreamblesvcClient;
use preamble_core::messages::wire::preamblesvc_server::{Preamblesvc, PreamblesvcServer};
use preamble_core::{
    operation_names, CallContext, CallError, PreambleRequest, PreambleResponse, PreambleService,
};
use tokio::time::Instant;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::Status;
use tower::{service_fn, Service, ServiceExt};

use super::status::encode_error;
use crate::instrumentation::Instrumentation;
use crate::policy::{AdmissionPolicy, CircuitBreaker, TokenBucket};
use crate::service::config::PipelineConfig;
use crate::service::endpoint::{endpoint_fn, Call, Endpoint};
use crate::service::endpoints::PreambleEndpoints;
use crate::service::middleware::{EndpointBuilder, StackParts};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

/// Narrows a wire request to the domain request.
///
/// # Errors
///
/// Returns [`CallError::Decode`] when `msg` is absent.
pub fn decode_grpc_preamble_request(
    request: wire::PreambleRequest,
) -> Result<PreambleRequest, CallError> {
    let msg = request
        .msg
        .ok_or_else(|| CallError::Decode("missing field `msg`".to_string()))?;
    Ok(PreambleRequest { msg })
}

#[must_use]
pub fn encode_grpc_preamble_response(response: &PreambleResponse) -> wire::PreambleReply {
    wire::PreambleReply { rs: response.rs }
}

#[must_use]
pub fn encode_grpc_preamble_request(request: PreambleRequest) -> wire::PreambleRequest {
    wire::PreambleRequest {
        msg: Some(request.msg),
    }
}

#[must_use]
pub fn decode_grpc_preamble_response(reply: wire::PreambleReply) -> PreambleResponse {
    PreambleResponse::new(reply.rs)
}

/// Parses a `grpc-timeout` value (`<digits><unit>`, unit one of `HMSmun`).
fn grpc_timeout(metadata: &MetadataMap) -> Option<Duration> {
    let value = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    let split = value.len().checked_sub(1)?;
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount.saturating_mul(3600)),
        "M" => Duration::from_secs(amount.saturating_mul(60)),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

// ---------------------------------------------------------------------------
// GrpcServer
// ---------------------------------------------------------------------------

/// Server-side binding of (decode, endpoint, encode) per operation.
#[derive(Clone)]
pub struct GrpcServer {
    preamble: Endpoint<PreambleRequest, PreambleResponse>,
    instrumentation: Instrumentation,
}

impl GrpcServer {
    #[must_use]
    pub fn new(endpoints: &PreambleEndpoints, instrumentation: &Instrumentation) -> Self {
        Self {
            preamble: endpoints.preamble_endpoint().clone(),
            instrumentation: instrumentation.clone(),
        }
    }

    /// The tonic service to mount on `tonic::transport::Server`.
    #[must_use]
    pub fn into_service(self) -> PreamblesvcServer<Self> {
        PreamblesvcServer::new(self)
    }

    /// Context for an incoming call: remote trace parent plus the caller's
    /// deadline, when the request carries one.
    fn call_context(&self, metadata: &MetadataMap) -> CallContext {
        let ctx = CallContext::new()
            .with_trace_context(self.instrumentation.extract_metadata(metadata));
        match grpc_timeout(metadata) {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

#[tonic::async_trait]
impl Preamblesvc for GrpcServer {
    async fn preamble(
        &self,
        request: tonic::Request<wire::PreambleRequest>,
    ) -> Result<tonic::Response<wire::PreambleReply>, Status> {
        let ctx = self.call_context(request.metadata());
        let request = decode_grpc_preamble_request(request.into_inner())
            .map_err(|err| encode_error(&err))?;

        match self.preamble.clone().oneshot(Call::new(ctx, request)).await {
            Ok(response) => Ok(tonic::Response::new(encode_grpc_preamble_response(
                &response,
            ))),
            Err(err) => Err(encode_error(&err)),
        }
    }
}

impl Service<tonic::Request<wire::PreambleRequest>> for GrpcServer {
    type Response = tonic::Response<wire::PreambleReply>;
    type Error = Status;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Status>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: tonic::Request<wire::PreambleRequest>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Preamblesvc::preamble(&this, request).await })
    }
}

impl std::fmt::Debug for GrpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcServer").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// GrpcClient
// ---------------------------------------------------------------------------

/// A [`PreambleService`] that calls a remote server over `conn`.
///
/// `conn` is anything shaped like a tonic unary client call: a `Channel`
/// through [`GrpcClient::from_channel`], or a [`GrpcServer`] for in-process
/// use.
#[derive(Clone, Debug)]
pub struct GrpcClient {
    endpoints: PreambleEndpoints,
}

impl GrpcClient {
    /// Builds a client with a fresh rate limiter shared by all operations and
    /// one breaker per operation.
    pub fn new<C>(conn: C, instrumentation: &Instrumentation, config: &PipelineConfig) -> Self
    where
        C: Service<
                tonic::Request<wire::PreambleRequest>,
                Response = tonic::Response<wire::PreambleReply>,
                Error = Status,
            > + Clone
            + Send
            + Sync
            + 'static,
        C::Future: Send + 'static,
    {
        let limiter: Arc<dyn AdmissionPolicy> = Arc::new(TokenBucket::new(config.rate_limit));
        let breaker: Arc<dyn AdmissionPolicy> = Arc::new(CircuitBreaker::new(
            operation_names::PREAMBLE,
            config.circuit_breaker,
        ));
        Self::with_policies(conn, instrumentation, config, limiter, breaker)
    }

    /// Builds a client that calls `pb.Preamblesvc` over a tonic channel.
    #[must_use]
    pub fn from_channel(
        channel: Channel,
        instrumentation: &Instrumentation,
        config: &PipelineConfig,
    ) -> Self {
        let client = PreamblesvcClient::new(channel);
        let conn = service_fn(move |request: tonic::Request<wire::PreambleRequest>| {
            let mut client = client.clone();
            async move { client.preamble(request).await }
        });
        Self::new(conn, instrumentation, config)
    }

    /// Builds a client around caller-owned policies, e.g. a limiter shared
    /// with other clients.
    pub fn with_policies<C>(
        conn: C,
        instrumentation: &Instrumentation,
        config: &PipelineConfig,
        limiter: Arc<dyn AdmissionPolicy>,
        breaker: Arc<dyn AdmissionPolicy>,
    ) -> Self
    where
        C: Service<
                tonic::Request<wire::PreambleRequest>,
                Response = tonic::Response<wire::PreambleReply>,
                Error = Status,
            > + Clone
            + Send
            + Sync
            + 'static,
        C::Future: Send + 'static,
    {
        let preamble = EndpointBuilder::from_config(
            config,
            StackParts {
                operation: operation_names::PREAMBLE,
                span_kind: SpanKind::Client,
                instrumentation,
                limiter,
                breaker,
            },
        )
        .build(preamble_client_endpoint(conn, instrumentation.clone()));

        Self {
            endpoints: PreambleEndpoints::from_endpoints(preamble),
        }
    }

    #[must_use]
    pub fn endpoints(&self) -> &PreambleEndpoints {
        &self.endpoints
    }
}

#[async_trait]
impl PreambleService for GrpcClient {
    async fn preamble(&self, ctx: &CallContext, msg: i64) -> Result<i64, CallError> {
        self.endpoints.preamble(ctx, msg).await
    }
}

/// The undecorated client endpoint: encode, inject trace context, call,
/// decode. A [`Status`] from the connection becomes [`CallError::Remote`].
fn preamble_client_endpoint<C>(
    conn: C,
    instrumentation: Instrumentation,
) -> Endpoint<PreambleRequest, PreambleResponse>
where
    C: Service<
            tonic::Request<wire::PreambleRequest>,
            Response = tonic::Response<wire::PreambleReply>,
            Error = Status,
        > + Clone
        + Send
        + Sync
        + 'static,
    C::Future: Send + 'static,
{
    endpoint_fn(move |ctx: CallContext, request: PreambleRequest| {
        let conn = conn.clone();
        let instrumentation = instrumentation.clone();
        async move {
            let mut wire_request = tonic::Request::new(encode_grpc_preamble_request(request));
            instrumentation.inject_metadata(ctx.trace_context(), wire_request.metadata_mut());
            if let Some(deadline) = ctx.deadline() {
                wire_request.set_timeout(deadline.saturating_duration_since(Instant::now()));
            }
            let reply = conn.oneshot(wire_request).await?;
            Ok::<_, CallError>(decode_grpc_preamble_response(reply.into_inner()))
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use preamble_core::{DomainError, Rejection, ValidationError};
    use tonic::Code;

    use super::*;
    use crate::service::domain::EchoService;

    fn server_over<S>(service: S) -> GrpcServer
    where
        S: PreambleService + 'static,
    {
        let inst = Instrumentation::noop();
        let set = PreambleEndpoints::new(Arc::new(service), &inst, &PipelineConfig::server());
        GrpcServer::new(&set, &inst)
    }

    struct Failing;

    #[async_trait]
    impl PreambleService for Failing {
        async fn preamble(&self, _ctx: &CallContext, _msg: i64) -> Result<i64, CallError> {
            Err(DomainError::new("disk on fire").into())
        }
    }

    /// Fails every call as if the request were malformed.
    struct Invalid;

    #[async_trait]
    impl PreambleService for Invalid {
        async fn preamble(&self, _ctx: &CallContext, _msg: i64) -> Result<i64, CallError> {
            Err(ValidationError::new("msg", "out of range").into())
        }
    }

    /// Echoes its input and remembers the deadline it was called with.
    #[derive(Default)]
    struct RecordsDeadline {
        deadline: parking_lot::Mutex<Option<Instant>>,
    }

    #[async_trait]
    impl PreambleService for RecordsDeadline {
        async fn preamble(&self, ctx: &CallContext, msg: i64) -> Result<i64, CallError> {
            *self.deadline.lock() = ctx.deadline();
            Ok(msg)
        }
    }

    #[test]
    fn decode_rejects_missing_msg() {
        let err = decode_grpc_preamble_request(wire::PreambleRequest { msg: None }).unwrap_err();
        assert!(matches!(err, CallError::Decode(_)));
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn grpc_timeout_units() {
        let mut metadata = MetadataMap::new();
        for (value, expected) in [
            ("2S", Duration::from_secs(2)),
            ("150m", Duration::from_millis(150)),
            ("1M", Duration::from_secs(60)),
            ("7u", Duration::from_micros(7)),
        ] {
            metadata.insert(GRPC_TIMEOUT_HEADER, value.parse().unwrap());
            assert_eq!(grpc_timeout(&metadata), Some(expected), "{value}");
        }
        metadata.insert(GRPC_TIMEOUT_HEADER, "S".parse().unwrap());
        assert_eq!(grpc_timeout(&metadata), None);
    }

    #[tokio::test]
    async fn server_answers_in_wire_shape() {
        let server = server_over(EchoService);
        let reply = server
            .preamble(tonic::Request::new(wire::PreambleRequest { msg: Some(5) }))
            .await
            .unwrap();
        assert_eq!(reply.into_inner(), wire::PreambleReply { rs: 5 });
    }

    #[tokio::test]
    async fn server_maps_missing_field_to_invalid_argument() {
        let server = server_over(EchoService);
        let status = server
            .preamble(tonic::Request::new(wire::PreambleRequest { msg: None }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn server_hides_unregistered_business_errors() {
        let server = server_over(Failing);
        let status = server
            .preamble(tonic::Request::new(wire::PreambleRequest { msg: Some(1) }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "internal server error");
    }

    #[tokio::test(start_paused = true)]
    async fn client_deadline_reaches_server() {
        let seen = Arc::new(RecordsDeadline::default());
        let server = server_over(Arc::clone(&seen));
        let client = GrpcClient::new(server, &Instrumentation::noop(), &PipelineConfig::client());
        let ctx = CallContext::new().with_timeout(Duration::from_millis(250));

        assert_eq!(client.preamble(&ctx, 1).await.unwrap(), 1);

        let deadline = (*seen.deadline.lock()).expect("server saw a deadline");
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(remaining > Duration::from_millis(200), "{remaining:?}");
        assert!(remaining <= Duration::from_millis(250), "{remaining:?}");
    }

    #[tokio::test]
    async fn server_side_caller_faults_do_not_open_client_breaker() {
        let server = server_over(Invalid);
        let client = GrpcClient::new(server, &Instrumentation::noop(), &PipelineConfig::client());

        for _ in 0..10 {
            let err = client.preamble(&CallContext::new(), 1).await.unwrap_err();
            assert!(
                matches!(err, CallError::Remote(ref status) if status.code() == Code::InvalidArgument),
                "{err:?}"
            );
        }
    }

    #[tokio::test]
    async fn server_failures_still_open_client_breaker() {
        let server = server_over(Failing);
        let client = GrpcClient::new(server, &Instrumentation::noop(), &PipelineConfig::client());

        for _ in 0..6 {
            let err = client.preamble(&CallContext::new(), 1).await.unwrap_err();
            assert_eq!(err.code(), Code::Internal);
        }
        let err = client.preamble(&CallContext::new(), 1).await.unwrap_err();
        assert!(matches!(err, CallError::Rejected(Rejection::CircuitOpen)));
    }

    #[tokio::test]
    async fn client_round_trips_through_in_process_server() {
        let server = server_over(EchoService);
        let client = GrpcClient::new(server, &Instrumentation::noop(), &PipelineConfig::client());
        assert_eq!(client.preamble(&CallContext::new(), 42).await.unwrap(), 42);
    }
}
