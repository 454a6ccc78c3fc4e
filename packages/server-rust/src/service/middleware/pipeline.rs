//! Pipeline composition: applies an ordered list of middleware to an endpoint.

use std::fmt;
use std::sync::Arc;

use opentelemetry::trace::SpanKind;
use tower::util::BoxCloneSyncService;
use tower::Layer;

use super::{AdmissionLayer, LoggingLayer, TimeoutLayer, TraceLayer};
use crate::instrumentation::Instrumentation;
use crate::policy::AdmissionPolicy;
use crate::service::config::{MiddlewareKind, PipelineConfig};
use crate::service::endpoint::Endpoint;

/// A configured middleware layer, independent of the endpoint it wraps.
#[derive(Debug, Clone)]
pub enum Middleware {
    Trace(TraceLayer),
    Admission(AdmissionLayer),
    Timeout(TimeoutLayer),
    Logging(LoggingLayer),
}

impl Middleware {
    fn wrap<Req, Resp>(&self, endpoint: Endpoint<Req, Resp>) -> Endpoint<Req, Resp>
    where
        Req: fmt::Debug + Send + 'static,
        Resp: Send + 'static,
    {
        match self {
            Self::Trace(layer) => BoxCloneSyncService::new(layer.layer(endpoint)),
            Self::Admission(layer) => BoxCloneSyncService::new(layer.layer(endpoint)),
            Self::Timeout(layer) => BoxCloneSyncService::new(layer.layer(endpoint)),
            Self::Logging(layer) => BoxCloneSyncService::new(layer.layer(endpoint)),
        }
    }
}

impl From<TraceLayer> for Middleware {
    fn from(layer: TraceLayer) -> Self {
        Self::Trace(layer)
    }
}

impl From<AdmissionLayer> for Middleware {
    fn from(layer: AdmissionLayer) -> Self {
        Self::Admission(layer)
    }
}

impl From<TimeoutLayer> for Middleware {
    fn from(layer: TimeoutLayer) -> Self {
        Self::Timeout(layer)
    }
}

impl From<LoggingLayer> for Middleware {
    fn from(layer: LoggingLayer) -> Self {
        Self::Logging(layer)
    }
}

/// Shared state one operation's stack is built from.
///
/// The rate limiter may be shared across operations; the breaker belongs to
/// this operation alone.
pub struct StackParts<'a> {
    pub operation: &'static str,
    pub span_kind: SpanKind,
    pub instrumentation: &'a Instrumentation,
    pub limiter: Arc<dyn AdmissionPolicy>,
    pub breaker: Arc<dyn AdmissionPolicy>,
}

/// Ordered middleware list, outermost first.
///
/// `build` applies the list in reverse so the first layer added is the
/// first to see a call.
#[derive(Debug, Clone, Default)]
pub struct EndpointBuilder {
    middleware: Vec<Middleware>,
}

impl EndpointBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the stack `config.stack` describes from `parts`.
    #[must_use]
    pub fn from_config(config: &PipelineConfig, parts: StackParts<'_>) -> Self {
        config
            .stack
            .iter()
            .fold(Self::new(), |builder, kind| match kind {
                MiddlewareKind::Tracing => builder.layer(TraceLayer::new(
                    parts.instrumentation.clone(),
                    parts.operation,
                    parts.span_kind.clone(),
                )),
                MiddlewareKind::RateLimit => {
                    builder.layer(AdmissionLayer::rate_limit(Arc::clone(&parts.limiter)))
                }
                MiddlewareKind::CircuitBreaker => {
                    builder.layer(AdmissionLayer::circuit_breaker(Arc::clone(&parts.breaker)))
                }
                MiddlewareKind::Timeout => builder.layer(TimeoutLayer::new(config.call_timeout)),
                MiddlewareKind::Logging => builder.layer(LoggingLayer::new(parts.operation)),
            })
    }

    /// Appends `middleware` inside everything added so far.
    #[must_use]
    pub fn layer(mut self, middleware: impl Into<Middleware>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    /// Wraps `endpoint` in every configured layer.
    #[must_use]
    pub fn build<Req, Resp>(&self, endpoint: Endpoint<Req, Resp>) -> Endpoint<Req, Resp>
    where
        Req: fmt::Debug + Send + 'static,
        Resp: Send + 'static,
    {
        self.middleware
            .iter()
            .rev()
            .fold(endpoint, |endpoint, middleware| middleware.wrap(endpoint))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
