//! Tracing handles passed explicitly into every pipeline constructor.
//!
//! Nothing here reads or writes OpenTelemetry's global tracer provider or
//! global propagator; the process entry point builds one `Instrumentation`
//! and hands it down.

use std::fmt;
use std::sync::Arc;

use opentelemetry::global::BoxedTracer;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::noop::NoopTracer;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tonic::metadata::{Ascii, KeyRef, MetadataKey, MetadataMap, MetadataValue};

/// Tracer plus the propagator used to carry trace context across transports.
#[derive(Clone)]
pub struct Instrumentation {
    tracer: Arc<BoxedTracer>,
    propagator: Arc<dyn TextMapPropagator + Send + Sync>,
}

impl Instrumentation {
    /// Wraps `tracer` and uses W3C Trace Context (`traceparent`) propagation.
    pub fn new<T, S>(tracer: T) -> Self
    where
        T: Tracer<Span = S> + Send + Sync + 'static,
        S: Span + Send + Sync + 'static,
    {
        Self {
            tracer: Arc::new(BoxedTracer::new(Box::new(tracer))),
            propagator: Arc::new(TraceContextPropagator::new()),
        }
    }

    /// Instrumentation whose spans are never recorded.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(NoopTracer::new())
    }

    /// Replaces the propagator.
    #[must_use]
    pub fn with_propagator<P>(mut self, propagator: P) -> Self
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        self.propagator = Arc::new(propagator);
        self
    }

    #[must_use]
    pub fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }

    /// Writes the trace context of `cx` into outgoing gRPC metadata.
    pub fn inject_metadata(&self, cx: &opentelemetry::Context, metadata: &mut MetadataMap) {
        self.propagator
            .inject_context(cx, &mut MetadataInjector(metadata));
    }

    /// Reads a remote parent trace context from incoming gRPC metadata.
    #[must_use]
    pub fn extract_metadata(&self, metadata: &MetadataMap) -> opentelemetry::Context {
        self.propagator.extract(&MetadataExtractor(metadata))
    }

    /// Reads a remote parent trace context from incoming HTTP headers.
    #[must_use]
    pub fn extract_headers(&self, headers: &http::HeaderMap) -> opentelemetry::Context {
        self.propagator
            .extract(&opentelemetry_http::HeaderExtractor(headers))
    }
}

impl Default for Instrumentation {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// gRPC metadata carriers
// ---------------------------------------------------------------------------

struct MetadataInjector<'a>(&'a mut MetadataMap);

impl Injector for MetadataInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let Ok(key) = MetadataKey::<Ascii>::from_bytes(key.as_bytes()) else {
            return;
        };
        if let Ok(value) = value.parse::<MetadataValue<Ascii>>() {
            self.0.insert(key, value);
        }
    }
}

struct MetadataExtractor<'a>(&'a MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(|key| match key {
                KeyRef::Ascii(key) => key.as_str(),
                KeyRef::Binary(key) => key.as_str(),
            })
            .collect()
    }
}
