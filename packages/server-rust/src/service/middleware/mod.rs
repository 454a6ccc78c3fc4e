//! Endpoint middleware: each layer turns an endpoint into another endpoint
//! with the same contract.
//!
//! - [`trace`]: OpenTelemetry span per call, propagated through the context
//! - [`admission`]: rate limiting and circuit breaking via an `AdmissionPolicy`
//! - [`timeout`]: per-endpoint deadline enforcement
//! - [`logging`]: one structured log event per call
//! - [`pipeline`]: composes an ordered list of layers onto an endpoint

pub mod admission;
pub mod logging;
pub mod pipeline;
pub mod timeout;
pub mod trace;

use std::future::Future;
use std::pin::Pin;

use preamble_core::CallError;

pub use admission::AdmissionLayer;
pub use logging::LoggingLayer;
pub use pipeline::{EndpointBuilder, Middleware, StackParts};
pub use timeout::TimeoutLayer;
pub use trace::TraceLayer;

/// Future returned by every middleware service.
pub type ResponseFuture<Resp> = Pin<Box<dyn Future<Output = Result<Resp, CallError>> + Send>>;
