//! Preamble server: endpoint pipeline, admission policies, and gRPC/HTTP transports.

pub mod instrumentation;
pub mod policy;
pub mod service;
pub mod transport;

pub use instrumentation::Instrumentation;
pub use service::{PipelineConfig, PreambleEndpoints};
pub use transport::{GrpcClient, GrpcServer, HttpHandler};
