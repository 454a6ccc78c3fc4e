//! Service wiring: from a bare [`PreambleService`] to a decorated endpoint set.
//!
//! 1. **Domain** (`domain`): the service implementation and its decorators
//! 2. **Endpoint** (`endpoint`): one uniform call shape per operation
//! 3. **Middleware** (`middleware`): tower layers wrapping endpoints
//! 4. **Endpoint set** (`endpoints`): all operations, decorated, as a service

pub mod config;
pub mod domain;
pub mod endpoint;
pub mod endpoints;
pub mod logging;
pub mod middleware;

pub use config::{MiddlewareKind, PipelineConfig};
pub use domain::{new_service, served, EchoService};
pub use endpoint::{endpoint_fn, make_preamble_endpoint, Call, Endpoint};
pub use endpoints::PreambleEndpoints;
pub use logging::LoggingDecorator;
