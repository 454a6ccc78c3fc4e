//! Preamble core: service contract, call context, error taxonomy, and message schemas.

pub mod context;
pub mod error;
pub mod messages;
pub mod traits;

pub use context::{CallContext, Interrupted};
pub use error::{http_status, CallError, DomainError, Rejection, ValidationError};
pub use messages::{operation_names, PreambleRequest, PreambleResponse, Validate};
pub use traits::PreambleService;
