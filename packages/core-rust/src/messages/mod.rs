//! Request/response values and wire message shapes for every operation.
//!
//! Domain values (`preamble`) are what endpoints and services exchange.
//! Wire messages (`wire`) are the protobuf shapes that cross a transport;
//! transports translate between the two.

pub mod preamble;
pub mod wire;

pub use preamble::{PreambleRequest, PreambleResponse};

/// Operation names, used for span names, log fields, and breaker identity.
pub mod operation_names {
    pub const PREAMBLE: &str = "Preamble";
}

/// Input checks run by the endpoint before the service is invoked.
pub trait Validate {
    /// Returns an error when the request is malformed.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`](crate::ValidationError) found.
    fn validate(&self) -> Result<(), crate::ValidationError>;
}
