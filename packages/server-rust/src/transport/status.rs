//! Domain-to-wire error mapping.

use preamble_core::CallError;
use tonic::Status;

/// Message sent in place of a business error that carries no wire status.
pub const OPAQUE_INTERNAL_MESSAGE: &str = "internal server error";

/// Maps a call failure to the status sent to remote callers.
///
/// A status received from a remote peer passes through unchanged, so
/// re-encoding an encoded error is a no-op. Business errors keep their
/// message only when they registered a status; others become `Internal`
/// with [`OPAQUE_INTERNAL_MESSAGE`].
#[must_use]
pub fn encode_error(err: &CallError) -> Status {
    match err {
        CallError::Remote(status) => Status::new(status.code(), status.message()),
        CallError::Business(domain) => match domain.status() {
            Some(code) => Status::new(code, domain.message()),
            None => Status::internal(OPAQUE_INTERNAL_MESSAGE),
        },
        other => Status::new(other.code(), other.to_string()),
    }
}
