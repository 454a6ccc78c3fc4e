//! Error taxonomy shared by the service contract and the endpoint pipeline.
//!
//! Every call, whatever layer fails it, ends in exactly one [`CallError`]
//! variant. The variant decides the wire status via [`CallError::code`].

use http::StatusCode;
use tonic::Code;

use crate::context::Interrupted;

// ---------------------------------------------------------------------------
// DomainError
// ---------------------------------------------------------------------------

/// A business failure returned by a service implementation.
///
/// Opaque to the pipeline. A domain error may opt into a specific wire status
/// with [`DomainError::with_status`]; otherwise it is reported to remote
/// callers as `Internal` without its message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DomainError {
    message: String,
    status: Option<Code>,
}

impl DomainError {
    /// Creates a domain error with no associated wire status.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a domain error that is reported on the wire with `code` and
    /// its own message.
    ///
    /// `Code::Ok` is not a failure status; it registers nothing and the error
    /// is reported like one from [`DomainError::new`].
    pub fn with_status(code: Code, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: (code != Code::Ok).then_some(code),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wire status explicitly registered for this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<Code> {
        self.status
    }
}

// ---------------------------------------------------------------------------
// ValidationError / Rejection
// ---------------------------------------------------------------------------

/// A malformed request, detected before the service is invoked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Admission-control refusal. The wrapped endpoint was never invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("circuit breaker is open")]
    CircuitOpen,
}

// ---------------------------------------------------------------------------
// CallError
// ---------------------------------------------------------------------------

/// The single failure channel of every service call and endpoint invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("call rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Business(#[from] DomainError),
    #[error("malformed wire message: {0}")]
    Decode(String),
    #[error("call cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// A status returned by the remote side of a transport.
    #[error("remote call failed: {}", .0.message())]
    Remote(tonic::Status),
}

impl CallError {
    /// Returns `true` for rate-limit and circuit-breaker refusals, which
    /// callers usually retry on a different schedule than business failures.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Whether a circuit breaker should count this outcome against the
    /// protected endpoint. Caller mistakes, caller cancellations, and
    /// rejections do not, whether raised locally or reported by a peer.
    #[must_use]
    pub fn is_breaker_failure(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Decode(_) | Self::Cancelled | Self::Rejected(_) => false,
            Self::Remote(status) => !matches!(
                status.code(),
                Code::InvalidArgument | Code::Cancelled | Code::ResourceExhausted
            ),
            Self::Business(_) | Self::DeadlineExceeded => true,
        }
    }

    /// The wire status code this error is reported with.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::Validation(_) | Self::Decode(_) => Code::InvalidArgument,
            Self::Rejected(Rejection::RateLimited) => Code::ResourceExhausted,
            Self::Rejected(Rejection::CircuitOpen) => Code::Unavailable,
            Self::Business(err) => err.status().unwrap_or(Code::Internal),
            Self::Cancelled => Code::Cancelled,
            Self::DeadlineExceeded => Code::DeadlineExceeded,
            Self::Remote(status) => status.code(),
        }
    }
}

impl From<Interrupted> for CallError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Cancelled => Self::Cancelled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

impl From<tonic::Status> for CallError {
    fn from(status: tonic::Status) -> Self {
        Self::Remote(status)
    }
}

/// HTTP status for a wire code, following the Connect protocol table.
#[must_use]
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled | Code::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
