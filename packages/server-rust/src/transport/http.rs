//! JSON-over-HTTP projection of the endpoint set.
//!
//! Request bodies are `{"msg": <int64>}`. Responses are
//! `{"rs": <int64>, "err": <string>?}` with the HTTP status derived from the
//! wire code, so HTTP and gRPC callers see the same taxonomy.

use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use preamble_core::{CallContext, CallError, DomainError, PreambleRequest, PreambleResponse};
use tower::ServiceExt;

use super::status::encode_error;
use crate::instrumentation::Instrumentation;
use crate::service::endpoint::{Call, Endpoint};
use crate::service::endpoints::PreambleEndpoints;

/// Parses a JSON request body.
///
/// # Errors
///
/// Returns [`CallError::Decode`] when the body is not a valid request.
pub fn decode_http_preamble_request(body: &[u8]) -> Result<PreambleRequest, CallError> {
    serde_json::from_slice(body).map_err(|err| CallError::Decode(err.to_string()))
}

/// Renders a call result as a JSON response.
///
/// Failures are rendered through [`encode_error`], so unregistered business
/// errors stay opaque here too.
///
/// # Errors
///
/// Returns the serializer error if the body cannot be encoded.
pub fn encode_http_response(
    result: &Result<PreambleResponse, CallError>,
) -> Result<http::Response<Vec<u8>>, serde_json::Error> {
    let rendered = match result {
        Ok(response) => response.clone(),
        Err(err) => {
            let status = encode_error(err);
            PreambleResponse::failed(DomainError::with_status(status.code(), status.message()))
        }
    };

    let mut response = http::Response::new(serde_json::to_vec(&rendered)?);
    *response.status_mut() = rendered.status_code();
    response.headers_mut().extend(rendered.headers());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

/// Serves the `Preamble` operation for HTTP requests.
#[derive(Clone)]
pub struct HttpHandler {
    preamble: Endpoint<PreambleRequest, PreambleResponse>,
    instrumentation: Instrumentation,
}

impl HttpHandler {
    #[must_use]
    pub fn new(endpoints: &PreambleEndpoints, instrumentation: &Instrumentation) -> Self {
        Self {
            preamble: endpoints.preamble_endpoint().clone(),
            instrumentation: instrumentation.clone(),
        }
    }

    /// Decodes, calls, and encodes one request. Never fails: every error
    /// becomes a status code and body.
    pub async fn handle(&self, request: http::Request<Vec<u8>>) -> http::Response<Vec<u8>> {
        let ctx = CallContext::new()
            .with_trace_context(self.instrumentation.extract_headers(request.headers()));
        let result = match decode_http_preamble_request(request.body()) {
            Ok(decoded) => self.preamble.clone().oneshot(Call::new(ctx, decoded)).await,
            Err(err) => Err(err),
        };

        encode_http_response(&result).unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to encode response body");
            let mut response = http::Response::new(Vec::new());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
    }
}

impl std::fmt::Debug for HttpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHandler").finish_non_exhaustive()
    }
}
