use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tonic::Code;

use super::Validate;
use crate::error::{http_status, DomainError, ValidationError};

/// Input of the `Preamble` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreambleRequest {
    pub msg: i64,
}

impl Validate for PreambleRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        // Every i64 is an acceptable preamble.
        Ok(())
    }
}

/// Output of the `Preamble` operation.
///
/// `err` is only populated when a failed call is rendered as a response body
/// (see the HTTP transport); endpoints report failures through their error
/// channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreambleResponse {
    pub rs: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "error_message")]
    pub err: Option<DomainError>,
}

impl PreambleResponse {
    #[must_use]
    pub fn new(rs: i64) -> Self {
        Self { rs, err: None }
    }

    /// A response carrying `err` instead of a result.
    #[must_use]
    pub fn failed(err: DomainError) -> Self {
        Self { rs: 0, err: Some(err) }
    }

    /// Wire status derived from the embedded error; `Ok` when there is none.
    #[must_use]
    pub fn status(&self) -> Code {
        self.err
            .as_ref()
            .map_or(Code::Ok, |err| err.status().unwrap_or(Code::Internal))
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        http_status(self.status())
    }

    /// Transport-level headers to attach to the reply. None today.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        HeaderMap::new()
    }
}

/// Serializes a domain error as its bare message string.
mod error_message {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::error::DomainError;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(err: &Option<DomainError>, s: S) -> Result<S::Ok, S::Error> {
        match err {
            Some(err) => s.serialize_some(err.message()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DomainError>, D::Error> {
        Ok(Option::<String>::deserialize(d)?.map(DomainError::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_response_reports_ok() {
        let resp = PreambleResponse::new(5);
        assert_eq!(resp.status(), Code::Ok);
        assert_eq!(resp.status_code(), StatusCode::OK);
        assert!(resp.headers().is_empty());
    }

    #[test]
    fn failed_response_uses_registered_status_or_internal() {
        let unregistered = PreambleResponse::failed(DomainError::new("boom"));
        assert_eq!(unregistered.status(), Code::Internal);
        assert_eq!(unregistered.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let registered = PreambleResponse::failed(DomainError::with_status(Code::NotFound, "gone"));
        assert_eq!(registered.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn request_validation_is_permissive() {
        assert!(PreambleRequest { msg: i64::MIN }.validate().is_ok());
    }

    #[test]
    fn json_shape_omits_absent_error() {
        let json = serde_json::to_string(&PreambleResponse::new(5)).unwrap();
        assert_eq!(json, r#"{"rs":5}"#);

        let json = serde_json::to_string(&PreambleResponse::failed(DomainError::new("nope"))).unwrap();
        assert_eq!(json, r#"{"rs":0,"err":"nope"}"#);
    }

    #[test]
    fn json_error_reads_back_as_message() {
        let resp: PreambleResponse = serde_json::from_str(r#"{"rs":0,"err":"nope"}"#).unwrap();
        assert_eq!(resp.err.map(|e| e.message().to_string()), Some("nope".to_string()));
    }
}
