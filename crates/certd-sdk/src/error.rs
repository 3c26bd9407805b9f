//! SDK error type.

use certd_pki::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for SDK calls.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Error returned by every [`crate::CertsClient`] operation.
///
/// Carries the engine's [`ErrorKind`] so callers can branch on the class of
/// failure, plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct SdkError {
    kind: SdkErrorKind,
    message: String,
}

/// Serializable mirror of [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdkErrorKind {
    /// Malformed request.
    Validation,
    /// Referenced resource does not exist.
    NotFound,
    /// Conflicts with current state.
    Conflict,
    /// Signing or verification failure.
    Crypto,
    /// Storage failure.
    Persistence,
    /// Download token rejected.
    Token,
    /// Engine invariant violated.
    Internal,
}

impl From<ErrorKind> for SdkErrorKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => Self::Validation,
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::Conflict => Self::Conflict,
            ErrorKind::Crypto => Self::Crypto,
            ErrorKind::Persistence => Self::Persistence,
            ErrorKind::Token => Self::Token,
            ErrorKind::Internal => Self::Internal,
        }
    }
}

impl SdkError {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: SdkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a request validation error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SdkErrorKind::Validation, message)
    }

    /// The class of failure.
    #[must_use]
    pub const fn kind(&self) -> SdkErrorKind {
        self.kind
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status a transport would answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self.kind {
            SdkErrorKind::Validation => 400,
            SdkErrorKind::Token => 401,
            SdkErrorKind::NotFound => 404,
            SdkErrorKind::Conflict => 409,
            SdkErrorKind::Crypto | SdkErrorKind::Persistence | SdkErrorKind::Internal => 500,
        }
    }
}

impl From<certd_pki::Error> for SdkError {
    fn from(err: certd_pki::Error) -> Self {
        Self::new(err.kind().into(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(certd_pki::Error::MissingCsr, SdkErrorKind::Validation, 400 ; "validation")]
    #[test_case(certd_pki::Error::NotFound { serial: "0a".into() }, SdkErrorKind::NotFound, 404 ; "not found")]
    #[test_case(certd_pki::Error::AlreadyRevoked { serial: "0a".into() }, SdkErrorKind::Conflict, 409 ; "conflict")]
    #[test_case(certd_pki::Error::ExpiredToken, SdkErrorKind::Token, 401 ; "token")]
    #[test_case(certd_pki::Error::Storage { reason: "disk".into() }, SdkErrorKind::Persistence, 500 ; "storage")]
    fn maps_engine_errors(err: certd_pki::Error, kind: SdkErrorKind, status: u16) {
        let message = err.to_string();
        let sdk = SdkError::from(err);
        assert_eq!(sdk.kind(), kind);
        assert_eq!(sdk.status_code(), status);
        assert_eq!(sdk.message(), message);
    }

    #[test]
    fn serializes_kind_and_message() {
        let err = SdkError::malformed("missing CSR");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"kind":"validation","message":"missing CSR"}"#);
        assert_eq!(err.to_string(), "missing CSR");
    }
}
