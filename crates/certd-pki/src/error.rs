//! PKI error types.

use thiserror::Error;

/// Result type for PKI operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
///
/// Transports map a kind to their own status codes (HTTP 400/404/409/500,
/// gRPC `InvalidArgument`/`NotFound`/`AlreadyExists`/`Unavailable`, ...)
/// without inspecting message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input; the caller can correct it and resubmit.
    Validation,
    /// The referenced certificate, entity or CA does not exist.
    NotFound,
    /// The request conflicts with current state (already revoked, duplicate serial).
    Conflict,
    /// Signing or signature verification failed.
    Crypto,
    /// The certificate store could not complete the operation.
    Persistence,
    /// A download token was rejected.
    Token,
    /// An invariant of the engine itself was violated.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Crypto => "crypto",
            Self::Persistence => "persistence",
            Self::Token => "token",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// PKI error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity ID is empty or malformed.
    #[error("invalid entity id: {reason}")]
    InvalidEntityId {
        /// Why the entity ID was rejected.
        reason: String,
    },

    /// TTL could not be parsed or exceeds the configured maximum.
    #[error("invalid ttl '{value}': {reason}")]
    InvalidTtl {
        /// The TTL string as supplied.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A Subject Alternative Name is not usable.
    #[error("invalid subject alternative name '{value}'")]
    InvalidSan {
        /// The offending SAN value.
        value: String,
    },

    /// A subject field is missing or out of bounds.
    #[error("invalid subject field '{field}': {reason}")]
    InvalidSubject {
        /// Name of the subject field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// No CSR was supplied.
    #[error("missing CSR")]
    MissingCsr,

    /// The CSR could not be parsed, failed signature verification, or uses a weak key.
    #[error("invalid CSR: {reason}")]
    InvalidCsr {
        /// Why the CSR was rejected.
        reason: String,
    },

    /// A serial number string is not valid hex.
    #[error("invalid serial number '{value}'")]
    InvalidSerial {
        /// The serial number as supplied.
        value: String,
    },

    /// Pagination or filter parameters are out of range.
    #[error("invalid query parameters: {reason}")]
    InvalidQueryParams {
        /// Which parameter was rejected.
        reason: String,
    },

    /// The requested CA type does not serve this operation.
    #[error("invalid CA type: {0}")]
    InvalidCaType(String),

    /// Configuration is inconsistent.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Certificate not found.
    #[error("certificate not found: {serial}")]
    NotFound {
        /// Serial number that was looked up.
        serial: String,
    },

    /// Entity has no certificates.
    #[error("no certificates for entity: {entity_id}")]
    EntityNotFound {
        /// The entity ID that was looked up.
        entity_id: String,
    },

    /// CA not known to the CA manager.
    #[error("certificate authority not found: {ca_id}")]
    CaNotFound {
        /// The CA identifier that was looked up.
        ca_id: String,
    },

    /// Certificate already revoked.
    #[error("certificate already revoked: {serial}")]
    AlreadyRevoked {
        /// Serial number of the certificate.
        serial: String,
    },

    /// A record with this serial already exists.
    #[error("serial number already exists: {serial}")]
    SerialExists {
        /// The duplicated serial number.
        serial: String,
    },

    /// Operation requires a certificate that is still within its validity window.
    #[error("certificate has expired: {serial}")]
    CertificateExpired {
        /// Serial number of the certificate.
        serial: String,
    },

    /// The requested status change is not a legal lifecycle transition.
    #[error("illegal status transition for {serial}: {from} -> {to}")]
    IllegalTransition {
        /// Serial number of the certificate.
        serial: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Operation requires an active certificate.
    #[error("certificate is revoked: {serial}")]
    CertificateRevoked {
        /// Serial number of the certificate.
        serial: String,
    },

    /// The CA key could not produce a signature.
    #[error("signing failed: {reason}")]
    KeySigning {
        /// Underlying failure.
        reason: String,
    },

    /// Signature verification failed.
    #[error("signature verification failed: {reason}")]
    SignatureVerification {
        /// Underlying failure.
        reason: String,
    },

    /// Invalid certificate chain.
    #[error("invalid certificate chain: {reason}")]
    InvalidChain {
        /// Which link of the chain failed.
        reason: String,
    },

    /// A freshly allocated serial collided with an existing record.
    #[error("serial number allocation collided: {serial}")]
    SerialAllocation {
        /// The colliding serial number.
        serial: String,
    },

    /// Storage error.
    #[error("storage error: {reason}")]
    Storage {
        /// Underlying failure.
        reason: String,
    },

    /// Certificate, key or ASN.1 structure could not be decoded.
    #[error("parse error: {reason}")]
    Parse {
        /// Underlying failure.
        reason: String,
    },

    /// Download token is past its expiry.
    #[error("download token expired")]
    ExpiredToken,

    /// Download token is unknown or does not authorize the requested resource.
    #[error("invalid download token")]
    InvalidToken,

    /// Single-use download token was already redeemed.
    #[error("download token already redeemed")]
    AlreadyRedeemed,
}

impl Error {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEntityId { .. }
            | Self::InvalidTtl { .. }
            | Self::InvalidSan { .. }
            | Self::InvalidSubject { .. }
            | Self::MissingCsr
            | Self::InvalidCsr { .. }
            | Self::InvalidSerial { .. }
            | Self::InvalidQueryParams { .. }
            | Self::InvalidCaType(_)
            | Self::Config { .. } => ErrorKind::Validation,
            Self::NotFound { .. } | Self::EntityNotFound { .. } | Self::CaNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::AlreadyRevoked { .. }
            | Self::SerialExists { .. }
            | Self::CertificateExpired { .. }
            | Self::IllegalTransition { .. }
            | Self::CertificateRevoked { .. } => ErrorKind::Conflict,
            Self::KeySigning { .. }
            | Self::SignatureVerification { .. }
            | Self::InvalidChain { .. } => ErrorKind::Crypto,
            Self::Storage { .. } => ErrorKind::Persistence,
            Self::ExpiredToken | Self::InvalidToken | Self::AlreadyRedeemed => ErrorKind::Token,
            Self::SerialAllocation { .. } | Self::Parse { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Persistence)
    }

    pub(crate) fn storage(reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn signing(reason: impl std::fmt::Display) -> Self {
        Self::KeySigning {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse(reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Error::MissingCsr, ErrorKind::Validation ; "missing csr")]
    #[test_case(Error::NotFound { serial: "01".into() }, ErrorKind::NotFound ; "not found")]
    #[test_case(Error::AlreadyRevoked { serial: "01".into() }, ErrorKind::Conflict ; "already revoked")]
    #[test_case(Error::KeySigning { reason: "x".into() }, ErrorKind::Crypto ; "signing")]
    #[test_case(Error::Storage { reason: "x".into() }, ErrorKind::Persistence ; "storage")]
    #[test_case(Error::AlreadyRedeemed, ErrorKind::Token ; "redeemed")]
    #[test_case(Error::SerialAllocation { serial: "01".into() }, ErrorKind::Internal ; "allocation")]
    fn error_kind_mapping(err: Error, kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn only_persistence_is_retryable() {
        assert!(Error::storage("disk full").is_retryable());
        assert!(!Error::MissingCsr.is_retryable());
        assert!(!Error::signing("no key").is_retryable());
    }

    #[test]
    fn error_display_carries_metadata() {
        let err = Error::InvalidTtl {
            value: "99y".into(),
            reason: "unknown unit".into(),
        };
        assert_eq!(err.to_string(), "invalid ttl '99y': unknown unit");

        let err = Error::InvalidSan {
            value: "10.0.0.300".into(),
        };
        assert_eq!(err.to_string(), "invalid subject alternative name '10.0.0.300'");
    }
}
