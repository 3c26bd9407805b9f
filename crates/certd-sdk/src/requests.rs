//! Request types and their shape checks.
//!
//! Validation here only rejects requests a transport would refuse before
//! reaching the engine; semantic checks (TTL bounds, CSR signatures, key
//! strength) happen in `certd-pki`.

use certd_pki::{CaKind, PageQuery, RevocationReason, SubjectOptions};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SdkError};

/// Message for a missing entity ID.
pub const ERR_MISSING_ENTITY_ID: &str = "missing entity ID";
/// Message for a missing CSR.
pub const ERR_MISSING_CSR: &str = "missing CSR";
/// Message for an empty serial number.
pub const ERR_EMPTY_SERIAL: &str = "empty serial number provided";
/// Message for an empty download token.
pub const ERR_EMPTY_TOKEN: &str = "empty token provided";
/// Message for a CRL request naming a CA type other than intermediate.
pub const ERR_INVALID_CA_TYPE: &str = "invalid CA type";

fn require_entity(entity_id: &str) -> Result<()> {
    let trimmed = entity_id.trim();
    if trimmed.is_empty() || trimmed == r#""""# {
        return Err(SdkError::malformed(ERR_MISSING_ENTITY_ID));
    }
    Ok(())
}

fn require_serial(serial: &str) -> Result<()> {
    if serial.trim().is_empty() {
        return Err(SdkError::malformed(ERR_EMPTY_SERIAL));
    }
    Ok(())
}

fn require_token(token: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(SdkError::malformed(ERR_EMPTY_TOKEN));
    }
    Ok(())
}

/// Issue a certificate with an engine-generated key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCertRequest {
    /// Owning entity.
    #[serde(skip)]
    pub entity_id: String,
    /// Requested lifetime; empty for the default.
    #[serde(default)]
    pub ttl: String,
    /// IP subject alternative names.
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    /// Subject fields.
    #[serde(default)]
    pub options: SubjectOptions,
}

impl IssueCertRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the entity ID is missing.
    pub fn validate(&self) -> Result<()> {
        require_entity(&self.entity_id)
    }
}

/// Issue a certificate for a caller-held key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFromCsrRequest {
    /// Owning entity.
    #[serde(skip)]
    pub entity_id: String,
    /// Requested lifetime; empty for the default.
    #[serde(skip)]
    pub ttl: String,
    /// PEM or base64 DER PKCS#10 request.
    pub csr: String,
}

impl IssueFromCsrRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the entity ID or CSR is missing.
    pub fn validate(&self) -> Result<()> {
        require_entity(&self.entity_id)?;
        if self.csr.is_empty() {
            return Err(SdkError::malformed(ERR_MISSING_CSR));
        }
        Ok(())
    }
}

/// Any request addressing one certificate by serial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRequest {
    /// Hex serial number.
    pub serial: String,
}

impl SerialRequest {
    /// Creates a request for `serial`.
    #[must_use]
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }

    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty serial.
    pub fn validate(&self) -> Result<()> {
        require_serial(&self.serial)
    }
}

/// Revoke one certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeRequest {
    /// Hex serial number.
    pub serial: String,
    /// Recorded reason.
    #[serde(default)]
    pub reason: RevocationReason,
}

impl RevokeRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty serial.
    pub fn validate(&self) -> Result<()> {
        require_serial(&self.serial)
    }
}

/// Revoke every certificate of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Owning entity.
    pub entity_id: String,
}

impl DeleteRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the entity ID is missing.
    pub fn validate(&self) -> Result<()> {
        require_entity(&self.entity_id)
    }
}

/// Redeem a download token, optionally for one certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Download token.
    pub token: String,
    /// Certificate serial, for certificate downloads.
    #[serde(default)]
    pub serial: Option<String>,
}

impl DownloadRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty token or serial.
    pub fn validate(&self) -> Result<()> {
        require_token(&self.token)?;
        if let Some(serial) = &self.serial {
            require_serial(serial)?;
        }
        Ok(())
    }
}

/// Fetch the CRL of a CA type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlRequest {
    /// Requested CA type; only intermediate is served.
    pub kind: CaKind,
}

impl CrlRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless `kind` is intermediate.
    pub fn validate(&self) -> Result<()> {
        if self.kind != CaKind::Intermediate {
            return Err(SdkError::malformed(ERR_INVALID_CA_TYPE));
        }
        Ok(())
    }
}

/// Ask for OCSP status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcspStatusRequest {
    /// Hex serial number.
    pub serial: String,
    /// Issuer certificate in PEM; empty for the issuing CA.
    #[serde(default)]
    pub issuer_cert: String,
}

impl OcspStatusRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty serial.
    pub fn validate(&self) -> Result<()> {
        require_serial(&self.serial)
    }
}

/// List certificates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Window and filters.
    pub query: PageQuery,
}

impl ListRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an out-of-range limit.
    pub fn validate(&self) -> Result<()> {
        self.query.validate().map_err(SdkError::from)
    }
}
