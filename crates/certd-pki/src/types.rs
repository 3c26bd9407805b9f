//! Core PKI types for certificate lifecycle management.

use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Largest page size accepted by certificate listings.
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Page size used when a listing does not specify one.
pub const DEFAULT_PAGE_LIMIT: u64 = 10;

/// Maximum length of an entity identifier in bytes.
pub const MAX_ENTITY_ID_LEN: usize = 256;

/// Number of random octets drawn for a new serial number.
const SERIAL_LEN: usize = 20;

/// Certificate serial number.
///
/// Stored in canonical form: big-endian magnitude without leading zero
/// octets. Serials drawn by [`SerialNumber::random`] are positive and fit
/// the 20-octet bound of RFC 5280.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SerialNumber(Vec<u8>);

impl SerialNumber {
    /// Draws a new 159-bit serial number from the OS random source.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; SERIAL_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        // Keep the encoded INTEGER positive.
        bytes[0] &= 0x7f;
        Self::from_bytes(&bytes)
    }

    /// Creates a serial number from big-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        let trimmed = &bytes[first..];
        if trimmed.is_empty() {
            Self(vec![0])
        } else {
            Self(trimmed.to_vec())
        }
    }

    /// Returns the canonical big-endian bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the lower-case hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl FromStr for SerialNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidSerial {
            value: s.to_string(),
        };
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let mut cleaned: String = digits.chars().filter(|c| *c != ':').collect();
        if cleaned.is_empty() {
            return Err(invalid());
        }
        if cleaned.len() % 2 == 1 {
            cleaned.insert(0, '0');
        }
        let bytes = hex::decode(&cleaned).map_err(|_| invalid())?;
        Ok(Self::from_bytes(&bytes))
    }
}

impl TryFrom<String> for SerialNumber {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SerialNumber> for String {
    fn from(serial: SerialNumber) -> Self {
        serial.to_hex()
    }
}

impl Ord for SerialNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SerialNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber({})", self.to_hex())
    }
}

/// Opaque identifier of the device, service or workload owning a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity ID, rejecting empty or oversized values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEntityId`] if the value is empty, a quoted
    /// empty string, longer than [`MAX_ENTITY_ID_LEN`], or contains control
    /// characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() || trimmed == "\"\"" {
            return Err(Error::InvalidEntityId {
                reason: "missing entity ID".into(),
            });
        }
        if trimmed.len() > MAX_ENTITY_ID_LEN {
            return Err(Error::InvalidEntityId {
                reason: format!("longer than {MAX_ENTITY_ID_LEN} bytes"),
            });
        }
        if trimmed.chars().any(char::is_control) {
            return Err(Error::InvalidEntityId {
                reason: "contains control characters".into(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a certificate authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaId(Uuid);

impl CaId {
    /// Creates a new random CA ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a CA ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Derives a stable CA ID from the CA certificate's SHA-256 fingerprint.
    #[must_use]
    pub fn from_certificate(der: &[u8]) -> Self {
        let digest = ring::digest::digest(&ring::digest::SHA256, der);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_ref()[..16]);
        Self::from_uuid(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CaId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for CaId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::CaNotFound { ca_id: s.to_string() })
    }
}

impl fmt::Display for CaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a CA in the trust hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaKind {
    /// Self-signed trust anchor.
    Root,
    /// CA whose certificate chains to the root.
    Intermediate,
}

impl fmt::Display for CaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Intermediate => f.write_str("intermediate"),
        }
    }
}

impl FromStr for CaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "root" | "root_ca" | "rootca" => Ok(Self::Root),
            "intermediate" | "intermediate_ca" | "intermediateca" => Ok(Self::Intermediate),
            other => Err(Error::InvalidCaType(other.to_string())),
        }
    }
}

/// Lifecycle state of an issued certificate.
///
/// The only legal transitions are `Active -> Revoked` and
/// `Active -> Expired`; `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    /// Issued and usable.
    Active,
    /// Explicitly revoked.
    Revoked,
    /// Past its `not_after`.
    Expired,
}

impl CertStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Revoked) | (Self::Active, Self::Expired)
        )
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Revoked => f.write_str("revoked"),
            Self::Expired => f.write_str("expired"),
        }
    }
}

impl FromStr for CertStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "valid" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            other => Err(Error::InvalidQueryParams {
                reason: format!("unknown status '{other}'"),
            }),
        }
    }
}

/// CRL reason codes from RFC 5280 section 5.3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// No reason given.
    #[default]
    Unspecified,
    /// The subject's private key is compromised.
    KeyCompromise,
    /// The issuing CA's key is compromised.
    CaCompromise,
    /// Subject details changed.
    AffiliationChanged,
    /// Replaced by a newer certificate.
    Superseded,
    /// The subject no longer operates.
    CessationOfOperation,
    /// Temporarily on hold.
    CertificateHold,
    /// Privileges granted by the certificate were withdrawn.
    PrivilegeWithdrawn,
    /// Attribute authority compromised.
    AaCompromise,
}

impl RevocationReason {
    /// Returns the `CRLReason` enumeration value.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }

    pub(crate) const fn to_rcgen(self) -> rcgen::RevocationReason {
        match self {
            Self::Unspecified => rcgen::RevocationReason::Unspecified,
            Self::KeyCompromise => rcgen::RevocationReason::KeyCompromise,
            Self::CaCompromise => rcgen::RevocationReason::CaCompromise,
            Self::AffiliationChanged => rcgen::RevocationReason::AffiliationChanged,
            Self::Superseded => rcgen::RevocationReason::Superseded,
            Self::CessationOfOperation => rcgen::RevocationReason::CessationOfOperation,
            Self::CertificateHold => rcgen::RevocationReason::CertificateHold,
            Self::PrivilegeWithdrawn => rcgen::RevocationReason::PrivilegeWithdrawn,
            Self::AaCompromise => rcgen::RevocationReason::AaCompromise,
        }
    }
}

impl FromStr for RevocationReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "" | "0" | "unspecified" => Ok(Self::Unspecified),
            "1" | "keycompromise" => Ok(Self::KeyCompromise),
            "2" | "cacompromise" => Ok(Self::CaCompromise),
            "3" | "affiliationchanged" => Ok(Self::AffiliationChanged),
            "4" | "superseded" => Ok(Self::Superseded),
            "5" | "cessationofoperation" => Ok(Self::CessationOfOperation),
            "6" | "certificatehold" => Ok(Self::CertificateHold),
            "9" | "privilegewithdrawn" => Ok(Self::PrivilegeWithdrawn),
            "10" | "aacompromise" => Ok(Self::AaCompromise),
            _ => Err(Error::InvalidQueryParams {
                reason: format!("unknown revocation reason '{s}'"),
            }),
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "key_compromise",
            Self::CaCompromise => "ca_compromise",
            Self::AffiliationChanged => "affiliation_changed",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessation_of_operation",
            Self::CertificateHold => "certificate_hold",
            Self::PrivilegeWithdrawn => "privilege_withdrawn",
            Self::AaCompromise => "aa_compromise",
        };
        f.write_str(name)
    }
}

/// Subject fields requested for a certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectOptions {
    /// Common name (CN).
    pub common_name: String,
    /// Organization (O).
    pub organization: Vec<String>,
    /// Organizational unit (OU).
    pub organizational_unit: Vec<String>,
    /// Country (C).
    pub country: Vec<String>,
    /// State or province (ST).
    pub province: Vec<String>,
    /// Locality (L).
    pub locality: Vec<String>,
    /// Street address.
    pub street_address: Vec<String>,
    /// Postal code.
    pub postal_code: Vec<String>,
    /// DNS subject alternative names.
    pub dns_names: Vec<String>,
}

/// Subject Alternative Name types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectAltName {
    /// DNS name.
    Dns(String),
    /// IP address.
    Ip(IpAddr),
}

/// A DER-encoded X.509 certificate with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// DER-encoded certificate bytes.
    der: Vec<u8>,
    /// Certificate serial number.
    serial: SerialNumber,
    /// Certificate validity start time.
    not_before: DateTime<Utc>,
    /// Certificate validity end time.
    not_after: DateTime<Utc>,
    /// Subject common name.
    subject: String,
    /// Issuer common name.
    issuer: String,
    /// Subject alternative names.
    san: Vec<SubjectAltName>,
}

impl Certificate {
    /// Creates a new certificate from raw DER bytes and metadata.
    #[must_use]
    pub const fn new(
        der: Vec<u8>,
        serial: SerialNumber,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        subject: String,
        issuer: String,
        san: Vec<SubjectAltName>,
    ) -> Self {
        Self {
            der,
            serial,
            not_before,
            not_after,
            subject,
            issuer,
            san,
        }
    }

    /// Parses a certificate from DER-encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        use x509_parser::prelude::*;

        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::parse(format!("failed to parse certificate: {e}")))?;

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| Error::parse("invalid not_before timestamp"))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::parse("invalid not_after timestamp"))?;

        let subject = extract_common_name(cert.subject())?;
        let issuer = extract_common_name(cert.issuer())?;
        let san = extract_san(&cert);

        Ok(Self {
            der: der.to_vec(),
            serial: SerialNumber::from_bytes(cert.raw_serial()),
            not_before,
            not_after,
            subject,
            issuer,
            san,
        })
    }

    /// Parses a PEM-encoded certificate, falling back to raw DER.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is neither a PEM certificate nor DER.
    pub fn from_pem_or_der(input: &[u8]) -> Result<Self> {
        let trimmed = input.trim_ascii_start();
        if trimmed.starts_with(b"-----BEGIN") {
            let der = decode_pem(trimmed, "CERTIFICATE")?;
            Self::from_der(&der)
        } else {
            Self::from_der(input)
        }
    }

    /// Returns the DER-encoded certificate bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn pem(&self) -> String {
        encode_pem("CERTIFICATE", &self.der)
    }

    /// Returns the serial number.
    #[must_use]
    pub const fn serial(&self) -> &SerialNumber {
        &self.serial
    }

    /// Returns the certificate validity start time.
    #[must_use]
    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the certificate validity end time.
    #[must_use]
    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns the subject common name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the issuer common name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the subject alternative names.
    #[must_use]
    pub fn san(&self) -> &[SubjectAltName] {
        &self.san
    }
}

/// Extracts the common name from an X.509 name.
fn extract_common_name(name: &x509_parser::x509::X509Name) -> Result<String> {
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if attr.attr_type() == &x509_parser::oid_registry::OID_X509_COMMON_NAME {
                return attr
                    .as_str()
                    .map(String::from)
                    .map_err(|e| Error::parse(format!("failed to parse CN: {e}")));
            }
        }
    }
    Err(Error::parse("common name not found"))
}

/// Extracts SANs from a certificate.
fn extract_san(cert: &x509_parser::certificate::X509Certificate) -> Vec<SubjectAltName> {
    let mut sans = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        sans.extend(convert_general_names(&san_ext.value.general_names));
    }

    sans
}

/// Converts DNS and IP general names; other name forms are ignored.
pub(crate) fn convert_general_names(
    names: &[x509_parser::extensions::GeneralName<'_>],
) -> Vec<SubjectAltName> {
    names
        .iter()
        .filter_map(|name| match name {
            x509_parser::extensions::GeneralName::DNSName(dns) => {
                Some(SubjectAltName::Dns((*dns).to_string()))
            }
            x509_parser::extensions::GeneralName::IPAddress(ip_bytes) => {
                parse_ip_bytes(ip_bytes).map(SubjectAltName::Ip)
            }
            _ => None,
        })
        .collect()
}

/// Parses IP address bytes into an `IpAddr`.
fn parse_ip_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(std::net::Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(std::net::Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Wraps DER bytes in a PEM envelope with the given label.
#[must_use]
pub fn encode_pem(label: &str, der: &[u8]) -> String {
    use base64::Engine;
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        b64.as_bytes()
            .chunks(64)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Extracts the DER payload of the first PEM block, checking its label.
///
/// # Errors
///
/// Returns an error if the input is not PEM or the label differs.
pub fn decode_pem(input: &[u8], label: &str) -> Result<Vec<u8>> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(input)
        .map_err(|e| Error::parse(format!("failed to decode PEM: {e}")))?;
    if pem.label != label {
        return Err(Error::parse(format!(
            "expected PEM label '{label}', found '{}'",
            pem.label
        )));
    }
    Ok(pem.contents)
}

/// A private key with secure memory handling.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    /// DER-encoded PKCS#8 private key bytes.
    der: Vec<u8>,
}

impl PrivateKey {
    /// Creates a new private key from DER-encoded bytes.
    #[must_use]
    pub const fn new(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// Parses a PEM `PRIVATE KEY` block.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a PKCS#8 PEM block.
    pub fn from_pem(pem: &str) -> Result<Self> {
        decode_pem(pem.as_bytes(), "PRIVATE KEY").map(Self::new)
    }

    /// Returns the DER-encoded private key bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded private key.
    #[must_use]
    pub fn pem(&self) -> String {
        encode_pem("PRIVATE KEY", &self.der)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("der", &"[REDACTED]")
            .finish()
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            der: self.der.clone(),
        }
    }
}

/// How the subject key pair of a certificate came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    /// Generated by the engine and handed to the caller once.
    Generated,
    /// Supplied by the caller in a CSR.
    Csr,
}

/// Revocation metadata of a revoked certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// When the revocation was recorded.
    pub revoked_at: DateTime<Utc>,
    /// Why the certificate was revoked.
    pub reason: RevocationReason,
}

/// Durable record of an issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Serial number, unique per CA.
    pub serial: SerialNumber,
    /// Owning entity.
    pub entity_id: EntityId,
    /// Issuing CA.
    pub ca_id: CaId,
    /// Subject fields the certificate was issued with.
    pub subject: SubjectOptions,
    /// IP subject alternative names.
    pub ip_addresses: Vec<IpAddr>,
    /// DER-encoded certificate.
    pub der: Vec<u8>,
    /// Validity start.
    pub not_before: DateTime<Utc>,
    /// Validity end.
    pub not_after: DateTime<Utc>,
    /// Stored status; expiry is derived, see [`CertificateRecord::effective_status`].
    pub status: CertStatus,
    /// Present once the certificate is revoked.
    pub revocation: Option<Revocation>,
    /// Origin of the subject key pair.
    pub key_source: KeySource,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl CertificateRecord {
    /// Whether `now` is past the certificate's `not_after`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }

    /// Status as observed at `now`: an active record past `not_after` reads as expired.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> CertStatus {
        match self.status {
            CertStatus::Active if self.is_expired_at(now) => CertStatus::Expired,
            status => status,
        }
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn pem(&self) -> String {
        encode_pem("CERTIFICATE", &self.der)
    }

    /// Parses the stored DER.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored bytes are not a certificate.
    pub fn certificate(&self) -> Result<Certificate> {
        Certificate::from_der(&self.der)
    }
}

/// Result of a successful issuance.
///
/// The private key is present only for engine-generated key pairs and is
/// never stored; it leaves the engine through [`IssuedCertificate::into_bundle`].
#[derive(Debug)]
pub struct IssuedCertificate {
    /// The persisted record.
    pub record: CertificateRecord,
    /// Subject private key, if generated by the engine.
    pub private_key: Option<PrivateKey>,
    /// PEM chain of the issuing CA up to the root.
    pub ca_chain_pem: String,
}

impl IssuedCertificate {
    /// Consumes the issuance result into a transport-ready bundle.
    #[must_use]
    pub fn into_bundle(self) -> CertificateBundle {
        CertificateBundle {
            serial: self.record.serial.to_hex(),
            entity_id: self.record.entity_id.to_string(),
            certificate_pem: self.record.pem(),
            private_key_pem: self.private_key.as_ref().map(PrivateKey::pem),
            ca_chain_pem: self.ca_chain_pem.clone(),
            not_before: self.record.not_before,
            not_after: self.record.not_after,
        }
    }
}

/// PEM material handed out by issuance and download operations.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateBundle {
    /// Hex serial number.
    pub serial: String,
    /// Owning entity.
    pub entity_id: String,
    /// Leaf certificate.
    pub certificate_pem: String,
    /// Subject private key; only present in the issuance response.
    pub private_key_pem: Option<String>,
    /// Issuing CA chain.
    pub ca_chain_pem: String,
    /// Validity start.
    pub not_before: DateTime<Utc>,
    /// Validity end.
    pub not_after: DateTime<Utc>,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("serial", &self.serial)
            .field("entity_id", &self.entity_id)
            .field(
                "private_key_pem",
                &self.private_key_pem.as_ref().map(|_| "[REDACTED]"),
            )
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Pagination and filter parameters for certificate listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    /// Number of records to skip.
    pub offset: u64,
    /// Maximum number of records to return.
    pub limit: u64,
    /// Restrict to one entity.
    pub entity_id: Option<EntityId>,
    /// Restrict to one effective status.
    pub status: Option<CertStatus>,
}

impl PageQuery {
    /// Creates a query for the given window.
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit,
            entity_id: None,
            status: None,
        }
    }

    /// Restricts the listing to one entity.
    #[must_use]
    pub fn entity(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Restricts the listing to one effective status.
    #[must_use]
    pub const fn status(mut self, status: CertStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Validates the window bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQueryParams`] if `limit` is zero or above
    /// [`MAX_PAGE_LIMIT`].
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(Error::InvalidQueryParams {
                reason: format!("limit must be between 1 and {MAX_PAGE_LIMIT}"),
            });
        }
        Ok(())
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_LIMIT)
    }
}

/// One page of a certificate listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificatePage {
    /// Number of records matching the filter.
    pub total: u64,
    /// Offset the page starts at.
    pub offset: u64,
    /// Page size requested.
    pub limit: u64,
    /// Records in stable insertion order.
    pub certificates: Vec<CertificateRecord>,
}

/// One revoked serial in a CRL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlEntry {
    /// Revoked serial number.
    pub serial: SerialNumber,
    /// When it was revoked.
    pub revoked_at: DateTime<Utc>,
    /// Why it was revoked.
    pub reason: RevocationReason,
}

/// Immutable, signed CRL generation for one CA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlSnapshot {
    /// Issuing CA.
    pub ca_id: CaId,
    /// `cRLNumber`, strictly increasing per CA.
    pub number: u64,
    /// When this CRL was produced.
    pub this_update: DateTime<Utc>,
    /// When the next CRL is due.
    pub next_update: DateTime<Utc>,
    /// Revoked, unexpired serials in ascending order.
    pub entries: Vec<CrlEntry>,
    /// Signed DER encoding.
    pub der: Vec<u8>,
}

impl CrlSnapshot {
    /// Returns the PEM-encoded CRL.
    #[must_use]
    pub fn pem(&self) -> String {
        encode_pem("X509 CRL", &self.der)
    }

    /// Whether the CRL lists the given serial.
    #[must_use]
    pub fn contains(&self, serial: &SerialNumber) -> bool {
        self.entries
            .binary_search_by(|entry| entry.serial.cmp(serial))
            .is_ok()
    }
}
