//! OCSP responder (RFC 6960).
//!
//! Requests are matched to a CA by their `CertID` issuer hashes, looked up in
//! the store, and answered with a `BasicOCSPResponse` signed by that CA.
//! Protocol-level failures (malformed input, unknown issuer) are encoded as
//! OCSP response statuses rather than returned as errors.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use ring::digest;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use yasna::models::{GeneralizedTime, ObjectIdentifier};
use yasna::{ASN1Result, BERReader, DERWriter, Tag};

use crate::ca::{CaManager, CertificateAuthority};
use crate::error::{Error, Result};
use crate::keys::to_rcgen_time;
use crate::store::CertificateRepository;
use crate::types::{CertStatus, Certificate, RevocationReason, SerialNumber};

const OID_SHA1: &[u64] = &[1, 3, 14, 3, 2, 26];
const OID_SHA256: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 1];
const OID_OCSP_BASIC: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1, 1];
const OID_OCSP_NONCE: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1, 2];

/// Upper bound on `CertID`s answered in one response.
pub const MAX_REQUESTS: usize = 32;

/// Hash algorithm of a `CertID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-1, the algorithm nearly every client sends.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl HashAlgorithm {
    const fn oid(self) -> &'static [u64] {
        match self {
            Self::Sha1 => OID_SHA1,
            Self::Sha256 => OID_SHA256,
        }
    }

    fn from_oid(oid: &[u64]) -> Option<Self> {
        if oid == OID_SHA1 {
            Some(Self::Sha1)
        } else if oid == OID_SHA256 {
            Some(Self::Sha256)
        } else {
            None
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        let alg = match self {
            Self::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &digest::SHA256,
        };
        digest::digest(alg, data).as_ref().to_vec()
    }
}

/// Identifies one certificate by issuer hashes and serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertId {
    hash: HashAlgorithm,
    issuer_name_hash: Vec<u8>,
    issuer_key_hash: Vec<u8>,
    serial: SerialNumber,
}

impl CertId {
    /// Builds a SHA-1 `CertID` for `serial` under `issuer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the issuer certificate cannot be parsed.
    pub fn new(serial: SerialNumber, issuer: &Certificate) -> Result<Self> {
        let (issuer_name_hash, issuer_key_hash) = issuer_hashes(issuer.der(), HashAlgorithm::Sha1)?;
        Ok(Self {
            hash: HashAlgorithm::Sha1,
            issuer_name_hash,
            issuer_key_hash,
            serial,
        })
    }

    /// The certificate serial being asked about.
    #[must_use]
    pub const fn serial(&self) -> &SerialNumber {
        &self.serial
    }

    /// The hash algorithm of the issuer hashes.
    #[must_use]
    pub const fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    fn matches(&self, ca: &CertificateAuthority) -> Result<bool> {
        let (name, key) = issuer_hashes(ca.certificate().der(), self.hash)?;
        Ok(name == self.issuer_name_hash && key == self.issuer_key_hash)
    }

    fn write(&self, writer: DERWriter<'_>) {
        writer.write_sequence(|seq| {
            seq.next().write_sequence(|alg| {
                alg.next().write_oid(&ObjectIdentifier::from_slice(self.hash.oid()));
                alg.next().write_null();
            });
            seq.next().write_bytes(&self.issuer_name_hash);
            seq.next().write_bytes(&self.issuer_key_hash);
            seq.next().write_bigint_bytes(self.serial.as_bytes(), true);
        });
    }

    fn read(reader: BERReader<'_, '_>) -> ASN1Result<Option<Self>> {
        reader.read_sequence(|seq| {
            let oid = seq.next().read_sequence(|alg| {
                let oid = alg.next().read_oid()?;
                alg.read_optional(|r| r.read_null())?;
                Ok(oid)
            })?;
            let issuer_name_hash = seq.next().read_bytes()?;
            let issuer_key_hash = seq.next().read_bytes()?;
            let (serial, non_negative) = seq.next().read_bigint_bytes()?;
            let Some(hash) = HashAlgorithm::from_oid(&oid.components()[..]) else {
                return Ok(None);
            };
            if !non_negative {
                return Ok(None);
            }
            Ok(Some(Self {
                hash,
                issuer_name_hash,
                issuer_key_hash,
                serial: SerialNumber::from_bytes(&serial),
            }))
        })
    }
}

/// A decoded `OCSPRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspRequest {
    cert_ids: Vec<CertId>,
    nonce: Option<Vec<u8>>,
}

impl OcspRequest {
    /// Creates a request for the given `CertID`s.
    #[must_use]
    pub const fn new(cert_ids: Vec<CertId>) -> Self {
        Self {
            cert_ids,
            nonce: None,
        }
    }

    /// Attaches a nonce extension value to echo back.
    #[must_use]
    pub fn with_nonce(mut self, nonce: Vec<u8>) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// The requested `CertID`s.
    #[must_use]
    pub fn cert_ids(&self) -> &[CertId] {
        &self.cert_ids
    }

    /// Parses a DER `OCSPRequest`.
    ///
    /// Request signatures are accepted but not checked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for invalid DER, unsupported hash
    /// algorithms, or a request list that is empty or too long.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let parsed = yasna::parse_der(der, |reader| {
            reader.read_sequence(|outer| {
                let request = outer.next().read_sequence(|tbs| {
                    tbs.read_optional(|r| r.read_tagged(Tag::context(0), |r| r.read_u8()))?;
                    tbs.read_optional(|r| r.read_tagged(Tag::context(1), |r| r.read_der()))?;
                    let mut cert_ids = Vec::new();
                    tbs.next().read_sequence_of(|r| {
                        let cert_id = r.read_sequence(|single| {
                            let cert_id = CertId::read(single.next())?;
                            single.read_optional(|r| r.read_tagged(Tag::context(0), |r| r.read_der()))?;
                            Ok(cert_id)
                        })?;
                        cert_ids.push(cert_id);
                        Ok(())
                    })?;
                    let nonce = tbs
                        .read_optional(|r| r.read_tagged(Tag::context(2), read_nonce))?
                        .flatten();
                    Ok((cert_ids, nonce))
                })?;
                outer.read_optional(|r| r.read_tagged(Tag::context(0), |r| r.read_der()))?;
                Ok(request)
            })
        })
        .map_err(|e| Error::parse(format!("malformed OCSP request: {e}")))?;

        let (cert_ids, nonce) = parsed;
        if cert_ids.is_empty() {
            return Err(Error::parse("OCSP request lists no certificates"));
        }
        if cert_ids.len() > MAX_REQUESTS {
            return Err(Error::parse(format!(
                "OCSP request lists {} certificates, limit is {MAX_REQUESTS}",
                cert_ids.len()
            )));
        }
        let cert_ids = cert_ids
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::parse("unsupported CertID hash algorithm or serial"))?;
        Ok(Self { cert_ids, nonce })
    }

    /// Encodes the request as an unsigned DER `OCSPRequest`.
    #[must_use]
    pub fn to_der(&self) -> Vec<u8> {
        yasna::construct_der(|writer| {
            writer.write_sequence(|outer| {
                outer.next().write_sequence(|tbs| {
                    tbs.next().write_sequence(|list| {
                        for cert_id in &self.cert_ids {
                            list.next().write_sequence(|single| cert_id.write(single.next()));
                        }
                    });
                    if let Some(nonce) = &self.nonce {
                        tbs.next()
                            .write_tagged(Tag::context(2), |w| write_nonce_extension(w, nonce));
                    }
                });
            });
        })
    }
}

fn read_nonce(reader: BERReader<'_, '_>) -> ASN1Result<Option<Vec<u8>>> {
    let mut nonce = None;
    reader.read_sequence_of(|r| {
        r.read_sequence(|ext| {
            let oid = ext.next().read_oid()?;
            ext.read_optional(|r| r.read_bool())?;
            let value = ext.next().read_bytes()?;
            if oid.components()[..] == *OID_OCSP_NONCE {
                nonce = Some(value);
            }
            Ok(())
        })
    })?;
    Ok(nonce)
}

fn write_nonce_extension(writer: DERWriter<'_>, nonce: &[u8]) {
    writer.write_sequence(|exts| {
        exts.next().write_sequence(|ext| {
            ext.next().write_oid(&ObjectIdentifier::from_slice(OID_OCSP_NONCE));
            ext.next().write_bytes(nonce);
        });
    });
}

/// `OCSPResponseStatus` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcspResponseStatus {
    /// Response has valid confirmations.
    Successful,
    /// Illegal confirmation request.
    MalformedRequest,
    /// Internal error in issuer.
    InternalError,
    /// Try again later.
    TryLater,
    /// Must sign the request.
    SigRequired,
    /// Request unauthorized.
    Unauthorized,
}

impl OcspResponseStatus {
    /// The ENUMERATED value on the wire.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Successful => 0,
            Self::MalformedRequest => 1,
            Self::InternalError => 2,
            Self::TryLater => 3,
            Self::SigRequired => 5,
            Self::Unauthorized => 6,
        }
    }
}

impl std::fmt::Display for OcspResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Successful => "successful",
            Self::MalformedRequest => "malformed_request",
            Self::InternalError => "internal_error",
            Self::TryLater => "try_later",
            Self::SigRequired => "sig_required",
            Self::Unauthorized => "unauthorized",
        };
        f.write_str(name)
    }
}

/// Status of a single certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OcspCertStatus {
    /// Issued by this CA, unrevoked and inside its validity window.
    Good,
    /// Revoked.
    Revoked {
        /// When the certificate was revoked.
        revoked_at: DateTime<Utc>,
        /// Why it was revoked.
        reason: RevocationReason,
    },
    /// Not issued by this CA, or outside its validity window.
    Unknown,
}

impl OcspCertStatus {
    /// Short status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Revoked { .. } => "revoked",
            Self::Unknown => "unknown",
        }
    }
}

/// One answered `CertID`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleResponse {
    /// Serial the answer is about.
    pub serial: SerialNumber,
    /// Resolved status.
    pub status: OcspCertStatus,
    /// Time the status was determined.
    pub this_update: DateTime<Utc>,
    /// Time a fresher answer will be available.
    pub next_update: DateTime<Utc>,
}

/// A complete OCSP answer: structured view plus its DER encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcspResponse {
    /// Protocol status.
    pub response_status: OcspResponseStatus,
    /// Per-certificate answers; empty unless the status is `successful`.
    pub responses: Vec<SingleResponse>,
    /// Signing time for successful responses.
    pub produced_at: Option<DateTime<Utc>>,
    /// DER-encoded `OCSPResponse`.
    #[serde(skip)]
    pub der: Vec<u8>,
}

impl OcspResponse {
    fn unsuccessful(status: OcspResponseStatus) -> Self {
        let der = yasna::construct_der(|writer| {
            writer.write_sequence(|seq| seq.next().write_enum(status.code()));
        });
        Self {
            response_status: status,
            responses: Vec::new(),
            produced_at: None,
            der,
        }
    }

    /// Status of the first answered certificate, if any.
    #[must_use]
    pub fn status(&self) -> Option<OcspCertStatus> {
        self.responses.first().map(|r| r.status)
    }
}

/// Answers OCSP queries using the store and the issuing CA's key.
pub struct OcspResponder {
    cas: Arc<CaManager>,
    store: Arc<dyn CertificateRepository>,
    validity: Duration,
}

impl OcspResponder {
    /// Creates a responder whose answers advertise `validity` as the
    /// interval until `nextUpdate`.
    #[must_use]
    pub fn new(cas: Arc<CaManager>, store: Arc<dyn CertificateRepository>, validity: Duration) -> Self {
        Self {
            cas,
            store,
            validity,
        }
    }

    /// Reports the status of `serial` as issued by `issuer_cert` (PEM or DER).
    ///
    /// An unparseable issuer certificate yields `malformedRequest`; one that
    /// is not a CA of this service yields `unauthorized`.
    ///
    /// # Errors
    ///
    /// Returns signing or persistence errors.
    pub fn query(&self, serial: &SerialNumber, issuer_cert: &[u8]) -> Result<OcspResponse> {
        let Ok(issuer) = Certificate::from_pem_or_der(issuer_cert) else {
            debug!(serial = %serial, "OCSP query with unparseable issuer certificate");
            return Ok(OcspResponse::unsuccessful(OcspResponseStatus::MalformedRequest));
        };
        let cert_id = CertId::new(serial.clone(), &issuer)?;
        self.respond(&OcspRequest::new(vec![cert_id]))
    }

    /// Answers a DER `OCSPRequest` with a DER `OCSPResponse`.
    ///
    /// # Errors
    ///
    /// Returns signing or persistence errors; malformed requests produce a
    /// `malformedRequest` response instead.
    pub fn respond_der(&self, request_der: &[u8]) -> Result<Vec<u8>> {
        match OcspRequest::from_der(request_der) {
            Ok(request) => self.respond(&request).map(|r| r.der),
            Err(e) => {
                debug!(error = %e, "rejecting malformed OCSP request");
                Ok(OcspResponse::unsuccessful(OcspResponseStatus::MalformedRequest).der)
            }
        }
    }

    /// Answers a decoded request.
    ///
    /// Every `CertID` must name the same CA; otherwise the response is
    /// `unauthorized`.
    ///
    /// # Errors
    ///
    /// Returns signing or persistence errors.
    pub fn respond(&self, request: &OcspRequest) -> Result<OcspResponse> {
        let Some(first) = request.cert_ids.first() else {
            return Ok(OcspResponse::unsuccessful(OcspResponseStatus::MalformedRequest));
        };
        let Some(ca) = self.find_issuer(first)? else {
            debug!(serial = %first.serial, "OCSP issuer is not one of our CAs");
            return Ok(OcspResponse::unsuccessful(OcspResponseStatus::Unauthorized));
        };
        for cert_id in &request.cert_ids[1..] {
            if !cert_id.matches(&ca)? {
                debug!(serial = %cert_id.serial, "OCSP request mixes issuers");
                return Ok(OcspResponse::unsuccessful(OcspResponseStatus::Unauthorized));
            }
        }

        let now = Utc::now().trunc_subsecs(0);
        let next_update = now + self.validity;
        let responses = request
            .cert_ids
            .iter()
            .map(|cert_id| {
                Ok(SingleResponse {
                    serial: cert_id.serial.clone(),
                    status: self.resolve(&ca, &cert_id.serial, now)?,
                    this_update: now,
                    next_update,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let der = encode_basic_response(&ca, &request.cert_ids, &responses, request.nonce.as_deref(), now)?;
        for response in &responses {
            info!(
                ca_id = %ca.id(),
                serial = %response.serial,
                status = response.status.as_str(),
                "OCSP status served"
            );
        }
        Ok(OcspResponse {
            response_status: OcspResponseStatus::Successful,
            responses,
            produced_at: Some(now),
            der,
        })
    }

    fn find_issuer(&self, cert_id: &CertId) -> Result<Option<Arc<CertificateAuthority>>> {
        for ca in self.cas.authorities() {
            if cert_id.matches(&ca)? {
                return Ok(Some(ca));
            }
        }
        Ok(None)
    }

    fn resolve(&self, ca: &CertificateAuthority, serial: &SerialNumber, now: DateTime<Utc>) -> Result<OcspCertStatus> {
        let record = match self.store.get(serial) {
            Ok(record) => record,
            Err(Error::NotFound { .. }) => return Ok(OcspCertStatus::Unknown),
            Err(e) => return Err(e),
        };
        if record.ca_id != ca.id() {
            return Ok(OcspCertStatus::Unknown);
        }
        let outside_window = record.is_expired_at(now) || record.not_before > now;
        Ok(match (record.status, record.revocation) {
            (CertStatus::Revoked, Some(revocation)) => OcspCertStatus::Revoked {
                revoked_at: revocation.revoked_at,
                reason: revocation.reason,
            },
            (CertStatus::Revoked, None) => OcspCertStatus::Revoked {
                revoked_at: record.created_at,
                reason: RevocationReason::Unspecified,
            },
            (CertStatus::Active, _) if outside_window => OcspCertStatus::Unknown,
            (CertStatus::Active, _) => OcspCertStatus::Good,
            (CertStatus::Expired, _) => OcspCertStatus::Unknown,
        })
    }
}

impl std::fmt::Debug for OcspResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcspResponder")
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

/// SHA hashes of the subject name and public key bits of a certificate.
fn issuer_hashes(cert_der: &[u8], hash: HashAlgorithm) -> Result<(Vec<u8>, Vec<u8>)> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::parse(format!("failed to parse issuer certificate: {e}")))?;
    Ok((
        hash.digest(cert.subject().as_raw()),
        hash.digest(&cert.public_key().subject_public_key.data),
    ))
}

fn generalized_time(dt: DateTime<Utc>) -> Result<GeneralizedTime> {
    Ok(GeneralizedTime::from_datetime(to_rcgen_time(dt)?))
}

fn encode_basic_response(
    ca: &CertificateAuthority,
    cert_ids: &[CertId],
    responses: &[SingleResponse],
    nonce: Option<&[u8]>,
    produced_at: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let (_, responder_key_hash) = issuer_hashes(ca.certificate().der(), HashAlgorithm::Sha1)?;
    let produced = generalized_time(produced_at)?;
    let mut times = Vec::with_capacity(responses.len());
    for response in responses {
        let revoked_at = match response.status {
            OcspCertStatus::Revoked { revoked_at, .. } => Some(generalized_time(revoked_at)?),
            _ => None,
        };
        times.push((
            generalized_time(response.this_update)?,
            generalized_time(response.next_update)?,
            revoked_at,
        ));
    }

    let tbs = yasna::construct_der(|writer| {
        writer.write_sequence(|data| {
            data.next()
                .write_tagged(Tag::context(2), |w| w.write_bytes(&responder_key_hash));
            data.next().write_generalized_time(&produced);
            data.next().write_sequence(|list| {
                for ((cert_id, response), (this_update, next_update, revoked_at)) in
                    cert_ids.iter().zip(responses).zip(&times)
                {
                    list.next().write_sequence(|single| {
                        cert_id.write(single.next());
                        write_cert_status(single.next(), &response.status, revoked_at.as_ref());
                        single.next().write_generalized_time(this_update);
                        single
                            .next()
                            .write_tagged(Tag::context(0), |w| w.write_generalized_time(next_update));
                    });
                }
            });
            if let Some(nonce) = nonce {
                data.next()
                    .write_tagged(Tag::context(1), |w| write_nonce_extension(w, nonce));
            }
        });
    });

    let signature = ca.sign_raw(&tbs)?;
    let signature_oid = ObjectIdentifier::from_slice(ca.algorithm().signature_oid());
    let basic = yasna::construct_der(|writer| {
        writer.write_sequence(|seq| {
            seq.next().write_der(&tbs);
            seq.next().write_sequence(|alg| alg.next().write_oid(&signature_oid));
            seq.next().write_bitvec_bytes(&signature, signature.len() * 8);
            seq.next().write_tagged(Tag::context(0), |w| {
                w.write_sequence(|certs| certs.next().write_der(ca.certificate().der()));
            });
        });
    });

    Ok(yasna::construct_der(|writer| {
        writer.write_sequence(|seq| {
            seq.next().write_enum(OcspResponseStatus::Successful.code());
            seq.next().write_tagged(Tag::context(0), |w| {
                w.write_sequence(|bytes| {
                    bytes.next().write_oid(&ObjectIdentifier::from_slice(OID_OCSP_BASIC));
                    bytes.next().write_bytes(&basic);
                });
            });
        });
    }))
}

fn write_cert_status(writer: DERWriter<'_>, status: &OcspCertStatus, revoked_at: Option<&GeneralizedTime>) {
    match (status, revoked_at) {
        (OcspCertStatus::Revoked { reason, .. }, Some(time)) => {
            writer.write_tagged_implicit(Tag::context(1), |w| {
                w.write_sequence(|info| {
                    info.next().write_generalized_time(time);
                    if *reason != RevocationReason::Unspecified {
                        info.next()
                            .write_tagged(Tag::context(0), |w| w.write_enum(i64::from(reason.code())));
                    }
                });
            });
        }
        (OcspCertStatus::Good, _) => writer.write_tagged_implicit(Tag::context(0), |w| w.write_null()),
        _ => writer.write_tagged_implicit(Tag::context(2), |w| w.write_null()),
    }
}
