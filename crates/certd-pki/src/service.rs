//! Transport-facing facade over the lifecycle components.
//!
//! [`CertsService`] takes string-typed input the way a handler receives it,
//! converts it to domain types and delegates to the issuance engine, the
//! revoker, the CRL generator, the OCSP responder and the token manager.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ca::{CaIdentity, CaManager, CertificateAuthority, IntermediateRequest};
use crate::config::PkiConfig;
use crate::crl::CrlGenerator;
use crate::error::{Error, Result};
use crate::issuance::IssuanceEngine;
use crate::ocsp::{OcspResponder, OcspResponse};
use crate::revocation::{RevocationOutcome, Revoker};
use crate::store::{CertificateRepository, MemoryStore};
use crate::token::{DownloadToken, DownloadTokenManager, TokenSubject};
use crate::types::{
    CaId, CaKind, CertStatus, CertificateBundle, CertificatePage, CertificateRecord, CrlSnapshot,
    EntityId, IssuedCertificate, KeySource, PageQuery, Revocation, RevocationReason, SerialNumber, SubjectOptions,
};

/// Read-only view of an issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateView {
    /// Serial number.
    pub serial: SerialNumber,
    /// Owning entity.
    pub entity_id: EntityId,
    /// Issuing CA.
    pub ca_id: CaId,
    /// Subject common name.
    pub common_name: String,
    /// IP subject alternative names.
    pub ip_addresses: Vec<IpAddr>,
    /// Status at the time of the view; expiry is applied.
    pub status: CertStatus,
    /// Validity start.
    pub not_before: DateTime<Utc>,
    /// Validity end.
    pub not_after: DateTime<Utc>,
    /// Revocation metadata, if revoked.
    pub revocation: Option<Revocation>,
    /// Origin of the key pair.
    pub key_source: KeySource,
    /// PEM certificate.
    pub certificate_pem: String,
}

impl CertificateView {
    /// Builds a view of `record` as observed at `now`.
    #[must_use]
    pub fn from_record(record: &CertificateRecord, now: DateTime<Utc>) -> Self {
        Self {
            serial: record.serial.clone(),
            entity_id: record.entity_id.clone(),
            ca_id: record.ca_id,
            common_name: record.subject.common_name.clone(),
            ip_addresses: record.ip_addresses.clone(),
            status: record.effective_status(now),
            not_before: record.not_before,
            not_after: record.not_after,
            revocation: record.revocation,
            key_source: record.key_source,
            certificate_pem: record.pem(),
        }
    }
}

/// Read-only view of a CA certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaView {
    /// CA identifier.
    pub ca_id: CaId,
    /// Position in the hierarchy.
    pub kind: CaKind,
    /// Subject common name.
    pub common_name: String,
    /// Issuer common name.
    pub issuer: String,
    /// Serial number.
    pub serial: SerialNumber,
    /// Validity start.
    pub not_before: DateTime<Utc>,
    /// Validity end.
    pub not_after: DateTime<Utc>,
    /// PEM certificate.
    pub certificate_pem: String,
}

impl CaView {
    /// Builds a view of a CA.
    #[must_use]
    pub fn of(ca: &CertificateAuthority) -> Self {
        let cert = ca.certificate();
        Self {
            ca_id: ca.id(),
            kind: ca.kind(),
            common_name: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.serial().clone(),
            not_before: cert.not_before(),
            not_after: cert.not_after(),
            certificate_pem: cert.pem(),
        }
    }
}

/// Creates a root CA and, if configured, an intermediate under it.
///
/// The returned identities hold the only copies of the new private keys and
/// must be persisted by the caller.
///
/// # Errors
///
/// Returns configuration, key generation or signing errors.
pub fn bootstrap_authorities(config: &PkiConfig) -> Result<(CaManager, Vec<CaIdentity>)> {
    config.validate()?;
    let (root, root_identity) = CertificateAuthority::new_root(config)?;
    let cas = CaManager::new(root)?;
    let mut identities = vec![root_identity];
    if config.bootstrap_intermediate {
        let mut request = IntermediateRequest::new(
            format!("{} Intermediate", config.ca_common_name),
            config.ca_validity,
        );
        request.organization.clone_from(&config.ca_organization);
        request.path_length = config.intermediate_path_length;
        identities.push(cas.issue_intermediate(&request)?);
    }
    info!(authorities = identities.len(), "certificate authorities bootstrapped");
    Ok((cas, identities))
}

/// Certificate lifecycle service.
pub struct CertsService {
    config: PkiConfig,
    cas: Arc<CaManager>,
    store: Arc<dyn CertificateRepository>,
    issuance: IssuanceEngine,
    crls: Arc<CrlGenerator>,
    revoker: Revoker,
    ocsp: OcspResponder,
    tokens: DownloadTokenManager,
}

impl CertsService {
    /// Wires a service over existing authorities and a store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(
        config: PkiConfig,
        cas: Arc<CaManager>,
        store: Arc<dyn CertificateRepository>,
    ) -> Result<Self> {
        config.validate()?;
        let crls = Arc::new(CrlGenerator::new(
            Arc::clone(&cas),
            Arc::clone(&store),
            config.crl_validity,
        ));
        Ok(Self {
            issuance: IssuanceEngine::new(Arc::clone(&cas), Arc::clone(&store), config.clone()),
            revoker: Revoker::new(Arc::clone(&store), Arc::clone(&crls)),
            ocsp: OcspResponder::new(Arc::clone(&cas), Arc::clone(&store), config.crl_validity),
            tokens: DownloadTokenManager::new(config.token_ttl, config.token_single_use),
            crls,
            config,
            cas,
            store,
        })
    }

    /// Bootstraps fresh authorities over an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns bootstrap errors.
    pub fn in_memory(config: PkiConfig) -> Result<Self> {
        let (cas, _) = bootstrap_authorities(&config)?;
        Self::new(config, Arc::new(cas), Arc::new(MemoryStore::new()))
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &PkiConfig {
        &self.config
    }

    /// The CA registry.
    #[must_use]
    pub const fn cas(&self) -> &Arc<CaManager> {
        &self.cas
    }

    /// Issues a certificate with a generated key pair.
    ///
    /// # Errors
    ///
    /// See [`IssuanceEngine::issue`].
    pub fn issue_cert(
        &self,
        entity_id: &str,
        ttl: &str,
        ip_addresses: &[String],
        options: SubjectOptions,
    ) -> Result<CertificateBundle> {
        self.issuance
            .issue(entity_id, ttl, ip_addresses, options)
            .map(IssuedCertificate::into_bundle)
    }

    /// Issues a certificate for a CSR.
    ///
    /// # Errors
    ///
    /// See [`IssuanceEngine::issue_from_csr`].
    pub fn issue_from_csr(&self, entity_id: &str, ttl: &str, csr: &str) -> Result<CertificateBundle> {
        self.issuance
            .issue_from_csr(entity_id, ttl, csr)
            .map(IssuedCertificate::into_bundle)
    }

    /// Renews an active certificate.
    ///
    /// # Errors
    ///
    /// See [`IssuanceEngine::renew`].
    pub fn renew_cert(&self, serial: &str) -> Result<CertificateBundle> {
        let serial: SerialNumber = serial.parse()?;
        self.issuance.renew(&serial).map(IssuedCertificate::into_bundle)
    }

    /// Revokes one certificate.
    ///
    /// # Errors
    ///
    /// See [`Revoker::revoke`].
    pub fn revoke_cert(&self, serial: &str, reason: RevocationReason) -> Result<RevocationOutcome> {
        let serial: SerialNumber = serial.parse()?;
        self.revoker.revoke(&serial, reason)
    }

    /// Revokes every active certificate of an entity.
    ///
    /// # Errors
    ///
    /// See [`Revoker::revoke_entity`].
    pub fn revoke_all(&self, entity_id: &str, reason: RevocationReason) -> Result<Vec<SerialNumber>> {
        self.revoker.revoke_entity(entity_id, reason)
    }

    /// Views one certificate.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSerial`] or [`Error::NotFound`].
    pub fn view_cert(&self, serial: &str) -> Result<CertificateView> {
        let serial: SerialNumber = serial.parse()?;
        let record = self.store.get(&serial)?;
        Ok(CertificateView::from_record(&record, Utc::now()))
    }

    /// Lists certificates.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidQueryParams`] for an invalid window.
    pub fn list_certs(&self, query: &PageQuery) -> Result<CertificatePage> {
        self.store.list(query, Utc::now())
    }

    /// Returns the entity owning a certificate.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSerial`] or [`Error::NotFound`].
    pub fn entity_id(&self, serial: &str) -> Result<EntityId> {
        let serial: SerialNumber = serial.parse()?;
        self.store.get(&serial).map(|record| record.entity_id)
    }

    /// Reports OCSP status for a serial.
    ///
    /// An empty `issuer_cert` means the CA that issued the serial, or the
    /// current issuing CA if the serial is unknown.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSerial`], signing or persistence errors.
    pub fn ocsp(&self, serial: &str, issuer_cert: &[u8]) -> Result<OcspResponse> {
        let serial: SerialNumber = serial.parse()?;
        if !issuer_cert.iter().all(u8::is_ascii_whitespace) {
            return self.ocsp.query(&serial, issuer_cert);
        }
        let ca = match self.store.get(&serial) {
            Ok(record) => self.cas.get(record.ca_id)?,
            Err(Error::NotFound { .. }) => self.cas.issuing_ca(),
            Err(e) => return Err(e),
        };
        self.ocsp.query(&serial, ca.certificate().der())
    }

    /// Answers a DER `OCSPRequest`.
    ///
    /// # Errors
    ///
    /// Signing or persistence errors.
    pub fn ocsp_der(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.ocsp.respond_der(request)
    }

    /// Returns the current CRL of the latest CA of `kind`.
    ///
    /// Only intermediate CRLs are served.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCaType`] for any other kind, [`Error::CaNotFound`] if
    /// no intermediate exists.
    pub fn generate_crl(&self, kind: CaKind) -> Result<CrlSnapshot> {
        if kind != CaKind::Intermediate {
            return Err(Error::InvalidCaType(format!("CRLs are served for intermediate CAs, not {kind}")));
        }
        let ca = self.cas.by_kind(kind)?;
        self.crls.latest_or_generate(ca.id())
    }

    /// Regenerates the CRL of every CA.
    ///
    /// # Errors
    ///
    /// See [`CrlGenerator::refresh_all`].
    pub fn refresh_crls(&self) -> Result<Vec<CrlSnapshot>> {
        self.crls.refresh_all()
    }

    /// Issues a token for the CA bundle.
    #[must_use]
    pub fn ca_download_token(&self) -> DownloadToken {
        self.tokens.issue(TokenSubject::Ca)
    }

    /// Issues a token for one certificate bundle.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSerial`] or [`Error::NotFound`].
    pub fn cert_download_token(&self, serial: &str) -> Result<DownloadToken> {
        let serial: SerialNumber = serial.parse()?;
        self.store.get(&serial)?;
        Ok(self.tokens.issue(TokenSubject::Certificate(serial)))
    }

    /// Views the issuing CA, redeeming a CA token.
    ///
    /// # Errors
    ///
    /// Token errors.
    pub fn view_ca(&self, token: &str) -> Result<CaView> {
        self.tokens.redeem_for(token, &TokenSubject::Ca)?;
        Ok(CaView::of(&self.cas.issuing_ca()))
    }

    /// Downloads the CA chain, redeeming a CA token.
    ///
    /// # Errors
    ///
    /// Token errors.
    pub fn download_ca(&self, token: &str) -> Result<CertificateBundle> {
        self.tokens.redeem_for(token, &TokenSubject::Ca)?;
        let ca = self.cas.issuing_ca();
        let cert = ca.certificate();
        info!(ca_id = %ca.id(), "CA bundle downloaded");
        Ok(CertificateBundle {
            serial: cert.serial().to_hex(),
            entity_id: String::new(),
            certificate_pem: cert.pem(),
            private_key_pem: None,
            ca_chain_pem: self.cas.chain_pem(ca.id())?,
            not_before: cert.not_before(),
            not_after: cert.not_after(),
        })
    }

    /// Downloads a certificate bundle, redeeming a token bound to `serial`.
    ///
    /// Private keys are never stored, so the bundle carries none.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSerial`], token errors, or [`Error::NotFound`].
    pub fn download_cert(&self, token: &str, serial: &str) -> Result<CertificateBundle> {
        let serial: SerialNumber = serial.parse()?;
        self.tokens
            .redeem_for(token, &TokenSubject::Certificate(serial.clone()))?;
        let record = self.store.get(&serial)?;
        if record.effective_status(Utc::now()) != CertStatus::Active {
            warn!(serial = %serial, status = %record.effective_status(Utc::now()), "downloading inactive certificate");
        }
        Ok(CertificateBundle {
            serial: record.serial.to_hex(),
            entity_id: record.entity_id.to_string(),
            certificate_pem: record.pem(),
            private_key_pem: None,
            ca_chain_pem: self.cas.chain_pem(record.ca_id)?,
            not_before: record.not_before,
            not_after: record.not_after,
        })
    }

    /// Drops expired download tokens.
    pub fn purge_tokens(&self) -> usize {
        self.tokens.purge_expired()
    }
}

impl std::fmt::Debug for CertsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertsService")
            .field("authorities", &self.cas.authorities().len())
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
