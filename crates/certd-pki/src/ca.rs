//! CA Manager: the only holder of CA private keys.

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, IsCa, KeyPair, KeyUsagePurpose, PublicKeyData,
};
use tracing::{debug, info, warn};

use crate::config::PkiConfig;
use crate::error::{Error, Result};
use crate::keys::{KeyAlgorithm, Signer, generate_key_pair, to_rcgen_time};
use crate::types::{CaId, CaKind, Certificate, PrivateKey, SerialNumber};
use crate::validation;

/// Parameters for a new intermediate CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateRequest {
    /// Common name of the intermediate.
    pub common_name: String,
    /// Organization of the intermediate; empty to omit.
    pub organization: String,
    /// Requested lifetime, capped at the parent's remaining validity.
    pub validity: Duration,
    /// `pathLenConstraint` of the intermediate.
    pub path_length: u8,
}

impl IntermediateRequest {
    /// Creates a request with the given common name and lifetime.
    #[must_use]
    pub fn new(common_name: impl Into<String>, validity: Duration) -> Self {
        Self {
            common_name: common_name.into(),
            organization: String::new(),
            validity,
            path_length: 0,
        }
    }
}

/// Certificate and private key of a CA, handed out once at creation.
#[derive(Debug, Clone)]
pub struct CaIdentity {
    /// Position in the hierarchy.
    pub kind: CaKind,
    /// The CA certificate.
    pub certificate: Certificate,
    /// The CA private key (PKCS#8).
    pub private_key: PrivateKey,
}

/// One CA signing identity.
pub struct CertificateAuthority {
    id: CaId,
    kind: CaKind,
    certificate: Certificate,
    key_pair: KeyPair,
    /// rcgen view of our own certificate, used as the issuer of everything we sign.
    issuer: rcgen::Certificate,
    signer: Signer,
}

impl CertificateAuthority {
    /// Creates a self-signed root CA.
    ///
    /// Returns the authority together with its identity so the caller can
    /// persist the key; the authority never exposes it again.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or signing fails.
    pub fn new_root(config: &PkiConfig) -> Result<(Self, CaIdentity)> {
        info!(common_name = %config.ca_common_name, algorithm = %config.key_algorithm, "creating root CA");

        let key_pair = generate_key_pair(config.key_algorithm)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, config.ca_common_name.as_str());
        if !config.ca_organization.is_empty() {
            params
                .distinguished_name
                .push(DnType::OrganizationName, config.ca_organization.as_str());
        }
        if !config.ca_country.is_empty() {
            params
                .distinguished_name
                .push(DnType::CountryName, config.ca_country.as_str());
        }
        params.serial_number = Some(rcgen_serial(&SerialNumber::random()));
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = ca_key_usages();

        let now = Utc::now();
        params.not_before = to_rcgen_time(now - config.clock_skew)?;
        params.not_after = to_rcgen_time(now + config.ca_validity)?;

        let issuer = params
            .self_signed(&key_pair)
            .map_err(|e| Error::signing(format!("failed to self-sign root: {e}")))?;

        let certificate = Certificate::from_der(issuer.der())?;
        let private_key = PrivateKey::new(key_pair.serialize_der());
        let identity = CaIdentity {
            kind: CaKind::Root,
            certificate: certificate.clone(),
            private_key: private_key.clone(),
        };

        let ca = Self::assemble(CaKind::Root, certificate, &private_key, key_pair, issuer)?;
        debug!(ca_id = %ca.id, serial = %ca.certificate.serial(), "root CA created");
        Ok((ca, identity))
    }

    /// Loads a CA from a stored certificate and private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be parsed, does not match the
    /// certificate, or the certificate is not a CA certificate.
    pub fn from_existing(kind: CaKind, certificate: Certificate, key: &PrivateKey) -> Result<Self> {
        let key_pair = KeyPair::try_from(key.der())
            .map_err(|e| Error::parse(format!("failed to parse CA private key: {e}")))?;

        {
            use x509_parser::prelude::*;
            let (_, parsed) = X509Certificate::from_der(certificate.der())
                .map_err(|e| Error::parse(format!("failed to parse CA certificate: {e}")))?;
            if !parsed.is_ca() {
                return Err(Error::InvalidChain {
                    reason: format!("'{}' is not a CA certificate", certificate.subject()),
                });
            }
            if parsed.public_key().subject_public_key.data.as_ref() != key_pair.public_key_raw() {
                return Err(Error::InvalidChain {
                    reason: format!("private key does not match '{}'", certificate.subject()),
                });
            }
        }

        let mut params = CertificateParams::from_ca_cert_pem(&certificate.pem())
            .map_err(|e| Error::parse(format!("failed to load CA certificate: {e}")))?;
        params.key_usages = ca_key_usages();
        let issuer = params
            .self_signed(&key_pair)
            .map_err(|e| Error::signing(format!("failed to rebuild issuer: {e}")))?;

        Self::assemble(kind, certificate, key, key_pair, issuer)
    }

    fn assemble(
        kind: CaKind,
        certificate: Certificate,
        key: &PrivateKey,
        key_pair: KeyPair,
        issuer: rcgen::Certificate,
    ) -> Result<Self> {
        let algorithm = KeyAlgorithm::of_key_pair(&key_pair)?;
        let signer = Signer::from_pkcs8(algorithm, key.der())?;
        Ok(Self {
            id: CaId::from_certificate(certificate.der()),
            kind,
            certificate,
            key_pair,
            issuer,
            signer,
        })
    }

    /// Returns the CA identifier.
    #[must_use]
    pub const fn id(&self) -> CaId {
        self.id
    }

    /// Returns the position of this CA in the hierarchy.
    #[must_use]
    pub const fn kind(&self) -> CaKind {
        self.kind
    }

    /// Returns the CA's own certificate.
    #[must_use]
    pub const fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Returns the key algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> KeyAlgorithm {
        self.signer.algorithm()
    }

    /// Signs a leaf certificate template for `public_key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySigning`] if rcgen rejects the template or the key.
    pub fn sign(
        &self,
        template: CertificateParams,
        public_key: &impl PublicKeyData,
    ) -> Result<Vec<u8>> {
        template
            .signed_by(public_key, &self.issuer, &self.key_pair)
            .map(|cert| cert.der().to_vec())
            .map_err(|e| Error::signing(format!("CA '{}' failed to sign: {e}", self.certificate.subject())))
    }

    /// Signs a CRL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySigning`] if signing fails.
    pub fn sign_crl(&self, params: CertificateRevocationListParams) -> Result<Vec<u8>> {
        params
            .signed_by(&self.issuer, &self.key_pair)
            .map(|crl| crl.der().to_vec())
            .map_err(|e| Error::signing(format!("failed to sign CRL: {e}")))
    }

    pub(crate) fn sign_raw(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.signer.sign(message)
    }

    /// Issues an intermediate CA certificate signed by this root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCaType`] if this CA is not a root, or a
    /// signing error.
    pub fn issue_intermediate(&self, request: &IntermediateRequest) -> Result<CaIdentity> {
        if self.kind != CaKind::Root {
            return Err(Error::InvalidCaType(format!(
                "{} CA cannot issue CA certificates",
                self.kind
            )));
        }
        if request.common_name.trim().is_empty() {
            return Err(Error::InvalidSubject {
                field: "common_name",
                reason: "must not be empty".into(),
            });
        }

        info!(
            parent = %self.id,
            common_name = %request.common_name,
            path_length = request.path_length,
            "issuing intermediate CA"
        );

        let key_pair = generate_key_pair(self.algorithm())?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, request.common_name.as_str());
        if !request.organization.is_empty() {
            params
                .distinguished_name
                .push(DnType::OrganizationName, request.organization.as_str());
        }
        params.serial_number = Some(rcgen_serial(&SerialNumber::random()));
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(request.path_length));
        params.key_usages = ca_key_usages();
        params.use_authority_key_identifier_extension = true;

        let now = Utc::now();
        let not_after = (now + request.validity).min(self.certificate.not_after());
        if not_after <= now {
            return Err(Error::signing(format!(
                "root CA '{}' has expired",
                self.certificate.subject()
            )));
        }
        params.not_before = to_rcgen_time(now)?;
        params.not_after = to_rcgen_time(not_after)?;

        let der = self.sign(params, &key_pair)?;
        Ok(CaIdentity {
            kind: CaKind::Intermediate,
            certificate: Certificate::from_der(&der)?,
            private_key: PrivateKey::new(key_pair.serialize_der()),
        })
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("certificate", &self.certificate.subject())
            .field("key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

fn ca_key_usages() -> Vec<KeyUsagePurpose> {
    vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ]
}

pub(crate) fn rcgen_serial(serial: &SerialNumber) -> rcgen::SerialNumber {
    rcgen::SerialNumber::from_slice(serial.as_bytes())
}

/// Registry of the deployment's CAs: one root, zero or more intermediates.
pub struct CaManager {
    root: Arc<CertificateAuthority>,
    /// Registration order; the last entry is the issuing CA.
    intermediates: RwLock<Vec<Arc<CertificateAuthority>>>,
}

impl CaManager {
    /// Creates a manager around the root CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCaType`] if `root` is not a root CA.
    pub fn new(root: CertificateAuthority) -> Result<Self> {
        if root.kind() != CaKind::Root {
            return Err(Error::InvalidCaType(root.kind().to_string()));
        }
        Ok(Self {
            root: Arc::new(root),
            intermediates: RwLock::new(Vec::new()),
        })
    }

    /// Returns the root CA.
    #[must_use]
    pub fn root(&self) -> Arc<CertificateAuthority> {
        Arc::clone(&self.root)
    }

    /// Returns the CA that signs new leaf certificates: the most recently
    /// registered intermediate, else the root.
    #[must_use]
    pub fn issuing_ca(&self) -> Arc<CertificateAuthority> {
        self.intermediates
            .read()
            .last()
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.root))
    }

    /// Looks up a CA by ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaNotFound`] for unknown IDs.
    pub fn get(&self, ca_id: CaId) -> Result<Arc<CertificateAuthority>> {
        if self.root.id() == ca_id {
            return Ok(self.root());
        }
        self.intermediates
            .read()
            .iter()
            .find(|ca| ca.id() == ca_id)
            .cloned()
            .ok_or_else(|| Error::CaNotFound {
                ca_id: ca_id.to_string(),
            })
    }

    /// Returns the latest CA of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaNotFound`] if no CA of that kind is registered.
    pub fn by_kind(&self, kind: CaKind) -> Result<Arc<CertificateAuthority>> {
        match kind {
            CaKind::Root => Ok(self.root()),
            CaKind::Intermediate => {
                self.intermediates
                    .read()
                    .last()
                    .cloned()
                    .ok_or_else(|| Error::CaNotFound {
                        ca_id: "intermediate".into(),
                    })
            }
        }
    }

    /// Returns every registered CA, root first.
    #[must_use]
    pub fn authorities(&self) -> Vec<Arc<CertificateAuthority>> {
        std::iter::once(self.root())
            .chain(self.intermediates.read().iter().cloned())
            .collect()
    }

    /// Returns the certificate of a CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaNotFound`] for unknown IDs.
    pub fn self_cert(&self, ca_id: CaId) -> Result<Certificate> {
        self.get(ca_id).map(|ca| ca.certificate().clone())
    }

    /// Returns the PEM chain from a CA up to the root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaNotFound`] for unknown IDs.
    pub fn chain_pem(&self, ca_id: CaId) -> Result<String> {
        let ca = self.get(ca_id)?;
        let mut pem = ca.certificate().pem();
        if ca.kind() == CaKind::Intermediate {
            pem.push_str(&self.root.certificate().pem());
        }
        Ok(pem)
    }

    /// Issues a new intermediate under the root and registers it as the
    /// issuing CA.
    ///
    /// The returned identity carries the only copy of the new private key
    /// that leaves the manager.
    ///
    /// # Errors
    ///
    /// Returns an error if issuance or registration fails.
    pub fn issue_intermediate(&self, request: &IntermediateRequest) -> Result<CaIdentity> {
        let identity = self.root.issue_intermediate(request)?;
        self.register_intermediate(&identity)?;
        Ok(identity)
    }

    /// Registers an existing intermediate after checking it chains to the root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChain`] if the certificate is not valid under
    /// the root.
    pub fn register_intermediate(&self, identity: &CaIdentity) -> Result<Arc<CertificateAuthority>> {
        validation::validate_certificate(
            &identity.certificate,
            self.root.certificate(),
            Utc::now(),
        )
        .map_err(|e| {
            warn!(subject = identity.certificate.subject(), error = %e, "rejected intermediate");
            Error::InvalidChain {
                reason: e.to_string(),
            }
        })?;

        let ca = Arc::new(CertificateAuthority::from_existing(
            CaKind::Intermediate,
            identity.certificate.clone(),
            &identity.private_key,
        )?);

        let mut intermediates = self.intermediates.write();
        if let Some(existing) = intermediates.iter().find(|c| c.id() == ca.id()) {
            return Ok(Arc::clone(existing));
        }
        info!(ca_id = %ca.id(), subject = ca.certificate().subject(), "registered intermediate CA");
        intermediates.push(Arc::clone(&ca));
        Ok(ca)
    }
}

impl std::fmt::Debug for CaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaManager")
            .field("root", &self.root.id())
            .field("intermediates", &self.intermediates.read().len())
            .finish()
    }
}
