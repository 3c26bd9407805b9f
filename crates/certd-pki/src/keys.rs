//! Key generation, raw signing and CSR parsing primitives.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, Utc};
use rcgen::{CertificateSigningRequestParams, KeyPair, SignatureAlgorithm};
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, Ed25519KeyPair};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{SubjectAltName, SubjectOptions, convert_general_names, decode_pem, encode_pem};

/// OID arcs for `ecdsa-with-SHA256`.
const OID_ECDSA_SHA256: &[u64] = &[1, 2, 840, 10045, 4, 3, 2];
/// OID arcs for `ecdsa-with-SHA384`.
const OID_ECDSA_SHA384: &[u64] = &[1, 2, 840, 10045, 4, 3, 3];
/// OID arcs for `id-Ed25519`.
const OID_ED25519: &[u64] = &[1, 3, 101, 112];

/// Signature algorithms supported for CA and engine-generated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    /// ECDSA over P-256 with SHA-256.
    #[default]
    EcdsaP256,
    /// ECDSA over P-384 with SHA-384.
    EcdsaP384,
    /// Ed25519.
    Ed25519,
}

impl KeyAlgorithm {
    /// Returns the rcgen signature algorithm.
    #[must_use]
    pub fn rcgen(self) -> &'static SignatureAlgorithm {
        match self {
            Self::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Self::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            Self::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }

    /// Returns the signature AlgorithmIdentifier OID arcs.
    #[must_use]
    pub const fn signature_oid(self) -> &'static [u64] {
        match self {
            Self::EcdsaP256 => OID_ECDSA_SHA256,
            Self::EcdsaP384 => OID_ECDSA_SHA384,
            Self::Ed25519 => OID_ED25519,
        }
    }

    /// Identifies the algorithm of an rcgen key pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for algorithms the engine does not sign with.
    pub fn of_key_pair(key_pair: &KeyPair) -> Result<Self> {
        let alg = key_pair.algorithm();
        [Self::EcdsaP256, Self::EcdsaP384, Self::Ed25519]
            .into_iter()
            .find(|candidate| candidate.rcgen() == alg)
            .ok_or_else(|| Error::Config {
                reason: "unsupported CA key algorithm".into(),
            })
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EcdsaP256 => f.write_str("ecdsa-p256"),
            Self::EcdsaP384 => f.write_str("ecdsa-p384"),
            Self::Ed25519 => f.write_str("ed25519"),
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ecdsa-p256" | "p256" | "es256" => Ok(Self::EcdsaP256),
            "ecdsa-p384" | "p384" | "es384" => Ok(Self::EcdsaP384),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(Error::Config {
                reason: format!("unknown key algorithm '{other}'"),
            }),
        }
    }
}

/// Generates a fresh key pair.
///
/// # Errors
///
/// Returns [`Error::KeySigning`] if the crypto backend fails.
pub fn generate_key_pair(alg: KeyAlgorithm) -> Result<KeyPair> {
    KeyPair::generate_for(alg.rcgen())
        .map_err(|e| Error::signing(format!("failed to generate {alg} key pair: {e}")))
}

/// Raw-message signer over the same PKCS#8 document as an rcgen key pair.
///
/// Used for structures rcgen does not build itself, such as OCSP responses.
pub struct Signer {
    inner: SignerKey,
    algorithm: KeyAlgorithm,
    rng: SystemRandom,
}

enum SignerKey {
    Ecdsa(EcdsaKeyPair),
    Ed25519(Ed25519KeyPair),
}

impl Signer {
    /// Loads a signer from a PKCS#8 DER document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySigning`] if the document does not hold a key of
    /// the given algorithm.
    pub fn from_pkcs8(algorithm: KeyAlgorithm, pkcs8: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();
        let inner = match algorithm {
            KeyAlgorithm::EcdsaP256 => SignerKey::Ecdsa(
                EcdsaKeyPair::from_pkcs8(&signature::ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, &rng)
                    .map_err(|e| Error::signing(format!("rejected P-256 key: {e}")))?,
            ),
            KeyAlgorithm::EcdsaP384 => SignerKey::Ecdsa(
                EcdsaKeyPair::from_pkcs8(&signature::ECDSA_P384_SHA384_ASN1_SIGNING, pkcs8, &rng)
                    .map_err(|e| Error::signing(format!("rejected P-384 key: {e}")))?,
            ),
            KeyAlgorithm::Ed25519 => SignerKey::Ed25519(
                Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8)
                    .map_err(|e| Error::signing(format!("rejected Ed25519 key: {e}")))?,
            ),
        };
        Ok(Self {
            inner,
            algorithm,
            rng,
        })
    }

    /// Signs `message`, returning the encoded signature value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySigning`] if the backend fails.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match &self.inner {
            SignerKey::Ecdsa(key) => key
                .sign(&self.rng, message)
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|_| Error::signing("ECDSA signing failed")),
            SignerKey::Ed25519(key) => Ok(key.sign(message).as_ref().to_vec()),
        }
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Minimum acceptable subject key strength for CSRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Minimum RSA modulus size in bits.
    pub min_rsa_bits: usize,
    /// Minimum EC field size in bits.
    pub min_ec_bits: usize,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            min_rsa_bits: 2048,
            min_ec_bits: 256,
        }
    }
}

/// A parsed and verified certificate signing request.
pub struct CsrRequest {
    params: CertificateSigningRequestParams,
    subject: SubjectOptions,
    ip_addresses: Vec<IpAddr>,
    key_algorithm: String,
    key_bits: usize,
}

impl CsrRequest {
    /// Parses a PEM or base64-DER CSR and verifies its self-signature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCsr`] for blank input and
    /// [`Error::InvalidCsr`] for anything that does not parse, verify, or
    /// meet `policy`.
    pub fn parse(text: &str, policy: KeyPolicy) -> Result<Self> {
        use x509_parser::prelude::*;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::MissingCsr);
        }
        let der = csr_der(trimmed)?;

        let (_, csr) = X509CertificationRequest::from_der(&der).map_err(|e| Error::InvalidCsr {
            reason: format!("malformed request: {e}"),
        })?;
        csr.verify_signature().map_err(|e| Error::InvalidCsr {
            reason: format!("signature does not verify: {e}"),
        })?;

        let info = &csr.certification_request_info;
        let (key_algorithm, key_bits) = key_strength(&info.subject_pki)?;
        check_policy(&key_algorithm, key_bits, policy)?;

        let mut subject = subject_from_name(&info.subject)?;
        let mut ip_addresses = Vec::new();
        if let Some(extensions) = csr.requested_extensions() {
            for ext in extensions {
                if let ParsedExtension::SubjectAlternativeName(san) = ext {
                    for name in convert_general_names(&san.general_names) {
                        match name {
                            SubjectAltName::Dns(dns) => subject.dns_names.push(dns),
                            SubjectAltName::Ip(ip) => ip_addresses.push(ip),
                        }
                    }
                }
            }
        }

        let params = CertificateSigningRequestParams::from_pem(&encode_pem(
            "CERTIFICATE REQUEST",
            &der,
        ))
        .map_err(|e| Error::InvalidCsr {
            reason: format!("unsupported request: {e}"),
        })?;

        debug!(
            common_name = %subject.common_name,
            key_algorithm = %key_algorithm,
            key_bits,
            sans = subject.dns_names.len() + ip_addresses.len(),
            "parsed CSR"
        );

        Ok(Self {
            params,
            subject,
            ip_addresses,
            key_algorithm,
            key_bits,
        })
    }

    /// Subject fields and DNS SANs requested in the CSR.
    #[must_use]
    pub const fn subject(&self) -> &SubjectOptions {
        &self.subject
    }

    /// IP SANs requested in the CSR.
    #[must_use]
    pub fn ip_addresses(&self) -> &[IpAddr] {
        &self.ip_addresses
    }

    /// Public key algorithm name.
    #[must_use]
    pub fn key_algorithm(&self) -> &str {
        &self.key_algorithm
    }

    /// Public key size in bits.
    #[must_use]
    pub const fn key_bits(&self) -> usize {
        self.key_bits
    }

    pub(crate) fn public_key(&self) -> &impl rcgen::PublicKeyData {
        &self.params.public_key
    }
}

impl fmt::Debug for CsrRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrRequest")
            .field("subject", &self.subject)
            .field("ip_addresses", &self.ip_addresses)
            .field("key_algorithm", &self.key_algorithm)
            .field("key_bits", &self.key_bits)
            .finish_non_exhaustive()
    }
}

fn csr_der(text: &str) -> Result<Vec<u8>> {
    if text.starts_with("-----BEGIN") {
        return decode_pem(text.as_bytes(), "CERTIFICATE REQUEST")
            .or_else(|_| decode_pem(text.as_bytes(), "NEW CERTIFICATE REQUEST"))
            .map_err(|e| Error::InvalidCsr {
                reason: e.to_string(),
            });
    }
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| Error::InvalidCsr {
            reason: format!("neither PEM nor base64 DER: {e}"),
        })
}

fn key_strength(
    spki: &x509_parser::x509::SubjectPublicKeyInfo<'_>,
) -> Result<(String, usize)> {
    use x509_parser::public_key::PublicKey;

    if spki.algorithm.algorithm.to_id_string() == "1.3.101.112" {
        return Ok(("ed25519".to_string(), 256));
    }
    match spki.parsed() {
        Ok(PublicKey::RSA(rsa)) => Ok(("rsa".to_string(), rsa.key_size())),
        Ok(PublicKey::EC(point)) => Ok(("ec".to_string(), point.key_size())),
        Ok(_) | Err(_) => Err(Error::InvalidCsr {
            reason: format!(
                "unsupported public key algorithm {}",
                spki.algorithm.algorithm.to_id_string()
            ),
        }),
    }
}

fn check_policy(algorithm: &str, bits: usize, policy: KeyPolicy) -> Result<()> {
    let minimum = match algorithm {
        "rsa" => policy.min_rsa_bits,
        "ec" => policy.min_ec_bits,
        _ => 0,
    };
    if bits < minimum {
        return Err(Error::InvalidCsr {
            reason: format!("{algorithm} key of {bits} bits is below the {minimum}-bit minimum"),
        });
    }
    Ok(())
}

fn subject_from_name(name: &x509_parser::x509::X509Name<'_>) -> Result<SubjectOptions> {
    let mut subject = SubjectOptions::default();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            let value = attr
                .as_str()
                .map_err(|e| Error::InvalidCsr {
                    reason: format!("unreadable subject attribute: {e}"),
                })?
                .to_string();
            match attr.attr_type().to_id_string().as_str() {
                "2.5.4.3" => subject.common_name = value,
                "2.5.4.10" => subject.organization.push(value),
                "2.5.4.11" => subject.organizational_unit.push(value),
                "2.5.4.6" => subject.country.push(value),
                "2.5.4.8" => subject.province.push(value),
                "2.5.4.7" => subject.locality.push(value),
                "2.5.4.9" => subject.street_address.push(value),
                "2.5.4.17" => subject.postal_code.push(value),
                _ => {}
            }
        }
    }
    Ok(subject)
}

/// Converts a chrono timestamp to the `time` type rcgen expects.
///
/// # Errors
///
/// Returns [`Error::Parse`] for timestamps outside the `time` range.
pub fn to_rcgen_time(dt: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| Error::parse(format!("invalid timestamp: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rcgen::{CertificateParams, DnType, PublicKeyData, SanType};
    use test_case::test_case;

    /// Builds a PEM CSR with the given CN and IP SANs.
    pub(crate) fn make_csr(common_name: &str, ips: &[IpAddr]) -> String {
        let key = generate_key_pair(KeyAlgorithm::EcdsaP256).unwrap();
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.subject_alt_names = ips.iter().map(|ip| SanType::IpAddress(*ip)).collect();
        params.serialize_request(&key).unwrap().pem().unwrap()
    }

    #[test_case(KeyAlgorithm::EcdsaP256 ; "p256")]
    #[test_case(KeyAlgorithm::EcdsaP384 ; "p384")]
    #[test_case(KeyAlgorithm::Ed25519 ; "ed25519")]
    fn generated_keys_load_into_signer(alg: KeyAlgorithm) {
        let key = generate_key_pair(alg).unwrap();
        assert_eq!(KeyAlgorithm::of_key_pair(&key).unwrap(), alg);

        let signer = Signer::from_pkcs8(alg, &key.serialize_der()).unwrap();
        let sig = signer.sign(b"hello").unwrap();
        assert!(!sig.is_empty());
        assert_eq!(signer.algorithm(), alg);
    }

    #[test]
    fn signer_rejects_mismatched_algorithm() {
        let key = generate_key_pair(KeyAlgorithm::Ed25519).unwrap();
        let result = Signer::from_pkcs8(KeyAlgorithm::EcdsaP256, &key.serialize_der());
        assert!(matches!(result, Err(Error::KeySigning { .. })));
    }

    #[test]
    fn ed25519_signature_verifies() {
        let key = generate_key_pair(KeyAlgorithm::Ed25519).unwrap();
        let signer = Signer::from_pkcs8(KeyAlgorithm::Ed25519, &key.serialize_der()).unwrap();
        let sig = signer.sign(b"payload").unwrap();
        let public = signature::UnparsedPublicKey::new(&signature::ED25519, key.public_key_raw());
        assert!(public.verify(b"payload", &sig).is_ok());
    }

    #[test]
    fn key_algorithm_parse() {
        assert_eq!("P256".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::EcdsaP256);
        assert_eq!("ed25519".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Ed25519);
        assert!("rsa".parse::<KeyAlgorithm>().is_err());
    }

    #[test]
    fn parse_pem_csr() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let pem = make_csr("device-42", &[ip]);

        let csr = CsrRequest::parse(&pem, KeyPolicy::default()).unwrap();
        assert_eq!(csr.subject().common_name, "device-42");
        assert_eq!(csr.ip_addresses(), &[ip]);
        assert_eq!(csr.key_algorithm(), "ec");
        assert_eq!(csr.key_bits(), 256);
    }

    #[test]
    fn parse_base64_der_csr() {
        let pem = make_csr("device-7", &[]);
        let der = decode_pem(pem.as_bytes(), "CERTIFICATE REQUEST").unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(der);

        let csr = CsrRequest::parse(&b64, KeyPolicy::default()).unwrap();
        assert_eq!(csr.subject().common_name, "device-7");
    }

    #[test]
    fn empty_csr_is_missing() {
        assert!(matches!(
            CsrRequest::parse("  \n", KeyPolicy::default()),
            Err(Error::MissingCsr)
        ));
    }

    #[test]
    fn garbage_csr_is_invalid() {
        assert!(matches!(
            CsrRequest::parse("not a csr at all!", KeyPolicy::default()),
            Err(Error::InvalidCsr { .. })
        ));
    }

    #[test]
    fn tampered_csr_fails_verification() {
        let pem = make_csr("device-42", &[]);
        let mut der = decode_pem(pem.as_bytes(), "CERTIFICATE REQUEST").unwrap();
        // The CN value sits inside the signed portion; flip one of its bytes.
        let pos = der
            .windows(9)
            .position(|w| w == b"device-42")
            .unwrap();
        der[pos] = b'D';
        let tampered = encode_pem("CERTIFICATE REQUEST", &der);

        assert!(matches!(
            CsrRequest::parse(&tampered, KeyPolicy::default()),
            Err(Error::InvalidCsr { .. })
        ));
    }

    #[test]
    fn weak_key_rejected_by_policy() {
        let pem = make_csr("device-42", &[]);
        let strict = KeyPolicy {
            min_rsa_bits: 2048,
            min_ec_bits: 384,
        };
        assert!(matches!(
            CsrRequest::parse(&pem, strict),
            Err(Error::InvalidCsr { .. })
        ));
    }
}
