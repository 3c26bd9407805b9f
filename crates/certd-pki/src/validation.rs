//! Certificate validation utilities.

use chrono::{DateTime, Utc};
use tracing::debug;
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::types::Certificate;

/// Validates a certificate against its issuing CA certificate at `now`.
///
/// This performs the following checks:
/// - The certificate is not expired
/// - The certificate is already valid (`not_before` check)
/// - The issuer matches the CA's subject
/// - The certificate was signed by the CA
///
/// # Errors
///
/// Returns [`Error::CertificateExpired`], [`Error::InvalidChain`] or
/// [`Error::SignatureVerification`] for the first failed check.
pub fn validate_certificate(
    cert: &Certificate,
    ca_cert: &Certificate,
    now: DateTime<Utc>,
) -> Result<()> {
    debug!(subject = cert.subject(), serial = %cert.serial(), "validating certificate");

    if is_expired(cert, now) {
        return Err(Error::CertificateExpired {
            serial: cert.serial().to_hex(),
        });
    }

    if is_not_yet_valid(cert, now) {
        return Err(Error::InvalidChain {
            reason: format!("'{}' is not yet valid", cert.subject()),
        });
    }

    if cert.issuer() != ca_cert.subject() {
        return Err(Error::InvalidChain {
            reason: format!(
                "issuer '{}' does not match CA subject '{}'",
                cert.issuer(),
                ca_cert.subject()
            ),
        });
    }

    verify_signature(cert, ca_cert)
}

/// Validates a certificate chain ordered from end-entity to root.
///
/// Each certificate must be signed by the next one; the last must be
/// self-signed.
///
/// # Errors
///
/// Returns an error if any link fails [`validate_certificate`].
pub fn validate_chain(chain: &[Certificate], now: DateTime<Utc>) -> Result<()> {
    let Some(root) = chain.last() else {
        return Err(Error::InvalidChain {
            reason: "empty certificate chain".into(),
        });
    };

    for pair in chain.windows(2) {
        validate_certificate(&pair[0], &pair[1], now)?;
    }

    validate_self_signed(root)
}

/// Whether the certificate is past its `not_after` at `now`.
#[must_use]
pub fn is_expired(cert: &Certificate, now: DateTime<Utc>) -> bool {
    cert.not_after() <= now
}

/// Whether the certificate's `not_before` is still in the future at `now`.
#[must_use]
pub fn is_not_yet_valid(cert: &Certificate, now: DateTime<Utc>) -> bool {
    cert.not_before() > now
}

/// Whether the certificate is inside its validity window at `now`.
#[must_use]
pub fn is_valid_now(cert: &Certificate, now: DateTime<Utc>) -> bool {
    !is_expired(cert, now) && !is_not_yet_valid(cert, now)
}

/// Time left until expiry, or `None` once expired.
#[must_use]
pub fn remaining_validity(cert: &Certificate, now: DateTime<Utc>) -> Option<chrono::Duration> {
    (cert.not_after() > now).then(|| cert.not_after() - now)
}

fn validate_self_signed(cert: &Certificate) -> Result<()> {
    if cert.issuer() != cert.subject() {
        return Err(Error::InvalidChain {
            reason: format!("root '{}' is not self-signed", cert.subject()),
        });
    }

    verify_signature(cert, cert)
}

/// Verifies that `cert` carries a signature made by `issuer`'s key.
pub(crate) fn verify_signature(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    let (_, parsed_cert) = X509Certificate::from_der(cert.der())
        .map_err(|e| Error::parse(format!("failed to parse certificate: {e}")))?;

    let (_, parsed_issuer) = X509Certificate::from_der(issuer.der())
        .map_err(|e| Error::parse(format!("failed to parse issuer certificate: {e}")))?;

    parsed_cert
        .verify_signature(Some(parsed_issuer.public_key()))
        .map_err(|e| Error::SignatureVerification {
            reason: format!("'{}' not signed by '{}': {e:?}", cert.subject(), issuer.subject()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use crate::config::PkiConfig;
    use crate::types::SerialNumber;
    use chrono::Duration;

    fn synthetic(subject: &str, from: i64, to: i64) -> Certificate {
        let now = Utc::now();
        Certificate::new(
            vec![1, 2, 3],
            SerialNumber::from_bytes(&[1]),
            now + Duration::days(from),
            now + Duration::days(to),
            subject.into(),
            "Test CA".into(),
            vec![],
        )
    }

    fn root() -> CertificateAuthority {
        let config = PkiConfig::new().with_ca_common_name("Test Root");
        CertificateAuthority::new_root(&config).unwrap().0
    }

    #[test]
    fn expiry_checks() {
        let now = Utc::now();
        let expired = synthetic("expired", -60, -30);
        let future = synthetic("future", 30, 60);
        let current = synthetic("current", -1, 30);

        assert!(is_expired(&expired, now));
        assert!(!is_expired(&current, now));
        assert!(is_not_yet_valid(&future, now));
        assert!(is_valid_now(&current, now));
        assert!(!is_valid_now(&future, now));
        assert!(remaining_validity(&expired, now).is_none());
        assert!(remaining_validity(&current, now).unwrap() > Duration::days(29));
    }

    #[test]
    fn expired_certificate_fails_validation() {
        let now = Utc::now();
        let expired = synthetic("expired", -60, -30);
        let ca = synthetic("Test CA", -1, 30);
        assert!(matches!(
            validate_certificate(&expired, &ca, now),
            Err(Error::CertificateExpired { .. })
        ));
    }

    #[test]
    fn root_chain_is_valid() {
        let ca = root();
        assert!(validate_chain(&[ca.certificate().clone()], Utc::now()).is_ok());
    }

    #[test]
    fn empty_chain_rejected() {
        assert!(matches!(
            validate_chain(&[], Utc::now()),
            Err(Error::InvalidChain { .. })
        ));
    }

    #[test]
    fn foreign_root_signature_rejected() {
        let a = root();
        let b = root();
        // Same CN, different keys.
        let result = verify_signature(a.certificate(), b.certificate());
        assert!(matches!(result, Err(Error::SignatureVerification { .. })));
    }
}
