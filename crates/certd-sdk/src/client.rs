//! The client trait shared by every SDK backend.

use certd_pki::{
    CaKind, CaView, CertificateBundle, CertificatePage, CertificateView, CrlSnapshot, DownloadToken,
    OcspResponse, PageQuery, RevocationOutcome, RevocationReason, SerialNumber, SubjectOptions,
};

use crate::error::Result;

/// Operations a certd deployment exposes.
///
/// Implementations validate request shape before doing any work and report
/// every failure as an [`SdkError`](crate::SdkError).
pub trait CertsClient: Send + Sync {
    /// Issues a certificate with a freshly generated key pair.
    ///
    /// `ttl` uses the `10h` / `30m` / `7d` syntax; empty means the default.
    ///
    /// # Errors
    ///
    /// Validation errors for a missing entity or bad TTL, or engine failures.
    fn issue_cert(
        &self,
        entity_id: &str,
        ttl: &str,
        ip_addresses: &[String],
        options: SubjectOptions,
    ) -> Result<CertificateBundle>;

    /// Issues a certificate for the public key in a PKCS#10 request.
    ///
    /// # Errors
    ///
    /// Validation errors for a missing entity or CSR, or an invalid CSR.
    fn issue_from_csr(&self, entity_id: &str, ttl: &str, csr: &str) -> Result<CertificateBundle>;

    /// Issues a replacement for an active certificate.
    ///
    /// # Errors
    ///
    /// Not-found, or a conflict if the certificate is revoked or expired.
    fn renew_cert(&self, serial: &str) -> Result<CertificateBundle>;

    /// Revokes one certificate.
    ///
    /// # Errors
    ///
    /// Not-found, or a conflict if it is already revoked.
    fn revoke_cert(&self, serial: &str, reason: RevocationReason) -> Result<RevocationOutcome>;

    /// Revokes every active certificate of an entity.
    ///
    /// # Errors
    ///
    /// Not-found if the entity owns no certificates.
    fn delete_cert(&self, entity_id: &str) -> Result<Vec<SerialNumber>>;

    /// Returns one certificate.
    ///
    /// # Errors
    ///
    /// Validation or not-found errors.
    fn view_cert(&self, serial: &str) -> Result<CertificateView>;

    /// Lists certificates.
    ///
    /// # Errors
    ///
    /// Validation errors for an out-of-range limit.
    fn list_certs(&self, query: &PageQuery) -> Result<CertificatePage>;

    /// Fetches the current CRL of a CA type.
    ///
    /// # Errors
    ///
    /// Validation error unless `kind` is intermediate.
    fn get_crl(&self, kind: CaKind) -> Result<CrlSnapshot>;

    /// Asks for the OCSP status of a serial.
    ///
    /// `issuer_cert` is a PEM issuer certificate, or empty for the issuing CA.
    ///
    /// # Errors
    ///
    /// Validation errors; unknown or foreign serials are reported in the
    /// response, not as errors.
    fn ocsp(&self, serial: &str, issuer_cert: &str) -> Result<OcspResponse>;

    /// Issues a token for the CA bundle.
    ///
    /// # Errors
    ///
    /// Transport failures only.
    fn ca_token(&self) -> Result<DownloadToken>;

    /// Issues a token for one certificate bundle.
    ///
    /// # Errors
    ///
    /// Validation or not-found errors.
    fn cert_download_token(&self, serial: &str) -> Result<DownloadToken>;

    /// Views the issuing CA.
    ///
    /// # Errors
    ///
    /// Token errors.
    fn view_ca(&self, token: &str) -> Result<CaView>;

    /// Downloads the CA chain.
    ///
    /// # Errors
    ///
    /// Token errors.
    fn download_ca(&self, token: &str) -> Result<CertificateBundle>;

    /// Downloads a certificate bundle.
    ///
    /// # Errors
    ///
    /// Token, validation or not-found errors.
    fn download_cert(&self, token: &str, serial: &str) -> Result<CertificateBundle>;
}
