//! In-process client backed by a [`CertsService`].

use std::sync::Arc;

use certd_pki::{
    CaKind, CaView, CertificateBundle, CertificatePage, CertificateView, CertsService, CrlSnapshot,
    DownloadToken, OcspResponse, PageQuery, RevocationReason, RevocationOutcome, SerialNumber,
    SubjectOptions,
};
use tracing::debug;

use crate::client::CertsClient;
use crate::error::{Result, SdkError};
use crate::requests::{
    CrlRequest, DeleteRequest, DownloadRequest, IssueCertRequest, IssueFromCsrRequest, ListRequest,
    OcspStatusRequest, RevokeRequest, SerialRequest,
};

/// Calls the engine directly, applying the same request checks a remote
/// transport would.
#[derive(Debug, Clone)]
pub struct LocalClient {
    service: Arc<CertsService>,
}

impl LocalClient {
    /// Wraps a service.
    #[must_use]
    pub const fn new(service: Arc<CertsService>) -> Self {
        Self { service }
    }

    /// The wrapped service.
    #[must_use]
    pub fn service(&self) -> &CertsService {
        &self.service
    }
}

impl CertsClient for LocalClient {
    fn issue_cert(
        &self,
        entity_id: &str,
        ttl: &str,
        ip_addresses: &[String],
        options: SubjectOptions,
    ) -> Result<CertificateBundle> {
        let req = IssueCertRequest {
            entity_id: entity_id.to_string(),
            ttl: ttl.to_string(),
            ip_addresses: ip_addresses.to_vec(),
            options,
        };
        req.validate()?;
        debug!(entity_id, "issue_cert");
        Ok(self
            .service
            .issue_cert(&req.entity_id, &req.ttl, &req.ip_addresses, req.options)?)
    }

    fn issue_from_csr(&self, entity_id: &str, ttl: &str, csr: &str) -> Result<CertificateBundle> {
        let req = IssueFromCsrRequest {
            entity_id: entity_id.to_string(),
            ttl: ttl.to_string(),
            csr: csr.to_string(),
        };
        req.validate()?;
        debug!(entity_id, "issue_from_csr");
        Ok(self.service.issue_from_csr(&req.entity_id, &req.ttl, &req.csr)?)
    }

    fn renew_cert(&self, serial: &str) -> Result<CertificateBundle> {
        SerialRequest::new(serial).validate()?;
        Ok(self.service.renew_cert(serial)?)
    }

    fn revoke_cert(&self, serial: &str, reason: RevocationReason) -> Result<RevocationOutcome> {
        let req = RevokeRequest {
            serial: serial.to_string(),
            reason,
        };
        req.validate()?;
        Ok(self.service.revoke_cert(&req.serial, req.reason)?)
    }

    fn delete_cert(&self, entity_id: &str) -> Result<Vec<SerialNumber>> {
        let req = DeleteRequest {
            entity_id: entity_id.to_string(),
        };
        req.validate()?;
        Ok(self
            .service
            .revoke_all(&req.entity_id, RevocationReason::CessationOfOperation)?)
    }

    fn view_cert(&self, serial: &str) -> Result<CertificateView> {
        SerialRequest::new(serial).validate()?;
        Ok(self.service.view_cert(serial)?)
    }

    fn list_certs(&self, query: &PageQuery) -> Result<CertificatePage> {
        let req = ListRequest {
            query: query.clone(),
        };
        req.validate()?;
        Ok(self.service.list_certs(&req.query)?)
    }

    fn get_crl(&self, kind: CaKind) -> Result<CrlSnapshot> {
        CrlRequest { kind }.validate()?;
        Ok(self.service.generate_crl(kind)?)
    }

    fn ocsp(&self, serial: &str, issuer_cert: &str) -> Result<OcspResponse> {
        let req = OcspStatusRequest {
            serial: serial.to_string(),
            issuer_cert: issuer_cert.to_string(),
        };
        req.validate()?;
        Ok(self.service.ocsp(&req.serial, req.issuer_cert.as_bytes())?)
    }

    fn ca_token(&self) -> Result<DownloadToken> {
        Ok(self.service.ca_download_token())
    }

    fn cert_download_token(&self, serial: &str) -> Result<DownloadToken> {
        SerialRequest::new(serial).validate()?;
        Ok(self.service.cert_download_token(serial)?)
    }

    fn view_ca(&self, token: &str) -> Result<CaView> {
        DownloadRequest {
            token: token.to_string(),
            serial: None,
        }
        .validate()?;
        Ok(self.service.view_ca(token)?)
    }

    fn download_ca(&self, token: &str) -> Result<CertificateBundle> {
        DownloadRequest {
            token: token.to_string(),
            serial: None,
        }
        .validate()?;
        Ok(self.service.download_ca(token)?)
    }

    fn download_cert(&self, token: &str, serial: &str) -> Result<CertificateBundle> {
        DownloadRequest {
            token: token.to_string(),
            serial: Some(serial.to_string()),
        }
        .validate()?;
        self.service
            .download_cert(token, serial)
            .map_err(SdkError::from)
    }
}
