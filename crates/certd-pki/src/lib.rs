//! Certificate lifecycle engine for certd.
//!
//! This crate owns the cryptographic core of the certd certificate
//! authority: CA keys, certificate issuance, revocation, CRLs and OCSP.
//!
//! # Overview
//!
//! The `certd-pki` crate provides:
//! - A CA Manager holding the root and intermediate CAs and their keys
//! - Issuance from engine-generated key pairs or external CSRs, and renewal
//! - Revocation with an `active → revoked | expired` state machine
//! - Signed, monotonically numbered CRLs
//! - An RFC 6960 OCSP responder
//! - Short-lived download tokens for CA and certificate bundles
//! - In-memory and file-backed certificate stores
//!
//! # Example
//!
//! ```
//! use certd_pki::{CertsService, PkiConfig, RevocationReason, SubjectOptions};
//!
//! let service = CertsService::in_memory(PkiConfig::new()).unwrap();
//!
//! let bundle = service
//!     .issue_cert("device-42", "24h", &["10.0.0.5".to_string()], SubjectOptions::default())
//!     .unwrap();
//! assert!(bundle.private_key_pem.is_some());
//!
//! service.revoke_cert(&bundle.serial, RevocationReason::KeyCompromise).unwrap();
//! let view = service.view_cert(&bundle.serial).unwrap();
//! assert_eq!(view.status.to_string(), "revoked");
//! ```
//!
//! # Modules
//!
//! - [`ca`] - CA Manager and certificate authorities
//! - [`issuance`] - Issuance engine and TTL parsing
//! - [`revocation`] - Revocation of single certificates and whole entities
//! - [`crl`] - CRL generation
//! - [`ocsp`] - OCSP responder
//! - [`token`] - Download tokens
//! - [`store`] - Certificate store
//! - [`service`] - Transport-facing facade
//! - [`keys`] - Key algorithms, raw signing and CSR parsing
//! - [`validation`] - Certificate validation utilities
//! - [`types`] - Core types
//! - [`config`] - Engine configuration
//! - [`error`] - Error types

#![forbid(unsafe_code)]

pub mod ca;
pub mod config;
pub mod crl;
pub mod error;
pub mod issuance;
pub mod keys;
pub mod ocsp;
pub mod revocation;
pub mod service;
pub mod store;
pub mod token;
pub mod types;
pub mod validation;

// Re-export commonly used types at crate root
pub use ca::{CaIdentity, CaManager, CertificateAuthority, IntermediateRequest};
pub use config::PkiConfig;
pub use crl::CrlGenerator;
pub use error::{Error, ErrorKind, Result};
pub use issuance::{IssuanceEngine, format_ttl, parse_ttl};
pub use keys::{CsrRequest, KeyAlgorithm, KeyPolicy};
pub use ocsp::{OcspCertStatus, OcspRequest, OcspResponder, OcspResponse, OcspResponseStatus};
pub use revocation::{RevocationOutcome, Revoker};
pub use service::{CaView, CertificateView, CertsService, bootstrap_authorities};
pub use store::{CertificateRepository, FileStore, MemoryStore};
pub use token::{DownloadToken, DownloadTokenManager, TokenSubject};
pub use types::{
    CaId, CaKind, CertStatus, Certificate, CertificateBundle, CertificatePage, CertificateRecord,
    CrlSnapshot, EntityId, PageQuery, PrivateKey, RevocationReason, SerialNumber, SubjectOptions,
};
pub use validation::{is_expired, is_valid_now, validate_certificate, validate_chain};
