//! # certd
//!
//! Command-line interface and maintenance daemon for the certd certificate
//! authority.
//!
//! Provides commands for:
//! - Bootstrapping the root and intermediate CAs
//! - Issuing, renewing and revoking certificates
//! - Listing and viewing certificates
//! - Publishing CRLs and answering OCSP queries
//! - Downloading CA and certificate bundles
//!
//! # Architecture
//!
//! CA keys and the certificate store live in a state directory (see
//! [`state`]). Certificate commands go through a [`certd_sdk::CertsClient`],
//! so they run unchanged against the in-process [`certd_sdk::LocalClient`]
//! or the [`certd_sdk::FakeClient`] used in tests.
//!
//! ```text
//! ┌───────────┐   CertsClient   ┌─────────────┐   files   ┌───────────┐
//! │  commands │────────────────►│  certd-pki  │──────────►│ state dir │
//! └───────────┘                 └─────────────┘           └───────────┘
//! ```

#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
pub mod state;

pub use error::CliError;
