//! # certd-sdk
//!
//! Client-side API for the certd certificate authority.
//!
//! The [`CertsClient`] trait lists every operation a certd deployment
//! exposes. Two implementations ship with the crate:
//!
//! - [`LocalClient`] drives a [`certd_pki::CertsService`] in-process
//! - [`FakeClient`] keeps state in memory for tests of dependent code
//!
//! Both check request shape with the types in [`requests`] before doing any
//! work, and report failures as [`SdkError`], which carries the engine's
//! error class and the HTTP status a transport would answer with.
//!
//! ```
//! use std::sync::Arc;
//!
//! use certd_pki::{CertsService, PkiConfig, SubjectOptions};
//! use certd_sdk::{CertsClient, LocalClient};
//!
//! let service = CertsService::in_memory(PkiConfig::new()).unwrap();
//! let client = LocalClient::new(Arc::new(service));
//!
//! let bundle = client
//!     .issue_cert("sensor-7", "12h", &[], SubjectOptions::default())
//!     .unwrap();
//! let view = client.view_cert(&bundle.serial).unwrap();
//! assert_eq!(view.entity_id.as_str(), "sensor-7");
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod fake;
pub mod local;
pub mod requests;

pub use client::CertsClient;
pub use error::{Result, SdkError, SdkErrorKind};
pub use fake::{Call, FakeClient, Operation};
pub use local::LocalClient;
