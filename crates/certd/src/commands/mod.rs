//! CLI command implementations.
//!
//! Each submodule implements a group of commands:
//! - [`certs`] - Certificate lifecycle over a [`certd_sdk::CertsClient`]
//! - [`ca`] - CA hierarchy management on the state directory
//! - [`serve`] - Background CRL and token maintenance

pub mod ca;
pub mod certs;
pub mod serve;

pub use ca::CaCommand;
pub use certs::CertsCommand;
pub use serve::{Maintenance, MaintenanceStats};
