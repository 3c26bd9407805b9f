//! On-disk state: CA identities and the certificate store.
//!
//! Layout under the state directory:
//!
//! ```text
//! ca/root.crt.pem
//! ca/root.key.pem
//! ca/intermediate-001.crt.pem
//! ca/intermediate-001.key.pem
//! certs.json
//! ```
//!
//! Intermediates are registered in file-name order, so the highest-numbered
//! one is the issuing CA.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use certd_pki::{
    CaIdentity, CaKind, CaManager, Certificate, CertificateAuthority, CertsService, FileStore,
    PkiConfig, PrivateKey, bootstrap_authorities,
};

use crate::error::CliError;

const CA_DIR: &str = "ca";
const STORE_FILE: &str = "certs.json";
const ROOT_STEM: &str = "root";
const INTERMEDIATE_PREFIX: &str = "intermediate-";
const CERT_SUFFIX: &str = ".crt.pem";
const KEY_SUFFIX: &str = ".key.pem";

/// Reads the engine configuration, or returns defaults when `path` is `None`.
///
/// # Errors
///
/// Returns [`CliError::Config`] if the file cannot be read, parsed or
/// validated.
pub fn load_config(path: Option<&Path>) -> Result<PkiConfig, CliError> {
    let Some(path) = path else {
        return Ok(PkiConfig::new());
    };
    let text = fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("failed to read {}: {e}", path.display())))?;
    let config: PkiConfig = serde_json::from_str(&text)
        .map_err(|e| CliError::Config(format!("invalid {}: {e}", path.display())))?;
    config
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(config)
}

/// A certd state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Wraps `root`; nothing is read until the state is used.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn ca_dir(&self) -> PathBuf {
        self.root.join(CA_DIR)
    }

    /// Path of the certificate store snapshot.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    /// Whether a root CA has been written.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.ca_dir().join(format!("{ROOT_STEM}{CERT_SUFFIX}")).exists()
    }

    /// Creates a fresh CA hierarchy.
    ///
    /// With `force`, an existing hierarchy and store are moved aside to
    /// timestamped backups first.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::State`] if the directory is already initialized
    /// and `force` is false, or IO and engine errors.
    pub fn initialize(&self, config: &PkiConfig, force: bool) -> Result<Vec<CaIdentity>, CliError> {
        if self.is_initialized() {
            if !force {
                return Err(CliError::State(format!(
                    "{} is already initialized; use --force to replace it",
                    self.root.display()
                )));
            }
            self.archive()?;
        }

        let (_, identities) = bootstrap_authorities(config)?;
        fs::create_dir_all(self.ca_dir())?;
        for identity in &identities {
            self.save_identity(identity)?;
        }
        info!(state_dir = %self.root.display(), authorities = identities.len(), "state initialized");
        Ok(identities)
    }

    fn archive(&self) -> Result<(), CliError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        for path in [self.ca_dir(), self.store_path()] {
            if path.exists() {
                let mut backup = path.clone().into_os_string();
                backup.push(format!(".bak-{stamp}"));
                warn!(from = %path.display(), to = ?backup, "archiving previous state");
                fs::rename(&path, &backup)?;
            }
        }
        Ok(())
    }

    /// Writes a CA certificate and key; returns the certificate path.
    ///
    /// Roots overwrite `root.*`; intermediates take the next free number.
    ///
    /// # Errors
    ///
    /// Returns IO errors.
    pub fn save_identity(&self, identity: &CaIdentity) -> Result<PathBuf, CliError> {
        let dir = self.ca_dir();
        fs::create_dir_all(&dir)?;
        let stem = match identity.kind {
            CaKind::Root => ROOT_STEM.to_string(),
            CaKind::Intermediate => {
                format!("{INTERMEDIATE_PREFIX}{:03}", self.intermediate_stems()?.len() + 1)
            }
        };
        let cert_path = dir.join(format!("{stem}{CERT_SUFFIX}"));
        let key_path = dir.join(format!("{stem}{KEY_SUFFIX}"));
        fs::write(&cert_path, identity.certificate.pem())?;
        write_private(&key_path, &identity.private_key.pem())?;
        info!(kind = %identity.kind, path = %cert_path.display(), "saved CA identity");
        Ok(cert_path)
    }

    fn intermediate_stems(&self) -> Result<Vec<String>, CliError> {
        let dir = self.ca_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut stems: Vec<String> = fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(INTERMEDIATE_PREFIX))
            .filter_map(|name| name.strip_suffix(CERT_SUFFIX).map(str::to_string))
            .collect();
        stems.sort();
        Ok(stems)
    }

    fn read_identity(&self, kind: CaKind, stem: &str) -> Result<CaIdentity, CliError> {
        let dir = self.ca_dir();
        let cert_path = dir.join(format!("{stem}{CERT_SUFFIX}"));
        let key_path = dir.join(format!("{stem}{KEY_SUFFIX}"));
        let cert = fs::read(&cert_path)
            .map_err(|e| CliError::State(format!("failed to read {}: {e}", cert_path.display())))?;
        let key = fs::read_to_string(&key_path)
            .map_err(|e| CliError::State(format!("failed to read {}: {e}", key_path.display())))?;
        Ok(CaIdentity {
            kind,
            certificate: Certificate::from_pem_or_der(&cert)?,
            private_key: PrivateKey::from_pem(&key)?,
        })
    }

    /// Loads the CA hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::State`] if the directory is not initialized, or
    /// engine errors for unreadable or inconsistent identities.
    pub fn load_authorities(&self) -> Result<CaManager, CliError> {
        if !self.is_initialized() {
            return Err(CliError::State(format!(
                "{} is not initialized; run `certd init` first",
                self.root.display()
            )));
        }
        let root = self.read_identity(CaKind::Root, ROOT_STEM)?;
        let cas = CaManager::new(CertificateAuthority::from_existing(
            CaKind::Root,
            root.certificate,
            &root.private_key,
        )?)?;
        for stem in self.intermediate_stems()? {
            let identity = self.read_identity(CaKind::Intermediate, &stem)?;
            cas.register_intermediate(&identity)?;
        }
        Ok(cas)
    }

    /// Opens the full service over the persisted hierarchy and store.
    ///
    /// # Errors
    ///
    /// See [`StateDir::load_authorities`]; also store and configuration errors.
    pub fn open_service(&self, config: PkiConfig) -> Result<CertsService, CliError> {
        let cas = Arc::new(self.load_authorities()?);
        let store = Arc::new(FileStore::open(self.store_path())?);
        Ok(CertsService::new(config, cas, store)?)
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> Result<(), CliError> {
    use std::os::unix::fs::PermissionsExt;

    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> Result<(), CliError> {
    fs::write(path, contents)?;
    Ok(())
}
