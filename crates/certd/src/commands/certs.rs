//! Certificate commands, run against any [`CertsClient`].
//!
//! Provides subcommands for:
//! - Issuing from generated keys or CSRs, and renewing
//! - Revoking single certificates or whole entities
//! - Viewing and listing certificates
//! - Fetching CRLs and OCSP status
//! - Downloading bundles through download tokens

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::info;

use certd_pki::{CertificateBundle, EntityId, PageQuery, SubjectOptions};
use certd_sdk::CertsClient;

use crate::cli::{Commands, DownloadTarget, IssueArgs, ListArgs};
use crate::error::CliError;
use crate::output::{Message, OutputFormat, SerialList};

/// Certificate command executor.
pub struct CertsCommand<'a, C> {
    client: &'a C,
}

impl<'a, C: CertsClient> CertsCommand<'a, C> {
    /// Create a new certificate command over `client`.
    #[must_use]
    pub const fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Execute a certificate command.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails or `command` is not a
    /// certificate command.
    pub fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        command: &Commands,
    ) -> Result<(), CliError> {
        match command {
            Commands::Issue(args) => {
                let bundle = self.issue(args)?;
                format.write(writer, &bundle)?;
            }
            Commands::IssueCsr { entity_id, csr, ttl } => {
                let csr = read_text(csr)?;
                let bundle = self.client.issue_from_csr(entity_id, ttl, &csr)?;
                format.write(writer, &bundle)?;
            }
            Commands::Renew { serial } => {
                let bundle = self.client.renew_cert(serial)?;
                format.write(writer, &bundle)?;
            }
            Commands::Revoke { serial, reason } => {
                let outcome = self.client.revoke_cert(serial, *reason)?;
                format.write(writer, &outcome)?;
            }
            Commands::RevokeEntity { entity_id } => {
                let revoked = self.client.delete_cert(entity_id)?;
                let list = SerialList {
                    entity_id: entity_id.clone(),
                    revoked,
                };
                format.write(writer, &list)?;
            }
            Commands::View { serial } => {
                let view = self.client.view_cert(serial)?;
                format.write(writer, &view)?;
            }
            Commands::List(args) => {
                let page = self.client.list_certs(&page_query(args)?)?;
                format.write(writer, &page)?;
            }
            Commands::Crl { kind, pem } => {
                let crl = self.client.get_crl(*kind)?;
                if *pem {
                    write!(writer, "{}", crl.pem())?;
                } else {
                    format.write(writer, &crl)?;
                }
            }
            Commands::Ocsp { serial, issuer } => {
                let issuer_cert = match issuer {
                    Some(path) => read_text(path)?,
                    None => String::new(),
                };
                let response = self.client.ocsp(serial, &issuer_cert)?;
                format.write(writer, &response)?;
            }
            Commands::Download { target, out } => {
                let bundle = self.download(target)?;
                match out {
                    Some(path) => {
                        fs::write(path, bundle_pem(&bundle))?;
                        info!(serial = %bundle.serial, path = %path.display(), "bundle written");
                        let msg = Message::success(format!(
                            "Bundle {} written to {}",
                            bundle.serial,
                            path.display()
                        ));
                        format.write(writer, &msg)?;
                    }
                    None => format.write(writer, &bundle)?,
                }
            }
            Commands::Init { .. } | Commands::Ca | Commands::Intermediate { .. } | Commands::Serve(_) => {
                return Err(CliError::InvalidArgument(
                    "not a certificate command".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn issue(&self, args: &IssueArgs) -> Result<CertificateBundle, CliError> {
        let options = SubjectOptions {
            common_name: args.common_name.clone().unwrap_or_default(),
            organization: args.organization.clone(),
            organizational_unit: args.organizational_unit.clone(),
            country: args.country.clone(),
            dns_names: args.dns.clone(),
            ..SubjectOptions::default()
        };
        Ok(self
            .client
            .issue_cert(&args.entity_id, &args.ttl, &args.ip, options)?)
    }

    fn download(&self, target: &DownloadTarget) -> Result<CertificateBundle, CliError> {
        let bundle = match target {
            DownloadTarget::Ca => {
                let token = self.client.ca_token()?;
                self.client.download_ca(&token.token)?
            }
            DownloadTarget::Cert { serial } => {
                let token = self.client.cert_download_token(serial)?;
                self.client.download_cert(&token.token, serial)?
            }
        };
        Ok(bundle)
    }
}

fn page_query(args: &ListArgs) -> Result<PageQuery, CliError> {
    let mut query = PageQuery::new(args.offset, args.limit);
    if let Some(entity) = &args.entity {
        query = query.entity(EntityId::new(entity.as_str())?);
    }
    if let Some(status) = args.status {
        query = query.status(status);
    }
    Ok(query)
}

fn read_text(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path)
        .map_err(|e| CliError::InvalidArgument(format!("failed to read {}: {e}", path.display())))
}

fn bundle_pem(bundle: &CertificateBundle) -> String {
    let mut pem = bundle.certificate_pem.clone();
    if let Some(key) = &bundle.private_key_pem {
        pem.push_str(key);
    }
    if bundle.ca_chain_pem != bundle.certificate_pem {
        pem.push_str(&bundle.ca_chain_pem);
    }
    pem
}
