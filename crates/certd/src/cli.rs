//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use certd_pki::{CaKind, CertStatus, RevocationReason};

/// certd - certificate authority for fleets of devices and services.
#[derive(Parser, Debug, Clone)]
#[command(name = "certd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory holding CA keys and the certificate store.
    #[arg(short, long, env = "CERTD_STATE_DIR", default_value = ".certd")]
    pub state_dir: PathBuf,

    /// JSON engine configuration; defaults apply when omitted.
    #[arg(short, long, env = "CERTD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create the root CA (and intermediate) in the state directory.
    Init {
        /// Replace an existing CA hierarchy.
        #[arg(long)]
        force: bool,
    },

    /// Issue a certificate with a generated key.
    Issue(IssueArgs),

    /// Issue a certificate for a PKCS#10 request.
    IssueCsr {
        /// Owning entity.
        entity_id: String,

        /// Path to a PEM or DER CSR.
        #[arg(long)]
        csr: PathBuf,

        /// Requested lifetime, e.g. `10h` or `7d`.
        #[arg(long, default_value = "")]
        ttl: String,
    },

    /// Issue a replacement for an active certificate.
    Renew {
        /// Serial number in hex.
        serial: String,
    },

    /// Revoke one certificate.
    Revoke {
        /// Serial number in hex.
        serial: String,

        /// Revocation reason, by name or RFC 5280 code.
        #[arg(short, long, default_value = "unspecified")]
        reason: RevocationReason,
    },

    /// Revoke every certificate of an entity.
    RevokeEntity {
        /// Owning entity.
        entity_id: String,
    },

    /// Show one certificate.
    View {
        /// Serial number in hex.
        serial: String,
    },

    /// List certificates.
    List(ListArgs),

    /// Print the current CRL.
    Crl {
        /// CA type; only intermediate CRLs are served.
        #[arg(long, default_value = "intermediate")]
        kind: CaKind,

        /// Print the PEM-encoded CRL instead of a summary.
        #[arg(long)]
        pem: bool,
    },

    /// Query OCSP status.
    Ocsp {
        /// Serial number in hex.
        serial: String,

        /// PEM issuer certificate; defaults to the CA that issued the serial.
        #[arg(long)]
        issuer: Option<PathBuf>,
    },

    /// Show the CA hierarchy.
    Ca,

    /// Issue a new intermediate CA and make it the issuing CA.
    Intermediate {
        /// Common name of the intermediate.
        #[arg(long)]
        common_name: String,

        /// Lifetime; defaults to the configured CA validity.
        #[arg(long)]
        ttl: Option<String>,
    },

    /// Download the CA chain or a certificate bundle.
    ///
    /// Mints a single-use download token and redeems it in the same call.
    Download {
        /// What to download.
        #[command(subcommand)]
        target: DownloadTarget,

        /// Write the PEM bundle to this file instead of printing a summary.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run background maintenance until interrupted.
    Serve(ServeArgs),
}

/// Arguments for the issue command.
#[derive(Parser, Debug, Clone)]
pub struct IssueArgs {
    /// Owning entity.
    pub entity_id: String,

    /// Requested lifetime, e.g. `10h` or `7d`.
    #[arg(long, default_value = "")]
    pub ttl: String,

    /// IP subject alternative names (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub ip: Vec<String>,

    /// DNS subject alternative names (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub dns: Vec<String>,

    /// Subject common name; defaults to the entity ID.
    #[arg(long)]
    pub common_name: Option<String>,

    /// Subject organization.
    #[arg(long)]
    pub organization: Vec<String>,

    /// Subject organizational unit.
    #[arg(long)]
    pub organizational_unit: Vec<String>,

    /// Subject country.
    #[arg(long)]
    pub country: Vec<String>,
}

/// Arguments for the list command.
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Records to skip.
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Page size.
    #[arg(long, default_value_t = 10)]
    pub limit: u64,

    /// Restrict to one entity.
    #[arg(long)]
    pub entity: Option<String>,

    /// Restrict to one status.
    #[arg(long)]
    pub status: Option<CertStatus>,
}

/// Download targets.
#[derive(Subcommand, Debug, Clone)]
pub enum DownloadTarget {
    /// The issuing CA and its chain.
    Ca,

    /// One certificate bundle.
    Cert {
        /// Serial number in hex.
        serial: String,
    },
}

/// Arguments for the serve command.
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Seconds between CRL refreshes.
    #[arg(long, default_value_t = 3600)]
    pub crl_interval: u64,

    /// Seconds between sweeps of expired download tokens.
    #[arg(long, default_value_t = 60)]
    pub token_gc_interval: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_issue_with_sans() {
        let cli = Cli::parse_from([
            "certd", "issue", "device-1", "--ttl", "10h", "--ip", "10.0.0.1,10.0.0.2",
        ]);
        match cli.command {
            Commands::Issue(args) => {
                assert_eq!(args.entity_id, "device-1");
                assert_eq!(args.ttl, "10h");
                assert_eq!(args.ip, vec!["10.0.0.1", "10.0.0.2"]);
            }
            _ => panic!("expected issue command"),
        }
    }

    #[test]
    fn parses_revoke_reason() {
        let cli = Cli::parse_from(["certd", "revoke", "0a1b", "--reason", "key_compromise"]);
        match cli.command {
            Commands::Revoke { serial, reason } => {
                assert_eq!(serial, "0a1b");
                assert_eq!(reason, RevocationReason::KeyCompromise);
            }
            _ => panic!("expected revoke command"),
        }
    }

    #[test]
    fn rejects_unknown_reason() {
        assert!(Cli::try_parse_from(["certd", "revoke", "0a", "--reason", "boredom"]).is_err());
    }

    #[test]
    fn crl_defaults_to_intermediate() {
        let cli = Cli::parse_from(["certd", "crl"]);
        assert!(matches!(
            cli.command,
            Commands::Crl {
                kind: CaKind::Intermediate,
                pem: false
            }
        ));
    }

    #[test]
    fn parses_download_cert() {
        let cli = Cli::parse_from(["certd", "download", "--out", "b.pem", "cert", "0a"]);
        match cli.command {
            Commands::Download { target, out } => {
                assert!(matches!(target, DownloadTarget::Cert { serial } if serial == "0a"));
                assert_eq!(out, Some(PathBuf::from("b.pem")));
            }
            _ => panic!("expected download command"),
        }
    }

    #[test]
    fn global_flags() {
        let cli = Cli::parse_from(["certd", "--format", "json", "--state-dir", "/tmp/x", "ca"]);
        assert_eq!(cli.format, Format::Json);
        assert_eq!(cli.state_dir, PathBuf::from("/tmp/x"));
    }
}
