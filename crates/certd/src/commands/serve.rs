//! Background maintenance loop.
//!
//! Refreshes every CA's CRL before it goes stale and sweeps expired download
//! tokens, until the shutdown future resolves.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use certd_pki::CertsService;

use crate::cli::ServeArgs;
use crate::error::CliError;
use crate::output::TableDisplay;

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceStats {
    /// Successful CRL refresh rounds.
    pub crl_refreshes: u64,
    /// Failed CRL refresh rounds.
    pub crl_failures: u64,
    /// Download tokens dropped after expiry.
    pub tokens_purged: usize,
}

impl TableDisplay for MaintenanceStats {
    fn write_table<W: std::io::Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Maintenance stopped")?;
        writeln!(writer, "  CRL refreshes:  {}", self.crl_refreshes)?;
        writeln!(writer, "  CRL failures:   {}", self.crl_failures)?;
        writeln!(writer, "  Tokens purged:  {}", self.tokens_purged)?;
        Ok(())
    }
}

/// Periodic CRL and token maintenance over a service.
pub struct Maintenance {
    service: Arc<CertsService>,
    crl_interval: Duration,
    token_gc_interval: Duration,
}

impl Maintenance {
    /// Create the loop from CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::InvalidArgument`] for a zero interval.
    pub fn new(service: Arc<CertsService>, args: &ServeArgs) -> Result<Self, CliError> {
        if args.crl_interval == 0 || args.token_gc_interval == 0 {
            return Err(CliError::InvalidArgument(
                "intervals must be at least one second".to_string(),
            ));
        }
        Ok(Self {
            service,
            crl_interval: Duration::from_secs(args.crl_interval),
            token_gc_interval: Duration::from_secs(args.token_gc_interval),
        })
    }

    /// Run until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> MaintenanceStats
    where
        F: Future<Output = ()>,
    {
        let mut stats = MaintenanceStats::default();
        let mut crl_ticker = interval(self.crl_interval);
        let mut token_ticker = interval(self.token_gc_interval);
        tokio::pin!(shutdown);

        info!(
            crl_interval_secs = self.crl_interval.as_secs(),
            token_gc_interval_secs = self.token_gc_interval.as_secs(),
            "maintenance started"
        );

        loop {
            tokio::select! {
                _ = crl_ticker.tick() => {
                    let service = Arc::clone(&self.service);
                    match tokio::task::spawn_blocking(move || service.refresh_crls()).await {
                        Ok(Ok(crls)) => {
                            stats.crl_refreshes += 1;
                            debug!(crls = crls.len(), "CRLs refreshed");
                        }
                        Ok(Err(e)) => {
                            stats.crl_failures += 1;
                            warn!(error = %e, "CRL refresh failed");
                        }
                        Err(e) => {
                            stats.crl_failures += 1;
                            error!(error = %e, "CRL refresh task failed");
                        }
                    }
                }

                _ = token_ticker.tick() => {
                    let purged = self.service.purge_tokens();
                    if purged > 0 {
                        debug!(purged, "expired download tokens purged");
                    }
                    stats.tokens_purged += purged;
                }

                () = &mut shutdown => {
                    info!("shutdown signal received, stopping maintenance");
                    break;
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certd_pki::{CaKind, PkiConfig, RevocationReason, SubjectOptions};

    fn service() -> Arc<CertsService> {
        Arc::new(CertsService::in_memory(PkiConfig::new()).unwrap())
    }

    #[test]
    fn zero_interval_rejected() {
        let args = ServeArgs {
            crl_interval: 0,
            token_gc_interval: 60,
        };
        assert!(matches!(
            Maintenance::new(service(), &args),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn refreshes_on_start_and_stops_on_shutdown() {
        let service = service();
        let bundle = service
            .issue_cert("device-1", "", &[], SubjectOptions::default())
            .unwrap();
        service
            .revoke_cert(&bundle.serial, RevocationReason::KeyCompromise)
            .unwrap();
        let before = service.generate_crl(CaKind::Intermediate).unwrap().number;

        let args = ServeArgs {
            crl_interval: 3600,
            token_gc_interval: 3600,
        };
        let maintenance = Maintenance::new(Arc::clone(&service), &args).unwrap();
        let stats = maintenance
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert_eq!(stats.crl_refreshes, 1);
        assert_eq!(stats.crl_failures, 0);
        let after = service.generate_crl(CaKind::Intermediate).unwrap();
        assert!(after.number > before);
        assert_eq!(after.entries.len(), 1);
    }
}
