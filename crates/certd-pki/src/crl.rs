//! CRL generation.

use std::sync::Arc;

use chrono::{Duration, SubsecRound, Utc};
use rcgen::{CertificateRevocationListParams, KeyIdMethod, RevokedCertParams};
use tracing::{debug, info};

use crate::ca::{CaManager, rcgen_serial};
use crate::error::{Error, Result};
use crate::keys::to_rcgen_time;
use crate::store::CertificateRepository;
use crate::types::{CaId, CrlEntry, CrlSnapshot, RevocationReason, SerialNumber};

/// Produces signed CRL snapshots from current store state.
pub struct CrlGenerator {
    cas: Arc<CaManager>,
    store: Arc<dyn CertificateRepository>,
    validity: Duration,
}

impl CrlGenerator {
    /// Creates a generator whose CRLs are valid for `validity`.
    #[must_use]
    pub fn new(cas: Arc<CaManager>, store: Arc<dyn CertificateRepository>, validity: Duration) -> Self {
        Self {
            cas,
            store,
            validity,
        }
    }

    /// Generates, signs and records the next CRL of a CA.
    ///
    /// Entries are every revoked, unexpired certificate of the CA in
    /// ascending serial order.
    ///
    /// # Errors
    ///
    /// [`Error::CaNotFound`] for unknown CAs, signing or persistence errors.
    pub fn generate(&self, ca_id: CaId) -> Result<CrlSnapshot> {
        let ca = self.cas.get(ca_id)?;
        let now = Utc::now();

        let (number, mut revoked) = self.store.begin_crl(ca_id, now)?;
        revoked.sort_by(|a, b| a.serial.cmp(&b.serial));
        let entries: Vec<CrlEntry> = revoked
            .into_iter()
            .map(|record| {
                let (revoked_at, reason) = record
                    .revocation
                    .map_or((record.created_at, RevocationReason::Unspecified), |r| {
                        (r.revoked_at, r.reason)
                    });
                CrlEntry {
                    serial: record.serial,
                    revoked_at: revoked_at.trunc_subsecs(0),
                    reason,
                }
            })
            .collect();

        let this_update = now.trunc_subsecs(0);
        let next_update = this_update + self.validity;

        let params = CertificateRevocationListParams {
            this_update: to_rcgen_time(this_update)?,
            next_update: to_rcgen_time(next_update)?,
            crl_number: rcgen_serial(&SerialNumber::from_bytes(&number.to_be_bytes())),
            issuing_distribution_point: None,
            revoked_certs: entries
                .iter()
                .map(|entry| {
                    Ok(RevokedCertParams {
                        serial_number: rcgen_serial(&entry.serial),
                        revocation_time: to_rcgen_time(entry.revoked_at)?,
                        // RFC 5280 asks for the extension to be absent when unspecified.
                        reason_code: (entry.reason != RevocationReason::Unspecified)
                            .then(|| entry.reason.to_rcgen()),
                        invalidity_date: None,
                    })
                })
                .collect::<Result<_>>()?,
            key_identifier_method: KeyIdMethod::Sha256,
        };

        let der = ca.sign_crl(params)?;
        let snapshot = CrlSnapshot {
            ca_id,
            number,
            this_update,
            next_update,
            entries,
            der,
        };
        self.store.append_crl(snapshot.clone())?;

        info!(
            ca_id = %ca_id,
            crl_number = number,
            entries = snapshot.entries.len(),
            next_update = %next_update,
            "CRL generated"
        );
        Ok(snapshot)
    }

    /// Returns the latest CRL of a CA, generating one if none exists or
    /// the latest is past its `next_update`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`CrlGenerator::generate`].
    pub fn latest_or_generate(&self, ca_id: CaId) -> Result<CrlSnapshot> {
        match self.store.latest_crl(ca_id)? {
            Some(snapshot) if snapshot.next_update > Utc::now() => {
                debug!(ca_id = %ca_id, crl_number = snapshot.number, "serving cached CRL");
                Ok(snapshot)
            }
            _ => self.generate(ca_id),
        }
    }

    /// Regenerates the CRL of every registered CA.
    ///
    /// # Errors
    ///
    /// Returns the first failure; CAs before it keep their new CRLs.
    pub fn refresh_all(&self) -> Result<Vec<CrlSnapshot>> {
        self.cas
            .authorities()
            .iter()
            .map(|ca| self.generate(ca.id()))
            .collect()
    }
}

impl std::fmt::Debug for CrlGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrlGenerator")
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

/// Checks that a DER CRL parses and lists exactly the snapshot's serials.
///
/// # Errors
///
/// Returns [`Error::Parse`] on any mismatch.
pub fn verify_snapshot_encoding(snapshot: &CrlSnapshot) -> Result<()> {
    let (_, crl) = x509_parser::parse_x509_crl(&snapshot.der)
        .map_err(|e| Error::parse(format!("failed to parse CRL: {e}")))?;
    let encoded: Vec<SerialNumber> = crl
        .iter_revoked_certificates()
        .map(|revoked| SerialNumber::from_bytes(revoked.raw_serial()))
        .collect();
    let expected: Vec<SerialNumber> = snapshot.entries.iter().map(|e| e.serial.clone()).collect();
    if encoded != expected {
        return Err(Error::parse("CRL entries do not match snapshot"));
    }
    Ok(())
}
