//! Certificate revocation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::crl::CrlGenerator;
use crate::error::{Error, Result};
use crate::store::CertificateRepository;
use crate::types::{CaId, CertStatus, EntityId, Revocation, RevocationReason, SerialNumber};

/// Result of a successful revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationOutcome {
    /// The revoked serial.
    pub serial: SerialNumber,
    /// Status after the operation; always `revoked`.
    pub status: CertStatus,
    /// Recorded revocation time.
    pub revoked_at: DateTime<Utc>,
    /// Recorded reason.
    pub reason: RevocationReason,
    /// Number of the CRL regenerated afterwards, if regeneration succeeded.
    pub crl_number: Option<u64>,
}

/// Transitions certificates to `revoked` and refreshes CRLs.
pub struct Revoker {
    store: Arc<dyn CertificateRepository>,
    crls: Arc<CrlGenerator>,
}

impl Revoker {
    /// Creates a revoker over a store and CRL generator.
    #[must_use]
    pub fn new(store: Arc<dyn CertificateRepository>, crls: Arc<CrlGenerator>) -> Self {
        Self { store, crls }
    }

    /// Revokes one certificate.
    ///
    /// A second revocation of the same serial fails with
    /// [`Error::AlreadyRevoked`] and changes nothing.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`], [`Error::AlreadyRevoked`],
    /// [`Error::CertificateExpired`] or a persistence error.
    pub fn revoke(&self, serial: &SerialNumber, reason: RevocationReason) -> Result<RevocationOutcome> {
        let now = Utc::now().trunc_subsecs(0);
        let record = self.store.get(serial)?;
        if record.status == CertStatus::Revoked {
            return Err(Error::AlreadyRevoked {
                serial: serial.to_hex(),
            });
        }
        if record.is_expired_at(now) {
            return Err(Error::CertificateExpired {
                serial: serial.to_hex(),
            });
        }

        let revocation = Revocation {
            revoked_at: now,
            reason,
        };
        let updated = self
            .store
            .compare_and_set_status(serial, CertStatus::Active, CertStatus::Revoked, Some(revocation))
            .inspect_err(|e| {
                if matches!(e, Error::AlreadyRevoked { .. }) {
                    warn!(serial = %serial, "lost revocation race");
                }
            })?;

        info!(serial = %serial, entity_id = %updated.entity_id, reason = %reason, "certificate revoked");

        let crl_number = self.refresh_crl(updated.ca_id);
        Ok(RevocationOutcome {
            serial: serial.clone(),
            status: updated.status,
            revoked_at: now,
            reason,
            crl_number,
        })
    }

    /// Revokes every active certificate of an entity.
    ///
    /// Returns the serials this call revoked, in insertion order.
    ///
    /// # Errors
    ///
    /// [`Error::EntityNotFound`] if the entity has no certificates at all.
    pub fn revoke_entity(&self, entity_id: &str, reason: RevocationReason) -> Result<Vec<SerialNumber>> {
        let entity_id = EntityId::new(entity_id)?;
        let records = self.store.list_by_entity(&entity_id)?;
        if records.is_empty() {
            return Err(Error::EntityNotFound {
                entity_id: entity_id.to_string(),
            });
        }

        let now = Utc::now().trunc_subsecs(0);
        let mut revoked = Vec::new();
        let mut touched = BTreeSet::new();
        for record in records {
            if record.effective_status(now) != CertStatus::Active {
                continue;
            }
            let revocation = Revocation {
                revoked_at: now,
                reason,
            };
            match self.store.compare_and_set_status(
                &record.serial,
                CertStatus::Active,
                CertStatus::Revoked,
                Some(revocation),
            ) {
                Ok(_) => {
                    touched.insert(record.ca_id);
                    revoked.push(record.serial);
                }
                Err(Error::AlreadyRevoked { .. }) => {
                    warn!(serial = %record.serial, "revoked concurrently");
                }
                Err(e) => return Err(e),
            }
        }

        info!(entity_id = %entity_id, revoked = revoked.len(), "entity certificates revoked");
        for ca_id in touched {
            self.refresh_crl(ca_id);
        }
        Ok(revoked)
    }

    /// The revocation is already durable; a CRL failure here is logged and
    /// retried by the next revocation or scheduled refresh.
    fn refresh_crl(&self, ca_id: CaId) -> Option<u64> {
        match self.crls.generate(ca_id) {
            Ok(snapshot) => Some(snapshot.number),
            Err(e) => {
                error!(ca_id = %ca_id, error = %e, "CRL regeneration after revocation failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for Revoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Revoker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{CaManager, CertificateAuthority};
    use crate::config::PkiConfig;
    use crate::store::MemoryStore;
    use crate::store::tests::record;
    use chrono::Duration;

    struct Fixture {
        revoker: Revoker,
        store: Arc<MemoryStore>,
        crls: Arc<CrlGenerator>,
        ca_id: CaId,
    }

    fn fixture() -> Fixture {
        let (root, _) = CertificateAuthority::new_root(&PkiConfig::new()).unwrap();
        let cas = Arc::new(CaManager::new(root).unwrap());
        let ca_id = cas.root().id();
        let store = Arc::new(MemoryStore::new());
        let crls = Arc::new(CrlGenerator::new(cas, store.clone(), Duration::hours(1)));
        let revoker = Revoker::new(store.clone(), Arc::clone(&crls));
        Fixture {
            revoker,
            store,
            crls,
            ca_id,
        }
    }

    #[test]
    fn revoke_then_revoke_again() {
        let f = fixture();
        let rec = record("device", f.ca_id, Utc::now() + Duration::days(1));
        f.store.insert(rec.clone()).unwrap();

        let outcome = f.revoker.revoke(&rec.serial, RevocationReason::KeyCompromise).unwrap();
        assert_eq!(outcome.status, CertStatus::Revoked);
        assert_eq!(outcome.crl_number, Some(1));

        let again = f.revoker.revoke(&rec.serial, RevocationReason::KeyCompromise);
        assert!(matches!(again, Err(Error::AlreadyRevoked { .. })));
        assert_eq!(again.unwrap_err().kind(), crate::error::ErrorKind::Conflict);

        let stored = f.store.get(&rec.serial).unwrap();
        assert_eq!(stored.status, CertStatus::Revoked);
        assert_eq!(stored.revocation.unwrap().reason, RevocationReason::KeyCompromise);
    }

    #[test]
    fn revoke_regenerates_crl() {
        let f = fixture();
        let rec = record("device", f.ca_id, Utc::now() + Duration::days(1));
        f.store.insert(rec.clone()).unwrap();

        f.revoker.revoke(&rec.serial, RevocationReason::Superseded).unwrap();
        let latest = f.crls.latest_or_generate(f.ca_id).unwrap();
        assert!(latest.contains(&rec.serial));
    }

    #[test]
    fn revoke_unknown_serial() {
        let f = fixture();
        assert!(matches!(
            f.revoker.revoke(&SerialNumber::random(), RevocationReason::Unspecified),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn revoke_expired_rejected() {
        let f = fixture();
        let rec = record("device", f.ca_id, Utc::now() - Duration::hours(1));
        f.store.insert(rec.clone()).unwrap();

        assert!(matches!(
            f.revoker.revoke(&rec.serial, RevocationReason::Unspecified),
            Err(Error::CertificateExpired { .. })
        ));
        assert_eq!(f.store.get(&rec.serial).unwrap().status, CertStatus::Active);
    }

    #[test]
    fn revoke_entity_revokes_only_active() {
        let f = fixture();
        let future = Utc::now() + Duration::days(1);
        let a = record("device", f.ca_id, future);
        let b = record("device", f.ca_id, future);
        let expired = record("device", f.ca_id, Utc::now() - Duration::hours(1));
        let other = record("other", f.ca_id, future);
        for rec in [&a, &b, &expired, &other] {
            f.store.insert(rec.clone()).unwrap();
        }
        f.revoker.revoke(&b.serial, RevocationReason::Unspecified).unwrap();

        let revoked = f
            .revoker
            .revoke_entity("device", RevocationReason::CessationOfOperation)
            .unwrap();
        assert_eq!(revoked, vec![a.serial.clone()]);
        assert_eq!(f.store.get(&other.serial).unwrap().status, CertStatus::Active);
        assert_eq!(f.store.get(&expired.serial).unwrap().status, CertStatus::Active);
    }

    #[test]
    fn revoke_entity_unknown() {
        let f = fixture();
        assert!(matches!(
            f.revoker.revoke_entity("ghost", RevocationReason::Unspecified),
            Err(Error::EntityNotFound { .. })
        ));
        assert!(matches!(
            f.revoker.revoke_entity("", RevocationReason::Unspecified),
            Err(Error::InvalidEntityId { .. })
        ));
    }
}
