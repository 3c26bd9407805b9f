//! Certificate storage implementations.

// Guards are held across whole operations so each one is atomic.
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{
    CaId, CertStatus, CertificatePage, CertificateRecord, CrlSnapshot, EntityId, PageQuery,
    Revocation, SerialNumber,
};

/// Number of CRL generations retained per CA.
pub const CRL_HISTORY_LIMIT: usize = 32;

/// Durable record of certificates and CRLs.
///
/// Every mutation is a single named operation that either commits completely
/// or leaves the store unchanged.
pub trait CertificateRepository: Send + Sync {
    /// Inserts a new record.
    ///
    /// Fails with [`Error::SerialExists`] if the serial is already present.
    fn insert(&self, record: CertificateRecord) -> Result<()>;

    /// Fetches a record by serial.
    fn get(&self, serial: &SerialNumber) -> Result<CertificateRecord>;

    /// Moves a record from `expected` to `next` if and only if its stored
    /// status is currently `expected`.
    fn compare_and_set_status(
        &self,
        serial: &SerialNumber,
        expected: CertStatus,
        next: CertStatus,
        revocation: Option<Revocation>,
    ) -> Result<CertificateRecord>;

    /// Lists records in insertion order, filtered by entity and effective status.
    fn list(&self, query: &PageQuery, now: DateTime<Utc>) -> Result<CertificatePage>;

    /// Revoked records of a CA that have not expired at `now`.
    fn list_revoked(&self, ca_id: CaId, now: DateTime<Utc>) -> Result<Vec<CertificateRecord>>;

    /// All records of an entity in insertion order.
    fn list_by_entity(&self, entity_id: &EntityId) -> Result<Vec<CertificateRecord>>;

    /// Atomically reserves the next CRL number of a CA.
    fn next_crl_number(&self, ca_id: CaId) -> Result<u64>;

    /// Reserves the next CRL number and lists the CA's revoked, unexpired
    /// records at `now` in one operation.
    ///
    /// A higher number therefore always reflects a later or equal revocation
    /// state.
    fn begin_crl(&self, ca_id: CaId, now: DateTime<Utc>) -> Result<(u64, Vec<CertificateRecord>)>;

    /// Appends a CRL generation to the CA's history.
    fn append_crl(&self, snapshot: CrlSnapshot) -> Result<()>;

    /// Highest-numbered CRL of a CA, if any.
    fn latest_crl(&self, ca_id: CaId) -> Result<Option<CrlSnapshot>>;
}

/// Serializable contents shared by both stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    /// Records in insertion order.
    records: Vec<CertificateRecord>,
    /// Last reserved CRL number per CA.
    crl_numbers: HashMap<CaId, u64>,
    /// CRL history per CA, ascending by number.
    crls: HashMap<CaId, Vec<CrlSnapshot>>,
    #[serde(skip)]
    index: HashMap<SerialNumber, usize>,
}

impl StoreState {
    fn reindex(&mut self) -> Result<()> {
        self.index.clear();
        for (pos, record) in self.records.iter().enumerate() {
            if self.index.insert(record.serial.clone(), pos).is_some() {
                return Err(Error::storage(format!(
                    "duplicate serial {} in snapshot",
                    record.serial
                )));
            }
        }
        Ok(())
    }

    fn get(&self, serial: &SerialNumber) -> Result<&CertificateRecord> {
        self.index
            .get(serial)
            .map(|pos| &self.records[*pos])
            .ok_or_else(|| Error::NotFound {
                serial: serial.to_hex(),
            })
    }

    fn insert(&mut self, record: CertificateRecord) -> Result<()> {
        if self.index.contains_key(&record.serial) {
            return Err(Error::SerialExists {
                serial: record.serial.to_hex(),
            });
        }
        self.index.insert(record.serial.clone(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    fn compare_and_set(
        &mut self,
        serial: &SerialNumber,
        expected: CertStatus,
        next: CertStatus,
        revocation: Option<Revocation>,
    ) -> Result<CertificateRecord> {
        let pos = *self.index.get(serial).ok_or_else(|| Error::NotFound {
            serial: serial.to_hex(),
        })?;
        let record = &mut self.records[pos];

        if record.status != expected {
            return Err(match record.status {
                CertStatus::Revoked => Error::AlreadyRevoked {
                    serial: serial.to_hex(),
                },
                CertStatus::Expired => Error::CertificateExpired {
                    serial: serial.to_hex(),
                },
                CertStatus::Active => Error::IllegalTransition {
                    serial: serial.to_hex(),
                    from: expected.to_string(),
                    to: next.to_string(),
                },
            });
        }
        if !expected.can_transition_to(next) {
            return Err(Error::IllegalTransition {
                serial: serial.to_hex(),
                from: expected.to_string(),
                to: next.to_string(),
            });
        }

        record.status = next;
        if next == CertStatus::Revoked {
            record.revocation = revocation;
        }
        Ok(record.clone())
    }

    fn list(&self, query: &PageQuery, now: DateTime<Utc>) -> CertificatePage {
        let matching = self.records.iter().filter(|record| {
            query
                .entity_id
                .as_ref()
                .is_none_or(|entity| &record.entity_id == entity)
                && query
                    .status
                    .is_none_or(|status| record.effective_status(now) == status)
        });

        let mut total = 0u64;
        let mut certificates = Vec::new();
        for record in matching {
            if total >= query.offset && (certificates.len() as u64) < query.limit {
                certificates.push(record.clone());
            }
            total += 1;
        }

        CertificatePage {
            total,
            offset: query.offset,
            limit: query.limit,
            certificates,
        }
    }

    fn list_revoked(&self, ca_id: CaId, now: DateTime<Utc>) -> Vec<CertificateRecord> {
        self.records
            .iter()
            .filter(|r| r.ca_id == ca_id && r.status == CertStatus::Revoked && !r.is_expired_at(now))
            .cloned()
            .collect()
    }

    fn list_by_entity(&self, entity_id: &EntityId) -> Vec<CertificateRecord> {
        self.records
            .iter()
            .filter(|r| &r.entity_id == entity_id)
            .cloned()
            .collect()
    }

    fn next_crl_number(&mut self, ca_id: CaId) -> u64 {
        let number = self.crl_numbers.entry(ca_id).or_insert(0);
        *number += 1;
        *number
    }

    fn begin_crl(&mut self, ca_id: CaId, now: DateTime<Utc>) -> (u64, Vec<CertificateRecord>) {
        let revoked = self.list_revoked(ca_id, now);
        (self.next_crl_number(ca_id), revoked)
    }

    fn append_crl(&mut self, snapshot: CrlSnapshot) {
        let history = self.crls.entry(snapshot.ca_id).or_default();
        // Concurrent generators may finish out of order; keep history sorted.
        let pos = history.partition_point(|s| s.number < snapshot.number);
        history.insert(pos, snapshot);
        if history.len() > CRL_HISTORY_LIMIT {
            let excess = history.len() - CRL_HISTORY_LIMIT;
            history.drain(..excess);
        }
    }

    fn latest_crl(&self, ca_id: CaId) -> Option<CrlSnapshot> {
        self.crls.get(&ca_id).and_then(|h| h.last()).cloned()
    }
}

/// Read access plus all-or-nothing mutation over a [`StoreState`].
trait StateCell: Send + Sync {
    fn read(&self) -> RwLockReadGuard<'_, StoreState>;

    fn apply<T>(&self, op: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T>;
}

impl<S: StateCell> CertificateRepository for S {
    fn insert(&self, record: CertificateRecord) -> Result<()> {
        let serial = record.serial.clone();
        let entity = record.entity_id.clone();
        self.apply(|state| state.insert(record))?;
        debug!(serial = %serial, entity_id = %entity, "certificate stored");
        Ok(())
    }

    fn get(&self, serial: &SerialNumber) -> Result<CertificateRecord> {
        self.read().get(serial).cloned()
    }

    fn compare_and_set_status(
        &self,
        serial: &SerialNumber,
        expected: CertStatus,
        next: CertStatus,
        revocation: Option<Revocation>,
    ) -> Result<CertificateRecord> {
        self.apply(|state| state.compare_and_set(serial, expected, next, revocation))
    }

    fn list(&self, query: &PageQuery, now: DateTime<Utc>) -> Result<CertificatePage> {
        query.validate()?;
        Ok(self.read().list(query, now))
    }

    fn list_revoked(&self, ca_id: CaId, now: DateTime<Utc>) -> Result<Vec<CertificateRecord>> {
        Ok(self.read().list_revoked(ca_id, now))
    }

    fn list_by_entity(&self, entity_id: &EntityId) -> Result<Vec<CertificateRecord>> {
        Ok(self.read().list_by_entity(entity_id))
    }

    fn next_crl_number(&self, ca_id: CaId) -> Result<u64> {
        self.apply(|state| Ok(state.next_crl_number(ca_id)))
    }

    fn begin_crl(&self, ca_id: CaId, now: DateTime<Utc>) -> Result<(u64, Vec<CertificateRecord>)> {
        self.apply(|state| Ok(state.begin_crl(ca_id, now)))
    }

    fn append_crl(&self, snapshot: CrlSnapshot) -> Result<()> {
        self.apply(|state| {
            state.append_crl(snapshot);
            Ok(())
        })
    }

    fn latest_crl(&self, ca_id: CaId) -> Result<Option<CrlSnapshot>> {
        Ok(self.read().latest_crl(ca_id))
    }
}

/// In-memory certificate store.
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Returns the number of stored certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Returns true if the store holds no certificates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell for MemoryStore {
    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read()
    }

    fn apply<T>(&self, op: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        // Every StoreState mutation validates before it writes, so a failed
        // op leaves the state untouched.
        op(&mut self.state.write())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("certificates", &self.len())
            .finish()
    }
}

/// Certificate store persisted as a JSON snapshot file.
///
/// Each mutation is applied to a copy of the state, written to a temporary
/// file, renamed over the snapshot, and only then made visible. A failed
/// write leaves both the file and the in-memory state as they were.
pub struct FileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl FileStore {
    /// Opens the snapshot at `path`, creating an empty store if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let bytes = fs::read(&path)
                .map_err(|e| Error::storage(format!("failed to read {}: {e}", path.display())))?;
            let mut state: StoreState = serde_json::from_slice(&bytes)
                .map_err(|e| Error::storage(format!("corrupt snapshot {}: {e}", path.display())))?;
            state.reindex()?;
            info!(path = %path.display(), certificates = state.records.len(), "loaded certificate store");
            state
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::storage(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
            info!(path = %path.display(), "created certificate store");
            StoreState::default()
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of stored certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Returns true if the store holds no certificates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_snapshot(&self, state: &StoreState) -> Result<()> {
        let bytes = serde_json::to_vec(state)
            .map_err(|e| Error::storage(format!("failed to encode snapshot: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");

        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        result.map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "snapshot write failed");
            let _ = fs::remove_file(&tmp);
            Error::storage(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}

impl StateCell for FileStore {
    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read()
    }

    fn apply<T>(&self, op: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut guard = self.state.write();
        let mut next = guard.clone();
        let out = op(&mut next)?;
        self.write_snapshot(&next)?;
        *guard = next;
        Ok(out)
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("certificates", &self.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{KeySource, RevocationReason, SubjectOptions};
    use chrono::Duration;

    pub(crate) fn record(entity: &str, ca_id: CaId, not_after: DateTime<Utc>) -> CertificateRecord {
        let now = Utc::now();
        CertificateRecord {
            serial: SerialNumber::random(),
            entity_id: EntityId::new(entity).unwrap(),
            ca_id,
            subject: SubjectOptions::default(),
            ip_addresses: Vec::new(),
            der: vec![0x30, 0x00],
            not_before: now - Duration::hours(1),
            not_after,
            status: CertStatus::Active,
            revocation: None,
            key_source: KeySource::Generated,
            created_at: now,
        }
    }

    fn revocation() -> Option<Revocation> {
        Some(Revocation {
            revoked_at: Utc::now(),
            reason: RevocationReason::KeyCompromise,
        })
    }

    fn future() -> DateTime<Utc> {
        Utc::now() + Duration::days(30)
    }

    #[test]
    fn insert_and_get() {
        let store = MemoryStore::new();
        let rec = record("device-1", CaId::new(), future());
        store.insert(rec.clone()).unwrap();

        assert_eq!(store.get(&rec.serial).unwrap(), rec);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_serial_rejected() {
        let store = MemoryStore::new();
        let rec = record("device-1", CaId::new(), future());
        store.insert(rec.clone()).unwrap();

        let result = store.insert(rec);
        assert!(matches!(result, Err(Error::SerialExists { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get(&SerialNumber::random()),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn compare_and_set_revokes_once() {
        let store = MemoryStore::new();
        let rec = record("device-1", CaId::new(), future());
        store.insert(rec.clone()).unwrap();

        let updated = store
            .compare_and_set_status(&rec.serial, CertStatus::Active, CertStatus::Revoked, revocation())
            .unwrap();
        assert_eq!(updated.status, CertStatus::Revoked);
        assert!(updated.revocation.is_some());

        let again = store.compare_and_set_status(
            &rec.serial,
            CertStatus::Active,
            CertStatus::Revoked,
            revocation(),
        );
        assert!(matches!(again, Err(Error::AlreadyRevoked { .. })));
    }

    #[test]
    fn illegal_transition_rejected() {
        let store = MemoryStore::new();
        let rec = record("device-1", CaId::new(), future());
        store.insert(rec.clone()).unwrap();
        store
            .compare_and_set_status(&rec.serial, CertStatus::Active, CertStatus::Revoked, revocation())
            .unwrap();

        let result =
            store.compare_and_set_status(&rec.serial, CertStatus::Revoked, CertStatus::Active, None);
        assert!(matches!(result, Err(Error::IllegalTransition { .. })));
        assert_eq!(store.get(&rec.serial).unwrap().status, CertStatus::Revoked);
    }

    #[test]
    fn list_paginates_in_insertion_order() {
        let store = MemoryStore::new();
        let ca = CaId::new();
        let serials: Vec<_> = (0..5)
            .map(|i| {
                let rec = record(&format!("device-{i}"), ca, future());
                store.insert(rec.clone()).unwrap();
                rec.serial
            })
            .collect();

        let page = store.list(&PageQuery::new(1, 2), Utc::now()).unwrap();
        assert_eq!(page.total, 5);
        let got: Vec<_> = page.certificates.iter().map(|r| r.serial.clone()).collect();
        assert_eq!(got, serials[1..3].to_vec());
    }

    #[test]
    fn list_filters_by_entity_and_status() {
        let store = MemoryStore::new();
        let ca = CaId::new();
        let expired = record("device-a", ca, Utc::now() - Duration::days(1));
        store.insert(expired).unwrap();
        store.insert(record("device-a", ca, future())).unwrap();
        store.insert(record("device-b", ca, future())).unwrap();

        let query = PageQuery::default()
            .entity(EntityId::new("device-a").unwrap())
            .status(CertStatus::Active);
        let page = store.list(&query, Utc::now()).unwrap();
        assert_eq!(page.total, 1);

        let query = PageQuery::default().status(CertStatus::Expired);
        assert_eq!(store.list(&query, Utc::now()).unwrap().total, 1);
    }

    #[test]
    fn list_rejects_bad_limit() {
        let store = MemoryStore::new();
        let result = store.list(&PageQuery::new(0, 0), Utc::now());
        assert!(matches!(result, Err(Error::InvalidQueryParams { .. })));
    }

    #[test]
    fn list_revoked_skips_expired_and_other_cas() {
        let store = MemoryStore::new();
        let ca = CaId::new();
        let live = record("a", ca, future());
        let expired = record("b", ca, Utc::now() + Duration::seconds(1));
        let other_ca = record("c", CaId::new(), future());
        for rec in [&live, &expired, &other_ca] {
            store.insert(rec.clone()).unwrap();
            store
                .compare_and_set_status(&rec.serial, CertStatus::Active, CertStatus::Revoked, revocation())
                .unwrap();
        }

        let revoked = store.list_revoked(ca, Utc::now() + Duration::seconds(5)).unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].serial, live.serial);
    }

    #[test]
    fn begin_crl_reserves_number_with_revoked_set() {
        let store = MemoryStore::new();
        let ca = CaId::new();
        let rec = record("a", ca, future());
        store.insert(rec.clone()).unwrap();

        let (first, revoked) = store.begin_crl(ca, Utc::now()).unwrap();
        assert_eq!(first, 1);
        assert!(revoked.is_empty());

        store
            .compare_and_set_status(&rec.serial, CertStatus::Active, CertStatus::Revoked, revocation())
            .unwrap();
        let (second, revoked) = store.begin_crl(ca, Utc::now()).unwrap();
        assert_eq!(second, 2);
        assert_eq!(revoked.len(), 1);
        assert_eq!(store.next_crl_number(ca).unwrap(), 3);
    }

    #[test]
    fn crl_numbers_increase_per_ca() {
        let store = MemoryStore::new();
        let a = CaId::new();
        let b = CaId::new();
        assert_eq!(store.next_crl_number(a).unwrap(), 1);
        assert_eq!(store.next_crl_number(a).unwrap(), 2);
        assert_eq!(store.next_crl_number(b).unwrap(), 1);
    }

    fn snapshot(ca_id: CaId, number: u64) -> CrlSnapshot {
        CrlSnapshot {
            ca_id,
            number,
            this_update: Utc::now(),
            next_update: Utc::now(),
            entries: Vec::new(),
            der: Vec::new(),
        }
    }

    #[test]
    fn latest_crl_is_highest_number() {
        let store = MemoryStore::new();
        let ca = CaId::new();
        assert!(store.latest_crl(ca).unwrap().is_none());

        store.append_crl(snapshot(ca, 2)).unwrap();
        store.append_crl(snapshot(ca, 1)).unwrap();
        assert_eq!(store.latest_crl(ca).unwrap().unwrap().number, 2);
    }

    #[test]
    fn crl_history_is_bounded() {
        let store = MemoryStore::new();
        let ca = CaId::new();
        for n in 1..=(CRL_HISTORY_LIMIT as u64 + 5) {
            store.append_crl(snapshot(ca, n)).unwrap();
        }
        assert_eq!(store.state.read().crls[&ca].len(), CRL_HISTORY_LIMIT);
        assert_eq!(
            store.latest_crl(ca).unwrap().unwrap().number,
            CRL_HISTORY_LIMIT as u64 + 5
        );
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certs.json");
        let ca = CaId::new();
        let rec = record("device-1", ca, future());

        {
            let store = FileStore::open(&path).unwrap();
            store.insert(rec.clone()).unwrap();
            store
                .compare_and_set_status(&rec.serial, CertStatus::Active, CertStatus::Revoked, revocation())
                .unwrap();
            store.next_crl_number(ca).unwrap();
            store.append_crl(snapshot(ca, 1)).unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        let loaded = reopened.get(&rec.serial).unwrap();
        assert_eq!(loaded.status, CertStatus::Revoked);
        assert_eq!(reopened.next_crl_number(ca).unwrap(), 2);
        assert_eq!(reopened.latest_crl(ca).unwrap().unwrap().number, 1);
    }

    #[test]
    fn file_store_failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("certs.json");
        let store = FileStore::open(&path).unwrap();
        store.insert(record("device-1", CaId::new(), future())).unwrap();

        // Removing the directory makes the next snapshot write fail.
        fs::remove_dir_all(dir.path().join("state")).unwrap();
        let result = store.insert(record("device-2", CaId::new(), future()));

        assert!(matches!(result, Err(Error::Storage { .. })));
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn file_store_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certs.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(FileStore::open(&path), Err(Error::Storage { .. })));
    }
}
