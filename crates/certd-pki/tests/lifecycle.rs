//! Integration tests for the certificate lifecycle engine.
//!
//! These tests verify:
//! 1. Serial uniqueness under concurrent issuance
//! 2. Revocation conflicts and the status state machine
//! 3. Renewal of expired and revoked certificates
//! 4. CSR issuance round trips
//! 5. CRL completeness and numbering
//! 6. OCSP agreement with stored status
//! 7. Durable state across restarts

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::thread;

use certd_pki::types::{KeySource, SubjectAltName, decode_pem, encode_pem};
use certd_pki::{
    CaKind, CaManager, CertStatus, Certificate, CertificateAuthority, CertificateRecord,
    CertificateRepository, CertsService, EntityId, Error, ErrorKind, FileStore, MemoryStore,
    OcspCertStatus, OcspRequest, PageQuery, PkiConfig, RevocationReason, SerialNumber,
    SubjectOptions, bootstrap_authorities, crl::verify_snapshot_encoding, ocsp::CertId,
};
use chrono::{Duration, Utc};
use rcgen::{CertificateParams, DnType, KeyPair, SanType};

// ==================== Helper Functions ====================

fn service_with_store() -> (CertsService, Arc<MemoryStore>) {
    let config = PkiConfig::new();
    let (cas, _) = bootstrap_authorities(&config).unwrap();
    let store = Arc::new(MemoryStore::new());
    let service = CertsService::new(config, Arc::new(cas), store.clone()).unwrap();
    (service, store)
}

fn make_csr(common_name: &str, ips: &[IpAddr]) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.subject_alt_names = ips.iter().map(|ip| SanType::IpAddress(*ip)).collect();
    params.serialize_request(&key).unwrap().pem().unwrap()
}

fn issue(service: &CertsService, entity: &str) -> String {
    service
        .issue_cert(entity, "24h", &[], SubjectOptions::default())
        .unwrap()
        .serial
}

// ==================== Issuance ====================

#[test]
fn concurrent_issuance_yields_unique_serials() {
    let (service, store) = service_with_store();
    let service = Arc::new(service);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                (0..10)
                    .map(|i| issue(&service, &format!("worker-{worker}-{i}")))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let serials: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let unique: HashSet<&String> = serials.iter().collect();
    assert_eq!(serials.len(), 80);
    assert_eq!(unique.len(), 80);
    assert_eq!(store.len(), 80);
}

#[test]
fn issued_certificate_chains_to_root() {
    let (service, _) = service_with_store();
    let bundle = service
        .issue_cert("chain-test", "1h", &[], SubjectOptions::default())
        .unwrap();

    let leaf = Certificate::from_pem_or_der(bundle.certificate_pem.as_bytes()).unwrap();
    let cas = service.cas();
    let chain = vec![
        leaf,
        cas.issuing_ca().certificate().clone(),
        cas.root().certificate().clone(),
    ];
    certd_pki::validate_chain(&chain, Utc::now()).unwrap();
    assert!(bundle.not_after > bundle.not_before);
}

#[test]
fn ttl_above_maximum_rejected() {
    let (service, store) = service_with_store();
    let result = service.issue_cert("device", "100000h", &[], SubjectOptions::default());
    assert!(matches!(result, Err(Error::InvalidTtl { .. })));
    assert!(store.is_empty());
}

#[test]
fn empty_csr_rejected() {
    let (service, store) = service_with_store();
    let result = service.issue_from_csr("device", "1h", "   ");
    assert!(matches!(result, Err(Error::MissingCsr)));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
    assert!(store.is_empty());
}

#[test]
fn csr_issuance_round_trip() {
    let (service, _) = service_with_store();
    let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
    let bundle = service
        .issue_from_csr("device-42", "", &make_csr("device-42", &[ip]))
        .unwrap();

    let cert = Certificate::from_pem_or_der(bundle.certificate_pem.as_bytes()).unwrap();
    assert_eq!(cert.subject(), "device-42");
    assert!(cert.san().contains(&SubjectAltName::Ip(ip)));
    assert_eq!(cert.issuer(), service.cas().issuing_ca().certificate().subject());

    let view = service.view_cert(&bundle.serial).unwrap();
    assert_eq!(view.key_source, KeySource::Csr);
    assert_eq!(view.ip_addresses, vec![ip]);
}

#[test]
fn tampered_csr_rejected() {
    let (service, _) = service_with_store();
    let csr = make_csr("device", &[]);
    let mut der = decode_pem(csr.as_bytes(), "CERTIFICATE REQUEST").unwrap();
    let last = der.len() - 1;
    der[last] ^= 0x01;
    let tampered = encode_pem("CERTIFICATE REQUEST", &der);
    assert!(matches!(
        service.issue_from_csr("device", "1h", &tampered),
        Err(Error::InvalidCsr { .. })
    ));
}

// ==================== Revocation ====================

#[test]
fn double_revoke_is_conflict() {
    let (service, _) = service_with_store();
    let serial = issue(&service, "device");

    service.revoke_cert(&serial, RevocationReason::KeyCompromise).unwrap();
    let again = service.revoke_cert(&serial, RevocationReason::Superseded);
    let err = again.unwrap_err();
    assert!(matches!(err, Error::AlreadyRevoked { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let view = service.view_cert(&serial).unwrap();
    assert_eq!(view.revocation.unwrap().reason, RevocationReason::KeyCompromise);
}

#[test]
fn concurrent_revocations_single_winner() {
    let (service, _) = service_with_store();
    let service = Arc::new(service);
    let serial = issue(&service, "device");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            let serial = serial.clone();
            thread::spawn(move || service.revoke_cert(&serial, RevocationReason::Unspecified))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::AlreadyRevoked { .. }))
    );
}

#[test]
fn revoke_all_unknown_entity() {
    let (service, _) = service_with_store();
    assert!(matches!(
        service.revoke_all("nobody", RevocationReason::Unspecified),
        Err(Error::EntityNotFound { .. })
    ));
}

// ==================== Renewal ====================

fn expired_record(service: &CertsService) -> CertificateRecord {
    let now = Utc::now();
    CertificateRecord {
        serial: SerialNumber::random(),
        entity_id: EntityId::new("old-device").unwrap(),
        ca_id: service.cas().issuing_ca().id(),
        subject: SubjectOptions {
            common_name: "old-device".to_string(),
            ..SubjectOptions::default()
        },
        ip_addresses: Vec::new(),
        der: vec![0x30, 0x00],
        not_before: now - Duration::days(2),
        not_after: now - Duration::days(1),
        status: CertStatus::Active,
        revocation: None,
        key_source: KeySource::Generated,
        created_at: now - Duration::days(2),
    }
}

#[test]
fn expired_certificate_cannot_be_renewed() {
    let (service, store) = service_with_store();
    let record = expired_record(&service);
    store.insert(record.clone()).unwrap();

    let result = service.renew_cert(&record.serial.to_hex());
    assert!(matches!(result, Err(Error::CertificateExpired { .. })));
    assert_eq!(store.len(), 1);
    assert_eq!(service.view_cert(&record.serial.to_hex()).unwrap().status, CertStatus::Expired);
}

#[test]
fn renewal_is_additive() {
    let (service, store) = service_with_store();
    let serial = issue(&service, "device");
    let renewed = service.renew_cert(&serial).unwrap();

    assert_ne!(renewed.serial, serial);
    assert_eq!(renewed.entity_id, "device");
    assert!(renewed.private_key_pem.is_some());
    assert_eq!(store.len(), 2);
    assert_eq!(service.view_cert(&serial).unwrap().status, CertStatus::Active);
}

// ==================== CRL ====================

#[test]
fn crl_lists_exactly_revoked_unexpired() {
    let (service, _) = service_with_store();
    let serials: Vec<String> = (0..6).map(|i| issue(&service, &format!("d{i}"))).collect();
    for serial in serials.iter().step_by(2) {
        service.revoke_cert(serial, RevocationReason::KeyCompromise).unwrap();
    }

    let crl = service.generate_crl(CaKind::Intermediate).unwrap();
    verify_snapshot_encoding(&crl).unwrap();
    for (i, serial) in serials.iter().enumerate() {
        let serial: SerialNumber = serial.parse().unwrap();
        assert_eq!(crl.contains(&serial), i % 2 == 0, "serial {i}");
    }
}

#[test]
fn crl_numbers_increase_across_revocations() {
    let (service, _) = service_with_store();
    let mut numbers = Vec::new();
    for i in 0..4 {
        let serial = issue(&service, &format!("d{i}"));
        let outcome = service.revoke_cert(&serial, RevocationReason::Unspecified).unwrap();
        numbers.push(outcome.crl_number.unwrap());
    }
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));

    let refreshed = service.refresh_crls().unwrap();
    assert_eq!(refreshed.len(), 2);
    let intermediate = service.cas().issuing_ca().id();
    let latest = refreshed.iter().find(|crl| crl.ca_id == intermediate).unwrap();
    assert!(latest.number > numbers[3]);
    assert_eq!(latest.entries.len(), 4);
}

// ==================== OCSP ====================

#[test]
fn ocsp_agrees_with_store() {
    let (service, store) = service_with_store();
    let serials: Vec<String> = (0..5).map(|i| issue(&service, &format!("o{i}"))).collect();
    service.revoke_cert(&serials[1], RevocationReason::CaCompromise).unwrap();
    service.revoke_cert(&serials[3], RevocationReason::Superseded).unwrap();

    let issuer = service.cas().issuing_ca().certificate().pem();
    for serial in &serials {
        let status = service.ocsp(serial, issuer.as_bytes()).unwrap().status().unwrap();
        let record = store.get(&serial.parse().unwrap()).unwrap();
        match record.status {
            CertStatus::Revoked => assert!(matches!(status, OcspCertStatus::Revoked { .. })),
            _ => assert_eq!(status, OcspCertStatus::Good),
        }
    }

    let unknown = SerialNumber::random().to_hex();
    let status = service.ocsp(&unknown, issuer.as_bytes()).unwrap().status();
    assert_eq!(status, Some(OcspCertStatus::Unknown));
}

#[test]
fn ocsp_der_round_trip() {
    let (service, _) = service_with_store();
    let serial: SerialNumber = issue(&service, "device").parse().unwrap();
    let cert_id = CertId::new(serial, service.cas().issuing_ca().certificate()).unwrap();

    let response = service
        .ocsp_der(&OcspRequest::new(vec![cert_id]).to_der())
        .unwrap();
    // OCSPResponse SEQUENCE { ENUMERATED successful(0), [0] ... }
    assert_eq!(&response[..1], &[0x30]);
    assert!(response.windows(3).any(|w| w == [0x0a, 0x01, 0x00]));
}

// ==================== Durability ====================

#[test]
fn file_store_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("certs.json");
    let config = PkiConfig::new();
    let (cas, identities) = bootstrap_authorities(&config).unwrap();

    let serial = {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let service = CertsService::new(config.clone(), Arc::new(cas), store).unwrap();
        let serial = issue(&service, "persistent");
        service.revoke_cert(&serial, RevocationReason::KeyCompromise).unwrap();
        serial
    };

    let root = CertificateAuthority::from_existing(
        CaKind::Root,
        identities[0].certificate.clone(),
        &identities[0].private_key,
    )
    .unwrap();
    let cas = CaManager::new(root).unwrap();
    cas.register_intermediate(&identities[1]).unwrap();

    let store = Arc::new(FileStore::open(&path).unwrap());
    let service = CertsService::new(config, Arc::new(cas), store).unwrap();
    assert_eq!(service.view_cert(&serial).unwrap().status, CertStatus::Revoked);

    let page = service
        .list_certs(&PageQuery::default().entity(EntityId::new("persistent").unwrap()))
        .unwrap();
    assert_eq!(page.total, 1);

    let crl = service.generate_crl(CaKind::Intermediate).unwrap();
    assert!(crl.number >= 1);
    assert!(crl.contains(&serial.parse().unwrap()));
}
