//! End-to-end workflow over a real state directory.

use std::sync::Arc;

use certd::cli::{Commands, DownloadTarget, Format, IssueArgs};
use certd::commands::CertsCommand;
use certd::output::OutputFormat;
use certd::state::StateDir;
use certd_pki::{CertStatus, OcspCertStatus, PkiConfig, RevocationReason};
use certd_sdk::{CertsClient, LocalClient};

fn open(state: &StateDir) -> LocalClient {
    LocalClient::new(Arc::new(state.open_service(PkiConfig::new()).unwrap()))
}

fn execute(client: &LocalClient, command: &Commands) -> String {
    let mut buf = Vec::new();
    CertsCommand::new(client)
        .execute(&mut buf, &OutputFormat::new(Format::Json), command)
        .unwrap();
    String::from_utf8(buf).unwrap()
}

#[test]
fn issue_revoke_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    state.initialize(&PkiConfig::new(), false).unwrap();

    let client = open(&state);
    let out = execute(
        &client,
        &Commands::Issue(IssueArgs {
            entity_id: "gateway-7".into(),
            ttl: "12h".into(),
            ip: vec!["192.168.1.7".into()],
            dns: vec!["gw7.local".into()],
            common_name: None,
            organization: vec!["Plant".into()],
            organizational_unit: Vec::new(),
            country: Vec::new(),
        }),
    );
    let bundle: serde_json::Value = serde_json::from_str(&out).unwrap();
    let serial = bundle["serial"].as_str().unwrap().to_string();
    assert!(bundle["private_key_pem"].as_str().unwrap().contains("PRIVATE KEY"));

    execute(
        &client,
        &Commands::Revoke {
            serial: serial.clone(),
            reason: RevocationReason::KeyCompromise,
        },
    );
    drop(client);

    // A fresh process sees the revocation through CRL and OCSP.
    let client = open(&state);
    let view = client.view_cert(&serial).unwrap();
    assert_eq!(view.status, CertStatus::Revoked);
    assert_eq!(view.common_name, "gateway-7");

    let crl = client.get_crl(certd_pki::CaKind::Intermediate).unwrap();
    assert!(crl.entries.iter().any(|e| e.serial.to_hex() == serial));

    let ocsp = client.ocsp(&serial, "").unwrap();
    assert!(matches!(
        ocsp.status(),
        Some(OcspCertStatus::Revoked {
            reason: RevocationReason::KeyCompromise,
            ..
        })
    ));
}

#[test]
fn renewed_certificate_downloads_without_key() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    state.initialize(&PkiConfig::new(), false).unwrap();
    let client = open(&state);

    let original = client
        .issue_cert("sensor-3", "6h", &[], certd_pki::SubjectOptions::default())
        .unwrap();
    let renewed = client.renew_cert(&original.serial).unwrap();
    assert_ne!(renewed.serial, original.serial);

    let out_path = dir.path().join("renewed.pem");
    let out = execute(
        &client,
        &Commands::Download {
            target: DownloadTarget::Cert {
                serial: renewed.serial.clone(),
            },
            out: Some(out_path.clone()),
        },
    );
    assert!(out.contains("\"success\": true"));
    let pem = std::fs::read_to_string(out_path).unwrap();
    assert!(pem.starts_with(&renewed.certificate_pem));
    assert!(!pem.contains("PRIVATE KEY"));

    let page = client
        .list_certs(&certd_pki::PageQuery::default().status(CertStatus::Active))
        .unwrap();
    assert_eq!(page.total, 2);
}
