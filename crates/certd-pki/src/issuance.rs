//! Issuance Engine: validates requests, builds templates, signs and stores.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa,
    KeyUsagePurpose, PublicKeyData, SanType,
};
use tracing::{debug, error, info, warn};

use crate::ca::{CaManager, rcgen_serial};
use crate::config::{MAX_COMMON_NAME_LEN, PkiConfig};
use crate::error::{Error, Result};
use crate::keys::{CsrRequest, generate_key_pair, to_rcgen_time};
use crate::store::CertificateRepository;
use crate::types::{
    CertStatus, CertificateRecord, EntityId, IssuedCertificate, KeySource, PrivateKey,
    SerialNumber, SubjectOptions,
};

/// Upper bound accepted by [`parse_ttl`]: 100 years in milliseconds.
const MAX_TTL_MS: f64 = 100.0 * 365.25 * 86_400_000.0;

/// Longest DNS name accepted as a SAN.
const MAX_DNS_NAME_LEN: usize = 253;

/// Parses a Go-style duration string such as `"8760h"`, `"1h30m"` or `"90s"`.
///
/// Supported units are `ms`, `s`, `m`, `h` and `d`; components may carry a
/// decimal fraction. The result must be positive.
///
/// # Errors
///
/// Returns [`Error::InvalidTtl`] describing the first problem found.
pub fn parse_ttl(input: &str) -> Result<Duration> {
    let invalid = |reason: &str| Error::InvalidTtl {
        value: input.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total_ms = 0.0_f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale_ms = match &rest[..unit_len] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            "d" => 86_400_000.0,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_len..];
        total_ms += value * scale_ms;
    }

    if !total_ms.is_finite() || total_ms > MAX_TTL_MS {
        return Err(invalid("out of range"));
    }
    let ms = total_ms.round() as i64;
    if ms <= 0 {
        return Err(invalid("must be positive"));
    }
    Ok(Duration::milliseconds(ms))
}

/// Renders a duration in the largest whole unit [`parse_ttl`] accepts.
#[must_use]
pub fn format_ttl(ttl: Duration) -> String {
    let ms = ttl.num_milliseconds();
    if ms == 0 {
        "0s".to_string()
    } else if ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{ms}ms")
    }
}

/// Issues leaf certificates under the CA Manager's issuing CA.
pub struct IssuanceEngine {
    cas: Arc<CaManager>,
    store: Arc<dyn CertificateRepository>,
    config: PkiConfig,
}

impl IssuanceEngine {
    /// Creates an engine over a CA registry and a store.
    #[must_use]
    pub fn new(cas: Arc<CaManager>, store: Arc<dyn CertificateRepository>, config: PkiConfig) -> Self {
        Self { cas, store, config }
    }

    /// Issues a certificate for a freshly generated key pair.
    ///
    /// The private key is returned in the result and never stored.
    ///
    /// # Errors
    ///
    /// Validation errors for the entity ID, TTL, SANs or subject; signing
    /// and persistence errors otherwise.
    pub fn issue(
        &self,
        entity_id: &str,
        ttl: &str,
        ip_addresses: &[String],
        subject: SubjectOptions,
    ) -> Result<IssuedCertificate> {
        let entity_id = EntityId::new(entity_id)?;
        let ttl = self.resolve_ttl(ttl)?;
        let ips = parse_ips(ip_addresses)?;
        let mut subject = subject;
        if subject.common_name.trim().is_empty() {
            subject.common_name = entity_id.to_string();
        }
        self.validate_subject(&subject)?;

        let key_pair = generate_key_pair(self.config.key_algorithm)?;
        let private_key = PrivateKey::new(key_pair.serialize_der());

        let mut issued = self.sign_and_store(
            entity_id,
            subject,
            ips,
            ttl,
            &key_pair,
            KeySource::Generated,
        )?;
        issued.private_key = Some(private_key);
        Ok(issued)
    }

    /// Issues a certificate for the public key in a CSR.
    ///
    /// Subject and SANs come from the CSR; validity is decided here.
    ///
    /// # Errors
    ///
    /// [`Error::MissingCsr`] for an empty CSR, [`Error::InvalidCsr`] if it
    /// does not parse, verify, or meet the key policy.
    pub fn issue_from_csr(&self, entity_id: &str, ttl: &str, csr: &str) -> Result<IssuedCertificate> {
        let entity_id = EntityId::new(entity_id)?;
        if csr.trim().is_empty() {
            return Err(Error::MissingCsr);
        }
        let ttl = self.resolve_ttl(ttl)?;
        let csr = CsrRequest::parse(csr, self.config.key_policy())?;
        if csr.subject().common_name.trim().is_empty() {
            return Err(Error::InvalidCsr {
                reason: "subject has no common name".into(),
            });
        }
        self.validate_subject(csr.subject())?;

        self.sign_and_store(
            entity_id,
            csr.subject().clone(),
            csr.ip_addresses().to_vec(),
            ttl,
            csr.public_key(),
            KeySource::Csr,
        )
    }

    /// Issues a new certificate replacing an active one.
    ///
    /// The new certificate gets a fresh key pair and serial, the same entity
    /// and subject, and the original validity length bounded by the
    /// configured maximum. The original record is left untouched.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown serials, [`Error::CertificateRevoked`]
    /// or [`Error::CertificateExpired`] if the original is no longer active.
    pub fn renew(&self, serial: &SerialNumber) -> Result<IssuedCertificate> {
        let original = self.store.get(serial)?;
        match original.effective_status(Utc::now()) {
            CertStatus::Active => {}
            CertStatus::Revoked => {
                return Err(Error::CertificateRevoked {
                    serial: serial.to_hex(),
                });
            }
            CertStatus::Expired => {
                return Err(Error::CertificateExpired {
                    serial: serial.to_hex(),
                });
            }
        }

        let window = original.not_after - original.not_before - self.config.clock_skew;
        let ttl = window.clamp(Duration::seconds(1), self.config.max_ttl);

        let key_pair = generate_key_pair(self.config.key_algorithm)?;
        let private_key = PrivateKey::new(key_pair.serialize_der());

        let mut issued = self.sign_and_store(
            original.entity_id.clone(),
            original.subject.clone(),
            original.ip_addresses.clone(),
            ttl,
            &key_pair,
            KeySource::Generated,
        )?;
        issued.private_key = Some(private_key);

        info!(
            previous = %serial,
            serial = %issued.record.serial,
            entity_id = %issued.record.entity_id,
            "certificate renewed"
        );
        Ok(issued)
    }

    fn resolve_ttl(&self, ttl: &str) -> Result<Duration> {
        if ttl.trim().is_empty() {
            return Ok(self.config.default_ttl);
        }
        let parsed = parse_ttl(ttl)?;
        if parsed > self.config.max_ttl {
            return Err(Error::InvalidTtl {
                value: ttl.to_string(),
                reason: format!("exceeds maximum of {}", format_ttl(self.config.max_ttl)),
            });
        }
        Ok(parsed)
    }

    fn validate_subject(&self, subject: &SubjectOptions) -> Result<()> {
        if subject.common_name.len() > MAX_COMMON_NAME_LEN {
            return Err(Error::InvalidSubject {
                field: "common_name",
                reason: format!("longer than {MAX_COMMON_NAME_LEN} characters"),
            });
        }

        let limit = self.config.max_subject_field_len;
        let fields: [(&'static str, &[String]); 7] = [
            ("organization", &subject.organization),
            ("organizational_unit", &subject.organizational_unit),
            ("country", &subject.country),
            ("province", &subject.province),
            ("locality", &subject.locality),
            ("street_address", &subject.street_address),
            ("postal_code", &subject.postal_code),
        ];
        for (field, values) in fields {
            if let Some(value) = values.iter().find(|v| v.len() > limit) {
                return Err(Error::InvalidSubject {
                    field,
                    reason: format!("'{value}' longer than {limit} characters"),
                });
            }
        }

        for dns in &subject.dns_names {
            if dns.is_empty() || dns.len() > MAX_DNS_NAME_LEN || Ia5String::try_from(dns.as_str()).is_err() {
                return Err(Error::InvalidSan { value: dns.clone() });
            }
        }
        Ok(())
    }

    fn sign_and_store(
        &self,
        entity_id: EntityId,
        subject: SubjectOptions,
        ip_addresses: Vec<IpAddr>,
        ttl: Duration,
        public_key: &impl PublicKeyData,
        key_source: KeySource,
    ) -> Result<IssuedCertificate> {
        let ca = self.cas.issuing_ca();
        let now = Utc::now();
        let not_before = now - self.config.clock_skew;
        let mut not_after = now + ttl;
        if not_after > ca.certificate().not_after() {
            debug!(requested = %not_after, "validity capped at issuing CA expiry");
            not_after = ca.certificate().not_after();
        }
        if not_after <= not_before {
            warn!(ca_id = %ca.id(), ca_not_after = %ca.certificate().not_after(), "issuing CA has expired");
            return Err(Error::signing(format!(
                "issuing CA '{}' has expired",
                ca.certificate().subject()
            )));
        }

        let serial = SerialNumber::random();
        let template = build_template(&serial, &subject, &ip_addresses, not_before, not_after)?;
        let der = ca.sign(template, public_key)?;

        // Second-precision times as encoded in the certificate.
        let issued_view = crate::types::Certificate::from_der(&der)?;

        let record = CertificateRecord {
            serial: serial.clone(),
            entity_id,
            ca_id: ca.id(),
            subject,
            ip_addresses,
            der,
            not_before: issued_view.not_before(),
            not_after: issued_view.not_after(),
            status: CertStatus::Active,
            revocation: None,
            key_source,
            created_at: now,
        };

        self.store.insert(record.clone()).map_err(|e| match e {
            Error::SerialExists { serial } => {
                error!(serial = %serial, "serial allocation collided with an existing record");
                Error::SerialAllocation { serial }
            }
            other => other,
        })?;

        info!(
            serial = %record.serial,
            entity_id = %record.entity_id,
            ca_id = %record.ca_id,
            not_after = %record.not_after,
            key_source = ?record.key_source,
            "certificate issued"
        );

        Ok(IssuedCertificate {
            ca_chain_pem: self.cas.chain_pem(record.ca_id)?,
            record,
            private_key: None,
        })
    }
}

impl std::fmt::Debug for IssuanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceEngine")
            .field("cas", &self.cas)
            .finish_non_exhaustive()
    }
}

fn parse_ips(values: &[String]) -> Result<Vec<IpAddr>> {
    values
        .iter()
        .map(|value| {
            value
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| Error::InvalidSan {
                    value: value.clone(),
                })
        })
        .collect()
}

fn build_template(
    serial: &SerialNumber,
    subject: &SubjectOptions,
    ip_addresses: &[IpAddr],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();
    params.serial_number = Some(rcgen_serial(serial));
    params.distinguished_name = distinguished_name(subject);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.use_authority_key_identifier_extension = true;
    params.not_before = to_rcgen_time(not_before)?;
    params.not_after = to_rcgen_time(not_after)?;

    for dns in &subject.dns_names {
        let ia5 = Ia5String::try_from(dns.as_str()).map_err(|_| Error::InvalidSan { value: dns.clone() })?;
        params.subject_alt_names.push(SanType::DnsName(ia5));
    }
    params
        .subject_alt_names
        .extend(ip_addresses.iter().map(|ip| SanType::IpAddress(*ip)));

    Ok(params)
}

/// rcgen holds one value per attribute type; the first non-empty value wins.
fn distinguished_name(subject: &SubjectOptions) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, subject.common_name.as_str());

    let first = |values: &[String]| values.iter().find(|v| !v.is_empty()).cloned();
    let optional = [
        (DnType::OrganizationName, first(&subject.organization)),
        (DnType::OrganizationalUnitName, first(&subject.organizational_unit)),
        (DnType::CountryName, first(&subject.country)),
        (DnType::StateOrProvinceName, first(&subject.province)),
        (DnType::LocalityName, first(&subject.locality)),
        (
            DnType::CustomDnType(vec![2, 5, 4, 9]),
            first(&subject.street_address),
        ),
        (
            DnType::CustomDnType(vec![2, 5, 4, 17]),
            first(&subject.postal_code),
        ),
    ];
    for (ty, value) in optional {
        if let Some(value) = value {
            dn.push(ty, value);
        }
    }
    dn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{CertificateAuthority, IntermediateRequest};
    use crate::keys::tests::make_csr;
    use crate::store::MemoryStore;
    use crate::types::SubjectAltName;
    use crate::validation::validate_chain;
    use proptest::prelude::*;
    use test_case::test_case;

    fn engine_with(config: PkiConfig) -> (IssuanceEngine, Arc<CaManager>, Arc<MemoryStore>) {
        let (root, _) = CertificateAuthority::new_root(&config).unwrap();
        let cas = Arc::new(CaManager::new(root).unwrap());
        let store = Arc::new(MemoryStore::new());
        let engine = IssuanceEngine::new(Arc::clone(&cas), store.clone(), config);
        (engine, cas, store)
    }

    fn engine() -> (IssuanceEngine, Arc<CaManager>, Arc<MemoryStore>) {
        engine_with(PkiConfig::new().with_ca_common_name("Test CA"))
    }

    #[test_case("8760h", Duration::hours(8760) ; "hours")]
    #[test_case("90m", Duration::minutes(90) ; "minutes")]
    #[test_case("1h30m", Duration::minutes(90) ; "compound")]
    #[test_case("10s", Duration::seconds(10) ; "seconds")]
    #[test_case("1.5h", Duration::minutes(90) ; "fraction")]
    #[test_case("7d", Duration::days(7) ; "days")]
    #[test_case("250ms", Duration::milliseconds(250) ; "millis")]
    fn ttl_parses(input: &str, expected: Duration) {
        assert_eq!(parse_ttl(input).unwrap(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("10" ; "no unit")]
    #[test_case("10y" ; "unknown unit")]
    #[test_case("h" ; "no number")]
    #[test_case("0s" ; "zero")]
    #[test_case("-5m" ; "negative")]
    #[test_case("1.2.3h" ; "bad number")]
    #[test_case("999999999d" ; "overflow")]
    fn ttl_rejects(input: &str) {
        assert!(matches!(parse_ttl(input), Err(Error::InvalidTtl { .. })));
    }

    proptest! {
        #[test]
        fn ttl_format_parse_inverse(minutes in 1i64..10_000_000) {
            let ttl = Duration::minutes(minutes);
            prop_assert_eq!(parse_ttl(&format_ttl(ttl)).unwrap(), ttl);
        }
    }

    #[test]
    fn issue_generated_key() {
        let (engine, cas, store) = engine();
        let issued = engine
            .issue("device-1", "24h", &["10.0.0.5".to_string()], SubjectOptions::default())
            .unwrap();

        let cert = issued.record.certificate().unwrap();
        assert_eq!(cert.subject(), "device-1");
        assert_eq!(cert.issuer(), "Test CA");
        assert_eq!(cert.serial(), &issued.record.serial);
        assert!(cert.san().contains(&SubjectAltName::Ip("10.0.0.5".parse().unwrap())));
        assert!(issued.private_key.is_some());
        assert_eq!(issued.record.key_source, KeySource::Generated);
        assert_eq!(store.len(), 1);

        let window = issued.record.not_after - issued.record.not_before;
        assert!((window - Duration::hours(24)).num_seconds().abs() <= 1);

        validate_chain(&[cert, cas.root().certificate().clone()], Utc::now()).unwrap();
    }

    #[test]
    fn issued_key_matches_certificate() {
        let (engine, _, _) = engine();
        let issued = engine
            .issue("device-1", "1h", &[], SubjectOptions::default())
            .unwrap();
        let key = rcgen::KeyPair::try_from(issued.private_key.as_ref().unwrap().der()).unwrap();

        use x509_parser::prelude::*;
        let (_, parsed) = X509Certificate::from_der(&issued.record.der).unwrap();
        assert_eq!(parsed.public_key().subject_public_key.data.as_ref(), key.public_key_raw());
    }

    #[test]
    fn issue_uses_subject_options() {
        let (engine, _, _) = engine();
        let subject = SubjectOptions {
            common_name: "api.internal".into(),
            organization: vec!["Acme".into()],
            country: vec!["DE".into()],
            dns_names: vec!["api.internal".into(), "*.api.internal".into()],
            ..SubjectOptions::default()
        };
        let issued = engine.issue("svc-api", "", &[], subject).unwrap();

        let cert = issued.record.certificate().unwrap();
        assert_eq!(cert.subject(), "api.internal");
        assert_eq!(
            cert.san()[..2],
            [
                SubjectAltName::Dns("api.internal".into()),
                SubjectAltName::Dns("*.api.internal".into())
            ]
        );
    }

    #[test]
    fn empty_ttl_uses_default() {
        let config = PkiConfig::new().with_default_ttl(Duration::hours(5));
        let (engine, _, _) = engine_with(config);
        let issued = engine.issue("device-1", " ", &[], SubjectOptions::default()).unwrap();
        let window = issued.record.not_after - issued.record.not_before;
        assert!((window - Duration::hours(5)).num_seconds().abs() <= 1);
    }

    #[test]
    fn ttl_above_max_rejected() {
        let config = PkiConfig::new()
            .with_default_ttl(Duration::hours(1))
            .with_max_ttl(Duration::hours(2));
        let (engine, _, store) = engine_with(config);
        let result = engine.issue("device-1", "3h", &[], SubjectOptions::default());
        assert!(matches!(result, Err(Error::InvalidTtl { .. })));
        assert!(store.is_empty());
    }

    #[test_case("", "1h", &["10.0.0.1"] ; "missing entity")]
    #[test_case("\"\"", "1h", &["10.0.0.1"] ; "quoted empty entity")]
    #[test_case("device", "1x", &["10.0.0.1"] ; "bad ttl")]
    #[test_case("device", "1h", &["10.0.0.300"] ; "bad ip")]
    #[test_case("device", "1h", &["host.example"] ; "dns in ip list")]
    fn invalid_requests_store_nothing(entity: &str, ttl: &str, ips: &[&str]) {
        let (engine, _, store) = engine();
        let ips: Vec<String> = ips.iter().map(ToString::to_string).collect();
        let err = engine
            .issue(entity, ttl, &ips, SubjectOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(store.is_empty());
    }

    #[test]
    fn oversized_subject_rejected() {
        let (engine, _, _) = engine();
        let subject = SubjectOptions {
            organization: vec!["x".repeat(500)],
            ..SubjectOptions::default()
        };
        let result = engine.issue("device", "1h", &[], subject);
        assert!(matches!(
            result,
            Err(Error::InvalidSubject { field: "organization", .. })
        ));

        let subject = SubjectOptions {
            common_name: "c".repeat(65),
            ..SubjectOptions::default()
        };
        assert!(engine.issue("device", "1h", &[], subject).is_err());
    }

    #[test]
    fn non_ascii_dns_rejected() {
        let (engine, _, _) = engine();
        let subject = SubjectOptions {
            dns_names: vec!["bücher.example".into()],
            ..SubjectOptions::default()
        };
        assert!(matches!(
            engine.issue("device", "1h", &[], subject),
            Err(Error::InvalidSan { .. })
        ));
    }

    #[test]
    fn issue_from_csr_round_trip() {
        let (engine, _, _) = engine();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let csr = make_csr("device-42", &[ip]);

        let issued = engine.issue_from_csr("entity-42", "48h", &csr).unwrap();
        let cert = issued.record.certificate().unwrap();

        assert_eq!(cert.subject(), "device-42");
        assert!(cert.san().contains(&SubjectAltName::Ip(ip)));
        assert!(issued.private_key.is_none());
        assert_eq!(issued.record.key_source, KeySource::Csr);
        assert_eq!(issued.record.entity_id.as_str(), "entity-42");
    }

    #[test]
    fn empty_csr_is_missing() {
        let (engine, _, store) = engine();
        assert!(matches!(
            engine.issue_from_csr("entity", "1h", ""),
            Err(Error::MissingCsr)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn csr_without_common_name_rejected() {
        let (engine, _, _) = engine();
        let csr = make_csr("", &[]);
        assert!(matches!(
            engine.issue_from_csr("entity", "1h", &csr),
            Err(Error::InvalidCsr { .. })
        ));
    }

    #[test]
    fn issues_under_latest_intermediate() {
        let (engine, cas, _) = engine();
        let identity = cas
            .issue_intermediate(&IntermediateRequest::new("Issuing CA", Duration::days(365)))
            .unwrap();

        let issued = engine.issue("device", "1h", &[], SubjectOptions::default()).unwrap();
        let cert = issued.record.certificate().unwrap();

        assert_eq!(cert.issuer(), "Issuing CA");
        assert_eq!(issued.record.ca_id, cas.issuing_ca().id());
        validate_chain(
            &[cert, identity.certificate, cas.root().certificate().clone()],
            Utc::now(),
        )
        .unwrap();
        assert_eq!(issued.ca_chain_pem.matches("BEGIN CERTIFICATE").count(), 2);
    }

    #[test]
    fn renew_is_additive() {
        let (engine, _, store) = engine();
        let original = engine
            .issue("device-9", "10h", &["10.1.1.1".to_string()], SubjectOptions::default())
            .unwrap();

        let renewed = engine.renew(&original.record.serial).unwrap();

        assert_ne!(renewed.record.serial, original.record.serial);
        assert_eq!(renewed.record.entity_id, original.record.entity_id);
        assert_eq!(renewed.record.subject, original.record.subject);
        assert_eq!(renewed.record.ip_addresses, original.record.ip_addresses);
        assert!(renewed.private_key.is_some());
        let window = renewed.record.not_after - renewed.record.not_before;
        assert!((window - Duration::hours(10)).num_seconds().abs() <= 1);

        assert_eq!(
            store.get(&original.record.serial).unwrap().status,
            CertStatus::Active
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn renew_unknown_serial() {
        let (engine, _, _) = engine();
        assert!(matches!(
            engine.renew(&SerialNumber::random()),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn renew_revoked_rejected() {
        let (engine, _, store) = engine();
        let issued = engine.issue("device", "1h", &[], SubjectOptions::default()).unwrap();
        store
            .compare_and_set_status(
                &issued.record.serial,
                CertStatus::Active,
                CertStatus::Revoked,
                None,
            )
            .unwrap();

        assert!(matches!(
            engine.renew(&issued.record.serial),
            Err(Error::CertificateRevoked { .. })
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn expired_issuing_ca_refuses_to_sign() {
        let (engine, cas, store) = engine();
        let early = engine.issue("device", "1h", &[], SubjectOptions::default()).unwrap();
        cas.issue_intermediate(&IntermediateRequest::new("Short CA", Duration::seconds(2)))
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2100));
        assert!(matches!(
            engine.issue("device", "24h", &[], SubjectOptions::default()),
            Err(Error::KeySigning { .. })
        ));
        assert!(matches!(
            engine.renew(&early.record.serial),
            Err(Error::KeySigning { .. })
        ));
        assert_eq!(store.len(), 1);
    }
}
