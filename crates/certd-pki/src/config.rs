//! Engine configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::{KeyAlgorithm, KeyPolicy};

/// Default CA certificate lifetime: 10 years.
pub const DEFAULT_CA_VALIDITY_DAYS: i64 = 3650;

/// Default leaf TTL when a request leaves it empty: 90 days.
pub const DEFAULT_TTL_HOURS: i64 = 2160;

/// Default upper bound on requested TTLs: 1 year.
pub const DEFAULT_MAX_TTL_HOURS: i64 = 8760;

/// Default bound on subject field lengths other than CN.
pub const DEFAULT_MAX_SUBJECT_FIELD_LEN: usize = 128;

/// Upper bound on the common name (`ub-common-name` in RFC 5280).
pub const MAX_COMMON_NAME_LEN: usize = 64;

/// Configuration for the certificate lifecycle engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    /// Common name of the root CA.
    pub ca_common_name: String,
    /// Organization of the root CA.
    pub ca_organization: String,
    /// Country of the root CA.
    pub ca_country: String,
    /// Key algorithm for CA and generated leaf keys.
    pub key_algorithm: KeyAlgorithm,
    /// Lifetime of CA certificates.
    #[serde(with = "duration_str")]
    pub ca_validity: Duration,
    /// Whether bootstrap also creates an intermediate CA under the root.
    pub bootstrap_intermediate: bool,
    /// Path length constraint of intermediates.
    pub intermediate_path_length: u8,
    /// TTL used when a request does not specify one.
    #[serde(with = "duration_str")]
    pub default_ttl: Duration,
    /// Largest TTL a request may ask for.
    #[serde(with = "duration_str")]
    pub max_ttl: Duration,
    /// Backdating applied to `not_before`.
    #[serde(with = "duration_str")]
    pub clock_skew: Duration,
    /// Minimum RSA modulus size accepted in CSRs.
    pub min_rsa_bits: usize,
    /// Minimum EC field size accepted in CSRs.
    pub min_ec_bits: usize,
    /// Bound on subject field lengths other than CN.
    pub max_subject_field_len: usize,
    /// Interval between a CRL's `thisUpdate` and `nextUpdate`.
    #[serde(with = "duration_str")]
    pub crl_validity: Duration,
    /// Lifetime of download tokens.
    #[serde(with = "duration_str")]
    pub token_ttl: Duration,
    /// Whether download tokens are invalidated on first redemption.
    pub token_single_use: bool,
}

impl PkiConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ca_common_name: "certd Root CA".to_string(),
            ca_organization: "certd".to_string(),
            ca_country: String::new(),
            key_algorithm: KeyAlgorithm::EcdsaP256,
            ca_validity: Duration::days(DEFAULT_CA_VALIDITY_DAYS),
            bootstrap_intermediate: true,
            intermediate_path_length: 0,
            default_ttl: Duration::hours(DEFAULT_TTL_HOURS),
            max_ttl: Duration::hours(DEFAULT_MAX_TTL_HOURS),
            clock_skew: Duration::zero(),
            min_rsa_bits: 2048,
            min_ec_bits: 256,
            max_subject_field_len: DEFAULT_MAX_SUBJECT_FIELD_LEN,
            crl_validity: Duration::hours(24),
            token_ttl: Duration::minutes(5),
            token_single_use: true,
        }
    }

    /// Sets the root CA common name.
    #[must_use]
    pub fn with_ca_common_name(mut self, name: impl Into<String>) -> Self {
        self.ca_common_name = name.into();
        self
    }

    /// Sets the key algorithm.
    #[must_use]
    pub const fn with_key_algorithm(mut self, alg: KeyAlgorithm) -> Self {
        self.key_algorithm = alg;
        self
    }

    /// Sets whether bootstrap creates an intermediate CA.
    #[must_use]
    pub const fn with_bootstrap_intermediate(mut self, enabled: bool) -> Self {
        self.bootstrap_intermediate = enabled;
        self
    }

    /// Sets the default TTL.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the maximum TTL.
    #[must_use]
    pub const fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    /// Sets the clock-skew backdating.
    #[must_use]
    pub const fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Sets the CRL validity interval.
    #[must_use]
    pub const fn with_crl_validity(mut self, validity: Duration) -> Self {
        self.crl_validity = validity;
        self
    }

    /// Sets the download token lifetime.
    #[must_use]
    pub const fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Sets whether download tokens are single-use.
    #[must_use]
    pub const fn with_token_single_use(mut self, single_use: bool) -> Self {
        self.token_single_use = single_use;
        self
    }

    /// Returns the CSR key policy.
    #[must_use]
    pub const fn key_policy(&self) -> KeyPolicy {
        KeyPolicy {
            min_rsa_bits: self.min_rsa_bits,
            min_ec_bits: self.min_ec_bits,
        }
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(Error::Config {
                reason: reason.to_string(),
            })
        };
        if self.ca_common_name.trim().is_empty() {
            return fail("ca_common_name must not be empty");
        }
        if self.ca_common_name.len() > MAX_COMMON_NAME_LEN {
            return fail("ca_common_name exceeds 64 characters");
        }
        if self.ca_validity <= Duration::zero() {
            return fail("ca_validity must be positive");
        }
        if self.default_ttl <= Duration::zero() || self.max_ttl <= Duration::zero() {
            return fail("ttl bounds must be positive");
        }
        if self.default_ttl > self.max_ttl {
            return fail("default_ttl exceeds max_ttl");
        }
        if self.max_ttl > self.ca_validity {
            return fail("max_ttl exceeds ca_validity");
        }
        if self.clock_skew < Duration::zero() {
            return fail("clock_skew must not be negative");
        }
        if self.crl_validity <= Duration::zero() {
            return fail("crl_validity must be positive");
        }
        if self.token_ttl <= Duration::zero() {
            return fail("token_ttl must be positive");
        }
        if self.max_subject_field_len == 0 {
            return fail("max_subject_field_len must be positive");
        }
        Ok(())
    }
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Go-style duration strings (`"2160h"`, `"5m"`) for config fields.
mod duration_str {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::issuance::{format_ttl, parse_ttl};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_ttl(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.trim() == "0" || raw.trim() == "0s" {
            return Ok(Duration::zero());
        }
        parse_ttl(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PkiConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.token_ttl, Duration::minutes(5));
        assert!(config.token_single_use);
    }

    #[test]
    fn config_builder() {
        let config = PkiConfig::new()
            .with_ca_common_name("Fleet CA")
            .with_key_algorithm(KeyAlgorithm::Ed25519)
            .with_default_ttl(Duration::hours(1))
            .with_bootstrap_intermediate(false);

        assert_eq!(config.ca_common_name, "Fleet CA");
        assert_eq!(config.key_algorithm, KeyAlgorithm::Ed25519);
        assert_eq!(config.default_ttl, Duration::hours(1));
        assert!(!config.bootstrap_intermediate);
    }

    #[test]
    fn default_ttl_above_max_rejected() {
        let config = PkiConfig::new()
            .with_default_ttl(Duration::hours(10))
            .with_max_ttl(Duration::hours(1));
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn empty_common_name_rejected() {
        let config = PkiConfig::new().with_ca_common_name(" ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_uses_duration_strings() {
        let json = serde_json::to_value(PkiConfig::default()).unwrap();
        assert_eq!(json["default_ttl"], "2160h");
        assert_eq!(json["token_ttl"], "5m");
        assert_eq!(json["clock_skew"], "0s");
        assert_eq!(json["key_algorithm"], "ecdsa-p256");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: PkiConfig =
            serde_json::from_str(r#"{"ca_common_name": "Edge CA", "max_ttl": "720h"}"#).unwrap();
        assert_eq!(config.ca_common_name, "Edge CA");
        assert_eq!(config.max_ttl, Duration::hours(720));
        assert_eq!(config.default_ttl, Duration::hours(DEFAULT_TTL_HOURS));
    }

    #[test]
    fn malformed_duration_rejected() {
        let result = serde_json::from_str::<PkiConfig>(r#"{"max_ttl": "forever"}"#);
        assert!(result.is_err());
    }
}
