//! Harvest data models

use crate::harvest::parser::Extraction;
use crate::harvest::protocols::Protocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Default per-request timeout for a source in seconds
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 45;

/// Running quality metrics of a single source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Non-empty lines examined
    pub total_configs: u64,
    /// Records accepted by validation
    pub valid_configs: u64,
    /// Distinct protocols observed
    pub unique_configs: u64,
    pub success_count: u64,
    pub fail_count: u64,
    /// Smoothed fetch latency in seconds
    pub avg_response_time: f64,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Recomputed on every update, always within `[0, 100]`
    pub overall_score: f64,
    pub protocol_counts: BTreeMap<Protocol, u64>,
}

impl Metrics {
    /// Fold one extraction pass into the counters
    pub fn record_extraction(&mut self, extraction: &Extraction) {
        self.total_configs += extraction.lines_examined;
        self.valid_configs += extraction.records.len() as u64;
        for (protocol, _) in &extraction.records {
            *self.protocol_counts.entry(*protocol).or_insert(0) += 1;
        }
        self.unique_configs = self.protocol_counts.values().filter(|&&n| n > 0).count() as u64;
    }

    /// Total fetch attempts that reached an outcome
    pub fn attempts(&self) -> u64 {
        self.success_count + self.fail_count
    }
}

/// A remote location expected to publish configs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// URL as configured
    pub url: String,
    /// Normalized identity used for deduplication
    pub key: String,
    pub enabled: bool,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Fetch cycles attempted
    pub check_count: u64,
    pub error_count: u64,
    pub metrics: Metrics,
}

impl Source {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            enabled: true,
            timeout: Duration::from_secs(DEFAULT_SOURCE_TIMEOUT_SECS),
            check_count: 0,
            error_count: 0,
            metrics: Metrics::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disable permanently; there is no way back to enabled
    pub fn disable(&mut self) {
        self.enabled = false;
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// A validated config extracted during the current run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub config: String,
    pub protocol: Protocol,
    pub score: f64,
    /// ISO 3166-1 alpha-2 code of the embedded IPv4 address, when known
    pub country_code: Option<String>,
    /// Key of the source the config came from
    pub source_key: String,
}

impl CandidateConfig {
    pub fn new(config: String, protocol: Protocol, source_key: String) -> Self {
        Self {
            config,
            protocol,
            score: 0.0,
            country_code: None,
            source_key,
        }
    }

    pub fn with_country(mut self, country_code: Option<String>) -> Self {
        self.country_code = country_code;
        self
    }

    /// Flag emoji for the country, if one is known
    pub fn flag(&self) -> Option<String> {
        self.country_code.as_deref().and_then(country_flag)
    }

    /// Value of the `type` query parameter, if present
    pub fn transport_type(&self) -> Option<&str> {
        let without_fragment = self.config.split('#').next().unwrap_or_default();
        let (_, query) = without_fragment.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("type="))
            .filter(|value| !value.is_empty())
    }

    /// Line written to the output artifact
    pub fn to_output_line(&self) -> String {
        format!(
            "{}#{} | {} | {}",
            self.config,
            self.flag().unwrap_or_else(|| "Unknown".to_string()),
            self.protocol.scheme(),
            self.transport_type().unwrap_or("Unknown"),
        )
    }
}

impl fmt::Display for CandidateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.config)
    }
}

/// Convert a two-letter country code into its regional indicator flag
pub fn country_flag(code: &str) -> Option<String> {
    let code = code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    code.to_ascii_uppercase()
        .chars()
        .map(|c| char::from_u32(0x1F1E6 + (c as u32 - 'A' as u32)))
        .collect()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_creation() {
        let source = Source::new("https://t.me/s/Example", "example");
        assert!(source.enabled);
        assert_eq!(source.check_count, 0);
        assert_eq!(source.timeout, Duration::from_secs(DEFAULT_SOURCE_TIMEOUT_SECS));
        assert_eq!(source.metrics, Metrics::default());
        assert_eq!(source.to_string(), "example");
    }

    #[test]
    fn test_record_extraction() {
        let mut metrics = Metrics::default();
        let extraction = Extraction {
            records: vec![
                (Protocol::Vless, "vless://a".to_string()),
                (Protocol::Vless, "vless://b".to_string()),
                (Protocol::Trojan, "trojan://c".to_string()),
            ],
            lines_examined: 5,
        };
        metrics.record_extraction(&extraction);
        metrics.record_extraction(&extraction);

        assert_eq!(metrics.total_configs, 10);
        assert_eq!(metrics.valid_configs, 6);
        assert_eq!(metrics.unique_configs, 2);
        assert_eq!(metrics.protocol_counts[&Protocol::Vless], 4);
    }

    #[test]
    fn test_country_flag() {
        assert_eq!(country_flag("US").as_deref(), Some("🇺🇸"));
        assert_eq!(country_flag("de").as_deref(), Some("🇩🇪"));
        assert!(country_flag("USA").is_none());
        assert!(country_flag("1A").is_none());
    }

    #[test]
    fn test_transport_type() {
        let c = CandidateConfig::new(
            "vless://id@1.2.3.4:443?security=tls&type=ws#name?type=grpc".to_string(),
            Protocol::Vless,
            "src".to_string(),
        );
        assert_eq!(c.transport_type(), Some("ws"));

        let c = CandidateConfig::new("trojan://host:443".to_string(), Protocol::Trojan, "src".to_string());
        assert_eq!(c.transport_type(), None);
    }

    #[test]
    fn test_output_line() {
        let c = CandidateConfig::new(
            "vless://id@1.2.3.4:443?type=grpc".to_string(),
            Protocol::Vless,
            "src".to_string(),
        )
        .with_country(Some("NL".to_string()));
        assert_eq!(c.to_output_line(), "vless://id@1.2.3.4:443?type=grpc#🇳🇱 | vless | grpc");

        let c = CandidateConfig::new("trojan://host:443".to_string(), Protocol::Trojan, "src".to_string());
        assert_eq!(c.to_output_line(), "trojan://host:443#Unknown | trojan | Unknown");
    }
}
