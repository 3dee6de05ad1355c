//! Source quality scoring.
//!
//! A source's score is the sum of four bounded sub-scores:
//! - reliability: fetch success rate (up to 35)
//! - quantity: lines seen relative to a target volume (up to 25)
//! - diversity: share of catalog protocols observed (up to 25)
//! - frequency: decaying bonus for a recent success (up to 15)
//!
//! The score feeds the circuit breaker and the ranking multiplier.

use crate::harvest::models::{Metrics, Source};
use crate::harvest::protocols::ProtocolCatalog;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Weight of the fetch success rate.
const RELIABILITY_WEIGHT: f64 = 35.0;

/// Weight of the observed line volume.
const QUANTITY_WEIGHT: f64 = 25.0;

/// Weight of protocol diversity.
const DIVERSITY_WEIGHT: f64 = 25.0;

/// Weight of the recency bonus.
const FREQUENCY_WEIGHT: f64 = 15.0;

/// Gap after which the recency bonus has dropped to half.
const FREQUENCY_HALF_SCALE_SECS: f64 = 3600.0;

/// Weight of a new latency sample in the moving average.
const EMA_SAMPLE_WEIGHT: f64 = 0.3;

/// Last-success timestamps this far in the future are treated as skew, not faults.
const CLOCK_SKEW_TOLERANCE_SECS: i64 = 60;

pub const DEFAULT_DESIRED_TOTAL: u64 = 1000;
pub const DEFAULT_MAX_SOURCE_CHECKS: u64 = 30;
pub const DEFAULT_MIN_ACCEPTABLE_SCORE: f64 = 50.0;
pub const DEFAULT_BALANCE_FACTOR: f64 = 1.5;

/// Scoring and circuit breaker settings
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Line volume that earns the full quantity sub-score
    pub desired_total: u64,
    /// Checks before the circuit breaker may fire
    pub max_source_checks: u64,
    /// Score below which a checked-out source is disabled
    pub min_acceptable_score: f64,
    /// Let observed volumes adjust protocol limits
    pub adaptive_limits: bool,
    /// Maximum acquisition mode; freezes protocol limits
    pub max_power: bool,
    /// Headroom multiplier when raising a flexible max
    pub balance_factor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            desired_total: DEFAULT_DESIRED_TOTAL,
            max_source_checks: DEFAULT_MAX_SOURCE_CHECKS,
            min_acceptable_score: DEFAULT_MIN_ACCEPTABLE_SCORE,
            adaptive_limits: true,
            max_power: false,
            balance_factor: DEFAULT_BALANCE_FACTOR,
        }
    }
}

impl ScoringConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_desired_total(mut self, desired_total: u64) -> Self {
        self.desired_total = desired_total;
        self
    }

    pub fn with_max_source_checks(mut self, checks: u64) -> Self {
        self.max_source_checks = checks;
        self
    }

    pub fn with_min_acceptable_score(mut self, score: f64) -> Self {
        self.min_acceptable_score = score;
        self
    }

    pub fn with_adaptive_limits(mut self, enabled: bool) -> Self {
        self.adaptive_limits = enabled;
        self
    }

    pub fn with_max_power(mut self, enabled: bool) -> Self {
        self.max_power = enabled;
        self
    }
}

/// Why a score could not be computed
#[derive(Debug, Error, PartialEq)]
pub enum ScoreFault {
    #[error("protocol catalog has no enabled protocols")]
    NoProtocols,
    #[error("last success {0} lies in the future")]
    FutureTimestamp(DateTime<Utc>),
    #[error("score is not a finite number")]
    NonFinite,
}

/// The four sub-scores behind a source score
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub reliability: f64,
    pub quantity: f64,
    pub diversity: f64,
    pub frequency: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.reliability + self.quantity + self.diversity + self.frequency
    }
}

/// Scores sources against a fixed protocol catalog size
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
    total_protocols: usize,
}

impl Scorer {
    pub fn new(config: ScoringConfig, catalog: &ProtocolCatalog) -> Self {
        Self {
            config,
            total_protocols: catalog.total_protocols(),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Compute the sub-scores, failing on inconsistent metrics
    pub fn breakdown(&self, metrics: &Metrics, now: DateTime<Utc>) -> Result<ScoreBreakdown, ScoreFault> {
        if self.total_protocols == 0 {
            return Err(ScoreFault::NoProtocols);
        }

        let attempts = metrics.attempts().max(1) as f64;
        let reliability = metrics.success_count as f64 / attempts * RELIABILITY_WEIGHT;

        let desired = self.config.desired_total.max(1) as f64;
        let quantity = (metrics.total_configs as f64 / desired * QUANTITY_WEIGHT).min(QUANTITY_WEIGHT);

        let diversity_ratio = (metrics.unique_configs as f64 / self.total_protocols as f64).min(1.0);
        let diversity = diversity_ratio * DIVERSITY_WEIGHT;

        let frequency = match (metrics.success_count, metrics.last_success_time) {
            (0, _) | (_, None) => 0.0,
            (_, Some(last)) => {
                let gap = now.signed_duration_since(last).num_milliseconds();
                if gap < -CLOCK_SKEW_TOLERANCE_SECS * 1000 {
                    return Err(ScoreFault::FutureTimestamp(last));
                }
                let gap_secs = gap.max(0) as f64 / 1000.0;
                (FREQUENCY_WEIGHT * FREQUENCY_HALF_SCALE_SECS / (gap_secs + FREQUENCY_HALF_SCALE_SECS))
                    .max(0.0)
            }
        };

        let breakdown = ScoreBreakdown {
            reliability,
            quantity,
            diversity,
            frequency,
        };
        if !breakdown.total().is_finite() {
            return Err(ScoreFault::NonFinite);
        }
        Ok(breakdown)
    }

    /// Compute the overall score; faults degrade to zero
    pub fn compute_score(&self, metrics: &Metrics, now: DateTime<Utc>) -> f64 {
        match self.breakdown(metrics, now) {
            Ok(breakdown) => breakdown.total(),
            Err(fault) => {
                warn!("score computation failed, using 0: {}", fault);
                0.0
            }
        }
    }

    /// Recompute and store a source's score
    pub fn refresh(&self, source: &mut Source, now: DateTime<Utc>) {
        source.metrics.overall_score = self.compute_score(&source.metrics, now);
    }

    /// Record a fetch outcome at the current time
    pub fn update_on_fetch_outcome(&self, source: &mut Source, success: bool, response_time_secs: f64) {
        self.update_on_fetch_outcome_at(source, success, response_time_secs, Utc::now());
    }

    /// Record a fetch outcome observed at `now`
    pub fn update_on_fetch_outcome_at(
        &self,
        source: &mut Source,
        success: bool,
        response_time_secs: f64,
        now: DateTime<Utc>,
    ) {
        let metrics = &mut source.metrics;
        if success {
            metrics.success_count += 1;
            metrics.last_success_time = Some(now);
        } else {
            metrics.fail_count += 1;
            source.error_count += 1;
        }

        if response_time_secs > 0.0 {
            metrics.avg_response_time = if metrics.avg_response_time == 0.0 {
                response_time_secs
            } else {
                metrics.avg_response_time * (1.0 - EMA_SAMPLE_WEIGHT) + response_time_secs * EMA_SAMPLE_WEIGHT
            };
        }

        self.refresh(source, now);
        debug!(
            source = %source.key,
            success,
            score = source.metrics.overall_score,
            "updated source score"
        );
    }

    /// Count a finished fetch cycle and apply the circuit breaker.
    ///
    /// Returns true when this check disabled the source.
    pub fn record_check(&self, source: &mut Source) -> bool {
        source.check_count += 1;

        let trips = source.enabled
            && source.check_count >= self.config.max_source_checks
            && source.metrics.overall_score < self.config.min_acceptable_score;
        if trips {
            source.disable();
            info!(
                source = %source.key,
                checks = source.check_count,
                score = source.metrics.overall_score,
                "disabling low quality source"
            );
        }
        trips
    }
}

/// Tighten protocol floors (and widen flexible ceilings) from observed counts.
///
/// Runs between cycles only, never concurrently with extraction.
pub fn adjust_protocol_limits(catalog: &mut ProtocolCatalog, metrics: &Metrics, config: &ScoringConfig) {
    if config.max_power || !config.adaptive_limits {
        return;
    }

    for (&protocol, &count) in metrics.protocol_counts.iter().filter(|&(_, &n)| n > 0) {
        let Some(spec) = catalog.spec_mut(protocol) else {
            continue;
        };
        spec.min_configs = spec.min_configs.min(count);
        if spec.flexible_max && count > spec.max_configs {
            spec.max_configs = (count as f64 * config.balance_factor).ceil() as u64;
            debug!(protocol = %protocol, max = spec.max_configs, "raised protocol limit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::protocols::{Protocol, ProtocolSpec};
    use chrono::Duration;

    fn scorer() -> Scorer {
        Scorer::new(ScoringConfig::default(), &ProtocolCatalog::default())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_zero_history_scores_zero() {
        let score = scorer().compute_score(&Metrics::default(), Utc::now());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_perfect_source_scores_hundred() {
        let now = Utc::now();
        let metrics = Metrics {
            total_configs: 5000,
            unique_configs: 4,
            success_count: 10,
            last_success_time: Some(now),
            ..Default::default()
        };
        let breakdown = scorer().breakdown(&metrics, now).unwrap();
        assert!(approx(breakdown.reliability, 35.0));
        assert!(approx(breakdown.quantity, 25.0));
        assert!(approx(breakdown.diversity, 25.0));
        assert!(approx(breakdown.frequency, 15.0));
        assert!(approx(breakdown.total(), 100.0));
    }

    #[test]
    fn test_score_bounds() {
        let now = Utc::now();
        let scorer = scorer();
        for success in [0u64, 1, 7, 1000] {
            for fail in [0u64, 3, 1000] {
                for total in [0u64, 10, 999, 1_000_000] {
                    for unique in 0..=4u64 {
                        for age_secs in [0i64, 30, 3600, 86_400 * 365] {
                            let metrics = Metrics {
                                total_configs: total,
                                unique_configs: unique,
                                success_count: success,
                                fail_count: fail,
                                last_success_time: Some(now - Duration::seconds(age_secs)),
                                ..Default::default()
                            };
                            let score = scorer.compute_score(&metrics, now);
                            assert!((0.0..=100.0).contains(&score), "score {score} for {metrics:?}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_frequency_half_scale() {
        let now = Utc::now();
        let metrics = Metrics {
            success_count: 1,
            last_success_time: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        let breakdown = scorer().breakdown(&metrics, now).unwrap();
        assert!(approx(breakdown.frequency, 7.5));
        assert!(approx(breakdown.reliability, 35.0));
    }

    #[test]
    fn test_quantity_and_diversity_partial() {
        let metrics = Metrics {
            total_configs: 200,
            unique_configs: 1,
            fail_count: 2,
            ..Default::default()
        };
        let breakdown = scorer().breakdown(&metrics, Utc::now()).unwrap();
        assert!(approx(breakdown.quantity, 5.0));
        assert!(approx(breakdown.diversity, 6.25));
        assert_eq!(breakdown.reliability, 0.0);
        assert_eq!(breakdown.frequency, 0.0);
    }

    #[test]
    fn test_future_timestamp_falls_back_to_zero() {
        let now = Utc::now();
        let metrics = Metrics {
            success_count: 3,
            total_configs: 100,
            last_success_time: Some(now + Duration::days(2)),
            ..Default::default()
        };
        let scorer = scorer();
        assert!(matches!(scorer.breakdown(&metrics, now), Err(ScoreFault::FutureTimestamp(_))));
        assert_eq!(scorer.compute_score(&metrics, now), 0.0);
    }

    #[test]
    fn test_empty_catalog_falls_back_to_zero() {
        let catalog = ProtocolCatalog::new(vec![ProtocolSpec::new(Protocol::Vless).disabled()]);
        let scorer = Scorer::new(ScoringConfig::default(), &catalog);
        let metrics = Metrics {
            success_count: 1,
            ..Default::default()
        };
        assert_eq!(scorer.breakdown(&metrics, Utc::now()), Err(ScoreFault::NoProtocols));
        assert_eq!(scorer.compute_score(&metrics, Utc::now()), 0.0);
    }

    #[test]
    fn test_response_time_ema() {
        let scorer = scorer();
        let mut source = Source::new("https://example.com", "https://example.com");
        scorer.update_on_fetch_outcome(&mut source, true, 4.0);
        assert!(approx(source.metrics.avg_response_time, 4.0));
        scorer.update_on_fetch_outcome(&mut source, true, 10.0);
        assert!(approx(source.metrics.avg_response_time, 5.8));

        // zero latency leaves the average alone
        scorer.update_on_fetch_outcome(&mut source, false, 0.0);
        assert!(approx(source.metrics.avg_response_time, 5.8));
    }

    #[test]
    fn test_fetch_outcomes_update_counters() {
        let scorer = scorer();
        let mut source = Source::new("https://example.com", "https://example.com");
        let now = Utc::now();

        scorer.update_on_fetch_outcome_at(&mut source, false, 0.0, now);
        assert_eq!(source.metrics.fail_count, 1);
        assert_eq!(source.error_count, 1);
        assert!(source.metrics.last_success_time.is_none());
        assert_eq!(source.metrics.overall_score, 0.0);

        scorer.update_on_fetch_outcome_at(&mut source, true, 1.5, now);
        assert_eq!(source.metrics.success_count, 1);
        assert_eq!(source.metrics.last_success_time, Some(now));
        // reliability 17.5 + frequency 15
        assert!(approx(source.metrics.overall_score, 32.5));
    }

    #[test]
    fn test_circuit_breaker_trips_at_threshold() {
        let scorer = scorer();
        let mut source = Source::new("https://example.com", "https://example.com");
        source.metrics.overall_score = 10.0;
        source.check_count = 29;

        assert!(scorer.record_check(&mut source));
        assert_eq!(source.check_count, 30);
        assert!(!source.enabled);

        // stays disabled, never re-fires
        source.metrics.overall_score = 90.0;
        assert!(!scorer.record_check(&mut source));
        assert!(!source.enabled);
    }

    #[test]
    fn test_circuit_breaker_below_threshold() {
        let scorer = scorer();
        let mut source = Source::new("https://example.com", "https://example.com");
        source.metrics.overall_score = 10.0;
        source.check_count = 28;

        assert!(!scorer.record_check(&mut source));
        assert_eq!(source.check_count, 29);
        assert!(source.enabled);
    }

    #[test]
    fn test_circuit_breaker_spares_good_source() {
        let scorer = scorer();
        let mut source = Source::new("https://example.com", "https://example.com");
        source.metrics.overall_score = 50.0;
        source.check_count = 100;

        assert!(!scorer.record_check(&mut source));
        assert!(source.enabled);
    }

    #[test]
    fn test_adjust_protocol_limits_ratchets_down() {
        let mut catalog = ProtocolCatalog::default();
        let config = ScoringConfig::default();
        let mut metrics = Metrics::default();
        metrics.protocol_counts.insert(Protocol::Vless, 12);
        metrics.protocol_counts.insert(Protocol::Trojan, 0);

        adjust_protocol_limits(&mut catalog, &metrics, &config);
        assert_eq!(catalog.spec(Protocol::Vless).unwrap().min_configs, 12);
        assert_eq!(catalog.spec(Protocol::Trojan).unwrap().min_configs, 7000);

        metrics.protocol_counts.insert(Protocol::Vless, 50);
        adjust_protocol_limits(&mut catalog, &metrics, &config);
        assert_eq!(catalog.spec(Protocol::Vless).unwrap().min_configs, 12);
    }

    #[test]
    fn test_adjust_protocol_limits_raises_flexible_max() {
        let mut catalog = ProtocolCatalog::new(vec![
            ProtocolSpec::new(Protocol::Tuic).with_limits(5, 10),
            ProtocolSpec {
                flexible_max: false,
                ..ProtocolSpec::new(Protocol::Vless).with_limits(5, 10)
            },
        ]);
        let mut metrics = Metrics::default();
        metrics.protocol_counts.insert(Protocol::Tuic, 20);
        metrics.protocol_counts.insert(Protocol::Vless, 20);

        adjust_protocol_limits(&mut catalog, &metrics, &ScoringConfig::default());
        assert_eq!(catalog.spec(Protocol::Tuic).unwrap().max_configs, 30);
        assert_eq!(catalog.spec(Protocol::Vless).unwrap().max_configs, 10);
    }

    #[test]
    fn test_adjust_protocol_limits_skipped_in_max_power() {
        let mut catalog = ProtocolCatalog::default();
        let mut metrics = Metrics::default();
        metrics.protocol_counts.insert(Protocol::Vless, 3);

        adjust_protocol_limits(&mut catalog, &metrics, &ScoringConfig::new().with_max_power(true));
        assert_eq!(catalog, ProtocolCatalog::default());

        adjust_protocol_limits(&mut catalog, &metrics, &ScoringConfig::new().with_adaptive_limits(false));
        assert_eq!(catalog, ProtocolCatalog::default());
    }
}
