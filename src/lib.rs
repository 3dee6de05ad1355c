//! Proxy Harvest - Proxy Config Collector
//!
//! Collects proxy configs published as unstructured text across many
//! sources, extracts and validates individual protocol URIs, scores the
//! sources that publish them and writes a deduplicated, ranked list.

pub mod error;
pub mod harvest;

pub use error::Error;
pub use harvest::*;

use std::path::PathBuf;
use std::time::Duration;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Default output file for ranked configs
pub const DEFAULT_OUTPUT_FILE: &str = "configs/proxy_configs.txt";

/// Default output file for per-source statistics
pub const DEFAULT_STATS_FILE: &str = "configs/channel_stats.json";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Ranked config output path
    pub output_path: PathBuf,
    /// Source statistics output path
    pub stats_path: Option<PathBuf>,
    /// MaxMind database used for country lookups
    pub mmdb_path: Option<PathBuf>,
    /// Maximum concurrent fetch cycles
    pub concurrency: usize,
    /// Per-source request timeout
    pub timeout: Duration,
    /// Extra HTTP attempts after a retryable failure
    pub max_retries: u32,
    /// Pause between HTTP attempts
    pub retry_delay: Duration,
    /// Scoring and circuit breaker settings
    pub scoring: ScoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT_FILE),
            stats_path: Some(PathBuf::from(DEFAULT_STATS_FILE)),
            mmdb_path: None,
            concurrency: CrawlerConfig::default().concurrency,
            timeout: Duration::from_secs(harvest::models::DEFAULT_SOURCE_TIMEOUT_SECS),
            max_retries: CrawlerConfig::default().max_retries,
            retry_delay: CrawlerConfig::default().retry_delay,
            scoring: ScoringConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_path(mut self, path: PathBuf) -> Self {
        self.output_path = path;
        self
    }

    pub fn with_stats_path(mut self, path: Option<PathBuf>) -> Self {
        self.stats_path = path;
        self
    }

    pub fn with_mmdb_path(mut self, path: Option<PathBuf>) -> Self {
        self.mmdb_path = path;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig::new()
            .with_concurrency(self.concurrency)
            .with_retries(self.max_retries, self.retry_delay)
    }

    /// Registry over raw source URLs, each with the configured timeout
    pub fn build_registry<I, S>(&self, urls: I) -> SourceRegistry
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        SourceRegistry::from_urls(urls, self.timeout)
    }

    /// Assemble a harvester over the given transport.
    ///
    /// A geo database that fails to open is logged and skipped.
    pub fn build_harvester<T: Transport>(&self, registry: SourceRegistry, transport: T) -> Harvester<T> {
        let crawler = Crawler::with_transport(self.crawler_config(), transport);
        let mut harvester = Harvester::new(registry, crawler, self.output_path.clone())
            .with_scoring(self.scoring.clone());

        if let Some(path) = &self.stats_path {
            harvester = harvester.with_stats_path(path.clone());
        }
        if let Some(path) = &self.mmdb_path {
            match GeoLocator::from_path(path) {
                Ok(geo) => harvester = harvester.with_geo(Box::new(geo)),
                Err(e) => tracing::warn!(path = %path.display(), "geo data unavailable: {}", e),
            }
        }
        harvester
    }
}
