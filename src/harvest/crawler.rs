//! Fetch orchestration
//!
//! This module provides functionality for:
//! - Fetching source content through a pluggable transport
//! - Running one fetch-extract-score cycle per enabled source, concurrently
//! - Isolating failures so one source never affects another

use crate::error::Error;
use crate::harvest::models::{CandidateConfig, Source};
use crate::harvest::parser::{extract_text_from_html, ConfigParser};
use crate::harvest::protocols::ProtocolCatalog;
use crate::harvest::registry;
use crate::harvest::scoring::Scorer;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of simultaneous fetch cycles
const DEFAULT_CONCURRENCY: usize = 60;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Default extra attempts after a failed request
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default pause between attempts
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// Body of a successful fetch
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: String,
    pub elapsed: Duration,
}

/// Retrieves the raw content of a source.
///
/// Retries, if any, belong to the implementation; the crawler calls once per cycle.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Fetched, Error>;
}

/// Transport over HTTP GET with bounded retries
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    pub fn with_config(config: &CrawlerConfig) -> Result<Self, Error> {
        Ok(Self::new(&config.user_agent)?.with_retries(config.max_retries, config.retry_delay))
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    async fn fetch_once(&self, url: &str, timeout: Duration) -> Result<String, Error> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { Error::Timeout(timeout) } else { Error::Transport(e) })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        response.text().await.map_err(Error::from)
    }
}

/// Connection failures and server errors are worth another attempt
fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Transport(e) => !e.is_timeout(),
        Error::Status(code) => *code >= 500,
        _ => false,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    /// Fetch with up to `max_retries` extra attempts, all within `timeout`
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Fetched, Error> {
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(Error::Timeout(timeout));
            }

            let error = match self.fetch_once(url, remaining).await {
                Ok(body) => {
                    return Ok(Fetched {
                        body,
                        elapsed: start.elapsed(),
                    })
                }
                Err(Error::Timeout(_)) => return Err(Error::Timeout(timeout)),
                Err(e) => e,
            };

            attempt += 1;
            if attempt > self.max_retries || !is_retryable(&error) {
                return Err(error);
            }
            if start.elapsed() + self.retry_delay >= timeout {
                debug!(url, attempt, "no time left for another attempt");
                return Err(error);
            }

            debug!(
                url,
                attempt,
                max_retries = self.max_retries,
                delay_ms = self.retry_delay.as_millis() as u64,
                "retrying fetch: {}",
                error
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// Key of the source that was crawled
    pub source: String,
    /// Configs accepted from the source
    pub records: Vec<CandidateConfig>,
    /// Error message if the fetch failed
    pub error: Option<String>,
}

impl CrawlResult {
    pub fn success(source: String, records: Vec<CandidateConfig>) -> Self {
        Self {
            source,
            records,
            error: None,
        }
    }

    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            records: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for the crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Maximum in-flight fetch cycles
    pub concurrency: usize,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Extra attempts the HTTP transport makes after a retryable failure
    pub max_retries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }
}

/// Runs fetch cycles over the enabled sources
pub struct Crawler<T> {
    config: CrawlerConfig,
    transport: T,
}

impl Crawler<HttpTransport> {
    /// Crawler over HTTP with the given configuration
    pub fn http(config: CrawlerConfig) -> Result<Self, Error> {
        let transport = HttpTransport::with_config(&config)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> Crawler<T> {
    pub fn with_transport(config: CrawlerConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Crawl every enabled source and collect all accepted configs
    pub async fn crawl(
        &self,
        sources: &mut [Source],
        catalog: &ProtocolCatalog,
        scorer: &Scorer,
        cancel: &CancellationToken,
    ) -> Vec<CandidateConfig> {
        self.crawl_sources(sources, catalog, scorer, cancel)
            .await
            .into_iter()
            .flat_map(|result| result.records)
            .collect()
    }

    /// Crawl every enabled source, returning one result per source.
    ///
    /// Completes only after every cycle has finished.
    pub async fn crawl_sources(
        &self,
        sources: &mut [Source],
        catalog: &ProtocolCatalog,
        scorer: &Scorer,
        cancel: &CancellationToken,
    ) -> Vec<CrawlResult> {
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let results: Vec<CrawlResult> = stream::iter(sources.iter_mut().filter(|s| s.enabled))
            .map(|source| {
                let sem = Arc::clone(&semaphore);
                async move {
                    let Ok(_permit) = sem.acquire().await else {
                        return self.fail_source(source, scorer, Error::Cancelled);
                    };
                    self.crawl_source(source, catalog, scorer, cancel).await
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            sources = results.len(),
            failed,
            records = results.iter().map(|r| r.records.len()).sum::<usize>(),
            "crawl finished"
        );
        results
    }

    /// One fetch-extract-score cycle for a single source
    pub async fn crawl_source(
        &self,
        source: &mut Source,
        catalog: &ProtocolCatalog,
        scorer: &Scorer,
        cancel: &CancellationToken,
    ) -> CrawlResult {
        let url = registry::fetch_url(source);
        let timeout = source.timeout;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            fetched = tokio::time::timeout(timeout, self.transport.fetch(&url, timeout)) => {
                fetched.unwrap_or(Err(Error::Timeout(timeout)))
            }
        };

        match outcome {
            Ok(fetched) => {
                let text = if registry::is_channel_feed(source) {
                    extract_text_from_html(&fetched.body)
                } else {
                    fetched.body
                };
                let extraction = ConfigParser::new(catalog).extract(&text);
                source.metrics.record_extraction(&extraction);
                scorer.update_on_fetch_outcome(source, true, fetched.elapsed.as_secs_f64());
                scorer.record_check(source);

                debug!(
                    source = %source.key,
                    lines = extraction.lines_examined,
                    accepted = extraction.records.len(),
                    "crawled source"
                );
                let records = extraction
                    .records
                    .into_iter()
                    .map(|(protocol, config)| CandidateConfig::new(config, protocol, source.key.clone()))
                    .collect();
                CrawlResult::success(source.key.clone(), records)
            }
            Err(e) => self.fail_source(source, scorer, e),
        }
    }

    fn fail_source(&self, source: &mut Source, scorer: &Scorer, error: Error) -> CrawlResult {
        warn!(source = %source.key, "fetch failed: {}", error);
        scorer.update_on_fetch_outcome(source, false, 0.0);
        scorer.record_check(source);
        CrawlResult::failure(source.key.clone(), error.to_string())
    }
}
