//! Harvest module for collecting proxy configs from public sources
//!
//! This module provides functionality for:
//! - Normalizing and deduplicating sources
//! - Extracting configs from noisy, concatenated or base64-wrapped text
//! - Scoring sources and disabling the ones that stay poor
//! - Ranking the collected configs and writing them out

pub mod crawler;
pub mod geo;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod protocols;
pub mod ranking;
pub mod registry;
pub mod scoring;
pub mod stats;

pub use crawler::{CrawlResult, Crawler, CrawlerConfig, Fetched, HttpTransport, Transport};
pub use geo::{GeoLocator, GeoLookup};
pub use models::{CandidateConfig, Metrics, Source};
pub use parser::{ConfigParser, Extraction};
pub use pipeline::{Harvester, RunOutcome};
pub use protocols::{Protocol, ProtocolCatalog, ProtocolSpec};
pub use ranking::Ranker;
pub use registry::SourceRegistry;
pub use scoring::{Scorer, ScoringConfig};
pub use stats::StatsReport;
