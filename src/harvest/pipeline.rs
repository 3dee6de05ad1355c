//! One harvesting run: crawl, adapt limits, rank, emit

use crate::harvest::crawler::{Crawler, Transport};
use crate::harvest::geo::GeoLookup;
use crate::harvest::models::CandidateConfig;
use crate::harvest::protocols::ProtocolCatalog;
use crate::harvest::ranking::{write_output, Ranker};
use crate::harvest::registry::SourceRegistry;
use crate::harvest::scoring::{adjust_protocol_limits, Scorer, ScoringConfig};
use crate::harvest::stats::StatsReport;
use crate::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// No source was enabled; an empty artifact was written
    NoSources,
    /// Sources were crawled and the ranked configs were written
    Completed { records: Vec<CandidateConfig> },
    /// The run's results were written, but no source is left enabled for another
    Exhausted { records: Vec<CandidateConfig> },
}

impl RunOutcome {
    pub fn records(&self) -> &[CandidateConfig] {
        match self {
            RunOutcome::NoSources => &[],
            RunOutcome::Completed { records } | RunOutcome::Exhausted { records } => records,
        }
    }

    /// Whether another run over the same registry can do any work
    pub fn is_final(&self) -> bool {
        !matches!(self, RunOutcome::Completed { .. })
    }
}

/// State owned by a harvesting process
pub struct Harvester<T> {
    catalog: ProtocolCatalog,
    registry: SourceRegistry,
    crawler: Crawler<T>,
    scoring: ScoringConfig,
    geo: Option<Box<dyn GeoLookup>>,
    output_path: PathBuf,
    stats_path: Option<PathBuf>,
}

impl<T: Transport> Harvester<T> {
    pub fn new(registry: SourceRegistry, crawler: Crawler<T>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog: ProtocolCatalog::default(),
            registry,
            crawler,
            scoring: ScoringConfig::default(),
            geo: None,
            output_path: output_path.into(),
            stats_path: None,
        }
    }

    pub fn with_catalog(mut self, catalog: ProtocolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_geo(mut self, geo: Box<dyn GeoLookup>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_stats_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stats_path = Some(path.into());
        self
    }

    pub fn catalog(&self) -> &ProtocolCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Run one full cycle over the enabled sources.
    ///
    /// Only a failure to write the output artifact is returned as an error.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunOutcome> {
        if self.registry.is_exhausted() {
            warn!("no enabled sources, writing empty output");
            write_output(&[], &self.output_path)?;
            self.write_stats();
            return Ok(RunOutcome::NoSources);
        }

        info!(sources = self.registry.enabled_count(), "starting crawl");
        let scorer = Scorer::new(self.scoring.clone(), &self.catalog);
        let records = self
            .crawler
            .crawl(self.registry.sources_mut(), &self.catalog, &scorer, cancel)
            .await;

        for source in self.registry.sources() {
            adjust_protocol_limits(&mut self.catalog, &source.metrics, &self.scoring);
        }

        let exhausted = self.registry.is_exhausted();
        if exhausted {
            warn!("every source is now disabled");
        }

        let mut ranker = Ranker::new(&self.catalog);
        if let Some(geo) = self.geo.as_deref() {
            ranker = ranker.with_geo(geo);
        }
        let ranked = ranker.rank(records, &self.registry);

        write_output(&ranked, &self.output_path)?;
        info!(
            records = ranked.len(),
            path = %self.output_path.display(),
            "wrote configs"
        );
        self.write_stats();

        if exhausted {
            Ok(RunOutcome::Exhausted { records: ranked })
        } else {
            Ok(RunOutcome::Completed { records: ranked })
        }
    }

    /// Repeat [`Harvester::run`] over the same sources.
    ///
    /// Stops after `rounds` runs (`None` runs until cancelled), when no
    /// source is left enabled, or when `cancel` fires. Returns the last outcome.
    pub async fn run_rounds(
        &mut self,
        rounds: Option<u64>,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let mut round = 0u64;
        loop {
            round += 1;
            debug!(round, "starting round");
            let outcome = self.run(cancel).await?;

            let done = outcome.is_final() || rounds.is_some_and(|max| round >= max) || cancel.is_cancelled();
            if done {
                info!(rounds = round, "harvesting finished");
                return Ok(outcome);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(rounds = round, "harvesting stopped");
                    return Ok(outcome);
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn write_stats(&self) {
        let Some(path) = &self.stats_path else {
            return;
        };
        if let Err(e) = StatsReport::from_registry(&self.registry).write(path) {
            warn!(path = %path.display(), "failed to write stats: {}", e);
        }
    }
}
