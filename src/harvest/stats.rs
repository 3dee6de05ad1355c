//! Per-source statistics snapshot, written as JSON after each run

use crate::error::Error;
use crate::harvest::models::{Metrics, Source};
use crate::harvest::registry::SourceRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub url: String,
    pub key: String,
    pub enabled: bool,
    pub check_count: u64,
    pub error_count: u64,
    pub metrics: Metrics,
}

impl From<&Source> for SourceStats {
    fn from(source: &Source) -> Self {
        Self {
            url: source.url.clone(),
            key: source.key.clone(),
            enabled: source.enabled,
            check_count: source.check_count,
            error_count: source.error_count,
            metrics: source.metrics.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub generated_at: DateTime<Utc>,
    pub enabled_sources: usize,
    pub sources: Vec<SourceStats>,
}

impl StatsReport {
    pub fn from_registry(registry: &SourceRegistry) -> Self {
        Self {
            generated_at: Utc::now(),
            enabled_sources: registry.enabled_count(),
            sources: registry.sources().iter().map(SourceStats::from).collect(),
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
