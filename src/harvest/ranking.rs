//! Per-config scoring, ordering and output serialization

use crate::harvest::geo::{resolve_country, GeoLookup};
use crate::harvest::models::CandidateConfig;
use crate::harvest::protocols::{Protocol, ProtocolCatalog};
use crate::harvest::registry::SourceRegistry;
use crate::Result;
use anyhow::Context;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Bonus for configs whose address resolved to a country
pub const GEO_BONUS: f64 = 10.0;

/// Penalty for configs without a resolvable IPv4 address
pub const GEO_PENALTY: f64 = 5.0;

/// Characters per point of the length term
const LENGTH_DIVISOR: f64 = 20.0;

/// Upper bound of the length term
const LENGTH_CAP: f64 = 15.0;

/// Fixed ranking among protocols
pub fn protocol_base_score(protocol: Protocol) -> f64 {
    match protocol {
        Protocol::Vless => 40.0,
        Protocol::Trojan => 35.0,
        Protocol::Hysteria2 => 30.0,
        Protocol::Tuic => 25.0,
    }
}

/// Score of a config before the source multiplier
pub fn base_score(record: &CandidateConfig) -> f64 {
    let length = (record.config.chars().count() as f64 / LENGTH_DIVISOR).min(LENGTH_CAP);
    let geo = if record.country_code.is_some() {
        GEO_BONUS
    } else {
        -GEO_PENALTY
    };
    protocol_base_score(record.protocol) + length + geo
}

/// Scale a config score by the quality of its source
pub fn apply_source_multiplier(score: f64, source_score: f64) -> f64 {
    score * (1.0 + source_score / 100.0)
}

/// Orders the configs of a run
pub struct Ranker<'a> {
    catalog: &'a ProtocolCatalog,
    geo: Option<&'a dyn GeoLookup>,
}

impl<'a> Ranker<'a> {
    pub fn new(catalog: &'a ProtocolCatalog) -> Self {
        Self { catalog, geo: None }
    }

    pub fn with_geo(mut self, geo: &'a dyn GeoLookup) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Score, deduplicate, sort and cap the configs of a run
    pub fn rank(&self, records: Vec<CandidateConfig>, registry: &SourceRegistry) -> Vec<CandidateConfig> {
        let source_scores: HashMap<&str, f64> = registry
            .sources()
            .iter()
            .map(|s| (s.key.as_str(), s.metrics.overall_score))
            .collect();

        let mut best: HashMap<String, CandidateConfig> = HashMap::new();
        for mut record in records {
            if record.country_code.is_none() {
                if let Some(geo) = self.geo {
                    record.country_code = resolve_country(geo, &record.config);
                }
            }
            let source_score = source_scores.get(record.source_key.as_str()).copied().unwrap_or(0.0);
            record.score = apply_source_multiplier(base_score(&record), source_score);

            match best.get(&record.config) {
                Some(existing) if existing.score >= record.score => {}
                _ => {
                    best.insert(record.config.clone(), record);
                }
            }
        }

        let mut ranked: Vec<CandidateConfig> = best.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| self.priority(a.protocol).cmp(&self.priority(b.protocol)))
        });

        self.apply_limits(ranked)
    }

    fn priority(&self, protocol: Protocol) -> u8 {
        self.catalog.spec(protocol).map_or(u8::MAX, |s| s.priority)
    }

    fn apply_limits(&self, ranked: Vec<CandidateConfig>) -> Vec<CandidateConfig> {
        let mut counts: BTreeMap<Protocol, u64> = BTreeMap::new();
        let kept: Vec<CandidateConfig> = ranked
            .into_iter()
            .filter(|record| {
                let max = self.catalog.spec(record.protocol).map_or(0, |s| s.max_configs);
                let count = counts.entry(record.protocol).or_insert(0);
                if *count >= max {
                    return false;
                }
                *count += 1;
                true
            })
            .collect();

        for spec in self.catalog.specs().iter().filter(|s| s.enabled) {
            let count = counts.get(&spec.protocol).copied().unwrap_or(0);
            if count < spec.min_configs {
                warn!(
                    protocol = %spec.protocol,
                    count,
                    min = spec.min_configs,
                    "protocol below its minimum"
                );
            }
        }
        debug!(records = kept.len(), "ranked configs");
        kept
    }
}

/// Write ranked configs, one per line; an empty list yields an empty file
pub fn write_output<P: AsRef<Path>>(records: &[CandidateConfig], path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }

    let mut content: String = records
        .iter()
        .map(CandidateConfig::to_output_line)
        .collect::<Vec<_>>()
        .join("\n");
    if !content.is_empty() {
        content.push('\n');
    }

    fs::write(path, content).with_context(|| format!("writing output {}", path.display()))?;
    Ok(())
}
