//! Entry point tying ingestion and aggregation together: a decoded metric
//! map and a configuration go in, one row per calendar day comes out.

use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use log::info;

use crate::{
    config::AnalysisConfig,
    error::EnpaError,
    metrics::{
        kinds::{MetricKind, MetricTable, Platform},
        metric::Metric,
        raw_metrics::{combine_platforms, RawMetrics},
    },
    rolling::{
        accumulators::{Accumulators, REQUIRED, TRACKED},
        output::{LineSink, OutputRow, RowLayout},
        platform_scale::PlatformScale,
    },
};

/// Which clients an analysis covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Population {
    Platform(Platform),
    /// iOS and Android metrics summed. No platform scale correction is
    /// applied, since it only holds for one platform's reports.
    Combined,
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Population::Platform(platform) => write!(f, "{platform}"),
            Population::Combined => write!(f, "combined"),
        }
    }
}

/// Output of a successful run.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub layout: Arc<RowLayout>,
    pub rows: Vec<OutputRow>,
    /// Soft errors collected during ingestion: unknown metrics, failed
    /// fetches, unusable records.
    pub errors: Vec<String>,
}

/// Runs the aggregation over everything ingested in `raw`. Soft ingestion
/// errors are carried over into the result.
pub fn run(
    raw: &RawMetrics,
    population: Population,
    sink: &mut impl LineSink,
) -> Result<AnalysisResult, EnpaError> {
    let mut result = run_metrics(
        raw.metrics(),
        raw.table(),
        raw.config(),
        population,
        sink,
    )?;
    result.errors = raw.errors().to_vec();
    Ok(result)
}

/// Runs the aggregation over an already decoded metric map.
pub fn run_metrics(
    metrics: &HashMap<String, Metric>,
    table: &MetricTable,
    config: &AnalysisConfig,
    population: Population,
    sink: &mut impl LineSink,
) -> Result<AnalysisResult, EnpaError> {
    config.validate()?;

    let mut resolved: BTreeMap<MetricKind, Cow<'_, Metric>> = BTreeMap::new();
    for kind in TRACKED.into_iter().chain([MetricKind::UserRisk]) {
        let metric = match population {
            Population::Platform(platform) => table
                .id(platform, kind)
                .and_then(|id| metrics.get(id))
                .map(Cow::Borrowed),
            Population::Combined => {
                combine_platforms(metrics, table, kind)?.map(Cow::Owned)
            }
        };
        match metric {
            Some(metric) => {
                resolved.insert(kind, metric);
            }
            None if REQUIRED.contains(&kind) => {
                let name = match population {
                    Population::Platform(platform) => table
                        .id(platform, kind)
                        .unwrap_or(kind.generic_id())
                        .to_string(),
                    Population::Combined => kind.generic_id().to_string(),
                };
                let mut available: Vec<&str> =
                    metrics.keys().map(String::as_str).collect();
                available.sort_unstable();
                return Err(EnpaError::MissingMetric {
                    name,
                    available: available.join(", "),
                });
            }
            None => info!("No {kind} data for {population}, skipping it"),
        }
    }

    let scale = match population {
        Population::Platform(Platform::Ios) => resolved
            .get(&MetricKind::UserRisk)
            .map(|reference| PlatformScale::new(&**reference)),
        _ => None,
    };
    let tracked: BTreeMap<MetricKind, &Metric> = resolved
        .iter()
        .filter(|(kind, _)| TRACKED.contains(*kind))
        .map(|(kind, metric)| (*kind, &**metric))
        .collect();

    let mut accumulators = Accumulators::new(config, tracked, scale)?;
    accumulators.run(sink)?;
    let layout = accumulators.layout().clone();
    let rows = accumulators.into_rows();
    info!("Produced {} rows for {population}", rows.len());

    Ok(AnalysisResult {
        layout,
        rows,
        errors: vec![],
    })
}
