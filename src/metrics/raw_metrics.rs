use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Display,
};

use chrono::{DateTime, NaiveTime, Utc};
use log::{debug, info, warn};

use super::{
    kinds::{MetricKind, MetricTable, Platform},
    metric::Metric,
    record::RawReportRecord,
};
use crate::{config::AnalysisConfig, error::EnpaError};

type RecordKey = (String, String, DateTime<Utc>);

/// Folds a stream of raw report records into one [`Metric`] per metric id,
/// applying the exclusion and dedup rules on the way.
///
/// Not meant to be shared between threads: records are added one at a time.
#[derive(Debug)]
pub struct RawMetrics {
    config: AnalysisConfig,
    table: MetricTable,
    metrics: HashMap<String, Metric>,
    excluded_hashes: HashSet<String>,
    seen: HashSet<RecordKey>,
    errors: Vec<String>,
}

impl RawMetrics {
    pub fn new(config: AnalysisConfig, table: MetricTable) -> Self {
        Self {
            config,
            table,
            metrics: HashMap::new(),
            excluded_hashes: HashSet::new(),
            seen: HashSet::new(),
            errors: vec![],
        }
    }

    /// Adds one record. Only schema violations are returned as errors;
    /// records that are merely unusable are logged, collected in
    /// [`RawMetrics::errors`] where relevant, and skipped.
    pub fn add_record(
        &mut self,
        record: &RawReportRecord,
    ) -> Result<(), EnpaError> {
        let Some((platform, _kind)) = self.table.resolve(&record.metric_id)
        else {
            let message = format!(
                "Unknown metric {} (full id {})",
                record.metric_id, record.full_id
            );
            warn!("{message}");
            self.errors.push(message);
            return Ok(());
        };

        if record.epsilon.is_nan() || record.epsilon <= 0.0 {
            let message = format!(
                "Invalid epsilon {} for {} at {}",
                record.epsilon, record.metric_id, record.window_start
            );
            warn!("{message}");
            self.errors.push(message);
            return Ok(());
        }

        if let Some(start_date) = self.config.start_date {
            let cutoff = start_date.and_time(NaiveTime::MIN).and_utc();
            if record.window_start < cutoff {
                debug!(
                    "Skipping {} at {}: before start date {start_date}",
                    record.metric_id, record.window_start
                );
                return Ok(());
            }
        }

        let alignment = &self.config.calendar_alignment;
        if platform == alignment.platform
            && record.window_start < alignment.epoch
            && record.provider != alignment.exempt_provider
        {
            debug!(
                "Skipping {} from {} at {}: before calendar alignment epoch",
                record.metric_id, record.provider, record.window_start
            );
            return Ok(());
        }

        let hash = record.family_hash();
        if self.excluded_hashes.contains(hash) {
            debug!("Skipping {}: hash {hash} is excluded", record.full_id);
            return Ok(());
        }
        if let Some(config_start) = self.config.config_start {
            if record.window_start < config_start
                && record.client_count < self.config.noise_floor
            {
                info!(
                    "Excluding hash {hash}: {} has {} clients at {}, \
                     before config start {config_start}",
                    record.metric_id, record.client_count, record.window_start
                );
                self.excluded_hashes.insert(hash.to_string());
                return Ok(());
            }
        }

        let key = (
            record.full_id.clone(),
            record.provider.clone(),
            record.window_start,
        );
        if !self.seen.insert(key) {
            debug!(
                "Skipping duplicate record {} from {} at {}",
                record.full_id, record.provider, record.window_start
            );
            return Ok(());
        }

        match self.metrics.get_mut(&record.metric_id) {
            Some(metric) => metric.merge_record(record)?,
            None => {
                debug!("First record for {}", record.metric_id);
                self.metrics.insert(
                    record.metric_id.clone(),
                    Metric::from_record(record),
                );
            }
        }
        Ok(())
    }

    pub fn add_records<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a RawReportRecord>,
    ) -> Result<(), EnpaError> {
        for record in records {
            self.add_record(record)?;
        }
        Ok(())
    }

    /// Records a transport failure for one metric. The remaining metrics are
    /// still processed.
    pub fn record_fetch_error(
        &mut self,
        metric_name: &str,
        error: impl Display,
    ) {
        let message = format!("Failed to fetch {metric_name}: {error}");
        warn!("{message}");
        self.errors.push(message);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn excluded_hashes(&self) -> &HashSet<String> {
        &self.excluded_hashes
    }

    pub fn metric(&self, metric_id: &str) -> Option<&Metric> {
        self.metrics.get(metric_id)
    }

    pub fn metrics(&self) -> &HashMap<String, Metric> {
        &self.metrics
    }

    pub fn table(&self) -> &MetricTable {
        &self.table
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The metric for `kind` as reported by `platform`.
    pub fn for_kind(
        &self,
        platform: Platform,
        kind: MetricKind,
    ) -> Option<&Metric> {
        let id = self.table.id(platform, kind)?;
        self.metrics.get(id)
    }

    /// The metric for `kind` with both platforms' reports summed.
    pub fn combined(
        &self,
        kind: MetricKind,
    ) -> Result<Option<Metric>, EnpaError> {
        combine_platforms(&self.metrics, &self.table, kind)
    }

    /// Per metric id, how many days have data. Handy for logging a summary
    /// of what was ingested.
    pub fn day_counts(&self) -> BTreeMap<&str, usize> {
        self.metrics
            .iter()
            .map(|(id, metric)| (id.as_str(), metric.days().count()))
            .collect()
    }

    pub fn into_metrics(self) -> HashMap<String, Metric> {
        self.metrics
    }
}

/// Sums the iOS and Android metrics for `kind` found in `metrics`. Falls back
/// to whichever platform has data when only one does.
pub fn combine_platforms(
    metrics: &HashMap<String, Metric>,
    table: &MetricTable,
    kind: MetricKind,
) -> Result<Option<Metric>, EnpaError> {
    let lookup = |platform| {
        table
            .id(platform, kind)
            .and_then(|id| metrics.get(id))
    };
    let combined = match (lookup(Platform::Ios), lookup(Platform::Android)) {
        (Some(ios), Some(android)) => Some(ios.combine(android)?),
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (None, None) => None,
    };
    Ok(combined)
}
