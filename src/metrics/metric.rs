use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use serde::Serialize;

use super::record::{day_of, RawReportRecord};
use crate::{error::EnpaError, mechanisms::noise_model::NoiseModel};

/// Noisy bucket sums and client count reported for one day or one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    pub bucket_sums: &'a [i64],
    pub client_count: i64,
}

/// All noisy data for one metric id over the lifetime of an ingestion run.
///
/// Grows monotonically: records are only ever added.
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub metric_id: String,
    pub generic_id: String,
    pub provider: String,
    epsilon: f64,
    #[serde(skip)]
    noise: NoiseModel,
    total_clients: i64,
    bucket_sums_total: Vec<i64>,
    sums_by_day: BTreeMap<NaiveDate, Vec<i64>>,
    sums_by_window: BTreeMap<DateTime<Utc>, Vec<i64>>,
    clients_by_day: BTreeMap<NaiveDate, i64>,
    clients_by_window: BTreeMap<DateTime<Utc>, i64>,
}

impl Metric {
    /// Creates an accumulator seeded with one record.
    pub fn create(
        metric_id: impl Into<String>,
        generic_id: impl Into<String>,
        provider: impl Into<String>,
        epsilon: f64,
        bucket_sums: &[i64],
        client_count: i64,
        window_start: DateTime<Utc>,
    ) -> Self {
        let width = bucket_sums.len();
        let mut this = Self {
            metric_id: metric_id.into(),
            generic_id: generic_id.into(),
            provider: provider.into(),
            epsilon,
            noise: NoiseModel::new(epsilon),
            total_clients: 0,
            bucket_sums_total: vec![0; width],
            sums_by_day: BTreeMap::new(),
            sums_by_window: BTreeMap::new(),
            clients_by_day: BTreeMap::new(),
            clients_by_window: BTreeMap::new(),
        };
        this.accumulate(bucket_sums, client_count, window_start);
        this
    }

    pub fn from_record(record: &RawReportRecord) -> Self {
        Self::create(
            record.metric_id.clone(),
            record.generic_id.clone(),
            record.provider.clone(),
            record.epsilon,
            &record.bucket_sums,
            record.client_count,
            record.window_start,
        )
    }

    /// Adds a further record for the same metric.
    ///
    /// A bucket width that differs from the existing one means the upstream
    /// schema changed, and is fatal.
    pub fn merge(
        &mut self,
        bucket_sums: &[i64],
        client_count: i64,
        window_start: DateTime<Utc>,
    ) -> Result<(), EnpaError> {
        if bucket_sums.len() != self.bucket_width() {
            return Err(EnpaError::BucketWidthMismatch {
                metric_id: self.metric_id.clone(),
                expected: self.bucket_width(),
                actual: bucket_sums.len(),
            });
        }
        self.accumulate(bucket_sums, client_count, window_start);
        Ok(())
    }

    /// Merges a record, also checking that it was noised with the same
    /// epsilon.
    pub fn merge_record(
        &mut self,
        record: &RawReportRecord,
    ) -> Result<(), EnpaError> {
        if record.epsilon != self.epsilon {
            return Err(EnpaError::EpsilonMismatch {
                metric_id: self.metric_id.clone(),
                expected: self.epsilon,
                actual: record.epsilon,
            });
        }
        self.merge(
            &record.bucket_sums,
            record.client_count,
            record.window_start,
        )
    }

    fn accumulate(
        &mut self,
        bucket_sums: &[i64],
        client_count: i64,
        window_start: DateTime<Utc>,
    ) {
        let width = self.bucket_width();
        let day = day_of(&window_start);

        add_into(&mut self.bucket_sums_total, bucket_sums);
        add_into(
            self.sums_by_day.entry(day).or_insert_with(|| vec![0; width]),
            bucket_sums,
        );
        add_into(
            self.sums_by_window
                .entry(window_start)
                .or_insert_with(|| vec![0; width]),
            bucket_sums,
        );
        self.total_clients += client_count;
        *self.clients_by_day.entry(day).or_default() += client_count;
        *self.clients_by_window.entry(window_start).or_default() +=
            client_count;
    }

    /// Element-wise sum of two accumulators for the same generic metric,
    /// typically the iOS and Android versions of it.
    pub fn combine(&self, other: &Metric) -> Result<Metric, EnpaError> {
        let mismatch = |field| EnpaError::IncompatibleMetrics {
            left: self.metric_id.clone(),
            right: other.metric_id.clone(),
            field,
        };
        if self.provider != other.provider {
            return Err(mismatch("provider"));
        }
        if self.generic_id != other.generic_id {
            return Err(mismatch("generic id"));
        }
        if self.bucket_width() != other.bucket_width() {
            return Err(mismatch("bucket width"));
        }
        if self.epsilon != other.epsilon {
            return Err(mismatch("epsilon"));
        }
        debug!("Combining {} with {}", self.metric_id, other.metric_id);

        let mut combined = self.clone();
        combined.metric_id = self.generic_id.clone();
        for (window_start, sums) in &other.sums_by_window {
            let clients = other
                .clients_by_window
                .get(window_start)
                .copied()
                .unwrap_or_default();
            combined.accumulate(sums, clients, *window_start);
        }
        Ok(combined)
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn noise_model(&self) -> NoiseModel {
        self.noise
    }

    pub fn bucket_width(&self) -> usize {
        self.bucket_sums_total.len()
    }

    pub fn total_clients(&self) -> i64 {
        self.total_clients
    }

    pub fn bucket_sums_total(&self) -> &[i64] {
        &self.bucket_sums_total
    }

    /// Days with data, ascending.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.sums_by_day.keys().copied()
    }

    pub fn day_sample(&self, day: &NaiveDate) -> Option<Sample<'_>> {
        let bucket_sums = self.sums_by_day.get(day)?;
        let client_count = self.clients_by_day.get(day).copied()?;
        Some(Sample {
            bucket_sums,
            client_count,
        })
    }

    pub fn window_sample(
        &self,
        window_start: &DateTime<Utc>,
    ) -> Option<Sample<'_>> {
        let bucket_sums = self.sums_by_window.get(window_start)?;
        let client_count = self.clients_by_window.get(window_start).copied()?;
        Some(Sample {
            bucket_sums,
            client_count,
        })
    }

    /// Debiased estimate of every bucket over all records.
    pub fn debiased_total(&self) -> Vec<f64> {
        self.noise
            .debias_all(self.total_clients, &self.bucket_sums_total, 1.0)
    }

    pub fn debiased_bucket(&self, bucket: usize) -> f64 {
        self.noise.debias(
            self.total_clients as f64,
            self.bucket_sums_total[bucket] as f64,
        )
    }

    /// Standard deviation of a single debiased bucket over all records.
    pub fn std_dev(&self) -> f64 {
        self.noise.std_dev(self.total_clients as f64)
    }

    /// Per day, the debiased count of `bucket` as a percentage of the clients
    /// reporting that day. Days without clients are left out.
    pub fn debiased_percentage_by_day(
        &self,
        bucket: usize,
    ) -> BTreeMap<NaiveDate, f64> {
        self.sums_by_day
            .iter()
            .filter_map(|(day, sums)| {
                let clients = self.clients_by_day.get(day).copied()?;
                if clients <= 0 {
                    return None;
                }
                let estimate =
                    self.noise.debias(clients as f64, sums[bucket] as f64);
                Some((*day, 100.0 * estimate / clients as f64))
            })
            .collect()
    }

    /// Number of buckets whose total debiased estimate exceeds `k` standard
    /// deviations. Used as a data quality check: a bucket that should be
    /// empty but stands out of the noise points at a client bug.
    pub fn outlier_count(&self, k: f64) -> usize {
        let threshold = k * self.std_dev();
        self.debiased_total()
            .into_iter()
            .filter(|estimate| *estimate > threshold)
            .count()
    }
}

fn add_into(target: &mut [i64], values: &[i64]) {
    for (t, v) in target.iter_mut().zip(values) {
        *t += v;
    }
}
