use chrono::{DateTime, NaiveDate, Utc};
use log::debug;

use crate::metrics::metric::{Metric, Sample};

/// Day-level correction for platforms that drop a share of their reports.
///
/// Every client reports the reference metric exactly once per window, so the
/// debiased bucket total should match the client count. The ratio between the
/// two is multiplied into every other metric's estimates for the same key.
#[derive(Debug, Clone, Copy)]
pub struct PlatformScale<'a> {
    reference: &'a Metric,
}

impl<'a> PlatformScale<'a> {
    pub fn new(reference: &'a Metric) -> Self {
        Self { reference }
    }

    pub fn reference(&self) -> &'a Metric {
        self.reference
    }

    /// `1.0` when the reference metric has no data for `day`.
    pub fn scale_for_day(&self, day: &NaiveDate) -> f64 {
        self.scale(self.reference.day_sample(day))
    }

    /// `1.0` when the reference metric has no data for `window_start`.
    pub fn scale_for_window(&self, window_start: &DateTime<Utc>) -> f64 {
        self.scale(self.reference.window_sample(window_start))
    }

    fn scale(&self, sample: Option<Sample<'_>>) -> f64 {
        let Some(sample) = sample else {
            return 1.0;
        };
        let debiased: f64 = self
            .reference
            .noise_model()
            .debias_all(sample.client_count, sample.bucket_sums, 1.0)
            .iter()
            .sum();
        if debiased <= 0.0 || !debiased.is_finite() {
            debug!(
                "No usable scale from {}: debiased total {debiased}",
                self.reference.metric_id
            );
            return 1.0;
        }
        sample.client_count as f64 / debiased
    }
}
