use std::{collections::BTreeMap, sync::Arc};

use chrono::NaiveDate;
use log::{debug, info};

use super::{
    fixed_length::FixedLengthAccumulator,
    notification_aging::NotificationShown,
    output::{LineSink, OutputRow, RowLayout},
    platform_scale::PlatformScale,
};
use crate::{
    config::AnalysisConfig,
    error::EnpaError,
    metrics::{
        kinds::{MetricKind, DELAY_RANGES},
        metric::Metric,
    },
};

/// Metrics that must report on a day for derived ratios to be computed.
pub const REQUIRED: [MetricKind; 3] = [
    MetricKind::CodeVerified,
    MetricKind::KeysUploaded,
    MetricKind::NotificationShown,
];

/// Metrics with a rolling accumulator, in output column order.
pub const TRACKED: [MetricKind; 6] = [
    MetricKind::CodeVerified,
    MetricKind::KeysUploaded,
    MetricKind::NotificationShown,
    MetricKind::NotificationInteraction,
    MetricKind::DateExposure,
    MetricKind::SecondaryAttack,
];

/// `numerator / denominator`, blank when either side is missing or the
/// denominator is not positive.
pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (numerator, denominator) = (numerator?, denominator?);
    if !(denominator > 0.0) {
        return None;
    }
    Some(numerator / denominator).filter(|r| r.is_finite())
}

/// Secondary attack rate corrected for background notifications:
/// `(observed - baseline * background) / (1 - background)`.
///
/// `observed` is the verification rate among notified clients, `baseline`
/// the verification rate among all clients and `background` the fraction of
/// all clients showing a notification for unrelated reasons.
pub fn secondary_attack_rate(
    observed: f64,
    baseline: f64,
    background: f64,
) -> Option<f64> {
    ratio(
        Some(observed - baseline * background),
        Some(1.0 - background),
    )
}

/// Background notification rate without date-of-exposure data: the daily
/// notification rate times half the attribution threshold.
///
/// This is an approximation that assumes notifications arrive on average
/// halfway through the attribution window.
pub fn approximate_background_rate(
    daily_notification_rate: f64,
    days_since_exposure_threshold: usize,
) -> f64 {
    daily_notification_rate * days_since_exposure_threshold as f64 / 2.0
}

/// Rolling accumulators for every tracked metric, advanced one calendar day
/// at a time.
///
/// Days must be processed in strictly increasing order, each at most once.
/// Each processed day produces one [`OutputRow`], emitted to the sink before
/// the accumulators roll over.
#[derive(Debug)]
pub struct Accumulators<'a> {
    num_categories: usize,
    days_since_exposure_threshold: usize,
    metrics: BTreeMap<MetricKind, &'a Metric>,
    accumulators: BTreeMap<MetricKind, FixedLengthAccumulator>,
    notifications_shown: NotificationShown,
    scale: Option<PlatformScale<'a>>,
    layout: Arc<RowLayout>,
    last_day: Option<NaiveDate>,
    rows: Vec<OutputRow>,
}

impl<'a> Accumulators<'a> {
    pub fn new(
        config: &AnalysisConfig,
        metrics: BTreeMap<MetricKind, &'a Metric>,
        scale: Option<PlatformScale<'a>>,
    ) -> Result<Self, EnpaError> {
        config.validate()?;
        let num_categories = config.num_categories;

        for kind in REQUIRED {
            if !metrics.contains_key(&kind) {
                let available = metrics
                    .values()
                    .map(|m| m.metric_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(EnpaError::MissingMetric {
                    name: kind.generic_id().to_string(),
                    available,
                });
            }
        }

        let mut accumulators = BTreeMap::new();
        let mut tracked = vec![];
        for kind in TRACKED {
            let width = kind.bucket_width(num_categories).unwrap_or_default();
            tracked.push((kind, width));
            let Some(metric) = metrics.get(&kind) else {
                debug!("No {kind} metric, its columns stay blank");
                continue;
            };
            if metric.bucket_width() != width {
                return Err(EnpaError::BucketWidthMismatch {
                    metric_id: metric.metric_id.clone(),
                    expected: width,
                    actual: metric.bucket_width(),
                });
            }
            accumulators.insert(
                kind,
                FixedLengthAccumulator::new(
                    config.rolling_window_days,
                    width,
                    metric.noise_model(),
                ),
            );
        }

        Ok(Self {
            num_categories,
            days_since_exposure_threshold: config.days_since_exposure_threshold,
            metrics,
            accumulators,
            notifications_shown: NotificationShown::new(
                num_categories,
                config.days_since_exposure_threshold,
            ),
            scale,
            layout: Arc::new(RowLayout::new(&tracked, num_categories)),
            last_day: None,
            rows: vec![],
        })
    }

    pub fn layout(&self) -> &Arc<RowLayout> {
        &self.layout
    }

    pub fn rows(&self) -> &[OutputRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<OutputRow> {
        self.rows
    }

    pub fn accumulator(
        &self,
        kind: MetricKind,
    ) -> Option<&FixedLengthAccumulator> {
        self.accumulators.get(&kind)
    }

    pub fn notifications_shown(&self) -> &NotificationShown {
        &self.notifications_shown
    }

    /// First and last day on which any tracked metric has data.
    pub fn day_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let days = self
            .metrics
            .iter()
            .filter(|(kind, _)| TRACKED.contains(*kind))
            .flat_map(|(_, metric)| metric.days());
        let (mut first, mut last) = (None::<NaiveDate>, None::<NaiveDate>);
        for day in days {
            first = Some(first.map_or(day, |f| f.min(day)));
            last = Some(last.map_or(day, |l| l.max(day)));
        }
        Some((first?, last?))
    }

    pub fn emit_header(&self, sink: &mut impl LineSink) {
        sink.emit_line(&self.layout.header_line());
    }

    /// Emits the header, then processes every calendar day of
    /// [`Accumulators::day_range`] in order.
    pub fn run(&mut self, sink: &mut impl LineSink) -> Result<(), EnpaError> {
        self.emit_header(sink);
        let Some((first, last)) = self.day_range() else {
            info!("No data for any tracked metric, nothing to aggregate");
            return Ok(());
        };
        info!("Aggregating {first} to {last}");
        for day in first.iter_days().take_while(|day| *day <= last) {
            self.update(day, sink)?;
        }
        Ok(())
    }

    /// Processes one day: feeds every metric that reported, computes the
    /// derived ratios when all required metrics reported, emits the row and
    /// rolls every accumulator over.
    pub fn update(
        &mut self,
        day: NaiveDate,
        sink: &mut impl LineSink,
    ) -> Result<&OutputRow, EnpaError> {
        if let Some(last) = self.last_day {
            if day <= last {
                return Err(EnpaError::DayOutOfOrder { day, last });
            }
        }

        let scale = self
            .scale
            .as_ref()
            .map_or(1.0, |scale| scale.scale_for_day(&day));
        let mut row = OutputRow::new(day, self.layout.clone());
        row.set("scale", Some(scale));

        let complete = REQUIRED.iter().all(|kind| {
            self.metrics
                .get(kind)
                .is_some_and(|metric| metric.day_sample(&day).is_some())
        });

        let mut from_exposure_dates = false;
        for (kind, accumulator) in self.accumulators.iter_mut() {
            let Some(sample) = self.metrics[kind].day_sample(&day) else {
                continue;
            };
            let debiased = accumulator.add_debiased_sample(
                sample.bucket_sums,
                sample.client_count,
                scale,
            );
            if *kind == MetricKind::DateExposure {
                self.notifications_shown.add(&debiased, sample.client_count);
                from_exposure_dates = true;
            }
        }

        self.fill_metric_columns(&mut row);
        if complete {
            self.fill_derived_columns(&mut row, from_exposure_dates);
        } else {
            debug!("{day}: incomplete data, derived ratios left blank");
        }

        sink.emit_line(&row.to_line());
        self.rows.push(row);

        for accumulator in self.accumulators.values_mut() {
            accumulator.advance();
        }
        self.notifications_shown.advance();
        self.last_day = Some(day);

        Ok(&self.rows[self.rows.len() - 1])
    }

    fn fill_metric_columns(&self, row: &mut OutputRow) {
        for (kind, accumulator) in &self.accumulators {
            if accumulator.window_days() == 0 {
                continue;
            }
            let prefix = kind.column_prefix();
            let sums = accumulator.bucket_sums();
            for (bucket, sum) in sums.into_iter().enumerate() {
                row.set(&format!("{prefix}_{bucket}"), Some(sum));
            }
            row.set(&format!("{prefix}_sd"), Some(accumulator.std_dev()));
            row.set(
                &format!("{prefix}_days"),
                Some(accumulator.window_days() as f64),
            );
        }

        if let Some(exposure) =
            self.accumulators.get(&MetricKind::DateExposure)
        {
            for category in 0..self.num_categories {
                let start = category * DELAY_RANGES;
                let buckets = start..start + DELAY_RANGES;
                let Some(cdf) = exposure.cumulative_distribution(buckets) else {
                    continue;
                };
                for (range, value) in cdf.into_iter().enumerate() {
                    let column = format!("exposure_cdf_{category}_{range}");
                    row.set(&column, Some(value));
                }
            }
        }
    }

    fn fill_derived_columns(
        &self,
        row: &mut OutputRow,
        from_exposure_dates: bool,
    ) {
        let (Some(verified), Some(keys), Some(notifications)) = (
            self.accumulators.get(&MetricKind::CodeVerified),
            self.accumulators.get(&MetricKind::KeysUploaded),
            self.accumulators.get(&MetricKind::NotificationShown),
        ) else {
            return;
        };
        let categories = 0..self.num_categories;

        let verified_rate = verified.range_rate_per_100k(0..2);
        row.set(
            "consent_rate",
            ratio(keys.range_rate_per_100k(0..2), verified_rate),
        );
        row.set(
            "notification_share",
            ratio(Some(verified.bucket_sum(1)), Some(verified.range_sum(0..2))),
        );
        if let Some(interactions) =
            self.accumulators.get(&MetricKind::NotificationInteraction)
        {
            row.set(
                "claim_rate",
                ratio(
                    interactions.range_rate_per_100k(categories.clone()),
                    notifications.range_rate_per_100k(categories.clone()),
                ),
            );
        }
        row.set(
            "from_exposure_dates",
            Some(if from_exposure_dates { 1.0 } else { 0.0 }),
        );

        let background = |category: usize| {
            if from_exposure_dates {
                Some(self.notifications_shown.background_rate(category))
            } else {
                notifications.rate_per_100k(category).map(|rate| {
                    approximate_background_rate(
                        rate / 100_000.0,
                        self.days_since_exposure_threshold,
                    )
                })
            }
        };
        let mut total_background = Some(0.0);
        for category in categories.clone() {
            let b = background(category);
            row.set(&format!("background_rate_{category}"), b);
            total_background = total_background.zip(b).map(|(t, b)| t + b);
        }
        row.set("background_rate", total_background);

        let Some(secondary_attack) =
            self.accumulators.get(&MetricKind::SecondaryAttack)
        else {
            return;
        };
        let Some(verified_rate) = verified_rate else {
            return;
        };
        let baseline = verified_rate / 100_000.0;

        // Secondary attack and notification rates per 100K, plus background.
        let sar = |attack_rate: Option<f64>,
                   notification_rate: Option<f64>,
                   background: Option<f64>|
         -> Option<f64> {
            let background = background?;
            if from_exposure_dates {
                let observed = ratio(attack_rate, notification_rate)?;
                secondary_attack_rate(observed, baseline, background)
            } else {
                let excess_attacks = attack_rate? - verified_rate * background;
                ratio(Some(excess_attacks), notification_rate)
            }
        };

        for category in categories.clone() {
            let rate = sar(
                secondary_attack.rate_per_100k(category),
                notifications.rate_per_100k(category),
                background(category),
            );
            row.set(&format!("secondary_attack_rate_{category}"), rate);
            row.set(
                &format!("excess_secondary_attack_rate_{category}"),
                rate.map(|r| r - baseline),
            );
        }

        let rate = sar(
            secondary_attack.range_rate_per_100k(categories.clone()),
            notifications.range_rate_per_100k(categories),
            total_background,
        );
        row.set("secondary_attack_rate", rate);
        row.set("excess_secondary_attack_rate", rate.map(|r| r - baseline));
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_ratio_blank_on_bad_denominator() {
        assert_eq!(ratio(Some(1.0), Some(0.0)), None);
        assert_eq!(ratio(Some(1.0), Some(-2.0)), None);
        assert_eq!(ratio(Some(1.0), Some(f64::NAN)), None);
        assert_eq!(ratio(None, Some(2.0)), None);
        assert_eq!(ratio(Some(1.0), None), None);
        assert_eq!(ratio(Some(1.0), Some(4.0)), Some(0.25));
    }

    #[test]
    fn test_secondary_attack_rate() {
        // No background: the observed rate is returned unchanged.
        assert_eq!(secondary_attack_rate(0.07, 0.01, 0.0), Some(0.07));

        // observed = true * (1 - b) + baseline * b
        let (truth, baseline, background) = (0.1, 0.02, 0.25);
        let observed = truth * (1.0 - background) + baseline * background;
        assert_abs_diff_eq!(
            secondary_attack_rate(observed, baseline, background).unwrap(),
            truth,
            epsilon = 1e-12
        );

        // Everyone in the background: no denominator left.
        assert_eq!(secondary_attack_rate(0.1, 0.01, 1.0), None);
        assert_eq!(secondary_attack_rate(0.1, 0.01, 1.5), None);
    }

    #[test]
    fn test_approximate_background_rate() {
        // Known approximation: half of the 14-day attribution window.
        assert_abs_diff_eq!(approximate_background_rate(0.001, 14), 0.007);
    }
}
