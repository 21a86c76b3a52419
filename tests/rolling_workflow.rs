mod common;

use std::collections::BTreeMap;

use anyhow::Result;
use approx::assert_abs_diff_eq;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use enpalib::{
    config::AnalysisConfig,
    error::EnpaError,
    metrics::{kinds::MetricKind, metric::Metric, record::RawReportRecord},
    rolling::{
        accumulators::Accumulators,
        output::{CollectLines, DiscardLines},
    },
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 9, 1, 0, 0, 0).unwrap()
}

fn day(offset: i64) -> NaiveDate {
    (start() + Duration::days(offset)).date_naive()
}

/// Noiseless metric with one record per day. `None` leaves a gap.
fn metric(metric_id: &str, days: &[Option<(Vec<i64>, i64)>]) -> Result<Metric> {
    metric_from(metric_id, 0, days)
}

/// Same as [`metric`], with the first sample `first_day` days after start.
fn metric_from(
    metric_id: &str,
    first_day: i64,
    days: &[Option<(Vec<i64>, i64)>],
) -> Result<Metric> {
    let mut metric: Option<Metric> = None;
    for (i, sample) in days.iter().enumerate() {
        let Some((sums, clients)) = sample else {
            continue;
        };
        let record = RawReportRecord::mock(
            metric_id,
            start() + Duration::days(first_day + i as i64),
            sums.clone(),
            *clients,
        );
        match metric.as_mut() {
            Some(metric) => metric.merge_record(&record)?,
            None => metric = Some(Metric::from_record(&record)),
        }
    }
    metric.ok_or_else(|| anyhow::anyhow!("no samples for {metric_id}"))
}

fn every_day(
    n: usize,
    sums: Vec<i64>,
    clients: i64,
) -> Vec<Option<(Vec<i64>, i64)>> {
    vec![Some((sums, clients)); n]
}

struct Fixture {
    verified: Metric,
    keys: Metric,
    notifications: Metric,
    exposure: Metric,
    secondary_attack: Metric,
}

impl Fixture {
    /// Four days. Keys are missing on day 3, exposure dates stop after
    /// day 2.
    fn new() -> Result<Self> {
        let mut keys = every_day(4, vec![4, 2], 1_000);
        keys[2] = None;
        Ok(Self {
            verified: metric(
                "CodeVerified",
                &every_day(4, vec![10, 5], 1_000),
            )?,
            keys: metric("KeysUploaded", &keys)?,
            notifications: metric(
                "PeriodicExposureNotification",
                &every_day(4, vec![20], 1_000),
            )?,
            exposure: metric(
                "DateExposure",
                &every_day(2, vec![40, 0, 0, 0], 1_000),
            )?,
            secondary_attack: metric(
                "SecondaryAttack",
                &every_day(4, vec![4], 1_000),
            )?,
        })
    }

    fn metrics(&self) -> BTreeMap<MetricKind, &Metric> {
        BTreeMap::from([
            (MetricKind::CodeVerified, &self.verified),
            (MetricKind::KeysUploaded, &self.keys),
            (MetricKind::NotificationShown, &self.notifications),
            (MetricKind::DateExposure, &self.exposure),
            (MetricKind::SecondaryAttack, &self.secondary_attack),
        ])
    }
}

#[test]
fn test_rolling_rows() -> Result<()> {
    common::logging::init_default_logging();
    let fixture = Fixture::new()?;
    let config = AnalysisConfig::mock();
    let mut accumulators = Accumulators::new(&config, fixture.metrics(), None)?;

    let mut lines = CollectLines::default();
    accumulators.run(&mut lines)?;
    assert_eq!(lines.0.len(), 5);
    assert_eq!(lines.0[0], accumulators.layout().header_line());
    assert!(lines.0[1].starts_with("2021-09-01,1,"));

    let rows = accumulators.rows();
    assert_eq!(rows.len(), 4);
    assert_eq!(
        rows.iter().map(|r| r.date).collect::<Vec<_>>(),
        (0..4).map(day).collect::<Vec<_>>()
    );

    // Day 1: background from date-of-exposure data.
    let row = &rows[0];
    assert_eq!(row.get("scale"), Some(1.0));
    assert_eq!(row.get("verified_0"), Some(10.0));
    assert_eq!(row.get("verified_1"), Some(5.0));
    assert_eq!(row.get("verified_sd"), Some(0.0));
    assert_eq!(row.get("verified_days"), Some(1.0));
    assert_abs_diff_eq!(row.get("consent_rate").unwrap(), 0.4, epsilon = 1e-12);
    assert_abs_diff_eq!(
        row.get("notification_share").unwrap(),
        1.0 / 3.0,
        epsilon = 1e-12
    );
    assert_eq!(row.get("claim_rate"), None);
    assert_eq!(row.get("from_exposure_dates"), Some(1.0));
    assert_abs_diff_eq!(
        row.get("background_rate").unwrap(),
        0.04,
        epsilon = 1e-12
    );
    let sar = (0.2 - 0.015 * 0.04) / 0.96;
    assert_abs_diff_eq!(
        row.get("secondary_attack_rate").unwrap(),
        sar,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(
        row.get("excess_secondary_attack_rate").unwrap(),
        sar - 0.015,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(
        row.get("secondary_attack_rate_0").unwrap(),
        sar,
        epsilon = 1e-9
    );
    assert_eq!(row.get("exposure_cdf_0_0"), Some(1.0));
    assert_eq!(row.get("exposure_cdf_0_3"), Some(1.0));
    // Implausibly high, so left out of the summary.
    assert_eq!(row.terse_summary(), None);

    // Day 2: both exposure days still inside the attribution window.
    let row = &rows[1];
    assert_eq!(row.get("verified_0"), Some(20.0));
    assert_eq!(row.get("verified_days"), Some(2.0));
    assert_abs_diff_eq!(
        row.get("background_rate").unwrap(),
        0.08,
        epsilon = 1e-12
    );
    assert_abs_diff_eq!(
        row.get("secondary_attack_rate").unwrap(),
        (0.2 - 0.015 * 0.08) / 0.92,
        epsilon = 1e-9
    );

    // Day 3: no keys, so only per-metric columns are filled.
    let row = &rows[2];
    assert_eq!(row.get("verified_0"), Some(30.0));
    assert_eq!(row.get("keys_0"), Some(8.0));
    assert_eq!(row.get("keys_days"), Some(2.0));
    for column in [
        "consent_rate",
        "notification_share",
        "secondary_attack_rate",
        "background_rate",
        "from_exposure_dates",
    ] {
        assert_eq!(row.get(column), None, "{column}");
    }
    assert!(lines.0[3].contains(",,"));

    // Day 4: no exposure dates, fallback background estimate.
    let row = &rows[3];
    assert_eq!(row.get("verified_0"), Some(30.0));
    assert_eq!(row.get("keys_0"), Some(12.0));
    assert_eq!(row.get("keys_days"), Some(3.0));
    assert_eq!(row.get("from_exposure_dates"), Some(0.0));
    assert_abs_diff_eq!(
        row.get("background_rate").unwrap(),
        0.14,
        epsilon = 1e-12
    );
    assert_abs_diff_eq!(
        row.get("secondary_attack_rate").unwrap(),
        0.095,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(
        row.get("excess_secondary_attack_rate").unwrap(),
        0.08,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(row.terse_summary().unwrap(), 0.095, epsilon = 1e-9);
    // Exposure columns still reflect the days in its window.
    assert_eq!(row.get("exposure_cdf_0_0"), Some(1.0));
    Ok(())
}

#[test]
fn test_days_must_increase() -> Result<()> {
    let fixture = Fixture::new()?;
    let config = AnalysisConfig::mock();
    let mut accumulators = Accumulators::new(&config, fixture.metrics(), None)?;

    accumulators.update(day(1), &mut DiscardLines)?;
    let err = accumulators.update(day(0), &mut DiscardLines).unwrap_err();
    assert_eq!(
        err,
        EnpaError::DayOutOfOrder {
            day: day(0),
            last: day(1)
        }
    );
    assert!(accumulators.update(day(1), &mut DiscardLines).is_err());
    assert!(accumulators.update(day(2), &mut DiscardLines).is_ok());
    assert_eq!(accumulators.rows().len(), 2);
    Ok(())
}

#[test]
fn test_silent_notifications_leave_rates_blank() -> Result<()> {
    let mut fixture = Fixture::new()?;
    fixture.notifications =
        metric("PeriodicExposureNotification", &every_day(4, vec![0], 1_000))?;
    let config = AnalysisConfig::mock();
    let mut accumulators = Accumulators::new(&config, fixture.metrics(), None)?;
    accumulators.run(&mut DiscardLines)?;

    let row = &accumulators.rows()[3];
    assert_eq!(row.get("notifications_0"), Some(0.0));
    assert_eq!(row.get("secondary_attack_rate"), None);
    assert_eq!(row.get("excess_secondary_attack_rate"), None);
    assert_eq!(row.get("background_rate"), Some(0.0));
    assert_abs_diff_eq!(row.get("consent_rate").unwrap(), 0.4, epsilon = 1e-12);
    Ok(())
}

#[test]
fn test_missing_required_metric() -> Result<()> {
    let fixture = Fixture::new()?;
    let mut metrics = fixture.metrics();
    metrics.remove(&MetricKind::KeysUploaded);

    let config = AnalysisConfig::mock();
    let err = Accumulators::new(&config, metrics, None).unwrap_err();
    assert!(matches!(
        err,
        EnpaError::MissingMetric { ref name, .. } if name == "KeysUploaded"
    ));
    Ok(())
}

#[test]
fn test_bucket_width_checked_against_categories() -> Result<()> {
    let fixture = Fixture::new()?;
    let config = AnalysisConfig {
        num_categories: 2,
        ..AnalysisConfig::mock()
    };
    let err = Accumulators::new(&config, fixture.metrics(), None).unwrap_err();
    assert!(matches!(
        err,
        EnpaError::BucketWidthMismatch {
            expected: 2,
            actual: 1,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_gap_day_keeps_window_and_ages_notifications() -> Result<()> {
    // Nothing reports on day 2.
    let with_gap = |sums: Vec<i64>| {
        let mut days = every_day(4, sums, 1_000);
        days[1] = None;
        days
    };
    let mut exposure = with_gap(vec![40, 0, 0, 0]);
    exposure[3] = None;
    let fixture = Fixture {
        verified: metric("CodeVerified", &with_gap(vec![10, 5]))?,
        keys: metric("KeysUploaded", &with_gap(vec![4, 2]))?,
        notifications: metric(
            "PeriodicExposureNotification",
            &with_gap(vec![20]),
        )?,
        exposure: metric("DateExposure", &exposure)?,
        secondary_attack: metric("SecondaryAttack", &with_gap(vec![4]))?,
    };
    let config = AnalysisConfig {
        days_since_exposure_threshold: 4,
        ..AnalysisConfig::mock()
    };
    let mut accumulators = Accumulators::new(&config, fixture.metrics(), None)?;
    let mut lines = CollectLines::default();
    accumulators.run(&mut lines)?;

    let rows = accumulators.rows();
    assert_eq!(rows.len(), 4);
    assert_eq!(lines.0.len(), 5);

    // The gap day still gets a row, with the previous window and no ratios.
    let row = &rows[1];
    assert_eq!(row.date, day(1));
    assert_eq!(row.get("verified_0"), Some(10.0));
    assert_eq!(row.get("verified_days"), Some(1.0));
    assert_eq!(row.get("consent_rate"), None);
    assert_eq!(row.get("secondary_attack_rate"), None);

    // The first exposures kept aging over the gap: two of their four ages
    // reached the threshold of 4.
    let row = &rows[2];
    assert_eq!(row.get("verified_0"), Some(20.0));
    assert_eq!(row.get("verified_days"), Some(2.0));
    assert_abs_diff_eq!(
        row.get("background_rate").unwrap(),
        0.06,
        epsilon = 1e-12
    );
    assert_abs_diff_eq!(
        row.get("secondary_attack_rate").unwrap(),
        (0.2 - 0.015 * 0.06) / 0.94,
        epsilon = 1e-9
    );

    // The gap did not use up a slot: day 1 is still in the 3-day window.
    let row = &rows[3];
    assert_eq!(row.get("verified_0"), Some(30.0));
    assert_eq!(row.get("verified_days"), Some(3.0));
    assert_eq!(row.get("keys_0"), Some(12.0));

    let verified = accumulators
        .accumulator(MetricKind::CodeVerified)
        .ok_or_else(|| anyhow::anyhow!("no verified accumulator"))?;
    assert_abs_diff_eq!(verified.days_per_slot().unwrap(), 4.0 / 3.0);
    Ok(())
}

#[test]
fn test_exposure_dates_before_required_metrics_are_aged() -> Result<()> {
    let mut fixture = Fixture::new()?;
    // Exposure dates start one day before everything else.
    fixture.exposure = metric_from(
        "DateExposure",
        -1,
        &every_day(2, vec![40, 0, 0, 0], 1_000),
    )?;
    let config = AnalysisConfig::mock();
    let mut accumulators = Accumulators::new(&config, fixture.metrics(), None)?;
    assert_eq!(accumulators.day_range(), Some((day(-1), day(3))));
    accumulators.run(&mut DiscardLines)?;

    let rows = accumulators.rows();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].date, day(-1));
    assert_eq!(rows[0].get("verified_0"), None);
    assert_eq!(rows[0].get("exposure_0"), Some(40.0));
    assert_eq!(rows[0].get("consent_rate"), None);

    // Both exposure days count towards the first complete day.
    let row = &rows[1];
    assert_eq!(row.date, day(0));
    assert_eq!(row.get("from_exposure_dates"), Some(1.0));
    assert_abs_diff_eq!(
        row.get("background_rate").unwrap(),
        0.08,
        epsilon = 1e-12
    );
    Ok(())
}
