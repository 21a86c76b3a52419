use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One aggregated report for one metric over one aggregation window, as
/// handed over by the fetch/parse collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReportRecord {
    /// `<metric_id>:<config_hash>`.
    pub full_id: String,
    pub metric_id: String,
    pub generic_id: String,
    pub provider: String,
    pub epsilon: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub client_count: i64,
    pub bucket_sums: Vec<i64>,
}

impl RawReportRecord {
    /// UTC calendar day of the window start.
    pub fn day(&self) -> NaiveDate {
        day_of(&self.window_start)
    }

    /// Hash of the metric configuration the clients were running, taken from
    /// the suffix of `full_id`.
    pub fn family_hash(&self) -> &str {
        match self.full_id.rsplit_once(':') {
            Some((_, hash)) => hash,
            None => &self.full_id,
        }
    }
}

pub fn day_of(instant: &DateTime<Utc>) -> NaiveDate {
    instant.date_naive()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_day_and_family_hash() {
        let mut record = RawReportRecord::mock(
            "CodeVerified",
            Utc.with_ymd_and_hms(2021, 3, 4, 23, 59, 0).unwrap(),
            vec![1, 2],
            10,
        );
        assert_eq!(record.day(), NaiveDate::from_ymd_opt(2021, 3, 4).unwrap());
        assert_eq!(record.family_hash(), "v1");

        record.full_id = "CodeVerified".to_string();
        assert_eq!(record.family_hash(), "CodeVerified");
    }
}
