use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::EnpaError, metrics::kinds::Platform};

/// Configuration consumed by ingestion and aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Length of the rolling window, in days.
    pub rolling_window_days: usize,

    /// Number of notification classification categories.
    pub num_categories: usize,

    /// How many days after an exposure a notification is attributed to it.
    pub days_since_exposure_threshold: usize,

    /// Records whose window starts before this day are ignored.
    pub start_date: Option<NaiveDate>,

    /// Records from before this instant with fewer than `noise_floor`
    /// clients exclude their configuration hash from the run.
    pub config_start: Option<DateTime<Utc>>,

    pub noise_floor: i64,

    /// Only meaningful to the fetch collaborator.
    pub test_server: bool,

    pub calendar_alignment: CalendarAlignment,
}

/// Reporting of one platform family only lines up with calendar days from a
/// fixed epoch on. Earlier records are dropped unless they come from the
/// exempt provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarAlignment {
    pub platform: Platform,
    pub epoch: DateTime<Utc>,
    pub exempt_provider: String,
}

impl Default for CalendarAlignment {
    fn default() -> Self {
        Self {
            platform: Platform::Android,
            epoch: Utc
                .with_ymd_and_hms(2021, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            exempt_provider: "isrg".to_string(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rolling_window_days: 7,
            num_categories: 2,
            days_since_exposure_threshold: 14,
            start_date: None,
            config_start: None,
            noise_floor: 1000,
            test_server: false,
            calendar_alignment: CalendarAlignment::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), EnpaError> {
        if self.rolling_window_days == 0 {
            return Err(EnpaError::InvalidConfig(
                "rolling_window_days must be greater than 0".to_string(),
            ));
        }
        if self.num_categories == 0 {
            return Err(EnpaError::InvalidConfig(
                "num_categories must be greater than 0".to_string(),
            ));
        }
        if self.days_since_exposure_threshold == 0 {
            return Err(EnpaError::InvalidConfig(
                "days_since_exposure_threshold must be greater than 0"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, anyhow::Error> {
        let config: Self = serde_json::from_str(json)
            .context("Failed to parse analysis config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(
        path: impl AsRef<Path>,
    ) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json_str(&json)
    }
}
