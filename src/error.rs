use chrono::NaiveDate;
use thiserror::Error;

/// Fatal errors. Each one means the input no longer matches the data model,
/// so the run stops instead of producing wrong numbers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnpaError {
    #[error("bucket width mismatch for {metric_id}: expected {expected} buckets, got {actual}")]
    BucketWidthMismatch {
        metric_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("epsilon mismatch for {metric_id}: accumulator has {expected}, record has {actual}")]
    EpsilonMismatch {
        metric_id: String,
        expected: f64,
        actual: f64,
    },

    #[error("cannot combine {left} with {right}: {field} differs")]
    IncompatibleMetrics {
        left: String,
        right: String,
        field: &'static str,
    },

    #[error("required metric {name} not found; available metrics: [{available}]")]
    MissingMetric { name: String, available: String },

    #[error("day {day} processed out of order, last processed day was {last}")]
    DayOutOfOrder { day: NaiveDate, last: NaiveDate },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
