pub mod kinds;
pub mod metric;
pub mod raw_metrics;
pub mod record;
