//! Debiasing and rolling-window aggregation of randomized-response
//! exposure notification analytics.
//!
//! Raw per-window reports are folded into per-metric accumulators
//! ([`metrics::raw_metrics::RawMetrics`]), debiased with the known noise
//! model ([`mechanisms::noise_model::NoiseModel`]) and walked day by day
//! through rolling accumulators ([`rolling::accumulators::Accumulators`]) to
//! produce one row of estimates and derived ratios per calendar day.

pub mod analysis;
pub mod config;
pub mod error;
pub mod mechanisms;
pub mod metrics;
pub mod rolling;
pub mod util;
