pub mod accumulators;
pub mod fixed_length;
pub mod notification_aging;
pub mod output;
pub mod platform_scale;
