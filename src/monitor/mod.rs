//! Disk pressure monitoring: threshold classification and multi-mount aggregation.

pub mod mounts;
pub mod threshold;
