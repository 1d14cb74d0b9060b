//! Runtime statistics

pub mod metrics;

pub use metrics::{HubSnapshot, HubStats, ScanSnapshot, ScanStats};
