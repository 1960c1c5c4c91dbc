//! Domain layer
//!
//! Resources, workers, scenarios and their telemetry.

pub mod banker;
pub mod metrics;
pub mod resources;
pub mod scenario;
pub mod worker;
