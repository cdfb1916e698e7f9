pub mod metrics;
pub mod state;
#[allow(clippy::module_inception)]
pub mod telemetry;
