//! Controller machinery shared by every kind: watch events, the controller
//! runtime glue, the object cache, health-check loops and status retries.

pub mod cache;
pub mod controller;
pub mod health;
pub mod informer;
pub mod retry;

pub use cache::ObjectCache;
pub use controller::{Action, Controller, Reconciler};
pub use health::{HealthCheckRegistry, Tick};
pub use informer::WatchEvent;
pub use retry::RetryPolicy;
