//! Control plane of the business layer: projects, the namespaces they own on
//! managed clusters, registry mirrors of chart groups and image namespaces,
//! platform administrators and namespace emigrations between projects.

pub mod api;
pub mod chartgroup;
pub mod clients;
pub mod config;
pub mod deletion;
pub mod error;
pub mod imagenamespace;
pub mod namespace;
pub mod nsemigration;
pub mod platform;
pub mod project;
pub mod quota;
pub mod remote;
pub mod runtime;
pub mod store;
pub mod telemetry;

pub use clients::Clients;
pub use error::{Error, Result};
