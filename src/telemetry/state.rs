use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use super::metrics::Metrics;

/// State shared between the controllers and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Arc<Metrics>,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> String {
        let mut buffer = String::new();
        let registry = &*self.metrics.registry;
        if let Err(err) = prometheus_client::encoding::text::encode(&mut buffer, registry) {
            tracing::error!(error = %err, "failed to encode metrics");
        }
        buffer
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Records that `controller` just processed a key.
    pub async fn touch(&self, controller: &str) {
        self.diagnostics
            .write()
            .await
            .last_event
            .insert(controller.to_string(), Utc::now());
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostics {
    pub started: DateTime<Utc>,
    /// Last time each controller processed a key.
    pub last_event: BTreeMap<String, DateTime<Utc>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            started: Utc::now(),
            last_event: BTreeMap::new(),
        }
    }
}
