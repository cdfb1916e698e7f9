use std::sync::Arc;

use opentelemetry::trace::TraceId;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};
use tokio::time::Instant;

use crate::error::Error;

#[derive(Clone)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
    pub registry: Arc<Registry>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("business_ctrl_reconcile");
        let reconcile = ReconcileMetrics::default().register(&mut registry);
        Self {
            registry: Arc::new(registry),
            reconcile,
        }
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ControllerLabels {
    pub controller: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ErrorLabels {
    pub controller: String,
    pub error: String,
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Family<ControllerLabels, Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: Family<ControllerLabels, Histogram, fn() -> Histogram>,
    pub in_flight: Family<ControllerLabels, Gauge>,
    pub health_loops: Family<ControllerLabels, Gauge>,
}

fn duration_histogram() -> Histogram {
    Histogram::new([0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.].into_iter())
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Family::default(),
            failures: Family::default(),
            duration: Family::new_with_constructor(duration_histogram as fn() -> Histogram),
            in_flight: Family::default(),
            health_loops: Family::default(),
        }
    }
}

impl ReconcileMetrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "duration",
            "reconcile duration",
            prometheus_client::registry::Unit::Seconds,
            self.duration.clone(),
        );
        r.register("failures", "reconciliation errors", self.failures.clone());
        r.register("runs", "reconciliations", self.runs.clone());
        r.register("in_flight", "syncs currently running", self.in_flight.clone());
        r.register("health_loops", "running health-check loops", self.health_loops.clone());
        self
    }

    pub fn set_failure(&self, controller: &str, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                controller: controller.to_string(),
                error: e.kind().as_str().to_string(),
            })
            .inc();
    }

    pub fn in_flight_gauge(&self, controller: &str) -> Gauge {
        self.in_flight.get_or_create(&labels(controller)).clone()
    }

    /// Gauge a controller's health-check registry keeps up to date.
    pub fn health_loop_gauge(&self, controller: &str) -> Gauge {
        self.health_loops.get_or_create(&labels(controller)).clone()
    }

    pub fn count_and_measure(&self, controller: &str, trace_id: &TraceId) -> ReconcileMeasurer {
        self.runs.get_or_create(&labels(controller)).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            labels: labels(controller),
            trace_id: *trace_id,
            metric: self.duration.clone(),
        }
    }
}

fn labels(controller: &str) -> ControllerLabels {
    ControllerLabels {
        controller: controller.to_string(),
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    labels: ControllerLabels,
    trace_id: TraceId,
    metric: Family<ControllerLabels, Histogram, fn() -> Histogram>,
}

impl ReconcileMeasurer {
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.get_or_create(&self.labels).observe(duration);
    }
}
