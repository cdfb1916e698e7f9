use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::runtime::retry::RetryPolicy;

/// Command line of the controller manager.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Reconciles projects, namespaces and registry mirrors of every tenant")]
pub struct Options {
    /// Address the metrics and diagnostics server listens on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Log as JSON instead of compact text.
    #[arg(long)]
    pub log_json: bool,

    /// Kubeconfig holding one context per managed cluster, named after the
    /// cluster. Defaults to the usual kubeconfig lookup.
    #[arg(long)]
    pub clusters_kubeconfig: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    pub namespace_workers: usize,
    #[arg(long, default_value_t = 10)]
    pub project_workers: usize,
    #[arg(long, default_value_t = 5)]
    pub chart_group_workers: usize,
    #[arg(long, default_value_t = 5)]
    pub image_namespace_workers: usize,
    #[arg(long, default_value_t = 1)]
    pub platform_workers: usize,
    #[arg(long, default_value_t = 1)]
    pub emigration_workers: usize,

    /// Seconds between full re-deliveries of every watched object.
    #[arg(long, default_value_t = 300)]
    pub resync_period_secs: u64,

    /// Seconds between two health checks of one object.
    #[arg(long, default_value_t = 60)]
    pub health_check_interval_secs: u64,

    /// Seconds between two progress checks of a namespace emigration.
    #[arg(long, default_value_t = 60)]
    pub emigration_poll_interval_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub status_retry_attempts: u32,
    #[arg(long, default_value_t = 5)]
    pub status_retry_interval_secs: u64,

    /// Delete objects once their last finalizer is gone.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub delete_when_done: bool,
}

/// Worker pool and event debouncing of one controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerOptions {
    pub workers: usize,
    /// Events for one object are merged until it has been quiet this long,
    /// letting caches of other replicas settle.
    pub grace_period: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            grace_period: Duration::from_secs(5),
        }
    }
}

impl ControllerOptions {
    pub fn new(workers: usize, grace_period: Duration) -> Self {
        Self {
            workers,
            grace_period,
        }
    }
}

/// Timing and retry behaviour shared by every controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub resync_period: Duration,
    pub health_check_interval: Duration,
    pub emigration_poll_interval: Duration,
    pub retry: RetryPolicy,
    pub delete_when_done: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
            emigration_poll_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            delete_when_done: true,
        }
    }
}

impl Options {
    pub fn settings(&self) -> Settings {
        Settings {
            resync_period: Duration::from_secs(self.resync_period_secs),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            emigration_poll_interval: Duration::from_secs(self.emigration_poll_interval_secs),
            retry: RetryPolicy {
                attempts: self.status_retry_attempts.max(1),
                interval: Duration::from_secs(self.status_retry_interval_secs),
            },
            delete_when_done: self.delete_when_done,
        }
    }

    pub fn namespace(&self) -> ControllerOptions {
        ControllerOptions::new(self.namespace_workers, Duration::from_secs(5))
    }

    pub fn project(&self) -> ControllerOptions {
        ControllerOptions::new(self.project_workers, Duration::from_secs(5))
    }

    pub fn chart_group(&self) -> ControllerOptions {
        ControllerOptions::new(self.chart_group_workers, Duration::from_secs(5))
    }

    pub fn image_namespace(&self) -> ControllerOptions {
        ControllerOptions::new(self.image_namespace_workers, Duration::from_secs(5))
    }

    pub fn platform(&self) -> ControllerOptions {
        ControllerOptions::new(self.platform_workers, Duration::from_secs(1))
    }

    pub fn emigration(&self) -> ControllerOptions {
        ControllerOptions::new(self.emigration_workers, Duration::from_secs(5))
    }
}
