//! Supervised per-object health-check loops.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use prometheus_client::metrics::gauge::Gauge;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ObjectKey;

/// Outcome of one health-check tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Continue,
    /// The object left the phases this loop watches over.
    Exit,
}

/// At most one loop per object key. Every loop owns a child of the root
/// token, so it stops on [`HealthCheckRegistry::stop`] or on shutdown, and
/// on exit it only deregisters itself, never a newer loop for the same key.
pub struct HealthCheckRegistry {
    loops: Mutex<HashMap<ObjectKey, (u64, CancellationToken)>>,
    next_id: AtomicU64,
    root: CancellationToken,
    interval: Duration,
    active: Gauge,
}

impl HealthCheckRegistry {
    /// `active` is kept equal to the number of running loops.
    pub fn new(root: CancellationToken, interval: Duration, active: Gauge) -> Arc<Self> {
        Arc::new(Self {
            loops: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            root,
            interval,
            active,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectKey, (u64, CancellationToken)>> {
        self.loops.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts a loop running `check` immediately and then every interval.
    /// Returns `false` if a loop already runs for `key`.
    pub fn start<F, Fut>(self: &Arc<Self>, key: ObjectKey, check: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Tick> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        {
            let mut loops = self.lock();
            if loops.contains_key(&key) {
                return false;
            }
            loops.insert(key.clone(), (id, token.clone()));
        }
        self.active.inc();
        debug!(%key, "starting health check");

        let registry = Arc::clone(self);
        let interval = self.interval;
        tokio::spawn(async move {
            loop {
                if token.is_cancelled() || check().await == Tick::Exit {
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            registry.deregister(&key, id);
            debug!(%key, "health check stopped");
        });
        true
    }

    fn deregister(&self, key: &ObjectKey, id: u64) {
        let mut loops = self.lock();
        if loops.get(key).is_some_and(|(current, _)| *current == id) {
            loops.remove(key);
            self.active.dec();
        }
    }

    /// Cancels the loop of `key`, if any.
    pub fn stop(&self, key: &ObjectKey) {
        if let Some((_, token)) = self.lock().remove(key) {
            token.cancel();
            self.active.dec();
        }
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
