//! Drives a [`Reconciler`] with kube's controller runtime.
//!
//! The runtime serializes reconciles per object, merges bursts of events
//! (`debounce`) and bounds concurrency. What it lacks is glue kept here: the
//! `needs_update` filter on update events, per-key exponential backoff for
//! failed syncs, and a final sync for deleted objects so that they are
//! cleaned up locally.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, Stream, StreamExt};
use kube::ResourceExt;
use kube::runtime::{
    controller::{self, Config},
    reflector::{self, store::Writer, ObjectRef, Store},
    watcher,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info, instrument, warn, Span};

pub use kube::runtime::controller::Action;

use super::informer::WatchEvent;
use crate::api::{BusinessObject, ObjectKey};
use crate::config::ControllerOptions;
use crate::error::{Error, ErrorKind, Result};
use crate::telemetry::{state::State, telemetry};

pub const BASE_DELAY: Duration = Duration::from_millis(5);
pub const MAX_DELAY: Duration = Duration::from_secs(1000);

/// Per-kind reconciliation logic driven by a [`Controller`].
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Object: BusinessObject;

    fn name(&self) -> &'static str;

    /// Reconciles the object stored under `key`. An object that no longer
    /// exists is cleaned up locally and reported as success.
    async fn sync(&self, key: &ObjectKey) -> Result<Action>;

    /// Whether an update event is worth a sync.
    fn needs_update(&self, old: &Self::Object, new: &Self::Object) -> bool {
        needs_update(old, new)
    }
}

/// Same UID, spec and status means nothing changed for the controllers.
pub fn needs_update<K: BusinessObject>(old: &K, new: &K) -> bool {
    old.uid() != new.uid() || old.spec() != new.spec() || old.status() != new.status()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Failed syncs of a key are retried after `BASE_DELAY * 2^failures`,
/// capped at `MAX_DELAY`. A successful sync forgets the key.
#[derive(Default)]
pub struct Backoff {
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl Backoff {
    /// Records one more failure of `key` and returns the delay before its
    /// retry.
    pub fn next(&self, key: &ObjectKey) -> Duration {
        let mut failures = lock(&self.failures);
        let failed = failures.entry(key.clone()).or_insert(0);
        let delay = BASE_DELAY
            .checked_mul(2_u32.saturating_pow(*failed))
            .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY));
        *failed = failed.saturating_add(1);
        delay
    }

    pub fn forget(&self, key: &ObjectKey) {
        lock(&self.failures).remove(key);
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

fn object_ref<K: BusinessObject>(key: &ObjectKey) -> ObjectRef<K> {
    let obj_ref = ObjectRef::new(&key.name);
    match &key.namespace {
        Some(namespace) => obj_ref.within(namespace),
        None => obj_ref,
    }
}

/// State shared by the event feed and every reconcile of one controller.
struct Context<R: Reconciler> {
    reconciler: Arc<R>,
    state: State,
    backoff: Backoff,
    writer: Mutex<Writer<R::Object>>,
    reader: Store<R::Object>,
    /// Deleted objects kept in the store until their last sync ran.
    deleted: Mutex<HashSet<ObjectKey>>,
}

impl<R: Reconciler> Context<R> {
    fn apply(&self, obj: &R::Object) {
        lock(&self.writer).apply_watcher_event(&watcher::Event::Apply(obj.clone()));
        lock(&self.deleted).remove(&obj.key());
    }

    fn mark_deleted(&self, obj: &R::Object) {
        lock(&self.writer).apply_watcher_event(&watcher::Event::Apply(obj.clone()));
        lock(&self.deleted).insert(obj.key());
    }

    /// Drops a deleted object from the store once it has been synced.
    fn evict(&self, key: &ObjectKey, obj: &R::Object) {
        if lock(&self.deleted).remove(key) {
            lock(&self.writer).apply_watcher_event(&watcher::Event::Delete(obj.clone()));
        }
    }

    /// Updates the store from one watch event and returns the object to
    /// schedule, if any. Deletions are scheduled too: the sync finds the
    /// object gone and cleans up after it.
    fn trigger(&self, event: WatchEvent<R::Object>) -> Option<R::Object> {
        match event {
            WatchEvent::Added(obj) => {
                self.apply(&obj);
                Some(obj)
            }
            WatchEvent::Updated(old, new) => {
                self.apply(&new);
                self.reconciler.needs_update(&old, &new).then_some(new)
            }
            WatchEvent::Deleted(obj) => {
                self.mark_deleted(&obj);
                Some(obj)
            }
            WatchEvent::DeletedUnknown(key) => {
                let obj = self.reader.get(&object_ref(&key))?;
                let obj = (*obj).clone();
                self.mark_deleted(&obj);
                Some(obj)
            }
        }
    }
}

/// One controller of a kind: a reflector store fed from [`WatchEvent`]s and
/// kube's [`controller::Controller`] scheduling syncs over it.
pub struct Controller<R: Reconciler> {
    context: Arc<Context<R>>,
    options: ControllerOptions,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: Arc<R>, options: ControllerOptions, state: State) -> Self {
        let (reader, mut writer) = reflector::store();
        // nothing is listed up front, the store fills as events arrive
        writer.apply_watcher_event(&watcher::Event::InitDone);
        Self {
            context: Arc::new(Context {
                reconciler,
                state,
                backoff: Backoff::default(),
                writer: Mutex::new(writer),
                reader,
                deleted: Mutex::default(),
            }),
            options,
        }
    }

    pub fn reconciler(&self) -> &Arc<R> {
        &self.context.reconciler
    }

    pub fn backoff(&self) -> &Backoff {
        &self.context.backoff
    }

    /// Objects the controller currently knows about.
    pub fn store(&self) -> Store<R::Object> {
        self.context.reader.clone()
    }

    /// Runs until `shutdown` is cancelled, then waits for running syncs.
    pub async fn run<S>(self, events: S, shutdown: CancellationToken)
    where
        S: Stream<Item = WatchEvent<R::Object>> + Send + 'static,
    {
        let name = self.context.reconciler.name();
        info!(controller = name, workers = self.options.workers, "starting controller");

        let feed = Arc::clone(&self.context);
        let triggers = events.filter_map(move |event| {
            future::ready(feed.trigger(event).map(Ok::<_, watcher::Error>))
        });
        let config = Config::default()
            .concurrency(u16::try_from(self.options.workers.max(1)).unwrap_or(u16::MAX))
            .debounce(self.options.grace_period);

        controller::Controller::for_stream(triggers, self.context.reader.clone())
            .with_config(config)
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile::<R>, error_policy::<R>, self.context)
            .for_each(|result| {
                match result {
                    Ok((obj, _)) => debug!(object = %obj, "reconciled"),
                    Err(controller::Error::ReconcilerFailed(..)) => {}
                    Err(err) => debug!(error = %err, "reconcile skipped"),
                }
                future::ready(())
            })
            .await;
        info!(controller = name, "controller stopped");
    }
}

#[instrument(skip(obj, ctx), fields(controller = ctx.reconciler.name(), key = field::Empty, trace_id))]
async fn reconcile<R: Reconciler>(obj: Arc<R::Object>, ctx: Arc<Context<R>>) -> Result<Action> {
    let key = obj.key();
    Span::current().record("key", field::display(&key));
    let trace_id = telemetry::get_trace_id();
    if trace_id != opentelemetry::trace::TraceId::INVALID {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let name = ctx.reconciler.name();
    let metrics = &ctx.state.metrics.reconcile;
    let _timer = metrics.count_and_measure(name, &trace_id);
    ctx.state.touch(name).await;

    let in_flight = metrics.in_flight_gauge(name);
    in_flight.inc();
    let result = ctx.reconciler.sync(&key).await;
    in_flight.dec();

    let action = result?;
    ctx.backoff.forget(&key);
    ctx.evict(&key, &obj);
    Ok(action)
}

fn error_policy<R: Reconciler>(obj: Arc<R::Object>, err: &Error, ctx: Arc<Context<R>>) -> Action {
    let key = obj.key();
    let name = ctx.reconciler.name();
    if err.kind() == ErrorKind::InvariantViolation {
        error!(controller = name, %key, error = %err, "reconciliation aborted");
    } else {
        warn!(controller = name, %key, error = %err, "sync failed, requeueing");
    }
    ctx.state.metrics.reconcile.set_failure(name, err);
    Action::requeue(ctx.backoff.next(&key))
}
