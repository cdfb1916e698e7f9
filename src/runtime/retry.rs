use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::api::{BusinessObject, ObjectKey};
use crate::error::{Error, Result};
use crate::store::ObjectStore;

/// How status writes are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Same number of attempts without waiting in between.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            interval: Duration::ZERO,
        }
    }
}

/// Writes the status of `obj`.
///
/// A conflict re-reads the object, checks it is still the same object (same
/// UID) and re-applies the status on top of the fresh copy. Other errors are
/// retried as is. Returns `None` when the object is gone.
pub async fn persist_status<K: BusinessObject>(
    store: &dyn ObjectStore<K>,
    obj: &K,
    policy: RetryPolicy,
) -> Result<Option<K>> {
    let key = obj.key();
    let uid = obj.uid_str();
    let mut current = obj.clone();
    let mut last_err = None;

    for attempt in 1..=policy.attempts {
        match store.update_status(&current).await {
            Ok(updated) => return Ok(Some(updated)),
            Err(err) if err.is_not_found() => {
                debug!(%key, kind = %K::kind_name(), "object gone, status not persisted");
                return Ok(None);
            }
            Err(err) if err.is_conflict() => {
                debug!(%key, attempt, "status conflict, refetching");
                match fetch_same(store, &key, &uid).await {
                    Ok(mut latest) => {
                        *latest.status_mut() = obj.status().cloned();
                        current = latest;
                    }
                    Err(err) if err.is_not_found() => return Ok(None),
                    Err(err) => return Err(err),
                }
                last_err = Some(err);
            }
            Err(err) => {
                warn!(%key, attempt, error = %err, "failed to persist status");
                last_err = Some(err);
            }
        }
        if attempt < policy.attempts && !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(Error::other(format!(
        "failed to persist status of {} {}/{} after {} attempts: {}",
        K::kind_name(),
        key.namespace_str(),
        key.name,
        policy.attempts,
        last_err.map(|e| e.to_string()).unwrap_or_default(),
    )))
}

/// Re-reads `key` and checks it still is the object with `uid`; a different
/// UID means the object was deleted and re-created behind our back.
pub async fn fetch_same<K: BusinessObject>(
    store: &dyn ObjectStore<K>,
    key: &ObjectKey,
    uid: &str,
) -> Result<K> {
    let latest = store.get(key).await?;
    if !uid.is_empty() && latest.uid_str() != uid {
        return Err(Error::invariant(format!(
            "{} {} was replaced: uid {} became {}",
            K::kind_name(),
            key,
            uid,
            latest.uid_str()
        )));
    }
    Ok(latest)
}

/// Runs `op` again while it fails with a conflict, at most `attempts` times.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_conflict() && attempt < attempts => {
                debug!(attempt, error = %err, "conflict, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}
