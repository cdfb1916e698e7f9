//! Turns a kube watch into the [`WatchEvent`] stream controllers consume.

use std::collections::HashMap;
use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{BusinessObject, ObjectKey};

/// One change observed on a watched kind.
#[derive(Clone, Debug)]
pub enum WatchEvent<K> {
    Added(K),
    Updated(K, K),
    Deleted(K),
    /// Deletion observed after the watch lost track of the object; only its
    /// key is known.
    DeletedUnknown(ObjectKey),
}

impl<K: BusinessObject> WatchEvent<K> {
    /// Key the event is about.
    pub fn key(&self) -> ObjectKey {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Updated(_, obj) | WatchEvent::Deleted(obj) => {
                obj.key()
            }
            WatchEvent::DeletedUnknown(key) => key.clone(),
        }
    }
}

/// Watches `api` and emits [`WatchEvent`]s. The last seen version of every
/// object is kept so that updates carry the previous object, relists turn
/// vanished objects into `DeletedUnknown` tombstones and every `resync` all
/// known objects are re-emitted as `Updated(obj, obj)`.
pub fn watch_events<K>(
    api: Api<K>,
    resync: Duration,
    shutdown: CancellationToken,
) -> impl Stream<Item = WatchEvent<K>>
where
    K: BusinessObject,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut known: HashMap<ObjectKey, K> = HashMap::new();
        let mut relisted: Option<HashMap<ObjectKey, K>> = None;
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        let mut ticker = tokio::time::interval(resync);
        ticker.tick().await;

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for obj in known.values() {
                        if tx.send(WatchEvent::Updated(obj.clone(), obj.clone())).is_err() {
                            return;
                        }
                    }
                    continue;
                }
                event = stream.next() => event,
            };
            let Some(event) = event else { break };
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, kind = %K::kind_name(), "watch error");
                    continue;
                }
            };

            let mut out = Vec::new();
            match event {
                watcher::Event::Init => {
                    relisted = Some(HashMap::new());
                }
                watcher::Event::InitApply(obj) => {
                    if let Some(seen) = relisted.as_mut() {
                        seen.insert(obj.key(), obj.clone());
                    }
                    out.push(apply(&mut known, obj));
                }
                watcher::Event::InitDone => {
                    if let Some(seen) = relisted.take() {
                        let gone: Vec<ObjectKey> = known
                            .keys()
                            .filter(|key| !seen.contains_key(*key))
                            .cloned()
                            .collect();
                        for key in gone {
                            known.remove(&key);
                            out.push(WatchEvent::DeletedUnknown(key));
                        }
                    }
                }
                watcher::Event::Apply(obj) => out.push(apply(&mut known, obj)),
                watcher::Event::Delete(obj) => {
                    known.remove(&obj.key());
                    out.push(WatchEvent::Deleted(obj));
                }
            }
            for event in out {
                if tx.send(event).is_err() {
                    return;
                }
            }
        }
        debug!(kind = %K::kind_name(), "watch stopped");
    });
    UnboundedReceiverStream::new(rx)
}

fn apply<K: BusinessObject>(known: &mut HashMap<ObjectKey, K>, obj: K) -> WatchEvent<K> {
    match known.insert(obj.key(), obj.clone()) {
        Some(old) => WatchEvent::Updated(old, obj),
        None => WatchEvent::Added(obj),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::platform::{Platform, PlatformSpec};

    fn platform(name: &str) -> Platform {
        Platform::new(
            name,
            PlatformSpec {
                tenant_id: "t1".into(),
                name: name.into(),
                administrators: vec![],
            },
        )
    }

    #[test]
    fn apply_tracks_previous_version() {
        let mut known = HashMap::new();
        assert!(matches!(
            apply(&mut known, platform("p1")),
            WatchEvent::Added(_)
        ));
        let mut changed = platform("p1");
        changed.spec.administrators = vec!["alice".into()];
        match apply(&mut known, changed) {
            WatchEvent::Updated(old, new) => {
                assert!(old.spec.administrators.is_empty());
                assert_eq!(new.spec.administrators, vec!["alice".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tombstones_carry_the_key() {
        let event: WatchEvent<Platform> = WatchEvent::DeletedUnknown(ObjectKey::cluster("p1"));
        assert_eq!(event.key(), ObjectKey::cluster("p1"));
    }
}
