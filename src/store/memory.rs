use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{FieldSelector, ObjectStore};
use crate::api::{BusinessObject, ObjectKey};
use crate::error::{Error, Result};
use crate::runtime::WatchEvent;

/// Store operations that can be made to fail from tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Finalize,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Conflict,
    Unavailable,
}

/// In-process object store with API server semantics: resource versions
/// guard every write, status and finalizers are separate sub-resources and
/// deletion of a finalized object waits for its finalizers.
pub struct MemoryStore<K> {
    inner: Mutex<Inner<K>>,
}

struct Inner<K> {
    objects: BTreeMap<ObjectKey, K>,
    version: u64,
    watchers: Vec<mpsc::UnboundedSender<WatchEvent<K>>>,
    faults: HashMap<Op, (usize, Fault)>,
}

impl<K: BusinessObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: BusinessObject> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                version: 0,
                watchers: Vec::new(),
                faults: HashMap::new(),
            }),
        }
    }

    /// Makes the next `times` calls of `op` fail with `fault`.
    pub fn fail_next(&self, op: Op, times: usize, fault: Fault) {
        let mut inner = self.lock();
        if times == 0 {
            inner.faults.remove(&op);
        } else {
            inner.faults.insert(op, (times, fault));
        }
    }

    /// Watch stream starting with an `Added` event per stored object.
    pub fn subscribe(&self) -> UnboundedReceiverStream<WatchEvent<K>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        for obj in inner.objects.values() {
            let _ = tx.send(WatchEvent::Added(obj.clone()));
        }
        inner.watchers.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Snapshot of every stored object.
    pub fn all(&self) -> Vec<K> {
        self.lock().objects.values().cloned().collect()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().objects.contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K: BusinessObject> Inner<K> {
    fn inject(&mut self, op: Op, key: &ObjectKey) -> Result<()> {
        let Some((remaining, fault)) = self.faults.get_mut(&op) else {
            return Ok(());
        };
        let fault = *fault;
        *remaining -= 1;
        if *remaining == 0 {
            self.faults.remove(&op);
        }
        Err(match fault {
            Fault::Conflict => Error::conflict(
                K::kind_name(),
                key,
                "the object has been modified; please apply your changes to the latest version",
            ),
            Fault::Unavailable => Error::remote("object store", "service unavailable"),
        })
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn stored(&self, key: &ObjectKey) -> Result<&K> {
        self.objects
            .get(key)
            .ok_or_else(|| Error::not_found(K::kind_name(), key))
    }

    /// Rejects writes carrying a stale resource version.
    fn check_version(&self, obj: &K, key: &ObjectKey) -> Result<K> {
        let stored = self.stored(key)?;
        if let Some(version) = obj.meta().resource_version.as_deref() {
            if Some(version) != stored.meta().resource_version.as_deref() {
                return Err(Error::conflict(
                    K::kind_name(),
                    key,
                    "the object has been modified; please apply your changes to the latest version",
                ));
            }
        }
        if let (Some(uid), Some(stored_uid)) = (obj.uid(), stored.uid()) {
            if uid != stored_uid {
                return Err(Error::conflict(K::kind_name(), key, "UID precondition failed"));
            }
        }
        Ok(stored.clone())
    }

    fn commit(&mut self, key: ObjectKey, old: Option<K>, mut new: K) -> K {
        new.meta_mut().resource_version = Some(self.next_version());
        self.objects.insert(key, new.clone());
        let event = match old {
            Some(old) => WatchEvent::Updated(old, new.clone()),
            None => WatchEvent::Added(new.clone()),
        };
        self.broadcast(event);
        new
    }

    fn broadcast(&mut self, event: WatchEvent<K>) {
        self.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn has_spec_finalizers(value: &Value) -> bool {
    value
        .pointer("/spec/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

#[async_trait]
impl<K: BusinessObject> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K> {
        let mut inner = self.lock();
        inner.inject(Op::Get, key)?;
        inner.stored(key).cloned()
    }

    async fn list(&self, namespace: Option<&str>, selector: &FieldSelector) -> Result<Vec<K>> {
        let mut inner = self.lock();
        inner.inject(Op::List, &ObjectKey::cluster(selector.to_string()))?;
        let mut items = Vec::new();
        for (key, obj) in &inner.objects {
            if namespace.is_some_and(|ns| key.namespace.as_deref() != Some(ns)) {
                continue;
            }
            if selector.is_empty() || selector.matches(&serde_json::to_value(obj)?) {
                items.push(obj.clone());
            }
        }
        Ok(items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        let mut inner = self.lock();
        inner.inject(Op::Create, &key)?;
        if key.name.is_empty() {
            return Err(Error::validation(format!("{} name is required", K::kind_name())));
        }
        if inner.objects.contains_key(&key) {
            return Err(Error::already_exists(K::kind_name(), &key));
        }
        let mut new = obj.clone();
        let meta = new.meta_mut();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.deletion_timestamp = None;
        let mut value = serde_json::to_value(&new)?;
        value["metadata"]["creationTimestamp"] =
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        let new: K = serde_json::from_value(value)?;
        Ok(inner.commit(key, None, new))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        let mut inner = self.lock();
        inner.inject(Op::Update, &key)?;
        let stored = inner.check_version(obj, &key)?;
        let mut new = obj.clone();
        *new.status_mut() = stored.status().cloned();
        let meta = new.meta_mut();
        meta.uid = stored.meta().uid.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp.clone();
        meta.deletion_timestamp = stored.meta().deletion_timestamp.clone();
        Ok(inner.commit(key, Some(stored), new))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        let mut inner = self.lock();
        inner.inject(Op::UpdateStatus, &key)?;
        let stored = inner.check_version(obj, &key)?;
        let mut new = stored.clone();
        *new.status_mut() = obj.status().cloned();
        Ok(inner.commit(key, Some(stored), new))
    }

    async fn finalize(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        let mut inner = self.lock();
        inner.inject(Op::Finalize, &key)?;
        let stored = inner.check_version(obj, &key)?;
        let finalizers = serde_json::to_value(obj)?
            .pointer("/spec/finalizers")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let mut value = serde_json::to_value(&stored)?;
        value["spec"]["finalizers"] = finalizers;
        let new: K = serde_json::from_value(value)?;
        Ok(inner.commit(key, Some(stored), new))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut inner = self.lock();
        inner.inject(Op::Delete, key)?;
        let stored = inner.stored(key)?.clone();
        let value = serde_json::to_value(&stored)?;
        let finalizing = has_spec_finalizers(&value)
            || stored.meta().finalizers.as_ref().is_some_and(|f| !f.is_empty());
        if finalizing {
            if stored.is_deletion_requested() {
                return Ok(());
            }
            let mut value = value;
            value["metadata"]["deletionTimestamp"] =
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
            let new: K = serde_json::from_value(value)?;
            inner.commit(key.clone(), Some(stored), new);
            return Ok(());
        }
        inner.objects.remove(key);
        inner.broadcast(WatchEvent::Deleted(stored));
        Ok(())
    }
}
