//! Finalizer driven cascading deletion shared by every kind that owns
//! content.
//!
//! [`DeletionEngine::delete`] is idempotent and is called on every sync of
//! an object whose deletion was requested, until it returns `Ok`.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::api::{BusinessObject, Finalizable, ObjectKey};
use crate::error::{AggregateError, Error, Result};
use crate::runtime::retry::{fetch_same, RetryPolicy};
use crate::store::ObjectStore;

/// Kind specific part of a deletion: what the object owns and how to get
/// rid of it.
#[async_trait]
pub trait ContentDeleter: Send + Sync {
    type Object: Finalizable;

    fn store(&self) -> &dyn ObjectStore<Self::Object>;

    /// Token this controller put into `spec.finalizers`.
    fn finalizer_token(&self) -> &'static str;

    /// Deletes everything `obj` owns. Every step runs even if an earlier one
    /// failed; failures are collected.
    async fn delete_all_content(&self, obj: &Self::Object) -> AggregateError;

    /// Whether nothing owned by `obj` is left, checked before the finalizer
    /// is removed.
    async fn all_content_deleted(&self, _obj: &Self::Object) -> Result<bool> {
        Ok(true)
    }
}

/// Adds `token` to `spec.finalizers` of a live object that does not carry it
/// yet, returning the stored object.
pub async fn ensure_finalizer<K: Finalizable>(
    store: &dyn ObjectStore<K>,
    mut obj: K,
    token: &str,
) -> Result<K> {
    if obj.has_finalizer(token) || obj.is_deletion_requested() {
        return Ok(obj);
    }
    obj.finalizers_mut().push(token.to_string());
    debug!(key = %obj.key(), token, "adding finalizer");
    store.update(&obj).await
}

#[derive(Clone, Copy)]
enum Subresource {
    Status,
    Finalize,
}

pub struct DeletionEngine<D> {
    deleter: D,
    delete_when_done: bool,
    retry: RetryPolicy,
}

impl<D: ContentDeleter> DeletionEngine<D> {
    pub fn new(deleter: D, delete_when_done: bool, retry: RetryPolicy) -> Self {
        Self {
            deleter,
            delete_when_done,
            retry,
        }
    }

    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    pub async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let store = self.deleter.store();
        let obj = match store.get(key).await {
            Ok(obj) => obj,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        if !obj.is_deletion_requested() {
            return Ok(());
        }

        let obj = if obj.is_terminating() {
            obj
        } else {
            match self
                .write_with_retry(obj, Subresource::Status, |o| o.mark_terminating())
                .await?
            {
                Some(obj) => obj,
                None => return Ok(()),
            }
        };
        if !obj.is_deletion_requested() {
            debug!(%key, "deletion was withdrawn");
            return Ok(());
        }

        if obj.is_finalized() {
            if self.delete_when_done {
                return self.delete_object(key).await;
            }
            return Ok(());
        }

        self.deleter.delete_all_content(&obj).await.into_result()?;

        if !self.deleter.all_content_deleted(&obj).await? {
            return Err(Error::other(format!(
                "{} {} still owns content, not finalizing yet",
                D::Object::kind_name(),
                key
            )));
        }

        let token = self.deleter.finalizer_token();
        let finalized = if obj.has_finalizer(token) {
            match self
                .write_with_retry(obj, Subresource::Finalize, |o| {
                    o.finalizers_mut().retain(|f| f != token)
                })
                .await?
            {
                Some(obj) => obj,
                None => return Ok(()),
            }
        } else {
            obj
        };
        info!(%key, kind = %D::Object::kind_name(), remaining = ?finalized.finalizers(), "finalized");

        if finalized.is_finalized() && self.delete_when_done {
            return self.delete_object(key).await;
        }
        Ok(())
    }

    async fn delete_object(&self, key: &ObjectKey) -> Result<()> {
        match self.deleter.store().delete(key).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Applies `mutate` and writes the sub-resource, re-reading and
    /// re-applying on conflicts. `None` when the object disappeared.
    async fn write_with_retry<F>(
        &self,
        obj: D::Object,
        subresource: Subresource,
        mutate: F,
    ) -> Result<Option<D::Object>>
    where
        F: Fn(&mut D::Object) + Send + Sync,
    {
        let store = self.deleter.store();
        let key = obj.key();
        let uid = obj.uid_str();
        let mut current = obj;
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            let mut next = current.clone();
            mutate(&mut next);
            let written = match subresource {
                Subresource::Status => store.update_status(&next).await,
                Subresource::Finalize => store.finalize(&next).await,
            };
            match written {
                Ok(updated) => return Ok(Some(updated)),
                Err(err) if err.is_not_found() => return Ok(None),
                Err(err) if err.is_conflict() && attempt < attempts => {
                    debug!(%key, attempt, "conflict, refetching");
                    current = match fetch_same(store, &key, &uid).await {
                        Ok(latest) => latest,
                        Err(err) if err.is_not_found() => return Ok(None),
                        Err(err) => return Err(err),
                    };
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::conflict(
            D::Object::kind_name(),
            &key,
            format!("still conflicting after {attempts} attempts"),
        ))
    }
}
