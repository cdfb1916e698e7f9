//! Typed CRUD access to the central object store.
//!
//! Controllers only talk to [`ObjectStore`]. [`kube::KubeStore`] backs it with
//! the API server; [`memory::MemoryStore`] keeps everything in process and is
//! what the test harness runs against.

pub mod kube;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{BusinessObject, ObjectKey};
use crate::error::Result;

#[async_trait]
pub trait ObjectStore<K: BusinessObject>: Send + Sync {
    /// `Err(NotFound)` when the object does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<K>;

    /// Lists objects in `namespace` (every namespace when `None`) that match
    /// `selector`.
    async fn list(&self, namespace: Option<&str>, selector: &FieldSelector) -> Result<Vec<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Replaces metadata and spec. The stored status is kept.
    async fn update(&self, obj: &K) -> Result<K>;

    /// Replaces the status only.
    async fn update_status(&self, obj: &K) -> Result<K>;

    /// Replaces `spec.finalizers` only.
    async fn finalize(&self, obj: &K) -> Result<K>;

    /// Requests deletion. Objects still holding finalizers only get their
    /// deletion timestamp set.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// Equality-only field selector, rendered as `spec.tenantID=t,spec.name=n`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldSelector(Vec<(String, String)>);

impl FieldSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Evaluates the selector against the JSON form of an object. A missing
    /// field compares as the empty string.
    pub fn matches(&self, obj: &Value) -> bool {
        self.0.iter().all(|(field, expected)| {
            let pointer = format!("/{}", field.replace('.', "/"));
            let actual = match obj.pointer(&pointer) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            &actual == expected
        })
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{field}={value}")?;
        }
        Ok(())
    }
}

/// Selector used to find the registry mirror of a tenant scoped object.
pub fn tenant_name_selector(tenant_id: &str, name: &str) -> FieldSelector {
    FieldSelector::everything()
        .eq("spec.tenantID", tenant_id)
        .eq("spec.name", name)
}
