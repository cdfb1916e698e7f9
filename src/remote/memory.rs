//! In-process stand-ins for managed clusters and identity providers, used by
//! the test harness.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace as ClusterNamespace, ResourceQuota};
use kube::ResourceExt;

use super::{ClusterClient, ClusterClientFactory, IdentityProviderClient};
use crate::error::{Error, Result};

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeMap<String, ClusterNamespace>,
    quotas: BTreeMap<(String, String), ResourceQuota>,
    unreachable: bool,
}

/// One fake managed cluster.
#[derive(Default)]
pub struct MemoryCluster {
    name: String,
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every call fail as if the cluster could not be reached.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn namespace(&self, name: &str) -> Option<ClusterNamespace> {
        self.lock().namespaces.get(name).cloned()
    }

    pub fn quota(&self, namespace: &str, name: &str) -> Option<ResourceQuota> {
        self.lock()
            .quotas
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Writes a namespace directly, bypassing the client.
    pub fn put_namespace(&self, namespace: ClusterNamespace) {
        self.lock()
            .namespaces
            .insert(namespace.name_any(), namespace);
    }

    pub fn remove_namespace(&self, name: &str) {
        self.lock().namespaces.remove(name);
    }

    /// Writes a quota directly, e.g. to simulate usage reported by the
    /// cluster.
    pub fn put_quota(&self, quota: ResourceQuota) {
        let key = (quota.namespace().unwrap_or_default(), quota.name_any());
        self.lock().quotas.insert(key, quota);
    }

    fn check(&self) -> Result<MutexGuard<'_, ClusterState>> {
        let state = self.lock();
        if state.unreachable {
            return Err(Error::remote(
                format!("cluster {}", self.name),
                "connection refused",
            ));
        }
        Ok(state)
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get_namespace(&self, name: &str) -> Result<ClusterNamespace> {
        self.check()?
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("Namespace", format!("{}/{}", self.name, name)))
    }

    async fn create_namespace(&self, namespace: &ClusterNamespace) -> Result<ClusterNamespace> {
        let mut state = self.check()?;
        let name = namespace.name_any();
        if state.namespaces.contains_key(&name) {
            return Err(Error::already_exists("Namespace", format!("{}/{}", self.name, name)));
        }
        state.namespaces.insert(name, namespace.clone());
        Ok(namespace.clone())
    }

    async fn update_namespace(&self, namespace: &ClusterNamespace) -> Result<ClusterNamespace> {
        let mut state = self.check()?;
        let name = namespace.name_any();
        if !state.namespaces.contains_key(&name) {
            return Err(Error::not_found("Namespace", format!("{}/{}", self.name, name)));
        }
        state.namespaces.insert(name, namespace.clone());
        Ok(namespace.clone())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.check()?;
        state.namespaces.remove(name);
        state.quotas.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn get_resource_quota(&self, namespace: &str, name: &str) -> Result<ResourceQuota> {
        self.check()?
            .quotas
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found("ResourceQuota", format!("{namespace}/{name}")))
    }

    async fn create_resource_quota(&self, quota: &ResourceQuota) -> Result<ResourceQuota> {
        let mut state = self.check()?;
        let key = (quota.namespace().unwrap_or_default(), quota.name_any());
        if !state.namespaces.contains_key(&key.0) {
            return Err(Error::not_found("Namespace", format!("{}/{}", self.name, key.0)));
        }
        if state.quotas.contains_key(&key) {
            return Err(Error::already_exists("ResourceQuota", format!("{}/{}", key.0, key.1)));
        }
        state.quotas.insert(key, quota.clone());
        Ok(quota.clone())
    }

    async fn update_resource_quota(&self, quota: &ResourceQuota) -> Result<ResourceQuota> {
        let mut state = self.check()?;
        let key = (quota.namespace().unwrap_or_default(), quota.name_any());
        let Some(stored) = state.quotas.get_mut(&key) else {
            return Err(Error::not_found("ResourceQuota", format!("{}/{}", key.0, key.1)));
        };
        // status is owned by the cluster
        let status = stored.status.clone();
        *stored = quota.clone();
        stored.status = status;
        Ok(stored.clone())
    }
}

/// Hands out [`MemoryCluster`]s by name; unknown clusters are an error.
#[derive(Default)]
pub struct MemoryClusterFactory {
    clusters: Mutex<HashMap<String, Arc<MemoryCluster>>>,
}

impl MemoryClusterFactory {
    /// Registers a cluster, returning it for inspection.
    pub fn add_cluster(&self, name: &str) -> Arc<MemoryCluster> {
        let cluster = Arc::new(MemoryCluster::new(name));
        self.clusters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), cluster.clone());
        cluster
    }

    pub fn cluster(&self, name: &str) -> Option<Arc<MemoryCluster>> {
        self.clusters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl ClusterClientFactory for MemoryClusterFactory {
    async fn client_for(&self, cluster: &str) -> Result<Arc<dyn ClusterClient>> {
        match self.cluster(cluster) {
            Some(client) => Ok(client),
            None => Err(Error::remote(
                format!("cluster {cluster}"),
                "no such cluster",
            )),
        }
    }
}

/// Administrators per tenant.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    tenants: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryIdentityProvider {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.tenants.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_tenant(&self, tenant_id: &str, administrators: &[&str]) {
        self.lock().insert(
            tenant_id.to_string(),
            administrators.iter().map(|a| a.to_string()).collect(),
        );
    }

    pub fn administrators(&self, tenant_id: &str) -> Option<Vec<String>> {
        self.lock().get(tenant_id).cloned()
    }
}

#[async_trait]
impl IdentityProviderClient for MemoryIdentityProvider {
    async fn get_administrators(&self, tenant_id: &str) -> Result<Vec<String>> {
        self.lock()
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| Error::not_found("IdentityProvider", tenant_id))
    }

    async fn update_administrators(&self, tenant_id: &str, administrators: &[String]) -> Result<()> {
        let mut tenants = self.lock();
        let Some(current) = tenants.get_mut(tenant_id) else {
            return Err(Error::not_found("IdentityProvider", tenant_id));
        };
        *current = administrators.to_vec();
        Ok(())
    }
}
