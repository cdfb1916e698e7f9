//! Systems the controllers act upon: managed clusters, the registry service
//! and the tenants' identity providers.

pub mod kube;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace as ClusterNamespace, ResourceQuota};

use crate::api::v1::registry::{RegistryChartGroup, RegistryNamespace};
use crate::error::Result;
use crate::store::ObjectStore;

/// Namespace and quota access on one managed cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<ClusterNamespace>;
    async fn create_namespace(&self, namespace: &ClusterNamespace) -> Result<ClusterNamespace>;
    async fn update_namespace(&self, namespace: &ClusterNamespace) -> Result<ClusterNamespace>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn get_resource_quota(&self, namespace: &str, name: &str) -> Result<ResourceQuota>;
    async fn create_resource_quota(&self, quota: &ResourceQuota) -> Result<ResourceQuota>;
    async fn update_resource_quota(&self, quota: &ResourceQuota) -> Result<ResourceQuota>;
}

#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    /// Client for the managed cluster named `cluster`.
    async fn client_for(&self, cluster: &str) -> Result<Arc<dyn ClusterClient>>;
}

/// Access to the registry service's chart group and namespace objects. Both
/// are listed with `spec.tenantID=<t>,spec.name=<n>` selectors.
#[derive(Clone)]
pub struct RegistryClient {
    pub chart_groups: Arc<dyn ObjectStore<RegistryChartGroup>>,
    pub namespaces: Arc<dyn ObjectStore<RegistryNamespace>>,
}

/// Administrators of a tenant's identity provider.
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    async fn get_administrators(&self, tenant_id: &str) -> Result<Vec<String>>;
    async fn update_administrators(&self, tenant_id: &str, administrators: &[String]) -> Result<()>;
}
