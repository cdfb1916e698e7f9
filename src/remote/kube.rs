use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace as ClusterNamespace, ResourceQuota};
use kube::{
    api::{DeleteParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config, ResourceExt,
};
use tracing::info;

use super::{ClusterClient, ClusterClientFactory, IdentityProviderClient};
use crate::api::v1::identity::IdentityProvider;
use crate::error::{Error, Result};

/// Client of one managed cluster.
pub struct KubeClusterClient {
    cluster: String,
    client: Client,
}

impl KubeClusterClient {
    pub fn new(cluster: impl Into<String>, client: Client) -> Self {
        Self {
            cluster: cluster.into(),
            client,
        }
    }

    fn map_err(&self, kind: &'static str, name: &str) -> impl Fn(kube::Error) -> Error + '_ {
        let target = format!("{}/{}", self.cluster, name);
        move |err| match Error::from(err) {
            err if err.is_not_found() => Error::not_found(kind, &target),
            err if err.is_already_exists() => Error::already_exists(kind, &target),
            err => Error::remote(format!("cluster {}", self.cluster), err),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_namespace(&self, name: &str) -> Result<ClusterNamespace> {
        Api::<ClusterNamespace>::all(self.client.clone())
            .get(name)
            .await
            .map_err(self.map_err("Namespace", name))
    }

    async fn create_namespace(&self, namespace: &ClusterNamespace) -> Result<ClusterNamespace> {
        Api::<ClusterNamespace>::all(self.client.clone())
            .create(&PostParams::default(), namespace)
            .await
            .map_err(self.map_err("Namespace", &namespace.name_any()))
    }

    async fn update_namespace(&self, namespace: &ClusterNamespace) -> Result<ClusterNamespace> {
        let name = namespace.name_any();
        Api::<ClusterNamespace>::all(self.client.clone())
            .replace(&name, &PostParams::default(), namespace)
            .await
            .map_err(self.map_err("Namespace", &name))
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        match Api::<ClusterNamespace>::all(self.client.clone())
            .delete(name, &DeleteParams::background())
            .await
            .map_err(self.map_err("Namespace", name))
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn get_resource_quota(&self, namespace: &str, name: &str) -> Result<ResourceQuota> {
        Api::<ResourceQuota>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(self.map_err("ResourceQuota", name))
    }

    async fn create_resource_quota(&self, quota: &ResourceQuota) -> Result<ResourceQuota> {
        let namespace = quota.namespace().unwrap_or_default();
        Api::<ResourceQuota>::namespaced(self.client.clone(), &namespace)
            .create(&PostParams::default(), quota)
            .await
            .map_err(self.map_err("ResourceQuota", &quota.name_any()))
    }

    async fn update_resource_quota(&self, quota: &ResourceQuota) -> Result<ResourceQuota> {
        let namespace = quota.namespace().unwrap_or_default();
        let name = quota.name_any();
        Api::<ResourceQuota>::namespaced(self.client.clone(), &namespace)
            .replace(&name, &PostParams::default(), quota)
            .await
            .map_err(self.map_err("ResourceQuota", &name))
    }
}

/// Resolves managed clusters through a kubeconfig holding one context per
/// cluster, named after it. Clients are built once and reused.
pub struct KubeClusterClientFactory {
    kubeconfig: Kubeconfig,
    clients: Mutex<HashMap<String, Arc<KubeClusterClient>>>,
}

impl KubeClusterClientFactory {
    pub fn new(kubeconfig: Kubeconfig) -> Self {
        Self {
            kubeconfig,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Reads `path`, or the default kubeconfig when `None`.
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        let kubeconfig = match path {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        }
        .map_err(|err| Error::other(format!("failed to read managed clusters kubeconfig: {err}")))?;
        Ok(Self::new(kubeconfig))
    }

    fn cached(&self, cluster: &str) -> Option<Arc<KubeClusterClient>> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(cluster)
            .cloned()
    }
}

#[async_trait]
impl ClusterClientFactory for KubeClusterClientFactory {
    async fn client_for(&self, cluster: &str) -> Result<Arc<dyn ClusterClient>> {
        if let Some(client) = self.cached(cluster) {
            return Ok(client);
        }
        let options = KubeConfigOptions {
            context: Some(cluster.to_string()),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(self.kubeconfig.clone(), &options)
            .await
            .map_err(|err| Error::remote(format!("cluster {cluster}"), err))?;
        let client = Client::try_from(config)
            .map_err(|err| Error::remote(format!("cluster {cluster}"), err))?;
        let client = Arc::new(KubeClusterClient::new(cluster, client));
        info!(cluster, "built managed cluster client");
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(cluster.to_string(), client.clone());
        Ok(client)
    }
}

/// Identity providers served as `IdentityProvider` objects named after the
/// tenant.
pub struct KubeIdentityProviderClient {
    api: Api<IdentityProvider>,
}

impl KubeIdentityProviderClient {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl IdentityProviderClient for KubeIdentityProviderClient {
    async fn get_administrators(&self, tenant_id: &str) -> Result<Vec<String>> {
        let idp = self.api.get(tenant_id).await.map_err(|err| match Error::from(err) {
            err if err.is_not_found() => Error::not_found("IdentityProvider", tenant_id),
            err => Error::remote("identity provider", err),
        })?;
        Ok(idp.spec.administrators)
    }

    async fn update_administrators(&self, tenant_id: &str, administrators: &[String]) -> Result<()> {
        let mut idp = self.api.get(tenant_id).await.map_err(|err| match Error::from(err) {
            err if err.is_not_found() => Error::not_found("IdentityProvider", tenant_id),
            err => Error::remote("identity provider", err),
        })?;
        idp.spec.administrators = administrators.to_vec();
        self.api
            .replace(tenant_id, &PostParams::default(), &idp)
            .await
            .map_err(|err| match Error::from(err) {
                err if err.is_conflict() => Error::conflict("IdentityProvider", tenant_id, err.to_string()),
                err => Error::remote("identity provider", err),
            })?;
        Ok(())
    }
}
