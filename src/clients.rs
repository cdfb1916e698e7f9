use std::sync::Arc;

use kube::Client;

use crate::api::v1::{
    chartgroup::ChartGroup,
    imagenamespace::ImageNamespace,
    namespace::Namespace,
    nsemigration::NsEmigration,
    platform::Platform,
    project::Project,
    registry::{RegistryChartGroup, RegistryNamespace},
};
use crate::remote::{
    kube::KubeIdentityProviderClient,
    memory::{MemoryClusterFactory, MemoryIdentityProvider},
    ClusterClientFactory, IdentityProviderClient, RegistryClient,
};
use crate::store::{kube::KubeStore, memory::MemoryStore, ObjectStore};

/// Everything the controllers read from and write to.
#[derive(Clone)]
pub struct Clients {
    pub projects: Arc<dyn ObjectStore<Project>>,
    pub namespaces: Arc<dyn ObjectStore<Namespace>>,
    pub chart_groups: Arc<dyn ObjectStore<ChartGroup>>,
    pub image_namespaces: Arc<dyn ObjectStore<ImageNamespace>>,
    pub platforms: Arc<dyn ObjectStore<Platform>>,
    pub emigrations: Arc<dyn ObjectStore<NsEmigration>>,
    pub registry: RegistryClient,
    pub clusters: Arc<dyn ClusterClientFactory>,
    pub identity: Arc<dyn IdentityProviderClient>,
}

impl Clients {
    /// Clients talking to the API server; managed clusters are reached
    /// through `clusters`.
    pub fn kube(client: Client, clusters: Arc<dyn ClusterClientFactory>) -> Self {
        Self {
            projects: Arc::new(KubeStore::<Project>::new(client.clone())),
            namespaces: Arc::new(KubeStore::<Namespace>::new(client.clone())),
            chart_groups: Arc::new(KubeStore::<ChartGroup>::new(client.clone())),
            image_namespaces: Arc::new(KubeStore::<ImageNamespace>::new(client.clone())),
            platforms: Arc::new(KubeStore::<Platform>::new(client.clone())),
            emigrations: Arc::new(KubeStore::<NsEmigration>::new(client.clone())),
            registry: RegistryClient {
                chart_groups: Arc::new(KubeStore::<RegistryChartGroup>::new(client.clone())),
                namespaces: Arc::new(KubeStore::<RegistryNamespace>::new(client.clone())),
            },
            clusters,
            identity: Arc::new(KubeIdentityProviderClient::new(client)),
        }
    }

    /// Clients backed by in-process stores, returned together with typed
    /// handles on those stores.
    pub fn in_memory() -> (Self, MemoryBackends) {
        let backends = MemoryBackends::default();
        let clients = Self {
            projects: backends.projects.clone(),
            namespaces: backends.namespaces.clone(),
            chart_groups: backends.chart_groups.clone(),
            image_namespaces: backends.image_namespaces.clone(),
            platforms: backends.platforms.clone(),
            emigrations: backends.emigrations.clone(),
            registry: RegistryClient {
                chart_groups: backends.registry_chart_groups.clone(),
                namespaces: backends.registry_namespaces.clone(),
            },
            clusters: backends.clusters.clone(),
            identity: backends.identity.clone(),
        };
        (clients, backends)
    }
}

/// Concrete in-memory stores behind [`Clients::in_memory`].
#[derive(Clone, Default)]
pub struct MemoryBackends {
    pub projects: Arc<MemoryStore<Project>>,
    pub namespaces: Arc<MemoryStore<Namespace>>,
    pub chart_groups: Arc<MemoryStore<ChartGroup>>,
    pub image_namespaces: Arc<MemoryStore<ImageNamespace>>,
    pub platforms: Arc<MemoryStore<Platform>>,
    pub emigrations: Arc<MemoryStore<NsEmigration>>,
    pub registry_chart_groups: Arc<MemoryStore<RegistryChartGroup>>,
    pub registry_namespaces: Arc<MemoryStore<RegistryNamespace>>,
    pub clusters: Arc<MemoryClusterFactory>,
    pub identity: Arc<MemoryIdentityProvider>,
}
