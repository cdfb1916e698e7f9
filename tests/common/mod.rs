#[cfg(test)]
pub mod tests {
    use std::time::Duration;

    use business_controllers::api::v1::namespace::{Namespace, NamespaceSpec};
    use business_controllers::api::v1::project::{Project, ProjectSpec};
    use business_controllers::api::v1::resources::HardQuantity;
    use business_controllers::api::{BusinessObject, ObjectKey};
    use business_controllers::chartgroup::ChartGroupController;
    use business_controllers::clients::{Clients, MemoryBackends};
    use business_controllers::config::Settings;
    use business_controllers::imagenamespace::ImageNamespaceController;
    use business_controllers::namespace::NamespaceController;
    use business_controllers::nsemigration::NsEmigrationController;
    use business_controllers::platform::PlatformController;
    use business_controllers::project::ProjectController;
    use business_controllers::runtime::{HealthCheckRegistry, Reconciler, RetryPolicy};
    use business_controllers::store::ObjectStore;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use prometheus_client::metrics::gauge::Gauge;
    use rstest::fixture;
    use tokio_util::sync::CancellationToken;

    pub const CLUSTER: &str = "cls1";
    pub const TENANT: &str = "t1";

    /// Every controller wired to one set of in-memory backends. Health loops
    /// are disabled; tests run checks themselves.
    pub struct Plane {
        pub clients: Clients,
        pub backends: MemoryBackends,
        pub projects: ProjectController,
        pub namespaces: NamespaceController,
        pub chart_groups: ChartGroupController,
        pub image_namespaces: ImageNamespaceController,
        pub platforms: PlatformController,
        pub emigrations: NsEmigrationController,
    }

    impl Plane {
        pub fn new() -> Self {
            let (clients, backends) = Clients::in_memory();
            backends.clusters.add_cluster(CLUSTER);
            backends.identity.add_tenant(TENANT, &["root"]);
            let settings = Settings {
                retry: RetryPolicy::immediate(5),
                emigration_poll_interval: Duration::from_secs(1),
                ..Settings::default()
            };
            let stopped = CancellationToken::new();
            stopped.cancel();
            let health = || {
                HealthCheckRegistry::new(
                    stopped.child_token(),
                    Duration::from_secs(3600),
                    Gauge::default(),
                )
            };
            Self {
                projects: ProjectController::new(clients.clone(), settings.clone()),
                namespaces: NamespaceController::new(clients.clone(), settings.clone(), health()),
                chart_groups: ChartGroupController::new(clients.clone(), settings.clone(), health()),
                image_namespaces: ImageNamespaceController::new(
                    clients.clone(),
                    settings.clone(),
                    health(),
                ),
                platforms: PlatformController::new(clients.clone(), settings.clone()),
                emigrations: NsEmigrationController::new(clients.clone(), settings),
                clients,
                backends,
            }
        }

        /// Creates and syncs a project granted `cpu` on the test cluster.
        pub async fn project(&self, name: &str, parent: Option<&str>, cpu: &str) -> ObjectKey {
            let project = Project::new(
                name,
                ProjectSpec {
                    tenant_id: TENANT.into(),
                    display_name: name.to_uppercase(),
                    members: vec![],
                    parent_project_name: parent.map(String::from),
                    clusters: [(
                        CLUSTER.to_string(),
                        HardQuantity {
                            hard: [("cpu".to_string(), Quantity(cpu.into()))].into(),
                        },
                    )]
                    .into(),
                    finalizers: vec![],
                },
            );
            let key = self.backends.projects.create(&project).await.unwrap().key();
            self.projects.sync(&key).await.unwrap();
            key
        }

        /// Creates and syncs a namespace of `project` requesting `cpu`.
        pub async fn namespace(&self, project: &str, name: &str, cpu: &str) -> ObjectKey {
            let mut ns = Namespace::new(
                name,
                NamespaceSpec {
                    cluster_name: CLUSTER.into(),
                    namespace: format!("{project}-{name}"),
                    tenant_id: TENANT.into(),
                    hard: [("cpu".to_string(), Quantity(cpu.into()))].into(),
                    finalizers: vec![],
                },
            );
            ns.metadata.namespace = Some(project.into());
            let key = self.backends.namespaces.create(&ns).await.unwrap().key();
            self.namespaces.sync(&key).await.unwrap();
            key
        }

        /// CPU the project has handed out on the test cluster.
        pub async fn used_cpu(&self, project: &str) -> Option<String> {
            let project = self
                .backends
                .projects
                .get(&ObjectKey::cluster(project))
                .await
                .ok()?;
            Some(project.status?.clusters.get(CLUSTER)?.used.get("cpu")?.0.clone())
        }
    }

    #[fixture]
    pub fn plane() -> Plane {
        Plane::new()
    }
}
