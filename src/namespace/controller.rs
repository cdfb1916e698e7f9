use std::sync::Arc;

use async_trait::async_trait;
use garde::Validate;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{cluster, deletion::NamespaceDeleter, health};
use crate::api::constants::NAMESPACE_FINALIZER;
use crate::api::v1::namespace::{Namespace, NamespacePhase};
use crate::api::{BusinessObject, Finalizable, ObjectKey, Phased};
use crate::clients::Clients;
use crate::config::Settings;
use crate::deletion::{ensure_finalizer, DeletionEngine};
use crate::error::{Error, Result};
use crate::project::usage::{self, Contributor};
use crate::quota::validate_resource_list;
use crate::runtime::retry::persist_status;
use crate::runtime::{Action, HealthCheckRegistry, ObjectCache, Reconciler};

/// Provisions business namespaces on their managed cluster and keeps the
/// cluster quota and the project usage in line with `spec.hard`.
pub struct NamespaceController {
    clients: Clients,
    settings: Settings,
    cache: Arc<ObjectCache<Namespace>>,
    health: Arc<HealthCheckRegistry>,
    deletion: DeletionEngine<NamespaceDeleter>,
}

impl NamespaceController {
    pub const NAME: &'static str = "namespace";

    pub fn new(clients: Clients, settings: Settings, health: Arc<HealthCheckRegistry>) -> Self {
        let cache = Arc::new(ObjectCache::default());
        let deleter = NamespaceDeleter::new(clients.clone(), cache.clone(), settings.retry);
        Self {
            deletion: DeletionEngine::new(deleter, settings.delete_when_done, settings.retry),
            clients,
            settings,
            cache,
            health,
        }
    }

    pub fn health(&self) -> &Arc<HealthCheckRegistry> {
        &self.health
    }

    /// Last observed state, the one project usage was computed from.
    pub fn cached(&self, key: &ObjectKey) -> Option<Namespace> {
        self.cache.get(key)
    }

    async fn provision(&self, mut ns: Namespace) -> Result<Action> {
        let key = ns.key();
        match self.create_namespace(&ns).await {
            Ok(()) => ns.set_phase(NamespacePhase::Available, None, None),
            Err(err) => {
                warn!(%key, error = %err, "failed to create namespace");
                ns.set_phase(
                    NamespacePhase::Failed,
                    Some("CreateNamespaceFailed".into()),
                    Some(err.to_string()),
                );
            }
        }
        let Some(ns) = persist_status(self.clients.namespaces.as_ref(), &ns, self.settings.retry)
            .await?
        else {
            return Ok(Action::await_change());
        };
        info!(%key, phase = ?ns.phase(), "namespace processed");
        if ns.phase() == NamespacePhase::Available {
            self.cache.set(key.clone(), ns);
        }
        self.start_health_check(key);
        Ok(Action::await_change())
    }

    async fn create_namespace(&self, ns: &Namespace) -> Result<()> {
        ns.spec
            .validate()
            .map_err(|err| Error::validation(err.to_string()))?;
        validate_resource_list(&ns.spec.hard)?;

        let project = self
            .clients
            .projects
            .get(&ObjectKey::cluster(ns.project_name()))
            .await?;
        if project.is_deletion_requested() {
            return Err(Error::validation(format!(
                "project {} is being deleted",
                project.name_any()
            )));
        }
        if !project.spec.clusters.contains_key(&ns.spec.cluster_name) {
            return Err(Error::validation(format!(
                "cluster {} is not granted to project {}",
                ns.spec.cluster_name,
                project.name_any()
            )));
        }

        let client = self.clients.clusters.client_for(&ns.spec.cluster_name).await?;
        cluster::ensure_namespace(client.as_ref(), ns).await?;
        cluster::ensure_quota(client.as_ref(), ns).await?;

        let name = ns.name_any();
        usage::charge(
            self.clients.projects.as_ref(),
            ns.project_name(),
            Contributor::Namespace(&name),
            &ns.cluster_hard(),
            self.settings.retry.attempts,
        )
        .await
    }

    /// The namespace as last charged to its project, if this controller
    /// charged it.
    fn charged(&self, ns: &Namespace) -> Option<Namespace> {
        self.cache.get(&ns.key()).filter(|cached| cached.uid() == ns.uid())
    }

    /// Moves the project usage from the charged `hard` to the current one.
    async fn recharge(&self, charged: &Namespace, ns: &Namespace) -> Result<()> {
        let name = ns.name_any();
        usage::recharge(
            self.clients.projects.as_ref(),
            ns.project_name(),
            Contributor::Namespace(&name),
            &charged.cluster_hard(),
            &ns.cluster_hard(),
            self.settings.retry.attempts,
        )
        .await
    }

    /// Retries a failed namespace. The cache only moves once the project
    /// carries the current `hard`, ahead of the status write.
    async fn recover(&self, ns: Namespace) -> Result<Action> {
        let key = ns.key();
        if let Err(err) = self.create_namespace(&ns).await {
            debug!(%key, error = %err, "namespace still failing");
            self.start_health_check(key);
            return Ok(Action::await_change());
        }
        // charge is a no-op for a namespace charged before it failed
        if let Some(charged) = self.charged(&ns) {
            if charged.spec.hard != ns.spec.hard {
                self.recharge(&charged, &ns).await?;
            }
        }
        self.cache.set(key.clone(), ns.clone());
        let mut recovered = ns;
        recovered.set_phase(NamespacePhase::Available, None, None);
        let Some(recovered) =
            persist_status(self.clients.namespaces.as_ref(), &recovered, self.settings.retry)
                .await?
        else {
            return Ok(Action::await_change());
        };
        info!(%key, "failed namespace recovered");
        self.cache.set(key.clone(), recovered);
        self.start_health_check(key);
        Ok(Action::await_change())
    }

    /// Available and Locked namespaces: push `hard` changes to the cluster
    /// and the project.
    async fn observe(&self, ns: Namespace) -> Result<Action> {
        let key = ns.key();
        let cached = self.charged(&ns).unwrap_or_else(|| ns.clone());
        if cached.spec.hard != ns.spec.hard {
            validate_resource_list(&ns.spec.hard)?;
            let client = self.clients.clusters.client_for(&ns.spec.cluster_name).await?;
            cluster::ensure_quota(client.as_ref(), &ns).await?;
            self.recharge(&cached, &ns).await?;
            info!(%key, "namespace quota updated");
        }
        self.cache.set(key.clone(), ns);
        self.start_health_check(key);
        Ok(Action::await_change())
    }

    fn start_health_check(&self, key: ObjectKey) {
        let clients = self.clients.clone();
        let retry = self.settings.retry;
        let target = key.clone();
        if self.health.start(key, move || {
            let clients = clients.clone();
            let key = target.clone();
            async move { health::check(&clients, retry, &key).await }
        }) {
            debug!("namespace health check started");
        }
    }
}

#[async_trait]
impl Reconciler for NamespaceController {
    type Object = Namespace;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn sync(&self, key: &ObjectKey) -> Result<Action> {
        let ns = match self.clients.namespaces.get(key).await {
            Ok(ns) => ns,
            Err(err) if err.is_not_found() => {
                info!(%key, "namespace has been deleted");
                self.health.stop(key);
                self.cache.delete(key);
                return Ok(Action::await_change());
            }
            Err(err) => return Err(err),
        };

        if ns.is_deletion_requested() || ns.is_terminating() {
            self.health.stop(key);
            self.deletion.delete(key).await?;
            return Ok(Action::await_change());
        }

        let ns = ensure_finalizer(self.clients.namespaces.as_ref(), ns, NAMESPACE_FINALIZER).await?;
        match ns.phase() {
            NamespacePhase::Pending => self.provision(ns).await,
            NamespacePhase::Available | NamespacePhase::Locked => self.observe(ns).await,
            NamespacePhase::Failed => self.recover(ns).await,
            NamespacePhase::Terminating => Ok(Action::await_change()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use prometheus_client::metrics::gauge::Gauge;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::api::constants::PROJECT_LABEL;
    use crate::api::v1::namespace::NamespaceSpec;
    use crate::api::v1::project::{Project, ProjectSpec};
    use crate::api::v1::resources::HardQuantity;
    use crate::clients::MemoryBackends;
    use crate::runtime::RetryPolicy;
    use crate::store::memory::{Fault, Op};
    use crate::store::ObjectStore;

    struct Fixture {
        controller: NamespaceController,
        backends: MemoryBackends,
        _shutdown: CancellationToken,
    }

    async fn fixture() -> Fixture {
        let (clients, backends) = Clients::in_memory();
        backends.clusters.add_cluster("cls1");
        backends
            .projects
            .create(&Project::new(
                "proj1",
                ProjectSpec {
                    tenant_id: "t1".into(),
                    display_name: String::new(),
                    members: vec![],
                    parent_project_name: None,
                    clusters: [(
                        "cls1".to_string(),
                        HardQuantity {
                            hard: [("cpu".to_string(), Quantity("10".into()))].into(),
                        },
                    )]
                    .into(),
                    finalizers: vec![],
                },
            ))
            .await
            .unwrap();
        let shutdown = CancellationToken::new();
        let settings = Settings {
            retry: RetryPolicy::immediate(5),
            ..Settings::default()
        };
        let health = HealthCheckRegistry::new(
            shutdown.child_token(),
            Duration::from_secs(3600),
            Gauge::default(),
        );
        Fixture {
            controller: NamespaceController::new(clients, settings, health),
            backends,
            _shutdown: shutdown,
        }
    }

    fn namespace(cpu: &str) -> Namespace {
        let mut ns = Namespace::new(
            "ns1",
            NamespaceSpec {
                cluster_name: "cls1".into(),
                namespace: "team-a".into(),
                tenant_id: "t1".into(),
                hard: [("cpu".to_string(), Quantity(cpu.into()))].into(),
                finalizers: vec![],
            },
        );
        ns.metadata.namespace = Some("proj1".into());
        ns
    }

    fn project_cpu(f: &Fixture) -> Option<String> {
        let project = f.backends.projects.all().pop()?;
        Some(project.status?.clusters.get("cls1")?.used.get("cpu")?.0.clone())
    }

    #[tokio::test]
    async fn pending_namespace_becomes_available() {
        let f = fixture().await;
        let key = f.backends.namespaces.create(&namespace("1")).await.unwrap().key();

        f.controller.sync(&key).await.unwrap();

        let ns = f.backends.namespaces.get(&key).await.unwrap();
        assert_eq!(ns.phase(), NamespacePhase::Available);
        assert!(ns.has_finalizer(NAMESPACE_FINALIZER));
        let remote = f.backends.clusters.cluster("cls1").unwrap().namespace("team-a").unwrap();
        assert_eq!(remote.labels()[PROJECT_LABEL.as_str()], "proj1");
        assert_eq!(project_cpu(&f).as_deref(), Some("1"));
        assert!(f.controller.health().contains(&key));
    }

    #[tokio::test]
    async fn repeated_syncs_charge_the_project_once() {
        let f = fixture().await;
        let key = f.backends.namespaces.create(&namespace("1")).await.unwrap().key();
        for _ in 0..3 {
            f.controller.sync(&key).await.unwrap();
        }
        assert_eq!(project_cpu(&f).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn unreachable_cluster_fails_the_namespace() {
        let f = fixture().await;
        f.backends.clusters.cluster("cls1").unwrap().set_unreachable(true);
        let key = f.backends.namespaces.create(&namespace("1")).await.unwrap().key();

        f.controller.sync(&key).await.unwrap();

        let ns = f.backends.namespaces.get(&key).await.unwrap();
        assert_eq!(ns.phase(), NamespacePhase::Failed);
        let status = ns.status.unwrap();
        assert_eq!(status.reason.as_deref(), Some("CreateNamespaceFailed"));
        assert!(status.message.unwrap().contains("connection refused"));
        assert_eq!(project_cpu(&f), None);

        f.backends.clusters.cluster("cls1").unwrap().set_unreachable(false);
        f.controller.sync(&key).await.unwrap();
        let ns = f.backends.namespaces.get(&key).await.unwrap();
        assert_eq!(ns.phase(), NamespacePhase::Available);
        assert_eq!(project_cpu(&f).as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn hard_change_moves_project_usage() {
        let f = fixture().await;
        let key = f.backends.namespaces.create(&namespace("1")).await.unwrap().key();
        f.controller.sync(&key).await.unwrap();

        let mut ns = f.backends.namespaces.get(&key).await.unwrap();
        ns.spec.hard.insert("cpu".into(), Quantity("3".into()));
        f.backends.namespaces.update(&ns).await.unwrap();
        f.controller.sync(&key).await.unwrap();

        assert_eq!(project_cpu(&f).as_deref(), Some("3"));
        let quota = f.backends.clusters.cluster("cls1").unwrap().quota("team-a", "team-a").unwrap();
        assert_eq!(quota.spec.unwrap().hard.unwrap()["cpu"], Quantity("3".into()));
        assert_eq!(f.controller.cached(&key).unwrap().spec.hard["cpu"], Quantity("3".into()));
    }

    #[tokio::test]
    async fn failed_project_write_is_retried_without_double_charge() {
        let f = fixture().await;
        let key = f.backends.namespaces.create(&namespace("1")).await.unwrap().key();
        f.controller.sync(&key).await.unwrap();

        let mut ns = f.backends.namespaces.get(&key).await.unwrap();
        ns.spec.hard.insert("cpu".into(), Quantity("2".into()));
        f.backends.namespaces.update(&ns).await.unwrap();
        f.backends.projects.fail_next(Op::UpdateStatus, 1, Fault::Unavailable);
        assert!(f.controller.sync(&key).await.is_err());
        f.controller.sync(&key).await.unwrap();

        assert_eq!(project_cpu(&f).as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn hard_change_while_failed_is_recharged_on_recovery() {
        let f = fixture().await;
        let key = f.backends.namespaces.create(&namespace("1")).await.unwrap().key();
        f.controller.sync(&key).await.unwrap();

        f.backends.clusters.cluster("cls1").unwrap().remove_namespace("team-a");
        health::check(&f.controller.clients, f.controller.settings.retry, &key).await;
        let mut ns = f.backends.namespaces.get(&key).await.unwrap();
        assert_eq!(ns.phase(), NamespacePhase::Failed);

        ns.spec.hard.insert("cpu".into(), Quantity("3".into()));
        f.backends.namespaces.update(&ns).await.unwrap();
        f.controller.sync(&key).await.unwrap();
        f.controller.sync(&key).await.unwrap();

        let ns = f.backends.namespaces.get(&key).await.unwrap();
        assert_eq!(ns.phase(), NamespacePhase::Available);
        assert_eq!(project_cpu(&f).as_deref(), Some("3"));

        f.backends.namespaces.delete(&key).await.unwrap();
        f.controller.sync(&key).await.unwrap();
        assert_eq!(project_cpu(&f).as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn recovery_retried_after_a_failed_status_write_charges_once() {
        let f = fixture().await;
        let key = f.backends.namespaces.create(&namespace("1")).await.unwrap().key();
        f.controller.sync(&key).await.unwrap();
        f.backends.clusters.cluster("cls1").unwrap().remove_namespace("team-a");
        health::check(&f.controller.clients, f.controller.settings.retry, &key).await;

        let mut ns = f.backends.namespaces.get(&key).await.unwrap();
        ns.spec.hard.insert("cpu".into(), Quantity("4".into()));
        f.backends.namespaces.update(&ns).await.unwrap();
        f.backends.namespaces.fail_next(Op::UpdateStatus, 5, Fault::Unavailable);
        assert!(f.controller.sync(&key).await.is_err());
        f.controller.sync(&key).await.unwrap();

        assert_eq!(
            f.backends.namespaces.get(&key).await.unwrap().phase(),
            NamespacePhase::Available
        );
        assert_eq!(project_cpu(&f).as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn uncharged_namespace_is_charged_before_it_becomes_available() {
        let f = fixture().await;
        f.backends.projects.fail_next(Op::UpdateStatus, 1, Fault::Unavailable);
        let key = f.backends.namespaces.create(&namespace("2")).await.unwrap().key();
        f.controller.sync(&key).await.unwrap();
        assert_eq!(
            f.backends.namespaces.get(&key).await.unwrap().phase(),
            NamespacePhase::Failed
        );
        assert_eq!(project_cpu(&f), None);

        health::check(&f.controller.clients, f.controller.settings.retry, &key).await;
        assert_eq!(
            f.backends.namespaces.get(&key).await.unwrap().phase(),
            NamespacePhase::Failed
        );

        f.controller.sync(&key).await.unwrap();
        assert_eq!(
            f.backends.namespaces.get(&key).await.unwrap().phase(),
            NamespacePhase::Available
        );
        assert_eq!(project_cpu(&f).as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn deletion_releases_usage_and_cluster_namespace() {
        let f = fixture().await;
        let key = f.backends.namespaces.create(&namespace("2")).await.unwrap().key();
        f.controller.sync(&key).await.unwrap();

        f.backends.namespaces.delete(&key).await.unwrap();
        f.controller.sync(&key).await.unwrap();

        assert!(!f.backends.namespaces.contains(&key));
        assert!(f.backends.clusters.cluster("cls1").unwrap().namespace("team-a").is_none());
        assert_eq!(project_cpu(&f).as_deref(), Some("0"));
        assert!(!f.controller.health().contains(&key));

        f.controller.sync(&key).await.unwrap();
        assert!(f.controller.cached(&key).is_none());
    }
}
