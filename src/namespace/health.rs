use tracing::{info, warn};

use super::cluster::{self, Ownership};
use crate::api::v1::namespace::{Namespace, NamespacePhase};
use crate::api::v1::resources::ResourceList;
use crate::api::{BusinessObject, ObjectKey, Phased};
use crate::clients::Clients;
use crate::error::Result;
use crate::runtime::retry::{persist_status, RetryPolicy};
use crate::runtime::Tick;

enum Observed {
    Missing,
    NotOwned(String),
    Healthy(Option<ResourceList>),
}

/// One health-check tick of a namespace: is it still there on its cluster,
/// still ours, and how much of its quota is used.
pub async fn check(clients: &Clients, retry: RetryPolicy, key: &ObjectKey) -> Tick {
    let ns = match clients.namespaces.get(key).await {
        Ok(ns) => ns,
        Err(err) if err.is_not_found() => return Tick::Exit,
        Err(err) => {
            warn!(%key, error = %err, "failed to get namespace for health check");
            return Tick::Continue;
        }
    };
    if ns.is_deletion_requested()
        || matches!(ns.phase(), NamespacePhase::Pending | NamespacePhase::Terminating)
    {
        return Tick::Exit;
    }

    let observed = match observe(clients, &ns).await {
        Ok(observed) => observed,
        Err(err) => {
            warn!(%key, error = %err, "cluster not reachable, health unknown");
            return Tick::Continue;
        }
    };

    let mut next = ns.clone();
    match observed {
        Observed::Missing => next.set_phase(
            NamespacePhase::Failed,
            Some("NamespaceNotFound".into()),
            Some(format!(
                "namespace {} not found on cluster {}",
                ns.spec.namespace, ns.spec.cluster_name
            )),
        ),
        // a locked namespace is being moved and may already be detached
        Observed::NotOwned(_) if ns.phase() == NamespacePhase::Locked => {}
        Observed::NotOwned(owner) => next.set_phase(
            NamespacePhase::Failed,
            Some("NamespaceNotOwned".into()),
            Some(format!(
                "namespace {} on cluster {} is labelled for project {:?}",
                ns.spec.namespace, ns.spec.cluster_name, owner
            )),
        ),
        // a failed namespace is recovered by the controller, which charges
        // the project before marking it available
        Observed::Healthy(used) => {
            if let Some(used) = used {
                next.status.get_or_insert_with(Default::default).used = used;
            }
        }
    }

    if next.status != ns.status {
        if next.phase() != ns.phase() {
            info!(%key, from = ?ns.phase(), to = ?next.phase(), "namespace health changed");
        }
        if let Err(err) = persist_status(clients.namespaces.as_ref(), &next, retry).await {
            warn!(%key, error = %err, "failed to persist namespace health");
        }
    }
    Tick::Continue
}

async fn observe(clients: &Clients, ns: &Namespace) -> Result<Observed> {
    let client = clients.clusters.client_for(&ns.spec.cluster_name).await?;
    let remote = match client.get_namespace(&ns.spec.namespace).await {
        Ok(remote) => remote,
        Err(err) if err.is_not_found() => return Ok(Observed::Missing),
        Err(err) => return Err(err),
    };
    match cluster::ownership(&remote, ns.project_name()) {
        Ownership::Owned => {}
        Ownership::Unlabelled => return Ok(Observed::NotOwned(String::new())),
        Ownership::Foreign(owner) => return Ok(Observed::NotOwned(owner)),
    }
    let name = &ns.spec.namespace;
    match client.get_resource_quota(name, name).await {
        Ok(quota) => Ok(Observed::Healthy(Some(cluster::used(&quota)))),
        Err(err) if err.is_not_found() => Ok(Observed::Healthy(None)),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::api::core::v1::ResourceQuotaStatus;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::ResourceExt;
    use rstest::rstest;

    use super::*;
    use crate::api::constants::PROJECT_LABEL;
    use crate::api::v1::namespace::NamespaceSpec;
    use crate::clients::MemoryBackends;
    use crate::remote::memory::MemoryCluster;
    use crate::store::ObjectStore;

    struct Setup {
        clients: Clients,
        backends: MemoryBackends,
        remote: Arc<MemoryCluster>,
        ns: Namespace,
    }

    /// A namespace in `phase` whose cluster namespace and quota exist.
    async fn setup(phase: NamespacePhase) -> Setup {
        let (clients, backends) = Clients::in_memory();
        let remote = backends.clusters.add_cluster("cls1");
        let mut ns = Namespace::new(
            "ns1",
            NamespaceSpec {
                cluster_name: "cls1".into(),
                namespace: "team-a".into(),
                tenant_id: "t1".into(),
                hard: [("cpu".to_string(), Quantity("2".into()))].into(),
                finalizers: vec![],
            },
        );
        ns.metadata.namespace = Some("proj1".into());
        let mut ns = backends.namespaces.create(&ns).await.unwrap();
        remote.put_namespace(cluster::build_namespace(&ns));
        remote.put_quota(cluster::build_quota(&ns));
        ns.set_phase(phase, None, None);
        let ns = backends.namespaces.update_status(&ns).await.unwrap();
        Setup {
            clients,
            backends,
            remote,
            ns,
        }
    }

    impl Setup {
        async fn check(&self) -> Tick {
            check(&self.clients, RetryPolicy::immediate(3), &self.ns.key()).await
        }

        async fn current(&self) -> Namespace {
            self.backends.namespaces.get(&self.ns.key()).await.unwrap()
        }
    }

    fn reason(ns: &Namespace) -> Option<String> {
        ns.status.as_ref()?.reason.clone()
    }

    #[tokio::test]
    async fn missing_cluster_namespace_fails_the_namespace() {
        let s = setup(NamespacePhase::Available).await;
        s.remote.remove_namespace("team-a");

        assert_eq!(s.check().await, Tick::Continue);

        let ns = s.current().await;
        assert_eq!(ns.phase(), NamespacePhase::Failed);
        assert_eq!(reason(&ns).as_deref(), Some("NamespaceNotFound"));
    }

    #[rstest]
    #[case::available(NamespacePhase::Available, NamespacePhase::Failed)]
    #[case::locked(NamespacePhase::Locked, NamespacePhase::Locked)]
    #[tokio::test]
    async fn foreign_label_fails_unless_locked(
        #[case] phase: NamespacePhase,
        #[case] expected: NamespacePhase,
    ) {
        let s = setup(phase).await;
        let mut foreign = cluster::build_namespace(&s.ns);
        foreign
            .labels_mut()
            .insert(PROJECT_LABEL.to_string(), "proj2".into());
        s.remote.put_namespace(foreign);

        s.check().await;

        let ns = s.current().await;
        assert_eq!(ns.phase(), expected);
        if expected == NamespacePhase::Failed {
            assert_eq!(reason(&ns).as_deref(), Some("NamespaceNotOwned"));
        }
    }

    #[tokio::test]
    async fn quota_usage_is_copied_into_status() {
        let s = setup(NamespacePhase::Available).await;
        let mut quota = cluster::build_quota(&s.ns);
        quota.status = Some(ResourceQuotaStatus {
            used: Some([("cpu".to_string(), Quantity("500m".into()))].into()),
            ..Default::default()
        });
        s.remote.put_quota(quota);

        s.check().await;

        let ns = s.current().await;
        assert_eq!(ns.phase(), NamespacePhase::Available);
        assert_eq!(ns.status.unwrap().used["cpu"], Quantity("500m".into()));
    }

    #[tokio::test]
    async fn unreachable_cluster_leaves_the_phase_alone() {
        let s = setup(NamespacePhase::Available).await;
        s.remote.remove_namespace("team-a");
        s.remote.set_unreachable(true);

        assert_eq!(s.check().await, Tick::Continue);

        assert_eq!(s.current().await.phase(), NamespacePhase::Available);
    }

    #[tokio::test]
    async fn healthy_failed_namespace_is_left_to_the_controller() {
        let s = setup(NamespacePhase::Failed).await;

        assert_eq!(s.check().await, Tick::Continue);

        assert_eq!(s.current().await.phase(), NamespacePhase::Failed);
    }

    #[rstest]
    #[case::pending(NamespacePhase::Pending)]
    #[case::terminating(NamespacePhase::Terminating)]
    #[tokio::test]
    async fn loop_exits_outside_watched_phases(#[case] phase: NamespacePhase) {
        let s = setup(phase).await;
        assert_eq!(s.check().await, Tick::Exit);
    }

    #[tokio::test]
    async fn loop_exits_once_the_namespace_is_gone() {
        let s = setup(NamespacePhase::Available).await;
        s.backends.namespaces.delete(&s.ns.key()).await.unwrap();
        assert_eq!(s.check().await, Tick::Exit);
    }
}
