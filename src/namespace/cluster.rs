use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Namespace as ClusterNamespace, ResourceQuota, ResourceQuotaSpec,
};
use kube::{api::ObjectMeta, ResourceExt};
use tracing::info;

use crate::api::constants::{PROJECT_LABEL, TENANT_LABEL};
use crate::api::v1::namespace::Namespace;
use crate::api::v1::resources::ResourceList;
use crate::error::{Error, Result};
use crate::remote::ClusterClient;

/// Who a namespace on a managed cluster belongs to, according to its
/// project label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    Unlabelled,
    Foreign(String),
}

pub fn ownership(remote: &ClusterNamespace, project: &str) -> Ownership {
    match remote.labels().get(PROJECT_LABEL.as_str()) {
        Some(owner) if owner == project => Ownership::Owned,
        Some(owner) => Ownership::Foreign(owner.clone()),
        None => Ownership::Unlabelled,
    }
}

fn labels(ns: &Namespace) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([(PROJECT_LABEL.to_string(), ns.project_name().to_string())]);
    if !ns.spec.tenant_id.is_empty() {
        labels.insert(TENANT_LABEL.to_string(), ns.spec.tenant_id.clone());
    }
    labels
}

pub fn build_namespace(ns: &Namespace) -> ClusterNamespace {
    ClusterNamespace {
        metadata: ObjectMeta {
            name: Some(ns.spec.namespace.clone()),
            labels: Some(labels(ns)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// The quota enforcing `spec.hard`, named after the namespace it lives in.
pub fn build_quota(ns: &Namespace) -> ResourceQuota {
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(ns.spec.namespace.clone()),
            namespace: Some(ns.spec.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(ns.spec.hard.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Creates the namespace on the cluster, adopting an unlabelled one with
/// the same name. A namespace labelled for another project is an error.
pub async fn ensure_namespace(
    client: &dyn ClusterClient,
    ns: &Namespace,
) -> Result<ClusterNamespace> {
    let name = &ns.spec.namespace;
    match client.get_namespace(name).await {
        Ok(existing) => match ownership(&existing, ns.project_name()) {
            Ownership::Owned => Ok(existing),
            Ownership::Unlabelled => {
                info!(namespace = %name, cluster = %ns.spec.cluster_name, "adopting existing namespace");
                let mut adopted = existing;
                adopted.labels_mut().extend(labels(ns));
                client.update_namespace(&adopted).await
            }
            Ownership::Foreign(owner) => Err(Error::validation(format!(
                "namespace {} on cluster {} belongs to project {}",
                name, ns.spec.cluster_name, owner
            ))),
        },
        Err(err) if err.is_not_found() => client.create_namespace(&build_namespace(ns)).await,
        Err(err) => Err(err),
    }
}

/// Creates or updates the quota so that it enforces `spec.hard`.
pub async fn ensure_quota(client: &dyn ClusterClient, ns: &Namespace) -> Result<ResourceQuota> {
    let name = &ns.spec.namespace;
    match client.get_resource_quota(name, name).await {
        Ok(mut existing) => {
            let desired = Some(ns.spec.hard.clone());
            let spec = existing.spec.get_or_insert_with(Default::default);
            if spec.hard == desired {
                return Ok(existing);
            }
            spec.hard = desired;
            client.update_resource_quota(&existing).await
        }
        Err(err) if err.is_not_found() => client.create_resource_quota(&build_quota(ns)).await,
        Err(err) => Err(err),
    }
}

/// Usage reported by the cluster for the namespace's quota.
pub fn used(quota: &ResourceQuota) -> ResourceList {
    quota
        .status
        .as_ref()
        .and_then(|status| status.used.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::namespace::NamespaceSpec;
    use crate::remote::memory::MemoryCluster;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn namespace(project: &str) -> Namespace {
        let mut ns = Namespace::new(
            "ns1",
            NamespaceSpec {
                cluster_name: "cls1".into(),
                namespace: "team-a".into(),
                tenant_id: "t1".into(),
                hard: [("cpu".to_string(), Quantity("1".into()))].into(),
                finalizers: vec![],
            },
        );
        ns.metadata.namespace = Some(project.into());
        ns
    }

    fn remote(labels: &[(&str, &str)]) -> ClusterNamespace {
        ClusterNamespace {
            metadata: ObjectMeta {
                name: Some("team-a".into()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creates_labelled_namespace_and_quota() {
        let cluster = MemoryCluster::new("cls1");
        let ns = namespace("proj1");
        ensure_namespace(&cluster, &ns).await.unwrap();
        ensure_quota(&cluster, &ns).await.unwrap();

        let created = cluster.namespace("team-a").unwrap();
        assert_eq!(ownership(&created, "proj1"), Ownership::Owned);
        assert_eq!(created.labels()[TENANT_LABEL.as_str()], "t1");
        let quota = cluster.quota("team-a", "team-a").unwrap();
        assert_eq!(quota.spec.unwrap().hard.unwrap()["cpu"], Quantity("1".into()));
    }

    #[tokio::test]
    async fn adopts_unlabelled_namespace() {
        let cluster = MemoryCluster::new("cls1");
        cluster.put_namespace(remote(&[("team", "a")]));
        ensure_namespace(&cluster, &namespace("proj1")).await.unwrap();
        let adopted = cluster.namespace("team-a").unwrap();
        assert_eq!(ownership(&adopted, "proj1"), Ownership::Owned);
        assert_eq!(adopted.labels()["team"], "a");
    }

    #[tokio::test]
    async fn refuses_namespace_of_another_project() {
        let cluster = MemoryCluster::new("cls1");
        cluster.put_namespace(remote(&[(PROJECT_LABEL.as_str(), "proj2")]));
        let err = ensure_namespace(&cluster, &namespace("proj1")).await.unwrap_err();
        assert!(err.to_string().contains("proj2"));
    }

    #[tokio::test]
    async fn quota_follows_hard() {
        let cluster = MemoryCluster::new("cls1");
        let mut ns = namespace("proj1");
        ensure_namespace(&cluster, &ns).await.unwrap();
        ensure_quota(&cluster, &ns).await.unwrap();
        ns.spec.hard.insert("cpu".into(), Quantity("2".into()));
        ensure_quota(&cluster, &ns).await.unwrap();
        let quota = cluster.quota("team-a", "team-a").unwrap();
        assert_eq!(quota.spec.unwrap().hard.unwrap()["cpu"], Quantity("2".into()));
    }
}
