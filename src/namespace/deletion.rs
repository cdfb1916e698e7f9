use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use super::cluster::{self, Ownership};
use crate::api::constants::NAMESPACE_FINALIZER;
use crate::api::v1::namespace::Namespace;
use crate::api::BusinessObject;
use crate::clients::Clients;
use crate::deletion::ContentDeleter;
use crate::error::{AggregateError, Result};
use crate::project::usage::{self, Contributor};
use crate::runtime::{ObjectCache, RetryPolicy};
use crate::store::ObjectStore;

/// Removes the namespace from its cluster and gives its capacity back to
/// the project.
pub struct NamespaceDeleter {
    clients: Clients,
    cache: Arc<ObjectCache<Namespace>>,
    retry: RetryPolicy,
}

impl NamespaceDeleter {
    pub fn new(clients: Clients, cache: Arc<ObjectCache<Namespace>>, retry: RetryPolicy) -> Self {
        Self {
            clients,
            cache,
            retry,
        }
    }

    /// Only a namespace still labelled for this project is deleted; a
    /// detached one now belongs to someone else.
    async fn delete_remote_namespace(&self, ns: &Namespace) -> Result<()> {
        let client = self.clients.clusters.client_for(&ns.spec.cluster_name).await?;
        let remote = match client.get_namespace(&ns.spec.namespace).await {
            Ok(remote) => remote,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        match cluster::ownership(&remote, ns.project_name()) {
            Ownership::Owned => {
                info!(namespace = %ns.spec.namespace, cluster = %ns.spec.cluster_name, "deleting namespace from cluster");
                client.delete_namespace(&ns.spec.namespace).await
            }
            ownership => {
                info!(namespace = %ns.spec.namespace, ?ownership, "namespace not owned, leaving it on the cluster");
                Ok(())
            }
        }
    }

    async fn release_project_usage(&self, ns: &Namespace) -> Result<()> {
        let charged = match self.cache.get(&ns.key()) {
            Some(cached) if cached.uid() == ns.uid() => cached.cluster_hard(),
            _ => ns.cluster_hard(),
        };
        let name = ns.name_any();
        usage::release(
            self.clients.projects.as_ref(),
            ns.project_name(),
            Contributor::Namespace(&name),
            &charged,
            self.retry.attempts,
        )
        .await
    }
}

#[async_trait]
impl ContentDeleter for NamespaceDeleter {
    type Object = Namespace;

    fn store(&self) -> &dyn ObjectStore<Namespace> {
        self.clients.namespaces.as_ref()
    }

    fn finalizer_token(&self) -> &'static str {
        NAMESPACE_FINALIZER
    }

    async fn delete_all_content(&self, ns: &Namespace) -> AggregateError {
        let mut errors = AggregateError::new();
        if let Err(err) = self.delete_remote_namespace(ns).await {
            errors.push(err);
        }
        if let Err(err) = self.release_project_usage(ns).await {
            errors.push(err);
        }
        errors
    }
}
