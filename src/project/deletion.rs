use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use super::usage::{self, Contributor};
use crate::api::constants::PROJECT_FINALIZER;
use crate::api::v1::project::Project;
use crate::api::BusinessObject;
use crate::clients::Clients;
use crate::deletion::ContentDeleter;
use crate::error::{AggregateError, Result};
use crate::runtime::{ObjectCache, RetryPolicy};
use crate::store::{FieldSelector, ObjectStore};

/// Selects the projects whose parent is `project`.
pub fn children_selector(project: &str) -> FieldSelector {
    FieldSelector::everything().eq("spec.parentProjectName", project)
}

/// Requests deletion of everything living in a project, in order: chart
/// groups, image namespaces, namespaces, then child projects. Each of those
/// is finalized by its own controller; the project waits until all are
/// gone.
pub struct ProjectDeleter {
    clients: Clients,
    cache: Arc<ObjectCache<Project>>,
    retry: RetryPolicy,
}

impl ProjectDeleter {
    pub fn new(clients: Clients, cache: Arc<ObjectCache<Project>>, retry: RetryPolicy) -> Self {
        Self {
            clients,
            cache,
            retry,
        }
    }

    async fn release_parent_usage(&self, project: &Project) -> Result<()> {
        let charged = match self.cache.get(&project.key()) {
            Some(cached) if cached.uid() == project.uid() => cached,
            _ => project.clone(),
        };
        let Some(parent) = charged.spec.parent_project_name.as_deref() else {
            return Ok(());
        };
        let name = project.name_any();
        usage::release(
            self.clients.projects.as_ref(),
            parent,
            Contributor::ChildProject(&name),
            &charged.spec.clusters,
            self.retry.attempts,
        )
        .await
    }
}

/// Requests deletion of every object returned by `list`, collecting
/// failures.
async fn delete_all<K: BusinessObject>(
    store: &dyn ObjectStore<K>,
    objects: Result<Vec<K>>,
    errors: &mut AggregateError,
) {
    let objects = match objects {
        Ok(objects) => objects,
        Err(err) => {
            errors.push(err);
            return;
        }
    };
    for obj in objects.iter().filter(|o| !o.is_deletion_requested()) {
        let key = obj.key();
        info!(kind = %K::kind_name(), %key, "deleting project content");
        match store.delete(&key).await {
            Err(err) if !err.is_not_found() => errors.push(err),
            _ => {}
        }
    }
}

#[async_trait]
impl ContentDeleter for ProjectDeleter {
    type Object = Project;

    fn store(&self) -> &dyn ObjectStore<Project> {
        self.clients.projects.as_ref()
    }

    fn finalizer_token(&self) -> &'static str {
        PROJECT_FINALIZER
    }

    async fn delete_all_content(&self, project: &Project) -> AggregateError {
        let name = project.name_any();
        let all = FieldSelector::everything();
        let c = &self.clients;
        let mut errors = AggregateError::new();

        let chart_groups = c.chart_groups.list(Some(&name), &all).await;
        delete_all(c.chart_groups.as_ref(), chart_groups, &mut errors).await;
        let image_namespaces = c.image_namespaces.list(Some(&name), &all).await;
        delete_all(c.image_namespaces.as_ref(), image_namespaces, &mut errors).await;
        let namespaces = c.namespaces.list(Some(&name), &all).await;
        delete_all(c.namespaces.as_ref(), namespaces, &mut errors).await;
        let children = c.projects.list(None, &children_selector(&name)).await;
        delete_all(c.projects.as_ref(), children, &mut errors).await;

        if let Err(err) = self.release_parent_usage(project).await {
            errors.push(err);
        }
        errors
    }

    async fn all_content_deleted(&self, project: &Project) -> Result<bool> {
        let name = project.name_any();
        let all = FieldSelector::everything();
        let c = &self.clients;
        let remaining = c.chart_groups.list(Some(&name), &all).await?.len()
            + c.image_namespaces.list(Some(&name), &all).await?.len()
            + c.namespaces.list(Some(&name), &all).await?.len()
            + c.projects.list(None, &children_selector(&name)).await?.len();
        if remaining > 0 {
            info!(project = %name, remaining, "waiting for project content to be deleted");
        }
        Ok(remaining == 0)
    }
}
