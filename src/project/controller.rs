use std::sync::Arc;

use async_trait::async_trait;
use garde::Validate;
use kube::ResourceExt;
use tracing::{info, warn};

use super::deletion::ProjectDeleter;
use super::usage::{self, Contributor};
use crate::api::constants::PROJECT_FINALIZER;
use crate::api::v1::project::{Project, ProjectPhase};
use crate::api::{BusinessObject, Finalizable, ObjectKey, Phased};
use crate::clients::Clients;
use crate::config::Settings;
use crate::deletion::{ensure_finalizer, DeletionEngine};
use crate::error::Result;
use crate::runtime::retry::persist_status;
use crate::runtime::{Action, ObjectCache, Reconciler};

/// Accounts project capacity in the parent project and cascades deletions
/// to everything a project contains.
pub struct ProjectController {
    clients: Clients,
    settings: Settings,
    cache: Arc<ObjectCache<Project>>,
    deletion: DeletionEngine<ProjectDeleter>,
}

impl ProjectController {
    pub const NAME: &'static str = "project";

    pub fn new(clients: Clients, settings: Settings) -> Self {
        let cache = Arc::new(ObjectCache::default());
        let deleter = ProjectDeleter::new(clients.clone(), cache.clone(), settings.retry);
        Self {
            deletion: DeletionEngine::new(deleter, settings.delete_when_done, settings.retry),
            clients,
            settings,
            cache,
        }
    }

    /// Keeps the parent's usage equal to this project's capacity, following
    /// capacity changes and moves to another parent.
    async fn account_in_parent(&self, cached: &Project, project: &Project) -> Result<()> {
        let name = project.name_any();
        let me = Contributor::ChildProject(&name);
        let projects = self.clients.projects.as_ref();
        let attempts = self.settings.retry.attempts;
        let old_parent = cached.spec.parent_project_name.as_deref();
        let new_parent = project.spec.parent_project_name.as_deref();

        if old_parent != new_parent {
            if let Some(old) = old_parent {
                info!(project = %name, from = old, to = ?new_parent, "project moved");
                usage::release(projects, old, me, &cached.spec.clusters, attempts).await?;
            }
        }
        let Some(parent) = new_parent else {
            return Ok(());
        };
        if old_parent == new_parent && cached.spec.clusters != project.spec.clusters {
            usage::recharge(
                projects,
                parent,
                me,
                &cached.spec.clusters,
                &project.spec.clusters,
                attempts,
            )
            .await?;
        }
        usage::charge(projects, parent, me, &project.spec.clusters, attempts).await
    }
}

#[async_trait]
impl Reconciler for ProjectController {
    type Object = Project;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn sync(&self, key: &ObjectKey) -> Result<Action> {
        let project = match self.clients.projects.get(key).await {
            Ok(project) => project,
            Err(err) if err.is_not_found() => {
                info!(%key, "project has been deleted");
                self.cache.delete(key);
                return Ok(Action::await_change());
            }
            Err(err) => return Err(err),
        };

        if project.is_deletion_requested() || project.is_terminating() {
            self.deletion.delete(key).await?;
            return Ok(Action::await_change());
        }

        if let Err(err) = project.spec.validate() {
            warn!(%key, error = %err, "invalid project, ignoring");
            return Ok(Action::await_change());
        }

        let mut project =
            ensure_finalizer(self.clients.projects.as_ref(), project, PROJECT_FINALIZER).await?;
        if project.status.is_none() {
            project.set_phase(ProjectPhase::Active, None, None);
            match persist_status(self.clients.projects.as_ref(), &project, self.settings.retry)
                .await?
            {
                Some(stored) => project = stored,
                None => return Ok(Action::await_change()),
            }
        }

        let cached = match self.cache.get(key) {
            Some(cached) if cached.uid() == project.uid() => cached,
            _ => project.clone(),
        };
        self.account_in_parent(&cached, &project).await?;
        self.cache.set(key.clone(), project);
        Ok(Action::await_change())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use super::*;
    use crate::api::v1::project::ProjectSpec;
    use crate::api::v1::resources::{ClusterHard, HardQuantity};
    use crate::clients::MemoryBackends;
    use crate::runtime::RetryPolicy;
    use crate::store::ObjectStore;

    fn cpu(amount: &str) -> ClusterHard {
        [(
            "cls1".to_string(),
            HardQuantity {
                hard: [("cpu".to_string(), Quantity(amount.into()))].into(),
            },
        )]
        .into()
    }

    fn project(name: &str, parent: Option<&str>, clusters: ClusterHard) -> Project {
        Project::new(
            name,
            ProjectSpec {
                tenant_id: "t1".into(),
                display_name: String::new(),
                members: vec![],
                parent_project_name: parent.map(String::from),
                clusters,
                finalizers: vec![],
            },
        )
    }

    fn setup() -> (ProjectController, MemoryBackends) {
        let (clients, backends) = Clients::in_memory();
        let settings = Settings {
            retry: RetryPolicy::immediate(5),
            ..Settings::default()
        };
        (ProjectController::new(clients, settings), backends)
    }

    async fn used_cpu(backends: &MemoryBackends, name: &str) -> Option<String> {
        let project = backends.projects.get(&ObjectKey::cluster(name)).await.ok()?;
        Some(project.status?.clusters.get("cls1")?.used.get("cpu")?.0.clone())
    }

    #[tokio::test]
    async fn child_capacity_is_charged_to_parent() {
        let (controller, backends) = setup();
        backends.projects.create(&project("parent", None, cpu("10"))).await.unwrap();
        backends
            .projects
            .create(&project("child", Some("parent"), cpu("4")))
            .await
            .unwrap();

        let child = ObjectKey::cluster("child");
        controller.sync(&ObjectKey::cluster("parent")).await.unwrap();
        controller.sync(&child).await.unwrap();
        controller.sync(&child).await.unwrap();

        assert_eq!(used_cpu(&backends, "parent").await.as_deref(), Some("4"));
        let stored = backends.projects.get(&child).await.unwrap();
        assert!(stored.has_finalizer(PROJECT_FINALIZER));
        assert_eq!(stored.phase(), ProjectPhase::Active);
    }

    #[tokio::test]
    async fn capacity_change_and_move_follow_the_parent() {
        let (controller, backends) = setup();
        backends.projects.create(&project("a", None, cpu("10"))).await.unwrap();
        backends.projects.create(&project("b", None, cpu("10"))).await.unwrap();
        backends
            .projects
            .create(&project("child", Some("a"), cpu("2")))
            .await
            .unwrap();
        let key = ObjectKey::cluster("child");
        controller.sync(&key).await.unwrap();

        let mut child = backends.projects.get(&key).await.unwrap();
        child.spec.clusters = cpu("3");
        let child = backends.projects.update(&child).await.unwrap();
        controller.sync(&key).await.unwrap();
        assert_eq!(used_cpu(&backends, "a").await.as_deref(), Some("3"));

        let mut child = child;
        child.spec.parent_project_name = Some("b".into());
        backends.projects.update(&child).await.unwrap();
        controller.sync(&key).await.unwrap();
        assert_eq!(used_cpu(&backends, "a").await.as_deref(), Some("0"));
        assert_eq!(used_cpu(&backends, "b").await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn deletion_waits_for_children() {
        let (controller, backends) = setup();
        backends.projects.create(&project("parent", None, cpu("10"))).await.unwrap();
        backends
            .projects
            .create(&project("child", Some("parent"), cpu("4")))
            .await
            .unwrap();
        let parent = ObjectKey::cluster("parent");
        let child = ObjectKey::cluster("child");
        controller.sync(&parent).await.unwrap();
        controller.sync(&child).await.unwrap();

        backends.projects.delete(&parent).await.unwrap();
        let err = controller.sync(&parent).await.unwrap_err();
        assert!(err.to_string().contains("still owns content"));
        let stored = backends.projects.get(&parent).await.unwrap();
        assert_eq!(stored.phase(), ProjectPhase::Terminating);
        assert!(backends.projects.get(&child).await.unwrap().is_deletion_requested());

        controller.sync(&child).await.unwrap();
        assert!(!backends.projects.contains(&child));
        assert_eq!(used_cpu(&backends, "parent").await.as_deref(), Some("0"));

        controller.sync(&parent).await.unwrap();
        assert!(!backends.projects.contains(&parent));
    }
}
