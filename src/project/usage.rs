//! Keeps `Project.status.clusters` equal to what its namespaces and child
//! projects have been granted.
//!
//! Each contributor is charged at most once: its name is recorded in
//! `calculatedNamespaces` / `calculatedChildProjects` together with the
//! charge and removed with the release.

use tracing::debug;

use crate::api::v1::project::{Project, ProjectStatus};
use crate::api::v1::resources::ClusterHard;
use crate::api::{BusinessObject, ObjectKey};
use crate::error::Result;
use crate::quota::{add_cluster_hard_to_used, sub_cluster_hard_from_used};
use crate::store::ObjectStore;

/// Something whose capacity is accounted in a project's usage.
#[derive(Clone, Copy, Debug)]
pub enum Contributor<'a> {
    Namespace(&'a str),
    ChildProject(&'a str),
}

impl Contributor<'_> {
    fn name(&self) -> &str {
        match self {
            Contributor::Namespace(name) | Contributor::ChildProject(name) => name,
        }
    }

    fn recorded<'s>(&self, status: &'s mut ProjectStatus) -> &'s mut Vec<String> {
        match self {
            Contributor::Namespace(_) => &mut status.calculated_namespaces,
            Contributor::ChildProject(_) => &mut status.calculated_child_projects,
        }
    }

    fn is_recorded(&self, status: &mut ProjectStatus) -> bool {
        let name = self.name().to_string();
        self.recorded(status).contains(&name)
    }
}

/// Adds `hard` to the usage of `project` unless `contributor` was already
/// charged.
pub async fn charge(
    projects: &dyn ObjectStore<Project>,
    project: &str,
    contributor: Contributor<'_>,
    hard: &ClusterHard,
    attempts: u32,
) -> Result<()> {
    update_status(projects, project, attempts, |status| {
        if contributor.is_recorded(status) {
            return Ok(false);
        }
        status.clusters = add_cluster_hard_to_used(&status.clusters, hard)?;
        contributor.recorded(status).push(contributor.name().to_string());
        Ok(true)
    })
    .await
}

/// Replaces the charge `old` of an already charged `contributor` by `new`.
pub async fn recharge(
    projects: &dyn ObjectStore<Project>,
    project: &str,
    contributor: Contributor<'_>,
    old: &ClusterHard,
    new: &ClusterHard,
    attempts: u32,
) -> Result<()> {
    update_status(projects, project, attempts, |status| {
        if !contributor.is_recorded(status) {
            return Ok(false);
        }
        let released = sub_cluster_hard_from_used(&status.clusters, old)?;
        status.clusters = add_cluster_hard_to_used(&released, new)?;
        Ok(true)
    })
    .await
}

/// Removes the charge of `contributor`. A missing project has nothing left
/// to release.
pub async fn release(
    projects: &dyn ObjectStore<Project>,
    project: &str,
    contributor: Contributor<'_>,
    hard: &ClusterHard,
    attempts: u32,
) -> Result<()> {
    let result = update_status(projects, project, attempts, |status| {
        if !contributor.is_recorded(status) {
            return Ok(false);
        }
        status.clusters = sub_cluster_hard_from_used(&status.clusters, hard)?;
        let name = contributor.name();
        contributor.recorded(status).retain(|n| n != name);
        Ok(true)
    })
    .await;
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

/// Read-modify-write of a project status; `mutate` returns whether anything
/// changed. Conflicts re-read the project.
async fn update_status<F>(
    projects: &dyn ObjectStore<Project>,
    project: &str,
    attempts: u32,
    mutate: F,
) -> Result<()>
where
    F: Fn(&mut ProjectStatus) -> Result<bool> + Send + Sync,
{
    let key = ObjectKey::cluster(project);
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut current = projects.get(&key).await?;
        let status = current.status_mut().get_or_insert_with(Default::default);
        if !mutate(status)? {
            return Ok(());
        }
        match projects.update_status(&current).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_conflict() && attempt < attempts => {
                debug!(project, attempt, "project status conflict, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
