use std::fmt::Display;

use async_trait::async_trait;
use garde::Validate;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::api::constants::PROJECT_LABEL;
use crate::api::v1::namespace::{Namespace, NamespacePhase, NamespaceSpec};
use crate::api::v1::nsemigration::{NsEmigration, NsEmigrationPhase};
use crate::api::{BusinessObject, Finalizable, ObjectKey, Phased};
use crate::clients::Clients;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::runtime::retry::persist_status;
use crate::runtime::{Action, Reconciler};

/// Drives an `NsEmigration` through
/// `Pending → OldOneLocked → OldOneDetached → NewOneCreated →
/// OldOneTerminating → Finished`, one step per sync. Any failure ends in
/// `Failed`; waiting steps requeue without writing.
pub struct NsEmigrationController {
    clients: Clients,
    settings: Settings,
}

fn source_key(em: &NsEmigration) -> ObjectKey {
    ObjectKey::namespaced(em.namespace().unwrap_or_default(), &em.spec.namespace)
}

fn destination_key(em: &NsEmigration) -> ObjectKey {
    ObjectKey::namespaced(&em.spec.destination, &em.spec.namespace)
}

fn expect_phase(em: &NsEmigration, expected: NsEmigrationPhase) -> Result<()> {
    if em.phase() != expected {
        return Err(Error::invariant(format!(
            "NsEmigration {} is {:?}, handler expects {:?}",
            em.key(),
            em.phase(),
            expected
        )));
    }
    Ok(())
}

impl NsEmigrationController {
    pub const NAME: &'static str = "nsemigration";

    pub fn new(clients: Clients, settings: Settings) -> Self {
        Self { clients, settings }
    }

    fn poll(&self) -> Action {
        Action::requeue(self.settings.emigration_poll_interval)
    }

    async fn advance(&self, em: &NsEmigration) -> Result<Action> {
        let Some(next) = em.phase().next() else {
            return Err(Error::invariant(format!(
                "NsEmigration {} has no phase after {:?}",
                em.key(),
                em.phase()
            )));
        };
        let mut advanced = em.clone();
        advanced.set_phase(next, None, None);
        persist_status(self.clients.emigrations.as_ref(), &advanced, self.settings.retry).await?;
        info!(key = %em.key(), from = ?em.phase(), to = ?next, "emigration advanced");
        Ok(Action::await_change())
    }

    async fn fail(&self, em: &NsEmigration, reason: &str, err: impl Display) -> Result<Action> {
        warn!(key = %em.key(), phase = ?em.phase(), reason, error = %err, "emigration failed");
        let mut failed = em.clone();
        failed.set_phase(
            NsEmigrationPhase::Failed,
            Some(reason.to_string()),
            Some(err.to_string()),
        );
        persist_status(self.clients.emigrations.as_ref(), &failed, self.settings.retry).await?;
        Ok(Action::await_change())
    }

    /// Pending: check the move makes sense and lock the namespace.
    async fn lock_old(&self, em: NsEmigration) -> Result<Action> {
        expect_phase(&em, NsEmigrationPhase::Pending)?;
        if let Err(err) = em.spec.validate() {
            return self.fail(&em, "InvalidEmigration", err).await;
        }
        let source = source_key(&em);
        if source.namespace_str() == em.spec.destination {
            return self
                .fail(&em, "SameProject", "destination is the current project")
                .await;
        }
        if let Err(err) = self
            .clients
            .projects
            .get(&ObjectKey::cluster(&em.spec.destination))
            .await
        {
            return self.fail(&em, "DestinationNotFound", err).await;
        }

        let mut old = match self.clients.namespaces.get(&source).await {
            Ok(old) => old,
            Err(err) => return self.fail(&em, "GetNamespaceFailed", err).await,
        };
        match old.phase() {
            NamespacePhase::Available => {
                old.set_phase(NamespacePhase::Locked, Some("Emigrating".into()), None);
                match persist_status(self.clients.namespaces.as_ref(), &old, self.settings.retry)
                    .await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        let err = Error::not_found("Namespace", &source);
                        return self.fail(&em, "LockNamespaceFailed", err).await;
                    }
                    Err(err) => return self.fail(&em, "LockNamespaceFailed", err).await,
                }
            }
            // a previous attempt locked it but could not record the step
            NamespacePhase::Locked => {}
            phase => {
                let err = format!("namespace {source} is {phase:?}");
                return self.fail(&em, "NamespaceNotAvailable", err).await;
            }
        }
        self.advance(&em).await
    }

    /// OldOneLocked: take the cluster namespace away from the old project.
    async fn detach_old(&self, em: NsEmigration) -> Result<Action> {
        expect_phase(&em, NsEmigrationPhase::OldOneLocked)?;
        let old = match self.clients.namespaces.get(&source_key(&em)).await {
            Ok(old) => old,
            Err(err) => return self.fail(&em, "GetNamespaceFailed", err).await,
        };
        if let Err(err) = self.remove_project_label(&old).await {
            return self.fail(&em, "DetachNamespaceFailed", err).await;
        }
        self.advance(&em).await
    }

    async fn remove_project_label(&self, old: &Namespace) -> Result<()> {
        let client = self.clients.clusters.client_for(&old.spec.cluster_name).await?;
        let mut remote = client.get_namespace(&old.spec.namespace).await?;
        if remote.labels_mut().remove(PROJECT_LABEL.as_str()).is_some() {
            client.update_namespace(&remote).await?;
            info!(namespace = %old.spec.namespace, cluster = %old.spec.cluster_name, "namespace detached");
        }
        Ok(())
    }

    /// OldOneDetached: the same binding in the destination project.
    async fn create_new(&self, em: NsEmigration) -> Result<Action> {
        expect_phase(&em, NsEmigrationPhase::OldOneDetached)?;
        let old = match self.clients.namespaces.get(&source_key(&em)).await {
            Ok(old) => old,
            Err(err) => return self.fail(&em, "GetNamespaceFailed", err).await,
        };
        let mut new = Namespace::new(
            &old.name_any(),
            NamespaceSpec {
                cluster_name: old.spec.cluster_name.clone(),
                namespace: old.spec.namespace.clone(),
                tenant_id: old.spec.tenant_id.clone(),
                hard: old.spec.hard.clone(),
                finalizers: vec![],
            },
        );
        new.metadata.namespace = Some(em.spec.destination.clone());

        match self.clients.namespaces.create(&new).await {
            Ok(_) => {}
            Err(err) if err.is_already_exists() => {
                match self.clients.namespaces.get(&destination_key(&em)).await {
                    Ok(existing)
                        if existing.spec.cluster_name == old.spec.cluster_name
                            && existing.spec.namespace == old.spec.namespace => {}
                    Ok(_) => {
                        return self.fail(&em, "CreateNamespaceFailed", err).await;
                    }
                    Err(err) => return self.fail(&em, "CreateNamespaceFailed", err).await,
                }
            }
            Err(err) => return self.fail(&em, "CreateNamespaceFailed", err).await,
        }
        self.advance(&em).await
    }

    /// NewOneCreated: once the new namespace is available, delete the old
    /// one.
    async fn delete_old(&self, em: NsEmigration) -> Result<Action> {
        expect_phase(&em, NsEmigrationPhase::NewOneCreated)?;
        let new = match self.clients.namespaces.get(&destination_key(&em)).await {
            Ok(new) => new,
            Err(err) => return self.fail(&em, "GetNewNamespaceFailed", err).await,
        };
        match new.phase() {
            NamespacePhase::Pending => return Ok(self.poll()),
            NamespacePhase::Available => {}
            phase => {
                let message = new
                    .status
                    .as_ref()
                    .and_then(|s| s.message.clone())
                    .unwrap_or_default();
                let err = format!("new namespace is {phase:?}: {message}");
                return self.fail(&em, "NewNamespaceFailed", err).await;
            }
        }

        let source = source_key(&em);
        match self.clients.namespaces.get(&source).await {
            Ok(old) if old.is_deletion_requested() || old.is_terminating() => {}
            Ok(old) if old.phase() == NamespacePhase::Locked => {
                if let Err(err) = self.clients.namespaces.delete(&source).await {
                    return self.fail(&em, "DeleteNamespaceFailed", err).await;
                }
                info!(namespace = %source, "old namespace deletion requested");
            }
            Ok(old) => {
                let err = format!("old namespace is {:?}", old.phase());
                return self.fail(&em, "OldNamespaceNotLocked", err).await;
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return self.fail(&em, "GetNamespaceFailed", err).await,
        }
        self.advance(&em).await
    }

    /// OldOneTerminating: wait for the old namespace to be gone.
    async fn await_old_gone(&self, em: NsEmigration) -> Result<Action> {
        expect_phase(&em, NsEmigrationPhase::OldOneTerminating)?;
        match self.clients.namespaces.get(&source_key(&em)).await {
            Err(err) if err.is_not_found() => self.advance(&em).await,
            Ok(old) if old.is_deletion_requested() || old.is_terminating() => Ok(self.poll()),
            Ok(old) => {
                let err = format!("old namespace is {:?}", old.phase());
                self.fail(&em, "OldNamespaceNotTerminating", err).await
            }
            Err(err) => self.fail(&em, "GetNamespaceFailed", err).await,
        }
    }

    /// Finished: the command is done, remove it.
    async fn finish(&self, em: NsEmigration) -> Result<Action> {
        expect_phase(&em, NsEmigrationPhase::Finished)?;
        match self.clients.emigrations.delete(&em.key()).await {
            Err(err) if !err.is_not_found() => Err(err),
            _ => {
                info!(key = %em.key(), "emigration finished");
                Ok(Action::await_change())
            }
        }
    }
}

#[async_trait]
impl Reconciler for NsEmigrationController {
    type Object = NsEmigration;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn sync(&self, key: &ObjectKey) -> Result<Action> {
        let em = match self.clients.emigrations.get(key).await {
            Ok(em) => em,
            Err(err) if err.is_not_found() => return Ok(Action::await_change()),
            Err(err) => return Err(err),
        };
        if em.is_deletion_requested() {
            return Ok(Action::await_change());
        }
        match em.phase() {
            NsEmigrationPhase::Pending => self.lock_old(em).await,
            NsEmigrationPhase::OldOneLocked => self.detach_old(em).await,
            NsEmigrationPhase::OldOneDetached => self.create_new(em).await,
            NsEmigrationPhase::NewOneCreated => self.delete_old(em).await,
            NsEmigrationPhase::OldOneTerminating => self.await_old_gone(em).await,
            NsEmigrationPhase::Finished => self.finish(em).await,
            NsEmigrationPhase::Failed => Ok(Action::await_change()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use super::*;
    use crate::api::v1::nsemigration::NsEmigrationSpec;
    use crate::api::v1::project::{Project, ProjectSpec};
    use crate::clients::MemoryBackends;
    use crate::error::ErrorKind;
    use crate::runtime::RetryPolicy;
    use crate::store::ObjectStore;

    async fn setup() -> (NsEmigrationController, MemoryBackends) {
        let (clients, backends) = Clients::in_memory();
        for name in ["proj1", "proj2"] {
            backends
                .projects
                .create(&Project::new(
                    name,
                    ProjectSpec {
                        tenant_id: "t1".into(),
                        display_name: String::new(),
                        members: vec![],
                        parent_project_name: None,
                        clusters: Default::default(),
                        finalizers: vec![],
                    },
                ))
                .await
                .unwrap();
        }
        let settings = Settings {
            retry: RetryPolicy::immediate(5),
            emigration_poll_interval: Duration::from_secs(7),
            ..Settings::default()
        };
        (NsEmigrationController::new(clients, settings), backends)
    }

    async fn namespace(backends: &MemoryBackends, phase: NamespacePhase) -> Namespace {
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
        ns.metadata.namespace = Some("proj1".into());
        let mut ns = backends.namespaces.create(&ns).await.unwrap();
        ns.set_phase(phase, None, None);
        backends.namespaces.update_status(&ns).await.unwrap()
    }

    async fn emigration(backends: &MemoryBackends, destination: &str) -> ObjectKey {
        let mut em = NsEmigration::new(
            "move-ns1",
            NsEmigrationSpec {
                namespace: "ns1".into(),
                ns_show_name: String::new(),
                destination: destination.into(),
            },
        );
        em.metadata.namespace = Some("proj1".into());
        backends.emigrations.create(&em).await.unwrap().key()
    }

    async fn phase_of(backends: &MemoryBackends, key: &ObjectKey) -> NsEmigrationPhase {
        backends.emigrations.get(key).await.unwrap().phase()
    }

    #[tokio::test]
    async fn pending_locks_the_namespace() {
        let (controller, backends) = setup().await;
        let ns = namespace(&backends, NamespacePhase::Available).await;
        let key = emigration(&backends, "proj2").await;

        controller.sync(&key).await.unwrap();

        assert_eq!(phase_of(&backends, &key).await, NsEmigrationPhase::OldOneLocked);
        let ns = backends.namespaces.get(&ns.key()).await.unwrap();
        assert_eq!(ns.phase(), NamespacePhase::Locked);
    }

    #[tokio::test]
    async fn unavailable_namespace_fails_the_emigration() {
        let (controller, backends) = setup().await;
        namespace(&backends, NamespacePhase::Failed).await;
        let key = emigration(&backends, "proj2").await;

        controller.sync(&key).await.unwrap();

        let em = backends.emigrations.get(&key).await.unwrap();
        assert_eq!(em.phase(), NsEmigrationPhase::Failed);
        assert_eq!(em.status.unwrap().reason.as_deref(), Some("NamespaceNotAvailable"));

        // terminal
        controller.sync(&key).await.unwrap();
        assert_eq!(phase_of(&backends, &key).await, NsEmigrationPhase::Failed);
    }

    #[tokio::test]
    async fn moving_into_the_same_project_fails() {
        let (controller, backends) = setup().await;
        namespace(&backends, NamespacePhase::Available).await;
        let key = emigration(&backends, "proj1").await;
        controller.sync(&key).await.unwrap();
        assert_eq!(phase_of(&backends, &key).await, NsEmigrationPhase::Failed);
    }

    #[tokio::test]
    async fn waits_while_the_new_namespace_is_pending() {
        let (controller, backends) = setup().await;
        namespace(&backends, NamespacePhase::Locked).await;
        let key = emigration(&backends, "proj2").await;
        let mut em = backends.emigrations.get(&key).await.unwrap();
        em.set_phase(NsEmigrationPhase::OldOneDetached, None, None);
        backends.emigrations.update_status(&em).await.unwrap();

        controller.sync(&key).await.unwrap();
        assert_eq!(phase_of(&backends, &key).await, NsEmigrationPhase::NewOneCreated);
        let created = backends
            .namespaces
            .get(&ObjectKey::namespaced("proj2", "ns1"))
            .await
            .unwrap();
        assert_eq!(created.spec.namespace, "team-a");

        let action = controller.sync(&key).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(7)));
        assert_eq!(phase_of(&backends, &key).await, NsEmigrationPhase::NewOneCreated);
    }

    #[tokio::test]
    async fn handler_rejects_foreign_phase() {
        let (controller, backends) = setup().await;
        let key = emigration(&backends, "proj2").await;
        let em = backends.emigrations.get(&key).await.unwrap();

        let err = controller.detach_old(em).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        assert_eq!(phase_of(&backends, &key).await, NsEmigrationPhase::Pending);
    }

    #[tokio::test]
    async fn finished_emigration_deletes_itself() {
        let (controller, backends) = setup().await;
        let key = emigration(&backends, "proj2").await;
        let mut em = backends.emigrations.get(&key).await.unwrap();
        em.set_phase(NsEmigrationPhase::Finished, None, None);
        backends.emigrations.update_status(&em).await.unwrap();

        controller.sync(&key).await.unwrap();
        assert!(!backends.emigrations.contains(&key));
    }
}
