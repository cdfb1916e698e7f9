use std::sync::Arc;

use async_trait::async_trait;
use garde::Validate;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{deletion::ImageNamespaceDeleter, health, registry};
use crate::api::constants::IMAGE_NAMESPACE_FINALIZER;
use crate::api::v1::imagenamespace::{ImageNamespace, ImageNamespacePhase};
use crate::api::{BusinessObject, Finalizable, ObjectKey, Phased};
use crate::clients::Clients;
use crate::config::Settings;
use crate::deletion::{ensure_finalizer, DeletionEngine};
use crate::error::{Error, Result};
use crate::runtime::retry::persist_status;
use crate::runtime::{Action, HealthCheckRegistry, ObjectCache, Reconciler};

/// Registers image namespaces with the registry service and follows their
/// lock state there.
pub struct ImageNamespaceController {
    clients: Clients,
    settings: Settings,
    cache: ObjectCache<ImageNamespace>,
    health: Arc<HealthCheckRegistry>,
    deletion: DeletionEngine<ImageNamespaceDeleter>,
}

impl ImageNamespaceController {
    pub const NAME: &'static str = "imagenamespace";

    pub fn new(clients: Clients, settings: Settings, health: Arc<HealthCheckRegistry>) -> Self {
        Self {
            deletion: DeletionEngine::new(
                ImageNamespaceDeleter::new(clients.clone()),
                settings.delete_when_done,
                settings.retry,
            ),
            clients,
            settings,
            cache: ObjectCache::default(),
            health,
        }
    }

    pub fn health(&self) -> &Arc<HealthCheckRegistry> {
        &self.health
    }

    async fn register(&self, ins: &ImageNamespace) -> Result<i32> {
        ins.spec
            .validate()
            .map_err(|err| Error::validation(err.to_string()))?;
        let mirror = registry::ensure(&self.clients.registry, ins).await?;
        Ok(mirror.status.map(|s| s.repo_count).unwrap_or_default())
    }

    async fn provision(&self, mut ins: ImageNamespace) -> Result<Action> {
        let key = ins.key();
        match self.register(&ins).await {
            Ok(repo_count) => {
                ins.set_phase(ImageNamespacePhase::Available, None, None);
                ins.status.get_or_insert_with(Default::default).repo_count = repo_count;
            }
            Err(err) => {
                warn!(%key, error = %err, "failed to create registry namespace");
                ins.set_phase(
                    ImageNamespacePhase::Failed,
                    Some("CreateImageNamespaceFailed".into()),
                    Some(err.to_string()),
                );
            }
        }
        let Some(ins) =
            persist_status(self.clients.image_namespaces.as_ref(), &ins, self.settings.retry)
                .await?
        else {
            return Ok(Action::await_change());
        };
        info!(%key, phase = ?ins.phase(), "image namespace processed");
        self.cache.set(key.clone(), ins);
        self.start_health_check(key);
        Ok(Action::await_change())
    }

    async fn observe(&self, ins: ImageNamespace) -> Result<Action> {
        let key = ins.key();
        let cached = match self.cache.get(&key) {
            Some(cached) if cached.uid() == ins.uid() => Some(cached),
            _ => None,
        };
        if ins.phase() == ImageNamespacePhase::Failed {
            if self.register(&ins).await.is_ok() {
                let mut recovered = ins.clone();
                recovered.set_phase(ImageNamespacePhase::Available, None, None);
                info!(%key, "failed image namespace recovered");
                persist_status(self.clients.image_namespaces.as_ref(), &recovered, self.settings.retry)
                    .await?;
            }
        } else if cached.is_some_and(|c| c.spec != ins.spec) {
            registry::ensure(&self.clients.registry, &ins).await?;
            info!(%key, "registry namespace updated");
        }
        self.cache.set(key.clone(), ins);
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
            debug!("image namespace health check started");
        }
    }
}

#[async_trait]
impl Reconciler for ImageNamespaceController {
    type Object = ImageNamespace;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn sync(&self, key: &ObjectKey) -> Result<Action> {
        let ins = match self.clients.image_namespaces.get(key).await {
            Ok(ins) => ins,
            Err(err) if err.is_not_found() => {
                info!(%key, "image namespace has been deleted");
                self.health.stop(key);
                self.cache.delete(key);
                return Ok(Action::await_change());
            }
            Err(err) => return Err(err),
        };

        if ins.is_deletion_requested() || ins.is_terminating() {
            self.health.stop(key);
            self.deletion.delete(key).await?;
            return Ok(Action::await_change());
        }

        let ins = ensure_finalizer(
            self.clients.image_namespaces.as_ref(),
            ins,
            IMAGE_NAMESPACE_FINALIZER,
        )
        .await?;
        debug!(%key, name = %ins.name_any(), phase = ?ins.phase(), "syncing image namespace");
        match ins.phase() {
            ImageNamespacePhase::Pending => self.provision(ins).await,
            ImageNamespacePhase::Available | ImageNamespacePhase::Locked | ImageNamespacePhase::Failed => {
                self.observe(ins).await
            }
            ImageNamespacePhase::Terminating => Ok(Action::await_change()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use prometheus_client::metrics::gauge::Gauge;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::api::constants::IMAGE_NAMESPACE_LOCKED_REASON;
    use crate::api::v1::imagenamespace::ImageNamespaceSpec;
    use crate::api::v1::registry::RegistryNamespaceStatus;
    use crate::clients::MemoryBackends;
    use crate::runtime::{RetryPolicy, Tick};
    use crate::store::ObjectStore;

    fn setup() -> (ImageNamespaceController, Clients, MemoryBackends, CancellationToken) {
        let (clients, backends) = Clients::in_memory();
        let shutdown = CancellationToken::new();
        let settings = Settings {
            retry: RetryPolicy::immediate(5),
            ..Settings::default()
        };
        let health =
            HealthCheckRegistry::new(shutdown.child_token(), Duration::from_secs(3600), Gauge::default());
        let controller = ImageNamespaceController::new(clients.clone(), settings, health);
        (controller, clients, backends, shutdown)
    }

    fn image_namespace() -> ImageNamespace {
        let mut ins = ImageNamespace::new(
            "in1",
            ImageNamespaceSpec {
                name: "images".into(),
                tenant_id: "t1".into(),
                display_name: "Images".into(),
                visibility: Default::default(),
                finalizers: vec![],
            },
        );
        ins.metadata.namespace = Some("proj1".into());
        ins
    }

    #[tokio::test]
    async fn registers_and_tracks_lock_state() {
        let (controller, clients, backends, _shutdown) = setup();
        let key = backends.image_namespaces.create(&image_namespace()).await.unwrap().key();
        controller.sync(&key).await.unwrap();

        let ins = backends.image_namespaces.get(&key).await.unwrap();
        assert_eq!(ins.phase(), ImageNamespacePhase::Available);
        let mut mirror = backends.registry_namespaces.all().pop().unwrap();
        assert_eq!(mirror.spec.name, "images");

        mirror.status = Some(RegistryNamespaceStatus {
            locked: true,
            repo_count: 3,
        });
        backends.registry_namespaces.update_status(&mirror).await.unwrap();
        assert_eq!(health::check(&clients, RetryPolicy::immediate(5), &key).await, Tick::Continue);

        let ins = backends.image_namespaces.get(&key).await.unwrap();
        assert_eq!(ins.phase(), ImageNamespacePhase::Locked);
        let status = ins.status.unwrap();
        assert_eq!(status.reason.as_deref(), Some(IMAGE_NAMESPACE_LOCKED_REASON));
        assert_eq!(status.repo_count, 3);
    }

    #[tokio::test]
    async fn spec_changes_reach_the_registry() {
        let (controller, _, backends, _shutdown) = setup();
        let key = backends.image_namespaces.create(&image_namespace()).await.unwrap().key();
        controller.sync(&key).await.unwrap();

        let mut ins = backends.image_namespaces.get(&key).await.unwrap();
        ins.spec.display_name = "Team images".into();
        backends.image_namespaces.update(&ins).await.unwrap();
        controller.sync(&key).await.unwrap();

        let mirror = backends.registry_namespaces.all().pop().unwrap();
        assert_eq!(mirror.spec.display_name, "Team images");
    }

    #[tokio::test]
    async fn deletion_removes_the_registry_namespace() {
        let (controller, _, backends, _shutdown) = setup();
        let key = backends.image_namespaces.create(&image_namespace()).await.unwrap().key();
        controller.sync(&key).await.unwrap();
        assert_eq!(backends.registry_namespaces.all().len(), 1);

        backends.image_namespaces.delete(&key).await.unwrap();
        controller.sync(&key).await.unwrap();

        assert!(backends.registry_namespaces.all().is_empty());
        assert!(!backends.image_namespaces.contains(&key));
        assert!(!controller.health().contains(&key));
    }
}
