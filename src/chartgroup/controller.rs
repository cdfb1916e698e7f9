use std::sync::Arc;

use async_trait::async_trait;
use garde::Validate;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{deletion::ChartGroupDeleter, health, registry};
use crate::api::constants::CHART_GROUP_FINALIZER;
use crate::api::v1::chartgroup::{ChartGroup, ChartGroupPhase};
use crate::api::{BusinessObject, Finalizable, ObjectKey, Phased};
use crate::clients::Clients;
use crate::config::Settings;
use crate::deletion::{ensure_finalizer, DeletionEngine};
use crate::error::{Error, Result};
use crate::runtime::retry::persist_status;
use crate::runtime::{Action, HealthCheckRegistry, ObjectCache, Reconciler};

/// Registers chart groups with the registry service and follows their lock
/// state there.
pub struct ChartGroupController {
    clients: Clients,
    settings: Settings,
    cache: ObjectCache<ChartGroup>,
    health: Arc<HealthCheckRegistry>,
    deletion: DeletionEngine<ChartGroupDeleter>,
}

impl ChartGroupController {
    pub const NAME: &'static str = "chartgroup";

    pub fn new(clients: Clients, settings: Settings, health: Arc<HealthCheckRegistry>) -> Self {
        Self {
            deletion: DeletionEngine::new(
                ChartGroupDeleter::new(clients.clone()),
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

    async fn register(&self, cg: &ChartGroup) -> Result<i32> {
        cg.spec
            .validate()
            .map_err(|err| Error::validation(err.to_string()))?;
        let mirror = registry::ensure(&self.clients.registry, cg).await?;
        Ok(mirror.status.map(|s| s.chart_count).unwrap_or_default())
    }

    async fn provision(&self, mut cg: ChartGroup) -> Result<Action> {
        let key = cg.key();
        match self.register(&cg).await {
            Ok(chart_count) => {
                cg.set_phase(ChartGroupPhase::Available, None, None);
                cg.status.get_or_insert_with(Default::default).chart_count = chart_count;
            }
            Err(err) => {
                warn!(%key, error = %err, "failed to create registry chart group");
                cg.set_phase(
                    ChartGroupPhase::Failed,
                    Some("CreateChartGroupFailed".into()),
                    Some(err.to_string()),
                );
            }
        }
        let Some(cg) = persist_status(self.clients.chart_groups.as_ref(), &cg, self.settings.retry)
            .await?
        else {
            return Ok(Action::await_change());
        };
        info!(%key, phase = ?cg.phase(), "chart group processed");
        self.cache.set(key.clone(), cg);
        self.start_health_check(key);
        Ok(Action::await_change())
    }

    async fn observe(&self, cg: ChartGroup) -> Result<Action> {
        let key = cg.key();
        let cached = match self.cache.get(&key) {
            Some(cached) if cached.uid() == cg.uid() => Some(cached),
            _ => None,
        };
        if cg.phase() == ChartGroupPhase::Failed {
            if self.register(&cg).await.is_ok() {
                let mut recovered = cg.clone();
                recovered.set_phase(ChartGroupPhase::Available, None, None);
                info!(%key, "failed chart group recovered");
                persist_status(self.clients.chart_groups.as_ref(), &recovered, self.settings.retry)
                    .await?;
            }
        } else if cached.is_some_and(|c| c.spec != cg.spec) {
            registry::ensure(&self.clients.registry, &cg).await?;
            info!(%key, "registry chart group updated");
        }
        self.cache.set(key.clone(), cg);
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
            debug!("chart group health check started");
        }
    }
}

#[async_trait]
impl Reconciler for ChartGroupController {
    type Object = ChartGroup;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn sync(&self, key: &ObjectKey) -> Result<Action> {
        let cg = match self.clients.chart_groups.get(key).await {
            Ok(cg) => cg,
            Err(err) if err.is_not_found() => {
                info!(%key, "chart group has been deleted");
                self.health.stop(key);
                self.cache.delete(key);
                return Ok(Action::await_change());
            }
            Err(err) => return Err(err),
        };

        if cg.is_deletion_requested() || cg.is_terminating() {
            self.health.stop(key);
            self.deletion.delete(key).await?;
            return Ok(Action::await_change());
        }

        let cg = ensure_finalizer(self.clients.chart_groups.as_ref(), cg, CHART_GROUP_FINALIZER)
            .await?;
        debug!(%key, name = %cg.name_any(), phase = ?cg.phase(), "syncing chart group");
        match cg.phase() {
            ChartGroupPhase::Pending => self.provision(cg).await,
            ChartGroupPhase::Available | ChartGroupPhase::Locked | ChartGroupPhase::Failed => {
                self.observe(cg).await
            }
            ChartGroupPhase::Terminating => Ok(Action::await_change()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use prometheus_client::metrics::gauge::Gauge;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::api::constants::CHART_GROUP_LOCKED_REASON;
    use crate::api::v1::chartgroup::ChartGroupSpec;
    use crate::api::v1::registry::RegistryChartGroupStatus;
    use crate::clients::MemoryBackends;
    use crate::runtime::{RetryPolicy, Tick};
    use crate::store::ObjectStore;

    fn setup() -> (ChartGroupController, Clients, MemoryBackends, CancellationToken) {
        let (clients, backends) = Clients::in_memory();
        let shutdown = CancellationToken::new();
        let settings = Settings {
            retry: RetryPolicy::immediate(5),
            ..Settings::default()
        };
        let health =
            HealthCheckRegistry::new(shutdown.child_token(), Duration::from_secs(3600), Gauge::default());
        let controller = ChartGroupController::new(clients.clone(), settings, health);
        (controller, clients, backends, shutdown)
    }

    fn chart_group() -> ChartGroup {
        let mut cg = ChartGroup::new(
            "cg1",
            ChartGroupSpec {
                name: "charts".into(),
                tenant_id: "t1".into(),
                display_name: "Charts".into(),
                visibility: Default::default(),
                type_: "project".into(),
                projects: vec!["proj1".into()],
                description: String::new(),
                finalizers: vec![],
            },
        );
        cg.metadata.namespace = Some("proj1".into());
        cg
    }

    #[tokio::test]
    async fn registers_and_tracks_lock_state() {
        let (controller, clients, backends, _shutdown) = setup();
        let key = backends.chart_groups.create(&chart_group()).await.unwrap().key();
        controller.sync(&key).await.unwrap();

        let cg = backends.chart_groups.get(&key).await.unwrap();
        assert_eq!(cg.phase(), ChartGroupPhase::Available);
        let mut mirror = backends.registry_chart_groups.all().pop().unwrap();
        assert_eq!(mirror.spec.name, "charts");

        mirror.status = Some(RegistryChartGroupStatus {
            locked: true,
            chart_count: 3,
        });
        backends.registry_chart_groups.update_status(&mirror).await.unwrap();
        assert_eq!(health::check(&clients, RetryPolicy::immediate(5), &key).await, Tick::Continue);

        let cg = backends.chart_groups.get(&key).await.unwrap();
        assert_eq!(cg.phase(), ChartGroupPhase::Locked);
        let status = cg.status.unwrap();
        assert_eq!(status.reason.as_deref(), Some(CHART_GROUP_LOCKED_REASON));
        assert_eq!(status.chart_count, 3);
    }

    #[tokio::test]
    async fn spec_changes_reach_the_registry() {
        let (controller, _, backends, _shutdown) = setup();
        let key = backends.chart_groups.create(&chart_group()).await.unwrap().key();
        controller.sync(&key).await.unwrap();

        let mut cg = backends.chart_groups.get(&key).await.unwrap();
        cg.spec.description = "shared charts".into();
        backends.chart_groups.update(&cg).await.unwrap();
        controller.sync(&key).await.unwrap();

        let mirror = backends.registry_chart_groups.all().pop().unwrap();
        assert_eq!(mirror.spec.description, "shared charts");
    }

    #[tokio::test]
    async fn deletion_removes_the_registry_chart_group() {
        let (controller, _, backends, _shutdown) = setup();
        let key = backends.chart_groups.create(&chart_group()).await.unwrap().key();
        controller.sync(&key).await.unwrap();
        assert_eq!(backends.registry_chart_groups.all().len(), 1);

        backends.chart_groups.delete(&key).await.unwrap();
        controller.sync(&key).await.unwrap();

        assert!(backends.registry_chart_groups.all().is_empty());
        assert!(!backends.chart_groups.contains(&key));
        assert!(!controller.health().contains(&key));
    }
}
