use tracing::{info, warn};

use super::registry;
use crate::api::constants::CHART_GROUP_LOCKED_REASON;
use crate::api::v1::chartgroup::ChartGroupPhase;
use crate::api::{BusinessObject, ObjectKey, Phased};
use crate::clients::Clients;
use crate::runtime::retry::{persist_status, RetryPolicy};
use crate::runtime::Tick;

/// Mirrors the registry's view of a chart group: locked, gone, or fine
/// with some number of charts.
pub async fn check(clients: &Clients, retry: RetryPolicy, key: &ObjectKey) -> Tick {
    let cg = match clients.chart_groups.get(key).await {
        Ok(cg) => cg,
        Err(err) if err.is_not_found() => return Tick::Exit,
        Err(err) => {
            warn!(%key, error = %err, "failed to get chart group for health check");
            return Tick::Continue;
        }
    };
    if cg.is_deletion_requested()
        || matches!(cg.phase(), ChartGroupPhase::Pending | ChartGroupPhase::Terminating)
    {
        return Tick::Exit;
    }

    let mirror = match registry::find(&clients.registry, &cg).await {
        Ok(mirror) => mirror,
        Err(err) => {
            warn!(%key, error = %err, "registry not reachable");
            return Tick::Continue;
        }
    };

    let mut next = cg.clone();
    match mirror {
        None => next.set_phase(
            ChartGroupPhase::Failed,
            Some("ChartGroupNotFound".into()),
            Some(format!("chart group {} not found in registry", cg.spec.name)),
        ),
        Some(mirror) => {
            if mirror.is_locked() {
                next.set_phase(
                    ChartGroupPhase::Locked,
                    Some(CHART_GROUP_LOCKED_REASON.into()),
                    None,
                );
            } else if cg.phase() != ChartGroupPhase::Available {
                next.set_phase(ChartGroupPhase::Available, None, None);
            }
            if let Some(status) = mirror.status {
                next.status.get_or_insert_with(Default::default).chart_count = status.chart_count;
            }
        }
    }

    if next.status != cg.status {
        if next.phase() != cg.phase() {
            info!(%key, from = ?cg.phase(), to = ?next.phase(), "chart group health changed");
        }
        if let Err(err) = persist_status(clients.chart_groups.as_ref(), &next, retry).await {
            warn!(%key, error = %err, "failed to persist chart group health");
        }
    }
    Tick::Continue
}
