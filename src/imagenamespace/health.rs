use tracing::{info, warn};

use super::registry;
use crate::api::constants::IMAGE_NAMESPACE_LOCKED_REASON;
use crate::api::v1::imagenamespace::ImageNamespacePhase;
use crate::api::{BusinessObject, ObjectKey, Phased};
use crate::clients::Clients;
use crate::runtime::retry::{persist_status, RetryPolicy};
use crate::runtime::Tick;

/// Mirrors the registry's view of an image namespace: locked, gone, or fine
/// with some number of repositories.
pub async fn check(clients: &Clients, retry: RetryPolicy, key: &ObjectKey) -> Tick {
    let ins = match clients.image_namespaces.get(key).await {
        Ok(ins) => ins,
        Err(err) if err.is_not_found() => return Tick::Exit,
        Err(err) => {
            warn!(%key, error = %err, "failed to get image namespace for health check");
            return Tick::Continue;
        }
    };
    if ins.is_deletion_requested()
        || matches!(ins.phase(), ImageNamespacePhase::Pending | ImageNamespacePhase::Terminating)
    {
        return Tick::Exit;
    }

    let mirror = match registry::find(&clients.registry, &ins).await {
        Ok(mirror) => mirror,
        Err(err) => {
            warn!(%key, error = %err, "registry not reachable");
            return Tick::Continue;
        }
    };

    let mut next = ins.clone();
    match mirror {
        None => next.set_phase(
            ImageNamespacePhase::Failed,
            Some("ImageNamespaceNotFound".into()),
            Some(format!("image namespace {} not found in registry", ins.spec.name)),
        ),
        Some(mirror) => {
            if mirror.is_locked() {
                next.set_phase(
                    ImageNamespacePhase::Locked,
                    Some(IMAGE_NAMESPACE_LOCKED_REASON.into()),
                    None,
                );
            } else if ins.phase() != ImageNamespacePhase::Available {
                next.set_phase(ImageNamespacePhase::Available, None, None);
            }
            if let Some(status) = mirror.status {
                next.status.get_or_insert_with(Default::default).repo_count = status.repo_count;
            }
        }
    }

    if next.status != ins.status {
        if next.phase() != ins.phase() {
            info!(%key, from = ?ins.phase(), to = ?next.phase(), "image namespace health changed");
        }
        if let Err(err) = persist_status(clients.image_namespaces.as_ref(), &next, retry).await {
            warn!(%key, error = %err, "failed to persist image namespace health");
        }
    }
    Tick::Continue
}
