use std::collections::BTreeSet;

use async_trait::async_trait;
use garde::Validate;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::api::v1::platform::Platform;
use crate::api::{BusinessObject, ObjectKey};
use crate::clients::Clients;
use crate::config::Settings;
use crate::error::Result;
use crate::runtime::retry::persist_status;
use crate::runtime::{Action, ObjectCache, Reconciler};
use crate::store::FieldSelector;

/// Pushes platform administrators into the identity provider of their
/// tenant. Administrators a platform stops granting are removed unless
/// another platform of the same tenant still grants them.
pub struct PlatformController {
    clients: Clients,
    settings: Settings,
    cache: ObjectCache<Platform>,
}

impl PlatformController {
    pub const NAME: &'static str = "platform";

    pub fn new(clients: Clients, settings: Settings) -> Self {
        Self {
            clients,
            settings,
            cache: ObjectCache::default(),
        }
    }

    /// Administrators granted by every other live platform of `tenant`.
    async fn granted_elsewhere(&self, tenant: &str, exclude: &ObjectKey) -> Result<BTreeSet<String>> {
        let selector = FieldSelector::everything().eq("spec.tenantID", tenant);
        Ok(self
            .clients
            .platforms
            .list(None, &selector)
            .await?
            .into_iter()
            .filter(|p| &p.key() != exclude && !p.is_deletion_requested())
            .flat_map(|p| p.spec.administrators)
            .collect())
    }

    /// Writes `grant` into the tenant's administrators and drops the
    /// `revoke` ones nobody else grants.
    async fn apply(
        &self,
        tenant: &str,
        key: &ObjectKey,
        grant: &[String],
        revoke: &[String],
    ) -> Result<()> {
        let identity = self.clients.identity.as_ref();
        let current = identity.get_administrators(tenant).await?;
        let kept = self.granted_elsewhere(tenant, key).await?;

        let mut desired = current.clone();
        for admin in grant {
            if !desired.contains(admin) {
                desired.push(admin.clone());
            }
        }
        desired.retain(|admin| grant.contains(admin) || kept.contains(admin) || !revoke.contains(admin));

        if desired != current {
            info!(tenant, %key, administrators = ?desired, "updating tenant administrators");
            identity.update_administrators(tenant, &desired).await?;
        }
        Ok(())
    }

    async fn revoke_all(&self, gone: &Platform) -> Result<()> {
        let key = gone.key();
        match self
            .apply(&gone.spec.tenant_id, &key, &[], &gone.spec.administrators)
            .await
        {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl Reconciler for PlatformController {
    type Object = Platform;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn sync(&self, key: &ObjectKey) -> Result<Action> {
        let platform = match self.clients.platforms.get(key).await {
            Ok(platform) => platform,
            Err(err) if err.is_not_found() => {
                if let Some(gone) = self.cache.get(key) {
                    info!(%key, "platform has been deleted, revoking its administrators");
                    self.revoke_all(&gone).await?;
                    self.cache.delete(key);
                }
                return Ok(Action::await_change());
            }
            Err(err) => return Err(err),
        };
        if platform.is_deletion_requested() {
            // revoked once the object is gone
            return Ok(Action::await_change());
        }
        if let Err(err) = platform.spec.validate() {
            warn!(%key, error = %err, "invalid platform, ignoring");
            return Ok(Action::await_change());
        }

        let cached = self
            .cache
            .get(key)
            .filter(|cached| cached.uid() == platform.uid());
        if let Some(previous) = cached.as_ref() {
            if previous.spec.tenant_id != platform.spec.tenant_id {
                info!(%key, from = %previous.spec.tenant_id, to = %platform.spec.tenant_id, "platform moved to another tenant");
                self.revoke_all(previous).await?;
            }
        }
        let previous = match cached {
            Some(previous) if previous.spec.tenant_id == platform.spec.tenant_id => {
                previous.spec.administrators
            }
            Some(_) => Vec::new(),
            None => platform
                .status
                .as_ref()
                .map(|s| s.administrators.clone())
                .unwrap_or_default(),
        };
        self.apply(
            &platform.spec.tenant_id,
            key,
            &platform.spec.administrators,
            &previous,
        )
        .await?;

        let written = platform.status.as_ref().map(|s| &s.administrators);
        let platform = if written != Some(&platform.spec.administrators) {
            let mut next = platform.clone();
            next.status.get_or_insert_with(Default::default).administrators =
                platform.spec.administrators.clone();
            match persist_status(self.clients.platforms.as_ref(), &next, self.settings.retry).await? {
                Some(stored) => stored,
                None => return Ok(Action::await_change()),
            }
        } else {
            platform
        };
        info!(%key, name = %platform.name_any(), "platform synced");
        self.cache.set(key.clone(), platform);
        Ok(Action::await_change())
    }
}
