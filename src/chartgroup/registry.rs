//! The registry side of a chart group: one `RegistryChartGroup` per tenant
//! and chart group name.

use tracing::info;

use crate::api::v1::chartgroup::ChartGroup;
use crate::api::v1::registry::{RegistryChartGroup, RegistryChartGroupSpec};
use crate::api::BusinessObject;
use crate::error::Result;
use crate::remote::RegistryClient;
use crate::store::tenant_name_selector;

fn desired(cg: &ChartGroup) -> RegistryChartGroup {
    let name = format!("{}-{}", cg.spec.tenant_id, cg.spec.name).to_lowercase();
    RegistryChartGroup::new(
        &name,
        RegistryChartGroupSpec {
            name: cg.spec.name.clone(),
            tenant_id: cg.spec.tenant_id.clone(),
            display_name: cg.spec.display_name.clone(),
            visibility: cg.spec.visibility,
            type_: cg.spec.type_.clone(),
            projects: cg.spec.projects.clone(),
            description: cg.spec.description.clone(),
        },
    )
}

pub async fn find(registry: &RegistryClient, cg: &ChartGroup) -> Result<Option<RegistryChartGroup>> {
    let selector = tenant_name_selector(&cg.spec.tenant_id, &cg.spec.name);
    Ok(registry.chart_groups.list(None, &selector).await?.into_iter().next())
}

/// Creates the registry chart group, or brings an existing one in line
/// with `cg`.
pub async fn ensure(registry: &RegistryClient, cg: &ChartGroup) -> Result<RegistryChartGroup> {
    let want = desired(cg);
    match find(registry, cg).await? {
        Some(existing) if existing.spec == want.spec => Ok(existing),
        Some(mut existing) => {
            existing.spec = want.spec;
            registry.chart_groups.update(&existing).await
        }
        None => {
            info!(tenant = %cg.spec.tenant_id, name = %cg.spec.name, "creating registry chart group");
            registry.chart_groups.create(&want).await
        }
    }
}

pub async fn delete(registry: &RegistryClient, cg: &ChartGroup) -> Result<()> {
    let selector = tenant_name_selector(&cg.spec.tenant_id, &cg.spec.name);
    for mirror in registry.chart_groups.list(None, &selector).await? {
        match registry.chart_groups.delete(&mirror.key()).await {
            Err(err) if !err.is_not_found() => return Err(err),
            _ => {}
        }
    }
    Ok(())
}
