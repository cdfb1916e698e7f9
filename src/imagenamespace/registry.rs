//! Image namespaces are backed by one `RegistryNamespace` per tenant and
//! name.

use tracing::info;

use crate::api::v1::imagenamespace::ImageNamespace;
use crate::api::v1::registry::{RegistryNamespace, RegistryNamespaceSpec};
use crate::api::BusinessObject;
use crate::error::Result;
use crate::remote::RegistryClient;
use crate::store::tenant_name_selector;

fn desired(ins: &ImageNamespace) -> RegistryNamespace {
    let name = format!("{}-{}", ins.spec.tenant_id, ins.spec.name).to_lowercase();
    RegistryNamespace::new(
        &name,
        RegistryNamespaceSpec {
            name: ins.spec.name.clone(),
            tenant_id: ins.spec.tenant_id.clone(),
            display_name: ins.spec.display_name.clone(),
            visibility: ins.spec.visibility,
        },
    )
}

pub async fn find(registry: &RegistryClient, ins: &ImageNamespace) -> Result<Option<RegistryNamespace>> {
    let selector = tenant_name_selector(&ins.spec.tenant_id, &ins.spec.name);
    Ok(registry.namespaces.list(None, &selector).await?.into_iter().next())
}

/// Creates the registry namespace, or brings an existing one in line
/// with `ins`.
pub async fn ensure(registry: &RegistryClient, ins: &ImageNamespace) -> Result<RegistryNamespace> {
    let want = desired(ins);
    match find(registry, ins).await? {
        Some(existing) if existing.spec == want.spec => Ok(existing),
        Some(mut existing) => {
            existing.spec = want.spec;
            registry.namespaces.update(&existing).await
        }
        None => {
            info!(tenant = %ins.spec.tenant_id, name = %ins.spec.name, "creating registry image namespace");
            registry.namespaces.create(&want).await
        }
    }
}

pub async fn delete(registry: &RegistryClient, ins: &ImageNamespace) -> Result<()> {
    let selector = tenant_name_selector(&ins.spec.tenant_id, &ins.spec.name);
    for mirror in registry.namespaces.list(None, &selector).await? {
        match registry.namespaces.delete(&mirror.key()).await {
            Err(err) if !err.is_not_found() => return Err(err),
            _ => {}
        }
    }
    Ok(())
}
