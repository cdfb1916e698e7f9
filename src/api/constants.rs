use std::fmt::Display;

use lazy_static::lazy_static;

lazy_static! {
    pub static ref BUSINESS_GROUP: String = "business.kubeplane.io".to_string();
    pub static ref REGISTRY_GROUP: String = "registry.kubeplane.io".to_string();
    pub static ref AUTH_GROUP: String = "auth.kubeplane.io".to_string();
    /// Label put on namespaces in managed clusters naming the owning project.
    pub static ref PROJECT_LABEL: String = format!("{}/projectName", BUSINESS_GROUP.as_str());
    /// Label put on namespaces in managed clusters naming the tenant.
    pub static ref TENANT_LABEL: String = format!("{}/tenantID", BUSINESS_GROUP.as_str());
}

impl Display for BUSINESS_GROUP {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const PROJECT_FINALIZER: &str = "project";
pub const NAMESPACE_FINALIZER: &str = "namespace";
pub const CHART_GROUP_FINALIZER: &str = "chartgroup";
pub const IMAGE_NAMESPACE_FINALIZER: &str = "imagenamespace";

pub const CHART_GROUP_LOCKED_REASON: &str = "ChartGroup has been locked.";
pub const IMAGE_NAMESPACE_LOCKED_REASON: &str = "ImageNamespace has been locked.";
