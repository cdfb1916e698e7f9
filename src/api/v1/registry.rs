use std::fmt::Debug;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::object::business_object;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Visibility {
    #[default]
    Private,
    Public,
    Project,
}

// The two kinds below are served by the registry service, not by this
// control plane. They are declared so the registry client can address them.

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "registry.kubeplane.io",
    version = "v1",
    kind = "RegistryChartGroup",
    status = "RegistryChartGroupStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RegistryChartGroupSpec {
    pub name: String,
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryChartGroupStatus {
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub chart_count: i32,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "registry.kubeplane.io",
    version = "v1",
    kind = "RegistryNamespace",
    status = "RegistryNamespaceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RegistryNamespaceSpec {
    pub name: String,
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryNamespaceStatus {
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub repo_count: i32,
}

impl RegistryChartGroup {
    pub fn is_locked(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.locked)
    }
}

impl RegistryNamespace {
    pub fn is_locked(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.locked)
    }
}

business_object!(RegistryChartGroup, RegistryChartGroupSpec, RegistryChartGroupStatus);
business_object!(RegistryNamespace, RegistryNamespaceSpec, RegistryNamespaceStatus);
