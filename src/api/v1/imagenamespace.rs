use std::fmt::Debug;

use chrono::{DateTime, Utc};
use garde::Validate;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::registry::Visibility;
use crate::api::object::{business_object, finalizable, phased};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema, Validate)]
#[kube(
    group = "business.kubeplane.io",
    version = "v1",
    kind = "ImageNamespace",
    status = "ImageNamespaceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ImageNamespaceSpec {
    #[garde(length(min = 1))]
    pub name: String,
    #[garde(length(min = 1))]
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    #[garde(skip)]
    #[serde(default)]
    pub display_name: String,
    #[garde(skip)]
    #[serde(default)]
    pub visibility: Visibility,
    #[garde(skip)]
    #[serde(default)]
    pub finalizers: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageNamespaceStatus {
    #[serde(default)]
    pub phase: ImageNamespacePhase,
    #[serde(default)]
    pub repo_count: i32,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ImageNamespacePhase {
    #[default]
    Pending,
    Available,
    Locked,
    Failed,
    Terminating,
}

business_object!(ImageNamespace, ImageNamespaceSpec, ImageNamespaceStatus, finalizers);
phased!(ImageNamespace, ImageNamespacePhase);
finalizable!(ImageNamespace, ImageNamespacePhase::Terminating);
