use std::fmt::Debug;

use chrono::{DateTime, Utc};
use garde::Validate;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::registry::Visibility;
use crate::api::object::{business_object, finalizable, phased};

/// A group of Helm charts registered with the registry service on behalf of
/// a project.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema, Validate)]
#[kube(
    group = "business.kubeplane.io",
    version = "v1",
    kind = "ChartGroup",
    status = "ChartGroupStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ChartGroupSpec {
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
    #[serde(default, rename = "type")]
    pub type_: String,
    #[garde(skip)]
    #[serde(default)]
    pub projects: Vec<String>,
    #[garde(skip)]
    #[serde(default)]
    pub description: String,
    #[garde(skip)]
    #[serde(default)]
    pub finalizers: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartGroupStatus {
    #[serde(default)]
    pub phase: ChartGroupPhase,
    #[serde(default)]
    pub chart_count: i32,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ChartGroupPhase {
    #[default]
    Pending,
    Available,
    Locked,
    Failed,
    Terminating,
}

business_object!(ChartGroup, ChartGroupSpec, ChartGroupStatus, finalizers);
phased!(ChartGroup, ChartGroupPhase);
finalizable!(ChartGroup, ChartGroupPhase::Terminating);
