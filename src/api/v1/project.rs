use std::fmt::Debug;

use chrono::{DateTime, Utc};
use garde::Validate;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resources::{ClusterHard, ClusterUsed};
use crate::api::object::{business_object, finalizable, phased};

/// A tenant scoped container of namespaces, chart groups and image
/// namespaces. Projects nest through `parentProjectName`; a child's
/// capacity counts as usage of its parent.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema, Validate)]
#[kube(
    group = "business.kubeplane.io",
    version = "v1",
    kind = "Project",
    status = "ProjectStatus",
    shortname = "proj"
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    #[garde(length(min = 1))]
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    #[garde(skip)]
    #[serde(default)]
    pub display_name: String,
    #[garde(skip)]
    #[serde(default)]
    pub members: Vec<String>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_project_name: Option<String>,
    /// Capacity granted to this project per cluster.
    #[garde(skip)]
    #[serde(default)]
    pub clusters: ClusterHard,
    #[garde(skip)]
    #[serde(default)]
    pub finalizers: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    #[serde(default)]
    pub phase: ProjectPhase,
    /// Usage per cluster: namespaces plus child project capacity.
    #[serde(default)]
    pub clusters: ClusterUsed,
    /// Namespaces whose `hard` is already part of `clusters`.
    #[serde(default)]
    pub calculated_namespaces: Vec<String>,
    /// Child projects whose capacity is already part of `clusters`.
    #[serde(default)]
    pub calculated_child_projects: Vec<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ProjectPhase {
    #[default]
    Active,
    Terminating,
}

business_object!(Project, ProjectSpec, ProjectStatus, finalizers);
phased!(Project, ProjectPhase);
finalizable!(Project, ProjectPhase::Terminating);
