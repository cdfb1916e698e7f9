use std::fmt::Debug;

use chrono::{DateTime, Utc};
use garde::Validate;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resources::{ClusterHard, HardQuantity, ResourceList};
use crate::api::object::{business_object, finalizable, phased};

/// Binds a namespace inside one managed cluster to the project this object
/// lives in (`metadata.namespace` is the project name).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema, Validate)]
#[kube(
    group = "business.kubeplane.io",
    version = "v1",
    kind = "Namespace",
    status = "NamespaceStatus",
    shortname = "bns",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSpec {
    #[garde(length(min = 1))]
    pub cluster_name: String,
    /// Name of the namespace on the managed cluster.
    #[garde(length(min = 1, max = 63))]
    pub namespace: String,
    #[garde(skip)]
    #[serde(rename = "tenantID", default)]
    pub tenant_id: String,
    #[garde(skip)]
    #[serde(default)]
    pub hard: ResourceList,
    #[garde(skip)]
    #[serde(default)]
    pub finalizers: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStatus {
    #[serde(default)]
    pub phase: NamespacePhase,
    /// Quota usage observed on the managed cluster.
    #[serde(default)]
    pub used: ResourceList,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum NamespacePhase {
    #[default]
    Pending,
    Available,
    Locked,
    Failed,
    Terminating,
}

business_object!(Namespace, NamespaceSpec, NamespaceStatus, finalizers);
phased!(Namespace, NamespacePhase);
finalizable!(Namespace, NamespacePhase::Terminating);

impl Namespace {
    /// Name of the project owning this namespace.
    pub fn project_name(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("")
    }

    /// `spec.hard` keyed by the bound cluster, the shape project usage is
    /// accounted in.
    pub fn cluster_hard(&self) -> ClusterHard {
        ClusterHard::from([(
            self.spec.cluster_name.clone(),
            HardQuantity {
                hard: self.spec.hard.clone(),
            },
        )])
    }
}
