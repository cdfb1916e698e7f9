use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Resource name (`cpu`, `requests.memory`, ...) to quantity.
pub type ResourceList = BTreeMap<String, Quantity>;

/// Capacity granted on one cluster.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HardQuantity {
    #[serde(default)]
    pub hard: ResourceList,
}

/// Capacity consumed on one cluster.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct UsedQuantity {
    #[serde(default)]
    pub used: ResourceList,
}

/// Cluster name to capacity.
pub type ClusterHard = BTreeMap<String, HardQuantity>;

/// Cluster name to usage.
pub type ClusterUsed = BTreeMap<String, UsedQuantity>;
