use std::fmt::Debug;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identity provider of one tenant, served by the auth service. The object
/// name is the tenant id.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(group = "auth.kubeplane.io", version = "v1", kind = "IdentityProvider")]
#[serde(rename_all = "camelCase")]
pub struct IdentityProviderSpec {
    #[serde(default, rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub administrators: Vec<String>,
}
