use std::fmt::Debug;

use garde::Validate;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::object::business_object;

/// Grants platform administration of a tenant to a set of users. The
/// binding is pushed one way into the tenant's identity provider.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema, Validate)]
#[kube(
    group = "business.kubeplane.io",
    version = "v1",
    kind = "Platform",
    status = "PlatformStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    #[garde(length(min = 1))]
    #[serde(rename = "tenantID")]
    pub tenant_id: String,
    #[garde(skip)]
    #[serde(default)]
    pub name: String,
    #[garde(skip)]
    #[serde(default)]
    pub administrators: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Administrators last written to the identity provider.
    #[serde(default)]
    pub administrators: Vec<String>,
}

business_object!(Platform, PlatformSpec, PlatformStatus);
