use std::fmt::Debug;

use chrono::{DateTime, Utc};
use garde::Validate;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::object::{business_object, phased};

/// A one-shot command moving a Namespace from the project this object lives
/// in to `destination`. The object deletes itself once the move finished.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema, Validate)]
#[kube(
    group = "business.kubeplane.io",
    version = "v1",
    kind = "NsEmigration",
    status = "NsEmigrationStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NsEmigrationSpec {
    /// Name of the Namespace object being moved.
    #[garde(length(min = 1))]
    pub namespace: String,
    #[garde(skip)]
    #[serde(default)]
    pub ns_show_name: String,
    /// Destination project.
    #[garde(length(min = 1))]
    pub destination: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NsEmigrationStatus {
    #[serde(default)]
    pub phase: NsEmigrationPhase,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Steps of a migration, in the only order they may be visited. `Failed`
/// can be entered from any step and is terminal.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, JsonSchema,
)]
pub enum NsEmigrationPhase {
    #[default]
    Pending,
    OldOneLocked,
    OldOneDetached,
    NewOneCreated,
    OldOneTerminating,
    Finished,
    Failed,
}

impl NsEmigrationPhase {
    /// The phase following `self` on the success path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::OldOneLocked),
            Self::OldOneLocked => Some(Self::OldOneDetached),
            Self::OldOneDetached => Some(Self::NewOneCreated),
            Self::NewOneCreated => Some(Self::OldOneTerminating),
            Self::OldOneTerminating => Some(Self::Finished),
            Self::Finished | Self::Failed => None,
        }
    }
}

business_object!(NsEmigration, NsEmigrationSpec, NsEmigrationStatus);
phased!(NsEmigration, NsEmigrationPhase);
