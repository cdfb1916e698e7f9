use std::fmt::{self, Debug, Display};

use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};

/// Identifies an object inside its kind: `namespace/name`, or just `name`
/// for cluster scoped kinds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.meta().namespace.clone().filter(|ns| !ns.is_empty()),
            name: obj.meta().name.clone().unwrap_or_default(),
        }
    }

    /// Parses the `namespace/name` form produced by `Display`.
    pub fn parse(key: &str) -> Self {
        match key.split_once('/') {
            Some((ns, name)) if !ns.is_empty() => Self::namespaced(ns, name),
            Some((_, name)) => Self::cluster(name),
            None => Self::cluster(key),
        }
    }

    pub fn namespace_str(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Common surface of every kind the controllers reconcile.
pub trait BusinessObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Spec: Clone + Debug + PartialEq + Send + Sync;
    type Status: Clone + Debug + PartialEq + Default + Send + Sync;

    fn spec(&self) -> &Self::Spec;
    fn status(&self) -> Option<&Self::Status>;
    fn status_mut(&mut self) -> &mut Option<Self::Status>;

    /// Tokens in `spec.finalizers`; kinds without a finalize sub-resource have none.
    fn finalizers(&self) -> &[String] {
        &[]
    }

    fn kind_name() -> String {
        Self::kind(&()).to_string()
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::of(self)
    }

    fn is_deletion_requested(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    fn uid_str(&self) -> String {
        self.uid().unwrap_or_default()
    }
}

/// Kinds protected by `spec.finalizers` and driven through a Terminating phase.
pub trait Finalizable: BusinessObject {
    fn finalizers_mut(&mut self) -> &mut Vec<String>;
    fn is_terminating(&self) -> bool;
    fn mark_terminating(&mut self);

    fn is_finalized(&self) -> bool {
        self.finalizers().is_empty()
    }

    fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers().iter().any(|f| f == token)
    }
}

/// Kinds whose status carries a coarse reconciliation phase.
pub trait Phased: BusinessObject {
    type Phase: Copy + Debug + Default + PartialEq + Eq + Send + Sync;

    fn phase(&self) -> Self::Phase;

    /// Moves to `phase`, replacing reason and message. `last_transition_time`
    /// is stamped whenever the phase actually changes.
    fn set_phase(&mut self, phase: Self::Phase, reason: Option<String>, message: Option<String>);
}

/// Implements [`BusinessObject`] for a generated custom resource whose
/// status is `Option<$status>`. The `finalizers` form also wires
/// `spec.finalizers`.
macro_rules! business_object {
    ($kind:ty, $spec:ty, $status:ty) => {
        impl $crate::api::object::BusinessObject for $kind {
            type Spec = $spec;
            type Status = $status;

            fn spec(&self) -> &Self::Spec {
                &self.spec
            }

            fn status(&self) -> Option<&Self::Status> {
                self.status.as_ref()
            }

            fn status_mut(&mut self) -> &mut Option<Self::Status> {
                &mut self.status
            }
        }
    };
    ($kind:ty, $spec:ty, $status:ty, finalizers) => {
        impl $crate::api::object::BusinessObject for $kind {
            type Spec = $spec;
            type Status = $status;

            fn spec(&self) -> &Self::Spec {
                &self.spec
            }

            fn status(&self) -> Option<&Self::Status> {
                self.status.as_ref()
            }

            fn status_mut(&mut self) -> &mut Option<Self::Status> {
                &mut self.status
            }

            fn finalizers(&self) -> &[String] {
                &self.spec.finalizers
            }
        }
    };
}

/// Implements [`Phased`] for a kind whose status carries `phase`, `reason`,
/// `message` and `last_transition_time`.
macro_rules! phased {
    ($kind:ty, $phase:ty) => {
        impl $crate::api::object::Phased for $kind {
            type Phase = $phase;

            fn phase(&self) -> Self::Phase {
                self.status.as_ref().map(|s| s.phase).unwrap_or_default()
            }

            fn set_phase(
                &mut self,
                phase: Self::Phase,
                reason: Option<String>,
                message: Option<String>,
            ) {
                let status = self.status.get_or_insert_with(Default::default);
                if status.phase != phase || status.last_transition_time.is_none() {
                    status.last_transition_time = Some(chrono::Utc::now());
                }
                status.phase = phase;
                status.reason = reason;
                status.message = message;
            }
        }
    };
}

/// Implements [`Finalizable`] on top of [`Phased`], `$terminating` being the
/// kind's Terminating phase.
macro_rules! finalizable {
    ($kind:ty, $terminating:expr) => {
        impl $crate::api::object::Finalizable for $kind {
            fn finalizers_mut(&mut self) -> &mut Vec<String> {
                &mut self.spec.finalizers
            }

            fn is_terminating(&self) -> bool {
                $crate::api::object::Phased::phase(self) == $terminating
            }

            fn mark_terminating(&mut self) {
                $crate::api::object::Phased::set_phase(self, $terminating, None, None);
            }
        }
    };
}

pub(crate) use business_object;
pub(crate) use finalizable;
pub(crate) use phased;

#[cfg(test)]
mod tests {
    use super::ObjectKey;
    use rstest::rstest;

    #[rstest]
    #[case("proj1/ns1", ObjectKey::namespaced("proj1", "ns1"))]
    #[case("proj1", ObjectKey::cluster("proj1"))]
    #[case("/proj1", ObjectKey::cluster("proj1"))]
    fn parses_keys(#[case] raw: &str, #[case] expected: ObjectKey) {
        assert_eq!(ObjectKey::parse(raw), expected);
    }

    #[test]
    fn display_round_trips() {
        let key = ObjectKey::namespaced("proj1", "ns1");
        assert_eq!(key.to_string(), "proj1/ns1");
        assert_eq!(ObjectKey::parse(&key.to_string()), key);
    }
}
