//! Namespaced object identity, the unit the controller is invoked with.

use std::fmt::{self, Display};

use kube::{Resource, ResourceExt};

/// Identifies a namespaced object by `namespace/name`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the key of `resource`, or [`None`] if it has no namespace or no name.
    pub fn from_resource<K: Resource>(resource: &K) -> Option<Self> {
        let meta = resource.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }

    /// Returns the key of a namespaced object whose namespace may need defaulting.
    ///
    /// Objects returned by `list` in a namespace do not always carry the namespace in their
    /// metadata when they come from an in-process source, so the listed namespace is used then.
    pub fn from_resource_in<K: Resource>(resource: &K, namespace: &str) -> Self {
        Self::new(
            resource.namespace().unwrap_or_else(|| namespace.to_owned()),
            resource.name_any(),
        )
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
