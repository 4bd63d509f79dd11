//! The tollgate API: the gateway configuration model and the Kubernetes
//! resources it is translated from.
//!
//! The types in [resources] are the canonical, gateway-facing view of
//! configuration. They're what translation produces, what the cache stores,
//! and what gets pushed to a gateway. Everything in [crd] is the
//! Kubernetes-facing side: custom resources that are translated into
//! [resources] alongside Ingress and Gateway API objects.
//!
//! Every translated resource carries provenance [label]s naming the object it
//! came from, and a deterministic [id] derived from that object's identity.

mod error;
pub use error::{Error, ErrorContext, ErrorKind};

pub mod crd;
pub mod id;
pub mod label;
pub mod resources;
pub mod target;

mod shared;
pub use shared::Duration;

/// The namespace and name of a Kubernetes object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}
