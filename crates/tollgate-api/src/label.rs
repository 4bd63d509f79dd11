//! Provenance labels.
//!
//! Labels record which Kubernetes object a gateway resource was translated
//! from. They are the only thing used to select resources for label-scoped
//! list and delete, both in the local cache and on the gateway itself.

use std::collections::BTreeMap;

/// Resource labels. Kept sorted so that serialized output is stable.
pub type Labels = BTreeMap<String, String>;

pub const LABEL_KIND: &str = "k8s/kind";
pub const LABEL_NAMESPACE: &str = "k8s/namespace";
pub const LABEL_NAME: &str = "k8s/name";
pub const LABEL_CONTROLLER: &str = "k8s/controller-name";

/// Build the provenance labels for an object.
pub fn owner_labels(kind: &str, namespace: &str, name: &str, controller: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(LABEL_KIND.to_string(), kind.to_string());
    if !namespace.is_empty() {
        labels.insert(LABEL_NAMESPACE.to_string(), namespace.to_string());
    }
    labels.insert(LABEL_NAME.to_string(), name.to_string());
    if !controller.is_empty() {
        labels.insert(LABEL_CONTROLLER.to_string(), controller.to_string());
    }
    labels
}

/// The identity of the object that owns a set of gateway resources.
///
/// Any field may be missing. A missing field matches anything when an
/// `OwnerKey` is used as a selector, which allows listing every resource
/// owned by a kind or by a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerKey {
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

impl OwnerKey {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            kind: non_empty(kind),
            namespace: non_empty(namespace),
            name: non_empty(name),
        }
    }

    /// Read an owner key from a set of provenance labels.
    pub fn from_labels(labels: &Labels) -> Self {
        Self {
            kind: labels.get(LABEL_KIND).cloned(),
            namespace: labels.get(LABEL_NAMESPACE).cloned(),
            name: labels.get(LABEL_NAME).cloned(),
        }
    }

    /// Returns `true` if every field of this key is set.
    pub fn is_complete(&self) -> bool {
        self.kind.is_some() && self.namespace.is_some() && self.name.is_some()
    }

    /// Returns `true` if this key, used as a selector, selects `other`.
    pub fn selects(&self, other: &OwnerKey) -> bool {
        fn field_matches(selector: &Option<String>, value: &Option<String>) -> bool {
            match selector {
                Some(s) => value.as_ref() == Some(s),
                None => true,
            }
        }

        field_matches(&self.kind, &other.kind)
            && field_matches(&self.namespace, &other.namespace)
            && field_matches(&self.name, &other.name)
    }
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = self.kind.as_deref().unwrap_or("*");
        let name = self.name.as_deref().unwrap_or("*");
        match &self.namespace {
            Some(namespace) => write!(f, "{kind}/{namespace}/{name}"),
            None => write!(f, "{kind}/{name}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_owner_labels_roundtrip() {
        let labels = owner_labels("HTTPRoute", "default", "foo", "tollgate");
        assert_eq!(labels.len(), 4);

        let key = OwnerKey::from_labels(&labels);
        assert_eq!(key, OwnerKey::new("HTTPRoute", "default", "foo"));
        assert!(key.is_complete());
        assert_eq!(key.to_string(), "HTTPRoute/default/foo");
    }

    #[test]
    fn test_cluster_scoped_labels() {
        let labels = owner_labels("IngressClass", "", "apisix", "tollgate");
        assert!(!labels.contains_key(LABEL_NAMESPACE));
        assert_eq!(OwnerKey::from_labels(&labels).to_string(), "IngressClass/apisix");
    }

    #[test]
    fn test_partial_selector() {
        let foo = OwnerKey::new("HTTPRoute", "default", "foo");
        let bar = OwnerKey::new("Ingress", "default", "bar");

        let by_ns = OwnerKey {
            namespace: Some("default".to_string()),
            ..Default::default()
        };
        assert!(by_ns.selects(&foo));
        assert!(by_ns.selects(&bar));

        let by_kind = OwnerKey {
            kind: Some("HTTPRoute".to_string()),
            ..Default::default()
        };
        assert!(by_kind.selects(&foo));
        assert!(!by_kind.selects(&bar));

        assert!(OwnerKey::default().selects(&foo));
    }
}
