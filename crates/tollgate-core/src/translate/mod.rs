//! Translation from Kubernetes objects to gateway configuration.
//!
//! A [Translator] converts one source object at a time into a partial
//! [Resources] bundle. Translation is stateless: everything an object refers
//! to (Services, EndpointSlices, Secrets, plugin configs, upstream policy, the
//! GatewayProxy serving it) has already been fetched into a
//! [TranslateContext] before translation starts.
//!
//! Every resource in a translated bundle carries the provenance labels of the
//! object it came from and an ID derived from that object's identity, so
//! translating the same object twice produces identical output.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Secret, Service as KubeService};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::ResourceExt;
use tollgate_api::crd::{
    ApisixConsumer, ApisixGlobalRule, ApisixPluginConfig, ApisixRoute, ApisixTls, ApisixUpstream,
    Consumer, GatewayProxy,
};
use tollgate_api::id::{compose_name, gen_id};
use tollgate_api::label::{owner_labels, Labels};
use tollgate_api::resources::{Metadata, Resources};
use tollgate_api::NamespacedName;

use crate::config::{Config, CredentialDefaults};

pub mod annotations;
mod apisix_route;
mod backend;
mod consumer;
mod gateway;
mod global_rule;
mod grpc_route;
mod http_route;
mod ingress;
mod l4_route;
mod plugins;
mod priority;
mod tls;

pub use priority::{priority, MatchShape, PathKind};

use gateway_api::apis::experimental::gateways::Gateway;
use gateway_api::apis::experimental::grpcroutes::GRPCRoute;
use gateway_api::apis::experimental::httproutes::HTTPRoute;
use gateway_api::apis::experimental::tcproutes::TCPRoute;
use gateway_api::apis::experimental::udproutes::UDPRoute;

/// The label EndpointSlices use to name the Service they belong to.
const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Translate a single kind of source object.
pub trait Translate {
    fn translate(
        &self,
        translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, tollgate_api::Error>;
}

/// Any object that can be translated.
#[derive(Debug, Clone)]
pub enum SourceObject {
    Ingress(Ingress),
    IngressClass(IngressClass),
    Gateway(Gateway),
    HttpRoute(HTTPRoute),
    GrpcRoute(GRPCRoute),
    TcpRoute(TCPRoute),
    UdpRoute(UDPRoute),
    ApisixRoute(ApisixRoute),
    ApisixConsumer(ApisixConsumer),
    Consumer(Consumer),
    ApisixTls(ApisixTls),
    ApisixGlobalRule(ApisixGlobalRule),
}

macro_rules! source_objects {
    ($($variant:ident => $kind:expr,)*) => {
        impl SourceObject {
            /// The Kubernetes kind of this object.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(SourceObject::$variant(_) => $kind,)*
                }
            }

            /// The namespace of this object. Empty for cluster-scoped kinds.
            pub fn namespace(&self) -> String {
                match self {
                    $(SourceObject::$variant(o) => o.namespace().unwrap_or_default(),)*
                }
            }

            pub fn name(&self) -> String {
                match self {
                    $(SourceObject::$variant(o) => o.name_any(),)*
                }
            }

            fn as_translate(&self) -> &dyn Translate {
                match self {
                    $(SourceObject::$variant(o) => o,)*
                }
            }
        }

        $(
            impl From<$variant> for SourceObject {
                fn from(o: $variant) -> Self {
                    SourceObject::$variant(o)
                }
            }
        )*
    };
}

// the variant names double as type aliases so the macro can name both.
type HttpRoute = HTTPRoute;
type GrpcRoute = GRPCRoute;
type TcpRoute = TCPRoute;
type UdpRoute = UDPRoute;

source_objects! {
    Ingress => "Ingress",
    IngressClass => "IngressClass",
    Gateway => "Gateway",
    HttpRoute => "HTTPRoute",
    GrpcRoute => "GRPCRoute",
    TcpRoute => "TCPRoute",
    UdpRoute => "UDPRoute",
    ApisixRoute => "ApisixRoute",
    ApisixConsumer => "ApisixConsumer",
    Consumer => "Consumer",
    ApisixTls => "ApisixTls",
    ApisixGlobalRule => "ApisixGlobalRule",
}

impl std::fmt::Display for SourceObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = NamespacedName::new(self.namespace(), self.name());
        write!(f, "{}/{name}", self.kind())
    }
}

/// Converts source objects into gateway configuration.
#[derive(Debug, Clone)]
pub struct Translator {
    controller_name: String,
    annotation_prefix: String,
    credential_defaults: CredentialDefaults,
    annotations: Arc<annotations::Registry>,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Translator {
    pub fn new(config: &Config) -> Self {
        Self {
            controller_name: config.controller_name.clone(),
            annotation_prefix: config.annotation_prefix.clone(),
            credential_defaults: config.credential_defaults.clone(),
            annotations: annotations::Registry::shared(),
        }
    }

    /// Use a different set of annotation handlers.
    pub fn with_annotation_registry(mut self, registry: Arc<annotations::Registry>) -> Self {
        self.annotations = registry;
        self
    }

    /// Translate an object.
    pub fn translate(
        &self,
        obj: &SourceObject,
        ctx: &TranslateContext,
    ) -> crate::Result<Resources> {
        tracing::trace!(object = %obj, "translating");

        obj.as_translate()
            .translate(self, ctx)
            .map_err(|source| crate::Error::Translate {
                kind: obj.kind(),
                name: NamespacedName::new(obj.namespace(), obj.name()).to_string(),
                source,
            })
    }

    /// The provenance labels for resources translated from an object.
    pub fn owner_labels(&self, obj: &SourceObject) -> Labels {
        owner_labels(
            obj.kind(),
            &obj.namespace(),
            &obj.name(),
            &self.controller_name,
        )
    }

    pub(crate) fn labels_for(&self, kind: &str, namespace: &str, name: &str) -> Labels {
        owner_labels(kind, namespace, name, &self.controller_name)
    }

    pub(crate) fn credential_defaults(&self) -> &CredentialDefaults {
        &self.credential_defaults
    }

    pub(crate) fn annotations<'a>(
        &'a self,
        values: &'a BTreeMap<String, String>,
    ) -> annotations::Annotations<'a> {
        annotations::Annotations::new(&self.annotation_prefix, values)
    }

    pub(crate) fn annotation_registry(&self) -> &annotations::Registry {
        &self.annotations
    }
}

/// Everything a source object refers to, fetched ahead of translation.
///
/// Objects are looked up by namespace and name. EndpointSlices are grouped by
/// the Service they belong to.
#[derive(Debug, Clone, Default)]
pub struct TranslateContext {
    services: BTreeMap<NamespacedName, KubeService>,
    endpoint_slices: BTreeMap<NamespacedName, Vec<EndpointSlice>>,
    secrets: BTreeMap<NamespacedName, Secret>,
    plugin_configs: BTreeMap<NamespacedName, ApisixPluginConfig>,
    upstreams: BTreeMap<NamespacedName, ApisixUpstream>,
    gateway_proxy: Option<GatewayProxy>,
}

fn key_of<K: ResourceExt>(obj: &K) -> NamespacedName {
    NamespacedName::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

impl TranslateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: KubeService) -> Self {
        self.services.insert(key_of(&service), service);
        self
    }

    /// Add an EndpointSlice. Slices that don't name a Service are ignored.
    pub fn with_endpoint_slice(mut self, slice: EndpointSlice) -> Self {
        let Some(service) = slice.labels().get(SERVICE_NAME_LABEL).cloned() else {
            tracing::debug!(slice = %key_of(&slice), "ignoring EndpointSlice without a service");
            return self;
        };

        let key = NamespacedName::new(slice.namespace().unwrap_or_default(), service);
        self.endpoint_slices.entry(key).or_default().push(slice);
        self
    }

    pub fn with_secret(mut self, secret: Secret) -> Self {
        self.secrets.insert(key_of(&secret), secret);
        self
    }

    pub fn with_plugin_config(mut self, plugin_config: ApisixPluginConfig) -> Self {
        self.plugin_configs
            .insert(key_of(&plugin_config), plugin_config);
        self
    }

    pub fn with_upstream(mut self, upstream: ApisixUpstream) -> Self {
        self.upstreams.insert(key_of(&upstream), upstream);
        self
    }

    pub fn with_gateway_proxy(mut self, gateway_proxy: GatewayProxy) -> Self {
        self.gateway_proxy = Some(gateway_proxy);
        self
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<&KubeService> {
        self.services.get(&NamespacedName::new(namespace, name))
    }

    pub fn endpoint_slices(&self, namespace: &str, service: &str) -> &[EndpointSlice] {
        self.endpoint_slices
            .get(&NamespacedName::new(namespace, service))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<&Secret> {
        self.secrets.get(&NamespacedName::new(namespace, name))
    }

    /// Read a single key from a Secret as a UTF-8 string.
    ///
    /// Values in `stringData` take precedence over `data`, the same way the
    /// API server merges them.
    pub fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Option<String> {
        let secret = self.secret(namespace, name)?;
        if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
            return Some(value.clone());
        }
        let bytes = secret.data.as_ref()?.get(key)?;
        String::from_utf8(bytes.0.clone()).ok()
    }

    /// Every key in a Secret, decoded as UTF-8. Keys with values that aren't
    /// valid UTF-8 are skipped.
    pub fn secret_values(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        let secret = self.secret(namespace, name)?;
        let mut values = BTreeMap::new();
        for (key, bytes) in secret.data.iter().flatten() {
            if let Ok(value) = String::from_utf8(bytes.0.clone()) {
                values.insert(key.clone(), value);
            }
        }
        for (key, value) in secret.string_data.iter().flatten() {
            values.insert(key.clone(), value.clone());
        }
        Some(values)
    }

    pub fn plugin_config(&self, namespace: &str, name: &str) -> Option<&ApisixPluginConfig> {
        self.plugin_configs.get(&NamespacedName::new(namespace, name))
    }

    pub fn upstream(&self, namespace: &str, name: &str) -> Option<&ApisixUpstream> {
        self.upstreams.get(&NamespacedName::new(namespace, name))
    }

    pub fn gateway_proxy(&self) -> Option<&GatewayProxy> {
        self.gateway_proxy.as_ref()
    }
}

/// Deterministic names and IDs for the resources translated from a single
/// object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObjectNames<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
}

impl<'a> ObjectNames<'a> {
    pub(crate) fn new(namespace: &'a str, name: &'a str) -> Self {
        Self { namespace, name }
    }

    pub(crate) fn service(&self, rule: usize) -> String {
        compose_name([self.namespace, self.name, &rule.to_string()])
    }

    pub(crate) fn route(&self, rule: usize, route: usize) -> String {
        compose_name([
            self.namespace,
            self.name,
            &rule.to_string(),
            &route.to_string(),
        ])
    }

    pub(crate) fn upstream(&self, rule: usize, backend: usize) -> String {
        compose_name([
            self.namespace,
            self.name,
            &rule.to_string(),
            &backend.to_string(),
        ])
    }

    /// Metadata for a resource with a composed name.
    pub(crate) fn metadata(&self, name: String, labels: &Labels) -> Metadata {
        Metadata {
            id: gen_id(&name),
            name,
            desc: String::new(),
            labels: labels.clone(),
        }
    }
}
