//! Custom resources for configuring the gateway from Kubernetes.
//!
//! These are the `apisix.apache.org` resources that carry gateway-specific
//! configuration that Ingress and the Gateway API can't express: routes with
//! plugins, consumers, TLS with mTLS, upstream policy, shared plugin configs,
//! global rules, and the `GatewayProxy` that describes the gateway itself.

mod consumer;
mod gateway_proxy;
mod global_rule;
mod plugin_config;
mod route;
mod tls;
mod upstream;

pub use consumer::*;
pub use gateway_proxy::*;
pub use global_rule::*;
pub use plugin_config::*;
pub use route::*;
pub use tls::*;
pub use upstream::*;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resources::Plugins;

/// The API group of every resource in this module.
pub const GROUP: &str = "apisix.apache.org";

/// A reference to a Secret. When `namespace` is not set, the Secret is in the
/// same namespace as the referencing object.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A Service port, either by number or by name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(untagged)]
pub enum PortRef {
    Number(i32),
    Name(String),
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortRef::Number(n) => write!(f, "{n}"),
            PortRef::Name(name) => f.write_str(name),
        }
    }
}

/// How a backend Service is turned into upstream nodes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResolveGranularity {
    /// One node per ready endpoint of the Service.
    #[default]
    Endpoint,

    /// A single node at the Service's cluster IP.
    Service,
}

/// A plugin declared on a custom resource.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginDeclaration {
    pub name: String,

    #[serde(default = "default_enable")]
    pub enable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub config: Option<Plugins>,

    /// The name of a Secret in the same namespace whose data is merged into
    /// `config`, overriding keys with the same name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

fn default_enable() -> bool {
    true
}
