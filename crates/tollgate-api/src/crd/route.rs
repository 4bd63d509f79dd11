use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{PluginDeclaration, PortRef, ResolveGranularity};
use crate::shared::Duration;

/// Routing configuration for HTTP and L4 traffic, with per-route plugins.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v2",
    kind = "ApisixRoute",
    plural = "apisixroutes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<ApisixRouteHttp>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stream: Vec<ApisixRouteStream>,
}

/// A single HTTP rule.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteHttp {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<UpstreamTimeout>,

    #[serde(rename = "match", default)]
    pub route_match: ApisixRouteHttpMatch,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<ApisixRouteBackend>,

    #[serde(default)]
    pub websocket: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_config_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_config_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginDeclaration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<ApisixRouteAuthentication>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteHttpMatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_addrs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exprs: Vec<ApisixRouteHttpMatchExpr>,
}

/// A match expression on some part of a request.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteHttpMatchExpr {
    pub subject: ApisixRouteHttpMatchExprSubject,

    /// One of `Equal`, `NotEqual`, `GreaterThan`, `LessThan`, `In`, `NotIn`,
    /// `RegexMatch`, `RegexNotMatch`, `RegexMatchCaseInsensitive`, or
    /// `RegexNotMatchCaseInsensitive`.
    pub op: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteHttpMatchExprSubject {
    /// One of `Header`, `Query`, `Cookie`, `Path`, or `Variable`.
    pub scope: String,

    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteBackend {
    pub service_name: String,

    pub service_port: PortRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_granularity: Option<ResolveGranularity>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTimeout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Duration>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteAuthentication {
    pub enable: bool,

    /// One of `basicAuth`, `keyAuth`, `jwtAuth`, `hmacAuth`, `wolfRBAC`, or
    /// `ldapAuth`.
    #[serde(rename = "type")]
    pub auth_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_auth: Option<ApisixRouteAuthenticationKeyAuth>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteAuthenticationKeyAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

/// A single L4 rule.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteStream {
    pub name: String,

    /// Either `TCP` or `UDP`.
    pub protocol: String,

    #[serde(rename = "match")]
    pub stream_match: ApisixRouteStreamMatch,

    pub backend: ApisixRouteStreamBackend,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginDeclaration>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteStreamMatch {
    pub ingress_port: i32,

    /// An SNI to match on. Only meaningful for TLS-over-TCP traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixRouteStreamBackend {
    pub service_name: String,

    pub service_port: PortRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_granularity: Option<ResolveGranularity>,
}
