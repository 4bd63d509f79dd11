use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::UpstreamTimeout;

/// Upstream policy for a Service.
///
/// An `ApisixUpstream` applies to the Service with the same namespace and name.
/// Every upstream generated for that Service, from any route, picks up its
/// settings.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v2",
    kind = "ApisixUpstream",
    plural = "apisixupstreams",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApisixUpstreamSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loadbalancer: Option<LoadBalancer>,

    /// One of `http`, `https`, `grpc`, or `grpcs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<UpstreamTimeout>,

    /// One of `pass`, `node`, or `rewrite`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_host: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    /// One of `roundrobin`, `chash`, `ewma`, or `least_conn`.
    #[serde(rename = "type")]
    pub lb_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_on: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}
