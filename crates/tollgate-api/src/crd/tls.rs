use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::SecretRef;

/// A TLS certificate served for a set of hosts, with optional client
/// certificate verification.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v2",
    kind = "ApisixTls",
    plural = "apisixtlses",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApisixTlsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    pub hosts: Vec<String>,

    /// The Secret holding the certificate and key, as `tls.crt` and `tls.key`.
    pub secret: SecretRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ApisixMutualTlsClientConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixMutualTlsClientConfig {
    /// The Secret holding the CA certificate as `ca.crt`.
    pub ca_secret: SecretRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_mtls_uri_regex: Vec<String>,
}
