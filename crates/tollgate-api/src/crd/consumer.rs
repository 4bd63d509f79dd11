use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::SecretRef;
use crate::resources::Plugins;

/// A gateway consumer with exactly one kind of credential.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v2",
    kind = "ApisixConsumer",
    plural = "apisixconsumers",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApisixConsumerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    pub auth_parameter: ApisixConsumerAuthParameter,
}

/// The credential for an [ApisixConsumer]. Exactly one field should be set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApisixConsumerAuthParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<AuthParameter<BasicAuthValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_auth: Option<AuthParameter<KeyAuthValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "wolfRBAC")]
    pub wolf_rbac: Option<AuthParameter<WolfRbacValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_auth: Option<AuthParameter<JwtAuthValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_auth: Option<AuthParameter<HmacAuthValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldap_auth: Option<AuthParameter<LdapAuthValue>>,
}

/// A credential given either inline as `value` or as a reference to a Secret
/// in the consumer's namespace.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthParameter<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalSecretRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LocalSecretRef {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct BasicAuthValue {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct KeyAuthValue {
    pub key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct WolfRbacValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_prefix: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct JwtAuthValue {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_secret: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime_grace_period: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HmacAuthValue {
    #[serde(alias = "access_key")]
    pub key_id: String,

    pub secret_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_skew: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signed_headers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_headers: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encode_uri_params: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_request_body: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_req_body: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LdapAuthValue {
    pub user_dn: String,
}

/// A gateway consumer attached to a Gateway, with any number of credentials.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v1alpha1",
    kind = "Consumer",
    plural = "consumers",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<ConsumerGatewayRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<Credential>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<ConsumerPlugin>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerGatewayRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A single credential. The credential type is also the name of the auth
/// plugin it configures, like `key-auth` or `jwt-auth`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(rename = "type")]
    pub credential_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub config: Option<Plugins>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ConsumerPlugin {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub config: Option<Plugins>,
}
