use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resources::Plugins;
use crate::target::{BackendMode, TargetConfig};
use crate::{Error, ErrorContext};

/// The gateway a Gateway or IngressClass is served by: where its admin API
/// lives, how to authenticate to it, and the plugins that apply to all of its
/// traffic.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v1alpha1",
    kind = "GatewayProxy",
    plural = "gatewayproxies",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayProxySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<GatewayProxyProvider>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<GatewayProxyPlugin>,

    /// Plugin metadata, keyed by plugin name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugin_metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayProxyProvider {
    /// Only `ControlPlane` is supported.
    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlaneProvider>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneProvider {
    /// Either `apisix` or `apisix-standalone`. Defaults to `apisix`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub auth: ControlPlaneAuth,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneAuth {
    #[serde(rename = "type", default)]
    pub auth_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_key: Option<AdminKeyAuth>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminKeyAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<AdminKeyValueFrom>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminKeyValueFrom {
    pub secret_key_ref: SecretKeySelector,
}

/// A key in a Secret in the same namespace as the `GatewayProxy`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayProxyPlugin {
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub config: Option<Plugins>,
}

fn default_enabled() -> bool {
    true
}

impl GatewayProxySpec {
    /// Build the sync target this proxy describes.
    ///
    /// `lookup_secret` resolves a key in a Secret in the proxy's namespace, and
    /// is only called when the admin key is given by reference.
    pub fn target_config<F>(&self, name: &str, lookup_secret: F) -> Result<TargetConfig, Error>
    where
        F: Fn(&str, &str) -> Option<String>,
    {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::field_not_found("provider"))?;

        if provider.provider_type != "ControlPlane" {
            return Err(Error::new(format!(
                "unsupported provider type: {}",
                provider.provider_type
            )))
            .with_field("type")
            .with_field("provider");
        }

        let control_plane = provider
            .control_plane
            .as_ref()
            .ok_or_else(|| Error::field_not_found("controlPlane"))
            .with_field("provider")?;

        let backend_mode = match control_plane.mode.as_deref() {
            None | Some("") | Some("apisix") => BackendMode::Apisix,
            Some("apisix-standalone") => BackendMode::ApisixStandalone,
            Some(other) => {
                return Err(Error::new(format!("unknown mode: {other}")))
                    .with_field("mode")
                    .with_field("controlPlane")
                    .with_field("provider");
            }
        };

        if control_plane.endpoints.is_empty() {
            return Err(Error::new_static("no endpoints configured"))
                .with_field("endpoints")
                .with_field("controlPlane")
                .with_field("provider");
        }

        let token = match &control_plane.auth.admin_key {
            Some(AdminKeyAuth {
                value: Some(value), ..
            }) => value.clone(),
            Some(AdminKeyAuth {
                value_from: Some(from),
                ..
            }) => {
                let selector = &from.secret_key_ref;
                lookup_secret(&selector.name, &selector.key).ok_or_else(|| {
                    Error::missing_reference(format!(
                        "secret {}/{} not found",
                        selector.name, selector.key
                    ))
                })?
            }
            _ => String::new(),
        };

        Ok(TargetConfig {
            name: name.to_string(),
            server_addrs: control_plane.endpoints.clone(),
            token,
            tls_verify: control_plane.tls_verify.unwrap_or(true),
            backend_mode,
        })
    }
}
