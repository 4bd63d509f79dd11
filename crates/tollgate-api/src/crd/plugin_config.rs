use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::PluginDeclaration;

/// A reusable set of plugins that routes can attach by name.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v2",
    kind = "ApisixPluginConfig",
    plural = "apisixpluginconfigs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApisixPluginConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(default)]
    pub plugins: Vec<PluginDeclaration>,
}
