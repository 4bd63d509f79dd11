use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::PluginDeclaration;

/// Plugins that run for every request the gateway handles.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "apisix.apache.org",
    version = "v2",
    kind = "ApisixGlobalRule",
    plural = "apisixglobalrules",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApisixGlobalRuleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    #[serde(default)]
    pub plugins: Vec<PluginDeclaration>,
}
