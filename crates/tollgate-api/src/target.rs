//! Sync targets: the gateway deployments configuration is pushed to.

use serde::{Deserialize, Serialize};

/// How a target gateway is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendMode {
    /// A gateway backed by its admin API. Pushes are label-scoped: only the
    /// resources matching a label selector are replaced.
    #[default]
    #[serde(rename = "apisix")]
    Apisix,

    /// A gateway running from a standalone config. Every push carries the
    /// full configuration for the target.
    #[serde(rename = "apisix-standalone")]
    ApisixStandalone,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Apisix => "apisix",
            BackendMode::ApisixStandalone => "apisix-standalone",
        }
    }
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named group of gateway servers that receive the same configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,

    pub server_addrs: Vec<String>,

    #[serde(default)]
    pub token: String,

    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    #[serde(default)]
    pub backend_mode: BackendMode,
}

fn default_tls_verify() -> bool {
    true
}

// don't leak tokens into logs.
impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = if self.token.is_empty() {
            ""
        } else {
            "<redacted>"
        };

        f.debug_struct("TargetConfig")
            .field("name", &self.name)
            .field("server_addrs", &self.server_addrs)
            .field("token", &token)
            .field("tls_verify", &self.tls_verify)
            .field("backend_mode", &self.backend_mode)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let config = TargetConfig {
            name: "default/proxy".to_string(),
            server_addrs: vec!["http://10.0.0.1:9180".to_string()],
            token: "edd1c9f034335f136f87ad84b625c8f1".to_string(),
            tls_verify: true,
            backend_mode: BackendMode::Apisix,
        };

        let debug = format!("{config:?}");
        assert!(!debug.contains("edd1c9f0"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_backend_mode_json() {
        let mode: BackendMode = serde_json::from_str("\"apisix-standalone\"").unwrap();
        assert_eq!(mode, BackendMode::ApisixStandalone);
        assert_eq!(mode.to_string(), "apisix-standalone");
    }
}
