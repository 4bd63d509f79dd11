//! Static configuration for translation and sync.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tollgate_api::Duration;

use crate::{Error, Result};

/// Top-level configuration.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// The controller name written into the provenance labels of every
    /// translated resource.
    pub controller_name: String,

    /// The prefix of every annotation the Ingress translator understands.
    pub annotation_prefix: String,

    pub credential_defaults: CredentialDefaults,

    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller_name: "apisix.apache.org/apisix-ingress-controller".to_string(),
            annotation_prefix: crate::translate::annotations::DEFAULT_PREFIX.to_string(),
            credential_defaults: CredentialDefaults::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Parse a config from a YAML document.
    pub fn from_yaml(s: &str) -> Result<Self> {
        serde_yml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&contents)
    }
}

/// Values filled into consumer credentials when the source leaves them
/// out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CredentialDefaults {
    pub hmac_max_req_body: i64,
    pub hmac_clock_skew: i64,
    pub hmac_algorithm: String,
    pub jwt_exp: i64,
    pub jwt_algorithm: String,
    pub jwt_lifetime_grace_period: i64,
}

impl Default for CredentialDefaults {
    fn default() -> Self {
        Self {
            hmac_max_req_body: 524288,
            hmac_clock_skew: 0,
            hmac_algorithm: "hmac-sha256".to_string(),
            jwt_exp: 86400,
            jwt_algorithm: "HS256".to_string(),
            jwt_lifetime_grace_period: 0,
        }
    }
}

/// How configuration is delivered to gateways.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Run the sync binary locally, once per server.
    #[default]
    Process,

    /// Hand tasks to a remote sync service over HTTP.
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SyncConfig {
    pub mode: SyncMode,

    /// The sync binary. Only used in [SyncMode::Process].
    pub binary_path: PathBuf,

    /// The base URL of the sync service. Only used in [SyncMode::Http].
    pub endpoint: String,

    /// The ceiling on a single attempt to sync one server.
    pub timeout: Duration,

    /// Experimental feature flags passed through to the sync tooling.
    pub feature_flags: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            binary_path: PathBuf::from("adc"),
            endpoint: "http://127.0.0.1:3000".to_string(),
            timeout: Duration::from_secs(15),
            feature_flags: vec![],
        }
    }
}
