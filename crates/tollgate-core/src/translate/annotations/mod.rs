//! Ingress annotations.
//!
//! Annotations are the only way to configure gateway features on an Ingress.
//! Most of them turn into a plugin. Each plugin is built by a [Handler], and a
//! [Registry] runs every handler in order over an object's annotations. The
//! rest (regex paths, websockets, upstream settings) are read directly with
//! the accessors on [Annotations].

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tollgate_api::resources::Plugins;
use tollgate_api::{Duration, Error};

mod handlers;
mod upstream;

pub use handlers::{
    AuthType, Cors, Csrf, ForwardAuth, IpRestriction, ProxyRewrite, Redirect, ResponseRewrite,
};
pub use upstream::UpstreamAnnotations;

/// The default prefix of every annotation.
pub const DEFAULT_PREFIX: &str = "k8s.apisix.apache.org/";

pub const USE_REGEX: &str = "use-regex";
pub const ENABLE_WEBSOCKET: &str = "enable-websocket";
pub const PLUGIN_CONFIG_NAME: &str = "plugin-config-name";

/// A view of an object's annotations that only sees keys with a prefix.
#[derive(Debug, Clone, Copy)]
pub struct Annotations<'a> {
    prefix: &'a str,
    values: &'a BTreeMap<String, String>,
}

impl<'a> Annotations<'a> {
    pub fn new(prefix: &'a str, values: &'a BTreeMap<String, String>) -> Self {
        Self { prefix, values }
    }

    /// Get the value of an annotation by its name without the prefix.
    /// Empty values are treated as missing.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.values
            .iter()
            .find(|(k, _)| k.strip_prefix(self.prefix) == Some(name))
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Returns `true` if an annotation is set to `"true"`.
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name) == Some("true")
    }

    /// Parse a comma separated list, ignoring empty items.
    pub fn get_list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_int(&self, name: &str) -> Result<Option<i64>, Error> {
        self.get(name)
            .map(|v| {
                v.parse()
                    .map_err(|_| Error::new(format!("{name}: invalid integer {v:?}")))
            })
            .transpose()
    }

    pub fn get_duration(&self, name: &str) -> Result<Option<Duration>, Error> {
        self.get(name)
            .map(|v| {
                v.parse()
                    .map_err(|e| Error::new(format!("{name}: {e}")))
            })
            .transpose()
    }
}

/// Builds a plugin from annotations.
pub trait Handler: Send + Sync {
    /// The name of the plugin this handler builds, for logging.
    fn name(&self) -> &'static str;

    /// Add this handler's plugin to `plugins` if its annotations are set.
    fn handle(&self, annotations: &Annotations, plugins: &mut Plugins) -> Result<(), Error>;
}

/// An ordered set of annotation handlers.
pub struct Registry {
    handlers: Vec<Box<dyn Handler>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("Registry").field("handlers", &names).finish()
    }
}

static DEFAULT_REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| {
    Arc::new(Registry::new(vec![
        Box::new(Cors),
        Box::new(IpRestriction),
        Box::new(ProxyRewrite),
        Box::new(Redirect),
        Box::new(Csrf),
        Box::new(ForwardAuth),
        Box::new(ResponseRewrite),
        Box::new(AuthType),
    ]))
});

impl Registry {
    pub fn new(handlers: Vec<Box<dyn Handler>>) -> Self {
        Self { handlers }
    }

    /// The registry with every built-in handler.
    pub fn shared() -> Arc<Registry> {
        DEFAULT_REGISTRY.clone()
    }

    /// Run every handler. A handler that fails is logged and skipped; the
    /// rest still run.
    pub fn plugins(&self, annotations: &Annotations) -> Plugins {
        let mut plugins = Plugins::new();
        for handler in &self.handlers {
            if let Err(e) = handler.handle(annotations, &mut plugins) {
                tracing::warn!(handler = handler.name(), error = %e, "ignoring invalid annotation");
            }
        }
        plugins
    }
}
