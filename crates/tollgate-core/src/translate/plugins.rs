//! Plugin composition.
//!
//! Routes collect plugins from three places, applied in order so that later
//! sources overwrite earlier ones plugin by plugin:
//!
//! 1. shared plugin configs attached to the route
//! 2. plugins declared inline on the route
//! 3. annotations
//!
//! [Composer] keeps the order straight.

use serde_json::Value;
use tollgate_api::crd::PluginDeclaration;
use tollgate_api::resources::Plugins;
use tollgate_api::{Error, ErrorContext};

use super::TranslateContext;

/// Builds the plugin set of a single route.
#[derive(Debug, Default)]
pub(crate) struct Composer {
    shared: Plugins,
    inline: Plugins,
    annotations: Plugins,
}

impl Composer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn shared(&mut self, plugins: Plugins) -> &mut Self {
        self.shared.extend(plugins);
        self
    }

    pub(crate) fn inline(&mut self, plugins: Plugins) -> &mut Self {
        self.inline.extend(plugins);
        self
    }

    pub(crate) fn annotations(&mut self, plugins: Plugins) -> &mut Self {
        self.annotations.extend(plugins);
        self
    }

    pub(crate) fn build(self) -> Plugins {
        let mut plugins = self.shared;
        plugins.extend(self.inline);
        plugins.extend(self.annotations);
        plugins
    }
}

/// The plugins of an `ApisixPluginConfig`.
pub(crate) fn plugin_config(
    ctx: &TranslateContext,
    namespace: &str,
    name: &str,
) -> Result<Plugins, Error> {
    let plugin_config = ctx.plugin_config(namespace, name).ok_or_else(|| {
        Error::missing_reference(format!("ApisixPluginConfig {namespace}/{name} not found"))
    })?;

    declared(ctx, namespace, &plugin_config.spec.plugins)
}

/// Turn a list of plugin declarations into plugins.
///
/// Disabled plugins are dropped. A plugin with a `secretRef` has every key of
/// that Secret merged into its config, overwriting keys with the same name.
pub(crate) fn declared(
    ctx: &TranslateContext,
    namespace: &str,
    declarations: &[PluginDeclaration],
) -> Result<Plugins, Error> {
    let mut plugins = Plugins::new();

    for (i, declaration) in declarations.iter().enumerate() {
        if !declaration.enable {
            continue;
        }

        let mut config = declaration.config.clone().unwrap_or_default();
        if let Some(secret) = &declaration.secret_ref {
            let values = ctx
                .secret_values(namespace, secret)
                .ok_or_else(|| {
                    Error::missing_reference(format!("secret {namespace}/{secret} not found"))
                })
                .with_field("secretRef")
                .with_index(i)?;

            for (key, value) in values {
                config.insert(key, Value::String(value));
            }
        }

        plugins.insert(declaration.name.clone(), Value::Object(config));
    }

    Ok(plugins)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::translate::test::from_yaml;
    use serde_json::json;
    use tollgate_api::crd::ApisixPluginConfig;

    #[test]
    fn test_composition_order() {
        let plugin = |name: &str, value: i64| {
            let mut p = Plugins::new();
            p.insert(name.to_string(), json!({ "value": value }));
            p
        };

        let mut composer = Composer::new();
        composer
            .annotations(plugin("cors", 3))
            .inline(plugin("cors", 2))
            .inline(plugin("limit-count", 2))
            .shared(plugin("cors", 1))
            .shared(plugin("echo", 1));

        let plugins = composer.build();
        assert_eq!(plugins["cors"], json!({"value": 3}));
        assert_eq!(plugins["limit-count"], json!({"value": 2}));
        assert_eq!(plugins["echo"], json!({"value": 1}));

        // shared plugins come first, then inline, then annotations.
        let names: Vec<_> = plugins.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["cors", "echo", "limit-count"]);
    }

    #[test]
    fn test_plugin_config_with_secret() {
        let auth_config: ApisixPluginConfig = from_yaml(
            r#"
apiVersion: apisix.apache.org/v2
kind: ApisixPluginConfig
metadata:
  name: auth
  namespace: default
spec:
  plugins:
    - name: echo
      enable: false
      config:
        body: hello
    - name: wolf-rbac
      config:
        appid: "1"
        server: http://old
      secretRef: wolf
"#,
        );
        let secret = from_yaml(
            r#"
apiVersion: v1
kind: Secret
metadata:
  name: wolf
  namespace: default
stringData:
  server: http://wolf:12180
"#,
        );
        let ctx = TranslateContext::new()
            .with_plugin_config(auth_config)
            .with_secret(secret);

        let plugins = plugin_config(&ctx, "default", "auth").unwrap();
        assert!(!plugins.contains_key("echo"));
        assert_eq!(
            plugins["wolf-rbac"],
            json!({"appid": "1", "server": "http://wolf:12180"})
        );

        let err = plugin_config(&ctx, "default", "nope").unwrap_err();
        assert_eq!(err.message(), "ApisixPluginConfig default/nope not found");
    }

    #[test]
    fn test_missing_secret() {
        let declarations: Vec<PluginDeclaration> = serde_json::from_value(json!([
            {"name": "echo"},
            {"name": "wolf-rbac", "secretRef": "nope"},
        ]))
        .unwrap();

        let err = declared(&TranslateContext::new(), "default", &declarations).unwrap_err();
        assert_eq!(err.path(), "[1].secretRef");
    }
}
