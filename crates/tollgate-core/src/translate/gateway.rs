//! Gateway translation.
//!
//! A Gateway (or an IngressClass) never produces routes. It contributes the
//! global plugins and plugin metadata of the GatewayProxy that configures it
//! and, for a Gateway, the certificates its TLS listeners serve.

use gateway_api::apis::experimental::gateways::{Gateway, GatewayListeners};
use k8s_openapi::api::networking::v1::IngressClass;
use kube::ResourceExt;
use serde_json::Value;
use tollgate_api::label::Labels;
use tollgate_api::resources::Resources;
use tollgate_api::{Error, ErrorContext};

use super::tls::{key_pair, ssls};
use super::{Translate, TranslateContext, Translator};

/// The global rules and plugin metadata of the GatewayProxy in `ctx`.
/// Disabled plugins are left out.
pub(crate) fn proxy_plugins(ctx: &TranslateContext) -> Resources {
    let mut resources = Resources::default();
    let Some(proxy) = ctx.gateway_proxy() else {
        return resources;
    };

    for plugin in proxy.spec.plugins.iter().filter(|p| p.enabled) {
        let config = plugin.config.clone().unwrap_or_default();
        resources
            .global_rules
            .insert(plugin.name.clone(), Value::Object(config));
    }

    for (name, config) in &proxy.spec.plugin_metadata {
        resources
            .plugin_metadata
            .insert(name.clone(), config.clone());
    }

    resources
}

impl Translate for Gateway {
    fn translate(
        &self,
        translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();
        let labels = translator.labels_for("Gateway", &namespace, &name);

        let mut resources = proxy_plugins(ctx);
        for (i, listener) in self.spec.listeners.iter().enumerate() {
            listener_ssls(ctx, &namespace, &name, &labels, listener, &mut resources)
                .with_index(i)
                .with_fields("spec", "listeners")?;
        }

        Ok(resources)
    }
}

fn listener_ssls(
    ctx: &TranslateContext,
    namespace: &str,
    name: &str,
    labels: &Labels,
    listener: &GatewayListeners,
    resources: &mut Resources,
) -> Result<(), Error> {
    let Some(tls) = &listener.tls else {
        return Ok(());
    };
    let Some(hostname) = &listener.hostname else {
        tracing::warn!(
            %namespace,
            %name,
            listener = %listener.name,
            "ignoring TLS listener without a hostname"
        );
        return Ok(());
    };

    for (j, cert) in tls.certificate_refs.iter().flatten().enumerate() {
        let group = cert.group.as_deref().unwrap_or_default();
        let kind = cert.kind.as_deref().unwrap_or("Secret");
        if !group.is_empty() || kind != "Secret" {
            tracing::warn!(%namespace, %name, %group, %kind, "ignoring certificateRef that isn't a Secret");
            continue;
        }

        let secret_namespace = cert.namespace.as_deref().unwrap_or(namespace);
        let pair = key_pair(ctx, secret_namespace, &cert.name)
            .with_index(j)
            .with_fields("tls", "certificateRefs")?;

        for ssl in ssls(namespace, name, labels, std::slice::from_ref(hostname), &pair, None) {
            resources.push_ssl(ssl);
        }
    }

    Ok(())
}

impl Translate for IngressClass {
    fn translate(
        &self,
        _translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        Ok(proxy_plugins(ctx))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::translate::test::from_yaml;
    use serde_json::json;
    use tollgate_api::crd::GatewayProxy;

    fn proxy() -> GatewayProxy {
        from_yaml(
            r#"
apiVersion: apisix.apache.org/v1alpha1
kind: GatewayProxy
metadata:
  name: proxy
  namespace: default
spec:
  plugins:
    - name: prometheus
      config:
        prefer_name: true
    - name: echo
      enabled: false
  pluginMetadata:
    http-logger:
      log_format:
        host: $host
"#,
        )
    }

    fn secret(name: &str, cert: &str) -> k8s_openapi::api::core::v1::Secret {
        from_yaml(&format!(
            r#"
apiVersion: v1
kind: Secret
metadata:
  name: {name}
  namespace: default
stringData:
  tls.crt: {cert}
  tls.key: KEY
"#
        ))
    }

    const GATEWAY: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gateway
  namespace: default
spec:
  gatewayClassName: tollgate
  listeners:
    - name: http
      port: 80
      protocol: HTTP
    - name: foo
      hostname: foo.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs:
          - name: shared
    - name: bar
      hostname: bar.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs:
          - name: shared
    - name: baz
      hostname: baz.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs:
          - name: baz
"#;

    #[test]
    fn test_gateway() {
        let ctx = TranslateContext::new()
            .with_gateway_proxy(proxy())
            .with_secret(secret("shared", "SHARED"))
            .with_secret(secret("baz", "BAZ"));
        let gateway: Gateway = from_yaml(GATEWAY);

        let resources = gateway.translate(&Translator::default(), &ctx).unwrap();
        assert!(resources.services.is_empty());

        assert_eq!(
            resources.global_rules,
            json!({"prometheus": {"prefer_name": true}})
                .as_object()
                .cloned()
                .unwrap()
        );
        assert_eq!(
            resources.plugin_metadata["http-logger"],
            json!({"log_format": {"host": "$host"}})
        );

        // listeners sharing a certificate share an SSL
        let snis: Vec<_> = resources.ssls.iter().map(|s| s.snis.clone()).collect();
        assert_eq!(
            snis,
            vec![
                vec!["bar.example.com".to_string(), "foo.example.com".to_string()],
                vec!["baz.example.com".to_string()],
            ]
        );
    }

    #[test]
    fn test_missing_certificate() {
        let gateway: Gateway = from_yaml(GATEWAY);
        let ctx = TranslateContext::new().with_secret(secret("shared", "SHARED"));

        let err = gateway.translate(&Translator::default(), &ctx).unwrap_err();
        assert_eq!(err.path(), "spec.listeners[3].tls.certificateRefs[0]");
    }

    #[test]
    fn test_ingress_class() {
        let class: IngressClass = from_yaml(
            r#"
apiVersion: networking.k8s.io/v1
kind: IngressClass
metadata:
  name: tollgate
spec:
  controller: apisix.apache.org/apisix-ingress-controller
"#,
        );

        let ctx = TranslateContext::new().with_gateway_proxy(proxy());
        let resources = class.translate(&Translator::default(), &ctx).unwrap();
        assert!(resources.global_rules.contains_key("prometheus"));
        assert!(resources.ssls.is_empty());

        let empty = class
            .translate(&Translator::default(), &TranslateContext::new())
            .unwrap();
        assert!(empty.is_empty());
    }
}
