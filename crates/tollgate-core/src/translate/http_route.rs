use std::str::FromStr;

use gateway_api::apis::experimental::httproutes::{
    HTTPRoute, HTTPRouteRules, HTTPRouteRulesFilters, HTTPRouteRulesMatches,
    HTTPRouteRulesMatchesHeadersType, HTTPRouteRulesMatchesMethod, HTTPRouteRulesMatchesPathType,
    HTTPRouteRulesMatchesQueryParamsType, HTTPRouteRulesTimeouts,
};
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tollgate_api::label::Labels;
use tollgate_api::resources::{Expr, Plugins, Resources, Route, Scheme, Service, Timeout};
use tollgate_api::{Duration, Error, ErrorContext};

use super::backend::{gateway_backend, rule_backends};
use super::plugins::{self, Composer};
use super::{priority, MatchShape, ObjectNames, PathKind, Translate, TranslateContext, Translator};

impl Translate for HTTPRoute {
    fn translate(
        &self,
        translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();
        let names = ObjectNames::new(&namespace, &name);
        let labels = translator.labels_for("HTTPRoute", &namespace, &name);
        let hostnames = self.spec.hostnames.clone().unwrap_or_default();

        let mut resources = Resources::default();
        for (i, rule) in self.spec.rules.iter().flatten().enumerate() {
            let service = translate_rule(ctx, &names, &labels, &hostnames, i, rule)
                .with_index(i)
                .with_fields("spec", "rules")?;
            resources.services.push(service);
        }

        Ok(resources)
    }
}

fn translate_rule(
    ctx: &TranslateContext,
    names: &ObjectNames,
    labels: &Labels,
    hostnames: &[String],
    rule_index: usize,
    rule: &HTTPRouteRules,
) -> Result<Service, Error> {
    let backends: Vec<_> = rule
        .backend_refs
        .iter()
        .flatten()
        .filter_map(|b| {
            gateway_backend(
                names.namespace,
                b.group.as_deref(),
                b.kind.as_deref(),
                &b.name,
                b.namespace.as_deref(),
                b.port,
                b.weight,
            )
        })
        .collect();
    let mut backends = rule_backends(
        ctx,
        names,
        rule_index,
        labels,
        &backends,
        "backendRefs",
        Scheme::Http,
    );

    if let Some(attempts) = rule.retry.as_ref().and_then(|r| r.attempts) {
        if let (Some(upstream), Ok(attempts)) = (&mut backends.upstream, u32::try_from(attempts)) {
            upstream.retries = Some(attempts);
        }
    }

    let timeout = rule
        .timeouts
        .as_ref()
        .map(route_timeout)
        .transpose()
        .with_field("timeouts")?
        .flatten();

    // a rule with no matches matches every request
    let matches: Vec<Option<&HTTPRouteRulesMatches>> = match rule.matches.as_deref() {
        Some(matches) if !matches.is_empty() => matches.iter().map(Some).collect(),
        _ => vec![None],
    };

    let filters = rule.filters.as_deref().unwrap_or_default();
    let mut routes = Vec::with_capacity(matches.len());
    for (j, m) in matches.into_iter().enumerate() {
        let (mut route, prefix) = translate_match(m, hostnames, rule_index)
            .with_field_index("matches", j)?;

        let mut composer = Composer::new();
        translate_filters(ctx, names.namespace, filters, prefix.as_deref(), &mut composer)
            .with_field("filters")?;

        route.metadata = names.metadata(names.route(rule_index, j), labels);
        route.plugins = composer.build();
        route.timeout = timeout;
        if backends.websocket {
            route.enable_websocket = Some(true);
        }
        routes.push(route);
    }

    Ok(Service {
        metadata: names.metadata(names.service(rule_index), labels),
        hosts: hostnames.to_vec(),
        upstream: backends.upstream,
        upstreams: backends.upstreams,
        plugins: backends.plugins,
        routes,
        stream_routes: vec![],
    })
}

/// The URIs a path match turns into.
///
/// A prefix matches itself and everything below it, so `/foo` becomes both
/// `/foo` and `/foo/*`. Regex paths match every URI and leave the real match
/// to a `uri` expression.
pub(crate) fn path_uris(kind: PathKind, path: &str) -> Vec<String> {
    match kind {
        PathKind::Exact => vec![path.to_string()],
        PathKind::Prefix => {
            let prefix = path.trim_end_matches('/');
            if prefix.is_empty() {
                vec!["/*".to_string()]
            } else {
                vec![prefix.to_string(), format!("{prefix}/*")]
            }
        }
        PathKind::Regex | PathKind::None => vec!["/*".to_string()],
    }
}

/// The name of the expression variable for a request header.
pub(crate) fn header_var(name: &str) -> String {
    format!("http_{}", name.to_ascii_lowercase().replace('-', "_"))
}

pub(crate) fn check_regex(value: &str) -> Result<(), Error> {
    regex::Regex::new(value)
        .map(|_| ())
        .map_err(|e| Error::new(format!("invalid regex: {e}")))
}

// returns the route, and the path prefix it matched if it was a prefix match.
fn translate_match(
    m: Option<&HTTPRouteRulesMatches>,
    hostnames: &[String],
    rule_index: usize,
) -> Result<(Route, Option<String>), Error> {
    let mut route = Route::default();

    let path = m.and_then(|m| m.path.as_ref());
    let value = path.and_then(|p| p.value.as_deref()).unwrap_or("/");
    let kind = match path.and_then(|p| p.r#type.as_ref()) {
        Some(HTTPRouteRulesMatchesPathType::Exact) => PathKind::Exact,
        Some(HTTPRouteRulesMatchesPathType::RegularExpression) => PathKind::Regex,
        Some(HTTPRouteRulesMatchesPathType::PathPrefix) | None => PathKind::Prefix,
    };
    route.uris = path_uris(kind, value);
    if kind == PathKind::Regex {
        check_regex(value).with_fields("path", "value")?;
        route.vars.push(Expr::new("uri", "~~", value));
    }

    let method = m.and_then(|m| m.method.as_ref());
    if let Some(method) = method {
        route.methods = vec![method_name(method).to_string()];
    }

    let headers = m.and_then(|m| m.headers.as_deref()).unwrap_or_default();
    for (i, header) in headers.iter().enumerate() {
        let op = match header.r#type {
            Some(HTTPRouteRulesMatchesHeadersType::RegularExpression) => {
                check_regex(&header.value).with_field_index("headers", i)?;
                "~~"
            }
            _ => "==",
        };
        route
            .vars
            .push(Expr::new(header_var(&header.name), op, header.value.clone()));
    }

    let query_params = m.and_then(|m| m.query_params.as_deref()).unwrap_or_default();
    for (i, param) in query_params.iter().enumerate() {
        let op = match param.r#type {
            Some(HTTPRouteRulesMatchesQueryParamsType::RegularExpression) => {
                check_regex(&param.value).with_field_index("queryParams", i)?;
                "~~"
            }
            _ => "==",
        };
        route
            .vars
            .push(Expr::new(format!("arg_{}", param.name), op, param.value.clone()));
    }

    route.priority = Some(priority(&MatchShape {
        hostnames,
        path_kind: kind,
        path: value,
        method: method.is_some(),
        headers: headers.len(),
        query_params: query_params.len(),
        rule_index,
    }));

    let prefix = (kind == PathKind::Prefix).then(|| value.trim_end_matches('/').to_string());
    Ok((route, prefix))
}

fn method_name(method: &HTTPRouteRulesMatchesMethod) -> &'static str {
    match method {
        HTTPRouteRulesMatchesMethod::Get => "GET",
        HTTPRouteRulesMatchesMethod::Head => "HEAD",
        HTTPRouteRulesMatchesMethod::Post => "POST",
        HTTPRouteRulesMatchesMethod::Put => "PUT",
        HTTPRouteRulesMatchesMethod::Delete => "DELETE",
        HTTPRouteRulesMatchesMethod::Connect => "CONNECT",
        HTTPRouteRulesMatchesMethod::Options => "OPTIONS",
        HTTPRouteRulesMatchesMethod::Trace => "TRACE",
        HTTPRouteRulesMatchesMethod::Patch => "PATCH",
    }
}

fn parse_duration(d: &Option<String>) -> Result<Option<Duration>, Error> {
    use gateway_api::duration::Duration as GatewayDuration;

    let Some(d) = d else {
        return Ok(None);
    };

    let kube_duration =
        GatewayDuration::from_str(d).map_err(|e| Error::new(format!("invalid duration: {e}")))?;

    Ok(Some(Duration::new(
        kube_duration.as_secs(),
        kube_duration.subsec_nanos(),
    )))
}

// the gateway has no whole-request timeout. both Gateway API timeouts bound
// the time spent waiting on the backend, so either becomes a send and read
// timeout, with backendRequest taking precedence.
fn route_timeout(timeouts: &HTTPRouteRulesTimeouts) -> Result<Option<Timeout>, Error> {
    let request = parse_duration(&timeouts.request).with_field("request")?;
    let backend_request =
        parse_duration(&timeouts.backend_request).with_field("backendRequest")?;

    Ok(backend_request.or(request).map(|d| Timeout {
        connect: None,
        send: Some(d),
        read: Some(d),
    }))
}

// plugin configs that several filters can contribute to.
#[derive(Debug, Default)]
struct FilterPlugins {
    proxy_rewrite: Map<String, Value>,
    response_rewrite: Map<String, Value>,
    redirect: Map<String, Value>,
}

impl FilterPlugins {
    fn into_plugins(self) -> Plugins {
        let mut plugins = Plugins::new();
        for (name, config) in [
            ("proxy-rewrite", self.proxy_rewrite),
            ("response-rewrite", self.response_rewrite),
            ("redirect", self.redirect),
        ] {
            if !config.is_empty() {
                plugins.insert(name.to_string(), Value::Object(config));
            }
        }
        plugins
    }
}

/// Turn native filters into plugins.
///
/// `prefix` is the path prefix of the match the filters apply to. Prefix
/// rewrites replace it.
pub(crate) fn translate_filters(
    ctx: &TranslateContext,
    namespace: &str,
    filters: &[HTTPRouteRulesFilters],
    prefix: Option<&str>,
    composer: &mut Composer,
) -> Result<(), Error> {
    let mut inline = FilterPlugins::default();
    let prefix_regex = || format!("^{}(/.*)?$", regex::escape(prefix.unwrap_or_default()));

    for (i, filter) in filters.iter().enumerate() {
        if let Some(modifier) = &filter.request_header_modifier {
            let mut headers = Map::new();
            if let Some(add) = &modifier.add {
                let add: Map<_, _> = add.iter().map(|h| (h.name.clone(), json!(h.value))).collect();
                headers.insert("add".to_string(), Value::Object(add));
            }
            if let Some(set) = &modifier.set {
                let set: Map<_, _> = set.iter().map(|h| (h.name.clone(), json!(h.value))).collect();
                headers.insert("set".to_string(), Value::Object(set));
            }
            if let Some(remove) = &modifier.remove {
                headers.insert("remove".to_string(), json!(remove));
            }
            inline
                .proxy_rewrite
                .insert("headers".to_string(), Value::Object(headers));
        }

        if let Some(modifier) = &filter.response_header_modifier {
            let mut headers = Map::new();
            if let Some(add) = &modifier.add {
                let add: Vec<_> = add.iter().map(|h| format!("{}: {}", h.name, h.value)).collect();
                headers.insert("add".to_string(), json!(add));
            }
            if let Some(set) = &modifier.set {
                let set: Map<_, _> = set.iter().map(|h| (h.name.clone(), json!(h.value))).collect();
                headers.insert("set".to_string(), Value::Object(set));
            }
            if let Some(remove) = &modifier.remove {
                headers.insert("remove".to_string(), json!(remove));
            }
            inline
                .response_rewrite
                .insert("headers".to_string(), Value::Object(headers));
        }

        if let Some(redirect) = &filter.request_redirect {
            let scheme = redirect
                .scheme
                .as_ref()
                .and_then(|s| serde_json::to_value(s).ok())
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| "$scheme".to_string());
            let host = redirect.hostname.as_deref().unwrap_or("$host");
            let port = redirect.port.map(|p| format!(":{p}")).unwrap_or_default();

            let config = &mut inline.redirect;
            config.insert(
                "ret_code".to_string(),
                json!(redirect.status_code.unwrap_or(302)),
            );

            let path = redirect.path.as_ref();
            let full = path.and_then(|p| p.replace_full_path.as_deref());
            let replacement = path.and_then(|p| p.replace_prefix_match.as_deref());
            match (full, replacement) {
                (Some(full), _) => {
                    config.insert("uri".to_string(), json!(format!("{scheme}://{host}{port}{full}")));
                }
                // a prefix replacement can only rewrite the path, so the
                // scheme and host are kept.
                (None, Some(replacement)) => {
                    let replacement = replacement.trim_end_matches('/');
                    config.insert(
                        "regex_uri".to_string(),
                        json!([prefix_regex(), format!("{replacement}$1")]),
                    );
                }
                (None, None) => {
                    config.insert(
                        "uri".to_string(),
                        json!(format!("{scheme}://{host}{port}$request_uri")),
                    );
                }
            }
        }

        if let Some(rewrite) = &filter.url_rewrite {
            let config = &mut inline.proxy_rewrite;
            if let Some(hostname) = &rewrite.hostname {
                config.insert("host".to_string(), json!(hostname));
            }

            let path = rewrite.path.as_ref();
            if let Some(full) = path.and_then(|p| p.replace_full_path.as_deref()) {
                config.insert("uri".to_string(), json!(full));
            } else if let Some(replacement) = path.and_then(|p| p.replace_prefix_match.as_deref()) {
                let replacement = replacement.trim_end_matches('/');
                config.insert(
                    "regex_uri".to_string(),
                    json!([prefix_regex(), format!("{replacement}$1")]),
                );
            }
        }

        if let Some(extension) = &filter.extension_ref {
            if extension.kind == "ApisixPluginConfig" {
                let shared = plugins::plugin_config(ctx, namespace, &extension.name)
                    .with_field("extensionRef")
                    .with_index(i)?;
                composer.shared(shared);
            } else {
                tracing::warn!(
                    %namespace,
                    kind = %extension.kind,
                    name = %extension.name,
                    "ignoring unsupported extensionRef"
                );
            }
        }
    }

    composer.inline(inline.into_plugins());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::translate::test::{from_yaml, service};
    use tollgate_api::crd::ApisixPluginConfig;
    use tollgate_api::id::gen_id;
    use tollgate_api::label::LABEL_KIND;

    fn route(yaml: &str) -> HTTPRoute {
        from_yaml(yaml)
    }

    fn ctx() -> TranslateContext {
        TranslateContext::new()
            .with_service(service("default", "v1", 80, None))
            .with_service(service("default", "v2", 80, None))
    }

    const CANARY: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: foo
  namespace: default
spec:
  parentRefs:
    - name: gateway
  hostnames:
    - api.example.com
  rules:
    - matches:
        - path:
            type: PathPrefix
            value: /v1/
          method: GET
          headers:
            - name: X-Canary
              value: "true"
      filters:
        - type: RequestHeaderModifier
          requestHeaderModifier:
            set:
              - name: X-From
                value: gateway
      backendRefs:
        - name: v1
          port: 80
          weight: 70
        - name: v2
          port: 80
          weight: 30
"#;

    #[test]
    fn test_traffic_split() {
        let resources = route(CANARY)
            .translate(&Translator::default(), &ctx())
            .unwrap();

        assert_eq!(resources.services.len(), 1);
        let service = &resources.services[0];
        assert_eq!(service.metadata.id, gen_id("default_foo_0"));
        assert_eq!(service.metadata.labels[LABEL_KIND], "HTTPRoute");
        assert_eq!(service.hosts, vec!["api.example.com"]);
        assert!(service.upstream.is_some());
        assert_eq!(service.upstreams.len(), 1);
        assert_eq!(service.upstreams[0].metadata.id, gen_id("default_foo_0_1"));
        assert_eq!(
            service.plugins["traffic-split"],
            json!({"rules": [{"weighted_upstreams": [
                {"upstream_id": gen_id("default_foo_0_1"), "weight": 30},
                {"weight": 70},
            ]}]})
        );

        let route = &service.routes[0];
        assert_eq!(route.metadata.id, gen_id("default_foo_0_0"));
        assert_eq!(route.uris, vec!["/v1", "/v1/*"]);
        assert_eq!(route.methods, vec!["GET"]);
        assert_eq!(route.vars, vec![Expr::new("http_x_canary", "==", "true")]);
        assert_eq!(
            route.plugins["proxy-rewrite"],
            json!({"headers": {"set": {"X-From": "gateway"}}})
        );
    }

    #[test]
    fn test_idempotent() {
        let route = route(CANARY);
        let translator = Translator::default();
        let a = route.translate(&translator, &ctx()).unwrap();
        let b = route.translate(&translator, &ctx()).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_default_match_and_priority() {
        let resources = route(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: bar
  namespace: default
spec:
  rules:
    - backendRefs:
        - name: v1
          port: 80
    - matches:
        - path:
            type: Exact
            value: /healthz
        - path:
            type: RegularExpression
            value: ^/items/[0-9]+$
          queryParams:
            - name: debug
              value: "1"
      backendRefs:
        - name: v1
          port: 80
"#,
        )
        .translate(&Translator::default(), &ctx())
        .unwrap();

        let catch_all = &resources.services[0].routes[0];
        assert_eq!(catch_all.uris, vec!["/*"]);

        let exact = &resources.services[1].routes[0];
        assert_eq!(exact.uris, vec!["/healthz"]);
        assert!(exact.priority > catch_all.priority);

        let regex = &resources.services[1].routes[1];
        assert_eq!(regex.uris, vec!["/*"]);
        assert_eq!(
            regex.vars,
            vec![
                Expr::new("uri", "~~", "^/items/[0-9]+$"),
                Expr::new("arg_debug", "==", "1"),
            ]
        );
        assert_eq!(regex.metadata.name, "default_bar_1_1");
    }

    #[test]
    fn test_missing_backend_fault_injection() {
        let resources = route(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: broken
  namespace: default
spec:
  rules:
    - backendRefs:
        - name: nope
          port: 80
"#,
        )
        .translate(&Translator::default(), &ctx())
        .unwrap();

        let service = &resources.services[0];
        assert!(service.upstream.is_none());
        assert_eq!(
            service.plugins["fault-injection"]["abort"]["http_status"],
            json!(500)
        );
    }

    #[test]
    fn test_invalid_regex() {
        let err = route(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: broken
  namespace: default
spec:
  rules:
    - matches:
        - headers:
            - name: x-id
              type: RegularExpression
              value: "[a-z"
"#,
        )
        .translate(&Translator::default(), &ctx())
        .unwrap_err();

        assert_eq!(err.path(), "spec.rules[0].matches[0].headers[0]");
    }

    #[test]
    fn test_filters() {
        let plugin_config: ApisixPluginConfig = from_yaml(
            r#"
apiVersion: apisix.apache.org/v2
kind: ApisixPluginConfig
metadata:
  name: limits
  namespace: default
spec:
  plugins:
    - name: limit-count
      config:
        count: 10
        time_window: 60
"#,
        );

        let resources = route(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: filtered
  namespace: default
spec:
  rules:
    - matches:
        - path:
            type: PathPrefix
            value: /old
      filters:
        - type: URLRewrite
          urlRewrite:
            hostname: new.example.com
            path:
              type: ReplacePrefixMatch
              replacePrefixMatch: /new
        - type: ResponseHeaderModifier
          responseHeaderModifier:
            add:
              - name: X-Served-By
                value: tollgate
            remove: ["Server"]
        - type: ExtensionRef
          extensionRef:
            group: apisix.apache.org
            kind: ApisixPluginConfig
            name: limits
      backendRefs:
        - name: v1
          port: 80
    - filters:
        - type: RequestRedirect
          requestRedirect:
            scheme: https
            statusCode: 301
"#,
        )
        .translate(
            &Translator::default(),
            &ctx().with_plugin_config(plugin_config),
        )
        .unwrap();

        let plugins = &resources.services[0].routes[0].plugins;
        assert_eq!(
            plugins["proxy-rewrite"],
            json!({
                "host": "new.example.com",
                "regex_uri": ["^/old(/.*)?$", "/new$1"],
            })
        );
        assert_eq!(
            plugins["response-rewrite"],
            json!({"headers": {"add": ["X-Served-By: tollgate"], "remove": ["Server"]}})
        );
        assert_eq!(plugins["limit-count"], json!({"count": 10, "time_window": 60}));

        let plugins = &resources.services[1].routes[0].plugins;
        assert_eq!(
            plugins["redirect"],
            json!({"ret_code": 301, "uri": "https://$host$request_uri"})
        );
    }

    #[test]
    fn test_timeouts() {
        let resources = route(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: slow
  namespace: default
spec:
  rules:
    - timeouts:
        request: 30s
        backendRequest: 10s
      backendRefs:
        - name: v1
          port: 80
"#,
        )
        .translate(&Translator::default(), &ctx())
        .unwrap();

        assert_eq!(
            resources.services[0].routes[0].timeout,
            Some(Timeout {
                connect: None,
                send: Some(Duration::from_secs(10)),
                read: Some(Duration::from_secs(10)),
            })
        );
    }
}
