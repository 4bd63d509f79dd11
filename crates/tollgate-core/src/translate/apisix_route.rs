//! ApisixRoute translation.
//!
//! Paths on an ApisixRoute are already in the gateway's URI syntax, where a
//! trailing `*` makes a prefix match, so they're passed through as-is. Each
//! HTTP rule becomes a Service with a single route. Stream rules are numbered
//! after the HTTP rules so their names never collide.

use kube::ResourceExt;
use serde_json::{json, Value};
use tollgate_api::crd::{
    ApisixRoute, ApisixRouteAuthentication, ApisixRouteHttp, ApisixRouteHttpMatchExpr,
    ApisixRouteStream,
};
use tollgate_api::label::Labels;
use tollgate_api::resources::{
    Expr, Plugins, Resources, Route, Scheme, Service, StreamRoute, Timeout,
};
use tollgate_api::{Error, ErrorContext};

use super::backend::{rule_backends, BackendRef};
use super::http_route::{check_regex, header_var};
use super::plugins::{self, Composer};
use super::{priority, MatchShape, ObjectNames, PathKind, Translate, TranslateContext, Translator};

impl Translate for ApisixRoute {
    fn translate(
        &self,
        translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();
        let names = ObjectNames::new(&namespace, &name);
        let labels = translator.labels_for("ApisixRoute", &namespace, &name);

        let mut resources = Resources::default();
        for (i, rule) in self.spec.http.iter().enumerate() {
            let service = translate_http(ctx, &names, &labels, i, rule)
                .with_index(i)
                .with_fields("spec", "http")?;
            resources.services.push(service);
        }

        let offset = self.spec.http.len();
        for (i, rule) in self.spec.stream.iter().enumerate() {
            let service = translate_stream(ctx, &names, &labels, offset + i, rule)
                .with_index(i)
                .with_fields("spec", "stream")?;
            resources.services.push(service);
        }

        Ok(resources)
    }
}

fn translate_http(
    ctx: &TranslateContext,
    names: &ObjectNames,
    labels: &Labels,
    index: usize,
    rule: &ApisixRouteHttp,
) -> Result<Service, Error> {
    let route_match = &rule.route_match;

    let mut composer = Composer::new();
    if let Some(plugin_config) = &rule.plugin_config_name {
        let namespace = rule
            .plugin_config_namespace
            .as_deref()
            .unwrap_or(names.namespace);
        let shared =
            plugins::plugin_config(ctx, namespace, plugin_config).with_field("pluginConfigName")?;
        composer.shared(shared);
    }

    let mut inline = plugins::declared(ctx, names.namespace, &rule.plugins).with_field("plugins")?;
    if let Some(auth) = &rule.authentication {
        if let Some((name, config)) = auth_plugin(auth).with_field("authentication")? {
            inline.insert(name.to_string(), config);
        }
    }
    composer.inline(inline);

    let vars = route_match
        .exprs
        .iter()
        .enumerate()
        .map(|(k, e)| expr(e).with_index(k))
        .collect::<Result<Vec<_>, _>>()
        .with_fields("match", "exprs")?;

    let backends: Vec<_> = rule
        .backends
        .iter()
        .map(|b| {
            BackendRef::new(names.namespace, &b.service_name, Some(b.service_port.clone()))
                .with_weight(b.weight.unwrap_or(100))
                .with_granularity(b.resolve_granularity)
        })
        .collect();
    let backends = rule_backends(ctx, names, index, labels, &backends, "backends", Scheme::Http);

    let uris = if route_match.paths.is_empty() {
        vec!["/*".to_string()]
    } else {
        route_match.paths.clone()
    };

    let route_priority = rule.priority.unwrap_or_else(|| {
        // the most specific path decides.
        let path = uris.iter().max_by_key(|p| (!p.ends_with('*'), p.len()));
        let path = path.map(String::as_str).unwrap_or_default();
        let path_kind = if path.ends_with('*') {
            PathKind::Prefix
        } else {
            PathKind::Exact
        };
        priority(&MatchShape {
            hostnames: &route_match.hosts,
            path_kind,
            path: path.trim_end_matches('*'),
            method: !route_match.methods.is_empty(),
            headers: vars.len(),
            query_params: 0,
            rule_index: index,
        })
    });

    let timeout = rule
        .timeout
        .map(|t| Timeout {
            connect: t.connect,
            send: t.send,
            read: t.read,
        })
        .filter(|t| !t.is_empty());

    let route = Route {
        metadata: names.metadata(names.route(index, 0), labels),
        uris,
        hosts: route_match.hosts.clone(),
        methods: route_match.methods.clone(),
        remote_addrs: route_match.remote_addrs.clone(),
        vars,
        priority: Some(route_priority),
        enable_websocket: (rule.websocket || backends.websocket).then_some(true),
        timeout,
        plugins: composer.build(),
    };

    Ok(Service {
        metadata: names.metadata(names.service(index), labels),
        hosts: vec![],
        upstream: backends.upstream,
        upstreams: backends.upstreams,
        plugins: backends.plugins,
        routes: vec![route],
        stream_routes: vec![],
    })
}

fn auth_plugin(auth: &ApisixRouteAuthentication) -> Result<Option<(&'static str, Value)>, Error> {
    if !auth.enable {
        return Ok(None);
    }

    let plugin = match auth.auth_type.as_str() {
        "basicAuth" => ("basic-auth", json!({})),
        "keyAuth" => {
            let header = auth.key_auth.as_ref().and_then(|k| k.header.as_deref());
            let config = match header {
                Some(header) => json!({ "header": header }),
                None => json!({}),
            };
            ("key-auth", config)
        }
        "jwtAuth" => ("jwt-auth", json!({})),
        "hmacAuth" => ("hmac-auth", json!({})),
        "wolfRBAC" => ("wolf-rbac", json!({})),
        "ldapAuth" => ("ldap-auth", json!({})),
        other => {
            return Err(Error::new(format!("unknown authentication type: {other}")))
                .with_field("type");
        }
    };

    Ok(Some(plugin))
}

fn expr(e: &ApisixRouteHttpMatchExpr) -> Result<Expr, Error> {
    let subject = &e.subject;
    let var = match subject.scope.as_str() {
        "Header" => header_var(&subject.name),
        "Query" => format!("arg_{}", subject.name),
        "Cookie" => format!("cookie_{}", subject.name),
        "Path" => "uri".to_string(),
        "Variable" => subject.name.clone(),
        other => {
            return Err(Error::new(format!("unknown scope: {other}"))).with_fields("subject", "scope");
        }
    };
    if subject.scope != "Path" && subject.name.is_empty() {
        return Err(Error::new_static("a subject name is required")).with_fields("subject", "name");
    }

    let value = || {
        e.value
            .clone()
            .ok_or_else(|| Error::field_not_found("value"))
    };
    let regex = || {
        let value = value()?;
        check_regex(&value).with_field("value")?;
        Ok::<_, Error>(value)
    };

    let expr = match e.op.as_str() {
        "Equal" => Expr::new(var, "==", value()?),
        "NotEqual" => Expr::new(var, "~=", value()?),
        "GreaterThan" => Expr::new(var, ">", value()?),
        "LessThan" => Expr::new(var, "<", value()?),
        "In" => Expr::new(var, "in", json!(e.set)),
        "NotIn" => Expr::new(var, "in", json!(e.set)).negated(),
        "RegexMatch" => Expr::new(var, "~~", regex()?),
        "RegexNotMatch" => Expr::new(var, "~~", regex()?).negated(),
        "RegexMatchCaseInsensitive" => Expr::new(var, "~*", regex()?),
        "RegexNotMatchCaseInsensitive" => Expr::new(var, "~*", regex()?).negated(),
        other => return Err(Error::new(format!("unknown operator: {other}"))).with_field("op"),
    };

    Ok(expr)
}

fn translate_stream(
    ctx: &TranslateContext,
    names: &ObjectNames,
    labels: &Labels,
    index: usize,
    rule: &ApisixRouteStream,
) -> Result<Service, Error> {
    let scheme = match rule.protocol.to_ascii_uppercase().as_str() {
        "TCP" => Scheme::Tcp,
        "UDP" => Scheme::Udp,
        other => {
            return Err(Error::new(format!("unknown protocol: {other}"))).with_field("protocol");
        }
    };

    let port = rule.stream_match.ingress_port;
    let server_port = u16::try_from(port)
        .map_err(|_| Error::new(format!("invalid port number: {port}")))
        .with_fields("match", "ingressPort")?;

    let plugins: Plugins = plugins::declared(ctx, names.namespace, &rule.plugins).with_field("plugins")?;

    let backend = &rule.backend;
    let backends = [
        BackendRef::new(names.namespace, &backend.service_name, Some(backend.service_port.clone()))
            .with_granularity(backend.resolve_granularity),
    ];
    let mut backends = rule_backends(ctx, names, index, labels, &backends, "backend", scheme);
    if let Some(upstream) = &mut backends.upstream {
        upstream.scheme = Some(scheme);
    }

    let stream_route = StreamRoute {
        metadata: names.metadata(names.route(index, 0), labels),
        server_port: Some(server_port),
        sni: rule.stream_match.host.clone().filter(|_| scheme == Scheme::Tcp),
        plugins,
        ..Default::default()
    };

    Ok(Service {
        metadata: names.metadata(names.service(index), labels),
        upstream: backends.upstream,
        plugins: backends.plugins,
        stream_routes: vec![stream_route],
        ..Default::default()
    })
}
