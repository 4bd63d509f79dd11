use gateway_api::apis::experimental::grpcroutes::{
    GRPCRoute, GRPCRouteRules, GRPCRouteRulesFilters, GRPCRouteRulesMatches,
    GRPCRouteRulesMatchesHeadersType, GRPCRouteRulesMatchesMethod,
    GRPCRouteRulesMatchesMethodType,
};
use gateway_api::apis::experimental::httproutes::HTTPRouteRulesFilters;
use kube::ResourceExt;
use tollgate_api::label::Labels;
use tollgate_api::resources::{Expr, Resources, Route, Scheme, Service};
use tollgate_api::{Error, ErrorContext};

use super::backend::{gateway_backend, rule_backends};
use super::http_route::{check_regex, header_var, path_uris, translate_filters};
use super::plugins::Composer;
use super::{priority, MatchShape, ObjectNames, PathKind, Translate, TranslateContext, Translator};

impl Translate for GRPCRoute {
    fn translate(
        &self,
        translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();
        let names = ObjectNames::new(&namespace, &name);
        let labels = translator.labels_for("GRPCRoute", &namespace, &name);
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
    rule: &GRPCRouteRules,
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
    let backends = rule_backends(
        ctx,
        names,
        rule_index,
        labels,
        &backends,
        "backendRefs",
        Scheme::Grpc,
    );

    let filters = http_filters(rule.filters.as_deref().unwrap_or_default()).with_field("filters")?;

    let matches: Vec<Option<&GRPCRouteRulesMatches>> = match rule.matches.as_deref() {
        Some(matches) if !matches.is_empty() => matches.iter().map(Some).collect(),
        _ => vec![None],
    };

    let mut routes = Vec::with_capacity(matches.len());
    for (j, m) in matches.into_iter().enumerate() {
        let mut route =
            translate_match(m, hostnames, rule_index).with_field_index("matches", j)?;

        let mut composer = Composer::new();
        translate_filters(ctx, names.namespace, &filters, None, &mut composer)
            .with_field("filters")?;

        route.metadata = names.metadata(names.route(rule_index, j), labels);
        route.plugins = composer.build();
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

// every GRPCRoute filter has an HTTPRoute filter with the same shape, so
// filters are converted and share a translation.
fn http_filters(filters: &[GRPCRouteRulesFilters]) -> Result<Vec<HTTPRouteRulesFilters>, Error> {
    filters
        .iter()
        .enumerate()
        .map(|(i, filter)| {
            serde_json::to_value(filter)
                .and_then(serde_json::from_value)
                .map_err(|e| Error::new(format!("unsupported filter: {e}")))
                .with_index(i)
        })
        .collect()
}

/// The path a gRPC method match becomes.
///
/// gRPC calls are POSTs to `/{service}/{method}`. A match on both is an exact
/// path and a match on just the service is a prefix. Anything else needs a
/// regex.
fn method_path(method: Option<&GRPCRouteRulesMatchesMethod>) -> Result<(PathKind, String), Error> {
    let Some(method) = method else {
        return Ok((PathKind::None, "/".to_string()));
    };

    let service = method.service.as_deref().filter(|s| !s.is_empty());
    let name = method.method.as_deref().filter(|s| !s.is_empty());
    let is_regex = matches!(
        method.r#type,
        Some(GRPCRouteRulesMatchesMethodType::RegularExpression)
    );

    if is_regex {
        let service = service.unwrap_or("[^/]+");
        let name = name.unwrap_or("[^/]+");
        check_regex(service).with_field("service")?;
        check_regex(name).with_field("method")?;
        return Ok((PathKind::Regex, format!("^/{service}/{name}$")));
    }

    match (service, name) {
        (Some(service), Some(name)) => Ok((PathKind::Exact, format!("/{service}/{name}"))),
        (Some(service), None) => Ok((PathKind::Prefix, format!("/{service}"))),
        (None, Some(name)) => Ok((
            PathKind::Regex,
            format!("^/[^/]+/{}$", regex::escape(name)),
        )),
        (None, None) => Ok((PathKind::None, "/".to_string())),
    }
}

fn translate_match(
    m: Option<&GRPCRouteRulesMatches>,
    hostnames: &[String],
    rule_index: usize,
) -> Result<Route, Error> {
    let (kind, path) = method_path(m.and_then(|m| m.method.as_ref())).with_field("method")?;

    let mut route = Route {
        uris: path_uris(kind, &path),
        methods: vec!["POST".to_string()],
        ..Default::default()
    };
    if kind == PathKind::Regex {
        route.vars.push(Expr::new("uri", "~~", path.clone()));
    }

    let headers = m.and_then(|m| m.headers.as_deref()).unwrap_or_default();
    for (i, header) in headers.iter().enumerate() {
        let op = match header.r#type {
            Some(GRPCRouteRulesMatchesHeadersType::RegularExpression) => {
                check_regex(&header.value).with_field_index("headers", i)?;
                "~~"
            }
            _ => "==",
        };
        route
            .vars
            .push(Expr::new(header_var(&header.name), op, header.value.clone()));
    }

    route.priority = Some(priority(&MatchShape {
        hostnames,
        path_kind: kind,
        path: &path,
        method: true,
        headers: headers.len(),
        query_params: 0,
        rule_index,
    }));

    Ok(route)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::translate::test::{from_yaml, service};
    use serde_json::json;

    fn route(yaml: &str) -> GRPCRoute {
        from_yaml(yaml)
    }

    #[test]
    fn test_method_matches() {
        let obj = route(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: GRPCRoute
metadata:
  name: echo
  namespace: default
spec:
  hostnames: [grpc.example.com]
  rules:
    - matches:
        - method:
            service: echo.Echo
            method: Ping
        - method:
            service: echo.Echo
        - method:
            method: Ping
          headers:
            - name: X-Env
              value: canary
      filters:
        - type: RequestHeaderModifier
          requestHeaderModifier:
            add:
              - name: X-Via
                value: gateway
      backendRefs:
        - name: echo
          port: 9000
"#,
        );
        let ctx = TranslateContext::new().with_service(service("default", "echo", 9000, Some("grpc")));

        let resources = obj.translate(&Translator::default(), &ctx).unwrap();
        let service = &resources.services[0];
        assert_eq!(
            service.upstream.as_ref().and_then(|u| u.scheme),
            Some(Scheme::Grpc)
        );

        let routes = &service.routes;
        assert_eq!(routes.len(), 3);
        assert_eq!(routes[0].uris, vec!["/echo.Echo/Ping"]);
        assert_eq!(routes[0].methods, vec!["POST"]);
        assert_eq!(routes[1].uris, vec!["/echo.Echo", "/echo.Echo/*"]);
        assert_eq!(routes[2].uris, vec!["/*"]);
        assert_eq!(
            routes[2].vars,
            vec![
                Expr::new("uri", "~~", "^/[^/]+/Ping$"),
                Expr::new("http_x_env", "==", "canary"),
            ]
        );
        assert_eq!(
            routes[0].plugins["proxy-rewrite"],
            json!({"headers": {"add": {"X-Via": "gateway"}}})
        );

        // exact methods outrank services outrank everything else
        assert!(routes[0].priority > routes[1].priority);
        assert!(routes[1].priority > routes[2].priority);
    }

    #[test]
    fn test_invalid_method_regex() {
        let obj = route(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: GRPCRoute
metadata:
  name: echo
  namespace: default
spec:
  rules:
    - matches:
        - method:
            type: RegularExpression
            service: "echo.("
      backendRefs:
        - name: echo
          port: 9000
"#,
        );

        let err = obj
            .translate(&Translator::default(), &TranslateContext::new())
            .unwrap_err();
        assert_eq!(err.path(), "spec.rules[0].matches[0].method.service");
    }
}
