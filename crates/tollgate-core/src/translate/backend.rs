//! Backend resolution.
//!
//! Turns references to Kubernetes Services into upstreams, and the weighted
//! backends of a single rule into a primary upstream plus an optional traffic
//! split across secondary upstreams.

use k8s_openapi::api::core::v1::{Service as KubeService, ServicePort};
use serde_json::{json, Value};
use tollgate_api::crd::{ApisixUpstreamSpec, PortRef, ResolveGranularity};
use tollgate_api::label::Labels;
use tollgate_api::resources::{PassHost, Plugins, Scheme, Timeout, Upstream, UpstreamNode};
use tollgate_api::{Error, ErrorContext};

use super::{ObjectNames, TranslateContext};

/// The weight given to every node of an upstream.
pub(crate) const NODE_WEIGHT: u32 = 100;

/// A reference to a backend Service, normalized across source kinds.
#[derive(Debug, Clone)]
pub(crate) struct BackendRef {
    pub namespace: String,
    pub name: String,
    pub port: Option<PortRef>,
    pub weight: u32,
    pub granularity: ResolveGranularity,
}

impl BackendRef {
    pub(crate) fn new(namespace: &str, name: &str, port: Option<PortRef>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            port,
            weight: 1,
            granularity: ResolveGranularity::default(),
        }
    }

    pub(crate) fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub(crate) fn with_granularity(mut self, granularity: Option<ResolveGranularity>) -> Self {
        self.granularity = granularity.unwrap_or_default();
        self
    }
}

/// Normalize a Gateway API backend reference. References to anything other
/// than a core Service are logged and dropped.
pub(crate) fn gateway_backend(
    route_namespace: &str,
    group: Option<&str>,
    kind: Option<&str>,
    name: &str,
    namespace: Option<&str>,
    port: Option<i32>,
    weight: Option<i32>,
) -> Option<BackendRef> {
    let group = group.unwrap_or_default();
    let kind = kind.unwrap_or("Service");
    if !group.is_empty() || kind != "Service" {
        tracing::warn!(%group, %kind, %name, "ignoring backend that isn't a Service");
        return None;
    }

    let namespace = namespace.unwrap_or(route_namespace);
    let weight = u32::try_from(weight.unwrap_or(1)).unwrap_or(0);
    Some(BackendRef::new(namespace, name, port.map(PortRef::Number)).with_weight(weight))
}

/// A single backend resolved into an upstream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolved {
    pub upstream: Upstream,

    /// The Service asked for websocket traffic through its `appProtocol`.
    pub websocket: bool,
}

/// Resolve a backend to an upstream.
pub(crate) fn resolve(ctx: &TranslateContext, backend: &BackendRef) -> Result<Resolved, Error> {
    let service = ctx
        .service(&backend.namespace, &backend.name)
        .ok_or_else(|| {
            Error::missing_reference(format!(
                "service {}/{} not found",
                backend.namespace, backend.name
            ))
        })?;

    let spec = service.spec.as_ref();
    let service_port = find_port(service, backend.port.as_ref());
    let (scheme, websocket) = app_protocol(service_port.and_then(|p| p.app_protocol.as_deref()));

    let nodes = if spec.and_then(|s| s.type_.as_deref()) == Some("ExternalName") {
        let host = spec
            .and_then(|s| s.external_name.clone())
            .ok_or_else(|| Error::new_static("ExternalName service has no externalName"))?;
        let port = match (&backend.port, service_port) {
            (Some(PortRef::Number(n)), _) => *n,
            (_, Some(p)) => p.port,
            _ => 80,
        };
        vec![node(&host, port).with_field("port")?]
    } else {
        let service_port = service_port.ok_or_else(|| {
            let port = backend
                .port
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            Error::missing_reference(format!(
                "port {port} not found on service {}/{}",
                backend.namespace, backend.name
            ))
        })?;

        match backend.granularity {
            ResolveGranularity::Service => {
                let cluster_ip = spec
                    .and_then(|s| s.cluster_ip.as_deref())
                    .filter(|ip| !ip.is_empty() && *ip != "None")
                    .ok_or_else(|| Error::new_static("service has no cluster IP"))?;
                vec![node(cluster_ip, service_port.port)?]
            }
            ResolveGranularity::Endpoint => {
                endpoint_nodes(ctx, &backend.namespace, &backend.name, service_port)
            }
        }
    };

    let mut upstream = Upstream {
        scheme,
        nodes,
        ..Default::default()
    };

    if let Some(policy) = ctx.upstream(&backend.namespace, &backend.name) {
        apply_policy(&mut upstream, &policy.spec).with_field("upstream")?;
    }

    Ok(Resolved {
        upstream,
        websocket,
    })
}

fn find_port<'a>(service: &'a KubeService, port: Option<&PortRef>) -> Option<&'a ServicePort> {
    let ports = service.spec.as_ref()?.ports.as_deref()?;
    match port {
        Some(PortRef::Number(n)) => ports.iter().find(|p| p.port == *n),
        Some(PortRef::Name(name)) => ports.iter().find(|p| p.name.as_ref() == Some(name)),
        None if ports.len() == 1 => ports.first(),
        None => None,
    }
}

fn app_protocol(app_protocol: Option<&str>) -> (Option<Scheme>, bool) {
    match app_protocol {
        Some("http") => (Some(Scheme::Http), false),
        Some("https") => (Some(Scheme::Https), false),
        Some("kubernetes.io/h2c" | "grpc") => (Some(Scheme::Grpc), false),
        Some("grpcs") => (Some(Scheme::Grpcs), false),
        Some("kubernetes.io/ws") => (Some(Scheme::Http), true),
        Some("kubernetes.io/wss") => (Some(Scheme::Https), true),
        _ => (None, false),
    }
}

fn node(host: &str, port: i32) -> Result<UpstreamNode, Error> {
    let port =
        u16::try_from(port).map_err(|_| Error::new(format!("invalid port number: {port}")))?;
    Ok(UpstreamNode {
        host: host.to_string(),
        port,
        weight: NODE_WEIGHT,
    })
}

// one node per address of every ready endpoint. the target port comes from
// the slice port with the same name as the service port.
fn endpoint_nodes(
    ctx: &TranslateContext,
    namespace: &str,
    service: &str,
    service_port: &ServicePort,
) -> Vec<UpstreamNode> {
    let port_name = service_port.name.as_deref().unwrap_or_default();

    let mut nodes = vec![];
    for slice in ctx.endpoint_slices(namespace, service) {
        let target_port = slice
            .ports
            .iter()
            .flatten()
            .find(|p| p.name.as_deref().unwrap_or_default() == port_name)
            .and_then(|p| p.port);
        let Some(target_port) = target_port else {
            continue;
        };

        for endpoint in &slice.endpoints {
            let conditions = endpoint.conditions.as_ref();
            let ready = conditions.and_then(|c| c.ready).unwrap_or(true);
            let terminating = conditions.and_then(|c| c.terminating).unwrap_or(false);
            if !ready || terminating {
                continue;
            }

            for address in &endpoint.addresses {
                match node(address, target_port) {
                    Ok(node) => nodes.push(node),
                    Err(e) => tracing::debug!(%namespace, %service, %e, "skipping endpoint"),
                }
            }
        }
    }

    nodes.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
    nodes.dedup();
    nodes
}

fn apply_policy(upstream: &mut Upstream, policy: &ApisixUpstreamSpec) -> Result<(), Error> {
    if let Some(lb) = &policy.loadbalancer {
        upstream.lb = lb
            .lb_type
            .parse()
            .map_err(Error::new)
            .with_fields("loadbalancer", "type")?;
        upstream.hash_on = lb.hash_on.clone();
        upstream.key = lb.key.clone();
    }

    if let Some(scheme) = &policy.scheme {
        upstream.scheme = Some(scheme.parse().map_err(Error::new).with_field("scheme")?);
    }

    if let Some(timeout) = &policy.timeout {
        upstream.timeout = Some(Timeout {
            connect: timeout.connect,
            send: timeout.send,
            read: timeout.read,
        });
    }

    if let Some(pass_host) = &policy.pass_host {
        upstream.pass_host = Some(parse_pass_host(pass_host).with_field("passHost")?);
    }

    upstream.retries = policy.retries.or(upstream.retries);
    upstream.upstream_host = policy.upstream_host.clone();
    Ok(())
}

fn parse_pass_host(s: &str) -> Result<PassHost, Error> {
    match s {
        "pass" => Ok(PassHost::Pass),
        "node" => Ok(PassHost::Node),
        "rewrite" => Ok(PassHost::Rewrite),
        _ => Err(Error::new(format!("unknown pass host mode: {s}"))),
    }
}

/// The upstreams and plugins for a single routing rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RuleBackends {
    pub upstream: Option<Upstream>,
    pub upstreams: Vec<Upstream>,

    /// A `traffic-split` across `upstreams` or, if no backend resolved, a
    /// `fault-injection` that fails every request.
    pub plugins: Plugins,

    pub websocket: bool,
}

/// Resolve every backend of a rule.
///
/// The first backend that resolves becomes the primary upstream. Any others
/// become secondary upstreams and a `traffic-split` plugin sends each its
/// share of traffic by weight. Backends that can't be resolved are logged and
/// skipped; a rule left without any backend fails every request with a 500.
pub(crate) fn rule_backends(
    ctx: &TranslateContext,
    names: &ObjectNames,
    rule: usize,
    labels: &Labels,
    backends: &[BackendRef],
    field: &'static str,
    default_scheme: Scheme,
) -> RuleBackends {
    let mut resolved = vec![];
    for (i, backend) in backends.iter().enumerate() {
        match resolve(ctx, backend).with_field_index(field, i) {
            Ok(r) => resolved.push((i, backend.weight, r)),
            Err(e) => tracing::warn!(
                namespace = names.namespace,
                name = names.name,
                rule,
                error = %e,
                "skipping backend"
            ),
        }
    }

    let mut out = RuleBackends {
        websocket: resolved.iter().any(|(_, _, r)| r.websocket),
        ..Default::default()
    };

    let mut resolved = resolved.into_iter();
    let Some((_, primary_weight, primary)) = resolved.next() else {
        out.plugins
            .insert("fault-injection".to_string(), fault_injection());
        return out;
    };

    let mut primary = primary.upstream;
    primary.scheme.get_or_insert(default_scheme);
    out.upstream = Some(primary);

    let mut weighted = vec![];
    for (i, weight, r) in resolved {
        let mut upstream = r.upstream;
        upstream.metadata = names.metadata(names.upstream(rule, i), labels);
        upstream.scheme.get_or_insert(default_scheme);

        weighted.push(json!({
            "upstream_id": upstream.metadata.id,
            "weight": weight,
        }));
        out.upstreams.push(upstream);
    }

    if !weighted.is_empty() {
        weighted.push(json!({ "weight": primary_weight }));
        out.plugins.insert(
            "traffic-split".to_string(),
            json!({ "rules": [{ "weighted_upstreams": weighted }] }),
        );
    }

    out
}

fn fault_injection() -> Value {
    json!({
        "abort": {
            "http_status": 500,
            "body": "No existing backendRef provided",
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::translate::test::{endpoint_slice, from_yaml, service};
    use tollgate_api::crd::ApisixUpstream;
    use tollgate_api::id::gen_id;
    use tollgate_api::resources::LbType;
    use tollgate_api::Duration;

    fn names() -> ObjectNames<'static> {
        ObjectNames::new("default", "route")
    }

    #[test]
    fn test_endpoint_granularity() {
        let ctx = TranslateContext::new()
            .with_service(service("default", "web", 80, None))
            .with_endpoint_slice(endpoint_slice("default", "web", &["10.1.0.2", "10.1.0.1"]));

        let resolved = resolve(
            &ctx,
            &BackendRef::new("default", "web", Some(PortRef::Number(80))),
        )
        .unwrap();

        // terminating endpoints are left out, nodes are sorted
        let hosts: Vec<_> = resolved
            .upstream
            .nodes
            .iter()
            .map(|n| (n.host.as_str(), n.port))
            .collect();
        assert_eq!(hosts, vec![("10.1.0.1", 8080), ("10.1.0.2", 8080)]);
        assert!(!resolved.websocket);
        assert_eq!(resolved.upstream.scheme, None);
    }

    #[test]
    fn test_service_granularity() {
        let ctx = TranslateContext::new().with_service(service("default", "web", 80, Some("https")));

        let backend = BackendRef::new("default", "web", Some(PortRef::Name("http".to_string())))
            .with_granularity(Some(ResolveGranularity::Service));
        let resolved = resolve(&ctx, &backend).unwrap();

        assert_eq!(
            resolved.upstream.nodes,
            vec![UpstreamNode {
                host: "10.96.0.10".to_string(),
                port: 80,
                weight: NODE_WEIGHT,
            }]
        );
        assert_eq!(resolved.upstream.scheme, Some(Scheme::Https));
    }

    #[test]
    fn test_websocket_app_protocol() {
        let ctx = TranslateContext::new()
            .with_service(service("default", "ws", 80, Some("kubernetes.io/ws")));
        let resolved = resolve(&ctx, &BackendRef::new("default", "ws", None)).unwrap();

        assert!(resolved.websocket);
        assert_eq!(resolved.upstream.scheme, Some(Scheme::Http));
    }

    #[test]
    fn test_external_name() {
        let svc = from_yaml(
            r#"
apiVersion: v1
kind: Service
metadata:
  name: httpbin
  namespace: default
spec:
  type: ExternalName
  externalName: httpbin.org
"#,
        );
        let ctx = TranslateContext::new().with_service(svc);

        let resolved = resolve(
            &ctx,
            &BackendRef::new("default", "httpbin", Some(PortRef::Number(443))),
        )
        .unwrap();
        assert_eq!(resolved.upstream.nodes[0].host, "httpbin.org");
        assert_eq!(resolved.upstream.nodes[0].port, 443);
    }

    #[test]
    fn test_missing_service_and_port() {
        let ctx = TranslateContext::new().with_service(service("default", "web", 80, None));

        let err = resolve(&ctx, &BackendRef::new("default", "nope", None)).unwrap_err();
        assert_eq!(err.message(), "service default/nope not found");

        let err = resolve(
            &ctx,
            &BackendRef::new("default", "web", Some(PortRef::Number(81))),
        )
        .unwrap_err();
        assert_eq!(err.message(), "port 81 not found on service default/web");
    }

    #[test]
    fn test_upstream_policy() {
        let policy: ApisixUpstream = from_yaml(
            r#"
apiVersion: apisix.apache.org/v2
kind: ApisixUpstream
metadata:
  name: web
  namespace: default
spec:
  loadbalancer:
    type: chash
    hashOn: header
    key: x-user
  retries: 3
  timeout:
    connect: 5s
    read: 10s
  passHost: node
"#,
        );
        let ctx = TranslateContext::new()
            .with_service(service("default", "web", 80, None))
            .with_upstream(policy);

        let upstream = resolve(&ctx, &BackendRef::new("default", "web", None))
            .unwrap()
            .upstream;
        assert_eq!(upstream.lb, LbType::ConsistentHash);
        assert_eq!(upstream.hash_on.as_deref(), Some("header"));
        assert_eq!(upstream.key.as_deref(), Some("x-user"));
        assert_eq!(upstream.retries, Some(3));
        assert_eq!(upstream.pass_host, Some(PassHost::Node));
        assert_eq!(
            upstream.timeout,
            Some(Timeout {
                connect: Some(Duration::from_secs(5)),
                send: None,
                read: Some(Duration::from_secs(10)),
            })
        );
    }

    #[test]
    fn test_invalid_upstream_policy() {
        let policy: ApisixUpstream = from_yaml(
            r#"
apiVersion: apisix.apache.org/v2
kind: ApisixUpstream
metadata:
  name: web
  namespace: default
spec:
  loadbalancer:
    type: random
"#,
        );
        let ctx = TranslateContext::new()
            .with_service(service("default", "web", 80, None))
            .with_upstream(policy);

        let err = resolve(&ctx, &BackendRef::new("default", "web", None)).unwrap_err();
        assert_eq!(err.path(), "upstream.loadbalancer.type");
    }

    #[test]
    fn test_traffic_split() {
        let ctx = TranslateContext::new()
            .with_service(service("default", "v1", 80, None))
            .with_service(service("default", "v2", 80, None));

        let backends = vec![
            BackendRef::new("default", "v1", None).with_weight(70),
            BackendRef::new("default", "v2", None).with_weight(30),
        ];
        let labels = Labels::new();
        let out = rule_backends(
            &ctx,
            &names(),
            0,
            &labels,
            &backends,
            "backendRefs",
            Scheme::Http,
        );

        assert!(out.upstream.is_some());
        assert_eq!(out.upstreams.len(), 1);

        let secondary_id = gen_id("default_route_0_1");
        assert_eq!(out.upstreams[0].metadata.id, secondary_id);
        assert_eq!(out.upstreams[0].metadata.name, "default_route_0_1");
        assert_eq!(
            out.plugins.get("traffic-split"),
            Some(&json!({
                "rules": [{
                    "weighted_upstreams": [
                        {"upstream_id": secondary_id, "weight": 30},
                        {"weight": 70},
                    ]
                }]
            }))
        );
    }

    #[test]
    fn test_zero_weight_backend_kept() {
        let ctx = TranslateContext::new()
            .with_service(service("default", "v1", 80, None))
            .with_service(service("default", "v2", 80, None));

        let backends = vec![
            BackendRef::new("default", "v1", None).with_weight(1),
            BackendRef::new("default", "v2", None).with_weight(0),
        ];
        let out = rule_backends(
            &ctx,
            &names(),
            0,
            &Labels::new(),
            &backends,
            "backendRefs",
            Scheme::Http,
        );

        let split = &out.plugins["traffic-split"]["rules"][0]["weighted_upstreams"];
        assert_eq!(split[0]["weight"], json!(0));
        assert_eq!(split[1], json!({"weight": 1}));
    }

    #[test]
    fn test_unresolvable_backends() {
        let ctx = TranslateContext::new().with_service(service("default", "v1", 80, None));

        // a missing backend is skipped, the rest still resolve
        let backends = vec![
            BackendRef::new("default", "missing", None),
            BackendRef::new("default", "v1", None),
        ];
        let out = rule_backends(
            &ctx,
            &names(),
            0,
            &Labels::new(),
            &backends,
            "backendRefs",
            Scheme::Grpc,
        );
        assert!(out.upstreams.is_empty());
        assert!(out.plugins.is_empty());
        assert_eq!(out.upstream.unwrap().scheme, Some(Scheme::Grpc));

        // with nothing left, every request fails
        let backends = vec![BackendRef::new("default", "missing", None)];
        let out = rule_backends(
            &ctx,
            &names(),
            0,
            &Labels::new(),
            &backends,
            "backendRefs",
            Scheme::Http,
        );
        assert!(out.upstream.is_none());
        assert_eq!(
            out.plugins["fault-injection"]["abort"]["http_status"],
            json!(500)
        );
    }
}
