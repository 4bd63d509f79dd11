//! TCPRoute and UDPRoute translation.
//!
//! L4 routes have no matches of their own. Every rule becomes a Service with a
//! stream route for each listener port the route is attached to, or a single
//! portless stream route if no parent names a port.

use gateway_api::apis::experimental::tcproutes::TCPRoute;
use gateway_api::apis::experimental::udproutes::UDPRoute;
use kube::ResourceExt;
use tollgate_api::label::Labels;
use tollgate_api::resources::{Resources, Scheme, Service, StreamRoute};
use tollgate_api::{Error, ErrorContext};

use super::backend::{gateway_backend, rule_backends, BackendRef};
use super::{ObjectNames, Translate, TranslateContext, Translator};

// TCPRoute and UDPRoute have the same shape but no shared types.
macro_rules! impl_l4_translate {
    ($route:ty, $kind:literal, $scheme:expr) => {
        impl Translate for $route {
            fn translate(
                &self,
                translator: &Translator,
                ctx: &TranslateContext,
            ) -> Result<Resources, Error> {
                let namespace = self.namespace().unwrap_or_default();
                let name = self.name_any();
                let ports = parent_ports(self.spec.parent_refs.iter().flatten().map(|p| p.port))?;

                let rules: Vec<Vec<BackendRef>> = self
                    .spec
                    .rules
                    .iter()
                    .map(|rule| {
                        rule.backend_refs
                            .iter()
                            .flatten()
                            .filter_map(|b| {
                                gateway_backend(
                                    &namespace,
                                    b.group.as_deref(),
                                    b.kind.as_deref(),
                                    &b.name,
                                    b.namespace.as_deref(),
                                    b.port,
                                    b.weight,
                                )
                            })
                            .collect()
                    })
                    .collect();

                let labels = translator.labels_for($kind, &namespace, &name);
                Ok(stream_services(
                    ctx,
                    &ObjectNames::new(&namespace, &name),
                    &labels,
                    &ports,
                    &rules,
                    $scheme,
                ))
            }
        }
    };
}

impl_l4_translate!(TCPRoute, "TCPRoute", Scheme::Tcp);
impl_l4_translate!(UDPRoute, "UDPRoute", Scheme::Udp);

// the distinct listener ports named by a route's parents, in order.
fn parent_ports(ports: impl Iterator<Item = Option<i32>>) -> Result<Vec<u16>, Error> {
    let mut out: Vec<u16> = vec![];
    for (i, port) in ports.enumerate() {
        let Some(port) = port else {
            continue;
        };
        let port = u16::try_from(port)
            .map_err(|_| Error::new(format!("invalid port number: {port}")))
            .with_field("port")
            .with_field_index("parentRefs", i)
            .with_field("spec")?;
        if !out.contains(&port) {
            out.push(port);
        }
    }
    Ok(out)
}

fn stream_services(
    ctx: &TranslateContext,
    names: &ObjectNames,
    labels: &Labels,
    ports: &[u16],
    rules: &[Vec<BackendRef>],
    scheme: Scheme,
) -> Resources {
    let server_ports: Vec<Option<u16>> = if ports.is_empty() {
        vec![None]
    } else {
        ports.iter().copied().map(Some).collect()
    };

    let mut resources = Resources::default();
    for (i, backends) in rules.iter().enumerate() {
        let mut backends = rule_backends(ctx, names, i, labels, backends, "backendRefs", scheme);
        // the port's appProtocol describes HTTP traffic and never applies to
        // an L4 upstream.
        for upstream in backends.upstream.iter_mut().chain(&mut backends.upstreams) {
            upstream.scheme = Some(scheme);
        }
        // fault-injection only acts on HTTP requests. a stream service with
        // nothing to resolve is left without an upstream.
        backends.plugins.remove("fault-injection");

        let stream_routes = server_ports
            .iter()
            .enumerate()
            .map(|(j, port)| StreamRoute {
                metadata: names.metadata(names.route(i, j), labels),
                server_port: *port,
                ..Default::default()
            })
            .collect();

        resources.services.push(Service {
            metadata: names.metadata(names.service(i), labels),
            upstream: backends.upstream,
            upstreams: backends.upstreams,
            plugins: backends.plugins,
            stream_routes,
            ..Default::default()
        });
    }

    resources
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::translate::test::{endpoint_slice, from_yaml, service};
    use tollgate_api::id::gen_id;

    #[test]
    fn test_tcp_route() {
        let route: TCPRoute = from_yaml(
            r#"
apiVersion: gateway.networking.k8s.io/v1alpha2
kind: TCPRoute
metadata:
  name: db
  namespace: default
spec:
  parentRefs:
    - name: gateway
      port: 5432
    - name: other-gateway
      port: 5432
    - name: gateway
      port: 15432
  rules:
    - backendRefs:
        - name: postgres
          port: 80
"#,
        );
        let ctx = TranslateContext::new()
            .with_service(service("default", "postgres", 80, Some("http")))
            .with_endpoint_slice(endpoint_slice("default", "postgres", &["10.1.0.7"]));

        let resources = route.translate(&Translator::default(), &ctx).unwrap();
        assert_eq!(resources.services.len(), 1);

        let service = &resources.services[0];
        let upstream = service.upstream.as_ref().unwrap();
        assert_eq!(upstream.scheme, Some(Scheme::Tcp));
        assert_eq!(upstream.nodes[0].host, "10.1.0.7");
        assert!(service.routes.is_empty());

        let ports: Vec<_> = service.stream_routes.iter().map(|r| r.server_port).collect();
        assert_eq!(ports, vec![Some(5432), Some(15432)]);
        assert_eq!(
            service.stream_routes[1].metadata.id,
            gen_id("default_db_0_1")
        );
    }

    #[test]
    fn test_udp_route_without_ports() {
        let route: UDPRoute = from_yaml(
            r#"
apiVersion: gateway.networking.k8s.io/v1alpha2
kind: UDPRoute
metadata:
  name: dns
  namespace: kube-system
spec:
  parentRefs:
    - name: gateway
  rules:
    - backendRefs:
        - name: coredns
          port: 53
"#,
        );

        let resources = route
            .translate(&Translator::default(), &TranslateContext::new())
            .unwrap();
        let service = &resources.services[0];
        assert_eq!(service.stream_routes.len(), 1);
        assert_eq!(service.stream_routes[0].server_port, None);
        assert!(service.upstream.is_none());
        assert!(service.plugins.is_empty());
    }

    #[test]
    fn test_udp_route_backends() {
        let route: UDPRoute = from_yaml(
            r#"
apiVersion: gateway.networking.k8s.io/v1alpha2
kind: UDPRoute
metadata:
  name: dns
  namespace: default
spec:
  parentRefs:
    - name: gateway
      port: 53
  rules:
    - backendRefs:
        - name: coredns
          port: 80
        - name: missing
          port: 53
"#,
        );
        let ctx = TranslateContext::new()
            .with_service(service("default", "coredns", 80, None))
            .with_endpoint_slice(endpoint_slice("default", "coredns", &["10.1.0.53"]));

        let resources = route.translate(&Translator::default(), &ctx).unwrap();
        let service = &resources.services[0];
        let upstream = service.upstream.as_ref().unwrap();
        assert_eq!(upstream.scheme, Some(Scheme::Udp));
        assert_eq!(upstream.nodes[0].host, "10.1.0.53");
        assert!(!service.plugins.contains_key("fault-injection"));
        assert_eq!(service.stream_routes[0].server_port, Some(53));
    }
}
