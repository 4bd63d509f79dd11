//! Ingress translation.
//!
//! Every path of every rule becomes its own Service, numbered in the order the
//! paths appear across all rules, with a single route. A `defaultBackend`
//! becomes one more catch-all Service after the rest. Everything Ingress can't
//! express natively is read from annotations.

use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use kube::ResourceExt;
use tollgate_api::crd::PortRef;
use tollgate_api::label::Labels;
use tollgate_api::resources::{Expr, Plugins, Resources, Route, Scheme, Service};
use tollgate_api::{Error, ErrorContext};

use super::annotations::{
    Annotations, UpstreamAnnotations, ENABLE_WEBSOCKET, PLUGIN_CONFIG_NAME, USE_REGEX,
};
use super::backend::{rule_backends, BackendRef};
use super::http_route::{check_regex, path_uris};
use super::plugins::{self, Composer};
use super::tls::{key_pair, ssls};
use super::{priority, MatchShape, ObjectNames, PathKind, Translate, TranslateContext, Translator};

/// Settings shared by every route of an Ingress.
struct IngressSettings {
    use_regex: bool,
    websocket: bool,
    upstream: UpstreamAnnotations,
    plugins: Plugins,
    shared: Option<Plugins>,
}

impl IngressSettings {
    fn new(
        translator: &Translator,
        ctx: &TranslateContext,
        namespace: &str,
        annotations: &Annotations,
    ) -> Result<Self, Error> {
        let upstream = UpstreamAnnotations::parse(annotations)?;
        let shared = annotations
            .get(PLUGIN_CONFIG_NAME)
            .map(|name| plugins::plugin_config(ctx, namespace, name))
            .transpose()?;

        Ok(Self {
            use_regex: annotations.get_bool(USE_REGEX),
            websocket: annotations.get_bool(ENABLE_WEBSOCKET),
            upstream,
            plugins: translator.annotation_registry().plugins(annotations),
            shared,
        })
    }
}

/// A single path to translate, with the host of the rule it came from.
struct IngressPath<'a> {
    host: Option<&'a str>,
    kind: PathKind,
    path: &'a str,
    backend: &'a IngressBackend,
}

impl Translate for Ingress {
    fn translate(
        &self,
        translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();
        let names = ObjectNames::new(&namespace, &name);
        let labels = translator.labels_for("Ingress", &namespace, &name);

        let annotations = translator.annotations(self.annotations());
        let settings = IngressSettings::new(translator, ctx, &namespace, &annotations)
            .with_fields("metadata", "annotations")?;

        let Some(spec) = &self.spec else {
            return Ok(Resources::default());
        };

        let mut paths = vec![];
        for (i, rule) in spec.rules.iter().flatten().enumerate() {
            for (j, path) in rule.http.iter().flat_map(|h| &h.paths).enumerate() {
                let value = path.path.as_deref().unwrap_or("/");
                let kind = path_kind(&path.path_type, settings.use_regex);
                if kind == PathKind::Regex {
                    check_regex(value)
                        .with_field("path")
                        .with_field_index("paths", j)
                        .with_field("http")
                        .with_field_index("rules", i)
                        .with_field("spec")?;
                }
                paths.push(IngressPath {
                    host: rule.host.as_deref(),
                    kind,
                    path: value,
                    backend: &path.backend,
                });
            }
        }
        if let Some(backend) = &spec.default_backend {
            paths.push(IngressPath {
                host: None,
                kind: PathKind::None,
                path: "/",
                backend,
            });
        }

        let mut resources = Resources::default();
        for (index, path) in paths.iter().enumerate() {
            resources
                .services
                .push(translate_path(ctx, &names, &labels, &settings, index, path));
        }

        for (i, tls) in spec.tls.iter().flatten().enumerate() {
            let Some(secret_name) = &tls.secret_name else {
                continue;
            };
            let hosts = tls.hosts.clone().unwrap_or_default();
            let pair = key_pair(ctx, &namespace, secret_name)
                .with_field("secretName")
                .with_index(i)
                .with_fields("spec", "tls")?;
            for ssl in ssls(&namespace, &name, &labels, &hosts, &pair, None) {
                resources.push_ssl(ssl);
            }
        }

        Ok(resources)
    }
}

fn path_kind(path_type: &str, use_regex: bool) -> PathKind {
    match path_type {
        _ if use_regex => PathKind::Regex,
        "Exact" => PathKind::Exact,
        _ => PathKind::Prefix,
    }
}

fn backend_ref(namespace: &str, backend: &IngressBackend) -> Option<BackendRef> {
    let Some(service) = &backend.service else {
        tracing::warn!(%namespace, "ignoring Ingress backend that isn't a Service");
        return None;
    };

    let port = service.port.as_ref().and_then(|p| match (&p.name, p.number) {
        (Some(name), _) if !name.is_empty() => Some(PortRef::Name(name.clone())),
        (_, Some(number)) => Some(PortRef::Number(number)),
        _ => None,
    });
    Some(BackendRef::new(namespace, &service.name, port))
}

fn translate_path(
    ctx: &TranslateContext,
    names: &ObjectNames,
    labels: &Labels,
    settings: &IngressSettings,
    index: usize,
    path: &IngressPath,
) -> Service {
    let backends: Vec<_> = backend_ref(names.namespace, path.backend).into_iter().collect();
    let mut backends = rule_backends(ctx, names, index, labels, &backends, "backend", Scheme::Http);
    for upstream in backends.upstream.iter_mut().chain(&mut backends.upstreams) {
        settings.upstream.apply(upstream);
    }

    let hosts: Vec<String> = path.host.map(String::from).into_iter().collect();
    let mut route = Route {
        metadata: names.metadata(names.route(index, 0), labels),
        uris: path_uris(path.kind, path.path),
        ..Default::default()
    };
    if path.kind == PathKind::Regex {
        route.vars.push(Expr::new("uri", "~~", path.path));
    }
    route.priority = Some(priority(&MatchShape {
        hostnames: &hosts,
        path_kind: path.kind,
        path: path.path,
        rule_index: index,
        ..Default::default()
    }));
    if settings.websocket || backends.websocket {
        route.enable_websocket = Some(true);
    }

    let mut composer = Composer::new();
    if let Some(shared) = &settings.shared {
        composer.shared(shared.clone());
    }
    composer.annotations(settings.plugins.clone());
    route.plugins = composer.build();

    Service {
        metadata: names.metadata(names.service(index), labels),
        hosts,
        upstream: backends.upstream,
        upstreams: backends.upstreams,
        plugins: backends.plugins,
        routes: vec![route],
        stream_routes: vec![],
    }
}
