//! The canonical gateway configuration model.
//!
//! A [Resources] bundle is what translation produces and what gets pushed to a
//! gateway. The shape of every type here matches the declarative config format
//! the gateway's sync tooling accepts, so a bundle can be serialized and handed
//! over as-is.

use std::collections::BTreeSet;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::label::Labels;
use crate::shared::Duration;

/// Plugin configuration, keyed by plugin name.
///
/// Plugin configs are opaque documents and are carried through translation
/// verbatim. Key order is preserved.
pub type Plugins = serde_json::Map<String, Value>;

/// Identity and provenance shared by every resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(
        default,
        rename = "description",
        skip_serializing_if = "String::is_empty"
    )]
    pub desc: String,

    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// A full or partial set of gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssls: Vec<Ssl>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumers: Vec<Consumer>,

    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub global_rules: Plugins,

    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub plugin_metadata: Plugins,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
            && self.ssls.is_empty()
            && self.consumers.is_empty()
            && self.global_rules.is_empty()
            && self.plugin_metadata.is_empty()
    }

    /// Add an SSL to this bundle.
    ///
    /// An SSL with the same ID as one that's already present is merged into
    /// the existing entry by taking the union of their SNIs instead of being
    /// added twice.
    pub fn push_ssl(&mut self, ssl: Ssl) {
        match self
            .ssls
            .iter_mut()
            .find(|existing| existing.metadata.id == ssl.metadata.id)
        {
            Some(existing) => existing.merge_snis(&ssl.snis),
            None => self.ssls.push(ssl),
        }
    }

    /// Merge another bundle into this one.
    ///
    /// Services and consumers are appended, SSLs are merged with
    /// [push_ssl][Self::push_ssl], and plugins in `global_rules` and
    /// `plugin_metadata` from `other` overwrite plugins with the same name.
    pub fn extend(&mut self, other: Resources) {
        self.services.extend(other.services);
        self.consumers.extend(other.consumers);
        for ssl in other.ssls {
            self.push_ssl(ssl);
        }
        self.global_rules.extend(other.global_rules);
        self.plugin_metadata.extend(other.plugin_metadata);
    }

    /// Count the individual resources in this bundle, counting nested routes
    /// and stream routes separately from their services.
    pub fn count(&self) -> usize {
        let services: usize = self
            .services
            .iter()
            .map(|s| 1 + s.routes.len() + s.stream_routes.len())
            .sum();

        services
            + self.ssls.len()
            + self.consumers.len()
            + self.global_rules.len()
            + self.plugin_metadata.len()
    }
}

/// The kinds of resource a bundle can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Service,
    Route,
    StreamRoute,
    Ssl,
    Consumer,
    GlobalRule,
    PluginMetadata,
}

impl ResourceType {
    pub const ALL: [ResourceType; 7] = [
        ResourceType::Service,
        ResourceType::Route,
        ResourceType::StreamRoute,
        ResourceType::Ssl,
        ResourceType::Consumer,
        ResourceType::GlobalRule,
        ResourceType::PluginMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Service => "service",
            ResourceType::Route => "route",
            ResourceType::StreamRoute => "stream_route",
            ResourceType::Ssl => "ssl",
            ResourceType::Consumer => "consumer",
            ResourceType::GlobalRule => "global_rule",
            ResourceType::PluginMetadata => "plugin_metadata",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown resource type: {s}"))
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A logical service: a primary upstream, the routes that send traffic to it,
/// and any plugins that apply to all of those routes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Service {
    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    /// The primary upstream. The gateway model only allows one upstream per
    /// service; traffic is split onto [upstreams][Self::upstreams] with a
    /// `traffic-split` plugin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Upstream>,

    /// Secondary upstreams, referenced by ID from a traffic split.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<Upstream>,

    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub plugins: Plugins,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stream_routes: Vec<StreamRoute>,
}

/// An HTTP route.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Route {
    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_addrs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<Expr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_websocket: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Timeout>,

    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub plugins: Plugins,
}

/// A route for L4 (TCP or UDP) traffic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamRoute {
    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_addr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,

    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub plugins: Plugins,
}

/// Connect, send, and read timeouts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Timeout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Duration>,
}

impl Timeout {
    pub fn is_empty(&self) -> bool {
        self.connect.is_none() && self.send.is_none() && self.read.is_none()
    }
}

/// A single route match expression, like `["http_x_user", "==", "admin"]`.
///
/// Expressions serialize as a JSON array of `[subject, op, value]`, with a
/// `"!"` inserted before the operator when the expression is negated.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub subject: String,
    pub negate: bool,
    pub op: String,
    pub value: Value,
}

impl Expr {
    pub fn new(subject: impl Into<String>, op: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            subject: subject.into(),
            negate: false,
            op: op.into(),
            value: value.into(),
        }
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.negate { 4 } else { 3 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.subject)?;
        if self.negate {
            seq.serialize_element("!")?;
        }
        seq.serialize_element(&self.op)?;
        seq.serialize_element(&self.value)?;
        seq.end()
    }
}

struct ExprVisitor;

impl<'de> Visitor<'de> for ExprVisitor {
    type Value = Expr;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("an expression array like [subject, op, value]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Expr, A::Error> {
        let subject: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let mut op: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;

        let mut negate = false;
        if op == "!" {
            negate = true;
            op = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(2, &self))?;
        }

        let value: Value = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(if negate { 3 } else { 2 }, &self))?;

        Ok(Expr {
            subject,
            negate,
            op,
            value,
        })
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(ExprVisitor)
    }
}

/// An upstream: a set of nodes and how to balance traffic across them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Upstream {
    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(default, rename = "type")]
    pub lb: LbType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_on: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<Scheme>,

    #[serde(default)]
    pub nodes: Vec<UpstreamNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Timeout>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_host: Option<PassHost>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpstreamNode {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

/// Load balancing algorithm for an [Upstream].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LbType {
    #[default]
    #[serde(rename = "roundrobin")]
    RoundRobin,
    #[serde(rename = "chash")]
    ConsistentHash,
    #[serde(rename = "ewma")]
    Ewma,
    #[serde(rename = "least_conn")]
    LeastConn,
}

impl std::str::FromStr for LbType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roundrobin" => Ok(LbType::RoundRobin),
            "chash" => Ok(LbType::ConsistentHash),
            "ewma" => Ok(LbType::Ewma),
            "least_conn" => Ok(LbType::LeastConn),
            _ => Err(format!("unknown load balancer type: {s}")),
        }
    }
}

/// The protocol used to talk to an [Upstream].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
    Grpc,
    Grpcs,
    Tcp,
    Udp,
    Tls,
}

impl std::str::FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "grpc" => Ok(Scheme::Grpc),
            "grpcs" => Ok(Scheme::Grpcs),
            "tcp" => Ok(Scheme::Tcp),
            "udp" => Ok(Scheme::Udp),
            "tls" => Ok(Scheme::Tls),
            _ => Err(format!("unknown upstream scheme: {s}")),
        }
    }
}

/// How the `Host` header is set on requests to an [Upstream].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassHost {
    Pass,
    Node,
    Rewrite,
}

/// A TLS certificate and the SNIs it should be served for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Ssl {
    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(default, rename = "type")]
    pub ssl_type: SslType,

    #[serde(default)]
    pub snis: Vec<String>,

    #[serde(default)]
    pub certificates: Vec<Certificate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientCa>,
}

impl Ssl {
    /// Add SNIs to this SSL, keeping the list sorted and free of duplicates.
    pub fn merge_snis(&mut self, snis: &[String]) {
        let merged: BTreeSet<String> = self.snis.drain(..).chain(snis.iter().cloned()).collect();
        self.snis = merged.into_iter().collect();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslType {
    #[default]
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate: String,
    pub key: String,
}

/// mTLS configuration: the CA used to verify client certificates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCa {
    pub ca: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_mtls_uri_regex: Vec<String>,
}

/// A consumer of the gateway: an identity with credentials and plugins.
///
/// Consumers are identified by their username and have no ID.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Consumer {
    pub username: String,

    #[serde(
        default,
        rename = "description",
        skip_serializing_if = "String::is_empty"
    )]
    pub desc: String,

    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<Credential>,

    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub plugins: Plugins,
}

/// A named credential. The type is the auth plugin that checks it, and a
/// consumer may hold any number of credentials of the same type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub name: String,

    #[serde(rename = "type")]
    pub credential_type: String,

    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub config: Plugins,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_expr_json() {
        let expr = Expr::new("http_x_user", "==", "admin");
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!(["http_x_user", "==", "admin"])
        );

        let negated = Expr::new("arg_debug", "~~", "^on$").negated();
        assert_eq!(
            serde_json::to_value(&negated).unwrap(),
            json!(["arg_debug", "!", "~~", "^on$"])
        );

        let parsed: Expr = serde_json::from_value(json!(["arg_debug", "!", "~~", "^on$"])).unwrap();
        assert_eq!(parsed, negated);

        assert!(serde_json::from_value::<Expr>(json!(["arg_debug", "=="])).is_err());
    }

    #[test]
    fn test_service_json_shape() {
        let service = Service {
            metadata: Metadata {
                id: "abc".to_string(),
                name: "default_foo_0".to_string(),
                ..Default::default()
            },
            upstream: Some(Upstream {
                scheme: Some(Scheme::Http),
                nodes: vec![UpstreamNode {
                    host: "10.0.0.1".to_string(),
                    port: 8080,
                    weight: 100,
                }],
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&service).unwrap(),
            json!({
                "id": "abc",
                "name": "default_foo_0",
                "upstream": {
                    "type": "roundrobin",
                    "scheme": "http",
                    "nodes": [{"host": "10.0.0.1", "port": 8080, "weight": 100}],
                },
            })
        );
    }

    #[test]
    fn test_push_ssl_merges_snis() {
        let ssl = |id: &str, snis: &[&str]| Ssl {
            metadata: Metadata {
                id: id.to_string(),
                ..Default::default()
            },
            snis: snis.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };

        let mut resources = Resources::default();
        resources.push_ssl(ssl("a", &["foo.example.com"]));
        resources.push_ssl(ssl("a", &["bar.example.com", "foo.example.com"]));
        resources.push_ssl(ssl("b", &["baz.example.com"]));

        assert_eq!(resources.ssls.len(), 2);
        assert_eq!(
            resources.ssls[0].snis,
            vec!["bar.example.com", "foo.example.com"]
        );
    }

    #[test]
    fn test_resource_type_strings() {
        for t in ResourceType::ALL {
            assert_eq!(t.as_str().parse::<ResourceType>().unwrap(), t);
        }
        assert!("upstream".parse::<ResourceType>().is_err());
    }
}
