//! SSL translation.
//!
//! Every source of TLS config (Ingress `spec.tls`, Gateway listeners, and
//! `ApisixTls`) ends up pointing at a Secret holding a certificate and key.
//! An SSL's ID is derived from the owning object and the certificate, so the
//! same certificate served for several hosts collapses into one SSL with all
//! of their SNIs.

use kube::ResourceExt;
use tollgate_api::crd::ApisixTls;
use tollgate_api::id::{gen_id_from, hex_digest};
use tollgate_api::label::Labels;
use tollgate_api::resources::{Certificate, ClientCa, Metadata, Resources, Ssl, SslType};
use tollgate_api::{Error, ErrorContext};

use super::{Translate, TranslateContext, Translator};

const CERT_KEYS: [&str; 2] = ["tls.crt", "cert"];
const KEY_KEYS: [&str; 2] = ["tls.key", "key"];
const CA_KEYS: [&str; 2] = ["ca.crt", "cert"];

/// A certificate and key read out of a Secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyPair {
    pub certificate: String,
    pub key: String,
}

fn first_value(
    ctx: &TranslateContext,
    namespace: &str,
    name: &str,
    keys: &[&str],
) -> Option<String> {
    keys.iter().find_map(|key| {
        ctx.secret_value(namespace, name, key)
            .filter(|v| !v.is_empty())
    })
}

/// Read a certificate and key from a Secret.
pub(crate) fn key_pair(ctx: &TranslateContext, namespace: &str, name: &str) -> Result<KeyPair, Error> {
    if ctx.secret(namespace, name).is_none() {
        return Err(Error::missing_reference(format!(
            "secret {namespace}/{name} not found"
        )));
    }

    let certificate = first_value(ctx, namespace, name, &CERT_KEYS)
        .ok_or_else(|| Error::field_not_found("tls.crt"))?;
    let key = first_value(ctx, namespace, name, &KEY_KEYS)
        .ok_or_else(|| Error::field_not_found("tls.key"))?;

    Ok(KeyPair { certificate, key })
}

/// Build SSLs for a key pair, one per host. Hosts that share a certificate
/// share an ID, so pushing them with [Resources::push_ssl] merges their SNIs.
pub(crate) fn ssls(
    owner_namespace: &str,
    owner_name: &str,
    labels: &Labels,
    hosts: &[String],
    pair: &KeyPair,
    client: Option<ClientCa>,
) -> Vec<Ssl> {
    let id = gen_id_from([
        owner_namespace,
        owner_name,
        &hex_digest(pair.certificate.as_bytes()),
    ]);

    hosts
        .iter()
        .map(|host| Ssl {
            metadata: Metadata {
                id: id.clone(),
                name: String::new(),
                desc: String::new(),
                labels: labels.clone(),
            },
            ssl_type: SslType::Server,
            snis: vec![host.clone()],
            certificates: vec![Certificate {
                certificate: pair.certificate.clone(),
                key: pair.key.clone(),
            }],
            client: client.clone(),
        })
        .collect()
}

impl Translate for ApisixTls {
    fn translate(
        &self,
        translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();
        let labels = translator.labels_for("ApisixTls", &namespace, &name);

        let secret = &self.spec.secret;
        let secret_namespace = secret.namespace.as_deref().unwrap_or(&namespace);
        let pair = key_pair(ctx, secret_namespace, &secret.name).with_fields("spec", "secret")?;

        let client = match &self.spec.client {
            Some(client) => {
                let ca_secret = &client.ca_secret;
                let ca_namespace = ca_secret.namespace.as_deref().unwrap_or(&namespace);
                if ctx.secret(ca_namespace, &ca_secret.name).is_none() {
                    return Err(Error::missing_reference(format!(
                        "secret {ca_namespace}/{} not found",
                        ca_secret.name
                    )))
                    .with_fields("client", "caSecret")
                    .with_field("spec");
                }
                let ca = first_value(ctx, ca_namespace, &ca_secret.name, &CA_KEYS)
                    .ok_or_else(|| Error::field_not_found("ca.crt"))
                    .with_fields("client", "caSecret")
                    .with_field("spec")?;

                Some(ClientCa {
                    ca,
                    depth: client.depth,
                    skip_mtls_uri_regex: client.skip_mtls_uri_regex.clone(),
                })
            }
            None => None,
        };

        let mut resources = Resources::default();
        for ssl in ssls(&namespace, &name, &labels, &self.spec.hosts, &pair, client) {
            resources.push_ssl(ssl);
        }
        Ok(resources)
    }
}
