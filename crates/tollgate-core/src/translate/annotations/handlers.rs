use serde_json::{json, Map, Value};
use tollgate_api::resources::Plugins;
use tollgate_api::Error;

use super::{Annotations, Handler};

/// `enable-cors`, with optional `cors-allow-origin`, `cors-allow-methods`, and
/// `cors-allow-headers`.
#[derive(Debug, Clone, Copy)]
pub struct Cors;

impl Handler for Cors {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn handle(&self, annotations: &Annotations, plugins: &mut Plugins) -> Result<(), Error> {
        if !annotations.get_bool("enable-cors") {
            return Ok(());
        }

        let config = json!({
            "allow_origins": annotations.get("cors-allow-origin").unwrap_or("*"),
            "allow_methods": annotations.get("cors-allow-methods").unwrap_or("*"),
            "allow_headers": annotations.get("cors-allow-headers").unwrap_or("*"),
        });
        plugins.insert("cors".to_string(), config);
        Ok(())
    }
}

/// `allowlist-source-range` and `blocklist-source-range`.
#[derive(Debug, Clone, Copy)]
pub struct IpRestriction;

impl Handler for IpRestriction {
    fn name(&self) -> &'static str {
        "ip-restriction"
    }

    fn handle(&self, annotations: &Annotations, plugins: &mut Plugins) -> Result<(), Error> {
        let allow = annotations.get_list("allowlist-source-range");
        let block = annotations.get_list("blocklist-source-range");

        let mut config = Map::new();
        if !allow.is_empty() {
            config.insert("whitelist".to_string(), json!(allow));
        }
        if !block.is_empty() {
            config.insert("blacklist".to_string(), json!(block));
        }

        if !config.is_empty() {
            plugins.insert("ip-restriction".to_string(), Value::Object(config));
        }
        Ok(())
    }
}

/// `rewrite-target`, or `rewrite-target-regex` with
/// `rewrite-target-regex-template`.
#[derive(Debug, Clone, Copy)]
pub struct ProxyRewrite;

impl Handler for ProxyRewrite {
    fn name(&self) -> &'static str {
        "proxy-rewrite"
    }

    fn handle(&self, annotations: &Annotations, plugins: &mut Plugins) -> Result<(), Error> {
        let mut config = Map::new();

        if let Some(target) = annotations.get("rewrite-target") {
            config.insert("uri".to_string(), json!(target));
        }

        if let Some(pattern) = annotations.get("rewrite-target-regex") {
            regex::Regex::new(pattern)
                .map_err(|e| Error::new(format!("rewrite-target-regex: invalid regex: {e}")))?;
            let template = annotations.get("rewrite-target-regex-template").ok_or_else(|| {
                Error::new_static("rewrite-target-regex requires rewrite-target-regex-template")
            })?;
            config.insert("regex_uri".to_string(), json!([pattern, template]));
        }

        if !config.is_empty() {
            plugins.insert("proxy-rewrite".to_string(), Value::Object(config));
        }
        Ok(())
    }
}

/// `http-to-https`, or `http-redirect` with an optional `http-redirect-code`.
#[derive(Debug, Clone, Copy)]
pub struct Redirect;

impl Handler for Redirect {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn handle(&self, annotations: &Annotations, plugins: &mut Plugins) -> Result<(), Error> {
        if annotations.get_bool("http-to-https") {
            plugins.insert("redirect".to_string(), json!({ "http_to_https": true }));
            return Ok(());
        }

        let Some(uri) = annotations.get("http-redirect") else {
            return Ok(());
        };
        let code = annotations.get_int("http-redirect-code")?.unwrap_or(301);
        if !(300..400).contains(&code) {
            return Err(Error::new(format!(
                "http-redirect-code: {code} is not a redirect status"
            )));
        }

        plugins.insert(
            "redirect".to_string(),
            json!({ "uri": uri, "ret_code": code }),
        );
        Ok(())
    }
}

/// `enable-csrf` with `csrf-key`.
#[derive(Debug, Clone, Copy)]
pub struct Csrf;

impl Handler for Csrf {
    fn name(&self) -> &'static str {
        "csrf"
    }

    fn handle(&self, annotations: &Annotations, plugins: &mut Plugins) -> Result<(), Error> {
        if !annotations.get_bool("enable-csrf") {
            return Ok(());
        }

        let key = annotations
            .get("csrf-key")
            .ok_or_else(|| Error::new_static("enable-csrf requires csrf-key"))?;
        plugins.insert("csrf".to_string(), json!({ "key": key }));
        Ok(())
    }
}

/// `auth-uri`, with `auth-ssl-verify` and the `auth-request-headers`,
/// `auth-upstream-headers`, and `auth-client-headers` lists.
#[derive(Debug, Clone, Copy)]
pub struct ForwardAuth;

impl Handler for ForwardAuth {
    fn name(&self) -> &'static str {
        "forward-auth"
    }

    fn handle(&self, annotations: &Annotations, plugins: &mut Plugins) -> Result<(), Error> {
        let Some(uri) = annotations.get("auth-uri") else {
            return Ok(());
        };

        let ssl_verify = annotations.get("auth-ssl-verify") != Some("false");
        plugins.insert(
            "forward-auth".to_string(),
            json!({
                "uri": uri,
                "ssl_verify": ssl_verify,
                "request_headers": annotations.get_list("auth-request-headers"),
                "upstream_headers": annotations.get_list("auth-upstream-headers"),
                "client_headers": annotations.get_list("auth-client-headers"),
            }),
        );
        Ok(())
    }
}

/// `enable-response-rewrite`, with the status code, body, and header changes
/// to make to every response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseRewrite;

impl Handler for ResponseRewrite {
    fn name(&self) -> &'static str {
        "response-rewrite"
    }

    fn handle(&self, annotations: &Annotations, plugins: &mut Plugins) -> Result<(), Error> {
        if !annotations.get_bool("enable-response-rewrite") {
            return Ok(());
        }

        let mut config = Map::new();
        if let Some(code) = annotations.get_int("response-rewrite-status-code")? {
            config.insert("status_code".to_string(), json!(code));
        }
        if let Some(body) = annotations.get("response-rewrite-body") {
            config.insert("body".to_string(), json!(body));
            config.insert(
                "body_base64".to_string(),
                json!(annotations.get_bool("response-rewrite-body-base64")),
            );
        }

        let mut headers = Map::new();
        let add = annotations.get_list("response-rewrite-add-header");
        if !add.is_empty() {
            headers.insert("add".to_string(), json!(add));
        }
        let set = annotations.get_list("response-rewrite-set-header");
        if !set.is_empty() {
            let mut pairs = Map::new();
            for header in set {
                let (name, value) = header.split_once(':').ok_or_else(|| {
                    Error::new(format!(
                        "response-rewrite-set-header: {header:?} is not a name:value pair"
                    ))
                })?;
                pairs.insert(name.trim().to_string(), json!(value.trim()));
            }
            headers.insert("set".to_string(), Value::Object(pairs));
        }
        let remove = annotations.get_list("response-rewrite-remove-header");
        if !remove.is_empty() {
            headers.insert("remove".to_string(), json!(remove));
        }
        if !headers.is_empty() {
            config.insert("headers".to_string(), Value::Object(headers));
        }

        plugins.insert("response-rewrite".to_string(), Value::Object(config));
        Ok(())
    }
}

/// `auth-type`: either `basicAuth` or `keyAuth`.
#[derive(Debug, Clone, Copy)]
pub struct AuthType;

impl Handler for AuthType {
    fn name(&self) -> &'static str {
        "auth-type"
    }

    fn handle(&self, annotations: &Annotations, plugins: &mut Plugins) -> Result<(), Error> {
        let plugin = match annotations.get("auth-type") {
            None => return Ok(()),
            Some("basicAuth") => "basic-auth",
            Some("keyAuth") => "key-auth",
            Some(other) => return Err(Error::new(format!("unknown auth-type: {other}"))),
        };

        plugins.insert(plugin.to_string(), json!({}));
        Ok(())
    }
}
