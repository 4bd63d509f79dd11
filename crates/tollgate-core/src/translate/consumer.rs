//! Consumer translation.
//!
//! Consumers are named `{namespace}_{name}` after the object they come from.
//! Credentials are either written inline or read out of a Secret. A Secret
//! missing a required field fails the whole consumer, while optional numeric
//! and boolean fields that are missing or unparseable fall back to the
//! configured [CredentialDefaults].

use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tollgate_api::crd::{
    ApisixConsumer, ApisixConsumerAuthParameter, AuthParameter, BasicAuthValue, Consumer,
    HmacAuthValue, JwtAuthValue, KeyAuthValue, LdapAuthValue, WolfRbacValue,
};
use tollgate_api::id::compose_name;
use tollgate_api::resources::{self, Plugins, Resources};
use tollgate_api::{Error, ErrorContext};

use super::{Translate, TranslateContext, Translator};
use crate::config::CredentialDefaults;

/// Fields read out of a single Secret.
struct SecretFields<'a> {
    ctx: &'a TranslateContext,
    namespace: &'a str,
    name: &'a str,
}

impl<'a> SecretFields<'a> {
    fn new(ctx: &'a TranslateContext, namespace: &'a str, name: &'a str) -> Result<Self, Error> {
        if ctx.secret(namespace, name).is_none() {
            return Err(Error::missing_reference(format!(
                "secret {namespace}/{name} not found"
            )));
        }
        Ok(Self {
            ctx,
            namespace,
            name,
        })
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.ctx
            .secret_value(self.namespace, self.name, key)
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, Error> {
        self.optional(key)
            .ok_or_else(|| Error::field_not_found(key))
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.optional(key).and_then(|v| v.trim().parse().ok())
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.optional(key).and_then(|v| v.trim().parse().ok())
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.optional(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

// insert a value only if it's set.
fn insert_some(config: &mut Map<String, Value>, key: &str, value: Option<impl Into<Value>>) {
    if let Some(value) = value {
        config.insert(key.to_string(), value.into());
    }
}

/// Read a credential from its inline value or its Secret.
fn credential<T>(
    ctx: &TranslateContext,
    namespace: &str,
    param: &AuthParameter<T>,
    from_value: impl FnOnce(&T) -> Map<String, Value>,
    from_secret: impl FnOnce(&SecretFields) -> Result<Map<String, Value>, Error>,
) -> Result<Value, Error> {
    if let Some(value) = &param.value {
        return Ok(Value::Object(from_value(value)));
    }

    let secret_ref = param
        .secret_ref
        .as_ref()
        .ok_or_else(|| Error::new_static("one of value or secretRef is required"))?;
    let secret = SecretFields::new(ctx, namespace, &secret_ref.name).with_field("secretRef")?;
    Ok(Value::Object(from_secret(&secret)?))
}

fn basic_auth(v: &BasicAuthValue) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("username".to_string(), json!(v.username));
    config.insert("password".to_string(), json!(v.password));
    config
}

fn basic_auth_secret(s: &SecretFields) -> Result<Map<String, Value>, Error> {
    let mut config = Map::new();
    config.insert("username".to_string(), json!(s.required("username")?));
    config.insert("password".to_string(), json!(s.required("password")?));
    Ok(config)
}

fn key_auth(v: &KeyAuthValue) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("key".to_string(), json!(v.key));
    config
}

fn key_auth_secret(s: &SecretFields) -> Result<Map<String, Value>, Error> {
    let mut config = Map::new();
    config.insert("key".to_string(), json!(s.required("key")?));
    Ok(config)
}

fn wolf_rbac(v: &WolfRbacValue) -> Map<String, Value> {
    let mut config = Map::new();
    insert_some(&mut config, "server", v.server.clone());
    insert_some(&mut config, "appid", v.appid.clone());
    insert_some(&mut config, "header_prefix", v.header_prefix.clone());
    config
}

fn wolf_rbac_secret(s: &SecretFields) -> Result<Map<String, Value>, Error> {
    let mut config = Map::new();
    insert_some(&mut config, "server", s.optional("server"));
    insert_some(&mut config, "appid", s.optional("appid"));
    insert_some(&mut config, "header_prefix", s.optional("header_prefix"));
    Ok(config)
}

fn jwt_auth(v: &JwtAuthValue, defaults: &CredentialDefaults) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("key".to_string(), json!(v.key));
    insert_some(&mut config, "secret", v.secret.clone());
    insert_some(&mut config, "public_key", v.public_key.clone());
    insert_some(&mut config, "private_key", v.private_key.clone());
    config.insert(
        "algorithm".to_string(),
        json!(v.algorithm.as_deref().unwrap_or(&defaults.jwt_algorithm)),
    );
    config.insert("exp".to_string(), json!(v.exp.unwrap_or(defaults.jwt_exp)));
    config.insert(
        "base64_secret".to_string(),
        json!(v.base64_secret.unwrap_or(false)),
    );
    config.insert(
        "lifetime_grace_period".to_string(),
        json!(v
            .lifetime_grace_period
            .unwrap_or(defaults.jwt_lifetime_grace_period)),
    );
    config
}

fn jwt_auth_secret(
    s: &SecretFields,
    defaults: &CredentialDefaults,
) -> Result<Map<String, Value>, Error> {
    let value = JwtAuthValue {
        key: s.required("key")?,
        secret: s.optional("secret"),
        public_key: s.optional("public_key"),
        private_key: s.optional("private_key"),
        algorithm: s.optional("algorithm"),
        exp: s.int("exp"),
        base64_secret: s.bool("base64_secret"),
        lifetime_grace_period: s.int("lifetime_grace_period"),
    };
    Ok(jwt_auth(&value, defaults))
}

fn hmac_auth(v: &HmacAuthValue, defaults: &CredentialDefaults) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("key_id".to_string(), json!(v.key_id));
    config.insert("secret_key".to_string(), json!(v.secret_key));
    config.insert(
        "algorithm".to_string(),
        json!(v.algorithm.as_deref().unwrap_or(&defaults.hmac_algorithm)),
    );
    config.insert(
        "clock_skew".to_string(),
        json!(v.clock_skew.unwrap_or(defaults.hmac_clock_skew)),
    );
    if !v.signed_headers.is_empty() {
        config.insert("signed_headers".to_string(), json!(v.signed_headers));
    }
    config.insert(
        "keep_headers".to_string(),
        json!(v.keep_headers.unwrap_or(false)),
    );
    config.insert(
        "encode_uri_params".to_string(),
        json!(v.encode_uri_params.unwrap_or(true)),
    );
    config.insert(
        "validate_request_body".to_string(),
        json!(v.validate_request_body.unwrap_or(false)),
    );
    config.insert(
        "max_req_body".to_string(),
        json!(v.max_req_body.unwrap_or(defaults.hmac_max_req_body)),
    );
    config
}

fn hmac_auth_secret(
    s: &SecretFields,
    defaults: &CredentialDefaults,
) -> Result<Map<String, Value>, Error> {
    let key_id = match s.optional("key_id") {
        Some(key_id) => key_id,
        None => s.required("access_key")?,
    };
    let value = HmacAuthValue {
        key_id,
        secret_key: s.required("secret_key")?,
        algorithm: s.optional("algorithm"),
        clock_skew: s.int("clock_skew"),
        signed_headers: s.list("signed_headers"),
        keep_headers: s.bool("keep_headers"),
        encode_uri_params: s.bool("encode_uri_params"),
        validate_request_body: s.bool("validate_request_body"),
        max_req_body: s.int("max_req_body"),
    };
    Ok(hmac_auth(&value, defaults))
}

fn ldap_auth(v: &LdapAuthValue) -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("user_dn".to_string(), json!(v.user_dn));
    config
}

fn ldap_auth_secret(s: &SecretFields) -> Result<Map<String, Value>, Error> {
    let mut config = Map::new();
    config.insert("user_dn".to_string(), json!(s.required("user_dn")?));
    Ok(config)
}

fn auth_plugins(
    ctx: &TranslateContext,
    namespace: &str,
    params: &ApisixConsumerAuthParameter,
    defaults: &CredentialDefaults,
) -> Result<Plugins, Error> {
    let mut plugins = Plugins::new();

    if let Some(param) = &params.basic_auth {
        let config = credential(ctx, namespace, param, basic_auth, basic_auth_secret)
            .with_field("basicAuth")?;
        plugins.insert("basic-auth".to_string(), config);
    }
    if let Some(param) = &params.key_auth {
        let config =
            credential(ctx, namespace, param, key_auth, key_auth_secret).with_field("keyAuth")?;
        plugins.insert("key-auth".to_string(), config);
    }
    if let Some(param) = &params.wolf_rbac {
        let config =
            credential(ctx, namespace, param, wolf_rbac, wolf_rbac_secret).with_field("wolfRBAC")?;
        plugins.insert("wolf-rbac".to_string(), config);
    }
    if let Some(param) = &params.jwt_auth {
        let config = credential(
            ctx,
            namespace,
            param,
            |v| jwt_auth(v, defaults),
            |s| jwt_auth_secret(s, defaults),
        )
        .with_field("jwtAuth")?;
        plugins.insert("jwt-auth".to_string(), config);
    }
    if let Some(param) = &params.hmac_auth {
        let config = credential(
            ctx,
            namespace,
            param,
            |v| hmac_auth(v, defaults),
            |s| hmac_auth_secret(s, defaults),
        )
        .with_field("hmacAuth")?;
        plugins.insert("hmac-auth".to_string(), config);
    }
    if let Some(param) = &params.ldap_auth {
        let config =
            credential(ctx, namespace, param, ldap_auth, ldap_auth_secret).with_field("ldapAuth")?;
        plugins.insert("ldap-auth".to_string(), config);
    }

    if plugins.is_empty() {
        return Err(Error::new_static("no authentication configured"));
    }
    Ok(plugins)
}

impl Translate for ApisixConsumer {
    fn translate(
        &self,
        translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();

        let plugins = auth_plugins(
            ctx,
            &namespace,
            &self.spec.auth_parameter,
            translator.credential_defaults(),
        )
        .with_fields("spec", "authParameter")?;

        Ok(Resources {
            consumers: vec![resources::Consumer {
                username: compose_name([namespace.as_str(), name.as_str()]),
                desc: String::new(),
                labels: translator.labels_for("ApisixConsumer", &namespace, &name),
                credentials: vec![],
                plugins,
            }],
            ..Default::default()
        })
    }
}

impl Translate for Consumer {
    fn translate(
        &self,
        translator: &Translator,
        ctx: &TranslateContext,
    ) -> Result<Resources, Error> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();

        let mut plugins = Plugins::new();
        for plugin in &self.spec.plugins {
            let config = plugin.config.clone().unwrap_or_default();
            plugins.insert(plugin.name.clone(), Value::Object(config));
        }

        let mut credentials = Vec::with_capacity(self.spec.credentials.len());
        for (i, credential) in self.spec.credentials.iter().enumerate() {
            let mut config = credential.config.clone().unwrap_or_default();
            if let Some(secret_ref) = &credential.secret_ref {
                let secret_namespace = secret_ref.namespace.as_deref().unwrap_or(&namespace);
                let values = ctx
                    .secret_values(secret_namespace, &secret_ref.name)
                    .ok_or_else(|| {
                        Error::missing_reference(format!(
                            "secret {secret_namespace}/{} not found",
                            secret_ref.name
                        ))
                    })
                    .with_field("secretRef")
                    .with_index(i)
                    .with_fields("spec", "credentials")?;
                for (key, value) in values {
                    config.insert(key, Value::String(value));
                }
            }

            credentials.push(resources::Credential {
                name: credential
                    .name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("{}-{i}", credential.credential_type)),
                credential_type: credential.credential_type.clone(),
                config,
            });
        }

        Ok(Resources {
            consumers: vec![resources::Consumer {
                username: compose_name([namespace.as_str(), name.as_str()]),
                desc: String::new(),
                labels: translator.labels_for("Consumer", &namespace, &name),
                credentials,
                plugins,
            }],
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::translate::test::from_yaml;
    use tollgate_api::label::LABEL_KIND;
    use tollgate_api::ErrorKind;

    fn consumer(auth: &str) -> ApisixConsumer {
        from_yaml(&format!(
            r#"
apiVersion: apisix.apache.org/v2
kind: ApisixConsumer
metadata:
  name: jack
  namespace: default
spec:
  authParameter:
{auth}
"#
        ))
    }

    fn secret(pairs: &str) -> k8s_openapi::api::core::v1::Secret {
        from_yaml(&format!(
            r#"
apiVersion: v1
kind: Secret
metadata:
  name: creds
  namespace: default
stringData:
{pairs}
"#
        ))
    }

    #[test]
    fn test_inline_basic_auth() {
        let obj = consumer(
            r#"
    basicAuth:
      value:
        username: jack
        password: hunter2
"#,
        );
        let resources = obj
            .translate(&Translator::default(), &TranslateContext::new())
            .unwrap();

        let consumer = &resources.consumers[0];
        assert_eq!(consumer.username, "default_jack");
        assert_eq!(consumer.labels[LABEL_KIND], "ApisixConsumer");
        assert_eq!(
            consumer.plugins["basic-auth"],
            json!({"username": "jack", "password": "hunter2"})
        );
    }

    #[test]
    fn test_secret_missing_required_field() {
        let obj = consumer(
            r#"
    basicAuth:
      secretRef:
        name: creds
"#,
        );
        let ctx = TranslateContext::new().with_secret(secret("  username: jack"));

        let err = obj.translate(&Translator::default(), &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FieldNotFound);
        assert_eq!(err.message(), "password not found or invalid");
        assert_eq!(err.path(), "spec.authParameter.basicAuth");

        let err = obj
            .translate(&Translator::default(), &TranslateContext::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingReference);
        assert_eq!(err.path(), "spec.authParameter.basicAuth.secretRef");
    }

    #[test]
    fn test_secret_defaults() {
        let obj = consumer(
            r#"
    hmacAuth:
      secretRef:
        name: creds
"#,
        );
        let ctx = TranslateContext::new().with_secret(secret(
            r#"
  access_key: ak
  secret_key: sk
  clock_skew: soon
  signed_headers: "x-a, x-b"
"#,
        ));

        let resources = obj.translate(&Translator::default(), &ctx).unwrap();
        assert_eq!(
            resources.consumers[0].plugins["hmac-auth"],
            json!({
                "key_id": "ak",
                "secret_key": "sk",
                "algorithm": "hmac-sha256",
                "clock_skew": 0,
                "signed_headers": ["x-a", "x-b"],
                "keep_headers": false,
                "encode_uri_params": true,
                "validate_request_body": false,
                "max_req_body": 524288,
            })
        );
    }

    #[test]
    fn test_configured_defaults() {
        let obj = consumer(
            r#"
    jwtAuth:
      value:
        key: user-key
        secret: shh
"#,
        );
        let mut config = Config::default();
        config.credential_defaults.jwt_exp = 3600;
        let translator = Translator::new(&config);

        let resources = obj.translate(&translator, &TranslateContext::new()).unwrap();
        assert_eq!(
            resources.consumers[0].plugins["jwt-auth"],
            json!({
                "key": "user-key",
                "secret": "shh",
                "algorithm": "HS256",
                "exp": 3600,
                "base64_secret": false,
                "lifetime_grace_period": 0,
            })
        );
    }

    #[test]
    fn test_no_auth() {
        let obj = consumer("    {}");
        let err = obj
            .translate(&Translator::default(), &TranslateContext::new())
            .unwrap_err();
        assert_eq!(err.path(), "spec.authParameter");
    }

    #[test]
    fn test_consumer_credentials() {
        let obj: Consumer = from_yaml(
            r#"
apiVersion: apisix.apache.org/v1alpha1
kind: Consumer
metadata:
  name: jack
  namespace: default
spec:
  gatewayRef:
    name: gateway
  credentials:
    - type: key-auth
      name: primary
      config:
        key: inline-key
    - type: basic-auth
      secretRef:
        name: creds
  plugins:
    - name: limit-count
      config:
        count: 5
"#,
        );
        let ctx = TranslateContext::new().with_secret(secret(
            r#"
  username: jack
  password: hunter2
"#,
        ));

        let resources = obj.translate(&Translator::default(), &ctx).unwrap();
        let consumer = &resources.consumers[0];
        assert_eq!(consumer.username, "default_jack");
        assert_eq!(consumer.labels[LABEL_KIND], "Consumer");

        let credentials: Vec<_> = consumer
            .credentials
            .iter()
            .map(|c| (c.name.as_str(), c.credential_type.as_str(), Value::Object(c.config.clone())))
            .collect();
        assert_eq!(
            credentials,
            vec![
                ("primary", "key-auth", json!({"key": "inline-key"})),
                (
                    "basic-auth-1",
                    "basic-auth",
                    json!({"password": "hunter2", "username": "jack"})
                ),
            ]
        );
        assert_eq!(consumer.plugins.len(), 1);
        assert_eq!(consumer.plugins["limit-count"], json!({"count": 5}));

        let err = obj
            .translate(&Translator::default(), &TranslateContext::new())
            .unwrap_err();
        assert_eq!(err.path(), "spec.credentials[1].secretRef");
    }

    #[test]
    fn test_credentials_of_the_same_type() {
        let obj: Consumer = from_yaml(
            r#"
apiVersion: apisix.apache.org/v1alpha1
kind: Consumer
metadata:
  name: jack
  namespace: default
spec:
  credentials:
    - type: key-auth
      name: one
      config:
        key: key-one
    - type: key-auth
      name: two
      config:
        key: key-two
"#,
        );

        let resources = obj
            .translate(&Translator::default(), &TranslateContext::new())
            .unwrap();
        let consumer = &resources.consumers[0];
        assert!(consumer.plugins.is_empty());

        let keys: Vec<_> = consumer
            .credentials
            .iter()
            .map(|c| (c.name.as_str(), c.config["key"].clone()))
            .collect();
        assert_eq!(keys, vec![("one", json!("key-one")), ("two", json!("key-two"))]);

        assert_eq!(
            serde_json::to_value(&consumer.credentials[0]).unwrap(),
            json!({"name": "one", "type": "key-auth", "config": {"key": "key-one"}})
        );
    }
}
