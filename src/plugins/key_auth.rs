//! API-key authentication against a configured consumer map.
use std::collections::HashMap;

use async_trait::async_trait;
use eyre::Result;
use http::{Method, StatusCode};
use serde::Deserialize;

use crate::plugins::{Consumer, Plugin, ProxyResponse, RequestContext, build_query, query_pairs};

fn default_key_names() -> Vec<String> {
    vec!["X-API-Key".to_string(), "apikey".to_string()]
}

fn default_true() -> bool {
    true
}

/// A configured consumer: either a bare username or a record.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum KeyConsumer {
    Username(String),
    Record {
        username: String,
        #[serde(default)]
        custom_id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct KeyAuthOptions {
    #[serde(default = "default_key_names")]
    key_names: Vec<String>,
    #[serde(default = "default_true")]
    key_in_header: bool,
    #[serde(default = "default_true")]
    key_in_query: bool,
    #[serde(default = "default_true")]
    hide_credentials: bool,
    #[serde(default)]
    anonymous: Option<String>,
    /// key → consumer.
    #[serde(default)]
    keys: HashMap<String, KeyConsumer>,
    #[serde(default = "default_true")]
    run_on_preflight: bool,
}

pub struct KeyAuthPlugin {
    options: KeyAuthOptions,
}

impl KeyAuthPlugin {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        Ok(Self {
            options: serde_json::from_value(options.clone())?,
        })
    }

    fn extract_key(&self, ctx: &RequestContext) -> Option<String> {
        if self.options.key_in_header {
            for name in &self.options.key_names {
                if let Some(value) = ctx.header(name) {
                    return Some(value.to_string());
                }
            }
        }
        if self.options.key_in_query {
            for name in &self.options.key_names {
                if let Some(value) = ctx.query_param(&name.to_lowercase()) {
                    return Some(value);
                }
            }
        }
        None
    }

    fn strip_credentials(&self, ctx: &mut RequestContext) {
        for name in &self.options.key_names {
            ctx.headers.remove(name.as_str());
        }

        let Some(query) = ctx.uri.query() else { return };
        let lowered: Vec<String> = self
            .options
            .key_names
            .iter()
            .map(|n| n.to_lowercase())
            .collect();
        let kept: Vec<(String, String)> = query_pairs(query)
            .into_iter()
            .filter(|(k, _)| !lowered.contains(k))
            .collect();

        let path = ctx.uri.path().to_string();
        let rebuilt = if kept.is_empty() {
            path
        } else {
            format!("{path}?{}", build_query(&kept))
        };
        if let Ok(uri) = rebuilt.parse() {
            ctx.uri = uri;
        }
    }
}

#[async_trait]
impl Plugin for KeyAuthPlugin {
    fn name(&self) -> &'static str {
        "key-auth"
    }

    async fn access(&self, ctx: &mut RequestContext) -> Result<()> {
        if ctx.method == Method::OPTIONS && !self.options.run_on_preflight {
            return Ok(());
        }

        let Some(api_key) = self.extract_key(ctx) else {
            if let Some(anonymous) = &self.options.anonymous {
                ctx.consumer = Some(Consumer {
                    username: Some(anonymous.clone()),
                    ..Default::default()
                });
                ctx.authenticated = false;
                return Ok(());
            }
            ctx.set_short_circuit(ProxyResponse::error(
                StatusCode::UNAUTHORIZED,
                "missing API key",
            ));
            return Ok(());
        };

        let Some(consumer) = self.options.keys.get(&api_key) else {
            ctx.set_short_circuit(ProxyResponse::error(
                StatusCode::UNAUTHORIZED,
                "invalid API key",
            ));
            return Ok(());
        };

        ctx.consumer = Some(match consumer {
            KeyConsumer::Username(username) => Consumer {
                username: Some(username.clone()),
                ..Default::default()
            },
            KeyConsumer::Record {
                username,
                custom_id,
            } => Consumer {
                username: Some(username.clone()),
                custom_id: custom_id.clone(),
                user_id: None,
            },
        });
        ctx.authenticated = true;
        ctx.credential = Some(api_key);

        if self.options.hide_credentials {
            self.strip_credentials(ctx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;
    use crate::plugins::test_support::context;

    fn plugin() -> KeyAuthPlugin {
        KeyAuthPlugin::from_options(&serde_json::json!({
            "keys": {
                "secret-1": "alice",
                "secret-2": { "username": "bob", "custom_id": "b-42" },
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let mut ctx = context(Method::GET, "/api");
        plugin().access(&mut ctx).await.unwrap();
        assert_eq!(ctx.short_circuit.unwrap().status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_key_rejected() {
        let mut ctx = context(Method::GET, "/api");
        ctx.headers
            .insert("x-api-key", HeaderValue::from_static("nope"));
        plugin().access(&mut ctx).await.unwrap();
        assert_eq!(ctx.short_circuit.unwrap().status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_header_key_sets_consumer_and_hides_credential() {
        let mut ctx = context(Method::GET, "/api");
        ctx.headers
            .insert("x-api-key", HeaderValue::from_static("secret-2"));

        plugin().access(&mut ctx).await.unwrap();
        assert!(ctx.short_circuit.is_none());
        let consumer = ctx.consumer.as_ref().unwrap();
        assert_eq!(consumer.username.as_deref(), Some("bob"));
        assert_eq!(consumer.custom_id.as_deref(), Some("b-42"));
        assert_eq!(ctx.credential.as_deref(), Some("secret-2"));
        assert!(ctx.headers.get("x-api-key").is_none());
    }

    #[tokio::test]
    async fn test_query_key_accepted_and_stripped() {
        let mut ctx = context(Method::GET, "/api?apikey=secret-1&x=1");

        plugin().access(&mut ctx).await.unwrap();
        assert!(ctx.short_circuit.is_none());
        assert_eq!(
            ctx.consumer.unwrap().username.as_deref(),
            Some("alice")
        );
        assert_eq!(ctx.uri.query(), Some("x=1"));
    }

    #[tokio::test]
    async fn test_anonymous_fallback() {
        let plugin = KeyAuthPlugin::from_options(&serde_json::json!({
            "keys": {},
            "anonymous": "guest",
        }))
        .unwrap();
        let mut ctx = context(Method::GET, "/api");

        plugin.access(&mut ctx).await.unwrap();
        assert!(ctx.short_circuit.is_none());
        assert!(!ctx.authenticated);
    }
}
