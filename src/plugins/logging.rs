//! Access logging.
//!
//! Builds a structured record per request during the log phase and emits it
//! through `tracing`. When `http_endpoint` is configured the record is also
//! POSTed there best-effort: shipping runs on a detached task and failures
//! are counted, never surfaced to the request.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use serde::Deserialize;

use crate::{
    adapters::http_client::HttpClientAdapter,
    plugins::{Plugin, ProxyResponse, RequestContext},
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct LoggingOptions {
    #[serde(default)]
    http_endpoint: Option<String>,
    #[serde(default = "default_true")]
    include_request: bool,
    #[serde(default = "default_true")]
    include_response: bool,
    #[serde(default = "default_true")]
    include_latencies: bool,
    #[serde(default = "default_true")]
    include_consumer: bool,
    #[serde(default)]
    custom_fields: serde_json::Map<String, serde_json::Value>,
}

pub struct LoggingPlugin {
    options: LoggingOptions,
    client: Option<Arc<HttpClientAdapter>>,
    ship_failures: Arc<AtomicU64>,
}

impl LoggingPlugin {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let options: LoggingOptions = serde_json::from_value(options.clone())?;
        let client = match &options.http_endpoint {
            Some(_) => Some(Arc::new(HttpClientAdapter::new()?)),
            None => None,
        };
        Ok(Self {
            options,
            client,
            ship_failures: Arc::new(AtomicU64::new(0)),
        })
    }

    fn build_entry(&self, ctx: &RequestContext, resp: &ProxyResponse) -> serde_json::Value {
        let mut entry = serde_json::Map::new();
        entry.insert(
            "timestamp".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        entry.insert(
            "request_id".to_string(),
            serde_json::Value::String(ctx.request_id.clone()),
        );

        if self.options.include_request {
            entry.insert(
                "request".to_string(),
                serde_json::json!({
                    "method": ctx.method.as_str(),
                    "uri": ctx.uri.to_string(),
                    "path": ctx.uri.path(),
                    "size": ctx.body.len(),
                }),
            );
            entry.insert(
                "client_ip".to_string(),
                serde_json::Value::String(ctx.forwarded_client_ip().to_string()),
            );
        }

        if self.options.include_response {
            entry.insert(
                "response".to_string(),
                serde_json::json!({
                    "status": resp.status.as_u16(),
                    "size": resp.body.len(),
                }),
            );
        }

        if self.options.include_latencies {
            let total_ms = ctx
                .finished_at
                .map(|finished| finished.duration_since(ctx.received_at))
                .unwrap_or_else(|| ctx.received_at.elapsed())
                .as_millis() as u64;
            let proxy_ms = match (ctx.upstream_sent_at, ctx.upstream_received_at) {
                (Some(sent), Some(received)) => {
                    received.duration_since(sent).as_millis() as u64
                }
                _ => 0,
            };
            entry.insert(
                "latencies".to_string(),
                serde_json::json!({ "request": total_ms, "proxy": proxy_ms }),
            );
        }

        if self.options.include_consumer {
            if let Some(consumer) = &ctx.consumer {
                entry.insert(
                    "consumer".to_string(),
                    serde_json::json!({
                        "username": consumer.username,
                        "custom_id": consumer.custom_id,
                    }),
                );
            }
            if ctx.authenticated {
                entry.insert("authenticated".to_string(), serde_json::Value::Bool(true));
            }
        }

        if !ctx.service_name.is_empty() {
            entry.insert(
                "service".to_string(),
                serde_json::json!({ "name": ctx.service_name }),
            );
        }
        if !ctx.route_name.is_empty() {
            entry.insert(
                "route".to_string(),
                serde_json::json!({ "name": ctx.route_name }),
            );
        }
        if !ctx.upstream_name.is_empty() {
            entry.insert(
                "upstream".to_string(),
                serde_json::json!({ "name": ctx.upstream_name }),
            );
        }

        for (key, value) in &self.options.custom_fields {
            entry.insert(key.clone(), value.clone());
        }

        serde_json::Value::Object(entry)
    }

    pub fn ship_failures(&self) -> u64 {
        self.ship_failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Plugin for LoggingPlugin {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn log(&self, ctx: &RequestContext, resp: &ProxyResponse) {
        let entry = self.build_entry(ctx, resp);
        tracing::info!(target: "portico::access_log", entry = %entry, "access");

        if let (Some(endpoint), Some(client)) = (&self.options.http_endpoint, &self.client) {
            let endpoint = endpoint.clone();
            let client = Arc::clone(client);
            let failures = Arc::clone(&self.ship_failures);
            let body = Bytes::from(entry.to_string());
            // detached so a slow log sink cannot stall the log phase
            tokio::spawn(async move {
                if let Err(error) = client.post_json(&endpoint, body).await {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(error = %error, "access log shipping failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::*;
    use crate::plugins::test_support::context;

    #[test]
    fn test_entry_sections_follow_flags() {
        let plugin = LoggingPlugin::from_options(&serde_json::json!({
            "include_response": false,
            "custom_fields": { "env": "test" },
        }))
        .unwrap();

        let mut ctx = context(Method::GET, "/api/users?x=1");
        ctx.service_name = "users".to_string();
        ctx.route_name = "users-route".to_string();
        let resp = ProxyResponse::new(StatusCode::OK);

        let entry = plugin.build_entry(&ctx, &resp);
        assert_eq!(entry["request"]["method"], "GET");
        assert_eq!(entry["request"]["path"], "/api/users");
        assert!(entry.get("response").is_none());
        assert_eq!(entry["service"]["name"], "users");
        assert_eq!(entry["env"], "test");
        assert!(entry.get("latencies").is_some());
    }

    #[test]
    fn test_consumer_section() {
        let plugin = LoggingPlugin::from_options(&serde_json::json!({})).unwrap();
        let mut ctx = context(Method::GET, "/x");
        ctx.consumer = Some(crate::plugins::Consumer {
            username: Some("alice".to_string()),
            custom_id: Some("a-1".to_string()),
            user_id: None,
        });
        ctx.authenticated = true;

        let entry = plugin.build_entry(&ctx, &ProxyResponse::new(StatusCode::OK));
        assert_eq!(entry["consumer"]["username"], "alice");
        assert_eq!(entry["authenticated"], true);
    }

    #[tokio::test]
    async fn test_log_without_endpoint_is_silent() {
        let plugin = LoggingPlugin::from_options(&serde_json::json!({})).unwrap();
        let ctx = context(Method::GET, "/x");
        plugin.log(&ctx, &ProxyResponse::new(StatusCode::OK)).await;
        assert_eq!(plugin.ship_failures(), 0);
    }
}
