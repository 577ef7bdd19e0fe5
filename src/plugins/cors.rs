//! Cross-origin resource sharing.
//!
//! Preflight OPTIONS requests with an Origin header short-circuit with 204
//! and the full set of allow headers; simple requests get the allow-origin
//! headers added during the response phase.
use async_trait::async_trait;
use eyre::Result;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::Deserialize;

use crate::plugins::{Plugin, ProxyResponse, RequestContext};

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "HEAD"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_headers() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_age() -> u64 {
    86_400
}

#[derive(Debug, Deserialize)]
struct CorsOptions {
    #[serde(default = "default_origins")]
    origins: Vec<String>,
    #[serde(default = "default_methods")]
    methods: Vec<String>,
    #[serde(default = "default_headers")]
    headers: Vec<String>,
    #[serde(default)]
    exposed_headers: Vec<String>,
    #[serde(default)]
    credentials: bool,
    #[serde(default = "default_max_age")]
    max_age: u64,
}

pub struct CorsPlugin {
    options: CorsOptions,
}

impl CorsPlugin {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        Ok(Self {
            options: serde_json::from_value(options.clone())?,
        })
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.options.origins.iter().any(|o| o == "*" || o == origin)
    }

    fn cors_headers(&self, origin: &str, preflight: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let allow_origin = if self.options.origins.iter().any(|o| o == "*")
            && !self.options.credentials
        {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(origin).unwrap_or(HeaderValue::from_static("*"))
        };
        headers.insert(http::header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);

        if self.options.credentials {
            headers.insert(
                http::header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }

        if preflight {
            if let Ok(methods) = HeaderValue::from_str(&self.options.methods.join(", ")) {
                headers.insert(http::header::ACCESS_CONTROL_ALLOW_METHODS, methods);
            }
            if let Ok(allow) = HeaderValue::from_str(&self.options.headers.join(", ")) {
                headers.insert(http::header::ACCESS_CONTROL_ALLOW_HEADERS, allow);
            }
            headers.insert(
                http::header::ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from(self.options.max_age),
            );
        }

        if !self.options.exposed_headers.is_empty() {
            if let Ok(exposed) = HeaderValue::from_str(&self.options.exposed_headers.join(", ")) {
                headers.insert(http::header::ACCESS_CONTROL_EXPOSE_HEADERS, exposed);
            }
        }

        headers
    }
}

#[async_trait]
impl Plugin for CorsPlugin {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn access(&self, ctx: &mut RequestContext) -> Result<()> {
        if ctx.method != Method::OPTIONS {
            return Ok(());
        }
        let Some(origin) = ctx.header("origin").map(String::from) else {
            return Ok(());
        };

        if !self.origin_allowed(&origin) {
            ctx.set_short_circuit(ProxyResponse::error(
                StatusCode::FORBIDDEN,
                "origin not allowed",
            ));
            return Ok(());
        }

        let mut resp = ProxyResponse::new(StatusCode::NO_CONTENT);
        resp.headers = self.cors_headers(&origin, true);
        ctx.set_short_circuit(resp);
        Ok(())
    }

    async fn response(&self, ctx: &mut RequestContext, resp: &mut ProxyResponse) -> Result<()> {
        let Some(origin) = ctx.header("origin").map(String::from) else {
            return Ok(());
        };
        if !self.origin_allowed(&origin) {
            return Ok(());
        }
        for (name, value) in self.cors_headers(&origin, false) {
            if let Some(name) = name {
                resp.headers.insert(name, value);
            }
        }
        Ok(())
    }
}
