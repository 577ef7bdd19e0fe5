//! Request payload size enforcement.
//!
//! The declared Content-Length is checked first; without one the buffered
//! body length is used. Exceeding the configured cap yields 413.
use async_trait::async_trait;
use eyre::Result;
use http::{Method, StatusCode};
use serde::Deserialize;

use crate::plugins::{Plugin, ProxyResponse, RequestContext};

fn default_allowed_payload_size() -> u64 {
    128
}

fn default_size_unit() -> String {
    "megabytes".to_string()
}

#[derive(Debug, Deserialize)]
struct SizeLimitOptions {
    #[serde(default = "default_allowed_payload_size")]
    allowed_payload_size: u64,
    /// bytes | kilobytes | megabytes | gigabytes
    #[serde(default = "default_size_unit")]
    size_unit: String,
    #[serde(default)]
    require_content_length: bool,
}

pub struct RequestSizeLimitingPlugin {
    options: SizeLimitOptions,
    max_bytes: u64,
}

impl RequestSizeLimitingPlugin {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let options: SizeLimitOptions = serde_json::from_value(options.clone())?;
        let multiplier: u64 = match options.size_unit.as_str() {
            "bytes" => 1,
            "kilobytes" => 1024,
            "megabytes" => 1024 * 1024,
            "gigabytes" => 1024 * 1024 * 1024,
            other => eyre::bail!("unknown size_unit '{other}'"),
        };
        let max_bytes = options.allowed_payload_size.saturating_mul(multiplier);
        Ok(Self { options, max_bytes })
    }

    fn too_large(&self) -> ProxyResponse {
        ProxyResponse::error(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!(
                "request body too large, maximum allowed size is {} {}",
                self.options.allowed_payload_size, self.options.size_unit
            ),
        )
        .with_header(
            http::header::RETRY_AFTER,
            http::HeaderValue::from_static("0"),
        )
    }
}

#[async_trait]
impl Plugin for RequestSizeLimitingPlugin {
    fn name(&self) -> &'static str {
        "request-size-limiting"
    }

    async fn access(&self, ctx: &mut RequestContext) -> Result<()> {
        let declared: Option<u64> = ctx
            .header("content-length")
            .and_then(|v| v.parse().ok());

        let body_bearing = ctx.method == Method::POST
            || ctx.method == Method::PUT
            || ctx.method == Method::PATCH;
        if self.options.require_content_length && declared.is_none() && body_bearing {
            ctx.set_short_circuit(ProxyResponse::error(
                StatusCode::LENGTH_REQUIRED,
                "missing Content-Length header",
            ));
            return Ok(());
        }

        let size = declared.unwrap_or(ctx.body.len() as u64);
        if size > self.max_bytes {
            ctx.set_short_circuit(self.too_large());
        }
        Ok(())
    }
}
