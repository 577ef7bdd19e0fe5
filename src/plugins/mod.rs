//! Plugin framework: the per-request context, the three-phase plugin
//! contract, and the built-in policy plugins.
//!
//! A plugin participates in any subset of three phases:
//! - `access`: before the upstream call; may mutate the request, attach a
//!   consumer identity, or short-circuit with a synthetic response.
//! - `response`: after the upstream call (or a short-circuit); may mutate
//!   the buffered response but never short-circuit.
//! - `log`: after the response has been flushed; side effects only.
pub mod chain;
pub mod cors;
pub mod ip_restriction;
pub mod jwt_auth;
pub mod key_auth;
pub mod logging;
pub mod rate_limiting;
pub mod registry;
pub mod request_transformer;
pub mod response_transformer;
pub mod size_limiting;

use std::{net::IpAddr, time::Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};

pub use chain::PluginChain;
pub use registry::PluginRegistry;

/// Identity attached to a request by an auth plugin.
#[derive(Debug, Clone, Default)]
pub struct Consumer {
    pub username: Option<String>,
    pub custom_id: Option<String>,
    pub user_id: Option<String>,
}

/// A buffered HTTP response flowing through the response phase.
///
/// Both upstream responses and plugin short-circuits use this shape so the
/// response chain treats them uniformly.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// JSON error body of the form `{"error": "<message>"}`.
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        let mut resp = Self::new(status);
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        resp.body = Bytes::from(body);
        resp
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace the body and fix up Content-Length.
    pub fn set_body(&mut self, body: Bytes) {
        if let Ok(len) = HeaderValue::from_str(&body.len().to_string()) {
            self.headers.insert(header::CONTENT_LENGTH, len);
        }
        self.body = body;
    }
}

/// Mutable per-request state threaded through the plugin chain.
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: IpAddr,

    pub service_name: String,
    pub route_name: String,
    pub upstream_name: String,

    pub consumer: Option<Consumer>,
    pub authenticated: bool,
    /// Credential presented by the client (api key), for rate limiting.
    pub credential: Option<String>,

    /// Set by an access-phase plugin to abort the chain with a synthetic
    /// response; the upstream is never contacted.
    pub short_circuit: Option<ProxyResponse>,
    /// Response headers queued by access-phase plugins (rate-limit quota
    /// headers), applied during the response phase.
    pub pending_response_headers: Vec<(HeaderName, HeaderValue)>,

    pub received_at: Instant,
    pub upstream_sent_at: Option<Instant>,
    pub upstream_received_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: IpAddr,
    ) -> Self {
        Self {
            request_id,
            method,
            uri,
            headers,
            body,
            client_ip,
            service_name: String::new(),
            route_name: String::new(),
            upstream_name: String::new(),
            consumer: None,
            authenticated: false,
            credential: None,
            short_circuit: None,
            pending_response_headers: Vec::new(),
            received_at: Instant::now(),
            upstream_sent_at: None,
            upstream_received_at: None,
            finished_at: None,
        }
    }

    /// Client address for policy decisions: leftmost X-Forwarded-For entry
    /// when present, else the socket address.
    pub fn forwarded_client_ip(&self) -> IpAddr {
        self.headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.client_ip)
    }

    /// Header value as a str, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Query parameter lookup over the raw query string.
    pub fn query_param(&self, name: &str) -> Option<String> {
        query_pairs(self.uri.query().unwrap_or(""))
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn set_short_circuit(&mut self, response: ProxyResponse) {
        self.short_circuit = Some(response);
    }
}

/// Split a raw query string into (key, value) pairs. Percent-decoding is
/// not applied; credential and token values are plain tokens.
pub(crate) fn query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Rebuild a query string from pairs, preserving order.
pub(crate) fn build_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// The three-phase plugin contract.
///
/// Default implementations are no-ops so a plugin only overrides the
/// phases it participates in. Access errors are mapped to a 500 by the
/// gateway; log errors are swallowed.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    async fn access(&self, _ctx: &mut RequestContext) -> eyre::Result<()> {
        Ok(())
    }

    async fn response(&self, _ctx: &mut RequestContext, _resp: &mut ProxyResponse) -> eyre::Result<()> {
        Ok(())
    }

    async fn log(&self, _ctx: &RequestContext, _resp: &ProxyResponse) {}
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs() {
        let pairs = query_pairs("a=1&b=2&flag");
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
        assert_eq!(build_query(&pairs), "a=1&b=2&flag");
    }

    #[test]
    fn test_forwarded_client_ip_prefers_leftmost_xff() {
        let mut ctx = test_support::context(Method::GET, "/x");
        assert_eq!(ctx.forwarded_client_ip().to_string(), "9.9.9.9");

        ctx.headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        assert_eq!(ctx.forwarded_client_ip().to_string(), "1.2.3.4");
    }

    #[test]
    fn test_error_response_shape() {
        let resp = ProxyResponse::error(StatusCode::NOT_FOUND, "route not found");
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.body.as_ref(), br#"{"error":"route not found"}"#);
    }

    #[test]
    fn test_set_body_updates_content_length() {
        let mut resp = ProxyResponse::new(StatusCode::OK);
        resp.set_body(Bytes::from_static(b"hello"));
        assert_eq!(resp.headers.get(header::CONTENT_LENGTH).unwrap(), "5");
    }
}
