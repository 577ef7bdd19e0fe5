use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter over the Hyper legacy client (HTTP/1.1).
///
/// Forwarded requests travel scheme-http to backend targets; the adapter
/// pins the Host header from the request authority and buffers response
/// bodies so the response chain can transform them. Retries and circuit
/// breaking are layered above this in the gateway core.
pub struct HttpClientAdapter {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { client })
    }
}

impl Default for HttpClientAdapter {
    fn default() -> Self {
        Self::new().expect("http client construction is infallible")
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<Full<Bytes>>,
    ) -> HttpClientResult<Response<Bytes>> {
        let authority = req
            .uri()
            .authority()
            .ok_or_else(|| {
                HttpClientError::InvalidRequest("outgoing URI has no host".to_string())
            })?
            .to_string();
        if let Ok(host) = HeaderValue::from_str(&authority) {
            req.headers_mut().insert(header::HOST, host);
        }

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let outgoing = Request::from_parts(parts, body);

        let response = self
            .client
            .request(outgoing)
            .await
            .map_err(|e| HttpClientError::Connection(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| HttpClientError::Body(e.to_string()))?
            .to_bytes();

        // the buffered body is re-framed by Content-Length downstream
        parts.headers.remove(header::TRANSFER_ENCODING);

        Ok(Response::from_parts(parts, bytes))
    }

    async fn probe(&self, url: &str, probe_timeout: Duration) -> HttpClientResult<StatusCode> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .version(Version::HTTP_11)
            .body(Full::new(Bytes::new()))
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        match timeout(probe_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                // drain the body so the connection can be reused
                let _ = response.into_body().collect().await;
                Ok(status)
            }
            Ok(Err(e)) => Err(HttpClientError::Connection(e.to_string())),
            Err(_) => Err(HttpClientError::Timeout(probe_timeout)),
        }
    }
}

impl HttpClientAdapter {
    /// Fire a JSON POST, used by the logging plugin's shipping path.
    pub async fn post_json(&self, url: &str, body: Bytes) -> HttpClientResult<Response<Bytes>> {
        let request = Request::builder()
            .method("POST")
            .uri(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(body))
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        self.send_request(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        assert!(HttpClientAdapter::new().is_ok());
    }

    #[tokio::test]
    async fn test_send_request_requires_authority() {
        let client = HttpClientAdapter::new().unwrap();
        let req = Request::builder()
            .uri("/relative/only")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert!(matches!(
            client.send_request(req).await,
            Err(HttpClientError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_connection_error() {
        let client = HttpClientAdapter::new().unwrap();
        // TEST-NET-1 address, nothing listens there; either refused or timeout
        let result = client
            .probe("http://192.0.2.1:9/health", Duration::from_millis(200))
            .await;
        assert!(result.is_err());
    }
}
