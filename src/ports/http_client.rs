use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::{Request, Response};
use thiserror::Error;

/// Errors from outbound HTTP operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("body error: {0}")]
    Body(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Port for talking to backend targets.
///
/// Responses come back with fully buffered bodies; the gateway's response
/// phase mutates them in place. Probes are lightweight GETs used by the
/// health checker.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a request to a backend and buffer the response body.
    async fn send_request(
        &self,
        req: Request<Full<Bytes>>,
    ) -> HttpClientResult<Response<Bytes>>;

    /// Issue a GET probe and return the response status.
    async fn probe(&self, url: &str, timeout: Duration) -> HttpClientResult<StatusCode>;
}
