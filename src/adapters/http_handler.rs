use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::body::Body as AxumBody;
use bytes::Bytes;
use hyper::{Request, Response};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    core::GatewayService, plugins::RequestContext, tracing_setup,
};

/// Axum ingress adapter: turns an incoming request into a [`RequestContext`],
/// drives the gateway core, and writes the buffered response back.
#[derive(Clone)]
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self { gateway }
    }

    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: SocketAddr,
    ) -> Response<AxumBody> {
        let start_time = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let method = req.method().clone();
        let uri = req.uri().clone();

        let span = tracing_setup::create_request_span(
            method.as_str(),
            uri.path(),
            &request_id,
            &client_addr.ip().to_string(),
        );

        let gateway = Arc::clone(&self.gateway);
        let handling = {
            let request_id = request_id.clone();
            let span = span.clone();
            async move {
                let (parts, body) = req.into_parts();
                // the whole body is buffered; the size-limiting plugin is
                // the policy layer for oversized payloads
                let body = match axum::body::to_bytes(body, usize::MAX).await {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to read request body");
                        Bytes::new()
                    }
                };

                let ctx = RequestContext::new(
                    request_id,
                    parts.method,
                    parts.uri,
                    parts.headers,
                    body,
                    client_addr.ip(),
                );

                gateway.handle(ctx).await
            }
            .instrument(span)
        };

        // detached so a client abort cannot cancel slot release, breaker
        // accounting, or the log phase mid-flight
        let response = match tokio::spawn(handling).await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(error = %error, "request task failed");
                crate::plugins::ProxyResponse::error(
                    http::StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error",
                )
            }
        };

        let duration = start_time.elapsed();
        span.record("http.status_code", response.status.as_u16());
        span.record("duration_ms", duration.as_millis() as u64);
        tracing::info!(
            parent: &span,
            status = response.status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "request completed"
        );

        let mut builder = Response::builder().status(response.status);
        if let Some(headers) = builder.headers_mut() {
            *headers = response.headers;
        }
        builder
            .body(AxumBody::from(response.body))
            .unwrap_or_else(|_| Response::new(AxumBody::empty()))
    }
}
