#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{body::Body, extract::Request, response::Response};
use http::{HeaderMap, Method, StatusCode};
use portico::{
    adapters::HttpClientAdapter, config::GatewayConfig, core::GatewayService,
    plugins::{PluginRegistry, RequestContext},
};

/// An in-process backend that counts hits, reports its id, and echoes every
/// `x-*` request header back as `echo-<name>`.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn spawn_backend(id: &'static str, status: StatusCode) -> MockBackend {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_for_handler = Arc::clone(&hits);

    let app = axum::Router::new().fallback(move |req: Request| {
        let hits = Arc::clone(&hits_for_handler);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            let mut builder = Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .header("x-backend-id", id);
            for (name, value) in req.headers() {
                if name.as_str().starts_with("x-") {
                    builder = builder.header(format!("echo-{name}"), value);
                }
            }
            builder
                .body(Body::from(format!("{{\"backend\":\"{id}\"}}")))
                .unwrap()
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend { addr, hits }
}

/// Build a gateway service from a JSON-shaped config document.
pub fn gateway(config: serde_json::Value) -> GatewayService {
    let config: GatewayConfig = serde_json::from_value(config).unwrap();
    let registry = PluginRegistry::with_builtins();
    let client = Arc::new(HttpClientAdapter::new().unwrap());
    GatewayService::new(&config, &registry, client).unwrap()
}

/// A context as the ingress adapter would build it.
pub fn request(method: Method, uri: &str) -> RequestContext {
    RequestContext::new(
        "test-request".to_string(),
        method,
        uri.parse().unwrap(),
        HeaderMap::new(),
        bytes::Bytes::new(),
        "1.2.3.4".parse().unwrap(),
    )
}
