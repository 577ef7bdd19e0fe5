//! Active health checking against live and dead backends.
mod common;

use std::{sync::Arc, time::Duration};

use http::StatusCode;
use portico::{
    adapters::{HealthChecker, HttpClientAdapter},
    config::UpstreamConfig,
    core::Upstream,
    ports::http_client::HttpClient,
};

use common::spawn_backend;

fn upstream_config(port: u16) -> UpstreamConfig {
    serde_json::from_value(serde_json::json!({
        "name": "pool",
        "targets": [{ "host": "127.0.0.1", "port": port }],
        "health_check": {
            "enabled": true,
            "path": "/health",
            "interval_secs": 1,
            "timeout_secs": 1,
            "healthy_threshold": 1,
            "unhealthy_threshold": 2,
        },
    }))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dead_target_flips_unhealthy() {
    // a port with nothing listening on it
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let upstream = Arc::new(Upstream::from_config(&upstream_config(port)));
    let client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new().unwrap());
    HealthChecker::spawn(Arc::clone(&upstream), client);

    let target = Arc::clone(&upstream.members()[0].target);
    assert!(target.is_healthy());

    // two probe cycles at 1s interval, plus slack
    for _ in 0..40 {
        if !target.is_healthy() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(!target.is_healthy(), "target should flip unhealthy");

    // a pool with no healthy target rejects selection
    assert!(upstream.select("1.2.3.4".parse().unwrap()).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_live_target_recovers() {
    let backend = spawn_backend("b1", StatusCode::OK).await;

    let upstream = Arc::new(Upstream::from_config(&upstream_config(backend.addr.port())));
    let client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new().unwrap());

    let target = Arc::clone(&upstream.members()[0].target);
    target.mark_unhealthy();

    HealthChecker::spawn(Arc::clone(&upstream), client);

    for _ in 0..40 {
        if target.is_healthy() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(target.is_healthy(), "target should recover");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removal_cancels_checker() {
    let backend = spawn_backend("b1", StatusCode::OK).await;

    let manager = portico::core::UpstreamManager::new();
    let upstream = manager.insert(&upstream_config(backend.addr.port())).unwrap();
    let client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new().unwrap());
    HealthChecker::spawn(Arc::clone(&upstream), client);

    assert!(manager.remove("pool"));
    let hits_at_removal = backend.hit_count();

    // the cancelled checker stops probing
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(backend.hit_count() <= hits_at_removal + 1);
}
