//! End-to-end request-path scenarios against in-process backends.
mod common;

use http::{HeaderValue, Method, StatusCode};

use common::{gateway, request, spawn_backend};

#[tokio::test(flavor = "multi_thread")]
async fn test_unmatched_method_and_path_yield_404() {
    let backend = spawn_backend("b1", StatusCode::OK).await;
    let gateway = gateway(serde_json::json!({
        "upstreams": [{
            "name": "pool",
            "targets": [{ "host": "127.0.0.1", "port": backend.addr.port() }],
            "health_check": { "enabled": false },
        }],
        "services": [{
            "name": "users",
            "upstream": "pool",
            "routes": [{ "name": "users", "paths": ["/api/users/*"], "methods": ["GET"] }],
        }],
    }));

    let resp = gateway.handle(request(Method::DELETE, "/api/orders")).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.body.as_ref(), br#"{"error":"route not found"}"#);
    assert_eq!(backend.hit_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_jwt_rejected_before_upstream() {
    let backend = spawn_backend("b1", StatusCode::OK).await;
    let gateway = gateway(serde_json::json!({
        "upstreams": [{
            "name": "pool",
            "targets": [{ "host": "127.0.0.1", "port": backend.addr.port() }],
            "health_check": { "enabled": false },
        }],
        "services": [{
            "name": "api",
            "upstream": "pool",
            "routes": [{
                "name": "api",
                "paths": ["/api/*"],
                "plugins": [{ "name": "jwt-auth", "config": { "secret": "k" } }],
            }],
        }],
    }));

    let mut ctx = request(Method::GET, "/api/x");
    ctx.headers
        .insert("authorization", HeaderValue::from_static("Bearer abc"));

    let resp = gateway.handle(ctx).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(backend.hit_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_round_robin_alternates_between_targets() {
    let b1 = spawn_backend("b1", StatusCode::OK).await;
    let b2 = spawn_backend("b2", StatusCode::OK).await;
    let gateway = gateway(serde_json::json!({
        "upstreams": [{
            "name": "pool",
            "algorithm": "round-robin",
            "targets": [
                { "host": "127.0.0.1", "port": b1.addr.port(), "weight": 1 },
                { "host": "127.0.0.1", "port": b2.addr.port(), "weight": 1 },
            ],
            "health_check": { "enabled": false },
        }],
        "services": [{
            "name": "api",
            "upstream": "pool",
            "routes": [{ "name": "api", "paths": ["/api/*"] }],
        }],
    }));

    let mut order = Vec::new();
    for _ in 0..6 {
        let resp = gateway.handle(request(Method::GET, "/api/x")).await;
        assert_eq!(resp.status, StatusCode::OK);
        order.push(
            resp.headers
                .get("x-backend-id")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string(),
        );
    }
    assert_eq!(order, vec!["b1", "b2", "b1", "b2", "b1", "b2"]);
    assert_eq!(b1.hit_count(), 3);
    assert_eq!(b2.hit_count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_circuit_opens_after_threshold_and_sheds_load() {
    let failing = spawn_backend("b1", StatusCode::INTERNAL_SERVER_ERROR).await;
    let gateway = gateway(serde_json::json!({
        "upstreams": [{
            "name": "pool",
            "targets": [{ "host": "127.0.0.1", "port": failing.addr.port() }],
            "health_check": { "enabled": false },
            "circuit_breaker": { "failure_threshold": 3, "timeout_secs": 60 },
            "retry": { "enabled": false, "retry_on_status": [500] },
        }],
        "services": [{
            "name": "api",
            "upstream": "pool",
            "routes": [{ "name": "api", "paths": ["/api/*"] }],
        }],
    }));

    // three failures pass through and trip the breaker
    for _ in 0..3 {
        let resp = gateway.handle(request(Method::GET, "/api/x")).await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert_eq!(failing.hit_count(), 3);

    // the fourth request is shed without contacting the target
    let resp = gateway.handle(request(Method::GET, "/api/x")).await;
    assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(failing.hit_count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rate_limit_rejects_third_request_in_window() {
    let backend = spawn_backend("b1", StatusCode::OK).await;
    let gateway = gateway(serde_json::json!({
        "upstreams": [{
            "name": "pool",
            "targets": [{ "host": "127.0.0.1", "port": backend.addr.port() }],
            "health_check": { "enabled": false },
        }],
        "services": [{
            "name": "api",
            "upstream": "pool",
            "routes": [{
                "name": "api",
                "paths": ["/api/*"],
                "plugins": [{
                    "name": "rate-limiting",
                    "config": { "minute": 2, "limit_by": "ip" },
                }],
            }],
        }],
    }));

    for expected_remaining in ["1", "0"] {
        let resp = gateway.handle(request(Method::GET, "/api/x")).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(
            resp.headers.get("x-ratelimit-limit-minute").unwrap(),
            "2"
        );
        assert_eq!(
            resp.headers.get("x-ratelimit-remaining-minute").unwrap(),
            expected_remaining
        );
    }

    let resp = gateway.handle(request(Method::GET, "/api/x")).await;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        resp.headers.get("x-ratelimit-remaining-minute").unwrap(),
        "0"
    );
    let retry_after: u64 = resp
        .headers
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after <= 60);
    assert_eq!(backend.hit_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transformers_touch_both_directions() {
    let backend = spawn_backend("b1", StatusCode::OK).await;
    let gateway = gateway(serde_json::json!({
        "upstreams": [{
            "name": "pool",
            "targets": [{ "host": "127.0.0.1", "port": backend.addr.port() }],
            "health_check": { "enabled": false },
        }],
        "services": [{
            "name": "api",
            "upstream": "pool",
            "routes": [{
                "name": "api",
                "paths": ["/api/*"],
                "plugins": [
                    { "name": "request-transformer", "config": { "add": { "headers": { "X-A": "1" } } } },
                    { "name": "response-transformer", "config": { "add": { "headers": { "X-B": "2" } } } },
                ],
            }],
        }],
    }));

    let resp = gateway.handle(request(Method::GET, "/api/x")).await;
    assert_eq!(resp.status, StatusCode::OK);
    // the backend saw X-A and echoed it back
    assert_eq!(resp.headers.get("echo-x-a").unwrap(), "1");
    // the response transformer added X-B on the way out
    assert_eq!(resp.headers.get("x-b").unwrap(), "2");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_fails_over_to_healthy_target() {
    // one dead port, one live backend
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);
    let live = spawn_backend("live", StatusCode::OK).await;

    let gateway = gateway(serde_json::json!({
        "upstreams": [{
            "name": "pool",
            "targets": [
                { "host": "127.0.0.1", "port": dead_port },
                { "host": "127.0.0.1", "port": live.addr.port() },
            ],
            "health_check": { "enabled": false },
            "retry": { "enabled": true, "max_retries": 2, "backoff_factor": 0.0 },
        }],
        "services": [{
            "name": "api",
            "upstream": "pool",
            "routes": [{ "name": "api", "paths": ["/api/*"] }],
        }],
    }));

    // regardless of which target round-robin tries first, the request lands
    for _ in 0..4 {
        let resp = gateway.handle(request(Method::GET, "/api/x")).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.headers.get("x-backend-id").unwrap(), "live");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_strip_path_and_service_prefix() {
    let backend = spawn_backend("b1", StatusCode::OK).await;
    let gateway = gateway(serde_json::json!({
        "upstreams": [{
            "name": "pool",
            "targets": [{ "host": "127.0.0.1", "port": backend.addr.port() }],
            "health_check": { "enabled": false },
        }],
        "services": [{
            "name": "api",
            "upstream": "pool",
            "path": "/internal",
            "routes": [{ "name": "api", "paths": ["/api/*"], "strip_path": true }],
        }],
    }));

    let mut ctx = request(Method::GET, "/api/users?page=2");
    ctx.headers
        .insert("x-probe", HeaderValue::from_static("yes"));
    let resp = gateway.handle(ctx).await;
    assert_eq!(resp.status, StatusCode::OK);
    // forwarded headers made it through intact
    assert_eq!(resp.headers.get("echo-x-probe").unwrap(), "yes");
    assert_eq!(resp.headers.get("echo-x-forwarded-proto").unwrap(), "http");
    assert_eq!(resp.headers.get("echo-x-forwarded-for").unwrap(), "1.2.3.4");
}
