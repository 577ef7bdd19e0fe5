//! Admin HTTP surface.
//!
//! Mounted under `/admin` on the gateway port, or served from its own
//! listener when `admin_port` is set. Mutations land directly on the
//! upstream manager and are observed by the next incoming request.
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::{
    adapters::health_checker::HealthChecker,
    config::{TargetConfig, UpstreamConfig},
    core::GatewayService,
    plugins::PluginRegistry,
    ports::http_client::HttpClient,
};

#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<GatewayService>,
    pub registry: Arc<PluginRegistry>,
    pub http_client: Arc<dyn HttpClient>,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/status", get(status))
        .route("/upstreams", get(list_upstreams).post(create_upstream))
        .route("/upstreams/{name}", get(get_upstream).delete(delete_upstream))
        .route(
            "/upstreams/{name}/targets",
            get(list_targets).post(add_target),
        )
        .route("/upstreams/{name}/health", get(upstream_health))
        .route("/services", get(list_services))
        .route("/services/{name}", get(get_service))
        .route("/routes", get(list_routes))
        .route("/plugins", get(list_plugins))
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AdminState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "upstreams": state.gateway.upstreams().len(),
        "services": state.gateway.router().services().len(),
        "routes": state.gateway.router().route_count(),
        "plugins": state.registry.names(),
    }))
}

async fn list_upstreams(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshots: Vec<_> = state
        .gateway
        .upstreams()
        .list()
        .iter()
        .map(|u| u.snapshot())
        .collect();
    Json(serde_json::json!({ "data": snapshots }))
}

async fn get_upstream(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.gateway.upstreams().get(&name) {
        Some(upstream) => {
            (StatusCode::OK, Json(serde_json::json!({ "data": upstream.snapshot() })))
        }
        None => not_found("upstream not found"),
    }
}

async fn create_upstream(
    State(state): State<AdminState>,
    Json(config): Json<UpstreamConfig>,
) -> impl IntoResponse {
    match state.gateway.upstreams().insert(&config) {
        Ok(upstream) => {
            HealthChecker::spawn(Arc::clone(&upstream), Arc::clone(&state.http_client));
            tracing::info!(upstream = %config.name, "upstream created via admin");
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "data": upstream.snapshot() })),
            )
        }
        Err(error) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": error.to_string() })),
        ),
    }
}

async fn delete_upstream(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if state.gateway.upstreams().remove(&name) {
        tracing::info!(upstream = %name, "upstream removed via admin");
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found("upstream not found").into_response()
    }
}

async fn list_targets(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.gateway.upstreams().get(&name) {
        Some(upstream) => {
            let targets: Vec<_> = upstream
                .members()
                .iter()
                .map(|m| m.target.status())
                .collect();
            (StatusCode::OK, Json(serde_json::json!({ "data": targets })))
        }
        None => not_found("upstream not found"),
    }
}

async fn add_target(
    State(state): State<AdminState>,
    Path(name): Path<String>,
    Json(config): Json<TargetConfig>,
) -> impl IntoResponse {
    match state.gateway.upstreams().get(&name) {
        Some(upstream) => {
            let member = upstream.add_target(&config);
            tracing::info!(
                upstream = %name,
                target = %member.target.address(),
                "target added via admin"
            );
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "data": member.target.status() })),
            )
        }
        None => not_found("upstream not found"),
    }
}

async fn upstream_health(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.gateway.upstreams().get(&name) {
        Some(upstream) => {
            let targets: Vec<_> = upstream
                .members()
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "target": m.target.status(),
                        "circuit_breaker": m.breaker.snapshot(),
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "data": { "name": name, "targets": targets } })),
            )
        }
        None => not_found("upstream not found"),
    }
}

async fn list_services(State(state): State<AdminState>) -> impl IntoResponse {
    let services: Vec<_> = state
        .gateway
        .router()
        .services()
        .iter()
        .map(|s| s.as_ref())
        .collect();
    Json(serde_json::json!({ "data": services }))
}

async fn get_service(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state
        .gateway
        .router()
        .services()
        .iter()
        .find(|s| s.name == name)
    {
        Some(service) => (
            StatusCode::OK,
            Json(serde_json::json!({ "data": service.as_ref() })),
        ),
        None => not_found("service not found"),
    }
}

async fn list_routes(State(state): State<AdminState>) -> impl IntoResponse {
    let routes: Vec<_> = state
        .gateway
        .router()
        .routes()
        .iter()
        .map(|(service, route)| {
            serde_json::json!({ "service": service, "route": route.as_ref() })
        })
        .collect();
    Json(serde_json::json!({ "data": routes }))
}

async fn list_plugins(State(state): State<AdminState>) -> impl IntoResponse {
    Json(serde_json::json!({ "data": state.registry.names() }))
}

fn not_found(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": message })),
    )
}
