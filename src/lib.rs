//! Portico - an HTTP API gateway.
//!
//! Portico terminates client HTTP requests, matches them against configured
//! routes, runs a pluggable chain of policies (authentication, rate
//! limiting, transformation, CORS, IP filtering, size limiting, logging),
//! selects a healthy backend from an upstream pool via a configurable
//! load-balancing algorithm, and forwards the request with retry and
//! circuit-breaker protection.
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) while keeping business logic inside `core` and
//! `plugins`:
//! - [`core`]: router, load balancer, circuit breaker, upstream manager,
//!   and the request orchestration in [`core::GatewayService`].
//! - [`plugins`]: the three-phase plugin contract, the chain engine, and
//!   the nine built-in policies.
//! - [`adapters`]: the axum ingress handler, the admin router, the hyper
//!   outbound client, and the health-check task.
//! - [`config`]: serde models, loader, and load-time validation.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use portico::{
//!     adapters::HttpClientAdapter, config, core::GatewayService, plugins::PluginRegistry,
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let cfg = config::load_config("gateway.yaml")?;
//! let registry = PluginRegistry::with_builtins();
//! let client = Arc::new(HttpClientAdapter::new()?);
//! let gateway = Arc::new(GatewayService::new(&cfg, &registry, client)?);
//! // wire `gateway` into the HttpHandler adapter (see the binary crate)
//! # Ok(()) }
//! ```
pub mod adapters;
pub mod config;
pub mod core;
pub mod plugins;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    config::GatewayConfig,
    core::{GatewayService, UpstreamManager},
    plugins::PluginRegistry,
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
