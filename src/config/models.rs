//! Configuration data structures for Portico.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files.
//! They are intentionally serde-friendly and include defaults so that minimal
//! configs remain concise. The top-level document has four sections:
//! `gateway`, `upstreams`, `services`, `plugins`.
use serde::{Deserialize, Serialize};

/// Load-balancing algorithm selector for an upstream.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingAlgorithm {
    #[default]
    RoundRobin,
    LeastConnections,
    IpHash,
    Weighted,
    Random,
}

impl std::fmt::Display for LoadBalancingAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadBalancingAlgorithm::RoundRobin => "round-robin",
            LoadBalancingAlgorithm::LeastConnections => "least-connections",
            LoadBalancingAlgorithm::IpHash => "ip-hash",
            LoadBalancingAlgorithm::Weighted => "weighted",
            LoadBalancingAlgorithm::Random => "random",
        };
        write!(f, "{name}")
    }
}

fn default_target_port() -> u16 {
    80
}

fn default_weight() -> u32 {
    100
}

/// One backend endpoint inside an upstream pool.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TargetConfig {
    pub host: String,
    #[serde(default = "default_target_port")]
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Active health probing configuration for an upstream.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    /// Path probed on each target, e.g. "/health".
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
            interval_secs: 10,
            timeout_secs: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

/// Per-target circuit breaker configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Seconds an opened circuit stays open before allowing a probe.
    pub timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 30,
        }
    }
}

/// Retry policy applied when forwarding to an upstream fails.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    /// Response statuses treated as attempt failures.
    pub retry_on_status: Vec<u16>,
    /// Base for the exponential sleep between attempts, in seconds.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            retry_on_status: vec![502, 503, 504],
            backoff_factor: 0.5,
        }
    }
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

/// A named pool of targets sharing balancing and resilience policy.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub name: String,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub algorithm: LoadBalancingAlgorithm,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-attempt deadline for forwarded requests, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_plugin_options() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// A plugin attachment: registry name plus free-form options.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PluginConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_plugin_options")]
    pub config: serde_json::Value,
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "PATCH"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_strip_path() -> bool {
    true
}

/// A (methods, path-patterns) selector bound to a service.
///
/// Paths are either exact ("/api/users") or wildcard-suffixed
/// ("/api/users/*", matching the prefix itself or anything below it).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteConfig {
    pub name: String,
    pub paths: Vec<String>,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_strip_path")]
    pub strip_path: bool,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Binds routes to one upstream with an optional forward path prefix.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub upstream: String,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    /// Prefix prepended to the forwarded path.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Logging output configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "text".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Listener and admin-surface settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    /// When set, the admin API gets its own listener instead of the
    /// `/admin` prefix on the gateway port.
    pub admin_port: Option<u16>,
    pub admin_enabled: bool,
    pub logging: LoggingConfig,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            admin_port: None,
            admin_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub gateway: GatewaySettings,
    pub upstreams: Vec<UpstreamConfig>,
    pub services: Vec<ServiceConfig>,
    /// Global plugins, applied to every route.
    pub plugins: Vec<PluginConfig>,
}
