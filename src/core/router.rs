//! Route matching.
//!
//! The router compiles every enabled service's routes into a flat table and
//! resolves `(method, path)` pairs deterministically: the longest matching
//! path pattern wins, ties break to declaration order. Each compiled route
//! carries its merged effective plugin list (global, then service, then
//! route scope, later scopes overriding earlier ones by plugin name at the
//! earlier position).
use std::sync::Arc;

use http::Method;

use crate::{
    config::{GatewayConfig, PluginConfig, RouteConfig, ServiceConfig},
    core::error::GatewayError,
};

/// A path pattern: exact, or a wildcard-suffixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPattern {
    Exact(String),
    /// "/api/users/*" compiles to Wildcard("/api/users"); it matches the
    /// prefix itself or anything below it.
    Wildcard(String),
}

impl PathPattern {
    fn compile(pattern: &str) -> Self {
        match pattern.strip_suffix("/*") {
            Some(prefix) => PathPattern::Wildcard(prefix.to_string()),
            None => match pattern.strip_suffix('*') {
                Some(prefix) => PathPattern::Wildcard(prefix.trim_end_matches('/').to_string()),
                None => PathPattern::Exact(pattern.to_string()),
            },
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Wildcard(prefix) => {
                path == prefix || (path.starts_with(prefix) && path[prefix.len()..].starts_with('/'))
            }
        }
    }

    /// The prefix removed when `strip_path` is set (wildcard tail excluded).
    fn strip_prefix(&self) -> &str {
        match self {
            PathPattern::Exact(exact) => exact,
            PathPattern::Wildcard(prefix) => prefix,
        }
    }
}

struct CompiledRoute {
    service: Arc<ServiceConfig>,
    route: Arc<RouteConfig>,
    pattern: PathPattern,
    /// Length of the configured pattern string, used for ranking.
    pattern_len: usize,
    plugins: Vec<PluginConfig>,
}

/// A materialized match: the selected service/route pair, the path to
/// forward, and the merged plugin list for the request.
#[derive(Clone)]
pub struct RouteMatch {
    pub service: Arc<ServiceConfig>,
    pub route: Arc<RouteConfig>,
    pub upstream_name: String,
    pub upstream_path: String,
    pub plugins: Vec<PluginConfig>,
}

impl RouteMatch {
    /// Stable identity for looking up the route's prebuilt plugin chain.
    pub fn chain_key(&self) -> String {
        format!("{}:{}", self.service.name, self.route.name)
    }
}

/// Merge one plugin scope over another: same-name entries replace in place,
/// new entries append in order.
fn merge_plugin_layer(mut base: Vec<PluginConfig>, layer: &[PluginConfig]) -> Vec<PluginConfig> {
    for plugin in layer {
        if let Some(existing) = base.iter_mut().find(|p| p.name == plugin.name) {
            *existing = plugin.clone();
        } else {
            base.push(plugin.clone());
        }
    }
    base
}

/// Compiled route table for the whole gateway.
pub struct Router {
    services: Vec<Arc<ServiceConfig>>,
    routes: Vec<CompiledRoute>,
}

impl Router {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut services = Vec::new();
        let mut routes = Vec::new();

        for service_config in &config.services {
            let service = Arc::new(service_config.clone());
            services.push(Arc::clone(&service));

            if !service.enabled {
                continue;
            }

            for route_config in &service_config.routes {
                let route = Arc::new(route_config.clone());
                let plugins = merge_plugin_layer(
                    merge_plugin_layer(config.plugins.clone(), &service.plugins),
                    &route.plugins,
                );

                for pattern in &route_config.paths {
                    routes.push(CompiledRoute {
                        service: Arc::clone(&service),
                        route: Arc::clone(&route),
                        pattern: PathPattern::compile(pattern),
                        pattern_len: pattern.len(),
                        plugins: plugins.clone(),
                    });
                }
            }
        }

        Self { services, routes }
    }

    /// Resolve a request to a route, or fail with `RouteNotFound`.
    pub fn match_route(&self, method: &Method, path: &str) -> Result<RouteMatch, GatewayError> {
        let mut best: Option<&CompiledRoute> = None;

        for candidate in &self.routes {
            if !candidate
                .route
                .methods
                .iter()
                .any(|m| m == method.as_str())
            {
                continue;
            }
            if !candidate.pattern.matches(path) {
                continue;
            }
            // strictly longer patterns win; equal length keeps the earlier
            // declaration since iteration follows declaration order
            if best.is_none_or(|b| candidate.pattern_len > b.pattern_len) {
                best = Some(candidate);
            }
        }

        let matched = best.ok_or(GatewayError::RouteNotFound)?;

        let forwarded = if matched.route.strip_path {
            &path[matched.pattern.strip_prefix().len().min(path.len())..]
        } else {
            path
        };
        let mut upstream_path = format!("{}{}", matched.service.path, forwarded);
        if upstream_path.is_empty() {
            upstream_path.push('/');
        }

        Ok(RouteMatch {
            service: Arc::clone(&matched.service),
            route: Arc::clone(&matched.route),
            upstream_name: matched.service.upstream.clone(),
            upstream_path,
            plugins: matched.plugins.clone(),
        })
    }

    pub fn services(&self) -> &[Arc<ServiceConfig>] {
        &self.services
    }

    pub fn routes(&self) -> Vec<(String, Arc<RouteConfig>)> {
        let mut seen = std::collections::HashSet::new();
        self.routes
            .iter()
            .filter(|r| seen.insert((r.service.name.clone(), r.route.name.clone())))
            .map(|r| (r.service.name.clone(), Arc::clone(&r.route)))
            .collect()
    }

    /// (chain key, merged plugin list) per unique route, for prebuilding
    /// plugin chains at startup.
    pub fn chain_specs(&self) -> Vec<(String, Vec<PluginConfig>)> {
        let mut seen = std::collections::HashSet::new();
        self.routes
            .iter()
            .filter(|r| seen.insert((r.service.name.clone(), r.route.name.clone())))
            .map(|r| {
                (
                    format!("{}:{}", r.service.name, r.route.name),
                    r.plugins.clone(),
                )
            })
            .collect()
    }

    pub fn route_count(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        self.routes
            .iter()
            .filter(|r| seen.insert((r.service.name.clone(), r.route.name.clone())))
            .count()
    }
}
