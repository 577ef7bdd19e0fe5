use std::collections::HashSet;

use crate::config::models::{GatewayConfig, PluginConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Duplicate upstream name: {name}")]
    DuplicateUpstream { name: String },

    #[error("Service '{service}' references unknown upstream '{upstream}'")]
    UnknownUpstream { service: String, upstream: String },

    #[error("Unknown plugin '{plugin}' in scope '{scope}'")]
    UnknownPlugin { plugin: String, scope: String },

    #[error("Validation failed:\n{message}")]
    ValidationFailed { message: String },
}

const KNOWN_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "HEAD", "TRACE", "CONNECT",
];

/// Gateway configuration validator.
///
/// Any valid document yields a consistent in-memory state: all upstream
/// references resolve, all plugin names resolve against the registry, and
/// plugin options that would fail at instantiation are rejected here.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire configuration against the registered plugin names.
    pub fn validate(config: &GatewayConfig, known_plugins: &[&str]) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.gateway.port == 0 {
            errors.push(ValidationError::InvalidField {
                field: "gateway.port".to_string(),
                message: "port must be in 1..65535".to_string(),
            });
        }

        let mut upstream_names = HashSet::new();
        for upstream in &config.upstreams {
            if upstream.name.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "upstream.name".to_string(),
                });
            }
            if !upstream_names.insert(upstream.name.as_str()) {
                errors.push(ValidationError::DuplicateUpstream {
                    name: upstream.name.clone(),
                });
            }
            for target in &upstream.targets {
                if target.port == 0 {
                    errors.push(ValidationError::InvalidField {
                        field: format!("upstream '{}' target '{}'", upstream.name, target.host),
                        message: "target port must be in 1..65535".to_string(),
                    });
                }
            }
        }

        for service in &config.services {
            if !upstream_names.contains(service.upstream.as_str()) {
                errors.push(ValidationError::UnknownUpstream {
                    service: service.name.clone(),
                    upstream: service.upstream.clone(),
                });
            }

            for route in &service.routes {
                if route.paths.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: format!("route '{}' paths", route.name),
                    });
                }
                for path in &route.paths {
                    if !path.starts_with('/') {
                        errors.push(ValidationError::InvalidField {
                            field: format!("route '{}' path '{path}'", route.name),
                            message: "route paths must start with '/'".to_string(),
                        });
                    }
                }
                for method in &route.methods {
                    if !KNOWN_METHODS.contains(&method.as_str()) {
                        errors.push(ValidationError::InvalidField {
                            field: format!("route '{}' method '{method}'", route.name),
                            message: "unknown HTTP method".to_string(),
                        });
                    }
                }
                Self::validate_plugins(
                    &route.plugins,
                    &format!("route '{}'", route.name),
                    known_plugins,
                    &mut errors,
                );
            }

            Self::validate_plugins(
                &service.plugins,
                &format!("service '{}'", service.name),
                known_plugins,
                &mut errors,
            );
        }

        Self::validate_plugins(&config.plugins, "global", known_plugins, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_plugins(
        plugins: &[PluginConfig],
        scope: &str,
        known_plugins: &[&str],
        errors: &mut Vec<ValidationError>,
    ) {
        for plugin in plugins {
            if !known_plugins.contains(&plugin.name.as_str()) {
                errors.push(ValidationError::UnknownPlugin {
                    plugin: plugin.name.clone(),
                    scope: scope.to_string(),
                });
                continue;
            }

            // Options that would only fail at instantiation are rejected here
            // so that a bad document never reaches request time.
            match plugin.name.as_str() {
                "rate-limiting" => {
                    if let Some(policy) = plugin.config.get("policy").and_then(|v| v.as_str()) {
                        if policy != "local" {
                            errors.push(ValidationError::InvalidField {
                                field: format!("{scope} rate-limiting policy"),
                                message: format!("unsupported policy '{policy}', only 'local'"),
                            });
                        }
                    }
                }
                "jwt-auth" => {
                    if let Some(alg) = plugin.config.get("algorithm").and_then(|v| v.as_str()) {
                        if !["HS256", "HS384", "HS512"].contains(&alg) {
                            errors.push(ValidationError::InvalidField {
                                field: format!("{scope} jwt-auth algorithm"),
                                message: format!("unsupported algorithm '{alg}'"),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("  {}. {e}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{
        GatewayConfig, RouteConfig, ServiceConfig, TargetConfig, UpstreamConfig,
    };

    const PLUGINS: &[&str] = &["cors", "rate-limiting", "jwt-auth"];

    fn base_config() -> GatewayConfig {
        GatewayConfig {
            upstreams: vec![UpstreamConfig {
                name: "backend".to_string(),
                targets: vec![TargetConfig {
                    host: "localhost".to_string(),
                    port: 3000,
                    weight: 100,
                }],
                algorithm: Default::default(),
                health_check: Default::default(),
                circuit_breaker: Default::default(),
                retry: Default::default(),
                read_timeout_ms: 30_000,
            }],
            services: vec![ServiceConfig {
                name: "api".to_string(),
                upstream: "backend".to_string(),
                routes: vec![RouteConfig {
                    name: "all".to_string(),
                    paths: vec!["/api/*".to_string()],
                    methods: vec!["GET".to_string()],
                    strip_path: true,
                    plugins: vec![],
                }],
                plugins: vec![],
                path: String::new(),
                enabled: true,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(GatewayConfigValidator::validate(&base_config(), PLUGINS).is_ok());
    }

    #[test]
    fn test_unknown_upstream_rejected() {
        let mut config = base_config();
        config.services[0].upstream = "missing".to_string();
        let err = GatewayConfigValidator::validate(&config, PLUGINS).unwrap_err();
        assert!(err.to_string().contains("unknown upstream 'missing'"));
    }

    #[test]
    fn test_duplicate_upstream_rejected() {
        let mut config = base_config();
        config.upstreams.push(config.upstreams[0].clone());
        assert!(GatewayConfigValidator::validate(&config, PLUGINS).is_err());
    }

    #[test]
    fn test_unknown_plugin_rejected() {
        let mut config = base_config();
        config.plugins.push(crate::config::models::PluginConfig {
            name: "no-such-plugin".to_string(),
            enabled: true,
            config: serde_json::json!({}),
        });
        assert!(GatewayConfigValidator::validate(&config, PLUGINS).is_err());
    }

    #[test]
    fn test_non_local_rate_limit_policy_rejected() {
        let mut config = base_config();
        config.plugins.push(crate::config::models::PluginConfig {
            name: "rate-limiting".to_string(),
            enabled: true,
            config: serde_json::json!({ "policy": "redis" }),
        });
        let err = GatewayConfigValidator::validate(&config, PLUGINS).unwrap_err();
        assert!(err.to_string().contains("only 'local'"));
    }

    #[test]
    fn test_bad_method_rejected() {
        let mut config = base_config();
        config.services[0].routes[0].methods = vec!["FETCH".to_string()];
        assert!(GatewayConfigValidator::validate(&config, PLUGINS).is_err());
    }
}
