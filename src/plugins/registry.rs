//! Maps plugin names to factories.
//!
//! Re-expresses the original's runtime class lookup as a static table of
//! constructors; every factory validates its options eagerly so a bad
//! config fails at load time, not at request time.
use std::{collections::HashMap, sync::Arc};

use eyre::{Result, WrapErr};

use crate::plugins::{
    Plugin, cors::CorsPlugin, ip_restriction::IpRestrictionPlugin, jwt_auth::JwtAuthPlugin,
    key_auth::KeyAuthPlugin, logging::LoggingPlugin, rate_limiting::RateLimitingPlugin,
    request_transformer::RequestTransformerPlugin,
    response_transformer::ResponseTransformerPlugin, size_limiting::RequestSizeLimitingPlugin,
};

type PluginFactory = fn(&serde_json::Value) -> Result<Arc<dyn Plugin>>;

pub struct PluginRegistry {
    factories: HashMap<&'static str, PluginFactory>,
}

impl PluginRegistry {
    /// Registry with every built-in plugin registered.
    pub fn with_builtins() -> Self {
        let mut factories: HashMap<&'static str, PluginFactory> = HashMap::new();
        factories.insert("jwt-auth", |options| {
            Ok(Arc::new(JwtAuthPlugin::from_options(options)?))
        });
        factories.insert("key-auth", |options| {
            Ok(Arc::new(KeyAuthPlugin::from_options(options)?))
        });
        factories.insert("rate-limiting", |options| {
            Ok(Arc::new(RateLimitingPlugin::from_options(options)?))
        });
        factories.insert("cors", |options| {
            Ok(Arc::new(CorsPlugin::from_options(options)?))
        });
        factories.insert("request-transformer", |options| {
            Ok(Arc::new(RequestTransformerPlugin::from_options(options)?))
        });
        factories.insert("response-transformer", |options| {
            Ok(Arc::new(ResponseTransformerPlugin::from_options(options)?))
        });
        factories.insert("ip-restriction", |options| {
            Ok(Arc::new(IpRestrictionPlugin::from_options(options)?))
        });
        factories.insert("request-size-limiting", |options| {
            Ok(Arc::new(RequestSizeLimitingPlugin::from_options(options)?))
        });
        factories.insert("logging", |options| {
            Ok(Arc::new(LoggingPlugin::from_options(options)?))
        });
        Self { factories }
    }

    /// Registered plugin names, sorted for stable listings.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Instantiate a plugin with its effective options.
    pub fn create(&self, name: &str, options: &serde_json::Value) -> Result<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| eyre::eyre!("unknown plugin '{name}'"))?;
        factory(options).wrap_err_with(|| format!("failed to build plugin '{name}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_builtins_registered() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "cors",
                "ip-restriction",
                "jwt-auth",
                "key-auth",
                "logging",
                "rate-limiting",
                "request-size-limiting",
                "request-transformer",
                "response-transformer",
            ]
        );
    }

    #[test]
    fn test_unknown_plugin_fails() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.create("no-such", &serde_json::json!({})).is_err());
    }

    #[test]
    fn test_create_with_defaults() {
        let registry = PluginRegistry::with_builtins();
        let plugin = registry.create("cors", &serde_json::json!({})).unwrap();
        assert_eq!(plugin.name(), "cors");
    }
}
