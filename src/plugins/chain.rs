//! Ordered plugin execution with short-circuit and mirror semantics.
//!
//! The access phase runs in list order and stops at the first plugin that
//! sets a short-circuit response. The response phase runs in REVERSE order
//! over exactly the plugins that executed access, so the outermost plugin
//! sees the final response, synthetic short-circuit responses included.
//! The log phase runs in forward order after the response is flushed and
//! never affects the request outcome.
use std::{collections::HashMap, sync::Arc};

use eyre::Result;
use http::StatusCode;

use crate::{
    config::PluginConfig,
    plugins::{Plugin, PluginRegistry, ProxyResponse, RequestContext},
};

/// Builds per-route chains while sharing instances for unchanged global
/// entries, so stateful plugins (rate-limit counters) keep one state across
/// every route they cover.
pub struct ChainBuilder<'a> {
    registry: &'a PluginRegistry,
    global: HashMap<String, (serde_json::Value, Arc<dyn Plugin>)>,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(registry: &'a PluginRegistry, global_configs: &[PluginConfig]) -> Result<Self> {
        let mut global = HashMap::new();
        for config in global_configs.iter().filter(|p| p.enabled) {
            let instance = registry.create(&config.name, &config.config)?;
            global.insert(config.name.clone(), (config.config.clone(), instance));
        }
        Ok(Self { registry, global })
    }

    /// Instantiate a chain for a merged plugin list.
    pub fn build(&self, merged: &[PluginConfig]) -> Result<PluginChain> {
        let mut plugins = Vec::new();
        for config in merged.iter().filter(|p| p.enabled) {
            let instance = match self.global.get(&config.name) {
                Some((global_options, shared)) if *global_options == config.config => {
                    Arc::clone(shared)
                }
                _ => self.registry.create(&config.name, &config.config)?,
            };
            plugins.push(instance);
        }
        Ok(PluginChain { plugins })
    }
}

/// An ordered, instantiated plugin list for one route.
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run the access phase; returns how many plugins executed.
    ///
    /// The first short-circuit ends the phase immediately. A plugin error
    /// becomes a 500 short-circuit rather than a crashed request.
    pub async fn run_access(&self, ctx: &mut RequestContext) -> usize {
        for (index, plugin) in self.plugins.iter().enumerate() {
            if let Err(error) = plugin.access(ctx).await {
                tracing::error!(
                    plugin = plugin.name(),
                    error = %error,
                    "access phase failed"
                );
                ctx.set_short_circuit(ProxyResponse::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error",
                ));
                return index + 1;
            }
            if ctx.short_circuit.is_some() {
                return index + 1;
            }
        }
        self.plugins.len()
    }

    /// Run the response phase in reverse over the first `executed` plugins.
    pub async fn run_response(
        &self,
        ctx: &mut RequestContext,
        resp: &mut ProxyResponse,
        executed: usize,
    ) {
        for plugin in self.plugins[..executed.min(self.plugins.len())].iter().rev() {
            if let Err(error) = plugin.response(ctx, resp).await {
                tracing::error!(
                    plugin = plugin.name(),
                    error = %error,
                    "response phase failed"
                );
            }
        }
    }

    /// Run the log phase in forward order. Errors cannot escape: the hook
    /// is infallible and runs outside the response critical path.
    pub async fn run_log(&self, ctx: &RequestContext, resp: &ProxyResponse) {
        for plugin in &self.plugins {
            plugin.log(ctx, resp).await;
        }
    }
}
