//! Core gateway orchestration.
//!
//! `GatewayService` glues the router, the per-route plugin chains, and the
//! upstream subsystem together: resolve a route, run the access phase,
//! forward with retry and circuit protection, run the response phase in
//! mirror order, then fire the log phase off the critical path. It owns no
//! sockets; the ingress adapter feeds it a [`RequestContext`] and writes
//! back the returned [`ProxyResponse`].
use std::{collections::HashMap, sync::Arc, time::Instant};

use bytes::Bytes;
use eyre::{Result, WrapErr};
use http::{HeaderValue, Request};
use http_body_util::Full;
use tokio::time::timeout;

use crate::{
    config::GatewayConfig,
    core::{
        error::GatewayError,
        router::{RouteMatch, Router},
        upstream::UpstreamManager,
    },
    plugins::{PluginChain, PluginRegistry, ProxyResponse, RequestContext, chain::ChainBuilder},
    ports::http_client::{HttpClient, HttpClientError},
};

/// Headers never forwarded in either direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

pub struct GatewayService {
    router: Router,
    upstreams: Arc<UpstreamManager>,
    chains: HashMap<String, Arc<PluginChain>>,
    http_client: Arc<dyn HttpClient>,
}

impl GatewayService {
    /// Build the full request-path state from a validated configuration.
    pub fn new(
        config: &GatewayConfig,
        registry: &PluginRegistry,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let router = Router::from_config(config);

        let upstreams = Arc::new(UpstreamManager::new());
        for upstream_config in &config.upstreams {
            upstreams
                .insert(upstream_config)
                .wrap_err_with(|| format!("registering upstream '{}'", upstream_config.name))?;
        }

        let builder = ChainBuilder::new(registry, &config.plugins)?;
        let mut chains = HashMap::new();
        for (key, plugin_configs) in router.chain_specs() {
            let chain = builder
                .build(&plugin_configs)
                .wrap_err_with(|| format!("building plugin chain for route '{key}'"))?;
            chains.insert(key, Arc::new(chain));
        }

        Ok(Self {
            router,
            upstreams,
            chains,
            http_client,
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn upstreams(&self) -> &Arc<UpstreamManager> {
        &self.upstreams
    }

    /// Drive one request through route → access → forward → response → log.
    pub async fn handle(&self, mut ctx: RequestContext) -> ProxyResponse {
        let route_match = match self.router.match_route(&ctx.method, ctx.uri.path()) {
            Ok(matched) => matched,
            Err(error) => {
                tracing::debug!(path = ctx.uri.path(), "no route matched");
                return ProxyResponse::error(error.status(), error.client_message());
            }
        };

        ctx.service_name = route_match.service.name.clone();
        ctx.route_name = route_match.route.name.clone();
        ctx.upstream_name = route_match.upstream_name.clone();

        let chain = self
            .chains
            .get(&route_match.chain_key())
            .cloned()
            .unwrap_or_else(|| Arc::new(PluginChain::empty()));

        let executed = chain.run_access(&mut ctx).await;

        let mut response = match ctx.short_circuit.take() {
            Some(short_circuit) => short_circuit,
            None => self.forward(&mut ctx, &route_match).await,
        };

        chain.run_response(&mut ctx, &mut response, executed).await;
        ctx.finished_at = Some(Instant::now());

        // log phase runs after the response is flushed, outside the
        // request's critical path
        let log_chain = Arc::clone(&chain);
        let log_response = response.clone();
        tokio::spawn(async move {
            log_chain.run_log(&ctx, &log_response).await;
        });

        response
    }

    /// Forward to the route's upstream with retry and circuit protection.
    async fn forward(&self, ctx: &mut RequestContext, route_match: &RouteMatch) -> ProxyResponse {
        let upstream = match self.upstreams.get(&route_match.upstream_name) {
            Some(upstream) => upstream,
            None => {
                let error = GatewayError::UpstreamNotFound(route_match.upstream_name.clone());
                tracing::error!(upstream = %route_match.upstream_name, "unresolved upstream");
                return ProxyResponse::error(error.status(), error.client_message());
            }
        };

        let retry = upstream.retry_plan().clone();
        let attempts = if retry.enabled {
            retry.max_retries + 1
        } else {
            1
        };
        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..attempts {
            if attempt > 0 && retry.backoff_factor > 0.0 {
                let backoff = retry.backoff_factor * 2f64.powi(attempt as i32 - 1);
                tokio::time::sleep(std::time::Duration::from_secs_f64(backoff)).await;
            }

            // re-select every attempt; the slot of the previous attempt is
            // released when its guard drops at the end of the iteration
            let guard = match upstream.select(ctx.client_ip) {
                Ok(guard) => guard,
                Err(error) => {
                    last_error = Some(error);
                    break;
                }
            };

            let outbound = match self.build_outbound(ctx, route_match, &guard.target().url()) {
                Ok(request) => request,
                Err(error) => {
                    tracing::error!(error = %error, "failed to build outbound request");
                    return ProxyResponse::error(
                        http::StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error",
                    );
                }
            };

            if ctx.upstream_sent_at.is_none() {
                ctx.upstream_sent_at = Some(Instant::now());
            }
            let target_address = guard.target().address();

            match timeout(upstream.read_timeout(), self.http_client.send_request(outbound)).await {
                Ok(Ok(response)) => {
                    ctx.upstream_received_at = Some(Instant::now());
                    let status = response.status().as_u16();

                    if retry.retry_on_status.contains(&status) {
                        upstream.report(guard.member(), false);
                        tracing::warn!(
                            target = %target_address,
                            status,
                            attempt,
                            "attempt failed with retryable status"
                        );
                        if attempt + 1 < attempts {
                            continue;
                        }
                        // out of attempts: the upstream's answer stands
                        return Self::buffer_response(response);
                    }

                    upstream.report(guard.member(), true);
                    return Self::buffer_response(response);
                }
                Ok(Err(error)) => {
                    upstream.report(guard.member(), false);
                    tracing::warn!(
                        target = %target_address,
                        error = %error,
                        attempt,
                        "attempt failed"
                    );
                    last_error = Some(match error {
                        HttpClientError::Timeout(_) => {
                            GatewayError::UpstreamTimeout(route_match.upstream_name.clone())
                        }
                        other => GatewayError::UpstreamError(
                            route_match.upstream_name.clone(),
                            other.to_string(),
                        ),
                    });
                }
                Err(_elapsed) => {
                    upstream.report(guard.member(), false);
                    tracing::warn!(target = %target_address, attempt, "attempt timed out");
                    last_error =
                        Some(GatewayError::UpstreamTimeout(route_match.upstream_name.clone()));
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| GatewayError::NoHealthyTarget(route_match.upstream_name.clone()));
        ProxyResponse::error(error.status(), error.client_message())
    }

    /// Assemble the outbound request for one attempt.
    fn build_outbound(
        &self,
        ctx: &RequestContext,
        route_match: &RouteMatch,
        target_url: &str,
    ) -> Result<Request<Full<Bytes>>> {
        let original_host = ctx.header("host").map(String::from);

        let uri = match ctx.uri.query() {
            Some(query) => format!("{target_url}{}?{query}", route_match.upstream_path),
            None => format!("{target_url}{}", route_match.upstream_path),
        };

        let mut builder = Request::builder().method(ctx.method.clone()).uri(uri);
        let headers = builder
            .headers_mut()
            .ok_or_else(|| eyre::eyre!("request builder in error state"))?;

        for (name, value) in &ctx.headers {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        let forwarded_for = match ctx.header("x-forwarded-for") {
            Some(existing) => format!("{existing}, {}", ctx.client_ip),
            None => ctx.client_ip.to_string(),
        };
        headers.insert("x-forwarded-for", HeaderValue::from_str(&forwarded_for)?);
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        if let Some(host) = original_host {
            headers.insert("x-forwarded-host", HeaderValue::from_str(&host)?);
        }

        if let Some(consumer) = &ctx.consumer {
            if let Some(username) = &consumer.username {
                headers.insert("x-consumer-username", HeaderValue::from_str(username)?);
            }
            if let Some(custom_id) = &consumer.custom_id {
                headers.insert("x-consumer-custom-id", HeaderValue::from_str(custom_id)?);
            }
            if ctx.authenticated {
                headers.insert(
                    "x-authenticated-consumer",
                    HeaderValue::from_static("true"),
                );
            }
        }

        Ok(builder.body(Full::new(ctx.body.clone()))?)
    }

    /// Convert a buffered upstream response into the chain's shape,
    /// dropping hop-by-hop headers.
    fn buffer_response(response: http::Response<Bytes>) -> ProxyResponse {
        let (parts, body) = response.into_parts();
        let mut headers = parts.headers;
        for name in HOP_BY_HOP_HEADERS {
            if *name != "host" {
                headers.remove(*name);
            }
        }
        ProxyResponse {
            status: parts.status,
            headers,
            body,
        }
    }
}
