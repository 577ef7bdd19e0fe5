//! Request rate limiting over fixed named windows.
//!
//! Each configured window (second / minute / hour / day) gets its own keyed
//! limiter; a request must pass every window. Quotas are enforced by
//! `governor` with the state-information middleware so the remaining
//! capacity can be surfaced in `X-RateLimit-*` headers. Counters are
//! in-process only; the `policy` option exists for config compatibility and
//! accepts only `"local"`.
use std::{num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use eyre::Result;
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DefaultKeyedStateStore,
};
use http::{HeaderName, HeaderValue, StatusCode};
use serde::Deserialize;

use crate::plugins::{Plugin, ProxyResponse, RequestContext};

type KeyedLimiter =
    RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock, StateInformationMiddleware>;

fn default_minute() -> Option<u32> {
    Some(60)
}

fn default_limit_by() -> String {
    "ip".to_string()
}

fn default_policy() -> String {
    "local".to_string()
}

fn default_error_code() -> u16 {
    429
}

fn default_error_message() -> String {
    "rate limit exceeded".to_string()
}

#[derive(Debug, Deserialize)]
struct RateLimitOptions {
    #[serde(default)]
    second: Option<u32>,
    #[serde(default = "default_minute")]
    minute: Option<u32>,
    #[serde(default)]
    hour: Option<u32>,
    #[serde(default)]
    day: Option<u32>,
    /// ip | consumer | credential | header
    #[serde(default = "default_limit_by")]
    limit_by: String,
    #[serde(default)]
    header_name: Option<String>,
    #[serde(default = "default_policy")]
    policy: String,
    #[serde(default)]
    hide_client_headers: bool,
    #[serde(default = "default_error_code")]
    error_code: u16,
    #[serde(default = "default_error_message")]
    error_message: String,
}

struct Window {
    name: &'static str,
    limit: u32,
    limiter: KeyedLimiter,
}

pub struct RateLimitingPlugin {
    options: RateLimitOptions,
    windows: Vec<Window>,
    clock: DefaultClock,
}

impl RateLimitingPlugin {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let options: RateLimitOptions = serde_json::from_value(options.clone())?;

        if options.policy != "local" {
            eyre::bail!("unsupported rate-limiting policy '{}'", options.policy);
        }
        if !["ip", "consumer", "credential", "header"].contains(&options.limit_by.as_str()) {
            eyre::bail!("unsupported limit_by '{}'", options.limit_by);
        }
        if options.limit_by == "header" && options.header_name.is_none() {
            eyre::bail!("limit_by 'header' requires header_name");
        }

        let specs: [(&'static str, Option<u32>, u64); 4] = [
            ("second", options.second, 1),
            ("minute", options.minute, 60),
            ("hour", options.hour, 3_600),
            ("day", options.day, 86_400),
        ];

        let mut windows = Vec::new();
        for (name, limit, seconds) in specs {
            let Some(limit) = limit else { continue };
            let limit_nz = NonZeroU32::new(limit)
                .ok_or_else(|| eyre::eyre!("rate limit for '{name}' must be greater than 0"))?;
            let quota = Quota::with_period(Duration::from_secs(seconds) / limit)
                .ok_or_else(|| eyre::eyre!("invalid quota period for '{name}'"))?
                .allow_burst(limit_nz);
            windows.push(Window {
                name,
                limit,
                limiter: RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>(),
            });
        }

        Ok(Self {
            options,
            windows,
            clock: DefaultClock::default(),
        })
    }

    fn identifier(&self, ctx: &RequestContext) -> String {
        match self.options.limit_by.as_str() {
            "consumer" => {
                let username = ctx
                    .consumer
                    .as_ref()
                    .and_then(|c| c.username.as_deref())
                    .unwrap_or("anonymous");
                format!("consumer:{username}")
            }
            "credential" => {
                if let Some(credential) = &ctx.credential {
                    format!("credential:{credential}")
                } else if let Some(user_id) =
                    ctx.consumer.as_ref().and_then(|c| c.user_id.as_deref())
                {
                    format!("credential:{user_id}")
                } else {
                    format!("ip:{}", ctx.forwarded_client_ip())
                }
            }
            "header" => {
                let header_name = self.options.header_name.as_deref().unwrap_or_default();
                match ctx.header(header_name) {
                    Some(value) => format!("header:{value}"),
                    None => format!("ip:{}", ctx.forwarded_client_ip()),
                }
            }
            _ => format!("ip:{}", ctx.forwarded_client_ip()),
        }
    }

    fn quota_header(name: &str, window: &'static str) -> Option<HeaderName> {
        HeaderName::try_from(format!("x-ratelimit-{name}-{window}")).ok()
    }
}

#[async_trait]
impl Plugin for RateLimitingPlugin {
    fn name(&self) -> &'static str {
        "rate-limiting"
    }

    async fn access(&self, ctx: &mut RequestContext) -> Result<()> {
        let key = self.identifier(ctx);
        let mut quota_headers: Vec<(HeaderName, HeaderValue)> = Vec::new();

        for window in &self.windows {
            match window.limiter.check_key(&key) {
                Ok(snapshot) => {
                    if !self.options.hide_client_headers {
                        let remaining = snapshot.remaining_burst_capacity();
                        if let (Some(limit_name), Some(rem_name)) = (
                            Self::quota_header("limit", window.name),
                            Self::quota_header("remaining", window.name),
                        ) {
                            quota_headers
                                .push((limit_name, HeaderValue::from(window.limit)));
                            quota_headers.push((rem_name, HeaderValue::from(remaining)));
                        }
                    }
                }
                Err(not_until) => {
                    let retry_after = not_until
                        .wait_time_from(self.clock.now())
                        .as_secs()
                        .max(1);

                    let mut resp = ProxyResponse::error(
                        StatusCode::from_u16(self.options.error_code)
                            .unwrap_or(StatusCode::TOO_MANY_REQUESTS),
                        &self.options.error_message,
                    );
                    for (name, value) in quota_headers {
                        resp.headers.insert(name, value);
                    }
                    if !self.options.hide_client_headers {
                        if let (Some(limit_name), Some(rem_name)) = (
                            Self::quota_header("limit", window.name),
                            Self::quota_header("remaining", window.name),
                        ) {
                            resp.headers.insert(limit_name, HeaderValue::from(window.limit));
                            resp.headers.insert(rem_name, HeaderValue::from(0u32));
                        }
                    }
                    resp.headers
                        .insert(http::header::RETRY_AFTER, HeaderValue::from(retry_after));

                    ctx.set_short_circuit(resp);
                    return Ok(());
                }
            }
        }

        ctx.pending_response_headers.append(&mut quota_headers);
        Ok(())
    }

    async fn response(&self, ctx: &mut RequestContext, resp: &mut ProxyResponse) -> Result<()> {
        for (name, value) in ctx.pending_response_headers.drain(..) {
            resp.headers.insert(name, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderValue, Method};

    use super::*;
    use crate::plugins::test_support::context;

    fn plugin(options: serde_json::Value) -> RateLimitingPlugin {
        RateLimitingPlugin::from_options(&options).unwrap()
    }

    #[tokio::test]
    async fn test_limit_then_reject_within_minute() {
        let plugin = plugin(serde_json::json!({ "minute": 2, "limit_by": "ip" }));

        for expected_remaining in [1u32, 0] {
            let mut ctx = context(Method::GET, "/api");
            plugin.access(&mut ctx).await.unwrap();
            assert!(ctx.short_circuit.is_none());

            let remaining = ctx
                .pending_response_headers
                .iter()
                .find(|(n, _)| n.as_str() == "x-ratelimit-remaining-minute")
                .map(|(_, v)| v.to_str().unwrap().to_string())
                .unwrap();
            assert_eq!(remaining, expected_remaining.to_string());
        }

        // third request inside the window is rejected
        let mut ctx = context(Method::GET, "/api");
        plugin.access(&mut ctx).await.unwrap();
        let resp = ctx.short_circuit.expect("limited");
        assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers.get("x-ratelimit-remaining-minute").unwrap(),
            "0"
        );
        let retry_after: u64 = resp
            .headers
            .get(http::header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
    }

    #[tokio::test]
    async fn test_keys_are_isolated_per_ip() {
        let plugin = plugin(serde_json::json!({ "minute": 1, "limit_by": "ip" }));

        let mut first = context(Method::GET, "/api");
        plugin.access(&mut first).await.unwrap();
        assert!(first.short_circuit.is_none());

        // same ip: limited
        let mut again = context(Method::GET, "/api");
        plugin.access(&mut again).await.unwrap();
        assert!(again.short_circuit.is_some());

        // other ip: fresh counter
        let mut other = context(Method::GET, "/api");
        other.headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5"),
        );
        plugin.access(&mut other).await.unwrap();
        assert!(other.short_circuit.is_none());
    }

    #[tokio::test]
    async fn test_hide_client_headers() {
        let plugin = plugin(serde_json::json!({
            "minute": 1,
            "hide_client_headers": true,
        }));

        let mut ctx = context(Method::GET, "/api");
        plugin.access(&mut ctx).await.unwrap();
        assert!(ctx.pending_response_headers.is_empty());
    }

    #[tokio::test]
    async fn test_consumer_keying() {
        let plugin = plugin(serde_json::json!({ "minute": 1, "limit_by": "consumer" }));

        let mut alice = context(Method::GET, "/api");
        alice.consumer = Some(crate::plugins::Consumer {
            username: Some("alice".to_string()),
            ..Default::default()
        });
        plugin.access(&mut alice).await.unwrap();
        assert!(alice.short_circuit.is_none());

        let mut bob = context(Method::GET, "/api");
        bob.consumer = Some(crate::plugins::Consumer {
            username: Some("bob".to_string()),
            ..Default::default()
        });
        plugin.access(&mut bob).await.unwrap();
        assert!(bob.short_circuit.is_none());
    }

    #[test]
    fn test_non_local_policy_rejected() {
        assert!(RateLimitingPlugin::from_options(&serde_json::json!({ "policy": "redis" })).is_err());
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(RateLimitingPlugin::from_options(&serde_json::json!({ "minute": 0 })).is_err());
    }
}
