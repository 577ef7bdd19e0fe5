//! Active health probing.
//!
//! One checker task per upstream, started at gateway boot and whenever an
//! upstream is created through the admin API. Every interval it issues a
//! GET to each target's probe path; a status in [200, 399] counts as up.
//! Streaks against the configured thresholds flip the target's health flag.
//! The task never holds request-path locks and stops when the upstream's
//! cancellation token fires.
use std::{sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{
    core::upstream::{Member, Upstream},
    ports::http_client::HttpClient,
};

pub struct HealthChecker {
    upstream: Arc<Upstream>,
    http_client: Arc<dyn HttpClient>,
}

impl HealthChecker {
    pub fn new(upstream: Arc<Upstream>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            upstream,
            http_client,
        }
    }

    /// Spawn the probe loop for one upstream if health checking is enabled.
    pub fn spawn(upstream: Arc<Upstream>, http_client: Arc<dyn HttpClient>) {
        if !upstream.health_check().enabled {
            return;
        }
        let checker = HealthChecker::new(upstream, http_client);
        tokio::spawn(async move { checker.run().await });
    }

    pub async fn run(&self) {
        let config = self.upstream.health_check().clone();
        let interval = Duration::from_secs(config.interval_secs);
        let probe_timeout = Duration::from_secs(config.timeout_secs);
        let token = self.upstream.checker_token();

        tracing::info!(
            upstream = self.upstream.name(),
            interval_secs = config.interval_secs,
            path = %config.path,
            "health checker started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!(upstream = self.upstream.name(), "health checker stopped");
                    return;
                }
                _ = sleep(interval) => {}
            }

            for member in self.upstream.members() {
                let url = format!("{}{}", member.target.url(), config.path);
                let up = match self.http_client.probe(&url, probe_timeout).await {
                    Ok(status) => (200..400).contains(&status.as_u16()),
                    Err(error) => {
                        tracing::debug!(
                            upstream = self.upstream.name(),
                            target = %member.target.address(),
                            error = %error,
                            "health probe failed"
                        );
                        false
                    }
                };
                self.apply_probe(&member, up, &config);
            }
        }
    }

    /// Feed one probe result through the threshold state machine.
    fn apply_probe(
        &self,
        member: &Member,
        up: bool,
        config: &crate::config::HealthCheckConfig,
    ) {
        let target = &member.target;
        if up {
            let streak = target.probe_success();
            if streak >= config.healthy_threshold && !target.is_healthy() {
                tracing::info!(
                    upstream = self.upstream.name(),
                    target = %target.address(),
                    streak,
                    "target is now healthy"
                );
                target.mark_healthy();
            }
        } else {
            let streak = target.probe_failure();
            if streak >= config.unhealthy_threshold && target.is_healthy() {
                tracing::warn!(
                    upstream = self.upstream.name(),
                    target = %target.address(),
                    streak,
                    "target is now unhealthy"
                );
                target.mark_unhealthy();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use hyper::{Request, Response};

    use super::*;
    use crate::{
        config::{HealthCheckConfig, TargetConfig, UpstreamConfig},
        ports::http_client::{HttpClientError, HttpClientResult},
    };

    struct FixedStatusClient {
        status: StatusCode,
    }

    #[async_trait]
    impl HttpClient for FixedStatusClient {
        async fn send_request(
            &self,
            _req: Request<Full<Bytes>>,
        ) -> HttpClientResult<Response<Bytes>> {
            Err(HttpClientError::Connection("unused".to_string()))
        }

        async fn probe(&self, _url: &str, _timeout: Duration) -> HttpClientResult<StatusCode> {
            Ok(self.status)
        }
    }

    fn upstream(unhealthy_threshold: u32, healthy_threshold: u32) -> Arc<Upstream> {
        Arc::new(Upstream::from_config(&UpstreamConfig {
            name: "u".to_string(),
            targets: vec![TargetConfig {
                host: "127.0.0.1".to_string(),
                port: 3001,
                weight: 100,
            }],
            algorithm: Default::default(),
            health_check: HealthCheckConfig {
                enabled: true,
                path: "/health".to_string(),
                interval_secs: 10,
                timeout_secs: 1,
                healthy_threshold,
                unhealthy_threshold,
            },
            circuit_breaker: Default::default(),
            retry: Default::default(),
            read_timeout_ms: 1_000,
        }))
    }

    #[tokio::test]
    async fn test_down_streak_flips_unhealthy() {
        let upstream = upstream(3, 2);
        let client: Arc<dyn HttpClient> = Arc::new(FixedStatusClient {
            status: StatusCode::INTERNAL_SERVER_ERROR,
        });
        let checker = HealthChecker::new(Arc::clone(&upstream), client);
        let member = Arc::clone(&upstream.members()[0]);
        let config = upstream.health_check().clone();

        checker.apply_probe(&member, false, &config);
        checker.apply_probe(&member, false, &config);
        assert!(member.target.is_healthy());
        checker.apply_probe(&member, false, &config);
        assert!(!member.target.is_healthy());
    }

    #[tokio::test]
    async fn test_up_streak_flips_healthy_and_resets() {
        let upstream = upstream(1, 2);
        let client: Arc<dyn HttpClient> = Arc::new(FixedStatusClient {
            status: StatusCode::OK,
        });
        let checker = HealthChecker::new(Arc::clone(&upstream), client);
        let member = Arc::clone(&upstream.members()[0]);
        let config = upstream.health_check().clone();

        checker.apply_probe(&member, false, &config);
        assert!(!member.target.is_healthy());

        checker.apply_probe(&member, true, &config);
        assert!(!member.target.is_healthy());
        checker.apply_probe(&member, true, &config);
        assert!(member.target.is_healthy());

        // recovery reset the failure streak, so one down probe re-trips
        // only because unhealthy_threshold is 1 here
        checker.apply_probe(&member, false, &config);
        assert!(!member.target.is_healthy());
    }

    #[tokio::test]
    async fn test_redirect_status_counts_as_up() {
        let upstream = upstream(1, 1);
        let client: Arc<dyn HttpClient> = Arc::new(FixedStatusClient {
            status: StatusCode::FOUND,
        });
        let checker = HealthChecker::new(Arc::clone(&upstream), Arc::clone(&client));
        let member = Arc::clone(&upstream.members()[0]);
        let config = upstream.health_check().clone();

        member.target.mark_unhealthy();
        // 302 is within [200, 399]
        let status = client.probe("http://x/health", Duration::from_secs(1)).await.unwrap();
        checker.apply_probe(&member, (200..400).contains(&status.as_u16()), &config);
        assert!(member.target.is_healthy());
    }
}
