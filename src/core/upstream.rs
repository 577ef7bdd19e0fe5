//! Upstream pools and the manager that owns them.
//!
//! An [`Upstream`] is a named, ordered list of targets paired with one
//! circuit breaker per target, a balancing strategy, and retry policy. The
//! [`UpstreamManager`] maps names to upstreams and backs the admin CRUD
//! surface; request tasks take per-request snapshots of the member list so
//! runtime mutations are observed by the next request without locking the
//! hot path.
use std::{
    net::IpAddr,
    sync::{Arc, RwLock},
    time::Duration,
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{
        CircuitBreakerConfig, HealthCheckConfig, LoadBalancingAlgorithm, RetryConfig, TargetConfig,
        UpstreamConfig,
    },
    core::{
        balancer::{BalancingStrategy, strategy_for},
        circuit_breaker::{BreakerSnapshot, CircuitBreaker},
        error::GatewayError,
        target::{Target, TargetStatus},
    },
};

/// One target plus the breaker guarding it.
pub struct Member {
    pub target: Arc<Target>,
    pub breaker: CircuitBreaker,
}

impl Member {
    fn new(config: &TargetConfig, breaker_config: &CircuitBreakerConfig) -> Self {
        Self {
            target: Arc::new(Target::new(&config.host, config.port, config.weight)),
            breaker: CircuitBreaker::new(breaker_config),
        }
    }
}

/// RAII guard for a selected target's active-connection slot.
///
/// Releases the slot on drop, which covers every exit path of a forwarded
/// request including cancellation and panics.
pub struct ConnectionGuard {
    member: Arc<Member>,
}

impl ConnectionGuard {
    fn new(member: Arc<Member>) -> Self {
        member.target.acquire();
        Self { member }
    }

    pub fn member(&self) -> &Arc<Member> {
        &self.member
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.member.target
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.member.target.release();
    }
}

/// A named pool of targets sharing balancing and resilience policy.
pub struct Upstream {
    name: String,
    algorithm: LoadBalancingAlgorithm,
    strategy: Box<dyn BalancingStrategy>,
    members: RwLock<Vec<Arc<Member>>>,
    breaker_config: CircuitBreakerConfig,
    health_check: HealthCheckConfig,
    retry: RetryConfig,
    read_timeout: Duration,
    checker_token: CancellationToken,
}

impl Upstream {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        let members = config
            .targets
            .iter()
            .map(|t| Arc::new(Member::new(t, &config.circuit_breaker)))
            .collect();

        Self {
            name: config.name.clone(),
            algorithm: config.algorithm,
            strategy: strategy_for(config.algorithm),
            members: RwLock::new(members),
            breaker_config: config.circuit_breaker.clone(),
            health_check: config.health_check.clone(),
            retry: config.retry.clone(),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            checker_token: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn health_check(&self) -> &HealthCheckConfig {
        &self.health_check
    }

    /// Retry policy accessor used by the forwarder.
    pub fn retry_plan(&self) -> &RetryConfig {
        &self.retry
    }

    /// Per-attempt deadline for forwarded requests.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Token cancelled when this upstream is removed; stops its checker.
    pub fn checker_token(&self) -> CancellationToken {
        self.checker_token.clone()
    }

    /// Snapshot of the ordered member list.
    pub fn members(&self) -> Vec<Arc<Member>> {
        self.members.read().expect("members lock poisoned").clone()
    }

    /// Append a target at runtime (admin surface).
    pub fn add_target(&self, config: &TargetConfig) -> Arc<Member> {
        let member = Arc::new(Member::new(config, &self.breaker_config));
        self.members
            .write()
            .expect("members lock poisoned")
            .push(Arc::clone(&member));
        member
    }

    /// Pick a target that is both healthy and admitted by its breaker, then
    /// take its active-connection slot.
    ///
    /// Never returns a target excluded by health or breaker state.
    pub fn select(&self, client_ip: IpAddr) -> Result<ConnectionGuard, GatewayError> {
        let members = self.members();
        let eligible: Vec<Arc<Member>> = members
            .iter()
            .filter(|m| m.target.is_healthy() && m.breaker.allow())
            .cloned()
            .collect();

        if eligible.is_empty() {
            return Err(GatewayError::NoHealthyTarget(self.name.clone()));
        }

        let targets: Vec<Arc<Target>> = eligible.iter().map(|m| Arc::clone(&m.target)).collect();
        let chosen = self
            .strategy
            .select(&targets, client_ip)
            .ok_or_else(|| GatewayError::NoHealthyTarget(self.name.clone()))?;

        let member = eligible
            .into_iter()
            .find(|m| Arc::ptr_eq(&m.target, &chosen))
            .expect("selected target comes from the eligible set");

        Ok(ConnectionGuard::new(member))
    }

    /// Feed an attempt outcome into the breaker and target counters.
    pub fn report(&self, member: &Member, success: bool) {
        if success {
            member.target.record_success();
            member.breaker.record_success();
        } else {
            member.target.record_failure();
            member.breaker.record_failure();
        }
    }

    pub fn snapshot(&self) -> UpstreamSnapshot {
        let members = self.members();
        UpstreamSnapshot {
            name: self.name.clone(),
            algorithm: self.algorithm.to_string(),
            targets: members.iter().map(|m| m.target.status()).collect(),
            breakers: members.iter().map(|m| m.breaker.snapshot()).collect(),
            health_check_enabled: self.health_check.enabled,
            health_check_interval_secs: self.health_check.interval_secs,
        }
    }
}

/// Admin-facing view of an upstream.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamSnapshot {
    pub name: String,
    pub algorithm: String,
    pub targets: Vec<TargetStatus>,
    pub breakers: Vec<BreakerSnapshot>,
    pub health_check_enabled: bool,
    pub health_check_interval_secs: u64,
}

/// Errors from runtime upstream CRUD.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamCrudError {
    #[error("upstream '{0}' already exists")]
    AlreadyExists(String),
    #[error("upstream '{0}' not found")]
    NotFound(String),
}

/// Owns every upstream by name.
///
/// Cheap to share behind an `Arc`; the concurrent map lets admin mutations
/// land while requests read their own snapshots.
#[derive(Default)]
pub struct UpstreamManager {
    upstreams: scc::HashMap<String, Arc<Upstream>>,
}

impl UpstreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new upstream. Fails if the name is taken.
    pub fn insert(&self, config: &UpstreamConfig) -> Result<Arc<Upstream>, UpstreamCrudError> {
        let upstream = Arc::new(Upstream::from_config(config));
        match self
            .upstreams
            .insert(config.name.clone(), Arc::clone(&upstream))
        {
            Ok(()) => Ok(upstream),
            Err(_) => Err(UpstreamCrudError::AlreadyExists(config.name.clone())),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Upstream>> {
        self.upstreams.read(name, |_, v| Arc::clone(v))
    }

    /// Remove an upstream, cancelling its health checker task.
    pub fn remove(&self, name: &str) -> bool {
        if let Some((_, upstream)) = self.upstreams.remove(name) {
            upstream.checker_token.cancel();
            true
        } else {
            false
        }
    }

    pub fn list(&self) -> Vec<Arc<Upstream>> {
        let mut out = Vec::new();
        self.upstreams.scan(|_, v| out.push(Arc::clone(v)));
        out
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    /// Select a target from a named upstream.
    pub fn select(
        &self,
        name: &str,
        client_ip: IpAddr,
    ) -> Result<(Arc<Upstream>, ConnectionGuard), GatewayError> {
        let upstream = self
            .get(name)
            .ok_or_else(|| GatewayError::UpstreamNotFound(name.to_string()))?;
        let guard = upstream.select(client_ip)?;
        Ok((upstream, guard))
    }

    /// Cancel every checker task, used during shutdown.
    pub fn stop_all(&self) {
        self.upstreams.scan(|_, v| v.checker_token.cancel());
    }
}
