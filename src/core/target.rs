use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

/// A single backend endpoint with health state and connection accounting.
///
/// All fields mutated on the request path are atomics so a `Target` can be
/// shared freely between request tasks and the health checker. The health
/// flag is written only by the owning upstream's checker task; readers see
/// eventually-consistent values.
#[derive(Debug)]
pub struct Target {
    host: String,
    port: u16,
    weight: u32,
    healthy: AtomicBool,
    consecutive_successes: AtomicU32,
    consecutive_failures: AtomicU32,
    active_connections: AtomicU32,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
}

impl Target {
    /// Create a target, initially healthy.
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            weight,
            healthy: AtomicBool::new(true),
            consecutive_successes: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
            active_connections: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// "host:port" form used as the stable key for this target.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL for forwarded requests and health probes.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Weight used by the weighted strategies; unhealthy targets weigh zero.
    pub fn effective_weight(&self) -> u32 {
        if self.is_healthy() { self.weight } else { 0 }
    }

    /// Flip to healthy and reset the failure streak.
    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// Flip to unhealthy and reset the success streak.
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
        self.consecutive_successes.store(0, Ordering::Release);
    }

    /// Record one successful probe; returns the new streak length.
    pub fn probe_success(&self) -> u32 {
        self.consecutive_failures.store(0, Ordering::Release);
        self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record one failed probe; returns the new streak length.
    pub fn probe_failure(&self) -> u32 {
        self.consecutive_successes.store(0, Ordering::Release);
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take an active-connection slot.
    pub fn acquire(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
    }

    /// Return an active-connection slot. Must run on every exit path of a
    /// forwarded request; callers use [`ConnectionGuard`] for that.
    pub fn release(&self) {
        self.active_connections.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn status(&self) -> TargetStatus {
        TargetStatus {
            address: self.address(),
            weight: self.weight,
            healthy: self.is_healthy(),
            active_connections: self.active_connections(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a target, serialized by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub address: String,
    pub weight: u32,
    pub healthy: bool,
    pub active_connections: u32,
    pub total_requests: u64,
    pub total_failures: u64,
}
