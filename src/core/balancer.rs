//! Load balancing strategies.
//!
//! A strategy is stateless or internally synchronized and can be shared
//! across request tasks. Implementors should avoid heavy contention in
//! `select` as it runs in the request hot path; the round-robin cursor is a
//! plain atomic and the smooth-weighted state is a small mutex-guarded map.
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::{config::LoadBalancingAlgorithm, core::target::Target};

/// Trait defining the interface for load balancing strategies.
///
/// `targets` is the already-filtered healthy set, in pool order. Returns
/// `None` only when the slice is empty.
pub trait BalancingStrategy: Send + Sync {
    fn select(&self, targets: &[Arc<Target>], client_ip: IpAddr) -> Option<Arc<Target>>;
}

/// Round-robin over the healthy set with an atomic cursor.
#[derive(Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl BalancingStrategy for RoundRobinStrategy {
    fn select(&self, targets: &[Arc<Target>], _client_ip: IpAddr) -> Option<Arc<Target>> {
        if targets.is_empty() {
            return None;
        }
        let count = self.cursor.fetch_add(1, Ordering::SeqCst);
        Some(Arc::clone(&targets[count % targets.len()]))
    }
}

/// Fewest active connections wins; ties break to the earliest pool position.
#[derive(Default)]
pub struct LeastConnectionsStrategy;

impl BalancingStrategy for LeastConnectionsStrategy {
    fn select(&self, targets: &[Arc<Target>], _client_ip: IpAddr) -> Option<Arc<Target>> {
        let mut best: Option<&Arc<Target>> = None;
        let mut best_conns = u32::MAX;
        for target in targets {
            let conns = target.active_connections();
            if conns < best_conns {
                best_conns = conns;
                best = Some(target);
            }
        }
        best.map(Arc::clone)
    }
}

/// Sticky selection by client address.
///
/// The hash must be deterministic across process restarts for the same IP
/// and the same ordered healthy set, so a seeded process hasher is out;
/// SHA-256 of the textual address is stable everywhere.
#[derive(Default)]
pub struct IpHashStrategy;

fn stable_hash(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

impl BalancingStrategy for IpHashStrategy {
    fn select(&self, targets: &[Arc<Target>], client_ip: IpAddr) -> Option<Arc<Target>> {
        if targets.is_empty() {
            return None;
        }
        let index = stable_hash(&client_ip.to_string()) as usize % targets.len();
        Some(Arc::clone(&targets[index]))
    }
}

/// Smooth weighted round-robin (current-weight / effective-weight).
///
/// Every pass adds each target's effective weight to its running current
/// weight, picks the largest, and subtracts the total. Long-run shares
/// match the weight ratios exactly; weight 0 excludes a target.
#[derive(Default)]
pub struct WeightedStrategy {
    current_weights: Mutex<HashMap<String, i64>>,
}

impl BalancingStrategy for WeightedStrategy {
    fn select(&self, targets: &[Arc<Target>], _client_ip: IpAddr) -> Option<Arc<Target>> {
        if targets.is_empty() {
            return None;
        }

        let weighted: Vec<&Arc<Target>> =
            targets.iter().filter(|t| t.effective_weight() > 0).collect();
        if weighted.is_empty() {
            // all weights zero, fall back to the first healthy target
            return targets.first().map(Arc::clone);
        }

        let total: i64 = weighted.iter().map(|t| t.effective_weight() as i64).sum();
        let mut current = self.current_weights.lock().expect("weights lock poisoned");

        let mut best: Option<&Arc<Target>> = None;
        let mut best_weight = i64::MIN;
        for &target in &weighted {
            let entry = current.entry(target.address()).or_insert(0);
            *entry += target.effective_weight() as i64;
            if *entry > best_weight {
                best_weight = *entry;
                best = Some(target);
            }
        }

        let chosen = best.expect("non-empty weighted set");
        if let Some(entry) = current.get_mut(&chosen.address()) {
            *entry -= total;
        }
        Some(Arc::clone(chosen))
    }
}

/// Uniform random choice, or weighted random when any weight is positive.
#[derive(Default)]
pub struct RandomStrategy;

impl BalancingStrategy for RandomStrategy {
    fn select(&self, targets: &[Arc<Target>], _client_ip: IpAddr) -> Option<Arc<Target>> {
        if targets.is_empty() {
            return None;
        }

        let total: u64 = targets.iter().map(|t| t.effective_weight() as u64).sum();
        if total == 0 {
            let index = rand::rng().random_range(0..targets.len());
            return Some(Arc::clone(&targets[index]));
        }

        let mut roll = rand::rng().random_range(0..total);
        for target in targets {
            let weight = target.effective_weight() as u64;
            if roll < weight {
                return Some(Arc::clone(target));
            }
            roll -= weight;
        }
        targets.last().map(Arc::clone)
    }
}

/// Build the strategy for a configured algorithm.
pub fn strategy_for(algorithm: LoadBalancingAlgorithm) -> Box<dyn BalancingStrategy> {
    match algorithm {
        LoadBalancingAlgorithm::RoundRobin => Box::new(RoundRobinStrategy::default()),
        LoadBalancingAlgorithm::LeastConnections => Box::new(LeastConnectionsStrategy),
        LoadBalancingAlgorithm::IpHash => Box::new(IpHashStrategy),
        LoadBalancingAlgorithm::Weighted => Box::new(WeightedStrategy::default()),
        LoadBalancingAlgorithm::Random => Box::new(RandomStrategy),
    }
}
