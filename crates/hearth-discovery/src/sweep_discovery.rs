//! Deadline-budgeted subnet sweep, the alternate discovery backend for
//! networks without a UDP responder.
//!
//! Candidates are seeded from the neighbor table and known trusted ips, then
//! the local /24 is walked in bounded batches. Every host gets a short
//! reachability probe; reachable hosts get a hello probe while the hello
//! budget lasts. The sweep stops starting new batches as soon as a host
//! matching the caller's predicate is found.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hearth_trust::TrustSnapshot;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::peer_discovery::{DiscoveredHost, HostStatus};
use crate::probes::{hello_probe, is_router_ip, neighbor_table_ips, ping_once};

const DEFAULT_SUBNET_PREFIX: [u8; 3] = [192, 168, 1];

/// Time and size limits of one sweep.
///
/// `initial_phase`, `hello_phase` and `hard_stop` run from the sweep start;
/// `fallback_sweep` runs from the start of the fallback phase. `hard_stop`
/// caps everything, neighbor-table seeding included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepBudget {
    pub initial_phase: Duration,
    pub hello_phase: Duration,
    pub fallback_sweep: Duration,
    pub hard_stop: Duration,
    pub ping_timeout: Duration,
    pub hello_timeout: Duration,
    pub concurrency: usize,
    pub batch_size: usize,
    pub max_hosts: usize,
}

impl Default for SweepBudget {
    fn default() -> Self {
        Self {
            initial_phase: Duration::from_secs(3),
            hello_phase: Duration::from_secs(12),
            fallback_sweep: Duration::from_secs(30),
            hard_stop: Duration::from_secs(60),
            ping_timeout: Duration::from_millis(350),
            hello_timeout: Duration::from_millis(900),
            concurrency: 128,
            batch_size: 64,
            max_hosts: 256,
        }
    }
}

/// Network probes used by the sweep.
#[async_trait]
pub trait HostProber: Send + Sync + 'static {
    async fn neighbor_ips(&self) -> Vec<String>;
    /// Round-trip in ms when the host answers within `timeout`.
    async fn reachable(&self, ip: &str, timeout: Duration) -> Option<u64>;
    async fn hello(&self, ip: &str, timeout: Duration) -> bool;
}

/// Probes using the system `ping`, neighbor table tools, and HTTP hello.
#[derive(Debug, Clone)]
pub struct SystemProber {
    client: reqwest::Client,
    hello_port: u16,
}

impl SystemProber {
    pub fn new(client: reqwest::Client, hello_port: u16) -> Self {
        Self { client, hello_port }
    }
}

#[async_trait]
impl HostProber for SystemProber {
    async fn neighbor_ips(&self) -> Vec<String> {
        neighbor_table_ips().await
    }

    async fn reachable(&self, ip: &str, timeout: Duration) -> Option<u64> {
        ping_once(ip, timeout).await
    }

    async fn hello(&self, ip: &str, timeout: Duration) -> bool {
        hello_probe(&self.client, ip, self.hello_port, timeout).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepPhase {
    Initial,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub hosts: Vec<DiscoveredHost>,
    pub scanned: usize,
    pub node_found: bool,
    pub phase: SweepPhase,
    pub duration_ms: u64,
}

pub struct SweepDiscovery<P: HostProber> {
    prober: Arc<P>,
    trust: Arc<TrustSnapshot>,
    self_ip: Option<Ipv4Addr>,
    subnet_prefix: [u8; 3],
    budget: SweepBudget,
}

type FoundPredicate<'a> = &'a (dyn Fn(&DiscoveredHost) -> bool + Send + Sync);

struct SweepState {
    scanned: HashSet<String>,
    hosts: Vec<DiscoveredHost>,
    found: Arc<AtomicBool>,
}

impl<P: HostProber> SweepDiscovery<P> {
    pub fn new(prober: P, trust: TrustSnapshot, self_ip: Option<Ipv4Addr>) -> Self {
        let subnet_prefix = self_ip
            .map(|ip| {
                let [a, b, c, _] = ip.octets();
                [a, b, c]
            })
            .unwrap_or(DEFAULT_SUBNET_PREFIX);
        Self {
            prober: Arc::new(prober),
            trust: Arc::new(trust),
            self_ip,
            subnet_prefix,
            budget: SweepBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: SweepBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> SweepBudget {
        self.budget
    }

    /// Valid IPv4, not a router, not a network or broadcast address, not self.
    pub fn is_candidate(&self, ip: &str) -> bool {
        let Ok(parsed) = ip.parse::<Ipv4Addr>() else {
            return false;
        };
        if is_router_ip(ip) {
            return false;
        }
        if Some(parsed) == self.self_ip {
            return false;
        }
        !matches!(parsed.octets()[3], 0 | 255)
    }

    /// Sweeps until a node answering hello is found or budgets run out.
    pub async fn run(&self) -> SweepReport {
        self.run_until(&|host: &DiscoveredHost| host.is_node).await
    }

    pub async fn run_until(&self, found: FoundPredicate<'_>) -> SweepReport {
        let started = Instant::now();
        let hard_deadline = started + self.budget.hard_stop;
        let hello_deadline = hard_deadline.min(started + self.budget.hello_phase);
        let mut state = SweepState {
            scanned: HashSet::new(),
            hosts: Vec::new(),
            found: Arc::new(AtomicBool::new(false)),
        };

        let mut candidates: Vec<String> = Vec::new();
        let mut seeded: HashSet<String> = HashSet::new();
        let mut seeds: Vec<String> = self.trust.known_ips().into_iter().collect();
        match tokio::time::timeout_at(hard_deadline, self.prober.neighbor_ips()).await {
            Ok(neighbors) => seeds.extend(neighbors),
            Err(_) => tracing::debug!("sweep hard stop reached while reading neighbor table"),
        }
        for ip in seeds {
            if self.is_candidate(&ip) && seeded.insert(ip.clone()) {
                candidates.push(ip);
            }
        }
        tracing::debug!(count = candidates.len(), "sweep initial candidates");

        let initial_deadline = hard_deadline.min(started + self.budget.initial_phase);
        self.run_batch(candidates, initial_deadline, hello_deadline, found, &mut state)
            .await;
        if state.found.load(Ordering::SeqCst) {
            return self.report(state, SweepPhase::Initial, started);
        }

        let fallback_deadline = hard_deadline.min(Instant::now() + self.budget.fallback_sweep);
        let mut last_octet: u16 = 1;
        while !state.found.load(Ordering::SeqCst)
            && Instant::now() < fallback_deadline
            && state.scanned.len() < self.budget.max_hosts
            && last_octet <= 254
        {
            let remaining = self.budget.max_hosts - state.scanned.len();
            let mut batch = Vec::new();
            while batch.len() < self.budget.batch_size.min(remaining) && last_octet <= 254 {
                let [a, b, c] = self.subnet_prefix;
                let ip = format!("{a}.{b}.{c}.{last_octet}");
                last_octet += 1;
                if seeded.contains(&ip) || state.scanned.contains(&ip) || !self.is_candidate(&ip) {
                    continue;
                }
                seeded.insert(ip.clone());
                batch.push(ip);
            }
            if batch.is_empty() {
                continue;
            }
            tracing::debug!(count = batch.len(), next_octet = last_octet, "sweep fallback batch");
            self.run_batch(batch, fallback_deadline, hello_deadline, found, &mut state)
                .await;
        }

        self.report(state, SweepPhase::Fallback, started)
    }

    async fn run_batch(
        &self,
        batch: Vec<String>,
        deadline: Instant,
        hello_deadline: Instant,
        found: FoundPredicate<'_>,
        state: &mut SweepState,
    ) {
        if batch.is_empty() {
            return;
        }
        let permits = Arc::new(Semaphore::new(self.budget.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for ip in batch {
            if state.scanned.len() >= self.budget.max_hosts {
                break;
            }
            if !state.scanned.insert(ip.clone()) {
                continue;
            }
            let prober = Arc::clone(&self.prober);
            let trust = Arc::clone(&self.trust);
            let permits = Arc::clone(&permits);
            let found_flag = Arc::clone(&state.found);
            let budget = self.budget;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                if found_flag.load(Ordering::SeqCst) {
                    return None;
                }
                let latency_ms = prober.reachable(&ip, budget.ping_timeout).await?;
                let is_node = Instant::now() < hello_deadline
                    && prober.hello(&ip, budget.hello_timeout).await;
                let mut host = DiscoveredHost::annotated(&ip, None, None, is_node, &trust);
                host.latency_ms = Some(latency_ms);
                if !is_node && host.status == HostStatus::Available {
                    host.status = HostStatus::Generic;
                }
                Some(host)
            });
        }

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Err(_) => {
                    tracing::debug!("sweep batch deadline reached");
                    tasks.abort_all();
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok(Some(host)))) => {
                    if found(&host) {
                        tracing::info!(ip = %host.ip, "node detected, stopping sweep");
                        state.found.store(true, Ordering::SeqCst);
                    }
                    state.hosts.push(host);
                }
                Ok(Some(_)) => {}
            }
        }
    }

    fn report(&self, state: SweepState, phase: SweepPhase, started: Instant) -> SweepReport {
        let report = SweepReport {
            node_found: state.found.load(Ordering::SeqCst),
            scanned: state.scanned.len(),
            hosts: state.hosts,
            phase,
            duration_ms: started.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
        };
        tracing::info!(
            count = report.hosts.len(),
            scanned = report.scanned,
            phase = ?report.phase,
            duration_ms = report.duration_ms,
            "sweep complete"
        );
        report
    }
}
