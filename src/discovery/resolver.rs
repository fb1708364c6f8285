//! # Resolver
//!
//! The stateful discovery aggregator. A [`Resolver`] owns three background
//! refresh loops and one published snapshot:
//!
//! 1. **CPU refresh** samples local host utilization.
//! 2. **Peer refresh** long-polls the caller's own service and sums the
//!    routing weights of same-zone peers into the capacity threshold.
//! 3. **Target refresh** long-polls the target service and partitions its
//!    instances into a same-zone and a cross-zone [`ServiceZone`].
//!
//! [`Resolver::discover_node`] consults the snapshot and picks one backend
//! with a locality-biased weighted random draw. It takes the snapshot lock
//! briefly, performs no I/O, and never suspends, so it is safe to call from
//! any number of request paths concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::config::ResolverConfig;
use crate::core::error::BalancerResult;
use crate::core::types::{ServiceNode, ServiceZone, DEFAULT_BALANCE_FACTOR};
use crate::discovery::registry::{ConsulRegistry, Registry};
use crate::system::cpu::{CpuSampler, SysinfoCpuSampler};
use crate::system::zone::{Ec2MetadataZone, ZoneProvider};

/// Utilization stored when the sampler returns an empty reading.
const DEFAULT_CPU_USAGE: u32 = 50;

/// The resolver's current view. Replaced field-wise by the refresh loops
/// under one lock; the two zones are always swapped together so readers
/// never pair partitions from different refreshes.
struct SnapshotState {
    local_zone: Arc<ServiceZone>,
    other_zone: Arc<ServiceZone>,
    factor_threshold: u64,
    my_service_num: usize,
    cpu_usage: u32,
    last_index: u64,
    my_last_index: u64,
}

/// Zone-aware service resolver with locality-biased weighted selection.
///
/// Built via [`ResolverBuilder`]; the three refresh loops run until
/// [`Resolver::stop`] is called or the last handle is dropped.
pub struct Resolver {
    config: ResolverConfig,
    registry: Arc<dyn Registry>,
    zone: String,
    state: RwLock<SnapshotState>,
    cpu_sampler: Mutex<Box<dyn CpuSampler>>,
    started: AtomicBool,
    done: AtomicBool,
}

impl Resolver {
    /// Start the three refresh loops. Idempotent; called by
    /// [`ResolverBuilder::build`].
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let period = self.config.interval;

        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = refresh_ticker(period);
            loop {
                ticker.tick().await;
                let Some(resolver) = this.upgrade() else { break };
                if resolver.is_stopped() {
                    break;
                }
                if let Err(err) = resolver.update_cpu_usage() {
                    warn!(error = %err, "cpu usage refresh failed");
                }
            }
        });

        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = refresh_ticker(period);
            loop {
                ticker.tick().await;
                let Some(resolver) = this.upgrade() else { break };
                if resolver.is_stopped() {
                    break;
                }
                if let Err(err) = resolver.update_factor_threshold().await {
                    warn!(error = %err, "factor threshold refresh failed");
                }
            }
        });

        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = refresh_ticker(period);
            loop {
                ticker.tick().await;
                let Some(resolver) = this.upgrade() else { break };
                if resolver.is_stopped() {
                    break;
                }
                if let Err(err) = resolver.update_service_zone().await {
                    warn!(error = %err, "service zone refresh failed");
                }
            }
        });
    }

    /// Signal termination. Each loop exits at its next tick; an in-flight
    /// long-poll completes naturally and its result is discarded.
    pub fn stop(&self) {
        self.done.store(true, Ordering::SeqCst);
        info!(service = %self.config.service, "resolver stopped");
    }

    fn is_stopped(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// The caller's availability zone, resolved once at construction.
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// The configuration this resolver was built with.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Current same-zone partition of the target service.
    pub fn local_zone(&self) -> Arc<ServiceZone> {
        self.state.read().local_zone.clone()
    }

    /// Current cross-zone partition of the target service.
    pub fn other_zone(&self) -> Arc<ServiceZone> {
        self.state.read().other_zone.clone()
    }

    /// Last sampled local CPU utilization percent.
    pub fn cpu_usage(&self) -> u32 {
        self.state.read().cpu_usage
    }

    /// Aggregate routing weight of same-zone peer callers.
    pub fn factor_threshold(&self) -> u64 {
        self.state.read().factor_threshold
    }

    /// Select one backend instance, or `None` when no routable instance
    /// exists.
    ///
    /// The draw is weight-proportional within a zone. The local zone is
    /// preferred; when the derived capacity threshold exceeds the local
    /// supply (same-zone peers collectively demand more than the local
    /// partition offers), a proportional share of calls spills to the
    /// cross-zone partition.
    pub fn discover_node(&self) -> Option<Arc<ServiceNode>> {
        let (local, other, factor_threshold, my_service_num, cpu_usage) = {
            let state = self.state.read();
            (
                state.local_zone.clone(),
                state.other_zone.clone(),
                state.factor_threshold,
                state.my_service_num,
                state.cpu_usage,
            )
        };

        let total_max = local.factor_max + other.factor_max;
        if total_max == 0 {
            counter!("balancer_failed_selections").increment(1);
            return None;
        }

        let mut threshold = factor_threshold;
        if self.config.service_ratio != 0.0 {
            let node_count = local.len() + other.len();
            if node_count > 0 {
                let scaled = (total_max * my_service_num as u64) as f64 * self.config.service_ratio;
                threshold = (scaled / node_count as f64) as u64;
            }
        }
        threshold = threshold * u64::from(cpu_usage) / 100;
        if self.config.cpu_threshold != 0.0 {
            threshold = (threshold as f64 / self.config.cpu_threshold) as u64;
        }

        let mut rng = rand::thread_rng();
        let mut candidate = &local;
        if threshold > local.factor_max || local.factor_max == 0 {
            let mut cap = total_max;
            if cap > threshold && threshold > 0 {
                cap = threshold;
            }
            if rng.gen_range(0..cap) >= local.factor_max {
                candidate = &other;
            }
        }
        if candidate.factor_max == 0 {
            counter!("balancer_failed_selections").increment(1);
            return None;
        }

        let point = rng.gen_range(0..candidate.factor_max);
        let idx = candidate.factors.partition_point(|&factor| factor <= point);
        let node = candidate.nodes[idx].clone();

        counter!("balancer_selections").increment(1);
        debug!(instance = %node.address, zone = %node.zone, "selected backend instance");
        Some(node)
    }

    fn update_cpu_usage(&self) -> BalancerResult<()> {
        let percents = self.cpu_sampler.lock().sample()?;
        let usage = match percents.first() {
            None => DEFAULT_CPU_USAGE,
            Some(&0) => 1,
            Some(&percent) => percent,
        };
        self.state.write().cpu_usage = usage;
        gauge!("balancer_cpu_usage_percent").set(f64::from(usage));
        Ok(())
    }

    async fn update_factor_threshold(&self) -> BalancerResult<()> {
        let last_index = self.state.read().my_last_index;
        let (instances, new_index) = self
            .registry
            .healthy_instances(&self.config.peer_service, last_index)
            .await?;
        if self.is_stopped() {
            return Ok(());
        }

        let mut factor_threshold = 0u64;
        let mut my_service_num = 0usize;
        for instance in &instances {
            if instance.zone() == self.zone {
                factor_threshold += instance.balance_factor().unwrap_or(0);
                my_service_num += 1;
            }
        }

        {
            let mut state = self.state.write();
            state.my_last_index = new_index;
            state.factor_threshold = factor_threshold;
            state.my_service_num = my_service_num;
        }
        debug!(
            factor_threshold,
            my_service_num,
            index = new_index,
            "updated peer capacity view"
        );
        Ok(())
    }

    async fn update_service_zone(&self) -> BalancerResult<()> {
        let last_index = self.state.read().last_index;
        let (instances, new_index) = self
            .registry
            .healthy_instances(&self.config.service, last_index)
            .await?;
        if self.is_stopped() {
            return Ok(());
        }

        let mut local_zone = ServiceZone::default();
        let mut other_zone = ServiceZone::default();
        for instance in instances {
            let balance_factor = instance.balance_factor().unwrap_or(DEFAULT_BALANCE_FACTOR);
            let zone = instance.zone().to_string();
            let node = ServiceNode::new(instance.address, instance.port, zone, balance_factor);
            if node.zone == self.zone {
                local_zone.push(node);
            } else {
                other_zone.push(node);
            }
        }

        debug!(
            local = local_zone.len(),
            local_factor_max = local_zone.factor_max,
            other = other_zone.len(),
            other_factor_max = other_zone.factor_max,
            index = new_index,
            "updated service zones"
        );

        let mut state = self.state.write();
        state.last_index = new_index;
        state.local_zone = Arc::new(local_zone);
        state.other_zone = Arc::new(other_zone);
        Ok(())
    }
}

fn refresh_ticker(period: Duration) -> tokio::time::Interval {
    // Long-polls routinely outlast the period; skip the backlog instead of
    // firing a burst of catch-up refreshes.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Builder for [`Resolver`].
///
/// The registry, CPU sampler, and zone provider default to the production
/// backends ([`ConsulRegistry`], [`SysinfoCpuSampler`], [`Ec2MetadataZone`])
/// and can each be swapped out.
pub struct ResolverBuilder {
    config: ResolverConfig,
    registry: Option<Arc<dyn Registry>>,
    cpu_sampler: Option<Box<dyn CpuSampler>>,
    zone_provider: Box<dyn ZoneProvider>,
}

impl ResolverBuilder {
    /// Start a builder for the given registry address and service pair.
    pub fn new(
        registry_address: impl Into<String>,
        service: impl Into<String>,
        peer_service: impl Into<String>,
    ) -> Self {
        Self::from_config(ResolverConfig::new(registry_address, service, peer_service))
    }

    /// Start a builder from a complete configuration.
    pub fn from_config(config: ResolverConfig) -> Self {
        Self {
            config,
            registry: None,
            cpu_sampler: None,
            zone_provider: Box::new(Ec2MetadataZone),
        }
    }

    /// Set the refresh period of the three background loops.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the peer-capacity ratio (0 disables the override).
    pub fn service_ratio(mut self, service_ratio: f64) -> Self {
        self.config.service_ratio = service_ratio;
        self
    }

    /// Set the CPU ceiling (0 disables the normalization).
    pub fn cpu_threshold(mut self, cpu_threshold: f64) -> Self {
        self.config.cpu_threshold = cpu_threshold;
        self
    }

    /// Pin the availability zone instead of probing the platform.
    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.config.zone = Some(zone.into());
        self
    }

    /// Use a custom registry backend.
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use a custom CPU sampler.
    pub fn cpu_sampler(mut self, sampler: impl CpuSampler + 'static) -> Self {
        self.cpu_sampler = Some(Box::new(sampler));
        self
    }

    /// Use a custom zone provider.
    pub fn zone_provider(mut self, provider: impl ZoneProvider + 'static) -> Self {
        self.zone_provider = Box::new(provider);
        self
    }

    /// Validate the configuration, run one synchronous round of the three
    /// refreshes, and start the background loops.
    ///
    /// A failure of any initial refresh aborts construction, so a returned
    /// resolver always holds a valid snapshot.
    pub async fn build(self) -> BalancerResult<Arc<Resolver>> {
        self.config.validate()?;

        let registry: Arc<dyn Registry> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(ConsulRegistry::new(&self.config.registry_address)?),
        };
        let zone = match &self.config.zone {
            Some(zone) => zone.clone(),
            None => self.zone_provider.zone(),
        };
        let cpu_sampler = self
            .cpu_sampler
            .unwrap_or_else(|| Box::new(SysinfoCpuSampler::new()));

        let resolver = Arc::new(Resolver {
            registry,
            zone,
            state: RwLock::new(SnapshotState {
                local_zone: Arc::new(ServiceZone::default()),
                other_zone: Arc::new(ServiceZone::default()),
                factor_threshold: 0,
                my_service_num: 0,
                cpu_usage: DEFAULT_CPU_USAGE,
                last_index: 0,
                my_last_index: 0,
            }),
            cpu_sampler: Mutex::new(cpu_sampler),
            config: self.config,
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });

        resolver.update_cpu_usage()?;
        resolver.update_factor_threshold().await?;
        resolver.update_service_zone().await?;

        info!(
            service = %resolver.config.service,
            peer_service = %resolver.config.peer_service,
            zone = %resolver.zone,
            interval = ?resolver.config.interval,
            "resolver initialized"
        );
        resolver.start();
        Ok(resolver)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::discovery::registry::StaticRegistry;

    fn zone_of(weights: &[u64], zone: &str, subnet: u8) -> ServiceZone {
        let mut built = ServiceZone::default();
        for (i, &weight) in weights.iter().enumerate() {
            built.push(ServiceNode::new(
                format!("10.0.{}.{}", subnet, i + 1),
                80,
                zone,
                weight,
            ));
        }
        built
    }

    fn test_resolver(
        local: ServiceZone,
        other: ServiceZone,
        factor_threshold: u64,
        my_service_num: usize,
        cpu_usage: u32,
        service_ratio: f64,
        cpu_threshold: f64,
    ) -> Resolver {
        struct NoCpu;
        impl CpuSampler for NoCpu {
            fn sample(&mut self) -> BalancerResult<Vec<u32>> {
                Ok(Vec::new())
            }
        }

        let mut config = ResolverConfig::new("127.0.0.1:8500", "backend", "frontend");
        config.service_ratio = service_ratio;
        config.cpu_threshold = cpu_threshold;
        Resolver {
            config,
            registry: Arc::new(StaticRegistry::new()),
            zone: "z-local".to_string(),
            state: RwLock::new(SnapshotState {
                local_zone: Arc::new(local),
                other_zone: Arc::new(other),
                factor_threshold,
                my_service_num,
                cpu_usage,
                last_index: 0,
                my_last_index: 0,
            }),
            cpu_sampler: Mutex::new(Box::new(NoCpu)),
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    fn draw_counts(resolver: &Resolver, draws: usize) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..draws {
            let node = resolver.discover_node().expect("a node should be selectable");
            *counts.entry(node.address.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_empty_snapshot_returns_none() {
        let resolver = test_resolver(
            ServiceZone::default(),
            ServiceZone::default(),
            0,
            0,
            100,
            0.0,
            0.0,
        );
        assert!(resolver.discover_node().is_none());
    }

    #[test]
    fn test_local_only_equal_weights() {
        let resolver = test_resolver(
            zone_of(&[100, 100, 100], "z-local", 0),
            ServiceZone::default(),
            300,
            3,
            100,
            0.0,
            0.0,
        );
        let counts = draw_counts(&resolver, 30_000);
        assert_eq!(counts.len(), 3);
        for (_, count) in counts {
            assert!((9_500..=10_500).contains(&count), "count {count} out of range");
        }
    }

    #[test]
    fn test_saturated_local_spills_to_other_zone() {
        // Threshold far above the local supply: the overflow branch runs on
        // every call with a draw cap of local+other = 300, splitting traffic
        // uniformly across the three equally-weighted instances.
        let resolver = test_resolver(
            zone_of(&[100], "z-local", 0),
            zone_of(&[100, 100], "z-other", 1),
            1_000,
            10,
            100,
            0.0,
            0.0,
        );
        let counts = draw_counts(&resolver, 30_000);
        assert_eq!(counts.len(), 3);
        for (_, count) in counts {
            assert!((9_500..=10_500).contains(&count), "count {count} out of range");
        }
    }

    #[test]
    fn test_low_cpu_keeps_selection_local() {
        // cpu 20% scales the threshold to 60 < 300, so the overflow branch
        // never runs.
        let resolver = test_resolver(
            zone_of(&[100, 100, 100], "z-local", 0),
            zone_of(&[100, 100], "z-other", 1),
            300,
            3,
            20,
            0.0,
            0.0,
        );
        for _ in 0..5_000 {
            let node = resolver.discover_node().unwrap();
            assert_eq!(node.zone, "z-local");
        }
    }

    #[test]
    fn test_service_ratio_override() {
        // T = (200 * 4 * 0.5) / 2 = 200 > 100, cap = min(200, 200): an even
        // split between the two zones.
        let resolver = test_resolver(
            zone_of(&[100], "z-local", 0),
            zone_of(&[100], "z-other", 1),
            0,
            4,
            100,
            0.5,
            0.0,
        );
        let counts = draw_counts(&resolver, 30_000);
        let local = counts.get("10.0.0.1:80").copied().unwrap_or(0);
        assert!((14_200..=15_800).contains(&local), "local share {local} out of range");
    }

    #[test]
    fn test_cpu_threshold_widens_spill() {
        // T = 60 * 100 / 100 = 60, then / 0.5 = 120 > 100: spills with cap
        // min(200, 120) = 120, so roughly a 100:20 local/other split.
        let resolver = test_resolver(
            zone_of(&[100], "z-local", 0),
            zone_of(&[100], "z-other", 1),
            60,
            1,
            100,
            0.0,
            0.5,
        );
        let counts = draw_counts(&resolver, 30_000);
        let local = counts.get("10.0.0.1:80").copied().unwrap_or(0);
        let other = counts.get("10.0.1.1:80").copied().unwrap_or(0);
        assert!(other > 0, "expected some cross-zone selections");
        assert!((24_300..=25_700).contains(&local), "local share {local} out of range");
    }

    #[test]
    fn test_empty_local_zone_always_spills() {
        let resolver = test_resolver(
            ServiceZone::default(),
            zone_of(&[100, 50], "z-other", 1),
            0,
            0,
            100,
            0.0,
            0.0,
        );
        for _ in 0..5_000 {
            let node = resolver.discover_node().unwrap();
            assert_eq!(node.zone, "z-other");
        }
    }

    #[test]
    fn test_zero_weight_node_never_selected() {
        let resolver = test_resolver(
            zone_of(&[100, 0, 50], "z-local", 0),
            ServiceZone::default(),
            150,
            2,
            100,
            0.0,
            0.0,
        );
        for _ in 0..10_000 {
            let node = resolver.discover_node().unwrap();
            assert_ne!(node.balance_factor, 0);
        }
    }

    #[test]
    fn test_weight_proportional_within_zone() {
        let resolver = test_resolver(
            zone_of(&[300, 100], "z-local", 0),
            ServiceZone::default(),
            0,
            0,
            100,
            0.0,
            0.0,
        );
        let counts = draw_counts(&resolver, 40_000);
        let heavy = counts.get("10.0.0.1:80").copied().unwrap_or(0);
        assert!((29_200..=30_800).contains(&heavy), "heavy share {heavy} out of range");
    }
}
