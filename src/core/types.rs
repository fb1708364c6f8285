//! # Core Types
//!
//! Shared data types for the discovery and load balancing core: the backend
//! instance record ([`ServiceNode`]) and the zone partition consulted by the
//! selection path ([`ServiceZone`]).
//!
//! Both types are immutable once published in a resolver snapshot; refresh
//! loops build fresh values and swap them in wholesale.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Zone label assigned to instances whose metadata carries none, and
/// returned by the zone probe when the platform lookup fails.
pub const UNKNOWN_ZONE: &str = "unknown";

/// Metadata key carrying an instance's routing weight.
pub const META_BALANCE_FACTOR: &str = "balanceFactor";

/// Metadata key carrying an instance's availability zone.
pub const META_ZONE: &str = "zone";

/// Routing weight assigned to target-service instances whose metadata does
/// not carry a parseable `balanceFactor`. Peer-service instances default to
/// 0 instead, so unweighted peers add no capacity pressure.
pub const DEFAULT_BALANCE_FACTOR: u64 = 100;

/// One backend instance of the target service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    /// Canonical `host:port` form, as handed to the RPC transport
    pub address: String,

    /// Instance host (IP or DNS name) as reported by the registry
    pub host: String,

    /// Instance port
    pub port: u16,

    /// Availability zone, `"unknown"` when the registry carries no metadata
    pub zone: String,

    /// Relative routing weight used by the weighted-random selection
    pub balance_factor: u64,
}

impl ServiceNode {
    /// Create a new service node; the canonical address is derived from
    /// `host` and `port`.
    pub fn new(host: impl Into<String>, port: u16, zone: impl Into<String>, balance_factor: u64) -> Self {
        let host = host.into();
        Self {
            address: join_host_port(&host, port),
            host,
            port,
            zone: zone.into(),
            balance_factor,
        }
    }
}

/// One partition of target-service instances, classified as same-zone or
/// cross-zone relative to the caller.
///
/// `factors` holds the running prefix sums of the node weights, parallel to
/// `nodes`; a uniform draw below `factor_max` maps to a node via binary
/// search over `factors`, which is what makes selection weight-proportional.
#[derive(Debug, Clone, Default)]
pub struct ServiceZone {
    /// Instances in registry order
    pub nodes: Vec<Arc<ServiceNode>>,

    /// Prefix sums of `balance_factor`, parallel to `nodes`
    pub factors: Vec<u64>,

    /// Total weight of the partition (last prefix sum, 0 when empty)
    pub factor_max: u64,
}

impl ServiceZone {
    /// Append a node, extending the prefix-sum sequence.
    pub fn push(&mut self, node: ServiceNode) {
        self.factor_max += node.balance_factor;
        self.factors.push(self.factor_max);
        self.nodes.push(Arc::new(node));
    }

    /// Number of instances in this partition.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether this partition holds no instances.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Join a host and port into the canonical `host:port` address form,
/// bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
