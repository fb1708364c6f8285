//! # Consul Balancer
//!
//! Zone-aware client-side service discovery and load balancing for RPC
//! callers. Given a logical service name, a [`Resolver`] keeps a live view
//! of healthy backend instances from a Consul-compatible registry,
//! partitions them by availability zone, and selects one instance per call
//! with a locality-biased weighted random draw. The bias adapts to the
//! caller's own CPU utilization and to how much capacity its same-zone
//! peers collectively demand.
//!
//! ```no_run
//! use std::time::Duration;
//! use consul_balancer::ResolverBuilder;
//!
//! # async fn run() -> consul_balancer::BalancerResult<()> {
//! let resolver = ResolverBuilder::new("127.0.0.1:8500", "backend", "frontend")
//!     .interval(Duration::from_secs(1))
//!     .cpu_threshold(0.7)
//!     .build()
//!     .await?;
//!
//! if let Some(node) = resolver.discover_node() {
//!     println!("routing to {}", node.address);
//! }
//! resolver.stop();
//! # Ok(())
//! # }
//! ```
//!
//! A standalone [`SmoothWeighted`] selector is provided for callers that
//! prefer deterministic weight-proportional rotation over random sampling.

pub mod core;
pub mod discovery;
pub mod load_balancing;
pub mod system;

// Re-export the commonly used surface.
pub use crate::core::config::ResolverConfig;
pub use crate::core::error::{BalancerError, BalancerResult};
pub use crate::core::types::{ServiceNode, ServiceZone};
pub use crate::discovery::kv::ConsulKv;
pub use crate::discovery::registry::{ConsulRegistry, Registry, RegistryInstance, StaticRegistry};
pub use crate::discovery::resolver::{Resolver, ResolverBuilder};
pub use crate::load_balancing::smooth::SmoothWeighted;
