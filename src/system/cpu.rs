//! # CPU Sampling
//!
//! Local host CPU utilization feeds the selection threshold: the busier the
//! caller, the less of the local zone's capacity it claims for itself. The
//! sampler is synchronous and near-instant; the resolver invokes it from
//! its periodic refresh loop.

use sysinfo::{CpuRefreshKind, RefreshKind, System};

use crate::core::error::BalancerResult;

/// Source of per-core busy percentages.
///
/// Returns one non-negative integer percent per core, in core order. An
/// empty result is valid and makes the resolver fall back to its safe
/// default utilization.
pub trait CpuSampler: Send {
    /// Sample current per-core busy percentages.
    fn sample(&mut self) -> BalancerResult<Vec<u32>>;
}

/// [`CpuSampler`] backed by the `sysinfo` crate.
///
/// Keeps one [`System`] alive across samples: `sysinfo` derives usage from
/// the delta between consecutive refreshes, so the first sample after
/// construction reads 0% and later samples reflect activity since the
/// previous tick.
pub struct SysinfoCpuSampler {
    system: System,
}

impl SysinfoCpuSampler {
    /// Create a sampler refreshing CPU usage statistics only.
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::new().with_cpu(CpuRefreshKind::new().with_cpu_usage()),
            ),
        }
    }
}

impl Default for SysinfoCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for SysinfoCpuSampler {
    fn sample(&mut self) -> BalancerResult<Vec<u32>> {
        self.system.refresh_cpu_usage();
        Ok(self
            .system
            .cpus()
            .iter()
            .map(|cpu| cpu.cpu_usage() as u32)
            .collect())
    }
}
