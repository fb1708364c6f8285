//! # Resolver Configuration
//!
//! Immutable settings for a [`Resolver`](crate::discovery::resolver::Resolver).
//! Construct via [`ResolverConfig::new`] or deserialize from a config file,
//! then hand to [`ResolverBuilder`](crate::discovery::resolver::ResolverBuilder);
//! `validate()` runs before anything is started.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{BalancerError, BalancerResult};

/// Configuration for a resolver instance. Immutable after construction;
/// ratios and intervals are not reconfigurable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Registry HTTP address, e.g. `127.0.0.1:8500`
    pub registry_address: String,

    /// Logical name of the target service whose instances are selected
    pub service: String,

    /// Logical name of the caller's own service, used to gauge peer
    /// capacity pressure in the local zone
    pub peer_service: String,

    /// Period between refresh ticks, applied independently to the CPU,
    /// peer, and target refresh loops
    pub interval: Duration,

    /// Peer-capacity ratio; 0 disables the ratio-based threshold override
    pub service_ratio: f64,

    /// CPU ceiling in (0, 1] used to re-inflate the overflow threshold;
    /// 0 disables the normalization
    pub cpu_threshold: f64,

    /// Explicit availability zone; when absent the platform probe runs
    /// once at construction
    #[serde(default)]
    pub zone: Option<String>,
}

impl ResolverConfig {
    /// Create a configuration with the default interval and disabled
    /// ratio/CPU modifiers.
    pub fn new(
        registry_address: impl Into<String>,
        service: impl Into<String>,
        peer_service: impl Into<String>,
    ) -> Self {
        Self {
            registry_address: registry_address.into(),
            service: service.into(),
            peer_service: peer_service.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration, returning the first violation found.
    pub fn validate(&self) -> BalancerResult<()> {
        if self.registry_address.is_empty() {
            return Err(BalancerError::config("registry address must not be empty"));
        }
        if self.service.is_empty() {
            return Err(BalancerError::config("target service name must not be empty"));
        }
        if self.peer_service.is_empty() {
            return Err(BalancerError::config("peer service name must not be empty"));
        }
        if self.interval.is_zero() {
            return Err(BalancerError::config("refresh interval must be positive"));
        }
        if self.service_ratio < 0.0 || !self.service_ratio.is_finite() {
            return Err(BalancerError::config(format!(
                "service ratio must be a finite non-negative number, got {}",
                self.service_ratio
            )));
        }
        if self.cpu_threshold != 0.0 && !(0.0..=1.0).contains(&self.cpu_threshold) {
            return Err(BalancerError::config(format!(
                "cpu threshold must be 0 or within (0, 1], got {}",
                self.cpu_threshold
            )));
        }
        Ok(())
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            registry_address: String::new(),
            service: String::new(),
            peer_service: String::new(),
            interval: Duration::from_secs(1),
            service_ratio: 0.0,
            cpu_threshold: 0.0,
            zone: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = ResolverConfig::new("127.0.0.1:8500", "backend", "frontend");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut config = ResolverConfig::new("127.0.0.1:8500", "backend", "frontend");
        config.interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_cpu_threshold() {
        let mut config = ResolverConfig::new("127.0.0.1:8500", "backend", "frontend");
        config.cpu_threshold = 1.5;
        assert!(config.validate().is_err());

        config.cpu_threshold = -0.1;
        assert!(config.validate().is_err());

        config.cpu_threshold = 0.0;
        assert!(config.validate().is_ok());

        config.cpu_threshold = 0.7;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_negative_ratio() {
        let mut config = ResolverConfig::new("127.0.0.1:8500", "backend", "frontend");
        config.service_ratio = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_names() {
        assert!(ResolverConfig::new("", "backend", "frontend").validate().is_err());
        assert!(ResolverConfig::new("127.0.0.1:8500", "", "frontend").validate().is_err());
        assert!(ResolverConfig::new("127.0.0.1:8500", "backend", "").validate().is_err());
    }
}
