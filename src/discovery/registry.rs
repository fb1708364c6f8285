//! # Registry Clients
//!
//! This module provides the discovery-registry abstraction consumed by the
//! resolver and two backends: a Consul HTTP client with blocking-index
//! long-poll queries, and a fixed in-memory backend for tests and simple
//! deployments.
//!
//! The registry contract is a single operation: query the healthy instances
//! of a service, blocking up to the server's wait window until the
//! registry's modify index exceeds the submitted one. The returned index is
//! resubmitted on the next call, which is what turns polling into a watch.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::core::error::{BalancerError, BalancerResult};
use crate::core::types::{META_BALANCE_FACTOR, META_ZONE, UNKNOWN_ZONE};

/// How long the registry may hold a long-poll before answering with the
/// unchanged set. The HTTP client timeout must exceed this.
const LONG_POLL_WAIT: &str = "25s";

const CLIENT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(32);

/// One instance as reported by the registry, before zone classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInstance {
    /// Host (IP or DNS name) the instance is reachable at
    pub address: String,

    /// Service port
    pub port: u16,

    /// String-keyed instance metadata; only `zone` and `balanceFactor`
    /// are consumed by the resolver
    pub metadata: HashMap<String, String>,
}

impl RegistryInstance {
    /// Create an instance with empty metadata.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Routing weight from metadata. `None` when the key is absent or not
    /// a non-negative decimal integer; the caller applies its own default.
    pub fn balance_factor(&self) -> Option<u64> {
        self.metadata.get(META_BALANCE_FACTOR)?.parse().ok()
    }

    /// Availability zone from metadata, [`UNKNOWN_ZONE`] when absent.
    pub fn zone(&self) -> &str {
        self.metadata
            .get(META_ZONE)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_ZONE)
    }
}

/// Discovery registry abstraction.
///
/// Implementations must be safe for concurrent calls; the resolver's two
/// watcher loops share one handle.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Query the healthy instances of `service`.
    ///
    /// `last_index` is the opaque modify-index token returned by the
    /// previous call (0 on the first call). The registry may block until
    /// its index advances past `last_index` or its wait window elapses.
    /// Returns the instance set and the new index to resubmit.
    async fn healthy_instances(
        &self,
        service: &str,
        last_index: u64,
    ) -> BalancerResult<(Vec<RegistryInstance>, u64)>;
}

/// Consul health-API client.
///
/// Queries `/v1/health/service/{service}?passing=true` with blocking-query
/// parameters and carries the `X-Consul-Index` response header across
/// calls.
pub struct ConsulRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl ConsulRegistry {
    /// Create a client for the agent at `address` (scheme optional,
    /// defaults to `http://`).
    pub fn new(address: &str) -> BalancerResult<Self> {
        if address.is_empty() {
            return Err(BalancerError::config("registry address must not be empty"));
        }
        let base_url = if address.contains("://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        let client = reqwest::Client::builder().timeout(CLIENT_TIMEOUT).build()?;
        Ok(Self { client, base_url })
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// One entry of the Consul health endpoint response; only the service
/// block is consumed.
#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: AgentService,
}

#[derive(Debug, Deserialize)]
struct AgentService {
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port", default)]
    port: u16,
    #[serde(rename = "Meta", default)]
    meta: HashMap<String, String>,
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn healthy_instances(
        &self,
        service: &str,
        last_index: u64,
    ) -> BalancerResult<(Vec<RegistryInstance>, u64)> {
        let url = format!("{}/v1/health/service/{}", self.base_url, service);
        let index = last_index.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("passing", "true"),
                ("index", index.as_str()),
                ("wait", LONG_POLL_WAIT),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BalancerError::registry(format!(
                "health query for {service} returned {status}"
            )));
        }

        let new_index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(last_index);

        let entries: Vec<HealthEntry> = response.json().await?;
        let instances = entries
            .into_iter()
            .map(|entry| RegistryInstance {
                address: entry.service.address,
                port: entry.service.port,
                metadata: entry.service.meta,
            })
            .collect::<Vec<_>>();

        debug!(
            service,
            instances = instances.len(),
            index = new_index,
            "registry health query returned"
        );
        Ok((instances, new_index))
    }
}

/// In-memory registry with fixed instance sets per service.
///
/// Replacing a service's instances bumps that service's modify index, so a
/// resolver watching it picks the change up on its next tick. Queries never
/// block.
#[derive(Default)]
pub struct StaticRegistry {
    services: RwLock<HashMap<String, StaticService>>,
}

#[derive(Default)]
struct StaticService {
    instances: Vec<RegistryInstance>,
    index: u64,
}

impl StaticRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the instance set of `service`, bumping its index.
    pub fn set_instances(&self, service: &str, instances: Vec<RegistryInstance>) {
        let mut services = self.services.write();
        let entry = services.entry(service.to_string()).or_default();
        entry.instances = instances;
        entry.index += 1;
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn healthy_instances(
        &self,
        service: &str,
        _last_index: u64,
    ) -> BalancerResult<(Vec<RegistryInstance>, u64)> {
        let services = self.services.read();
        match services.get(service) {
            Some(entry) => Ok((entry.instances.clone(), entry.index)),
            None => Ok((Vec::new(), 0)),
        }
    }
}
