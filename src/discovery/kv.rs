//! # Consul KV Helper
//!
//! Thin get/put wrapper over the Consul KV HTTP API, for callers that keep
//! small bits of coordination state next to their discovery data.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::core::error::{BalancerError, BalancerResult};
use crate::discovery::registry::ConsulRegistry;

/// Consul KV client sharing the registry's HTTP plumbing.
pub struct ConsulKv {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
}

impl ConsulKv {
    /// Create a KV client for the agent at `address`.
    pub fn new(address: &str) -> BalancerResult<Self> {
        let registry = ConsulRegistry::new(address)?;
        Ok(Self {
            client: registry.client().clone(),
            base_url: registry.base_url().to_string(),
        })
    }

    /// Fetch the value stored under `key`; `None` when the key is absent.
    pub async fn get(&self, key: &str) -> BalancerResult<Option<Vec<u8>>> {
        let url = format!("{}/v1/kv/{}", self.base_url, key);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(BalancerError::registry(format!(
                "kv get for {key} returned {status}"
            )));
        }

        let entries: Vec<KvEntry> = response.json().await?;
        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };
        match entry.value {
            None => Ok(Some(Vec::new())),
            Some(encoded) => BASE64
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(|err| BalancerError::registry(format!("kv value for {key} is not valid base64: {err}"))),
        }
    }

    /// Store `value` under `key`.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> BalancerResult<()> {
        let url = format!("{}/v1/kv/{}", self.base_url, key);
        let response = self.client.put(&url).body(value).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BalancerError::registry(format!(
                "kv put for {key} returned {status}"
            )));
        }
        Ok(())
    }
}
