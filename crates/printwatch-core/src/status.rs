use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::info;

use crate::cache::IngestCache;
use crate::device::Device;
use crate::prober::{FallbackProber, ProbeOutcome};
use crate::snapshot::{FleetSnapshot, Provenance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackReason {
    StaleAgentData,
    NoAgentData,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressOutcome {
    pub address: String,
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridStatus {
    pub source: Provenance,
    pub timestamp: DateTime<Utc>,
    pub data: Option<Arc<FleetSnapshot>>,
    pub is_stale: bool,
    pub age_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallback_results: Vec<AddressOutcome>,
}

pub struct StatusService {
    cache: Arc<IngestCache>,
    prober: FallbackProber,
    registry: Arc<Vec<Device>>,
}

impl StatusService {
    pub fn new(cache: Arc<IngestCache>, prober: FallbackProber, registry: Arc<Vec<Device>>) -> Self {
        Self {
            cache,
            prober,
            registry,
        }
    }

    pub fn registry(&self) -> &[Device] {
        &self.registry
    }

    pub fn prober(&self) -> &FallbackProber {
        &self.prober
    }

    pub fn resolve_device(&self, address: &str) -> Device {
        let address = address.trim();
        self.registry
            .iter()
            .find(|d| d.address() == Some(address) || d.id == address)
            .cloned()
            .unwrap_or_else(|| Device::adhoc(address))
    }

    pub async fn status(&self, requested_addresses: &[String]) -> HybridStatus {
        let read = self.cache.read();
        let age_secs = read.age_secs();
        let now = self.cache.clock().now();

        if read.is_fresh() {
            return HybridStatus {
                source: Provenance::Cache,
                timestamp: now,
                data: read.data,
                is_stale: false,
                age_secs,
                fallback: None,
                fallback_results: Vec::new(),
            };
        }

        let reason = if read.data.is_some() {
            FallbackReason::StaleAgentData
        } else {
            FallbackReason::NoAgentData
        };

        let mut addresses: Vec<String> = Vec::new();
        for address in requested_addresses.iter().map(|a| a.trim()) {
            if !address.is_empty() && !addresses.iter().any(|a| a == address) {
                addresses.push(address.to_string());
            }
        }

        info!(
            reason = ?reason,
            requested = addresses.len(),
            "agent data unavailable, probing directly"
        );
        let probes = addresses.iter().map(|address| {
            let device = self.resolve_device(address);
            async move {
                AddressOutcome {
                    address: address.clone(),
                    outcome: self.prober.probe(&device).await,
                }
            }
        });
        let fallback_results = join_all(probes).await;

        HybridStatus {
            source: Provenance::Fallback,
            timestamp: now,
            data: read.data,
            is_stale: read.is_stale,
            age_secs,
            fallback: Some(reason),
            fallback_results,
        }
    }
}
