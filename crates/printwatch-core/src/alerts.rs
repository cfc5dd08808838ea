use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::Clock;
use crate::snapshot::{FleetSnapshot, Severity};

pub const ACK_EXPIRY: Duration = Duration::from_secs(4 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalAlert {
    pub id: String,
    pub device_id: String,
    pub device_label: String,
    pub device_address: String,
    pub signal: String,
    pub severity: Severity,
    pub action: String,
    pub description: String,
    pub observed_at: DateTime<Utc>,
}

pub fn alert_id(device_id: &str, signal: &str) -> String {
    format!("{device_id}-{signal}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBadge {
    pub count: usize,
    pub devices: Vec<String>,
}

pub struct AlertBoard {
    clock: Arc<dyn Clock>,
    expiry: Duration,
    acknowledged: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AlertBoard {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_expiry(clock, ACK_EXPIRY)
    }

    pub fn with_expiry(clock: Arc<dyn Clock>, expiry: Duration) -> Self {
        Self {
            clock,
            expiry,
            acknowledged: Mutex::new(HashMap::new()),
        }
    }

    pub fn pending(&self, fleet: &FleetSnapshot) -> Vec<CriticalAlert> {
        let now = self.clock.now();
        let mut acknowledged = self
            .acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let expiry = self.expiry;
        acknowledged.retain(|_, at| (now - *at).to_std().map(|age| age < expiry).unwrap_or(true));

        fleet
            .printers
            .iter()
            .flat_map(|printer| {
                printer
                    .error_details
                    .iter()
                    .filter(|detail| detail.severity == Severity::Critical)
                    .map(move |detail| CriticalAlert {
                        id: alert_id(&printer.id, &detail.error),
                        device_id: printer.id.clone(),
                        device_label: printer.sigla.clone(),
                        device_address: printer.ip.clone(),
                        signal: detail.error.clone(),
                        severity: detail.severity,
                        action: detail.action.clone(),
                        description: detail.description.clone(),
                        observed_at: printer.last_checked,
                    })
            })
            .filter(|alert| !acknowledged.contains_key(&alert.id))
            .collect()
    }

    pub fn acknowledge(&self, alert_id: &str) {
        let now = self.clock.now();
        info!(alert = alert_id, "critical alert acknowledged");
        self.acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alert_id.to_string(), now);
    }

    pub fn badge(&self, fleet: &FleetSnapshot) -> AlertBadge {
        let pending = self.pending(fleet);
        let devices: BTreeSet<String> = pending.iter().map(|a| a.device_label.clone()).collect();
        AlertBadge {
            count: pending.len(),
            devices: devices.into_iter().collect(),
        }
    }
}
