use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::ber::{Oid, Value};
use crate::classifier::{decode_error_state, decode_error_state_integer, printer_status_text};
use crate::config::PollerConfig;
use crate::device::Device;
use crate::snapshot::{AgentInfo, DeviceState, FleetSnapshot, Provenance, StatusSnapshot};
use crate::snmp::{basic_oids, extended_oids, oids, GetResponse, SnmpClient};

const HR_DEVICE_DOWN: i64 = 5;

pub(crate) async fn query_device<C: SnmpClient + ?Sized>(
    client: &C,
    device: &Device,
    address: &str,
    source: Provenance,
) -> Result<StatusSnapshot, crate::snmp::SnmpError> {
    let basic = client.get(address, &basic_oids()).await?;
    let mut snapshot = StatusSnapshot::online(device, source, Utc::now());
    let mut signals = read_basic(&basic, &mut snapshot);

    match client.get(address, &extended_oids()).await {
        Ok(extended) => signals.extend(read_extended(&extended, &mut snapshot)),
        Err(err) => {
            debug!(device = %device.id, address, error = %err, "extended query failed, keeping basic data");
        }
    }

    snapshot.apply_signals(signals);
    Ok(snapshot)
}

fn read_basic(response: &GetResponse, snapshot: &mut StatusSnapshot) -> Vec<String> {
    let mut signals = Vec::new();

    if let Some(descr) = response
        .value(&Oid::from_static(oids::SYS_DESCR))
        .and_then(Value::as_text)
        .filter(|text| !text.is_empty())
    {
        snapshot.model = Some(descr);
    }

    if let Some(ticks) = response
        .value(&Oid::from_static(oids::SYS_UPTIME))
        .and_then(Value::as_u64)
    {
        let seconds = ticks / 100;
        snapshot.uptime_seconds = Some(seconds);
        snapshot.uptime = Some(format_uptime(seconds));
    }

    let device_status = response
        .value(&Oid::from_static(oids::HR_DEVICE_STATUS))
        .and_then(Value::as_i64);
    if device_status == Some(HR_DEVICE_DOWN) {
        signals.push("deviceDown".to_string());
    }

    signals
}

fn read_extended(response: &GetResponse, snapshot: &mut StatusSnapshot) -> Vec<String> {
    if let Some(text) = response
        .value(&Oid::from_static(oids::HR_PRINTER_STATUS))
        .and_then(Value::as_i64)
        .and_then(printer_status_text)
    {
        snapshot.status = text.to_string();
    }

    snapshot.toner_level = toner_percent(
        response
            .value(&Oid::from_static(oids::MARKER_SUPPLIES_LEVEL))
            .and_then(Value::as_i64),
        response
            .value(&Oid::from_static(oids::MARKER_SUPPLIES_MAX))
            .and_then(Value::as_i64),
    );

    snapshot.page_count = response
        .value(&Oid::from_static(oids::MARKER_LIFE_COUNT))
        .and_then(Value::as_u64);

    match response.value(&Oid::from_static(oids::HR_PRINTER_ERROR_STATE)) {
        Some(Value::OctetString(bytes)) => decode_error_state(bytes),
        Some(other) => other
            .as_i64()
            .map(decode_error_state_integer)
            .unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Negative levels are the MIB's "unknown"/"some remaining" markers.
pub fn toner_percent(level: Option<i64>, max: Option<i64>) -> Option<u8> {
    match (level, max) {
        (Some(level), Some(max)) if level >= 0 && max > 0 => {
            let percent = (level * 100 + max / 2) / max;
            Some(percent.clamp(0, 100) as u8)
        }
        _ => None,
    }
}

pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    format!("{days}d {hours}h")
}

#[derive(Debug, Default)]
pub struct FleetTracker {
    states: HashMap<String, DeviceState>,
}

impl FleetTracker {
    pub fn state(&self, device_id: &str) -> DeviceState {
        self.states
            .get(device_id)
            .copied()
            .unwrap_or(DeviceState::Unknown)
    }

    pub fn observe(&mut self, snapshot: &StatusSnapshot) -> Option<(DeviceState, DeviceState)> {
        let next = DeviceState::from_snapshot(snapshot);
        let previous = self.states.insert(snapshot.id.clone(), next);
        let previous = previous.unwrap_or(DeviceState::Unknown);
        if previous == next {
            return None;
        }

        match next {
            DeviceState::Offline | DeviceState::OnlineCritical => warn!(
                device = %snapshot.id,
                sigla = %snapshot.sigla,
                from = previous.label(),
                to = next.label(),
                error_state = %snapshot.error_state,
                "device state changed"
            ),
            _ => info!(
                device = %snapshot.id,
                sigla = %snapshot.sigla,
                from = previous.label(),
                to = next.label(),
                "device state changed"
            ),
        }
        Some((previous, next))
    }
}

pub struct Poller<C: SnmpClient> {
    client: C,
    config: PollerConfig,
    tracker: FleetTracker,
    cycles: u64,
}

impl<C: SnmpClient> Poller<C> {
    pub fn new(client: C, config: PollerConfig) -> Self {
        Self {
            client,
            config,
            tracker: FleetTracker::default(),
            cycles: 0,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &FleetTracker {
        &self.tracker
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub async fn poll_device(&self, device: &Device) -> StatusSnapshot {
        let Some(address) = device.address() else {
            return StatusSnapshot::offline(device, "no-address", Provenance::Agent, Utc::now());
        };

        match query_device(&self.client, device, address, Provenance::Agent).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(device = %device.id, address, error = %err, "device did not answer");
                StatusSnapshot::offline(device, err.class().label(), Provenance::Agent, Utc::now())
            }
        }
    }

    pub async fn poll_fleet(&mut self, devices: &[Device]) -> FleetSnapshot {
        self.poll_fleet_at(devices, Utc::now()).await
    }

    pub async fn poll_fleet_at(&mut self, devices: &[Device], timestamp: DateTime<Utc>) -> FleetSnapshot {
        let started = Instant::now();
        let limit = self.config.max_concurrency.max(1);

        let this = &*self;
        let mut polled: Vec<(usize, StatusSnapshot)> = stream::iter(devices.iter().enumerate())
            .map(|(index, device)| async move { (index, this.poll_device(device).await) })
            .buffer_unordered(limit)
            .collect()
            .await;
        polled.sort_by_key(|(index, _)| *index);
        let printers: Vec<StatusSnapshot> = polled.into_iter().map(|(_, snapshot)| snapshot).collect();

        for snapshot in &printers {
            self.tracker.observe(snapshot);
        }
        self.cycles += 1;

        let fleet = FleetSnapshot::assemble(
            timestamp,
            printers,
            AgentInfo::current(self.config.location.clone()),
        );
        info!(
            cycle = self.cycles,
            total = fleet.total,
            online = fleet.online_count(),
            with_issues = fleet.with_issues,
            critical = fleet.critical_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "poll cycle complete"
        );
        fleet
    }
}
