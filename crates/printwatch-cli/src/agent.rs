use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use printwatch_core::{
    validate_devices, Device, FleetSnapshot, Poller, PollerConfig, UdpSnmpClient, Uplink,
    UplinkError,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant as TokioInstant, MissedTickBehavior};
use tracing::{error, info, warn};

pub struct AgentSettings {
    pub devices: Vec<Device>,
    pub refresh_registry: bool,
    pub poller: PollerConfig,
    pub uplink: Uplink,
    pub local_port: u16,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRecord {
    pub at: DateTime<Utc>,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct AgentView {
    pub location: String,
    pub devices: usize,
    pub started: Instant,
    pub cycles: u64,
    pub last_results: Option<FleetSnapshot>,
    pub last_push: Option<PushRecord>,
}

impl AgentView {
    pub fn new(location: impl Into<String>, devices: usize) -> Self {
        Self {
            location: location.into(),
            devices,
            started: Instant::now(),
            cycles: 0,
            last_results: None,
            last_push: None,
        }
    }
}

pub type CheckRequest = oneshot::Sender<FleetSnapshot>;

#[derive(Clone)]
pub struct LocalState {
    pub view: Arc<RwLock<AgentView>>,
    pub check_now: mpsc::Sender<CheckRequest>,
}

pub fn local_router(state: LocalState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/last-results", get(last_results))
        .route("/check-now", post(check_now))
        .with_state(state)
}

async fn status(State(state): State<LocalState>) -> Json<serde_json::Value> {
    let view = state.view.read().await;
    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "location": view.location,
        "devices": view.devices,
        "uptimeSecs": view.started.elapsed().as_secs(),
        "cycles": view.cycles,
        "lastPoll": view.last_results.as_ref().map(|f| f.timestamp),
        "lastPush": view.last_push,
    }))
}

async fn last_results(State(state): State<LocalState>) -> Response {
    let view = state.view.read().await;
    match &view.last_results {
        Some(fleet) => Json(fleet).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "no poll cycle has completed yet"})),
        )
            .into_response(),
    }
}

async fn check_now(State(state): State<LocalState>) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    if state.check_now.send(reply_tx).await.is_err() {
        return unavailable();
    }
    match reply_rx.await {
        Ok(fleet) => Json(fleet).into_response(),
        Err(_) => unavailable(),
    }
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "poll loop is not running"})),
    )
        .into_response()
}

pub async fn run(settings: AgentSettings) -> Result<()> {
    let AgentSettings {
        mut devices,
        refresh_registry,
        poller: config,
        uplink,
        local_port,
    } = settings;

    let view = Arc::new(RwLock::new(AgentView::new(config.location.clone(), devices.len())));
    let (check_tx, mut check_rx) = mpsc::channel::<CheckRequest>(4);

    let listener = TcpListener::bind(("0.0.0.0", local_port))
        .await
        .with_context(|| format!("cannot bind local port {local_port}"))?;
    let app = local_router(LocalState {
        view: Arc::clone(&view),
        check_now: check_tx,
    });
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "local status server stopped");
        }
    });
    info!(port = local_port, "local status surface listening");

    let registry = refresh_registry.then(|| uplink.clone());
    let (push_tx, pusher) = spawn_pusher(uplink, Arc::clone(&view));

    let interval = config.interval;
    let mut poller = Poller::new(UdpSnmpClient::new(config.snmp.clone()), config);
    let mut ticker = interval_at(TokioInstant::now(), interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            _ = ticker.tick() => {
                if let Some(uplink) = &registry {
                    refresh_devices(uplink, &mut devices).await;
                }
                cycle(&mut poller, &devices, &push_tx, &view).await;
            }
            Some(reply) = check_rx.recv() => {
                info!("check requested through the local surface");
                let fleet = cycle(&mut poller, &devices, &push_tx, &view).await;
                let _ = reply.send(fleet);
            }
        }
    }

    server.abort();
    pusher.abort();
    Ok(())
}

pub async fn refresh_devices(uplink: &Uplink, devices: &mut Vec<Device>) -> bool {
    let fetched = match uplink.fetch_registry().await {
        Ok(fetched) => fetched,
        Err(err) => {
            warn!(error = %err, kept = devices.len(), "registry refresh failed, keeping the last device list");
            return false;
        }
    };
    if let Err(err) = validate_devices(&fetched) {
        warn!(error = %err, kept = devices.len(), "cloud registry is invalid, keeping the last device list");
        return false;
    }
    if fetched != *devices {
        info!(before = devices.len(), after = fetched.len(), "device registry changed");
        *devices = fetched;
    }
    true
}

async fn cycle(
    poller: &mut Poller<UdpSnmpClient>,
    devices: &[Device],
    push_tx: &watch::Sender<Option<FleetSnapshot>>,
    view: &Arc<RwLock<AgentView>>,
) -> FleetSnapshot {
    let fleet = poller.poll_fleet(devices).await;
    {
        let mut guard = view.write().await;
        guard.cycles = poller.cycles();
        guard.devices = devices.len();
        guard.last_results = Some(fleet.clone());
    }
    push_tx.send_replace(Some(fleet.clone()));
    fleet
}

/// One task delivers snapshots in order. A snapshot that is superseded while
/// a push is in flight is never sent.
pub fn spawn_pusher(
    uplink: Uplink,
    view: Arc<RwLock<AgentView>>,
) -> (watch::Sender<Option<FleetSnapshot>>, JoinHandle<()>) {
    let (tx, mut rx) = watch::channel::<Option<FleetSnapshot>>(None);
    let handle = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let Some(fleet) = rx.borrow_and_update().clone() else {
                continue;
            };
            let record = push_once(&uplink, &fleet).await;
            view.write().await.last_push = Some(record);
        }
    });
    (tx, handle)
}

pub async fn push_once(uplink: &Uplink, fleet: &FleetSnapshot) -> PushRecord {
    match uplink.push(fleet).await {
        Ok(_) => PushRecord {
            at: Utc::now(),
            delivered: true,
            error: None,
        },
        Err(err) => {
            match &err {
                UplinkError::Authentication | UplinkError::Validation(_) => {
                    error!(error = %err, "cloud refused the snapshot, check the agent configuration")
                }
                _ => warn!(error = %err, "push failed, will send again next cycle"),
            }
            PushRecord {
                at: Utc::now(),
                delivered: false,
                error: Some(err.to_string()),
            }
        }
    }
}
