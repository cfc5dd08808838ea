use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use printwatch_core::{
    bearer_token, AlertBoard, CacheConfig, Clock, ConnectivityDiagnostic, Device, FallbackProber,
    IngestCache, IngestError, SharedSecret, StatusService, SystemClock,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<IngestCache>,
    pub status: Arc<StatusService>,
    pub alerts: Arc<AlertBoard>,
    pub connectivity: ConnectivityDiagnostic,
    pub registry: Arc<Vec<Device>>,
    pub secret: SharedSecret,
}

impl AppState {
    pub fn build(
        secret: &str,
        cache_config: CacheConfig,
        registry: Vec<Device>,
        prober: FallbackProber,
        connectivity: ConnectivityDiagnostic,
    ) -> Self {
        Self::with_clock(
            secret,
            cache_config,
            registry,
            prober,
            connectivity,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        secret: &str,
        cache_config: CacheConfig,
        registry: Vec<Device>,
        prober: FallbackProber,
        connectivity: ConnectivityDiagnostic,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let secret = SharedSecret::new(secret);
        let registry = Arc::new(registry);
        let cache = Arc::new(IngestCache::new(secret.clone(), cache_config, Arc::clone(&clock)));
        Self {
            status: Arc::new(StatusService::new(Arc::clone(&cache), prober, Arc::clone(&registry))),
            alerts: Arc::new(AlertBoard::new(clock)),
            cache,
            connectivity,
            registry,
            secret,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/printer-status-from-agent", post(ingest))
        .route("/api/printer-status", get(printer_status))
        .route("/api/printer-ping", get(printer_ping))
        .route("/api/diagnose-snmp", get(diagnose_snmp))
        .route("/api/printers", get(printers))
        .route("/api/alerts", get(alerts))
        .route("/api/alerts/{id}/ack", post(acknowledge_alert))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn serve(bind: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("cannot bind {bind}"))?;
    info!(%bind, devices = state.registry.len(), ttl_secs = state.cache.ttl().as_secs(), "cloud service listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("received ctrl-c, stopping");
        })
        .await
        .context("cloud server failed")
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"success": false, "error": message.into()}))).into_response()
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
}

async fn ingest(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match state.cache.push_json(&body, presented_token(&headers)) {
        Ok(ack) => Json(ack).into_response(),
        Err(IngestError::Authentication) => {
            warn!("push with missing or wrong secret");
            error_body(StatusCode::UNAUTHORIZED, IngestError::Authentication.to_string())
        }
        Err(err @ IngestError::Validation(_)) => error_body(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

/// Accepts `address=a&address=b`, `ip=a` and comma separated lists.
pub fn requested_addresses(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    form_urlencoded::parse(raw.as_bytes())
        .filter(|(key, _)| matches!(key.as_ref(), "address" | "ip"))
        .flat_map(|(_, value)| {
            value
                .split(',')
                .map(|part| part.trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|value| !value.is_empty())
        .collect()
}

async fn printer_status(State(state): State<AppState>, RawQuery(raw): RawQuery) -> Response {
    let addresses = requested_addresses(raw.as_deref());
    Json(state.status.status(&addresses).await).into_response()
}

async fn printer_ping(State(state): State<AppState>) -> Response {
    Json(state.connectivity.sweep(&state.registry).await).into_response()
}

#[derive(Debug, Deserialize)]
struct DiagnoseParams {
    ip: Option<String>,
}

async fn diagnose_snmp(State(state): State<AppState>, Query(params): Query<DiagnoseParams>) -> Response {
    match params.ip.as_deref().map(str::trim) {
        Some(ip) if !ip.is_empty() => Json(state.status.prober().diagnose(ip).await).into_response(),
        _ => error_body(StatusCode::BAD_REQUEST, "the ip query parameter is required"),
    }
}

async fn printers(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.secret.verify(presented_token(&headers)) {
        return error_body(StatusCode::UNAUTHORIZED, "missing or invalid credentials");
    }
    Json(state.registry.as_ref()).into_response()
}

async fn alerts(State(state): State<AppState>) -> Response {
    let read = state.cache.read();
    let Some(fleet) = read.data else {
        return Json(json!({"alerts": [], "badge": {"count": 0, "devices": []}})).into_response();
    };
    let pending = state.alerts.pending(&fleet);
    let badge = state.alerts.badge(&fleet);
    Json(json!({"alerts": pending, "badge": badge})).into_response()
}

async fn acknowledge_alert(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.alerts.acknowledge(&id);
    Json(json!({"acknowledged": id})).into_response()
}

async fn healthz() -> &'static str {
    "ok"
}
