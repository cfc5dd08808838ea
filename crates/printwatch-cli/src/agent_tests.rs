use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeDelta, Utc};
use printwatch_core::{
    AgentInfo, Device, FleetSnapshot, Provenance, StatusSnapshot, Uplink,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

use crate::agent::{
    local_router, push_once, refresh_devices, spawn_pusher, AgentView, CheckRequest, LocalState,
};

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn fleet() -> FleetSnapshot {
    let device = Device::new("7", "10.1.0.7", "EMEF-CENTRO");
    FleetSnapshot::assemble(
        Utc::now(),
        vec![StatusSnapshot::online(&device, Provenance::Agent, Utc::now())],
        AgentInfo::current("school"),
    )
}

fn local_state(check_now: mpsc::Sender<CheckRequest>) -> (LocalState, Arc<RwLock<AgentView>>) {
    let view = Arc::new(RwLock::new(AgentView::new("school", 1)));
    let state = LocalState {
        view: Arc::clone(&view),
        check_now,
    };
    (state, view)
}

#[tokio::test]
async fn last_results_appear_after_the_first_cycle() {
    // Arrange
    let (tx, _rx) = mpsc::channel(1);
    let (state, view) = local_state(tx);
    let base = serve(local_router(state)).await;
    let url = format!("{base}/last-results");

    // Act
    let before = reqwest::get(&url).await.expect("before").status();
    {
        let mut guard = view.write().await;
        guard.cycles = 1;
        guard.last_results = Some(fleet());
    }
    let after = reqwest::get(&url).await.expect("after");
    let after_status = after.status();
    let body: FleetSnapshot = after.json().await.expect("fleet body");

    // Assert
    assert_eq!(before, reqwest::StatusCode::NOT_FOUND);
    assert_eq!(after_status, reqwest::StatusCode::OK);
    assert_eq!(body.total, 1);
    assert_eq!(body.printers[0].sigla, "EMEF-CENTRO");
}

#[tokio::test]
async fn status_reports_location_and_cycles() {
    // Arrange
    let (tx, _rx) = mpsc::channel(1);
    let (state, view) = local_state(tx);
    view.write().await.cycles = 4;
    let base = serve(local_router(state)).await;

    // Act
    let body: Value = reqwest::get(format!("{base}/status"))
        .await
        .expect("status")
        .json()
        .await
        .expect("json");

    // Assert
    assert_eq!(body["status"], "running");
    assert_eq!(body["location"], "school");
    assert_eq!(body["devices"], 1);
    assert_eq!(body["cycles"], 4);
    assert!(body["lastPoll"].is_null());
}

#[tokio::test]
async fn check_now_waits_for_the_poll_loop() {
    // Arrange
    let (tx, mut rx) = mpsc::channel::<CheckRequest>(1);
    let (state, _view) = local_state(tx);
    let base = serve(local_router(state)).await;
    tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            let _ = reply.send(fleet());
        }
    });

    // Act
    let response = reqwest::Client::new()
        .post(format!("{base}/check-now"))
        .send()
        .await
        .expect("check-now");
    let status = response.status();
    let body: FleetSnapshot = response.json().await.expect("fleet body");

    // Assert
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body.printers[0].id, "7");
}

#[tokio::test]
async fn check_now_without_a_poll_loop_is_unavailable() {
    // Arrange
    let (tx, rx) = mpsc::channel::<CheckRequest>(1);
    drop(rx);
    let (state, _view) = local_state(tx);
    let base = serve(local_router(state)).await;

    // Act
    let status = reqwest::Client::new()
        .post(format!("{base}/check-now"))
        .send()
        .await
        .expect("check-now")
        .status();

    // Assert
    assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn rejected_push_is_recorded_as_undelivered() {
    // Arrange
    let stub = Router::new().route(
        "/api/printer-status-from-agent",
        post(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"success": false}))) }),
    );
    let base = serve(stub).await;
    let uplink = Uplink::new(&base, "stale-secret", Duration::from_secs(2)).expect("uplink");

    // Act
    let record = push_once(&uplink, &fleet()).await;

    // Assert
    assert!(!record.delivered);
    assert_eq!(record.error.as_deref(), Some("cloud rejected the shared secret"));
}

#[tokio::test]
async fn unreachable_cloud_is_recorded_as_undelivered() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    let uplink = Uplink::new(&format!("http://{addr}"), "s", Duration::from_secs(2)).expect("uplink");

    // Act
    let record = push_once(&uplink, &fleet()).await;

    // Assert
    assert!(!record.delivered);
    assert!(record.error.is_some_and(|e| e.starts_with("transport error")));
}

#[tokio::test]
async fn registry_changes_are_picked_up_between_cycles() {
    // Arrange: first call lists one printer, the second adds one, then the
    // cloud answers with an empty (invalid) list and finally fails
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let stub = Router::new().route(
        "/api/printers",
        get(move || {
            let counter = Arc::clone(&counter);
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Json(vec![Device::new("1", "10.3.0.1", "A")]).into_response(),
                    1 => Json(vec![
                        Device::new("1", "10.3.0.1", "A"),
                        Device::new("2", "10.3.0.2", "B"),
                    ])
                    .into_response(),
                    2 => Json(Vec::<Device>::new()).into_response(),
                    _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                }
            }
        }),
    );
    let base = serve(stub).await;
    let uplink = Uplink::new(&base, "s", Duration::from_secs(2)).expect("uplink");
    let mut devices = Vec::new();

    // Act
    let first = refresh_devices(&uplink, &mut devices).await;
    let after_first = devices.len();
    let second = refresh_devices(&uplink, &mut devices).await;
    let after_second = devices.len();
    let invalid = refresh_devices(&uplink, &mut devices).await;
    let failed = refresh_devices(&uplink, &mut devices).await;

    // Assert
    assert!(first && second);
    assert_eq!(after_first, 1);
    assert_eq!(after_second, 2);
    assert!(!invalid && !failed);
    assert_eq!(devices.len(), 2, "the last good list is kept");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn pushes_are_delivered_in_order_and_superseded_ones_skipped() {
    // Arrange: a cloud that takes a while to answer each push
    let received: Arc<Mutex<Vec<DateTime<Utc>>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);
    let stub = Router::new().route(
        "/api/printer-status-from-agent",
        post(move |Json(fleet): Json<FleetSnapshot>| {
            let log = Arc::clone(&log);
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                log.lock().expect("log").push(fleet.timestamp);
                Json(json!({
                    "success": true,
                    "processed": fleet.total,
                    "withIssues": fleet.with_issues,
                    "criticalIssues": 0,
                    "timestamp": Utc::now(),
                }))
            }
        }),
    );
    let base = serve(stub).await;
    let uplink = Uplink::new(&base, "s", Duration::from_secs(5)).expect("uplink");
    let view = Arc::new(RwLock::new(AgentView::new("school", 1)));
    let (push_tx, pusher) = spawn_pusher(uplink, Arc::clone(&view));

    let start = Utc::now();
    let snapshots: Vec<FleetSnapshot> = (0..3)
        .map(|n| {
            let mut snapshot = fleet();
            snapshot.timestamp = start + TimeDelta::seconds(n);
            snapshot
        })
        .collect();
    let newest = snapshots[2].timestamp;

    // Act
    for snapshot in snapshots {
        push_tx.send_replace(Some(snapshot));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    for _ in 0..100 {
        if received.lock().expect("log").last() == Some(&newest) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pusher.abort();

    // Assert
    let received = received.lock().expect("log").clone();
    assert_eq!(received.last(), Some(&newest));
    assert!(received.windows(2).all(|pair| pair[0] < pair[1]), "out of order: {received:?}");
    assert!(received.len() < 3, "a superseded snapshot was still sent");
    assert!(view.read().await.last_push.as_ref().is_some_and(|p| p.delivered));
}
