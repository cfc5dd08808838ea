use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;

use crate::config::SweepConfig;
use crate::device::Device;
use crate::snapshot::FailureClass;
use crate::sweep::{
    ConnectivityDiagnostic, ProbeReply, Reachability, ReachabilityClass, StaticReachability,
    TcpReachability,
};

fn fast_config() -> SweepConfig {
    SweepConfig {
        probe_timeout: Duration::from_millis(200),
        ..SweepConfig::default()
    }
}

#[tokio::test]
async fn sweep_classifies_every_device() {
    // Arrange
    let reachability = Arc::new(
        StaticReachability::default()
            .with(
                "10.0.0.1",
                ProbeReply::Alive {
                    rtt: Duration::from_millis(12),
                },
            )
            .with(
                "10.0.0.2",
                ProbeReply::Dead {
                    class: FailureClass::Unreachable,
                    reason: "no route to host".into(),
                },
            ),
    );
    let diagnostic = ConnectivityDiagnostic::new(reachability.clone(), &fast_config());
    let devices = vec![
        Device::new("1", "10.0.0.1", "A"),
        Device::new("2", "10.0.0.2", "B"),
        Device::new("3", "N/A", "C"),
    ];

    // Act
    let report = diagnostic.sweep(&devices).await;

    // Assert
    assert_eq!(report.total, 3);
    assert_eq!(report.reachable, 1);
    assert_eq!(report.unreachable, 1);
    assert_eq!(report.no_ip, 1);
    assert_eq!(report.printers[0].status, ReachabilityClass::Reachable);
    assert_eq!(report.printers[0].response_time, Some(12));
    assert_eq!(report.printers[2].status, ReachabilityClass::NoAddress);
    assert!(report.printers[1]
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("unreachable")));
}

#[tokio::test]
async fn devices_without_address_are_never_probed() {
    // Arrange
    let reachability = Arc::new(StaticReachability::default());
    let diagnostic = ConnectivityDiagnostic::new(reachability.clone(), &fast_config());
    let devices = vec![Device::new("1", "", "A"), Device::new("2", "não informado", "B")];

    // Act
    let report = diagnostic.sweep(&devices).await;

    // Assert
    assert_eq!(report.no_ip, 2);
    assert!(reachability.probed().is_empty());
}

#[tokio::test]
async fn sweep_is_bounded_by_one_probe_timeout() {
    // Arrange: every probe hangs far longer than the timeout
    let reachability = Arc::new(StaticReachability::default().delayed(Duration::from_secs(30)));
    let diagnostic = ConnectivityDiagnostic::new(reachability, &fast_config());
    let devices: Vec<Device> = (1..=20)
        .map(|i| Device::new(i.to_string(), format!("10.9.0.{i}"), format!("P{i}")))
        .collect();
    let started = Instant::now();

    // Act
    let report = diagnostic.sweep(&devices).await;

    // Assert
    assert_eq!(report.unreachable, 20);
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn tcp_probe_counts_listener_as_alive() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let probe = TcpReachability::new(&SweepConfig {
        probe_timeout: Duration::from_millis(500),
        ports: vec![port],
    });

    // Act
    let reply = probe.probe("127.0.0.1").await;

    // Assert
    assert!(reply.is_alive(), "unexpected {reply:?}");
}

#[tokio::test]
async fn tcp_probe_counts_refused_port_as_alive() {
    // Arrange: bind then drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let probe = TcpReachability::new(&SweepConfig {
        probe_timeout: Duration::from_millis(500),
        ports: vec![port],
    });

    // Act
    let reply = probe.probe("127.0.0.1").await;

    // Assert
    assert!(reply.is_alive(), "unexpected {reply:?}");
}

#[tokio::test]
async fn documentation_address_is_unreachable_within_bound() {
    // Arrange
    let diagnostic = ConnectivityDiagnostic::new(
        Arc::new(TcpReachability::new(&fast_config())),
        &fast_config(),
    );
    let started = Instant::now();

    // Act
    let report = diagnostic
        .sweep(&[Device::new("x", "192.0.2.1", "TEST-NET")])
        .await;

    // Assert
    assert_eq!(report.unreachable, 1);
    assert!(started.elapsed() < Duration::from_secs(2));
}
