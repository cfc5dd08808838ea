use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ProberConfig, SweepConfig};
use crate::device::Device;
use crate::prober::{FallbackProber, ProbeOutcome};
use crate::snapshot::{FailureClass, Provenance, TestStatus};
use crate::snmp::SnmpError;
use crate::sweep::{ConnectivityDiagnostic, ProbeReply, StaticReachability};
use crate::test_support::{PrinterScript, ScriptedSnmp};

fn prober(snmp: ScriptedSnmp, reachability: StaticReachability, config: ProberConfig) -> FallbackProber {
    let sweep = SweepConfig {
        probe_timeout: Duration::from_millis(100),
        ..SweepConfig::default()
    };
    FallbackProber::new(
        Arc::new(snmp),
        ConnectivityDiagnostic::new(Arc::new(reachability), &sweep),
        config,
    )
}

#[tokio::test]
async fn answering_device_yields_fallback_status() {
    // Arrange
    let prober = prober(
        ScriptedSnmp::default().with("10.1.0.1", PrinterScript::healthy()),
        StaticReachability::default(),
        ProberConfig::default(),
    );

    // Act
    let outcome = prober.probe(&Device::new("1", "10.1.0.1", "EE-A")).await;

    // Assert
    match outcome {
        ProbeOutcome::Status(snapshot) => {
            assert!(snapshot.is_online);
            assert_eq!(snapshot.source, Provenance::Fallback);
            assert_eq!(snapshot.toner_level, Some(50));
        }
        other => panic!("expected status, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_produces_ordered_diagnostic_with_suggestions() {
    // Arrange
    let prober = prober(
        ScriptedSnmp::default(),
        StaticReachability::default(),
        ProberConfig::default(),
    );

    // Act
    let outcome = prober.probe(&Device::new("2", "10.1.0.2", "EE-B")).await;

    // Assert
    let ProbeOutcome::Diagnostic(report) = outcome else {
        panic!("expected a diagnostic");
    };
    let names: Vec<&str> = report.tests.iter().map(|t| t.test.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "name-resolution",
            "snmp-session",
            "basic-query",
            "network-timeout",
            "reachability",
            "overall-connectivity",
            "environment-check",
        ]
    );
    assert!(!report.success);
    assert_eq!(report.test("snmp-session").map(|t| t.status), Some(TestStatus::Attempted));
    assert_eq!(report.test("environment-check").map(|t| t.status), Some(TestStatus::Info));
    assert!(report.failure_classes().contains(&FailureClass::Timeout));
    assert!(!report.suggestions.is_empty());
    assert!(report
        .suggestions
        .iter()
        .any(|s| s.contains("shares a network path")));
}

#[tokio::test]
async fn live_host_without_snmp_points_at_community() {
    // Arrange
    let prober = prober(
        ScriptedSnmp::default(),
        StaticReachability::default().with(
            "10.1.0.3",
            ProbeReply::Alive {
                rtt: Duration::from_millis(3),
            },
        ),
        ProberConfig {
            cloud_hosted: false,
            ..ProberConfig::default()
        },
    );

    // Act
    let report = prober.diagnose("10.1.0.3").await;

    // Assert
    assert!(!report.success);
    assert_eq!(report.test("reachability").map(|t| t.status), Some(TestStatus::Success));
    assert!(report.test("environment-check").is_none());
    assert!(report.suggestions.iter().any(|s| s.contains("community")));
    assert!(!report.suggestions.iter().any(|s| s.contains("shares a network path")));
}

#[tokio::test]
async fn unresolvable_hostname_is_named_as_such() {
    // Arrange
    let prober = prober(
        ScriptedSnmp::default().with(
            "printer-7.escola.local",
            PrinterScript::failing(SnmpError::NameResolution("printer-7.escola.local".into())),
        ),
        StaticReachability::default(),
        ProberConfig::default(),
    );

    // Act
    let report = prober.diagnose("printer-7.escola.local").await;

    // Assert
    assert_eq!(report.tests[0].test, "name-resolution");
    assert_eq!(report.tests[0].status, TestStatus::Failed);
    assert!(report.test("dns-resolution").is_some());
    assert!(report.suggestions.iter().any(|s| s.contains("DNS")));
}

#[tokio::test]
async fn hanging_device_is_cut_off_at_the_ceiling() {
    // Arrange
    let prober = prober(
        ScriptedSnmp::default().with("10.1.0.4", PrinterScript::healthy().delayed(Duration::from_secs(30))),
        StaticReachability::default(),
        ProberConfig {
            ceiling: Duration::from_millis(200),
            ..ProberConfig::default()
        },
    );
    let started = Instant::now();

    // Act
    let outcome = prober.probe(&Device::new("4", "10.1.0.4", "EE-D")).await;

    // Assert
    assert!(started.elapsed() < Duration::from_secs(2));
    let ProbeOutcome::Diagnostic(report) = outcome else {
        panic!("expected a diagnostic");
    };
    assert!(report.test("network-timeout").is_some());
    assert!(!report.suggestions.is_empty());
}

#[tokio::test]
async fn successful_diagnosis_has_only_passing_tests() {
    // Arrange
    let prober = prober(
        ScriptedSnmp::default().with("10.1.0.5", PrinterScript::healthy()),
        StaticReachability::default(),
        ProberConfig::default(),
    );

    // Act
    let report = prober.diagnose("10.1.0.5").await;

    // Assert
    assert!(report.success);
    assert!(report.tests.iter().all(|t| t.status == TestStatus::Success));
    assert_eq!(
        report.test("basic-query").and_then(|t| t.result.as_deref()),
        Some("Xerox VersaLink B405")
    );
    assert!(report.suggestions.is_empty());
}

#[tokio::test]
async fn device_without_address_is_not_probed() {
    // Arrange
    let snmp = ScriptedSnmp::default();
    let prober = prober(snmp, StaticReachability::default(), ProberConfig::default());

    // Act
    let outcome = prober.probe(&Device::new("6", "-", "EE-F")).await;

    // Assert
    match outcome {
        ProbeOutcome::Status(snapshot) => assert_eq!(snapshot.error_state, "no-address"),
        other => panic!("expected status, got {other:?}"),
    }
}
