use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::cache::{IngestCache, ManualClock, SharedSecret};
use crate::config::{CacheConfig, ProberConfig, SweepConfig};
use crate::device::Device;
use crate::prober::{FallbackProber, ProbeOutcome};
use crate::snapshot::{AgentInfo, FleetSnapshot, Provenance, StatusSnapshot};
use crate::status::{FallbackReason, StatusService};
use crate::sweep::{ConnectivityDiagnostic, StaticReachability};
use crate::test_support::{PrinterScript, ScriptedSnmp};

struct Fixture {
    service: StatusService,
    cache: Arc<IngestCache>,
    clock: Arc<ManualClock>,
}

fn fixture(snmp: ScriptedSnmp) -> Fixture {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = Arc::new(IngestCache::new(
        SharedSecret::new("s"),
        CacheConfig::default(),
        clock.clone(),
    ));
    let prober = FallbackProber::new(
        Arc::new(snmp),
        ConnectivityDiagnostic::new(Arc::new(StaticReachability::default()), &SweepConfig::default()),
        ProberConfig::default(),
    );
    let registry = Arc::new(vec![Device::new("41", "10.2.0.41", "EMEF-REGISTRY")]);
    Fixture {
        service: StatusService::new(Arc::clone(&cache), prober, registry),
        cache,
        clock,
    }
}

fn pushed_fleet() -> FleetSnapshot {
    let device = Device::new("41", "10.2.0.41", "EMEF-REGISTRY");
    FleetSnapshot::assemble(
        Utc::now(),
        vec![StatusSnapshot::online(&device, Provenance::Agent, Utc::now())],
        AgentInfo::current("school"),
    )
}

#[tokio::test]
async fn fresh_cache_is_served_without_probing() {
    // Arrange
    let fx = fixture(ScriptedSnmp::default().with("10.2.0.41", PrinterScript::healthy()));
    fx.cache.push(pushed_fleet(), Some("s")).expect("push");

    // Act
    let status = fx.service.status(&["10.2.0.41".to_string()]).await;

    // Assert
    assert_eq!(status.source, Provenance::Cache);
    assert!(!status.is_stale);
    assert_eq!(status.fallback, None);
    assert!(status.fallback_results.is_empty());
    assert_eq!(status.data.map(|d| d.total), Some(1));
}

#[tokio::test]
async fn stale_cache_falls_back_but_keeps_old_data() {
    // Arrange
    let fx = fixture(ScriptedSnmp::default().with("10.2.0.41", PrinterScript::healthy()));
    fx.cache.push(pushed_fleet(), Some("s")).expect("push");
    fx.clock.advance(Duration::from_secs(600));

    // Act
    let status = fx.service.status(&["10.2.0.41".to_string()]).await;

    // Assert
    assert_eq!(status.fallback, Some(FallbackReason::StaleAgentData));
    assert!(status.is_stale);
    assert_eq!(status.age_secs, Some(600));
    assert!(status.data.is_some());
    assert_eq!(status.fallback_results.len(), 1);
    match &status.fallback_results[0].outcome {
        ProbeOutcome::Status(snapshot) => assert_eq!(snapshot.sigla, "EMEF-REGISTRY"),
        other => panic!("expected status, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_cache_probes_each_address_once() {
    // Arrange
    let fx = fixture(ScriptedSnmp::default().with("10.2.0.99", PrinterScript::healthy()));
    let requested = vec![
        "10.2.0.99".to_string(),
        " 10.2.0.99 ".to_string(),
        "10.2.0.98".to_string(),
    ];

    // Act
    let status = fx.service.status(&requested).await;

    // Assert
    assert_eq!(status.fallback, Some(FallbackReason::NoAgentData));
    assert!(status.data.is_none());
    assert_eq!(status.fallback_results.len(), 2);
    assert!(status.fallback_results[0].outcome.is_status());
    assert!(!status.fallback_results[1].outcome.is_status());
}

#[test]
fn unknown_address_resolves_to_adhoc_device() {
    let fx = fixture(ScriptedSnmp::default());

    let known = fx.service.resolve_device("10.2.0.41");
    let unknown = fx.service.resolve_device("10.2.0.77");

    assert_eq!(known.sigla, "EMEF-REGISTRY");
    assert_eq!(unknown.id, "10.2.0.77");
}
