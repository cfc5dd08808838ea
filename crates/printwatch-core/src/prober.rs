use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::ber::{Oid, Value};
use crate::config::ProberConfig;
use crate::device::Device;
use crate::poller::query_device;
use crate::snapshot::{
    DiagnosticResult, DiagnosticTest, FailureClass, Provenance, StatusSnapshot, TestStatus,
};
use crate::snmp::{basic_oids, oids, SnmpClient, SnmpError};
use crate::sweep::{ConnectivityDiagnostic, ProbeReply};

const SHARED_PATH_SUGGESTION: &str =
    "Confirm the execution environment shares a network path with the device fleet, or rely on the local agent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ProbeOutcome {
    Status(StatusSnapshot),
    Diagnostic(DiagnosticResult),
}

impl ProbeOutcome {
    pub fn is_status(&self) -> bool {
        matches!(self, ProbeOutcome::Status(_))
    }
}

#[derive(Clone)]
pub struct FallbackProber {
    snmp: Arc<dyn SnmpClient>,
    connectivity: ConnectivityDiagnostic,
    config: ProberConfig,
}

impl FallbackProber {
    pub fn new(
        snmp: Arc<dyn SnmpClient>,
        connectivity: ConnectivityDiagnostic,
        config: ProberConfig,
    ) -> Self {
        Self {
            snmp,
            connectivity,
            config,
        }
    }

    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    pub async fn probe(&self, device: &Device) -> ProbeOutcome {
        let Some(address) = device.address().map(str::to_string) else {
            return ProbeOutcome::Status(StatusSnapshot::offline(
                device,
                "no-address",
                Provenance::Fallback,
                Utc::now(),
            ));
        };

        let this = self.clone();
        let device = device.clone();
        let target = address.clone();
        let ceiling = self.config.ceiling;
        let task = tokio::spawn(async move {
            let bounded = timeout(ceiling, this.run_probe(&device, &target)).await;
            bounded.unwrap_or_else(|_| {
                warn!(device = %device.id, address = %target, "fallback probe hit its ceiling");
                ProbeOutcome::Diagnostic(this.ceiling_report(&target))
            })
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "fallback probe task failed");
                ProbeOutcome::Diagnostic(task_failure_report(&address, &err))
            }
        }
    }

    pub async fn diagnose(&self, address: &str) -> DiagnosticResult {
        let address = address.trim().to_string();
        let target = address.clone();
        let this = self.clone();
        let ceiling = self.config.ceiling;
        let task = tokio::spawn(async move {
            let query = async {
                match this.snmp.get(&target, &basic_oids()).await {
                    Ok(response) => {
                        let descr = response
                            .value(&Oid::from_static(oids::SYS_DESCR))
                            .and_then(Value::as_text);
                        this.success_report(&target, descr)
                    }
                    Err(err) => this.failure_report(&target, &err).await,
                }
            };
            match timeout(ceiling, query).await {
                Ok(report) => report,
                Err(_) => this.ceiling_report(&target),
            }
        });

        match task.await {
            Ok(report) => report,
            Err(err) => task_failure_report(&address, &err),
        }
    }

    async fn run_probe(&self, device: &Device, address: &str) -> ProbeOutcome {
        match query_device(self.snmp.as_ref(), device, address, Provenance::Fallback).await {
            Ok(snapshot) => {
                info!(device = %device.id, address, "fallback probe succeeded");
                ProbeOutcome::Status(snapshot)
            }
            Err(err) => {
                debug!(device = %device.id, address, error = %err, "fallback probe failed");
                ProbeOutcome::Diagnostic(self.failure_report(address, &err).await)
            }
        }
    }

    fn session_test(&self) -> DiagnosticTest {
        let snmp = &self.config.snmp;
        DiagnosticTest::new(
            "snmp-session",
            TestStatus::Attempted,
            format!(
                "community '{}', version {:?}, port {}, timeout {} ms, retries {}",
                snmp.community,
                snmp.version,
                snmp.port,
                snmp.timeout.as_millis(),
                snmp.retries
            ),
        )
    }

    fn success_report(&self, address: &str, descr: Option<String>) -> DiagnosticResult {
        let mut basic = DiagnosticTest::new("basic-query", TestStatus::Success, "The device answered SNMP");
        if let Some(descr) = descr {
            basic = basic.with_result(descr);
        }
        let mut session = self.session_test();
        session.status = TestStatus::Success;

        DiagnosticResult {
            ip: address.to_string(),
            timestamp: Utc::now(),
            success: true,
            tests: vec![
                name_resolution_test(address, None),
                session,
                basic,
                DiagnosticTest::new(
                    "overall-connectivity",
                    TestStatus::Success,
                    "The device is reachable over SNMP",
                ),
            ],
            suggestions: Vec::new(),
        }
    }

    async fn failure_report(&self, address: &str, err: &SnmpError) -> DiagnosticResult {
        let class = err.class();
        let mut tests = vec![
            name_resolution_test(address, Some(err)),
            self.session_test(),
            DiagnosticTest::failed(
                "basic-query",
                class,
                err.to_string(),
                "The basic SNMP query did not get an answer",
            ),
            class_test(class, err),
        ];

        let reply = self.connectivity.check(address).await;
        let host_alive = reply.is_alive();
        tests.push(match &reply {
            ProbeReply::Alive { rtt } => DiagnosticTest::new(
                "reachability",
                TestStatus::Success,
                "The host accepted or refused a TCP connection",
            )
            .with_result(format!("{} ms", rtt.as_millis())),
            ProbeReply::Dead { class, reason } => DiagnosticTest::failed(
                "reachability",
                *class,
                reason.clone(),
                "The host did not answer on any printer service port",
            ),
        });

        tests.push(DiagnosticTest::failed(
            "overall-connectivity",
            class,
            err.to_string(),
            if host_alive {
                "The host is up but SNMP did not answer"
            } else {
                "The device could not be reached from this environment"
            },
        ));
        if self.config.cloud_hosted {
            tests.push(environment_test());
        }

        let suggestions = self.suggestions(&[class], host_alive);
        DiagnosticResult {
            ip: address.to_string(),
            timestamp: Utc::now(),
            success: false,
            tests,
            suggestions,
        }
    }

    fn ceiling_report(&self, address: &str) -> DiagnosticResult {
        let details = format!(
            "The probe did not finish within {} s",
            self.config.ceiling.as_secs()
        );
        let mut tests = vec![
            DiagnosticTest::failed("network-timeout", FailureClass::Timeout, "timeout", details.clone()),
            DiagnosticTest::failed("overall-connectivity", FailureClass::Timeout, "timeout", details),
        ];
        if self.config.cloud_hosted {
            tests.push(environment_test());
        }
        DiagnosticResult {
            ip: address.to_string(),
            timestamp: Utc::now(),
            success: false,
            tests,
            suggestions: self.suggestions(&[FailureClass::Timeout], false),
        }
    }

    fn suggestions(&self, classes: &[FailureClass], host_alive: bool) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut add = |text: &str| {
            if !out.iter().any(|s| s == text) {
                out.push(text.to_string());
            }
        };

        for class in classes {
            match class {
                FailureClass::NameResolution => {
                    add("Check that the printer's hostname is registered in DNS, or use its IP address")
                }
                FailureClass::Timeout => {
                    add("Confirm the printer is powered on and connected to the network");
                    add("Verify SNMP is enabled on the printer and UDP port 161 is not blocked by a firewall");
                }
                FailureClass::ConnectionReset => {
                    add("Check whether a firewall is rejecting SNMP traffic on UDP port 161")
                }
                FailureClass::Unreachable => {
                    add("Check routing between this service and the printer's network")
                }
                FailureClass::Other => add("Review the printer's network configuration"),
            }
        }
        if host_alive {
            add("The host is up; confirm the SNMP community string matches the printer configuration");
        }
        if self.config.cloud_hosted {
            add(SHARED_PATH_SUGGESTION);
        }
        out
    }
}

fn name_resolution_test(address: &str, err: Option<&SnmpError>) -> DiagnosticTest {
    if address.parse::<IpAddr>().is_ok() {
        return DiagnosticTest::new(
            "name-resolution",
            TestStatus::Success,
            "Literal IP address, no lookup needed",
        )
        .with_result(address.to_string());
    }
    match err {
        Some(err) if matches!(err, SnmpError::NameResolution(_)) => DiagnosticTest::failed(
            "name-resolution",
            FailureClass::NameResolution,
            err.to_string(),
            "The hostname could not be resolved",
        ),
        _ => DiagnosticTest::new("name-resolution", TestStatus::Success, "The hostname resolved"),
    }
}

fn class_test(class: FailureClass, err: &SnmpError) -> DiagnosticTest {
    let (name, details) = match class {
        FailureClass::NameResolution => ("dns-resolution", "DNS lookup failed for the device"),
        FailureClass::Timeout => ("network-timeout", "No SNMP answer before the timeout"),
        FailureClass::ConnectionReset => ("connection-reset", "The device or a firewall rejected the request"),
        FailureClass::Unreachable => ("host-unreachable", "No route to the device"),
        FailureClass::Other => ("network-error", "The request failed at the socket layer"),
    };
    DiagnosticTest::failed(name, class, err.to_string(), details)
}

fn task_failure_report(address: &str, err: &tokio::task::JoinError) -> DiagnosticResult {
    DiagnosticResult {
        ip: address.to_string(),
        timestamp: Utc::now(),
        success: false,
        tests: vec![DiagnosticTest::failed(
            "overall-connectivity",
            FailureClass::Other,
            err.to_string(),
            "The probe task ended unexpectedly",
        )],
        suggestions: Vec::new(),
    }
}

fn environment_test() -> DiagnosticTest {
    DiagnosticTest::new(
        "environment-check",
        TestStatus::Info,
        "Running in a cloud environment; private fleet addresses are usually only reachable through the local agent",
    )
}
