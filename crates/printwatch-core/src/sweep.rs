use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{join_all, select_ok, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::SweepConfig;
use crate::device::Device;
use crate::snapshot::FailureClass;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    Alive { rtt: Duration },
    Dead { class: FailureClass, reason: String },
}

impl ProbeReply {
    pub fn timed_out() -> Self {
        ProbeReply::Dead {
            class: FailureClass::Timeout,
            reason: "no answer before the probe timeout".to_string(),
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, ProbeReply::Alive { .. })
    }
}

#[async_trait]
pub trait Reachability: Send + Sync {
    async fn probe(&self, address: &str) -> ProbeReply;
}

/// Liveness via TCP connects to the usual printer service ports. A refused
/// connection still proves the host is up.
pub struct TcpReachability {
    ports: Vec<u16>,
    timeout: Duration,
}

impl TcpReachability {
    pub fn new(config: &SweepConfig) -> Self {
        Self {
            ports: config.ports.clone(),
            timeout: config.probe_timeout,
        }
    }

    async fn resolve(&self, address: &str) -> Result<std::net::IpAddr, ProbeReply> {
        if let Ok(ip) = address.parse() {
            return Ok(ip);
        }
        let dead = |reason: String| ProbeReply::Dead {
            class: FailureClass::NameResolution,
            reason,
        };
        match timeout(self.timeout, tokio::net::lookup_host((address, 0))).await {
            Ok(Ok(mut addrs)) => addrs
                .next()
                .map(|addr| addr.ip())
                .ok_or_else(|| dead(format!("{address} has no addresses"))),
            Ok(Err(err)) => Err(dead(format!("cannot resolve {address}: {err}"))),
            Err(_) => Err(dead(format!("resolving {address} timed out"))),
        }
    }
}

fn connect_failure(err: &io::Error) -> (FailureClass, String) {
    let class = match (err.raw_os_error(), err.kind()) {
        (Some(101) | Some(113), _) => FailureClass::Unreachable,
        (_, io::ErrorKind::TimedOut) => FailureClass::Timeout,
        (_, io::ErrorKind::ConnectionReset) => FailureClass::ConnectionReset,
        _ => FailureClass::Other,
    };
    (class, err.to_string())
}

#[async_trait]
impl Reachability for TcpReachability {
    async fn probe(&self, address: &str) -> ProbeReply {
        let ip = match self.resolve(address.trim()).await {
            Ok(ip) => ip,
            Err(reply) => return reply,
        };

        let started = Instant::now();
        let limit = self.timeout;
        let attempts: Vec<BoxFuture<'static, Result<u16, (FailureClass, String)>>> = self
            .ports
            .iter()
            .map(|&port| {
                let target = SocketAddr::new(ip, port);
                async move {
                    match timeout(limit, TcpStream::connect(target)).await {
                        Ok(Ok(_stream)) => Ok(port),
                        Ok(Err(err)) if err.kind() == io::ErrorKind::ConnectionRefused => Ok(port),
                        Ok(Err(err)) => Err(connect_failure(&err)),
                        Err(_) => Err((FailureClass::Timeout, format!("port {port} timed out"))),
                    }
                }
                .boxed()
            })
            .collect();

        if attempts.is_empty() {
            return ProbeReply::Dead {
                class: FailureClass::Other,
                reason: "no ports configured".to_string(),
            };
        }

        match select_ok(attempts).await {
            Ok((port, _rest)) => {
                debug!(address, port, "host answered");
                ProbeReply::Alive {
                    rtt: started.elapsed(),
                }
            }
            Err((class, reason)) => ProbeReply::Dead { class, reason },
        }
    }
}

#[derive(Default)]
pub struct StaticReachability {
    replies: HashMap<String, ProbeReply>,
    delay: Duration,
    probed: Mutex<Vec<String>>,
}

impl StaticReachability {
    pub fn with(mut self, address: &str, reply: ProbeReply) -> Self {
        self.replies.insert(address.to_string(), reply);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Reachability for StaticReachability {
    async fn probe(&self, address: &str) -> ProbeReply {
        self.probed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(address.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies
            .get(address)
            .cloned()
            .unwrap_or_else(ProbeReply::timed_out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReachabilityClass {
    Reachable,
    Unreachable,
    NoAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepEntry {
    pub id: String,
    pub sigla: String,
    pub ip: String,
    pub status: ReachabilityClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub reachable: usize,
    pub unreachable: usize,
    pub no_ip: usize,
    pub printers: Vec<SweepEntry>,
}

#[derive(Clone)]
pub struct ConnectivityDiagnostic {
    reachability: Arc<dyn Reachability>,
    probe_timeout: Duration,
}

impl ConnectivityDiagnostic {
    pub fn new(reachability: Arc<dyn Reachability>, config: &SweepConfig) -> Self {
        Self {
            reachability,
            probe_timeout: config.probe_timeout,
        }
    }

    pub async fn check(&self, address: &str) -> ProbeReply {
        match timeout(self.probe_timeout, self.reachability.probe(address)).await {
            Ok(reply) => reply,
            Err(_) => ProbeReply::timed_out(),
        }
    }

    pub async fn sweep(&self, devices: &[Device]) -> SweepReport {
        let started = Instant::now();
        let tasks = devices.iter().map(|device| {
            let address = device.address().map(str::to_string);
            let this = self.clone();
            async move {
                match address {
                    None => None,
                    Some(address) => {
                        let handle = tokio::spawn(async move { this.check(&address).await });
                        Some(handle.await.unwrap_or_else(|err| ProbeReply::Dead {
                            class: FailureClass::Other,
                            reason: format!("probe task failed: {err}"),
                        }))
                    }
                }
            }
        });
        let replies = join_all(tasks).await;

        let printers: Vec<SweepEntry> = devices
            .iter()
            .zip(replies)
            .map(|(device, reply)| {
                let (status, response_time, error) = match reply {
                    None => (ReachabilityClass::NoAddress, None, None),
                    Some(ProbeReply::Alive { rtt }) => {
                        (ReachabilityClass::Reachable, Some(rtt.as_millis() as u64), None)
                    }
                    Some(ProbeReply::Dead { class, reason }) => (
                        ReachabilityClass::Unreachable,
                        None,
                        Some(format!("{}: {reason}", class.label())),
                    ),
                };
                SweepEntry {
                    id: device.id.clone(),
                    sigla: device.sigla.clone(),
                    ip: device.ip.trim().to_string(),
                    status,
                    response_time,
                    error,
                }
            })
            .collect();

        let count = |class: ReachabilityClass| printers.iter().filter(|p| p.status == class).count();
        let report = SweepReport {
            timestamp: Utc::now(),
            total: printers.len(),
            reachable: count(ReachabilityClass::Reachable),
            unreachable: count(ReachabilityClass::Unreachable),
            no_ip: count(ReachabilityClass::NoAddress),
            printers,
        };
        info!(
            total = report.total,
            reachable = report.reachable,
            unreachable = report.unreachable,
            no_ip = report.no_ip,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reachability sweep complete"
        );
        report
    }
}
