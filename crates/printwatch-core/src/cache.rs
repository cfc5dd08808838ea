use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::CacheConfig;
use crate::snapshot::FleetSnapshot;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn verify(&self, presented: Option<&str>) -> bool {
        match presented {
            Some(token) => bool::from(token.as_bytes().ct_eq(self.0.as_bytes())),
            None => false,
        }
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(***)")
    }
}

pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("missing or invalid agent credentials")]
    Authentication,
    #[error("invalid snapshot: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    pub success: bool,
    pub processed: usize,
    pub with_issues: usize,
    pub critical_issues: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CacheEntry {
    pub snapshot: Arc<FleetSnapshot>,
    pub captured_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.ttl
    }
}

#[derive(Debug, Clone)]
pub struct CacheRead {
    pub data: Option<Arc<FleetSnapshot>>,
    pub is_stale: bool,
    pub age: Option<Duration>,
    pub captured_at: Option<DateTime<Utc>>,
}

impl CacheRead {
    pub fn age_secs(&self) -> Option<u64> {
        self.age.map(|age| age.as_secs())
    }

    pub fn is_fresh(&self) -> bool {
        self.data.is_some() && !self.is_stale
    }
}

pub struct IngestCache {
    secret: SharedSecret,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entry: RwLock<Option<Arc<CacheEntry>>>,
}

impl IngestCache {
    pub fn new(secret: SharedSecret, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret,
            config,
            clock,
            entry: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn authorize(&self, token: Option<&str>) -> Result<(), IngestError> {
        if self.secret.verify(token) {
            Ok(())
        } else {
            Err(IngestError::Authentication)
        }
    }

    /// Decodes a raw request body. The caller is authenticated first, so a
    /// garbage body from an unknown caller is still an auth failure.
    pub fn push_json(&self, body: &[u8], token: Option<&str>) -> Result<PushAck, IngestError> {
        self.authorize(token)?;
        let snapshot: FleetSnapshot = serde_json::from_slice(body)
            .map_err(|err| IngestError::Validation(format!("malformed body: {err}")))?;
        self.store(snapshot)
    }

    pub fn push(&self, snapshot: FleetSnapshot, token: Option<&str>) -> Result<PushAck, IngestError> {
        self.authorize(token)?;
        self.store(snapshot)
    }

    fn store(&self, snapshot: FleetSnapshot) -> Result<PushAck, IngestError> {
        if let Err(err) = validate(&snapshot) {
            warn!(error = %err, "rejected agent snapshot");
            return Err(err);
        }

        let now = self.clock.now();
        let critical = snapshot.critical_count();
        for printer in snapshot.printers.iter().filter(|p| p.has_critical_errors) {
            warn!(
                device = %printer.id,
                sigla = %printer.sigla,
                errors = %printer.errors.join(","),
                "critical printer condition reported"
            );
        }

        let ack = PushAck {
            success: true,
            processed: snapshot.total,
            with_issues: snapshot.with_issues,
            critical_issues: critical,
            timestamp: now,
        };
        info!(
            processed = ack.processed,
            with_issues = ack.with_issues,
            critical = critical,
            location = %snapshot.agent_info.location,
            agent_version = %snapshot.agent_info.version,
            "agent snapshot cached"
        );

        let entry = Arc::new(CacheEntry {
            snapshot: Arc::new(snapshot),
            captured_at: now,
            ttl: self.config.ttl,
        });
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = Some(entry);
        Ok(ack)
    }

    pub fn read(&self) -> CacheRead {
        let entry = self
            .entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let now = self.clock.now();

        match entry {
            Some(entry) => CacheRead {
                data: Some(Arc::clone(&entry.snapshot)),
                is_stale: entry.is_stale(now),
                age: Some(entry.age(now)),
                captured_at: Some(entry.captured_at),
            },
            None => CacheRead {
                data: None,
                is_stale: true,
                age: None,
                captured_at: None,
            },
        }
    }
}

fn validate(snapshot: &FleetSnapshot) -> Result<(), IngestError> {
    for (idx, printer) in snapshot.printers.iter().enumerate() {
        if printer.id.trim().is_empty() {
            return Err(IngestError::Validation(format!("printer #{idx} has an empty id")));
        }
        if printer.sigla.trim().is_empty() {
            return Err(IngestError::Validation(format!(
                "printer {} has an empty sigla",
                printer.id
            )));
        }
        if !printer.critical_flag_consistent() {
            return Err(IngestError::Validation(format!(
                "printer {} has an inconsistent hasCriticalErrors flag",
                printer.id
            )));
        }
    }

    if snapshot.total != snapshot.printers.len() {
        return Err(IngestError::Validation(format!(
            "total is {} but {} printers were sent",
            snapshot.total,
            snapshot.printers.len()
        )));
    }

    let derived = snapshot.printers.iter().filter(|p| p.has_issues()).count();
    if snapshot.with_issues != derived {
        return Err(IngestError::Validation(format!(
            "withIssues is {} but {derived} printers have issues",
            snapshot.with_issues
        )));
    }

    Ok(())
}
