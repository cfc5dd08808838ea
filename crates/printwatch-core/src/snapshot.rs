use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::classify;
use crate::device::{string_or_number, Device};

/// Ordered so that `max()` over a cycle's details yields the worst one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub error: String,
    pub severity: Severity,
    pub action: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Agent,
    Fallback,
    Cache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperStatus {
    Ok,
    Low,
    Empty,
    Jammed,
    Unknown,
}

impl PaperStatus {
    pub fn from_signals(signals: &[String]) -> Self {
        let has = |name: &str| signals.iter().any(|s| s == name);
        if has("jammed") {
            PaperStatus::Jammed
        } else if has("noPaper") || has("inputTrayEmpty") {
            PaperStatus::Empty
        } else if has("lowPaper") {
            PaperStatus::Low
        } else {
            PaperStatus::Ok
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub ip: String,
    pub sigla: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    pub status: String,
    pub error_state: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub error_details: Vec<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toner_level: Option<u8>,
    pub paper_status: PaperStatus,
    pub is_online: bool,
    pub last_checked: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub has_critical_errors: bool,
    pub source: Provenance,
}

impl StatusSnapshot {
    pub fn online(device: &Device, source: Provenance, checked_at: DateTime<Utc>) -> Self {
        Self {
            id: device.id.clone(),
            ip: device.ip.trim().to_string(),
            sigla: device.sigla.clone(),
            sector: device.sector.clone(),
            status: "online".to_string(),
            error_state: "none".to_string(),
            errors: Vec::new(),
            error_details: Vec::new(),
            toner_level: None,
            paper_status: PaperStatus::Unknown,
            is_online: true,
            last_checked: checked_at,
            uptime: None,
            uptime_seconds: None,
            page_count: None,
            model: None,
            has_critical_errors: false,
            source,
        }
    }

    pub fn offline(
        device: &Device,
        reason: &str,
        source: Provenance,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: "offline".to_string(),
            error_state: reason.to_string(),
            is_online: false,
            ..Self::online(device, source, checked_at)
        }
    }

    pub fn apply_signals(&mut self, signals: Vec<String>) {
        self.error_details = signals.iter().map(|s| classify(s)).collect();
        self.has_critical_errors = self
            .error_details
            .iter()
            .any(|d| d.severity == Severity::Critical);
        self.paper_status = PaperStatus::from_signals(&signals);
        self.error_state = if signals.is_empty() {
            "none".to_string()
        } else {
            signals.join(",")
        };
        self.errors = signals;
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.error_details.iter().map(|d| d.severity).max()
    }

    pub fn has_issues(&self) -> bool {
        !self.is_online || !self.error_details.is_empty()
    }

    pub fn critical_flag_consistent(&self) -> bool {
        self.has_critical_errors
            == self
                .error_details
                .iter()
                .any(|d| d.severity == Severity::Critical)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub version: String,
    pub location: String,
}

impl AgentInfo {
    pub fn current(location: impl Into<String>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            location: location.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub with_issues: usize,
    pub printers: Vec<StatusSnapshot>,
    pub agent_info: AgentInfo,
}

impl FleetSnapshot {
    pub fn assemble(
        timestamp: DateTime<Utc>,
        printers: Vec<StatusSnapshot>,
        agent_info: AgentInfo,
    ) -> Self {
        Self {
            timestamp,
            total: printers.len(),
            with_issues: printers.iter().filter(|p| p.has_issues()).count(),
            printers,
            agent_info,
        }
    }

    pub fn critical_count(&self) -> usize {
        self.printers.iter().filter(|p| p.has_critical_errors).count()
    }

    pub fn online_count(&self) -> usize {
        self.printers.iter().filter(|p| p.is_online).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceState {
    Unknown,
    OnlineClean,
    OnlineWarning,
    OnlineCritical,
    Offline,
}

impl DeviceState {
    pub fn from_snapshot(snapshot: &StatusSnapshot) -> Self {
        if !snapshot.is_online {
            return DeviceState::Offline;
        }
        match snapshot.highest_severity() {
            None | Some(Severity::Info) => DeviceState::OnlineClean,
            Some(Severity::Warning) => DeviceState::OnlineWarning,
            Some(Severity::Critical) => DeviceState::OnlineCritical,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceState::Unknown => "unknown",
            DeviceState::OnlineClean => "online-clean",
            DeviceState::OnlineWarning => "online-warning",
            DeviceState::OnlineCritical => "online-critical",
            DeviceState::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    NameResolution,
    Timeout,
    ConnectionReset,
    Unreachable,
    Other,
}

impl FailureClass {
    pub fn label(self) -> &'static str {
        match self {
            FailureClass::NameResolution => "name-resolution",
            FailureClass::Timeout => "timeout",
            FailureClass::ConnectionReset => "connection-reset",
            FailureClass::Unreachable => "unreachable",
            FailureClass::Other => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Attempted,
    Success,
    Failed,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticTest {
    pub test: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl DiagnosticTest {
    pub fn new(test: &str, status: TestStatus, details: impl Into<String>) -> Self {
        Self {
            test: test.to_string(),
            status,
            error: None,
            failure_class: None,
            details: details.into(),
            result: None,
        }
    }

    pub fn failed(
        test: &str,
        class: FailureClass,
        error: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            failure_class: Some(class),
            ..Self::new(test, TestStatus::Failed, details)
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticResult {
    pub ip: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub tests: Vec<DiagnosticTest>,
    pub suggestions: Vec<String>,
}

impl DiagnosticResult {
    pub fn failure_classes(&self) -> Vec<FailureClass> {
        let mut classes = Vec::new();
        for class in self.tests.iter().filter_map(|t| t.failure_class) {
            if !classes.contains(&class) {
                classes.push(class);
            }
        }
        classes
    }

    pub fn test(&self, name: &str) -> Option<&DiagnosticTest> {
        self.tests.iter().find(|t| t.test == name)
    }
}
