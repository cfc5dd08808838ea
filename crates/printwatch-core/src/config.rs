use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("shared secret is not configured")]
    MissingSecret,
    #[error("target list error: {0}")]
    Targets(String),
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl SnmpVersion {
    pub fn wire_value(self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnmpSettings {
    pub community: String,
    pub version: SnmpVersion,
    pub port: u16,
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub retries: u32,
}

impl Default for SnmpSettings {
    fn default() -> Self {
        Self {
            community: "public".to_string(),
            version: SnmpVersion::V2c,
            port: 161,
            timeout: Duration::from_millis(5000),
            retries: 2,
        }
    }
}

impl SnmpSettings {
    pub fn worst_case(&self) -> Duration {
        self.timeout * (self.retries + 1)
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub snmp: SnmpSettings,
    pub interval: Duration,
    pub max_concurrency: usize,
    pub location: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            snmp: SnmpSettings::default(),
            interval: Duration::from_secs(30),
            max_concurrency: 16,
            location: "local-network".to_string(),
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.snmp.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "snmp_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.snmp.community.is_empty() {
            return Err(ConfigError::Invalid {
                name: "community",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub snmp: SnmpSettings,
    pub ceiling: Duration,
    pub cloud_hosted: bool,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            snmp: SnmpSettings {
                timeout: Duration::from_millis(4000),
                ..SnmpSettings::default()
            },
            ceiling: Duration::from_secs(15),
            cloud_hosted: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub probe_timeout: Duration,
    pub ports: Vec<u16>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(1000),
            ports: vec![9100, 631, 80, 515],
        }
    }
}

pub fn require_secret(secret: Option<&str>) -> Result<String, ConfigError> {
    match secret.map(str::trim) {
        Some(secret) if !secret.is_empty() => Ok(secret.to_string()),
        _ => Err(ConfigError::MissingSecret),
    }
}
