use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::ConfigError;

const ADDRESS_PLACEHOLDERS: [&str; 5] = ["n/a", "-", "não informado", "nao informado", "none"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub ip: String,
    pub sigla: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

impl Device {
    pub fn new(id: impl Into<String>, ip: impl Into<String>, sigla: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            sigla: sigla.into(),
            sector: None,
            vendor: None,
            model: None,
            serial: None,
        }
    }

    pub fn adhoc(address: &str) -> Self {
        let address = address.trim();
        Self::new(address, address, address)
    }

    pub fn address(&self) -> Option<&str> {
        let trimmed = self.ip.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lowered = trimmed.to_lowercase();
        if ADDRESS_PLACEHOLDERS.contains(&lowered.as_str()) {
            return None;
        }
        Some(trimmed)
    }

    pub fn has_address(&self) -> bool {
        self.address().is_some()
    }
}

pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

fn nullable_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn load_devices(path: &Path) -> Result<Vec<Device>, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        ConfigError::Targets(format!("cannot read {}: {err}", path.display()))
    })?;
    let devices: Vec<Device> = serde_json::from_str(&raw).map_err(|err| {
        ConfigError::Targets(format!("cannot parse {}: {err}", path.display()))
    })?;
    validate_devices(&devices)?;
    Ok(devices)
}

pub fn validate_devices(devices: &[Device]) -> Result<(), ConfigError> {
    if devices.is_empty() {
        return Err(ConfigError::Targets("device list is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for device in devices {
        if device.id.trim().is_empty() {
            return Err(ConfigError::Targets(format!(
                "device '{}' has an empty id",
                device.sigla
            )));
        }
        if !seen.insert(device.id.as_str()) {
            return Err(ConfigError::Targets(format!("duplicate device id {}", device.id)));
        }
    }

    Ok(())
}
