use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::ber::{Oid, Value, VarBind};
use crate::snmp::{oids, GetResponse, SnmpClient, SnmpError};

#[derive(Clone)]
pub(crate) struct PrinterScript {
    pub basic: Result<Vec<(&'static [u32], Value)>, SnmpError>,
    pub extended: Result<Vec<(&'static [u32], Value)>, SnmpError>,
    pub delay: Duration,
}

impl PrinterScript {
    pub fn healthy() -> Self {
        Self {
            basic: Ok(vec![
                (oids::SYS_DESCR, Value::OctetString(b"Xerox VersaLink B405".to_vec())),
                (oids::SYS_UPTIME, Value::TimeTicks(9_360_000)),
                (oids::HR_DEVICE_STATUS, Value::Integer(2)),
            ]),
            extended: Ok(vec![
                (oids::HR_PRINTER_STATUS, Value::Integer(3)),
                (oids::HR_PRINTER_ERROR_STATE, Value::OctetString(vec![0x00, 0x00])),
                (oids::MARKER_SUPPLIES_LEVEL, Value::Integer(40)),
                (oids::MARKER_SUPPLIES_MAX, Value::Integer(80)),
                (oids::MARKER_LIFE_COUNT, Value::Counter32(12_345)),
            ]),
            delay: Duration::ZERO,
        }
    }

    pub fn with_error_state(mut self, bytes: Vec<u8>) -> Self {
        if let Ok(extended) = &mut self.extended {
            for (oid, value) in extended.iter_mut() {
                if *oid == oids::HR_PRINTER_ERROR_STATE {
                    *value = Value::OctetString(bytes.clone());
                }
            }
        }
        self
    }

    pub fn failing(err: SnmpError) -> Self {
        Self {
            basic: Err(err.clone()),
            extended: Err(err),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
pub(crate) struct ScriptedSnmp {
    scripts: HashMap<String, PrinterScript>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSnmp {
    pub fn with(mut self, address: &str, script: PrinterScript) -> Self {
        self.scripts.insert(address.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SnmpClient for ScriptedSnmp {
    async fn get(&self, address: &str, oids: &[Oid]) -> Result<GetResponse, SnmpError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(address.to_string());
        }
        let Some(script) = self.scripts.get(address).cloned() else {
            return Err(SnmpError::Timeout);
        };
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        let basic = oids.contains(&Oid::from_static(crate::snmp::oids::SYS_DESCR));
        let reply = if basic { script.basic } else { script.extended };
        reply.map(|values| GetResponse {
            error_status: 0,
            error_index: 0,
            varbinds: values
                .into_iter()
                .map(|(oid, value)| VarBind {
                    oid: Oid::from_static(oid),
                    value,
                })
                .collect(),
        })
    }
}
