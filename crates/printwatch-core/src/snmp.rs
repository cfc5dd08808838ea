use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

use crate::ber::{decode_message, encode_message, Message, Oid, Value, VarBind, PDU_RESPONSE};
use crate::config::SnmpSettings;
use crate::snapshot::FailureClass;

pub mod oids {
    pub const SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
    pub const SYS_UPTIME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];
    pub const HR_DEVICE_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 3, 2, 1, 5, 1];
    pub const HR_PRINTER_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 3, 5, 1, 1, 1];
    pub const HR_PRINTER_ERROR_STATE: &[u32] = &[1, 3, 6, 1, 2, 1, 25, 3, 5, 1, 2, 1];
    pub const MARKER_SUPPLIES_LEVEL: &[u32] = &[1, 3, 6, 1, 2, 1, 43, 11, 1, 1, 9, 1, 1];
    pub const MARKER_SUPPLIES_MAX: &[u32] = &[1, 3, 6, 1, 2, 1, 43, 11, 1, 1, 8, 1, 1];
    pub const MARKER_LIFE_COUNT: &[u32] = &[1, 3, 6, 1, 2, 1, 43, 10, 2, 1, 4, 1, 1];
}

pub fn basic_oids() -> Vec<Oid> {
    [oids::SYS_DESCR, oids::SYS_UPTIME, oids::HR_DEVICE_STATUS]
        .into_iter()
        .map(Oid::from_static)
        .collect()
}

pub fn extended_oids() -> Vec<Oid> {
    [
        oids::HR_PRINTER_STATUS,
        oids::HR_PRINTER_ERROR_STATE,
        oids::MARKER_SUPPLIES_LEVEL,
        oids::MARKER_SUPPLIES_MAX,
        oids::MARKER_LIFE_COUNT,
    ]
    .into_iter()
    .map(Oid::from_static)
    .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetResponse {
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

impl GetResponse {
    pub fn value(&self, oid: &Oid) -> Option<&Value> {
        self.varbinds
            .iter()
            .find(|vb| &vb.oid == oid)
            .map(|vb| &vb.value)
            .filter(|value| !value.is_exception() && **value != Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnmpError {
    #[error("cannot resolve {0}")]
    NameResolution(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("io error: {0}")]
    Io(String),
}

impl SnmpError {
    pub fn class(&self) -> FailureClass {
        match self {
            SnmpError::NameResolution(_) => FailureClass::NameResolution,
            SnmpError::Timeout => FailureClass::Timeout,
            SnmpError::ConnectionReset(_) => FailureClass::ConnectionReset,
            SnmpError::Unreachable(_) => FailureClass::Unreachable,
            SnmpError::Io(_) => FailureClass::Other,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SnmpError::Timeout | SnmpError::ConnectionReset(_))
    }

    pub(crate) fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        // ENETUNREACH / EHOSTUNREACH
        if matches!(err.raw_os_error(), Some(101) | Some(113)) {
            return SnmpError::Unreachable(err.to_string());
        }
        match err.kind() {
            ErrorKind::TimedOut => SnmpError::Timeout,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused => {
                SnmpError::ConnectionReset(err.to_string())
            }
            _ => SnmpError::Io(err.to_string()),
        }
    }
}

#[async_trait]
pub trait SnmpClient: Send + Sync {
    async fn get(&self, address: &str, oids: &[Oid]) -> Result<GetResponse, SnmpError>;
}

pub struct UdpSnmpClient {
    settings: SnmpSettings,
    next_id: AtomicI32,
}

impl UdpSnmpClient {
    pub fn new(settings: SnmpSettings) -> Self {
        let seed = (Utc::now().timestamp_subsec_nanos() & 0x3FFF_FFFF) as i32;
        Self {
            settings,
            next_id: AtomicI32::new(seed),
        }
    }

    pub fn settings(&self) -> &SnmpSettings {
        &self.settings
    }

    fn next_request_id(&self) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) & 0x7FFF_FFFF;
        if id == 0 {
            1
        } else {
            id
        }
    }

    async fn resolve(&self, address: &str) -> Result<SocketAddr, SnmpError> {
        let address = address.trim();
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.settings.port));
        }

        let lookup = tokio::net::lookup_host((address, self.settings.port));
        match timeout(self.settings.timeout, lookup).await {
            Ok(Ok(mut addrs)) => addrs
                .next()
                .ok_or_else(|| SnmpError::NameResolution(address.to_string())),
            Ok(Err(err)) => {
                debug!(address, error = %err, "name lookup failed");
                Err(SnmpError::NameResolution(address.to_string()))
            }
            Err(_) => Err(SnmpError::NameResolution(address.to_string())),
        }
    }

    async fn exchange(
        &self,
        socket: &UdpSocket,
        request: &[u8],
        request_id: i32,
    ) -> Result<GetResponse, SnmpError> {
        socket.send(request).await.map_err(SnmpError::from_io)?;

        let deadline = Instant::now() + self.settings.timeout;
        let mut buf = vec![0_u8; 65_535];
        loop {
            let received = match timeout_at(deadline, socket.recv(&mut buf)).await {
                Err(_) => return Err(SnmpError::Timeout),
                Ok(Err(err)) => return Err(SnmpError::from_io(err)),
                Ok(Ok(n)) => n,
            };

            let message = match decode_message(&buf[..received]) {
                Ok(message) => message,
                Err(err) => {
                    debug!(error = %err, "ignoring undecodable datagram");
                    continue;
                }
            };
            if message.pdu.kind != PDU_RESPONSE || message.pdu.request_id != request_id {
                debug!(
                    expected = request_id,
                    got = message.pdu.request_id,
                    "ignoring unrelated response"
                );
                continue;
            }

            return Ok(GetResponse {
                error_status: message.pdu.error_status,
                error_index: message.pdu.error_index,
                varbinds: message.pdu.varbinds,
            });
        }
    }
}

#[async_trait]
impl SnmpClient for UdpSnmpClient {
    async fn get(&self, address: &str, oids: &[Oid]) -> Result<GetResponse, SnmpError> {
        let target = self.resolve(address).await?;
        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await.map_err(SnmpError::from_io)?;
        socket.connect(target).await.map_err(SnmpError::from_io)?;

        let request_id = self.next_request_id();
        let request = encode_message(&Message::get_request(
            self.settings.version.wire_value(),
            &self.settings.community,
            request_id,
            oids,
        ));

        let mut last_err = SnmpError::Timeout;
        for attempt in 0..=self.settings.retries {
            match self.exchange(&socket, &request, request_id).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => {
                    debug!(%target, attempt, error = %err, "snmp attempt failed");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }
}
