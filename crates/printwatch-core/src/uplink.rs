use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::PushAck;
use crate::device::Device;
use crate::snapshot::FleetSnapshot;

pub const PUSH_PATH: &str = "/api/printer-status-from-agent";
pub const REGISTRY_PATH: &str = "/api/printers";

#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("invalid cloud url {0:?}")]
    InvalidUrl(String),
    #[error("cloud rejected the shared secret")]
    Authentication,
    #[error("cloud rejected the snapshot: {0}")]
    Validation(String),
    #[error("cloud answered with status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

impl UplinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UplinkError::Status(_) | UplinkError::Transport(_))
    }
}

impl From<reqwest::Error> for UplinkError {
    fn from(err: reqwest::Error) -> Self {
        UplinkError::Transport(err.to_string())
    }
}

#[derive(Clone)]
pub struct Uplink {
    client: Client,
    base_url: String,
    secret: String,
}

impl Uplink {
    pub fn new(base_url: &str, secret: impl Into<String>, timeout: Duration) -> Result<Self, UplinkError> {
        let base_url = base_url.trim().trim_end_matches('/');
        match reqwest::Url::parse(base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(UplinkError::InvalidUrl(base_url.to_string())),
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("printwatch-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            secret: secret.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn push(&self, fleet: &FleetSnapshot) -> Result<PushAck, UplinkError> {
        let url = format!("{}{PUSH_PATH}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret)
            .json(fleet)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let ack: PushAck = response.json().await?;
                info!(
                    processed = ack.processed,
                    with_issues = ack.with_issues,
                    critical = ack.critical_issues,
                    "snapshot delivered"
                );
                Ok(ack)
            }
            StatusCode::UNAUTHORIZED => Err(UplinkError::Authentication),
            StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                Err(UplinkError::Validation(body))
            }
            status => {
                warn!(status = status.as_u16(), "unexpected push response");
                Err(UplinkError::Status(status.as_u16()))
            }
        }
    }

    pub async fn fetch_registry(&self) -> Result<Vec<Device>, UplinkError> {
        let url = format!("{}{REGISTRY_PATH}", self.base_url);
        let response = self.client.get(&url).bearer_auth(&self.secret).send().await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED => Err(UplinkError::Authentication),
            status => Err(UplinkError::Status(status.as_u16())),
        }
    }
}
