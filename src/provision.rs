//! Device provisioning.
//!
//! Before connecting, the client posts a description of itself to the
//! provisioning endpoint. The reply may point us at a different voice
//! endpoint and hand out a fresh token.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::{ClientConfig, DeviceConfig};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Provisioning request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Provisioning server answered {0}")]
    Status(u16),
    #[error("Provisioning response is not JSON: {0}")]
    NotJson(String),
}

#[derive(Debug, Serialize)]
struct ChipInfo {
    model: u32,
    cores: u32,
    revision: u32,
    features: u32,
}

#[derive(Debug, Serialize)]
struct Application<'a> {
    name: &'a str,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct OtaSlot {
    label: &'static str,
}

#[derive(Debug, Serialize)]
struct Board<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    ip: &'a str,
    mac: &'a str,
}

/// Body of the provisioning request
#[derive(Debug, Serialize)]
pub struct DeviceReport<'a> {
    flash_size: u64,
    minimum_free_heap_size: u64,
    mac_address: &'a str,
    chip_model_name: &'a str,
    chip_info: ChipInfo,
    application: Application<'a>,
    partition_table: Vec<serde_json::Value>,
    ota: OtaSlot,
    board: Board<'a>,
}

impl<'a> DeviceReport<'a> {
    pub fn new(device: &'a DeviceConfig) -> Self {
        Self {
            flash_size: device.flash_size,
            minimum_free_heap_size: device.minimum_free_heap_size,
            mac_address: &device.mac_address,
            chip_model_name: &device.chip_model,
            chip_info: ChipInfo {
                model: 9,
                cores: 2,
                revision: 2,
                features: 18,
            },
            application: Application {
                name: &device.application_name,
                version: &device.application_version,
            },
            partition_table: Vec::new(),
            ota: OtaSlot { label: "factory" },
            board: Board {
                kind: &device.board_type,
                ip: &device.board_ip,
                mac: &device.mac_address,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WebsocketGrant {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FirmwareInfo {
    pub version: Option<String>,
    pub url: Option<String>,
}

/// What the provisioning server told us. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Provisioning {
    pub websocket: Option<WebsocketGrant>,
    pub firmware: Option<FirmwareInfo>,
}

impl Provisioning {
    pub fn parse(body: &str) -> Result<Self, ProvisionError> {
        serde_json::from_str(body).map_err(|_| {
            let shown: String = body.chars().take(100).collect();
            ProvisionError::NotJson(shown)
        })
    }

    /// Override the configured endpoint with whatever the server granted.
    /// Returns true when anything changed.
    pub fn apply(&self, config: &mut ClientConfig) -> bool {
        let Some(grant) = &self.websocket else {
            return false;
        };
        let mut changed = false;
        if let Some(url) = &grant.url {
            if *url != config.endpoint.url {
                tracing::info!("Provisioned endpoint: {}", url);
                config.endpoint.url = url.clone();
                changed = true;
            }
        }
        if let Some(token) = &grant.token {
            if *token != config.endpoint.access_token {
                tracing::debug!("Provisioned a new access token");
                config.endpoint.access_token = token.clone();
                changed = true;
            }
        }
        changed
    }
}

/// Post the device report to `url` and parse the reply
pub fn provision(url: &str, device: &DeviceConfig) -> Result<Provisioning, ProvisionError> {
    let report = DeviceReport::new(device);
    let client = Client::builder()
        .connect_timeout(REQUEST_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    tracing::info!("Provisioning with {}", url);
    let response = client
        .post(url)
        .header("Device-Id", &device.mac_address)
        .json(&report)
        .send()?;

    let status = response.status();
    let body = response.text()?;
    tracing::debug!("Provisioning response ({}): {}", status, body);
    if !status.is_success() {
        return Err(ProvisionError::Status(status.as_u16()));
    }

    let provisioning = Provisioning::parse(&body)?;
    if let Some(version) = provisioning.firmware.as_ref().and_then(|f| f.version.as_deref()) {
        tracing::info!("Server firmware version: {}", version);
    }
    Ok(provisioning)
}
