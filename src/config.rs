use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::audio::{AudioParams, OverflowPolicy, CHANNELS, FRAME_DURATION_MS, SAMPLE_RATE};
use crate::session::{ListenMode, PROTOCOL_VERSION};
use crate::transport::{ConnectOptions, ReconnectPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("Failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("Invalid config file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("Config error: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    pub access_token: String,
    pub protocol_version: u32,
    pub listen_mode: ListenMode,
    pub reconnect: ReconnectPolicy,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/v1/ws/".to_string(),
            access_token: "test-token".to_string(),
            protocol_version: PROTOCOL_VERSION,
            listen_mode: ListenMode::Auto,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Who we claim to be, both in the handshake headers and in provisioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub mac_address: String,
    /// Generated on first run and persisted
    pub client_id: Option<String>,
    pub chip_model: String,
    pub board_type: String,
    pub board_ip: String,
    pub application_name: String,
    pub application_version: String,
    pub flash_size: u64,
    pub minimum_free_heap_size: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mac_address: "00:00:00:00:00:00".to_string(),
            client_id: None,
            chip_model: "esp32s3".to_string(),
            board_type: "bread-compact-wifi".to_string(),
            board_ip: "127.0.0.1".to_string(),
            application_name: env!("CARGO_PKG_NAME").to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
            flash_size: 16 * 1024 * 1024,
            minimum_free_heap_size: 8_318_916,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
    /// None for the system default
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// Depth of the device ring buffers, in frames
    pub ring_frames: usize,
    /// Capture sleep while not listening
    pub capture_idle_ms: u64,
    /// Playback sleep after inserting silence
    pub underrun_sleep_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_duration_ms: FRAME_DURATION_MS,
            input_device: None,
            output_device: None,
            ring_frames: 4,
            capture_idle_ms: 10,
            underrun_sleep_ms: 20,
        }
    }
}

impl AudioConfig {
    pub fn params(&self) -> AudioParams {
        AudioParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frame_duration_ms: self.frame_duration_ms,
        }
    }

    pub fn capture_idle(&self) -> Duration {
        Duration::from_millis(self.capture_idle_ms)
    }

    pub fn underrun_sleep(&self) -> Duration {
        Duration::from_millis(self.underrun_sleep_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// None keeps the queue unbounded
    pub max_queued_frames: Option<usize>,
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Skipped when unset
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: EndpointConfig,
    pub device: DeviceConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub provisioning: ProvisioningConfig,
}

/// Path to the config file
pub fn default_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxlink");
    config_dir.join("config.json")
}

impl ClientConfig {
    /// Load the config from `path`; a missing file gives the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Save the config to `path`
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| ConfigError::Write(dir.to_path_buf(), e))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        fs::write(path, content).map_err(|e| ConfigError::Write(path.to_path_buf(), e))
    }

    /// Get or create the client id. Returns true when a new one was generated.
    pub fn ensure_client_id(&mut self) -> bool {
        if self.device.client_id.is_some() {
            return false;
        }
        self.device.client_id = Some(Uuid::new_v4().to_string());
        true
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if ![8000, 12000, 16000, 24000, 48000].contains(&audio.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "unsupported sample rate {}",
                audio.sample_rate
            )));
        }
        if !(1..=2).contains(&audio.channels) {
            return Err(ConfigError::Invalid(format!(
                "unsupported channel count {}",
                audio.channels
            )));
        }
        if ![10, 20, 40, 60].contains(&audio.frame_duration_ms) {
            return Err(ConfigError::Invalid(format!(
                "unsupported frame duration {}ms",
                audio.frame_duration_ms
            )));
        }
        let url = &self.endpoint.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!("endpoint must be ws:// or wss://, got {}", url)));
        }
        if self.playback.max_queued_frames == Some(0) {
            return Err(ConfigError::Invalid("max_queued_frames must be positive".into()));
        }
        Ok(())
    }

    /// Handshake headers for the voice endpoint
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.endpoint.access_token),
            ),
            (
                "Protocol-Version".to_string(),
                self.endpoint.protocol_version.to_string(),
            ),
            ("Device-Id".to_string(), self.device.mac_address.clone()),
        ];
        if let Some(client_id) = &self.device.client_id {
            headers.push(("Client-Id".to_string(), client_id.clone()));
        }
        headers
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            url: self.endpoint.url.clone(),
            headers: self.headers(),
            reconnect: self.endpoint.reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("voxlink-test-{}-{}", name, Uuid::new_v4()))
            .join("config.json")
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = ClientConfig::load(&temp_path("missing")).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let mut config = ClientConfig::default();
        config.endpoint.url = "wss://voice.example.com/v1/ws/".into();
        config.playback.max_queued_frames = Some(50);
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path("partial");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"endpoint":{"url":"ws://10.0.0.2/ws"},"playback":{"overflow":"drop_newest"}}"#)
            .unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.endpoint.url, "ws://10.0.0.2/ws");
        assert_eq!(config.endpoint.access_token, "test-token");
        assert_eq!(config.playback.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.audio, AudioConfig::default());
        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let path = temp_path("broken");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(ClientConfig::load(&path), Err(ConfigError::Parse(..))));
        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_client_id_generated_once() {
        let mut config = ClientConfig::default();
        assert!(config.ensure_client_id());
        let id = config.device.client_id.clone();
        assert!(!config.ensure_client_id());
        assert_eq!(config.device.client_id, id);
    }

    #[test]
    fn test_validate_rejects_bad_audio() {
        let mut config = ClientConfig::default();
        config.audio.sample_rate = 44100;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.audio.frame_duration_ms = 30;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.endpoint.url = "http://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_headers() {
        let mut config = ClientConfig::default();
        config.device.mac_address = "30:ed:a0:30:cd:b4".into();
        config.device.client_id = Some("client-1".into());
        let headers = config.headers();
        assert!(headers.contains(&("Authorization".into(), "Bearer test-token".into())));
        assert!(headers.contains(&("Protocol-Version".into(), "1".into())));
        assert!(headers.contains(&("Device-Id".into(), "30:ed:a0:30:cd:b4".into())));
        assert!(headers.contains(&("Client-Id".into(), "client-1".into())));
    }
}
