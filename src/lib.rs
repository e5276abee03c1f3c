pub mod audio;
pub mod client;
pub mod config;
pub mod pipeline;
pub mod provision;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use audio::{AudioFrame, AudioParams, PlaybackQueue};
pub use client::{ClientError, ClientReport, VoiceClient};
pub use config::{default_config_path, ClientConfig, ConfigError};
pub use provision::{provision, ProvisionError, Provisioning};
pub use session::{ControlMessage, ListenMode, RunningFlag, SessionState, SessionView};
pub use transport::{Frame, FrameSink, ReconnectPolicy, TransportEvent};

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("voxlink={}", default_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}
