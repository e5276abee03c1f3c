use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use voxlink::audio::{list_input_devices, list_output_devices};
use voxlink::{
    default_config_path, init_logging, provision, ClientConfig, Provisioning, VoiceClient,
};

/// Real-time voice chat client
#[derive(Parser, Debug)]
#[command(name = "voxlink")]
#[command(version)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Voice endpoint, ws:// or wss://
    #[arg(long, env = "VOXLINK_URL")]
    url: Option<String>,

    /// Access token sent as a bearer token
    #[arg(long, env = "VOXLINK_TOKEN")]
    token: Option<String>,

    /// Provisioning endpoint queried before connecting
    #[arg(long)]
    provision_url: Option<String>,

    /// Skip provisioning even if configured
    #[arg(long)]
    no_provision: bool,

    /// Reconnect after the connection drops
    #[arg(long)]
    reconnect: bool,

    /// Input device name
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name
    #[arg(long)]
    output_device: Option<String>,

    /// Print the audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    if args.list_devices {
        return print_devices();
    }

    let path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = ClientConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if config.ensure_client_id() {
        tracing::info!("Generated client id, saving to {}", path.display());
        if let Err(e) = config.save(&path) {
            tracing::warn!("Could not persist client id: {}", e);
        }
    }
    let provisioning = match provision_url(&config, &args) {
        Some(url) => match provision(&url, &config.device) {
            Ok(provisioning) => Some(provisioning),
            Err(e) => {
                tracing::warn!("Provisioning failed, using configured endpoint: {}", e);
                None
            }
        },
        None => {
            tracing::debug!("Provisioning skipped");
            None
        }
    };
    resolve(&mut config, provisioning.as_ref(), &args);

    config.validate().context("Invalid configuration")?;
    let client = VoiceClient::start(&config).context("Failed to start voice client")?;

    let running = client.running();
    std::thread::Builder::new()
        .name("voxlink-stdin".into())
        .spawn(move || {
            let mut line = String::new();
            // Enter or EOF both end the session
            let _ = std::io::stdin().lock().read_line(&mut line);
            running.stop();
        })
        .context("Failed to watch stdin")?;

    tracing::info!("Streaming, press Enter to stop");
    client.wait();
    client.shutdown();
    Ok(())
}

fn provision_url(config: &ClientConfig, args: &Args) -> Option<String> {
    if args.no_provision {
        return None;
    }
    args.provision_url
        .clone()
        .or_else(|| config.provisioning.url.clone())
}

/// Provisioned endpoint first, then the command line on top of it
fn resolve(config: &mut ClientConfig, provisioning: Option<&Provisioning>, args: &Args) {
    if let Some(provisioning) = provisioning {
        provisioning.apply(config);
    }
    apply_overrides(config, args);
}

fn apply_overrides(config: &mut ClientConfig, args: &Args) {
    if let Some(url) = &args.url {
        config.endpoint.url = url.clone();
    }
    if let Some(token) = &args.token {
        config.endpoint.access_token = token.clone();
    }
    if args.reconnect {
        config.endpoint.reconnect.enabled = true;
    }
    if let Some(name) = &args.input_device {
        config.audio.input_device = Some(name.clone());
    }
    if let Some(name) = &args.output_device {
        config.audio.output_device = Some(name.clone());
    }
}

fn print_devices() -> Result<()> {
    println!("Input devices:");
    for name in list_input_devices().context("Failed to list input devices")? {
        println!("  {}", name);
    }
    println!("Output devices:");
    for name in list_output_devices().context("Failed to list output devices")? {
        println!("  {}", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted() -> Provisioning {
        Provisioning::parse(r#"{"websocket":{"url":"ws://provisioned/ws/","token":"granted"}}"#)
            .unwrap()
    }

    #[test]
    fn test_command_line_wins_over_provisioning() {
        let args = Args::parse_from(["voxlink", "--url", "ws://explicit/ws/", "--token", "mine"]);
        let mut config = ClientConfig::default();
        resolve(&mut config, Some(&granted()), &args);
        assert_eq!(config.endpoint.url, "ws://explicit/ws/");
        assert_eq!(config.endpoint.access_token, "mine");
    }

    #[test]
    fn test_provisioning_fills_what_the_command_line_leaves() {
        let args = Args::parse_from(["voxlink", "--token", "mine", "--reconnect"]);
        let mut config = ClientConfig::default();
        resolve(&mut config, Some(&granted()), &args);
        assert_eq!(config.endpoint.url, "ws://provisioned/ws/");
        assert_eq!(config.endpoint.access_token, "mine");
        assert!(config.endpoint.reconnect.enabled);
    }

    #[test]
    fn test_provision_url_sources() {
        let mut config = ClientConfig::default();
        config.provisioning.url = Some("http://configured/ota/".into());

        let args = Args::parse_from(["voxlink"]);
        assert_eq!(provision_url(&config, &args).as_deref(), Some("http://configured/ota/"));

        let args = Args::parse_from(["voxlink", "--provision-url", "http://flag/ota/"]);
        assert_eq!(provision_url(&config, &args).as_deref(), Some("http://flag/ota/"));

        let args = Args::parse_from(["voxlink", "--no-provision"]);
        assert_eq!(provision_url(&config, &args), None);
    }
}
