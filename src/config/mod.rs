mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

use crate::transcode::CommandTemplate;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./liveforged.toml",
        "./config.toml",
        "~/.config/liveforged/config.toml",
        "/etc/liveforged/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let relay = &config.relay;
    if relay.segment_duration_secs <= 0.0 || !relay.segment_duration_secs.is_finite() {
        anyhow::bail!("relay.segment_duration_secs must be positive");
    }
    if !relay.window_duration_secs.is_finite()
        || relay.window_duration_secs < relay.segment_duration_secs
    {
        anyhow::bail!(
            "relay.window_duration_secs ({}) must be at least segment_duration_secs ({})",
            relay.window_duration_secs,
            relay.segment_duration_secs
        );
    }
    if relay.max_segments == Some(0) {
        anyhow::bail!("relay.max_segments must be at least 1");
    }
    if relay.channel_capacity == 0 {
        anyhow::bail!("relay.channel_capacity must be at least 1");
    }

    let supervisor = &config.supervisor;
    if supervisor.max_restart_attempts == 0 {
        anyhow::bail!("supervisor.max_restart_attempts must be at least 1");
    }
    if supervisor.restart_backoff_base_ms > supervisor.restart_backoff_max_ms {
        anyhow::bail!(
            "supervisor.restart_backoff_base_ms ({}) exceeds restart_backoff_max_ms ({})",
            supervisor.restart_backoff_base_ms,
            supervisor.restart_backoff_max_ms
        );
    }

    CommandTemplate::from_config(&config.transcode).context("Invalid [transcode] section")?;

    Ok(())
}
