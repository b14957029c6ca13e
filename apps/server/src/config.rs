//! Server configuration: defaults -> optional YAML file -> environment
//! variable overrides -> CLI flags, in that precedence order.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clipcaster_core::AppConfig;

/// Configuration as loaded from YAML, before CLI overrides are applied.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub inner: AppConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { inner: AppConfig::default() }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let inner: AppConfig = serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?;
            Self { inner }
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CLIPCASTER_OBS_HOST") {
            self.inner.obs.host = val;
        }
        if let Ok(val) = std::env::var("CLIPCASTER_OBS_PORT") {
            if let Ok(port) = val.parse() {
                self.inner.obs.port = port;
            }
        }
        if let Ok(val) = std::env::var("CLIPCASTER_OBS_PASSWORD") {
            self.inner.obs.password = Some(val);
        }
        if let Ok(val) = std::env::var("CLIPCASTER_PLAYER_URL") {
            self.inner.player.url = val;
        }
        if let Ok(val) = std::env::var("CLIPCASTER_TWITCH_CLIENT_ID") {
            self.inner.twitch.client_id = val;
        }
        if let Ok(val) = std::env::var("CLIPCASTER_TWITCH_CHANNEL") {
            self.inner.twitch.channel_login = val;
        }
        if let Ok(val) = std::env::var("CLIPCASTER_DATA_DIR") {
            self.inner.data_dir = Some(PathBuf::from(val));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.inner.obs.port, 4455);
    }
}
