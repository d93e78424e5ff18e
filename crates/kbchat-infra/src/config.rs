//! Client configuration loader for kbchat.
//!
//! Reads `config.toml` from the config directory (`~/.kbchat/` by default)
//! and deserializes it into [`ClientConfig`].

use std::path::{Path, PathBuf};

use kbchat_types::config::ClientConfig;
use kbchat_types::error::ConfigError;

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "KBCHAT_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Resolve the config directory.
///
/// Priority: `KBCHAT_CONFIG_DIR`, then `~/.kbchat`, then `./.kbchat` when no
/// home directory can be determined.
pub fn resolve_config_dir() -> PathBuf {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => return PathBuf::from(dir),
        _ => {}
    }
    dirs::home_dir()
        .map(|home| home.join(".kbchat"))
        .unwrap_or_else(|| PathBuf::from(".kbchat"))
}

/// Load client configuration from `{config_dir}/config.toml`.
///
/// - If the file does not exist, returns [`ClientConfig::default()`].
/// - If the file exists but cannot be read or parsed, logs a warning and
///   returns the default.
pub async fn load_client_config(config_dir: &Path) -> ClientConfig {
    match try_load_client_config(config_dir).await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            ClientConfig::default()
        }
    }
}

/// Strict variant of [`load_client_config`]: a missing file still yields
/// the defaults, but read and parse failures are returned.
pub async fn try_load_client_config(config_dir: &Path) -> Result<ClientConfig, ConfigError> {
    let config_path = config_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return Ok(ClientConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: config_path.display().to_string(),
                source,
            });
        }
    };

    toml::from_str::<ClientConfig>(&content).map_err(|err| ConfigError::Parse {
        path: config_path.display().to_string(),
        message: err.to_string(),
    })
}
