//! Configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.botcomm/` in production)
//! and deserializes it into [`BotcommConfig`]. Falls back to defaults when
//! the file is missing or malformed; bus settings are always clamped to
//! usable values.

use std::path::{Path, PathBuf};

use botcomm_types::config::BotcommConfig;

/// Path of the configuration file inside `data_dir`.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`BotcommConfig::default()`].
/// - If the file exists but cannot be read or parsed, logs a warning and
///   returns the default.
pub async fn load_config(data_dir: &Path) -> BotcommConfig {
    let path = config_path(data_dir);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return BotcommConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return BotcommConfig::default();
        }
    };

    let mut config = match toml::from_str::<BotcommConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            BotcommConfig::default()
        }
    };
    config.bus = config.bus.validated();
    config
}
