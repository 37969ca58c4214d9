//! Filesystem adapters.
//!
//! Data directory resolution and the JSON file implementation of the
//! `StateStore` port.

pub mod state_file;

use std::path::{Path, PathBuf};

pub use state_file::JsonFileStateStore;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "BOTCOMM_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `BOTCOMM_DATA_DIR` environment variable
/// 2. `~/.botcomm` under the user's home directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".botcomm");
    }

    // Last resort: current directory
    PathBuf::from(".botcomm")
}

/// Directory holding the JSON state files: `{data_dir}/state/`.
pub fn state_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("state")
}
