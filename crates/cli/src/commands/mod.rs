pub mod chat;
pub mod export;
pub mod health;
pub mod init;
pub mod serve;
pub mod sweep;

use meshbrain_config::AppConfig;
use std::path::{Path, PathBuf};

/// The config file a command reads: `--config` if given, else the default.
pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let path = config_path(path);
    AppConfig::load_from(&path).map_err(|e| format!("Failed to load config: {e}").into())
}
