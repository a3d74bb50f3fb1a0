use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Path error: {0}")]
    PathError(String),
}

/// Application configuration, stored as JSON in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the database and config live
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Bound on any single verification or store wait, in milliseconds
    pub io_timeout_ms: u64,

    /// Discard a stored identity at startup and force a fresh login.
    /// Carried over from the original app, where restart always lands
    /// on the login screen even with a valid identity on disk; left
    /// configurable until that is confirmed as intended behavior.
    pub force_reverify_on_start: bool,

    /// Allow an admin to grant the admin tier to themselves
    pub allow_admin_self_assign: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|dir| dir.join("agora"))
            .unwrap_or_else(|| PathBuf::from("data"));

        Self {
            data_dir,
            log_level: "info".to_string(),
            io_timeout_ms: 5_000,
            force_reverify_on_start: true,
            allow_admin_self_assign: false,
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config = serde_json::from_str(&contents)?;

        Ok(config)
    }

    /// Saves configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;

        let mut file = File::create(path)?;
        file.write_all(contents.as_bytes())?;

        Ok(())
    }

    /// Path of the identity database under the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("identity.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_flags() {
        let config = Config::default();

        assert!(config.force_reverify_on_start);
        assert!(!config.allow_admin_self_assign);
        assert!(config.io_timeout_ms > 0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.force_reverify_on_start = false;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();

        assert!(!loaded.force_reverify_on_start);
        assert_eq!(loaded.log_level, config.log_level);
    }
}
