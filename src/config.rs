//! On-disk configuration for the `switchyardd` binary.
//!
//! Directly adapted from `botster_hub_rs/src/config.rs`'s `Config` struct and
//! its `config_dir`/`load`/`save` methods — same shape, fields re-purposed
//! for the exchange domain (spec §6: "No CLI, no filesystem state... are
//! consumed by the core" — this config feeds the binary around the core,
//! never the broker/executor themselves).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Prefix this process uses for pids it registers under when none is
    /// given explicitly on the command line.
    pub bind_pid: String,
    /// Optional cap on a recipient's queue depth. `None` matches the
    /// source's unbounded queue (spec §9); set to opt into the bounded
    /// behaviour the REDESIGN FLAGS note scaffolds for.
    pub queue_bound: Option<usize>,
    /// How long a blocking `recv` without an explicit timeout should wait
    /// before giving a demo processor a chance to log a heartbeat.
    pub poll_interval_ms: u64,
    /// Default `submit` timeout used by the CLI when none is passed with
    /// `--timeout-ms`.
    pub request_timeout_ms: u64,
    pub server_url: String,
    pub api_key: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_pid: "switchyard".to_string(),
            queue_bound: None,
            poll_interval_ms: 5_000,
            request_timeout_ms: 10_000,
            server_url: "http://localhost:3000".to_string(),
            api_key: String::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::home_dir()
            .context("No home directory")?
            .join(".switchyard");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            let default = Self::default();
            default.save()?;
            Ok(default)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_pid, "switchyard");
        assert_eq!(config.poll_interval_ms, 5_000);
        assert_eq!(config.request_timeout_ms, 10_000);
        assert!(config.queue_bound.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.bind_pid, deserialized.bind_pid);
        assert_eq!(config.request_timeout_ms, deserialized.request_timeout_ms);
    }
}
