//! Server configuration: bind address, cleaner cadence, initial node list.
//! Loaded from a TOML file via `clap` + `serde`, in place of the teacher's
//! proprietary section-config format (SPEC_FULL.md §6.4).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub path: String,
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Address the HTTP surface listens on, e.g. `0.0.0.0:8008`.
    pub listen: String,

    /// How often the background cleaner sweeps for abandoned uploads.
    #[serde(default = "default_cleaner_tick_secs")]
    pub cleaner_tick_secs: u64,

    /// A NEW record older than this is considered abandoned.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Data keepers brought up at startup, in join order.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

fn default_cleaner_tick_secs() -> u64 {
    60
}

fn default_stale_after_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&raw)
    }

    pub fn cleaner_tick(&self) -> Duration {
        Duration::from_secs(self.cleaner_tick_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config_with_defaults_filled_in() {
        let cfg = AppConfig::from_toml_str(
            r#"
            listen = "127.0.0.1:8008"

            [[nodes]]
            id = "a"
            path = "/var/lib/ringstore/a"
            capacity_bytes = 1073741824
            "#,
        )
        .unwrap();

        assert_eq!(cfg.listen, "127.0.0.1:8008");
        assert_eq!(cfg.cleaner_tick_secs, 60);
        assert_eq!(cfg.stale_after_secs, 3600);
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].id, "a");
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(AppConfig::from_toml_str("not valid toml ::").is_err());
    }
}
