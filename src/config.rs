//! User configuration: ~/.config/fleetward/config.toml
//!
//! Every field has a default and a missing file is not an error. Command
//! line flags override file values in [`Settings::resolve`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Topology file used when --topology is not given
    pub topology: String,
    /// Hosts run concurrently
    pub jobs: usize,
    /// Upper bound for a single command
    pub unit_timeout_secs: u64,
    pub ssh: SshConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            topology: "~/.config/fleetward/topology.toml".to_string(),
            jobs: 4,
            unit_timeout_secs: 300,
            ssh: SshConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote user; the ssh client's own default when unset
    pub user: Option<String>,
    pub port: u16,
    pub connect_timeout_secs: u64,
    /// Extra `-o` options passed verbatim
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: 22,
            connect_timeout_secs: 10,
            options: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from the config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = paths::config_dir()?.join("config.toml");
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))
    }
}

/// Effective settings after applying command line overrides
#[derive(Debug, Clone)]
pub struct Settings {
    pub topology: PathBuf,
    pub jobs: usize,
    pub unit_timeout: Duration,
    pub ssh: SshConfig,
    pub local: bool,
}

impl Settings {
    pub fn resolve(file: &AppConfig, cli: &Cli) -> Self {
        Self {
            topology: cli
                .topology
                .clone()
                .unwrap_or_else(|| paths::expand(&file.topology)),
            jobs: cli.jobs.unwrap_or(file.jobs).max(1),
            unit_timeout: Duration::from_secs(cli.timeout.unwrap_or(file.unit_timeout_secs)),
            ssh: file.ssh.clone(),
            local: cli.local,
        }
    }
}
