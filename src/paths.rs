//! Path resolution for fleetward
//!
//! # Environment Variables
//!
//! - `FLEETWARD_CONFIG_DIR` - Override config directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `FLEETWARD_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/fleetward` (if set)
//! 3. `~/.config/fleetward`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "FLEETWARD_CONFIG_DIR";

/// Get the fleetward config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("fleetward");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("fleetward");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_dir_env_override() {
        let original = env::var(ENV_CONFIG_DIR).ok();
        // SAFETY: no other test in this crate reads this variable
        unsafe { env::set_var(ENV_CONFIG_DIR, "/custom/fleetward") };
        let result = config_dir().unwrap();
        match original {
            // SAFETY: as above
            Some(v) => unsafe { env::set_var(ENV_CONFIG_DIR, v) },
            None => unsafe { env::remove_var(ENV_CONFIG_DIR) },
        }
        assert_eq!(result, PathBuf::from("/custom/fleetward"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/fleet/topology.toml"), home.join("fleet").join("topology.toml"));
    }

    #[test]
    fn test_expand_plain_path() {
        assert_eq!(expand("/etc/fleetward"), PathBuf::from("/etc/fleetward"));
    }
}
