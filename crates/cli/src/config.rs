//! Configuration management for the CLI

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "HMCTL_CONFIG";

/// CLI configuration, stored at `~/.config/hmctl/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Monitor topology used when `--definition` is omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_path: Option<PathBuf>,
    /// State snapshot read by `state` commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_config_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_format: Option<String>,
}

impl Config {
    pub const KEYS: [&'static str; 5] = [
        "definition_path",
        "state_path",
        "monitor_config_path",
        "cluster_id",
        "default_format",
    ];

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        serde_json::from_str(&content).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content).context("Failed to write config file")?;

        Ok(path)
    }

    /// Set one key; an empty value clears it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = (!value.is_empty()).then(|| value.to_string());
        match key {
            "definition_path" => self.definition_path = value.map(PathBuf::from),
            "state_path" => self.state_path = value.map(PathBuf::from),
            "monitor_config_path" => self.monitor_config_path = value.map(PathBuf::from),
            "cluster_id" => self.cluster_id = value,
            "default_format" => self.default_format = value,
            _ => bail!("Unknown config key '{}', expected one of: {}", key, Self::KEYS.join(", ")),
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("hmctl").join("config.json"))
    }
}

/// An explicit argument wins over the configured default
pub fn resolve_path(arg: Option<PathBuf>, configured: Option<&PathBuf>, what: &str) -> Result<PathBuf> {
    arg.or_else(|| configured.cloned())
        .with_context(|| format!("No {} given; pass it as an argument or set it with `hmctl config set`", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear_keys() {
        let mut config = Config::default();
        config.set("cluster_id", "c1").unwrap();
        config.set("state_path", "/tmp/state.json").unwrap();
        assert_eq!(config.cluster_id.as_deref(), Some("c1"));
        assert_eq!(config.state_path, Some(PathBuf::from("/tmp/state.json")));

        config.set("cluster_id", "").unwrap();
        assert!(config.cluster_id.is_none());
        assert!(config.set("bogus", "x").is_err());
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_resolve_path_prefers_argument() {
        let configured = PathBuf::from("/configured");
        let resolved =
            resolve_path(Some(PathBuf::from("/arg")), Some(&configured), "state file").unwrap();
        assert_eq!(resolved, PathBuf::from("/arg"));
        assert_eq!(resolve_path(None, Some(&configured), "state file").unwrap(), configured);
        assert!(resolve_path(None, None, "state file").is_err());
    }
}
