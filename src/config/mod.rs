// Configuration for the compress tools
// Handles loading/saving settings, with sensible defaults when config is missing

use crate::stream::{StreamOptions, WaitPolicy};
use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub plugins: PluginConfig,
    pub stream: StreamSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub max_poll_wait_ms: u64,
    /// Ignore `max_poll_wait_ms` and wait for the driver however long it takes
    pub wait_forever: bool,
    pub nonblocking: bool,
    pub validate_caps: bool,
    pub wait_policy: WaitPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Daily log files go here when set
    pub directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins: PluginConfig::default(),
            stream: StreamSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(crate::DEFAULT_PLUGIN_DIR),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_poll_wait_ms: crate::stream::DEFAULT_MAX_POLL_WAIT.as_millis() as u64,
            wait_forever: false,
            nonblocking: false,
            validate_caps: false,
            wait_policy: WaitPolicy::Lenient,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: Some(PathBuf::from("logs")),
        }
    }
}

impl Config {
    /// Load from the user config dir, writing the defaults out on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Plugin directory with the environment override applied
    pub fn plugin_dir(&self) -> PathBuf {
        crate::resolve_plugin_dir(Some(&self.plugins.dir))
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions::from(&self.stream)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("compress-offload");

        Ok(config_dir.join("config.toml"))
    }
}

impl From<&StreamSettings> for StreamOptions {
    fn from(settings: &StreamSettings) -> Self {
        let max_poll_wait = if settings.wait_forever {
            None
        } else {
            Some(Duration::from_millis(settings.max_poll_wait_ms))
        };

        Self {
            max_poll_wait,
            nonblocking: settings.nonblocking,
            validate_caps: settings.validate_caps,
            wait_policy: settings.wait_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_stream_defaults() {
        let config = Config::default();
        assert_eq!(config.stream_options(), StreamOptions::default());
        assert_eq!(config.plugins.dir, PathBuf::from("/usr/lib/compress-offload/"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.stream.wait_policy = WaitPolicy::Strict;
        config.stream.max_poll_wait_ms = 500;
        config.plugins.dir = PathBuf::from("/opt/plugins");
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[stream]\nwait_forever = true\nwait_policy = \"strict\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        let options = config.stream_options();
        assert_eq!(options.max_poll_wait, None);
        assert_eq!(options.wait_policy, WaitPolicy::Strict);
        assert!(!options.validate_caps);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[stream\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
