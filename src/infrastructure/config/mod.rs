//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::application::errors::ConfigError;

/// Bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bot: BotConfig,
    pub extensions: ExtensionsConfig,
    pub adapters: AdaptersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
}

/// Extension runtime settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionsConfig {
    /// Directory watched for extension bundles
    pub directory: PathBuf,
    /// Scratch area for staged bundle copies
    pub staging_directory: PathBuf,
    /// Seconds between watcher sweeps
    pub sweep_interval_secs: u64,
    /// Whether the watcher runs at all
    pub auto_load: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdaptersConfig {
    pub console: Option<ConsoleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConsoleConfig {
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                name: "ember-bot".to_string(),
                prefix: "/".to_string(),
            },
            extensions: ExtensionsConfig {
                directory: PathBuf::from("./extensions"),
                staging_directory: PathBuf::from("./extensions/.staging"),
                sweep_interval_secs: 10,
                auto_load: true,
            },
            adapters: AdaptersConfig {
                console: Some(ConsoleConfig { enabled: true }),
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build a config from environment overrides on top of the defaults.
    pub fn load_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("EMBER_BOT_EXTENSIONS_DIR") {
            config.extensions.staging_directory = PathBuf::from(&dir).join(".staging");
            config.extensions.directory = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("EMBER_BOT_PREFIX") {
            config.bot.prefix = prefix;
        }
        config
    }

    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
