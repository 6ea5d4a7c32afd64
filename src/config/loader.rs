use std::{collections::HashMap, env, fs, path::PathBuf};

use crate::errors::ConfigError;

use super::{PartialRegistryConfig, RegistryConfig, CONFIG_FILE_NAME, ENV_PREFIX, USER_CONFIG_PATH};

/// Configuration loader responsible for loading config from files and environment
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new config loader with default paths
    pub fn new() -> Self {
        Self { path: None }
    }

    /// Create a config loader reading a specific file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// 配置文件路径（默认路径做 `~` 展开）
    pub fn config_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => {
                let expanded = shellexpand::tilde(USER_CONFIG_PATH);
                PathBuf::from(expanded.as_ref()).join(CONFIG_FILE_NAME)
            }
        }
    }

    /// Load complete registry configuration
    pub fn load_config(&self) -> Result<RegistryConfig, ConfigError> {
        let config_path = self.config_path();
        let partial_config = self.load_partial_config(&config_path)?;
        let env_map = self.collect_env_vars();

        RegistryConfig::from_partial_and_env(partial_config, env_map)
    }

    /// Load partial configuration from file; a missing file is not an error
    fn load_partial_config(&self, config_path: &PathBuf) -> Result<Option<PartialRegistryConfig>, ConfigError> {
        if !config_path.exists() {
            tracing::debug!(path = ?config_path, "Registry config file not found, using defaults");
            return Ok(None);
        }

        let path_str = config_path.to_string_lossy().to_string();
        let content = fs::read_to_string(config_path)
            .map_err(|e| ConfigError::FileRead(path_str.clone(), e))?;

        let partial = toml::from_str::<PartialRegistryConfig>(&content)
            .map_err(|e| ConfigError::TomlParse(path_str, e))?;

        tracing::debug!(path = ?config_path, "Loaded registry config file");
        Ok(Some(partial))
    }

    /// Collect `IOC_*` environment variables
    fn collect_env_vars(&self) -> HashMap<String, String> {
        env::vars().filter(|(key, _)| key.starts_with(ENV_PREFIX)).collect()
    }
}
