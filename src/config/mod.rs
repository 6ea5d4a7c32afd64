pub mod loader;

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

pub use loader::ConfigLoader;

use crate::errors::ConfigError;

/// 配置文件默认位置
pub const USER_CONFIG_PATH: &str = "~/.config/ioc-registry";
pub const CONFIG_FILE_NAME: &str = "registry.toml";

/// 环境变量前缀
pub const ENV_PREFIX: &str = "IOC_";
pub const ENV_SYMBOL_PREFIX: &str = "IOC_SYMBOL_";

/// 日志相关设置（`[logging]` 段）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
    pub show_thread_ids: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            show_thread_ids: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
    pub show_thread_ids: Option<bool>,
}

/// 注册表配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// 启动时是否实例化标记为 eager 的服务
    pub eager_load: bool,
    pub logging: LoggingSettings,
    /// 符号表，优先于环境变量
    pub symbols: BTreeMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            eager_load: true,
            logging: LoggingSettings::default(),
            symbols: BTreeMap::new(),
        }
    }
}

/// Partial Registry Configuration for loading from files
#[derive(Debug, Default, Deserialize)]
pub struct PartialRegistryConfig {
    pub eager_load: Option<bool>,
    pub logging: Option<PartialLoggingSettings>,
    pub symbols: Option<BTreeMap<String, String>>,
}

impl RegistryConfig {
    /// 合并文件内容与环境变量，环境变量优先
    pub fn from_partial_and_env(
        partial: Option<PartialRegistryConfig>,
        env_map: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let partial = partial.unwrap_or_default();
        let defaults = RegistryConfig::default();

        let mut eager_load = partial.eager_load.unwrap_or(defaults.eager_load);
        if let Some(raw) = env_map.get("IOC_EAGER_LOAD") {
            eager_load = parse_bool("IOC_EAGER_LOAD", raw)?;
        }

        let file_logging = partial.logging.unwrap_or_default();
        let logging = LoggingSettings {
            level: env_map
                .get("IOC_LOG_LEVEL")
                .cloned()
                .or(file_logging.level)
                .unwrap_or(defaults.logging.level),
            format: env_map
                .get("IOC_LOG_FORMAT")
                .cloned()
                .or(file_logging.format)
                .unwrap_or(defaults.logging.format),
            show_thread_ids: file_logging
                .show_thread_ids
                .unwrap_or(defaults.logging.show_thread_ids),
        };

        let mut symbols = partial.symbols.unwrap_or_default();
        for (key, value) in &env_map {
            if let Some(name) = key.strip_prefix(ENV_SYMBOL_PREFIX) {
                if name.is_empty() {
                    continue;
                }
                symbols.insert(symbol_name_from_env(name), value.clone());
            }
        }

        Ok(RegistryConfig {
            eager_load,
            logging,
            symbols,
        })
    }
}

/// `IOC_SYMBOL_APP_NAME` -> `app.name`
fn symbol_name_from_env(name: &str) -> String {
    name.to_ascii_lowercase().replace('_', ".")
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidField {
            field: field.to_string(),
            value: raw.to_string(),
        }),
    }
}
