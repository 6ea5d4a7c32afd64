use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// 可共享的底层错误（失败的服务会把同一个错误交给之后的每个调用方）
pub type SharedCause = Arc<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// 容器错误
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Service id '{service_id}' is not defined by any module{}", available_hint(.available))]
    UnknownService {
        service_id: String,
        available: Vec<String>,
    },

    #[error(
        "Service interface {interface} is matched by {} services: {}. Use an explicit service id to disambiguate",
        .service_ids.len(),
        .service_ids.join(", ")
    )]
    AmbiguousService {
        interface: &'static str,
        service_ids: Vec<String>,
    },

    #[error("No service implements interface {interface}{}", markers_hint(.markers))]
    NoServiceForInterface {
        interface: &'static str,
        markers: Vec<&'static str>,
    },

    #[error("Ordering id '{id}' is already in use in {context}")]
    DuplicateOrderingId { id: String, context: String },

    #[error("Error building service '{service_id}': {cause}{}", trace_hint(.trace))]
    Construction {
        service_id: String,
        trace: Vec<String>,
        cause: SharedCause,
    },

    #[error(
        "Contribution '{contributor}' to service '{service_id}' is of type {actual}, expected {expected}; the contribution has been ignored"
    )]
    ConfigurationTypeMismatch {
        service_id: String,
        contributor: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("The registry has been shut down; '{operation}' is no longer available")]
    UseAfterShutdown { operation: String },

    #[error("Service '{service_id}' implements {actual}, not the requested {expected}")]
    ServiceTypeMismatch {
        service_id: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Service id '{service_id}' duplicates existing service '{existing}'")]
    DuplicateService { service_id: String, existing: String },

    #[error("Construction of service '{service_id}' is recursive: {}", .chain.join(" -> "))]
    RecursiveConstruction {
        service_id: String,
        chain: Vec<String>,
    },

    #[error("Contribution '{contributor}' to service '{service_id}' duplicates key '{key}'; use an override to replace it")]
    DuplicateMappedKey {
        service_id: String,
        key: String,
        contributor: String,
    },

    #[error("Override by '{contributor}' of '{key}' in service '{service_id}' does not match an existing contribution")]
    OverrideWithoutTarget {
        service_id: String,
        key: String,
        contributor: String,
    },

    #[error("Service '{service_id}' uses unknown scope '{scope}'")]
    UnknownScope { service_id: String, scope: String },

    #[error("Symbol '{symbol}' is not defined (while expanding '{input}')")]
    UnknownSymbol { symbol: String, input: String },

    #[error("Symbol expansion is recursive: {}", .chain.join(" -> "))]
    RecursiveSymbol { chain: Vec<String> },

    #[error(
        "Decorator '{decorator_id}' wraps {expected}, but service '{service_id}' implements {actual}"
    )]
    DecoratorInterfaceMismatch {
        decorator_id: String,
        service_id: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Module '{module}' depends on module '{dependency}', which is not part of the registry")]
    MissingModuleDependency { module: String, dependency: String },

    #[error("Invalid ordering constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(Arc<ConfigError>),
}

impl RegistryError {
    /// 包装工厂/装饰器/贡献回调的失败
    ///
    /// 依赖服务的构建错误向上传播时，操作轨迹只保留最深的一份，挂在最外层错误上。
    pub fn construction(service_id: impl Into<String>, cause: anyhow::Error, trace: Vec<String>) -> Self {
        let (cause, trace) = match cause.downcast::<RegistryError>() {
            Ok(RegistryError::Construction {
                service_id: inner_id,
                trace: inner_trace,
                cause: inner_cause,
            }) if inner_trace.len() > trace.len() => {
                let inner = RegistryError::Construction {
                    service_id: inner_id,
                    trace: Vec::new(),
                    cause: inner_cause,
                };
                (Arc::new(inner) as SharedCause, inner_trace)
            }
            Ok(other) => (Arc::new(other) as SharedCause, trace),
            Err(cause) => {
                let boxed: Box<dyn StdError + Send + Sync + 'static> = cause.into();
                (Arc::from(boxed), trace)
            }
        };

        RegistryError::Construction {
            service_id: service_id.into(),
            trace,
            cause,
        }
    }

    /// 构建失败的底层原因；已经包含在 `Display` 输出中，因此不作为 `source` 暴露
    pub fn cause(&self) -> Option<&SharedCause> {
        match self {
            RegistryError::Construction { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// 与错误相关的服务 id（如果有）
    pub fn service_id(&self) -> Option<&str> {
        match self {
            RegistryError::UnknownService { service_id, .. }
            | RegistryError::Construction { service_id, .. }
            | RegistryError::ConfigurationTypeMismatch { service_id, .. }
            | RegistryError::ServiceTypeMismatch { service_id, .. }
            | RegistryError::DuplicateService { service_id, .. }
            | RegistryError::RecursiveConstruction { service_id, .. }
            | RegistryError::DuplicateMappedKey { service_id, .. }
            | RegistryError::OverrideWithoutTarget { service_id, .. }
            | RegistryError::UnknownScope { service_id, .. }
            | RegistryError::DecoratorInterfaceMismatch { service_id, .. } => Some(service_id),
            _ => None,
        }
    }
}

impl From<ConfigError> for RegistryError {
    fn from(err: ConfigError) -> Self {
        RegistryError::Config(Arc::new(err))
    }
}

fn available_hint(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(". Available services: {}", available.join(", "))
    }
}

fn markers_hint(markers: &[&'static str]) -> String {
    if markers.is_empty() {
        String::new()
    } else {
        format!(" with markers [{}]", markers.join(", "))
    }
}

fn trace_hint(trace: &[String]) -> String {
    if trace.is_empty() {
        return String::new();
    }
    let mut hint = String::from("\nOperations trace:");
    for (depth, operation) in trace.iter().enumerate() {
        hint.push_str(&format!("\n[{:>2}] {}", depth + 1, operation));
    }
    hint
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from file '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Invalid value '{value}' for configuration field '{field}'")]
    InvalidField { field: String, value: String },
}
