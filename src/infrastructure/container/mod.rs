//! 服务注册表（容器）
//!
//! - [`RegistryBuilder`] 收集模块定义并构建不可变的目录
//! - [`Registry`] 负责按作用域延迟实例化、装饰、关闭
//! - [`ServiceProxy`] 是 `get_service` 返回的轻量句柄，首次使用时才真正构建服务

mod activation;
mod builder;
mod lifecycle;
mod per_thread;
mod proxy;
mod registry;
mod resources;
mod tracker;

pub use activation::ActivationStatus;
pub use builder::RegistryBuilder;
pub use lifecycle::{ServiceLifecycle, TransientLifecycle};
pub use proxy::ServiceProxy;
pub use registry::{Registry, RegistryStartup, RegistryStats, ServiceActivity, StartupTask};
pub use resources::ServiceResources;
pub use tracker::OperationTracker;

use std::fmt;

/// 服务作用域
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ServiceScope {
    /// 整个注册表生命周期内只有一个实例
    #[default]
    Singleton,
    /// 每个线程一个实例，`cleanup_thread()` 时丢弃
    PerThread,
    /// 由按名称注册的 [`ServiceLifecycle`] 管理（名称大小写不敏感）
    Custom(String),
}

impl ServiceScope {
    pub fn custom(name: impl Into<String>) -> Self {
        ServiceScope::Custom(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            ServiceScope::Singleton => "singleton",
            ServiceScope::PerThread => "perthread",
            ServiceScope::Custom(name) => name,
        }
    }
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
