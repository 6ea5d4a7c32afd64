//! 基础设施层
//!
//! 服务注册表的全部实现：
//! - 排序引擎与三种配置收集器
//! - 服务目录、激活/代理层
//! - 装饰器与通知管道
//! - 对象提供者

pub mod advice;
pub mod catalog;
pub mod configuration;
pub mod container;
pub mod instance;
pub mod module;
pub mod ordering;
pub mod provider;
pub mod symbols;

// 重新导出API
pub use advice::{AdvisedMethod, AdvisedMethodBuilder, DecoratorDef, MethodAdvice, PipelineBuilder};
pub use catalog::{ServiceCatalog, ServiceDef};
pub use configuration::{
    ContributionDef, ContributionKind, MappedConfiguration, OrderedConfiguration, UnorderedConfiguration,
};
pub use container::{
    ActivationStatus, Registry, RegistryBuilder, RegistryStartup, RegistryStats, ServiceActivity,
    ServiceLifecycle, ServiceProxy, ServiceResources, ServiceScope, StartupTask,
};
pub use instance::{ServiceInstance, TypeInfo};
pub use module::{Autobuild, Module, ModuleDefinitions};
pub use ordering::{Constraint, ConstraintKind, Orderable, Orderer};
pub use provider::{InjectionContext, MasterObjectProvider, ObjectProvider};
pub use symbols::{EnvSymbolProvider, MapSymbolProvider, SymbolProvider, SymbolSource};
