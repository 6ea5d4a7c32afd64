use crate::errors::Result;
use crate::infrastructure::instance::ServiceInstance;

/// 自定义作用域
///
/// 注册表把 `ServiceScope::Custom(name)` 的服务交给同名的生命周期实现，由它决定
/// 何时调用 `create` 以及是否缓存结果。`create` 每次调用都会执行工厂和装饰器。
pub trait ServiceLifecycle: Send + Sync {
    fn instance(
        &self,
        service_id: &str,
        create: &dyn Fn() -> Result<ServiceInstance>,
    ) -> Result<ServiceInstance>;
}

/// 每次访问都创建新实例
#[derive(Debug, Default, Clone, Copy)]
pub struct TransientLifecycle;

impl TransientLifecycle {
    pub const NAME: &'static str = "transient";
}

impl ServiceLifecycle for TransientLifecycle {
    fn instance(
        &self,
        service_id: &str,
        create: &dyn Fn() -> Result<ServiceInstance>,
    ) -> Result<ServiceInstance> {
        tracing::trace!(service_id = %service_id, "Creating transient instance");
        create()
    }
}
