use super::registry::{Registry, RegistryInner};
use super::ActivationStatus;
use crate::errors::{RegistryError, Result};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

pub(crate) struct ProxyHandle {
    service_id: String,
    index: usize,
    registry: Weak<RegistryInner>,
}

impl ProxyHandle {
    pub(crate) fn new(service_id: String, index: usize, registry: Weak<RegistryInner>) -> Self {
        Self {
            service_id,
            index,
            registry,
        }
    }

    fn registry(&self, operation: &str) -> Result<Registry> {
        Registry::upgrade(&self.registry).ok_or_else(|| RegistryError::UseAfterShutdown {
            operation: format!("{} '{}'", operation, self.service_id),
        })
    }
}

/// 服务代理
///
/// 获取代理不会构建服务；第一次调用 [`get`](Self::get) 或 [`with`](Self::with) 时才按作用域实例化。
/// 同一个服务 id 的所有代理共享同一个内部句柄。
pub struct ServiceProxy<I: ?Sized> {
    handle: Arc<ProxyHandle>,
    _interface: PhantomData<fn() -> Arc<I>>,
}

impl<I: ?Sized + Send + Sync + 'static> ServiceProxy<I> {
    pub(crate) fn new(handle: Arc<ProxyHandle>) -> Self {
        Self {
            handle,
            _interface: PhantomData,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.handle.service_id
    }

    /// 实例化（如有需要）并返回服务
    pub fn get(&self) -> Result<Arc<I>> {
        let registry = self.handle.registry("invoke service")?;
        let instance = registry.realize(self.handle.index)?;
        instance.downcast::<I>().ok_or_else(|| RegistryError::ServiceTypeMismatch {
            service_id: self.handle.service_id.clone(),
            expected: std::any::type_name::<I>(),
            actual: instance.interface().name(),
        })
    }

    /// 通过代理调用服务
    pub fn with<R>(&self, f: impl FnOnce(&I) -> R) -> Result<R> {
        let service = self.get()?;
        Ok(f(&*service))
    }

    pub fn status(&self) -> Result<ActivationStatus> {
        self.handle
            .registry("query status of service")?
            .service_status(&self.handle.service_id)
    }

    /// 两个代理是否共享同一个句柄
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl<I: ?Sized> Clone for ServiceProxy<I> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _interface: PhantomData,
        }
    }
}

impl<I: ?Sized> fmt::Debug for ServiceProxy<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("service_id", &self.handle.service_id)
            .field("interface", &std::any::type_name::<I>())
            .finish()
    }
}
