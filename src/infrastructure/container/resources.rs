use super::proxy::ServiceProxy;
use super::registry::Registry;
use crate::errors::Result;
use crate::infrastructure::configuration::{self, ContributionKind};
use crate::infrastructure::provider::InjectionContext;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// 传给工厂、贡献和装饰器的上下文
///
/// 配置读取器在第一次调用时构建该服务的配置，之后返回缓存。
#[derive(Clone)]
pub struct ServiceResources {
    registry: Registry,
    index: usize,
    service_id: String,
}

impl ServiceResources {
    pub(crate) fn new(registry: Registry, index: usize, service_id: &str) -> Self {
        Self {
            registry,
            index,
            service_id: service_id.to_string(),
        }
    }

    /// 正在构建的服务 id
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn get_service<I>(&self, service_id: &str) -> Result<ServiceProxy<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.registry.get_service(service_id)
    }

    pub fn get_service_by_type<I>(&self) -> Result<ServiceProxy<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.registry.get_service_by_type()
    }

    pub fn get_object<I>(&self, context: &InjectionContext) -> Result<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.registry.get_object(context)
    }

    pub fn expand_symbols(&self, input: &str) -> Result<String> {
        self.registry.expand_symbols(input)
    }

    /// 该服务的无序配置
    pub fn unordered_configuration<T>(&self) -> Result<Arc<Vec<T>>>
    where
        T: Any + Send + Sync,
    {
        self.registry
            .configuration(self.index, ContributionKind::Unordered, |contributions| {
                configuration::build_unordered::<T>(self, contributions)
            })
    }

    /// 该服务的有序配置
    pub fn ordered_configuration<T>(&self) -> Result<Arc<Vec<T>>>
    where
        T: Any + Send + Sync,
    {
        self.registry
            .configuration(self.index, ContributionKind::Ordered, |contributions| {
                configuration::build_ordered::<T>(self, contributions)
            })
    }

    /// 该服务的映射配置
    pub fn mapped_configuration<K, V>(&self) -> Result<Arc<HashMap<K, V>>>
    where
        K: Any + Send + Sync + Eq + Hash + fmt::Debug,
        V: Any + Send + Sync,
    {
        self.registry
            .configuration(self.index, ContributionKind::Mapped, |contributions| {
                configuration::build_mapped::<K, V>(self, contributions)
            })
    }
}

impl fmt::Debug for ServiceResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceResources")
            .field("service_id", &self.service_id)
            .finish_non_exhaustive()
    }
}
