//! 对象提供者
//!
//! 注入请求（目标类型 + 上下文）依次交给有序的 [`ObjectProvider`] 链，第一个给出值的
//! 提供者获胜。内置提供者按服务 id、标记、符号表达式解析；都不匹配时按接口查找唯一服务。

use super::container::Registry;
use super::instance::{ServiceInstance, TypeInfo};
use crate::errors::{RegistryError, Result};
use std::fmt;
use std::sync::Arc;

/// 注入上下文
#[derive(Debug, Clone, Default)]
pub struct InjectionContext {
    service_id: Option<String>,
    markers: Vec<TypeInfo>,
    symbol: Option<String>,
}

impl InjectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定服务 id
    pub fn service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    /// 要求服务带有标记 `M`
    pub fn marker<M: ?Sized + 'static>(mut self) -> Self {
        self.markers.push(TypeInfo::of::<M>());
        self
    }

    /// 符号表达式，例如 `"${app.name}"`
    pub fn symbol(mut self, expression: impl Into<String>) -> Self {
        self.symbol = Some(expression.into());
        self
    }

    pub fn requested_service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    pub fn markers(&self) -> &[TypeInfo] {
        &self.markers
    }

    pub fn symbol_expression(&self) -> Option<&str> {
        self.symbol.as_deref()
    }
}

/// 对象提供者
pub trait ObjectProvider: Send + Sync {
    /// 无法处理该请求时返回 `Ok(None)`
    fn provide(
        &self,
        target: TypeInfo,
        context: &InjectionContext,
        registry: &Registry,
    ) -> Result<Option<ServiceInstance>>;
}

fn check_interface(service_id: &str, instance: ServiceInstance, target: TypeInfo) -> Result<ServiceInstance> {
    if instance.interface() != target {
        return Err(RegistryError::ServiceTypeMismatch {
            service_id: service_id.to_string(),
            expected: target.name(),
            actual: instance.interface().name(),
        });
    }
    Ok(instance)
}

/// 上下文指定了服务 id 时按 id 解析
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceIdObjectProvider;

impl ObjectProvider for ServiceIdObjectProvider {
    fn provide(
        &self,
        target: TypeInfo,
        context: &InjectionContext,
        registry: &Registry,
    ) -> Result<Option<ServiceInstance>> {
        let Some(service_id) = context.requested_service_id() else {
            return Ok(None);
        };
        let instance = registry.service_instance(service_id)?;
        check_interface(service_id, instance, target).map(Some)
    }
}

/// 上下文带有标记时，按接口与标记集合查找唯一服务
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerObjectProvider;

impl ObjectProvider for MarkerObjectProvider {
    fn provide(
        &self,
        target: TypeInfo,
        context: &InjectionContext,
        registry: &Registry,
    ) -> Result<Option<ServiceInstance>> {
        if context.markers().is_empty() {
            return Ok(None);
        }
        match registry
            .catalog()
            .find_by_interface_and_markers(target, context.markers())
        {
            Ok(def) => registry.service_instance(def.service_id()).map(Some),
            Err(RegistryError::NoServiceForInterface { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// 目标为 `String` 且上下文带符号表达式时返回展开后的字符串
#[derive(Debug, Default, Clone, Copy)]
pub struct SymbolObjectProvider;

impl ObjectProvider for SymbolObjectProvider {
    fn provide(
        &self,
        target: TypeInfo,
        context: &InjectionContext,
        registry: &Registry,
    ) -> Result<Option<ServiceInstance>> {
        let Some(expression) = context.symbol_expression() else {
            return Ok(None);
        };
        if target != TypeInfo::of::<String>() {
            return Ok(None);
        }
        let value = registry.expand_symbols(expression)?;
        Ok(Some(ServiceInstance::new(Arc::new(value))))
    }
}

/// 内置服务 `MasterObjectProvider`，持有排好序的提供者链
pub struct MasterObjectProvider {
    providers: Arc<Vec<Arc<dyn ObjectProvider>>>,
}

impl MasterObjectProvider {
    pub(crate) fn new(providers: Arc<Vec<Arc<dyn ObjectProvider>>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// 依次询问提供者；`required` 时回退到按接口查找，否则返回 `None`
    pub fn provide(
        &self,
        target: TypeInfo,
        context: &InjectionContext,
        registry: &Registry,
        required: bool,
    ) -> Result<Option<ServiceInstance>> {
        for provider in self.providers.iter() {
            if let Some(instance) = provider.provide(target, context, registry)? {
                return Ok(Some(instance));
            }
        }

        if !required {
            return Ok(None);
        }

        tracing::trace!(target_type = %target, "No object provider matched; falling back to interface lookup");
        let def = registry
            .catalog()
            .find_by_interface_and_markers(target, context.markers())?;
        registry.service_instance(def.service_id()).map(Some)
    }
}

impl fmt::Debug for MasterObjectProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterObjectProvider")
            .field("providers", &self.providers.len())
            .finish()
    }
}
