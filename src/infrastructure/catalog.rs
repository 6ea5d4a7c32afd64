//! 服务目录
//!
//! 每个服务 id 对应一个不可变的 [`ServiceDef`]。目录在注册表构建阶段单线程写入，
//! 构建完成后只读，可以不加锁地并发查询。

use super::container::{ServiceResources, ServiceScope};
use super::instance::{ServiceInstance, TypeInfo};
use crate::errors::{RegistryError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub(crate) type ServiceFactory =
    Arc<dyn Fn(&ServiceResources) -> anyhow::Result<ServiceInstance> + Send + Sync>;

/// 服务定义
#[derive(Clone)]
pub struct ServiceDef {
    service_id: String,
    interface: TypeInfo,
    scope: ServiceScope,
    eager_load: bool,
    markers: Vec<TypeInfo>,
    factory: ServiceFactory,
}

impl ServiceDef {
    /// 以工厂闭包定义服务，`I` 通常是 `dyn Trait`
    pub fn new<I, F>(service_id: impl Into<String>, factory: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceResources) -> anyhow::Result<Arc<I>> + Send + Sync + 'static,
    {
        Self {
            service_id: service_id.into(),
            interface: TypeInfo::of::<I>(),
            scope: ServiceScope::Singleton,
            eager_load: false,
            markers: Vec::new(),
            factory: Arc::new(move |resources| factory(resources).map(ServiceInstance::new)),
        }
    }

    pub fn scope(mut self, scope: ServiceScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn eager_load(mut self, eager_load: bool) -> Self {
        self.eager_load = eager_load;
        self
    }

    pub fn marker<M: ?Sized + 'static>(mut self) -> Self {
        let marker = TypeInfo::of::<M>();
        if !self.markers.contains(&marker) {
            self.markers.push(marker);
        }
        self
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn interface(&self) -> TypeInfo {
        self.interface
    }

    pub fn service_scope(&self) -> &ServiceScope {
        &self.scope
    }

    pub fn is_eager_load(&self) -> bool {
        self.eager_load
    }

    pub fn markers(&self) -> &[TypeInfo] {
        &self.markers
    }

    pub fn has_markers(&self, markers: &[TypeInfo]) -> bool {
        markers.iter().all(|m| self.markers.contains(m))
    }

    pub(crate) fn factory(&self) -> &ServiceFactory {
        &self.factory
    }

    pub(crate) fn with_service_id(mut self, service_id: String) -> Self {
        self.service_id = service_id;
        self
    }
}

impl fmt::Debug for ServiceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDef")
            .field("service_id", &self.service_id)
            .field("interface", &self.interface)
            .field("scope", &self.scope)
            .field("eager_load", &self.eager_load)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}

/// 服务目录，保持注册顺序
#[derive(Debug, Default)]
pub struct ServiceCatalog {
    defs: Vec<Arc<ServiceDef>>,
    index: HashMap<String, usize>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册服务；id 大小写不敏感，重复即报错
    pub fn register(&mut self, def: ServiceDef) -> Result<usize> {
        let key = def.service_id.to_lowercase();
        if let Some(&existing) = self.index.get(&key) {
            return Err(RegistryError::DuplicateService {
                service_id: def.service_id,
                existing: self.defs[existing].service_id.clone(),
            });
        }

        let position = self.defs.len();
        tracing::debug!(
            service_id = %def.service_id,
            interface = %def.interface,
            scope = %def.scope,
            "Registered service definition"
        );
        self.index.insert(key, position);
        self.defs.push(Arc::new(def));
        Ok(position)
    }

    pub fn lookup(&self, service_id: &str) -> Result<&Arc<ServiceDef>> {
        self.position(service_id)
            .map(|pos| &self.defs[pos])
            .ok_or_else(|| RegistryError::UnknownService {
                service_id: service_id.to_string(),
                available: self.service_ids(),
            })
    }

    pub fn get(&self, service_id: &str) -> Option<&Arc<ServiceDef>> {
        self.position(service_id).map(|pos| &self.defs[pos])
    }

    pub fn position(&self, service_id: &str) -> Option<usize> {
        self.index.get(&service_id.to_lowercase()).copied()
    }

    pub(crate) fn at(&self, position: usize) -> &Arc<ServiceDef> {
        &self.defs[position]
    }

    /// 按接口查找唯一服务；多个匹配时报歧义而不是随意挑一个
    pub fn find_by_interface(&self, interface: TypeInfo) -> Result<&Arc<ServiceDef>> {
        self.find_by_interface_and_markers(interface, &[])
    }

    pub fn find_by_interface_and_markers(
        &self,
        interface: TypeInfo,
        markers: &[TypeInfo],
    ) -> Result<&Arc<ServiceDef>> {
        let matches: Vec<&Arc<ServiceDef>> = self
            .defs
            .iter()
            .filter(|def| def.interface == interface && def.has_markers(markers))
            .collect();

        match matches.as_slice() {
            [single] => Ok(*single),
            [] => Err(RegistryError::NoServiceForInterface {
                interface: interface.name(),
                markers: markers.iter().map(|m| m.name()).collect(),
            }),
            many => Err(RegistryError::AmbiguousService {
                interface: interface.name(),
                service_ids: many.iter().map(|def| def.service_id.clone()).collect(),
            }),
        }
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.defs.iter().map(|def| def.service_id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceDef>> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
