//! 类型描述与类型擦除的服务实例

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// 服务接口（通常是 `dyn Trait`）或标记类型的运行时描述
#[derive(Clone, Copy)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
}

impl TypeInfo {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 去掉路径与 `dyn ` 前缀后的名称，用作默认服务 id
    ///
    /// `dyn my_app::services::Greeter + Send + Sync` -> `Greeter`
    pub fn simple_name(&self) -> &'static str {
        let name = self.name.trim_start_matches("dyn ");
        let name = name.split(" + ").next().unwrap_or(name);
        let name = name.split('<').next().unwrap_or(name);
        name.rsplit("::").next().unwrap_or(name)
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 类型擦除的共享实例，内部保存 `Arc<I>`
#[derive(Clone)]
pub struct ServiceInstance {
    interface: TypeInfo,
    value: Arc<dyn Any + Send + Sync>,
}

impl ServiceInstance {
    pub fn new<I: ?Sized + Send + Sync + 'static>(value: Arc<I>) -> Self {
        Self {
            interface: TypeInfo::of::<I>(),
            value: Arc::new(value),
        }
    }

    pub fn interface(&self) -> TypeInfo {
        self.interface
    }

    pub fn downcast<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<I>> {
        self.value.downcast_ref::<Arc<I>>().cloned()
    }

    /// 两个实例是否指向同一个对象
    pub fn ptr_eq(&self, other: &ServiceInstance) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}
