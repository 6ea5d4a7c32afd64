use crate::infrastructure::container::ServiceResources;
use crate::infrastructure::instance::{ServiceInstance, TypeInfo};
use std::fmt;
use std::sync::Arc;

type DecorateFn =
    Arc<dyn Fn(ServiceInstance, &ServiceResources) -> anyhow::Result<ServiceInstance> + Send + Sync>;

/// 装饰器定义
///
/// `target` 为服务 id 或通配模式（`*Dao`）。精确 id 的接口必须与装饰器一致；
/// 通配模式只作用于接口一致的服务。
#[derive(Clone)]
pub struct DecoratorDef {
    id: String,
    target: String,
    interface: TypeInfo,
    constraints: Vec<String>,
    decorate: DecorateFn,
}

impl DecoratorDef {
    pub fn new<I, F>(id: impl Into<String>, target: impl Into<String>, decorate: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<I>, &ServiceResources) -> anyhow::Result<Arc<I>> + Send + Sync + 'static,
    {
        let id = id.into();
        let decorator_id = id.clone();
        Self {
            id,
            target: target.into(),
            interface: TypeInfo::of::<I>(),
            constraints: Vec::new(),
            decorate: Arc::new(move |instance, resources| {
                let delegate = instance.downcast::<I>().ok_or_else(|| {
                    anyhow::anyhow!(
                        "decorator '{}' expected {} but received {}",
                        decorator_id,
                        std::any::type_name::<I>(),
                        instance.interface()
                    )
                })?;
                decorate(delegate, resources).map(ServiceInstance::new)
            }),
        }
    }

    /// 排序约束，例如 `"before:Cache"`、`"after:*"`
    pub fn constraints<S: Into<String>>(mut self, constraints: impl IntoIterator<Item = S>) -> Self {
        self.constraints.extend(constraints.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn interface(&self) -> TypeInfo {
        self.interface
    }

    pub fn constraint_strings(&self) -> &[String] {
        &self.constraints
    }

    pub(crate) fn apply(&self, delegate: ServiceInstance, resources: &ServiceResources) -> anyhow::Result<ServiceInstance> {
        (self.decorate)(delegate, resources)
    }
}

impl fmt::Debug for DecoratorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorDef")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("interface", &self.interface)
            .field("constraints", &self.constraints)
            .finish_non_exhaustive()
    }
}
