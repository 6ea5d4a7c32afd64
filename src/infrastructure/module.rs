//! 模块抽象层
//!
//! 模块把服务、贡献、装饰器定义写进 [`ModuleDefinitions`]，注册表构建时统一收集。

use super::advice::DecoratorDef;
use super::catalog::ServiceDef;
use super::configuration::ContributionDef;
use super::container::ServiceResources;

/// 模块接口
pub trait Module: Send + Sync {
    /// 模块名称
    fn name(&self) -> &str;

    /// 依赖的模块
    fn dependencies(&self) -> Vec<&str> {
        Vec::new()
    }

    /// 检查模块是否可用
    fn is_enabled(&self) -> bool {
        true
    }

    /// 声明模块提供的定义
    fn define(&self, definitions: &mut ModuleDefinitions);
}

/// 模块声明的定义集合
#[derive(Debug, Default)]
pub struct ModuleDefinitions {
    services: Vec<ServiceDef>,
    contributions: Vec<ContributionDef>,
    decorators: Vec<DecoratorDef>,
}

impl ModuleDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(&mut self, def: ServiceDef) -> &mut Self {
        self.services.push(def);
        self
    }

    pub fn contribute(&mut self, def: ContributionDef) -> &mut Self {
        self.contributions.push(def);
        self
    }

    pub fn decorate(&mut self, def: DecoratorDef) -> &mut Self {
        self.decorators.push(def);
        self
    }

    pub fn services(&self) -> &[ServiceDef] {
        &self.services
    }

    pub fn contributions(&self) -> &[ContributionDef] {
        &self.contributions
    }

    pub fn decorators(&self) -> &[DecoratorDef] {
        &self.decorators
    }

    pub(crate) fn into_parts(self) -> (Vec<ServiceDef>, Vec<ContributionDef>, Vec<DecoratorDef>) {
        (self.services, self.contributions, self.decorators)
    }
}

/// 可由注册表自动构建的实现类型，配合 [`bind!`](crate::bind) 使用
pub trait Autobuild: Sized {
    fn autobuild(resources: &ServiceResources) -> anyhow::Result<Self>;
}

/// 把接口绑定到实现，生成 [`ServiceDef`]
///
/// ```ignore
/// definitions.service(bind!(dyn Greeter => EnglishGreeter));
/// definitions.service(bind!(dyn Greeter => FrenchGreeter, "FrenchGreeter").marker::<French>());
/// ```
///
/// 未指定 id 时使用接口的简单名称（`Greeter`）。
#[macro_export]
macro_rules! bind {
    ($iface:ty => $impl:ty) => {
        $crate::bind!(
            $iface => $impl,
            $crate::infrastructure::TypeInfo::of::<$iface>().simple_name()
        )
    };
    ($iface:ty => $impl:ty, $id:expr) => {
        $crate::infrastructure::ServiceDef::new::<$iface, _>($id, |resources| {
            let service: ::std::sync::Arc<$iface> = ::std::sync::Arc::new(
                <$impl as $crate::infrastructure::Autobuild>::autobuild(resources)?,
            );
            Ok(service)
        })
    };
}
