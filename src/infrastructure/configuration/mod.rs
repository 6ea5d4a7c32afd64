//! 配置收集器
//!
//! 模块通过贡献（contribution）向其他服务的配置添加值。三种收集器：
//! - [`UnorderedConfiguration`]：无序集合
//! - [`OrderedConfiguration`]：按 id 与 `before:`/`after:` 约束排序的列表
//! - [`MappedConfiguration`]：键值表，替换已有键必须显式 override
//!
//! 元素类型在第一次读取时由使用方确定，类型不符的单个贡献会被忽略并记录警告，
//! 不会让整份配置构建失败。

mod mapped;
mod ordered;
mod unordered;

pub use mapped::MappedConfiguration;
pub use ordered::OrderedConfiguration;
pub use unordered::UnorderedConfiguration;

use super::container::{OperationTracker, ServiceResources};
use crate::errors::{RegistryError, Result};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// 贡献类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContributionKind {
    Unordered,
    Ordered,
    Mapped,
}

impl fmt::Display for ContributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContributionKind::Unordered => "unordered",
            ContributionKind::Ordered => "ordered",
            ContributionKind::Mapped => "mapped",
        };
        f.write_str(name)
    }
}

type UnorderedContributor =
    dyn Fn(&mut UnorderedConfiguration, &ServiceResources) -> anyhow::Result<()> + Send + Sync;
type OrderedContributor =
    dyn Fn(&mut OrderedConfiguration, &ServiceResources) -> anyhow::Result<()> + Send + Sync;
type MappedContributor =
    dyn Fn(&mut MappedConfiguration, &ServiceResources) -> anyhow::Result<()> + Send + Sync;

#[derive(Clone)]
enum Contributor {
    Unordered(Arc<UnorderedContributor>),
    Ordered(Arc<OrderedContributor>),
    Mapped(Arc<MappedContributor>),
}

/// 贡献定义：`id` 标识贡献者（映射配置的 override 排序也使用它），`target` 为目标服务 id
#[derive(Clone)]
pub struct ContributionDef {
    id: String,
    target: String,
    contributor: Contributor,
}

impl ContributionDef {
    pub fn unordered<F>(id: impl Into<String>, target: impl Into<String>, contribute: F) -> Self
    where
        F: Fn(&mut UnorderedConfiguration, &ServiceResources) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            target: target.into(),
            contributor: Contributor::Unordered(Arc::new(contribute)),
        }
    }

    pub fn ordered<F>(id: impl Into<String>, target: impl Into<String>, contribute: F) -> Self
    where
        F: Fn(&mut OrderedConfiguration, &ServiceResources) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            target: target.into(),
            contributor: Contributor::Ordered(Arc::new(contribute)),
        }
    }

    pub fn mapped<F>(id: impl Into<String>, target: impl Into<String>, contribute: F) -> Self
    where
        F: Fn(&mut MappedConfiguration, &ServiceResources) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            target: target.into(),
            contributor: Contributor::Mapped(Arc::new(contribute)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn kind(&self) -> ContributionKind {
        match self.contributor {
            Contributor::Unordered(_) => ContributionKind::Unordered,
            Contributor::Ordered(_) => ContributionKind::Ordered,
            Contributor::Mapped(_) => ContributionKind::Mapped,
        }
    }

    pub(crate) fn with_target(mut self, target: String) -> Self {
        self.target = target;
        self
    }
}

impl fmt::Debug for ContributionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContributionDef")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("kind", &self.kind())
            .finish()
    }
}

fn warn_kind_mismatch(resources: &ServiceResources, def: &ContributionDef, expected: ContributionKind) {
    tracing::warn!(
        service_id = %resources.service_id(),
        contributor = %def.id,
        "Contribution '{}' is a {} contribution but service '{}' reads a {} configuration; it has been ignored",
        def.id,
        def.kind(),
        resources.service_id(),
        expected,
    );
}

/// 记录被忽略的类型不符贡献
pub(crate) fn warn_type_mismatch(service_id: &str, contributor: &str, expected: &'static str, actual: &'static str) {
    let mismatch = RegistryError::ConfigurationTypeMismatch {
        service_id: service_id.to_string(),
        contributor: contributor.to_string(),
        expected,
        actual,
    };
    tracing::warn!(service_id = %service_id, contributor = %contributor, "{}", mismatch);
}

fn invoke(
    resources: &ServiceResources,
    def: &ContributionDef,
    contribute: impl FnOnce() -> anyhow::Result<()>,
) -> Result<()> {
    let description = format!(
        "Invoking contribution '{}' to service '{}'",
        def.id,
        resources.service_id()
    );
    OperationTracker::run(description, || {
        contribute().map_err(|err| {
            RegistryError::construction(resources.service_id(), err, OperationTracker::snapshot())
        })
    })
}

pub(crate) fn build_unordered<T: Any + Send + Sync>(
    resources: &ServiceResources,
    contributions: &[Arc<ContributionDef>],
) -> Result<Vec<T>> {
    let mut configuration = UnorderedConfiguration::new::<T>(resources.service_id());

    for def in contributions {
        match &def.contributor {
            Contributor::Unordered(contribute) => {
                configuration.set_contributor(&def.id);
                invoke(resources, def, || contribute(&mut configuration, resources))?;
            }
            _ => warn_kind_mismatch(resources, def, ContributionKind::Unordered),
        }
    }

    Ok(configuration.into_values())
}

pub(crate) fn build_ordered<T: Any + Send + Sync>(
    resources: &ServiceResources,
    contributions: &[Arc<ContributionDef>],
) -> Result<Vec<T>> {
    let mut configuration =
        OrderedConfiguration::new::<T>(resources.service_id(), resources.registry().symbol_source());

    for def in contributions {
        match &def.contributor {
            Contributor::Ordered(contribute) => {
                configuration.set_contributor(&def.id);
                invoke(resources, def, || contribute(&mut configuration, resources))?;
            }
            _ => warn_kind_mismatch(resources, def, ContributionKind::Ordered),
        }
    }

    configuration.into_ordered()
}

pub(crate) fn build_mapped<K, V>(
    resources: &ServiceResources,
    contributions: &[Arc<ContributionDef>],
) -> Result<HashMap<K, V>>
where
    K: Any + Send + Sync + Eq + Hash + fmt::Debug,
    V: Any + Send + Sync,
{
    let mut configuration = MappedConfiguration::new::<K, V>(resources.service_id());

    for def in contributions {
        match &def.contributor {
            Contributor::Mapped(contribute) => {
                configuration.set_contributor(&def.id);
                invoke(resources, def, || contribute(&mut configuration, resources))?;
            }
            _ => warn_kind_mismatch(resources, def, ContributionKind::Mapped),
        }
    }

    configuration.into_map()
}
