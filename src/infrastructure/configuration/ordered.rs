use super::warn_type_mismatch;
use crate::errors::{RegistryError, Result};
use crate::infrastructure::instance::TypeInfo;
use crate::infrastructure::ordering::{Constraint, Orderable, Orderer};
use crate::infrastructure::symbols::SymbolSource;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Value = Box<dyn Any + Send + Sync>;

struct Override {
    id: String,
    contributor: String,
    value: Value,
    constraints: Vec<Constraint>,
}

/// 有序配置收集器
///
/// 条目 id 与约束目标中的 `${symbol}` 会先展开。类型不符的值变成占位符：
/// 它仍然参与排序（其他条目的约束依旧有效），但不会出现在结果里。
pub struct OrderedConfiguration {
    service_id: String,
    contributor: String,
    expected: TypeInfo,
    symbols: Arc<SymbolSource>,
    entries: Vec<Orderable<Value>>,
    index: HashMap<String, usize>,
    overrides: Vec<Override>,
}

impl OrderedConfiguration {
    pub(crate) fn new<T: Any + Send + Sync>(service_id: &str, symbols: Arc<SymbolSource>) -> Self {
        Self {
            service_id: service_id.to_string(),
            contributor: String::new(),
            expected: TypeInfo::of::<T>(),
            symbols,
            entries: Vec::new(),
            index: HashMap::new(),
            overrides: Vec::new(),
        }
    }

    pub(crate) fn set_contributor(&mut self, contributor: &str) {
        self.contributor = contributor.to_string();
    }

    /// 添加带约束的值，约束形如 `"before:Auth"`、`"after:*"`
    pub fn add<V: Any + Send + Sync>(&mut self, id: &str, value: V, constraints: &[&str]) -> Result<()> {
        let value = self.check_type(value);
        self.push(id, value, constraints)
    }

    /// 只参与排序的占位条目，其他贡献可以用它作为锚点
    pub fn add_placeholder(&mut self, id: &str, constraints: &[&str]) -> Result<()> {
        self.push(id, None, constraints)
    }

    /// 替换已有条目的值；约束非空时同时替换原条目的约束
    pub fn override_value<V: Any + Send + Sync>(
        &mut self,
        id: &str,
        value: V,
        constraints: &[&str],
    ) -> Result<()> {
        let id = self.symbols.expand(id)?;
        let constraints = self.constraints(constraints)?;
        if let Some(value) = self.check_type(value) {
            self.overrides.push(Override {
                id,
                contributor: self.contributor.clone(),
                value,
                constraints,
            });
        }
        Ok(())
    }

    pub fn expected_type(&self) -> &'static str {
        self.expected.name()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_ordered<T: Any>(mut self) -> Result<Vec<T>> {
        self.apply_overrides()?;

        let mut orderer = Orderer::new(format!("ordered configuration of '{}'", self.service_id));
        for entry in self.entries {
            orderer.add_orderable(entry)?;
        }

        Ok(orderer
            .order()
            .into_iter()
            .filter_map(|value| value.downcast::<T>().ok())
            .map(|value| *value)
            .collect())
    }

    fn check_type<V: Any + Send + Sync>(&self, value: V) -> Option<Value> {
        if TypeId::of::<V>() == self.expected.id() {
            return Some(Box::new(value));
        }
        warn_type_mismatch(
            &self.service_id,
            &self.contributor,
            self.expected.name(),
            std::any::type_name::<V>(),
        );
        None
    }

    fn constraints(&self, constraints: &[&str]) -> Result<Vec<Constraint>> {
        Constraint::parse_all(constraints)?
            .into_iter()
            .map(|c| c.map_target(|target| self.symbols.expand(target)))
            .collect()
    }

    fn push(&mut self, id: &str, value: Option<Value>, constraints: &[&str]) -> Result<()> {
        let id = self.symbols.expand(id)?;
        let constraints = self.constraints(constraints)?;

        let key = id.to_lowercase();
        if self.index.contains_key(&key) {
            return Err(RegistryError::DuplicateOrderingId {
                id,
                context: format!(
                    "ordered configuration of '{}' (contributed by '{}')",
                    self.service_id, self.contributor
                ),
            });
        }

        self.index.insert(key, self.entries.len());
        self.entries.push(Orderable {
            id,
            value,
            constraints,
        });
        Ok(())
    }

    fn apply_overrides(&mut self) -> Result<()> {
        let mut grouped: BTreeMap<String, Vec<Override>> = BTreeMap::new();
        for o in self.overrides.drain(..) {
            grouped.entry(o.id.to_lowercase()).or_default().push(o);
        }

        for (key, overrides) in grouped {
            let Some(&position) = self.index.get(&key) else {
                let first = &overrides[0];
                return Err(RegistryError::OverrideWithoutTarget {
                    service_id: self.service_id.clone(),
                    key: first.id.clone(),
                    contributor: first.contributor.clone(),
                });
            };

            // 同一条目被多次覆盖时按贡献者 id 排序，最后一个生效
            let mut orderer = Orderer::new(format!(
                "overrides of '{}' in ordered configuration of '{}'",
                key, self.service_id
            ));
            for o in overrides {
                let contributor = o.contributor.clone();
                orderer.add(contributor, o, Vec::new())?;
            }

            if let Some(winner) = orderer.order().pop() {
                tracing::debug!(
                    service_id = %self.service_id,
                    id = %winner.id,
                    contributor = %winner.contributor,
                    "Applying ordered configuration override"
                );
                let entry = &mut self.entries[position];
                entry.value = Some(winner.value);
                if !winner.constraints.is_empty() {
                    entry.constraints = winner.constraints;
                }
            }
        }
        Ok(())
    }
}
