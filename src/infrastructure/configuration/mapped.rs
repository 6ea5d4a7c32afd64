use super::warn_type_mismatch;
use crate::errors::{RegistryError, Result};
use crate::infrastructure::instance::TypeInfo;
use crate::infrastructure::ordering::{Constraint, Orderer};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

type Value = Box<dyn Any + Send + Sync>;

struct Entry {
    key: Value,
    value: Value,
    contributor: String,
}

struct Override {
    key: Value,
    value: Value,
    contributor: String,
    constraints: Vec<Constraint>,
}

fn key_eq<K: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<K>(), b.downcast_ref::<K>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn key_fmt<K: fmt::Debug + 'static>(key: &dyn Any) -> String {
    key.downcast_ref::<K>()
        .map(|k| format!("{:?}", k))
        .unwrap_or_default()
}

/// 映射配置收集器
///
/// 已存在的键只能通过 [`override_value`](Self::override_value) 替换。同一个键的多个覆盖
/// 以贡献者 id 作为排序 id，按约束排序后最后一个生效。
pub struct MappedConfiguration {
    service_id: String,
    contributor: String,
    key_type: TypeInfo,
    value_type: TypeInfo,
    key_eq: fn(&dyn Any, &dyn Any) -> bool,
    key_fmt: fn(&dyn Any) -> String,
    entries: Vec<Entry>,
    overrides: Vec<Override>,
}

impl MappedConfiguration {
    pub(crate) fn new<K, V>(service_id: &str) -> Self
    where
        K: Any + Send + Sync + Eq + Hash + fmt::Debug,
        V: Any + Send + Sync,
    {
        Self {
            service_id: service_id.to_string(),
            contributor: String::new(),
            key_type: TypeInfo::of::<K>(),
            value_type: TypeInfo::of::<V>(),
            key_eq: key_eq::<K>,
            key_fmt: key_fmt::<K>,
            entries: Vec::new(),
            overrides: Vec::new(),
        }
    }

    pub(crate) fn set_contributor(&mut self, contributor: &str) {
        self.contributor = contributor.to_string();
    }

    /// 添加键值；键已存在时报错
    pub fn add<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: Any + Send + Sync,
        V: Any + Send + Sync,
    {
        let Some((key, value)) = self.check_types(key, value) else {
            return Ok(());
        };

        if let Some(existing) = self.position(&*key) {
            return Err(RegistryError::DuplicateMappedKey {
                service_id: self.service_id.clone(),
                key: (self.key_fmt)(&*key),
                contributor: format!(
                    "{} (already contributed by '{}')",
                    self.contributor, self.entries[existing].contributor
                ),
            });
        }

        self.entries.push(Entry {
            key,
            value,
            contributor: self.contributor.clone(),
        });
        Ok(())
    }

    /// 覆盖已有键的值；约束引用其他覆盖者的贡献 id
    pub fn override_value<K, V>(&mut self, key: K, value: V, constraints: &[&str]) -> Result<()>
    where
        K: Any + Send + Sync,
        V: Any + Send + Sync,
    {
        let constraints = Constraint::parse_all(constraints)?;
        if let Some((key, value)) = self.check_types(key, value) {
            self.overrides.push(Override {
                key,
                value,
                contributor: self.contributor.clone(),
                constraints,
            });
        }
        Ok(())
    }

    pub fn key_type(&self) -> &'static str {
        self.key_type.name()
    }

    pub fn value_type(&self) -> &'static str {
        self.value_type.name()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_map<K, V>(mut self) -> Result<HashMap<K, V>>
    where
        K: Any + Eq + Hash,
        V: Any,
    {
        self.apply_overrides()?;

        Ok(self
            .entries
            .into_iter()
            .filter_map(|entry| {
                let key = entry.key.downcast::<K>().ok()?;
                let value = entry.value.downcast::<V>().ok()?;
                Some((*key, *value))
            })
            .collect())
    }

    fn check_types<K, V>(&self, key: K, value: V) -> Option<(Value, Value)>
    where
        K: Any + Send + Sync,
        V: Any + Send + Sync,
    {
        let (expected, actual) = if TypeId::of::<K>() != self.key_type.id() {
            (self.key_type.name(), std::any::type_name::<K>())
        } else if TypeId::of::<V>() != self.value_type.id() {
            (self.value_type.name(), std::any::type_name::<V>())
        } else {
            return Some((Box::new(key), Box::new(value)));
        };

        warn_type_mismatch(&self.service_id, &self.contributor, expected, actual);
        None
    }

    fn position(&self, key: &dyn Any) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| (self.key_eq)(&*entry.key, key))
    }

    fn apply_overrides(&mut self) -> Result<()> {
        let mut grouped: Vec<(usize, Vec<Override>)> = Vec::new();

        for o in std::mem::take(&mut self.overrides) {
            let Some(position) = self.position(&*o.key) else {
                return Err(RegistryError::OverrideWithoutTarget {
                    service_id: self.service_id.clone(),
                    key: (self.key_fmt)(&*o.key),
                    contributor: o.contributor,
                });
            };
            match grouped.iter_mut().find(|(pos, _)| *pos == position) {
                Some((_, group)) => group.push(o),
                None => grouped.push((position, vec![o])),
            }
        }

        for (position, overrides) in grouped {
            let key = (self.key_fmt)(&*self.entries[position].key);
            let mut orderer = Orderer::new(format!(
                "overrides of key {} in mapped configuration of '{}'",
                key, self.service_id
            ));
            for o in overrides {
                let contributor = o.contributor.clone();
                let constraints = o.constraints.clone();
                orderer.add(contributor, o, constraints)?;
            }

            if let Some(winner) = orderer.order().pop() {
                tracing::debug!(
                    service_id = %self.service_id,
                    key = %key,
                    contributor = %winner.contributor,
                    "Applying mapped configuration override"
                );
                let entry = &mut self.entries[position];
                entry.value = winner.value;
                entry.contributor = winner.contributor;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MappedConfiguration {
        let mut config = MappedConfiguration::new::<String, u32>("Ports");
        config.set_contributor("Base");
        config
    }

    #[test]
    fn test_add_and_read() {
        let mut config = config();
        config.add("http".to_string(), 80_u32).unwrap();
        config.add("https".to_string(), 443_u32).unwrap();

        let map = config.into_map::<String, u32>().unwrap();
        assert_eq!(map["http"], 80);
        assert_eq!(map["https"], 443);
    }

    #[test]
    fn test_duplicate_key_requires_override() {
        let mut config = config();
        config.add("http".to_string(), 80_u32).unwrap();
        config.set_contributor("Other");
        let err = config.add("http".to_string(), 8080_u32).unwrap_err();

        match err {
            RegistryError::DuplicateMappedKey { key, contributor, .. } => {
                assert_eq!(key, "\"http\"");
                assert!(contributor.contains("'Base'"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_overrides_are_ordered_by_constraints() {
        let mut config = config();
        config.add("http".to_string(), 80_u32).unwrap();

        config.set_contributor("Zeta");
        config.override_value("http".to_string(), 8080_u32, &["before:Alpha"]).unwrap();
        config.set_contributor("Alpha");
        config.override_value("http".to_string(), 9090_u32, &[]).unwrap();

        let map = config.into_map::<String, u32>().unwrap();
        assert_eq!(map["http"], 9090);
    }

    #[test]
    fn test_override_of_missing_key() {
        let mut config = config();
        config.override_value("ftp".to_string(), 21_u32, &[]).unwrap();
        assert!(matches!(
            config.into_map::<String, u32>(),
            Err(RegistryError::OverrideWithoutTarget { .. })
        ));
    }

    #[test]
    fn test_wrong_types_are_ignored() {
        let mut config = config();
        config.add("http", 80_u32).unwrap();
        config.add("http".to_string(), "eighty").unwrap();
        config.add("https".to_string(), 443_u32).unwrap();

        let map = config.into_map::<String, u32>().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["https"], 443);
    }
}
