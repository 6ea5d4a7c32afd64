use super::warn_type_mismatch;
use crate::infrastructure::instance::TypeInfo;
use std::any::{Any, TypeId};

/// 无序配置收集器
pub struct UnorderedConfiguration {
    service_id: String,
    contributor: String,
    expected: TypeInfo,
    values: Vec<Box<dyn Any + Send + Sync>>,
}

impl UnorderedConfiguration {
    pub(crate) fn new<T: Any + Send + Sync>(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            contributor: String::new(),
            expected: TypeInfo::of::<T>(),
            values: Vec::new(),
        }
    }

    pub(crate) fn set_contributor(&mut self, contributor: &str) {
        self.contributor = contributor.to_string();
    }

    /// 添加一个值；类型与消费方期望不符时忽略该值并记录警告
    pub fn add<V: Any + Send + Sync>(&mut self, value: V) -> &mut Self {
        if TypeId::of::<V>() != self.expected.id() {
            warn_type_mismatch(
                &self.service_id,
                &self.contributor,
                self.expected.name(),
                std::any::type_name::<V>(),
            );
            return self;
        }
        self.values.push(Box::new(value));
        self
    }

    /// 消费方期望的元素类型
    pub fn expected_type(&self) -> &'static str {
        self.expected.name()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn into_values<T: Any>(self) -> Vec<T> {
        self.values
            .into_iter()
            .filter_map(|value| value.downcast::<T>().ok())
            .map(|value| *value)
            .collect()
    }
}
