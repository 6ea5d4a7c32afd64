//! 符号源
//!
//! 展开 `${symbol}` 占位符。服务 id、贡献目标、排序约束在进入目录之前都会先经过这里。

use crate::errors::{RegistryError, Result};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;

/// 符号值提供者
pub trait SymbolProvider: Send + Sync {
    /// 返回符号的原始值（未展开）
    fn value_for(&self, symbol: &str) -> Option<String>;
}

/// 基于表的提供者，符号名大小写不敏感
#[derive(Debug, Clone, Default)]
pub struct MapSymbolProvider {
    values: HashMap<String, String>,
}

impl MapSymbolProvider {
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
                .collect(),
        }
    }
}

impl SymbolProvider for MapSymbolProvider {
    fn value_for(&self, symbol: &str) -> Option<String> {
        self.values.get(&symbol.to_lowercase()).cloned()
    }
}

/// 环境变量提供者：`app.name` 对应 `<PREFIX>APP_NAME`
#[derive(Debug, Clone)]
pub struct EnvSymbolProvider {
    prefix: String,
}

impl EnvSymbolProvider {
    pub const DEFAULT_PREFIX: &'static str = "IOC_SYMBOL_";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn variable_name(&self, symbol: &str) -> String {
        let normalized: String = symbol
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }
}

impl Default for EnvSymbolProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

impl SymbolProvider for EnvSymbolProvider {
    fn value_for(&self, symbol: &str) -> Option<String> {
        env::var(self.variable_name(symbol)).ok()
    }
}

/// 按顺序询问提供者，第一个给出值的提供者获胜
#[derive(Clone, Default)]
pub struct SymbolSource {
    providers: Vec<Arc<dyn SymbolProvider>>,
}

impl SymbolSource {
    pub fn new(providers: Vec<Arc<dyn SymbolProvider>>) -> Self {
        Self { providers }
    }

    /// 返回符号完全展开后的值
    pub fn value_of(&self, symbol: &str) -> Result<String> {
        let mut stack = Vec::new();
        self.resolve(symbol, symbol, &mut stack)
    }

    /// 展开字符串中的全部 `${...}`
    pub fn expand(&self, input: &str) -> Result<String> {
        if !input.contains("${") {
            return Ok(input.to_string());
        }
        let mut stack = Vec::new();
        self.expand_with(input, &mut stack)
    }

    fn expand_with(&self, input: &str, stack: &mut Vec<String>) -> Result<String> {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            // 未闭合的占位符按字面量保留
            let Some(end) = after.find('}') else {
                output.push_str(&rest[start..]);
                return Ok(output);
            };

            let symbol = after[..end].trim();
            output.push_str(&self.resolve(symbol, input, stack)?);
            rest = &after[end + 1..];
        }

        output.push_str(rest);
        Ok(output)
    }

    fn resolve(&self, symbol: &str, input: &str, stack: &mut Vec<String>) -> Result<String> {
        if stack.iter().any(|s| s.eq_ignore_ascii_case(symbol)) {
            let mut chain = stack.clone();
            chain.push(symbol.to_string());
            return Err(RegistryError::RecursiveSymbol { chain });
        }

        let raw = self
            .providers
            .iter()
            .find_map(|p| p.value_for(symbol))
            .ok_or_else(|| RegistryError::UnknownSymbol {
                symbol: symbol.to_string(),
                input: input.to_string(),
            })?;

        stack.push(symbol.to_string());
        let expanded = self.expand_with(&raw, stack);
        stack.pop();
        expanded
    }
}
