//! 线程内操作轨迹
//!
//! 每个线程维护一个操作描述栈（"Realizing service 'X'" 等），构建失败时把当前栈
//! 快照写进错误。另有一个正在实例化的服务栈，用来发现同一线程上的递归构建。

use crate::errors::{RegistryError, Result};
use std::cell::RefCell;

thread_local! {
    static OPERATIONS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static REALIZING: RefCell<Vec<Realizing>> = const { RefCell::new(Vec::new()) };
}

struct Realizing {
    registry: usize,
    index: usize,
    service_id: String,
}

/// 操作轨迹
pub struct OperationTracker;

impl OperationTracker {
    /// 在轨迹中记录 `description` 并执行 `operation`
    pub fn run<T>(description: impl Into<String>, operation: impl FnOnce() -> T) -> T {
        OPERATIONS.with(|ops| ops.borrow_mut().push(description.into()));
        let _pop = PopOnDrop;
        operation()
    }

    /// 当前线程的操作栈，最外层在前
    pub fn snapshot() -> Vec<String> {
        OPERATIONS.with(|ops| ops.borrow().clone())
    }

    pub fn depth() -> usize {
        OPERATIONS.with(|ops| ops.borrow().len())
    }
}

struct PopOnDrop;

impl Drop for PopOnDrop {
    fn drop(&mut self) {
        OPERATIONS.with(|ops| {
            ops.borrow_mut().pop();
        });
    }
}

/// 标记当前线程正在实例化某个服务；离开作用域时出栈
pub(crate) struct RealizationGuard;

impl Drop for RealizationGuard {
    fn drop(&mut self) {
        REALIZING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// 进入服务实例化；同一注册表的同一服务已在栈中时报递归构建
pub(crate) fn enter_realization(registry: usize, index: usize, service_id: &str) -> Result<RealizationGuard> {
    REALIZING.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.iter().any(|r| r.registry == registry && r.index == index) {
            let mut chain: Vec<String> = stack
                .iter()
                .filter(|r| r.registry == registry)
                .map(|r| r.service_id.clone())
                .collect();
            chain.push(service_id.to_string());
            return Err(RegistryError::RecursiveConstruction {
                service_id: service_id.to_string(),
                chain,
            });
        }

        stack.push(Realizing {
            registry,
            index,
            service_id: service_id.to_string(),
        });
        Ok(RealizationGuard)
    })
}
