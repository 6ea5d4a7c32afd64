//! 单例实例化状态机
//!
//! `Unrealized -> Realizing -> Realized | Failed`，后两者为终态。
//! 同一时刻只有一个线程执行工厂，其余调用方在条件变量上等待结果。

use crate::errors::{RegistryError, Result};
use crate::infrastructure::instance::ServiceInstance;
use parking_lot::{Condvar, Mutex};

/// 服务实例化状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationStatus {
    Unrealized,
    Realizing,
    Realized,
    Failed,
}

impl std::fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActivationStatus::Unrealized => "unrealized",
            ActivationStatus::Realizing => "realizing",
            ActivationStatus::Realized => "realized",
            ActivationStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

enum ActivationState {
    Unrealized,
    Realizing,
    Realized(ServiceInstance),
    Failed(RegistryError),
    /// 注册表关闭后实例已释放
    Released,
}

pub(crate) struct ActivationCell {
    state: Mutex<ActivationState>,
    ready: Condvar,
}

impl ActivationCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ActivationState::Unrealized),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn status(&self) -> ActivationStatus {
        match &*self.state.lock() {
            ActivationState::Unrealized | ActivationState::Released => ActivationStatus::Unrealized,
            ActivationState::Realizing => ActivationStatus::Realizing,
            ActivationState::Realized(_) => ActivationStatus::Realized,
            ActivationState::Failed(_) => ActivationStatus::Failed,
        }
    }

    /// 返回已有实例或记录的失败；处于未实例化状态时由当前线程执行 `realize`
    pub(crate) fn get_or_realize<F>(&self, service_id: &str, realize: F) -> Result<ServiceInstance>
    where
        F: FnOnce() -> Result<ServiceInstance>,
    {
        let mut state = self.state.lock();
        loop {
            match &*state {
                ActivationState::Realized(instance) => return Ok(instance.clone()),
                ActivationState::Failed(err) => return Err(err.clone()),
                ActivationState::Released => {
                    return Err(RegistryError::UseAfterShutdown {
                        operation: format!("realize service '{}'", service_id),
                    })
                }
                ActivationState::Realizing => self.ready.wait(&mut state),
                ActivationState::Unrealized => break,
            }
        }
        *state = ActivationState::Realizing;
        drop(state);

        let mut guard = PanicGuard {
            cell: self,
            service_id,
            armed: true,
        };
        let result = realize();
        guard.armed = false;

        self.complete(match &result {
            Ok(instance) => ActivationState::Realized(instance.clone()),
            Err(err) => ActivationState::Failed(err.clone()),
        });
        result
    }

    /// 关闭时释放实例
    pub(crate) fn release(&self) {
        let mut state = self.state.lock();
        *state = ActivationState::Released;
        self.ready.notify_all();
    }

    fn complete(&self, outcome: ActivationState) {
        let mut state = self.state.lock();
        if matches!(*state, ActivationState::Realizing) {
            *state = outcome;
        }
        self.ready.notify_all();
    }
}

struct PanicGuard<'a> {
    cell: &'a ActivationCell,
    service_id: &'a str,
    armed: bool,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let err = RegistryError::construction(
                self.service_id,
                anyhow::anyhow!("service factory panicked"),
                Vec::new(),
            );
            self.cell.complete(ActivationState::Failed(err));
        }
    }
}
