//! 线程作用域实例
//!
//! 以 (线程, 服务) 为键保存实例或失败结果。条目只会被所属线程写入，
//! 因此不需要额外的实例化锁。
//!
//! 每个访问过线程作用域服务的线程都持有一个线程局部的退出守卫；线程结束时
//! 即使没有调用 `cleanup_thread`，守卫也会移除该线程的实例并通知监听器。

use crate::errors::{RegistryError, Result};
use crate::infrastructure::instance::ServiceInstance;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

type CleanupListener = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
enum Slot {
    Realized(ServiceInstance),
    Failed(RegistryError),
}

#[derive(Default)]
struct PerThreadState {
    slots: DashMap<(ThreadId, usize), Slot>,
    listeners: Mutex<HashMap<ThreadId, Vec<CleanupListener>>>,
}

impl PerThreadState {
    /// 取出某个线程的全部条目；实例在锁外释放，监听器在锁外调用
    fn evict(&self, thread_id: ThreadId) -> usize {
        let keys: Vec<(ThreadId, usize)> = self
            .slots
            .iter()
            .filter(|entry| entry.key().0 == thread_id)
            .map(|entry| *entry.key())
            .collect();
        let removed: Vec<Slot> = keys
            .iter()
            .filter_map(|key| self.slots.remove(key).map(|(_, slot)| slot))
            .collect();
        let discarded = removed.len();
        drop(removed);

        let listeners = self.listeners.lock().remove(&thread_id);
        for listener in listeners.into_iter().flatten() {
            listener();
        }

        discarded
    }
}

struct ThreadExitGuard {
    thread_id: ThreadId,
    states: RefCell<Vec<Weak<PerThreadState>>>,
}

impl Drop for ThreadExitGuard {
    fn drop(&mut self) {
        for state in self.states.get_mut().drain(..) {
            if let Some(state) = state.upgrade() {
                let discarded = state.evict(self.thread_id);
                if discarded > 0 {
                    tracing::trace!(discarded, "Discarded per-thread services on thread exit");
                }
            }
        }
    }
}

thread_local! {
    static EXIT_GUARD: ThreadExitGuard = ThreadExitGuard {
        thread_id: thread::current().id(),
        states: RefCell::new(Vec::new()),
    };
}

pub(crate) struct PerThreadManager {
    state: Arc<PerThreadState>,
}

impl Default for PerThreadManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PerThreadManager {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(PerThreadState::default()),
        }
    }

    /// 让当前线程退出时清理本管理器的条目
    fn watch_current_thread(&self) {
        let weak = Arc::downgrade(&self.state);
        // 线程正在销毁线程局部变量时无法再登记，此时条目留给 cleanup_thread 或 drain
        let _ = EXIT_GUARD.try_with(|guard| {
            let mut states = guard.states.borrow_mut();
            states.retain(|state| state.strong_count() > 0);
            if !states.iter().any(|state| state.ptr_eq(&weak)) {
                states.push(weak);
            }
        });
    }

    pub(crate) fn get_or_create<F>(&self, index: usize, create: F) -> Result<ServiceInstance>
    where
        F: FnOnce() -> Result<ServiceInstance>,
    {
        let key = (thread::current().id(), index);

        // 读锁必须在调用工厂前释放，工厂可能访问其他线程作用域服务
        let existing = self.state.slots.get(&key).map(|slot| slot.value().clone());
        match existing {
            Some(Slot::Realized(instance)) => return Ok(instance),
            Some(Slot::Failed(err)) => return Err(err),
            None => {}
        }

        let result = create();
        let slot = match &result {
            Ok(instance) => Slot::Realized(instance.clone()),
            Err(err) => Slot::Failed(err.clone()),
        };
        self.watch_current_thread();
        self.state.slots.insert(key, slot);
        result
    }

    /// 当前线程上该服务是否已实例化（`None` 表示尚未访问）
    pub(crate) fn is_realized(&self, index: usize) -> Option<bool> {
        self.state
            .slots
            .get(&(thread::current().id(), index))
            .map(|slot| matches!(slot.value(), Slot::Realized(_)))
    }

    pub(crate) fn add_cleanup_listener(&self, listener: CleanupListener) {
        self.watch_current_thread();
        self.state
            .listeners
            .lock()
            .entry(thread::current().id())
            .or_default()
            .push(listener);
    }

    /// 丢弃当前线程的实例并通知监听器，返回丢弃的实例数
    pub(crate) fn cleanup_thread(&self) -> usize {
        self.state.evict(thread::current().id())
    }

    /// 关闭时丢弃所有线程的实例并通知全部监听器
    pub(crate) fn drain(&self) {
        let keys: Vec<(ThreadId, usize)> = self.state.slots.iter().map(|entry| *entry.key()).collect();
        let removed: Vec<Slot> = keys
            .iter()
            .filter_map(|key| self.state.slots.remove(key).map(|(_, slot)| slot))
            .collect();
        drop(removed);

        let listeners = std::mem::take(&mut *self.state.listeners.lock());
        for listener in listeners.into_values().flatten() {
            listener();
        }
    }

    pub(crate) fn instance_count(&self) -> usize {
        self.state
            .slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Realized(_)))
            .count()
    }
}
