//! 注册表运行时
//!
//! 目录、贡献、装饰器在构建阶段确定后不再变化；运行时状态（单例、线程实例、
//! 配置缓存）按服务分别加锁，实例化服务 A 不会阻塞无关的服务 B。

use super::activation::{ActivationCell, ActivationStatus};
use super::lifecycle::ServiceLifecycle;
use super::per_thread::PerThreadManager;
use super::proxy::{ProxyHandle, ServiceProxy};
use super::resources::ServiceResources;
use super::tracker::{self, OperationTracker};
use super::ServiceScope;
use crate::config::RegistryConfig;
use crate::errors::{RegistryError, Result};
use crate::infrastructure::advice::DecoratorDef;
use crate::infrastructure::catalog::ServiceCatalog;
use crate::infrastructure::configuration::{ContributionDef, ContributionKind};
use crate::infrastructure::instance::{ServiceInstance, TypeInfo};
use crate::infrastructure::provider::{InjectionContext, MasterObjectProvider};
use crate::infrastructure::symbols::SymbolSource;
use crate::logging::OperationTimer;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

type ShutdownListener = Box<dyn FnOnce() + Send>;

/// 启动任务，通过有序配置贡献给 `RegistryStartup`
pub type StartupTask = Arc<dyn Fn(&Registry) -> anyhow::Result<()> + Send + Sync>;

struct CachedConfiguration {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// 内部统计信息（原子计数器）
#[derive(Default)]
struct InnerStats {
    total_resolutions: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    constructions: AtomicUsize,
    failures: AtomicUsize,
}

pub(crate) struct RegistryParts {
    pub(crate) catalog: ServiceCatalog,
    pub(crate) contributions: Vec<Vec<Arc<ContributionDef>>>,
    pub(crate) decorators: Vec<Vec<Arc<DecoratorDef>>>,
    pub(crate) lifecycles: HashMap<String, Arc<dyn ServiceLifecycle>>,
    pub(crate) symbols: Arc<SymbolSource>,
    pub(crate) config: RegistryConfig,
}

pub(crate) struct RegistryInner {
    catalog: ServiceCatalog,
    contributions: Vec<Vec<Arc<ContributionDef>>>,
    /// 每个服务的装饰器，由外到内排列
    decorators: Vec<Vec<Arc<DecoratorDef>>>,
    lifecycles: HashMap<String, Arc<dyn ServiceLifecycle>>,
    symbols: Arc<SymbolSource>,
    config: RegistryConfig,

    activations: Vec<ActivationCell>,
    proxies: Vec<OnceCell<Arc<ProxyHandle>>>,
    construction_counts: Vec<AtomicUsize>,
    /// 已实例化单例的快速路径
    singletons: DashMap<usize, ServiceInstance>,
    per_thread: PerThreadManager,
    configurations: DashMap<(usize, ContributionKind), Arc<OnceCell<CachedConfiguration>>>,

    shutdown_listeners: Mutex<Vec<ShutdownListener>>,
    /// 启动结果，首次执行完成后固定
    startup: OnceCell<Result<()>>,
    startup_thread: Mutex<Option<ThreadId>>,
    shutting_down: AtomicBool,
    shut_down: AtomicBool,
    stats: InnerStats,
}

/// 服务注册表
///
/// 克隆开销很小，所有克隆共享同一份状态。
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Registry>();
    assert_send_sync::<ServiceProxy<dyn Any + Send + Sync>>();
};

impl Registry {
    pub const STARTUP_SERVICE_ID: &'static str = "RegistryStartup";
    pub const MASTER_OBJECT_PROVIDER_ID: &'static str = "MasterObjectProvider";

    pub fn builder() -> super::RegistryBuilder {
        super::RegistryBuilder::new()
    }

    pub(crate) fn from_parts(parts: RegistryParts) -> Self {
        let count = parts.catalog.len();
        Self {
            inner: Arc::new(RegistryInner {
                catalog: parts.catalog,
                contributions: parts.contributions,
                decorators: parts.decorators,
                lifecycles: parts.lifecycles,
                symbols: parts.symbols,
                config: parts.config,
                activations: (0..count).map(|_| ActivationCell::new()).collect(),
                proxies: (0..count).map(|_| OnceCell::new()).collect(),
                construction_counts: (0..count).map(|_| AtomicUsize::new(0)).collect(),
                singletons: DashMap::new(),
                per_thread: PerThreadManager::new(),
                configurations: DashMap::new(),
                shutdown_listeners: Mutex::new(Vec::new()),
                startup: OnceCell::new(),
                startup_thread: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                stats: InnerStats::default(),
            }),
        }
    }

    pub(crate) fn upgrade(inner: &Weak<RegistryInner>) -> Option<Registry> {
        inner.upgrade().map(|inner| Registry { inner })
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    fn ensure_active(&self, operation: impl FnOnce() -> String) -> Result<()> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(RegistryError::UseAfterShutdown {
                operation: operation(),
            });
        }
        Ok(())
    }

    /// 实例化所有 eager-load 服务，然后依次执行 `RegistryStartup` 的启动任务
    ///
    /// 只会执行一次。之后的调用返回第一次的结果（包括失败）；
    /// 启动过程中的并发调用会等待其完成。
    pub fn perform_startup(&self) -> Result<()> {
        self.ensure_active(|| "perform startup".to_string())?;
        if let Some(outcome) = self.inner.startup.get() {
            tracing::debug!(succeeded = outcome.is_ok(), "Registry startup already performed");
            return outcome.clone();
        }

        let current = thread::current().id();
        if *self.inner.startup_thread.lock() == Some(current) {
            // 启动任务中再次调用
            tracing::debug!("Registry startup already in progress on this thread");
            return Ok(());
        }

        self.inner
            .startup
            .get_or_init(|| {
                *self.inner.startup_thread.lock() = Some(current);
                let outcome = self.run_startup();
                *self.inner.startup_thread.lock() = None;
                if let Err(err) = &outcome {
                    tracing::error!(error = %err, "Registry startup failed");
                }
                outcome
            })
            .clone()
    }

    fn run_startup(&self) -> Result<()> {
        let timer = OperationTimer::new("registry_startup");
        let mut eager = 0;

        if self.inner.config.eager_load {
            for (index, def) in self.inner.catalog.iter().enumerate() {
                if !def.is_eager_load() {
                    continue;
                }
                if *def.service_scope() == ServiceScope::PerThread {
                    tracing::warn!(
                        service_id = %def.service_id(),
                        "Service is marked for eager load but uses the perthread scope; skipping"
                    );
                    continue;
                }
                self.realize(index)?;
                eager += 1;
            }
        } else {
            tracing::debug!("Eager loading disabled by configuration");
        }

        let startup = self
            .get_service::<RegistryStartup>(Self::STARTUP_SERVICE_ID)?
            .get()?;
        startup.run(self)?;

        tracing::info!(
            services = self.inner.catalog.len(),
            eager_loaded = eager,
            startup_tasks = startup.len(),
            duration_ms = timer.elapsed().as_millis(),
            "Registry startup complete"
        );
        Ok(())
    }

    /// 获取服务代理；不会触发实例化
    pub fn get_service<I>(&self, service_id: &str) -> Result<ServiceProxy<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.ensure_active(|| format!("get service '{}'", service_id))?;
        self.inner.stats.total_resolutions.fetch_add(1, Ordering::Relaxed);

        let service_id = self.inner.symbols.expand(service_id)?;
        let def = self.inner.catalog.lookup(&service_id)?;
        let expected = TypeInfo::of::<I>();
        if def.interface() != expected {
            return Err(RegistryError::ServiceTypeMismatch {
                service_id: def.service_id().to_string(),
                expected: expected.name(),
                actual: def.interface().name(),
            });
        }

        let index = self.position(&service_id)?;
        Ok(ServiceProxy::new(self.proxy_handle(index)))
    }

    /// 按接口获取唯一实现的代理
    pub fn get_service_by_type<I>(&self) -> Result<ServiceProxy<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.ensure_active(|| format!("get service by type {}", std::any::type_name::<I>()))?;
        self.inner.stats.total_resolutions.fetch_add(1, Ordering::Relaxed);

        let def = self.inner.catalog.find_by_interface(TypeInfo::of::<I>())?;
        let index = self.position(def.service_id())?;
        Ok(ServiceProxy::new(self.proxy_handle(index)))
    }

    /// 按 id 返回实例化后的类型擦除实例
    pub fn service_instance(&self, service_id: &str) -> Result<ServiceInstance> {
        self.ensure_active(|| format!("get service '{}'", service_id))?;
        let service_id = self.inner.symbols.expand(service_id)?;
        let index = self.position(&service_id)?;
        self.realize(index)
    }

    /// 通过主对象提供者解析注入值；没有提供者匹配时按接口查找唯一服务
    pub fn get_object<I>(&self, context: &InjectionContext) -> Result<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let target = TypeInfo::of::<I>();
        match self.provide(target, context, true)? {
            Some(instance) => downcast_object(&instance, target),
            None => Err(RegistryError::NoServiceForInterface {
                interface: target.name(),
                markers: context.markers().iter().map(|m| m.name()).collect(),
            }),
        }
    }

    /// 与 [`get_object`](Self::get_object) 相同，但没有匹配时返回 `None`
    pub fn find_object<I>(&self, context: &InjectionContext) -> Result<Option<Arc<I>>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let target = TypeInfo::of::<I>();
        self.provide(target, context, false)?
            .map(|instance| downcast_object(&instance, target))
            .transpose()
    }

    fn provide(&self, target: TypeInfo, context: &InjectionContext, required: bool) -> Result<Option<ServiceInstance>> {
        self.ensure_active(|| format!("get object of type {}", target))?;
        let master = self
            .get_service::<MasterObjectProvider>(Self::MASTER_OBJECT_PROVIDER_ID)?
            .get()?;
        master.provide(target, context, self, required)
    }

    pub fn expand_symbols(&self, input: &str) -> Result<String> {
        self.inner.symbols.expand(input)
    }

    pub fn service_status(&self, service_id: &str) -> Result<ActivationStatus> {
        self.ensure_active(|| format!("query status of service '{}'", service_id))?;
        let index = self.position(service_id)?;
        Ok(self.status_at(index))
    }

    fn status_at(&self, index: usize) -> ActivationStatus {
        let def = self.inner.catalog.at(index);
        match def.service_scope() {
            ServiceScope::Singleton => self.inner.activations[index].status(),
            ServiceScope::PerThread => match self.inner.per_thread.is_realized(index) {
                Some(true) => ActivationStatus::Realized,
                Some(false) => ActivationStatus::Failed,
                None => ActivationStatus::Unrealized,
            },
            ServiceScope::Custom(_) => {
                if self.inner.construction_counts[index].load(Ordering::Relaxed) > 0 {
                    ActivationStatus::Realized
                } else {
                    ActivationStatus::Unrealized
                }
            }
        }
    }

    /// 所有服务的当前状态，按服务 id 排序
    pub fn service_activity(&self) -> Vec<ServiceActivity> {
        let mut activity: Vec<ServiceActivity> = self
            .inner
            .catalog
            .iter()
            .enumerate()
            .map(|(index, def)| ServiceActivity {
                service_id: def.service_id().to_string(),
                interface: def.interface().name(),
                scope: def.service_scope().clone(),
                status: self.status_at(index),
                constructions: self.inner.construction_counts[index].load(Ordering::Relaxed),
            })
            .collect();
        activity.sort_by_key(|a| a.service_id.to_lowercase());
        activity
    }

    /// 获取注册表统计信息
    pub fn stats(&self) -> RegistryStats {
        let stats = &self.inner.stats;
        RegistryStats {
            total_resolutions: stats.total_resolutions.load(Ordering::Relaxed),
            cache_hits: stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: stats.cache_misses.load(Ordering::Relaxed),
            constructions: stats.constructions.load(Ordering::Relaxed),
            failures: stats.failures.load(Ordering::Relaxed),
            realized_singletons: self.inner.singletons.len(),
            per_thread_instances: self.inner.per_thread.instance_count(),
        }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.inner.catalog
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub(crate) fn symbol_source(&self) -> Arc<SymbolSource> {
        self.inner.symbols.clone()
    }

    /// 丢弃当前线程的线程作用域实例，并通知该线程注册的清理监听器
    pub fn cleanup_thread(&self) {
        let discarded = self.inner.per_thread.cleanup_thread();
        tracing::debug!(discarded, "Cleaned up per-thread services");
    }

    pub fn add_thread_cleanup_listener(&self, listener: impl FnOnce() + Send + 'static) -> Result<()> {
        self.ensure_active(|| "add thread cleanup listener".to_string())?;
        self.inner.per_thread.add_cleanup_listener(Box::new(listener));
        Ok(())
    }

    /// 注册关闭监听器；关闭时按注册顺序的逆序调用
    pub fn add_registry_shutdown_listener(&self, listener: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(RegistryError::UseAfterShutdown {
                operation: "add registry shutdown listener".to_string(),
            });
        }
        self.inner.shutdown_listeners.lock().push(Box::new(listener));
        Ok(())
    }

    /// 关闭注册表
    ///
    /// 丢弃线程实例、逆序调用关闭监听器（监听器内仍可使用服务），然后释放所有实例。
    /// 之后的任何调用都返回 `UseAfterShutdown`。重复调用无效果。
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let timer = OperationTimer::new("registry_shutdown");

        self.inner.per_thread.drain();

        let listeners = std::mem::take(&mut *self.inner.shutdown_listeners.lock());
        let listener_count = listeners.len();
        for listener in listeners.into_iter().rev() {
            listener();
        }

        self.inner.shut_down.store(true, Ordering::Release);
        let released = self.inner.singletons.len();
        self.inner.singletons.clear();
        for cell in &self.inner.activations {
            cell.release();
        }
        self.inner.configurations.clear();

        tracing::info!(
            released_singletons = released,
            listeners = listener_count,
            duration_ms = timer.elapsed().as_millis(),
            "Registry shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    fn position(&self, service_id: &str) -> Result<usize> {
        self.inner
            .catalog
            .position(service_id)
            .ok_or_else(|| RegistryError::UnknownService {
                service_id: service_id.to_string(),
                available: self.inner.catalog.service_ids(),
            })
    }

    fn proxy_handle(&self, index: usize) -> Arc<ProxyHandle> {
        self.inner.proxies[index]
            .get_or_init(|| {
                let def = self.inner.catalog.at(index);
                Arc::new(ProxyHandle::new(
                    def.service_id().to_string(),
                    index,
                    Arc::downgrade(&self.inner),
                ))
            })
            .clone()
    }

    /// 按作用域返回实例，需要时构建
    pub(crate) fn realize(&self, index: usize) -> Result<ServiceInstance> {
        let def = self.inner.catalog.at(index);
        self.ensure_active(|| format!("realize service '{}'", def.service_id()))?;

        match def.service_scope() {
            ServiceScope::Singleton => {
                if let Some(instance) = self.inner.singletons.get(&index) {
                    self.inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(instance.value().clone());
                }
                self.inner.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

                let _realizing = tracker::enter_realization(self.address(), index, def.service_id())?;
                let instance = self.inner.activations[index]
                    .get_or_realize(def.service_id(), || self.construct(index))?;

                if !self.inner.shutting_down.load(Ordering::Acquire) {
                    self.inner.singletons.insert(index, instance.clone());
                }
                Ok(instance)
            }
            ServiceScope::PerThread => {
                self.inner.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                let _realizing = tracker::enter_realization(self.address(), index, def.service_id())?;
                self.inner.per_thread.get_or_create(index, || self.construct(index))
            }
            ServiceScope::Custom(name) => {
                let lifecycle = self.inner.lifecycles.get(&name.to_lowercase()).ok_or_else(|| {
                    RegistryError::UnknownScope {
                        service_id: def.service_id().to_string(),
                        scope: name.clone(),
                    }
                })?;
                let _realizing = tracker::enter_realization(self.address(), index, def.service_id())?;
                lifecycle.instance(def.service_id(), &|| self.construct(index))
            }
        }
    }

    /// 执行工厂并套上装饰器
    fn construct(&self, index: usize) -> Result<ServiceInstance> {
        let def = self.inner.catalog.at(index).clone();
        let service_id = def.service_id();
        let timer = OperationTimer::new("realize_service").with_metadata("service_id", service_id);

        let result = OperationTracker::run(format!("Realizing service '{}'", service_id), || {
            let resources = ServiceResources::new(self.clone(), index, service_id);
            let instance = (def.factory())(&resources).map_err(|err| {
                RegistryError::construction(service_id, err, OperationTracker::snapshot())
            })?;
            self.decorate(index, instance, &resources)
        });

        match &result {
            Ok(_) => {
                self.inner.stats.constructions.fetch_add(1, Ordering::Relaxed);
                self.inner.construction_counts[index].fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    service_id = %service_id,
                    scope = %def.service_scope(),
                    duration_ms = timer.elapsed().as_millis(),
                    "Realized service"
                );
            }
            Err(err) => {
                self.inner.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(service_id = %service_id, error = %err, "Service construction failed");
            }
        }
        result
    }

    fn decorate(&self, index: usize, instance: ServiceInstance, resources: &ServiceResources) -> Result<ServiceInstance> {
        let service_id = resources.service_id();
        let mut current = instance;

        // 由内向外套装饰器，排在最前的装饰器成为最外层
        for decorator in self.inner.decorators[index].iter().rev() {
            let description = format!("Invoking decorator '{}' for service '{}'", decorator.id(), service_id);
            current = OperationTracker::run(description, || {
                decorator.apply(current.clone(), resources).map_err(|err| {
                    RegistryError::construction(service_id, err, OperationTracker::snapshot())
                })
            })?;
        }
        Ok(current)
    }

    /// 读取（必要时构建）某服务的配置，结果在注册表生命周期内缓存
    pub(crate) fn configuration<C, F>(&self, index: usize, kind: ContributionKind, build: F) -> Result<Arc<C>>
    where
        C: Any + Send + Sync,
        F: FnOnce(&[Arc<ContributionDef>]) -> Result<C>,
    {
        let service_id = self.inner.catalog.at(index).service_id();
        self.ensure_active(|| format!("read {} configuration of '{}'", kind, service_id))?;

        let cell = self
            .inner
            .configurations
            .entry((index, kind))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let cached = cell.get_or_try_init(|| {
            let description = format!("Building {} configuration for '{}'", kind, service_id);
            OperationTracker::run(description, || build(&self.inner.contributions[index])).map(|value| {
                CachedConfiguration {
                    value: Arc::new(value),
                    type_name: std::any::type_name::<C>(),
                }
            })
        })?;

        cached
            .value
            .clone()
            .downcast::<C>()
            .map_err(|_| RegistryError::ConfigurationTypeMismatch {
                service_id: service_id.to_string(),
                contributor: format!("cached {} configuration", kind),
                expected: std::any::type_name::<C>(),
                actual: cached.type_name,
            })
    }
}

fn downcast_object<I: ?Sized + Send + Sync + 'static>(instance: &ServiceInstance, target: TypeInfo) -> Result<Arc<I>> {
    instance
        .downcast::<I>()
        .ok_or_else(|| RegistryError::ServiceTypeMismatch {
            service_id: format!("<object of type {}>", target),
            expected: target.name(),
            actual: instance.interface().name(),
        })
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.inner.catalog.len())
            .field("started", &self.inner.startup.get().is_some())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// 注册表统计信息
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub total_resolutions: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub constructions: usize,
    pub failures: usize,
    pub realized_singletons: usize,
    pub per_thread_instances: usize,
}

impl RegistryStats {
    /// 单例快速路径命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// 单个服务的活动信息
#[derive(Debug, Clone)]
pub struct ServiceActivity {
    pub service_id: String,
    pub interface: &'static str,
    pub scope: ServiceScope,
    pub status: ActivationStatus,
    pub constructions: usize,
}

/// 内置启动服务：按顺序执行贡献的 [`StartupTask`]
pub struct RegistryStartup {
    tasks: Arc<Vec<StartupTask>>,
}

impl RegistryStartup {
    pub(crate) fn new(tasks: Arc<Vec<StartupTask>>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn run(&self, registry: &Registry) -> Result<()> {
        for (position, task) in self.tasks.iter().enumerate() {
            let description = format!("Running startup task #{}", position + 1);
            OperationTracker::run(description, || {
                task(registry).map_err(|err| {
                    RegistryError::construction(Registry::STARTUP_SERVICE_ID, err, OperationTracker::snapshot())
                })
            })?;
        }
        Ok(())
    }
}
