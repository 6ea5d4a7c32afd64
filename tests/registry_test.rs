//! 注册表运行时的集成测试

#![allow(clippy::uninlined_format_args)]

use ioc_registry::bind;
use ioc_registry::config::RegistryConfig;
use ioc_registry::errors::RegistryError;
use ioc_registry::infrastructure::{
    ActivationStatus, Autobuild, ContributionDef, InjectionContext, Module, ModuleDefinitions, Registry,
    RegistryBuilder, ServiceDef, ServiceLifecycle, ServiceResources, ServiceScope, StartupTask, TypeInfo,
};
use ioc_registry::infrastructure::ServiceInstance;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// 测试用的服务trait
trait Greeter: Send + Sync {
    fn greet(&self, name: &str) -> String;
}

struct EnglishGreeter;

impl Greeter for EnglishGreeter {
    fn greet(&self, name: &str) -> String {
        format!("Hello, {}", name)
    }
}

impl Autobuild for EnglishGreeter {
    fn autobuild(_resources: &ServiceResources) -> anyhow::Result<Self> {
        Ok(EnglishGreeter)
    }
}

struct FrenchGreeter;

impl Greeter for FrenchGreeter {
    fn greet(&self, name: &str) -> String {
        format!("Bonjour, {}", name)
    }
}

impl Autobuild for FrenchGreeter {
    fn autobuild(_resources: &ServiceResources) -> anyhow::Result<Self> {
        Ok(FrenchGreeter)
    }
}

struct French;

trait Counter: Send + Sync {
    fn serial(&self) -> usize;
}

impl std::fmt::Debug for dyn Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Counter")
    }
}

struct Serial(usize);

impl Counter for Serial {
    fn serial(&self) -> usize {
        self.0
    }
}

/// 每次构建都递增计数的服务定义
fn counting(id: &str, built: &Arc<AtomicUsize>) -> ServiceDef {
    let built = built.clone();
    ServiceDef::new::<dyn Counter, _>(id, move |_| {
        let serial = built.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(Serial(serial)) as Arc<dyn Counter>)
    })
}

struct GreetingModule;

impl Module for GreetingModule {
    fn name(&self) -> &str {
        "Greetings"
    }

    fn define(&self, definitions: &mut ModuleDefinitions) {
        definitions
            .service(bind!(dyn Greeter => EnglishGreeter))
            .service(bind!(dyn Greeter => FrenchGreeter, "FrenchGreeter").marker::<French>());
    }
}

#[test]
fn test_bind_uses_interface_name_as_default_id() {
    let registry = RegistryBuilder::new().add_module(GreetingModule).build().unwrap();

    let greeter = registry.get_service::<dyn Greeter>("Greeter").unwrap();
    assert_eq!(greeter.with(|g| g.greet("Fred")).unwrap(), "Hello, Fred");

    let french = registry.get_service::<dyn Greeter>("frenchgreeter").unwrap();
    assert_eq!(french.get().unwrap().greet("Barney"), "Bonjour, Barney");
}

#[test]
fn test_proxy_defers_construction() {
    let built = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .add_service(counting("Counter", &built))
        .build()
        .unwrap();

    let proxy = registry.get_service::<dyn Counter>("Counter").unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert_eq!(proxy.status().unwrap(), ActivationStatus::Unrealized);

    assert_eq!(proxy.get().unwrap().serial(), 1);
    assert_eq!(proxy.status().unwrap(), ActivationStatus::Realized);

    let again = registry.get_service::<dyn Counter>("Counter").unwrap();
    assert!(proxy.ptr_eq(&again));
    assert_eq!(again.get().unwrap().serial(), 1);
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_first_use_builds_once() {
    let built = Arc::new(AtomicUsize::new(0));
    let slow = {
        let built = built.clone();
        ServiceDef::new::<dyn Counter, _>("Slow", move |_| {
            thread::sleep(Duration::from_millis(20));
            let serial = built.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Arc::new(Serial(serial)) as Arc<dyn Counter>)
        })
    };
    let registry = RegistryBuilder::new().add_service(slow).build().unwrap();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.get_service::<dyn Counter>("Slow").unwrap().get().unwrap()
            })
        })
        .collect();

    let instances: Vec<Arc<dyn Counter>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(built.load(Ordering::SeqCst), 1);
    let first = Arc::as_ptr(&instances[0]) as *const ();
    assert!(instances.iter().all(|i| Arc::as_ptr(i) as *const () == first));
    assert_eq!(registry.stats().constructions, 1);
}

#[test]
fn test_registry_and_proxies_are_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Registry>();
    assert_send_sync::<ioc_registry::ServiceProxy<dyn Counter>>();
}

#[test]
fn test_concurrent_first_use_of_failing_service_fails_once() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let broken = {
        let attempts = attempts.clone();
        ServiceDef::new::<dyn Counter, _>("Flaky", move |_| -> anyhow::Result<Arc<dyn Counter>> {
            thread::sleep(Duration::from_millis(20));
            attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("disk full")
        })
    };
    let registry = RegistryBuilder::new().add_service(broken).build().unwrap();
    let proxy = registry.get_service::<dyn Counter>("Flaky").unwrap();

    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));
    let messages: Vec<String> = (0..threads)
        .map(|_| {
            let proxy = proxy.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                proxy.get().unwrap_err().to_string()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(messages.iter().all(|m| m.contains("disk full") && *m == messages[0]));
    assert_eq!(registry.service_status("Flaky").unwrap(), ActivationStatus::Failed);
}

#[test]
fn test_per_thread_instances() {
    let built = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .add_service(counting("Session", &built).scope(ServiceScope::PerThread))
        .build()
        .unwrap();

    let proxy = registry.get_service::<dyn Counter>("Session").unwrap();
    let main_serial = proxy.get().unwrap().serial();
    assert_eq!(proxy.get().unwrap().serial(), main_serial);

    let other_serial = {
        let proxy = proxy.clone();
        thread::spawn(move || proxy.get().unwrap().serial()).join().unwrap()
    };
    assert_ne!(main_serial, other_serial);
    assert_eq!(built.load(Ordering::SeqCst), 2);

    let notified = Arc::new(AtomicUsize::new(0));
    {
        let notified = notified.clone();
        registry
            .add_thread_cleanup_listener(move || {
                notified.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    registry.cleanup_thread();
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    let fresh = proxy.get().unwrap().serial();
    assert_ne!(fresh, main_serial);
    assert_eq!(built.load(Ordering::SeqCst), 3);
}

struct Released(Arc<AtomicUsize>);

impl Counter for Released {
    fn serial(&self) -> usize {
        0
    }
}

impl Drop for Released {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_per_thread_instances_released_when_threads_exit() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let session = {
        let dropped = dropped.clone();
        ServiceDef::new::<dyn Counter, _>("Session", move |_| {
            Ok(Arc::new(Released(dropped.clone())) as Arc<dyn Counter>)
        })
        .scope(ServiceScope::PerThread)
    };
    let registry = RegistryBuilder::new().add_service(session).build().unwrap();

    for _ in 0..100 {
        let registry = registry.clone();
        thread::spawn(move || {
            let proxy = registry.get_service::<dyn Counter>("Session").unwrap();
            proxy.get().unwrap();
            assert_eq!(registry.stats().per_thread_instances, 1);
        })
        .join()
        .unwrap();
    }

    assert_eq!(registry.stats().per_thread_instances, 0);
    assert_eq!(dropped.load(Ordering::SeqCst), 100);
}

#[test]
fn test_transient_scope_builds_every_time() {
    let built = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .add_service(counting("Ticket", &built).scope(ServiceScope::custom("transient")))
        .build()
        .unwrap();

    let proxy = registry.get_service::<dyn Counter>("Ticket").unwrap();
    assert_eq!(proxy.get().unwrap().serial(), 1);
    assert_eq!(proxy.get().unwrap().serial(), 2);
}

/// 同一个键复用实例的自定义作用域
struct PooledLifecycle {
    pool: Mutex<Option<ServiceInstance>>,
}

impl ServiceLifecycle for PooledLifecycle {
    fn instance(
        &self,
        _service_id: &str,
        create: &dyn Fn() -> ioc_registry::Result<ServiceInstance>,
    ) -> ioc_registry::Result<ServiceInstance> {
        let mut pool = self.pool.lock();
        if let Some(instance) = pool.as_ref() {
            return Ok(instance.clone());
        }
        let instance = create()?;
        *pool = Some(instance.clone());
        Ok(instance)
    }
}

#[test]
fn test_custom_lifecycle_controls_instances() {
    let built = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .add_lifecycle("Pooled", PooledLifecycle { pool: Mutex::new(None) })
        .add_service(counting("Pooled", &built).scope(ServiceScope::custom("pooled")))
        .build()
        .unwrap();

    let proxy = registry.get_service::<dyn Counter>("Pooled").unwrap();
    proxy.get().unwrap();
    proxy.get().unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn test_construction_failure_is_cached() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let broken = {
        let attempts = attempts.clone();
        ServiceDef::new::<dyn Counter, _>("Broken", move |_| -> anyhow::Result<Arc<dyn Counter>> {
            attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("database unavailable")
        })
    };
    let registry = RegistryBuilder::new().add_service(broken).build().unwrap();
    let proxy = registry.get_service::<dyn Counter>("Broken").unwrap();

    let first = proxy.get().unwrap_err();
    let second = proxy.get().unwrap_err();
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(proxy.status().unwrap(), ActivationStatus::Failed);

    for err in [first, second] {
        assert!(matches!(err, RegistryError::Construction { ref service_id, .. } if service_id == "Broken"));
        let message = err.to_string();
        assert!(message.contains("database unavailable"));
        assert!(message.contains("Realizing service 'Broken'"));
    }
}

#[test]
fn test_dependency_failure_trace_names_both_services() {
    let registry = RegistryBuilder::new()
        .add_service(ServiceDef::new::<dyn Counter, _>(
            "Inner",
            |_| -> anyhow::Result<Arc<dyn Counter>> { anyhow::bail!("inner exploded") },
        ))
        .add_service(ServiceDef::new::<dyn Counter, _>("Outer", |resources| {
            let inner = resources.get_service::<dyn Counter>("Inner")?.get()?;
            Ok(Arc::new(Serial(inner.serial() + 1)) as Arc<dyn Counter>)
        }))
        .build()
        .unwrap();

    let err = registry.get_service::<dyn Counter>("Outer").unwrap().get().unwrap_err();
    match err {
        RegistryError::Construction { service_id, trace, .. } => {
            assert_eq!(service_id, "Outer");
            assert_eq!(
                trace,
                vec![
                    "Realizing service 'Outer'".to_string(),
                    "Realizing service 'Inner'".to_string()
                ]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_recursive_construction_is_detected() {
    let registry = RegistryBuilder::new()
        .add_service(ServiceDef::new::<dyn Counter, _>("Chicken", |resources| {
            let egg = resources.get_service::<dyn Counter>("Egg")?.get()?;
            Ok(Arc::new(Serial(egg.serial())) as Arc<dyn Counter>)
        }))
        .add_service(ServiceDef::new::<dyn Counter, _>("Egg", |resources| {
            let chicken = resources.get_service::<dyn Counter>("Chicken")?.get()?;
            Ok(Arc::new(Serial(chicken.serial())) as Arc<dyn Counter>)
        }))
        .build()
        .unwrap();

    let err = registry.get_service::<dyn Counter>("Chicken").unwrap().get().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("is recursive"), "{}", message);
    assert!(message.contains("Chicken -> Egg -> Chicken"), "{}", message);
}

#[test]
fn test_wrong_interface_is_rejected() {
    let registry = RegistryBuilder::new().add_module(GreetingModule).build().unwrap();
    let err = registry.get_service::<dyn Counter>("Greeter").unwrap_err();
    assert!(matches!(err, RegistryError::ServiceTypeMismatch { .. }));
}

#[test]
fn test_get_service_by_type() {
    let built = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .add_module(GreetingModule)
        .add_service(counting("Counter", &built))
        .build()
        .unwrap();

    assert_eq!(
        registry.get_service_by_type::<dyn Counter>().unwrap().service_id(),
        "Counter"
    );
    assert!(matches!(
        registry.get_service_by_type::<dyn Greeter>(),
        Err(RegistryError::AmbiguousService { .. })
    ));
}

#[test]
fn test_object_providers() {
    let mut config = RegistryConfig::default();
    config.symbols.insert("app.name".to_string(), "Bedrock".to_string());

    let registry = RegistryBuilder::new()
        .with_config(config)
        .add_module(GreetingModule)
        .build()
        .unwrap();

    let by_id: Arc<dyn Greeter> = registry
        .get_object(&InjectionContext::new().service_id("Greeter"))
        .unwrap();
    assert_eq!(by_id.greet("Wilma"), "Hello, Wilma");

    let by_marker: Arc<dyn Greeter> = registry
        .get_object(&InjectionContext::new().marker::<French>())
        .unwrap();
    assert_eq!(by_marker.greet("Wilma"), "Bonjour, Wilma");

    let name: Arc<String> = registry
        .get_object(&InjectionContext::new().symbol("${app.name} Quarry"))
        .unwrap();
    assert_eq!(name.as_str(), "Bedrock Quarry");

    // 两个实现且没有任何提示：必须报歧义
    assert!(matches!(
        registry.get_object::<dyn Greeter>(&InjectionContext::new()),
        Err(RegistryError::AmbiguousService { .. })
    ));
    assert!(registry
        .find_object::<dyn Counter>(&InjectionContext::new())
        .unwrap()
        .is_none());
}

#[test]
fn test_contributed_object_provider_runs_first() {
    struct FixedCounter;

    impl ioc_registry::infrastructure::ObjectProvider for FixedCounter {
        fn provide(
            &self,
            target: TypeInfo,
            _context: &InjectionContext,
            _registry: &Registry,
        ) -> ioc_registry::Result<Option<ServiceInstance>> {
            if target != TypeInfo::of::<dyn Counter>() {
                return Ok(None);
            }
            Ok(Some(ServiceInstance::new(Arc::new(Serial(42)) as Arc<dyn Counter>)))
        }
    }

    let registry = RegistryBuilder::new()
        .add_contribution(ContributionDef::ordered(
            "FixedProviders",
            Registry::MASTER_OBJECT_PROVIDER_ID,
            |config, _| {
                let provider: Arc<dyn ioc_registry::infrastructure::ObjectProvider> = Arc::new(FixedCounter);
                config.add("Fixed", provider, &["before:*"])?;
                Ok(())
            },
        ))
        .build()
        .unwrap();

    let counter: Arc<dyn Counter> = registry.get_object(&InjectionContext::new()).unwrap();
    assert_eq!(counter.serial(), 42);
}

#[test]
fn test_startup_runs_eager_services_then_tasks_in_order() {
    let built = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));

    let tasks = {
        let log = log.clone();
        ContributionDef::ordered("StartupTasks", Registry::STARTUP_SERVICE_ID, move |config, _| {
            let second = {
                let log = log.clone();
                Arc::new(move |_: &Registry| -> anyhow::Result<()> {
                    log.lock().push("second");
                    Ok(())
                }) as StartupTask
            };
            let first = {
                let log = log.clone();
                Arc::new(move |registry: &Registry| -> anyhow::Result<()> {
                    assert_eq!(registry.service_status("Eager")?, ActivationStatus::Realized);
                    log.lock().push("first");
                    Ok(())
                }) as StartupTask
            };
            config.add("Second", second, &["after:First"])?;
            config.add("First", first, &[])?;
            Ok(())
        })
    };

    let registry = RegistryBuilder::new()
        .add_service(counting("Eager", &built).eager_load(true))
        .add_service(counting("Lazy", &Arc::new(AtomicUsize::new(0))))
        .add_contribution(tasks)
        .build()
        .unwrap();

    registry.perform_startup().unwrap();
    registry.perform_startup().unwrap();

    assert_eq!(*log.lock(), vec!["first", "second"]);
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(registry.service_status("Lazy").unwrap(), ActivationStatus::Unrealized);
}

#[test]
fn test_failed_startup_is_reported_on_every_call() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let bad = {
        let attempts = attempts.clone();
        ServiceDef::new::<dyn Counter, _>("Bad", move |_| -> anyhow::Result<Arc<dyn Counter>> {
            attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("missing credentials")
        })
        .eager_load(true)
    };
    let registry = RegistryBuilder::new().add_service(bad).build().unwrap();

    let first = registry.perform_startup().unwrap_err();
    let second = registry.perform_startup().unwrap_err();

    assert!(first.to_string().contains("missing credentials"));
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_startup_task_may_request_startup_again() {
    let nested = Arc::new(Mutex::new(None));
    let tasks = {
        let nested = nested.clone();
        ContributionDef::ordered("Reentrant", Registry::STARTUP_SERVICE_ID, move |config, _| {
            let nested = nested.clone();
            let task = Arc::new(move |registry: &Registry| -> anyhow::Result<()> {
                *nested.lock() = Some(registry.perform_startup().is_ok());
                Ok(())
            }) as StartupTask;
            config.add("Reenter", task, &[])?;
            Ok(())
        })
    };
    let registry = RegistryBuilder::new().add_contribution(tasks).build().unwrap();

    registry.perform_startup().unwrap();
    assert_eq!(*nested.lock(), Some(true));
}

#[test]
fn test_eager_load_can_be_disabled() {
    let built = Arc::new(AtomicUsize::new(0));
    let config = RegistryConfig {
        eager_load: false,
        ..RegistryConfig::default()
    };
    let registry = RegistryBuilder::new()
        .with_config(config)
        .add_service(counting("Eager", &built).eager_load(true))
        .build()
        .unwrap();

    registry.perform_startup().unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 0);
}

#[test]
fn test_shutdown_listeners_run_in_reverse_then_registry_is_closed() {
    let built = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .add_service(counting("Counter", &built))
        .build()
        .unwrap();
    let proxy = registry.get_service::<dyn Counter>("Counter").unwrap();
    proxy.get().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let order = order.clone();
        let registry_in_listener = registry.clone();
        registry
            .add_registry_shutdown_listener(move || {
                // 监听器里仍然可以使用服务
                let serial = registry_in_listener
                    .get_service::<dyn Counter>("Counter")
                    .and_then(|p| p.get())
                    .map(|c| c.serial())
                    .unwrap_or(0);
                order.lock().push((name, serial));
            })
            .unwrap();
    }

    registry.shutdown();
    registry.shutdown();

    assert_eq!(*order.lock(), vec![("third", 1), ("second", 1), ("first", 1)]);
    assert!(registry.is_shut_down());

    assert!(matches!(
        registry.get_service::<dyn Counter>("Counter"),
        Err(RegistryError::UseAfterShutdown { .. })
    ));
    assert!(matches!(proxy.get(), Err(RegistryError::UseAfterShutdown { .. })));
    assert!(matches!(
        registry.add_registry_shutdown_listener(|| {}),
        Err(RegistryError::UseAfterShutdown { .. })
    ));
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn test_proxy_outliving_registry() {
    let built = Arc::new(AtomicUsize::new(0));
    let proxy = {
        let registry = RegistryBuilder::new()
            .add_service(counting("Counter", &built))
            .build()
            .unwrap();
        registry.get_service::<dyn Counter>("Counter").unwrap()
    };

    assert!(matches!(proxy.get(), Err(RegistryError::UseAfterShutdown { .. })));
}

#[test]
fn test_service_activity_report() {
    let built = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .add_service(counting("Zeta", &built))
        .add_service(counting("alpha", &built))
        .build()
        .unwrap();
    registry.get_service::<dyn Counter>("Zeta").unwrap().get().unwrap();

    let activity = registry.service_activity();
    let ids: Vec<&str> = activity.iter().map(|a| a.service_id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "MasterObjectProvider", "RegistryStartup", "Zeta"]);

    let zeta = activity.iter().find(|a| a.service_id == "Zeta").unwrap();
    assert_eq!(zeta.status, ActivationStatus::Realized);
    assert_eq!(zeta.constructions, 1);
    let alpha = activity.iter().find(|a| a.service_id == "alpha").unwrap();
    assert_eq!(alpha.status, ActivationStatus::Unrealized);
}

#[test]
fn test_unknown_service_lists_alternatives() {
    let registry = RegistryBuilder::new().add_module(GreetingModule).build().unwrap();
    let err = registry.get_service::<dyn Greeter>("Wilma").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'Wilma'"));
    assert!(message.contains("FrenchGreeter"));
}
