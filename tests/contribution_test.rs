//! 配置贡献、装饰器与排序引擎的集成测试

#![allow(clippy::uninlined_format_args)]

use ioc_registry::errors::RegistryError;
use ioc_registry::infrastructure::{
    Constraint, ContributionDef, DecoratorDef, Module, ModuleDefinitions, Orderer, RegistryBuilder, ServiceDef,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

trait Runnable: Send + Sync {
    fn run(&self) -> String;
}

impl std::fmt::Debug for dyn Runnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Runnable")
    }
}

struct Named(&'static str);

impl Runnable for Named {
    fn run(&self) -> String {
        self.0.to_string()
    }
}

trait Tally: Send + Sync {
    fn increment(&self) -> usize;
}

struct AtomicTally(AtomicUsize);

impl Tally for AtomicTally {
    fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// 把 `Vec<Arc<dyn Runnable>>` 配置暴露为服务
#[derive(Debug)]
struct RunnerList(Vec<String>);

#[test]
fn test_unordered_configuration_survives_wrong_type() {
    let registry = RegistryBuilder::new()
        .add_service(ServiceDef::new::<RunnerList, _>("Runners", |resources| {
            let runners = resources.unordered_configuration::<Arc<dyn Runnable>>()?;
            let mut names: Vec<String> = runners.iter().map(|r| r.run()).collect();
            names.sort();
            Ok(Arc::new(RunnerList(names)))
        }))
        .add_contribution(ContributionDef::unordered("Good", "Runners", |config, _| {
            config
                .add(Arc::new(Named("alpha")) as Arc<dyn Runnable>)
                .add(Arc::new(Named("beta")) as Arc<dyn Runnable>);
            Ok(())
        }))
        .add_contribution(ContributionDef::unordered("Bad", "Runners", |config, _| {
            config.add("not a runnable".to_string());
            Ok(())
        }))
        .build()
        .unwrap();

    let runners = registry.get_service::<RunnerList>("Runners").unwrap().get().unwrap();
    assert_eq!(runners.0, vec!["alpha", "beta"]);
}

#[test]
fn test_ordered_configuration_wildcards() {
    let registry = RegistryBuilder::new()
        .add_service(ServiceDef::new::<RunnerList, _>("Pipeline", |resources| {
            let stages = resources.ordered_configuration::<&'static str>()?;
            Ok(Arc::new(RunnerList(stages.iter().map(|s| s.to_string()).collect())))
        }))
        .add_contribution(ContributionDef::ordered("Late", "Pipeline", |config, _| {
            config.add("Last", "last", &["after:*"])?;
            config.add("Middle", "middle", &[])?;
            Ok(())
        }))
        .add_contribution(ContributionDef::ordered("Early", "Pipeline", |config, _| {
            config.add("First", "first", &["before:*"])?;
            Ok(())
        }))
        .build()
        .unwrap();

    let pipeline = registry.get_service::<RunnerList>("Pipeline").unwrap().get().unwrap();
    assert_eq!(pipeline.0, vec!["first", "middle", "last"]);
}

#[test]
fn test_duplicate_ordered_id_fails_construction() {
    let registry = RegistryBuilder::new()
        .add_service(ServiceDef::new::<RunnerList, _>("Pipeline", |resources| {
            let stages = resources.ordered_configuration::<&'static str>()?;
            Ok(Arc::new(RunnerList(stages.iter().map(|s| s.to_string()).collect())))
        }))
        .add_contribution(ContributionDef::ordered("One", "Pipeline", |config, _| {
            config.add("Gzip", "gzip", &[])?;
            Ok(())
        }))
        .add_contribution(ContributionDef::ordered("Two", "Pipeline", |config, _| {
            config.add("gzip", "gzip again", &[])?;
            Ok(())
        }))
        .build()
        .unwrap();

    let err = registry.get_service::<RunnerList>("Pipeline").unwrap().get().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'gzip'"), "{}", message);
    assert!(message.contains("Invoking contribution 'Two' to service 'Pipeline'"), "{}", message);
}

#[derive(Debug)]
struct Settings(HashMap<String, u32>);

fn settings_service() -> ServiceDef {
    ServiceDef::new::<Settings, _>("Settings", |resources| {
        let map = resources.mapped_configuration::<String, u32>()?;
        Ok(Arc::new(Settings((*map).clone())))
    })
}

#[test]
fn test_mapped_configuration_overrides() {
    let registry = RegistryBuilder::new()
        .add_service(settings_service())
        .add_contribution(ContributionDef::mapped("Defaults", "Settings", |config, _| {
            config.add("timeout".to_string(), 30u32)?;
            config.add("retries".to_string(), 3u32)?;
            Ok(())
        }))
        .add_contribution(ContributionDef::mapped("Tuning", "Settings", |config, _| {
            config.override_value("timeout".to_string(), 60u32, &[])?;
            Ok(())
        }))
        .add_contribution(ContributionDef::mapped("Site", "Settings", |config, _| {
            config.override_value("timeout".to_string(), 90u32, &["after:Tuning"])?;
            Ok(())
        }))
        .build()
        .unwrap();

    let settings = registry.get_service::<Settings>("Settings").unwrap().get().unwrap();
    assert_eq!(settings.0.get("timeout"), Some(&90));
    assert_eq!(settings.0.get("retries"), Some(&3));
}

#[test]
fn test_mapped_duplicate_key_requires_override() {
    let registry = RegistryBuilder::new()
        .add_service(settings_service())
        .add_contribution(ContributionDef::mapped("Defaults", "Settings", |config, _| {
            config.add("timeout".to_string(), 30u32)?;
            Ok(())
        }))
        .add_contribution(ContributionDef::mapped("Clash", "Settings", |config, _| {
            config.add("timeout".to_string(), 45u32)?;
            Ok(())
        }))
        .build()
        .unwrap();

    let err = registry.get_service::<Settings>("Settings").unwrap().get().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("duplicates key"), "{}", message);
    assert!(message.contains("Defaults"), "{}", message);
}

#[test]
fn test_configuration_is_built_once() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let contribution = {
        let invoked = invoked.clone();
        ContributionDef::unordered("Counted", "Runners", move |config, _| {
            invoked.fetch_add(1, Ordering::SeqCst);
            config.add(Arc::new(Named("only")) as Arc<dyn Runnable>);
            Ok(())
        })
    };
    let registry = RegistryBuilder::new()
        .add_service(
            ServiceDef::new::<RunnerList, _>("Runners", |resources| {
                let first = resources.unordered_configuration::<Arc<dyn Runnable>>()?;
                let second = resources.unordered_configuration::<Arc<dyn Runnable>>()?;
                assert!(Arc::ptr_eq(&first, &second));
                Ok(Arc::new(RunnerList(first.iter().map(|r| r.run()).collect())))
            })
            .scope(ioc_registry::ServiceScope::custom("transient")),
        )
        .add_contribution(contribution)
        .build()
        .unwrap();

    let proxy = registry.get_service::<RunnerList>("Runners").unwrap();
    proxy.get().unwrap();
    proxy.get().unwrap();
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

/// Fred 提供计数器，Barney 是被 LogBarney 装饰的同一类服务
struct Flintstones {
    logged: Arc<AtomicUsize>,
}

impl Module for Flintstones {
    fn name(&self) -> &str {
        "Flintstones"
    }

    fn define(&self, definitions: &mut ModuleDefinitions) {
        let logged = self.logged.clone();
        definitions
            .service(ServiceDef::new::<dyn Tally, _>("Fred", |_| {
                Ok(Arc::new(AtomicTally(AtomicUsize::new(0))) as Arc<dyn Tally>)
            }))
            .service(ServiceDef::new::<dyn Tally, _>("Barney", |_| {
                Ok(Arc::new(AtomicTally(AtomicUsize::new(0))) as Arc<dyn Tally>)
            }))
            .decorate(DecoratorDef::new::<dyn Tally, _>(
                "LogBarney",
                "Barney",
                move |delegate, _| {
                    Ok(Arc::new(LoggingTally {
                        delegate,
                        logged: logged.clone(),
                    }) as Arc<dyn Tally>)
                },
            ));
    }
}

struct LoggingTally {
    delegate: Arc<dyn Tally>,
    logged: Arc<AtomicUsize>,
}

impl Tally for LoggingTally {
    fn increment(&self) -> usize {
        self.logged.fetch_add(1, Ordering::SeqCst);
        self.delegate.increment()
    }
}

#[test]
fn test_fred_and_barney() {
    let logged = Arc::new(AtomicUsize::new(0));
    let registry = RegistryBuilder::new()
        .add_module(Flintstones { logged: logged.clone() })
        .build()
        .unwrap();

    let first = registry.get_service::<dyn Tally>("Barney").unwrap();
    let second = registry.get_service::<dyn Tally>("Barney").unwrap();
    assert!(first.ptr_eq(&second));

    assert_eq!(first.get().unwrap().increment(), 1);
    assert_eq!(second.get().unwrap().increment(), 2);
    assert_eq!(logged.load(Ordering::SeqCst), 2);

    let fred = registry.get_service::<dyn Tally>("Fred").unwrap();
    assert_eq!(fred.get().unwrap().increment(), 1);
    assert_eq!(logged.load(Ordering::SeqCst), 2);
}

struct Recording {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    delegate: Arc<dyn Runnable>,
}

impl Runnable for Recording {
    fn run(&self) -> String {
        self.log.lock().push(format!("pre {}", self.name));
        let result = self.delegate.run();
        self.log.lock().push(format!("post {}", self.name));
        result
    }
}

fn recording(name: &'static str, log: &Arc<Mutex<Vec<String>>>, constraints: &[&str]) -> DecoratorDef {
    let log = log.clone();
    DecoratorDef::new::<dyn Runnable, _>(name, "*Job", move |delegate, _| {
        Ok(Arc::new(Recording {
            name,
            log: log.clone(),
            delegate,
        }) as Arc<dyn Runnable>)
    })
    .constraints(constraints.iter().copied())
}

#[test]
fn test_decorator_order_and_advice_nesting() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = RegistryBuilder::new()
        .add_service(ServiceDef::new::<dyn Runnable, _>("NightlyJob", |_| {
            Ok(Arc::new(Named("nightly")) as Arc<dyn Runnable>)
        }))
        .add_decorator(recording("C", &log, &["after:B"]))
        .add_decorator(recording("A", &log, &["before:B"]))
        .add_decorator(recording("B", &log, &[]))
        .build()
        .unwrap();

    let job = registry.get_service::<dyn Runnable>("nightlyjob").unwrap().get().unwrap();
    assert_eq!(job.run(), "nightly");
    assert_eq!(
        *log.lock(),
        vec!["pre A", "pre B", "pre C", "post C", "post B", "post A"]
    );
}

#[test]
fn test_failing_decorator_reports_its_id() {
    let registry = RegistryBuilder::new()
        .add_service(ServiceDef::new::<dyn Runnable, _>("NightlyJob", |_| {
            Ok(Arc::new(Named("nightly")) as Arc<dyn Runnable>)
        }))
        .add_decorator(DecoratorDef::new::<dyn Runnable, _>(
            "Broken",
            "NightlyJob",
            |_, _| -> anyhow::Result<Arc<dyn Runnable>> { anyhow::bail!("no license") },
        ))
        .build()
        .unwrap();

    let err = registry.get_service::<dyn Runnable>("NightlyJob").unwrap().get().unwrap_err();
    assert!(matches!(err, RegistryError::Construction { .. }));
    let message = err.to_string();
    assert!(message.contains("Invoking decorator 'Broken' for service 'NightlyJob'"), "{}", message);
    assert!(message.contains("no license"), "{}", message);
}

#[test]
fn test_random_acyclic_constraints_are_respected() {
    let mut rng = StdRng::seed_from_u64(0x10c);

    for _round in 0..50 {
        let count = rng.gen_range(2..20);
        let ids: Vec<String> = (0..count).map(|i| format!("item{}", i)).collect();

        // 只允许 i 依赖更小的 j，保证无环
        let mut edges: Vec<(usize, usize)> = Vec::new();
        let mut constraints: Vec<Vec<Constraint>> = vec![Vec::new(); count];
        for i in 1..count {
            for j in 0..i {
                if rng.gen_bool(0.25) {
                    edges.push((j, i));
                    if rng.gen_bool(0.5) {
                        constraints[i].push(Constraint::after(ids[j].clone()));
                    } else {
                        constraints[j].push(Constraint::before(ids[i].clone()));
                    }
                }
            }
        }

        let mut insertion: Vec<usize> = (0..count).collect();
        insertion.shuffle(&mut rng);

        let mut orderer = Orderer::new("random round");
        for &i in &insertion {
            orderer.add(ids[i].clone(), i, constraints[i].clone()).unwrap();
        }
        let ordered = orderer.order();

        assert_eq!(ordered.len(), count);
        let position: HashMap<usize, usize> = ordered.iter().enumerate().map(|(p, &i)| (i, p)).collect();
        for (before, after) in edges {
            assert!(
                position[&before] < position[&after],
                "{} should precede {} in {:?}",
                ids[before],
                ids[after],
                ordered
            );
        }
    }
}

#[test]
fn test_cycles_degrade_to_complete_permutation() {
    let mut orderer = Orderer::new("cyclic");
    orderer.add("a", 'a', Constraint::parse("before:b").unwrap()).unwrap();
    orderer.add("b", 'b', Constraint::parse("before:c").unwrap()).unwrap();
    orderer.add("c", 'c', Constraint::parse("before:a").unwrap()).unwrap();
    orderer.add("d", 'd', Vec::new()).unwrap();

    let ordered = orderer.order();
    let unique: HashSet<char> = ordered.iter().copied().collect();
    assert_eq!(ordered.len(), 4);
    assert_eq!(unique.len(), 4);
}

#[test]
fn test_ordering_is_deterministic() {
    let build = || {
        let mut orderer = Orderer::new("stable");
        orderer.add("x", 1, Constraint::parse("after:*").unwrap()).unwrap();
        orderer.add("y", 2, Vec::new()).unwrap();
        orderer.add("z", 3, Constraint::parse("before:y").unwrap()).unwrap();
        orderer.add("w", 4, Constraint::parse("before:*").unwrap()).unwrap();
        orderer.order()
    };

    let first = build();
    assert_eq!(first, build());
    assert_eq!(first.first(), Some(&4));
    assert_eq!(first.last(), Some(&1));
}
