//! 注册表构建
//!
//! 构建顺序：符号源 -> 模块依赖检查 -> 服务 id 展开与登记 -> 作用域校验
//! -> 贡献分组 -> 装饰器匹配与排序。任何一步失败都不会产生注册表。

use super::lifecycle::{ServiceLifecycle, TransientLifecycle};
use super::registry::{Registry, RegistryParts, RegistryStartup, StartupTask};
use super::ServiceScope;
use crate::config::RegistryConfig;
use crate::errors::{RegistryError, Result};
use crate::infrastructure::advice::DecoratorDef;
use crate::infrastructure::catalog::{ServiceCatalog, ServiceDef};
use crate::infrastructure::configuration::ContributionDef;
use crate::infrastructure::module::{Module, ModuleDefinitions};
use crate::infrastructure::ordering::{glob_matches, Constraint, Orderer};
use crate::infrastructure::provider::{
    MarkerObjectProvider, MasterObjectProvider, ObjectProvider, ServiceIdObjectProvider, SymbolObjectProvider,
};
use crate::infrastructure::symbols::{EnvSymbolProvider, MapSymbolProvider, SymbolProvider, SymbolSource};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// 注册表内置服务
struct CoreModule;

impl Module for CoreModule {
    fn name(&self) -> &str {
        "RegistryCore"
    }

    fn define(&self, definitions: &mut ModuleDefinitions) {
        definitions
            .service(ServiceDef::new::<RegistryStartup, _>(Registry::STARTUP_SERVICE_ID, |resources| {
                let tasks = resources.ordered_configuration::<StartupTask>()?;
                Ok(Arc::new(RegistryStartup::new(tasks)))
            }))
            .service(ServiceDef::new::<MasterObjectProvider, _>(
                Registry::MASTER_OBJECT_PROVIDER_ID,
                |resources| {
                    let providers = resources.ordered_configuration::<Arc<dyn ObjectProvider>>()?;
                    Ok(Arc::new(MasterObjectProvider::new(providers)))
                },
            ))
            .contribute(ContributionDef::ordered(
                "CoreObjectProviders",
                Registry::MASTER_OBJECT_PROVIDER_ID,
                |config, _| {
                    config.add("ServiceId", Arc::new(ServiceIdObjectProvider) as Arc<dyn ObjectProvider>, &[])?;
                    config.add("Marker", Arc::new(MarkerObjectProvider) as Arc<dyn ObjectProvider>, &[])?;
                    config.add("Symbol", Arc::new(SymbolObjectProvider) as Arc<dyn ObjectProvider>, &[])?;
                    Ok(())
                },
            ));
    }
}

/// 注册表构建器
#[derive(Default)]
pub struct RegistryBuilder {
    config: RegistryConfig,
    modules: Vec<Arc<dyn Module>>,
    extra: ModuleDefinitions,
    lifecycles: Vec<(String, Arc<dyn ServiceLifecycle>)>,
    symbol_providers: Vec<Arc<dyn SymbolProvider>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn add_module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    pub fn add_service(mut self, def: ServiceDef) -> Self {
        self.extra.service(def);
        self
    }

    pub fn add_contribution(mut self, def: ContributionDef) -> Self {
        self.extra.contribute(def);
        self
    }

    pub fn add_decorator(mut self, def: DecoratorDef) -> Self {
        self.extra.decorate(def);
        self
    }

    /// 注册自定义作用域，名称大小写不敏感
    pub fn add_lifecycle(mut self, name: impl Into<String>, lifecycle: impl ServiceLifecycle + 'static) -> Self {
        self.lifecycles.push((name.into(), Arc::new(lifecycle)));
        self
    }

    /// 追加符号提供者，优先级低于配置文件与环境变量
    pub fn add_symbol_provider(mut self, provider: impl SymbolProvider + 'static) -> Self {
        self.symbol_providers.push(Arc::new(provider));
        self
    }

    pub fn build(self) -> Result<Registry> {
        let RegistryBuilder {
            config,
            modules,
            extra,
            lifecycles,
            symbol_providers,
        } = self;

        let mut providers: Vec<Arc<dyn SymbolProvider>> = vec![
            Arc::new(MapSymbolProvider::new(config.symbols.iter())) as Arc<dyn SymbolProvider>,
            Arc::new(EnvSymbolProvider::default()) as Arc<dyn SymbolProvider>,
        ];
        providers.extend(symbol_providers);
        let symbols = Arc::new(SymbolSource::new(providers));

        let mut all_modules: Vec<Arc<dyn Module>> = vec![Arc::new(CoreModule) as Arc<dyn Module>];
        all_modules.extend(modules);
        let definitions = collect_definitions(&all_modules, extra)?;
        let (services, contributions, decorators) = definitions.into_parts();

        let mut catalog = ServiceCatalog::new();
        for def in services {
            let service_id = symbols.expand(def.service_id())?;
            catalog.register(def.with_service_id(service_id))?;
        }

        let mut lifecycle_map: HashMap<String, Arc<dyn ServiceLifecycle>> = HashMap::new();
        lifecycle_map.insert(TransientLifecycle::NAME.to_string(), Arc::new(TransientLifecycle));
        for (name, lifecycle) in lifecycles {
            lifecycle_map.insert(name.to_lowercase(), lifecycle);
        }
        for def in catalog.iter() {
            if let ServiceScope::Custom(name) = def.service_scope() {
                if !lifecycle_map.contains_key(&name.to_lowercase()) {
                    return Err(RegistryError::UnknownScope {
                        service_id: def.service_id().to_string(),
                        scope: name.clone(),
                    });
                }
            }
        }

        let mut grouped_contributions: Vec<Vec<Arc<ContributionDef>>> = vec![Vec::new(); catalog.len()];
        let contribution_count = contributions.len();
        for def in contributions {
            let target = symbols.expand(def.target())?;
            let position = catalog
                .position(&target)
                .ok_or_else(|| RegistryError::UnknownService {
                    service_id: target.clone(),
                    available: catalog.service_ids(),
                })?;
            grouped_contributions[position].push(Arc::new(def.with_target(target)));
        }

        let ordered_decorators = bind_decorators(&catalog, &symbols, decorators)?;
        let decorator_count: usize = ordered_decorators.iter().map(Vec::len).sum();

        tracing::info!(
            modules = all_modules.len(),
            services = catalog.len(),
            contributions = contribution_count,
            decorators = decorator_count,
            "Registry built"
        );

        Ok(Registry::from_parts(RegistryParts {
            catalog,
            contributions: grouped_contributions,
            decorators: ordered_decorators,
            lifecycles: lifecycle_map,
            symbols,
            config,
        }))
    }
}

fn collect_definitions(modules: &[Arc<dyn Module>], extra: ModuleDefinitions) -> Result<ModuleDefinitions> {
    let enabled: Vec<&Arc<dyn Module>> = modules.iter().filter(|m| m.is_enabled()).collect();
    let names: HashSet<String> = enabled.iter().map(|m| m.name().to_lowercase()).collect();

    for module in &enabled {
        for dependency in module.dependencies() {
            if !names.contains(&dependency.to_lowercase()) {
                return Err(RegistryError::MissingModuleDependency {
                    module: module.name().to_string(),
                    dependency: dependency.to_string(),
                });
            }
        }
    }

    let mut definitions = ModuleDefinitions::new();
    for module in modules {
        if !module.is_enabled() {
            tracing::debug!(module = %module.name(), "Skipping disabled module");
            continue;
        }
        let mut own = ModuleDefinitions::new();
        module.define(&mut own);
        tracing::debug!(
            module = %module.name(),
            services = own.services().len(),
            contributions = own.contributions().len(),
            decorators = own.decorators().len(),
            "Collected module definitions"
        );
        merge(&mut definitions, own);
    }
    merge(&mut definitions, extra);
    Ok(definitions)
}

fn merge(into: &mut ModuleDefinitions, from: ModuleDefinitions) {
    let (services, contributions, decorators) = from.into_parts();
    for def in services {
        into.service(def);
    }
    for def in contributions {
        into.contribute(def);
    }
    for def in decorators {
        into.decorate(def);
    }
}

/// 把装饰器匹配到服务上，并按约束排好序（由外到内）
fn bind_decorators(
    catalog: &ServiceCatalog,
    symbols: &SymbolSource,
    decorators: Vec<DecoratorDef>,
) -> Result<Vec<Vec<Arc<DecoratorDef>>>> {
    let mut matched: Vec<Vec<(Arc<DecoratorDef>, Vec<Constraint>)>> = vec![Vec::new(); catalog.len()];

    for def in decorators {
        let target = symbols.expand(def.target())?;
        let constraints = Constraint::parse_all(def.constraint_strings())?
            .into_iter()
            .map(|c| c.map_target(|t| symbols.expand(t)))
            .collect::<Result<Vec<_>>>()?;
        let def = Arc::new(def);

        if target.contains('*') {
            for (position, service) in catalog.iter().enumerate() {
                if glob_matches(&target, service.service_id()) && service.interface() == def.interface() {
                    matched[position].push((def.clone(), constraints.clone()));
                }
            }
            continue;
        }

        let service = catalog.lookup(&target)?;
        if service.interface() != def.interface() {
            return Err(RegistryError::DecoratorInterfaceMismatch {
                decorator_id: def.id().to_string(),
                service_id: service.service_id().to_string(),
                expected: def.interface().name(),
                actual: service.interface().name(),
            });
        }
        if let Some(position) = catalog.position(&target) {
            matched[position].push((def, constraints));
        }
    }

    let mut ordered = Vec::with_capacity(matched.len());
    for (position, candidates) in matched.into_iter().enumerate() {
        if candidates.is_empty() {
            ordered.push(Vec::new());
            continue;
        }
        let mut orderer = Orderer::new(format!(
            "decorators of service '{}'",
            catalog.at(position).service_id()
        ));
        for (def, constraints) in candidates {
            let id = def.id().to_string();
            orderer.add(id, def, constraints)?;
        }
        ordered.push(orderer.order());
    }
    Ok(ordered)
}
