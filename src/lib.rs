pub mod config;
pub mod errors;
pub mod infrastructure;
pub mod logging;

// Re-export commonly used items for convenience
pub use config::{ConfigLoader, RegistryConfig};
pub use errors::{RegistryError, Result};
pub use infrastructure::{
    InjectionContext, Module, ModuleDefinitions, Registry, RegistryBuilder, ServiceDef, ServiceProxy,
    ServiceResources, ServiceScope,
};
