// src/core/registry.rs
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::module::{Module, ModuleMetadata};
use crate::error::{ReconResult, ReconError};

/// Builds a fresh module instance
pub type ModuleConstructor = Arc<dyn Fn() -> ReconResult<Box<dyn Module>> + Send + Sync>;

/// Name to constructor lookup for every module the host knows about
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    constructors: BTreeMap<String, ModuleConstructor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the modules shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::modules::register_builtin(&mut registry);
        registry
    }

    /// Register a constructor under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn() -> ReconResult<Box<dyn Module>> + Send + Sync + 'static,
    {
        if self.constructors.contains_key(name) {
            warn!("Module '{}' is already registered, overriding", name);
        }
        self.constructors.insert(name.to_string(), Arc::new(constructor));
        debug!("Registered module: {}", name);
    }

    /// Construct a new instance of `name`
    pub fn create(&self, name: &str) -> ReconResult<Box<dyn Module>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ReconError::ModuleNotFound(name.to_string()))?;

        let module = constructor().map_err(|e| ReconError::ModuleInitError {
            module: name.to_string(),
            message: e.to_string(),
        })?;

        if module.metadata().name != name {
            return Err(ReconError::ModuleInitError {
                module: name.to_string(),
                message: format!("constructor produced module '{}'", module.metadata().name),
            });
        }
        Ok(module)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Sorted module names
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Metadata for every module that constructs cleanly
    pub fn list(&self) -> Vec<ModuleMetadata> {
        self.names()
            .iter()
            .filter_map(|name| match self.create(name) {
                Ok(module) => Some(module.metadata().clone()),
                Err(e) => {
                    warn!("Cannot describe module {}: {}", name, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::ScriptedModule;

    #[test]
    fn test_create_registered_module() {
        let mut registry = ModuleRegistry::new();
        registry.register("alpha", || Ok(Box::new(ScriptedModule::new("alpha", &["domain"]))));

        let module = registry.create("alpha").unwrap();
        assert_eq!(module.metadata().name, "alpha");
        assert!(registry.contains("alpha"));
    }

    #[test]
    fn test_unknown_module() {
        let registry = ModuleRegistry::new();
        assert!(matches!(registry.create("ghost"), Err(ReconError::ModuleNotFound(_))));
    }

    #[test]
    fn test_failing_constructor_is_init_error() {
        let mut registry = ModuleRegistry::new();
        registry.register("broken", || Err(ReconError::ConfigError("no binary".to_string())));
        registry.register("alpha", || Ok(Box::new(ScriptedModule::new("alpha", &["domain"]))));

        assert!(matches!(registry.create("broken"), Err(ReconError::ModuleInitError { .. })));
        let listed: Vec<String> = registry.list().into_iter().map(|m| m.name).collect();
        assert_eq!(listed, vec!["alpha"]);
    }

    #[test]
    fn test_name_mismatch_rejected() {
        let mut registry = ModuleRegistry::new();
        registry.register("alpha", || Ok(Box::new(ScriptedModule::new("beta", &["domain"]))));
        assert!(registry.create("alpha").is_err());
    }

    #[test]
    fn test_builtin_modules_registered() {
        let registry = ModuleRegistry::with_builtin();
        for name in ["stor_db", "dns_resolve", "http_headers"] {
            assert!(registry.contains(name), "{} missing", name);
        }
    }
}
