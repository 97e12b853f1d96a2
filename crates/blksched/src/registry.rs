//! Named policy registry.
//!
//! An explicit object, owned by the storage subsystem root, mapping policy
//! names to factories. Nothing here is process-global, so independent
//! gateways (and independent tests) can carry their own registries with
//! different configurations.

use std::collections::HashMap;

use tracing::debug;

use crate::anticipatory::{AsConfig, AsSched};
use crate::error::{SchedError, SchedResult};
use crate::policy::{NoopSched, SchedPolicy};
use crate::rr::{RrConfig, RrSched};
use crate::trim::{TrimConfig, TrimSched};

/// Factory producing a fresh policy instance for one disk.
pub type PolicyFactory = Box<dyn Fn() -> Box<dyn SchedPolicy> + Send + Sync>;

/// Registry of selectable scheduling policies.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, PolicyFactory>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in policies registered under their
    /// default configurations: "none", "trim", "as" and "rr".
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("none", || Box::new(NoopSched::new()));
        registry.register("trim", || Box::new(TrimSched::new(TrimConfig::default())));
        registry.register("as", || Box::new(AsSched::new(AsConfig::default())));
        registry.register("rr", || Box::new(RrSched::new(RrConfig::default())));
        registry
    }

    /// Registers (or replaces) a policy factory under `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn SchedPolicy> + Send + Sync + 'static,
    {
        debug!(policy = name, "registering scheduling policy");
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Instantiates the named policy.
    pub fn create(&self, name: &str) -> SchedResult<Box<dyn SchedPolicy>> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(SchedError::UnknownPolicy(name.to_string())),
        }
    }

    /// Registered policy names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
