//! Module instance factory.
//!
//! Module behavior (scoring, interpretation) is compiled into the host and
//! registered by key at startup. Discovery supplies the key, the
//! [`FactoryRegistry`] supplies the behavior. A module may implement either
//! hook, both, or neither; callers ask for a capability and treat its absence
//! as a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use psy_core::entities::{ModuleDescriptor, ResultRecord};
use psy_core::values::ModuleFields;
use serde::{Deserialize, Serialize};

use crate::error::{FactoryError, HookError};

/// A human-readable interpretation attached to a result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Column the annotation refers to, if any.
    pub field: Option<String>,
    pub label: String,
    pub text: String,
}

/// Derives computed columns from raw module fields before they are stored.
pub trait Computer: Send + Sync {
    /// Returns only the derived fields; they overlay the raw input.
    ///
    /// # Errors
    ///
    /// Returns `HookError::Compute` when the raw fields cannot be scored.
    fn compute(&self, raw: &ModuleFields) -> Result<ModuleFields, HookError>;
}

/// Produces interpretations of a stored record.
pub trait Interpreter: Send + Sync {
    fn interpret(&self, record: &ResultRecord) -> Vec<Annotation>;
}

/// Behavior of one loaded module.
pub trait ModuleInstance: Send + Sync {
    fn as_computer(&self) -> Option<&dyn Computer> {
        None
    }

    fn as_interpreter(&self) -> Option<&dyn Interpreter> {
        None
    }
}

/// Instance for data-only modules without registered behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstance;

impl ModuleInstance for NoopInstance {}

/// Run the compute hook if the instance has one; otherwise derive nothing.
///
/// # Errors
///
/// Propagates the module's `HookError`.
pub fn run_compute(
    instance: &dyn ModuleInstance,
    raw: &ModuleFields,
) -> Result<ModuleFields, HookError> {
    instance
        .as_computer()
        .map_or_else(|| Ok(ModuleFields::new()), |computer| computer.compute(raw))
}

/// Run the interpret hook if the instance has one; otherwise no annotations.
#[must_use]
pub fn run_interpret(instance: &dyn ModuleInstance, record: &ResultRecord) -> Vec<Annotation> {
    instance
        .as_interpreter()
        .map(|interpreter| interpreter.interpret(record))
        .unwrap_or_default()
}

type Constructor =
    Arc<dyn Fn(&ModuleDescriptor) -> Result<Arc<dyn ModuleInstance>, FactoryError> + Send + Sync>;

/// Map from module key to the constructor of its behavior.
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    constructors: HashMap<String, Constructor>,
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("FactoryRegistry").field("keys", &keys).finish()
    }
}

impl FactoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the constructor for `key`, replacing any previous one.
    pub fn register<F>(&mut self, key: impl Into<String>, constructor: F)
    where
        F: Fn(&ModuleDescriptor) -> Result<Arc<dyn ModuleInstance>, FactoryError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(key.into(), Arc::new(constructor));
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with<F>(mut self, key: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ModuleDescriptor) -> Result<Arc<dyn ModuleInstance>, FactoryError>
            + Send
            + Sync
            + 'static,
    {
        self.register(key, constructor);
        self
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    /// Build an instance for `descriptor`.
    ///
    /// Modules without a registered constructor get a [`NoopInstance`].
    ///
    /// # Errors
    ///
    /// Returns `FactoryError::LoadFailed` if the constructor refuses.
    pub fn instantiate(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> Result<Arc<dyn ModuleInstance>, FactoryError> {
        match self.constructors.get(&descriptor.key) {
            Some(constructor) => constructor(descriptor),
            None => Ok(Arc::new(NoopInstance)),
        }
    }
}

/// Per-key cache of loaded instances, valid while the module is active.
#[derive(Default)]
pub struct InstanceCache {
    instances: Mutex<HashMap<String, Arc<dyn ModuleInstance>>>,
}

impl InstanceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached instance for the descriptor's key, loading it on a miss.
    ///
    /// # Errors
    ///
    /// Returns `FactoryError` if loading fails; nothing is cached then.
    pub fn get_or_load(
        &self,
        factories: &FactoryRegistry,
        descriptor: &ModuleDescriptor,
    ) -> Result<Arc<dyn ModuleInstance>, FactoryError> {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = instances.get(&descriptor.key) {
            return Ok(Arc::clone(instance));
        }
        let instance = factories.instantiate(descriptor)?;
        instances.insert(descriptor.key.clone(), Arc::clone(&instance));
        Ok(instance)
    }

    /// Cache an instance that was loaded elsewhere, replacing any previous one.
    pub fn insert(&self, key: impl Into<String>, instance: Arc<dyn ModuleInstance>) {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), instance);
    }

    /// Drop the cached instance for `key`. Returns whether one was cached.
    pub fn invalidate(&self, key: &str) -> bool {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}
