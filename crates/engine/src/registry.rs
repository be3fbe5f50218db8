//! Operator registry: the name-indexed table the plugin host loads from.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use cbf_common::Result;

use crate::operator::LifecycleOperator;

/// Factory contract for loadable operators.
///
/// A factory stands in for the original dynamic-library unit: looked up by
/// name, it builds a fresh operator instance whose mandatory lifecycle hooks
/// are guaranteed by the trait itself.
pub trait OperatorFactory: Send + Sync {
    /// Stable operator name used for registry lookup.
    fn name(&self) -> &str;

    /// Build a fresh operator instance for one invocation.
    fn build(&self) -> Result<Box<dyn LifecycleOperator>>;
}

/// Closure-backed factory, convenient for built-ins and test fixtures.
pub struct FnOperatorFactory {
    name: String,
    build: Box<dyn Fn() -> Result<Box<dyn LifecycleOperator>> + Send + Sync>,
}

impl FnOperatorFactory {
    pub fn new<F>(name: &str, build: F) -> Self
    where
        F: Fn() -> Result<Box<dyn LifecycleOperator>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            build: Box::new(build),
        }
    }
}

impl OperatorFactory for FnOperatorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Result<Box<dyn LifecycleOperator>> {
        (self.build)()
    }
}

/// Registry mapping operator names to factories.
#[derive(Default)]
pub struct OperatorRegistry {
    inner: RwLock<HashMap<String, Arc<dyn OperatorFactory>>>,
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.read().map(|m| m.len()).unwrap_or_default();
        f.debug_struct("OperatorRegistry")
            .field("factories", &count)
            .finish()
    }
}

impl OperatorRegistry {
    /// Register or replace a factory.
    ///
    /// Returns `true` when an existing factory with the same name was replaced.
    pub fn register(&self, factory: Arc<dyn OperatorFactory>) -> bool {
        self.inner
            .write()
            .expect("operator registry lock poisoned")
            .insert(factory.name().to_string(), factory)
            .is_some()
    }

    /// Deregister a factory by name.
    ///
    /// Returns `true` when an existing factory was removed.
    pub fn deregister(&self, name: &str) -> bool {
        self.inner
            .write()
            .expect("operator registry lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Fetch a factory by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn OperatorFactory>> {
        self.inner
            .read()
            .expect("operator registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// List registered operator names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .inner
            .read()
            .expect("operator registry lock poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

fn global_registry() -> &'static Arc<OperatorRegistry> {
    static REGISTRY: OnceLock<Arc<OperatorRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(OperatorRegistry::default()))
}

/// Return the global operator registry shared by default runtimes.
pub fn global_operator_registry() -> Arc<OperatorRegistry> {
    Arc::clone(global_registry())
}
