//! Plugin host: resolves an operator name to a live instance and owns its
//! load/unload state machine.

use std::sync::Arc;

use cbf_common::{CbfError, Result};

use crate::operator::LifecycleOperator;
use crate::registry::OperatorRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Unloaded,
    Loaded,
}

/// `Unloaded → Loaded → Unloaded` state machine around one operator instance.
///
/// `load` is rejected on an already-loaded host rather than leaking the first
/// instance; `unload` is rejected while the operator's environment is still
/// active, so forgetting `env_unset` is caught instead of silently ignored.
pub struct OperatorHost {
    registry: Arc<OperatorRegistry>,
    state: HostState,
    operator: Option<Box<dyn LifecycleOperator>>,
    env_active: bool,
}

impl std::fmt::Debug for OperatorHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorHost")
            .field("state", &self.state)
            .field("env_active", &self.env_active)
            .finish()
    }
}

impl OperatorHost {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self {
            registry,
            state: HostState::Unloaded,
            operator: None,
            env_active: false,
        }
    }

    /// Resolve `name` in the registry and build the operator instance.
    pub fn load(&mut self, name: &str) -> Result<()> {
        if self.state == HostState::Loaded {
            return Err(CbfError::AlreadyLoaded(name.to_string()));
        }
        let factory = self
            .registry
            .get(name)
            .ok_or_else(|| CbfError::OperatorNotFound(name.to_string()))?;
        let operator = factory
            .build()
            .map_err(|e| CbfError::Load(format!("{name}: {e}")))?;
        self.operator = Some(operator);
        self.state = HostState::Loaded;
        Ok(())
    }

    /// Borrow the loaded operator for a hook call.
    pub fn operator_mut(&mut self) -> Result<&mut dyn LifecycleOperator> {
        match self.operator.as_deref_mut() {
            Some(op) => Ok(op),
            None => Err(CbfError::State(
                "hook called on an unloaded operator host".to_string(),
            )),
        }
    }

    /// Record whether the operator environment is currently allocated.
    pub fn set_env_active(&mut self, active: bool) {
        self.env_active = active;
    }

    pub fn env_active(&self) -> bool {
        self.env_active
    }

    pub fn is_loaded(&self) -> bool {
        self.state == HostState::Loaded
    }

    /// Release the operator instance.
    ///
    /// Fails while the environment is still active: the operator must release
    /// its private state through `env_unset` before the host lets go of it.
    pub fn unload(&mut self) -> Result<()> {
        if self.state == HostState::Unloaded {
            return Err(CbfError::State(
                "unload called on an unloaded host".to_string(),
            ));
        }
        if self.env_active {
            return Err(CbfError::State(
                "unload while operator environment is still active".to_string(),
            ));
        }
        self.operator = None;
        self.state = HostState::Unloaded;
        Ok(())
    }
}
