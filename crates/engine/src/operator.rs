//! Operator lifecycle contract.
//!
//! An operator is a unit of work (delete, merge, permute, subset, ...) whose
//! only engine-visible surface is the seven lifecycle hooks. `env_set`,
//! `task_execute`, and `env_unset` are mandatory; the other four default to
//! no-op success. Operator-private state lives in the implementing struct:
//! `env_set` is the only hook allowed to allocate it, `env_unset` releases it.

use cbf_common::CbfError;

use crate::context::EngineCtx;
use crate::handle::TaskHandle;

/// Hook failure classification.
///
/// The engine retries [`HookError::Retryable`] failures in place with bounded
/// backoff; [`HookError::Fatal`] jumps the whole group to rollback regardless
/// of which hook produced it. `?` on a [`CbfError`] yields `Fatal`.
#[derive(Debug)]
pub enum HookError {
    /// Transient failure worth re-running the hook for.
    ///
    /// Retries happen locally, before the next collective boundary: a hook
    /// that issues collective calls must fail on a group-uniform control
    /// path, or report `Fatal` instead.
    Retryable(CbfError),
    /// Unrecoverable failure; the group proceeds to rollback.
    Fatal(CbfError),
}

impl HookError {
    pub fn into_inner(self) -> CbfError {
        match self {
            HookError::Retryable(e) | HookError::Fatal(e) => e,
        }
    }
}

impl From<CbfError> for HookError {
    fn from(e: CbfError) -> Self {
        HookError::Fatal(e)
    }
}

/// Standard hook result alias.
pub type HookResult = std::result::Result<(), HookError>;

/// Lifecycle contract implemented by every operator.
///
/// Hooks are called in lockstep across the process group; a hook that issues
/// a collective call (through [`EngineCtx`]) must do so on a control path
/// every member takes, or the group deadlocks.
pub trait LifecycleOperator: Send {
    /// Validate parameters and allocate operator-private state.
    ///
    /// The only hook permitted to allocate; configuration failures here are
    /// fatal and leave no partial state to unwind.
    fn env_set(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult;

    /// Leader-side catalog work whose result the whole group needs, shared
    /// through [`EngineCtx::on_leader`]. Installs the handle's full fragment
    /// set.
    fn task_init(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        Ok(())
    }

    /// Operator-specific additions to the engine's process-level slice.
    fn task_distribute(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        Ok(())
    }

    /// The parallel phase: fan the process's slice out over worker threads
    /// via [`EngineCtx::run_worker_pool`] and perform the sequential catalog
    /// batch insert after the join.
    fn task_execute(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult;

    /// Success-path commit; the leader publishes persistent identifiers here.
    fn task_reduce(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        Ok(())
    }

    /// Cleanup run on both the success and the failure path; the handle's
    /// status tells which.
    fn task_destroy(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        Ok(())
    }

    /// Release operator-private state. Always reached, even after failure.
    fn env_unset(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult;
}
