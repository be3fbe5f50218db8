//! CubeFlow distributed task engine.
//!
//! Responsibilities:
//! - resolve an operator name to its lifecycle implementation (registry/host);
//! - drive the lifecycle hooks in lockstep across a process group;
//! - partition fragment work twice, per process and per worker thread;
//! - share leader-only catalog results through broadcast envelopes;
//! - reduce per-process outcomes to one verdict and compensate on failure.
//!
//! Collective semantics:
//! - members communicate only through broadcast/barrier/reduce;
//! - a member with no work still attends every collective call;
//! - failures are observed at the next collective boundary, never earlier.

pub mod comm;
pub mod context;
pub mod driver;
pub mod handle;
pub mod host;
pub mod operator;
pub mod operators;
pub mod partition;
pub mod rangeset;
pub mod registry;
pub mod rollback;

pub use comm::{run_on_leader_then_broadcast, Collective, LocalGroup, ReduceOp, LEADER_RANK};
pub use context::{EngineCtx, WorkerSlice};
pub use driver::{LifecycleDriver, Phase, RunOutcome};
pub use handle::{OperatorParams, TaskHandle};
pub use host::OperatorHost;
pub use operator::{HookError, HookResult, LifecycleOperator};
pub use operators::register_builtin_operators;
pub use partition::{clamp_workers, plan, plan_for, Share};
pub use rangeset::FragmentRangeSet;
pub use registry::{
    global_operator_registry, FnOperatorFactory, OperatorFactory, OperatorRegistry,
};
pub use rollback::{compensate, reduce_verdict, GroupVerdict};
