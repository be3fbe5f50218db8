//! Lifecycle driver: sequences the operator hooks across the process group.
//!
//! Phases run in a fixed order; after every forward phase the group
//! max-reduces its local outcome codes, so all members observe one verdict at
//! the same collective boundary. That reduction is simultaneously the
//! lockstep synchronization point and the error-propagation policy: a local
//! failure is never swallowed inside a phase, it is carried to the next
//! boundary where the whole group reacts together. On a failed verdict the
//! driver skips the remaining forward phases and enters the destroy/unset
//! tail, where the rollback coordinator compensates before the operator's own
//! cleanup hooks run.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cbf_common::{global_metrics, CbfError, CubeId, Result};
use tracing::{info, warn};

use crate::context::EngineCtx;
use crate::handle::{OperatorParams, TaskHandle};
use crate::host::OperatorHost;
use crate::operator::HookError;
use crate::partition;
use crate::rangeset::FragmentRangeSet;
use crate::registry::OperatorRegistry;
use crate::rollback::{self, GroupVerdict};

/// Lifecycle phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    EnvSet,
    TaskInit,
    TaskDistribute,
    TaskExecute,
    TaskReduce,
    TaskDestroy,
    EnvUnset,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::NotStarted => "not_started",
            Phase::EnvSet => "env_set",
            Phase::TaskInit => "task_init",
            Phase::TaskDistribute => "task_distribute",
            Phase::TaskExecute => "task_execute",
            Phase::TaskReduce => "task_reduce",
            Phase::TaskDestroy => "task_destroy",
            Phase::EnvUnset => "env_unset",
            Phase::Done => "done",
        }
    }
}

const FORWARD_PHASES: [Phase; 5] = [
    Phase::EnvSet,
    Phase::TaskInit,
    Phase::TaskDistribute,
    Phase::TaskExecute,
    Phase::TaskReduce,
];

/// Final result of one operator invocation on this member.
#[derive(Debug)]
pub struct RunOutcome {
    /// Group-wide verdict; identical on every member.
    pub verdict: GroupVerdict,
    /// Output cube produced by the run, when the operator created one.
    pub output_cube: Option<CubeId>,
    /// Accumulated operator output lines.
    pub output_lines: Vec<String>,
}

/// Drives one operator invocation on one group member.
#[derive(Debug)]
pub struct LifecycleDriver {
    engine: EngineCtx,
    host: OperatorHost,
    phase: Phase,
}

impl LifecycleDriver {
    pub fn new(engine: EngineCtx, registry: Arc<OperatorRegistry>) -> Self {
        Self {
            engine,
            host: OperatorHost::new(registry),
            phase: Phase::NotStarted,
        }
    }

    /// Current lifecycle phase, for diagnostics.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the named operator to completion.
    ///
    /// Returns `Ok` with the group verdict for both successful and failed
    /// runs; `Err` is reserved for driver-level faults (a broken collective,
    /// re-entry) after which the group state is undefined.
    pub fn run(&mut self, operator: &str, params: OperatorParams) -> Result<RunOutcome> {
        if self.phase != Phase::NotStarted {
            return Err(CbfError::State("lifecycle driver re-entered".to_string()));
        }
        let mut handle = TaskHandle::new(
            operator,
            self.engine.rank(),
            self.engine.group_size(),
            params,
        );

        let mut verdict = GroupVerdict {
            failed: false,
            code: 0,
        };
        let mut local_code = 0_i64;
        for phase in FORWARD_PHASES {
            self.phase = phase;
            let started = Instant::now();
            let code = match self.run_forward_phase(phase, &mut handle) {
                Ok(()) => 0,
                Err(e) => {
                    warn!(
                        rank = handle.rank,
                        operator = %handle.operator,
                        phase = phase.as_str(),
                        error = %e,
                        "phase failed locally"
                    );
                    e.outcome_code()
                }
            };
            verdict = rollback::reduce_verdict(self.engine.comm.as_ref(), code)?;
            global_metrics().record_phase(
                &handle.operator,
                phase.as_str(),
                if verdict.failed { "failure" } else { "success" },
                started.elapsed().as_secs_f64(),
            );
            info!(
                rank = handle.rank,
                operator = %handle.operator,
                phase = phase.as_str(),
                code,
                verdict = verdict.code,
                "phase complete"
            );
            if verdict.failed {
                local_code = code;
                break;
            }
        }

        // Destroy/unset tail runs on both paths; on failure the rollback
        // coordinator compensates before the operator's own cleanup hooks.
        self.phase = Phase::TaskDestroy;
        let mut canonical = None;
        if verdict.failed {
            handle.status = verdict.code;
            canonical = Some(rollback::compensate(&self.engine, &handle, local_code)?);
        }
        let destroy_code = self.run_cleanup_hook(Phase::TaskDestroy, &mut handle);

        self.phase = Phase::EnvUnset;
        let unset_code = self.run_cleanup_hook(Phase::EnvUnset, &mut handle);
        self.host.set_env_active(false);
        if self.host.is_loaded() {
            self.host.unload()?;
        }

        // Final reduction keeps the collective cadence and the reported
        // status uniform across members; a failed run reports the canonical
        // code picked during compensation, never a secondary cleanup error.
        let tail_verdict = rollback::reduce_verdict(
            self.engine.comm.as_ref(),
            destroy_code.max(unset_code),
        )?;
        let final_verdict = match canonical {
            Some(code) => GroupVerdict { failed: true, code },
            None => tail_verdict,
        };
        handle.status = final_verdict.code;
        self.phase = Phase::Done;
        info!(
            rank = handle.rank,
            operator = %handle.operator,
            status = final_verdict.code,
            "lifecycle complete"
        );
        Ok(RunOutcome {
            verdict: final_verdict,
            output_cube: handle.output_cube,
            output_lines: std::mem::take(&mut handle.output_lines),
        })
    }

    fn run_forward_phase(&mut self, phase: Phase, handle: &mut TaskHandle) -> Result<()> {
        match phase {
            Phase::EnvSet => {
                self.host.load(&handle.operator)?;
                self.call_hook(phase, handle)?;
                self.host.set_env_active(true);
                Ok(())
            }
            Phase::TaskDistribute => {
                self.require_env()?;
                self.distribute(handle)?;
                self.call_hook(phase, handle)
            }
            Phase::TaskInit | Phase::TaskExecute | Phase::TaskReduce => {
                self.require_env()?;
                self.call_hook(phase, handle)
            }
            _ => Err(CbfError::State(format!(
                "{} is not a forward phase",
                phase.as_str()
            ))),
        }
    }

    fn require_env(&self) -> Result<()> {
        if self.host.env_active() {
            Ok(())
        } else {
            Err(CbfError::State(
                "phase requires an operator environment that was never set".to_string(),
            ))
        }
    }

    /// Engine-level process slice: rewrite the handle's fragment set to this
    /// member's window, dropping the wider set.
    fn distribute(&self, handle: &mut TaskHandle) -> Result<()> {
        let set = handle.require_fragment_set()?;
        let total = set.count();
        let share = partition::plan_for(total, handle.group_size, handle.rank)?;
        let narrowed = match share.start {
            Some(start) => set.slice(start, share.count)?,
            None => FragmentRangeSet::empty(),
        };
        handle.share = Some(share);
        handle.install_fragment_set(narrowed);
        info!(
            rank = handle.rank,
            operator = %handle.operator,
            total,
            count = share.count,
            "process slice installed"
        );
        Ok(())
    }

    fn run_cleanup_hook(&mut self, phase: Phase, handle: &mut TaskHandle) -> i64 {
        if !self.host.env_active() {
            return 0;
        }
        match self.call_hook(phase, handle) {
            Ok(()) => 0,
            Err(e) => {
                warn!(
                    rank = handle.rank,
                    operator = %handle.operator,
                    phase = phase.as_str(),
                    error = %e,
                    "cleanup hook failed"
                );
                e.outcome_code()
            }
        }
    }

    fn call_hook(&mut self, phase: Phase, handle: &mut TaskHandle) -> Result<()> {
        let attempts = self.engine.config.max_hook_attempts.max(1);
        let backoff_base = self.engine.config.retry_backoff_base_ms;
        for attempt in 0..attempts {
            let engine = &self.engine;
            let operator = self.host.operator_mut()?;
            let result = match phase {
                Phase::EnvSet => operator.env_set(engine, handle),
                Phase::TaskInit => operator.task_init(engine, handle),
                Phase::TaskDistribute => operator.task_distribute(engine, handle),
                Phase::TaskExecute => operator.task_execute(engine, handle),
                Phase::TaskReduce => operator.task_reduce(engine, handle),
                Phase::TaskDestroy => operator.task_destroy(engine, handle),
                Phase::EnvUnset => operator.env_unset(engine, handle),
                Phase::NotStarted | Phase::Done => {
                    return Err(CbfError::State(format!(
                        "no hook for phase {}",
                        phase.as_str()
                    )))
                }
            };
            match result {
                Ok(()) => return Ok(()),
                Err(HookError::Fatal(e)) => return Err(e),
                Err(HookError::Retryable(e)) => {
                    if attempt + 1 == attempts {
                        return Err(e);
                    }
                    let backoff_ms = backoff_base.saturating_mul(1_u64 << attempt.min(10));
                    warn!(
                        rank = handle.rank,
                        operator = %handle.operator,
                        phase = phase.as_str(),
                        attempt,
                        backoff_ms,
                        error = %e,
                        "retryable hook failure"
                    );
                    thread::sleep(Duration::from_millis(backoff_ms));
                }
            }
        }
        unreachable!("hook retry loop always returns")
    }
}
