//! Group-wide failure reduction and compensating rollback.
//!
//! After every parallel phase the group reduces its per-process outcome codes
//! to one verdict. On failure, compensation deletes exactly the fragments
//! each process intended to create (the ledger is derived from the same
//! partition slice as the forward work, so compensation is symmetric), a
//! min-reduction picks the canonical error code, and the leader alone removes
//! the orphaned output cube record and any now-childless container.

use cbf_common::{global_metrics, Result};
use tracing::{info, warn};

use crate::comm::{Collective, ReduceOp};
use crate::context::EngineCtx;
use crate::handle::TaskHandle;

/// Group-wide outcome of a parallel phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupVerdict {
    /// Whether any member failed.
    pub failed: bool,
    /// The reduced outcome code (max over members).
    pub code: i64,
}

/// Max-reduce local outcome codes into one verdict every member agrees on.
pub fn reduce_verdict(comm: &dyn Collective, local_code: i64) -> Result<GroupVerdict> {
    let code = comm.all_reduce(local_code, ReduceOp::Max)?;
    Ok(GroupVerdict {
        failed: code != 0,
        code,
    })
}

/// Compensate a failed run and return the canonical error code.
///
/// Entered by every member together. A barrier is taken first so no member
/// starts deleting rows another member is still writing. Compensation errors
/// are logged and never mask the original failure.
pub fn compensate(engine: &EngineCtx, handle: &TaskHandle, local_code: i64) -> Result<i64> {
    engine.comm.barrier();

    if handle.has_work() || engine.is_leader() {
        let mut deleted = 0_u64;
        for id in &handle.created_fragments {
            match engine.store.delete(*id) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(
                    rank = engine.rank(),
                    fragment = %id,
                    error = %e,
                    "rollback fragment delete failed"
                ),
            }
        }
        if !handle.created_fragments.is_empty() {
            if let Err(e) = engine.catalog.delete_fragments(&handle.created_fragments) {
                warn!(
                    rank = engine.rank(),
                    error = %e,
                    "rollback catalog row delete failed"
                );
            }
        }
        global_metrics().inc_rollback_deletes(&handle.operator, deleted);
        info!(
            rank = engine.rank(),
            operator = %handle.operator,
            deleted,
            "compensating delete complete"
        );
    }

    // Success contributes the identity so the min picks a real error code.
    let contribution = if local_code == 0 { i64::MAX } else { local_code };
    let canonical = engine.comm.all_reduce(contribution, ReduceOp::Min)?;

    if engine.is_leader() {
        if let Some(cube) = handle.output_cube {
            if let Err(e) = engine.catalog.delete_cube(cube) {
                warn!(cube = %cube, error = %e, "rollback output cube delete failed");
            }
        }
        if let Some(container) = handle.output_container {
            match engine.catalog.remove_container_if_empty(container) {
                Ok(removed) => {
                    if removed {
                        info!(container = %container, "removed childless container");
                    }
                }
                Err(e) => warn!(
                    container = %container,
                    error = %e,
                    "rollback container cleanup failed"
                ),
            }
        }
    }

    Ok(canonical)
}
