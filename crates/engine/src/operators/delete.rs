//! `delete`: remove a cube's fragments, rows, and record.

use cbf_common::{global_metrics, CbfError, CubeId, FragmentId};

use crate::context::EngineCtx;
use crate::handle::TaskHandle;
use crate::operator::{HookResult, LifecycleOperator};
use crate::rangeset::FragmentRangeSet;

/// Deletes every fragment of the target cube, then the cube record itself.
///
/// Forward deletion is not compensable: a partially deleted cube stays
/// partially deleted on failure, and only the final record removal is gated
/// on a clean group verdict.
#[derive(Debug, Default)]
pub struct DeleteOperator {
    cube: Option<CubeId>,
}

impl DeleteOperator {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_cube(&self) -> Result<CubeId, CbfError> {
        self.cube
            .ok_or_else(|| CbfError::State("delete operator has no environment".to_string()))
    }
}

impl LifecycleOperator for DeleteOperator {
    fn env_set(&mut self, _engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        let raw = handle.require_param("cube")?;
        let cube = raw
            .parse::<u64>()
            .map(CubeId)
            .map_err(|_| CbfError::InvalidConfig(format!("cube parameter not numeric: {raw}")))?;
        self.cube = Some(cube);
        handle.input_cube = Some(cube);
        Ok(())
    }

    fn task_init(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        let cube = self.require_cube()?;
        let encoded: String = engine.on_leader(|| engine.catalog.fragment_set(cube))?;
        handle.install_fragment_set(FragmentRangeSet::parse(&encoded)?);
        Ok(())
    }

    fn task_execute(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        if !handle.has_work() {
            return Ok(());
        }
        let cube = self.require_cube()?;
        let set = handle.require_fragment_set()?.clone();
        let deleted = engine.run_worker_pool(&set, |slice| {
            for index in slice.fragments.iter() {
                engine.store.delete(FragmentId { cube, index })?;
            }
            Ok(slice.fragments.count())
        })?;
        // Row deletion is the single sequential step after the pool joins.
        let ids: Vec<FragmentId> = set.iter().map(|index| FragmentId { cube, index }).collect();
        engine.catalog.delete_fragments(&ids)?;
        let count: u64 = deleted.iter().sum();
        global_metrics().inc_fragments_processed(&handle.operator, count);
        handle.push_output(format!("rank {} deleted {count} fragments", handle.rank));
        Ok(())
    }

    fn task_destroy(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        if handle.status != 0 || !engine.is_leader() {
            return Ok(());
        }
        let cube = self.require_cube()?;
        let row = engine.catalog.cube(cube)?;
        engine.catalog.delete_cube(cube)?;
        engine.catalog.remove_container_if_empty(row.container)?;
        handle.push_output(format!("cube {cube} removed"));
        Ok(())
    }

    fn env_unset(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        self.cube = None;
        Ok(())
    }
}
