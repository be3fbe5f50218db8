//! `duplicate`: copy every fragment of a cube into a new output cube.

use cbf_common::{global_metrics, CbfError, ContainerId, CubeId, FragmentId};
use cbf_storage::FragmentRow;
use serde::{Deserialize, Serialize};

use crate::context::EngineCtx;
use crate::handle::TaskHandle;
use crate::operator::{HookResult, LifecycleOperator};
use crate::rangeset::FragmentRangeSet;

/// Leader-computed state shared with the whole group at `task_init`.
#[derive(Debug, Serialize, Deserialize)]
struct InitShared {
    fragment_set: String,
    output_cube: CubeId,
    container: ContainerId,
}

/// Copies the source cube fragment-by-fragment into a fresh output cube.
///
/// The output receives a gap-free index range regardless of gaps in the
/// source set: the k-th logical source element becomes output index k+1.
#[derive(Debug, Default)]
pub struct DuplicateOperator {
    src: Option<CubeId>,
    dst: Option<CubeId>,
    container_name: Option<String>,
}

impl DuplicateOperator {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_src(&self) -> Result<CubeId, CbfError> {
        self.src
            .ok_or_else(|| CbfError::State("duplicate operator has no environment".to_string()))
    }

    fn require_dst(&self) -> Result<CubeId, CbfError> {
        self.dst.ok_or_else(|| {
            CbfError::State("duplicate operator has no output cube".to_string())
        })
    }
}

impl LifecycleOperator for DuplicateOperator {
    fn env_set(&mut self, _engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        let raw = handle.require_param("cube")?;
        let cube = raw
            .parse::<u64>()
            .map(CubeId)
            .map_err(|_| CbfError::InvalidConfig(format!("cube parameter not numeric: {raw}")))?;
        self.src = Some(cube);
        self.container_name = handle.params.get("container").cloned();
        handle.input_cube = Some(cube);
        Ok(())
    }

    fn task_init(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        let src = self.require_src()?;
        let container_name = self.container_name.clone();
        let shared: InitShared = engine.on_leader(|| {
            let row = engine.catalog.cube(src)?;
            let count = FragmentRangeSet::parse(&row.fragment_set)?.count();
            if count == 0 {
                return Err(CbfError::InvalidConfig(format!(
                    "cube {src} has no fragments"
                )));
            }
            let container = match &container_name {
                Some(name) => engine.catalog.create_container(name)?,
                None => row.container,
            };
            let out_set = FragmentRangeSet::from_contiguous(1, count)?;
            let output_cube = engine.catalog.create_cube(container, &out_set.to_string())?;
            Ok(InitShared {
                fragment_set: row.fragment_set.clone(),
                output_cube,
                container,
            })
        })?;
        handle.install_fragment_set(FragmentRangeSet::parse(&shared.fragment_set)?);
        handle.output_cube = Some(shared.output_cube);
        handle.output_container = Some(shared.container);
        self.dst = Some(shared.output_cube);
        Ok(())
    }

    fn task_execute(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        if !handle.has_work() {
            return Ok(());
        }
        let src = self.require_src()?;
        let dst = self.require_dst()?;
        let set = handle.require_fragment_set()?.clone();
        let base = handle.share.and_then(|s| s.start).unwrap_or(0);

        // Ledger first: the intended outputs are derived from the partition
        // slice itself, so compensation mirrors the forward work even when a
        // worker fails partway through.
        handle.record_created(
            (0..set.count()).map(|j| FragmentId { cube: dst, index: base + j + 1 }),
        );

        let rows = engine.run_worker_pool(&set, |slice| {
            let mut rows = Vec::with_capacity(slice.fragments.count() as usize);
            for (j, src_index) in slice.fragments.iter().enumerate() {
                let out_index = base + slice.offset + j as u64 + 1;
                let dst_id = FragmentId {
                    cube: dst,
                    index: out_index,
                };
                engine.store.transform(
                    FragmentId {
                        cube: src,
                        index: src_index,
                    },
                    "duplicate",
                    dst_id,
                )?;
                rows.push(FragmentRow {
                    id: dst_id,
                    cube: dst,
                    relative_index: out_index,
                });
            }
            Ok(rows)
        })?;

        // Batch insert is the single sequential step after the pool joins.
        let rows: Vec<FragmentRow> = rows.into_iter().flatten().collect();
        let count = rows.len() as u64;
        engine.catalog.insert_fragments(rows)?;
        global_metrics().inc_fragments_processed(&handle.operator, count);
        handle.push_output(format!("rank {} created {count} fragments", handle.rank));
        Ok(())
    }

    fn task_reduce(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        let dst = self.require_dst()?;
        let pid: String = engine.on_leader(|| {
            let pid = format!("cube/{dst}");
            engine.catalog.publish_pid(dst, &pid)?;
            Ok(pid)
        })?;
        if engine.is_leader() {
            handle.push_output(format!("published {pid}"));
        }
        Ok(())
    }

    fn env_unset(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        self.src = None;
        self.dst = None;
        self.container_name = None;
        Ok(())
    }
}
