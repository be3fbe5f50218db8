//! Engine context handed to every lifecycle hook.
//!
//! Bundles the collective transport, the catalog/storage collaborators, and
//! the engine configuration, plus the two helpers operators reach for:
//! [`EngineCtx::on_leader`] for leader-computes/broadcast-and-verify state
//! sharing, and [`EngineCtx::run_worker_pool`] for the thread-level fan-out
//! of a process's fragment slice.

use std::sync::Arc;
use std::thread;

use cbf_common::{CbfError, EngineConfig, Result};
use cbf_storage::{CatalogStore, FragmentStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::comm::{run_on_leader_then_broadcast, Collective, LEADER_RANK};
use crate::partition::{self, clamp_workers};
use crate::rangeset::FragmentRangeSet;

/// One worker thread's view of the process slice.
#[derive(Debug, Clone)]
pub struct WorkerSlice {
    /// 0-based worker index within the pool.
    pub worker: usize,
    /// Pool size after engine-level clamping.
    pub workers: usize,
    /// 0-based offset of this slice within the process's own slice.
    pub offset: u64,
    /// The fragment indices this worker owns exclusively.
    pub fragments: FragmentRangeSet,
}

/// Shared collaborators and configuration for one group member.
#[derive(Clone)]
pub struct EngineCtx {
    /// Engine configuration, identical on every member.
    pub config: EngineConfig,
    /// Collective transport for this member.
    pub comm: Arc<dyn Collective>,
    /// Catalog collaborator; only the leader writes cube-level records.
    pub catalog: Arc<dyn CatalogStore>,
    /// Fragment storage collaborator.
    pub store: Arc<dyn FragmentStore>,
}

impl std::fmt::Debug for EngineCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCtx")
            .field("rank", &self.comm.rank())
            .field("group_size", &self.comm.size())
            .finish()
    }
}

impl EngineCtx {
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn group_size(&self) -> usize {
        self.comm.size()
    }

    pub fn is_leader(&self) -> bool {
        self.comm.rank() == LEADER_RANK
    }

    /// Run `leader_fn` on the leader only and broadcast its result to the
    /// whole group. Every member must call this together.
    pub fn on_leader<T, F>(&self, leader_fn: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        run_on_leader_then_broadcast(self.comm.as_ref(), leader_fn)
    }

    /// Fan `set` out over the worker-thread pool.
    ///
    /// The pool size is the configured thread count clamped to the item
    /// count. Each worker receives a disjoint sub-slice cut by the same
    /// balanced partitioner used at the process level and runs `work` on its
    /// own thread; blocking I/O inside `work` is expected. Every worker runs
    /// to completion before results are inspected; the first failure is
    /// returned after the join, so a mid-pool error never cancels dispatched
    /// work.
    pub fn run_worker_pool<T, F>(&self, set: &FragmentRangeSet, work: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&WorkerSlice) -> Result<T> + Sync,
    {
        let total = set.count();
        if total == 0 {
            return Ok(Vec::new());
        }
        let workers = clamp_workers(self.config.worker_threads, total);
        let mut slices = Vec::with_capacity(workers);
        for index in 0..workers {
            let share = partition::plan_for(total, workers, index)?;
            let Some(start) = share.start else {
                continue;
            };
            slices.push(WorkerSlice {
                worker: index,
                workers,
                offset: start,
                fragments: set.slice(start, share.count)?,
            });
        }

        let work = &work;
        let results: Vec<Result<T>> = thread::scope(|scope| {
            let handles: Vec<_> = slices
                .iter()
                .map(|slice| scope.spawn(move || work(slice)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(CbfError::Execution("worker thread panicked".to_string()))
                    })
                })
                .collect()
        });

        let mut out = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (slice, result) in slices.iter().zip(results) {
            match result {
                Ok(value) => out.push(value),
                Err(e) => {
                    warn!(
                        rank = self.rank(),
                        worker = slice.worker,
                        error = %e,
                        "worker slice failed"
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}
