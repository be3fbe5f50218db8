//! Collective-communication primitives.
//!
//! Group members communicate only through collectives: broadcast, barrier,
//! and reduction. [`Collective`] is the transport seam; [`LocalGroup`] is the
//! in-process implementation used by tests, the `cbf-run` binary, and any
//! deployment that maps group members onto threads of one process.
//!
//! [`run_on_leader_then_broadcast`] is the one place where "only the leader
//! mutates shared catalog state" is enforced: the leader runs the supplied
//! closure, the result travels in a tagged envelope, and an unfilled envelope
//! surfaces as the same [`CbfError::LeaderFailed`] on every member.

use std::sync::{Arc, Barrier, Mutex};

use cbf_common::{CbfError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

/// Reduction operators supported by [`Collective::all_reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Maximum; answers "did anyone fail".
    Max,
    /// Minimum; picks one canonical error code.
    Min,
}

/// Collective-communication contract for one group member.
///
/// Every method is a suspension point all members must reach together; a
/// member that skips one deadlocks the group.
pub trait Collective: Send + Sync {
    /// This member's 0-based rank.
    fn rank(&self) -> usize;

    /// Number of members in the group.
    fn size(&self) -> usize;

    /// Block until every member has arrived.
    fn barrier(&self);

    /// One-to-all broadcast. The `root` member supplies `Some(payload)`;
    /// every member (root included) receives the payload bytes.
    fn broadcast(&self, root: usize, payload: Option<Vec<u8>>) -> Result<Vec<u8>>;

    /// All-to-all reduction; every member receives the combined value.
    fn all_reduce(&self, value: i64, op: ReduceOp) -> Result<i64>;
}

/// The rank permitted to mutate shared catalog state.
pub const LEADER_RANK: usize = 0;

const ENVELOPE_FILLED: u8 = 1;
const ENVELOPE_EMPTY: u8 = 0;

/// Run `leader_fn` on the leader only, then broadcast its result to the
/// whole group.
///
/// The envelope's first byte is zero if and only if the leader failed before
/// filling it; every member checks that byte before trusting the payload and
/// returns a uniform [`CbfError::LeaderFailed`] when it is zero, so a failing
/// leader never strands followers waiting on data that will not arrive.
pub fn run_on_leader_then_broadcast<C, T, F>(comm: &C, leader_fn: F) -> Result<T>
where
    C: Collective + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    let payload = if comm.rank() == LEADER_RANK {
        let envelope = match leader_fn().and_then(|value| {
            serde_json::to_vec(&value)
                .map_err(|e| CbfError::Execution(format!("envelope encode failed: {e}")))
        }) {
            Ok(body) => {
                let mut bytes = Vec::with_capacity(1 + body.len());
                bytes.push(ENVELOPE_FILLED);
                bytes.extend_from_slice(&body);
                bytes
            }
            Err(e) => {
                error!(error = %e, "leader failed before filling the broadcast envelope");
                vec![ENVELOPE_EMPTY]
            }
        };
        Some(envelope)
    } else {
        None
    };

    let bytes = comm.broadcast(LEADER_RANK, payload)?;
    match bytes.first() {
        Some(&ENVELOPE_FILLED) => serde_json::from_slice(&bytes[1..])
            .map_err(|e| CbfError::Execution(format!("envelope decode failed: {e}"))),
        _ => Err(CbfError::LeaderFailed(
            "broadcast envelope was not filled".to_string(),
        )),
    }
}

struct GroupShared {
    size: usize,
    barrier: Barrier,
    bcast: Mutex<Option<Vec<u8>>>,
    slots: Mutex<Vec<i64>>,
}

/// In-process group member handle.
///
/// `new_group(size)` returns one handle per rank; each is moved onto its own
/// thread. Collectives are sequenced by a shared barrier, so all members must
/// issue the same collective calls in the same order.
pub struct LocalGroup {
    rank: usize,
    shared: Arc<GroupShared>,
}

impl LocalGroup {
    /// Build a group of `size` members and return their handles in rank order.
    pub fn new_group(size: usize) -> Vec<LocalGroup> {
        assert!(size > 0, "group size must be positive");
        let shared = Arc::new(GroupShared {
            size,
            barrier: Barrier::new(size),
            bcast: Mutex::new(None),
            slots: Mutex::new(vec![0; size]),
        });
        (0..size)
            .map(|rank| LocalGroup {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Collective for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn broadcast(&self, root: usize, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        if root >= self.shared.size {
            return Err(CbfError::State(format!(
                "broadcast root {root} outside group of {}",
                self.shared.size
            )));
        }
        // Entry barrier: nobody may still be reading the previous payload.
        self.shared.barrier.wait();
        if self.rank == root {
            let payload = payload.ok_or_else(|| {
                CbfError::State("broadcast root supplied no payload".to_string())
            })?;
            *self.shared.bcast.lock().expect("broadcast slot poisoned") = Some(payload);
        }
        self.shared.barrier.wait();
        self.shared
            .bcast
            .lock()
            .expect("broadcast slot poisoned")
            .clone()
            .ok_or_else(|| CbfError::State("broadcast slot is empty".to_string()))
    }

    fn all_reduce(&self, value: i64, op: ReduceOp) -> Result<i64> {
        // Entry barrier: previous reduction must be fully read everywhere.
        self.shared.barrier.wait();
        {
            let mut slots = self.shared.slots.lock().expect("reduce slots poisoned");
            slots[self.rank] = value;
        }
        self.shared.barrier.wait();
        let slots = self.shared.slots.lock().expect("reduce slots poisoned");
        let combined = match op {
            ReduceOp::Max => slots.iter().copied().max(),
            ReduceOp::Min => slots.iter().copied().min(),
        };
        combined.ok_or_else(|| CbfError::State("reduction over empty group".to_string()))
    }
}
