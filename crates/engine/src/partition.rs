//! Balanced work partitioning shared by the process and thread levels.
//!
//! For `total` items over `group_size` members, member `i` receives
//! `total / group_size` items plus one when `i < total % group_size`; starts
//! are the prefix sums. The same arithmetic is applied twice per run: once
//! over the whole fragment set with the process-group size, then inside each
//! process over its own slice with the worker-thread count.

use cbf_common::{CbfError, Result};

/// One member's contiguous window of the partitioned sequence.
///
/// `start` is `None` exactly when the member has no work; such members skip
/// data access but still attend every collective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share {
    /// Number of items assigned to the member.
    pub count: u64,
    /// 0-based offset of the member's first item, absent when `count == 0`.
    pub start: Option<u64>,
}

impl Share {
    pub fn has_work(&self) -> bool {
        self.count > 0
    }
}

/// Compute the full partition table for a group.
pub fn plan(total: u64, group_size: usize) -> Result<Vec<Share>> {
    if group_size == 0 {
        return Err(CbfError::State("partition group size is zero".to_string()));
    }
    (0..group_size)
        .map(|index| plan_for(total, group_size, index))
        .collect()
}

/// Compute one member's share without materializing the whole table.
pub fn plan_for(total: u64, group_size: usize, index: usize) -> Result<Share> {
    if group_size == 0 {
        return Err(CbfError::State("partition group size is zero".to_string()));
    }
    if index >= group_size {
        return Err(CbfError::State(format!(
            "partition index {index} outside group of {group_size}"
        )));
    }
    let g = group_size as u64;
    let i = index as u64;
    let base = total / g;
    let rem = total % g;
    let count = base + u64::from(i < rem);
    let start = if count == 0 {
        None
    } else {
        Some(i * base + i.min(rem))
    };
    Ok(Share { count, start })
}

/// Engine-level worker-thread clamp: never plan more threads than the
/// process has items, and always at least one.
pub fn clamp_workers(configured: usize, items: u64) -> usize {
    let configured = configured.max(1) as u64;
    configured.min(items.max(1)) as usize
}
