//! Per-invocation engine state shared with every lifecycle hook.

use std::collections::HashMap;

use cbf_common::{CbfError, ContainerId, CubeId, FragmentId, Result};

use crate::partition::Share;
use crate::rangeset::FragmentRangeSet;

/// String-keyed operator parameters supplied at `env_set`.
pub type OperatorParams = HashMap<String, String>;

/// Per-invocation state carried through every lifecycle hook.
///
/// Exactly one live handle exists per process per operator invocation; the
/// plugin host rejects re-entry. The fragment set starts as the full set
/// installed in `task_init` and is replaced by the process's own slice during
/// `task_distribute`.
#[derive(Debug)]
pub struct TaskHandle {
    /// Operator name this invocation runs.
    pub operator: String,
    /// This process's 0-based rank.
    pub rank: usize,
    /// Process-group size.
    pub group_size: usize,
    /// Operator parameters.
    pub params: OperatorParams,
    /// Input cube, set by the operator during `env_set`/`task_init`.
    pub input_cube: Option<CubeId>,
    /// Output cube record created by the leader, if the operator produces one.
    pub output_cube: Option<CubeId>,
    /// Container owning the output cube, for rollback of childless containers.
    pub output_container: Option<ContainerId>,
    /// This process's window of the partitioned sequence, set at distribution.
    pub share: Option<Share>,
    /// Fragment identifiers this process intends to create; the rollback
    /// ledger. Derived from the same partition slice as the forward work.
    pub created_fragments: Vec<FragmentId>,
    /// Accumulated output lines reported to the caller on completion.
    pub output_lines: Vec<String>,
    /// Local status code; 0 until a phase fails.
    pub status: i64,
    fragment_set: Option<FragmentRangeSet>,
}

impl TaskHandle {
    pub fn new(operator: &str, rank: usize, group_size: usize, params: OperatorParams) -> Self {
        Self {
            operator: operator.to_string(),
            rank,
            group_size,
            params,
            input_cube: None,
            output_cube: None,
            output_container: None,
            share: None,
            created_fragments: Vec::new(),
            output_lines: Vec::new(),
            status: 0,
            fragment_set: None,
        }
    }

    /// Required parameter lookup, failing with `InvalidConfig` when absent.
    pub fn require_param(&self, key: &str) -> Result<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| CbfError::InvalidConfig(format!("missing parameter: {key}")))
    }

    /// Install a fragment set, replacing (and dropping) any previous one.
    pub fn install_fragment_set(&mut self, set: FragmentRangeSet) {
        self.fragment_set = Some(set);
    }

    pub fn fragment_set(&self) -> Option<&FragmentRangeSet> {
        self.fragment_set.as_ref()
    }

    /// Fragment set accessor for phases that require it to exist already.
    pub fn require_fragment_set(&self) -> Result<&FragmentRangeSet> {
        self.fragment_set.as_ref().ok_or_else(|| {
            CbfError::State("phase requires a fragment set that was never installed".to_string())
        })
    }

    /// Whether this process received a non-empty share at distribution.
    pub fn has_work(&self) -> bool {
        self.share.is_some_and(|s| s.has_work())
    }

    pub fn record_created(&mut self, ids: impl IntoIterator<Item = FragmentId>) {
        self.created_fragments.extend(ids);
    }

    pub fn push_output(&mut self, line: impl Into<String>) {
        self.output_lines.push(line.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_param_reports_missing_key() {
        let handle = TaskHandle::new("delete", 0, 1, OperatorParams::new());
        let err = handle.require_param("cube").expect_err("missing");
        assert!(matches!(err, CbfError::InvalidConfig(_)));
    }

    #[test]
    fn fragment_set_is_required_after_install_contract() {
        let mut handle = TaskHandle::new("delete", 0, 1, OperatorParams::new());
        assert!(matches!(
            handle.require_fragment_set(),
            Err(CbfError::State(_))
        ));
        handle.install_fragment_set(FragmentRangeSet::from_contiguous(1, 3).expect("set"));
        assert_eq!(handle.require_fragment_set().expect("set").count(), 3);
    }
}
