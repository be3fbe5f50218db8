use thiserror::Error;

/// Canonical CubeFlow error taxonomy used across crates.
///
/// Classification guidance:
/// - [`CbfError::InvalidConfig`]: bad or missing operator parameters, detected in `env_set`
/// - [`CbfError::MalformedSet`] / [`CbfError::RangeOutOfBounds`]: fragment range codec
///   contract violations (the latter is always a programming error)
/// - [`CbfError::LeaderFailed`]: the leader failed before filling a broadcast envelope;
///   every group member observes this variant uniformly
/// - [`CbfError::OperatorNotFound`] / [`CbfError::Load`] / [`CbfError::AlreadyLoaded`]:
///   plugin host lookup and load failures
/// - [`CbfError::State`]: lifecycle/host state machine violations (phase called without
///   operator environment, unload with live state, driver re-entry)
/// - [`CbfError::Execution`]: a worker transform or catalog write failed
/// - [`CbfError::Rollback`]: compensation itself failed; logged, never allowed to mask
///   the original cause
#[derive(Debug, Error)]
pub enum CbfError {
    /// Invalid or missing operator parameters or engine configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A fragment range set token is not an integer or a well-formed ascending range.
    #[error("malformed fragment range set: {0}")]
    MalformedSet(String),

    /// A slice request exceeded the logical bounds of a fragment range set.
    #[error("range slice out of bounds: offset {offset} + length {length} > count {count}")]
    RangeOutOfBounds {
        /// Requested 0-based element offset.
        offset: u64,
        /// Requested element count.
        length: u64,
        /// Logical element count of the sliced set.
        count: u64,
    },

    /// The leader failed before filling the broadcast envelope.
    #[error("leader failed: {0}")]
    LeaderFailed(String),

    /// Operator name is absent from the registry.
    #[error("operator not found: {0}")]
    OperatorNotFound(String),

    /// Operator was found but its factory failed to build it.
    #[error("operator load failed: {0}")]
    Load(String),

    /// A second load was attempted on a host that already holds an operator.
    #[error("operator already loaded: {0}")]
    AlreadyLoaded(String),

    /// Lifecycle or host state machine contract violation.
    #[error("state violation: {0}")]
    State(String),

    /// Runtime failure of a worker transform or catalog write.
    #[error("execution error: {0}")]
    Execution(String),

    /// Compensating cleanup failed during rollback.
    #[error("rollback error: {0}")]
    Rollback(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CbfError {
    /// Stable outcome code used by group-wide reductions.
    ///
    /// `0` is reserved for success. Codes are ordered so that a min-reduction
    /// over non-zero codes prefers configuration/coordination causes over
    /// downstream execution noise.
    pub fn outcome_code(&self) -> i64 {
        match self {
            CbfError::InvalidConfig(_) => 10,
            CbfError::OperatorNotFound(_) => 11,
            CbfError::Load(_) => 12,
            CbfError::AlreadyLoaded(_) => 13,
            CbfError::State(_) => 14,
            CbfError::LeaderFailed(_) => 20,
            CbfError::MalformedSet(_) => 30,
            CbfError::RangeOutOfBounds { .. } => 31,
            CbfError::Execution(_) => 40,
            CbfError::Io(_) => 41,
            CbfError::Rollback(_) => 50,
        }
    }
}

/// Standard CubeFlow result alias.
pub type Result<T> = std::result::Result<T, CbfError>;
