use serde::{Deserialize, Serialize};

/// Engine behavior/configuration knobs shared by every group member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads per process; clamped to the process's own item count at
    /// execution time so no thread ever receives an empty mandatory share.
    pub worker_threads: usize,
    /// Max attempts for a hook reporting a retryable failure.
    pub max_hook_attempts: u32,
    /// Base retry backoff in milliseconds, doubled per attempt.
    pub retry_backoff_base_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_hook_attempts: 3,
            retry_backoff_base_ms: 250,
        }
    }
}
