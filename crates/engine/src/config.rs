use serde::{Deserialize, Serialize};

use crate::identity::DEFAULT_SWEEP_THRESHOLD;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trace every finalized statement with its bound arguments.
    pub log_sql: bool,
    /// Identity cache size at which dead entries are swept.
    pub cache_sweep_threshold: usize,
    /// Look up rows by update-on-conflict unique fields before inserting.
    pub resolve_unique_conflicts: bool,
    /// Repeat the natural-key lookup once when an insert hits a unique constraint.
    pub retry_on_constraint_violation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_sql: false,
            cache_sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
            resolve_unique_conflicts: true,
            retry_on_constraint_violation: true,
        }
    }
}
