//! Per-join execution metadata attached to the final response.

use serde::Serialize;

/// One record per resolved join, in resolution order (children before
/// their parent, siblings in discovery order).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinExecutionStat {
    /// Field of the outer query that was restricted.
    pub source_field: String,
    /// Index (or comma-joined indices) the lookup ran against.
    pub target_index: String,
    /// Field whose values were collected.
    pub target_field: String,
    /// Size of the resolved value set.
    pub value_count: usize,
    /// Lookup time in milliseconds. Zero on a cache hit.
    pub execution_time: u64,
    pub cache_hit: bool,
}

/// The ordered stats for one coordinated search, rendered into the
/// response under `coordinate_search.actions`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinateSearchMetadata {
    pub actions: Vec<JoinExecutionStat>,
}

impl CoordinateSearchMetadata {
    pub fn new(actions: Vec<JoinExecutionStat>) -> Self {
        CoordinateSearchMetadata { actions }
    }
}
