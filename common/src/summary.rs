//! The shape of a published scheduler snapshot: shared between `engine`,
//! which builds one from the live task pool every tick, and `query`, which
//! reconstructs one by reading the run database of a scheduler it doesn't
//! share memory with. Plain data only — no engine-internal types, so a
//! query process that never links `engine` can still deserialize (or
//! rebuild) the same shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Held,
    Stopping,
    RunningToStop,
    RunningToHold,
    Stalled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub name: String,
    pub point: String,
    pub state: String,
    pub submit_num: u32,
    pub host: Option<String>,
    pub job_id: Option<String>,
    pub submitted_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub mean_elapsed_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilySummary {
    pub name: String,
    pub point: String,
    pub rollup_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub cycling_mode: String,
    pub min_active_point: Option<String>,
    pub max_active_point: Option<String>,
    pub runahead_bound: Option<String>,
    pub status: RunStatus,
    pub states_histogram: BTreeMap<String, usize>,
    pub tasks: Vec<TaskSummary>,
    pub families: Vec<FamilySummary>,
}

impl StateSummary {
    /// A summary with no known tasks, used before the first read of a
    /// run database succeeds, or for a workflow that hasn't seeded any
    /// tasks yet.
    pub fn empty(cycling_mode: impl Into<String>) -> Self {
        StateSummary {
            cycling_mode: cycling_mode.into(),
            min_active_point: None,
            max_active_point: None,
            runahead_bound: None,
            status: RunStatus::Running,
            states_histogram: BTreeMap::new(),
            tasks: Vec::new(),
            families: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_has_no_tasks_or_histogram_entries() {
        let summary = StateSummary::empty("integer");
        assert!(summary.tasks.is_empty());
        assert!(summary.states_histogram.is_empty());
        assert_eq!(summary.status, RunStatus::Running);
    }
}
