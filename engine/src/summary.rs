//! Publishable snapshot of scheduler state. Generalises `server/src/api.rs`
//! from "aggregate many agents' metrics" to "serve one scheduler's live
//! snapshot". The data shape lives in `common::summary` (the `query`
//! binary reconstructs the same shape from the run database, without
//! linking this crate); this module holds the logic that builds one from
//! a live `TaskPool` each tick and publishes it on a `tokio::sync::watch`
//! channel.

use std::collections::BTreeMap;

pub use common::summary::{FamilySummary, RunStatus, StateSummary, TaskSummary};

use crate::pool::TaskPool;
use crate::state::TaskState;

/// Deterministic family rollup priority: failed > submit-failed > running >
/// submitted > … > succeeded > runahead, per §4.12.
pub fn rollup_state(children: &[TaskState]) -> Option<TaskState> {
    children.iter().copied().max_by_key(|s| s.summary_priority())
}

pub fn build_summary(pool: &TaskPool, cycling_mode: &str, status: RunStatus, families: &BTreeMap<String, Vec<(String, TaskState)>>) -> StateSummary {
    let mut tasks = Vec::new();
    let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
    let mut max_point = None;

    for proxy in pool.iter() {
        let state_name = proxy.state.to_string();
        *histogram.entry(state_name.clone()).or_insert(0) += 1;
        max_point = Some(match max_point {
            Some(m) if m >= proxy.id.point => m,
            _ => proxy.id.point,
        });
        tasks.push(TaskSummary {
            name: proxy.id.name.clone(),
            point: proxy.id.point.to_string(),
            state: state_name,
            submit_num: proxy.submit_num,
            host: proxy.job_host.host.clone(),
            job_id: proxy.job_host.batch_sys_job_id.clone(),
            submitted_at: proxy.timing.submitted_at.map(format_time),
            started_at: proxy.timing.started_at.map(format_time),
            finished_at: proxy.timing.finished_at.map(format_time),
            mean_elapsed_seconds: proxy.mean_elapsed_seconds(),
        });
    }

    let family_summaries = families
        .iter()
        .filter_map(|(point_str, members)| {
            let states: Vec<TaskState> = members.iter().map(|(_, s)| *s).collect();
            rollup_state(&states).map(|rolled| FamilySummary {
                name: "FAMILY".to_string(),
                point: point_str.clone(),
                rollup_state: rolled.to_string(),
            })
        })
        .collect();

    StateSummary {
        cycling_mode: cycling_mode.to_string(),
        min_active_point: pool.min_active_point().map(|p| p.to_string()),
        max_active_point: max_point.map(|p| p.to_string()),
        runahead_bound: pool.runahead_bound().map(|p| p.to_string()),
        status,
        states_histogram: histogram,
        tasks,
        families: family_summaries,
    }
}

fn format_time(t: std::time::SystemTime) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = t.into();
    datetime.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollup_prefers_failed_over_running() {
        let rolled = rollup_state(&[TaskState::Running, TaskState::Failed, TaskState::Succeeded]);
        assert_eq!(rolled, Some(TaskState::Failed));
    }

    #[test]
    fn rollup_of_empty_children_is_none() {
        assert_eq!(rollup_state(&[]), None);
    }

    #[test]
    fn build_summary_on_empty_pool_has_empty_histogram() {
        let pool = TaskPool::new(common::cycling::Interval::Int(1), None);
        let families = BTreeMap::new();
        let summary = build_summary(&pool, "integer", RunStatus::Running, &families);
        assert!(summary.tasks.is_empty());
        assert!(summary.states_histogram.is_empty());
    }
}
