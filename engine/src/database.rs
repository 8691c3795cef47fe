//! The scheduler's run database: task-state transitions, broadcast
//! mutation records, xtrigger results, and named checkpoints. Bundled
//! SQLite, exactly as `agent/src/database.rs`'s `AgentDatabase` — lazy
//! connection, WAL mode, a configurable busy timeout — generalised from
//! one-file-per-metric-type to one-file-per-record-family.

mod db_broadcast;
mod db_checkpoints;
mod db_task_states;
mod db_xtriggers;

use anyhow::Context;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use common::broadcast::BroadcastRecord;
use common::utils::current_timestamp;

use crate::error::PersistenceError;
use crate::state::TaskState;
use crate::taskproxy::TaskProxy;

pub use db_checkpoints::CheckpointRow;
pub use db_task_states::TaskStateRow;
pub use db_xtriggers::XTriggerRow;

const DATABASE_FILE: &str = "run.db";

pub struct RunDatabase {
    db_path: PathBuf,
    connection: Option<Connection>,
    busy_timeout_seconds: u64,
}

impl RunDatabase {
    pub fn new<P: AsRef<Path>>(service_dir: P, busy_timeout_seconds: u64) -> anyhow::Result<Self> {
        let service_dir = service_dir.as_ref();
        if !service_dir.exists() {
            std::fs::create_dir_all(service_dir)
                .with_context(|| format!("failed to create service directory: {}", service_dir.display()))?;
        }
        Ok(RunDatabase {
            db_path: service_dir.join(DATABASE_FILE),
            connection: None,
            busy_timeout_seconds,
        })
    }

    pub fn initialize(&mut self) -> Result<(), PersistenceError> {
        info!("initializing run database at {}", self.db_path.display());
        let conn = self.get_connection()?;
        db_task_states::create_tables(conn)?;
        db_broadcast::create_tables(conn)?;
        db_xtriggers::create_tables(conn)?;
        db_checkpoints::create_tables(conn)?;
        Ok(())
    }

    fn get_connection(&mut self) -> Result<&mut Connection, PersistenceError> {
        if self.connection.is_none() {
            let conn = Connection::open(&self.db_path)?;
            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
            conn.query_row("PRAGMA wal_autocheckpoint=1000", [], |_| Ok(()))?;
            conn.busy_timeout(std::time::Duration::from_secs(self.busy_timeout_seconds))?;
            self.connection = Some(conn);
        }
        Ok(self.connection.as_mut().unwrap())
    }

    /// Record a state transition for one task instance. Called before the
    /// event-handler dispatch fires, per the ordering guarantee in §4.10:
    /// "every state transition is persisted before its event-handler
    /// dispatch fires".
    pub fn record_transition(&mut self, proxy: &TaskProxy, outputs_json: &str) -> Result<i64, PersistenceError> {
        let now = current_timestamp();
        let row = TaskStateRow {
            cycle_point: proxy.id.point.to_string(),
            name: proxy.id.name.clone(),
            submit_num: proxy.submit_num,
            state: proxy.state.to_string(),
            time_created: now,
            time_updated: now,
            host: proxy.job_host.host.clone(),
            job_runner: None,
            job_id: proxy.job_host.batch_sys_job_id.clone(),
            outputs_json: outputs_json.to_string(),
        };
        let conn = self.get_connection()?;
        db_task_states::record_transition(conn, &row)
    }

    /// Reconstruct the latest recorded state of every task instance, used
    /// on restart to resynchronise the pool before polling still-live jobs.
    pub fn load_latest_states(&mut self) -> Result<Vec<TaskStateRow>, PersistenceError> {
        let conn = self.get_connection()?;
        db_task_states::latest_states(conn)
    }

    pub fn record_broadcast(&mut self, rec: &BroadcastRecord) -> Result<(), PersistenceError> {
        let now = current_timestamp();
        let conn = self.get_connection()?;
        db_broadcast::record(conn, rec, now)
    }

    pub fn record_broadcast_batch(&mut self, records: &[BroadcastRecord]) -> Result<(), PersistenceError> {
        for rec in records {
            self.record_broadcast(rec)?;
        }
        Ok(())
    }

    pub fn upsert_xtrigger_result(&mut self, signature: &str, satisfied: bool, result_json: &str) -> Result<(), PersistenceError> {
        let now = current_timestamp();
        let conn = self.get_connection()?;
        db_xtriggers::upsert(conn, signature, satisfied, result_json, now)
    }

    pub fn load_xtrigger_results(&mut self) -> Result<Vec<XTriggerRow>, PersistenceError> {
        let conn = self.get_connection()?;
        db_xtriggers::load_all(conn)
    }

    /// Create a named checkpoint and run a WAL checkpoint immediately
    /// after, carried over from `TaskScheduler::check_and_perform_aggregation`'s
    /// `checkpoint_wal()` call, repurposed to run after each named
    /// checkpoint rather than once a minute.
    pub fn checkpoint(&mut self, name: &str) -> Result<CheckpointRow, PersistenceError> {
        let now = current_timestamp();
        let conn = self.get_connection()?;
        let id = db_checkpoints::create_checkpoint(conn, name, now)?;
        match self.checkpoint_wal() {
            Ok(frames) => debug!("WAL checkpoint after '{}': {} frames", name, frames),
            Err(e) => warn!("failed to checkpoint WAL after '{}': {}", name, e),
        }
        Ok(CheckpointRow { id, name: name.to_string(), time_created: now })
    }

    pub fn latest_checkpoint(&mut self) -> Result<Option<CheckpointRow>, PersistenceError> {
        let conn = self.get_connection()?;
        db_checkpoints::latest_checkpoint(conn)
    }

    pub fn named_checkpoint(&mut self, name: &str) -> Result<Option<CheckpointRow>, PersistenceError> {
        let conn = self.get_connection()?;
        db_checkpoints::named_checkpoint(conn, name)
    }

    pub fn checkpoint_wal(&mut self) -> Result<i64, PersistenceError> {
        let conn = self.get_connection()?;
        let (busy, log_frames, checkpointed): (i64, i64, i64) =
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        if busy > 0 {
            debug!("WAL checkpoint: {} checkpointed, {} busy, {} total", checkpointed, busy, log_frames);
        }
        Ok(checkpointed)
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            if let Err((_, e)) = conn.close() {
                warn!("error closing run database connection: {}", e);
            } else {
                debug!("run database connection closed");
            }
        }
    }
}

/// Parse a persisted state-name string back into `TaskState`, used when
/// reconstructing proxies from `load_latest_states` on restart.
pub fn parse_task_state(s: &str) -> Option<TaskState> {
    Some(match s {
        "waiting" => TaskState::Waiting,
        "held" => TaskState::Held,
        "queued" => TaskState::Queued,
        "ready" => TaskState::Ready,
        "expired" => TaskState::Expired,
        "submitted" => TaskState::Submitted,
        "submit-failed" => TaskState::SubmitFailed,
        "submit-retrying" => TaskState::SubmitRetrying,
        "running" => TaskState::Running,
        "succeeded" => TaskState::Succeeded,
        "failed" => TaskState::Failed,
        "retrying" => TaskState::Retrying,
        "runahead" => TaskState::Runahead,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taskproxy::TaskId;
    use common::cycling::{CyclePoint, CyclingMode};

    fn temp_db() -> (tempfile::TempDir, RunDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let mut db = RunDatabase::new(dir.path(), 5).unwrap();
        db.initialize().unwrap();
        (dir, db)
    }

    #[test]
    fn records_and_restores_task_transitions() {
        let (_dir, mut db) = temp_db();
        let point = CyclePoint::parse("1", CyclingMode::Integer).unwrap();
        let proxy = TaskProxy::new(TaskId::new("foo", point), Vec::new(), &[], Vec::new(), Vec::new());
        db.record_transition(&proxy, "{}").unwrap();
        let latest = db.load_latest_states().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].name, "foo");
        assert_eq!(parse_task_state(&latest[0].state), Some(TaskState::Waiting));
    }

    #[test]
    fn checkpoint_round_trips() {
        let (_dir, mut db) = temp_db();
        db.checkpoint("before-reload").unwrap();
        let latest = db.latest_checkpoint().unwrap().unwrap();
        assert_eq!(latest.name, "before-reload");
    }

    #[test]
    fn restart_equivalence_reloads_latest_states_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let point = CyclePoint::parse("1", CyclingMode::Integer).unwrap();
        {
            let mut db = RunDatabase::new(dir.path(), 5).unwrap();
            db.initialize().unwrap();
            let mut proxy = TaskProxy::new(TaskId::new("foo", point), Vec::new(), &[], Vec::new(), Vec::new());
            db.record_transition(&proxy, "{}").unwrap();
            proxy.state = TaskState::Queued;
            db.record_transition(&proxy, "{}").unwrap();
            db.close();
        }
        let mut reopened = RunDatabase::new(dir.path(), 5).unwrap();
        reopened.initialize().unwrap();
        let latest = reopened.load_latest_states().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(parse_task_state(&latest[0].state), Some(TaskState::Queued));
    }
}
