//! Read-only access to a scheduler's run database. The scheduler
//! (`engine::database::RunDatabase`) is the sole writer; this module
//! never creates tables or opens the file for writing, matching the
//! "single-writer" policy. Table/column names are kept in lockstep with
//! `engine/src/database/db_task_states.rs` and `db_checkpoints.rs` by
//! hand, since the two crates don't share a database module.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};

const DATABASE_FILE: &str = "run.db";

pub struct TaskStateRow {
    pub cycle_point: String,
    pub name: String,
    pub submit_num: u32,
    pub state: String,
    pub time_updated: u64,
    pub host: Option<String>,
    pub job_id: Option<String>,
}

pub struct CheckpointRow {
    pub id: i64,
    pub name: String,
    pub time_created: u64,
}

/// Opens `run.db` in the given `.service` directory read-only. Errors if
/// the scheduler hasn't created it yet (the caller should retry rather
/// than treat this as fatal — the query process may start before the
/// scheduler does).
pub struct QueryDatabase {
    db_path: PathBuf,
}

impl QueryDatabase {
    pub fn new(service_dir: impl AsRef<Path>) -> Self {
        QueryDatabase { db_path: service_dir.as_ref().join(DATABASE_FILE) }
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open run database read-only at {}", self.db_path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    /// The latest recorded state per `(name, cycle_point)`.
    pub fn latest_task_states(&self) -> Result<Vec<TaskStateRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT cycle_point, name, submit_num, state, time_updated, host, job_id
             FROM task_states t
             WHERE t.id = (
                 SELECT MAX(id) FROM task_states t2
                 WHERE t2.name = t.name AND t2.cycle_point = t.cycle_point
             )",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(TaskStateRow {
                    cycle_point: r.get(0)?,
                    name: r.get(1)?,
                    submit_num: r.get(2)?,
                    state: r.get(3)?,
                    time_updated: r.get(4)?,
                    host: r.get(5)?,
                    job_id: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All recorded transitions for one task instance, oldest first, used
    /// by the `/tasks/:name/:point` history endpoint.
    pub fn task_history(&self, name: &str, cycle_point: &str) -> Result<Vec<TaskStateRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT cycle_point, name, submit_num, state, time_updated, host, job_id
             FROM task_states WHERE name = ?1 AND cycle_point = ?2 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([name, cycle_point], |r| {
                Ok(TaskStateRow {
                    cycle_point: r.get(0)?,
                    name: r.get(1)?,
                    submit_num: r.get(2)?,
                    state: r.get(3)?,
                    time_updated: r.get(4)?,
                    host: r.get(5)?,
                    job_id: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id, name, time_created FROM checkpoints ORDER BY id DESC")?;
        let rows = stmt
            .query_map([], |r| Ok(CheckpointRow { id: r.get(0)?, name: r.get(1)?, time_created: r.get(2)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join(DATABASE_FILE)).unwrap();
        conn.execute(
            "CREATE TABLE task_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle_point TEXT NOT NULL,
                name TEXT NOT NULL,
                submit_num INTEGER NOT NULL,
                state TEXT NOT NULL,
                time_created INTEGER NOT NULL,
                time_updated INTEGER NOT NULL,
                host TEXT,
                job_runner TEXT,
                job_id TEXT,
                outputs_json TEXT NOT NULL
            )",
            [],
        )
        .unwrap();
        conn.execute(
            "CREATE TABLE checkpoints (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, time_created INTEGER NOT NULL)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO task_states (cycle_point, name, submit_num, state, time_created, time_updated, host, job_runner, job_id, outputs_json)
             VALUES ('1', 'foo', 1, 'waiting', 1, 1, NULL, NULL, NULL, '{}')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO task_states (cycle_point, name, submit_num, state, time_created, time_updated, host, job_runner, job_id, outputs_json)
             VALUES ('1', 'foo', 1, 'succeeded', 2, 2, 'localhost', NULL, '123', '{}')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO checkpoints (name, time_created) VALUES ('auto', 1)",
            [],
        )
        .unwrap();
        dir
    }

    #[test]
    fn latest_task_states_returns_only_the_most_recent_row_per_instance() {
        let dir = seeded_db();
        let db = QueryDatabase::new(dir.path());
        let latest = db.latest_task_states().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].state, "succeeded");
        assert_eq!(latest[0].job_id.as_deref(), Some("123"));
    }

    #[test]
    fn task_history_returns_every_transition_in_order() {
        let dir = seeded_db();
        let db = QueryDatabase::new(dir.path());
        let history = db.task_history("foo", "1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].state, "waiting");
        assert_eq!(history[1].state, "succeeded");
    }

    #[test]
    fn list_checkpoints_returns_seeded_rows() {
        let dir = seeded_db();
        let db = QueryDatabase::new(dir.path());
        let checkpoints = db.list_checkpoints().unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].name, "auto");
    }

    #[test]
    fn opening_a_missing_database_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let db = QueryDatabase::new(dir.path());
        assert!(db.latest_task_states().is_err());
    }
}
