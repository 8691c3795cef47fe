//! Per-transition task state records, one row per `(cycle_point, name,
//! submit_num, state)` change.

use rusqlite::{params, Connection};

use crate::error::PersistenceError;
use crate::state::TaskState;

pub fn create_tables(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS task_states (
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
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_states_lookup ON task_states(name, cycle_point)",
        [],
    )?;
    Ok(())
}

pub struct TaskStateRow {
    pub cycle_point: String,
    pub name: String,
    pub submit_num: u32,
    pub state: String,
    pub time_created: u64,
    pub time_updated: u64,
    pub host: Option<String>,
    pub job_runner: Option<String>,
    pub job_id: Option<String>,
    pub outputs_json: String,
}

pub fn record_transition(conn: &Connection, row: &TaskStateRow) -> Result<i64, PersistenceError> {
    conn.execute(
        "INSERT INTO task_states
            (cycle_point, name, submit_num, state, time_created, time_updated, host, job_runner, job_id, outputs_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            row.cycle_point,
            row.name,
            row.submit_num,
            row.state,
            row.time_created,
            row.time_updated,
            row.host,
            row.job_runner,
            row.job_id,
            row.outputs_json,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The latest recorded state per `(name, cycle_point)`, used to
/// reconstruct proxies on restart.
pub fn latest_states(conn: &Connection) -> Result<Vec<TaskStateRow>, PersistenceError> {
    let mut stmt = conn.prepare(
        "SELECT cycle_point, name, submit_num, state, time_created, time_updated, host, job_runner, job_id, outputs_json
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
                time_created: r.get(4)?,
                time_updated: r.get(5)?,
                host: r.get(6)?,
                job_runner: r.get(7)?,
                job_id: r.get(8)?,
                outputs_json: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn state_to_string(state: TaskState) -> String {
    state.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn row(point: &str, name: &str, submit_num: u32, state: &str) -> TaskStateRow {
        TaskStateRow {
            cycle_point: point.to_string(),
            name: name.to_string(),
            submit_num,
            state: state.to_string(),
            time_created: 1,
            time_updated: 1,
            host: None,
            job_runner: None,
            job_id: None,
            outputs_json: "{}".to_string(),
        }
    }

    #[test]
    fn records_and_reads_back_the_latest_state_only() {
        let conn = conn();
        record_transition(&conn, &row("1", "foo", 1, "waiting")).unwrap();
        record_transition(&conn, &row("1", "foo", 1, "queued")).unwrap();
        let latest = latest_states(&conn).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].state, "queued");
    }

    #[test]
    fn tracks_distinct_cycle_points_independently() {
        let conn = conn();
        record_transition(&conn, &row("1", "foo", 1, "waiting")).unwrap();
        record_transition(&conn, &row("2", "foo", 1, "waiting")).unwrap();
        assert_eq!(latest_states(&conn).unwrap().len(), 2);
    }
}
