//! Xtrigger results keyed by call signature, so a satisfied xtrigger is not
//! re-evaluated after a restart.

use rusqlite::{params, Connection};

use crate::error::PersistenceError;

pub fn create_tables(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS xtrigger_results (
            signature TEXT PRIMARY KEY,
            satisfied INTEGER NOT NULL,
            result_json TEXT NOT NULL,
            time_updated INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

pub fn upsert(conn: &Connection, signature: &str, satisfied: bool, result_json: &str, now: u64) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT INTO xtrigger_results (signature, satisfied, result_json, time_updated)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(signature) DO UPDATE SET satisfied = excluded.satisfied, result_json = excluded.result_json, time_updated = excluded.time_updated",
        params![signature, satisfied as i64, result_json, now],
    )?;
    Ok(())
}

pub struct XTriggerRow {
    pub signature: String,
    pub satisfied: bool,
    pub result_json: String,
}

pub fn load_all(conn: &Connection) -> Result<Vec<XTriggerRow>, PersistenceError> {
    let mut stmt = conn.prepare("SELECT signature, satisfied, result_json FROM xtrigger_results")?;
    let rows = stmt
        .query_map([], |r| {
            let satisfied: i64 = r.get(1)?;
            Ok(XTriggerRow { signature: r.get(0)?, satisfied: satisfied != 0, result_json: r.get(2)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
