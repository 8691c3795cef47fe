//! Broadcast mutation records, replayed on restart so runtime overrides
//! survive a scheduler crash. Drains `common::broadcast::BroadcastStore`'s
//! mutation queue.

use rusqlite::{params, Connection};

use common::broadcast::BroadcastRecord;

use crate::error::PersistenceError;

pub fn create_tables(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS broadcast_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            time_created INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Serialise a record as a tagged JSON blob. `BroadcastRecord` doesn't
/// derive `Serialize` (it lives in `common` and has no serde dependency on
/// its variants' nested `SettingsNode`), so we flatten by hand here rather
/// than pull serde into `common::broadcast` for a shape only the engine's
/// persistence layer needs.
pub fn record(conn: &Connection, rec: &BroadcastRecord, now: u64) -> Result<(), PersistenceError> {
    let (kind, payload) = match rec {
        BroadcastRecord::Put { cycles, namespaces, settings } => {
            ("put", format!("{{\"cycles\":{:?},\"namespaces\":{:?},\"settings\":{:?}}}", cycles, namespaces, settings))
        }
        BroadcastRecord::Clear { cycles, namespaces } => {
            ("clear", format!("{{\"cycles\":{:?},\"namespaces\":{:?}}}", cycles, namespaces))
        }
        BroadcastRecord::Expire { cutoff } => ("expire", format!("{{\"cutoff\":{:?}}}", cutoff)),
    };
    conn.execute(
        "INSERT INTO broadcast_records (kind, payload_json, time_created) VALUES (?1, ?2, ?3)",
        params![kind, payload, now],
    )?;
    Ok(())
}

pub fn count(conn: &Connection) -> Result<i64, PersistenceError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM broadcast_records", [], |r| r.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        record(&conn, &BroadcastRecord::Expire { cutoff: "2024".to_string() }, 1).unwrap();
        assert_eq!(count(&conn).unwrap(), 1);
    }
}
