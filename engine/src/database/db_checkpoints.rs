//! Named checkpoint records: a snapshot id and timestamp. The task and
//! broadcast tables are queryable "at checkpoint" by filtering rows with
//! `time_created <= checkpoint.time_created`.

use rusqlite::{params, Connection};

use crate::error::PersistenceError;

pub fn create_tables(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS checkpoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            time_created INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

pub fn create_checkpoint(conn: &Connection, name: &str, now: u64) -> Result<i64, PersistenceError> {
    conn.execute("INSERT INTO checkpoints (name, time_created) VALUES (?1, ?2)", params![name, now])?;
    Ok(conn.last_insert_rowid())
}

pub struct CheckpointRow {
    pub id: i64,
    pub name: String,
    pub time_created: u64,
}

pub fn latest_checkpoint(conn: &Connection) -> Result<Option<CheckpointRow>, PersistenceError> {
    conn.query_row(
        "SELECT id, name, time_created FROM checkpoints ORDER BY id DESC LIMIT 1",
        [],
        |r| Ok(CheckpointRow { id: r.get(0)?, name: r.get(1)?, time_created: r.get(2)? }),
    )
    .map(Some)
    .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e.into()) })
}

pub fn named_checkpoint(conn: &Connection, name: &str) -> Result<Option<CheckpointRow>, PersistenceError> {
    conn.query_row(
        "SELECT id, name, time_created FROM checkpoints WHERE name = ?1 ORDER BY id DESC LIMIT 1",
        params![name],
        |r| Ok(CheckpointRow { id: r.get(0)?, name: r.get(1)?, time_created: r.get(2)? }),
    )
    .map(Some)
    .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e.into()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_checkpoint_is_the_most_recently_created() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_checkpoint(&conn, "auto", 1).unwrap();
        create_checkpoint(&conn, "before-reload", 2).unwrap();
        let latest = latest_checkpoint(&conn).unwrap().unwrap();
        assert_eq!(latest.name, "before-reload");
    }

    #[test]
    fn named_checkpoint_finds_by_name() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_checkpoint(&conn, "auto", 1).unwrap();
        create_checkpoint(&conn, "manual", 2).unwrap();
        assert!(named_checkpoint(&conn, "manual").unwrap().is_some());
        assert!(named_checkpoint(&conn, "missing").unwrap().is_none());
    }
}
