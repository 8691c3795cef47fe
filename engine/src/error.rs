//! Error types specific to the scheduler daemon: state-machine transitions,
//! job submission, and run-database persistence. Config/cycling/sequence
//! errors live in `common::error` since they're shared with the query
//! surface; these three are engine-only because they touch `rusqlite` and
//! runtime task state that the query crate never mutates.

use common::cycling::CyclePoint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("task {task_id} cannot move from {from:?} to {to:?} on event {event}")]
    Invalid {
        task_id: String,
        from: crate::state::TaskState,
        to: crate::state::TaskState,
        event: String,
    },
    #[error("task {0} has no outstanding prerequisites to satisfy")]
    NoOutstandingPrerequisites(String),
}

#[derive(Debug, Error)]
pub enum JobSubmitError {
    #[error("job runner '{0}' is not recognised")]
    UnknownRunner(String),
    #[error("failed to launch job for {task_id} at {point}: {source}")]
    Launch {
        task_id: String,
        point: CyclePoint,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse job submission output: {0}")]
    UnparsableOutput(String),
    #[error("subprocess pool is closed")]
    PoolClosed,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed row: {0}")]
    MalformedRow(String),
}

#[derive(Debug, Error)]
pub enum XTriggerError {
    #[error(transparent)]
    Config(#[from] common::error::ConfigError),
    #[error("xtrigger function '{0}' is not recognised")]
    UnknownFunction(String),
    #[error("xtrigger subprocess failed: {0}")]
    SubprocessFailed(String),
}
