//! Task-to-scheduler messaging. Each job, on behalf of a specific `(task,
//! cycle-point, submit-num)`, reports `started`/`succeeded`/`failed` or a
//! custom-output message back to the scheduler. Authentication binds the
//! message to the submit number current when it was sent: a message from a
//! stale submit (e.g. a retried job's first attempt reporting late) is
//! dropped, mirroring the agent's submit-num-as-capability convention.

use common::cycling::CyclePoint;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMessage {
    pub task_name: String,
    pub point: CyclePoint,
    pub submit_num: u32,
    pub severity: Severity,
    pub output: String,
    pub text: Option<String>,
}

#[derive(Debug, Error)]
pub enum MessageAuthError {
    #[error("message for {task_name}.{point} submit #{got} ignored: current submit is #{expected}")]
    StaleSubmit { task_name: String, point: CyclePoint, got: u32, expected: u32 },
    #[error("no such task instance {task_name}.{point}")]
    UnknownTask { task_name: String, point: CyclePoint },
}

/// Authenticate a message against the pool's current submit number for the
/// named instance. Returns the message unchanged if it's current.
pub fn authenticate(msg: TaskMessage, current_submit_num: Option<u32>) -> Result<TaskMessage, MessageAuthError> {
    match current_submit_num {
        None => Err(MessageAuthError::UnknownTask { task_name: msg.task_name, point: msg.point }),
        Some(expected) if expected != msg.submit_num => Err(MessageAuthError::StaleSubmit {
            task_name: msg.task_name.clone(),
            point: msg.point,
            got: msg.submit_num,
            expected,
        }),
        Some(_) => Ok(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::cycling::CyclingMode;

    fn point() -> CyclePoint {
        CyclePoint::parse("1", CyclingMode::Integer).unwrap()
    }

    #[test]
    fn current_submit_message_authenticates() {
        let msg = TaskMessage {
            task_name: "foo".to_string(),
            point: point(),
            submit_num: 2,
            severity: Severity::Info,
            output: "succeeded".to_string(),
            text: None,
        };
        assert!(authenticate(msg, Some(2)).is_ok());
    }

    #[test]
    fn stale_submit_message_is_rejected() {
        let msg = TaskMessage {
            task_name: "foo".to_string(),
            point: point(),
            submit_num: 1,
            severity: Severity::Info,
            output: "succeeded".to_string(),
            text: None,
        };
        assert!(matches!(authenticate(msg, Some(2)), Err(MessageAuthError::StaleSubmit { .. })));
    }
}
