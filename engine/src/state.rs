//! Per-instance task lifecycle. Mirrors the `SchedulerState` enum the agent
//! used to track its own run state, generalised to the richer per-task
//! lifecycle a cycling task pool needs: holds, retries, runahead, and
//! expiry all show up as states here rather than side flags.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StateTransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Waiting,
    Held,
    Queued,
    Ready,
    Expired,
    Submitted,
    SubmitFailed,
    SubmitRetrying,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Runahead,
}

impl TaskState {
    /// States from which a successor in the next cycle may already be spawned
    /// (i.e. this instance is no longer "in flight").
    pub fn is_final(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Expired)
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskState::Submitted
                | TaskState::Running
                | TaskState::SubmitRetrying
                | TaskState::Retrying
        )
    }

    /// Priority used by the state-summary rollup when collapsing a family's
    /// children into one representative state (higher sorts first).
    pub fn summary_priority(self) -> u8 {
        match self {
            TaskState::Failed => 12,
            TaskState::SubmitFailed => 11,
            TaskState::Running => 10,
            TaskState::Submitted => 9,
            TaskState::Retrying => 8,
            TaskState::SubmitRetrying => 7,
            TaskState::Ready => 6,
            TaskState::Queued => 5,
            TaskState::Held => 4,
            TaskState::Waiting => 3,
            TaskState::Expired => 2,
            TaskState::Succeeded => 1,
            TaskState::Runahead => 0,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Waiting => "waiting",
            TaskState::Held => "held",
            TaskState::Queued => "queued",
            TaskState::Ready => "ready",
            TaskState::Expired => "expired",
            TaskState::Submitted => "submitted",
            TaskState::SubmitFailed => "submit-failed",
            TaskState::SubmitRetrying => "submit-retrying",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Retrying => "retrying",
            TaskState::Runahead => "runahead",
        };
        write!(f, "{}", s)
    }
}

/// Events that drive state transitions. Each carries just enough context for
/// `transition` to decide; the caller (task pool / scheduler loop) is
/// responsible for deciding *when* to raise one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Prerequisites, xtriggers, queue limit and runahead window are all
    /// clear; not held.
    ReadyToRun,
    /// The internal queue admitted the task for submission.
    QueueAdmitted,
    /// The job-submit command was accepted by the submission back-end.
    SubmitAccepted,
    /// Submission itself failed (back-end rejected the command).
    SubmitFailed,
    /// A "started" message was received, or a job-poll reports running.
    Started,
    /// A "succeeded" message was received, or poll reports zero exit.
    Succeeded,
    /// A "failed" message was received, or poll reports non-zero exit.
    Failed,
    /// A retry delay remains after a submission or execution failure.
    RetryArmed,
    /// All retries exhausted; terminal failure.
    RetriesExhausted,
    /// Hold requested by command or broadcast.
    Hold,
    /// Release a previous hold, restoring the prior state.
    Release,
    /// The task's expiration offset from its cycle point elapsed while
    /// unsubmitted.
    Expire,
    /// The minimum active cycle point advanced past this instance's runahead
    /// bound, releasing it into `waiting`.
    RunaheadReleased,
}

/// The prior (non-held) state, remembered so `Release` can restore it.
/// Only `waiting` and `queued` are ever held (§4.5): "held tasks never
/// leave waiting/queued upward".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeldFrom {
    Waiting,
    Queued,
}

/// Apply `event` to `current`, returning the new state or a
/// `StateTransitionError::Invalid` if the transition has no meaning.
///
/// Idempotent by construction: a transition table has no entry for "success
/// received twice", so a duplicate message lands on an already-terminal
/// state and is rejected by the caller rather than silently reapplied — see
/// `TaskProxy::apply_event`, which checks `is_final`/`is_active` before
/// calling this at all.
pub fn transition(
    current: TaskState,
    event: &Event,
    held_from: Option<HeldFrom>,
) -> Result<TaskState, StateTransitionError> {
    use TaskState::*;

    let invalid = |to: TaskState| StateTransitionError::Invalid {
        task_id: String::new(),
        from: current,
        to,
        event: format!("{:?}", event),
    };

    match (current, event) {
        (Waiting, Event::ReadyToRun) => Ok(Queued),
        (Waiting, Event::Hold) => Ok(Held),
        (Waiting, Event::Expire) => Ok(Expired),
        (Waiting, Event::RunaheadReleased) => Ok(Waiting),

        (Runahead, Event::RunaheadReleased) => Ok(Waiting),
        (Runahead, Event::Hold) => Ok(Held),

        (Queued, Event::QueueAdmitted) => Ok(Ready),
        (Queued, Event::Hold) => Ok(Held),
        (Queued, Event::Expire) => Ok(Expired),

        (Ready, Event::SubmitAccepted) => Ok(Submitted),
        (Ready, Event::SubmitFailed) => Ok(SubmitFailed),

        (Held, Event::Release) => match held_from {
            Some(HeldFrom::Waiting) => Ok(Waiting),
            Some(HeldFrom::Queued) => Ok(Queued),
            None => Ok(Waiting),
        },

        (Submitted, Event::Started) => Ok(Running),
        (Submitted, Event::SubmitFailed) => Ok(SubmitFailed),
        (Submitted, Event::RetryArmed) => Ok(SubmitRetrying),
        (Submitted, Event::Failed) => Ok(Failed),

        (SubmitFailed, Event::RetryArmed) => Ok(SubmitRetrying),
        (SubmitFailed, Event::RetriesExhausted) => Ok(SubmitFailed),
        (SubmitRetrying, Event::SubmitAccepted) => Ok(Submitted),

        (Running, Event::Succeeded) => Ok(Succeeded),
        (Running, Event::Failed) => Ok(Failed),
        (Running, Event::RetryArmed) => Ok(Retrying),
        (Retrying, Event::SubmitAccepted) => Ok(Submitted),
        (Retrying, Event::RetriesExhausted) => Ok(Failed),
        (SubmitRetrying, Event::RetriesExhausted) => Ok(SubmitFailed),

        _ => Err(invalid(current)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_to_queued_on_ready() {
        assert_eq!(
            transition(TaskState::Waiting, &Event::ReadyToRun, None).unwrap(),
            TaskState::Queued
        );
    }

    #[test]
    fn full_happy_path() {
        let mut s = TaskState::Waiting;
        for ev in [
            Event::ReadyToRun,
            Event::QueueAdmitted,
            Event::SubmitAccepted,
            Event::Started,
            Event::Succeeded,
        ] {
            s = transition(s, &ev, None).unwrap();
        }
        assert_eq!(s, TaskState::Succeeded);
    }

    #[test]
    fn succeeded_twice_is_rejected() {
        assert!(transition(TaskState::Succeeded, &Event::Succeeded, None).is_err());
    }

    #[test]
    fn held_restores_prior_state() {
        let held = transition(TaskState::Queued, &Event::Hold, None).unwrap();
        assert_eq!(held, TaskState::Held);
        let restored = transition(held, &Event::Release, Some(HeldFrom::Queued)).unwrap();
        assert_eq!(restored, TaskState::Queued);
    }

    #[test]
    fn retry_chain_through_submit_failed() {
        let mut s = TaskState::Ready;
        s = transition(s, &Event::SubmitFailed, None).unwrap();
        assert_eq!(s, TaskState::SubmitFailed);
        s = transition(s, &Event::RetryArmed, None).unwrap();
        assert_eq!(s, TaskState::SubmitRetrying);
        s = transition(s, &Event::SubmitAccepted, None).unwrap();
        assert_eq!(s, TaskState::Submitted);
    }

    #[test]
    fn expiry_only_from_waiting_or_queued() {
        assert!(transition(TaskState::Waiting, &Event::Expire, None).is_ok());
        assert!(transition(TaskState::Queued, &Event::Expire, None).is_ok());
        assert!(transition(TaskState::Running, &Event::Expire, None).is_err());
    }

    #[test]
    fn runahead_releases_into_waiting() {
        assert_eq!(
            transition(TaskState::Runahead, &Event::RunaheadReleased, None).unwrap(),
            TaskState::Waiting
        );
    }
}
