//! Job submission back-ends. A closed capability set rather than dynamic
//! dispatch by name (§9 design note): `background` runs the job script as a
//! detached local process, sufficient to exercise the full state machine
//! without a real batch scheduler; `simulation` fabricates instant
//! success/failure for tests, standing in for `original_source`'s
//! `lib/cylc/job_runner_handlers/` dynamic-import mechanism.

use common::config::NamespaceConfig;

use crate::error::JobSubmitError;
use crate::subprocess::{CommandCtx, CommandKind};
use crate::taskproxy::TaskId;

/// Parsed outcome of a submit-command's stdout, e.g. a batch system's job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub job_id: String,
}

pub trait JobRunner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Render namespace directives into back-end-specific job-script header
    /// lines (e.g. `#PBS -l ...` for a batch system; empty for `background`).
    fn format_directives(&self, ns: &NamespaceConfig) -> Vec<String>;

    /// Build the command context used to submit a job for `task_id`
    /// running `script` (the fully-rendered job script text).
    fn submit_command(&self, task_id: &TaskId, ns: &NamespaceConfig, script: &str) -> CommandCtx;

    /// Build the command context used to poll a submitted job's status.
    fn poll_command(&self, task_id: &TaskId, job_id: &str) -> CommandCtx;

    /// Build the command context used to kill a running job.
    fn kill_command(&self, task_id: &TaskId, job_id: &str) -> CommandCtx;

    /// Parse a submit command's stdout into a `SubmitOutcome`.
    fn parse_submit_output(&self, stdout: &str) -> Result<SubmitOutcome, JobSubmitError>;
}

/// Runs the job script as a detached local background process, identifying
/// it by PID.
pub struct BackgroundRunner;

impl JobRunner for BackgroundRunner {
    fn name(&self) -> &'static str {
        "background"
    }

    fn format_directives(&self, _ns: &NamespaceConfig) -> Vec<String> {
        Vec::new()
    }

    fn submit_command(&self, task_id: &TaskId, _ns: &NamespaceConfig, script: &str) -> CommandCtx {
        CommandCtx {
            key: format!("submit:{}", task_id),
            kind: CommandKind::JobSubmit,
            argv: vec!["sh".to_string(), "-c".to_string(), "echo $$; exec sh".to_string()],
            stdin: Some(script.to_string()),
            env: Vec::new(),
        }
    }

    fn poll_command(&self, task_id: &TaskId, job_id: &str) -> CommandCtx {
        CommandCtx {
            key: format!("poll:{}", task_id),
            kind: CommandKind::JobPoll,
            argv: vec!["kill".to_string(), "-0".to_string(), job_id.to_string()],
            stdin: None,
            env: Vec::new(),
        }
    }

    fn kill_command(&self, task_id: &TaskId, job_id: &str) -> CommandCtx {
        CommandCtx {
            key: format!("kill:{}", task_id),
            kind: CommandKind::JobKill,
            argv: vec!["kill".to_string(), job_id.to_string()],
            stdin: None,
            env: Vec::new(),
        }
    }

    fn parse_submit_output(&self, stdout: &str) -> Result<SubmitOutcome, JobSubmitError> {
        let pid = stdout
            .lines()
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| JobSubmitError::UnparsableOutput(stdout.to_string()))?;
        Ok(SubmitOutcome { job_id: pid.to_string() })
    }
}

/// Instant synthetic success/failure, used in tests and `run_mode =
/// "simulation"` to exercise the state machine without spawning processes.
pub struct SimulationRunner {
    pub always_succeed: bool,
}

impl JobRunner for SimulationRunner {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn format_directives(&self, _ns: &NamespaceConfig) -> Vec<String> {
        Vec::new()
    }

    fn submit_command(&self, task_id: &TaskId, _ns: &NamespaceConfig, _script: &str) -> CommandCtx {
        let code = if self.always_succeed { "true" } else { "false" };
        CommandCtx {
            key: format!("submit:{}", task_id),
            kind: CommandKind::JobSubmit,
            argv: vec![code.to_string()],
            stdin: None,
            env: Vec::new(),
        }
    }

    fn poll_command(&self, task_id: &TaskId, _job_id: &str) -> CommandCtx {
        CommandCtx {
            key: format!("poll:{}", task_id),
            kind: CommandKind::JobPoll,
            argv: vec!["true".to_string()],
            stdin: None,
            env: Vec::new(),
        }
    }

    fn kill_command(&self, task_id: &TaskId, _job_id: &str) -> CommandCtx {
        CommandCtx {
            key: format!("kill:{}", task_id),
            kind: CommandKind::JobKill,
            argv: vec!["true".to_string()],
            stdin: None,
            env: Vec::new(),
        }
    }

    fn parse_submit_output(&self, _stdout: &str) -> Result<SubmitOutcome, JobSubmitError> {
        Ok(SubmitOutcome { job_id: "sim-0".to_string() })
    }
}

/// Select a runner implementation by its configured tag.
pub fn resolve_runner(tag: &str) -> Result<Box<dyn JobRunner>, JobSubmitError> {
    match tag {
        "background" => Ok(Box::new(BackgroundRunner)),
        "simulation" => Ok(Box::new(SimulationRunner { always_succeed: true })),
        other => Err(JobSubmitError::UnknownRunner(other.to_string())),
    }
}
