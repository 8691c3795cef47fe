//! Bounded pool of short-lived external commands. Directly generalises
//! `agent/src/scheduler.rs`'s `result_sender`/`result_receiver` /
//! `tokio::spawn` pattern from "run a ping" to "run an arbitrary argv" for
//! job-submit, job-poll, job-kill, xtrigger-func and event-handler calls.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::error::JobSubmitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    JobSubmit,
    JobPoll,
    JobKill,
    XtriggerFunc,
    EventHandler,
}

/// A queued external command: argv, optional stdin, optional environment
/// overlay, and an ordering key used only for diagnostics/logging.
#[derive(Debug, Clone)]
pub struct CommandCtx {
    pub key: String,
    pub kind: CommandKind,
    pub argv: Vec<String>,
    pub stdin: Option<String>,
    pub env: Vec<(String, String)>,
}

/// Populated result of a completed command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub key: String,
    pub kind: CommandKind,
    pub stdout: String,
    pub stderr: String,
    pub ret_code: i32,
}

pub struct SubprocessPool {
    semaphore: Arc<Semaphore>,
    completion_tx: mpsc::Sender<CommandResult>,
    pub completion_rx: mpsc::Receiver<CommandResult>,
    closed: bool,
    in_flight: HashMap<String, tokio::task::JoinHandle<()>>,
}

impl SubprocessPool {
    pub fn new(size: usize, channel_buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(channel_buffer);
        SubprocessPool {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
            completion_tx: tx,
            completion_rx: rx,
            closed: false,
            in_flight: HashMap::new(),
        }
    }

    /// Enqueue a command. Completion is delivered asynchronously on
    /// `completion_rx`, consumed by the main loop's `tokio::select!` —
    /// no command blocks the caller.
    pub fn put(&mut self, ctx: CommandCtx) -> Result<(), JobSubmitError> {
        if self.closed {
            return Err(JobSubmitError::PoolClosed);
        }
        let semaphore = self.semaphore.clone();
        let tx = self.completion_tx.clone();
        let key = ctx.key.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = run_child(&ctx).await;
            let _ = tx.send(result).await;
        });
        self.in_flight.insert(key, handle);
        Ok(())
    }

    /// Synchronous execution used during shutdown once the pool is closed.
    pub async fn run_command(ctx: &CommandCtx) -> CommandResult {
        run_child(ctx).await
    }

    /// Stop accepting new commands. Outstanding commands run to completion;
    /// the caller is responsible for imposing a timeout and aborting the
    /// remaining join handles if it expires.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn abort_outstanding(&mut self) {
        for (_, handle) in self.in_flight.drain() {
            handle.abort();
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

async fn run_child(ctx: &CommandCtx) -> CommandResult {
    let Some((program, args)) = ctx.argv.split_first() else {
        return CommandResult {
            key: ctx.key.clone(),
            kind: ctx.kind,
            stdout: String::new(),
            stderr: "empty argv".to_string(),
            ret_code: -1,
        };
    };

    let mut cmd = TokioCommand::new(program);
    cmd.args(args)
        .envs(ctx.env.iter().cloned())
        .stdin(if ctx.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!("failed to spawn command '{}': {}", ctx.key, e);
            return CommandResult {
                key: ctx.key.clone(),
                kind: ctx.kind,
                stdout: String::new(),
                stderr: e.to_string(),
                ret_code: -1,
            };
        }
    };

    if let Some(stdin_text) = &ctx.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(stdin_text.as_bytes()).await;
        }
    }

    match child.wait_with_output().await {
        Ok(output) => {
            debug!("command '{}' exited with {:?}", ctx.key, output.status.code());
            CommandResult {
                key: ctx.key.clone(),
                kind: ctx.kind,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                ret_code: output.status.code().unwrap_or(-1),
            }
        }
        Err(e) => CommandResult {
            key: ctx.key.clone(),
            kind: ctx.kind,
            stdout: String::new(),
            stderr: e.to_string(),
            ret_code: -1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_trivial_command_and_captures_stdout() {
        let ctx = CommandCtx {
            key: "t1".to_string(),
            kind: CommandKind::JobSubmit,
            argv: vec!["echo".to_string(), "hello".to_string()],
            stdin: None,
            env: vec![],
        };
        let result = SubprocessPool::run_command(&ctx).await;
        assert_eq!(result.ret_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn pool_delivers_completion_on_channel() {
        let mut pool = SubprocessPool::new(2, 16);
        pool.put(CommandCtx {
            key: "t2".to_string(),
            kind: CommandKind::JobPoll,
            argv: vec!["true".to_string()],
            stdin: None,
            env: vec![],
        })
        .unwrap();
        let result = pool.completion_rx.recv().await.unwrap();
        assert_eq!(result.key, "t2");
        assert_eq!(result.ret_code, 0);
    }

    #[tokio::test]
    async fn closed_pool_rejects_new_commands() {
        let mut pool = SubprocessPool::new(1, 4);
        pool.close();
        let err = pool.put(CommandCtx {
            key: "t3".to_string(),
            kind: CommandKind::JobKill,
            argv: vec!["true".to_string()],
            stdin: None,
            env: vec![],
        });
        assert!(err.is_err());
    }
}
