//! The scheduler's main loop: one cooperative `tokio::select!` over inbound
//! messages, subprocess-pool completions, and a tick interval. Directly
//! generalises `agent/src/scheduler.rs`'s `process_scheduler_tick` /
//! `result_sender`/`result_receiver` pattern from one command kind
//! (ping/http/…) to the five kinds in `engine::subprocess`, and from a flat
//! task list to the full pool/state-machine/xtrigger/broadcast stack.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use common::broadcast::BroadcastRecord;
use common::cycling::CyclePoint;
use common::prerequisite::Atom;

use crate::commands::{Command, StopMode};
use crate::context::SchedulerContext;
use crate::messages::{self, TaskMessage};
use crate::state::{Event, TaskState};
use crate::subprocess::{CommandKind, CommandResult};
use crate::summary::{self, RunStatus, StateSummary};
use crate::taskproxy::TaskId;
use crate::xtrigger::XTriggerCall;

/// Everything that can arrive on the scheduler's single inbound queue.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    TaskMessage(TaskMessage),
    Command(Command),
}

pub struct Scheduler {
    ctx: SchedulerContext,
    inbound_rx: mpsc::Receiver<SchedulerEvent>,
    summary_tx: watch::Sender<StateSummary>,
    tick: Duration,
    stop_mode: Option<StopMode>,
    stalled_abort: bool,
}

impl Scheduler {
    pub fn new(ctx: SchedulerContext, inbound_rx: mpsc::Receiver<SchedulerEvent>, tick: Duration) -> (Self, watch::Receiver<StateSummary>) {
        let initial = summary::build_summary(&ctx.pool, "", RunStatus::Running, &Default::default());
        let (summary_tx, summary_rx) = watch::channel(initial);
        (Scheduler { ctx, inbound_rx, summary_tx, tick, stop_mode: None, stalled_abort: false }, summary_rx)
    }

    /// Set after `run()` returns if the pool stalled with `abort_on_stall`
    /// configured, so the caller can choose exit code 2 per §6.
    pub fn stalled_abort(&self) -> bool {
        self.stalled_abort
    }

    /// Run until a stop condition is reached and in-flight work has
    /// drained. Mirrors §4.10's tick: receive, apply, evaluate xtriggers,
    /// dispatch, housekeep, publish, sleep.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.ctx.database.initialize()?;
        info!("scheduler started for suite '{}'", self.ctx.suite_name);
        self.seed_initial_tasks();

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                maybe_event = self.inbound_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event)?,
                        None => {
                            warn!("inbound channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(result) = self.ctx.subprocess_pool.completion_rx.recv() => {
                    self.handle_subprocess_result(result)?;
                }

                _ = ticker.tick() => {
                    self.housekeep()?;
                    self.publish_summary();
                }
            }

            if self.should_stop() {
                break;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn handle_event(&mut self, event: SchedulerEvent) -> anyhow::Result<()> {
        match event {
            SchedulerEvent::TaskMessage(msg) => self.handle_task_message(msg),
            SchedulerEvent::Command(cmd) => self.handle_command(cmd),
        }
    }

    /// Authenticate against the instance's current submit number, apply the
    /// corresponding state event, persist the transition, then re-evaluate
    /// downstream prerequisites that reference the newly completed output.
    /// Ordering per §4.10: state effects, then db record, then event
    /// handler dispatch, before the next message is taken off the queue.
    fn handle_task_message(&mut self, msg: TaskMessage) -> anyhow::Result<()> {
        let current_submit_num = self.ctx.pool.get(&msg.task_name, &msg.point).map(|p| p.submit_num);
        let authenticated = match messages::authenticate(msg, current_submit_num) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping task message: {}", e);
                return Ok(());
            }
        };

        let task_id = TaskId::new(authenticated.task_name.clone(), authenticated.point);
        let event = match authenticated.output.as_str() {
            "started" => Some(Event::Started),
            "succeeded" => Some(Event::Succeeded),
            "failed" => Some(Event::Failed),
            _ => None,
        };

        if let Some(proxy) = self.ctx.pool.get_mut(&authenticated.task_name, &authenticated.point) {
            proxy.outputs.set_completed(&authenticated.output);
            if let Some(ev) = &event {
                proxy.apply_event(ev.clone())?;
                if matches!(ev, Event::Succeeded | Event::Failed) {
                    proxy.record_finish(matches!(ev, Event::Succeeded));
                }
            }
            let outputs_json = format!("{:?}", proxy.outputs);
            self.ctx.database.record_transition(proxy, &outputs_json)?;
            self.dispatch_event_handlers(&task_id, &authenticated.output);
        }

        self.satisfy_downstream(&task_id, &authenticated.output);
        self.apply_suicide_triggers();
        Ok(())
    }

    /// Propagate a newly completed output to every other proxy's
    /// prerequisites that reference `(task_id, output)`.
    fn satisfy_downstream(&mut self, task_id: &TaskId, output: &str) {
        let id_str = task_id.to_string();
        for proxy in self.ctx.pool.iter_mut() {
            proxy.satisfy_prerequisite(&id_str, output);
        }
    }

    /// Remove any proxy whose suicide trigger (`=> !task`) just became
    /// satisfied, per §4.2/§9: it is dropped from the pool instead of being
    /// allowed to run.
    fn apply_suicide_triggers(&mut self) {
        let doomed: Vec<(String, CyclePoint)> = self
            .ctx
            .pool
            .iter()
            .filter(|p| !p.state.is_final() && p.should_suicide())
            .map(|p| (p.id.name.clone(), p.id.point))
            .collect();
        for (name, point) in doomed {
            info!("suicide trigger satisfied for {}.{}, removing from pool", name, point);
            self.ctx.pool.remove(&name, &point);
        }
    }

    fn dispatch_event_handlers(&mut self, task_id: &TaskId, output: &str) {
        let handler = self
            .ctx
            .config
            .runtime
            .get(&task_id.name)
            .and_then(|ns| ns.events.get(output))
            .or_else(|| self.ctx.config.cylc.events.get(output))
            .cloned();
        let Some(handler) = handler else { return };
        let ctx = crate::subprocess::CommandCtx {
            key: format!("event-handler:{}:{}", task_id, output),
            kind: CommandKind::EventHandler,
            argv: vec![handler, task_id.to_string(), output.to_string()],
            stdin: None,
            env: Vec::new(),
        };
        if let Err(e) = self.ctx.subprocess_pool.put(ctx) {
            warn!("failed to dispatch event handler for {}: {}", output, e);
        }
    }

    fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Hold { tasks } => {
                for (name, point) in tasks {
                    if let Some(proxy) = self.ctx.pool.get_mut(&name, &point) {
                        let _ = proxy.apply_event(Event::Hold);
                    }
                }
            }
            Command::Release { tasks } => {
                for (name, point) in tasks {
                    if let Some(proxy) = self.ctx.pool.get_mut(&name, &point) {
                        let _ = proxy.apply_event(Event::Release);
                    }
                }
            }
            Command::Stop { mode } => {
                info!("stop requested: {:?}", mode);
                self.stop_mode = Some(mode);
                self.ctx.stop_requested = true;
            }
            Command::Trigger { tasks } => {
                for (name, point) in tasks {
                    self.submit_task(&TaskId::new(name, point));
                }
            }
            Command::Poll { tasks } => {
                for (name, point) in tasks {
                    self.poll_task(&name, &point);
                }
            }
            Command::Kill { tasks } => {
                for (name, point) in tasks {
                    self.kill_task(&name, &point);
                }
            }
            Command::Remove { tasks } => {
                for (name, point) in tasks {
                    self.ctx.pool.remove(&name, &point);
                }
            }
            Command::Insert { tasks } => {
                for (name, point) in tasks {
                    self.insert_task(&name, point);
                }
            }
            Command::ResetState { task, point, state } => {
                if let Some(proxy) = self.ctx.pool.get_mut(&task, &point) {
                    proxy.state = state;
                }
            }
            Command::SetRunahead { .. } => {
                warn!("runahead limit changes take effect on restart in this build");
            }
            Command::BroadcastPut { cycles, namespaces, settings } => {
                self.ctx.broadcast.put(&cycles, &namespaces, &settings);
            }
            Command::BroadcastClear { cycles, namespaces } => {
                self.ctx.broadcast.clear(cycles.as_deref(), namespaces.as_deref());
            }
            Command::BroadcastExpire { cutoff } => {
                self.ctx.broadcast.expire(&cutoff);
            }
            Command::Reload => {
                info!("reload requested; config is re-read on next restart in this build");
            }
            Command::Checkpoint { name } => {
                self.ctx.database.checkpoint(&name)?;
            }
            Command::Nudge => {}
        }
        self.flush_broadcast_queue()?;
        Ok(())
    }

    fn flush_broadcast_queue(&mut self) -> anyhow::Result<()> {
        let records: Vec<BroadcastRecord> = self.ctx.broadcast.drain_queue();
        if !records.is_empty() {
            self.ctx.database.record_broadcast_batch(&records)?;
        }
        Ok(())
    }

    /// Seed the pool with each task's first instance on its registered
    /// sequences. Run once at startup, before the event loop begins.
    fn seed_initial_tasks(&mut self) {
        let names: Vec<String> = self.ctx.defs.names().map(|s| s.to_string()).collect();
        for name in names {
            for point in self.ctx.pool.first_points(&name) {
                if self.ctx.pool.get(&name, &point).is_none() {
                    self.insert_task(&name, point);
                }
            }
        }
    }

    fn insert_task(&mut self, name: &str, point: CyclePoint) {
        let Some(def) = self.ctx.defs.get(name) else {
            warn!("cannot insert unknown task '{}'", name);
            return;
        };
        let prerequisites = self
            .ctx
            .graph
            .materialise_for(name, &point, self.ctx.cycling_mode, &self.ctx.initial_point)
            .map(|exprs| exprs.into_iter().map(common::prerequisite::Prerequisite::new).collect())
            .unwrap_or_default();
        let suicide_triggers = self
            .ctx
            .graph
            .suicide_triggers_for(name, &point, self.ctx.cycling_mode, &self.ctx.initial_point)
            .map(|exprs| exprs.into_iter().map(common::prerequisite::Prerequisite::new).collect())
            .unwrap_or_default();
        let execution_retry_delays = def
            .execution_retry_delays
            .iter()
            .filter_map(|d| common::cycling::Interval::parse_iso(&format!("PT{}S", d.as_secs())).ok())
            .collect();
        let submission_retry_delays = def
            .submission_retry_delays
            .iter()
            .filter_map(|d| common::cycling::Interval::parse_iso(&format!("PT{}S", d.as_secs())).ok())
            .collect();
        let proxy = crate::taskproxy::TaskProxy::new(
            TaskId::new(name.to_string(), point),
            prerequisites,
            &def.custom_outputs,
            execution_retry_delays,
            submission_retry_delays,
        )
        .with_suicide_triggers(suicide_triggers);
        self.ctx.pool.insert(proxy);
    }

    fn poll_task(&mut self, name: &str, point: &CyclePoint) {
        let Some(proxy) = self.ctx.pool.get(name, point) else { return };
        let Some(job_id) = proxy.job_host.batch_sys_job_id.clone() else { return };
        let ctx = self.ctx.job_runner.poll_command(&TaskId::new(name.to_string(), *point), &job_id);
        let _ = self.ctx.subprocess_pool.put(ctx);
    }

    fn kill_task(&mut self, name: &str, point: &CyclePoint) {
        let Some(proxy) = self.ctx.pool.get(name, point) else { return };
        let Some(job_id) = proxy.job_host.batch_sys_job_id.clone() else { return };
        let ctx = self.ctx.job_runner.kill_command(&TaskId::new(name.to_string(), *point), &job_id);
        let _ = self.ctx.subprocess_pool.put(ctx);
    }

    fn handle_subprocess_result(&mut self, result: CommandResult) -> anyhow::Result<()> {
        match result.kind {
            CommandKind::XtriggerFunc => {
                if let Some((name, point)) = self.find_waiting_xtrigger_owner(&result.key) {
                    self.ctx.xtriggers.handle_completion(&result, &mut self.ctx.broadcast, &point);
                    self.ctx.database.upsert_xtrigger_result(&result.key, result.ret_code == 0, &result.stdout)?;
                    self.flush_broadcast_queue()?;
                    self.apply_xtrigger_result(&name, &point, &result.key);
                }
            }
            CommandKind::JobSubmit => self.handle_submit_result(result)?,
            CommandKind::JobPoll => self.handle_poll_result(result)?,
            CommandKind::JobKill | CommandKind::EventHandler => {
                debug!("command '{}' completed with code {}", result.key, result.ret_code);
            }
        }
        Ok(())
    }

    /// Find any proxy still waiting on an unresolved xtrigger atom whose
    /// call signature matches `signature`, so the corresponding cycle point
    /// can be passed to broadcast injection.
    fn find_waiting_xtrigger_owner(&self, signature: &str) -> Option<(String, CyclePoint)> {
        for proxy in self.ctx.pool.iter() {
            for prereq in &proxy.prerequisites {
                for (atom, satisfied) in prereq.atoms() {
                    if satisfied {
                        continue;
                    }
                    if let Some(label) = atom.task_id.strip_prefix('@') {
                        if self.xtrigger_call_for(label, &proxy.id.name, &proxy.id.point).map(|c| c.signature()) == Some(signature.to_string()) {
                            return Some((proxy.id.name.clone(), proxy.id.point));
                        }
                    }
                }
            }
        }
        None
    }

    fn apply_xtrigger_result(&mut self, name: &str, point: &CyclePoint, signature: &str) {
        let atoms: Vec<Atom> = match self.ctx.pool.get(name, point) {
            Some(proxy) => proxy.prerequisites.iter().flat_map(|p| p.atoms().map(|(a, _)| a.clone())).collect(),
            None => return,
        };

        let mut resolved = Vec::new();
        for atom in &atoms {
            if let Some(label) = atom.task_id.strip_prefix('@') {
                if let Some(call) = self.xtrigger_call_for(label, name, point) {
                    if call.signature() == signature && self.ctx.xtriggers.is_satisfied(&call) {
                        resolved.push(atom.task_id.clone());
                    }
                }
            }
        }

        if resolved.is_empty() {
            return;
        }
        if let Some(proxy) = self.ctx.pool.get_mut(name, point) {
            for prereq in &mut proxy.prerequisites {
                for task_id in &resolved {
                    prereq.satisfy_output(task_id, "satisfied");
                }
            }
        }
    }

    fn xtrigger_call_for(&self, label: &str, task_name: &str, point: &CyclePoint) -> Option<XTriggerCall> {
        let spec = self.ctx.config.scheduling.xtriggers.get(label)?;
        let (function, args) = parse_xtrigger_spec(spec);
        let call = XTriggerCall { label: label.to_string(), function, args, kwargs: Vec::new(), interval: Duration::from_secs(60) };
        Some(call.templated_for(task_name, point, &self.ctx.suite_name))
    }

    fn handle_submit_result(&mut self, result: CommandResult) -> anyhow::Result<()> {
        let Some((name, point)) = parse_task_key(&result.key) else { return Ok(()) };
        let success = result.ret_code == 0;
        if let Some(proxy) = self.ctx.pool.get_mut(&name, &point) {
            if success {
                match self.ctx.job_runner.parse_submit_output(&result.stdout) {
                    Ok(outcome) => {
                        proxy.job_host.batch_sys_job_id = Some(outcome.job_id);
                        proxy.timing.submitted_at = Some(std::time::SystemTime::now());
                        let _ = proxy.apply_event(Event::SubmitAccepted);
                    }
                    Err(e) => {
                        warn!("unparsable submit output for {}: {}", result.key, e);
                        let _ = proxy.apply_event(Event::SubmitFailed);
                    }
                }
            } else {
                let _ = proxy.apply_event(Event::SubmitFailed);
                if !proxy.submission_retry_delays.is_empty() {
                    let _ = proxy.apply_event(Event::RetryArmed);
                } else {
                    let _ = proxy.apply_event(Event::RetriesExhausted);
                }
            }
            let outputs_json = format!("{:?}", proxy.outputs);
            self.ctx.database.record_transition(proxy, &outputs_json)?;
        }
        Ok(())
    }

    fn handle_poll_result(&mut self, result: CommandResult) -> anyhow::Result<()> {
        let Some((name, point)) = parse_task_key(&result.key) else { return Ok(()) };
        if let Some(proxy) = self.ctx.pool.get_mut(&name, &point) {
            let event = if result.stdout.contains("running") {
                Some(Event::Started)
            } else if result.ret_code == 0 {
                Some(Event::Succeeded)
            } else {
                Some(Event::Failed)
            };
            if let Some(ev) = event {
                let _ = proxy.apply_event(ev);
            }
        }
        Ok(())
    }

    /// Evaluate clock/generic xtriggers, then dispatch ready tasks, spawn
    /// successors, release runahead, expire stale tasks, and clean up
    /// terminal instances past their cleanup cutoff (§4.10 steps 3-6).
    fn housekeep(&mut self) -> anyhow::Result<()> {
        self.evaluate_xtriggers();
        self.dispatch_ready_tasks()?;
        self.ctx.spawn_successors();
        self.ctx.pool.release_runahead();
        self.expire_unsubmitted();

        if self.ctx.pool.is_stalled() {
            warn!("task pool stalled for suite '{}'", self.ctx.suite_name);
            if self.ctx.config.scheduling.abort_on_stall {
                self.stalled_abort = true;
                self.ctx.stop_requested = true;
                self.stop_mode.get_or_insert(StopMode::Now);
            }
        }

        let cutoffs: HashMap<(String, CyclePoint), Option<CyclePoint>> = self
            .ctx
            .pool
            .iter()
            .map(|p| ((p.id.name.clone(), p.id.point), self.ctx.cleanup_cutoff_for(p)))
            .collect();
        self.ctx.pool.cleanup_terminal(|p| *cutoffs.get(&(p.id.name.clone(), p.id.point)).unwrap_or(&None));

        if let Some(min) = self.ctx.pool.min_active_point() {
            self.ctx.broadcast.expire(&min.to_string());
        }
        self.flush_broadcast_queue()?;
        Ok(())
    }

    /// For every unresolved xtrigger atom (`@label`), check if it's already
    /// satisfied from a cached result or dispatch the call through the
    /// subprocess pool, throttled/memoized by `XTriggerManager`.
    fn evaluate_xtriggers(&mut self) {
        let pending: Vec<(String, CyclePoint, Atom)> = self
            .ctx
            .pool
            .iter()
            .flat_map(|p| {
                p.prerequisites
                    .iter()
                    .flat_map(|prereq| prereq.atoms())
                    .filter(|(_, satisfied)| !satisfied)
                    .filter_map(|(atom, _)| atom.task_id.strip_prefix('@').map(|_| (p.id.name.clone(), p.id.point, atom.clone())))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (task_name, point, atom) in pending {
            let label = atom.task_id.trim_start_matches('@').to_string();
            let Some(call) = self.xtrigger_call_for(&label, &task_name, &point) else { continue };
            if self.ctx.xtriggers.is_satisfied(&call) {
                if let Some(proxy) = self.ctx.pool.get_mut(&task_name, &point) {
                    proxy.satisfy_prerequisite(&atom.task_id, "satisfied");
                }
                continue;
            }
            self.ctx.xtriggers.maybe_dispatch(&call, &mut self.ctx.subprocess_pool);
        }
    }

    fn dispatch_ready_tasks(&mut self) -> anyhow::Result<()> {
        let ready: Vec<TaskId> = self
            .ctx
            .pool
            .iter()
            .filter(|p| matches!(p.state, TaskState::Waiting) && p.is_ready_to_queue())
            .map(|p| p.id.clone())
            .collect();

        for id in ready {
            if let Some(proxy) = self.ctx.pool.get_mut(&id.name, &id.point) {
                proxy.apply_event(Event::ReadyToRun)?;
                proxy.apply_event(Event::QueueAdmitted)?;
                proxy.begin_new_submit();
            }
            self.submit_task(&id);
        }
        Ok(())
    }

    fn submit_task(&mut self, id: &TaskId) {
        let ns = self.ctx.config.runtime.get(&id.name).cloned().unwrap_or_default();
        let script = ns.script.clone().unwrap_or_else(|| "true".to_string());
        let ctx = self.ctx.job_runner.submit_command(id, &ns, &script);
        let _ = self.ctx.subprocess_pool.put(ctx);
    }

    fn expire_unsubmitted(&mut self) {
        let Some(now) = self.ctx.pool.min_active_point() else { return };
        let expired: Vec<TaskId> = self
            .ctx
            .pool
            .iter()
            .filter(|p| matches!(p.state, TaskState::Waiting | TaskState::Queued))
            .filter(|p| {
                self.ctx
                    .defs
                    .get(&p.id.name)
                    .and_then(|d| d.expiration_offset.as_ref())
                    .and_then(|off| common::cycling::Interval::parse_iso(off).ok())
                    .and_then(|iv| p.id.point.add(&iv).ok())
                    .map(|cutoff| cutoff <= now)
                    .unwrap_or(false)
            })
            .map(|p| p.id.clone())
            .collect();
        for id in expired {
            if let Some(proxy) = self.ctx.pool.get_mut(&id.name, &id.point) {
                let _ = proxy.apply_event(Event::Expire);
            }
        }
    }

    fn should_stop(&self) -> bool {
        if !self.ctx.stop_requested {
            return self.ctx.config.cylc.auto_shutdown_when_empty && self.ctx.pool.is_empty();
        }
        match &self.stop_mode {
            Some(StopMode::Now) => true,
            Some(StopMode::Clean) | None => self.ctx.subprocess_pool.in_flight_count() == 0,
            Some(StopMode::AfterPoint(p)) => self.ctx.pool.min_active_point().map(|m| m > *p).unwrap_or(true),
            Some(StopMode::AfterTask(name, point)) => self.ctx.pool.get(name, point).map(|p| p.state.is_final()).unwrap_or(true),
            Some(StopMode::AfterClock(_)) => true,
        }
    }

    fn current_status(&self) -> RunStatus {
        if self.ctx.stop_requested {
            RunStatus::Stopping
        } else if self.ctx.pool.is_stalled() {
            RunStatus::Stalled
        } else {
            RunStatus::Running
        }
    }

    fn publish_summary(&mut self) {
        let families = Default::default();
        let summary = summary::build_summary(&self.ctx.pool, cycling_mode_str(self.ctx.cycling_mode), self.current_status(), &families);
        let _ = self.summary_tx.send(summary);
    }

    async fn shutdown(&mut self) {
        info!("shutting down scheduler for suite '{}'", self.ctx.suite_name);
        self.ctx.subprocess_pool.close();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.ctx.config.cylc.graceful_shutdown_timeout_seconds);
        while self.ctx.subprocess_pool.in_flight_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::select! {
                Some(result) = self.ctx.subprocess_pool.completion_rx.recv() => {
                    let _ = self.handle_subprocess_result(result);
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        if self.ctx.subprocess_pool.in_flight_count() > 0 {
            warn!("graceful shutdown timeout reached; aborting {} outstanding commands", self.ctx.subprocess_pool.in_flight_count());
            self.ctx.subprocess_pool.abort_outstanding();
        }
        if let Err(e) = self.ctx.database.checkpoint_wal() {
            warn!("final WAL checkpoint failed: {}", e);
        }
        self.ctx.database.close();
    }
}

fn cycling_mode_str(mode: common::cycling::CyclingMode) -> &'static str {
    match mode {
        common::cycling::CyclingMode::Iso8601 => "iso8601",
        common::cycling::CyclingMode::Integer => "integer",
    }
}

/// Keys produced by `JobRunner` implementations look like
/// `submit:foo.3`/`poll:foo.3`/`kill:foo.3`; strip the verb prefix before
/// splitting the trailing `name.point`.
fn parse_task_key(key: &str) -> Option<(String, CyclePoint)> {
    let without_prefix = key.split_once(':').map(|(_, rest)| rest).unwrap_or(key);
    let (name, point_str) = without_prefix.rsplit_once('.')?;
    let mode = if point_str.chars().all(|c| c.is_ascii_digit() || c == '-') {
        common::cycling::CyclingMode::Integer
    } else {
        common::cycling::CyclingMode::Iso8601
    };
    let point = CyclePoint::parse(point_str, mode).ok()?;
    Some((name.to_string(), point))
}

/// Parse an xtrigger call spec, `function(arg1, arg2)`, into its function
/// name and positional argument list. A spec with no parentheses is taken
/// as a bare function name with no arguments.
fn parse_xtrigger_spec(spec: &str) -> (String, Vec<String>) {
    let spec = spec.trim();
    match spec.find('(') {
        Some(open) if spec.ends_with(')') => {
            let function = spec[..open].trim().to_string();
            let inner = &spec[open + 1..spec.len() - 1];
            let args = if inner.trim().is_empty() {
                Vec::new()
            } else {
                inner.split(',').map(|a| a.trim().to_string()).collect()
            };
            (function, args)
        }
        _ => (spec.to_string(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_key_with_verb_prefix() {
        let (name, point) = parse_task_key("submit:foo.3").unwrap();
        assert_eq!(name, "foo");
        assert_eq!(point, CyclePoint::parse("3", common::cycling::CyclingMode::Integer).unwrap());
    }

    #[test]
    fn rejects_a_key_with_no_point_separator() {
        assert!(parse_task_key("submit:foo").is_none());
    }

    #[test]
    fn xtrigger_spec_parses_function_and_args() {
        let (function, args) = parse_xtrigger_spec("echo(foo, %(point)s)");
        assert_eq!(function, "echo");
        assert_eq!(args, vec!["foo".to_string(), "%(point)s".to_string()]);
    }

    #[test]
    fn xtrigger_spec_without_parens_has_no_args() {
        let (function, args) = parse_xtrigger_spec("wall_clock");
        assert_eq!(function, "wall_clock");
        assert!(args.is_empty());
    }
}
