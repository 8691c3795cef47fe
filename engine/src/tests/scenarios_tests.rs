//! End-to-end scenarios from §8, driven through `Scheduler::run` exactly as
//! a real client/job would: commands and task messages on the inbound
//! channel, state read back off the published summary. Submission itself
//! goes through the `simulation` job runner, which really does spawn `true`/
//! `false` as child processes (no tokio-time-pause trickery), so every test
//! polls the summary with a generous but bounded timeout rather than
//! assuming a fixed number of ticks.

use std::time::Duration;

use common::cycling::{CyclePoint, CyclingMode};

use super::harness::build_test_scheduler;
use crate::commands::{Command, StopMode};
use crate::messages::{Severity, TaskMessage};
use crate::scheduler::SchedulerEvent;

fn point(n: i64) -> CyclePoint {
    CyclePoint::parse(&n.to_string(), CyclingMode::Integer).unwrap()
}

async fn report(tx: &tokio::sync::mpsc::Sender<SchedulerEvent>, task_name: &str, p: CyclePoint, submit_num: u32, output: &str) {
    tx.send(SchedulerEvent::TaskMessage(TaskMessage {
        task_name: task_name.to_string(),
        point: p,
        submit_num,
        severity: Severity::Info,
        output: output.to_string(),
        text: None,
    }))
    .await
    .unwrap();
}

/// Wait (bounded) until `pred` holds against the latest published summary.
async fn wait_for(rx: &mut tokio::sync::watch::Receiver<crate::summary::StateSummary>, pred: impl Fn(&crate::summary::StateSummary) -> bool) {
    for _ in 0..200 {
        if pred(&rx.borrow()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within timeout; last summary: {:?}", *rx.borrow());
}

fn task_state<'a>(summary: &'a crate::summary::StateSummary, name: &str, point: &str) -> Option<&'a str> {
    summary.tasks.iter().find(|t| t.name == name && t.point == point).map(|t| t.state.as_str())
}

/// S1 (adapted to integer cycling): `foo => bar` under `R1`. `foo` is
/// submitted automatically; once it reports success, `bar`'s same-cycle
/// prerequisite is satisfied and it in turn is submitted and reported done.
#[tokio::test]
async fn minimal_chain_runs_foo_then_bar_to_completion() {
    let toml = r#"
        [scheduling]
        initial_cycle_point = "1"
        cycling_mode = "integer"
        [scheduling.graphs]
        "R1/1" = "foo => bar"
        [cylc]
        job_runner = "simulation"
    "#;
    let (scheduler, mut summary_rx, inbound_tx, _dir) = build_test_scheduler(toml);
    let run_handle = tokio::spawn(async move {
        let mut scheduler = scheduler;
        scheduler.run().await
    });

    wait_for(&mut summary_rx, |s| task_state(s, "foo", "1") == Some("submitted")).await;
    report(&inbound_tx, "foo", point(1), 1, "started").await;
    report(&inbound_tx, "foo", point(1), 1, "succeeded").await;

    wait_for(&mut summary_rx, |s| task_state(s, "bar", "1") == Some("submitted")).await;
    report(&inbound_tx, "bar", point(1), 1, "started").await;
    report(&inbound_tx, "bar", point(1), 1, "succeeded").await;

    wait_for(&mut summary_rx, |s| task_state(s, "bar", "1") == Some("succeeded")).await;
    assert_eq!(task_state(&summary_rx.borrow(), "foo", "1"), Some("succeeded"));

    let _ = inbound_tx.send(SchedulerEvent::Command(Command::Stop { mode: StopMode::Clean })).await;
    tokio::time::timeout(Duration::from_secs(5), run_handle).await.unwrap().unwrap().unwrap();
}

/// Suicide trigger: `foo => bar` plus `foo:failed => !bar`. `bar` waits on
/// `foo` succeeding, same as an ordinary chain; if `foo` fails instead, `bar`
/// is removed from the pool instead of waiting forever.
#[tokio::test]
async fn suicide_trigger_removes_task_instead_of_running_it() {
    let toml = r#"
        [scheduling]
        initial_cycle_point = "1"
        cycling_mode = "integer"
        [scheduling.graphs]
        "R1/1" = """
        foo => bar
        foo:failed => !bar
        """
        [cylc]
        job_runner = "simulation"
    "#;
    let (scheduler, mut summary_rx, inbound_tx, _dir) = build_test_scheduler(toml);
    let run_handle = tokio::spawn(async move {
        let mut scheduler = scheduler;
        scheduler.run().await
    });

    wait_for(&mut summary_rx, |s| task_state(s, "foo", "1") == Some("submitted")).await;
    assert_eq!(task_state(&summary_rx.borrow(), "bar", "1"), Some("waiting"));

    report(&inbound_tx, "foo", point(1), 1, "started").await;
    report(&inbound_tx, "foo", point(1), 1, "failed").await;

    wait_for(&mut summary_rx, |s| task_state(s, "bar", "1").is_none()).await;
    assert_eq!(task_state(&summary_rx.borrow(), "foo", "1"), Some("failed"));

    let _ = inbound_tx.send(SchedulerEvent::Command(Command::Stop { mode: StopMode::Clean })).await;
    tokio::time::timeout(Duration::from_secs(5), run_handle).await.unwrap().unwrap().unwrap();
}

/// S3: `(a | b) => c`. With `a` failed and `b` succeeded, `c`'s
/// disjunctive prerequisite is still satisfied and it runs.
#[tokio::test]
async fn conditional_trigger_is_satisfied_by_either_branch() {
    let toml = r#"
        [scheduling]
        initial_cycle_point = "1"
        cycling_mode = "integer"
        [scheduling.graphs]
        "R1/1" = "(a | b) => c"
        [cylc]
        job_runner = "simulation"
    "#;
    let (scheduler, mut summary_rx, inbound_tx, _dir) = build_test_scheduler(toml);
    let run_handle = tokio::spawn(async move {
        let mut scheduler = scheduler;
        scheduler.run().await
    });

    wait_for(&mut summary_rx, |s| task_state(s, "a", "1") == Some("submitted") && task_state(s, "b", "1") == Some("submitted")).await;
    report(&inbound_tx, "a", point(1), 1, "started").await;
    report(&inbound_tx, "a", point(1), 1, "failed").await;
    report(&inbound_tx, "b", point(1), 1, "started").await;
    report(&inbound_tx, "b", point(1), 1, "succeeded").await;

    wait_for(&mut summary_rx, |s| task_state(s, "c", "1") == Some("submitted")).await;
    report(&inbound_tx, "c", point(1), 1, "started").await;
    report(&inbound_tx, "c", point(1), 1, "succeeded").await;
    wait_for(&mut summary_rx, |s| task_state(s, "c", "1") == Some("succeeded")).await;

    let _ = inbound_tx.send(SchedulerEvent::Command(Command::Stop { mode: StopMode::Clean })).await;
    tokio::time::timeout(Duration::from_secs(5), run_handle).await.unwrap().unwrap().unwrap();
}
