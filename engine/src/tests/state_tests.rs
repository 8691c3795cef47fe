//! Idempotent-messaging: feeding the same completion event at a proxy
//! twice must yield exactly one state change, per §8. The transition-table
//! level of this (`state::transition` rejecting a repeat) is covered inline
//! in `state.rs`; these exercise the proxy-level guard in `apply_event` that
//! a duplicated job message actually goes through.

use common::cycling::{CyclePoint, CyclingMode};

use crate::state::{Event, TaskState};
use crate::taskproxy::{TaskId, TaskProxy};

fn point() -> CyclePoint {
    CyclePoint::parse("1", CyclingMode::Integer).unwrap()
}

fn running_proxy() -> TaskProxy {
    let mut proxy = TaskProxy::new(TaskId::new("foo", point()), Vec::new(), &[], Vec::new(), Vec::new());
    proxy.state = TaskState::Running;
    proxy
}

#[test]
fn repeated_succeeded_event_yields_one_state_change() {
    let mut proxy = running_proxy();
    proxy.apply_event(Event::Succeeded).unwrap();
    assert_eq!(proxy.state, TaskState::Succeeded);

    // A duplicate message for the same submit arrives late (e.g. resent
    // after a network hiccup): applying the same event again is a no-op,
    // not an error.
    proxy.apply_event(Event::Succeeded).unwrap();
    assert_eq!(proxy.state, TaskState::Succeeded);
}

#[test]
fn a_failed_message_after_succeeded_is_also_a_no_op() {
    let mut proxy = running_proxy();
    proxy.apply_event(Event::Succeeded).unwrap();
    proxy.apply_event(Event::Failed).unwrap();
    assert_eq!(proxy.state, TaskState::Succeeded);
}

#[test]
fn hold_then_release_restores_the_pre_hold_state() {
    let mut proxy = TaskProxy::new(TaskId::new("foo", point()), Vec::new(), &[], Vec::new(), Vec::new());
    proxy.apply_event(Event::Hold).unwrap();
    assert_eq!(proxy.state, TaskState::Held);
    proxy.apply_event(Event::Release).unwrap();
    assert_eq!(proxy.state, TaskState::Waiting);
}
