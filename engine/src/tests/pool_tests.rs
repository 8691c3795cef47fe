//! Pool invariants not already exercised by `pool.rs`'s own inline tests:
//! no orphan proxies, and cutoff safety.

use common::cycling::{CyclePoint, CyclingMode, Interval, Sequence};
use common::graph::DependencyGraph;
use common::taskdef::{TaskDef, TaskDefRegistry};

use crate::pool::TaskPool;
use crate::state::TaskState;
use crate::taskproxy::{TaskId, TaskProxy};

fn point(n: i64) -> CyclePoint {
    CyclePoint::parse(&n.to_string(), CyclingMode::Integer).unwrap()
}

#[test]
fn spawned_successors_always_land_on_a_registered_sequence() {
    let mut pool = TaskPool::new(Interval::Int(5), None);
    let seq = Sequence::parse("P1", CyclingMode::Integer, Some(&point(1)), None).unwrap();
    pool.register_sequences("foo", vec![seq.clone()]);

    let mut proxy = TaskProxy::new(TaskId::new("foo", point(1)), Vec::new(), &[], Vec::new(), Vec::new());
    proxy.state = TaskState::Running;
    pool.insert(proxy);

    let mut defs = TaskDefRegistry::new();
    defs.insert(TaskDef::new("foo"));
    let graph = DependencyGraph::new();

    pool.spawn_successors(&defs, &graph, CyclingMode::Integer, &point(1));

    assert_eq!(pool.len(), 2);
    for proxy in pool.iter() {
        assert!(seq.on_sequence(&proxy.id.point), "proxy at {} is off its task's sequence", proxy.id.point);
    }
}

#[test]
fn terminal_proxy_is_retained_while_a_downstream_dependent_could_still_reference_it() {
    let mut pool = TaskPool::new(Interval::Int(5), None);
    pool.register_sequences("foo", vec![Sequence::parse("P1", CyclingMode::Integer, Some(&point(1)), None).unwrap()]);

    let mut upstream = TaskProxy::new(TaskId::new("foo", point(1)), Vec::new(), &[], Vec::new(), Vec::new());
    upstream.state = TaskState::Succeeded;
    pool.insert(upstream);

    let mut downstream = TaskProxy::new(TaskId::new("bar", point(2)), Vec::new(), &[], Vec::new(), Vec::new());
    downstream.state = TaskState::Waiting;
    pool.insert(downstream);

    // foo[-P1] => bar means bar@2 can still reference foo@1's output; the
    // cutoff for foo@1 is therefore point 2, not point 1.
    pool.cleanup_terminal(|p| if p.id.name == "foo" { Some(point(2)) } else { None });
    assert!(pool.get("foo", &point(1)).is_some(), "foo@1 was dropped before its cutoff");

    // Once the minimum active point passes the cutoff, it's safe to drop.
    pool.remove("bar", &point(2));
    pool.insert(TaskProxy::new(TaskId::new("bar", point(3)), Vec::new(), &[], Vec::new(), Vec::new()));
    pool.cleanup_terminal(|p| if p.id.name == "foo" { Some(point(2)) } else { None });
    assert!(pool.get("foo", &point(1)).is_none(), "foo@1 was retained past its cutoff");
}
