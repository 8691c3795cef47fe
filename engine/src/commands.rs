//! Client command surface. Represented as an in-process enum fed into the
//! same inbound queue as task messages; the CLI/RPC transport that would
//! construct these over the wire is out of scope (§6).

use common::broadcast::SettingsNode;
use common::cycling::CyclePoint;

#[derive(Debug, Clone, PartialEq)]
pub enum StopMode {
    Clean,
    Now,
    AfterPoint(CyclePoint),
    AfterTask(String, CyclePoint),
    AfterClock(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Hold { tasks: Vec<(String, CyclePoint)> },
    Release { tasks: Vec<(String, CyclePoint)> },
    Stop { mode: StopMode },
    Trigger { tasks: Vec<(String, CyclePoint)> },
    Poll { tasks: Vec<(String, CyclePoint)> },
    Kill { tasks: Vec<(String, CyclePoint)> },
    Remove { tasks: Vec<(String, CyclePoint)> },
    Insert { tasks: Vec<(String, CyclePoint)> },
    ResetState { task: String, point: CyclePoint, state: crate::state::TaskState },
    SetRunahead { limit: common::cycling::Interval },
    BroadcastPut { cycles: Vec<String>, namespaces: Vec<String>, settings: SettingsNode },
    BroadcastClear { cycles: Option<Vec<String>>, namespaces: Option<Vec<String>> },
    BroadcastExpire { cutoff: String },
    Reload,
    Checkpoint { name: String },
    Nudge,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::cycling::CyclingMode;

    #[test]
    fn stop_mode_carries_the_target_point() {
        let point = CyclePoint::parse("2024-01-01T00:00:00Z", CyclingMode::Iso8601).unwrap();
        let cmd = Command::Stop { mode: StopMode::AfterPoint(point) };
        assert!(matches!(cmd, Command::Stop { mode: StopMode::AfterPoint(_) }));
    }
}
