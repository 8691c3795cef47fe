//! Clock and generic xtrigger evaluation. Clock triggers are pure
//! functions evaluated synchronously; generic xtriggers are dispatched
//! through the subprocess pool, memoized by call signature, and their
//! results land in the broadcast store as environment overrides — matching
//! the `ready_tag` style example from the scenario tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use common::broadcast::BroadcastStore;
use common::cycling::CyclePoint;
use tracing::{debug, warn};

use crate::subprocess::{CommandCtx, CommandKind, CommandResult, SubprocessPool};

/// A call descriptor: function name, positional/keyword args, polling
/// interval. `signature()` is the canonical string the manager memoizes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XTriggerCall {
    pub label: String,
    pub function: String,
    pub args: Vec<String>,
    pub kwargs: Vec<(String, String)>,
    pub interval: Duration,
}

impl XTriggerCall {
    pub fn signature(&self) -> String {
        let mut kwargs = self.kwargs.clone();
        kwargs.sort();
        let kwargs_str: Vec<String> = kwargs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}({})", self.function, self.args.iter().chain(kwargs_str.iter()).cloned().collect::<Vec<_>>().join(","))
    }

    /// Substitute `%(name)s`, `%(point)s`, `%(suite_name)s`, `%(debug)s`
    /// style templates in each arg/kwarg value for a specific task.
    pub fn templated_for(&self, task_name: &str, point: &CyclePoint, suite_name: &str) -> XTriggerCall {
        let subst = |s: &str| -> String {
            s.replace("%(name)s", task_name)
                .replace("%(point)s", &point.to_string())
                .replace("%(suite_name)s", suite_name)
                .replace("%(debug)s", "false")
        };
        XTriggerCall {
            label: self.label.clone(),
            function: self.function.clone(),
            args: self.args.iter().map(|a| subst(a)).collect(),
            kwargs: self.kwargs.iter().map(|(k, v)| (k.clone(), subst(v))).collect(),
            interval: self.interval,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedResult {
    satisfied: bool,
    result: HashMap<String, String>,
    next_allowed_call: Option<Instant>,
}

pub struct XTriggerManager {
    cache: HashMap<String, CachedResult>,
    active: HashMap<String, ()>,
    suite_name: String,
}

impl XTriggerManager {
    pub fn new(suite_name: impl Into<String>) -> Self {
        XTriggerManager {
            cache: HashMap::new(),
            active: HashMap::new(),
            suite_name: suite_name.into(),
        }
    }

    /// Pure clock trigger evaluation: `satisfied` iff `now >= point + offset`.
    /// Memoized per clock signature so repeated checks within the same tick
    /// are cheap.
    pub fn check_clock_trigger(&mut self, point: &CyclePoint, offset: &common::cycling::Interval, now: &CyclePoint) -> bool {
        let signature = format!("clock({},{})", point, offset);
        if let Some(cached) = self.cache.get(&signature) {
            return cached.satisfied;
        }
        let satisfied = match point.add(offset) {
            Ok(target) => match (target, now) {
                (common::cycling::CyclePoint::Iso(t), common::cycling::CyclePoint::Iso(n)) => t.datetime() <= n.datetime(),
                (common::cycling::CyclePoint::Int(t), common::cycling::CyclePoint::Int(n)) => t.0 <= n.0,
                _ => false,
            },
            Err(_) => false,
        };
        self.cache.insert(
            signature,
            CachedResult { satisfied, result: HashMap::new(), next_allowed_call: None },
        );
        satisfied
    }

    /// Is this signature already satisfied (from a previous call)?
    pub fn is_satisfied(&self, call: &XTriggerCall) -> bool {
        self.cache.get(&call.signature()).map(|c| c.satisfied).unwrap_or(false)
    }

    pub fn result_of(&self, call: &XTriggerCall) -> Option<&HashMap<String, String>> {
        self.cache.get(&call.signature()).map(|c| &c.result)
    }

    /// Dispatch a generic xtrigger call through the subprocess pool, unless
    /// already satisfied, already in flight, or throttled by a prior
    /// negative result's `next_allowed_call`.
    pub fn maybe_dispatch(&mut self, call: &XTriggerCall, pool: &mut SubprocessPool) {
        let signature = call.signature();
        if self.cache.get(&signature).map(|c| c.satisfied).unwrap_or(false) {
            return;
        }
        if self.active.contains_key(&signature) {
            return;
        }
        if let Some(cached) = self.cache.get(&signature) {
            if let Some(next) = cached.next_allowed_call {
                if Instant::now() < next {
                    return;
                }
            }
        }

        let mut argv = vec!["xtrigger-func".to_string(), call.function.clone()];
        argv.extend(call.args.iter().cloned());
        for (k, v) in &call.kwargs {
            argv.push(format!("--{}={}", k, v));
        }
        let ctx = CommandCtx {
            key: signature.clone(),
            kind: CommandKind::XtriggerFunc,
            argv,
            stdin: None,
            env: Vec::new(),
        };
        if pool.put(ctx).is_ok() {
            self.active.insert(signature, ());
        }
    }

    /// Feed a completed subprocess result back in. Expects stdout as two
    /// lines: `true`/`false`, then a `key=value,key=value` result map.
    /// Malformed output is treated as "not satisfied" per §7.
    pub fn handle_completion(&mut self, result: &CommandResult, broadcast: &mut BroadcastStore, point: &CyclePoint) {
        if result.kind != CommandKind::XtriggerFunc {
            return;
        }
        self.active.remove(&result.key);

        let mut lines = result.stdout.lines();
        let satisfied = matches!(lines.next().map(str::trim), Some("true"));
        let mut map = HashMap::new();
        if let Some(kv_line) = lines.next() {
            for pair in kv_line.split(',') {
                if let Some((k, v)) = pair.split_once('=') {
                    map.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
        }

        if result.ret_code != 0 {
            warn!("xtrigger '{}' exited non-zero: {}", result.key, result.stderr);
        }

        let next_allowed_call = if satisfied { None } else { Some(Instant::now() + Duration::from_secs(60)) };
        self.cache.insert(
            result.key.clone(),
            CachedResult { satisfied, result: map.clone(), next_allowed_call },
        );

        if satisfied && !map.is_empty() {
            let mut settings = std::collections::BTreeMap::new();
            let mut env = std::collections::BTreeMap::new();
            for (k, v) in &map {
                env.insert(
                    format!("{}_{}", result.key.split('(').next().unwrap_or("xtrig"), k),
                    common::broadcast::SettingsNode::Leaf(v.clone()),
                );
            }
            settings.insert("environment".to_string(), common::broadcast::SettingsNode::Branch(env));
            broadcast.put(
                &[point.to_string()],
                &[common::broadcast::ROOT_NAMESPACE.to_string()],
                &common::broadcast::SettingsNode::Branch(settings),
            );
            debug!("xtrigger '{}' satisfied, injected {} env overrides", result.key, map.len());
        }
    }
}
