//! Graph-string parsing: turns one graph line (plus the section sequence it
//! was written under) into [`Dependency`] values. Grounded on
//! `original_source/lib/cylc/task_trigger.py` and the simplification pass in
//! `original_source/lib/cylc/conditional_simplifier.py`, reimplemented here
//! as a small recursive-descent parser instead of the original's string
//! rewriting, since the boolean grammar is tiny and fixed.

use crate::cycling::{CyclePoint, CyclingMode, Interval};
use crate::error::ConfigError;
use crate::prerequisite::{Atom, Expr};
use std::fmt;

/// One reference to an upstream (or this-cycle) task on the left-hand side
/// of a graph line, before it is resolved against an actual cycle point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTrigger {
    pub task_name: String,
    /// `None` means no offset (same cycle point). `Some(None)` -- modelled
    /// as `absolute = true` below -- means `[^]`, the workflow initial point.
    pub offset: Option<String>,
    pub absolute: bool,
    pub output: String,
    pub suicide: bool,
}

impl TaskTrigger {
    /// Resolve this trigger at a given cycle point into a concrete
    /// prerequisite [`Atom`]. Returns `None` if the offset would resolve
    /// before `initial_point` and pre-initial simplification should drop it
    /// (the caller checks this against the workflow's configured initial
    /// point).
    pub fn resolve(
        &self,
        at: &CyclePoint,
        mode: CyclingMode,
        initial_point: &CyclePoint,
    ) -> Result<Option<Atom>, ConfigError> {
        let point = if self.absolute {
            *initial_point
        } else if let Some(offset) = &self.offset {
            let interval = match mode {
                CyclingMode::Iso8601 => Interval::parse_iso(offset).map_err(|_| {
                    ConfigError::Graph(format!("invalid offset '{}' on {}", offset, self.task_name))
                })?,
                CyclingMode::Integer => {
                    let n: i64 = offset.trim_start_matches('P').parse().map_err(|_| {
                        ConfigError::Graph(format!(
                            "invalid offset '{}' on {}",
                            offset, self.task_name
                        ))
                    })?;
                    Interval::Int(if offset.starts_with("-P") { -n } else { n })
                }
            };
            at.add(&interval)
                .map_err(|e| ConfigError::Graph(e.to_string()))?
        } else {
            *at
        };

        if point < *initial_point {
            return Ok(None);
        }

        Ok(Some(Atom {
            task_id: format!("{}.{}", self.task_name, point.dump()),
            output: self.output.clone(),
        }))
    }
}

/// A boolean expression of unresolved [`TaskTrigger`]s, xtrigger labels, and
/// `&`/`|`/`!`/parens combinators — the left-hand side of a graph line
/// before it is materialised for a specific cycle point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerExpr {
    Trigger(TaskTrigger),
    XTrigger(String),
    Not(Box<TriggerExpr>),
    And(Vec<TriggerExpr>),
    Or(Vec<TriggerExpr>),
}

/// One parsed graph-line dependency: a left-hand-side trigger expression
/// producing the right-hand-side task, attached to the sequence its section
/// header named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub lhs: TriggerExpr,
    pub rhs_task: String,
    pub sequence_spec: String,
    /// Set when the right-hand side was written `!task`: satisfying `lhs`
    /// removes `rhs_task` from the pool instead of spawning/releasing it.
    pub suicide: bool,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "... => {}", self.rhs_task)
    }
}

/// Parse every dependency out of one graph-section body, attaching
/// `sequence_spec` (the section header, e.g. `R1`, `P1D`, `T00`) to each.
pub fn parse_graph_section(body: &str, sequence_spec: &str) -> Result<Vec<Dependency>, ConfigError> {
    let mut deps = Vec::new();
    for line in body.lines() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        deps.extend(parse_graph_line(line, sequence_spec)?);
    }
    Ok(deps)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_graph_line(line: &str, sequence_spec: &str) -> Result<Vec<Dependency>, ConfigError> {
    let segments: Vec<&str> = line.split("=>").map(|s| s.trim()).collect();
    if segments.len() < 2 {
        return Err(ConfigError::Graph(format!("no '=>' in graph line: {}", line)));
    }

    let mut deps = Vec::new();
    for pair in segments.windows(2) {
        let lhs = parse_expr(pair[0])?;
        for rhs_task in split_top_level(pair[1], '&') {
            let rhs_task = rhs_task.trim();
            if rhs_task.is_empty() {
                return Err(ConfigError::Graph(format!("empty right-hand side in: {}", line)));
            }
            let (suicide, rhs_task) = match rhs_task.strip_prefix('!') {
                Some(rest) => (true, rest.trim().to_string()),
                None => (false, rhs_task.to_string()),
            };
            deps.push(Dependency {
                lhs: lhs.clone(),
                rhs_task,
                sequence_spec: sequence_spec.to_string(),
                suicide,
            });
        }
    }
    Ok(deps)
}

/// Split `s` on `sep` at top-level (outside parentheses) only.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

/// Recursive-descent parser: `or_expr := and_expr ('|' and_expr)*`,
/// `and_expr := atom ('&' atom)*`, `atom := '!'? (name | '@'name | '(' or_expr ')')`.
fn parse_expr(s: &str) -> Result<TriggerExpr, ConfigError> {
    parse_or(s.trim())
}

fn parse_or(s: &str) -> Result<TriggerExpr, ConfigError> {
    let parts = split_top_level(s, '|');
    if parts.len() == 1 {
        return parse_and(parts[0]);
    }
    let operands: Result<Vec<_>, _> = parts.iter().map(|p| parse_and(p)).collect();
    Ok(TriggerExpr::Or(operands?))
}

fn parse_and(s: &str) -> Result<TriggerExpr, ConfigError> {
    let parts = split_top_level(s, '&');
    if parts.len() == 1 {
        return parse_atom(parts[0].trim());
    }
    let operands: Result<Vec<_>, _> = parts.iter().map(|p| parse_atom(p.trim())).collect();
    Ok(TriggerExpr::And(operands?))
}

fn parse_atom(s: &str) -> Result<TriggerExpr, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::Graph("empty trigger expression".to_string()));
    }
    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        return parse_or(inner);
    }
    if let Some(rest) = s.strip_prefix('!') {
        if let Some(inner) = rest.trim().strip_prefix('(') {
            if let Some(inner) = inner.strip_suffix(')') {
                return Ok(TriggerExpr::Not(Box::new(parse_or(inner)?)));
            }
        }
        return Ok(TriggerExpr::Not(Box::new(parse_trigger_atom(rest.trim())?)));
    }
    parse_trigger_atom(s)
}

fn parse_trigger_atom(s: &str) -> Result<TriggerExpr, ConfigError> {
    if let Some(label) = s.strip_prefix('@') {
        return Ok(TriggerExpr::XTrigger(label.trim().to_string()));
    }

    let (name_and_offset, output) = match s.split_once(':') {
        Some((n, o)) => (n, o.to_string()),
        None => (s, "succeeded".to_string()),
    };

    let (name, offset, absolute) = if let Some(open) = name_and_offset.find('[') {
        let name = name_and_offset[..open].to_string();
        let close = name_and_offset
            .find(']')
            .ok_or_else(|| ConfigError::Graph(format!("unterminated '[' in: {}", s)))?;
        let bracket = &name_and_offset[open + 1..close];
        if bracket == "^" {
            (name, None, true)
        } else {
            (name, Some(bracket.to_string()), false)
        }
    } else {
        (name_and_offset.to_string(), None, false)
    };

    if name.is_empty() {
        return Err(ConfigError::Graph(format!("missing task name in: {}", s)));
    }

    Ok(TriggerExpr::Trigger(TaskTrigger {
        task_name: name,
        offset,
        absolute,
        output,
        suicide: false,
    }))
}

/// Turn a parsed [`TriggerExpr`] plus a suicide flag (set by a leading `!`
/// on the whole dependency line, e.g. `!A => B`) into the safe [`Expr`] over
/// resolved atoms, for a specific cycle point.
pub fn materialise(
    lhs: &TriggerExpr,
    at: &CyclePoint,
    mode: CyclingMode,
    initial_point: &CyclePoint,
) -> Result<Expr, ConfigError> {
    match lhs {
        TriggerExpr::Trigger(t) => match t.resolve(at, mode, initial_point)? {
            Some(atom) => Ok(Expr::Atom(atom)),
            None => Ok(Expr::True),
        },
        TriggerExpr::XTrigger(label) => Ok(Expr::Atom(Atom {
            task_id: format!("@{}", label),
            output: "satisfied".to_string(),
        })),
        TriggerExpr::Not(inner) => {
            Ok(Expr::Not(Box::new(materialise(inner, at, mode, initial_point)?)))
        }
        TriggerExpr::And(parts) => {
            let exprs: Result<Vec<_>, _> = parts
                .iter()
                .map(|p| materialise(p, at, mode, initial_point))
                .collect();
            Ok(Expr::And(exprs?))
        }
        TriggerExpr::Or(parts) => {
            let exprs: Result<Vec<_>, _> = parts
                .iter()
                .map(|p| materialise(p, at, mode, initial_point))
                .collect();
            Ok(Expr::Or(exprs?))
        }
    }
}

/// Indexes every parsed [`Dependency`] by the task it feeds, so the task
/// pool can ask "what does this task instance depend on" without rescanning
/// the whole graph every tick.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    by_rhs_task: std::collections::BTreeMap<String, Vec<Dependency>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_section(&mut self, body: &str, sequence_spec: &str) -> Result<(), ConfigError> {
        for dep in parse_graph_section(body, sequence_spec)? {
            self.by_rhs_task.entry(dep.rhs_task.clone()).or_default().push(dep);
        }
        Ok(())
    }

    /// Every dependency naming `task_name` as its right-hand side, across
    /// every graph section that mentioned it.
    pub fn dependencies_for(&self, task_name: &str) -> &[Dependency] {
        self.by_rhs_task
            .get(task_name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Materialise every non-suicide dependency of `task_name` at `at` into
    /// a single `Prerequisite`-ready expression, ANDing across dependencies
    /// from different graph sections (cylc semantics: each `=>` line
    /// contributes an independent prerequisite the task must also satisfy).
    /// Suicide dependencies (`=> !task`) are excluded here; they gate
    /// removal, not readiness, and are materialised separately by
    /// [`Self::suicide_triggers_for`].
    pub fn materialise_for(
        &self,
        task_name: &str,
        at: &CyclePoint,
        mode: CyclingMode,
        initial_point: &CyclePoint,
    ) -> Result<Vec<Expr>, ConfigError> {
        self.dependencies_for(task_name)
            .iter()
            .filter(|dep| !dep.suicide)
            .map(|dep| materialise(&dep.lhs, at, mode, initial_point))
            .collect()
    }

    /// Materialise every suicide dependency of `task_name` at `at`. A task
    /// instance is removed from the pool (without running) the moment any
    /// one of these expressions becomes satisfied, per §4.2/§9.
    pub fn suicide_triggers_for(
        &self,
        task_name: &str,
        at: &CyclePoint,
        mode: CyclingMode,
        initial_point: &CyclePoint,
    ) -> Result<Vec<Expr>, ConfigError> {
        self.dependencies_for(task_name)
            .iter()
            .filter(|dep| dep.suicide)
            .map(|dep| materialise(&dep.lhs, at, mode, initial_point))
            .collect()
    }

    /// Every task name mentioned anywhere in the graph, as either a
    /// right-hand-side target or an upstream trigger. Used to build the
    /// task-definition registry from the graph alone.
    pub fn all_task_names(&self) -> std::collections::BTreeSet<String> {
        let mut names = std::collections::BTreeSet::new();
        for (rhs_task, deps) in &self.by_rhs_task {
            names.insert(rhs_task.clone());
            for dep in deps {
                collect_trigger_names(&dep.lhs, &mut names);
            }
        }
        names
    }

    /// The sequence-spec headers a task name is ever scheduled under,
    /// across every graph section naming it as a right-hand-side target.
    pub fn sequence_specs_for(&self, task_name: &str) -> Vec<&str> {
        self.dependencies_for(task_name).iter().map(|dep| dep.sequence_spec.as_str()).collect()
    }
}

fn collect_trigger_names(expr: &TriggerExpr, out: &mut std::collections::BTreeSet<String>) {
    match expr {
        TriggerExpr::Trigger(t) => {
            out.insert(t.task_name.clone());
        }
        TriggerExpr::XTrigger(_) => {}
        TriggerExpr::Not(inner) => collect_trigger_names(inner, out),
        TriggerExpr::And(parts) | TriggerExpr::Or(parts) => {
            for p in parts {
                collect_trigger_names(p, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_success_dependency() {
        let deps = parse_graph_section("foo => bar", "R1").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].rhs_task, "bar");
        assert_eq!(
            deps[0].lhs,
            TriggerExpr::Trigger(TaskTrigger {
                task_name: "foo".to_string(),
                offset: None,
                absolute: false,
                output: "succeeded".to_string(),
                suicide: false,
            })
        );
    }

    #[test]
    fn named_output_and_offset() {
        let deps = parse_graph_section("foo[-P1D]:ready_tag => bar", "P1D").unwrap();
        let TriggerExpr::Trigger(t) = &deps[0].lhs else {
            panic!("expected a trigger");
        };
        assert_eq!(t.offset.as_deref(), Some("-P1D"));
        assert_eq!(t.output, "ready_tag");
    }

    #[test]
    fn absolute_reference() {
        let deps = parse_graph_section("foo[^] => bar", "P1D").unwrap();
        let TriggerExpr::Trigger(t) = &deps[0].lhs else {
            panic!("expected a trigger");
        };
        assert!(t.absolute);
    }

    #[test]
    fn boolean_combination_and_or() {
        let deps = parse_graph_section("(a & b) | c => d", "R1").unwrap();
        match &deps[0].lhs {
            TriggerExpr::Or(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn xtrigger_dependency() {
        let deps = parse_graph_section("@clock_1 => bar", "R1").unwrap();
        assert_eq!(deps[0].lhs, TriggerExpr::XTrigger("clock_1".to_string()));
    }

    #[test]
    fn multiple_rhs_targets_split_on_ampersand() {
        let deps = parse_graph_section("a => b & c", "R1").unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].rhs_task, "b");
        assert_eq!(deps[1].rhs_task, "c");
    }

    #[test]
    fn suicide_trigger_on_right_hand_side() {
        let deps = parse_graph_section("foo:fail => !bar", "R1").unwrap();
        assert!(deps[0].suicide);
        assert_eq!(deps[0].rhs_task, "bar");
    }

    #[test]
    fn suicide_dependency_is_excluded_from_normal_prerequisites() {
        let mut g = DependencyGraph::new();
        g.add_section("a => bar\nc:fail => !bar", "R1").unwrap();
        let at = CyclePoint::parse("3", CyclingMode::Integer).unwrap();
        let initial = CyclePoint::parse("1", CyclingMode::Integer).unwrap();
        let prereqs = g.materialise_for("bar", &at, CyclingMode::Integer, &initial).unwrap();
        assert_eq!(prereqs.len(), 1);
        let suicide = g.suicide_triggers_for("bar", &at, CyclingMode::Integer, &initial).unwrap();
        assert_eq!(suicide.len(), 1);
        assert_eq!(suicide[0], Expr::Atom(Atom { task_id: "c.3".to_string(), output: "fail".to_string() }));
    }

    #[test]
    fn dependency_graph_materialises_same_cycle_trigger() {
        let mut g = DependencyGraph::new();
        g.add_section("foo => bar", "P1D").unwrap();
        let at = CyclePoint::parse("2024-01-02T00:00:00Z", CyclingMode::Iso8601).unwrap();
        let initial = CyclePoint::parse("2024-01-01T00:00:00Z", CyclingMode::Iso8601).unwrap();
        let exprs = g.materialise_for("bar", &at, CyclingMode::Iso8601, &initial).unwrap();
        assert_eq!(exprs.len(), 1);
        assert_eq!(
            exprs[0],
            Expr::Atom(Atom {
                task_id: "foo.2024-01-02T00:00:00Z".to_string(),
                output: "succeeded".to_string(),
            })
        );
    }
}
