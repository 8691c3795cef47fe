//! Prerequisite / output model: boolean expressions over upstream task
//! outputs, evaluated without `eval()`. Grounded on
//! `original_source/lib/cylc/prerequisite.py` and
//! `original_source/lib/cylc/task_outputs.py`; the Python `eval()` call in
//! the former is replaced with the small AST in [`Expr`], built once at
//! graph-parse time.

use std::collections::BTreeMap;
use std::fmt;

/// The outputs a task instance can produce: the standard lifecycle outputs
/// plus any user-declared custom ones, each with a completion flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskOutputs {
    completed: BTreeMap<String, bool>,
}

pub const STANDARD_OUTPUTS: &[&str] =
    &["expired", "submitted", "submit-failed", "started", "succeeded", "failed"];

impl TaskOutputs {
    pub fn new(custom: &[String]) -> Self {
        let mut completed = BTreeMap::new();
        for name in STANDARD_OUTPUTS {
            completed.insert((*name).to_string(), false);
        }
        for name in custom {
            completed.entry(name.clone()).or_insert(false);
        }
        TaskOutputs { completed }
    }

    /// Mark an output complete. Idempotent: setting an already-complete
    /// output twice has no further effect.
    pub fn set_completed(&mut self, output: &str) {
        self.completed.insert(output.to_string(), true);
    }

    pub fn is_completed(&self, output: &str) -> bool {
        self.completed.get(output).copied().unwrap_or(false)
    }

    /// Clear every output flag, used when a task is resubmitted and its
    /// prior-submit outputs are no longer representative of the new attempt.
    pub fn reset(&mut self) {
        for v in self.completed.values_mut() {
            *v = false;
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.completed.keys().map(|s| s.as_str())
    }
}

/// A boolean-expression atom: `<task-name> [offset] : <output>`, already
/// resolved against a cycle point at materialisation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom {
    /// Fully resolved `name.point` identifier of the upstream task.
    pub task_id: String,
    pub output: String,
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.task_id, self.output)
    }
}

/// A safe boolean expression over prerequisite atoms: no arbitrary code
/// execution, just `&`, `|`, `!`, and atom references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Atom(Atom),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// Already proven true (e.g. after pre-initial simplification dropped
    /// every atom that referenced it).
    True,
}

impl Expr {
    /// Evaluate against a lookup of already-known atom satisfaction.
    pub fn eval(&self, satisfied: &impl Fn(&Atom) -> bool) -> bool {
        match self {
            Expr::Atom(a) => satisfied(a),
            Expr::Not(e) => !e.eval(satisfied),
            Expr::And(es) => es.iter().all(|e| e.eval(satisfied)),
            Expr::Or(es) => es.iter().any(|e| e.eval(satisfied)),
            Expr::True => true,
        }
    }

    pub fn atoms(&self) -> Vec<&Atom> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<&'a Atom>) {
        match self {
            Expr::Atom(a) => out.push(a),
            Expr::Not(e) => e.collect_atoms(out),
            Expr::And(es) | Expr::Or(es) => {
                for e in es {
                    e.collect_atoms(out);
                }
            }
            Expr::True => {}
        }
    }

    /// Pre-initial simplification: drop every atom whose upstream point lies
    /// before the workflow's initial point, per `dropped_ids`. An `And` that
    /// loses all its operands collapses to `True`; an `Or` that loses all
    /// its operands has no valid simplification and is left as `Or(vec![])`,
    /// which evaluates to `false` (the caller should treat an `Or` that
    /// would need this as a configuration error instead).
    pub fn drop_atoms(&self, dropped_ids: &impl Fn(&Atom) -> bool) -> Expr {
        match self {
            Expr::Atom(a) => {
                if dropped_ids(a) {
                    Expr::True
                } else {
                    Expr::Atom(a.clone())
                }
            }
            Expr::Not(e) => Expr::Not(Box::new(e.drop_atoms(dropped_ids))),
            Expr::And(es) => {
                let simplified: Vec<Expr> = es
                    .iter()
                    .map(|e| e.drop_atoms(dropped_ids))
                    .filter(|e| *e != Expr::True)
                    .collect();
                if simplified.is_empty() {
                    Expr::True
                } else if simplified.len() == 1 {
                    simplified.into_iter().next().unwrap()
                } else {
                    Expr::And(simplified)
                }
            }
            Expr::Or(es) => {
                let simplified: Vec<Expr> = es.iter().map(|e| e.drop_atoms(dropped_ids)).collect();
                if simplified.iter().any(|e| *e == Expr::True) {
                    Expr::True
                } else {
                    Expr::Or(simplified)
                }
            }
            Expr::True => Expr::True,
        }
    }
}

/// One task instance's prerequisite: a boolean expression plus the
/// per-atom satisfaction state, so partial progress can be reported without
/// re-deriving it from the graph every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerequisite {
    expr: Expr,
    satisfied: BTreeMap<Atom, bool>,
}

impl Prerequisite {
    pub fn new(expr: Expr) -> Self {
        let mut satisfied = BTreeMap::new();
        for atom in expr.atoms() {
            satisfied.insert(atom.clone(), false);
        }
        Prerequisite { expr, satisfied }
    }

    pub fn trivially_true() -> Self {
        Prerequisite {
            expr: Expr::True,
            satisfied: BTreeMap::new(),
        }
    }

    /// Record that an upstream output was produced, if this prerequisite
    /// references it.
    pub fn satisfy_output(&mut self, task_id: &str, output: &str) {
        for (atom, flag) in self.satisfied.iter_mut() {
            if atom.task_id == task_id && atom.output == output {
                *flag = true;
            }
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.expr.eval(&|a| self.satisfied.get(a).copied().unwrap_or(false))
    }

    pub fn atoms(&self) -> impl Iterator<Item = (&Atom, bool)> {
        self.satisfied.iter().map(|(a, f)| (a, *f))
    }

    /// Apply pre-initial simplification against the set of dropped atoms.
    pub fn simplify_pre_initial(&mut self, dropped: &impl Fn(&Atom) -> bool) {
        self.expr = self.expr.drop_atoms(dropped);
        self.satisfied.retain(|a, _| !dropped(a));
    }
}
