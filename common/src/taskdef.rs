//! Task definition registry: flattened runtime namespaces, plus parameter
//! expansion of templated task names (`foo<i,j>`) into their cartesian
//! product. Grounded on the inheritance/parameter-expansion pass described
//! in `original_source/lib/cylc/cycling/` config spirit and cross-checked
//! against `SPEC_FULL.md` §4.2.

use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::time::Duration;

/// A declared parameter's domain: either an integer range or an explicit
/// list of string values. A workflow may not mix the two under one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValues {
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

/// One flattened task definition, after inheritance and parameter expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDef {
    pub name: String,
    /// Raw recurrence strings this task's graph lines attached it to.
    pub sequence_specs: Vec<String>,
    pub custom_outputs: Vec<String>,
    pub execution_retry_delays: Vec<Duration>,
    pub submission_retry_delays: Vec<Duration>,
    /// Offset from the task's cycle point after which it is considered
    /// expired if still waiting/held (`SPEC_FULL.md` §4.5).
    pub expiration_offset: Option<String>,
}

impl TaskDef {
    pub fn new(name: impl Into<String>) -> Self {
        TaskDef {
            name: name.into(),
            sequence_specs: Vec::new(),
            custom_outputs: Vec::new(),
            execution_retry_delays: Vec::new(),
            submission_retry_delays: Vec::new(),
            expiration_offset: None,
        }
    }
}

/// Parsed parameter declarations, e.g. `i = 1..3` or `j = foo, bar`.
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    params: BTreeMap<String, ParamValues>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter from its right-hand-side spec string: either an
    /// integer range `a..b` (inclusive) or a comma-separated string list.
    pub fn declare(&mut self, name: &str, spec: &str) -> Result<(), ConfigError> {
        let spec = spec.trim();
        let values = if let Some((lo, hi)) = spec.split_once("..") {
            let lo: i64 = lo.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: name.to_string(),
                reason: format!("invalid integer range '{}'", spec),
            })?;
            let hi: i64 = hi.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: name.to_string(),
                reason: format!("invalid integer range '{}'", spec),
            })?;
            ParamValues::Ints((lo..=hi).collect())
        } else {
            ParamValues::Strings(spec.split(',').map(|s| s.trim().to_string()).collect())
        };

        if let Some(existing) = self.params.get(name) {
            let conflict = matches!(
                (existing, &values),
                (ParamValues::Ints(_), ParamValues::Strings(_))
                    | (ParamValues::Strings(_), ParamValues::Ints(_))
            );
            if conflict {
                return Err(ConfigError::ParameterTypeConflict {
                    name: name.to_string(),
                });
            }
        }
        self.params.insert(name.to_string(), values);
        Ok(())
    }

    fn names_in_template(template: &str) -> Option<Vec<String>> {
        let open = template.find('<')?;
        let close = template.find('>')?;
        if close < open {
            return None;
        }
        Some(
            template[open + 1..close]
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        )
    }

    /// Expand a templated name like `foo<i,j>` into every cartesian
    /// combination, substituting `_<name><value>` per parameter. A plain
    /// name with no `<...>` expands to itself.
    pub fn expand(&self, template: &str) -> Result<Vec<String>, ConfigError> {
        let names = match Self::names_in_template(template) {
            Some(n) => n,
            None => return Ok(vec![template.to_string()]),
        };

        let mut domains: Vec<(&str, Vec<String>)> = Vec::new();
        for name in &names {
            let values = self
                .params
                .get(name.as_str())
                .ok_or_else(|| ConfigError::UndefinedParameter { name: name.clone() })?;
            let rendered: Vec<String> = match values {
                ParamValues::Ints(vs) => vs.iter().map(|v| v.to_string()).collect(),
                ParamValues::Strings(vs) => vs.clone(),
            };
            domains.push((name.as_str(), rendered));
        }

        let base = &template[..template.find('<').unwrap()];
        let mut combos: Vec<String> = vec![base.to_string()];
        for (name, values) in &domains {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for prefix in &combos {
                for v in values {
                    next.push(format!("{}_{}{}", prefix, name, v));
                }
            }
            combos = next;
        }
        Ok(combos)
    }
}

/// Holds every flattened, parameter-expanded task definition.
#[derive(Debug, Clone, Default)]
pub struct TaskDefRegistry {
    defs: BTreeMap<String, TaskDef>,
}

impl TaskDefRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: TaskDef) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&TaskDef> {
        self.defs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_integer_parameter_range() {
        let mut params = ParamTable::new();
        params.declare("i", "1..3").unwrap();
        let names = params.expand("foo<i>").unwrap();
        assert_eq!(names, vec!["foo_i1", "foo_i2", "foo_i3"]);
    }

    #[test]
    fn expands_cartesian_product_of_two_parameters() {
        let mut params = ParamTable::new();
        params.declare("i", "1..2").unwrap();
        params.declare("j", "a, b").unwrap();
        let names = params.expand("foo<i,j>").unwrap();
        assert_eq!(names, vec!["foo_i1_ja", "foo_i1_jb", "foo_i2_ja", "foo_i2_jb"]);
    }

    #[test]
    fn rejects_type_conflict_on_redeclare() {
        let mut params = ParamTable::new();
        params.declare("i", "1..3").unwrap();
        let err = params.declare("i", "a, b").unwrap_err();
        assert_eq!(err, ConfigError::ParameterTypeConflict { name: "i".to_string() });
    }

    #[test]
    fn rejects_undefined_parameter_reference() {
        let params = ParamTable::new();
        let err = params.expand("foo<missing>").unwrap_err();
        assert_eq!(
            err,
            ConfigError::UndefinedParameter {
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn plain_name_passes_through_unexpanded() {
        let params = ParamTable::new();
        assert_eq!(params.expand("foo").unwrap(), vec!["foo".to_string()]);
    }
}
