//! Runtime override store. A direct generalised port of
//! `original_source/lib/cylc/broadcast.py`'s `addict`/`prune`/`get` logic
//! onto a typed nested map.

use std::collections::BTreeMap;

/// The sentinel cycle-scope meaning "applies at every cycle point".
pub const ALL_CYCLES: &str = "all-cycles";

/// The `root` namespace every task family ultimately inherits from.
pub const ROOT_NAMESPACE: &str = "root";

/// A node in the nested settings tree: either a leaf string value or a
/// branch of further-nested keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsNode {
    Leaf(String),
    Branch(BTreeMap<String, SettingsNode>),
}

impl SettingsNode {
    fn is_empty_branch(&self) -> bool {
        matches!(self, SettingsNode::Branch(m) if m.is_empty())
    }

    /// Merge `other` into `self` in place. A leaf in `other` set to the
    /// empty string removes the corresponding key from `self` instead of
    /// overwriting it (the broadcast "negative value" convention).
    fn merge_in(&mut self, other: &SettingsNode) {
        match (self, other) {
            (SettingsNode::Branch(dst), SettingsNode::Branch(src)) => {
                for (k, v) in src {
                    match v {
                        SettingsNode::Leaf(s) if s.is_empty() => {
                            dst.remove(k);
                        }
                        _ => {
                            dst.entry(k.clone())
                                .and_modify(|existing| existing.merge_in(v))
                                .or_insert_with(|| v.clone());
                        }
                    }
                }
                dst.retain(|_, v| !v.is_empty_branch());
            }
            (dst, src) => {
                *dst = src.clone();
            }
        }
    }
}

/// One mutation to the broadcast store, queued for the persistence layer so
/// settings survive restart by replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastRecord {
    Put {
        cycles: Vec<String>,
        namespaces: Vec<String>,
        settings: SettingsNode,
    },
    Clear {
        cycles: Option<Vec<String>>,
        namespaces: Option<Vec<String>>,
    },
    Expire {
        cutoff: String,
    },
}

/// Runtime override store, keyed by `(cycle-scope, namespace)`.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStore {
    settings: BTreeMap<(String, String), SettingsNode>,
    queue: Vec<BroadcastRecord>,
}

impl BroadcastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge new settings into every `(cycle, namespace)` pair named.
    pub fn put(&mut self, cycles: &[String], namespaces: &[String], settings: &SettingsNode) {
        for cycle in cycles {
            for ns in namespaces {
                let key = (cycle.clone(), ns.clone());
                let entry = self
                    .settings
                    .entry(key)
                    .or_insert_with(|| SettingsNode::Branch(BTreeMap::new()));
                entry.merge_in(settings);
                if entry.is_empty_branch() {
                    self.settings.remove(&(cycle.clone(), ns.clone()));
                }
            }
        }
        self.queue.push(BroadcastRecord::Put {
            cycles: cycles.to_vec(),
            namespaces: namespaces.to_vec(),
            settings: settings.clone(),
        });
    }

    /// Merged settings for a task, weakest to strongest:
    /// `(all-cycles, root)` -> `(all-cycles, ancestor)*` bottom-up ->
    /// `(all-cycles, name)` -> the same chain keyed by the task's specific
    /// cycle point.
    pub fn get(&self, task_name: &str, point: &str, ancestors_bottom_up: &[String]) -> SettingsNode {
        let mut merged = SettingsNode::Branch(BTreeMap::new());
        for cycle in [ALL_CYCLES, point] {
            for ns in std::iter::once(ROOT_NAMESPACE)
                .chain(ancestors_bottom_up.iter().map(|s| s.as_str()))
                .chain(std::iter::once(task_name))
            {
                if let Some(node) = self.settings.get(&(cycle.to_string(), ns.to_string())) {
                    merged.merge_in(node);
                }
            }
        }
        merged
    }

    /// Delete all settings keyed by a specific (non-`all-cycles`) cycle
    /// point earlier than `cutoff` under string-lexicographic comparison
    /// (callers pass already-canonicalised cycle point dumps, which sort
    /// lexicographically in cycle order for both cycling modes).
    pub fn expire(&mut self, cutoff: &str) {
        self.settings
            .retain(|(cycle, _), _| cycle == ALL_CYCLES || cycle.as_str() >= cutoff);
        self.queue.push(BroadcastRecord::Expire {
            cutoff: cutoff.to_string(),
        });
    }

    /// Targeted or total wipe.
    pub fn clear(&mut self, cycles: Option<&[String]>, namespaces: Option<&[String]>) {
        self.settings.retain(|(cycle, ns), _| {
            let cycle_kept = cycles.map(|cs| !cs.contains(cycle)).unwrap_or(false);
            let ns_kept = namespaces.map(|nss| !nss.contains(ns)).unwrap_or(false);
            cycle_kept || ns_kept
        });
        self.queue.push(BroadcastRecord::Clear {
            cycles: cycles.map(|c| c.to_vec()),
            namespaces: namespaces.map(|n| n.to_vec()),
        });
    }

    /// Drain pending mutation records for persistence.
    pub fn drain_queue(&mut self) -> Vec<BroadcastRecord> {
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(s: &str) -> SettingsNode {
        SettingsNode::Leaf(s.to_string())
    }

    fn branch(entries: &[(&str, SettingsNode)]) -> SettingsNode {
        SettingsNode::Branch(entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn put_then_get_merges_root_and_task() {
        let mut store = BroadcastStore::new();
        store.put(
            &[ALL_CYCLES.to_string()],
            &[ROOT_NAMESPACE.to_string()],
            &branch(&[("execution", branch(&[("retries", leaf("3"))]))]),
        );
        store.put(
            &[ALL_CYCLES.to_string()],
            &["foo".to_string()],
            &branch(&[("environment", branch(&[("X", leaf("1"))]))]),
        );
        let merged = store.get("foo", "2024-01-01T00:00:00Z", &[]);
        if let SettingsNode::Branch(m) = merged {
            assert!(m.contains_key("execution"));
            assert!(m.contains_key("environment"));
        } else {
            panic!("expected branch");
        }
    }

    #[test]
    fn empty_leaf_removes_existing_key() {
        let mut store = BroadcastStore::new();
        store.put(
            &[ALL_CYCLES.to_string()],
            &["foo".to_string()],
            &branch(&[("environment", branch(&[("X", leaf("1"))]))]),
        );
        store.put(
            &[ALL_CYCLES.to_string()],
            &["foo".to_string()],
            &branch(&[("environment", branch(&[("X", leaf(""))]))]),
        );
        assert!(store.is_empty());
    }

    #[test]
    fn expire_drops_settings_before_cutoff_but_keeps_all_cycles() {
        let mut store = BroadcastStore::new();
        store.put(
            &["2024-01-01T00:00:00Z".to_string()],
            &["foo".to_string()],
            &branch(&[("environment", branch(&[("X", leaf("1"))]))]),
        );
        store.put(
            &[ALL_CYCLES.to_string()],
            &[ROOT_NAMESPACE.to_string()],
            &branch(&[("execution", branch(&[("retries", leaf("3"))]))]),
        );
        store.expire("2024-06-01T00:00:00Z");
        assert_eq!(store.get("foo", "2024-01-01T00:00:00Z", &[]), store.get("bar", "2024-01-01T00:00:00Z", &[]));
    }
}
