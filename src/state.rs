//! Immutable scan snapshots with structural sharing.
//!
//! A [`State`] is the committed result of one scan. The tag and memory
//! maps are persistent HAMTs, so a commit allocates only along the paths
//! of the written keys and every retained snapshot shares the rest with
//! its neighbors. Nothing mutates a `State` after commit; the scan
//! context folds its pending writes into a fresh one.

use std::collections::BTreeMap;

use im::HashMap;

use crate::value::Value;

/// Lifecycle state of the scan scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MachineMode {
    /// Constructed, no scan executed yet.
    #[default]
    Uninitialized,
    /// Scanning.
    Run,
    /// Halted by `stop()`; tags retained, execution methods auto-restart.
    Stop,
    /// Latched fatal state; execution refused until reset.
    Fault,
}

/// One committed scan snapshot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct State {
    scan_id: u64,
    timestamp: f64,
    tags: HashMap<String, Value>,
    memory: HashMap<String, Value>,
}

impl State {
    /// Snapshot with explicit maps. Used by the initial-state builder and
    /// the commit path.
    pub(crate) fn new(
        scan_id: u64,
        timestamp: f64,
        tags: HashMap<String, Value>,
        memory: HashMap<String, Value>,
    ) -> Self {
        State {
            scan_id,
            timestamp,
            tags,
            memory,
        }
    }

    /// Empty snapshot at scan zero.
    pub fn initial() -> Self {
        State::new(0, 0.0, HashMap::new(), HashMap::new())
    }

    /// Monotonic scan identifier.
    pub const fn scan_id(&self) -> u64 {
        self.scan_id
    }

    /// Simulated seconds since the RUN transition.
    pub const fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Committed tag value, if the tag was ever written.
    ///
    /// Absent keys read as the tag's declared default; resolving that
    /// default needs the program and is done by the runner.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.tags.get(name)
    }

    /// Committed engine-internal cell (edge bits, timer remainders).
    pub fn get_memory(&self, key: &str) -> Option<&Value> {
        self.memory.get(key)
    }

    /// Tag map handle for the next scan context.
    pub(crate) fn tags(&self) -> &HashMap<String, Value> {
        &self.tags
    }

    /// Memory map handle for the next scan context.
    pub(crate) fn memory(&self) -> &HashMap<String, Value> {
        &self.memory
    }

    /// Copy with one tag replaced. The original is untouched.
    pub fn with_tag(&self, name: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.tags.insert(name.into(), value);
        next
    }

    /// Copy with one memory cell replaced.
    pub fn with_memory(&self, key: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.memory.insert(key.into(), value);
        next
    }

    /// Tags whose committed values differ between the two snapshots,
    /// lexicographically ordered. Keys absent on one side report `None`;
    /// the runner substitutes declared defaults.
    pub fn diff(&self, other: &State) -> BTreeMap<String, (Option<Value>, Option<Value>)> {
        let mut out = BTreeMap::new();
        for (name, value) in self.tags.iter() {
            if other.tags.get(name) != Some(value) {
                out.insert(
                    name.clone(),
                    (Some(value.clone()), other.tags.get(name).cloned()),
                );
            }
        }
        for (name, value) in other.tags.iter() {
            if !self.tags.contains_key(name) {
                out.insert(name.clone(), (None, Some(value.clone())));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_tag_leaves_original_untouched() {
        let a = State::initial().with_tag("Motor", Value::Bool(true));
        let b = a.with_tag("Motor", Value::Bool(false));
        assert_eq!(a.get("Motor"), Some(&Value::Bool(true)));
        assert_eq!(b.get("Motor"), Some(&Value::Bool(false)));
    }

    #[test]
    fn diff_reports_both_sides() {
        let a = State::initial()
            .with_tag("A", Value::Int(1))
            .with_tag("B", Value::Int(2));
        let b = State::initial()
            .with_tag("B", Value::Int(3))
            .with_tag("C", Value::Int(4));

        let diff = a.diff(&b);
        assert_eq!(diff["A"], (Some(Value::Int(1)), None));
        assert_eq!(diff["B"], (Some(Value::Int(2)), Some(Value::Int(3))));
        assert_eq!(diff["C"], (None, Some(Value::Int(4))));
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn diff_is_empty_for_identical_states() {
        let a = State::initial().with_tag("A", Value::Int(1));
        assert!(a.diff(&a.clone()).is_empty());
    }
}
