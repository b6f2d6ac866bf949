//! Per-scan transactional working area.
//!
//! A [`ScanContext`] collects every pending tag and memory write of one
//! scan over an immutable base snapshot. Reads see pending writes first,
//! which is what makes later rungs observe earlier rungs inside the same
//! scan. Commit folds the pending maps into the base and yields the next
//! immutable [`State`]; dropping the context instead discards the scan
//! without a trace.

use std::collections::HashMap;

use crate::debug::{TraceEvent, TraceMode};
use crate::error::FatalFault;
use crate::state::State;
use crate::tag::TagMeta;
use crate::value::Value;

/// Transient per-scan fault flags, mirrored into the system tags at
/// snapshot time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScanFlags {
    /// Division or modulo by zero happened this scan.
    pub division: bool,
    /// A copy clamped or a math store wrapped this scan.
    pub range: bool,
    /// An indirect reference resolved outside its block this scan.
    pub address: bool,
    /// Fatal math fault; latches the machine after commit.
    pub fatal: Option<FatalFault>,
}

/// Mutable working area of one scan.
#[derive(Debug)]
pub struct ScanContext {
    base: State,
    scan_id: u64,
    timestamp: f64,
    dt: f64,
    tags: HashMap<String, Value>,
    memory: HashMap<String, Value>,
    flags: ScanFlags,
    trace_mode: TraceMode,
    trace: Vec<TraceEvent>,
}

impl ScanContext {
    /// Open a scan over `base`, committing as `scan_id` at `timestamp`.
    pub(crate) fn new(
        base: State,
        scan_id: u64,
        timestamp: f64,
        dt: f64,
        trace_mode: TraceMode,
    ) -> Self {
        ScanContext {
            base,
            scan_id,
            timestamp,
            dt,
            tags: HashMap::new(),
            memory: HashMap::new(),
            flags: ScanFlags::default(),
            trace_mode,
            trace: Vec::new(),
        }
    }

    /// Scan id this context will commit as.
    pub const fn scan_id(&self) -> u64 {
        self.scan_id
    }

    /// Timestamp this context will commit at.
    pub const fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Simulated seconds elapsed by this scan, feeding timers.
    pub const fn dt(&self) -> f64 {
        self.dt
    }

    /// Current value of a cell: pending write, else base snapshot, else
    /// the cell's declared default.
    pub fn read(&self, meta: &TagMeta) -> Value {
        self.read_raw(&meta.name)
            .cloned()
            .unwrap_or_else(|| meta.default.clone())
    }

    /// Current value by name without default resolution.
    pub fn read_raw(&self, name: &str) -> Option<&Value> {
        self.tags.get(name).or_else(|| self.base.get(name))
    }

    /// Record a pending tag write. Last write wins within a scan.
    ///
    /// The caller has already coerced `value` into the destination type.
    pub fn write(&mut self, name: impl Into<String>, value: Value) {
        self.tags.insert(name.into(), value);
    }

    /// Engine-internal cell: pending write, else base snapshot.
    pub fn read_memory(&self, key: &str) -> Option<&Value> {
        self.memory.get(key).or_else(|| self.base.get_memory(key))
    }

    /// Record a pending engine-internal write.
    pub fn write_memory(&mut self, key: impl Into<String>, value: Value) {
        self.memory.insert(key.into(), value);
    }

    /// Previous value of an edge site, then track `current` for the next
    /// scan. Tracking is unconditional: a gated rung still observes its
    /// tag every scan.
    pub fn observe_edge(&mut self, key: String, current: bool) -> bool {
        let previous = self
            .read_memory(&key)
            .map(Value::is_truthy)
            .unwrap_or(false);
        self.write_memory(key, Value::Bool(current));
        previous
    }

    /// Fault flags raised so far this scan.
    pub const fn flags(&self) -> &ScanFlags {
        &self.flags
    }

    /// Raise the division flag.
    pub fn set_division(&mut self) {
        self.flags.division = true;
    }

    /// Raise the range flag.
    pub fn set_range(&mut self) {
        self.flags.range = true;
    }

    /// Raise the indirect-address flag.
    pub fn set_address(&mut self) {
        self.flags.address = true;
    }

    /// Latch a fatal fault. The first one sticks.
    pub fn set_fatal(&mut self, fault: FatalFault) {
        self.flags.fatal.get_or_insert(fault);
    }

    /// Active trace mode.
    pub const fn trace_mode(&self) -> TraceMode {
        self.trace_mode
    }

    /// Events recorded so far, in execution order.
    pub(crate) fn trace_events(&self) -> &[TraceEvent] {
        &self.trace
    }

    /// Append a trace event when the active mode records its kind.
    pub fn record_trace(&mut self, event: TraceEvent) {
        if self.trace_mode.records(event.kind) {
            self.trace.push(event);
        }
    }

    /// Fold the pending writes into a new immutable state. The trace is
    /// `Some` exactly when a trace mode was active.
    pub(crate) fn commit(self) -> (State, Option<Vec<TraceEvent>>) {
        let mut tags = self.base.tags().clone();
        for (name, value) in self.tags {
            tags.insert(name, value);
        }
        let mut memory = self.base.memory().clone();
        for (key, value) in self.memory {
            memory.insert(key, value);
        }
        let trace = match self.trace_mode {
            TraceMode::Off => None,
            _ => Some(self.trace),
        };
        (
            State::new(self.scan_id, self.timestamp, tags, memory),
            trace,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagKind;
    use crate::value::TagType;

    fn meta(name: &str) -> TagMeta {
        TagMeta {
            name: name.into(),
            ty: TagType::Int,
            kind: TagKind::Internal,
            retentive: false,
            default: Value::Int(0),
            read_only: false,
        }
    }

    #[test]
    fn reads_prefer_pending_over_base_over_default() {
        let base = State::initial().with_tag("A", Value::Int(1));
        let mut ctx = ScanContext::new(base, 1, 0.1, 0.1, TraceMode::Off);

        assert_eq!(ctx.read(&meta("A")), Value::Int(1));
        assert_eq!(ctx.read(&meta("B")), Value::Int(0));

        ctx.write("A", Value::Int(7));
        assert_eq!(ctx.read(&meta("A")), Value::Int(7));
    }

    #[test]
    fn commit_folds_writes_and_preserves_base() {
        let base = State::initial().with_tag("A", Value::Int(1));
        let mut ctx = ScanContext::new(base.clone(), 1, 0.1, 0.1, TraceMode::Off);
        ctx.write("A", Value::Int(2));
        ctx.write_memory("edge.0.A", Value::Bool(true));

        let (state, trace) = ctx.commit();
        assert!(trace.is_none());
        assert_eq!(state.scan_id(), 1);
        assert_eq!(state.get("A"), Some(&Value::Int(2)));
        assert_eq!(state.get_memory("edge.0.A"), Some(&Value::Bool(true)));
        // base snapshot untouched
        assert_eq!(base.get("A"), Some(&Value::Int(1)));
    }

    #[test]
    fn edge_observation_tracks_unconditionally() {
        let base = State::initial();
        let mut ctx = ScanContext::new(base, 1, 0.1, 0.1, TraceMode::Off);
        assert!(!ctx.observe_edge("edge.0.X".into(), true));
        // same scan, second occurrence sees the tracked value
        assert!(ctx.observe_edge("edge.0.X".into(), true));
    }
}
