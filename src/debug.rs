//! Debug overlay: breakpoints, monitors, rung traces and step iterators.
//!
//! Everything here runs between scans. Breakpoint predicates and monitor
//! callbacks see only committed snapshots; the step iterators own an
//! already-executed but uncommitted scan and commit it exactly when they
//! are driven to exhaustion.

use crate::interpreter::{Interpreter, PreparedScan};
use crate::io::IoAdapter;
use crate::program::{RungId, SourceLocation};
use crate::state::State;
use crate::value::Value;

/// Boundary kind yielded by the step iterators and recorded in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StepKind {
    /// Top-level or subroutine rung boundary.
    Rung,
    /// Branch boundary inside a rung.
    Branch,
    /// Subroutine entry.
    Subroutine,
    /// Single instruction boundary.
    Instruction,
}

/// What the trace buffer records during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMode {
    /// No trace. The `step`/`run` paths.
    #[default]
    Off,
    /// Rung boundaries only. The `scan_steps` path.
    Rungs,
    /// Every boundary. The `scan_steps_debug` path.
    Full,
}

impl TraceMode {
    /// Whether an event of `kind` is recorded in this mode.
    pub fn records(&self, kind: StepKind) -> bool {
        match self {
            TraceMode::Off => false,
            TraceMode::Rungs => matches!(kind, StepKind::Rung),
            TraceMode::Full => true,
        }
    }
}

/// One execution boundary: a rung, branch, subroutine or instruction,
/// with its power-rail state and call stack at that point.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    /// Boundary kind.
    pub kind: StepKind,
    /// Enclosing rung.
    pub rung: RungId,
    /// Instruction mnemonic for instruction boundaries.
    pub mnemonic: Option<&'static str>,
    /// Source position, when the program carries one.
    pub location: Option<SourceLocation>,
    /// Power-rail state at the boundary.
    pub enabled: bool,
    /// Subroutine call stack, outermost first.
    pub stack: Vec<String>,
}

/// Handle of a registered breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointId(pub(crate) u64);

/// Handle of a registered monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorId(pub(crate) u64);

/// Action taken when a breakpoint predicate matches a committed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakAction {
    /// Halt `run*` after the commit.
    Pause,
    /// Label the committed scan's history entry.
    Snapshot(String),
}

pub(crate) struct Breakpoint {
    pub id: BreakpointId,
    pub predicate: Box<dyn Fn(&State) -> bool>,
    pub action: BreakAction,
}

impl core::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Breakpoint")
            .field("id", &self.id)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// Change notification delivered to a monitor callback.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorEvent {
    /// Watched tag.
    pub tag: String,
    /// Scan that committed the change.
    pub scan_id: u64,
    /// Value in the previous committed scan.
    pub old: Value,
    /// Value in the just-committed scan.
    pub new: Value,
}

pub(crate) struct Monitor {
    pub id: MonitorId,
    pub tag: String,
    pub callback: Box<dyn FnMut(&MonitorEvent)>,
}

impl core::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Summary of the most recent commit, for debugger front-ends.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEvent {
    /// Committed scan.
    pub scan_id: u64,
    /// Number of tags whose committed value changed.
    pub changed: usize,
    /// Tags whose monitors fired, in registration order.
    pub monitors_fired: Vec<String>,
    /// Labels attached by snapshot breakpoints this commit.
    pub labels: Vec<String>,
    /// A pause breakpoint matched.
    pub paused: bool,
}

/// Step iterator over one scan's boundaries.
///
/// The scan is already evaluated; items replay its boundaries in
/// execution order. Driving the iterator to exhaustion commits the scan;
/// dropping it earlier aborts, leaving the runner at the previously
/// committed state with its patch map intact.
#[derive(Debug)]
pub struct ScanSteps<'a, Io: IoAdapter> {
    interp: &'a mut Interpreter<Io>,
    events: std::vec::IntoIter<TraceEvent>,
    prepared: Option<PreparedScan>,
}

impl<'a, Io: IoAdapter> ScanSteps<'a, Io> {
    pub(crate) fn new(
        interp: &'a mut Interpreter<Io>,
        events: Vec<TraceEvent>,
        prepared: PreparedScan,
    ) -> Self {
        ScanSteps {
            interp,
            events: events.into_iter(),
            prepared: Some(prepared),
        }
    }

    /// Drain the remaining boundaries and commit, returning the new
    /// snapshot.
    pub fn finish(mut self) -> State {
        self.events.by_ref().for_each(drop);
        let prepared = self
            .prepared
            .take()
            .expect("prepared scan present until finish or drop");
        self.interp.commit_prepared(prepared)
    }
}

impl<Io: IoAdapter> Iterator for ScanSteps<'_, Io> {
    type Item = TraceEvent;

    fn next(&mut self) -> Option<TraceEvent> {
        match self.events.next() {
            Some(event) => Some(event),
            None => {
                if let Some(prepared) = self.prepared.take() {
                    self.interp.commit_prepared(prepared);
                }
                None
            }
        }
    }
}

impl<Io: IoAdapter> Drop for ScanSteps<'_, Io> {
    fn drop(&mut self) {
        if let Some(prepared) = self.prepared.take() {
            if self.events.len() == 0 {
                // Fully consumed; commit even if the caller never polled
                // the trailing None.
                self.interp.commit_prepared(prepared);
            } else {
                self.interp.abort_prepared(prepared);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_mode_filters_kinds() {
        assert!(!TraceMode::Off.records(StepKind::Rung));
        assert!(TraceMode::Rungs.records(StepKind::Rung));
        assert!(!TraceMode::Rungs.records(StepKind::Instruction));
        assert!(TraceMode::Full.records(StepKind::Instruction));
    }
}
