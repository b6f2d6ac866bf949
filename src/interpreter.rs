//! Scan-cycle interpreter.
//!
//! The interpreter owns the program, the last committed snapshot, the
//! history ring and the debug registries, and executes one scan at a
//! time through a nine-phase pipeline. Execution loops, validation and
//! the public façade live in [`crate::runner::Runner`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::{Clock, RtcDateTime, TimeMode};
use crate::context::ScanContext;
use crate::debug::{Breakpoint, CommitEvent, Monitor};
use crate::error::FatalFault;
use crate::history::History;
use crate::io::{IoAdapter, NoopIo};
use crate::program::Program;
use crate::state::{MachineMode, State};
use crate::value::Value;

mod condition;
mod constructors;
mod instruction;
mod ops;
mod scan;
mod sequencer;

/// Interpreter configuration.
#[derive(Debug, Clone)]
pub struct RunnerParams {
    /// Maximum retained history snapshots.
    pub history_limit: usize,
    /// Battery present: tags survive a power-cycle reboot.
    pub battery: bool,
    /// Initial time mode.
    pub time_mode: TimeMode,
    /// Initial tag values folded into the seed snapshot.
    pub initial_tags: BTreeMap<String, Value>,
}

impl Default for RunnerParams {
    fn default() -> Self {
        RunnerParams {
            history_limit: 1024,
            battery: false,
            time_mode: TimeMode::default(),
            initial_tags: BTreeMap::new(),
        }
    }
}

/// Session scan-duration statistics, feeding the scan-time system tags.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScanStats {
    pub last_ms: f64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl ScanStats {
    fn observe(&mut self, ms: f64) {
        self.last_ms = ms;
        self.min_ms = Some(self.min_ms.map_or(ms, |m| m.min(ms)));
        self.max_ms = Some(self.max_ms.map_or(ms, |m| m.max(ms)));
    }

    /// Min/max as they will read after observing `ms`, without mutating.
    pub(crate) fn preview(&self, ms: f64) -> (f64, f64) {
        (
            self.min_ms.map_or(ms, |m| m.min(ms)),
            self.max_ms.map_or(ms, |m| m.max(ms)),
        )
    }
}

/// An executed but uncommitted scan: phases 0-7 are done, the snapshot
/// phase runs at commit. Aborting restores the consumed patch map.
#[derive(Debug)]
pub struct PreparedScan {
    pub(crate) ctx: ScanContext,
    pub(crate) patches: BTreeMap<String, Value>,
}

/// Scan-cycle state machine over a registered program.
pub struct Interpreter<Io: IoAdapter = NoopIo> {
    pub(crate) program: Arc<Program>,
    pub(crate) params: RunnerParams,
    pub(crate) io: Io,
    pub(crate) mode: MachineMode,
    pub(crate) clock: Clock,
    pub(crate) rtc: Option<RtcDateTime>,
    pub(crate) current: State,
    pub(crate) history: History,
    pub(crate) patches: BTreeMap<String, Value>,
    pub(crate) forces: BTreeMap<String, Value>,
    pub(crate) breakpoints: Vec<Breakpoint>,
    pub(crate) monitors: Vec<Monitor>,
    pub(crate) next_handle: u64,
    pub(crate) fault: Option<FatalFault>,
    pub(crate) stats: ScanStats,
    pub(crate) last_event: Option<CommitEvent>,
}

impl<Io: IoAdapter> core::fmt::Debug for Interpreter<Io> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interpreter")
            .field("mode", &self.mode)
            .field("scan_id", &self.current.scan_id())
            .field("timestamp", &self.current.timestamp())
            .field("history_len", &self.history.len())
            .field("forces", &self.forces)
            .field("breakpoints", &self.breakpoints.len())
            .field("monitors", &self.monitors.len())
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}

impl<Io: IoAdapter> Interpreter<Io> {
    /// Registered program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Shared handle to the program, for forks.
    pub(crate) fn program_handle(&self) -> Arc<Program> {
        Arc::clone(&self.program)
    }

    /// Lifecycle mode.
    pub const fn mode(&self) -> MachineMode {
        self.mode
    }

    /// Last committed snapshot.
    pub const fn current_state(&self) -> &State {
        &self.current
    }

    /// Simulated seconds since the RUN transition.
    pub fn simulation_time(&self) -> f64 {
        self.current.timestamp()
    }

    /// Active time mode.
    pub fn time_mode(&self) -> TimeMode {
        self.clock.mode()
    }

    /// Switch the clock mode. Realtime sessions restart on the next
    /// scan.
    pub fn set_time_mode(&mut self, mode: TimeMode) {
        self.clock.set_mode(mode);
    }

    /// Register the wall-clock origin of simulation time.
    pub fn set_rtc(&mut self, rtc: RtcDateTime) {
        self.rtc = Some(rtc);
    }

    /// Battery flag consulted by [`Self::reboot`].
    pub fn set_battery_present(&mut self, present: bool) {
        self.params.battery = present;
    }

    /// Latched fatal fault, if any.
    pub const fn fault(&self) -> Option<FatalFault> {
        self.fault
    }

    /// History ring.
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Mutable history ring, for playhead moves and labeling.
    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Active force map.
    pub const fn forces(&self) -> &BTreeMap<String, Value> {
        &self.forces
    }

    /// Summary of the most recent commit.
    pub const fn last_event(&self) -> Option<&CommitEvent> {
        self.last_event.as_ref()
    }

    pub(crate) fn next_handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }
}
