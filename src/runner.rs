//! Runner façade over the scan interpreter.
//!
//! Validation happens here, at the call site: patches, forces, monitors
//! and bindings are checked against the program before they touch the
//! engine, so a rejected call leaves no trace. Execution methods honor
//! pause breakpoints and the host cancellation token between scans,
//! never mid-scan.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::{RtcDateTime, TimeMode};
use crate::debug::{
    BreakAction, Breakpoint, BreakpointId, CommitEvent, Monitor, MonitorEvent, MonitorId,
    ScanSteps, TraceEvent, TraceMode,
};
use crate::error::{ApiError, FatalFault, RunError};
use crate::history::History;
use crate::interpreter::{Interpreter, RunnerParams};
use crate::io::{IoAdapter, NoopIo};
use crate::program::{Program, RungId};
use crate::state::{MachineMode, State};
use crate::tag::TagMeta;
use crate::value::Value;

/// Cloneable cancellation signal checked between scans.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation at the next between-scan boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Public façade: execution, state injection, inspection and the debug
/// overlay, over an owned [`Interpreter`].
#[derive(Debug)]
pub struct Runner<Io: IoAdapter = NoopIo> {
    interp: Interpreter<Io>,
    cancel: Option<CancelToken>,
}

impl Runner<NoopIo> {
    /// Runner over a program with default parameters and no I/O.
    pub fn new(program: Program) -> Result<Self, ApiError> {
        Self::with_params(program, RunnerParams::default())
    }
}

impl<Io: IoAdapter + Default> Runner<Io> {
    /// Runner with explicit parameters and a default adapter.
    pub fn with_params(program: Program, params: RunnerParams) -> Result<Self, ApiError> {
        Ok(Runner {
            interp: Interpreter::new(program, params)?,
            cancel: None,
        })
    }
}

impl<Io: IoAdapter> Runner<Io> {
    /// Runner with an explicit I/O adapter.
    pub fn with_io(program: Program, params: RunnerParams, io: Io) -> Result<Self, ApiError> {
        Ok(Runner {
            interp: Interpreter::with_io(program, params, io)?,
            cancel: None,
        })
    }

    /// Attach a host cancellation token, honored between scans.
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = Some(token);
    }

    fn check_cancel(&self) -> Result<(), RunError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(RunError::Cancelled),
            _ => Ok(()),
        }
    }

    fn paused(&self) -> bool {
        self.interp
            .last_event()
            .is_some_and(|event| event.paused)
    }

    /// Execute exactly one scan.
    pub fn step(&mut self) -> Result<State, RunError> {
        self.check_cancel()?;
        self.interp.step_scan()
    }

    /// Execute up to `cycles` scans, stopping early on a pause
    /// breakpoint or cancellation.
    pub fn run(&mut self, cycles: u64) -> Result<State, RunError> {
        for _ in 0..cycles {
            self.check_cancel()?;
            self.interp.step_scan()?;
            if self.paused() {
                break;
            }
        }
        Ok(self.interp.current_state().clone())
    }

    /// Advance simulated time by `seconds`. Zero seconds still runs one
    /// scan, keeping fixed-step runs deterministic.
    pub fn run_for(&mut self, seconds: f64) -> Result<State, RunError> {
        self.interp.ensure_run()?;
        let deadline = self.interp.simulation_time() + seconds;
        loop {
            self.check_cancel()?;
            let state = self.interp.step_scan()?;
            if self.paused() || state.timestamp() + 1e-9 >= deadline {
                break;
            }
        }
        Ok(self.interp.current_state().clone())
    }

    /// Execute until the predicate holds on a committed state, bounded
    /// by `max_cycles`.
    pub fn run_until<P>(&mut self, predicate: P, max_cycles: u64) -> Result<State, RunError>
    where
        P: Fn(&State) -> bool,
    {
        self.interp.ensure_run()?;
        for _ in 0..max_cycles {
            self.check_cancel()?;
            let state = self.interp.step_scan()?;
            if predicate(&state) || self.paused() {
                break;
            }
        }
        Ok(self.interp.current_state().clone())
    }

    /// Halt scanning, retaining tag values.
    pub fn stop(&mut self) {
        self.interp.stop();
    }

    /// Simulate a power cycle, honoring the battery flag.
    pub fn reboot(&mut self) {
        self.interp.reboot();
    }

    /// Release a latched fault: FAULT to STOP.
    pub fn reset_fault(&mut self) {
        self.interp.reset_fault();
    }

    fn bindable(&self, name: &str, value: &Value) -> Result<TagMeta, ApiError> {
        let meta = self
            .interp
            .program()
            .lookup_name(name)
            .ok_or_else(|| ApiError::UnknownTag(name.to_owned()))?;
        if meta.read_only {
            return Err(ApiError::ReadOnlyTag(name.to_owned()));
        }
        if value.ty() != meta.ty {
            return Err(ApiError::TypeMismatch {
                tag: name.to_owned(),
                expected: meta.ty,
                got: value.ty(),
            });
        }
        Ok(meta)
    }

    /// Queue one-shot values applied at the start of the next scan.
    /// Merged last-write-wins with already queued patches; the whole map
    /// is validated before anything lands.
    pub fn patch<I, N>(&mut self, values: I) -> Result<(), ApiError>
    where
        I: IntoIterator<Item = (N, Value)>,
        N: Into<String>,
    {
        let values: Vec<(String, Value)> = values
            .into_iter()
            .map(|(n, v)| (n.into(), v))
            .collect();
        let mut staged = Vec::with_capacity(values.len());
        for (name, value) in values {
            let meta = self.bindable(&name, &value)?;
            staged.push((meta.name, value));
        }
        for (name, value) in staged {
            self.interp.patches.insert(name, value);
        }
        Ok(())
    }

    /// Assert a level force, applied before and after logic every scan.
    pub fn add_force(&mut self, name: &str, value: Value) -> Result<(), ApiError> {
        let meta = self.bindable(name, &value)?;
        self.interp.forces.insert(meta.name, value);
        Ok(())
    }

    /// Drop a force. Unknown names are not an error.
    pub fn remove_force(&mut self, name: &str) {
        self.interp.forces.remove(name);
    }

    /// Drop every force.
    pub fn clear_forces(&mut self) {
        self.interp.forces.clear();
    }

    /// Active forces.
    pub fn forces(&self) -> &BTreeMap<String, Value> {
        self.interp.forces()
    }

    /// Run a closure with extra forces asserted, restoring the exact
    /// prior force map afterwards. Nest-safe.
    pub fn with_forces<I, N, R, F>(&mut self, values: I, f: F) -> Result<R, ApiError>
    where
        I: IntoIterator<Item = (N, Value)>,
        N: Into<String>,
        F: FnOnce(&mut Self) -> R,
    {
        let values: Vec<(String, Value)> = values
            .into_iter()
            .map(|(n, v)| (n.into(), v))
            .collect();
        let mut staged = Vec::with_capacity(values.len());
        for (name, value) in values {
            let meta = self.bindable(&name, &value)?;
            staged.push((meta.name, value));
        }
        let saved = self.interp.forces.clone();
        for (name, value) in staged {
            self.interp.forces.insert(name, value);
        }
        let result = f(self);
        self.interp.forces = saved;
        Ok(result)
    }

    /// Last committed snapshot.
    pub fn current_state(&self) -> &State {
        self.interp.current_state()
    }

    /// Simulated seconds since the RUN transition.
    pub fn simulation_time(&self) -> f64 {
        self.interp.simulation_time()
    }

    /// Lifecycle mode.
    pub fn mode(&self) -> MachineMode {
        self.interp.mode()
    }

    /// Latched fatal fault, if any.
    pub fn fault(&self) -> Option<FatalFault> {
        self.interp.fault()
    }

    /// Active time mode.
    pub fn time_mode(&self) -> TimeMode {
        self.interp.time_mode()
    }

    /// Switch the time mode.
    pub fn set_time_mode(&mut self, mode: TimeMode) {
        self.interp.set_time_mode(mode);
    }

    /// Register the wall-clock origin for the RTC system tags.
    pub fn set_rtc(&mut self, rtc: RtcDateTime) {
        self.interp.set_rtc(rtc);
    }

    /// Set the battery flag consulted by [`Self::reboot`].
    pub fn set_battery_present(&mut self, present: bool) {
        self.interp.set_battery_present(present);
    }

    /// Registered program.
    pub fn program(&self) -> &Program {
        self.interp.program()
    }

    /// Retained history.
    pub fn history(&self) -> &History {
        self.interp.history()
    }

    /// Move the inspection playhead to a retained scan.
    pub fn seek(&mut self, scan_id: u64) -> Result<State, ApiError> {
        self.interp.history_mut().seek(scan_id).cloned()
    }

    /// Move the playhead back `seconds` of simulated time.
    pub fn rewind(&mut self, seconds: f64) -> Result<State, ApiError> {
        self.interp.history_mut().rewind(seconds).cloned()
    }

    /// Snapshot under the playhead.
    pub fn playhead(&self) -> State {
        self.interp
            .history()
            .playhead_state()
            .expect("history always retains at least the seed snapshot")
            .clone()
    }

    /// Attach a label to a retained scan.
    pub fn label(&mut self, scan_id: u64, label: impl Into<String>) -> Result<(), ApiError> {
        self.interp.history_mut().label(scan_id, label)
    }

    /// Tags whose committed values differ between two retained scans,
    /// lexicographically ordered. Values absent on one side read as the
    /// tag's declared default; `None` marks a name the program does not
    /// know.
    #[allow(clippy::type_complexity)]
    pub fn diff(
        &self,
        a: u64,
        b: u64,
    ) -> Result<BTreeMap<String, (Option<Value>, Option<Value>)>, ApiError> {
        let history = self.interp.history();
        let state_a = history.at(a)?;
        let state_b = history.at(b)?;
        let mut out = BTreeMap::new();
        for (name, (old, new)) in state_a.diff(state_b) {
            let default = self.interp.program().lookup_name(&name).map(|m| m.default);
            let old = old.or_else(|| default.clone());
            let new = new.or(default);
            if old != new {
                out.insert(name, (old, new));
            }
        }
        Ok(out)
    }

    /// Retained trace of one rung for a scan (the playhead scan when
    /// `scan_id` is `None`). Only debug-stepped scans retain traces.
    pub fn inspect(
        &self,
        rung: RungId,
        scan_id: Option<u64>,
    ) -> Result<Vec<TraceEvent>, ApiError> {
        let scan_id = scan_id.unwrap_or_else(|| self.interp.history().playhead());
        let entry = self.interp.history().entry(scan_id)?;
        let trace = entry.trace.as_ref().ok_or(ApiError::NoTrace(scan_id))?;
        Ok(trace
            .iter()
            .filter(|event| event.rung == rung)
            .cloned()
            .collect())
    }

    /// Summary of the most recent commit.
    pub fn inspect_event(&self) -> Option<&CommitEvent> {
        self.interp.last_event()
    }

    /// Independent runner seeded from a retained snapshot: same program
    /// and time mode, clean runtime scope, history holding only the
    /// seed.
    pub fn fork(&self, scan_id: Option<u64>) -> Result<Runner<Io>, ApiError>
    where
        Io: Default,
    {
        let scan_id = scan_id.unwrap_or_else(|| self.interp.current_state().scan_id());
        let seed = self.interp.history().at(scan_id)?.clone();
        Ok(Runner {
            interp: self.interp.fork_from(seed),
            cancel: None,
        })
    }

    /// Register a breakpoint predicate; finish with
    /// [`WhenBuilder::pause`] or [`WhenBuilder::snapshot`].
    pub fn when<P>(&mut self, predicate: P) -> WhenBuilder<'_, Io>
    where
        P: Fn(&State) -> bool + 'static,
    {
        WhenBuilder {
            runner: self,
            predicate: Box::new(predicate),
        }
    }

    /// Drop a breakpoint.
    pub fn remove_breakpoint(&mut self, id: BreakpointId) {
        self.interp.breakpoints.retain(|b| b.id != id);
    }

    /// Drop every breakpoint.
    pub fn clear_breakpoints(&mut self) {
        self.interp.breakpoints.clear();
    }

    /// Watch a tag: the callback fires after any scan whose commit
    /// changed the tag's value. Multiple monitors per tag fire in
    /// registration order.
    pub fn monitor<F>(&mut self, tag: &str, callback: F) -> Result<MonitorId, ApiError>
    where
        F: FnMut(&MonitorEvent) + 'static,
    {
        let meta = self
            .interp
            .program()
            .lookup_name(tag)
            .ok_or_else(|| ApiError::UnknownTag(tag.to_owned()))?;
        let id = MonitorId(self.interp.next_handle());
        self.interp.monitors.push(Monitor {
            id,
            tag: meta.name,
            callback: Box::new(callback),
        });
        Ok(id)
    }

    /// Drop a monitor.
    pub fn remove_monitor(&mut self, id: MonitorId) {
        self.interp.monitors.retain(|m| m.id != id);
    }

    /// Step iterator over the next scan's rung boundaries. The scan
    /// commits when the iterator is driven to exhaustion; dropping it
    /// earlier aborts the scan.
    pub fn scan_steps(&mut self) -> Result<ScanSteps<'_, Io>, RunError> {
        self.steps(TraceMode::Rungs)
    }

    /// Step iterator over every boundary of the next scan: rungs,
    /// branches, subroutines and instructions. The committed scan
    /// retains its trace for [`Self::inspect`].
    pub fn scan_steps_debug(&mut self) -> Result<ScanSteps<'_, Io>, RunError> {
        self.steps(TraceMode::Full)
    }

    fn steps(&mut self, mode: TraceMode) -> Result<ScanSteps<'_, Io>, RunError> {
        self.check_cancel()?;
        let prepared = self.interp.prepare_scan(mode)?;
        let events = prepared.ctx.trace_events().to_vec();
        Ok(ScanSteps::new(&mut self.interp, events, prepared))
    }
}

/// Pending breakpoint registration returned by [`Runner::when`].
pub struct WhenBuilder<'a, Io: IoAdapter> {
    runner: &'a mut Runner<Io>,
    predicate: Box<dyn Fn(&State) -> bool>,
}

impl<Io: IoAdapter> WhenBuilder<'_, Io> {
    /// Halt `run*` after any commit matching the predicate.
    pub fn pause(self) -> BreakpointId {
        self.register(BreakAction::Pause)
    }

    /// Label the history entry of any commit matching the predicate.
    pub fn snapshot(self, label: impl Into<String>) -> BreakpointId {
        self.register(BreakAction::Snapshot(label.into()))
    }

    fn register(self, action: BreakAction) -> BreakpointId {
        let id = BreakpointId(self.runner.interp.next_handle());
        self.runner.interp.breakpoints.push(Breakpoint {
            id,
            predicate: self.predicate,
            action,
        });
        id
    }
}
