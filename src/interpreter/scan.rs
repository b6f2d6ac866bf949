//! The nine-phase scan pipeline and machine lifecycle.
//!
//! Phases 0-7 execute into a [`PreparedScan`]; phase 8 (snapshot) runs
//! at commit. The split lets the debug step iterators hold a fully
//! evaluated scan and still abort it without a trace, restoring the
//! consumed patch map.

use std::sync::Arc;

use tracing::debug;

use crate::context::ScanContext;
use crate::debug::{BreakAction, CommitEvent, MonitorEvent, TraceMode};
use crate::error::RunError;
use crate::history::{History, HistoryEntry};
use crate::io::IoAdapter;
use crate::state::{MachineMode, State};
use crate::tag::sys;
use crate::value::{clamp_assign, Value};

use super::instruction::LogicRunner;
use super::{Interpreter, PreparedScan, ScanStats};

impl<Io: IoAdapter> Interpreter<Io> {
    /// Execute one full scan: phases 0-7, then the snapshot phase.
    pub fn step_scan(&mut self) -> Result<State, RunError> {
        let prepared = self.prepare_scan(TraceMode::Off)?;
        Ok(self.commit_prepared(prepared))
    }

    /// Enter RUN, applying the STOP to RUN transition when needed.
    pub(crate) fn ensure_run(&mut self) -> Result<(), RunError> {
        match self.mode {
            MachineMode::Fault => Err(RunError::Faulted(
                self.fault.expect("fault is latched while in FAULT"),
            )),
            MachineMode::Stop => {
                self.restart();
                Ok(())
            }
            MachineMode::Uninitialized => {
                self.mode = MachineMode::Run;
                Ok(())
            }
            MachineMode::Run => Ok(()),
        }
    }

    /// Run phases 0-7 into an uncommitted scan.
    #[tracing::instrument(name = "scan", skip_all, fields(scan_id))]
    pub(crate) fn prepare_scan(&mut self, trace: TraceMode) -> Result<PreparedScan, RunError> {
        self.ensure_run()?;

        let (timestamp, dt) = self.clock.preview();
        let scan_id = self.current.scan_id() + 1;
        tracing::Span::current().record("scan_id", scan_id);
        let mut ctx = ScanContext::new(self.current.clone(), scan_id, timestamp, dt, trace);
        let program = self.program_handle();

        // Phase 0: clear transient flags, advance the system values.
        self.phase_system(&mut ctx, scan_id, timestamp);

        // Phase 1: one-shot patches, consumed here.
        let patches = std::mem::take(&mut self.patches);
        for (name, value) in &patches {
            if let Some(meta) = program.lookup_name(name) {
                ctx.write(meta.name, value.clone());
            }
        }

        // Phase 2: physical inputs.
        for meta in program.inputs() {
            if let Some(value) = self.io.read_input(meta) {
                if let Some(stored) = clamp_assign(&value, meta.ty) {
                    ctx.write(meta.name.clone(), stored.value);
                }
            }
        }

        // Phase 3: pre-logic forces.
        self.apply_forces(&mut ctx);

        // Phase 4: ladder logic.
        LogicRunner::new(&program).run(&mut ctx);

        // Phase 5: post-logic forces override whatever logic wrote.
        self.apply_forces(&mut ctx);

        // Phase 6: physical outputs.
        for meta in program.outputs() {
            let value = ctx.read(meta);
            self.io.write_output(meta, &value);
        }

        // Phase 7: scan-time statistics and the flag tags.
        self.phase_flags(&mut ctx, dt);

        Ok(PreparedScan { ctx, patches })
    }

    /// Phase 8: snapshot, history, monitors, breakpoints.
    pub(crate) fn commit_prepared(&mut self, prepared: PreparedScan) -> State {
        let PreparedScan { ctx, .. } = prepared;
        let fatal = ctx.flags().fatal;
        let scan_ms = ctx.dt() * 1000.0;
        let (state, trace) = ctx.commit();
        debug!(scan_id = state.scan_id(), fatal = fatal.is_some(), "commit");

        self.clock.commit(state.timestamp());
        self.stats.observe(scan_ms);
        let previous = std::mem::replace(&mut self.current, state.clone());

        let mut entry = HistoryEntry::new(state.clone());
        entry.trace = trace.map(|t| Arc::from(t.into_boxed_slice()));
        self.history.push(entry);

        let program = self.program_handle();
        let mut fired = Vec::new();
        for monitor in &mut self.monitors {
            let default = program
                .lookup_name(&monitor.tag)
                .map(|m| m.default)
                .unwrap_or(Value::Bool(false));
            let old = previous
                .get(&monitor.tag)
                .cloned()
                .unwrap_or_else(|| default.clone());
            let new = state.get(&monitor.tag).cloned().unwrap_or(default);
            if old != new {
                let event = MonitorEvent {
                    tag: monitor.tag.clone(),
                    scan_id: state.scan_id(),
                    old,
                    new,
                };
                (monitor.callback)(&event);
                fired.push(monitor.tag.clone());
            }
        }

        let mut paused = false;
        let mut labels = Vec::new();
        for breakpoint in &self.breakpoints {
            if (breakpoint.predicate)(&state) {
                match &breakpoint.action {
                    BreakAction::Pause => paused = true,
                    BreakAction::Snapshot(label) => {
                        let _ = self.history.label(state.scan_id(), label.clone());
                        labels.push(label.clone());
                    }
                }
            }
        }

        self.last_event = Some(CommitEvent {
            scan_id: state.scan_id(),
            changed: previous.diff(&state).len(),
            monitors_fired: fired,
            labels,
            paused,
        });

        if let Some(fault) = fatal {
            self.fault = Some(fault);
            self.mode = MachineMode::Fault;
        }
        state
    }

    /// Discard an uncommitted scan, restoring its consumed patches.
    pub(crate) fn abort_prepared(&mut self, prepared: PreparedScan) {
        let PreparedScan { patches, .. } = prepared;
        for (name, value) in patches {
            self.patches.entry(name).or_insert(value);
        }
    }

    fn phase_system(&self, ctx: &mut ScanContext, scan_id: u64, timestamp: f64) {
        let count = ctx
            .read_raw(sys::SCAN_COUNT)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let (count, _) = crate::arith::wrap_to(crate::value::TagType::Dint, count + 1);
        ctx.write(sys::SCAN_COUNT, Value::Dint(count as i32));
        ctx.write(sys::FIRST_SCAN, Value::Bool(scan_id == 1));
        ctx.write(sys::ALWAYS_ON, Value::Bool(true));
        ctx.write(sys::ALWAYS_OFF, Value::Bool(false));
        ctx.write(sys::ERR_DIV, Value::Bool(false));
        ctx.write(sys::ERR_RANGE, Value::Bool(false));
        ctx.write(sys::ERR_ADDRESS, Value::Bool(false));
        ctx.write(sys::ERR_MATH, Value::Bool(self.fault.is_some()));
        if let Some(origin) = self.rtc {
            let now = origin.add_seconds(timestamp.max(0.0).floor() as u64);
            ctx.write(sys::RTC_YEAR, Value::Int(now.year as i16));
            ctx.write(sys::RTC_MONTH, Value::Int(now.month as i16));
            ctx.write(sys::RTC_DAY, Value::Int(now.day as i16));
            ctx.write(sys::RTC_HOUR, Value::Int(now.hour as i16));
            ctx.write(sys::RTC_MINUTE, Value::Int(now.minute as i16));
            ctx.write(sys::RTC_SECOND, Value::Int(now.second as i16));
        }
    }

    fn phase_flags(&self, ctx: &mut ScanContext, dt: f64) {
        let ms = dt * 1000.0;
        let (min_ms, max_ms) = self.stats.preview(ms);
        ctx.write(sys::SCAN_TIME, Value::Real(ms as f32));
        ctx.write(sys::SCAN_TIME_MIN, Value::Real(min_ms as f32));
        ctx.write(sys::SCAN_TIME_MAX, Value::Real(max_ms as f32));
        let flags = *ctx.flags();
        ctx.write(sys::ERR_DIV, Value::Bool(flags.division));
        ctx.write(sys::ERR_RANGE, Value::Bool(flags.range));
        ctx.write(sys::ERR_ADDRESS, Value::Bool(flags.address));
        if flags.fatal.is_some() {
            ctx.write(sys::ERR_MATH, Value::Bool(true));
        }
    }

    fn apply_forces(&self, ctx: &mut ScanContext) {
        let program = &self.program;
        for (name, value) in &self.forces {
            if let Some(meta) = program.lookup_name(name) {
                ctx.write(meta.name, value.clone());
            }
        }
    }

    /// STOP to RUN: non-retentive tags reset, runtime scope clears.
    fn restart(&mut self) {
        debug!("stop-to-run transition");
        let program = self.program_handle();
        let mut tags = im::HashMap::new();
        for (name, value) in self.current.tags().iter() {
            if let Some(meta) = program.lookup_name(name) {
                if meta.retentive && !meta.read_only {
                    tags.insert(name.clone(), value.clone());
                }
            }
        }
        self.current = State::new(0, 0.0, tags, im::HashMap::new());
        self.reset_runtime_scope();
        self.mode = MachineMode::Run;
    }

    /// Halt scanning. Tags keep their values; the next execution method
    /// performs the STOP to RUN transition.
    pub fn stop(&mut self) {
        if self.mode != MachineMode::Fault {
            self.mode = MachineMode::Stop;
        }
    }

    /// Power-cycle: with the battery present every tag survives, without
    /// it everything resets to defaults. Runtime scope clears either
    /// way, and a latched fault releases.
    pub fn reboot(&mut self) {
        debug!(battery = self.params.battery, "reboot");
        let tags = if self.params.battery {
            let mut kept = self.current.tags().clone();
            kept.retain(|name, _| !sys::is_reserved(name));
            kept
        } else {
            im::HashMap::new()
        };
        self.current = State::new(0, 0.0, tags, im::HashMap::new());
        self.reset_runtime_scope();
        self.fault = None;
        self.mode = MachineMode::Run;
    }

    /// External fault reset: FAULT to STOP.
    pub fn reset_fault(&mut self) {
        if self.mode == MachineMode::Fault {
            self.fault = None;
            self.mode = MachineMode::Stop;
        }
    }

    fn reset_runtime_scope(&mut self) {
        self.clock.reset();
        let mut history = History::new(self.params.history_limit);
        history.seed(HistoryEntry::new(self.current.clone()));
        self.history = history;
        self.patches.clear();
        self.forces.clear();
        self.breakpoints.clear();
        self.monitors.clear();
        self.stats = ScanStats::default();
        self.last_event = None;
    }
}
