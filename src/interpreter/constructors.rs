//! Interpreter constructors and the initial-state builder.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::ApiError;
use crate::history::{History, HistoryEntry};
use crate::io::IoAdapter;
use crate::program::Program;
use crate::state::{MachineMode, State};
use crate::value::Value;

use super::{Interpreter, RunnerParams, ScanStats};

impl<Io: IoAdapter + Default> Interpreter<Io> {
    /// Interpreter over a registered program with a default adapter.
    pub fn new(program: Program, params: RunnerParams) -> Result<Self, ApiError> {
        Self::with_io(program, params, Io::default())
    }
}

impl<Io: IoAdapter> Interpreter<Io> {
    /// Interpreter with an explicit I/O adapter.
    pub fn with_io(program: Program, params: RunnerParams, io: Io) -> Result<Self, ApiError> {
        let program = Arc::new(program);
        let initial = build_initial_state(&program, &params.initial_tags)?;
        Ok(Self::assemble(program, params, io, initial))
    }

    /// Fork seeded from a retained snapshot: same program and time mode,
    /// clean runtime scope, history holding only the seed.
    pub(crate) fn fork_from(&self, seed: State) -> Interpreter<Io>
    where
        Io: Default,
    {
        let mut params = self.params.clone();
        params.initial_tags = BTreeMap::new();
        let mut forked = Interpreter::assemble(
            self.program_handle(),
            params,
            Io::default(),
            seed,
        );
        forked.clock.set_mode(self.clock.mode());
        forked.clock.commit(forked.current.timestamp());
        forked.rtc = self.rtc;
        forked
    }

    fn assemble(
        program: Arc<Program>,
        params: RunnerParams,
        io: Io,
        initial: State,
    ) -> Interpreter<Io> {
        let mut history = History::new(params.history_limit);
        history.seed(HistoryEntry::new(initial.clone()));
        let mut clock = Clock::new(params.time_mode);
        clock.commit(initial.timestamp());
        Interpreter {
            program,
            params,
            io,
            mode: MachineMode::Uninitialized,
            clock,
            rtc: None,
            current: initial,
            history,
            patches: BTreeMap::new(),
            forces: BTreeMap::new(),
            breakpoints: Vec::new(),
            monitors: Vec::new(),
            next_handle: 0,
            fault: None,
            stats: ScanStats::default(),
            last_event: None,
        }
    }
}

/// Fold validated initial values over the empty scan-zero snapshot.
fn build_initial_state(
    program: &Program,
    initial_tags: &BTreeMap<String, Value>,
) -> Result<State, ApiError> {
    let mut state = State::initial();
    for (name, value) in initial_tags {
        let meta = program
            .lookup_name(name)
            .ok_or_else(|| ApiError::UnknownTag(name.clone()))?;
        if meta.read_only {
            return Err(ApiError::ReadOnlyTag(name.clone()));
        }
        if value.ty() != meta.ty {
            return Err(ApiError::TypeMismatch {
                tag: name.clone(),
                expected: meta.ty,
                got: value.ty(),
            });
        }
        state = state.with_tag(meta.name, value.clone());
    }
    Ok(state)
}
