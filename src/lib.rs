//! Deterministic scan-cycle simulator for PLC ladder logic.
//!
//! A control program is an ordered set of rungs built from conditions
//! and instructions. The engine executes it in discrete scans, each a
//! pure transition from one immutable [`state::State`] to the next:
//! patches and inputs land first, forces override before and after the
//! ladder logic, and the snapshot phase appends the committed state to a
//! bounded history that tests, debuggers and soft-PLC adapters replay at
//! their own pace.
//!
//! The [`runner::Runner`] façade is the intended entry point:
//!
//! ```
//! use ladder_vm::prelude::*;
//!
//! let mut builder = Program::builder();
//! let start = builder.tag(Tag::new("Start", TagType::Bool)).unwrap();
//! let motor = builder.tag(Tag::new("Motor", TagType::Bool)).unwrap();
//! builder.rung(Rung::new(
//!     vec![Condition::rise(start)],
//!     vec![Instruction::latch(motor)],
//! ));
//! let program = builder.finish().unwrap();
//!
//! let mut runner = Runner::new(program).unwrap();
//! runner.patch([("Start", Value::Bool(true))]).unwrap();
//! let state = runner.step().unwrap();
//! assert_eq!(state.get("Motor"), Some(&Value::Bool(true)));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod arith;
pub mod block;
pub mod clock;
pub mod context;
pub mod debug;
pub mod error;
pub mod history;
pub mod interpreter;
pub mod io;
pub mod program;
pub mod runner;
pub mod state;
pub mod tag;
pub mod value;

#[cfg(test)]
mod tests;

pub mod prelude {
    //! Re-exports of the public surface.

    pub use crate::block::{AddressStyle, Block, BlockId, SlotConfig};
    pub use crate::clock::{RtcDateTime, TimeMode};
    pub use crate::debug::{
        BreakpointId, CommitEvent, MonitorEvent, MonitorId, ScanSteps, StepKind, TraceEvent,
    };
    pub use crate::error::{ApiError, BuildError, FatalFault, RunError};
    pub use crate::history::{History, HistoryEntry};
    pub use crate::interpreter::{Interpreter, RunnerParams};
    pub use crate::io::{IoAdapter, NoopIo};
    pub use crate::program::{
        CalcMode, CmpOp, Condition, Conversion, Drum, DrumJog, DrumJump, DrumKind, DrumStep,
        Expr, Instruction, Operand, Program, ProgramBuilder, Rung, RungId, Site,
        SourceLocation, Subroutine, TagRef, TimeUnit, Window,
    };
    pub use crate::runner::{CancelToken, Runner, WhenBuilder};
    pub use crate::state::{MachineMode, State};
    pub use crate::tag::{sys, Tag, TagId, TagKind, TagMeta};
    pub use crate::value::{TagType, Value};
}
