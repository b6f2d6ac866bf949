//! Shared fixtures for the scenario tests.

use crate::clock::TimeMode;
use crate::interpreter::RunnerParams;
use crate::prelude::*;

/// Parameters with a fixed scan period.
pub fn fixed(dt: f64) -> RunnerParams {
    RunnerParams {
        time_mode: TimeMode::FixedStep { dt },
        ..RunnerParams::default()
    }
}

/// The latched-motor program: `rise(Start)` latches Motor, `rise(Stop)`
/// unlatches it.
pub fn latched_motor() -> Program {
    let mut builder = Program::builder();
    let start = builder.tag(Tag::new("Start", TagType::Bool)).unwrap();
    let stop = builder.tag(Tag::new("Stop", TagType::Bool)).unwrap();
    let motor = builder.tag(Tag::new("Motor", TagType::Bool)).unwrap();
    builder.rung(Rung::new(
        vec![Condition::rise(start)],
        vec![Instruction::latch(motor)],
    ));
    builder.rung(Rung::new(
        vec![Condition::rise(stop)],
        vec![Instruction::reset(motor)],
    ));
    builder.finish().unwrap()
}

/// Runner over the latched-motor program at dt = 0.1.
pub fn motor_runner() -> Runner {
    Runner::<NoopIo>::with_params(latched_motor(), fixed(0.1)).unwrap()
}

/// True committed value of a BOOL tag.
pub fn bit(state: &State, name: &str) -> bool {
    state
        .get(name)
        .map(Value::is_truthy)
        .unwrap_or(false)
}

/// Committed integer view of a tag, defaulting to 0.
pub fn int(state: &State, name: &str) -> i64 {
    state.get(name).and_then(Value::as_i64).unwrap_or(0)
}
