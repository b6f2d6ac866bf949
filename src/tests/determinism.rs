use quickcheck_macros::quickcheck;

use crate::prelude::*;

use super::test_helpers::{fixed, int};

/// Drive the latched-motor program with a patch schedule and return the
/// full retained history.
fn run_schedule(schedule: &[(bool, bool)]) -> Vec<State> {
    let mut runner =
        Runner::<NoopIo>::with_params(super::test_helpers::latched_motor(), fixed(0.05)).unwrap();
    for &(start, stop) in schedule {
        runner
            .patch([
                ("Start", Value::Bool(start)),
                ("Stop", Value::Bool(stop)),
            ])
            .unwrap();
        runner.step().unwrap();
    }
    runner
        .history()
        .latest(usize::MAX)
        .into_iter()
        .cloned()
        .collect()
}

#[quickcheck]
fn identical_inputs_produce_identical_histories(schedule: Vec<(bool, bool)>) -> bool {
    let first = run_schedule(&schedule);
    let second = run_schedule(&schedule);
    first == second
}

#[quickcheck]
fn rise_fires_exactly_on_false_to_true_transitions(inputs: Vec<bool>) -> bool {
    let mut builder = Program::builder();
    let x = builder.tag(Tag::new("X", TagType::Bool)).unwrap();
    let count = builder.tag(Tag::new("Count", TagType::Dint)).unwrap();
    builder.rung(Rung::new(
        vec![Condition::rise(x)],
        vec![Instruction::calc(Expr::from(count) + 1, count)],
    ));
    let mut runner = Runner::<NoopIo>::with_params(builder.finish().unwrap(), fixed(0.01)).unwrap();

    for &level in &inputs {
        runner.patch([("X", Value::Bool(level))]).unwrap();
        runner.step().unwrap();
    }

    let mut expected = 0i64;
    let mut previous = false;
    for &level in &inputs {
        if level && !previous {
            expected += 1;
        }
        previous = level;
    }
    int(runner.current_state(), "Count") == expected
}

#[quickcheck]
fn fall_is_the_mirror_of_rise(inputs: Vec<bool>) -> bool {
    let mut builder = Program::builder();
    let x = builder.tag(Tag::new("X", TagType::Bool)).unwrap();
    let count = builder.tag(Tag::new("Count", TagType::Dint)).unwrap();
    builder.rung(Rung::new(
        vec![Condition::fall(x)],
        vec![Instruction::calc(Expr::from(count) + 1, count)],
    ));
    let mut runner = Runner::<NoopIo>::with_params(builder.finish().unwrap(), fixed(0.01)).unwrap();

    for &level in &inputs {
        runner.patch([("X", Value::Bool(level))]).unwrap();
        runner.step().unwrap();
    }

    let mut expected = 0i64;
    let mut previous = false;
    for &level in &inputs {
        if !level && previous {
            expected += 1;
        }
        previous = level;
    }
    int(runner.current_state(), "Count") == expected
}

#[quickcheck]
fn copy_clamps_into_int_bounds(v: i32) -> bool {
    let mut builder = Program::builder();
    let dest = builder.tag(Tag::new("D", TagType::Int)).unwrap();
    builder.rung(Rung::new(vec![], vec![Instruction::copy(v, dest)]));
    let mut runner = Runner::new(builder.finish().unwrap()).unwrap();
    let state = runner.step().unwrap();
    int(&state, "D") == (v as i64).clamp(i16::MIN as i64, i16::MAX as i64)
}

#[quickcheck]
fn calc_wraps_into_int_width(v: i32) -> bool {
    let mut builder = Program::builder();
    let dest = builder.tag(Tag::new("D", TagType::Int)).unwrap();
    builder.rung(Rung::new(
        vec![],
        vec![Instruction::calc(Expr::from(v), dest)],
    ));
    let mut runner = Runner::new(builder.finish().unwrap()).unwrap();
    let state = runner.step().unwrap();
    int(&state, "D") == (v as u32 as u16) as i16 as i64
}

#[test]
fn forced_value_sticks_across_arbitrary_logic() {
    // Force priority: the committed value equals the force on every
    // scan it is active, whatever logic does.
    let mut builder = Program::builder();
    let coil = builder.tag(Tag::new("Coil", TagType::Bool)).unwrap();
    builder.rung(Rung::new(vec![], vec![Instruction::out(coil)]));
    let mut runner = Runner::new(builder.finish().unwrap()).unwrap();

    runner.add_force("Coil", Value::Bool(false)).unwrap();
    for _ in 0..5 {
        let state = runner.step().unwrap();
        assert_eq!(state.get("Coil"), Some(&Value::Bool(false)));
    }
}

#[test]
fn two_runners_stay_identical_under_stepping_styles() {
    // One runner advanced with run(), another with single steps; the
    // committed sequence must match scan for scan.
    let mut a = Runner::<NoopIo>::with_params(super::test_helpers::latched_motor(), fixed(0.1)).unwrap();
    let mut b = Runner::<NoopIo>::with_params(super::test_helpers::latched_motor(), fixed(0.1)).unwrap();

    a.patch([("Start", Value::Bool(true))]).unwrap();
    b.patch([("Start", Value::Bool(true))]).unwrap();

    a.run(6).unwrap();
    for _ in 0..6 {
        b.step().unwrap();
    }

    let ha: Vec<&State> = a.history().latest(usize::MAX);
    let hb: Vec<&State> = b.history().latest(usize::MAX);
    assert_eq!(ha, hb);
}
