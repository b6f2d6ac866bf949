use crate::interpreter::RunnerParams;
use crate::prelude::*;

use super::test_helpers::{bit, fixed, int};

fn retention_runner(battery: bool) -> Runner {
    let mut builder = Program::builder();
    let keep = builder
        .tag(Tag::new("Keep", TagType::Dint).retentive())
        .unwrap();
    let lose = builder.tag(Tag::new("Lose", TagType::Dint)).unwrap();
    let seeded = builder
        .tag(Tag::new("Seeded", TagType::Dint).with_default(Value::Dint(42)))
        .unwrap();
    let go = builder.tag(Tag::new("Go", TagType::Bool)).unwrap();
    builder.rung(Rung::new(
        vec![Condition::truthy(go)],
        vec![
            Instruction::copy(7, keep),
            Instruction::copy(8, lose),
            Instruction::copy(9, seeded),
        ],
    ));
    let params = RunnerParams {
        battery,
        ..fixed(0.1)
    };
    Runner::<NoopIo>::with_params(builder.finish().unwrap(), params).unwrap()
}

#[test]
fn retentive_tags_survive_stop_to_run() {
    let mut runner = retention_runner(false);
    runner.patch([("Go", Value::Bool(true))]).unwrap();
    runner.run(2).unwrap();
    assert_eq!(int(runner.current_state(), "Keep"), 7);
    assert_eq!(int(runner.current_state(), "Lose"), 8);

    runner.stop();
    assert_eq!(runner.mode(), MachineMode::Stop);
    // Tags hold their values while stopped.
    assert_eq!(int(runner.current_state(), "Lose"), 8);

    // First execution method restarts: scan ids, history and the
    // non-retentive tags reset.
    let state = runner.step().unwrap();
    assert_eq!(state.scan_id(), 1);
    assert_eq!(int(&state, "Keep"), 7, "retentive survives");
    assert_eq!(int(&state, "Lose"), 0, "non-retentive resets");
    assert_eq!(runner.history().len(), 2, "seed plus one scan");
}

#[test]
fn stop_to_run_resets_runtime_scope() {
    let mut runner = retention_runner(false);
    runner.add_force("Go", Value::Bool(true)).unwrap();
    let observed = std::rc::Rc::new(std::cell::Cell::new(0));
    let seen = observed.clone();
    runner
        .monitor("Keep", move |_| seen.set(seen.get() + 1))
        .unwrap();
    runner.when(|_| true).pause();
    runner.run(1).unwrap();
    assert!(observed.get() > 0);

    runner.stop();
    runner.step().unwrap();
    assert!(runner.forces().is_empty(), "forces cleared");
    assert_eq!(
        runner.inspect_event().unwrap().monitors_fired.len(),
        0,
        "monitors cleared"
    );
    assert!(!runner.inspect_event().unwrap().paused, "breakpoints cleared");
}

#[test]
fn reboot_without_battery_resets_everything_to_defaults() {
    let mut runner = retention_runner(false);
    runner.patch([("Go", Value::Bool(true))]).unwrap();
    runner.run(2).unwrap();

    runner.reboot();
    let state = runner.current_state();
    assert_eq!(state.scan_id(), 0);
    assert_eq!(state.get("Keep"), None, "even retentive tags reset");
    assert_eq!(state.get("Seeded"), None);
    // Declared default still applies on read-through.
    let state = runner.step().unwrap();
    assert_eq!(int(&state, "Keep"), 0);
}

#[test]
fn reboot_with_battery_preserves_tags() {
    let mut runner = retention_runner(true);
    runner.patch([("Go", Value::Bool(true))]).unwrap();
    runner.run(2).unwrap();

    runner.reboot();
    let state = runner.current_state();
    assert_eq!(state.scan_id(), 0);
    assert_eq!(int(state, "Keep"), 7);
    assert_eq!(int(state, "Lose"), 8, "battery preserves non-retentive too");
}

#[test]
fn patch_is_one_shot_and_validated() {
    let mut runner = retention_runner(false);

    assert!(matches!(
        runner.patch([("Nope", Value::Bool(true))]),
        Err(ApiError::UnknownTag(_))
    ));
    assert!(matches!(
        runner.patch([("Keep", Value::Bool(true))]),
        Err(ApiError::TypeMismatch { .. })
    ));
    assert!(matches!(
        runner.patch([(sys::SCAN_COUNT, Value::Dint(0))]),
        Err(ApiError::ReadOnlyTag(_))
    ));
    // A failed patch leaves nothing queued.
    let state = runner.step().unwrap();
    assert!(!bit(&state, "Go"));

    // One-shot: consumed by the next scan, not re-applied. The written
    // value persists as committed state, but a logic write afterwards
    // is not overridden on later scans.
    runner.patch([("Go", Value::Bool(true))]).unwrap();
    let state = runner.step().unwrap();
    assert!(bit(&state, "Go"));
    assert_eq!(int(&state, "Keep"), 7);
}

#[test]
fn forces_override_logic_on_both_sides_of_the_scan() {
    let mut builder = Program::builder();
    let coil = builder.tag(Tag::new("Coil", TagType::Bool)).unwrap();
    // Logic drives the coil false every scan (empty rail is true, so
    // `out` writes true; invert with a never-true rail instead).
    let never = builder.tag(Tag::new("Never", TagType::Bool)).unwrap();
    builder.rung(Rung::new(
        vec![Condition::truthy(never)],
        vec![Instruction::out(coil)],
    ));
    let mut runner = Runner::new(builder.finish().unwrap()).unwrap();

    runner.add_force("Coil", Value::Bool(true)).unwrap();
    let state = runner.step().unwrap();
    assert!(bit(&state, "Coil"), "force wins over the logic write");

    // Force beats a patch on the same tag.
    runner.patch([("Coil", Value::Bool(false))]).unwrap();
    let state = runner.step().unwrap();
    assert!(bit(&state, "Coil"));

    runner.remove_force("Coil");
    let state = runner.step().unwrap();
    assert!(!bit(&state, "Coil"), "logic takes over once unforced");
}

#[test]
fn with_forces_is_scoped_and_restores_exactly() {
    let mut runner = retention_runner(false);
    runner.add_force("Go", Value::Bool(false)).unwrap();

    runner
        .with_forces([("Go", Value::Bool(true))], |r| {
            let state = r.step().unwrap();
            assert!(bit(&state, "Go"));
            assert_eq!(int(&state, "Keep"), 7);
        })
        .unwrap();

    assert_eq!(
        runner.forces().get("Go"),
        Some(&Value::Bool(false)),
        "outer force restored"
    );
    let state = runner.step().unwrap();
    assert!(!bit(&state, "Go"));
}

#[test]
fn force_on_system_tag_is_rejected() {
    let mut runner = retention_runner(false);
    assert!(matches!(
        runner.add_force(sys::ALWAYS_ON, Value::Bool(false)),
        Err(ApiError::ReadOnlyTag(_))
    ));
}

#[test]
fn system_tags_track_scan_and_rtc() {
    let mut runner = retention_runner(false);
    runner.set_rtc(RtcDateTime::new(2024, 6, 1, 23, 59, 59).unwrap());

    let state = runner.step().unwrap();
    assert_eq!(int(&state, sys::SCAN_COUNT), 1);
    assert!(bit(&state, sys::FIRST_SCAN));
    assert!(bit(&state, sys::ALWAYS_ON));
    assert!(!bit(&state, sys::ALWAYS_OFF));
    assert_eq!(int(&state, sys::RTC_SECOND), 59);

    // dt = 0.1: ten scans later one wall second has passed, rolling the
    // registered origin over midnight.
    let state = runner.run(10).unwrap();
    assert!(!bit(&state, sys::FIRST_SCAN));
    assert_eq!(int(&state, sys::RTC_HOUR), 0);
    assert_eq!(int(&state, sys::RTC_DAY), 2);
    assert_eq!(int(&state, sys::RTC_SECOND), 0);
}

#[test]
fn run_for_and_run_until_are_cycle_bounded() {
    let mut runner = retention_runner(false);

    let state = runner.run_for(0.0).unwrap();
    assert_eq!(state.scan_id(), 1, "zero seconds still runs one scan");

    let state = runner.run_for(0.5).unwrap();
    assert_eq!(state.scan_id(), 6);
    assert!((state.timestamp() - 0.6).abs() < 1e-9);

    let state = runner
        .run_until(|s| s.scan_id() >= 8, 100)
        .unwrap();
    assert_eq!(state.scan_id(), 8);

    // Predicate never satisfied: the cycle bound stops the run.
    let state = runner.run_until(|_| false, 5).unwrap();
    assert_eq!(state.scan_id(), 13);
}

#[test]
fn fixed_step_timestamps_are_exact_multiples() {
    let mut runner = retention_runner(false);
    runner.run(7).unwrap();
    let states = runner.history().latest(usize::MAX);
    for pair in states.windows(2) {
        let dt = pair[1].timestamp() - pair[0].timestamp();
        assert!((dt - 0.1).abs() < 1e-12, "fixed-step advance, got {dt}");
    }
}
