use std::cell::RefCell;
use std::rc::Rc;

use crate::prelude::*;

use super::test_helpers::{bit, int, motor_runner};

#[test]
fn pause_breakpoint_halts_run_after_commit() {
    let mut runner = motor_runner();
    runner.when(|s| s.scan_id() == 3).pause();

    let state = runner.run(10).unwrap();
    assert_eq!(state.scan_id(), 3, "run stops at the breakpoint");
    assert!(runner.inspect_event().unwrap().paused);

    // A later run picks up from there.
    let state = runner.run(2).unwrap();
    assert_eq!(state.scan_id(), 5);
}

#[test]
fn snapshot_breakpoint_labels_history() {
    let mut runner = motor_runner();
    runner.patch([("Start", Value::Bool(true))]).unwrap();
    runner
        .when(|s| s.get("Motor").map(Value::is_truthy).unwrap_or(false))
        .snapshot("motor-on");

    runner.run(3).unwrap();
    let hits = runner.history().find_all("motor-on");
    assert_eq!(hits.len(), 3, "every matching commit is labeled");
    assert_eq!(runner.history().find("motor-on").unwrap().scan_id(), 1);
}

#[test]
fn pause_and_snapshot_both_fire_on_the_same_scan() {
    let mut runner = motor_runner();
    runner.when(|s| s.scan_id() == 2).pause();
    runner.when(|s| s.scan_id() == 2).snapshot("two");

    let state = runner.run(10).unwrap();
    assert_eq!(state.scan_id(), 2);
    let event = runner.inspect_event().unwrap();
    assert!(event.paused);
    assert_eq!(event.labels, vec!["two".to_owned()]);
}

#[test]
fn removed_breakpoint_stops_firing() {
    let mut runner = motor_runner();
    let id = runner.when(|_| true).pause();
    runner.run(5).unwrap();
    assert_eq!(runner.current_state().scan_id(), 1);

    runner.remove_breakpoint(id);
    let state = runner.run(5).unwrap();
    assert_eq!(state.scan_id(), 6);
}

#[test]
fn monitor_fires_iff_committed_value_changes() {
    let mut runner = motor_runner();
    let events: Rc<RefCell<Vec<(u64, Value, Value)>>> = Rc::default();
    let sink = events.clone();
    runner
        .monitor("Motor", move |e| {
            sink.borrow_mut().push((e.scan_id, e.old.clone(), e.new.clone()));
        })
        .unwrap();

    runner.run(2).unwrap(); // no change: absent -> default false
    runner.patch([("Start", Value::Bool(true))]).unwrap();
    runner.run(3).unwrap(); // latches at scan 3, stays on
    runner.patch([("Stop", Value::Bool(true))]).unwrap();
    runner.run(2).unwrap(); // unlatches at scan 6

    let events = events.borrow();
    assert_eq!(events.len(), 2, "exactly one event per change");
    assert_eq!(events[0], (3, Value::Bool(false), Value::Bool(true)));
    assert_eq!(events[1], (6, Value::Bool(true), Value::Bool(false)));
}

#[test]
fn monitors_fire_in_registration_order() {
    let mut runner = motor_runner();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::default();
    let first = order.clone();
    let second = order.clone();
    runner
        .monitor("Motor", move |_| first.borrow_mut().push("first"))
        .unwrap();
    runner
        .monitor("Motor", move |_| second.borrow_mut().push("second"))
        .unwrap();

    runner.patch([("Start", Value::Bool(true))]).unwrap();
    runner.step().unwrap();
    assert_eq!(*order.borrow(), vec!["first", "second"]);
}

#[test]
fn monitor_on_unknown_tag_is_rejected() {
    let mut runner = motor_runner();
    assert!(matches!(
        runner.monitor("Ghost", |_| {}),
        Err(ApiError::UnknownTag(_))
    ));
}

#[test]
fn scan_steps_yields_rung_boundaries_and_commits_on_exhaustion() {
    let mut runner = motor_runner();
    runner.patch([("Start", Value::Bool(true))]).unwrap();

    let steps: Vec<TraceEvent> = runner.scan_steps().unwrap().collect();
    assert_eq!(steps.len(), 2, "one event per top-level rung");
    assert!(steps.iter().all(|e| e.kind == StepKind::Rung));
    assert!(steps[0].enabled, "rise(Start) powered rung 0");
    assert!(!steps[1].enabled);

    // Collecting drove the iterator to exhaustion: the scan committed.
    assert_eq!(runner.current_state().scan_id(), 1);
    assert!(bit(runner.current_state(), "Motor"));
}

#[test]
fn scan_steps_debug_traces_instruction_boundaries() {
    let mut runner = motor_runner();
    runner.patch([("Start", Value::Bool(true))]).unwrap();

    let steps: Vec<TraceEvent> = runner.scan_steps_debug().unwrap().collect();
    let kinds: Vec<StepKind> = steps.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StepKind::Rung,
            StepKind::Instruction,
            StepKind::Rung,
            StepKind::Instruction,
        ]
    );
    assert_eq!(steps[1].mnemonic, Some("latch"));
    assert_eq!(steps[1].rung, RungId(0));

    // The debug-stepped scan retains its trace for inspection.
    let trace = runner.inspect(RungId(0), None).unwrap();
    assert_eq!(trace.len(), 2);
    // Plain stepped scans do not.
    runner.step().unwrap();
    assert!(matches!(
        runner.inspect(RungId(0), None),
        Err(ApiError::NoTrace(_))
    ));
}

#[test]
fn abandoned_step_iterator_commits_nothing() {
    let mut runner = motor_runner();
    runner.patch([("Start", Value::Bool(true))]).unwrap();
    let before = runner.current_state().clone();

    {
        let mut steps = runner.scan_steps_debug().unwrap();
        let _ = steps.next();
        let _ = steps.next();
        // dropped mid-scan
    }

    assert_eq!(runner.current_state(), &before, "no commit happened");
    assert_eq!(runner.history().len(), 1);

    // The consumed patch was restored; the next step sees it.
    let state = runner.step().unwrap();
    assert!(bit(&state, "Motor"));
}

#[test]
fn finish_drains_and_commits() {
    let mut runner = motor_runner();
    let mut steps = runner.scan_steps().unwrap();
    let _ = steps.next();
    let state = steps.finish();
    assert_eq!(state.scan_id(), 1);
    assert_eq!(runner.current_state().scan_id(), 1);
}

#[test]
fn subroutine_boundaries_appear_in_debug_trace() {
    let mut builder = Program::builder();
    let go = builder.tag(Tag::new("Go", TagType::Bool)).unwrap();
    let x = builder.tag(Tag::new("X", TagType::Bool)).unwrap();
    builder.subroutine("sub", vec![Rung::new(vec![], vec![Instruction::latch(x)])]);
    builder.rung(Rung::new(
        vec![Condition::truthy(go)],
        vec![Instruction::call("sub")],
    ));
    let mut runner = Runner::new(builder.finish().unwrap()).unwrap();
    runner.patch([("Go", Value::Bool(true))]).unwrap();

    let steps: Vec<TraceEvent> = runner.scan_steps_debug().unwrap().collect();
    let kinds: Vec<StepKind> = steps.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StepKind::Rung,
            StepKind::Subroutine,
            StepKind::Rung,
            StepKind::Instruction,
        ]
    );
    assert_eq!(steps[2].stack, vec!["sub".to_owned()], "call stack recorded");
    assert_eq!(int(runner.current_state(), sys::SCAN_COUNT), 1);
}

#[test]
fn cancellation_is_honored_between_scans() {
    let mut runner = motor_runner();
    let token = CancelToken::new();
    runner.set_cancel_token(token.clone());

    runner.run(3).unwrap();
    token.cancel();
    assert!(matches!(runner.run(5), Err(RunError::Cancelled)));
    assert_eq!(
        runner.current_state().scan_id(),
        3,
        "no scan ran after cancellation"
    );
}
