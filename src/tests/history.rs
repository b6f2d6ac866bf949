use crate::prelude::*;

use super::test_helpers::{bit, fixed, int, motor_runner};

#[test]
fn history_orders_scans_and_evicts_oldest() {
    let mut params = fixed(0.1);
    params.history_limit = 5;
    let mut runner =
        Runner::<NoopIo>::with_params(super::test_helpers::latched_motor(), params).unwrap();
    runner.run(10).unwrap();

    let history = runner.history();
    assert_eq!(history.len(), 5);
    assert!(history.at(5).is_err(), "evicted");
    let latest: Vec<u64> = history.latest(3).iter().map(|s| s.scan_id()).collect();
    assert_eq!(latest, vec![8, 9, 10]);
    let range: Vec<u64> = history.range(7, 9).iter().map(|s| s.scan_id()).collect();
    assert_eq!(range, vec![7, 8]);

    // Ordering invariants over the retained window.
    let all = history.latest(usize::MAX);
    for pair in all.windows(2) {
        assert!(pair[0].scan_id() < pair[1].scan_id());
        assert!(pair[0].timestamp() <= pair[1].timestamp());
    }
}

#[test]
fn seek_and_rewind_move_only_the_playhead() {
    let mut runner = motor_runner();
    runner.run(10).unwrap();

    let seen = runner.seek(4).unwrap();
    assert_eq!(seen.scan_id(), 4);
    assert_eq!(runner.playhead().scan_id(), 4);
    // Execution still appends at the tip.
    runner.step().unwrap();
    assert_eq!(runner.current_state().scan_id(), 11);
    assert_eq!(runner.playhead().scan_id(), 11, "playhead follows commits");

    runner.seek(10).unwrap();
    let rewound = runner.rewind(0.35).unwrap();
    // playhead at t=1.0; target newest scan with t <= 0.65
    assert_eq!(rewound.scan_id(), 6);

    assert!(matches!(runner.seek(999), Err(ApiError::Evicted(999))));
}

#[test]
fn diff_reports_changed_tags_with_defaults() {
    let mut runner = motor_runner();
    runner.patch([("Start", Value::Bool(true))]).unwrap();
    runner.run(2).unwrap();

    let diff = runner.diff(0, 1).unwrap();
    assert_eq!(
        diff.get("Motor"),
        Some(&(Some(Value::Bool(false)), Some(Value::Bool(true)))),
        "absent at scan 0 reads as the declared default"
    );
    assert_eq!(
        diff.get("Start"),
        Some(&(Some(Value::Bool(false)), Some(Value::Bool(true))))
    );

    // Motor unchanged between 1 and 2; only system tags differ.
    let diff = runner.diff(1, 2).unwrap();
    assert!(!diff.contains_key("Motor"));
    assert!(diff.contains_key(sys::SCAN_COUNT));

    assert!(runner.diff(0, 99).is_err());
}

#[test]
fn labels_attach_to_retained_scans() {
    let mut runner = motor_runner();
    runner.run(5).unwrap();
    runner.label(3, "interesting").unwrap();

    assert_eq!(runner.history().find("interesting").unwrap().scan_id(), 3);
    assert!(runner.history().find("other").is_none());
    assert!(runner.label(99, "nope").is_err());
}

#[test]
fn fork_runs_independently() {
    let mut runner = motor_runner();
    runner.patch([("Start", Value::Bool(true))]).unwrap();
    runner.run(100).unwrap();
    assert!(bit(runner.current_state(), "Motor"));

    let mut alt = runner.fork(Some(100)).unwrap();
    assert_eq!(alt.current_state().scan_id(), 100);
    assert_eq!(alt.history().len(), 1, "fork history holds only the seed");
    assert!(alt.forces().is_empty());

    // Diverge the fork.
    alt.patch([("Stop", Value::Bool(true))]).unwrap();
    let alt_tip = alt.step().unwrap();
    assert!(!bit(&alt_tip, "Motor"));

    // The original is untouched and keeps running its own future.
    assert_eq!(runner.current_state().scan_id(), 100);
    assert!(bit(runner.current_state(), "Motor"));
    let original_tip = runner.step().unwrap();
    assert!(bit(&original_tip, "Motor"));
    assert_ne!(alt_tip.get("Motor"), original_tip.get("Motor"));
}

#[test]
fn fork_of_past_scan_replays_an_alternate_future() {
    let mut runner = motor_runner();
    runner.patch([("Start", Value::Bool(true))]).unwrap();
    runner.run(5).unwrap();

    // Fork from before the motor latched.
    let mut alt = runner.fork(Some(0)).unwrap();
    assert!(!bit(alt.current_state(), "Motor"));
    let state = alt.step().unwrap();
    assert_eq!(state.scan_id(), 1);
    assert!(!bit(&state, "Motor"), "the patch was not part of scan 0");
}

#[test]
fn snapshots_are_immutable_across_later_execution() {
    let mut runner = motor_runner();
    runner.patch([("Start", Value::Bool(true))]).unwrap();
    runner.run(3).unwrap();

    let snapshot = runner.history().at(1).unwrap().clone();
    let motor_then = snapshot.get("Motor").cloned();
    runner.patch([("Stop", Value::Bool(true))]).unwrap();
    runner.run(3).unwrap();

    assert_eq!(runner.history().at(1).unwrap(), &snapshot);
    assert_eq!(snapshot.get("Motor").cloned(), motor_then);
    assert_eq!(int(&snapshot, sys::SCAN_COUNT), 1);
}
