use crate::prelude::*;

use super::test_helpers::motor_runner;

#[test]
fn values_round_trip_through_json() {
    let values = vec![
        Value::Bool(true),
        Value::Int(-32_768),
        Value::Dint(70_000),
        Value::Real(1.5),
        Value::Word(40_000),
        Value::Char("AB".into()),
    ];
    for value in values {
        let json = serde_json::to_string(&value).expect("serialize");
        let back: Value = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, value);
    }
}

#[test]
fn committed_state_round_trips_through_json() {
    let mut runner = motor_runner();
    runner.patch([("Start", Value::Bool(true))]).unwrap();
    let state = runner.step().unwrap();

    let json = serde_json::to_string(&state).expect("serialize");
    let back: State = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, state);
    assert_eq!(back.get("Motor"), Some(&Value::Bool(true)));
    assert_eq!(back.scan_id(), 1);
}
