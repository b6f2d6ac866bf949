//! Scenario and property tests for the scan engine.

mod debugger;
mod determinism;
mod history;
mod lifecycle;
#[cfg(feature = "serde")]
mod serde_profile;
mod test_helpers;
