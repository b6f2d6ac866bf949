//! Pluggable physical I/O seam.
//!
//! The read-inputs and write-outputs scan phases call into an
//! [`IoAdapter`]. Pure simulation uses [`NoopIo`]; a soft-PLC bridge or
//! test harness supplies its own implementation.

use crate::tag::TagMeta;
use crate::value::Value;

/// External I/O hooks invoked by the scan phases.
pub trait IoAdapter {
    /// Sample a physical input. `None` leaves the simulated value alone.
    fn read_input(&mut self, tag: &TagMeta) -> Option<Value> {
        let _ = tag;
        None
    }

    /// Push a physical output to the external sink.
    fn write_output(&mut self, tag: &TagMeta, value: &Value) {
        let _ = (tag, value);
    }
}

/// Default adapter: inputs keep their simulated values, outputs go
/// nowhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIo;

impl IoAdapter for NoopIo {}
