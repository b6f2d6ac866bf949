//! Error types for program construction, API misuse and runtime faults.
//!
//! The split follows one policy: per-scan recoverable faults (division by
//! zero, clamps, bad indirect addresses) raise system flags on the scan
//! context and never surface as `Err`; API misuse returns a typed
//! [`ApiError`] at the call site without touching engine state; only
//! [`FatalFault`] transitions the machine to FAULT.

use crate::value::TagType;

/// Structural errors raised while registering a [`crate::program::Program`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// A tag name was registered twice.
    #[error("duplicate tag `{0}`")]
    DuplicateTag(String),
    /// A block name was registered twice.
    #[error("duplicate block `{0}`")]
    DuplicateBlock(String),
    /// A tag or block name falls inside the reserved system namespace.
    #[error("`{0}` is inside the reserved system namespace")]
    ReservedName(String),
    /// A `call` targets a subroutine that was never registered.
    #[error("unknown subroutine `{0}`")]
    UnknownSubroutine(String),
    /// Subroutines may not call other subroutines.
    #[error("subroutine `{0}` contains a nested call to `{1}`")]
    NestedCall(String, String),
    /// For-loops may not nest.
    #[error("for-loops may not nest")]
    NestedLoop,
    /// `return_early` is only meaningful inside a subroutine body.
    #[error("return instruction outside a subroutine")]
    ReturnOutsideSubroutine,
    /// A drum step pattern does not cover the declared outputs.
    #[error("drum step {step} declares {got} outputs, drum has {want}")]
    DrumPatternMismatch {
        /// 1-based step index.
        step: usize,
        /// Outputs in the step pattern.
        got: usize,
        /// Outputs declared by the drum.
        want: usize,
    },
    /// A drum with no steps cannot sequence anything.
    #[error("drum has no steps")]
    EmptyDrum,
    /// Block slot reconfiguration after the slot was first indexed.
    #[error("block `{block}` slot {addr} is already materialized")]
    SlotAlreadyMaterialized {
        /// Owning block name.
        block: String,
        /// 1-based slot address.
        addr: i32,
    },
    /// A slot address outside the block bounds or its sparse valid ranges.
    #[error("address {addr} is outside block `{block}`")]
    AddressOutOfRange {
        /// Owning block name.
        block: String,
        /// Offending address.
        addr: i32,
    },
    /// Block declared with `end < start` or a hole-only range set.
    #[error("block `{block}` bounds {start}..={end} are invalid")]
    InvalidBounds {
        /// Owning block name.
        block: String,
        /// Declared first address.
        start: i32,
        /// Declared last address.
        end: i32,
    },
}

/// Call-site misuse of the public API. Never mutates engine state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    /// A patch, force or binding carried a value of the wrong type.
    #[error("type mismatch for `{tag}`: expected {expected}, got {got}")]
    TypeMismatch {
        /// Target tag name.
        tag: String,
        /// Declared type of the tag.
        expected: TagType,
        /// Type of the provided value.
        got: TagType,
    },
    /// The named tag is not part of the program.
    #[error("unknown tag `{0}`")]
    UnknownTag(String),
    /// System tags cannot be patched, forced or written.
    #[error("tag `{0}` is read-only")]
    ReadOnlyTag(String),
    /// The requested scan is not retained in history.
    #[error("scan {0} has been evicted from history")]
    Evicted(u64),
    /// Seek, rewind or window resolution outside the retained range.
    #[error("out of range: {0}")]
    OutOfRange(String),
    /// No rung trace was retained for the requested scan.
    #[error("no trace retained for scan {0}")]
    NoTrace(u64),
    /// A real-time clock value with out-of-range civil fields.
    #[error("invalid date-time: {0}")]
    InvalidDateTime(&'static str),
}

/// Errors returned by the execution methods (`step`, `run*`).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum RunError {
    /// The machine is latched in FAULT; reset it before running again.
    #[error("machine is faulted: {0}")]
    Faulted(FatalFault),
    /// The host cancellation token fired between scans.
    #[error("execution cancelled")]
    Cancelled,
    /// API misuse detected while driving execution.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Fatal fault classes. These latch the machine in FAULT after the
/// faulting scan commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum FatalFault {
    /// A math operation consumed an operand that is not a number.
    #[error("math operand corruption in rung {rung}")]
    MathOperand {
        /// Rung in which the corrupt operand was evaluated.
        rung: u32,
    },
}
