//! Program representation: conditions, instructions, rungs, subroutines.
//!
//! Conditions and instructions are closed variant sets; the interpreter
//! dispatches over them with a single match per node. Tags and blocks are
//! arena-allocated inside the [`Program`] and referenced by [`TagId`] /
//! [`BlockId`] handles, so the trees stay free of ownership cycles even
//! when indirect references form data-flow loops.
//!
//! [`ProgramBuilder::finish`] validates the structural rules (subroutine
//! depth, loop nesting, drum shapes) and assigns every edge-sensitive
//! site its stable identifier; those identifiers key the per-occurrence
//! previous-value bits in `State.memory`.

use std::collections::HashMap;

use crate::block::{Block, BlockId};
use crate::error::BuildError;
use crate::tag::{sys, Tag, TagId, TagKind, TagMeta};
use crate::value::Value;

/// Position of a rung or instruction in its source description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceLocation {
    /// Originating file, when the DSL provides one.
    pub file: Option<String>,
    /// 1-based line.
    pub line: u32,
}

impl SourceLocation {
    /// Location at a bare line number.
    pub fn line(line: u32) -> Self {
        SourceLocation { file: None, line }
    }
}

/// Stable identifier of an edge-sensitive call site (rise/fall
/// occurrences, oneshot enables, timer remainders, drum steps).
/// Assigned during program registration in a deterministic walk, so two
/// identical programs number their sites identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Site(pub(crate) u32);

impl Site {
    /// Placeholder before registration assigns the real identifier.
    pub(crate) const UNSET: Site = Site(u32::MAX);
}

impl Default for Site {
    /// The unassigned placeholder; registration renumbers it.
    fn default() -> Self {
        Site::UNSET
    }
}

/// Identifier of a rung, unique across the program including
/// subroutines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RungId(pub u32);

/// Reference to a storage cell: a declared tag, a block slot, or a slot
/// whose address is computed at scan time.
#[derive(Debug, Clone, PartialEq)]
pub enum TagRef {
    /// Declared scalar tag.
    Tag(TagId),
    /// Fixed block slot.
    Slot(BlockId, i32),
    /// Pointer-addressed block slot, resolved against the scan context.
    Indirect(BlockId, Box<Expr>),
}

impl From<TagId> for TagRef {
    fn from(id: TagId) -> Self {
        TagRef::Tag(id)
    }
}

impl TagRef {
    /// Pointer-addressed slot.
    pub fn indirect(block: BlockId, pointer: impl Into<Expr>) -> Self {
        TagRef::Indirect(block, Box::new(pointer.into()))
    }

    /// Fixed slot.
    pub const fn slot(block: BlockId, addr: i32) -> Self {
        TagRef::Slot(block, addr)
    }
}

/// Instruction input: a literal or a cell reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Immediate value.
    Literal(Value),
    /// Cell reference.
    Ref(TagRef),
}

macro_rules! literal_conversions {
    ($($ty:ty),* $(,)?) => {$(
        impl From<$ty> for Operand {
            fn from(v: $ty) -> Self {
                Operand::Literal(v.into())
            }
        }

        impl From<$ty> for Expr {
            fn from(v: $ty) -> Self {
                Expr::Literal(v.into())
            }
        }
    )*};
}

literal_conversions!(bool, i16, i32, f32, u16, &str, String, Value);

impl From<TagId> for Operand {
    fn from(id: TagId) -> Self {
        Operand::Ref(TagRef::Tag(id))
    }
}

impl From<TagRef> for Operand {
    fn from(r: TagRef) -> Self {
        Operand::Ref(r)
    }
}

/// Arithmetic expression tree, used by `calc`, comparisons, dynamic
/// window bounds and indirect addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Immediate value.
    Literal(Value),
    /// Cell read.
    Ref(TagRef),
    /// Negation.
    Neg(Box<Expr>),
    /// Addition.
    Add(Box<Expr>, Box<Expr>),
    /// Subtraction.
    Sub(Box<Expr>, Box<Expr>),
    /// Multiplication.
    Mul(Box<Expr>, Box<Expr>),
    /// Division (truncating for integers).
    Div(Box<Expr>, Box<Expr>),
    /// Remainder.
    Rem(Box<Expr>, Box<Expr>),
}

impl From<TagId> for Expr {
    fn from(id: TagId) -> Self {
        Expr::Ref(TagRef::Tag(id))
    }
}

impl From<TagRef> for Expr {
    fn from(r: TagRef) -> Self {
        Expr::Ref(r)
    }
}

macro_rules! expr_binop {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl<R: Into<Expr>> core::ops::$trait<R> for Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

expr_binop!(Add, add, Add);
expr_binop!(Sub, sub, Sub);
expr_binop!(Mul, mul, Mul);
expr_binop!(Div, div, Div);
expr_binop!(Rem, rem, Rem);

impl core::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

/// Comparison operator for conditions and searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CmpOp {
    /// Equal.
    #[strum(serialize = "==")]
    Eq,
    /// Not equal.
    #[strum(serialize = "!=")]
    Ne,
    /// Less than.
    #[strum(serialize = "<")]
    Lt,
    /// Less or equal.
    #[strum(serialize = "<=")]
    Le,
    /// Greater than.
    #[strum(serialize = ">")]
    Gt,
    /// Greater or equal.
    #[strum(serialize = ">=")]
    Ge,
}

/// Boolean condition tree evaluated against the scan context.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Cell truthiness.
    Truthy(TagRef),
    /// Logical inverse.
    Not(Box<Condition>),
    /// Conjunction. Every term is evaluated; edge detectors inside must
    /// track their tags even when an earlier term is already false.
    All(Vec<Condition>),
    /// Disjunction, also fully evaluated.
    Any(Vec<Condition>),
    /// Comparison between two expressions.
    Compare(CmpOp, Expr, Expr),
    /// True on the scan where the cell transitions false to true.
    Rise {
        /// Watched cell.
        tag: TagRef,
        /// Per-occurrence previous-value site.
        site: Site,
    },
    /// True on the scan where the cell transitions true to false.
    Fall {
        /// Watched cell.
        tag: TagRef,
        /// Per-occurrence previous-value site.
        site: Site,
    },
}

impl Condition {
    /// Cell truthiness condition.
    pub fn truthy(tag: impl Into<TagRef>) -> Self {
        Condition::Truthy(tag.into())
    }

    /// Inverted condition.
    #[allow(clippy::should_implement_trait)]
    pub fn not(cond: Condition) -> Self {
        Condition::Not(Box::new(cond))
    }

    /// Rising-edge detector on a cell.
    pub fn rise(tag: impl Into<TagRef>) -> Self {
        Condition::Rise {
            tag: tag.into(),
            site: Site::UNSET,
        }
    }

    /// Falling-edge detector on a cell.
    pub fn fall(tag: impl Into<TagRef>) -> Self {
        Condition::Fall {
            tag: tag.into(),
            site: Site::UNSET,
        }
    }

    /// Comparison condition.
    pub fn cmp(op: CmpOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Condition::Compare(op, lhs.into(), rhs.into())
    }
}

/// Inclusive selection over a block, possibly with scan-time bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Selected block.
    pub block: BlockId,
    /// First address, inclusive.
    pub start: Expr,
    /// Last address, inclusive.
    pub end: Expr,
}

impl Window {
    /// Select `start..=end` of a block.
    pub fn select(block: BlockId, start: impl Into<Expr>, end: impl Into<Expr>) -> Self {
        Window {
            block,
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Time base of timers and time drums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeUnit {
    /// Millisecond ticks.
    Milliseconds,
    /// Second ticks.
    Seconds,
    /// Minute ticks.
    Minutes,
}

impl TimeUnit {
    /// Convert elapsed seconds into fractional ticks of this unit.
    pub fn ticks(&self, seconds: f64) -> f64 {
        match self {
            TimeUnit::Milliseconds => seconds * 1000.0,
            TimeUnit::Seconds => seconds,
            TimeUnit::Minutes => seconds / 60.0,
        }
    }
}

/// Intermediate wrap mode of `calc`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CalcMode {
    /// Signed 64-bit accumulation.
    #[default]
    Decimal,
    /// Unsigned 16-bit wrap applied to the result.
    Hex,
}

/// Typed conversion applied by `copy`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Conversion {
    /// Plain clamped copy between compatible kinds.
    #[default]
    None,
    /// Decimal text render (number to CHAR) or parse (CHAR to number).
    Text,
    /// Zero-padded decimal render of the given width.
    TextPadded(u8),
    /// Base-2 render or parse.
    Binary,
}

/// Sequencing basis of a drum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrumKind {
    /// Steps advance on their event conditions.
    Event,
    /// Steps advance when the elapsed ticks reach the step preset.
    Time(TimeUnit),
}

/// One drum step: the output pattern held while the step is current,
/// plus its advance trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct DrumStep {
    /// One bit per drum output.
    pub pattern: Vec<bool>,
    /// Advance trigger for event drums.
    pub event: Option<Condition>,
    /// Tick preset for time drums.
    pub preset: Option<Expr>,
}

/// Forced step change, taken when the condition rises.
#[derive(Debug, Clone, PartialEq)]
pub struct DrumJump {
    /// Trigger.
    pub condition: Condition,
    /// Target step, 1-based.
    pub step: u32,
    pub(crate) site: Site,
}

impl DrumJump {
    /// Jump to `step` when `condition` rises.
    pub fn new(condition: Condition, step: u32) -> Self {
        DrumJump {
            condition,
            step,
            site: Site::UNSET,
        }
    }
}

/// Single-step advance, taken when the condition rises.
#[derive(Debug, Clone, PartialEq)]
pub struct DrumJog {
    /// Trigger.
    pub condition: Condition,
    pub(crate) site: Site,
}

impl DrumJog {
    /// Advance one step when `condition` rises.
    pub fn new(condition: Condition) -> Self {
        DrumJog {
            condition,
            site: Site::UNSET,
        }
    }
}

/// Multi-step output sequencer.
#[derive(Debug, Clone, PartialEq)]
pub struct Drum {
    /// Event or time sequencing.
    pub kind: DrumKind,
    /// Output cells driven by the step patterns.
    pub outputs: Vec<TagRef>,
    /// Ordered steps; the current step wraps past the end back to 1.
    pub steps: Vec<DrumStep>,
    /// Cell holding the 1-based current step.
    pub current: TagRef,
    /// Optional cell mirroring the elapsed ticks within the step.
    pub elapsed: Option<TagRef>,
    /// Return to step 1 while true.
    pub reset: Option<Condition>,
    /// Forced step changes.
    pub jumps: Vec<DrumJump>,
    /// Single-step advances.
    pub jogs: Vec<DrumJog>,
    pub(crate) site: Site,
}

impl Drum {
    /// Drum skeleton; populate steps and handlers on the fields.
    pub fn new(kind: DrumKind, outputs: Vec<TagRef>, current: impl Into<TagRef>) -> Self {
        Drum {
            kind,
            outputs,
            steps: Vec::new(),
            current: current.into(),
            elapsed: None,
            reset: None,
            jumps: Vec::new(),
            jogs: Vec::new(),
            site: Site::UNSET,
        }
    }
}

/// Ladder instruction. Every variant carries its operands; edge-sensitive
/// variants additionally carry their registration-assigned [`Site`].
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Energize: write the power-rail state to the cell every scan.
    Out {
        /// Destination cell.
        tag: TagRef,
    },
    /// Set the cell while enabled; otherwise leave it.
    Latch {
        /// Destination cell.
        tag: TagRef,
    },
    /// Clear the cell while enabled; otherwise leave it.
    Reset {
        /// Destination cell.
        tag: TagRef,
    },
    /// Clamped copy with optional typed conversion.
    Copy {
        /// Source operand.
        src: Operand,
        /// Destination cell.
        dest: TagRef,
        /// Typed conversion.
        conversion: Conversion,
        /// Act only on the rising enable edge.
        oneshot: bool,
        /// Oneshot previous-enable site.
        site: Site,
    },
    /// Copy a source window over an equally long destination window.
    BlockCopy {
        /// Source selection.
        src: Window,
        /// Destination selection.
        dest: Window,
    },
    /// Write one clamped value to every slot of the window.
    Fill {
        /// Value to replicate.
        value: Operand,
        /// Destination selection.
        dest: Window,
    },
    /// Pack a boolean window into a word, LSB first.
    PackBits {
        /// Bit window.
        src: Window,
        /// Word destination.
        dest: TagRef,
    },
    /// Unpack a word into a boolean window, LSB first.
    UnpackBits {
        /// Word source.
        src: TagRef,
        /// Bit window destination.
        dest: Window,
    },
    /// Combine two words into a DINT.
    PackWords {
        /// Low word.
        low: Operand,
        /// High word.
        high: Operand,
        /// DINT destination.
        dest: TagRef,
    },
    /// Split a DINT into a two-slot word window, low word first.
    UnpackWords {
        /// DINT source.
        src: TagRef,
        /// Two-slot destination window.
        dest: Window,
    },
    /// Pack a CHAR window into a word pair.
    PackText {
        /// Character window.
        src: Window,
        /// DINT destination.
        dest: TagRef,
    },
    /// Evaluate an expression with wrap semantics and store it.
    Calc {
        /// Expression.
        expr: Expr,
        /// Destination cell.
        dest: TagRef,
        /// Intermediate wrap mode.
        mode: CalcMode,
        /// Act only on the rising enable edge.
        oneshot: bool,
        /// Oneshot previous-enable site.
        site: Site,
    },
    /// On-delay timer (TON); with `reset` set, the retentive RTON.
    OnDelay {
        /// Done bit.
        done: TagRef,
        /// Accumulator cell, in ticks.
        acc: TagRef,
        /// Preset, in ticks.
        preset: Expr,
        /// Tick unit.
        unit: TimeUnit,
        /// RTON reset input; rung-false no longer clears when present.
        reset: Option<TagRef>,
        /// Fractional-tick remainder site.
        site: Site,
    },
    /// Off-delay timer (TOF).
    OffDelay {
        /// Done bit.
        done: TagRef,
        /// Accumulator cell, in ticks.
        acc: TagRef,
        /// Preset, in ticks.
        preset: Expr,
        /// Tick unit.
        unit: TimeUnit,
        /// Fractional-tick remainder site.
        site: Site,
    },
    /// Up counter: one increment per enabled scan.
    CountUp {
        /// Done bit, set at `acc >= preset`.
        done: TagRef,
        /// Accumulator, clamped at the DINT bounds.
        acc: TagRef,
        /// Preset.
        preset: Expr,
        /// Level-sensitive reset input.
        reset: Option<TagRef>,
    },
    /// Down counter: one decrement per enabled scan.
    CountDown {
        /// Done bit, set at `acc <= -preset`.
        done: TagRef,
        /// Accumulator, clamped at the DINT bounds.
        acc: TagRef,
        /// Preset.
        preset: Expr,
        /// Level-sensitive reset input.
        reset: Option<TagRef>,
    },
    /// Bidirectional counter applying the net of both conditions.
    CountUpDown {
        /// Increment condition.
        up: Condition,
        /// Decrement condition.
        down: Condition,
        /// Done bit, set at `acc >= preset`.
        done: TagRef,
        /// Accumulator, clamped at the DINT bounds.
        acc: TagRef,
        /// Preset.
        preset: Expr,
        /// Level-sensitive reset input.
        reset: Option<TagRef>,
    },
    /// Scan a window for a value match.
    Search {
        /// Match operator.
        op: CmpOp,
        /// Value to match; text sources match windowed substrings.
        value: Operand,
        /// Window to scan.
        range: Window,
        /// Matched address out, -1 on exhaustion.
        result: TagRef,
        /// Match flag out.
        found: TagRef,
        /// Resume after the previous result instead of from the start.
        continuous: bool,
    },
    /// Clocked shift register over a bit window; direction follows the
    /// window orientation.
    ShiftRegister {
        /// Bit window; `start > end` shifts in reverse.
        window: Window,
        /// Shift clock; acts on its rising edge.
        clock: Condition,
        /// Level-sensitive reset, overriding the shift.
        reset: Condition,
        /// Clock previous-value site.
        site: Site,
    },
    /// Multi-step output sequencer.
    Drum(Drum),
    /// Condition-gated sub-body, ANDed with the enclosing power rail.
    Branch {
        /// Branch condition, evaluated against the scan context.
        condition: Condition,
        /// Nested instructions.
        body: Vec<Instruction>,
    },
    /// Execute a subroutine while enabled.
    Call {
        /// Subroutine name.
        name: String,
    },
    /// Repeat the body `count` times while enabled.
    ForLoop {
        /// Iteration count expression.
        count: Expr,
        /// Optional cell receiving the 1-based iteration number.
        index: Option<TagRef>,
        /// Loop body.
        body: Vec<Instruction>,
        /// Act only on the rising enable edge.
        oneshot: bool,
        /// Oneshot previous-enable site.
        site: Site,
    },
    /// Terminate the enclosing subroutine when enabled.
    Return,
}

impl Instruction {
    /// Energize coil.
    pub fn out(tag: impl Into<TagRef>) -> Self {
        Instruction::Out { tag: tag.into() }
    }

    /// Latch coil.
    pub fn latch(tag: impl Into<TagRef>) -> Self {
        Instruction::Latch { tag: tag.into() }
    }

    /// Unlatch coil.
    pub fn reset(tag: impl Into<TagRef>) -> Self {
        Instruction::Reset { tag: tag.into() }
    }

    /// Clamped copy.
    pub fn copy(src: impl Into<Operand>, dest: impl Into<TagRef>) -> Self {
        Instruction::Copy {
            src: src.into(),
            dest: dest.into(),
            conversion: Conversion::None,
            oneshot: false,
            site: Site::UNSET,
        }
    }

    /// Clamped copy acting only on the rising enable edge.
    pub fn copy_oneshot(src: impl Into<Operand>, dest: impl Into<TagRef>) -> Self {
        match Instruction::copy(src, dest) {
            Instruction::Copy { src, dest, conversion, site, .. } => Instruction::Copy {
                src,
                dest,
                conversion,
                oneshot: true,
                site,
            },
            _ => unreachable!(),
        }
    }

    /// Wrap-semantics calculation.
    pub fn calc(expr: impl Into<Expr>, dest: impl Into<TagRef>) -> Self {
        Instruction::Calc {
            expr: expr.into(),
            dest: dest.into(),
            mode: CalcMode::Decimal,
            oneshot: false,
            site: Site::UNSET,
        }
    }

    /// On-delay timer.
    pub fn on_delay(
        done: impl Into<TagRef>,
        acc: impl Into<TagRef>,
        preset: impl Into<Expr>,
        unit: TimeUnit,
    ) -> Self {
        Instruction::OnDelay {
            done: done.into(),
            acc: acc.into(),
            preset: preset.into(),
            unit,
            reset: None,
            site: Site::UNSET,
        }
    }

    /// Off-delay timer.
    pub fn off_delay(
        done: impl Into<TagRef>,
        acc: impl Into<TagRef>,
        preset: impl Into<Expr>,
        unit: TimeUnit,
    ) -> Self {
        Instruction::OffDelay {
            done: done.into(),
            acc: acc.into(),
            preset: preset.into(),
            unit,
            site: Site::UNSET,
        }
    }

    /// Up counter.
    pub fn count_up(
        done: impl Into<TagRef>,
        acc: impl Into<TagRef>,
        preset: impl Into<Expr>,
    ) -> Self {
        Instruction::CountUp {
            done: done.into(),
            acc: acc.into(),
            preset: preset.into(),
            reset: None,
        }
    }

    /// Down counter.
    pub fn count_down(
        done: impl Into<TagRef>,
        acc: impl Into<TagRef>,
        preset: impl Into<Expr>,
    ) -> Self {
        Instruction::CountDown {
            done: done.into(),
            acc: acc.into(),
            preset: preset.into(),
            reset: None,
        }
    }

    /// Condition-gated branch.
    pub fn branch(condition: Condition, body: Vec<Instruction>) -> Self {
        Instruction::Branch { condition, body }
    }

    /// Subroutine call.
    pub fn call(name: impl Into<String>) -> Self {
        Instruction::Call { name: name.into() }
    }

    /// Short mnemonic for traces.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Out { .. } => "out",
            Instruction::Latch { .. } => "latch",
            Instruction::Reset { .. } => "reset",
            Instruction::Copy { .. } => "copy",
            Instruction::BlockCopy { .. } => "blockcopy",
            Instruction::Fill { .. } => "fill",
            Instruction::PackBits { .. } => "pack_bits",
            Instruction::UnpackBits { .. } => "unpack_bits",
            Instruction::PackWords { .. } => "pack_words",
            Instruction::UnpackWords { .. } => "unpack_words",
            Instruction::PackText { .. } => "pack_text",
            Instruction::Calc { .. } => "calc",
            Instruction::OnDelay { .. } => "on_delay",
            Instruction::OffDelay { .. } => "off_delay",
            Instruction::CountUp { .. } => "count_up",
            Instruction::CountDown { .. } => "count_down",
            Instruction::CountUpDown { .. } => "count_updown",
            Instruction::Search { .. } => "search",
            Instruction::ShiftRegister { .. } => "shift",
            Instruction::Drum(_) => "drum",
            Instruction::Branch { .. } => "branch",
            Instruction::Call { .. } => "call",
            Instruction::ForLoop { .. } => "for",
            Instruction::Return => "return",
        }
    }
}

/// One ladder rung: an implicitly ANDed condition list powering a body.
#[derive(Debug, Clone, PartialEq)]
pub struct Rung {
    pub(crate) id: RungId,
    /// Power-rail conditions, implicitly ANDed.
    pub conditions: Vec<Condition>,
    /// Instruction body, executed in lexical order.
    pub body: Vec<Instruction>,
    /// Source position.
    pub location: Option<SourceLocation>,
}

impl Rung {
    /// Rung from a condition list and body.
    pub fn new(conditions: Vec<Condition>, body: Vec<Instruction>) -> Self {
        Rung {
            id: RungId(u32::MAX),
            conditions,
            body,
            location: None,
        }
    }

    /// Attach a source location.
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Program-wide rung identifier, assigned at registration.
    pub const fn id(&self) -> RungId {
        self.id
    }
}

/// Named depth-1 callable rung list.
#[derive(Debug, Clone, PartialEq)]
pub struct Subroutine {
    /// Subroutine name.
    pub name: String,
    /// Body rungs, with program-wide ids.
    pub rungs: Vec<Rung>,
}

/// A registered, validated ladder program.
#[derive(Debug, Clone)]
pub struct Program {
    tags: Vec<Tag>,
    blocks: Vec<Block>,
    tag_ids: HashMap<String, TagId>,
    rungs: Vec<Rung>,
    subroutines: Vec<Subroutine>,
    sub_ids: HashMap<String, usize>,
    inputs: Vec<TagMeta>,
    outputs: Vec<TagMeta>,
}

impl Program {
    /// Start building a program.
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::default()
    }

    /// Declared tag behind a handle.
    pub fn tag(&self, id: TagId) -> &Tag {
        &self.tags[id.0 as usize]
    }

    /// Declared block behind a handle.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    /// Top-level rungs in source order.
    pub fn rungs(&self) -> &[Rung] {
        &self.rungs
    }

    /// Registered subroutines.
    pub fn subroutines(&self) -> &[Subroutine] {
        &self.subroutines
    }

    /// Subroutine by name.
    pub fn subroutine(&self, name: &str) -> Option<&Subroutine> {
        self.sub_ids.get(name).map(|&i| &self.subroutines[i])
    }

    /// Physical input descriptors, scalars then block slots.
    pub fn inputs(&self) -> &[TagMeta] {
        &self.inputs
    }

    /// Physical output descriptors, scalars then block slots.
    pub fn outputs(&self) -> &[TagMeta] {
        &self.outputs
    }

    /// Resolve a state-map key back to its descriptor: system tags,
    /// declared tags, then block slots (including renames).
    pub fn lookup_name(&self, name: &str) -> Option<TagMeta> {
        if sys::is_reserved(name) {
            return sys::meta(name);
        }
        if let Some(&id) = self.tag_ids.get(name) {
            return Some(self.tag(id).meta());
        }
        self.blocks.iter().find_map(|b| {
            b.parse_name(name)
                .and_then(|addr| b.slot(addr).ok())
        })
    }

    /// Every rung in the program, top-level then subroutine bodies.
    pub fn all_rungs(&self) -> impl Iterator<Item = &Rung> {
        self.rungs
            .iter()
            .chain(self.subroutines.iter().flat_map(|s| s.rungs.iter()))
    }
}

/// Collects tags, blocks, rungs and subroutines, then validates and
/// freezes them into a [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    tags: Vec<Tag>,
    blocks: Vec<Block>,
    tag_ids: HashMap<String, TagId>,
    block_ids: HashMap<String, BlockId>,
    rungs: Vec<Rung>,
    subroutines: Vec<Subroutine>,
}

impl ProgramBuilder {
    /// Register a scalar tag.
    pub fn tag(&mut self, tag: Tag) -> Result<TagId, BuildError> {
        if sys::is_reserved(&tag.name) {
            return Err(BuildError::ReservedName(tag.name));
        }
        if self.tag_ids.contains_key(&tag.name) {
            return Err(BuildError::DuplicateTag(tag.name));
        }
        let id = TagId(self.tags.len() as u32);
        self.tag_ids.insert(tag.name.clone(), id);
        self.tags.push(tag);
        Ok(id)
    }

    /// Register a block.
    pub fn block(&mut self, block: Block) -> Result<BlockId, BuildError> {
        if sys::is_reserved(block.name()) {
            return Err(BuildError::ReservedName(block.name().to_owned()));
        }
        if self.block_ids.contains_key(block.name()) {
            return Err(BuildError::DuplicateBlock(block.name().to_owned()));
        }
        let id = BlockId(self.blocks.len() as u32);
        self.block_ids.insert(block.name().to_owned(), id);
        self.blocks.push(block);
        Ok(id)
    }

    /// Mutable access to a registered block, for slot configuration and
    /// build-time indexing.
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// Append a top-level rung.
    pub fn rung(&mut self, rung: Rung) -> &mut Self {
        self.rungs.push(rung);
        self
    }

    /// Register a named subroutine.
    pub fn subroutine(&mut self, name: impl Into<String>, rungs: Vec<Rung>) -> &mut Self {
        self.subroutines.push(Subroutine {
            name: name.into(),
            rungs,
        });
        self
    }

    /// Validate the structural rules, assign rung ids and edge sites, and
    /// freeze the program.
    pub fn finish(mut self) -> Result<Program, BuildError> {
        let sub_ids: HashMap<String, usize> = self
            .subroutines
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        for rung in &self.rungs {
            validate_body(&rung.body, &sub_ids, Scope::top())?;
        }
        for sub in &self.subroutines {
            for rung in &sub.rungs {
                validate_body(&rung.body, &sub_ids, Scope::sub(&sub.name))?;
            }
        }

        let mut next_rung = 0u32;
        let mut next_site = 0u32;
        for rung in self
            .rungs
            .iter_mut()
            .chain(self.subroutines.iter_mut().flat_map(|s| s.rungs.iter_mut()))
        {
            rung.id = RungId(next_rung);
            next_rung += 1;
            for cond in &mut rung.conditions {
                assign_condition_sites(cond, &mut next_site);
            }
            assign_body_sites(&mut rung.body, &mut next_site);
        }

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for tag in &self.tags {
            match tag.kind {
                TagKind::Input => inputs.push(tag.meta()),
                TagKind::Output => outputs.push(tag.meta()),
                TagKind::Internal => {}
            }
        }
        for block in &self.blocks {
            let sink = match block.kind() {
                TagKind::Input => &mut inputs,
                TagKind::Output => &mut outputs,
                TagKind::Internal => continue,
            };
            for addr in block.iter_span(block.start(), block.end()) {
                // In-bounds address on a validated block.
                if let Ok(meta) = block.slot(addr) {
                    sink.push(meta);
                }
            }
        }

        Ok(Program {
            tags: self.tags,
            blocks: self.blocks,
            tag_ids: self.tag_ids,
            rungs: self.rungs,
            subroutines: self.subroutines,
            sub_ids,
            inputs,
            outputs,
        })
    }
}

#[derive(Clone, Copy)]
struct Scope<'a> {
    sub: Option<&'a str>,
    in_loop: bool,
}

impl<'a> Scope<'a> {
    fn top() -> Self {
        Scope {
            sub: None,
            in_loop: false,
        }
    }

    fn sub(name: &'a str) -> Self {
        Scope {
            sub: Some(name),
            in_loop: false,
        }
    }
}

fn validate_body(
    body: &[Instruction],
    sub_ids: &HashMap<String, usize>,
    scope: Scope<'_>,
) -> Result<(), BuildError> {
    for instr in body {
        match instr {
            Instruction::Call { name } => {
                if let Some(sub) = scope.sub {
                    return Err(BuildError::NestedCall(sub.to_owned(), name.clone()));
                }
                if !sub_ids.contains_key(name) {
                    return Err(BuildError::UnknownSubroutine(name.clone()));
                }
            }
            Instruction::Return => {
                if scope.sub.is_none() {
                    return Err(BuildError::ReturnOutsideSubroutine);
                }
            }
            Instruction::ForLoop { body, .. } => {
                if scope.in_loop {
                    return Err(BuildError::NestedLoop);
                }
                let mut inner = scope;
                inner.in_loop = true;
                validate_body(body, sub_ids, inner)?;
            }
            Instruction::Branch { body, .. } => {
                validate_body(body, sub_ids, scope)?;
            }
            Instruction::Drum(drum) => {
                if drum.steps.is_empty() {
                    return Err(BuildError::EmptyDrum);
                }
                for (i, step) in drum.steps.iter().enumerate() {
                    if step.pattern.len() != drum.outputs.len() {
                        return Err(BuildError::DrumPatternMismatch {
                            step: i + 1,
                            got: step.pattern.len(),
                            want: drum.outputs.len(),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn assign_condition_sites(cond: &mut Condition, next: &mut u32) {
    match cond {
        Condition::Rise { site, .. } | Condition::Fall { site, .. } => {
            *site = Site(*next);
            *next += 1;
        }
        Condition::Not(inner) => assign_condition_sites(inner, next),
        Condition::All(terms) | Condition::Any(terms) => {
            for term in terms {
                assign_condition_sites(term, next);
            }
        }
        Condition::Truthy(_) | Condition::Compare(..) => {}
    }
}

fn take_site(slot: &mut Site, next: &mut u32) {
    *slot = Site(*next);
    *next += 1;
}

fn assign_body_sites(body: &mut [Instruction], next: &mut u32) {
    for instr in body {
        match instr {
            Instruction::Copy { site, .. }
            | Instruction::Calc { site, .. }
            | Instruction::OnDelay { site, .. }
            | Instruction::OffDelay { site, .. } => take_site(site, next),
            Instruction::ForLoop { site, body, .. } => {
                take_site(site, next);
                assign_body_sites(body, next);
            }
            Instruction::ShiftRegister { site, clock, reset, .. } => {
                take_site(site, next);
                assign_condition_sites(clock, next);
                assign_condition_sites(reset, next);
            }
            Instruction::Drum(drum) => {
                take_site(&mut drum.site, next);
                for step in &mut drum.steps {
                    if let Some(cond) = &mut step.event {
                        assign_condition_sites(cond, next);
                    }
                }
                if let Some(cond) = &mut drum.reset {
                    assign_condition_sites(cond, next);
                }
                for jump in &mut drum.jumps {
                    take_site(&mut jump.site, next);
                    assign_condition_sites(&mut jump.condition, next);
                }
                for jog in &mut drum.jogs {
                    take_site(&mut jog.site, next);
                    assign_condition_sites(&mut jog.condition, next);
                }
            }
            Instruction::CountUpDown { up, down, .. } => {
                assign_condition_sites(up, next);
                assign_condition_sites(down, next);
            }
            Instruction::Branch { condition, body } => {
                assign_condition_sites(condition, next);
                assign_body_sites(body, next);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TagType;

    fn tag_id(builder: &mut ProgramBuilder, name: &str) -> TagId {
        builder.tag(Tag::new(name, TagType::Bool)).unwrap()
    }

    #[test]
    fn rejects_duplicate_and_reserved_names() {
        let mut b = Program::builder();
        tag_id(&mut b, "Motor");
        assert!(matches!(
            b.tag(Tag::new("Motor", TagType::Bool)),
            Err(BuildError::DuplicateTag(_))
        ));
        assert!(matches!(
            b.tag(Tag::new("sys.hack", TagType::Bool)),
            Err(BuildError::ReservedName(_))
        ));
    }

    #[test]
    fn rejects_nested_subroutine_calls() {
        let mut b = Program::builder();
        b.subroutine(
            "inner",
            vec![Rung::new(vec![], vec![Instruction::Return])],
        );
        b.subroutine(
            "outer",
            vec![Rung::new(vec![], vec![Instruction::call("inner")])],
        );
        assert!(matches!(
            b.finish(),
            Err(BuildError::NestedCall(sub, _)) if sub == "outer"
        ));
    }

    #[test]
    fn rejects_unknown_call_and_stray_return() {
        let mut b = Program::builder();
        b.rung(Rung::new(vec![], vec![Instruction::call("nowhere")]));
        assert!(matches!(
            b.finish(),
            Err(BuildError::UnknownSubroutine(_))
        ));

        let mut b = Program::builder();
        b.rung(Rung::new(vec![], vec![Instruction::Return]));
        assert!(matches!(
            b.finish(),
            Err(BuildError::ReturnOutsideSubroutine)
        ));
    }

    #[test]
    fn rejects_nested_loops() {
        let inner = Instruction::ForLoop {
            count: 2.into(),
            index: None,
            body: vec![],
            oneshot: false,
            site: Site::UNSET,
        };
        let outer = Instruction::ForLoop {
            count: 2.into(),
            index: None,
            body: vec![inner],
            oneshot: false,
            site: Site::UNSET,
        };
        let mut b = Program::builder();
        b.rung(Rung::new(vec![], vec![outer]));
        assert!(matches!(b.finish(), Err(BuildError::NestedLoop)));
    }

    #[test]
    fn assigns_distinct_edge_sites_per_occurrence() {
        let mut b = Program::builder();
        let start = tag_id(&mut b, "Start");
        b.rung(Rung::new(
            vec![Condition::rise(start), Condition::rise(start)],
            vec![],
        ));
        let program = b.finish().unwrap();
        let conds = &program.rungs()[0].conditions;
        let sites: Vec<_> = conds
            .iter()
            .map(|c| match c {
                Condition::Rise { site, .. } => *site,
                _ => panic!("expected rise"),
            })
            .collect();
        assert_ne!(sites[0], sites[1]);
    }

    #[test]
    fn lookup_name_covers_tags_blocks_and_system() {
        let mut b = Program::builder();
        tag_id(&mut b, "Motor");
        let ds = b
            .block(Block::new("DS", TagType::Int, 1, 10).unwrap())
            .unwrap();
        b.block_mut(ds)
            .configure_slot(
                3,
                crate::block::SlotConfig {
                    name: Some("Speed".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let program = b.finish().unwrap();

        assert!(program.lookup_name("Motor").is_some());
        assert_eq!(program.lookup_name("DS4").unwrap().ty, TagType::Int);
        assert!(program.lookup_name("Speed").is_some());
        assert!(program.lookup_name("DS3").is_none()); // renamed away
        assert!(program.lookup_name("sys.scan_count").unwrap().read_only);
        assert!(program.lookup_name("Nope").is_none());
    }

    #[test]
    fn drum_pattern_width_is_validated() {
        let mut b = Program::builder();
        let out = tag_id(&mut b, "Valve");
        let step_tag = b.tag(Tag::new("Step", TagType::Int)).unwrap();
        let mut drum = Drum::new(DrumKind::Event, vec![out.into()], step_tag);
        drum.steps.push(DrumStep {
            pattern: vec![true, false],
            event: None,
            preset: None,
        });
        b.rung(Rung::new(vec![], vec![Instruction::Drum(drum)]));
        assert!(matches!(
            b.finish(),
            Err(BuildError::DrumPatternMismatch { step: 1, got: 2, want: 1 })
        ));
    }
}
