//! Rung traversal and the core instruction executors.
//!
//! Conditions determine the power rail for a rung first; the body then
//! executes in lexical source order, branches included, with every write
//! visible to later instructions through the scan context. Level
//! instructions (coils, timers) execute with the rail state either way;
//! gated instructions (copies, calls, loops) act only while enabled.

use tracing::trace;

use crate::context::ScanContext;
use crate::debug::{StepKind, TraceEvent};
use crate::error::FatalFault;
use crate::program::{
    CalcMode, Conversion, Expr, Instruction, Operand, Program, Rung, RungId, Site,
    SourceLocation, TagRef,
};
use crate::value::{Number, TagType, Value};

use super::condition::{
    eval_condition, eval_expr, read_operand, resolve_tag, store_clamped, store_wrapped,
    ExecResult, Interrupt,
};
use super::{ops, sequencer};

/// Body walk outcome: `ReturnSub` unwinds to the enclosing subroutine
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    ReturnSub,
}

/// Executes phase 4 over every rung of a program.
pub(crate) struct LogicRunner<'p> {
    program: &'p Program,
    stack: Vec<String>,
}

impl<'p> LogicRunner<'p> {
    pub(crate) fn new(program: &'p Program) -> Self {
        LogicRunner {
            program,
            stack: Vec::new(),
        }
    }

    /// Evaluate every top-level rung in source order. Stops early only
    /// on a latched fatal fault.
    pub(crate) fn run(&mut self, ctx: &mut ScanContext) {
        for rung in self.program.rungs() {
            if ctx.flags().fatal.is_some() {
                break;
            }
            self.rung(ctx, rung);
        }
    }

    fn event(
        &self,
        kind: StepKind,
        rung: RungId,
        mnemonic: Option<&'static str>,
        enabled: bool,
        location: Option<&SourceLocation>,
    ) -> TraceEvent {
        TraceEvent {
            kind,
            rung,
            mnemonic,
            location: location.cloned(),
            enabled,
            stack: self.stack.clone(),
        }
    }

    fn note(&self, ctx: &mut ScanContext, interrupt: Interrupt, rung: RungId) {
        // Address and range flags were raised at the fault site; only
        // fatal faults need the rung attached here.
        if interrupt == Interrupt::FatalMath {
            ctx.set_fatal(FatalFault::MathOperand { rung: rung.0 });
        }
    }

    fn rung(&mut self, ctx: &mut ScanContext, rung: &Rung) -> Flow {
        let powered = rung
            .conditions
            .iter()
            .try_fold(true, |acc, cond| {
                Ok(acc & eval_condition(self.program, ctx, cond)?)
            });
        let enabled = match powered {
            Ok(enabled) => enabled,
            Err(interrupt) => {
                // A faulted power rail skips the whole rung.
                self.note(ctx, interrupt, rung.id());
                ctx.record_trace(self.event(
                    StepKind::Rung,
                    rung.id(),
                    None,
                    false,
                    rung.location.as_ref(),
                ));
                return Flow::Continue;
            }
        };
        trace!(rung = rung.id().0, enabled, "rung");
        ctx.record_trace(self.event(
            StepKind::Rung,
            rung.id(),
            None,
            enabled,
            rung.location.as_ref(),
        ));
        self.body(ctx, rung.id(), rung.location.as_ref(), &rung.body, enabled)
    }

    fn body(
        &mut self,
        ctx: &mut ScanContext,
        rung: RungId,
        location: Option<&SourceLocation>,
        body: &[Instruction],
        enabled: bool,
    ) -> Flow {
        for instr in body {
            if ctx.flags().fatal.is_some() {
                return Flow::Continue;
            }
            match instr {
                Instruction::Branch { condition, body } => {
                    let powered = match eval_condition(self.program, ctx, condition) {
                        Ok(cond) => enabled && cond,
                        Err(interrupt) => {
                            self.note(ctx, interrupt, rung);
                            continue;
                        }
                    };
                    ctx.record_trace(self.event(
                        StepKind::Branch,
                        rung,
                        None,
                        powered,
                        location,
                    ));
                    if self.body(ctx, rung, location, body, powered) == Flow::ReturnSub {
                        return Flow::ReturnSub;
                    }
                }
                Instruction::Call { name } => {
                    ctx.record_trace(self.event(
                        StepKind::Subroutine,
                        rung,
                        Some("call"),
                        enabled,
                        location,
                    ));
                    if enabled {
                        self.call(ctx, name);
                    }
                }
                Instruction::Return => {
                    ctx.record_trace(self.event(
                        StepKind::Instruction,
                        rung,
                        Some("return"),
                        enabled,
                        location,
                    ));
                    if enabled {
                        return Flow::ReturnSub;
                    }
                }
                Instruction::ForLoop {
                    count,
                    index,
                    body,
                    oneshot,
                    site,
                } => {
                    ctx.record_trace(self.event(
                        StepKind::Instruction,
                        rung,
                        Some("for"),
                        enabled,
                        location,
                    ));
                    let flow =
                        self.for_loop(ctx, rung, location, count, index, body, *oneshot, *site, enabled);
                    match flow {
                        Ok(Flow::ReturnSub) => return Flow::ReturnSub,
                        Ok(Flow::Continue) => {}
                        Err(interrupt) => self.note(ctx, interrupt, rung),
                    }
                }
                other => {
                    ctx.record_trace(self.event(
                        StepKind::Instruction,
                        rung,
                        Some(other.mnemonic()),
                        enabled,
                        location,
                    ));
                    if let Err(interrupt) = self.execute(ctx, other, enabled) {
                        self.note(ctx, interrupt, rung);
                    }
                }
            }
        }
        Flow::Continue
    }

    fn call(&mut self, ctx: &mut ScanContext, name: &str) {
        let sub = self
            .program
            .subroutine(name)
            .expect("call targets are validated at registration");
        self.stack.push(name.to_owned());
        for rung in &sub.rungs {
            if ctx.flags().fatal.is_some() {
                break;
            }
            if self.rung(ctx, rung) == Flow::ReturnSub {
                break;
            }
        }
        self.stack.pop();
    }

    #[allow(clippy::too_many_arguments)]
    fn for_loop(
        &mut self,
        ctx: &mut ScanContext,
        rung: RungId,
        location: Option<&SourceLocation>,
        count: &Expr,
        index: &Option<TagRef>,
        body: &[Instruction],
        oneshot: bool,
        site: Site,
        enabled: bool,
    ) -> ExecResult<Flow> {
        if !oneshot_gate(ctx, site, oneshot, enabled) {
            return Ok(Flow::Continue);
        }
        let count = match eval_expr(self.program, ctx, count)? {
            Number::Int(v) => v,
            Number::Real(v) => crate::arith::trunc_f64(v).0,
        }
        .max(0);
        for i in 1..=count {
            ctx.write_memory(format!("loop.{}", site.0), Value::Dint(i as i32));
            if let Some(tag) = index {
                let meta = resolve_tag(self.program, ctx, tag)?;
                super::condition::store_quiet(ctx, &meta, &Value::Dint(i as i32));
            }
            if self.body(ctx, rung, location, body, true) == Flow::ReturnSub {
                return Ok(Flow::ReturnSub);
            }
            if ctx.flags().fatal.is_some() {
                break;
            }
        }
        Ok(Flow::Continue)
    }

    fn execute(
        &mut self,
        ctx: &mut ScanContext,
        instr: &Instruction,
        enabled: bool,
    ) -> ExecResult<()> {
        let program = self.program;
        match instr {
            Instruction::Out { tag } => {
                let meta = resolve_tag(program, ctx, tag)?;
                store_clamped(ctx, &meta, &Value::Bool(enabled))
            }
            Instruction::Latch { tag } => {
                if enabled {
                    let meta = resolve_tag(program, ctx, tag)?;
                    store_clamped(ctx, &meta, &Value::Bool(true))?;
                }
                Ok(())
            }
            Instruction::Reset { tag } => {
                if enabled {
                    let meta = resolve_tag(program, ctx, tag)?;
                    store_clamped(ctx, &meta, &Value::Bool(false))?;
                }
                Ok(())
            }
            Instruction::Copy {
                src,
                dest,
                conversion,
                oneshot,
                site,
            } => {
                if !oneshot_gate(ctx, *site, *oneshot, enabled) {
                    return Ok(());
                }
                exec_copy(program, ctx, src, dest, *conversion)
            }
            Instruction::Calc {
                expr,
                dest,
                mode,
                oneshot,
                site,
            } => {
                if !oneshot_gate(ctx, *site, *oneshot, enabled) {
                    return Ok(());
                }
                let result = eval_expr(program, ctx, expr)?;
                let result = match mode {
                    CalcMode::Decimal => result,
                    CalcMode::Hex => Number::Int(match result {
                        Number::Int(v) => v & 0xFFFF,
                        Number::Real(v) => crate::arith::trunc_f64(v).0 & 0xFFFF,
                    }),
                };
                let meta = resolve_tag(program, ctx, dest)?;
                store_wrapped(ctx, &meta, result)
            }
            Instruction::BlockCopy { src, dest } => {
                if enabled {
                    ops::block_copy(program, ctx, src, dest)?;
                }
                Ok(())
            }
            Instruction::Fill { value, dest } => {
                if enabled {
                    ops::fill(program, ctx, value, dest)?;
                }
                Ok(())
            }
            Instruction::PackBits { src, dest } => {
                if enabled {
                    ops::pack_bits(program, ctx, src, dest)?;
                }
                Ok(())
            }
            Instruction::UnpackBits { src, dest } => {
                if enabled {
                    ops::unpack_bits(program, ctx, src, dest)?;
                }
                Ok(())
            }
            Instruction::PackWords { low, high, dest } => {
                if enabled {
                    ops::pack_words(program, ctx, low, high, dest)?;
                }
                Ok(())
            }
            Instruction::UnpackWords { src, dest } => {
                if enabled {
                    ops::unpack_words(program, ctx, src, dest)?;
                }
                Ok(())
            }
            Instruction::PackText { src, dest } => {
                if enabled {
                    ops::pack_text(program, ctx, src, dest)?;
                }
                Ok(())
            }
            Instruction::Search {
                op,
                value,
                range,
                result,
                found,
                continuous,
            } => {
                if enabled {
                    ops::search(program, ctx, *op, value, range, result, found, *continuous)?;
                }
                Ok(())
            }
            Instruction::ShiftRegister {
                window,
                clock,
                reset,
                site,
            } => ops::shift_register(program, ctx, window, clock, reset, *site, enabled),
            Instruction::OnDelay {
                done,
                acc,
                preset,
                unit,
                reset,
                site,
            } => sequencer::on_delay(program, ctx, done, acc, preset, *unit, reset, *site, enabled),
            Instruction::OffDelay {
                done,
                acc,
                preset,
                unit,
                site,
            } => sequencer::off_delay(program, ctx, done, acc, preset, *unit, *site, enabled),
            Instruction::CountUp {
                done,
                acc,
                preset,
                reset,
            } => sequencer::count(
                program,
                ctx,
                done,
                acc,
                preset,
                reset,
                enabled as i64,
                sequencer::CountKind::Up,
            ),
            Instruction::CountDown {
                done,
                acc,
                preset,
                reset,
            } => sequencer::count(
                program,
                ctx,
                done,
                acc,
                preset,
                reset,
                -(enabled as i64),
                sequencer::CountKind::Down,
            ),
            Instruction::CountUpDown {
                up,
                down,
                done,
                acc,
                preset,
                reset,
            } => {
                let inc = eval_condition(program, ctx, up)? as i64;
                let dec = eval_condition(program, ctx, down)? as i64;
                let delta = if enabled { inc - dec } else { 0 };
                sequencer::count(
                    program,
                    ctx,
                    done,
                    acc,
                    preset,
                    reset,
                    delta,
                    sequencer::CountKind::Bidirectional,
                )
            }
            Instruction::Drum(drum) => sequencer::drum(program, ctx, drum, enabled),
            Instruction::Branch { .. }
            | Instruction::Call { .. }
            | Instruction::ForLoop { .. }
            | Instruction::Return => unreachable!("handled by the body walk"),
        }
    }
}

/// Oneshot gate: fire while enabled, and for oneshot instructions only
/// on the scan the enable rose. Tracks the enable unconditionally.
pub(crate) fn oneshot_gate(ctx: &mut ScanContext, site: Site, oneshot: bool, enabled: bool) -> bool {
    if !oneshot {
        return enabled;
    }
    let previous = ctx.observe_edge(format!("once.{}", site.0), enabled);
    enabled && !previous
}

fn exec_copy(
    program: &Program,
    ctx: &mut ScanContext,
    src: &Operand,
    dest: &TagRef,
    conversion: Conversion,
) -> ExecResult<()> {
    let value = read_operand(program, ctx, src)?;
    let meta = resolve_tag(program, ctx, dest)?;
    match conversion {
        Conversion::None => store_clamped(ctx, &meta, &value),
        Conversion::Text => match (&value, meta.ty) {
            (Value::Char(text), ty) if ty.is_numeric() => {
                let parsed = parse_decimal(text).ok_or_else(|| {
                    ctx.set_range();
                    Interrupt::Range
                })?;
                store_clamped(ctx, &meta, &parsed)
            }
            (v, TagType::Char) if v.ty().is_numeric() => {
                store_clamped(ctx, &meta, &Value::Char(render_decimal(v)))
            }
            _ => store_clamped(ctx, &meta, &value),
        },
        Conversion::TextPadded(width) => match (&value, meta.ty) {
            (v, TagType::Char) if v.ty().is_numeric() => {
                let n = v.as_i64().expect("numeric");
                let text = format!("{n:0width$}", width = width as usize);
                store_clamped(ctx, &meta, &Value::Char(text))
            }
            (Value::Char(text), ty) if ty.is_numeric() => {
                let parsed = parse_decimal(text).ok_or_else(|| {
                    ctx.set_range();
                    Interrupt::Range
                })?;
                store_clamped(ctx, &meta, &parsed)
            }
            _ => store_clamped(ctx, &meta, &value),
        },
        Conversion::Binary => match (&value, meta.ty) {
            (Value::Char(text), ty) if ty.is_numeric() => {
                let bits = u32::from_str_radix(text.trim(), 2).map_err(|_| {
                    ctx.set_range();
                    Interrupt::Range
                })?;
                store_clamped(ctx, &meta, &Value::Dint(bits as i32))
            }
            (v, TagType::Char) if v.ty().is_numeric() => {
                let text = match v {
                    Value::Int(n) => format!("{:b}", *n as u16),
                    Value::Word(n) => format!("{n:b}"),
                    Value::Dint(n) => format!("{:b}", *n as u32),
                    Value::Bool(b) => format!("{:b}", *b as u8),
                    other => format!(
                        "{:b}",
                        other.as_i64().expect("numeric") as u32
                    ),
                };
                store_clamped(ctx, &meta, &Value::Char(text))
            }
            _ => store_clamped(ctx, &meta, &value),
        },
    }
}

fn render_decimal(value: &Value) -> String {
    match value {
        Value::Real(v) => format!("{v}"),
        other => other.as_i64().expect("numeric").to_string(),
    }
}

fn parse_decimal(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Some(match i32::try_from(n) {
            Ok(n) => Value::Dint(n),
            // Out of DINT range; the store path clamps and flags.
            Err(_) => Value::Real(n as f32),
        });
    }
    text.parse::<f64>().ok().map(|f| Value::Real(f as f32))
}
