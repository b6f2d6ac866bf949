//! Timers, counters and drum sequencers.
//!
//! Accumulators live in ordinary tags so they snapshot, fork and diff
//! like any other cell; sub-tick remainders live in engine memory keyed
//! by the instruction's site. Timer accumulation converts the scan's
//! simulated dt into ticks of the instruction's unit, so a fixed-step
//! run is bit-for-bit reproducible.

use crate::context::ScanContext;
use crate::program::{Drum, DrumKind, Expr, Program, Site, TagRef, TimeUnit};
use crate::value::{Number, Value};

use super::condition::{
    eval_condition, eval_expr, read_tag, resolve_tag, store_quiet, ExecResult,
};

const TICK_EPSILON: f64 = 1e-9;

fn clamp_dint(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

fn frac_key(site: Site) -> String {
    format!("timer.{}", site.0)
}

fn read_frac(ctx: &ScanContext, key: &str) -> f64 {
    ctx.read_memory(key)
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn eval_ticks(program: &Program, ctx: &mut ScanContext, preset: &Expr) -> ExecResult<i64> {
    Ok(match eval_expr(program, ctx, preset)? {
        Number::Int(v) => v,
        Number::Real(v) => crate::arith::trunc_f64(v).0,
    })
}

/// On-delay timer. While enabled the accumulator climbs by the scan's
/// dt in ticks; at the preset the done bit sets and the accumulator
/// holds there. Rung-false clears, unless the retentive variant's reset
/// input is the one in charge.
#[allow(clippy::too_many_arguments)]
pub(crate) fn on_delay(
    program: &Program,
    ctx: &mut ScanContext,
    done: &TagRef,
    acc: &TagRef,
    preset: &Expr,
    unit: TimeUnit,
    reset: &Option<TagRef>,
    site: Site,
    enabled: bool,
) -> ExecResult<()> {
    let done_meta = resolve_tag(program, ctx, done)?;
    let acc_meta = resolve_tag(program, ctx, acc)?;
    let preset_ticks = eval_ticks(program, ctx, preset)?;
    let key = frac_key(site);

    if let Some(reset_tag) = reset {
        if read_tag(program, ctx, reset_tag)?.is_truthy() {
            store_quiet(ctx, &acc_meta, &Value::Dint(0));
            store_quiet(ctx, &done_meta, &Value::Bool(false));
            ctx.write_memory(key, Value::Real(0.0));
            return Ok(());
        }
    }

    if enabled {
        let acc0 = ctx.read(&acc_meta).as_i64().unwrap_or(0);
        let total = acc0 as f64 + read_frac(ctx, &key) + unit.ticks(ctx.dt());
        if total + TICK_EPSILON >= preset_ticks as f64 {
            store_quiet(ctx, &acc_meta, &Value::Dint(clamp_dint(preset_ticks)));
            store_quiet(ctx, &done_meta, &Value::Bool(true));
            ctx.write_memory(key, Value::Real(0.0));
        } else {
            let whole = total.floor();
            store_quiet(ctx, &acc_meta, &Value::Dint(whole as i32));
            store_quiet(ctx, &done_meta, &Value::Bool(false));
            ctx.write_memory(key, Value::Real((total - whole) as f32));
        }
    } else if reset.is_none() {
        store_quiet(ctx, &acc_meta, &Value::Dint(0));
        store_quiet(ctx, &done_meta, &Value::Bool(false));
        ctx.write_memory(key, Value::Real(0.0));
    }
    Ok(())
}

/// Off-delay timer: done while enabled, and for `preset` ticks after
/// the rail drops.
#[allow(clippy::too_many_arguments)]
pub(crate) fn off_delay(
    program: &Program,
    ctx: &mut ScanContext,
    done: &TagRef,
    acc: &TagRef,
    preset: &Expr,
    unit: TimeUnit,
    site: Site,
    enabled: bool,
) -> ExecResult<()> {
    let done_meta = resolve_tag(program, ctx, done)?;
    let acc_meta = resolve_tag(program, ctx, acc)?;
    let preset_ticks = eval_ticks(program, ctx, preset)?;
    let key = frac_key(site);

    if enabled {
        store_quiet(ctx, &acc_meta, &Value::Dint(0));
        store_quiet(ctx, &done_meta, &Value::Bool(true));
        ctx.write_memory(key, Value::Real(0.0));
    } else {
        let acc0 = ctx.read(&acc_meta).as_i64().unwrap_or(0);
        let total = acc0 as f64 + read_frac(ctx, &key) + unit.ticks(ctx.dt());
        if total + TICK_EPSILON >= preset_ticks as f64 {
            store_quiet(ctx, &acc_meta, &Value::Dint(clamp_dint(preset_ticks)));
            store_quiet(ctx, &done_meta, &Value::Bool(false));
            ctx.write_memory(key, Value::Real(0.0));
        } else {
            let whole = total.floor();
            store_quiet(ctx, &acc_meta, &Value::Dint(whole as i32));
            ctx.write_memory(key, Value::Real((total - whole) as f32));
        }
    }
    Ok(())
}

/// Which accumulator bound latches a counter's done bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CountKind {
    /// Done at `acc >= preset`.
    Up,
    /// Done at `acc <= -preset`.
    Down,
    /// Done at either bound.
    Bidirectional,
}

/// Shared counter body: apply `delta` this scan, clamp at the
/// accumulator's bounds, and refresh the done bit against the bounds
/// `kind` watches.
#[allow(clippy::too_many_arguments)]
pub(crate) fn count(
    program: &Program,
    ctx: &mut ScanContext,
    done: &TagRef,
    acc: &TagRef,
    preset: &Expr,
    reset: &Option<TagRef>,
    delta: i64,
    kind: CountKind,
) -> ExecResult<()> {
    let done_meta = resolve_tag(program, ctx, done)?;
    let acc_meta = resolve_tag(program, ctx, acc)?;
    let preset_ticks = eval_ticks(program, ctx, preset)?;

    if let Some(reset_tag) = reset {
        if read_tag(program, ctx, reset_tag)?.is_truthy() {
            store_quiet(ctx, &acc_meta, &Value::Dint(0));
            store_quiet(ctx, &done_meta, &Value::Bool(false));
            return Ok(());
        }
    }

    let acc0 = ctx.read(&acc_meta).as_i64().unwrap_or(0);
    let acc1 = (acc0 + delta).clamp(i32::MIN as i64, i32::MAX as i64);
    store_quiet(ctx, &acc_meta, &Value::Dint(acc1 as i32));
    let reached = match kind {
        CountKind::Up => acc1 >= preset_ticks,
        CountKind::Down => acc1 <= -preset_ticks,
        CountKind::Bidirectional => acc1 >= preset_ticks || acc1 <= -preset_ticks,
    };
    store_quiet(ctx, &done_meta, &Value::Bool(reached));
    Ok(())
}

/// Drum sequencer. The current step's pattern is asserted on the
/// outputs every enabled scan; step changes come from the per-step
/// trigger (event level or elapsed time), jump/jog rises, or the reset
/// level, in that priority order (reset strongest).
pub(crate) fn drum(
    program: &Program,
    ctx: &mut ScanContext,
    drum: &Drum,
    enabled: bool,
) -> ExecResult<()> {
    if !enabled {
        return Ok(());
    }
    let current_meta = resolve_tag(program, ctx, &drum.current)?;
    let steps = drum.steps.len() as i64;
    let mut step = ctx.read(&current_meta).as_i64().unwrap_or(1);
    if !(1..=steps).contains(&step) {
        step = 1;
    }
    let key = format!("drum.{}", drum.site.0);
    let mut elapsed_total = read_frac(ctx, &key);

    let reset_hit = match &drum.reset {
        Some(cond) => eval_condition(program, ctx, cond)?,
        None => false,
    };
    if reset_hit {
        step = 1;
        elapsed_total = 0.0;
    } else {
        for jump in &drum.jumps {
            let now = eval_condition(program, ctx, &jump.condition)?;
            let was = ctx.observe_edge(format!("jump.{}", jump.site.0), now);
            if now && !was {
                step = (jump.step as i64).clamp(1, steps);
                elapsed_total = 0.0;
            }
        }
        for jog in &drum.jogs {
            let now = eval_condition(program, ctx, &jog.condition)?;
            let was = ctx.observe_edge(format!("jog.{}", jog.site.0), now);
            if now && !was {
                step = step % steps + 1;
                elapsed_total = 0.0;
            }
        }
        match drum.kind {
            DrumKind::Event => {
                let idx = (step - 1) as usize;
                if let Some(event) = &drum.steps[idx].event {
                    if eval_condition(program, ctx, event)? {
                        step = step % steps + 1;
                        elapsed_total = 0.0;
                    }
                }
            }
            DrumKind::Time(unit) => {
                let idx = (step - 1) as usize;
                let preset = match &drum.steps[idx].preset {
                    Some(expr) => eval_ticks(program, ctx, expr)?,
                    None => 0,
                };
                elapsed_total += unit.ticks(ctx.dt());
                if elapsed_total + TICK_EPSILON >= preset as f64 {
                    step = step % steps + 1;
                    elapsed_total = 0.0;
                }
            }
        }
    }

    ctx.write_memory(key, Value::Real(elapsed_total as f32));
    store_quiet(ctx, &current_meta, &Value::Dint(step as i32));
    if let Some(elapsed) = &drum.elapsed {
        let meta = resolve_tag(program, ctx, elapsed)?;
        store_quiet(ctx, &meta, &Value::Dint(elapsed_total.floor() as i32));
    }
    let pattern = &drum.steps[(step - 1) as usize].pattern;
    for (output, bit) in drum.outputs.iter().zip(pattern) {
        let meta = resolve_tag(program, ctx, output)?;
        store_quiet(ctx, &meta, &Value::Bool(*bit));
    }
    Ok(())
}
