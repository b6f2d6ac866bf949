//! Block operations: window resolution, copies, fills, pack/unpack,
//! search and the shift register.
//!
//! Window bounds resolve against the scan context, so a pointer tag can
//! drive either end. Sparse gaps are skipped, not faulted; inverted
//! bounds fault except where orientation is meaningful (shift register
//! direction).

use itertools::Itertools;

use crate::arith;
use crate::block::BlockId;
use crate::context::ScanContext;
use crate::program::{CmpOp, Condition, Operand, Program, Site, TagRef, Window};
use crate::value::{TagType, Value};

use super::condition::{
    compare_values, eval_addr, eval_condition, pack_width, read_operand, resolve_tag,
    store_clamped, ExecResult, Interrupt,
};

/// Resolve a window into its oriented valid-address list.
///
/// With `allow_reverse`, `start > end` yields the addresses in
/// descending order (origin first); otherwise inverted bounds raise the
/// range flag and abort.
fn resolve_window(
    program: &Program,
    ctx: &mut ScanContext,
    window: &Window,
    allow_reverse: bool,
) -> ExecResult<(Vec<i32>, BlockId)> {
    let range_fault = |ctx: &mut ScanContext| {
        ctx.set_range();
        Interrupt::Range
    };
    let start = match eval_addr(program, ctx, &window.start) {
        Ok(addr) => addr,
        Err(Interrupt::Range) => return Err(range_fault(ctx)),
        Err(other) => return Err(other),
    };
    let end = match eval_addr(program, ctx, &window.end) {
        Ok(addr) => addr,
        Err(Interrupt::Range) => return Err(range_fault(ctx)),
        Err(other) => return Err(other),
    };
    let block = program.block(window.block);
    let (lo, hi, reversed) = if start <= end {
        (start, end, false)
    } else if allow_reverse {
        (end, start, true)
    } else {
        return Err(range_fault(ctx));
    };
    if lo < block.start() || hi > block.end() {
        return Err(range_fault(ctx));
    }
    let mut addrs = block.span_addresses(lo, hi);
    if reversed {
        addrs.reverse();
    }
    Ok((addrs, window.block))
}

fn slot_meta(program: &Program, block: BlockId, addr: i32) -> crate::tag::TagMeta {
    program
        .block(block)
        .slot(addr)
        .expect("window addresses are valid for their block")
}

/// Copy the source window over the destination window slot by slot.
/// Lengths must match; the full source view is read before any write,
/// so overlapping windows behave as copies of the original values.
pub(crate) fn block_copy(
    program: &Program,
    ctx: &mut ScanContext,
    src: &Window,
    dest: &Window,
) -> ExecResult<()> {
    let (src_addrs, src_block) = resolve_window(program, ctx, src, false)?;
    let (dest_addrs, dest_block) = resolve_window(program, ctx, dest, false)?;
    if src_addrs.len() != dest_addrs.len() {
        ctx.set_range();
        return Err(Interrupt::Range);
    }
    let values: Vec<Value> = src_addrs
        .iter()
        .map(|&addr| ctx.read(&slot_meta(program, src_block, addr)))
        .collect();
    for (addr, value) in dest_addrs.iter().zip(values) {
        let meta = slot_meta(program, dest_block, *addr);
        store_clamped(ctx, &meta, &value)?;
    }
    Ok(())
}

/// Clamp the value once, then write it to every valid slot.
pub(crate) fn fill(
    program: &Program,
    ctx: &mut ScanContext,
    value: &Operand,
    dest: &Window,
) -> ExecResult<()> {
    let (addrs, block) = resolve_window(program, ctx, dest, false)?;
    let value = read_operand(program, ctx, value)?;
    let stored = match crate::value::clamp_assign(&value, program.block(block).ty()) {
        Some(stored) => stored,
        None => {
            ctx.set_range();
            return Err(Interrupt::Range);
        }
    };
    if stored.adjusted {
        ctx.set_range();
    }
    for addr in addrs {
        let meta = slot_meta(program, block, addr);
        ctx.write(meta.name, stored.value.clone());
    }
    Ok(())
}

/// Pack a boolean window into the destination word, LSB first.
pub(crate) fn pack_bits(
    program: &Program,
    ctx: &mut ScanContext,
    src: &Window,
    dest: &TagRef,
) -> ExecResult<()> {
    let (addrs, block) = resolve_window(program, ctx, src, false)?;
    let meta = resolve_tag(program, ctx, dest)?;
    let width = pack_width(meta.ty).ok_or_else(|| {
        ctx.set_range();
        Interrupt::Range
    })?;
    if addrs.len() as u32 > width {
        ctx.set_range();
        return Err(Interrupt::Range);
    }
    let bits = addrs
        .iter()
        .map(|&addr| ctx.read(&slot_meta(program, block, addr)).is_truthy())
        .collect_vec();
    let packed = arith::pack_bits(bits);
    let value = match meta.ty {
        TagType::Int => Value::Int(packed as u16 as i16),
        TagType::Word => Value::Word(packed as u16),
        TagType::Dint => Value::Dint(packed as i32),
        _ => unreachable!("pack_width gated the type"),
    };
    ctx.write(meta.name, value);
    Ok(())
}

/// Unpack the low bits of the source word into a boolean window.
pub(crate) fn unpack_bits(
    program: &Program,
    ctx: &mut ScanContext,
    src: &TagRef,
    dest: &Window,
) -> ExecResult<()> {
    let src_meta = resolve_tag(program, ctx, src)?;
    let width = pack_width(src_meta.ty).ok_or_else(|| {
        ctx.set_range();
        Interrupt::Range
    })?;
    let (addrs, block) = resolve_window(program, ctx, dest, false)?;
    if addrs.len() as u32 > width {
        ctx.set_range();
        return Err(Interrupt::Range);
    }
    let bits = match ctx.read(&src_meta) {
        Value::Int(v) => v as u16 as u32,
        Value::Word(v) => v as u32,
        Value::Dint(v) => v as u32,
        other => other.as_i64().unwrap_or(0) as u32,
    };
    let flags = arith::unpack_bits(bits, addrs.len() as u32);
    for (addr, bit) in addrs.iter().zip(flags) {
        let meta = slot_meta(program, block, *addr);
        store_clamped(ctx, &meta, &Value::Bool(bit))?;
    }
    Ok(())
}

/// Combine the low 16 bits of each operand into the DINT destination.
pub(crate) fn pack_words(
    program: &Program,
    ctx: &mut ScanContext,
    low: &Operand,
    high: &Operand,
    dest: &TagRef,
) -> ExecResult<()> {
    let numeric = |ctx: &mut ScanContext, v: Value| {
        v.as_i64().ok_or_else(|| {
            ctx.set_range();
            Interrupt::Range
        })
    };
    let low_v = read_operand(program, ctx, low)?;
    let low_v = numeric(ctx, low_v)? as u16;
    let high_v = read_operand(program, ctx, high)?;
    let high_v = numeric(ctx, high_v)? as u16;
    let meta = resolve_tag(program, ctx, dest)?;
    store_clamped(ctx, &meta, &Value::Dint(arith::pack_words(low_v, high_v)))
}

/// Split the DINT source into a two-slot word window, low word first.
pub(crate) fn unpack_words(
    program: &Program,
    ctx: &mut ScanContext,
    src: &TagRef,
    dest: &Window,
) -> ExecResult<()> {
    let src_meta = resolve_tag(program, ctx, src)?;
    let raw = ctx.read(&src_meta).as_i64().unwrap_or(0) as i32;
    let (addrs, block) = resolve_window(program, ctx, dest, false)?;
    if addrs.len() != 2 {
        ctx.set_range();
        return Err(Interrupt::Range);
    }
    let (low, high) = arith::unpack_words(raw);
    for (addr, word) in addrs.iter().zip([low, high]) {
        let meta = slot_meta(program, block, *addr);
        store_clamped(ctx, &meta, &Value::Word(word))?;
    }
    Ok(())
}

/// Pack the text of a CHAR window into the DINT destination.
pub(crate) fn pack_text(
    program: &Program,
    ctx: &mut ScanContext,
    src: &Window,
    dest: &TagRef,
) -> ExecResult<()> {
    let (addrs, block) = resolve_window(program, ctx, src, false)?;
    if program.block(block).ty() != TagType::Char {
        ctx.set_range();
        return Err(Interrupt::Range);
    }
    let text: String = addrs
        .iter()
        .filter_map(|&addr| {
            ctx.read(&slot_meta(program, block, addr))
                .as_text()
                .map(str::to_owned)
        })
        .collect();
    let packed = arith::pack_text(&text).ok_or_else(|| {
        ctx.set_range();
        Interrupt::Range
    })?;
    let meta = resolve_tag(program, ctx, dest)?;
    store_clamped(ctx, &meta, &Value::Dint(packed))
}

/// Scan the window for a match, writing the matched address and found
/// flag. Continuous searches resume after the previous result and stand
/// down once exhausted (result -1) until the result cell is rewritten.
#[allow(clippy::too_many_arguments)]
pub(crate) fn search(
    program: &Program,
    ctx: &mut ScanContext,
    op: CmpOp,
    value: &Operand,
    range: &Window,
    result: &TagRef,
    found: &TagRef,
    continuous: bool,
) -> ExecResult<()> {
    let (addrs, block) = resolve_window(program, ctx, range, false)?;
    let needle = read_operand(program, ctx, value)?;
    let result_meta = resolve_tag(program, ctx, result)?;
    let found_meta = resolve_tag(program, ctx, found)?;

    let previous = ctx.read(&result_meta).as_i64().unwrap_or(0);
    let start = if continuous {
        if previous == -1 {
            return Ok(());
        }
        if previous > 0 {
            addrs.partition_point(|&a| (a as i64) <= previous)
        } else {
            0
        }
    } else {
        0
    };

    let hit = match (&needle, program.block(block).ty()) {
        (Value::Char(text), TagType::Char) => {
            search_text(program, ctx, &addrs, block, op, text, start)?
        }
        (Value::Char(_), _) => {
            ctx.set_range();
            return Err(Interrupt::Range);
        }
        _ => {
            let mut hit = None;
            for &addr in &addrs[start..] {
                let slot = ctx.read(&slot_meta(program, block, addr));
                if compare_values(op, &slot, &needle)? {
                    hit = Some(addr);
                    break;
                }
            }
            hit
        }
    };

    match hit {
        Some(addr) => {
            store_clamped(ctx, &result_meta, &Value::Dint(addr))?;
            store_clamped(ctx, &found_meta, &Value::Bool(true))
        }
        None => {
            store_clamped(ctx, &result_meta, &Value::Dint(-1))?;
            store_clamped(ctx, &found_meta, &Value::Bool(false))
        }
    }
}

/// Windowed substring match over consecutive CHAR cells.
fn search_text(
    program: &Program,
    ctx: &mut ScanContext,
    addrs: &[i32],
    block: BlockId,
    op: CmpOp,
    needle: &str,
    start: usize,
) -> ExecResult<Option<i32>> {
    let cells: Vec<String> = addrs
        .iter()
        .map(|&addr| {
            ctx.read(&slot_meta(program, block, addr))
                .as_text()
                .unwrap_or_default()
                .to_owned()
        })
        .collect();
    let span = needle.chars().count().max(1);
    for idx in start..addrs.len() {
        if idx + span > addrs.len() {
            break;
        }
        let window: String = cells[idx..idx + span].concat();
        if compare_values(op, &Value::Char(window), &Value::Char(needle.to_owned()))? {
            return Ok(Some(addrs[idx]));
        }
    }
    Ok(None)
}

/// Clocked shift register. The rail state is the data input; the shift
/// fires on the clock's rising edge, and the reset input forces the
/// whole window false while held.
pub(crate) fn shift_register(
    program: &Program,
    ctx: &mut ScanContext,
    window: &Window,
    clock: &Condition,
    reset: &Condition,
    site: Site,
    enabled: bool,
) -> ExecResult<()> {
    let (addrs, block) = resolve_window(program, ctx, window, true)?;
    if addrs.is_empty() {
        ctx.set_range();
        return Err(Interrupt::Range);
    }
    let clock_now = eval_condition(program, ctx, clock)?;
    let clock_was = ctx.observe_edge(format!("clock.{}", site.0), clock_now);
    let reset_now = eval_condition(program, ctx, reset)?;

    if reset_now {
        for &addr in &addrs {
            let meta = slot_meta(program, block, addr);
            store_clamped(ctx, &meta, &Value::Bool(false))?;
        }
        return Ok(());
    }
    if clock_now && !clock_was {
        let values: Vec<bool> = addrs
            .iter()
            .map(|&addr| ctx.read(&slot_meta(program, block, addr)).is_truthy())
            .collect();
        let origin = slot_meta(program, block, addrs[0]);
        store_clamped(ctx, &origin, &Value::Bool(enabled))?;
        for i in 1..addrs.len() {
            let meta = slot_meta(program, block, addrs[i]);
            store_clamped(ctx, &meta, &Value::Bool(values[i - 1]))?;
        }
    }
    Ok(())
}
