//! Condition and expression evaluation against the scan context.
//!
//! Recoverable faults raise the matching scan flag at the raise site and
//! unwind to the rung walk as an [`Interrupt`]; fatal math faults unwind
//! without a flag so the walk can attach the rung id.

use crate::arith;
use crate::context::ScanContext;
use crate::program::{CmpOp, Condition, Expr, Operand, Program, Site, TagRef};
use crate::tag::TagMeta;
use crate::value::{Number, Stored, TagType, Value};

/// Instruction-level unwind: the current instruction (or rung condition)
/// aborts, the scan continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    /// Indirect resolution failed; address flag already raised.
    Address,
    /// Window or conversion fault; range flag already raised.
    Range,
    /// Math operand corruption; fatal, rung id attached by the walk.
    FatalMath,
}

pub(crate) type ExecResult<T> = Result<T, Interrupt>;

/// Resolve a cell reference into its descriptor. Indirect references
/// read their pointer through the scan context.
pub(crate) fn resolve_tag(
    program: &Program,
    ctx: &mut ScanContext,
    tag: &TagRef,
) -> ExecResult<TagMeta> {
    match tag {
        TagRef::Tag(id) => Ok(program.tag(*id).meta()),
        TagRef::Slot(block, addr) => {
            program.block(*block).slot(*addr).map_err(|_| {
                ctx.set_address();
                Interrupt::Address
            })
        }
        TagRef::Indirect(block, pointer) => {
            let addr = eval_addr(program, ctx, pointer).map_err(|i| {
                if i == Interrupt::Range {
                    ctx.set_address();
                    Interrupt::Address
                } else {
                    i
                }
            })?;
            program.block(*block).slot(addr).map_err(|_| {
                ctx.set_address();
                Interrupt::Address
            })
        }
    }
}

/// Read a cell through the scan context.
pub(crate) fn read_tag(
    program: &Program,
    ctx: &mut ScanContext,
    tag: &TagRef,
) -> ExecResult<Value> {
    let meta = resolve_tag(program, ctx, tag)?;
    Ok(ctx.read(&meta))
}

/// Read an operand: literal or cell.
pub(crate) fn read_operand(
    program: &Program,
    ctx: &mut ScanContext,
    operand: &Operand,
) -> ExecResult<Value> {
    match operand {
        Operand::Literal(v) => Ok(v.clone()),
        Operand::Ref(tag) => read_tag(program, ctx, tag),
    }
}

fn number_of(value: &Value) -> ExecResult<Number> {
    match value {
        Value::Real(v) => Ok(Number::Real(*v as f64)),
        Value::Char(_) => Err(Interrupt::FatalMath),
        other => Ok(Number::Int(
            other.as_i64().expect("non-char values are numeric"),
        )),
    }
}

/// Evaluate an arithmetic expression with wrap semantics: a 64-bit
/// signed accumulator for integers, promoted to f64 when a REAL operand
/// joins. Division by zero yields 0 and raises the division flag.
pub(crate) fn eval_expr(
    program: &Program,
    ctx: &mut ScanContext,
    expr: &Expr,
) -> ExecResult<Number> {
    match expr {
        Expr::Literal(v) => number_of(v),
        Expr::Ref(tag) => number_of(&read_tag(program, ctx, tag)?),
        Expr::Neg(inner) => Ok(match eval_expr(program, ctx, inner)? {
            Number::Int(v) => Number::Int(v.wrapping_neg()),
            Number::Real(v) => Number::Real(-v),
        }),
        Expr::Add(a, b) => binop(program, ctx, a, b, i64::wrapping_add, |a, b| a + b),
        Expr::Sub(a, b) => binop(program, ctx, a, b, i64::wrapping_sub, |a, b| a - b),
        Expr::Mul(a, b) => binop(program, ctx, a, b, i64::wrapping_mul, |a, b| a * b),
        Expr::Div(a, b) => {
            let (a, b) = operands(program, ctx, a, b)?;
            match (a, b) {
                (Number::Int(a), Number::Int(b)) => {
                    let (q, div0) = arith::div(a, b);
                    if div0 {
                        ctx.set_division();
                    }
                    Ok(Number::Int(q))
                }
                (a, b) => {
                    let b = b.to_real();
                    if b == 0.0 {
                        ctx.set_division();
                        Ok(Number::Real(0.0))
                    } else {
                        Ok(Number::Real(a.to_real() / b))
                    }
                }
            }
        }
        Expr::Rem(a, b) => {
            let (a, b) = operands(program, ctx, a, b)?;
            match (a, b) {
                (Number::Int(a), Number::Int(b)) => {
                    let (r, div0) = arith::rem(a, b);
                    if div0 {
                        ctx.set_division();
                    }
                    Ok(Number::Int(r))
                }
                (a, b) => {
                    let b = b.to_real();
                    if b == 0.0 {
                        ctx.set_division();
                        Ok(Number::Real(0.0))
                    } else {
                        Ok(Number::Real(a.to_real() % b))
                    }
                }
            }
        }
    }
}

fn operands(
    program: &Program,
    ctx: &mut ScanContext,
    a: &Expr,
    b: &Expr,
) -> ExecResult<(Number, Number)> {
    // Left side first; both sides are always evaluated so their flag
    // side effects land even when the right side faults.
    let a = eval_expr(program, ctx, a)?;
    let b = eval_expr(program, ctx, b)?;
    Ok((a, b))
}

fn binop(
    program: &Program,
    ctx: &mut ScanContext,
    a: &Expr,
    b: &Expr,
    int_op: fn(i64, i64) -> i64,
    real_op: fn(f64, f64) -> f64,
) -> ExecResult<Number> {
    let (a, b) = operands(program, ctx, a, b)?;
    Ok(match (a, b) {
        (Number::Int(a), Number::Int(b)) => Number::Int(int_op(a, b)),
        (a, b) => Number::Real(real_op(a.to_real(), b.to_real())),
    })
}

/// Evaluate a window bound or pointer expression into an address.
///
/// Non-integer results truncate toward zero; values outside the i32
/// address space report [`Interrupt::Range`] without flagging, so the
/// caller can classify the fault as address or range.
pub(crate) fn eval_addr(
    program: &Program,
    ctx: &mut ScanContext,
    expr: &Expr,
) -> ExecResult<i32> {
    let raw = match eval_expr(program, ctx, expr)? {
        Number::Int(v) => v,
        Number::Real(v) => arith::trunc_f64(v).0,
    };
    i32::try_from(raw).map_err(|_| Interrupt::Range)
}

enum CmpVal {
    Num(Number),
    Text(String),
}

fn cmp_side(program: &Program, ctx: &mut ScanContext, expr: &Expr) -> ExecResult<CmpVal> {
    let simple = match expr {
        Expr::Literal(v) => Some(v.clone()),
        Expr::Ref(tag) => Some(read_tag(program, ctx, tag)?),
        _ => None,
    };
    match simple {
        Some(Value::Char(s)) => Ok(CmpVal::Text(s)),
        Some(v) => Ok(CmpVal::Num(number_of(&v)?)),
        None => Ok(CmpVal::Num(eval_expr(program, ctx, expr)?)),
    }
}

fn compare(op: CmpOp, lhs: CmpVal, rhs: CmpVal) -> ExecResult<bool> {
    use core::cmp::Ordering;
    let ordering = match (lhs, rhs) {
        (CmpVal::Text(a), CmpVal::Text(b)) => a.cmp(&b),
        (CmpVal::Num(a), CmpVal::Num(b)) => match (a, b) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            (a, b) => match a.to_real().partial_cmp(&b.to_real()) {
                Some(o) => o,
                // NaN compares false for every operator except !=
                None => return Ok(matches!(op, CmpOp::Ne)),
            },
        },
        // Text against number is operand corruption.
        _ => return Err(Interrupt::FatalMath),
    };
    Ok(match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    })
}

/// Compare two scan-context values with a search operator.
pub(crate) fn compare_values(op: CmpOp, lhs: &Value, rhs: &Value) -> ExecResult<bool> {
    let side = |v: &Value| match v {
        Value::Char(s) => CmpVal::Text(s.clone()),
        other => CmpVal::Num(
            number_of(other).expect("non-char values are numeric"),
        ),
    };
    compare(op, side(lhs), side(rhs))
}

fn edge_key(site: Site, name: &str) -> String {
    format!("edge.{}.{}", site.0, name)
}

/// Evaluate a condition tree. Every node is evaluated even once the
/// outcome is decided, so edge detectors keep tracking their cells.
pub(crate) fn eval_condition(
    program: &Program,
    ctx: &mut ScanContext,
    cond: &Condition,
) -> ExecResult<bool> {
    match cond {
        Condition::Truthy(tag) => Ok(read_tag(program, ctx, tag)?.is_truthy()),
        Condition::Not(inner) => Ok(!eval_condition(program, ctx, inner)?),
        Condition::All(terms) => {
            let mut all = true;
            for term in terms {
                all &= eval_condition(program, ctx, term)?;
            }
            Ok(all)
        }
        Condition::Any(terms) => {
            let mut any = false;
            for term in terms {
                any |= eval_condition(program, ctx, term)?;
            }
            Ok(any)
        }
        Condition::Compare(op, lhs, rhs) => {
            let lhs = cmp_side(program, ctx, lhs)?;
            let rhs = cmp_side(program, ctx, rhs)?;
            compare(*op, lhs, rhs)
        }
        Condition::Rise { tag, site } => {
            let meta = resolve_tag(program, ctx, tag)?;
            let current = ctx.read(&meta).is_truthy();
            let previous = ctx.observe_edge(edge_key(*site, &meta.name), current);
            Ok(current && !previous)
        }
        Condition::Fall { tag, site } => {
            let meta = resolve_tag(program, ctx, tag)?;
            let current = ctx.read(&meta).is_truthy();
            let previous = ctx.observe_edge(edge_key(*site, &meta.name), current);
            Ok(!current && previous)
        }
    }
}

/// Store with copy semantics: clamp into the destination type, raising
/// the range flag on adjustment. Kind mismatches (text into a number
/// without an explicit conversion) raise the range flag and abort.
pub(crate) fn store_clamped(
    ctx: &mut ScanContext,
    meta: &TagMeta,
    src: &Value,
) -> ExecResult<()> {
    match crate::value::clamp_assign(src, meta.ty) {
        Some(Stored { value, adjusted }) => {
            if adjusted {
                ctx.set_range();
            }
            ctx.write(meta.name.clone(), value);
            Ok(())
        }
        None => {
            ctx.set_range();
            Err(Interrupt::Range)
        }
    }
}

/// Store a math result with wrap semantics, raising the range flag when
/// the value wrapped. A text destination is operand corruption.
pub(crate) fn store_wrapped(
    ctx: &mut ScanContext,
    meta: &TagMeta,
    result: Number,
) -> ExecResult<()> {
    match crate::value::wrap_assign(result, meta.ty) {
        Some(Stored { value, adjusted }) => {
            if adjusted {
                ctx.set_range();
            }
            ctx.write(meta.name.clone(), value);
            Ok(())
        }
        None => Err(Interrupt::FatalMath),
    }
}

/// Store without flags, for engine-managed cells (counters, sequencer
/// state) whose saturation is part of the instruction contract.
pub(crate) fn store_quiet(ctx: &mut ScanContext, meta: &TagMeta, src: &Value) {
    if let Some(Stored { value, .. }) = crate::value::clamp_assign(src, meta.ty) {
        ctx.write(meta.name.clone(), value);
    }
}

/// Width in bits of an integer destination for the bit-pack family.
pub(crate) fn pack_width(ty: TagType) -> Option<u32> {
    match ty {
        TagType::Int | TagType::Word => Some(16),
        TagType::Dint => Some(32),
        _ => None,
    }
}
