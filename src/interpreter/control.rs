//! Branches, switches, subroutines and returns

use std::cmp::Ordering;

use super::{Context, Effect};
use crate::{
    error::FatalError,
    frame::Slot,
    instructions::{self, *},
    jvm::JVMResult,
    Typ,
};

/// Conditions in the order of ifeq, ifne, iflt, ifge, ifgt, ifle
fn holds(condition: u8, ordering: Ordering) -> bool {
    match condition {
        0 => ordering == Ordering::Equal,
        1 => ordering != Ordering::Equal,
        2 => ordering == Ordering::Less,
        3 => ordering != Ordering::Less,
        4 => ordering == Ordering::Greater,
        _ => ordering != Ordering::Greater,
    }
}

fn branch(ctx: &Context<'_>, taken: bool) -> JVMResult<Effect> {
    if taken {
        ctx.jump(ctx.i16_operand(1)? as i32)
    } else {
        Ok(Effect::Advance(3))
    }
}

pub(super) fn if_zero(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let value = ctx.frame()?.pop_int()?;
    branch(ctx, holds(ctx.opcode - IFEQ, value.cmp(&0)))
}

pub(super) fn if_icmp(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let frame = ctx.frame()?;
    let b = frame.pop_int()?;
    let a = frame.pop_int()?;
    branch(ctx, holds(ctx.opcode - IF_ICMPEQ, a.cmp(&b)))
}

pub(super) fn if_acmp(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let frame = ctx.frame()?;
    let b = frame.pop_ref()?;
    let a = frame.pop_ref()?;
    branch(ctx, (a == b) == (ctx.opcode == IF_ACMPEQ))
}

pub(super) fn if_null(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let value = ctx.frame()?.pop_ref()?;
    branch(ctx, value.is_none() == (ctx.opcode == IFNULL))
}

pub(super) fn goto(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let offset = match ctx.opcode {
        GOTO => ctx.i16_operand(1)? as i32,
        _ => ctx.i32_operand(1)?,
    };
    ctx.jump(offset)
}

pub(super) fn jsr(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let (offset, length) = match ctx.opcode {
        JSR => (ctx.i16_operand(1)? as i32, 3),
        _ => (ctx.i32_operand(1)?, 5),
    };
    let target = ctx.branch_target(offset)?;
    let pc = ctx.pc;
    ctx.frame()?.push(Slot::ReturnAddress(pc + length))?;
    Ok(Effect::Jump(target))
}

pub(super) fn ret(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let index = ctx.u8_operand(1)? as usize;
    let target = ctx.frame()?.load_return_address(index)?;
    Ok(Effect::Jump(target))
}

/// Offset from the instruction start to the 4-byte aligned operands of a switch
fn switch_operands(pc: u32) -> u32 {
    ((pc + 4) & !3) - pc
}

/// Offset of entry `index` in a switch table of `stride`-byte entries starting `start` bytes in
fn table_entry(start: u32, index: u32, stride: u32) -> Result<u32, FatalError> {
    index
        .checked_mul(stride)
        .and_then(|offset| offset.checked_add(start))
        .ok_or(FatalError::PcOutOfRange(
            start as i64 + index as i64 * stride as i64,
        ))
}

pub(super) fn tableswitch(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let base = switch_operands(ctx.pc);
    let index = ctx.frame()?.pop_int()?;
    let default = ctx.i32_operand(base)?;
    let low = ctx.i32_operand(base + 4)?;
    let high = ctx.i32_operand(base + 8)?;
    if index < low || index > high {
        return ctx.jump(default);
    }
    let entry = (index as i64 - low as i64) as u32;
    let offset = ctx.i32_operand(table_entry(base + 12, entry, 4)?)?;
    ctx.jump(offset)
}

pub(super) fn lookupswitch(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let base = switch_operands(ctx.pc);
    let key = ctx.frame()?.pop_int()?;
    let default = ctx.i32_operand(base)?;
    let pairs = ctx.i32_operand(base + 4)?;
    let pairs = u32::try_from(pairs).map_err(|_| FatalError::PcOutOfRange(pairs as i64))?;

    // match keys are sorted
    let (mut lo, mut hi) = (0, pairs);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let pair = table_entry(base + 8, mid, 8)?;
        match ctx.i32_operand(pair)?.cmp(&key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return ctx.jump(ctx.i32_operand(table_entry(pair, 1, 4)?)?),
        }
    }
    ctx.jump(default)
}

/// ireturn through return. Values are narrowed to the method's declared return type.
pub(super) fn return_(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let opcode = ctx.opcode;
    let frame = ctx.frame()?;
    let returns = frame.method.nat.typ.1.clone();
    let matches = match (opcode, &returns) {
        (RETURN, None) => true,
        (IRETURN, Some(typ)) => matches!(
            typ,
            Typ::Boolean | Typ::Byte | Typ::Char | Typ::Short | Typ::Int
        ),
        (LRETURN, Some(Typ::Long))
        | (FRETURN, Some(Typ::Float))
        | (DRETURN, Some(Typ::Double))
        | (ARETURN, Some(Typ::Ref(_))) => true,
        _ => false,
    };
    if !matches {
        return Err(FatalError::ReturnMismatch {
            opcode: instructions::name(opcode),
            method: format!("{:?}", frame.method),
        }
        .into());
    }
    let value = match returns {
        Some(typ) => Some(frame.pop_value(&typ)?),
        None => None,
    };
    Ok(Effect::Return(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_operands_are_aligned() {
        assert_eq!(switch_operands(0), 4);
        assert_eq!(switch_operands(1), 3);
        assert_eq!(switch_operands(3), 1);
        assert_eq!(switch_operands(4), 4);
    }

    #[test]
    fn oversized_switch_tables_are_out_of_range() {
        assert_eq!(table_entry(16, 2, 4), Ok(24));
        assert!(matches!(
            table_entry(16, 1 << 31, 4),
            Err(FatalError::PcOutOfRange(offset)) if offset == 16 + (1i64 << 33)
        ));
        assert!(table_entry(12, u32::MAX / 8, 8).is_err());
    }

    #[test]
    fn conditions() {
        assert!(holds(IFLT - IFEQ, 1.cmp(&2)));
        assert!(!holds(IFGT - IFEQ, 2.cmp(&2)));
        assert!(holds(IFGE - IFEQ, 2.cmp(&2)));
        assert!(holds(IFLE - IFEQ, 1.cmp(&2)));
        assert!(holds(IFNE - IFEQ, 1.cmp(&2)));
    }
}
