//! Constants, local variables and operand stack manipulation

use super::{Context, Effect};
use crate::{
    const_pool::ConstPoolItem,
    error::FatalError,
    frame::{Frame, Slot},
    instructions::*,
    jvm::JVMResult,
    resolve, Value,
};

pub(super) fn aconst_null(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    ctx.frame()?.push_ref(None)?;
    Ok(Effect::Advance(1))
}

pub(super) fn iconst(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let value = ctx.opcode as i32 - ICONST_0 as i32;
    ctx.frame()?.push_int(value)?;
    Ok(Effect::Advance(1))
}

pub(super) fn lconst(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let value = (ctx.opcode - LCONST_0) as i64;
    ctx.frame()?.push_long(value)?;
    Ok(Effect::Advance(1))
}

pub(super) fn fconst(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let value = (ctx.opcode - FCONST_0) as f32;
    ctx.frame()?.push_float(value)?;
    Ok(Effect::Advance(1))
}

pub(super) fn dconst(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let value = (ctx.opcode - DCONST_0) as f64;
    ctx.frame()?.push_double(value)?;
    Ok(Effect::Advance(1))
}

pub(super) fn bipush(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let value = ctx.i8_operand(1)? as i32;
    ctx.frame()?.push_int(value)?;
    Ok(Effect::Advance(2))
}

pub(super) fn sipush(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let value = ctx.i16_operand(1)? as i32;
    ctx.frame()?.push_int(value)?;
    Ok(Effect::Advance(3))
}

/// ldc, ldc_w and ldc2_w
pub(super) fn ldc(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let (index, length) = match ctx.opcode {
        LDC => (ctx.u8_operand(1)? as u16, 2),
        _ => (ctx.u16_operand(1)?, 3),
    };
    let class = ctx.frame()?.class.clone();
    let value = match class.const_pool.get(index)? {
        ConstPoolItem::Integer(v) => Value::Int(*v),
        ConstPoolItem::Float(v) => Value::Float(*v),
        ConstPoolItem::Long(v) => Value::Long(*v),
        ConstPoolItem::Double(v) => Value::Double(*v),
        ConstPoolItem::String(_) => resolve::resolve_string(ctx.jvm, &class, index)?.into(),
        ConstPoolItem::Class(_) => {
            let target = resolve::resolve_class_ref(ctx.jvm, &class, index)?;
            ctx.jvm.class_mirror(&target)?.into()
        }
        _ => return Err(FatalError::BadConstant(index).into()),
    };
    if (ctx.opcode == LDC2_W) != (value.slots() == 2) {
        return Err(FatalError::BadConstant(index).into());
    }
    ctx.frame()?.push_value(value)?;
    Ok(Effect::Advance(length))
}

/// `kind` counts from 0 in the order int, long, float, double, reference
fn load_local(frame: &mut Frame, kind: u8, index: usize) -> Result<(), FatalError> {
    match kind {
        0 => {
            let value = frame.load_int(index)?;
            frame.push_int(value)
        }
        1 => {
            let value = frame.load_long(index)?;
            frame.push_long(value)
        }
        2 => {
            let value = frame.load_float(index)?;
            frame.push_float(value)
        }
        3 => {
            let value = frame.load_double(index)?;
            frame.push_double(value)
        }
        _ => {
            let value = frame.load_ref(index)?;
            frame.push_ref(value)
        }
    }
}

fn store_local(frame: &mut Frame, kind: u8, index: usize) -> Result<(), FatalError> {
    match kind {
        0 => {
            let value = frame.pop_int()?;
            frame.store(index, Slot::Int(value))
        }
        1 => {
            let value = frame.pop_long()?;
            frame.store_long(index, value)
        }
        2 => {
            let value = frame.pop_float()?;
            frame.store(index, Slot::Float(value))
        }
        3 => {
            let value = frame.pop_double()?;
            frame.store_double(index, value)
        }
        // astore also takes the return address pushed by jsr
        _ => match frame.pop()? {
            slot @ (Slot::Ref(_) | Slot::ReturnAddress(_)) => frame.store(index, slot),
            other => Err(FatalError::SlotMismatch {
                expected: "reference",
                found: format!("{:?}", other),
            }),
        },
    }
}

pub(super) fn load(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let index = ctx.u8_operand(1)? as usize;
    let kind = ctx.opcode - ILOAD;
    load_local(ctx.frame()?, kind, index)?;
    Ok(Effect::Advance(2))
}

pub(super) fn load_n(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let n = ctx.opcode - ILOAD_0;
    load_local(ctx.frame()?, n / 4, (n % 4) as usize)?;
    Ok(Effect::Advance(1))
}

pub(super) fn store(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let index = ctx.u8_operand(1)? as usize;
    let kind = ctx.opcode - ISTORE;
    store_local(ctx.frame()?, kind, index)?;
    Ok(Effect::Advance(2))
}

pub(super) fn store_n(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let n = ctx.opcode - ISTORE_0;
    store_local(ctx.frame()?, n / 4, (n % 4) as usize)?;
    Ok(Effect::Advance(1))
}

fn increment(frame: &mut Frame, index: usize, delta: i32) -> Result<(), FatalError> {
    let value = frame.load_int(index)?.wrapping_add(delta);
    frame.store(index, Slot::Int(value))
}

pub(super) fn iinc(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let index = ctx.u8_operand(1)? as usize;
    let delta = ctx.i8_operand(2)? as i32;
    increment(ctx.frame()?, index, delta)?;
    Ok(Effect::Advance(3))
}

/// Variants of loads, stores, ret and iinc with 16-bit local indices
pub(super) fn wide(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let opcode = ctx.u8_operand(1)?;
    let index = ctx.u16_operand(2)? as usize;
    match opcode {
        ILOAD..=ALOAD => {
            load_local(ctx.frame()?, opcode - ILOAD, index)?;
            Ok(Effect::Advance(4))
        }
        ISTORE..=ASTORE => {
            store_local(ctx.frame()?, opcode - ISTORE, index)?;
            Ok(Effect::Advance(4))
        }
        RET => {
            let target = ctx.frame()?.load_return_address(index)?;
            Ok(Effect::Jump(target))
        }
        IINC => {
            let delta = ctx.i16_operand(4)? as i32;
            increment(ctx.frame()?, index, delta)?;
            Ok(Effect::Advance(6))
        }
        _ => Err(FatalError::UnknownOpcode {
            opcode,
            pc: ctx.pc + 1,
        }
        .into()),
    }
}

/// pop, pop2, dup*, swap. These work on slots, so a long counts as two values.
pub(super) fn shuffle(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let opcode = ctx.opcode;
    let frame = ctx.frame()?;
    match opcode {
        POP => {
            frame.pop()?;
        }
        POP2 => {
            frame.pop()?;
            frame.pop()?;
        }
        DUP => {
            let v1 = frame.peek(0)?.clone();
            frame.push(v1)?;
        }
        DUP_X1 => {
            let v1 = frame.pop()?;
            let v2 = frame.pop()?;
            push_all(frame, [v1.clone(), v2, v1])?;
        }
        DUP_X2 => {
            let v1 = frame.pop()?;
            let v2 = frame.pop()?;
            let v3 = frame.pop()?;
            push_all(frame, [v1.clone(), v3, v2, v1])?;
        }
        DUP2 => {
            let v1 = frame.pop()?;
            let v2 = frame.pop()?;
            push_all(frame, [v2.clone(), v1.clone(), v2, v1])?;
        }
        DUP2_X1 => {
            let v1 = frame.pop()?;
            let v2 = frame.pop()?;
            let v3 = frame.pop()?;
            push_all(frame, [v2.clone(), v1.clone(), v3, v2, v1])?;
        }
        DUP2_X2 => {
            let v1 = frame.pop()?;
            let v2 = frame.pop()?;
            let v3 = frame.pop()?;
            let v4 = frame.pop()?;
            push_all(frame, [v2.clone(), v1.clone(), v4, v3, v2, v1])?;
        }
        _ => {
            let v1 = frame.pop()?;
            let v2 = frame.pop()?;
            push_all(frame, [v1, v2])?;
        }
    }
    Ok(Effect::Advance(1))
}

fn push_all<const N: usize>(frame: &mut Frame, slots: [Slot; N]) -> Result<(), FatalError> {
    for slot in slots {
        frame.push(slot)?;
    }
    Ok(())
}
