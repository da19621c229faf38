//! Arithmetic, conversions and comparisons with Java semantics:
//! integer arithmetic wraps, shift distances are masked, float to int conversions saturate.

use super::{raise, Context, Effect};
use crate::{exception::ExceptionKind, instructions::*, jvm::JVMResult};

/// Result of lcmp
pub fn compare_longs(a: i64, b: i64) -> i32 {
    a.cmp(&b) as i32
}

/// Result of fcmpl (`nan` = -1) or fcmpg (`nan` = 1)
pub fn compare_floats(a: f32, b: f32, nan: i32) -> i32 {
    compare_doubles(a as f64, b as f64, nan)
}

/// Result of dcmpl (`nan` = -1) or dcmpg (`nan` = 1)
pub fn compare_doubles(a: f64, b: f64, nan: i32) -> i32 {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering as i32,
        None => nan,
    }
}

fn division_by_zero<T>() -> JVMResult<T> {
    raise(ExceptionKind::Arithmetic, "/ by zero")
}

fn int_op(opcode: u8, a: i32, b: i32) -> JVMResult<i32> {
    Ok(match opcode {
        IADD => a.wrapping_add(b),
        ISUB => a.wrapping_sub(b),
        IMUL => a.wrapping_mul(b),
        IDIV if b == 0 => return division_by_zero(),
        IDIV => a.wrapping_div(b),
        IREM if b == 0 => return division_by_zero(),
        IREM => a.wrapping_rem(b),
        ISHL => a << (b & 0x1f),
        ISHR => a >> (b & 0x1f),
        IUSHR => ((a as u32) >> (b & 0x1f)) as i32,
        IAND => a & b,
        IOR => a | b,
        _ => a ^ b,
    })
}

fn long_op(opcode: u8, a: i64, b: i64) -> JVMResult<i64> {
    Ok(match opcode {
        LADD => a.wrapping_add(b),
        LSUB => a.wrapping_sub(b),
        LMUL => a.wrapping_mul(b),
        LDIV if b == 0 => return division_by_zero(),
        LDIV => a.wrapping_div(b),
        LREM if b == 0 => return division_by_zero(),
        LREM => a.wrapping_rem(b),
        LAND => a & b,
        LOR => a | b,
        _ => a ^ b,
    })
}

fn long_shift(opcode: u8, a: i64, b: i32) -> i64 {
    let distance = b & 0x3f;
    match opcode {
        LSHL => a << distance,
        LSHR => a >> distance,
        _ => ((a as u64) >> distance) as i64,
    }
}

/// `%` on floats is fmod, which is what frem/drem specify
fn float_op(opcode: u8, a: f64, b: f64) -> f64 {
    match opcode {
        FADD | DADD => a + b,
        FSUB | DSUB => a - b,
        FMUL | DMUL => a * b,
        FDIV | DDIV => a / b,
        _ => a % b,
    }
}

/// iadd through lxor, including negation and shifts
pub(super) fn arithmetic(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let opcode = ctx.opcode;
    let frame = ctx.frame()?;
    match opcode {
        INEG => {
            let a = frame.pop_int()?;
            frame.push_int(a.wrapping_neg())?;
        }
        LNEG => {
            let a = frame.pop_long()?;
            frame.push_long(a.wrapping_neg())?;
        }
        FNEG => {
            let a = frame.pop_float()?;
            frame.push_float(-a)?;
        }
        DNEG => {
            let a = frame.pop_double()?;
            frame.push_double(-a)?;
        }
        LSHL | LSHR | LUSHR => {
            let b = frame.pop_int()?;
            let a = frame.pop_long()?;
            frame.push_long(long_shift(opcode, a, b))?;
        }
        IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR => {
            let b = frame.pop_int()?;
            let a = frame.pop_int()?;
            frame.push_int(int_op(opcode, a, b)?)?;
        }
        LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR => {
            let b = frame.pop_long()?;
            let a = frame.pop_long()?;
            frame.push_long(long_op(opcode, a, b)?)?;
        }
        FADD | FSUB | FMUL | FDIV | FREM => {
            let b = frame.pop_float()?;
            let a = frame.pop_float()?;
            // f32 operations computed in f64 round to the same result for + - * / and fmod
            let result = match opcode {
                FREM => a % b,
                _ => float_op(opcode, a as f64, b as f64) as f32,
            };
            frame.push_float(result)?;
        }
        _ => {
            let b = frame.pop_double()?;
            let a = frame.pop_double()?;
            frame.push_double(float_op(opcode, a, b))?;
        }
    }
    Ok(Effect::Advance(1))
}

/// i2l through i2s
pub(super) fn convert(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let opcode = ctx.opcode;
    let frame = ctx.frame()?;
    match opcode {
        I2L => {
            let v = frame.pop_int()?;
            frame.push_long(v as i64)?;
        }
        I2F => {
            let v = frame.pop_int()?;
            frame.push_float(v as f32)?;
        }
        I2D => {
            let v = frame.pop_int()?;
            frame.push_double(v as f64)?;
        }
        L2I => {
            let v = frame.pop_long()?;
            frame.push_int(v as i32)?;
        }
        L2F => {
            let v = frame.pop_long()?;
            frame.push_float(v as f32)?;
        }
        L2D => {
            let v = frame.pop_long()?;
            frame.push_double(v as f64)?;
        }
        F2I => {
            let v = frame.pop_float()?;
            frame.push_int(v as i32)?;
        }
        F2L => {
            let v = frame.pop_float()?;
            frame.push_long(v as i64)?;
        }
        F2D => {
            let v = frame.pop_float()?;
            frame.push_double(v as f64)?;
        }
        D2I => {
            let v = frame.pop_double()?;
            frame.push_int(v as i32)?;
        }
        D2L => {
            let v = frame.pop_double()?;
            frame.push_long(v as i64)?;
        }
        D2F => {
            let v = frame.pop_double()?;
            frame.push_float(crate::fround(v))?;
        }
        I2B => {
            let v = frame.pop_int()?;
            frame.push_int(v as i8 as i32)?;
        }
        I2C => {
            let v = frame.pop_int()?;
            frame.push_int(v as u16 as i32)?;
        }
        _ => {
            let v = frame.pop_int()?;
            frame.push_int(v as i16 as i32)?;
        }
    }
    Ok(Effect::Advance(1))
}

/// lcmp, fcmpl, fcmpg, dcmpl, dcmpg
pub(super) fn compare(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let opcode = ctx.opcode;
    let frame = ctx.frame()?;
    let result = match opcode {
        LCMP => {
            let b = frame.pop_long()?;
            let a = frame.pop_long()?;
            compare_longs(a, b)
        }
        FCMPL | FCMPG => {
            let b = frame.pop_float()?;
            let a = frame.pop_float()?;
            compare_floats(a, b, if opcode == FCMPL { -1 } else { 1 })
        }
        _ => {
            let b = frame.pop_double()?;
            let a = frame.pop_double()?;
            compare_doubles(a, b, if opcode == DCMPL { -1 } else { 1 })
        }
    };
    frame.push_int(result)?;
    Ok(Effect::Advance(1))
}
