//! Array creation and element access

use super::{raise, Context, Effect};
use crate::{
    error::FatalError,
    exception::ExceptionKind,
    instructions::*,
    jvm::JVMResult,
    object::Object,
    resolve, Typ, Value,
};

fn non_null(array: Option<Object>) -> JVMResult<Object> {
    match array {
        Some(array) => Ok(array),
        None => raise(ExceptionKind::NullPointer, "array is null"),
    }
}

fn check_bounds(array: &Object, index: i32) -> JVMResult<()> {
    let length = array.array_len().ok_or_else(|| FatalError::SlotMismatch {
        expected: "array",
        found: format!("{:?}", array),
    })?;
    if index < 0 || index >= length {
        return raise(
            ExceptionKind::ArrayIndexOutOfBounds,
            format!("Index {index} out of bounds for length {length}"),
        );
    }
    Ok(())
}

/// Stack type handled by an xaload/xastore, counted from iaload/iastore
fn element_kind(index: u8) -> &'static str {
    match index {
        1 => "long",
        2 => "float",
        3 => "double",
        4 => "reference",
        _ => "int",
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Int(_) => "int",
        Value::Long(_) => "long",
        Value::Float(_) => "float",
        Value::Double(_) => "double",
        Value::Ref(_) => "reference",
    }
}

pub(super) fn array_load(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let expected = element_kind(ctx.opcode - IALOAD);
    let frame = ctx.frame()?;
    let index = frame.pop_int()?;
    let array = non_null(frame.pop_ref()?)?;
    check_bounds(&array, index)?;
    let value = array
        .array_get(index)
        .filter(|value| kind_of(value) == expected)
        .ok_or_else(|| FatalError::SlotMismatch {
            expected,
            found: format!("{:?}", array),
        })?;
    frame.push_value(value)?;
    Ok(Effect::Advance(1))
}

pub(super) fn array_store(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let kind = ctx.opcode - IASTORE;
    let frame = ctx.frame()?;
    let value = match kind {
        1 => Value::Long(frame.pop_long()?),
        2 => Value::Float(frame.pop_float()?),
        3 => Value::Double(frame.pop_double()?),
        4 => Value::Ref(frame.pop_ref()?),
        _ => Value::Int(frame.pop_int()?),
    };
    let index = frame.pop_int()?;
    let array = non_null(frame.pop_ref()?)?;
    check_bounds(&array, index)?;

    if let (Some(element), Some(component)) = (value.as_object(), &array.class().component) {
        if !element.class().assignable_to(component) {
            return raise(ExceptionKind::ArrayStore, element.class().name());
        }
    }
    // byte arrays also hold booleans, so bastore stores into either
    let fits = match (kind, array.class().element_type()) {
        (5, Some(Typ::Byte | Typ::Boolean))
        | (6, Some(Typ::Char))
        | (7, Some(Typ::Short))
        | (0, Some(Typ::Int))
        | (1, Some(Typ::Long))
        | (2, Some(Typ::Float))
        | (3, Some(Typ::Double))
        | (4, Some(Typ::Ref(_))) => true,
        _ => false,
    };
    if !fits {
        return Err(FatalError::SlotMismatch {
            expected: element_kind(kind),
            found: format!("{:?}", array),
        }
        .into());
    }
    array.array_set(index, value).ok_or_else(|| FatalError::SlotMismatch {
        expected: element_kind(kind),
        found: format!("{:?}", array),
    })?;
    Ok(Effect::Advance(1))
}

pub(super) fn newarray(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let atype = ctx.u8_operand(1)?;
    let element = Typ::from_atype(atype).ok_or(FatalError::BadDescriptor(format!("atype {atype}")))?;
    let class = ctx.jvm.array_class(&element)?;
    let length = ctx.frame()?.pop_int()?;
    let array = ctx.jvm.create_array(class, length)?;
    ctx.frame()?.push_ref(Some(array))?;
    Ok(Effect::Advance(2))
}

pub(super) fn anewarray(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let index = ctx.u16_operand(1)?;
    let current = ctx.frame()?.class.clone();
    let component = resolve::resolve_class_ref(ctx.jvm, &current, index)?;
    let class = ctx.jvm.array_class(&Typ::Ref(component.name.clone()))?;
    let length = ctx.frame()?.pop_int()?;
    let array = ctx.jvm.create_array(class, length)?;
    ctx.frame()?.push_ref(Some(array))?;
    Ok(Effect::Advance(3))
}

pub(super) fn multianewarray(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let index = ctx.u16_operand(1)?;
    let dimensions = ctx.u8_operand(3)? as usize;
    let current = ctx.frame()?.class.clone();
    let class = resolve::resolve_class_ref(ctx.jvm, &current, index)?;
    let available = Typ::Ref(class.name.clone()).array_dimensions();
    if dimensions == 0 || dimensions > available {
        return Err(FatalError::BadConstant(index).into());
    }
    let frame = ctx.frame()?;
    let mut counts = (0..dimensions)
        .map(|_| frame.pop_int())
        .collect::<Result<Vec<_>, _>>()?;
    counts.reverse();
    if let Some(negative) = counts.iter().find(|&&count| count < 0) {
        return raise(ExceptionKind::NegativeArraySize, negative.to_string());
    }
    let array = ctx.jvm.create_multi_array(class, &counts)?;
    ctx.frame()?.push_ref(Some(array))?;
    Ok(Effect::Advance(4))
}

pub(super) fn arraylength(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let frame = ctx.frame()?;
    let array = non_null(frame.pop_ref()?)?;
    let length = array.array_len().ok_or_else(|| FatalError::SlotMismatch {
        expected: "array",
        found: format!("{:?}", array),
    })?;
    frame.push_int(length)?;
    Ok(Effect::Advance(1))
}
