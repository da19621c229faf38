//! Fields, object creation, type checks, monitors and invocation

use std::sync::Arc;

use super::{raise, Context, Effect};
use crate::{
    error::FatalError,
    exception::ExceptionKind,
    field::Field,
    invoke::{self, InvokeKind},
    jvm::JVMResult,
    resolve, AccessFlags,
};

fn external_name(internal: &str) -> String {
    internal.replace('/', ".")
}

fn missing_slot(field: &Field) -> FatalError {
    FatalError::SlotMismatch {
        expected: "field slot",
        found: format!("{:?}", field),
    }
}

/// Resolves the field operand and checks it is (non-)static as the instruction expects
fn field_operand(ctx: &mut Context<'_>, is_static: bool) -> JVMResult<Arc<Field>> {
    let index = ctx.u16_operand(1)?;
    let current = ctx.frame()?.class.clone();
    let field = resolve::resolve_field_ref(ctx.jvm, &current, index)?;
    if field.is_static() != is_static {
        return raise(
            ExceptionKind::IncompatibleClassChange,
            format!(
                "Expected {} field {}.{}",
                if is_static { "static" } else { "non-static" },
                external_name(field.class().name()),
                field.name()
            ),
        );
    }
    Ok(field)
}

/// Final fields may only be assigned by the initializer of their own class
fn check_final_put(ctx: &mut Context<'_>, field: &Field) -> JVMResult<()> {
    if !field.access_flags().contains(AccessFlags::FINAL) {
        return Ok(());
    }
    let initializer = if field.is_static() { "<clinit>" } else { "<init>" };
    let frame = ctx.frame()?;
    let declaring = field.class();
    if Arc::ptr_eq(&frame.class, &declaring) && frame.method.name() == initializer {
        return Ok(());
    }
    raise(
        ExceptionKind::IllegalAccess,
        format!(
            "Update to {}final field {}.{} attempted from a different method ({}) than the initializer method {}",
            if field.is_static() { "static " } else { "" },
            external_name(declaring.name()),
            field.name(),
            frame.method.name(),
            initializer
        ),
    )
}

pub(super) fn getstatic(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let field = field_operand(ctx, true)?;
    let class = field.class();
    if let Some(effect) = invoke::initialize(ctx.jvm, ctx.thread, &class)? {
        return Ok(effect);
    }
    let value = field
        .read(&class.static_storage)
        .ok_or_else(|| missing_slot(&field))?;
    ctx.frame()?.push_value(value)?;
    Ok(Effect::Advance(3))
}

pub(super) fn putstatic(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let field = field_operand(ctx, true)?;
    check_final_put(ctx, &field)?;
    let class = field.class();
    if let Some(effect) = invoke::initialize(ctx.jvm, ctx.thread, &class)? {
        return Ok(effect);
    }
    let value = ctx.frame()?.pop_value(field.typ())?;
    field
        .write(&class.static_storage, value)
        .ok_or_else(|| missing_slot(&field))?;
    Ok(Effect::Advance(3))
}

pub(super) fn getfield(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let field = field_operand(ctx, false)?;
    let frame = ctx.frame()?;
    let Some(object) = frame.pop_ref()? else {
        return raise(
            ExceptionKind::NullPointer,
            format!("Cannot read field \"{}\" because value is null", field.name()),
        );
    };
    let value = field
        .read(object.fields())
        .ok_or_else(|| missing_slot(&field))?;
    frame.push_value(value)?;
    Ok(Effect::Advance(3))
}

pub(super) fn putfield(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let field = field_operand(ctx, false)?;
    check_final_put(ctx, &field)?;
    let frame = ctx.frame()?;
    let value = frame.pop_value(field.typ())?;
    let Some(object) = frame.pop_ref()? else {
        return raise(
            ExceptionKind::NullPointer,
            format!("Cannot assign field \"{}\" because value is null", field.name()),
        );
    };
    field
        .write(object.fields(), value)
        .ok_or_else(|| missing_slot(&field))?;
    Ok(Effect::Advance(3))
}

pub(super) fn invokevirtual(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    invoke::invoke(ctx, InvokeKind::Virtual)
}

pub(super) fn invokespecial(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    invoke::invoke(ctx, InvokeKind::Special)
}

pub(super) fn invokestatic(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    invoke::invoke(ctx, InvokeKind::Static)
}

pub(super) fn invokeinterface(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    invoke::invoke(ctx, InvokeKind::Interface)
}

pub(super) fn invokedynamic(_: &mut Context<'_>) -> JVMResult<Effect> {
    Err(FatalError::Unsupported("invokedynamic").into())
}

pub(super) fn new(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let index = ctx.u16_operand(1)?;
    let current = ctx.frame()?.class.clone();
    let class = resolve::resolve_class_ref(ctx.jvm, &current, index)?;
    if class.is_interface() || class.is_abstract() {
        return raise(ExceptionKind::Instantiation, external_name(class.name()));
    }
    if let Some(effect) = invoke::initialize(ctx.jvm, ctx.thread, &class)? {
        return Ok(effect);
    }
    let object = ctx.jvm.create_object(class);
    ctx.frame()?.push_ref(Some(object))?;
    Ok(Effect::Advance(3))
}

pub(super) fn athrow(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    match ctx.frame()?.pop_ref()? {
        Some(exception) => Ok(Effect::Throw(exception)),
        None => raise(
            ExceptionKind::NullPointer,
            "Cannot throw exception because value is null",
        ),
    }
}

pub(super) fn checkcast(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let index = ctx.u16_operand(1)?;
    let frame = ctx.frame()?;
    // null passes without resolving the class
    let Some(object) = frame.peek_ref(0)? else {
        return Ok(Effect::Advance(3));
    };
    let current = frame.class.clone();
    let target = resolve::resolve_class_ref(ctx.jvm, &current, index)?;
    if !object.class().assignable_to(&target) {
        return raise(
            ExceptionKind::ClassCast,
            format!(
                "class {} cannot be cast to class {}",
                external_name(object.class().name()),
                external_name(target.name())
            ),
        );
    }
    Ok(Effect::Advance(3))
}

pub(super) fn instanceof(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let index = ctx.u16_operand(1)?;
    let frame = ctx.frame()?;
    let result = match frame.peek_ref(0)? {
        None => false,
        Some(object) => {
            let current = frame.class.clone();
            let target = resolve::resolve_class_ref(ctx.jvm, &current, index)?;
            object.class().assignable_to(&target)
        }
    };
    let frame = ctx.frame()?;
    frame.pop()?;
    frame.push_int(result as i32)?;
    Ok(Effect::Advance(3))
}

pub(super) fn monitorenter(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let thread = ctx.thread.id();
    let frame = ctx.frame()?;
    let Some(object) = frame.peek_ref(0)? else {
        return raise(
            ExceptionKind::NullPointer,
            "Cannot enter synchronized block because value is null",
        );
    };
    if !object.monitor().try_enter(thread) {
        return Ok(Effect::Block);
    }
    frame.pop()?;
    Ok(Effect::Advance(1))
}

pub(super) fn monitorexit(ctx: &mut Context<'_>) -> JVMResult<Effect> {
    let thread = ctx.thread.id();
    let Some(object) = ctx.frame()?.pop_ref()? else {
        return raise(
            ExceptionKind::NullPointer,
            "Cannot exit synchronized block because value is null",
        );
    };
    if !object.monitor().exit(thread) {
        return raise(
            ExceptionKind::IllegalMonitorState,
            "current thread is not owner",
        );
    }
    Ok(Effect::Advance(1))
}
