//! The invocation protocol shared by the four invoke instructions:
//! resolve, initialize, check, select, marshal, then push a frame or call the native bridge.

use std::sync::Arc;

use tracing::debug;

use crate::{
    class::{Class, InitCheck},
    class_def::ConstantValue,
    error::FatalError,
    exception::{ExceptionKind, Fault},
    frame::{Frame, FrameKind, MonitorOwner},
    interpreter::{raise, Context, Effect},
    jvm::{JVMResult, Jvm},
    method::{Method, MethodDescriptor},
    native::{NativeCall, NativeFn, NativeOutcome},
    object::Object,
    resolve::{self, MethodRef},
    thread::Thread,
    Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InvokeKind {
    Static,
    Special,
    Virtual,
    Interface,
}

fn external_name(class: &Class) -> String {
    class.name().replace('/', ".")
}

/// Executes an invoke instruction of the given kind at the current pc
pub(crate) fn invoke(ctx: &mut Context<'_>, kind: InvokeKind) -> JVMResult<Effect> {
    let index = ctx.u16_operand(1)?;
    let length = match kind {
        InvokeKind::Interface => 5,
        _ => 3,
    };
    let current = ctx.frame()?.class.clone();
    let MethodRef {
        class,
        method: resolved,
        descriptor,
        interface,
    } = resolve::resolve_method_ref(ctx.jvm, &current, index)?;

    match kind {
        InvokeKind::Interface if !interface => return Err(FatalError::BadConstant(index).into()),
        InvokeKind::Virtual if interface => return Err(FatalError::BadConstant(index).into()),
        _ => {}
    }
    if (kind == InvokeKind::Static) != resolved.is_static() {
        return raise(
            ExceptionKind::IncompatibleClassChange,
            format!(
                "Expected {} method '{:?}'",
                if kind == InvokeKind::Static { "static" } else { "non-static" },
                resolved
            ),
        );
    }
    if resolved.is_initializer()
        && (kind != InvokeKind::Special || !Arc::ptr_eq(&resolved.class(), &class))
    {
        return raise(
            ExceptionKind::NoSuchMethod,
            format!("'{:?}' in {}", resolved, external_name(&class)),
        );
    }

    if kind == InvokeKind::Static {
        if let Some(effect) = initialize(ctx.jvm, ctx.thread, &resolved.class())? {
            return Ok(effect);
        }
    }

    let receiver = if kind == InvokeKind::Static {
        None
    } else {
        match ctx.frame()?.peek_ref(descriptor.arg_slots())? {
            Some(receiver) => Some(receiver),
            None => {
                return raise(
                    ExceptionKind::NullPointer,
                    format!(
                        "Cannot invoke \"{}.{}()\" because value is null",
                        external_name(&class),
                        resolved.name()
                    ),
                )
            }
        }
    };

    let method = match (kind, &receiver) {
        (InvokeKind::Static, _) | (_, None) => resolved,
        (InvokeKind::Special, Some(_)) => {
            resolve::select_special(ctx.jvm, &current, &class, &resolved)?
        }
        (InvokeKind::Virtual, Some(receiver)) => {
            resolve::select_virtual(receiver.class(), &resolved)?
        }
        (InvokeKind::Interface, Some(receiver)) => {
            if !receiver.class().is_subclass_of(&class) {
                return raise(
                    ExceptionKind::IncompatibleClassChange,
                    format!(
                        "Class {} does not implement the requested interface {}",
                        external_name(receiver.class()),
                        external_name(&class)
                    ),
                );
            }
            let selected = resolve::select_virtual(receiver.class(), &resolved)?;
            if !selected.is_private()
                && !selected.access_flags().contains(crate::AccessFlags::PUBLIC)
            {
                return raise(
                    ExceptionKind::IllegalAccess,
                    format!("'{:?}' is not public", selected),
                );
            }
            selected
        }
    };

    enter(ctx, method, descriptor, receiver, length)
}

/// Calls a selected method: natives run right away, bytecode methods get a new frame
fn enter(
    ctx: &mut Context<'_>,
    method: Arc<Method>,
    descriptor: MethodDescriptor,
    receiver: Option<Object>,
    length: u32,
) -> JVMResult<Effect> {
    if method.is_abstract() {
        return raise(ExceptionKind::AbstractMethod, format!("{:?}", method));
    }
    let native = if method.is_native() {
        Some(native_handler(ctx.jvm, &method)?)
    } else {
        None
    };

    let thread = ctx.thread.id();
    let monitor = if method.is_synchronized() {
        let owner = match &receiver {
            Some(receiver) => MonitorOwner::Object(receiver.clone()),
            None => MonitorOwner::Class(method.class()),
        };
        if !owner.monitor().try_enter(thread) {
            return Ok(Effect::Block);
        }
        Some(owner)
    } else {
        None
    };

    let frame = ctx.frame()?;
    let mut args = frame.pop_args(&descriptor.0)?;
    if receiver.is_some() {
        args.insert(0, Value::Ref(frame.pop_ref()?));
    }

    let Some(handler) = native else {
        let mut frame = Frame::new(method, args, length, FrameKind::Method)?;
        frame.monitor = monitor;
        return Ok(Effect::Invoke(frame));
    };

    let result = run_native(ctx.jvm, ctx.thread, &*handler, &method, &descriptor, args);
    if let Some(owner) = &monitor {
        owner.monitor().exit(thread);
    }
    match result? {
        NativeOutcome::Return(value) => {
            push_return(ctx.frame()?, &method, &descriptor, value)?;
            Ok(Effect::Advance(length))
        }
        NativeOutcome::Park(timeout) => {
            push_return(ctx.frame()?, &method, &descriptor, None)?;
            Ok(Effect::Park {
                advance: length,
                timeout,
            })
        }
    }
}

/// Pushes a native's result, converted to the call site's return type.
/// A parked native that returns a value leaves the type's zero value.
fn push_return(
    frame: &mut Frame,
    method: &Method,
    descriptor: &MethodDescriptor,
    value: Option<Value>,
) -> Result<(), FatalError> {
    let mismatch = || FatalError::ArgumentMismatch(format!("return value of {:?}", method));
    match (&descriptor.1, value) {
        (None, None) => Ok(()),
        (Some(typ), None) => frame.push_value(Value::default_for(typ)),
        (Some(typ), Some(value)) => frame.push_value(value.convert_to(typ).ok_or_else(mismatch)?),
        (None, Some(_)) => Err(mismatch()),
    }
}

pub(crate) fn native_handler(jvm: &Jvm, method: &Method) -> JVMResult<Arc<NativeFn>> {
    match jvm.natives().get(&method.native_key()) {
        Some(handler) => Ok(handler),
        None => raise(ExceptionKind::UnsatisfiedLink, method.native_key()),
    }
}

/// Invokes a native handler with arguments already popped and converted.
/// The trailing `MemberName` of `MethodHandle.linkTo*` is passed separately as the alternate target.
pub(crate) fn run_native(
    jvm: &Jvm,
    thread: &mut Thread,
    handler: &NativeFn,
    method: &Arc<Method>,
    descriptor: &MethodDescriptor,
    mut args: Vec<Value>,
) -> JVMResult<NativeOutcome> {
    let alternate = if method.is_signature_polymorphic() && method.name().starts_with("linkTo") {
        match args.pop() {
            Some(Value::Ref(member)) => member,
            _ => {
                return Err(FatalError::ArgumentMismatch(format!(
                    "{:?} without trailing MemberName",
                    method
                ))
                .into())
            }
        }
    } else {
        None
    };
    let call = NativeCall {
        method: method.clone(),
        descriptor: descriptor.clone(),
        args,
        alternate,
    };
    handler(jvm, thread, call)
}

/// Ensures `class` is initialized before an instruction uses it.
///
/// Returns the effect to apply instead of executing the instruction if it has to wait:
/// either a frame running `<clinit>` that returns to the same instruction,
/// or blocking while another thread initializes the class.
/// Superclasses are initialized first; interfaces are not initialized along with their implementors.
pub(crate) fn initialize(
    jvm: &Jvm,
    thread: &mut Thread,
    class: &Arc<Class>,
) -> JVMResult<Option<Effect>> {
    if class.is_initialized() {
        return Ok(None);
    }
    if !class.is_interface() {
        if let Some(super_class) = &class.super_class {
            if let Some(effect) = initialize(jvm, thread, super_class)? {
                return Ok(Some(effect));
            }
        }
    }
    match class.try_begin_init(thread.id()) {
        InitCheck::Ready => Ok(None),
        InitCheck::Wait => Ok(Some(Effect::Block)),
        InitCheck::Failed => could_not_initialize(class),
        InitCheck::Begin => {
            debug!(class = class.name(), "initializing");
            if let Err(fault) = prepare(jvm, class) {
                let exception = crate::exception::materialize(jvm, fault)?;
                class.finish_init(false);
                return Err(Fault::Thrown(exception));
            }
            match class.initializer() {
                None => {
                    class.finish_init(true);
                    Ok(None)
                }
                Some(initializer) => {
                    let frame =
                        Frame::new(initializer, Vec::new(), 0, FrameKind::Initializer(class.clone()))?;
                    Ok(Some(Effect::Invoke(frame)))
                }
            }
        }
    }
}

pub(crate) fn could_not_initialize<T>(class: &Class) -> JVMResult<T> {
    raise(
        ExceptionKind::NoClassDefFound,
        format!("Could not initialize class {}", external_name(class)),
    )
}

/// Preparation: static fields with a `ConstantValue` get their value before `<clinit>` runs
pub(crate) fn prepare(jvm: &Jvm, class: &Class) -> JVMResult<()> {
    for field in class.fields.values() {
        let Some(constant) = &field.constant else {
            continue;
        };
        let value = match constant {
            ConstantValue::Int(v) => Value::Int(*v),
            ConstantValue::Long(v) => Value::Long(*v),
            ConstantValue::Float(v) => Value::Float(*v),
            ConstantValue::Double(v) => Value::Double(*v),
            ConstantValue::String(v) => jvm.intern_string(v)?.into(),
        };
        field
            .write(&class.static_storage, value)
            .ok_or_else(|| FatalError::BadDescriptor(format!("constant value of {:?}", field)))?;
    }
    Ok(())
}

/// Converts host arguments for a call of `method`, receiver first for instance methods
pub(crate) fn marshal(method: &Method, args: &[Value]) -> Result<Vec<Value>, FatalError> {
    let mismatch = || FatalError::ArgumentMismatch(format!("{:?}", method));
    let receiver = usize::from(!method.is_static());
    let params = &method.descriptor().0;
    if args.len() != params.len() + receiver {
        return Err(mismatch());
    }
    let mut values = Vec::with_capacity(args.len());
    if receiver == 1 {
        match &args[0] {
            Value::Ref(object) => values.push(Value::Ref(object.clone())),
            _ => return Err(mismatch()),
        }
    }
    for (typ, arg) in params.iter().zip(&args[receiver..]) {
        values.push(arg.clone().convert_to(typ).ok_or_else(mismatch)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fround, AccessFlags, ClassBuilder, Code, MemoryClassLoader, Typ};

    #[test]
    fn host_arguments_use_value_set_conversion() {
        let jvm = Jvm::new(MemoryClassLoader::new_boxed([ClassBuilder::new("M")
            .method(
                "m",
                "(FD)V",
                AccessFlags::STATIC,
                Code::new(0, 3, vec![crate::instructions::RETURN]),
            )
            .build()]));
        let class = jvm.resolve_class("M").unwrap();
        let method = class.method("m", "(FD)V").unwrap();
        let args = marshal(&method, &[Value::Double(1.3), Value::Double(1.3)]).unwrap();
        assert_eq!(args, [Value::Float(fround(1.3)), Value::Double(1.3)]);
        assert!(marshal(&method, &[Value::Int(1), Value::Double(1.3)]).is_err());
        assert!(marshal(&method, &[]).is_err());
        assert_eq!(Typ::Float.slots() + Typ::Double.slots(), 3);
    }
}
