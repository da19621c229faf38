//! The core classes every program links against, defined in code instead of loaded from a JDK,
//! and the natives they declare.

use std::time::Duration;

use tracing::debug;

use crate::{
    class_def::{ClassBuilder, ClassDef},
    error::FatalError,
    exception::{ExceptionKind, Fault},
    instructions::*,
    method::Code,
    native::{NativeCall, NativeOutcome, NativeRegistry, NativeResult},
    thread::Thread,
    AccessFlags, Value,
};

const OBJECT: &str = "java/lang/Object";
const STRING: &str = "java/lang/String";
const THROWABLE: &str = "java/lang/Throwable";

/// Engine exceptions and their superclasses
const THROWABLES: &[(&str, &str)] = &[
    ("java/lang/Exception", THROWABLE),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/Error", THROWABLE),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
    ("java/lang/NoSuchFieldError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoSuchMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/AbstractMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/IllegalAccessError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/InstantiationError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoClassDefFoundError", "java/lang/LinkageError"),
    ("java/lang/ClassCircularityError", "java/lang/LinkageError"),
    ("java/lang/ClassFormatError", "java/lang/LinkageError"),
    ("java/lang/UnsatisfiedLinkError", "java/lang/LinkageError"),
    ("java/lang/ExceptionInInitializerError", "java/lang/LinkageError"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/StackOverflowError", "java/lang/VirtualMachineError"),
    ("java/lang/ThreadDeath", "java/lang/Error"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/ArrayStoreException", "java/lang/RuntimeException"),
    ("java/lang/IllegalMonitorStateException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
];

fn operand(index: u16) -> [u8; 2] {
    index.to_be_bytes()
}

/// The definition of a core class, if `name` is one
pub(crate) fn core_class(name: &str) -> Option<ClassDef> {
    Some(match name {
        OBJECT => ClassBuilder::new(OBJECT)
            .super_class(None)
            .method("<init>", "()V", AccessFlags::PUBLIC, Code::new(0, 1, vec![RETURN]))
            .native("hashCode", "()I", AccessFlags::PUBLIC)
            .native("getClass", "()Ljava/lang/Class;", AccessFlags::PUBLIC | AccessFlags::FINAL)
            .native("wait", "()V", AccessFlags::PUBLIC | AccessFlags::FINAL)
            .native("wait", "(J)V", AccessFlags::PUBLIC | AccessFlags::FINAL)
            .native("notify", "()V", AccessFlags::PUBLIC | AccessFlags::FINAL)
            .native("notifyAll", "()V", AccessFlags::PUBLIC | AccessFlags::FINAL)
            .build(),
        "java/lang/Class" => class_class(),
        STRING => string_class(),
        THROWABLE => throwable_class(),
        "java/lang/Thread" => {
            let mut builder = ClassBuilder::new("java/lang/Thread");
            let init = builder.pool().method_ref(OBJECT, "<init>", "()V");
            let [hi, lo] = operand(init);
            builder
                .method(
                    "<init>",
                    "()V",
                    AccessFlags::PUBLIC,
                    Code::new(1, 1, vec![ALOAD_0, INVOKESPECIAL, hi, lo, RETURN]),
                )
                .native(
                    "dispatchUncaughtException",
                    "(Ljava/lang/Throwable;)V",
                    AccessFlags::PRIVATE,
                )
                .native("sleep", "(J)V", AccessFlags::PUBLIC | AccessFlags::STATIC)
                .native(
                    "currentThread",
                    "()Ljava/lang/Thread;",
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                )
                .native("yield", "()V", AccessFlags::PUBLIC | AccessFlags::STATIC)
                .build()
        }
        "java/lang/System" => ClassBuilder::new("java/lang/System")
            .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER)
            .native(
                "arraycopy",
                "(Ljava/lang/Object;ILjava/lang/Object;II)V",
                AccessFlags::PUBLIC | AccessFlags::STATIC,
            )
            .native(
                "identityHashCode",
                "(Ljava/lang/Object;)I",
                AccessFlags::PUBLIC | AccessFlags::STATIC,
            )
            .build(),
        "java/lang/Float" => ClassBuilder::new("java/lang/Float")
            .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER)
            .native("floatToRawIntBits", "(F)I", AccessFlags::PUBLIC | AccessFlags::STATIC)
            .native("intBitsToFloat", "(I)F", AccessFlags::PUBLIC | AccessFlags::STATIC)
            .build(),
        "java/lang/Double" => ClassBuilder::new("java/lang/Double")
            .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER)
            .native("doubleToRawLongBits", "(D)J", AccessFlags::PUBLIC | AccessFlags::STATIC)
            .native("longBitsToDouble", "(J)D", AccessFlags::PUBLIC | AccessFlags::STATIC)
            .build(),
        "java/lang/Cloneable" => ClassBuilder::interface("java/lang/Cloneable").build(),
        "java/io/Serializable" => ClassBuilder::interface("java/io/Serializable").build(),
        "java/lang/invoke/MethodHandle" => method_handle_class(),
        _ => {
            let (_, super_class) = THROWABLES.iter().find(|(class, _)| *class == name)?;
            exception_class(name, super_class)
        }
    })
}

fn class_class() -> ClassDef {
    let mut builder = ClassBuilder::new("java/lang/Class")
        .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER)
        .field("name", "Ljava/lang/String;", AccessFlags::PRIVATE);
    let name = builder.pool().field_ref("java/lang/Class", "name", "Ljava/lang/String;");
    let [hi, lo] = operand(name);
    builder
        .method(
            "getName",
            "()Ljava/lang/String;",
            AccessFlags::PUBLIC,
            Code::new(1, 1, vec![ALOAD_0, GETFIELD, hi, lo, ARETURN]),
        )
        .build()
}

fn string_class() -> ClassDef {
    let mut builder = ClassBuilder::new(STRING)
        .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER)
        .field("value", "[C", AccessFlags::PRIVATE | AccessFlags::FINAL)
        .field("hash", "I", AccessFlags::PRIVATE);
    let value = builder.pool().field_ref(STRING, "value", "[C");
    let [hi, lo] = operand(value);
    builder
        .method(
            "length",
            "()I",
            AccessFlags::PUBLIC,
            Code::new(1, 1, vec![ALOAD_0, GETFIELD, hi, lo, ARRAYLENGTH, IRETURN]),
        )
        .method(
            "charAt",
            "(I)C",
            AccessFlags::PUBLIC,
            Code::new(2, 2, vec![ALOAD_0, GETFIELD, hi, lo, ILOAD_1, CALOAD, IRETURN]),
        )
        .build()
}

fn throwable_class() -> ClassDef {
    let mut builder = ClassBuilder::new(THROWABLE)
        .implements("java/io/Serializable")
        .field("detailMessage", "Ljava/lang/String;", AccessFlags::PRIVATE)
        .field("cause", "Ljava/lang/Throwable;", AccessFlags::PRIVATE);
    let pool = builder.pool();
    let [init_hi, init_lo] = operand(pool.method_ref(OBJECT, "<init>", "()V"));
    let [msg_hi, msg_lo] = operand(pool.field_ref(THROWABLE, "detailMessage", "Ljava/lang/String;"));
    let [cause_hi, cause_lo] = operand(pool.field_ref(THROWABLE, "cause", "Ljava/lang/Throwable;"));
    builder
        .method(
            "<init>",
            "()V",
            AccessFlags::PUBLIC,
            Code::new(1, 1, vec![ALOAD_0, INVOKESPECIAL, init_hi, init_lo, RETURN]),
        )
        .method(
            "<init>",
            "(Ljava/lang/String;)V",
            AccessFlags::PUBLIC,
            Code::new(
                2,
                2,
                vec![
                    ALOAD_0, INVOKESPECIAL, init_hi, init_lo,
                    ALOAD_0, ALOAD_1, PUTFIELD, msg_hi, msg_lo,
                    RETURN,
                ],
            ),
        )
        .method(
            "<init>",
            "(Ljava/lang/String;Ljava/lang/Throwable;)V",
            AccessFlags::PUBLIC,
            Code::new(
                2,
                3,
                vec![
                    ALOAD_0, INVOKESPECIAL, init_hi, init_lo,
                    ALOAD_0, ALOAD_1, PUTFIELD, msg_hi, msg_lo,
                    ALOAD_0, ALOAD_2, PUTFIELD, cause_hi, cause_lo,
                    RETURN,
                ],
            ),
        )
        .method(
            "getMessage",
            "()Ljava/lang/String;",
            AccessFlags::PUBLIC,
            Code::new(1, 1, vec![ALOAD_0, GETFIELD, msg_hi, msg_lo, ARETURN]),
        )
        .method(
            "getCause",
            "()Ljava/lang/Throwable;",
            AccessFlags::PUBLIC,
            Code::new(1, 1, vec![ALOAD_0, GETFIELD, cause_hi, cause_lo, ARETURN]),
        )
        .build()
}

/// A throwable whose constructors delegate to its superclass
fn exception_class(name: &str, super_class: &str) -> ClassDef {
    let mut builder = ClassBuilder::new(name).super_class(Some(super_class));
    let pool = builder.pool();
    let [hi, lo] = operand(pool.method_ref(super_class, "<init>", "()V"));
    let [msg_hi, msg_lo] = operand(pool.method_ref(super_class, "<init>", "(Ljava/lang/String;)V"));
    builder
        .method(
            "<init>",
            "()V",
            AccessFlags::PUBLIC,
            Code::new(1, 1, vec![ALOAD_0, INVOKESPECIAL, hi, lo, RETURN]),
        )
        .method(
            "<init>",
            "(Ljava/lang/String;)V",
            AccessFlags::PUBLIC,
            Code::new(2, 2, vec![ALOAD_0, ALOAD_1, INVOKESPECIAL, msg_hi, msg_lo, RETURN]),
        )
        .build()
}

/// Only the signature polymorphic entry points; handlers for them are supplied by the host
fn method_handle_class() -> ClassDef {
    const VARARGS_OBJECT: &str = "([Ljava/lang/Object;)Ljava/lang/Object;";
    let polymorphic = AccessFlags::NATIVE | AccessFlags::VARARGS;
    let mut builder = ClassBuilder::new("java/lang/invoke/MethodHandle")
        .access_flags(AccessFlags::PUBLIC | AccessFlags::ABSTRACT | AccessFlags::SUPER);
    for name in ["invoke", "invokeExact"] {
        builder = builder.native(name, VARARGS_OBJECT, AccessFlags::PUBLIC | AccessFlags::FINAL | polymorphic);
    }
    builder = builder.native("invokeBasic", VARARGS_OBJECT, AccessFlags::FINAL | polymorphic);
    for name in ["linkToStatic", "linkToVirtual", "linkToSpecial", "linkToInterface"] {
        builder = builder.native(name, VARARGS_OBJECT, AccessFlags::STATIC | polymorphic);
    }
    builder.build()
}

fn done(value: impl Into<Value>) -> NativeResult {
    Ok(NativeOutcome::Return(Some(value.into())))
}

fn receiver(call: &NativeCall) -> Result<&crate::Object, Fault> {
    call.object(0)
        .ok_or_else(|| Fault::new(ExceptionKind::NullPointer, "receiver is null"))
}

fn not_owner() -> Fault {
    Fault::new(ExceptionKind::IllegalMonitorState, "current thread is not owner")
}

fn timeout(millis: i64) -> Result<Duration, Fault> {
    u64::try_from(millis)
        .map(Duration::from_millis)
        .map_err(|_| Fault::new(ExceptionKind::IllegalArgument, "timeout value is negative"))
}

/// `Object.wait`: releases the monitor and parks until notified, or until the timeout if it isn't zero
fn wait(thread: &mut Thread, call: &NativeCall, millis: i64) -> NativeResult {
    let timeout = timeout(millis)?;
    if !thread.wait_on(receiver(call)?) {
        return Err(not_owner());
    }
    Ok(NativeOutcome::Park((!timeout.is_zero()).then_some(timeout)))
}

fn notify(thread: &Thread, call: &NativeCall, all: bool) -> NativeResult {
    if !receiver(call)?.monitor().notify(thread.id(), all) {
        return Err(not_owner());
    }
    Ok(NativeOutcome::Return(None))
}

/// Registers the handlers of the natives declared by the core classes
pub(crate) fn register_natives(natives: &NativeRegistry) {
    natives.register(OBJECT, "hashCode", "()I", |_, _, call| {
        done(receiver(&call)?.identity_hash())
    });
    natives.register(OBJECT, "getClass", "()Ljava/lang/Class;", |jvm, _, call| {
        done(jvm.class_mirror(receiver(&call)?.class())?)
    });
    natives.register(OBJECT, "wait", "()V", |_, thread, call| wait(thread, &call, 0));
    natives.register(OBJECT, "wait", "(J)V", |_, thread, call| {
        wait(thread, &call, call.long(1))
    });
    natives.register(OBJECT, "notify", "()V", |_, thread, call| notify(thread, &call, false));
    natives.register(OBJECT, "notifyAll", "()V", |_, thread, call| {
        notify(thread, &call, true)
    });

    natives.register(
        "java/lang/Thread",
        "dispatchUncaughtException",
        "(Ljava/lang/Throwable;)V",
        |jvm, thread, call| {
            if let Some(exception) = call.object(1) {
                let (class, message) = jvm.describe(exception);
                debug!(thread = thread.id().as_u64(), class = %class, ?message, "uncaught exception handler");
            }
            Ok(NativeOutcome::Return(None))
        },
    );
    natives.register("java/lang/Thread", "sleep", "(J)V", |_, _, call| {
        Ok(NativeOutcome::Park(Some(timeout(call.long(0))?)))
    });
    natives.register(
        "java/lang/Thread",
        "currentThread",
        "()Ljava/lang/Thread;",
        |jvm, thread, _| done(thread.java_object(jvm)?),
    );
    natives.register("java/lang/Thread", "yield", "()V", |_, _, _| {
        Ok(NativeOutcome::Park(Some(Duration::ZERO)))
    });

    natives.register(
        "java/lang/System",
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        |_, _, call| {
            arraycopy(&call)?;
            Ok(NativeOutcome::Return(None))
        },
    );
    natives.register(
        "java/lang/System",
        "identityHashCode",
        "(Ljava/lang/Object;)I",
        |_, _, call| done(call.object(0).map_or(0, |object| object.identity_hash())),
    );

    natives.register("java/lang/Float", "floatToRawIntBits", "(F)I", |_, _, call| {
        done(call.float(0).to_bits() as i32)
    });
    natives.register("java/lang/Float", "intBitsToFloat", "(I)F", |_, _, call| {
        done(f32::from_bits(call.int(0) as u32))
    });
    natives.register("java/lang/Double", "doubleToRawLongBits", "(D)J", |_, _, call| {
        done(call.double(0).to_bits() as i64)
    });
    natives.register("java/lang/Double", "longBitsToDouble", "(J)D", |_, _, call| {
        done(f64::from_bits(call.long(0) as u64))
    });
}

fn array_store(message: String) -> Fault {
    Fault::new(ExceptionKind::ArrayStore, message)
}

/// `System.arraycopy`: overlapping ranges copy as if through a temporary array.
/// A reference that doesn't fit the destination stops the copy after the elements before it.
fn arraycopy(call: &NativeCall) -> Result<(), Fault> {
    let (Some(src), Some(dest)) = (call.object(0), call.object(2)) else {
        return Err(ExceptionKind::NullPointer.into());
    };
    let (src_pos, dest_pos, length) = (call.int(1), call.int(3), call.int(4));
    let (Some(src_type), Some(dest_type)) = (src.class().element_type(), dest.class().element_type())
    else {
        let culprit = if src.is_array() { dest } else { src };
        return Err(array_store(format!(
            "arraycopy: {} type {} is not an array",
            if src.is_array() { "destination" } else { "source" },
            culprit.class().name().replace('/', ".")
        )));
    };
    if (!src_type.is_reference() || !dest_type.is_reference()) && src_type != dest_type {
        return Err(array_store(format!(
            "arraycopy: type mismatch: can not copy {}[] into {}[]",
            src_type, dest_type
        )));
    }

    let (src_len, dest_len) = (src.array_len().unwrap_or(0), dest.array_len().unwrap_or(0));
    let out_of_bounds = |what: &str, index: i64, len: i32| -> Result<(), Fault> {
        Err(Fault::new(
            ExceptionKind::ArrayIndexOutOfBounds,
            format!("arraycopy: {what} index {index} out of bounds for length {len}"),
        ))
    };
    if src_pos < 0 {
        return out_of_bounds("source", src_pos as i64, src_len);
    }
    if dest_pos < 0 {
        return out_of_bounds("destination", dest_pos as i64, dest_len);
    }
    if length < 0 {
        return out_of_bounds("length", length as i64, src_len);
    }
    if src_pos as i64 + length as i64 > src_len as i64 {
        return out_of_bounds("last source", src_pos as i64 + length as i64, src_len);
    }
    if dest_pos as i64 + length as i64 > dest_len as i64 {
        return out_of_bounds("last destination", dest_pos as i64 + length as i64, dest_len);
    }

    let elements = (src_pos..src_pos + length)
        .map(|index| src.array_get(index).unwrap_or(Value::Ref(None)))
        .collect::<Vec<_>>();
    let component = dest.class().component.clone();
    for (offset, element) in elements.into_iter().enumerate() {
        if let (Some(object), Some(component)) = (element.as_object(), &component) {
            if !object.class().assignable_to(component) {
                return Err(array_store(format!(
                    "arraycopy: element type mismatch: can not cast one of the elements of {} to the type of the destination array, {}",
                    src.class().name().replace('/', "."),
                    component.name().replace('/', ".")
                )));
            }
        }
        dest.array_set(dest_pos + offset as i32, element)
            .ok_or_else(|| FatalError::SlotMismatch {
                expected: "array element",
                found: format!("{:?}", dest),
            })?;
    }
    Ok(())
}
