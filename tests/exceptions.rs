mod common;

use common::*;
use jvm_exec::{instructions::*, *};
use pretty_assertions::assert_eq;

const IAE: &str = "java/lang/IllegalArgumentException";

/// `Thrower.fail()V` throws `IllegalArgumentException("bad")`,
/// `Thrower.guarded()I` calls it and returns 7 from a handler for `catch_type`
fn thrower(catch_type: &str) -> ClassDef {
    let mut builder = ClassBuilder::new("Thrower");
    let pool = builder.pool();
    let [class_hi, class_lo] = idx(pool.class(IAE));
    let message = pool.string("bad") as u8;
    let [init_hi, init_lo] = idx(pool.method_ref(IAE, "<init>", "(Ljava/lang/String;)V"));
    let [fail_hi, fail_lo] = idx(pool.method_ref("Thrower", "fail", "()V"));
    let catch_type = pool.class(catch_type);
    builder
        .method(
            "fail",
            "()V",
            public_static(),
            Code::new(
                3,
                0,
                vec![NEW, class_hi, class_lo, DUP, LDC, message, INVOKESPECIAL, init_hi, init_lo, ATHROW],
            ),
        )
        .method(
            "guarded",
            "()I",
            public_static(),
            Code::new(1, 0, vec![INVOKESTATIC, fail_hi, fail_lo, ICONST_0, IRETURN, POP, BIPUSH, 7, IRETURN])
                .with_handler(ExceptionHandler {
                    start_pc: 0,
                    end_pc: 5,
                    handler_pc: 5,
                    catch_type,
                }),
        )
        .build()
}

#[test]
fn handler_in_caller_catches_subclass() -> anyhow::Result<()> {
    let jvm = jvm([thrower("java/lang/RuntimeException")]);
    assert_eq!(run(&jvm, "Thrower", "guarded", "()I", &[])?, Some(Value::Int(7)));
    Ok(())
}

#[test]
fn unrelated_handler_lets_the_exception_escape() {
    let jvm = jvm([thrower("java/lang/ArithmeticException")]);
    assert_eq!(
        uncaught(run(&jvm, "Thrower", "guarded", "()I", &[])),
        ("java.lang.IllegalArgumentException".to_owned(), Some("bad".to_owned()))
    );
}

#[test]
fn engine_exceptions_are_caught_in_the_same_frame() -> anyhow::Result<()> {
    let mut builder = ClassBuilder::new("Math");
    let catch_type = builder.pool().class("java/lang/ArithmeticException");
    let class = builder
        .method(
            "safe",
            "(II)I",
            public_static(),
            Code::new(2, 2, vec![ILOAD_0, ILOAD_1, IDIV, IRETURN, POP, BIPUSH, 42, IRETURN]).with_handler(
                ExceptionHandler {
                    start_pc: 0,
                    end_pc: 4,
                    handler_pc: 4,
                    catch_type,
                },
            ),
        )
        .build();
    let jvm = jvm([class]);
    assert_eq!(
        run(&jvm, "Math", "safe", "(II)I", &[Value::Int(1), Value::Int(0)])?,
        Some(Value::Int(42))
    );
    assert_eq!(
        run(&jvm, "Math", "safe", "(II)I", &[Value::Int(9), Value::Int(3)])?,
        Some(Value::Int(3))
    );
    Ok(())
}

#[test]
fn handler_sees_only_the_exception_on_its_stack() -> anyhow::Result<()> {
    let class = ClassBuilder::new("Stack")
        .method(
            "run",
            "()V",
            public_static(),
            Code::new(3, 0, vec![ICONST_5, ICONST_1, ICONST_0, IDIV, RETURN, NOP, RETURN]).with_handler(
                ExceptionHandler {
                    start_pc: 0,
                    end_pc: 5,
                    handler_pc: 5,
                    catch_type: 0,
                },
            ),
        )
        .build();
    let jvm = jvm([class]);
    let method = jvm.resolve_method("Stack", "run", "()V")?;
    let mut thread = jvm.new_thread();
    thread.start(&jvm, &method, &[])?;
    for _ in 0..4 {
        thread.step(&jvm)?;
    }

    let frame = thread.current_frame().unwrap();
    assert_eq!(frame.pc(), 5);
    assert_eq!(frame.stack().len(), 1);
    let Slot::Ref(Some(exception)) = &frame.stack()[0] else {
        panic!("expected the exception on the stack, got {:?}", frame.stack());
    };
    assert_eq!(exception.class().name(), "java/lang/ArithmeticException");
    Ok(())
}

fn broken() -> ClassDef {
    ClassBuilder::new("Broken")
        .method(
            "<clinit>",
            "()V",
            AccessFlags::STATIC,
            Code::new(2, 0, vec![ICONST_1, ICONST_0, IDIV, POP, RETURN]),
        )
        .method("value", "()I", public_static(), Code::new(1, 0, vec![ICONST_1, IRETURN]))
        .build()
}

fn cause_of(jvm: &Jvm, exception: &Object) -> anyhow::Result<Option<String>> {
    let get_cause = jvm.resolve_method("java/lang/Throwable", "getCause", "()Ljava/lang/Throwable;")?;
    let cause = jvm.invoke(&get_cause, &[exception.clone().into()])?;
    Ok(cause
        .as_ref()
        .and_then(Value::as_object)
        .map(|cause| jvm.describe(cause).0))
}

#[test]
fn failed_initializer_is_wrapped_then_remembered() -> anyhow::Result<()> {
    let jvm = jvm([broken()]);

    let Err(Error::Uncaught { class, exception, .. }) = run(&jvm, "Broken", "value", "()I", &[]) else {
        panic!("initialization should fail");
    };
    assert_eq!(class, "java.lang.ExceptionInInitializerError");
    assert_eq!(cause_of(&jvm, &exception)?.as_deref(), Some("java.lang.ArithmeticException"));

    assert_eq!(
        uncaught(run(&jvm, "Broken", "value", "()I", &[])),
        (
            "java.lang.NoClassDefFoundError".to_owned(),
            Some("Could not initialize class Broken".to_owned())
        )
    );
    Ok(())
}

#[test]
fn initializer_triggered_by_bytecode_fails_the_same_way() -> anyhow::Result<()> {
    let mut builder = ClassBuilder::new("Trigger");
    let [hi, lo] = idx(builder.pool().method_ref("Broken", "value", "()I"));
    let trigger = builder
        .method("run", "()I", public_static(), Code::new(1, 0, vec![INVOKESTATIC, hi, lo, IRETURN]))
        .build();
    let jvm = jvm([broken(), trigger]);

    let Err(Error::Uncaught { class, exception, .. }) = run(&jvm, "Trigger", "run", "()I", &[]) else {
        panic!("initialization should fail");
    };
    assert_eq!(class, "java.lang.ExceptionInInitializerError");
    assert_eq!(cause_of(&jvm, &exception)?.as_deref(), Some("java.lang.ArithmeticException"));

    let (class, _) = uncaught(run(&jvm, "Trigger", "run", "()I", &[]));
    assert_eq!(class, "java.lang.NoClassDefFoundError");
    Ok(())
}

#[test]
fn exiting_an_unowned_monitor_is_illegal() {
    let mut builder = ClassBuilder::new("Lock");
    let lock = builder.pool().string("lock") as u8;
    let class = builder
        .method("run", "()V", public_static(), Code::new(1, 0, vec![LDC, lock, MONITOREXIT, RETURN]))
        .build();
    let jvm = jvm([class]);
    assert_eq!(
        uncaught(run(&jvm, "Lock", "run", "()V", &[])),
        (
            "java.lang.IllegalMonitorStateException".to_owned(),
            Some("current thread is not owner".to_owned())
        )
    );
}

#[test]
fn athrow_of_null_throws_npe() {
    let class = ClassBuilder::new("Null")
        .method("run", "()V", public_static(), Code::new(1, 0, vec![ACONST_NULL, ATHROW]))
        .build();
    let jvm = jvm([class]);
    let (class, _) = uncaught(run(&jvm, "Null", "run", "()V", &[]));
    assert_eq!(class, "java.lang.NullPointerException");
}
