mod common;

use common::*;
use jvm_exec::{instructions::*, *};
use pretty_assertions::assert_eq;
use rstest::rstest;

/// A class with a no-argument constructor
fn concrete(name: &str, super_class: &str) -> ClassBuilder {
    let mut builder = ClassBuilder::new(name).super_class(Some(super_class));
    let [hi, lo] = idx(builder.pool().method_ref(super_class, "<init>", "()V"));
    builder.method(
        "<init>",
        "()V",
        AccessFlags::PUBLIC,
        Code::new(1, 1, vec![ALOAD_0, INVOKESPECIAL, hi, lo, RETURN]),
    )
}

fn returning(value: u8) -> Code {
    Code::new(1, 1, vec![BIPUSH, value, IRETURN])
}

/// `Caller.run()I` instantiates `class` and calls `owner.name()I` on it
fn caller(class: &str, owner: &str, name: &str, interface: bool) -> ClassDef {
    let mut builder = ClassBuilder::new("Caller");
    let pool = builder.pool();
    let [class_hi, class_lo] = idx(pool.class(class));
    let [init_hi, init_lo] = idx(pool.method_ref(class, "<init>", "()V"));
    let mut code = vec![NEW, class_hi, class_lo, DUP, INVOKESPECIAL, init_hi, init_lo];
    if interface {
        let [hi, lo] = idx(pool.interface_method_ref(owner, name, "()I"));
        code.extend_from_slice(&[INVOKEINTERFACE, hi, lo, 1, 0]);
    } else {
        let [hi, lo] = idx(pool.method_ref(owner, name, "()I"));
        code.extend_from_slice(&[INVOKEVIRTUAL, hi, lo]);
    }
    code.push(IRETURN);
    builder.method("run", "()I", public_static(), Code::new(2, 0, code)).build()
}

fn run_caller(classes: impl IntoIterator<Item = ClassDef>) -> Result<Option<Value>, Error> {
    let jvm = jvm(classes);
    run(&jvm, "Caller", "run", "()I", &[])
}

#[test]
fn overriding_method_is_selected() -> anyhow::Result<()> {
    let base = concrete("Base", "java/lang/Object").method("m", "()I", AccessFlags::PUBLIC, returning(1));
    let sub = concrete("Sub", "Base").method("m", "()I", AccessFlags::PUBLIC, returning(2));
    let result = run_caller([base.build(), sub.build(), caller("Sub", "Base", "m", false)])?;
    assert_eq!(result, Some(Value::Int(2)));
    Ok(())
}

#[test]
fn invokespecial_calls_the_superclass_version() -> anyhow::Result<()> {
    let base = concrete("Base", "java/lang/Object").method("m", "()I", AccessFlags::PUBLIC, returning(1));
    let mut sub = concrete("Sub", "Base").method("m", "()I", AccessFlags::PUBLIC, returning(2));
    let [hi, lo] = idx(sub.pool().method_ref("Base", "m", "()I"));
    let sub = sub.method(
        "viaSuper",
        "()I",
        AccessFlags::PUBLIC,
        Code::new(1, 1, vec![ALOAD_0, INVOKESPECIAL, hi, lo, IRETURN]),
    );
    let result = run_caller([base.build(), sub.build(), caller("Sub", "Sub", "viaSuper", false)])?;
    assert_eq!(result, Some(Value::Int(1)));
    Ok(())
}

#[rstest]
#[case(false)]
#[case(true)]
fn default_method_is_inherited(#[case] through_interface: bool) -> anyhow::Result<()> {
    let a = ClassBuilder::interface("A").method("m", "()I", AccessFlags::PUBLIC, returning(3));
    let c = concrete("C", "java/lang/Object").implements("A");
    let owner = if through_interface { "A" } else { "C" };
    let result = run_caller([a.build(), c.build(), caller("C", owner, "m", through_interface)])?;
    assert_eq!(result, Some(Value::Int(3)));
    Ok(())
}

#[test]
fn conflicting_defaults_are_incompatible() {
    let a = ClassBuilder::interface("A").method("m", "()I", AccessFlags::PUBLIC, returning(1));
    let b = ClassBuilder::interface("B").method("m", "()I", AccessFlags::PUBLIC, returning(2));
    let c = concrete("C", "java/lang/Object").implements("A").implements("B");
    let (class, _) = uncaught(run_caller([a.build(), b.build(), c.build(), caller("C", "C", "m", false)]));
    assert_eq!(class, "java.lang.IncompatibleClassChangeError");
}

#[test]
fn more_specific_default_wins() -> anyhow::Result<()> {
    let a = ClassBuilder::interface("A").method("m", "()I", AccessFlags::PUBLIC, returning(1));
    let b = ClassBuilder::interface("B")
        .implements("A")
        .method("m", "()I", AccessFlags::PUBLIC, returning(2));
    let c = concrete("C", "java/lang/Object").implements("A").implements("B");
    let result = run_caller([a.build(), b.build(), c.build(), caller("C", "A", "m", true)])?;
    assert_eq!(result, Some(Value::Int(2)));
    Ok(())
}

#[test]
fn unimplemented_abstract_method() {
    let base = concrete("Abs", "java/lang/Object")
        .access_flags(AccessFlags::PUBLIC | AccessFlags::SUPER | AccessFlags::ABSTRACT)
        .abstract_method("m", "()I");
    let sub = concrete("Impl", "Abs");
    let (class, _) = uncaught(run_caller([base.build(), sub.build(), caller("Impl", "Abs", "m", false)]));
    assert_eq!(class, "java.lang.AbstractMethodError");
}

#[test]
fn abstract_interface_method_without_implementation() {
    let i = ClassBuilder::interface("I").abstract_method("m", "()I");
    let d = concrete("D", "java/lang/Object").implements("I");
    let (class, _) = uncaught(run_caller([i.build(), d.build(), caller("D", "I", "m", true)]));
    assert_eq!(class, "java.lang.AbstractMethodError");
}

#[test]
fn missing_method_fails_resolution() {
    let c = concrete("C", "java/lang/Object");
    let (class, message) = uncaught(run_caller([c.build(), caller("C", "C", "absent", false)]));
    assert_eq!(class, "java.lang.NoSuchMethodError");
    assert_eq!(message.as_deref(), Some("'absent()I' in C"));
}

#[test]
fn interface_static_methods_are_not_inherited() {
    let i = ClassBuilder::interface("I").method("s", "()I", public_static(), returning(4));
    let c = concrete("C", "java/lang/Object").implements("I");
    let mut builder = ClassBuilder::new("Caller");
    let [hi, lo] = idx(builder.pool().method_ref("C", "s", "()I"));
    let caller = builder
        .method("run", "()I", public_static(), Code::new(1, 0, vec![INVOKESTATIC, hi, lo, IRETURN]))
        .build();
    let (class, message) = uncaught(run_caller([i.build(), c.build(), caller]));
    assert_eq!(class, "java.lang.NoSuchMethodError");
    assert_eq!(message.as_deref(), Some("'s()I' in C"));
}

#[test]
fn missing_class_fails_resolution() {
    let (class, message) = uncaught(run_caller([caller("Nowhere", "Nowhere", "m", false)]));
    assert_eq!(class, "java.lang.NoClassDefFoundError");
    assert_eq!(message.as_deref(), Some("Nowhere"));
}

#[test]
fn invokestatic_of_instance_method_is_incompatible() {
    let c = concrete("C", "java/lang/Object").method("m", "()I", AccessFlags::PUBLIC, returning(1));
    let mut builder = ClassBuilder::new("Caller");
    let [hi, lo] = idx(builder.pool().method_ref("C", "m", "()I"));
    let caller = builder
        .method("run", "()I", public_static(), Code::new(1, 0, vec![INVOKESTATIC, hi, lo, IRETURN]))
        .build();
    let (class, _) = uncaught(run_caller([c.build(), caller]));
    assert_eq!(class, "java.lang.IncompatibleClassChangeError");
}

#[test]
fn virtual_call_on_null_is_npe() {
    let c = concrete("C", "java/lang/Object").method("m", "()I", AccessFlags::PUBLIC, returning(1));
    let mut builder = ClassBuilder::new("Caller");
    let [hi, lo] = idx(builder.pool().method_ref("C", "m", "()I"));
    let caller = builder
        .method(
            "run",
            "()I",
            public_static(),
            Code::new(1, 0, vec![ACONST_NULL, INVOKEVIRTUAL, hi, lo, IRETURN]),
        )
        .build();
    let (class, _) = uncaught(run_caller([c.build(), caller]));
    assert_eq!(class, "java.lang.NullPointerException");
}

/// `Base.x = 1` and `Derived.y = Base.x * 2`, both set by `<clinit>`
fn hierarchy() -> [ClassDef; 2] {
    let mut base = ClassBuilder::new("Base").field("x", "I", public_static());
    let [x_hi, x_lo] = idx(base.pool().field_ref("Base", "x", "I"));
    let base = base.method(
        "<clinit>",
        "()V",
        AccessFlags::STATIC,
        Code::new(1, 0, vec![ICONST_1, PUTSTATIC, x_hi, x_lo, RETURN]),
    );

    let mut derived = ClassBuilder::new("Derived")
        .super_class(Some("Base"))
        .field("y", "I", public_static());
    let [x_hi, x_lo] = idx(derived.pool().field_ref("Base", "x", "I"));
    let [y_hi, y_lo] = idx(derived.pool().field_ref("Derived", "y", "I"));
    let derived = derived
        .method(
            "<clinit>",
            "()V",
            AccessFlags::STATIC,
            Code::new(2, 0, vec![GETSTATIC, x_hi, x_lo, ICONST_2, IMUL, PUTSTATIC, y_hi, y_lo, RETURN]),
        )
        .method("get", "()I", public_static(), Code::new(1, 0, vec![GETSTATIC, y_hi, y_lo, IRETURN]));
    [base.build(), derived.build()]
}

#[test]
fn superclass_is_initialized_first() -> anyhow::Result<()> {
    let jvm = jvm(hierarchy());
    assert_eq!(run(&jvm, "Derived", "get", "()I", &[])?, Some(Value::Int(2)));
    Ok(())
}

#[test]
fn getstatic_initializes_the_hierarchy() -> anyhow::Result<()> {
    let mut reader = ClassBuilder::new("Reader");
    let [hi, lo] = idx(reader.pool().field_ref("Derived", "y", "I"));
    let reader = reader
        .method("run", "()I", public_static(), Code::new(1, 0, vec![GETSTATIC, hi, lo, IRETURN]))
        .build();
    let [base, derived] = hierarchy();
    let jvm = jvm([base, derived, reader]);
    assert_eq!(run(&jvm, "Reader", "run", "()I", &[])?, Some(Value::Int(2)));
    assert!(jvm.resolve_class("Base").unwrap().is_initialized());
    Ok(())
}

#[test]
fn constant_values_are_set_during_preparation() -> anyhow::Result<()> {
    let mut builder = ClassBuilder::new("Const")
        .constant("ANSWER", "I", ConstantValue::Int(42))
        .constant("GREETING", "Ljava/lang/String;", ConstantValue::String("hi".into()));
    let [hi, lo] = idx(builder.pool().field_ref("Const", "ANSWER", "I"));
    let [s_hi, s_lo] = idx(builder.pool().field_ref("Const", "GREETING", "Ljava/lang/String;"));
    let class = builder
        .method("answer", "()I", public_static(), Code::new(1, 0, vec![GETSTATIC, hi, lo, IRETURN]))
        .method(
            "greeting",
            "()Ljava/lang/String;",
            public_static(),
            Code::new(1, 0, vec![GETSTATIC, s_hi, s_lo, ARETURN]),
        )
        .build();
    let jvm = jvm([class]);
    assert_eq!(run(&jvm, "Const", "answer", "()I", &[])?, Some(Value::Int(42)));

    let greeting = run(&jvm, "Const", "greeting", "()Ljava/lang/String;", &[])?.unwrap();
    let greeting = greeting.as_object().unwrap();
    assert!(greeting.ptr_eq(&jvm.intern_string("hi").unwrap()));
    Ok(())
}

#[test]
fn instance_fields_and_checkcast() -> anyhow::Result<()> {
    let mut point = concrete("Point", "java/lang/Object").field("x", "J", AccessFlags::PUBLIC);
    let pool = point.pool();
    let [class_hi, class_lo] = idx(pool.class("Point"));
    let [init_hi, init_lo] = idx(pool.method_ref("Point", "<init>", "()V"));
    let [x_hi, x_lo] = idx(pool.field_ref("Point", "x", "J"));
    let [cast_hi, cast_lo] = idx(pool.class("java/lang/Object"));
    let code = vec![
        NEW, class_hi, class_lo, DUP, INVOKESPECIAL, init_hi, init_lo, ASTORE_0,
        ALOAD_0, LCONST_1, PUTFIELD, x_hi, x_lo,
        ALOAD_0, CHECKCAST, cast_hi, cast_lo, INSTANCEOF, class_hi, class_lo, I2L,
        ALOAD_0, GETFIELD, x_hi, x_lo, LADD, LRETURN,
    ];
    let class = point.method("run", "()J", public_static(), Code::new(4, 1, code)).build();
    let jvm = jvm([class]);
    assert_eq!(run(&jvm, "Point", "run", "()J", &[])?, Some(Value::Long(2)));
    Ok(())
}
