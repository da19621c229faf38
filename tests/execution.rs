mod common;

use common::*;
use jvm_exec::{instructions::*, *};
use pretty_assertions::assert_eq;
use rstest::rstest;

#[test]
fn lcmp_pushes_its_result_and_advances_one_byte() -> anyhow::Result<()> {
    let mut builder = ClassBuilder::new("Compare");
    let [a_hi, a_lo] = idx(builder.pool().long(100));
    let [b_hi, b_lo] = idx(builder.pool().long(99));
    let class = builder
        .method(
            "cmp",
            "()I",
            public_static(),
            Code::new(4, 0, vec![LDC2_W, a_hi, a_lo, LDC2_W, b_hi, b_lo, LCMP, IRETURN]),
        )
        .build();
    let jvm = jvm([class]);
    let method = jvm.resolve_method("Compare", "cmp", "()I")?;
    let mut thread = jvm.new_thread();
    thread.start(&jvm, &method, &[])?;
    for _ in 0..2 {
        thread.step(&jvm)?;
    }
    assert_eq!(thread.current_frame().unwrap().stack().len(), 4);
    thread.step(&jvm)?;

    let frame = thread.current_frame().unwrap();
    assert_eq!(frame.pc(), 7);
    assert_eq!(frame.stack().to_vec(), vec![Slot::Int(1)]);
    thread.step(&jvm)?;
    assert_eq!(thread.status(), ThreadStatus::Terminated);
    assert_eq!(thread.result(), Some(&Some(Value::Int(1))));
    Ok(())
}

#[test]
fn arguments_fill_locals_by_descriptor() -> anyhow::Result<()> {
    let class = ClassBuilder::new("Locals")
        .method("m", "(IDJ)V", public_static(), Code::new(0, 5, vec![RETURN]))
        .build();
    let jvm = jvm([class]);
    let method = jvm.resolve_method("Locals", "m", "(IDJ)V")?;
    let mut thread = jvm.new_thread();
    thread.start(&jvm, &method, &[Value::Int(7), Value::Double(2.5), Value::Long(-2)])?;

    let bits = 2.5f64.to_bits();
    assert_eq!(
        thread.frames()[0].locals().to_vec(),
        vec![
            Slot::Int(7),
            Slot::LowHalfOfDouble(bits as u32),
            Slot::HighHalfOfDouble((bits >> 32) as u32),
            Slot::LowHalfOfLong(-2i64 as u32),
            Slot::HighHalfOfLong(u32::MAX),
        ]
    );
    Ok(())
}

#[test]
fn receiver_takes_local_zero_before_the_arguments() -> anyhow::Result<()> {
    let class = ClassBuilder::new("Locals")
        .method("m", "(IDJ)V", AccessFlags::PUBLIC, Code::new(0, 6, vec![RETURN]))
        .build();
    let jvm = jvm([class]);
    let method = jvm.resolve_method("Locals", "m", "(IDJ)V")?;
    let receiver = jvm.create_object(jvm.resolve_class("Locals").unwrap());
    let mut thread = jvm.new_thread();
    thread.start(
        &jvm,
        &method,
        &[receiver.clone().into(), Value::Int(7), Value::Double(2.5), Value::Long(-2)],
    )?;

    let bits = 2.5f64.to_bits();
    let locals = thread.frames()[0].locals().to_vec();
    assert!(matches!(&locals[0], Slot::Ref(Some(object)) if *object == receiver));
    assert_eq!(
        locals[1..].to_vec(),
        vec![
            Slot::Int(7),
            Slot::LowHalfOfDouble(bits as u32),
            Slot::HighHalfOfDouble((bits >> 32) as u32),
            Slot::LowHalfOfLong(-2i64 as u32),
            Slot::HighHalfOfLong(u32::MAX),
        ]
    );
    Ok(())
}

#[test]
fn float_arguments_are_rounded_from_doubles() -> anyhow::Result<()> {
    let class = ClassBuilder::new("Floats")
        .method("m", "(FD)V", public_static(), Code::new(0, 3, vec![RETURN]))
        .build();
    let jvm = jvm([class]);
    let method = jvm.resolve_method("Floats", "m", "(FD)V")?;
    let mut thread = jvm.new_thread();
    thread.start(&jvm, &method, &[Value::Double(1.3), Value::Double(1.3)])?;

    let bits = 1.3f64.to_bits();
    assert_eq!(
        thread.frames()[0].locals().to_vec(),
        vec![
            Slot::Float(fround(1.3)),
            Slot::LowHalfOfDouble(bits as u32),
            Slot::HighHalfOfDouble((bits >> 32) as u32),
        ]
    );
    Ok(())
}

#[rstest]
#[case(IADD, i32::MAX, 1, i32::MIN)]
#[case(ISUB, i32::MIN, 1, i32::MAX)]
#[case(IMUL, 0x10000, 0x10000, 0)]
#[case(IDIV, i32::MIN, -1, i32::MIN)]
#[case(IDIV, -7, 2, -3)]
#[case(IREM, i32::MIN, -1, 0)]
#[case(IREM, -7, 2, -1)]
#[case(ISHL, 1, 33, 2)]
#[case(ISHR, -16, 2, -4)]
#[case(IUSHR, -1, 28, 15)]
#[case(IAND, 0b1100, 0b1010, 0b1000)]
#[case(IXOR, 0b1100, 0b1010, 0b0110)]
fn int_arithmetic(#[case] op: u8, #[case] a: i32, #[case] b: i32, #[case] expected: i32) -> anyhow::Result<()> {
    let class = ClassBuilder::new("Math")
        .method("op", "(II)I", public_static(), Code::new(2, 2, vec![ILOAD_0, ILOAD_1, op, IRETURN]))
        .build();
    let jvm = jvm([class]);
    let result = run(&jvm, "Math", "op", "(II)I", &[Value::Int(a), Value::Int(b)])?;
    assert_eq!(result, Some(Value::Int(expected)));
    Ok(())
}

#[test]
fn division_by_zero_throws() {
    let class = ClassBuilder::new("Math")
        .method("div", "(II)I", public_static(), Code::new(2, 2, vec![ILOAD_0, ILOAD_1, IDIV, IRETURN]))
        .build();
    let jvm = jvm([class]);
    let result = run(&jvm, "Math", "div", "(II)I", &[Value::Int(1), Value::Int(0)]);
    assert_eq!(
        uncaught(result),
        ("java.lang.ArithmeticException".to_owned(), Some("/ by zero".to_owned()))
    );
}

#[rstest]
#[case(DCMPG, 1)]
#[case(DCMPL, -1)]
fn nan_comparison_depends_on_the_opcode(#[case] op: u8, #[case] expected: i32) -> anyhow::Result<()> {
    let mut builder = ClassBuilder::new("Nan");
    let [hi, lo] = idx(builder.pool().double(f64::NAN));
    let class = builder
        .method("cmp", "()I", public_static(), Code::new(4, 0, vec![LDC2_W, hi, lo, DCONST_0, op, IRETURN]))
        .build();
    let jvm = jvm([class]);
    assert_eq!(run(&jvm, "Nan", "cmp", "()I", &[])?, Some(Value::Int(expected)));
    Ok(())
}

/// `tableswitch` at pc 1 over 1..=3, returning 10/20/30 and -1 by default
fn table_switch_class() -> ClassDef {
    let mut code = vec![ILOAD_0, TABLESWITCH, 0, 0];
    for value in [36, 1, 3, 27, 30, 33] {
        code.extend_from_slice(&i32::to_be_bytes(value));
    }
    code.extend_from_slice(&[BIPUSH, 10, IRETURN, BIPUSH, 20, IRETURN, BIPUSH, 30, IRETURN, ICONST_M1, IRETURN]);
    ClassBuilder::new("Switch")
        .method("table", "(I)I", public_static(), Code::new(1, 1, code))
        .build()
}

#[rstest]
#[case(1, 10)]
#[case(2, 20)]
#[case(3, 30)]
#[case(0, -1)]
#[case(4, -1)]
#[case(i32::MIN, -1)]
#[case(i32::MAX, -1)]
fn tableswitch_jumps_relative_to_the_instruction(#[case] key: i32, #[case] expected: i32) -> anyhow::Result<()> {
    let jvm = jvm([table_switch_class()]);
    assert_eq!(run(&jvm, "Switch", "table", "(I)I", &[Value::Int(key)])?, Some(Value::Int(expected)));
    Ok(())
}

#[rstest]
#[case(-5, 1)]
#[case(100, 2)]
#[case(7, 0)]
fn lookupswitch_matches_sorted_keys(#[case] key: i32, #[case] expected: i32) -> anyhow::Result<()> {
    let mut code = vec![ILOAD_0, LOOKUPSWITCH, 0, 0];
    for value in [33, 2, -5, 27, 100, 30] {
        code.extend_from_slice(&i32::to_be_bytes(value));
    }
    code.extend_from_slice(&[BIPUSH, 1, IRETURN, BIPUSH, 2, IRETURN, ICONST_0, IRETURN]);
    let class = ClassBuilder::new("Switch")
        .method("lookup", "(I)I", public_static(), Code::new(1, 1, code))
        .build();
    let jvm = jvm([class]);
    assert_eq!(run(&jvm, "Switch", "lookup", "(I)I", &[Value::Int(key)])?, Some(Value::Int(expected)));
    Ok(())
}

#[test]
fn oversized_switch_tables_are_fatal() {
    let mut table = vec![ICONST_0, TABLESWITCH, 0, 0];
    for operand in [8, i32::MIN, i32::MAX] {
        table.extend(operand.to_be_bytes());
    }
    let mut lookup = vec![ICONST_0, LOOKUPSWITCH, 0, 0];
    for operand in [8, i32::MAX] {
        lookup.extend(operand.to_be_bytes());
    }
    let class = ClassBuilder::new("Switch")
        .method("table", "()V", public_static(), Code::new(1, 0, table))
        .method("lookup", "()V", public_static(), Code::new(1, 0, lookup))
        .build();
    let jvm = jvm([class]);
    for name in ["table", "lookup"] {
        assert!(matches!(
            run(&jvm, "Switch", name, "()V", &[]),
            Err(Error::Fatal(FatalError::PcOutOfRange(_)))
        ));
    }
}

/// Steps through `prefix` and the branch `op` at its end, returning the pc reached
fn branch_from(op: u8, prefix: &[u8]) -> anyhow::Result<u32> {
    let mut code = prefix.to_vec();
    code.extend([op, 0, 7]);
    code.extend([RETURN; 5]);
    let class = ClassBuilder::new("Branch")
        .method("m", "(Ljava/lang/Object;)V", public_static(), Code::new(2, 1, code))
        .build();
    let jvm = jvm([class]);
    let method = jvm.resolve_method("Branch", "m", "(Ljava/lang/Object;)V")?;
    let mut thread = jvm.new_thread();
    thread.start(&jvm, &method, &[jvm.intern_string("x").unwrap().into()])?;
    for _ in 0..=prefix.len() {
        thread.step(&jvm)?;
    }
    Ok(thread.current_frame().unwrap().pc())
}

#[rstest]
#[case(IFEQ, &[ICONST_0], &[ICONST_1])]
#[case(IFNE, &[ICONST_1], &[ICONST_0])]
#[case(IFLT, &[ICONST_M1], &[ICONST_0])]
#[case(IFGE, &[ICONST_0], &[ICONST_M1])]
#[case(IFGT, &[ICONST_1], &[ICONST_0])]
#[case(IFLE, &[ICONST_0], &[ICONST_1])]
#[case(IF_ICMPEQ, &[ICONST_2, ICONST_2], &[ICONST_1, ICONST_2])]
#[case(IF_ICMPNE, &[ICONST_1, ICONST_2], &[ICONST_2, ICONST_2])]
#[case(IF_ICMPLT, &[ICONST_1, ICONST_2], &[ICONST_2, ICONST_2])]
#[case(IF_ICMPGE, &[ICONST_2, ICONST_2], &[ICONST_1, ICONST_2])]
#[case(IF_ICMPGT, &[ICONST_2, ICONST_1], &[ICONST_2, ICONST_2])]
#[case(IF_ICMPLE, &[ICONST_2, ICONST_2], &[ICONST_2, ICONST_1])]
#[case(IF_ACMPEQ, &[ALOAD_0, ALOAD_0], &[ALOAD_0, ACONST_NULL])]
#[case(IF_ACMPNE, &[ALOAD_0, ACONST_NULL], &[ALOAD_0, ALOAD_0])]
#[case(IFNULL, &[ACONST_NULL], &[ALOAD_0])]
#[case(IFNONNULL, &[ALOAD_0], &[ACONST_NULL])]
fn conditional_branches_are_relative_to_the_opcode(
    #[case] op: u8,
    #[case] taken: &[u8],
    #[case] not_taken: &[u8],
) -> anyhow::Result<()> {
    assert_eq!(branch_from(op, taken)?, taken.len() as u32 + 7);
    assert_eq!(branch_from(op, not_taken)?, not_taken.len() as u32 + 3);
    Ok(())
}

#[rstest]
#[case(atype::BYTE, BASTORE, BALOAD, 128, -128)]
#[case(atype::SHORT, SASTORE, SALOAD, 32768, -32768)]
#[case(atype::CHAR, CASTORE, CALOAD, 0x11111, 0x1111)]
#[case(atype::BOOLEAN, BASTORE, BALOAD, 3, 1)]
#[case(atype::INT, IASTORE, IALOAD, -7, -7)]
fn narrow_array_stores_truncate(
    #[case] element: u8,
    #[case] store: u8,
    #[case] load: u8,
    #[case] value: i32,
    #[case] expected: i32,
) -> anyhow::Result<()> {
    let mut builder = ClassBuilder::new("Arrays");
    let constant = builder.pool().integer(value) as u8;
    let code = vec![
        ICONST_1, NEWARRAY, element, DUP, ICONST_0, LDC, constant, store, ICONST_0, load, IRETURN,
    ];
    let class = builder.method("roundtrip", "()I", public_static(), Code::new(4, 0, code)).build();
    let jvm = jvm([class]);
    assert_eq!(run(&jvm, "Arrays", "roundtrip", "()I", &[])?, Some(Value::Int(expected)));
    Ok(())
}

#[test]
fn null_check_comes_before_bounds_check() {
    let class = ClassBuilder::new("Arrays")
        .method("null", "(I)I", public_static(), Code::new(2, 1, vec![ACONST_NULL, ILOAD_0, IALOAD, IRETURN]))
        .method(
            "small",
            "(I)I",
            public_static(),
            Code::new(2, 1, vec![ICONST_2, NEWARRAY, atype::INT, ILOAD_0, IALOAD, IRETURN]),
        )
        .method(
            "sized",
            "(I)I",
            public_static(),
            Code::new(1, 1, vec![ILOAD_0, NEWARRAY, atype::INT, ARRAYLENGTH, IRETURN]),
        )
        .build();
    let jvm = jvm([class]);

    for index in [-1, 2, 7] {
        let (class, _) = uncaught(run(&jvm, "Arrays", "null", "(I)I", &[Value::Int(index)]));
        assert_eq!(class, "java.lang.NullPointerException");
    }
    for index in [-1, 2] {
        assert_eq!(
            uncaught(run(&jvm, "Arrays", "small", "(I)I", &[Value::Int(index)])),
            (
                "java.lang.ArrayIndexOutOfBoundsException".to_owned(),
                Some(format!("Index {index} out of bounds for length 2"))
            )
        );
    }
    for index in [0, 1] {
        assert!(matches!(
            run(&jvm, "Arrays", "small", "(I)I", &[Value::Int(index)]),
            Ok(Some(Value::Int(0)))
        ));
    }
    assert_eq!(
        uncaught(run(&jvm, "Arrays", "sized", "(I)I", &[Value::Int(-3)])),
        ("java.lang.NegativeArraySizeException".to_owned(), Some("-3".to_owned()))
    );
    assert!(matches!(
        run(&jvm, "Arrays", "sized", "(I)I", &[Value::Int(3)]),
        Ok(Some(Value::Int(3)))
    ));
}

/// `int[] a = {5, 0}; try { a[index] = 9; } catch (Throwable t) {} return a[0] + a[1];`
fn guarded_store() -> ClassDef {
    let code = vec![
        ICONST_2, NEWARRAY, atype::INT, ASTORE_1,
        ALOAD_1, ICONST_0, ICONST_5, IASTORE,
        ALOAD_1, ILOAD_0, BIPUSH, 9, IASTORE,
        GOTO, 0, 4,
        POP,
        ALOAD_1, ICONST_0, IALOAD, ALOAD_1, ICONST_1, IALOAD, IADD, IRETURN,
    ];
    ClassBuilder::new("Arrays")
        .method(
            "store",
            "(I)I",
            public_static(),
            Code::new(3, 2, code).with_handler(ExceptionHandler {
                start_pc: 8,
                end_pc: 13,
                handler_pc: 16,
                catch_type: 0,
            }),
        )
        .method(
            "nullStore",
            "(I)V",
            public_static(),
            Code::new(3, 1, vec![ACONST_NULL, ILOAD_0, ICONST_1, IASTORE, RETURN]),
        )
        .build()
}

#[rstest]
#[case(0, 9)]
#[case(1, 14)]
#[case(2, 5)]
#[case(-1, 5)]
#[case(i32::MAX, 5)]
fn faulting_store_leaves_the_array_unchanged(#[case] index: i32, #[case] sum: i32) -> anyhow::Result<()> {
    let jvm = jvm([guarded_store()]);
    assert_eq!(run(&jvm, "Arrays", "store", "(I)I", &[Value::Int(index)])?, Some(Value::Int(sum)));
    Ok(())
}

#[test]
fn store_into_null_array_is_a_null_pointer_even_out_of_bounds() {
    let jvm = jvm([guarded_store()]);
    for index in [0, 2, -1] {
        let (class, _) = uncaught(run(&jvm, "Arrays", "nullStore", "(I)V", &[Value::Int(index)]));
        assert_eq!(class, "java.lang.NullPointerException");
    }
}

#[test]
fn string_literals_are_interned() -> anyhow::Result<()> {
    let mut builder = ClassBuilder::new("Strings");
    let pool = builder.pool();
    let hello = pool.string("hello") as u8;
    let [len_hi, len_lo] = idx(pool.method_ref("java/lang/String", "length", "()I"));
    let class = builder
        .method(
            "length",
            "()I",
            public_static(),
            Code::new(1, 0, vec![LDC, hello, INVOKEVIRTUAL, len_hi, len_lo, IRETURN]),
        )
        .method(
            "same",
            "()Z",
            public_static(),
            Code::new(2, 0, vec![LDC, hello, LDC, hello, IF_ACMPNE, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN]),
        )
        .method("get", "()Ljava/lang/String;", public_static(), Code::new(1, 0, vec![LDC, hello, ARETURN]))
        .build();
    let jvm = jvm([class]);

    assert_eq!(run(&jvm, "Strings", "length", "()I", &[])?, Some(Value::Int(5)));
    assert_eq!(run(&jvm, "Strings", "same", "()Z", &[])?, Some(Value::Int(1)));
    let string = run(&jvm, "Strings", "get", "()Ljava/lang/String;", &[])?.unwrap();
    let string = string.as_object().unwrap();
    assert_eq!(jvm.string_value(string).as_deref(), Some("hello"));
    assert!(string.ptr_eq(&jvm.intern_string("hello").unwrap()));
    Ok(())
}

#[test]
fn wide_iinc_and_goto_w_loop() -> anyhow::Result<()> {
    // sum = 0; for (i = 0; i < 10; i++) sum += i;
    let mut code = vec![
        ICONST_0, ISTORE_0, ICONST_0, ISTORE_1,
        ILOAD_1, BIPUSH, 10, IF_ICMPGE, 0, 18,
        ILOAD_0, ILOAD_1, IADD, ISTORE_0,
        WIDE, IINC, 0, 1, 0, 1,
        GOTO_W,
    ];
    code.extend_from_slice(&(-16i32).to_be_bytes());
    code.extend_from_slice(&[ILOAD_0, IRETURN]);
    let class = ClassBuilder::new("Loop")
        .method("sum", "()I", public_static(), Code::new(2, 2, code))
        .build();
    let jvm = jvm([class]);
    assert_eq!(run(&jvm, "Loop", "sum", "()I", &[])?, Some(Value::Int(45)));
    Ok(())
}
