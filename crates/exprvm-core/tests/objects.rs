mod common;

use std::sync::Arc;

use common::{assert_fault, compile, eval};
use exprvm_core::instruction::HostMethod;
use exprvm_core::{
    DebugInfo, Exception, ExceptionKind, FieldInfo, InterpreterConfig, Span, Type, TypeCode, Value,
};

fn node() -> Type {
    Type::class(
        "Node",
        None,
        vec![FieldInfo::new("Value", Type::int32()), FieldInfo::new("Next", Type::object())],
    )
}

fn half() -> Arc<HostMethod> {
    Arc::new(HostMethod::new("Math.Half", 1, true, |args| match &args[0] {
        Value::Int32(n) if n % 2 == 0 => Ok(Value::Int32(n / 2)),
        Value::Int32(n) => Err(Exception::of_kind(ExceptionKind::Argument, format!("{} is odd", n))),
        other => Err(Exception::invalid_cast(format!("expected Int32, got {}", other.type_name()))),
    }))
}

#[test]
fn test_new_fills_missing_fields_with_defaults() {
    let node = node();
    let result = eval(|list| {
        list.emit_load(Value::Int32(5));
        list.emit_new(&node, 1);
    })
    .unwrap();
    match result {
        Value::Object(object) => {
            let object = object.lock();
            assert_eq!(object.ty, node);
            assert_eq!(object.fields, vec![Value::Int32(5), Value::Null]);
        }
        other => panic!("expected an object, got {}", other),
    }
}

#[test]
fn test_store_then_load_field() {
    let node = node();
    let result = compile(1, |list| {
        list.emit_new(&node, 0);
        list.emit_store_local(0);
        list.emit_load_local(0);
        list.emit_load(Value::Int32(9));
        list.emit_store_field(0);
        list.emit_load_local(0);
        list.emit_load_field(0);
    })
    .invoke(&[])
    .unwrap();
    assert_eq!(result, Value::Int32(9));
}

#[test]
fn test_field_access_on_null() {
    assert_fault(
        eval(|list| {
            list.emit_load(Value::Null);
            list.emit_load_field(0);
        }),
        ExceptionKind::NullReference,
    );
}

#[test]
fn test_type_tests_follow_inheritance() {
    let node = node();
    let leaf = Type::class("Leaf", Some(node.clone()), node.fields().to_vec());
    let is_node = eval(|list| {
        list.emit_new(&leaf, 0);
        list.emit_type_is(&node);
    })
    .unwrap();
    assert_eq!(is_node, Value::Bool(true));

    let as_string = eval(|list| {
        list.emit_new(&leaf, 0);
        list.emit_type_as(&Type::string());
    })
    .unwrap();
    assert_eq!(as_string, Value::Null);

    let null_is = eval(|list| {
        list.emit_load(Value::Null);
        list.emit_type_is(&Type::object());
    })
    .unwrap();
    assert_eq!(null_is, Value::Bool(false));
}

#[test]
fn test_cast() {
    let node = node();
    let leaf = Type::class("Leaf", Some(node.clone()), Vec::new());
    let upcast = eval(|list| {
        list.emit_new(&leaf, 0);
        list.emit_cast(&node);
        list.emit_type_is(&leaf);
    })
    .unwrap();
    assert_eq!(upcast, Value::Bool(true));

    assert_fault(
        eval(|list| {
            list.emit_new(&node, 0);
            list.emit_cast(&leaf);
        }),
        ExceptionKind::InvalidCast,
    );
    assert_fault(
        eval(|list| {
            list.emit_load(Value::Null);
            list.emit_cast(&Type::int32());
        }),
        ExceptionKind::NullReference,
    );
    let null_string = eval(|list| {
        list.emit_load(Value::Null);
        list.emit_cast(&Type::string());
    })
    .unwrap();
    assert_eq!(null_string, Value::Null);

    let unboxed = eval(|list| {
        list.emit_load(Value::Int32(4));
        list.emit_cast(&Type::nullable(TypeCode::Int32));
    })
    .unwrap();
    assert_eq!(unboxed, Value::Int32(4));
}

#[test]
fn test_null_check() {
    assert_fault(
        eval(|list| {
            list.emit_load(Value::Null);
            list.emit_null_check();
        }),
        ExceptionKind::NullReference,
    );
    let passed = eval(|list| {
        list.emit_load(Value::string("ok"));
        list.emit_null_check();
    })
    .unwrap();
    assert_eq!(passed, Value::string("ok"));
}

#[test]
fn test_array_store_and_load() {
    let int = Type::int32();
    let result = eval(|list| {
        list.emit_load(Value::Int32(3));
        list.emit_new_array(&int);
        list.emit_dup();
        list.emit_load(Value::Int32(1));
        list.emit_load(Value::Int32(7));
        list.emit_set_array_item();
        list.emit_load(Value::Int32(1));
        list.emit_get_array_item();
    })
    .unwrap();
    assert_eq!(result, Value::Int32(7));

    let untouched = eval(|list| {
        list.emit_load(Value::Int32(3));
        list.emit_new_array(&int);
        list.emit_load(Value::Int32(2));
        list.emit_get_array_item();
    })
    .unwrap();
    assert_eq!(untouched, Value::Int32(0));
}

#[test]
fn test_array_initializer_keeps_order() {
    let int = Type::int32();
    let build = |read: fn(&mut exprvm_core::InstructionList)| {
        eval(|list| {
            list.emit_load(Value::Int32(10));
            list.emit_load(Value::Int32(20));
            list.emit_load(Value::Int32(30));
            list.emit_new_array_init(&int, 3);
            read(list);
        })
        .unwrap()
    };
    assert_eq!(build(|list| list.emit_array_length()), Value::Int32(3));
    assert_eq!(
        build(|list| {
            list.emit_load(Value::Int32(0));
            list.emit_get_array_item();
        }),
        Value::Int32(10)
    );
}

#[test]
fn test_array_faults() {
    let int = Type::int32();
    assert_fault(
        eval(|list| {
            list.emit_load(Value::Int32(1));
            list.emit_new_array_init(&int, 1);
            list.emit_load(Value::Int32(1));
            list.emit_get_array_item();
        }),
        ExceptionKind::IndexOutOfRange,
    );
    assert_fault(
        eval(|list| {
            list.emit_load(Value::Int32(-1));
            list.emit_new_array(&int);
        }),
        ExceptionKind::Overflow,
    );
    assert_fault(
        eval(|list| {
            list.emit_load(Value::Null);
            list.emit_array_length();
        }),
        ExceptionKind::NullReference,
    );
}

#[test]
fn test_host_call_passes_arguments_in_order() {
    let sub = Arc::new(HostMethod::new("Math.Sub", 2, true, |args| match (&args[0], &args[1]) {
        (Value::Int32(a), Value::Int32(b)) => Ok(Value::Int32(a - b)),
        _ => Err(Exception::invalid_operation("expected two Int32 values")),
    }));
    let result = eval(|list| {
        list.emit_load(Value::Int32(10));
        list.emit_load(Value::Int32(3));
        list.emit_call(sub.clone());
    })
    .unwrap();
    assert_eq!(result, Value::Int32(7));
}

#[test]
fn test_host_call_fault_records_call_site() {
    let half = half();
    let interpreter = compile(0, |list| {
        list.emit_load(Value::Int32(8));
        list.emit_call(half.clone());
        list.emit_call(half.clone());
        list.emit_call(half.clone());
        list.emit_call(half.clone());
    })
    .with_debug_info(vec![DebugInfo::new(4, "halve.expr", Span::from_positions(2, 5, 2, 14))]);

    let exception = assert_fault(interpreter.invoke(&[]), ExceptionKind::Argument);
    assert_eq!(exception.message(), "1 is odd");
    let trace = exception.stack_trace();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].instruction_index, 4);
    assert_eq!(trace[0].function_name, "test");
    assert_eq!(trace[0].to_string(), "  at test (halve.expr:2:5)");
}

#[test]
fn test_traced_execution_gives_same_result() {
    let config = InterpreterConfig::from_json(r#"{ "trace_execution": true }"#).unwrap();
    let int = Type::int32();
    let interpreter = compile(0, |list| {
        list.emit_load(Value::Int32(20));
        list.emit_load(Value::Int32(22));
        list.emit_add(&int, false);
    })
    .with_config(config);
    assert!(interpreter.config().trace_execution);
    assert_eq!(interpreter.invoke(&[]).unwrap(), Value::Int32(42));
}
