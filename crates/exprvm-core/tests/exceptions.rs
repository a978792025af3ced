mod common;

use std::sync::Arc;

use common::{
    assert_fault, block, compile, emit_record, emit_throw_new, emit_throw_value, emit_try, emit_try_fault, recorder,
    Catch, Counter,
};
use exprvm_core::instruction::CompareOp;
use exprvm_core::{
    DebugInfo, Exception, ExceptionKind, InstructionList, Interpreter, InterpreterConfig, Span, Type, TypeCode, Value,
};

fn with_counter(local_count: usize, build: impl FnOnce(&mut InstructionList)) -> (Interpreter, Counter) {
    let mut list = InstructionList::new();
    build(&mut list);
    let interpreter = Interpreter::new("test", list.to_array(), &Counter::locals(local_count));
    (interpreter, Counter::new())
}

#[test]
fn test_finally_runs_when_exception_propagates() {
    let (interpreter, counter) = with_counter(0, |list| {
        emit_try(
            list,
            false,
            |l| emit_throw_new(l, ExceptionKind::InvalidOperation, "boom"),
            Vec::new(),
            block(Counter::emit_increment),
        );
    });
    let exception = assert_fault(counter.invoke(&interpreter), ExceptionKind::InvalidOperation);
    assert_eq!(exception.message(), "boom");
    assert_eq!(counter.value(), Value::Int32(1));
}

#[test]
fn test_finally_runs_on_normal_exit() {
    let (interpreter, counter) = with_counter(0, |list| {
        emit_try(
            list,
            true,
            |l| l.emit_load(Value::Int32(7)),
            Vec::new(),
            block(Counter::emit_increment),
        );
    });
    assert_eq!(counter.invoke(&interpreter).unwrap(), Value::Int32(7));
    assert_eq!(counter.value(), Value::Int32(1));
}

#[test]
fn test_unmatched_catch_does_not_run() {
    let (interpreter, counter) = with_counter(1, |list| {
        emit_try(
            list,
            false,
            |l| emit_throw_new(l, ExceptionKind::InvalidOperation, "not arithmetic"),
            vec![Catch::new(ExceptionKind::ArithmeticException.ty(), 0, Counter::emit_increment)],
            None,
        );
    });
    assert_fault(counter.invoke(&interpreter), ExceptionKind::InvalidOperation);
    assert_eq!(counter.value(), Value::Int32(0));
}

#[test]
fn test_first_matching_catch_wins() {
    let result = compile(1, |list| {
        emit_try(
            list,
            true,
            |l| emit_throw_value(l, ExceptionKind::DivideByZero, "zero"),
            vec![
                Catch::new(ExceptionKind::Overflow.ty(), 0, |l| l.emit_load(Value::Int32(1))),
                Catch::new(ExceptionKind::ArithmeticException.ty(), 0, |l| l.emit_load(Value::Int32(2))),
                Catch::new(ExceptionKind::Exception.ty(), 0, |l| l.emit_load(Value::Int32(3))),
            ],
            None,
        );
    })
    .invoke(&[])
    .unwrap();
    assert_eq!(result, Value::Int32(2));
}

#[test]
fn test_catch_receives_exception() {
    let result = compile(1, |list| {
        emit_try(
            list,
            true,
            |l| emit_throw_value(l, ExceptionKind::Argument, "bad input"),
            vec![Catch::new(ExceptionKind::Exception.ty(), 0, |l| l.emit_load_local(0))],
            None,
        );
    })
    .invoke(&[])
    .unwrap();
    let exception = result.as_exception().expect("catch should yield the exception");
    assert!(exception.is_kind(ExceptionKind::Argument));
    assert_eq!(exception.message(), "bad input");
}

#[test]
fn test_user_exception_caught_by_base_class() {
    let parse_error = Type::exception("ParseError", Some(ExceptionKind::InvalidOperation.ty()));
    let result = compile(1, |list| {
        emit_try(
            list,
            true,
            |l| {
                l.emit_load(Value::string("unexpected token"));
                l.emit_new(&parse_error, 1);
                l.emit_throw();
            },
            vec![
                Catch::new(ExceptionKind::ArithmeticException.ty(), 0, |l| l.emit_load(Value::Int32(1))),
                Catch::new(ExceptionKind::SystemException.ty(), 0, |l| l.emit_load(Value::Int32(2))),
            ],
            None,
        );
    })
    .invoke(&[])
    .unwrap();
    assert_eq!(result, Value::Int32(2));
}

#[test]
fn test_filter_selects_handler() {
    let result = compile(1, |list| {
        emit_try(
            list,
            true,
            |l| emit_throw_value(l, ExceptionKind::InvalidOperation, "state"),
            vec![
                Catch::new(ExceptionKind::Exception.ty(), 0, |l| l.emit_load(Value::Int32(1)))
                    .when(|l| l.emit_load(Value::Bool(false))),
                Catch::new(ExceptionKind::Exception.ty(), 0, |l| l.emit_load(Value::Int32(2))).when(|l| {
                    l.emit_load_local(0);
                    l.emit_type_is(&ExceptionKind::InvalidOperation.ty());
                }),
                Catch::new(ExceptionKind::Exception.ty(), 0, |l| l.emit_load(Value::Int32(3))),
            ],
            None,
        );
    })
    .invoke(&[])
    .unwrap();
    assert_eq!(result, Value::Int32(2));
}

#[test]
fn test_faulting_filter_does_not_match() {
    let int = Type::int32();
    let result = compile(1, |list| {
        emit_try(
            list,
            true,
            |l| emit_throw_value(l, ExceptionKind::InvalidOperation, "state"),
            vec![
                Catch::new(ExceptionKind::Exception.ty(), 0, |l| l.emit_load(Value::Int32(1))).when(|l| {
                    l.emit_load(Value::Int32(1));
                    l.emit_load(Value::Int32(0));
                    l.emit_div(&int);
                    l.emit_load(Value::Int32(0));
                    l.emit_compare(CompareOp::Equal, &int, false);
                }),
                Catch::new(ExceptionKind::Exception.ty(), 0, |l| l.emit_load(Value::Int32(3))),
            ],
            None,
        );
    })
    .invoke(&[])
    .unwrap();
    assert_eq!(result, Value::Int32(3));
}

#[test]
fn test_rethrow_propagates_same_exception() {
    let thrown = Exception::of_kind(ExceptionKind::Argument, "bad argument");
    let (interpreter, counter) = with_counter(1, |list| {
        emit_try(
            list,
            false,
            |l| {
                l.emit_load(Value::Exception(thrown.clone()));
                l.emit_throw_void();
            },
            vec![Catch::new(ExceptionKind::Exception.ty(), 0, |l| l.emit_rethrow_void())],
            block(Counter::emit_increment),
        );
    });
    let exception = assert_fault(counter.invoke(&interpreter), ExceptionKind::Argument);
    assert!(Arc::ptr_eq(&exception, &thrown));
    assert_eq!(exception.message(), "bad argument");
    assert_eq!(counter.value(), Value::Int32(1));
}

#[test]
fn test_throw_from_catch_reaches_outer_handler() {
    let (interpreter, counter) = with_counter(2, |list| {
        emit_try(
            list,
            false,
            |l| {
                emit_try(
                    l,
                    false,
                    |l| emit_throw_new(l, ExceptionKind::InvalidOperation, "inner"),
                    vec![Catch::new(ExceptionKind::Exception.ty(), 0, |l| {
                        emit_throw_new(l, ExceptionKind::Overflow, "from catch")
                    })],
                    None,
                );
            },
            vec![Catch::new(ExceptionKind::Overflow.ty(), 1, Counter::emit_increment)],
            None,
        );
    });
    assert_eq!(counter.invoke(&interpreter).unwrap(), Value::Null);
    assert_eq!(counter.value(), Value::Int32(1));
}

#[test]
fn test_goto_out_of_nested_finally_blocks() {
    let (record, log) = recorder();
    let result = compile(0, |list| {
        let target = list.make_label();
        emit_try(
            list,
            false,
            |l| {
                emit_try(
                    l,
                    false,
                    |l| {
                        emit_record(l, &record, 0);
                        l.emit_goto(target, false, false, false);
                    },
                    Vec::new(),
                    block(|l| emit_record(l, &record, 1)),
                );
            },
            Vec::new(),
            block(|l| emit_record(l, &record, 2)),
        );
        emit_record(list, &record, 9);
        list.mark_label(target);
        emit_record(list, &record, 3);
    })
    .invoke(&[]);
    assert!(result.is_ok());
    assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
}

#[test]
fn test_finally_order_on_fault() {
    let (record, log) = recorder();
    let result = compile(0, |list| {
        emit_try(
            list,
            false,
            |l| {
                emit_try(
                    l,
                    false,
                    |l| emit_throw_new(l, ExceptionKind::InvalidOperation, "deep"),
                    Vec::new(),
                    block(|l| emit_record(l, &record, 1)),
                );
            },
            Vec::new(),
            block(|l| emit_record(l, &record, 2)),
        );
    })
    .invoke(&[]);
    assert_fault(result, ExceptionKind::InvalidOperation);
    assert_eq!(*log.lock(), vec![1, 2]);
}

#[test]
fn test_fault_block_runs_only_on_fault() {
    let (record, log) = recorder();
    let quiet = compile(0, |list| {
        emit_try_fault(list, |l| emit_record(l, &record, 0), |l| emit_record(l, &record, 1));
        emit_record(list, &record, 2);
    })
    .invoke(&[]);
    assert!(quiet.is_ok());
    assert_eq!(*log.lock(), vec![0, 2]);

    log.lock().clear();
    let faulted = compile(0, |list| {
        emit_try_fault(
            list,
            |l| {
                emit_record(l, &record, 0);
                emit_throw_new(l, ExceptionKind::InvalidCast, "bad cast");
            },
            |l| emit_record(l, &record, 1),
        );
        emit_record(list, &record, 2);
    })
    .invoke(&[]);
    assert_fault(faulted, ExceptionKind::InvalidCast);
    assert_eq!(*log.lock(), vec![0, 1]);
}

#[test]
fn test_exception_in_finally_replaces_pending_one() {
    let result = compile(0, |list| {
        emit_try(
            list,
            false,
            |l| emit_throw_new(l, ExceptionKind::InvalidOperation, "first"),
            Vec::new(),
            block(|l| emit_throw_new(l, ExceptionKind::Overflow, "second")),
        );
    })
    .invoke(&[]);
    let exception = assert_fault(result, ExceptionKind::Overflow);
    assert_eq!(exception.message(), "second");
}

#[test]
fn test_throwing_null_is_null_reference() {
    let result = compile(0, |list| {
        list.emit_load(Value::Null);
        list.emit_throw_void();
    })
    .invoke(&[]);
    assert_fault(result, ExceptionKind::NullReference);
}

#[test]
fn test_stack_trace_uses_debug_info() {
    let int = Type::primitive(TypeCode::Int32);
    let interpreter = compile(0, |list| {
        list.emit_load(Value::Int32(1));
        list.emit_load(Value::Int32(0));
        list.emit_div(&int);
    })
    .with_debug_info(vec![
        DebugInfo::new(0, "calc.expr", Span::from_positions(3, 7, 3, 12)),
        DebugInfo::new(2, "calc.expr", Span::from_positions(4, 2, 4, 9)),
    ]);
    let exception = assert_fault(interpreter.invoke(&[]), ExceptionKind::DivideByZero);
    let trace = exception.stack_trace();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].file.as_deref(), Some("calc.expr"));
    assert_eq!((trace[0].line, trace[0].column), (4, 2));
    assert_eq!(trace[0].instruction_index, 2);
    assert!(exception.format().contains("calc.expr:4:2"));
}

#[test]
fn test_stack_trace_capture_can_be_disabled() {
    let interpreter = compile(0, |list| emit_throw_new(list, ExceptionKind::InvalidOperation, "quiet"))
        .with_config(InterpreterConfig::new().with_capture_stack_trace(false));
    let exception = assert_fault(interpreter.invoke(&[]), ExceptionKind::InvalidOperation);
    assert!(!exception.has_stack_trace());
}
