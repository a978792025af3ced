mod common;

use std::sync::Arc;

use common::compile;
use exprvm_core::instruction::Instruction;
use exprvm_core::{InstructionArray, Interpreter, Type, Value};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn test_compiled_programs_are_send_and_sync() {
    assert_send_sync::<Interpreter>();
    assert_send_sync::<Instruction>();
    assert_send_sync::<Arc<Instruction>>();
    assert_send_sync::<InstructionArray>();
    assert_send_sync::<Value>();
}

#[test]
fn test_one_interpreter_runs_on_many_threads() {
    let int = Type::int32();
    let interpreter = compile(1, |list| {
        list.emit_load_local(0);
        list.emit_load_local(0);
        list.emit_mul(&int, false);
    });

    let results: Vec<Value> = std::thread::scope(|scope| {
        let handles: Vec<_> = (1..=8)
            .map(|n| {
                let interpreter = &interpreter;
                scope.spawn(move || interpreter.invoke(&[Value::Int32(n)]).unwrap())
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let expected: Vec<Value> = (1..=8).map(|n| Value::Int32(n * n)).collect();
    assert_eq!(results, expected);
}
