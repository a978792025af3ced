// Shared helpers for driving programs through InstructionList + Interpreter.
#![allow(dead_code)]

use std::sync::Arc;

use exprvm_core::instruction::{ExceptionFilter, ExceptionHandler, HostMethod, TryCatchFinallyHandler, TryFaultHandler};
use exprvm_core::{
    CellArena, CellId, ExceptionKind, ExceptionRef, InstructionList, Interpreter, LocalVariables, Type, Value,
};
use parking_lot::Mutex;

pub type Emit<'a> = Box<dyn FnOnce(&mut InstructionList) + 'a>;

/// Compiles a program with `local_count` plain locals and no closure.
pub fn compile(local_count: usize, build: impl FnOnce(&mut InstructionList)) -> Interpreter {
    let mut locals = LocalVariables::new();
    for i in 0..local_count {
        locals.define_local(&format!("local{}", i), 0);
    }
    let mut list = InstructionList::new();
    build(&mut list);
    Interpreter::new("test", list.to_array(), &locals)
}

pub fn eval(build: impl FnOnce(&mut InstructionList)) -> Result<Value, ExceptionRef> {
    compile(0, build).invoke(&[])
}

/// Evaluates `left op right` built by `emit_op`.
pub fn eval_binary(left: Value, right: Value, emit_op: impl FnOnce(&mut InstructionList)) -> Result<Value, ExceptionRef> {
    eval(|list| {
        list.emit_load(left);
        list.emit_load(right);
        emit_op(list);
    })
}

pub fn assert_fault(result: Result<Value, ExceptionRef>, kind: ExceptionKind) -> ExceptionRef {
    match result {
        Ok(value) => panic!("expected {}, got {}", kind.name(), value),
        Err(exception) => {
            assert!(exception.is_kind(kind), "expected {}, got {}", kind.name(), exception);
            exception
        }
    }
}

/// A closure with a single Int32 cell named "counter".
pub struct Counter {
    pub cells: CellArena,
    pub cell: CellId,
}

impl Counter {
    pub fn new() -> Self {
        let cells = CellArena::new();
        let cell = cells.alloc(Value::Int32(0));
        Self { cells, cell }
    }

    pub fn locals(local_count: usize) -> LocalVariables {
        let mut locals = LocalVariables::new();
        for i in 0..local_count {
            locals.define_local(&format!("local{}", i), 0);
        }
        locals.add_closure_variable("counter");
        locals
    }

    pub fn invoke(&self, interpreter: &Interpreter) -> Result<Value, ExceptionRef> {
        interpreter.invoke_with_closure(&[], vec![self.cell], self.cells.clone())
    }

    pub fn value(&self) -> Value {
        self.cells.get(self.cell)
    }

    /// counter += 1, leaving the stack unchanged.
    pub fn emit_increment(list: &mut InstructionList) {
        list.emit_load_local_from_closure(0);
        list.emit_load(Value::Int32(1));
        list.emit_add(&Type::int32(), false);
        list.emit_assign_local_to_closure(0);
        list.emit_pop();
    }
}

/// Host method appending its Int32 argument to a shared log.
pub fn recorder() -> (Arc<HostMethod>, Arc<Mutex<Vec<i32>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let method = HostMethod::new("Log.Record", 1, false, move |args| {
        if let Value::Int32(n) = args[0] {
            sink.lock().push(n);
        }
        Ok(Value::Null)
    });
    (Arc::new(method), log)
}

pub fn emit_record(list: &mut InstructionList, recorder: &Arc<HostMethod>, n: i32) {
    list.emit_load(Value::Int32(n));
    list.emit_call(recorder.clone());
}

pub fn emit_throw_new(list: &mut InstructionList, kind: ExceptionKind, message: &str) {
    list.emit_load(Value::string(message));
    list.emit_new(&kind.ty(), 1);
    list.emit_throw_void();
}

pub fn block<'a>(emit: impl FnOnce(&mut InstructionList) + 'a) -> Option<Emit<'a>> {
    Some(Box::new(emit))
}

/// Throws a new `kind` exception from a region that produces a value.
pub fn emit_throw_value(list: &mut InstructionList, kind: ExceptionKind, message: &str) {
    list.emit_load(Value::string(message));
    list.emit_new(&kind.ty(), 1);
    list.emit_throw();
}

pub struct Catch<'a> {
    pub ty: Type,
    /// Slot the caught exception is stored in.
    pub local: usize,
    /// Leaves a Boolean on the stack.
    pub filter: Option<Emit<'a>>,
    pub body: Emit<'a>,
}

impl<'a> Catch<'a> {
    pub fn new(ty: Type, local: usize, body: impl FnOnce(&mut InstructionList) + 'a) -> Self {
        Self {
            ty,
            local,
            filter: None,
            body: Box::new(body),
        }
    }

    pub fn when(mut self, filter: impl FnOnce(&mut InstructionList) + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

/// Emits a try/catch/finally region laid out the way a compiler lowers one.
pub fn emit_try(
    list: &mut InstructionList,
    has_value: bool,
    body: impl FnOnce(&mut InstructionList),
    catches: Vec<Catch<'_>>,
    finally: Option<Emit<'_>>,
) {
    let end = list.make_label();
    let goto_end = list.make_label();
    let start_of_finally = finally.as_ref().map(|_| list.make_label());
    let try_start = match start_of_finally {
        Some(label) => list.emit_enter_try_finally(label),
        None => list.emit_enter_try_catch(),
    };

    body(list);
    let try_end = list.count();
    list.mark_label(goto_end);
    list.emit_goto(end, has_value, has_value, has_value);

    let mut handlers = Vec::new();
    for catch in catches {
        let filter = catch.filter.map(|filter| {
            list.emit_enter_exception_filter(has_value);
            let label = list.mark_runtime_label();
            let start = list.count();
            list.emit_store_local(catch.local);
            filter(list);
            let filter = ExceptionFilter::new(label, start, list.count());
            list.emit_leave_exception_filter(has_value);
            filter
        });
        list.emit_enter_exception_handler(has_value);
        let label = list.mark_runtime_label();
        let start = list.count();
        list.emit_store_local(catch.local);
        (catch.body)(list);
        list.emit_leave_exception_handler(has_value, goto_end);
        handlers.push(ExceptionHandler::new(label, start, list.count(), catch.ty, filter));
    }

    let handler = match (start_of_finally, finally) {
        (Some(label), Some(finally)) => {
            list.mark_label(label);
            let finally_start = list.count();
            list.emit_enter_finally(label);
            finally(list);
            list.emit_leave_finally();
            TryCatchFinallyHandler::try_finally(try_start, try_end, try_end, finally_start, list.count(), handlers)
        }
        _ => TryCatchFinallyHandler::try_catch(try_start, try_end, try_end, handlers),
    };
    list.set_try_handler(try_start, handler);
    list.mark_label(end);
}

/// Emits a void try/fault region.
pub fn emit_try_fault(
    list: &mut InstructionList,
    body: impl FnOnce(&mut InstructionList),
    fault: impl FnOnce(&mut InstructionList),
) {
    let end = list.make_label();
    let fault_start = list.make_label();
    let try_start = list.emit_enter_try_fault(fault_start);
    body(list);
    let try_end = list.count();
    list.emit_goto(end, false, false, false);

    list.mark_label(fault_start);
    let fault_index = list.count();
    list.emit_enter_fault(fault_start);
    fault(list);
    list.emit_leave_fault();
    list.set_try_fault_handler(
        try_start,
        TryFaultHandler::new(try_start, try_end, fault_index, list.count()),
    );
    list.mark_label(end);
}
