// Object construction, field access, type tests, host calls and arrays.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::error::{Exception, ExceptionRef, InstrResult, Unwind};
use crate::types::Type;
use crate::vm::frame::Frame;
use crate::vm::value::{ArrayObject, Object, Value};

pub type HostFn = dyn Fn(&[Value]) -> Result<Value, ExceptionRef> + Send + Sync;

/// A native method callable from interpreted code.
pub struct HostMethod {
    name: String,
    arity: usize,
    has_result: bool,
    func: Box<HostFn>,
}

impl HostMethod {
    pub fn new<F>(name: impl Into<String>, arity: usize, has_result: bool, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ExceptionRef> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            has_result,
            func: Box::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn has_result(&self) -> bool {
        self.has_result
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, ExceptionRef> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMethod")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("has_result", &self.has_result)
            .finish()
    }
}

fn null_reference() -> Unwind {
    Unwind::Throw(Exception::null_reference())
}

pub(crate) fn run_new(ty: &Type, arg_count: usize, frame: &mut Frame<'_>) -> InstrResult {
    let args = frame.pop_many(arg_count);
    let value = if ty.is_exception() {
        let message = match args.first() {
            Some(Value::String(message)) => message.to_string(),
            _ => format!("Exception of type '{}' was thrown.", ty),
        };
        Value::Exception(Exception::new(ty.clone(), message))
    } else {
        let defaults = ty.fields().iter().skip(args.len()).map(|f| f.ty.default_value());
        let fields = args.into_iter().chain(defaults).collect();
        Value::Object(Arc::new(Mutex::new(Object::new(ty.clone(), fields))))
    };
    frame.push(value);
    Ok(1)
}

pub(crate) fn run_load_field(index: usize, frame: &mut Frame<'_>) -> InstrResult {
    let value = match frame.pop() {
        Value::Object(obj) => obj.lock().fields[index].clone(),
        Value::Null => return Err(null_reference()),
        other => return Err(not_an_object(&other)),
    };
    frame.push(value);
    Ok(1)
}

pub(crate) fn run_store_field(index: usize, frame: &mut Frame<'_>) -> InstrResult {
    let value = frame.pop();
    match frame.pop() {
        Value::Object(obj) => obj.lock().fields[index] = value,
        Value::Null => return Err(null_reference()),
        other => return Err(not_an_object(&other)),
    }
    Ok(1)
}

fn not_an_object(value: &Value) -> Unwind {
    Unwind::Throw(Exception::invalid_cast(format!(
        "A value of type {} has no fields",
        value.type_name()
    )))
}

pub(crate) fn run_type_is(ty: &Type, frame: &mut Frame<'_>) -> InstrResult {
    let value = frame.pop();
    frame.push(Value::Bool(ty.is_instance(&value)));
    Ok(1)
}

pub(crate) fn run_type_as(ty: &Type, frame: &mut Frame<'_>) -> InstrResult {
    let value = frame.pop();
    frame.push(if ty.is_instance(&value) { value } else { Value::Null });
    Ok(1)
}

pub(crate) fn run_cast(ty: &Type, frame: &mut Frame<'_>) -> InstrResult {
    let value = frame.peek();
    if value.is_null() {
        if !ty.accepts_null() {
            return Err(null_reference());
        }
    } else if !ty.is_instance(value) {
        return Err(Unwind::Throw(Exception::invalid_cast(format!(
            "Unable to cast a value of type {} to {}",
            value.type_name(),
            ty
        ))));
    }
    Ok(1)
}

pub(crate) fn run_null_check(frame: &mut Frame<'_>) -> InstrResult {
    if frame.peek().is_null() {
        return Err(null_reference());
    }
    Ok(1)
}

pub(crate) fn run_call(method: &HostMethod, frame: &mut Frame<'_>) -> InstrResult {
    let args = frame.pop_many(method.arity);
    match method.invoke(&args) {
        Ok(result) => {
            if method.has_result {
                frame.push(result);
            }
            Ok(1)
        }
        Err(exception) => {
            if frame.interpreter().config().capture_stack_trace {
                exception.push_frame(frame.trace_frame());
            }
            Err(Unwind::Throw(exception))
        }
    }
}

fn array_length(value: &Value) -> Result<usize, Unwind> {
    match value {
        Value::Int32(n) => usize::try_from(*n).map_err(|_| Unwind::Throw(Exception::overflow())),
        Value::Null => Err(null_reference()),
        other => Err(Unwind::Throw(Exception::invalid_cast(format!(
            "Array size must be Int32, got {}",
            other.type_name()
        )))),
    }
}

pub(crate) fn run_new_array(element_type: &Type, frame: &mut Frame<'_>) -> InstrResult {
    let length = array_length(&frame.pop())?;
    let items = (0..length).map(|_| element_type.default_value()).collect();
    frame.push(new_array(element_type, items));
    Ok(1)
}

pub(crate) fn run_new_array_init(element_type: &Type, count: usize, frame: &mut Frame<'_>) -> InstrResult {
    let items = frame.pop_many(count);
    frame.push(new_array(element_type, items));
    Ok(1)
}

fn new_array(element_type: &Type, items: Vec<Value>) -> Value {
    Value::Array(Arc::new(Mutex::new(ArrayObject::new(element_type.clone(), items))))
}

fn array_operand(value: Value) -> Result<Arc<Mutex<ArrayObject>>, Unwind> {
    match value {
        Value::Array(array) => Ok(array),
        Value::Null => Err(null_reference()),
        other => Err(Unwind::Throw(Exception::invalid_cast(format!(
            "A value of type {} is not an array",
            other.type_name()
        )))),
    }
}

fn element_index(value: &Value, length: usize) -> Result<usize, Unwind> {
    match value {
        Value::Int32(n) => usize::try_from(*n)
            .ok()
            .filter(|&i| i < length)
            .ok_or_else(|| Unwind::Throw(Exception::index_out_of_range())),
        other => Err(Unwind::Throw(Exception::invalid_cast(format!(
            "Array index must be Int32, got {}",
            other.type_name()
        )))),
    }
}

pub(crate) fn run_get_array_item(frame: &mut Frame<'_>) -> InstrResult {
    let index = frame.pop();
    let array = array_operand(frame.pop())?;
    let item = {
        let guard = array.lock();
        let i = element_index(&index, guard.items.len())?;
        guard.items[i].clone()
    };
    frame.push(item);
    Ok(1)
}

pub(crate) fn run_set_array_item(frame: &mut Frame<'_>) -> InstrResult {
    let value = frame.pop();
    let index = frame.pop();
    let array = array_operand(frame.pop())?;
    let mut guard = array.lock();
    let i = element_index(&index, guard.items.len())?;
    guard.items[i] = value;
    Ok(1)
}

pub(crate) fn run_array_length(frame: &mut Frame<'_>) -> InstrResult {
    let array = array_operand(frame.pop())?;
    let length = array.lock().items.len();
    frame.push(Value::Int32(length as i32));
    Ok(1)
}
