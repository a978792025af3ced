// Descriptors of protected regions, filled in by the compiler once every
// region boundary is known.

use tracing::debug;

use super::control::run_region;
use crate::error::ExceptionRef;
use crate::types::Type;
use crate::vm::frame::Frame;
use crate::vm::value::Value;

/// Instruction range of a catch filter; it leaves a `Boolean` on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionFilter {
    pub label_index: usize,
    pub start_index: usize,
    pub end_index: usize,
}

impl ExceptionFilter {
    pub fn new(label_index: usize, start_index: usize, end_index: usize) -> Self {
        Self {
            label_index,
            start_index,
            end_index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    pub label_index: usize,
    pub handler_start_index: usize,
    pub handler_end_index: usize,
    pub exception_type: Type,
    pub filter: Option<ExceptionFilter>,
}

impl ExceptionHandler {
    pub fn new(
        label_index: usize,
        handler_start_index: usize,
        handler_end_index: usize,
        exception_type: Type,
        filter: Option<ExceptionFilter>,
    ) -> Self {
        Self {
            label_index,
            handler_start_index,
            handler_end_index,
            exception_type,
            filter,
        }
    }

    pub fn matches(&self, exception_type: &Type) -> bool {
        self.exception_type.is_assignable_from(exception_type)
    }
}

#[derive(Debug, Clone)]
pub struct TryCatchFinallyHandler {
    pub try_start_index: usize,
    pub try_end_index: usize,
    /// Index of the `Goto` that leaves the protected region normally.
    pub goto_end_target_index: usize,
    pub finally: Option<(usize, usize)>,
    pub handlers: Vec<ExceptionHandler>,
}

impl TryCatchFinallyHandler {
    pub fn try_catch(
        try_start_index: usize,
        try_end_index: usize,
        goto_end_target_index: usize,
        handlers: Vec<ExceptionHandler>,
    ) -> Self {
        Self {
            try_start_index,
            try_end_index,
            goto_end_target_index,
            finally: None,
            handlers,
        }
    }

    pub fn try_finally(
        try_start_index: usize,
        try_end_index: usize,
        goto_end_target_index: usize,
        finally_start_index: usize,
        finally_end_index: usize,
        handlers: Vec<ExceptionHandler>,
    ) -> Self {
        Self {
            try_start_index,
            try_end_index,
            goto_end_target_index,
            finally: Some((finally_start_index, finally_end_index)),
            handlers,
        }
    }

    pub fn has_finally(&self) -> bool {
        self.finally.is_some()
    }

    /// First handler, in declaration order, whose type and filter accept the exception.
    pub(crate) fn find_handler(&self, frame: &mut Frame<'_>, exception: &ExceptionRef) -> Option<&ExceptionHandler> {
        for candidate in &self.handlers {
            if !candidate.matches(exception.ty()) {
                continue;
            }
            match &candidate.filter {
                None => return Some(candidate),
                Some(filter) => {
                    if filter_passes(frame, exception, filter) {
                        return Some(candidate);
                    }
                    debug!(exception = %exception.ty(), handler = candidate.label_index, "exception filter rejected");
                }
            }
        }
        None
    }
}

/// Runs a filter inline; a filter that faults does not match.
fn filter_passes(frame: &mut Frame<'_>, exception: &ExceptionRef, filter: &ExceptionFilter) -> bool {
    let stack_index = frame.stack_index;
    let instruction_index = frame.instruction_index;

    let label = *frame.interpreter().label(filter.label_index);
    frame.instruction_index = label.index;
    frame.set_stack_depth(label.stack_depth - 1);
    frame.push(Value::Exception(exception.clone()));
    let outcome = run_region(frame, filter.start_index, filter.end_index).map(|_| frame.pop());

    frame.stack_index = stack_index;
    frame.instruction_index = instruction_index;
    matches!(outcome, Ok(Value::Bool(true)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryFaultHandler {
    pub try_start_index: usize,
    pub try_end_index: usize,
    pub fault_start_index: usize,
    pub fault_end_index: usize,
}

impl TryFaultHandler {
    pub fn new(
        try_start_index: usize,
        try_end_index: usize,
        fault_start_index: usize,
        fault_end_index: usize,
    ) -> Self {
        Self {
            try_start_index,
            try_end_index,
            fault_start_index,
            fault_end_index,
        }
    }
}
