// exprvm Error Handling Module
// Runtime faults raised by instructions, the unwind signal threaded through
// `Instruction::run`, and source positions used by debug info and traces.

use colored::*;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::types::Type;

/// Line and column of an expression in its source document, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Source range covered by a run of instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn from_positions(start_line: usize, start_column: usize, end_line: usize, end_column: usize) -> Self {
        Self::new(Position::new(start_line, start_column), Position::new(end_line, end_column))
    }
}

/// Built-in exception classes raised by the instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    Exception,
    SystemException,
    ArithmeticException,
    DivideByZero,
    Overflow,
    NullReference,
    InvalidCast,
    InvalidOperation,
    IndexOutOfRange,
    Argument,
}

impl ExceptionKind {
    pub const ALL: [ExceptionKind; 10] = [
        ExceptionKind::Exception,
        ExceptionKind::SystemException,
        ExceptionKind::ArithmeticException,
        ExceptionKind::DivideByZero,
        ExceptionKind::Overflow,
        ExceptionKind::NullReference,
        ExceptionKind::InvalidCast,
        ExceptionKind::InvalidOperation,
        ExceptionKind::IndexOutOfRange,
        ExceptionKind::Argument,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::Exception => "Exception",
            ExceptionKind::SystemException => "SystemException",
            ExceptionKind::ArithmeticException => "ArithmeticException",
            ExceptionKind::DivideByZero => "DivideByZeroException",
            ExceptionKind::Overflow => "OverflowException",
            ExceptionKind::NullReference => "NullReferenceException",
            ExceptionKind::InvalidCast => "InvalidCastException",
            ExceptionKind::InvalidOperation => "InvalidOperationException",
            ExceptionKind::IndexOutOfRange => "IndexOutOfRangeException",
            ExceptionKind::Argument => "ArgumentException",
        }
    }

    /// The kind this class derives from, `None` for the root `Exception`.
    pub fn parent(self) -> Option<ExceptionKind> {
        match self {
            ExceptionKind::Exception => None,
            ExceptionKind::SystemException => Some(ExceptionKind::Exception),
            ExceptionKind::ArithmeticException
            | ExceptionKind::NullReference
            | ExceptionKind::InvalidCast
            | ExceptionKind::InvalidOperation
            | ExceptionKind::IndexOutOfRange
            | ExceptionKind::Argument => Some(ExceptionKind::SystemException),
            ExceptionKind::DivideByZero | ExceptionKind::Overflow => {
                Some(ExceptionKind::ArithmeticException)
            }
        }
    }

    /// The shared class type for this kind.
    pub fn ty(self) -> Type {
        Type::exception_kind(self)
    }

    fn default_message(self) -> &'static str {
        match self {
            ExceptionKind::DivideByZero => "Attempted to divide by zero.",
            ExceptionKind::Overflow => "Arithmetic operation resulted in an overflow.",
            ExceptionKind::NullReference => "Object reference not set to an instance of an object.",
            ExceptionKind::InvalidCast => "Specified cast is not valid.",
            ExceptionKind::IndexOutOfRange => "Index was outside the bounds of the array.",
            _ => "Exception of this type was thrown.",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One interpreted frame in an exception's stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub function_name: String,
    pub file: Option<String>,
    pub line: usize,
    pub column: usize,
    pub instruction_index: usize,
}

impl TraceFrame {
    pub fn new(function_name: impl Into<String>, instruction_index: usize) -> Self {
        Self {
            function_name: function_name.into(),
            file: None,
            line: 0,
            column: 0,
            instruction_index,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, span: Span) -> Self {
        self.file = Some(file.into());
        self.line = span.start.line;
        self.column = span.start.column;
        self
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(
                f,
                "  at {} ({}:{})",
                self.function_name,
                file,
                Position::new(self.line, self.column)
            ),
            None => write!(
                f,
                "  at {} (instruction {})",
                self.function_name, self.instruction_index
            ),
        }
    }
}

/// A runtime fault raised by an instruction or thrown by the interpreted program.
///
/// Exceptions are shared (`ExceptionRef`) so that a rethrow propagates the
/// very same object a handler observed.
#[derive(Debug, Error)]
#[error("{ty}: {message}")]
pub struct Exception {
    ty: Type,
    message: String,
    trace: Mutex<Vec<TraceFrame>>,
}

pub type ExceptionRef = Arc<Exception>;

impl Exception {
    pub fn new(ty: Type, message: impl Into<String>) -> ExceptionRef {
        Arc::new(Self {
            ty,
            message: message.into(),
            trace: Mutex::new(Vec::new()),
        })
    }

    pub fn of_kind(kind: ExceptionKind, message: impl Into<String>) -> ExceptionRef {
        Self::new(kind.ty(), message)
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_kind(&self, kind: ExceptionKind) -> bool {
        self.ty == kind.ty()
    }

    pub fn stack_trace(&self) -> Vec<TraceFrame> {
        self.trace.lock().clone()
    }

    pub fn has_stack_trace(&self) -> bool {
        !self.trace.lock().is_empty()
    }

    /// Records the interpreted trace the first time the exception is observed.
    pub(crate) fn save_trace(&self, frames: impl FnOnce() -> Vec<TraceFrame>) {
        let mut trace = self.trace.lock();
        if trace.is_empty() {
            *trace = frames();
        }
    }

    /// Appends a caller frame as the exception leaves a host call.
    pub(crate) fn push_frame(&self, frame: TraceFrame) {
        self.trace.lock().push(frame);
    }

    /// Format the exception for display with colors
    pub fn format(&self) -> String {
        let mut output = format!(
            "{}: {}\n",
            self.ty.to_string().red().bold(),
            self.message.white().bold()
        );

        let trace = self.trace.lock();
        if !trace.is_empty() {
            output.push_str(&format!("\n{}:\n", "Stack trace".yellow().bold()));
            for frame in trace.iter() {
                output.push_str(&format!("{}\n", frame));
            }
        }

        output
    }
}

// Convenience constructors for the faults raised by the instruction set
impl Exception {
    pub fn divide_by_zero() -> ExceptionRef {
        Self::builtin(ExceptionKind::DivideByZero)
    }

    pub fn overflow() -> ExceptionRef {
        Self::builtin(ExceptionKind::Overflow)
    }

    pub fn null_reference() -> ExceptionRef {
        Self::builtin(ExceptionKind::NullReference)
    }

    pub fn index_out_of_range() -> ExceptionRef {
        Self::builtin(ExceptionKind::IndexOutOfRange)
    }

    pub fn invalid_cast(message: impl Into<String>) -> ExceptionRef {
        Self::of_kind(ExceptionKind::InvalidCast, message)
    }

    pub fn invalid_operation(message: impl Into<String>) -> ExceptionRef {
        Self::of_kind(ExceptionKind::InvalidOperation, message)
    }

    fn builtin(kind: ExceptionKind) -> ExceptionRef {
        Self::of_kind(kind, kind.default_message())
    }
}

/// Non-local exit from `Instruction::run`.
#[derive(Debug, Clone, Error)]
pub enum Unwind {
    /// A fault propagating towards the nearest matching handler.
    #[error("{0}")]
    Throw(ExceptionRef),
    /// Continue propagating the exception the enclosing catch block is handling.
    #[error("rethrow of the exception being handled")]
    Rethrow,
}

impl From<ExceptionRef> for Unwind {
    fn from(exception: ExceptionRef) -> Self {
        Unwind::Throw(exception)
    }
}

/// Result of a single instruction: the relative instruction-pointer delta.
pub type InstrResult = Result<isize, Unwind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_hierarchy() {
        assert_eq!(ExceptionKind::DivideByZero.parent(), Some(ExceptionKind::ArithmeticException));
        assert_eq!(ExceptionKind::Exception.parent(), None);
        let arithmetic = ExceptionKind::ArithmeticException.ty();
        assert!(arithmetic.is_assignable_from(&ExceptionKind::Overflow.ty()));
        assert!(!arithmetic.is_assignable_from(&ExceptionKind::NullReference.ty()));
    }

    #[test]
    fn test_trace_saved_once() {
        let exc = Exception::overflow();
        exc.save_trace(|| vec![TraceFrame::new("inner", 3)]);
        exc.save_trace(|| vec![TraceFrame::new("outer", 7)]);
        let trace = exc.stack_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].function_name, "inner");
    }

    #[test]
    fn test_trace_frame_display() {
        let frame = TraceFrame::new("lambda", 4)
            .with_location("query.expr", Span::from_positions(12, 5, 12, 20));
        assert_eq!(frame.to_string(), "  at lambda (query.expr:12:5)");
        assert_eq!(TraceFrame::new("lambda", 4).to_string(), "  at lambda (instruction 4)");
    }

    #[test]
    fn test_display_uses_type_name() {
        let exc = Exception::divide_by_zero();
        assert_eq!(exc.to_string(), "DivideByZeroException: Attempted to divide by zero.");
        assert!(exc.is_kind(ExceptionKind::DivideByZero));
    }
}
