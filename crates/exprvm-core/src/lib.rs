pub mod compiler;
pub mod config;
pub mod error;
pub mod instruction;
pub mod types;
pub mod vm;

pub use compiler::{InstructionArray, InstructionList, LabelId, LocalVariables, RuntimeLabel};
pub use config::{ConfigError, InterpreterConfig};
pub use error::{Exception, ExceptionKind, ExceptionRef, Span, TraceFrame, Unwind};
pub use instruction::Instruction;
pub use types::{FieldInfo, Type, TypeCode, TypeKind};
pub use vm::{CellArena, CellId, DebugInfo, Frame, Interpreter, Value};
