use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::debug_info::DebugInfo;
use super::frame::Frame;
use super::value::{CellArena, CellId, Value};
use crate::compiler::{InstructionArray, LocalVariables, RuntimeLabel};
use crate::config::InterpreterConfig;
use crate::error::{ExceptionRef, TraceFrame, Unwind};
use crate::instruction::control::advance;

/// A compiled lambda ready to run.
///
/// The interpreter is immutable once built; every invocation gets its own
/// `Frame`, so one interpreter may serve many threads at once.
#[derive(Debug)]
pub struct Interpreter {
    name: String,
    local_count: usize,
    closure_variables: FxHashMap<String, usize>,
    instructions: InstructionArray,
    debug_infos: Vec<DebugInfo>,
    config: InterpreterConfig,
}

impl Interpreter {
    pub fn new(name: impl Into<String>, instructions: InstructionArray, locals: &LocalVariables) -> Self {
        let name = name.into();
        let closure_variables = locals
            .closure_variables()
            .iter()
            .map(|(variable, local)| (variable.clone(), local.index))
            .collect();
        debug!(
            interpreter = %name,
            instructions = instructions.len(),
            locals = locals.local_count(),
            max_stack = instructions.max_stack_depth,
            "interpreter built"
        );
        Self {
            name,
            local_count: locals.local_count(),
            closure_variables,
            instructions,
            debug_infos: Vec::new(),
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches source locations; entries must be sorted by instruction index.
    pub fn with_debug_info(mut self, mut debug_infos: Vec<DebugInfo>) -> Self {
        debug_infos.sort_by_key(|info| info.index);
        self.debug_infos = debug_infos;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_count(&self) -> usize {
        self.local_count
    }

    pub fn instructions(&self) -> &InstructionArray {
        &self.instructions
    }

    pub fn objects(&self) -> &[Value] {
        &self.instructions.objects
    }

    pub fn label(&self, label_index: usize) -> &RuntimeLabel {
        &self.instructions.labels[label_index]
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Closure slot of a captured variable.
    pub fn closure_variable(&self, name: &str) -> Option<usize> {
        self.closure_variables.get(name).copied()
    }

    pub fn closure_size(&self) -> usize {
        self.closure_variables.len()
    }

    pub fn debug_info(&self, instruction_index: usize) -> Option<&DebugInfo> {
        DebugInfo::lookup(&self.debug_infos, instruction_index)
    }

    pub(crate) fn trace_frame(&self, instruction_index: usize) -> TraceFrame {
        let frame = TraceFrame::new(self.name.clone(), instruction_index);
        match self.debug_info(instruction_index) {
            Some(info) => frame.with_location(info.file_name.clone(), info.span),
            None => frame,
        }
    }

    pub fn make_frame(&self, closure: Vec<CellId>, cells: CellArena) -> Frame<'_> {
        debug_assert_eq!(closure.len(), self.closure_size(), "closure does not match the captured variables");
        Frame::new(self, closure, cells)
    }

    /// Runs from the frame's current instruction until control leaves the program.
    ///
    /// # Panics
    /// When a rethrow escapes every catch block, which only a malformed
    /// program can do.
    pub fn run(&self, frame: &mut Frame<'_>) -> Result<(), ExceptionRef> {
        let instructions = &self.instructions.instructions;
        let mut index = frame.instruction_index;
        while index < instructions.len() {
            let instruction = &instructions[index];
            if self.config.trace_execution {
                trace!(
                    interpreter = %self.name,
                    index,
                    depth = frame.stack_index - self.local_count,
                    "{}",
                    instruction
                );
            }
            match instruction.run(frame) {
                Ok(delta) => {
                    index = advance(index, delta);
                    frame.instruction_index = index;
                }
                Err(Unwind::Throw(exception)) => {
                    frame.save_trace(&exception);
                    return Err(exception);
                }
                Err(Unwind::Rethrow) => panic!("rethrow escaped every catch block in {}", self.name),
            }
        }
        Ok(())
    }

    /// Runs with `args` written into the first local slots; returns the top
    /// of the stack, or null when the program leaves nothing.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, ExceptionRef> {
        self.invoke_with_closure(args, Vec::new(), CellArena::new())
    }

    pub fn invoke_with_closure(
        &self,
        args: &[Value],
        closure: Vec<CellId>,
        cells: CellArena,
    ) -> Result<Value, ExceptionRef> {
        assert!(
            args.len() <= self.local_count,
            "{} takes at most {} arguments, got {}",
            self.name,
            self.local_count,
            args.len()
        );
        let mut frame = self.make_frame(closure, cells);
        for (index, arg) in args.iter().enumerate() {
            frame.set_local(index, arg.clone());
        }
        self.run(&mut frame)?;
        if frame.stack_index > self.local_count {
            Ok(frame.pop())
        } else {
            Ok(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::InstructionList;
    use crate::types::Type;

    fn compile(build: impl FnOnce(&mut InstructionList)) -> Interpreter {
        let mut list = InstructionList::new();
        build(&mut list);
        Interpreter::new("test", list.to_array(), &LocalVariables::new())
    }

    #[test]
    fn test_empty_program_returns_null() {
        let interpreter = compile(|_| {});
        assert_eq!(interpreter.invoke(&[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_returns_top_of_stack() {
        let interpreter = compile(|list| {
            list.emit_load(Value::Int32(40));
            list.emit_load(Value::Int32(2));
            list.emit_add(&Type::int32(), false);
        });
        assert_eq!(interpreter.invoke(&[]).unwrap(), Value::Int32(42));
    }

    #[test]
    fn test_trace_frame_uses_debug_info() {
        let interpreter = compile(|list| list.emit_load(Value::Null))
            .with_debug_info(vec![DebugInfo::new(0, "calc.expr", crate::error::Span::from_positions(4, 2, 4, 8))]);
        let frame = interpreter.trace_frame(0);
        assert_eq!(frame.to_string(), "  at test (calc.expr:4:2)");
    }

    #[test]
    #[should_panic(expected = "rethrow escaped")]
    fn test_rethrow_outside_handler_panics() {
        let interpreter = compile(|list| list.emit_rethrow_void());
        let _ = interpreter.invoke(&[]);
    }
}
