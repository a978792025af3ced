use smallvec::SmallVec;

use super::interpreter::Interpreter;
use super::value::{CellArena, CellId, Value};
use crate::error::{ExceptionRef, TraceFrame};

/// Activation record of one interpreted invocation.
///
/// `data` holds the locals in its low slots and the operand stack above
/// them. Frames are never shared between threads.
pub struct Frame<'a> {
    interpreter: &'a Interpreter,
    pub(crate) data: Vec<Value>,
    pub(crate) stack_index: usize,
    pub(crate) instruction_index: usize,
    closure: Vec<CellId>,
    cells: CellArena,
    /// Cells of boxed locals that never left the frame; released on drop.
    owned_cells: SmallVec<[CellId; 4]>,

    /// Runtime label indices of the finally/fault blocks entered but not yet run.
    continuations: SmallVec<[usize; 4]>,
    /// Jump target waiting for the current finally blocks to drain.
    pending_continuation: Option<usize>,
    pending_value: Option<Value>,
    /// Pending jumps saved by `EnterFinally`/`EnterFault` while their block runs.
    saved_pending: Vec<(Option<usize>, Option<Value>)>,
    /// Exceptions of the catch blocks currently executing, innermost last.
    handled: SmallVec<[ExceptionRef; 2]>,
}

/// Depths of the frame's control stacks, restored when a fault abandons a region.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlMark {
    continuations: usize,
    saved_pending: usize,
}

impl ControlMark {
    /// The same mark with the region's own continuation still pushed.
    pub(crate) fn with_continuation(self) -> Self {
        Self {
            continuations: self.continuations + 1,
            ..self
        }
    }
}

impl<'a> Frame<'a> {
    pub(crate) fn new(interpreter: &'a Interpreter, closure: Vec<CellId>, cells: CellArena) -> Self {
        let local_count = interpreter.local_count();
        let size = local_count + interpreter.instructions().max_stack_depth;
        Self {
            interpreter,
            data: vec![Value::Null; size],
            stack_index: local_count,
            instruction_index: 0,
            closure,
            cells,
            owned_cells: SmallVec::new(),
            continuations: SmallVec::with_capacity(interpreter.instructions().max_continuation_depth),
            pending_continuation: None,
            pending_value: None,
            saved_pending: Vec::new(),
            handled: SmallVec::new(),
        }
    }

    pub fn interpreter(&self) -> &'a Interpreter {
        self.interpreter
    }

    pub fn instruction_index(&self) -> usize {
        self.instruction_index
    }

    pub fn stack_index(&self) -> usize {
        self.stack_index
    }

    pub fn local(&self, index: usize) -> &Value {
        &self.data[index]
    }

    pub fn set_local(&mut self, index: usize, value: Value) {
        self.data[index] = value;
    }

    pub fn cells(&self) -> &CellArena {
        &self.cells
    }

    pub fn closure(&self) -> &[CellId] {
        &self.closure
    }

    pub(crate) fn closure_cell(&self, index: usize) -> CellId {
        self.closure[index]
    }

    /// The cell stored in a boxed local slot.
    pub(crate) fn cell_at(&self, index: usize) -> CellId {
        match &self.data[index] {
            Value::Cell(id) => *id,
            other => panic!("local {} is not boxed (holds {})", index, other.type_name()),
        }
    }

    /// Boxes `value` into local `index`, reusing the slot's cell when this
    /// frame still owns it.
    pub(crate) fn box_local(&mut self, index: usize, value: Value) {
        let cell = match &self.data[index] {
            Value::Cell(id) if self.owned_cells.contains(id) => *id,
            _ => {
                let id = self.cells.alloc(Value::Null);
                self.owned_cells.push(id);
                id
            }
        };
        self.cells.set(cell, value);
        self.data[index] = Value::Cell(cell);
    }

    /// Hands a boxed local's cell to whoever loaded it. The frame neither
    /// reuses nor releases it afterwards.
    pub(crate) fn capture_cell(&mut self, id: CellId) {
        self.owned_cells.retain(|owned| *owned != id);
    }

    // Operand stack

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.data[self.stack_index] = value;
        self.stack_index += 1;
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        debug_assert!(
            self.stack_index > self.interpreter.local_count(),
            "operand stack underflow into the locals"
        );
        self.stack_index -= 1;
        std::mem::take(&mut self.data[self.stack_index])
    }

    #[inline]
    pub fn peek(&self) -> &Value {
        debug_assert!(self.stack_index > self.interpreter.local_count());
        &self.data[self.stack_index - 1]
    }

    /// Pops `count` values, returned in push order.
    pub(crate) fn pop_many(&mut self, count: usize) -> Vec<Value> {
        debug_assert!(self.stack_index >= self.interpreter.local_count() + count);
        let start = self.stack_index - count;
        let values = self.data[start..self.stack_index]
            .iter_mut()
            .map(std::mem::take)
            .collect();
        self.stack_index = start;
        values
    }

    pub(crate) fn set_stack_depth(&mut self, depth: usize) {
        self.stack_index = self.interpreter.local_count() + depth;
    }

    fn set_top(&mut self, value: Value) {
        self.data[self.stack_index - 1] = value;
    }

    // Continuations

    pub(crate) fn push_continuation(&mut self, label_index: usize) {
        self.continuations.push(label_index);
    }

    pub(crate) fn remove_continuation(&mut self) {
        let removed = self.continuations.pop();
        debug_assert!(removed.is_some(), "continuation stack underflow");
    }

    /// Jumps to a runtime label, routing through pending finally blocks when
    /// the target lies outside them.
    pub(crate) fn goto(&mut self, label_index: usize, value: Option<Value>) -> isize {
        let target = *self.interpreter.label(label_index);
        if self.continuations.len() == target.continuation_stack_depth {
            self.set_stack_depth(target.stack_depth);
            if let Some(value) = value {
                self.set_top(value);
            }
            return offset(target.index, self.instruction_index);
        }

        // A jump already in flight is replaced by the new target.
        self.pending_continuation = Some(label_index);
        self.pending_value = value;
        self.yield_to_current_continuation()
    }

    /// Enters a catch handler with the caught exception on top of the stack.
    pub(crate) fn goto_handler(&mut self, label_index: usize, exception: ExceptionRef) -> isize {
        debug_assert_eq!(
            self.continuations.len(),
            self.interpreter.label(label_index).continuation_stack_depth,
            "finally blocks inside the try must have run before its handler"
        );
        self.goto(label_index, Some(Value::Exception(exception)))
    }

    pub(crate) fn yield_to_current_continuation(&mut self) -> isize {
        let current = match self.continuations.last() {
            Some(&label_index) => label_index,
            None => panic!("no continuation to yield to"),
        };
        let target = *self.interpreter.label(current);
        self.set_stack_depth(target.stack_depth);
        offset(target.index, self.instruction_index)
    }

    pub(crate) fn yield_to_pending_continuation(&mut self) -> isize {
        let pending = match self.pending_continuation {
            Some(label_index) => label_index,
            None => panic!("no pending jump to resume"),
        };
        let target = *self.interpreter.label(pending);
        // Another finally block still lies between us and the target.
        if target.continuation_stack_depth < self.continuations.len() {
            return self.yield_to_current_continuation();
        }

        self.set_stack_depth(target.stack_depth);
        if let Some(value) = self.pending_value.take() {
            self.set_top(value);
        }
        self.pending_continuation = None;
        offset(target.index, self.instruction_index)
    }

    pub(crate) fn push_pending_continuation(&mut self) {
        let pending = (self.pending_continuation.take(), self.pending_value.take());
        self.saved_pending.push(pending);
    }

    pub(crate) fn pop_pending_continuation(&mut self) {
        let (continuation, value) = match self.saved_pending.pop() {
            Some(saved) => saved,
            None => panic!("no saved pending jump"),
        };
        self.pending_continuation = continuation;
        self.pending_value = value;
    }

    pub(crate) fn is_jump_happened(&self) -> bool {
        self.pending_continuation.is_some()
    }

    pub(crate) fn control_mark(&self) -> ControlMark {
        ControlMark {
            continuations: self.continuations.len(),
            saved_pending: self.saved_pending.len(),
        }
    }

    /// Drops jumps and continuations left behind by blocks a fault interrupted.
    pub(crate) fn abandon_jumps(&mut self, mark: ControlMark) {
        self.pending_continuation = None;
        self.pending_value = None;
        self.continuations.truncate(mark.continuations);
        self.saved_pending.truncate(mark.saved_pending);
    }

    // Exceptions being handled

    pub(crate) fn enter_handler(&mut self, exception: ExceptionRef) {
        self.handled.push(exception);
    }

    pub(crate) fn leave_handler(&mut self) {
        self.handled.pop();
    }

    /// The exception a rethrow refers to.
    pub(crate) fn current_exception(&self) -> Option<&ExceptionRef> {
        self.handled.last()
    }

    pub(crate) fn trace_frame(&self) -> TraceFrame {
        self.interpreter.trace_frame(self.instruction_index)
    }

    pub(crate) fn save_trace(&self, exception: &ExceptionRef) {
        if self.interpreter.config().capture_stack_trace {
            exception.save_trace(|| vec![self.trace_frame()]);
        }
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        for id in self.owned_cells.drain(..) {
            self.cells.release(id);
        }
    }
}

#[inline]
fn offset(target: usize, current: usize) -> isize {
    target as isize - current as isize
}
