// Branches, label jumps and protected regions.

use std::sync::Arc;
use tracing::debug;

use super::cache::Flyweights;
use super::handler::{TryCatchFinallyHandler, TryFaultHandler};
use super::Instruction;
use crate::error::{Exception, ExceptionRef, InstrResult, Unwind};
use crate::vm::frame::Frame;
use crate::vm::value::Value;

/// Offset of a branch whose target has not been marked yet.
pub const UNKNOWN_OFFSET: i32 = i32::MIN;

/// Fixed-up branches with offsets below this share cached instances.
pub const BRANCH_CACHE_SIZE: usize = 32;

/// Labels below this index share cached `Goto` instances.
pub const GOTO_CACHE_SIZE: usize = 32;

/// Label index of a try/catch without a finally block.
pub const NO_LABEL: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// Unconditional; the flags only describe the stack effect.
    Always { has_result: bool, has_value: bool },
    IfTrue,
    IfFalse,
    /// Taken when the top of the stack is not null; the value stays on the stack.
    Coalescing,
}

impl BranchKind {
    const COUNT: usize = 7;

    fn cache_slot(self) -> usize {
        match self {
            BranchKind::Always {
                has_result,
                has_value,
            } => has_result as usize * 2 + has_value as usize,
            BranchKind::IfTrue => 4,
            BranchKind::IfFalse => 5,
            BranchKind::Coalescing => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BranchKind::Always { .. } => "Branch",
            BranchKind::IfTrue => "BranchTrue",
            BranchKind::IfFalse => "BranchFalse",
            BranchKind::Coalescing => "CoalescingBranch",
        }
    }

    pub(crate) fn stack_effect(self) -> (usize, usize) {
        match self {
            BranchKind::Always {
                has_result,
                has_value,
            } => (has_value as usize, has_result as usize),
            BranchKind::IfTrue | BranchKind::IfFalse => (1, 0),
            BranchKind::Coalescing => (1, 1),
        }
    }
}

/// Drives the instructions of `[start, end)` inline, returning the index at
/// which control left the range.
pub(crate) fn run_region(frame: &mut Frame<'_>, start: usize, end: usize) -> Result<usize, Unwind> {
    let instructions = &frame.interpreter().instructions().instructions;
    let mut index = frame.instruction_index;
    while index >= start && index < end {
        let delta = instructions[index].run(frame)?;
        index = advance(index, delta);
        frame.instruction_index = index;
    }
    Ok(index)
}

/// Runs the single instruction at the current index.
fn run_current(frame: &mut Frame<'_>) -> Result<(), Unwind> {
    let instructions = &frame.interpreter().instructions().instructions;
    let index = frame.instruction_index;
    let delta = instructions[index].run(frame)?;
    frame.instruction_index = advance(index, delta);
    Ok(())
}

#[inline]
pub(crate) fn advance(index: usize, delta: isize) -> usize {
    match index.checked_add_signed(delta) {
        Some(next) => next,
        None => panic!("jump from {} by {} leaves the program", index, delta),
    }
}

pub(crate) fn run_branch(kind: BranchKind, offset: i32, frame: &mut Frame<'_>) -> InstrResult {
    debug_assert!(offset != UNKNOWN_OFFSET, "branch executed before its label was marked");
    let taken = match kind {
        BranchKind::Always { .. } => true,
        BranchKind::IfTrue => frame.pop().as_bool() == Some(true),
        BranchKind::IfFalse => frame.pop().as_bool() == Some(false),
        BranchKind::Coalescing => !frame.peek().is_null(),
    };
    Ok(if taken { offset as isize } else { 1 })
}

pub(crate) fn run_goto(
    label_index: usize,
    has_value: bool,
    label_target_gets_value: bool,
    frame: &mut Frame<'_>,
) -> InstrResult {
    let value = if has_value { Some(frame.pop()) } else { None };
    let value = if label_target_gets_value { value } else { None };
    Ok(frame.goto(label_index, value))
}

/// Resolves a rethrow to the exception being handled.
fn resolve(frame: &Frame<'_>, unwind: Unwind) -> ExceptionRef {
    match unwind {
        Unwind::Throw(exception) => exception,
        Unwind::Rethrow => match frame.current_exception() {
            Some(exception) => exception.clone(),
            None => panic!("rethrow outside of a catch block"),
        },
    }
}

pub(crate) fn run_try_catch_finally(
    label_index: usize,
    has_finally: bool,
    handler: Option<&TryCatchFinallyHandler>,
    frame: &mut Frame<'_>,
) -> InstrResult {
    let handler = match handler {
        Some(handler) => handler,
        None => panic!("try handler was never set"),
    };

    let mark = frame.control_mark();
    if has_finally {
        frame.push_continuation(label_index);
    }
    let prev_index = frame.instruction_index;
    frame.instruction_index += 1;

    // Control state at the start of the protected region, finally continuation included.
    let protected = if has_finally { mark.with_continuation() } else { mark };

    let goto_end = handler.goto_end_target_index;
    let mut result = run_protected(frame, handler.try_start_index, handler.try_end_index, goto_end);
    if let Err(unwind) = result {
        let exception = resolve(frame, unwind);
        frame.save_trace(&exception);
        frame.abandon_jumps(protected);

        result = match handler.find_handler(frame, &exception) {
            Some(catch) => {
                debug!(exception = %exception.ty(), handler = catch.label_index, "exception caught");
                let delta = frame.goto_handler(catch.label_index, exception.clone());
                frame.instruction_index = advance(frame.instruction_index, delta);

                frame.enter_handler(exception.clone());
                let outcome =
                    run_protected(frame, catch.handler_start_index, catch.handler_end_index, goto_end);
                frame.leave_handler();
                outcome.map_err(|unwind| match unwind {
                    Unwind::Rethrow => Unwind::Throw(exception),
                    other => other,
                })
            }
            None => Err(Unwind::Throw(exception)),
        };
    }

    if let Some((finally_start, finally_end)) = handler.finally {
        if result.is_err() {
            debug!("running finally block on fault");
            frame.abandon_jumps(protected);
        }
        frame.instruction_index = finally_start;
        if let Err(unwind) = run_region(frame, finally_start, finally_end) {
            // A fault in the finally block replaces the one in flight.
            result = Err(unwind);
        }
    }

    result?;
    Ok(frame.instruction_index as isize - prev_index as isize)
}

/// Runs a try or catch body; reaching the goto-end instruction runs it too.
fn run_protected(frame: &mut Frame<'_>, start: usize, end: usize, goto_end: usize) -> Result<(), Unwind> {
    let index = run_region(frame, start, end)?;
    if index == goto_end {
        run_current(frame)?;
    }
    Ok(())
}

pub(crate) fn run_try_fault(
    label_index: usize,
    handler: Option<&TryFaultHandler>,
    frame: &mut Frame<'_>,
) -> InstrResult {
    let handler = match handler {
        Some(handler) => handler,
        None => panic!("try/fault handler was never set"),
    };

    let mark = frame.control_mark();
    frame.push_continuation(label_index);
    let prev_index = frame.instruction_index;
    frame.instruction_index += 1;

    match run_region(frame, handler.try_start_index, handler.try_end_index) {
        Ok(index) => {
            // The fault block only runs on a fault.
            frame.remove_continuation();
            if index == handler.try_end_index {
                run_current(frame)?;
            } else if frame.is_jump_happened() {
                let delta = frame.yield_to_pending_continuation();
                frame.instruction_index = advance(frame.instruction_index, delta);
            }
            Ok(frame.instruction_index as isize - prev_index as isize)
        }
        Err(unwind) => {
            let exception = resolve(frame, unwind);
            frame.save_trace(&exception);
            debug!(exception = %exception.ty(), "running fault block");
            frame.abandon_jumps(mark.with_continuation());
            frame.instruction_index = handler.fault_start_index;
            run_region(frame, handler.fault_start_index, handler.fault_end_index)?;
            Err(Unwind::Throw(exception))
        }
    }
}

/// Entry of a finally or fault block: park any jump in flight until the block ends.
pub(crate) fn run_enter_finally(label_index: usize, frame: &mut Frame<'_>) -> InstrResult {
    if !frame.is_jump_happened() {
        let depth = frame.interpreter().label(label_index).stack_depth;
        frame.set_stack_depth(depth);
    }
    frame.push_pending_continuation();
    frame.remove_continuation();
    Ok(1)
}

pub(crate) fn run_leave_finally(frame: &mut Frame<'_>) -> InstrResult {
    frame.pop_pending_continuation();
    if !frame.is_jump_happened() {
        return Ok(1);
    }
    Ok(frame.yield_to_pending_continuation())
}

pub(crate) fn run_leave_fault(frame: &mut Frame<'_>) -> InstrResult {
    frame.pop_pending_continuation();
    Ok(1)
}

pub(crate) fn run_leave_exception_handler(label_index: usize, frame: &mut Frame<'_>) -> InstrResult {
    let target = frame.interpreter().label(label_index).index;
    Ok(target as isize - frame.instruction_index as isize)
}

pub(crate) fn run_throw(rethrow: bool, frame: &mut Frame<'_>) -> InstrResult {
    if rethrow {
        return Err(Unwind::Rethrow);
    }
    match frame.pop() {
        Value::Exception(exception) => Err(Unwind::Throw(exception)),
        Value::Null => Err(Unwind::Throw(Exception::null_reference())),
        other => Err(Unwind::Throw(Exception::invalid_cast(format!(
            "Unable to throw a value of type {}",
            other.type_name()
        )))),
    }
}

static THROWS: Flyweights<4> = Flyweights::new();

/// `Throw`, `VoidThrow`, `Rethrow` or `VoidRethrow`.
pub fn throw(has_result: bool, rethrow: bool) -> Arc<Instruction> {
    THROWS.get_or_init((rethrow as usize) << 1 | has_result as usize, || Instruction::Throw {
        has_result,
        rethrow,
    })
}

static BRANCHES: Flyweights<{ BranchKind::COUNT * BRANCH_CACHE_SIZE }> = Flyweights::new();
static GOTOS: Flyweights<{ 8 * GOTO_CACHE_SIZE }> = Flyweights::new();

/// A branch whose offset is fixed up once its label is marked.
pub fn branch(kind: BranchKind) -> Arc<Instruction> {
    Arc::new(Instruction::Branch {
        kind,
        offset: UNKNOWN_OFFSET,
    })
}

/// Resolved copy of an unfixed branch; short offsets come from the cache.
pub(crate) fn fixup_branch(kind: BranchKind, current: i32, offset: i32) -> Arc<Instruction> {
    assert!(current == UNKNOWN_OFFSET, "branch offset fixed up twice");
    match usize::try_from(offset) {
        Ok(slot) if slot < BRANCH_CACHE_SIZE => BRANCHES
            .get_or_init(kind.cache_slot() * BRANCH_CACHE_SIZE + slot, || {
                Instruction::Branch { kind, offset }
            }),
        _ => Arc::new(Instruction::Branch { kind, offset }),
    }
}

pub fn goto(
    label_index: usize,
    has_result: bool,
    has_value: bool,
    label_target_gets_value: bool,
) -> Arc<Instruction> {
    let create = || Instruction::Goto {
        label_index,
        has_result,
        has_value,
        label_target_gets_value,
    };
    if label_index < GOTO_CACHE_SIZE {
        let variant = (has_result as usize) << 2 | (has_value as usize) << 1 | label_target_gets_value as usize;
        GOTOS.get_or_init(variant * GOTO_CACHE_SIZE + label_index, create)
    } else {
        Arc::new(create())
    }
}
