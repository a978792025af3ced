pub mod arithmetic;
pub mod bitwise;
mod cache;
pub mod comparison;
pub mod control;
pub mod convert;
pub mod handler;
pub mod locals;
pub mod objects;

use std::fmt;
use std::sync::Arc;

use cache::Flyweights;
use crate::error::InstrResult;
use crate::types::{Type, TypeCode};
use crate::vm::frame::Frame;
use crate::vm::value::Value;

pub use arithmetic::{ArithmeticOp, UnaryOp};
pub use bitwise::BitwiseOp;
pub use comparison::CompareOp;
pub use control::BranchKind;
pub use handler::{ExceptionFilter, ExceptionHandler, TryCatchFinallyHandler, TryFaultHandler};
pub use locals::{LocalAccess, LocalInit};
pub use objects::HostMethod;

/// One unit of execution.
///
/// Instructions are immutable and shared between frames and threads; all
/// mutable state lives in the `Frame` they run against.
#[derive(Debug, Clone)]
pub enum Instruction {
    Pop,
    Dup,
    LoadObject(Value),
    /// Pushes an entry of the interpreter's object table.
    LoadCachedObject(usize),

    Arithmetic {
        op: ArithmeticOp,
        code: TypeCode,
    },
    Unary {
        op: UnaryOp,
        code: TypeCode,
    },
    Compare {
        op: CompareOp,
        code: TypeCode,
        lifted: bool,
    },
    Bitwise {
        op: BitwiseOp,
        code: TypeCode,
    },
    Convert {
        from: TypeCode,
        to: TypeCode,
        checked: bool,
        lifted: bool,
    },

    Local {
        access: LocalAccess,
        index: usize,
    },
    InitializeLocal {
        index: usize,
        init: LocalInit,
    },

    Branch {
        kind: BranchKind,
        offset: i32,
    },
    Goto {
        label_index: usize,
        has_result: bool,
        has_value: bool,
        label_target_gets_value: bool,
    },
    EnterTryCatchFinally {
        label_index: usize,
        has_finally: bool,
        handler: Option<Arc<TryCatchFinallyHandler>>,
    },
    EnterTryFault {
        label_index: usize,
        handler: Option<Arc<TryFaultHandler>>,
    },
    EnterFinally(usize),
    LeaveFinally,
    EnterFault(usize),
    LeaveFault,
    /// Stack-balancing marker; control enters handlers through their label.
    EnterExceptionHandler {
        has_value: bool,
    },
    LeaveExceptionHandler {
        label_index: usize,
        has_value: bool,
    },
    EnterExceptionFilter {
        has_value: bool,
    },
    LeaveExceptionFilter {
        has_value: bool,
    },
    Throw {
        has_result: bool,
        rethrow: bool,
    },

    New {
        ty: Type,
        arg_count: usize,
    },
    LoadField(usize),
    StoreField(usize),
    TypeIs(Type),
    TypeAs(Type),
    Cast(Type),
    NullCheck,
    Call(Arc<HostMethod>),
    NewArray(Type),
    NewArrayInit {
        element_type: Type,
        count: usize,
    },
    GetArrayItem,
    SetArrayItem,
    ArrayLength,
}

impl Instruction {
    pub fn consumed_stack(&self) -> usize {
        self.stack_effect().0
    }

    pub fn produced_stack(&self) -> usize {
        self.stack_effect().1
    }

    /// (consumed, produced) operand-stack slots.
    fn stack_effect(&self) -> (usize, usize) {
        use Instruction::*;
        match self {
            Pop => (1, 0),
            Dup => (0, 1),
            LoadObject(_) | LoadCachedObject(_) => (0, 1),
            Arithmetic { .. } | Compare { .. } | Bitwise { .. } => (2, 1),
            Unary { .. } | Convert { .. } => (1, 1),
            Local { access, .. } => access.stack_effect(),
            InitializeLocal { .. } => (0, 0),
            Branch { kind, .. } => kind.stack_effect(),
            Goto {
                has_result,
                has_value,
                ..
            } => (*has_value as usize, *has_result as usize),
            EnterTryCatchFinally { .. } | EnterTryFault { .. } => (0, 0),
            EnterFinally(_) | LeaveFinally | EnterFault(_) | LeaveFault => (0, 0),
            EnterExceptionHandler { has_value } => (*has_value as usize, 1),
            LeaveExceptionHandler { has_value, .. } => (*has_value as usize, *has_value as usize),
            EnterExceptionFilter { has_value } => (*has_value as usize, 1),
            LeaveExceptionFilter { has_value } => (1, *has_value as usize),
            Throw {
                has_result,
                rethrow,
            } => (!*rethrow as usize, *has_result as usize),
            New { arg_count, .. } => (*arg_count, 1),
            LoadField(_) => (1, 1),
            StoreField(_) => (2, 0),
            TypeIs(_) | TypeAs(_) | Cast(_) | NullCheck => (1, 1),
            Call(method) => (method.arity(), method.has_result() as usize),
            NewArray(_) => (1, 1),
            NewArrayInit { count, .. } => (*count, 1),
            GetArrayItem => (2, 1),
            SetArrayItem => (3, 0),
            ArrayLength => (1, 1),
        }
    }

    pub fn consumed_continuations(&self) -> usize {
        match self {
            Instruction::EnterFinally(_) | Instruction::EnterFault(_) => 1,
            _ => 0,
        }
    }

    pub fn produced_continuations(&self) -> usize {
        match self {
            Instruction::EnterTryCatchFinally { has_finally, .. } => *has_finally as usize,
            Instruction::EnterTryFault { .. } => 1,
            _ => 0,
        }
    }

    /// Executes against `frame`, returning the instruction-pointer delta.
    pub fn run(&self, frame: &mut Frame<'_>) -> InstrResult {
        use Instruction::*;
        match self {
            Pop => {
                frame.pop();
                Ok(1)
            }
            Dup => {
                let top = frame.peek().clone();
                frame.push(top);
                Ok(1)
            }
            LoadObject(value) => {
                frame.push(value.clone());
                Ok(1)
            }
            LoadCachedObject(index) => {
                let value = frame.interpreter().instructions().objects[*index].clone();
                frame.push(value);
                Ok(1)
            }
            Arithmetic { op, code } => arithmetic::run_binary(*op, *code, frame),
            Unary { op, code } => arithmetic::run_unary(*op, *code, frame),
            Compare { op, code, lifted } => comparison::run(*op, *code, *lifted, frame),
            Bitwise { op, code } => bitwise::run(*op, *code, frame),
            Convert {
                from,
                to,
                checked,
                lifted,
            } => convert::run(*from, *to, *checked, *lifted, frame),
            Local { access, index } => locals::run_access(*access, *index, frame),
            InitializeLocal { index, init } => locals::run_initialize(*index, init, frame),
            Branch { kind, offset } => control::run_branch(*kind, *offset, frame),
            Goto {
                label_index,
                has_value,
                label_target_gets_value,
                ..
            } => control::run_goto(*label_index, *has_value, *label_target_gets_value, frame),
            EnterTryCatchFinally {
                label_index,
                has_finally,
                handler,
            } => control::run_try_catch_finally(*label_index, *has_finally, handler.as_deref(), frame),
            EnterTryFault {
                label_index,
                handler,
            } => control::run_try_fault(*label_index, handler.as_deref(), frame),
            EnterFinally(label_index) | EnterFault(label_index) => {
                control::run_enter_finally(*label_index, frame)
            }
            LeaveFinally => control::run_leave_finally(frame),
            LeaveFault => control::run_leave_fault(frame),
            EnterExceptionHandler { .. } | EnterExceptionFilter { .. } | LeaveExceptionFilter { .. } => {
                Ok(1)
            }
            LeaveExceptionHandler { label_index, .. } => {
                control::run_leave_exception_handler(*label_index, frame)
            }
            Throw { rethrow, .. } => control::run_throw(*rethrow, frame),
            New { ty, arg_count } => objects::run_new(ty, *arg_count, frame),
            LoadField(index) => objects::run_load_field(*index, frame),
            StoreField(index) => objects::run_store_field(*index, frame),
            TypeIs(ty) => objects::run_type_is(ty, frame),
            TypeAs(ty) => objects::run_type_as(ty, frame),
            Cast(ty) => objects::run_cast(ty, frame),
            NullCheck => objects::run_null_check(frame),
            Call(method) => objects::run_call(method, frame),
            NewArray(element_type) => objects::run_new_array(element_type, frame),
            NewArrayInit {
                element_type,
                count,
            } => objects::run_new_array_init(element_type, *count, frame),
            GetArrayItem => objects::run_get_array_item(frame),
            SetArrayItem => objects::run_set_array_item(frame),
            ArrayLength => objects::run_array_length(frame),
        }
    }

    /// The boxed counterpart when this accesses or initializes local `index`.
    pub fn box_if_index_matches(&self, index: usize) -> Option<Arc<Instruction>> {
        locals::box_if_index_matches(self, index)
    }

    /// Resolves the offset of an unfixed branch.
    ///
    /// # Panics
    /// When called on anything but a branch whose offset is still unknown.
    pub fn fixup(&self, offset: i32) -> Arc<Instruction> {
        match self {
            Instruction::Branch {
                kind,
                offset: current,
            } => control::fixup_branch(*kind, *current, offset),
            other => panic!("{} is not an offset branch", other),
        }
    }

    pub fn name(&self) -> &'static str {
        use Instruction::*;
        match self {
            Pop => "Pop",
            Dup => "Dup",
            LoadObject(_) => "LoadObject",
            LoadCachedObject(_) => "LoadCachedObject",
            Arithmetic { op, .. } => op.name(),
            Unary { op, .. } => op.name(),
            Compare { op, .. } => op.name(),
            Bitwise { op, .. } => op.name(),
            Convert { checked: true, .. } => "ConvertChecked",
            Convert { .. } => "Convert",
            Local { access, .. } => access.name(),
            InitializeLocal { .. } => "InitializeLocal",
            Branch { kind, .. } => kind.name(),
            Goto { .. } => "Goto",
            EnterTryCatchFinally { .. } => "EnterTryCatchFinally",
            EnterTryFault { .. } => "EnterTryFault",
            EnterFinally(_) => "EnterFinally",
            LeaveFinally => "LeaveFinally",
            EnterFault(_) => "EnterFault",
            LeaveFault => "LeaveFault",
            EnterExceptionHandler { .. } => "EnterExceptionHandler",
            LeaveExceptionHandler { .. } => "LeaveExceptionHandler",
            EnterExceptionFilter { .. } => "EnterExceptionFilter",
            LeaveExceptionFilter { .. } => "LeaveExceptionFilter",
            Throw {
                has_result,
                rethrow,
            } => match (*has_result, *rethrow) {
                (true, false) => "Throw",
                (false, false) => "VoidThrow",
                (true, true) => "Rethrow",
                (false, true) => "VoidRethrow",
            },
            New { .. } => "New",
            LoadField(_) => "LoadField",
            StoreField(_) => "StoreField",
            TypeIs(_) => "TypeIs",
            TypeAs(_) => "TypeAs",
            Cast(_) => "Cast",
            NullCheck => "NullCheck",
            Call(_) => "Call",
            NewArray(_) => "NewArray",
            NewArrayInit { .. } => "NewArrayInit",
            GetArrayItem => "GetArrayItem",
            SetArrayItem => "SetArrayItem",
            ArrayLength => "ArrayLength",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        let name = self.name();
        match self {
            LoadObject(value) => write!(f, "{} {}", name, value),
            LoadCachedObject(index) => write!(f, "{} [{}]", name, index),
            Arithmetic { code, .. } | Unary { code, .. } | Bitwise { code, .. } => {
                write!(f, "{}{}", name, code)
            }
            Compare { code, lifted, .. } => {
                write!(f, "{}{}{}", name, code, if *lifted { " (lifted)" } else { "" })
            }
            Convert { from, to, .. } => write!(f, "{} {} -> {}", name, from, to),
            Local { index, .. } => write!(f, "{}({})", name, index),
            InitializeLocal { index, init } => write!(f, "{}({}) {}", name, index, init),
            Branch { offset, .. } if *offset == control::UNKNOWN_OFFSET => write!(f, "{} [unknown]", name),
            Branch { offset, .. } => write!(f, "{} [{:+}]", name, offset),
            Goto { label_index, .. }
            | EnterTryFault { label_index, .. }
            | LeaveExceptionHandler { label_index, .. }
            | EnterFinally(label_index)
            | EnterFault(label_index) => write!(f, "{} -> L{}", name, label_index),
            EnterTryCatchFinally {
                label_index,
                has_finally: true,
                ..
            } => write!(f, "{} finally -> L{}", name, label_index),
            New { ty, arg_count } => write!(f, "{} {}({})", name, ty, arg_count),
            LoadField(index) | StoreField(index) => write!(f, "{} #{}", name, index),
            TypeIs(ty) | TypeAs(ty) | Cast(ty) | NewArray(ty) => write!(f, "{} {}", name, ty),
            NewArrayInit {
                element_type,
                count,
            } => write!(f, "{} {}[{}]", name, element_type, count),
            Call(method) => write!(f, "{} {}/{}", name, method.name(), method.arity()),
            _ => f.write_str(name),
        }
    }
}

/// Object-table slots below this index share cached `LoadCachedObject` instances.
pub const LOAD_OBJECT_CACHE_SIZE: usize = 256;

const SMALL_INT_MIN: i32 = -100;
const SMALL_INT_MAX: i32 = 100;
const SMALL_INT_SLOT: usize = 3;

static STACK: Flyweights<2> = Flyweights::new();
static CONSTANTS: Flyweights<{ SMALL_INT_SLOT + (SMALL_INT_MAX - SMALL_INT_MIN + 1) as usize }> =
    Flyweights::new();
static CACHED_OBJECTS: Flyweights<LOAD_OBJECT_CACHE_SIZE> = Flyweights::new();

pub fn pop() -> Arc<Instruction> {
    STACK.get_or_init(0, || Instruction::Pop)
}

pub fn dup() -> Arc<Instruction> {
    STACK.get_or_init(1, || Instruction::Dup)
}

/// Shared `LoadObject` for null, booleans and Int32 constants in `-100..=100`.
pub fn load_constant(value: &Value) -> Option<Arc<Instruction>> {
    let slot = match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Int32(n) if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(n) => {
            SMALL_INT_SLOT + (n - SMALL_INT_MIN) as usize
        }
        _ => return None,
    };
    Some(CONSTANTS.get_or_init(slot, || Instruction::LoadObject(value.clone())))
}

pub fn load_object(value: Value) -> Arc<Instruction> {
    load_constant(&value).unwrap_or_else(|| Arc::new(Instruction::LoadObject(value)))
}

pub fn load_cached_object(index: usize) -> Arc<Instruction> {
    if index < CACHED_OBJECTS.len() {
        CACHED_OBJECTS.get_or_init(index, || Instruction::LoadCachedObject(index))
    } else {
        Arc::new(Instruction::LoadCachedObject(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_effects() {
        let add = arithmetic::create(ArithmeticOp::Add, &Type::int32());
        assert_eq!((add.consumed_stack(), add.produced_stack()), (2, 1));
        let assign = locals::create(LocalAccess::Assign, 0);
        assert_eq!((assign.consumed_stack(), assign.produced_stack()), (1, 1));
        let coalesce = control::branch(BranchKind::Coalescing);
        assert_eq!((coalesce.consumed_stack(), coalesce.produced_stack()), (1, 1));
        let rethrow = Instruction::Throw {
            has_result: false,
            rethrow: true,
        };
        assert_eq!(rethrow.consumed_stack(), 0);
    }

    #[test]
    fn test_continuation_effects() {
        let try_finally = Instruction::EnterTryCatchFinally {
            label_index: 0,
            has_finally: true,
            handler: None,
        };
        assert_eq!(try_finally.produced_continuations(), 1);
        assert_eq!(Instruction::EnterFinally(0).consumed_continuations(), 1);
        assert_eq!(Instruction::LeaveFinally.consumed_continuations(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(arithmetic::create(ArithmeticOp::Add, &Type::int32()).to_string(), "AddInt32");
        assert_eq!(locals::create(LocalAccess::Store, 3).to_string(), "StoreLocal(3)");
        assert_eq!(control::branch(BranchKind::IfTrue).to_string(), "BranchTrue [unknown]");
        assert_eq!(control::branch(BranchKind::IfTrue).fixup(4).to_string(), "BranchTrue [+4]");
    }

    #[test]
    fn test_small_constants_are_shared() {
        assert!(Arc::ptr_eq(&load_object(Value::Int32(7)), &load_object(Value::Int32(7))));
        assert!(Arc::ptr_eq(&load_object(Value::Null), &load_object(Value::Null)));
        assert!(load_constant(&Value::Int32(101)).is_none());
        assert!(load_constant(&Value::Int64(7)).is_none());
        assert!(matches!(*load_object(Value::Bool(true)), Instruction::LoadObject(Value::Bool(true))));
    }

    #[test]
    #[should_panic(expected = "is not an offset branch")]
    fn test_fixup_requires_branch() {
        pop().fixup(1);
    }
}
