use std::fmt;
use std::sync::Arc;

use super::cache::Flyweights;
use super::Instruction;
use crate::error::InstrResult;
use crate::types::Type;
use crate::vm::frame::Frame;
use crate::vm::value::Value;

/// Local slots below this index share cached access instructions.
pub const LOCAL_INSTRUCTION_CACHE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalAccess {
    Load,
    /// Reads through the cell stored in the slot.
    LoadBoxed,
    /// Reads the value of a closure cell.
    LoadFromClosure,
    /// Pushes the closure cell itself.
    LoadFromClosureBoxed,
    Store,
    StoreBoxed,
    Assign,
    AssignBoxed,
    AssignToClosure,
}

impl LocalAccess {
    const COUNT: usize = 9;

    pub fn name(self) -> &'static str {
        match self {
            LocalAccess::Load => "LoadLocal",
            LocalAccess::LoadBoxed => "LoadLocalBox",
            LocalAccess::LoadFromClosure => "LoadLocalClosure",
            LocalAccess::LoadFromClosureBoxed => "LoadLocalClosureBox",
            LocalAccess::Store => "StoreLocal",
            LocalAccess::StoreBoxed => "StoreLocalBox",
            LocalAccess::Assign => "AssignLocal",
            LocalAccess::AssignBoxed => "AssignLocalBox",
            LocalAccess::AssignToClosure => "AssignClosure",
        }
    }

    pub(crate) fn stack_effect(self) -> (usize, usize) {
        match self {
            LocalAccess::Load
            | LocalAccess::LoadBoxed
            | LocalAccess::LoadFromClosure
            | LocalAccess::LoadFromClosureBoxed => (0, 1),
            LocalAccess::Store | LocalAccess::StoreBoxed => (1, 0),
            LocalAccess::Assign | LocalAccess::AssignBoxed | LocalAccess::AssignToClosure => (1, 1),
        }
    }

    fn boxed(self) -> Option<LocalAccess> {
        match self {
            LocalAccess::Load => Some(LocalAccess::LoadBoxed),
            LocalAccess::Store => Some(LocalAccess::StoreBoxed),
            LocalAccess::Assign => Some(LocalAccess::AssignBoxed),
            _ => None,
        }
    }
}

/// How a local slot is set up when its scope is entered.
#[derive(Debug, Clone)]
pub enum LocalInit {
    /// Null reference.
    Reference,
    /// Shared immutable default, such as a primitive zero.
    ImmutableValue(Value),
    ImmutableBox(Value),
    /// Cell holding null.
    ImmutableRefBox,
    /// Fresh default instance of a value type on every execution.
    MutableValue(Type),
    MutableBox(Type),
    /// The caller already wrote the argument.
    Parameter,
    /// Moves the argument into a cell.
    ParameterBox,
}

impl LocalInit {
    fn boxed(&self) -> Option<LocalInit> {
        match self {
            LocalInit::Reference => Some(LocalInit::ImmutableRefBox),
            LocalInit::ImmutableValue(value) => Some(LocalInit::ImmutableBox(value.clone())),
            LocalInit::MutableValue(ty) => Some(LocalInit::MutableBox(ty.clone())),
            LocalInit::Parameter => Some(LocalInit::ParameterBox),
            _ => None,
        }
    }
}

impl fmt::Display for LocalInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalInit::Reference => write!(f, "Reference"),
            LocalInit::ImmutableValue(value) => write!(f, "ImmutableValue {}", value),
            LocalInit::ImmutableBox(value) => write!(f, "ImmutableBox {}", value),
            LocalInit::ImmutableRefBox => write!(f, "ImmutableRefBox"),
            LocalInit::MutableValue(ty) => write!(f, "MutableValue {}", ty),
            LocalInit::MutableBox(ty) => write!(f, "MutableBox {}", ty),
            LocalInit::Parameter => write!(f, "Parameter"),
            LocalInit::ParameterBox => write!(f, "ParameterBox"),
        }
    }
}

pub(crate) fn run_access(access: LocalAccess, index: usize, frame: &mut Frame<'_>) -> InstrResult {
    match access {
        LocalAccess::Load => {
            let value = frame.data[index].clone();
            if let Value::Cell(id) = &value {
                frame.capture_cell(*id);
            }
            frame.push(value);
        }
        LocalAccess::LoadBoxed => {
            let cell = frame.cell_at(index);
            let value = frame.cells().get(cell);
            frame.push(value);
        }
        LocalAccess::LoadFromClosure => {
            let cell = frame.closure_cell(index);
            let value = frame.cells().get(cell);
            frame.push(value);
        }
        LocalAccess::LoadFromClosureBoxed => {
            let cell = frame.closure_cell(index);
            frame.push(Value::Cell(cell));
        }
        LocalAccess::Store => {
            let value = frame.pop();
            frame.data[index] = value;
        }
        LocalAccess::StoreBoxed => {
            let cell = frame.cell_at(index);
            let value = frame.pop();
            frame.cells().set(cell, value);
        }
        LocalAccess::Assign => {
            frame.data[index] = frame.peek().clone();
        }
        LocalAccess::AssignBoxed => {
            let cell = frame.cell_at(index);
            let value = frame.peek().clone();
            frame.cells().set(cell, value);
        }
        LocalAccess::AssignToClosure => {
            let cell = frame.closure_cell(index);
            let value = frame.peek().clone();
            frame.cells().set(cell, value);
        }
    }
    Ok(1)
}

pub(crate) fn run_initialize(index: usize, init: &LocalInit, frame: &mut Frame<'_>) -> InstrResult {
    let value = match init {
        LocalInit::Reference => Value::Null,
        LocalInit::ImmutableValue(value) => value.clone(),
        LocalInit::MutableValue(ty) => ty.default_value(),
        LocalInit::Parameter => return Ok(1),
        LocalInit::ImmutableBox(value) => {
            frame.box_local(index, value.clone());
            return Ok(1);
        }
        LocalInit::ImmutableRefBox => {
            frame.box_local(index, Value::Null);
            return Ok(1);
        }
        LocalInit::MutableBox(ty) => {
            frame.box_local(index, ty.default_value());
            return Ok(1);
        }
        LocalInit::ParameterBox => {
            let argument = std::mem::take(&mut frame.data[index]);
            frame.box_local(index, argument);
            return Ok(1);
        }
    };
    frame.data[index] = value;
    Ok(1)
}

/// Boxed counterpart of a plain access or initialization of `index`.
pub(crate) fn box_if_index_matches(instruction: &Instruction, index: usize) -> Option<Arc<Instruction>> {
    match instruction {
        Instruction::Local { access, index: i } if *i == index => access.boxed().map(|boxed| create(boxed, index)),
        Instruction::InitializeLocal { index: i, init } if *i == index => init
            .boxed()
            .map(|init| Arc::new(Instruction::InitializeLocal { index, init })),
        _ => None,
    }
}

static LOCALS: Flyweights<{ LocalAccess::COUNT * LOCAL_INSTRUCTION_CACHE_SIZE }> = Flyweights::new();

pub fn create(access: LocalAccess, index: usize) -> Arc<Instruction> {
    if index < LOCAL_INSTRUCTION_CACHE_SIZE {
        LOCALS.get_or_init(access as usize * LOCAL_INSTRUCTION_CACHE_SIZE + index, || {
            Instruction::Local { access, index }
        })
    } else {
        Arc::new(Instruction::Local { access, index })
    }
}

/// Initialization for a local of type `ty`: shared primitive default,
/// fresh struct instance, or null.
pub fn initialize(index: usize, ty: &Type) -> Arc<Instruction> {
    let init = if let Some(value) = ty.primitive_default() {
        LocalInit::ImmutableValue(value)
    } else if ty.is_value_type() && !ty.is_nullable() {
        LocalInit::MutableValue(ty.clone())
    } else {
        LocalInit::Reference
    };
    Arc::new(Instruction::InitializeLocal { index, init })
}

pub fn initialize_parameter(index: usize) -> Arc<Instruction> {
    Arc::new(Instruction::InitializeLocal {
        index,
        init: LocalInit::Parameter,
    })
}
