use std::fmt;
use std::sync::Arc;

use super::arithmetic::operand_mismatch;
use super::cache::Flyweights;
use super::Instruction;
use crate::error::{ExceptionRef, InstrResult};
use crate::types::{Type, TypeCode};
use crate::vm::frame::Frame;
use crate::vm::value::{Char16, Primitive, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl CompareOp {
    const COUNT: usize = 6;

    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Equal => "Equal",
            CompareOp::NotEqual => "NotEqual",
            CompareOp::LessThan => "LessThan",
            CompareOp::LessThanOrEqual => "LessThanOrEqual",
            CompareOp::GreaterThan => "GreaterThan",
            CompareOp::GreaterThanOrEqual => "GreaterThanOrEqual",
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, CompareOp::Equal | CompareOp::NotEqual)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn compare<T: Primitive>(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExceptionRef> {
    let l = T::from_value(left).ok_or_else(|| operand_mismatch(op.name(), T::CODE, left))?;
    let r = T::from_value(right).ok_or_else(|| operand_mismatch(op.name(), T::CODE, right))?;
    Ok(match op {
        CompareOp::Equal => l == r,
        CompareOp::NotEqual => l != r,
        CompareOp::LessThan => l < r,
        CompareOp::LessThanOrEqual => l <= r,
        CompareOp::GreaterThan => l > r,
        CompareOp::GreaterThanOrEqual => l >= r,
    })
}

/// Compares two non-null operands.
pub(crate) fn eval(
    op: CompareOp,
    code: TypeCode,
    left: &Value,
    right: &Value,
) -> Result<bool, ExceptionRef> {
    match code {
        TypeCode::Boolean => compare::<bool>(op, left, right),
        TypeCode::Char => compare::<Char16>(op, left, right),
        TypeCode::SByte => compare::<i8>(op, left, right),
        TypeCode::Byte => compare::<u8>(op, left, right),
        TypeCode::Int16 => compare::<i16>(op, left, right),
        TypeCode::UInt16 => compare::<u16>(op, left, right),
        TypeCode::Int32 => compare::<i32>(op, left, right),
        TypeCode::UInt32 => compare::<u32>(op, left, right),
        TypeCode::Int64 => compare::<i64>(op, left, right),
        TypeCode::UInt64 => compare::<u64>(op, left, right),
        TypeCode::Single => compare::<f32>(op, left, right),
        TypeCode::Double => compare::<f64>(op, left, right),
        TypeCode::Object | TypeCode::String => {
            let same = left.reference_equals(right);
            Ok(if op == CompareOp::Equal { same } else { !same })
        }
        TypeCode::Empty => unreachable!("{}.Void is not a valid comparison", op),
    }
}

pub(crate) fn run(op: CompareOp, code: TypeCode, lifted: bool, frame: &mut Frame<'_>) -> InstrResult {
    let right = frame.pop();
    let left = frame.pop();
    let result = if left.is_null() || right.is_null() {
        if lifted {
            Value::Null
        } else {
            match op {
                CompareOp::Equal => Value::Bool(left.is_null() && right.is_null()),
                CompareOp::NotEqual => Value::Bool(!(left.is_null() && right.is_null())),
                _ => Value::Bool(false),
            }
        }
    } else {
        Value::Bool(eval(op, code, &left, &right)?)
    };
    frame.push(result);
    Ok(1)
}

static COMPARE: Flyweights<{ CompareOp::COUNT * TypeCode::COUNT * 2 }> = Flyweights::new();

/// Shared comparison instruction for operands of type `ty`.
///
/// With `lifted_to_null` a null operand yields null; otherwise equality treats
/// null as a value and ordering yields `false`.
pub fn create(op: CompareOp, ty: &Type, lifted_to_null: bool) -> Arc<Instruction> {
    let code = ty.type_code();
    let supported = match code {
        TypeCode::Empty => false,
        TypeCode::Boolean | TypeCode::Object | TypeCode::String => op.is_equality(),
        _ => true,
    };
    assert!(supported, "{} is not supported for {}", op, ty);
    let index = (op as usize * TypeCode::COUNT + code.index()) * 2 + lifted_to_null as usize;
    COMPARE.get_or_init(index, || Instruction::Compare {
        op,
        code,
        lifted: lifted_to_null,
    })
}
