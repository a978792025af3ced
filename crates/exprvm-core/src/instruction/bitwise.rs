use std::fmt;
use std::sync::Arc;

use super::arithmetic::operand_mismatch;
use super::cache::Flyweights;
use super::Instruction;
use crate::error::{ExceptionRef, InstrResult};
use crate::types::{Type, TypeCode};
use crate::vm::frame::Frame;
use crate::vm::value::{Primitive, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitwiseOp {
    And,
    Or,
    ExclusiveOr,
    LeftShift,
    RightShift,
}

impl BitwiseOp {
    const COUNT: usize = 5;

    pub fn name(self) -> &'static str {
        match self {
            BitwiseOp::And => "And",
            BitwiseOp::Or => "Or",
            BitwiseOp::ExclusiveOr => "ExclusiveOr",
            BitwiseOp::LeftShift => "LeftShift",
            BitwiseOp::RightShift => "RightShift",
        }
    }

    fn is_shift(self) -> bool {
        matches!(self, BitwiseOp::LeftShift | BitwiseOp::RightShift)
    }
}

impl fmt::Display for BitwiseOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) trait Bits: Primitive {
    fn and(self, rhs: Self) -> Self;
    fn or(self, rhs: Self) -> Self;
    fn xor(self, rhs: Self) -> Self;
    fn shl(self, count: i32) -> Self;
    fn shr(self, count: i32) -> Self;
}

// Narrow types shift in Int32 after promotion (count masked by 31) and
// truncate the result back to their own width.
macro_rules! impl_promoted_bits {
    ($($ty:ty),*) => {
        $(
            impl Bits for $ty {
                #[inline]
                fn and(self, rhs: Self) -> Self {
                    self & rhs
                }

                #[inline]
                fn or(self, rhs: Self) -> Self {
                    self | rhs
                }

                #[inline]
                fn xor(self, rhs: Self) -> Self {
                    self ^ rhs
                }

                #[inline]
                fn shl(self, count: i32) -> Self {
                    ((self as i32) << (count & 31)) as $ty
                }

                #[inline]
                fn shr(self, count: i32) -> Self {
                    ((self as i32) >> (count & 31)) as $ty
                }
            }
        )*
    };
}

impl_promoted_bits!(i8, u8, i16, u16);

macro_rules! impl_native_bits {
    ($($ty:ty),*) => {
        $(
            impl Bits for $ty {
                #[inline]
                fn and(self, rhs: Self) -> Self {
                    self & rhs
                }

                #[inline]
                fn or(self, rhs: Self) -> Self {
                    self | rhs
                }

                #[inline]
                fn xor(self, rhs: Self) -> Self {
                    self ^ rhs
                }

                // wrapping_shl/shr mask the count by the bit width.
                #[inline]
                fn shl(self, count: i32) -> Self {
                    self.wrapping_shl(count as u32)
                }

                #[inline]
                fn shr(self, count: i32) -> Self {
                    self.wrapping_shr(count as u32)
                }
            }
        )*
    };
}

impl_native_bits!(i32, u32, i64, u64);

fn apply<T: Bits>(op: BitwiseOp, left: &Value, right: &Value) -> Result<Value, ExceptionRef> {
    let l = T::from_value(left).ok_or_else(|| operand_mismatch(op.name(), T::CODE, left))?;
    let result = if op.is_shift() {
        let count = right
            .as_i32()
            .ok_or_else(|| operand_mismatch(op.name(), TypeCode::Int32, right))?;
        if op == BitwiseOp::LeftShift {
            l.shl(count)
        } else {
            l.shr(count)
        }
    } else {
        let r = T::from_value(right).ok_or_else(|| operand_mismatch(op.name(), T::CODE, right))?;
        match op {
            BitwiseOp::And => l.and(r),
            BitwiseOp::Or => l.or(r),
            _ => l.xor(r),
        }
    };
    Ok(result.into_value())
}

/// Three-valued logic over `bool?`.
fn logical(op: BitwiseOp, left: &Value, right: &Value) -> Result<Value, ExceptionRef> {
    let operand = |value: &Value| match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(operand_mismatch(op.name(), TypeCode::Boolean, other)),
    };
    let (l, r) = (operand(left)?, operand(right)?);
    let result = match op {
        BitwiseOp::And => match (l, r) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BitwiseOp::Or => match (l, r) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        BitwiseOp::ExclusiveOr => match (l, r) {
            (Some(a), Some(b)) => Some(a ^ b),
            _ => None,
        },
        _ => unreachable!("{} is not defined for Boolean", op),
    };
    Ok(result.map_or(Value::Null, Value::Bool))
}

pub(crate) fn eval(op: BitwiseOp, code: TypeCode, left: &Value, right: &Value) -> Result<Value, ExceptionRef> {
    match code {
        TypeCode::Boolean => logical(op, left, right),
        _ if left.is_null() || right.is_null() => Ok(Value::Null),
        TypeCode::SByte => apply::<i8>(op, left, right),
        TypeCode::Byte => apply::<u8>(op, left, right),
        TypeCode::Int16 => apply::<i16>(op, left, right),
        TypeCode::UInt16 => apply::<u16>(op, left, right),
        TypeCode::Int32 => apply::<i32>(op, left, right),
        TypeCode::UInt32 => apply::<u32>(op, left, right),
        TypeCode::Int64 => apply::<i64>(op, left, right),
        TypeCode::UInt64 => apply::<u64>(op, left, right),
        _ => unreachable!("{}.{} is not a valid bitwise instruction", op, code),
    }
}

pub(crate) fn run(op: BitwiseOp, code: TypeCode, frame: &mut Frame<'_>) -> InstrResult {
    let right = frame.pop();
    let left = frame.pop();
    frame.push(eval(op, code, &left, &right)?);
    Ok(1)
}

static BITWISE: Flyweights<{ BitwiseOp::COUNT * TypeCode::COUNT }> = Flyweights::new();

/// Shared bitwise instruction; for shifts `ty` is the type of the shifted operand.
pub fn create(op: BitwiseOp, ty: &Type) -> Arc<Instruction> {
    let code = ty.type_code();
    let supported = match code {
        TypeCode::Boolean => !op.is_shift(),
        TypeCode::Char => false,
        code => code.is_integer(),
    };
    assert!(supported, "{} is not supported for {}", op, ty);
    BITWISE.get_or_init(op as usize * TypeCode::COUNT + code.index(), || {
        Instruction::Bitwise { op, code }
    })
}
