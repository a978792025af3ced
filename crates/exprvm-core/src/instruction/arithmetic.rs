// Binary and unary arithmetic over the numeric primitive types.

use std::fmt;
use std::sync::Arc;

use super::cache::Flyweights;
use super::Instruction;
use crate::error::{Exception, ExceptionRef, InstrResult};
use crate::types::{Type, TypeCode};
use crate::vm::frame::Frame;
use crate::vm::value::{Primitive, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    AddChecked,
    Sub,
    SubChecked,
    Mul,
    MulChecked,
    Div,
    Modulo,
}

impl ArithmeticOp {
    const COUNT: usize = 8;

    pub fn name(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "Add",
            ArithmeticOp::AddChecked => "AddOvf",
            ArithmeticOp::Sub => "Sub",
            ArithmeticOp::SubChecked => "SubOvf",
            ArithmeticOp::Mul => "Mul",
            ArithmeticOp::MulChecked => "MulOvf",
            ArithmeticOp::Div => "Div",
            ArithmeticOp::Modulo => "Modulo",
        }
    }

    fn unchecked(self) -> ArithmeticOp {
        match self {
            ArithmeticOp::AddChecked => ArithmeticOp::Add,
            ArithmeticOp::SubChecked => ArithmeticOp::Sub,
            ArithmeticOp::MulChecked => ArithmeticOp::Mul,
            op => op,
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    NegateChecked,
    Increment,
    Decrement,
    OnesComplement,
    Not,
}

impl UnaryOp {
    const COUNT: usize = 6;

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Negate => "Negate",
            UnaryOp::NegateChecked => "NegateOvf",
            UnaryOp::Increment => "Increment",
            UnaryOp::Decrement => "Decrement",
            UnaryOp::OnesComplement => "OnesComplement",
            UnaryOp::Not => "Not",
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-type arithmetic with the overflow and division rules of the instruction set.
pub(crate) trait Arith: Primitive {
    fn add(self, rhs: Self) -> Self;
    fn add_checked(self, rhs: Self) -> Option<Self>;
    fn sub(self, rhs: Self) -> Self;
    fn sub_checked(self, rhs: Self) -> Option<Self>;
    fn mul(self, rhs: Self) -> Self;
    fn mul_checked(self, rhs: Self) -> Option<Self>;
    fn div(self, rhs: Self) -> Result<Self, ExceptionRef>;
    fn rem(self, rhs: Self) -> Result<Self, ExceptionRef>;
    fn neg(self) -> Self;
    fn neg_checked(self) -> Option<Self>;
    fn inc(self) -> Self;
    fn dec(self) -> Self;
}

// `$promoted` marks types narrower than 32 bits: they compute in Int32 and
// truncate back, so `MIN / -1` wraps instead of overflowing.
macro_rules! impl_integer_arith {
    ($($ty:ty => $promoted:expr;)*) => {
        $(
            impl Arith for $ty {
                #[inline]
                fn add(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }

                #[inline]
                fn add_checked(self, rhs: Self) -> Option<Self> {
                    self.checked_add(rhs)
                }

                #[inline]
                fn sub(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }

                #[inline]
                fn sub_checked(self, rhs: Self) -> Option<Self> {
                    self.checked_sub(rhs)
                }

                #[inline]
                fn mul(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }

                #[inline]
                fn mul_checked(self, rhs: Self) -> Option<Self> {
                    self.checked_mul(rhs)
                }

                fn div(self, rhs: Self) -> Result<Self, ExceptionRef> {
                    if rhs == 0 {
                        return Err(Exception::divide_by_zero());
                    }
                    if $promoted {
                        Ok(self.wrapping_div(rhs))
                    } else {
                        self.checked_div(rhs).ok_or_else(Exception::overflow)
                    }
                }

                fn rem(self, rhs: Self) -> Result<Self, ExceptionRef> {
                    if rhs == 0 {
                        return Err(Exception::divide_by_zero());
                    }
                    if $promoted {
                        Ok(self.wrapping_rem(rhs))
                    } else {
                        self.checked_rem(rhs).ok_or_else(Exception::overflow)
                    }
                }

                #[inline]
                fn neg(self) -> Self {
                    self.wrapping_neg()
                }

                #[inline]
                fn neg_checked(self) -> Option<Self> {
                    self.checked_neg()
                }

                #[inline]
                fn inc(self) -> Self {
                    self.wrapping_add(1)
                }

                #[inline]
                fn dec(self) -> Self {
                    self.wrapping_sub(1)
                }
            }
        )*
    };
}

impl_integer_arith! {
    i16 => true;
    u16 => true;
    i32 => false;
    u32 => false;
    i64 => false;
    u64 => false;
}

macro_rules! impl_float_arith {
    ($($ty:ty),*) => {
        $(
            impl Arith for $ty {
                #[inline]
                fn add(self, rhs: Self) -> Self {
                    self + rhs
                }

                #[inline]
                fn add_checked(self, rhs: Self) -> Option<Self> {
                    Some(self + rhs)
                }

                #[inline]
                fn sub(self, rhs: Self) -> Self {
                    self - rhs
                }

                #[inline]
                fn sub_checked(self, rhs: Self) -> Option<Self> {
                    Some(self - rhs)
                }

                #[inline]
                fn mul(self, rhs: Self) -> Self {
                    self * rhs
                }

                #[inline]
                fn mul_checked(self, rhs: Self) -> Option<Self> {
                    Some(self * rhs)
                }

                #[inline]
                fn div(self, rhs: Self) -> Result<Self, ExceptionRef> {
                    Ok(self / rhs)
                }

                #[inline]
                fn rem(self, rhs: Self) -> Result<Self, ExceptionRef> {
                    Ok(self % rhs)
                }

                #[inline]
                fn neg(self) -> Self {
                    -self
                }

                #[inline]
                fn neg_checked(self) -> Option<Self> {
                    Some(-self)
                }

                #[inline]
                fn inc(self) -> Self {
                    self + 1.0
                }

                #[inline]
                fn dec(self) -> Self {
                    self - 1.0
                }
            }
        )*
    };
}

impl_float_arith!(f32, f64);

/// Integer-only operations for `OnesComplement` and `Not`.
pub(crate) trait Complement: Primitive {
    fn complement(self) -> Self;
}

macro_rules! impl_complement {
    ($($ty:ty),*) => {
        $(
            impl Complement for $ty {
                #[inline]
                fn complement(self) -> Self {
                    !self
                }
            }
        )*
    };
}

impl_complement!(i8, u8, i16, u16, i32, u32, i64, u64);

pub(crate) fn operand_mismatch(op: &str, code: TypeCode, value: &Value) -> ExceptionRef {
    Exception::invalid_cast(format!(
        "{}.{} cannot operate on a value of type {}",
        op,
        code,
        value.type_name()
    ))
}

fn binary<T: Arith>(op: ArithmeticOp, left: &Value, right: &Value) -> Result<Value, ExceptionRef> {
    let l = T::from_value(left).ok_or_else(|| operand_mismatch(op.name(), T::CODE, left))?;
    let r = T::from_value(right).ok_or_else(|| operand_mismatch(op.name(), T::CODE, right))?;
    let result = match op {
        ArithmeticOp::Add => l.add(r),
        ArithmeticOp::AddChecked => l.add_checked(r).ok_or_else(Exception::overflow)?,
        ArithmeticOp::Sub => l.sub(r),
        ArithmeticOp::SubChecked => l.sub_checked(r).ok_or_else(Exception::overflow)?,
        ArithmeticOp::Mul => l.mul(r),
        ArithmeticOp::MulChecked => l.mul_checked(r).ok_or_else(Exception::overflow)?,
        ArithmeticOp::Div => l.div(r)?,
        ArithmeticOp::Modulo => l.rem(r)?,
    };
    Ok(result.into_value())
}

fn unary<T: Arith>(op: UnaryOp, operand: &Value) -> Result<Value, ExceptionRef> {
    let v = T::from_value(operand).ok_or_else(|| operand_mismatch(op.name(), T::CODE, operand))?;
    let result = match op {
        UnaryOp::Negate => v.neg(),
        UnaryOp::NegateChecked => v.neg_checked().ok_or_else(Exception::overflow)?,
        UnaryOp::Increment => v.inc(),
        UnaryOp::Decrement => v.dec(),
        UnaryOp::OnesComplement | UnaryOp::Not => {
            unreachable!("{} is dispatched through the complement path", op)
        }
    };
    Ok(result.into_value())
}

fn complement<T: Complement>(op: UnaryOp, operand: &Value) -> Result<Value, ExceptionRef> {
    let v = T::from_value(operand).ok_or_else(|| operand_mismatch(op.name(), T::CODE, operand))?;
    Ok(v.complement().into_value())
}

pub(crate) fn eval_binary(
    op: ArithmeticOp,
    code: TypeCode,
    left: &Value,
    right: &Value,
) -> Result<Value, ExceptionRef> {
    match code {
        TypeCode::Int16 => binary::<i16>(op, left, right),
        TypeCode::UInt16 => binary::<u16>(op, left, right),
        TypeCode::Int32 => binary::<i32>(op, left, right),
        TypeCode::UInt32 => binary::<u32>(op, left, right),
        TypeCode::Int64 => binary::<i64>(op, left, right),
        TypeCode::UInt64 => binary::<u64>(op, left, right),
        TypeCode::Single => binary::<f32>(op, left, right),
        TypeCode::Double => binary::<f64>(op, left, right),
        _ => unreachable!("{}.{} is not a valid arithmetic instruction", op, code),
    }
}

pub(crate) fn eval_unary(op: UnaryOp, code: TypeCode, operand: &Value) -> Result<Value, ExceptionRef> {
    match op {
        UnaryOp::Not if code == TypeCode::Boolean => match operand {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(operand_mismatch(op.name(), code, other)),
        },
        UnaryOp::Not | UnaryOp::OnesComplement => match code {
            TypeCode::SByte => complement::<i8>(op, operand),
            TypeCode::Byte => complement::<u8>(op, operand),
            TypeCode::Int16 => complement::<i16>(op, operand),
            TypeCode::UInt16 => complement::<u16>(op, operand),
            TypeCode::Int32 => complement::<i32>(op, operand),
            TypeCode::UInt32 => complement::<u32>(op, operand),
            TypeCode::Int64 => complement::<i64>(op, operand),
            TypeCode::UInt64 => complement::<u64>(op, operand),
            _ => unreachable!("{}.{} is not a valid unary instruction", op, code),
        },
        _ => match code {
            TypeCode::Int16 => unary::<i16>(op, operand),
            TypeCode::UInt16 => unary::<u16>(op, operand),
            TypeCode::Int32 => unary::<i32>(op, operand),
            TypeCode::UInt32 => unary::<u32>(op, operand),
            TypeCode::Int64 => unary::<i64>(op, operand),
            TypeCode::UInt64 => unary::<u64>(op, operand),
            TypeCode::Single => unary::<f32>(op, operand),
            TypeCode::Double => unary::<f64>(op, operand),
            _ => unreachable!("{}.{} is not a valid unary instruction", op, code),
        },
    }
}

pub(crate) fn run_binary(op: ArithmeticOp, code: TypeCode, frame: &mut Frame<'_>) -> InstrResult {
    let right = frame.pop();
    let left = frame.pop();
    if left.is_null() || right.is_null() {
        frame.push(Value::Null);
    } else {
        frame.push(eval_binary(op, code, &left, &right)?);
    }
    Ok(1)
}

pub(crate) fn run_unary(op: UnaryOp, code: TypeCode, frame: &mut Frame<'_>) -> InstrResult {
    let operand = frame.pop();
    if operand.is_null() {
        frame.push(Value::Null);
    } else {
        frame.push(eval_unary(op, code, &operand)?);
    }
    Ok(1)
}

static BINARY: Flyweights<{ ArithmeticOp::COUNT * TypeCode::COUNT }> = Flyweights::new();
static UNARY: Flyweights<{ UnaryOp::COUNT * TypeCode::COUNT }> = Flyweights::new();

fn supports_binary(code: TypeCode) -> bool {
    matches!(
        code,
        TypeCode::Int16
            | TypeCode::UInt16
            | TypeCode::Int32
            | TypeCode::UInt32
            | TypeCode::Int64
            | TypeCode::UInt64
            | TypeCode::Single
            | TypeCode::Double
    )
}

/// Shared binary arithmetic instruction for `ty` (nullable types share the underlying instance).
pub fn create(op: ArithmeticOp, ty: &Type) -> Arc<Instruction> {
    let code = ty.type_code();
    assert!(supports_binary(code), "{} is not supported for {}", op, ty);
    // Checked float arithmetic cannot overflow.
    let op = if code.is_float() { op.unchecked() } else { op };
    BINARY.get_or_init(op as usize * TypeCode::COUNT + code.index(), || {
        Instruction::Arithmetic { op, code }
    })
}

/// Shared unary instruction for `ty`.
pub fn create_unary(op: UnaryOp, ty: &Type) -> Arc<Instruction> {
    let code = ty.type_code();
    let op = match op {
        UnaryOp::NegateChecked if !matches!(code, TypeCode::Int16 | TypeCode::Int32 | TypeCode::Int64) => {
            UnaryOp::Negate
        }
        op => op,
    };
    let supported = match op {
        UnaryOp::Not => code == TypeCode::Boolean || (code.is_integer() && code != TypeCode::Char),
        UnaryOp::OnesComplement => code.is_integer() && code != TypeCode::Char,
        _ => supports_binary(code),
    };
    assert!(supported, "{} is not supported for {}", op, ty);
    UNARY.get_or_init(op as usize * TypeCode::COUNT + code.index(), || {
        Instruction::Unary { op, code }
    })
}
