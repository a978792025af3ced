// Numeric conversions between the integral, char and floating-point codes.
//
// Integer sources are widened to i128 first so a single range check covers
// every destination. Float sources truncate toward zero; unchecked float to
// 8/16-bit destinations goes through Int32 and wraps, wider destinations
// saturate (NaN becomes zero).

use std::sync::Arc;

use super::cache::Flyweights;
use super::Instruction;
use crate::error::{Exception, ExceptionRef, InstrResult};
use crate::types::{Type, TypeCode};
use crate::vm::frame::Frame;
use crate::vm::value::Value;

fn integer_operand(value: &Value) -> Option<i128> {
    Some(match value {
        Value::Char(v) => *v as i128,
        Value::SByte(v) => *v as i128,
        Value::Byte(v) => *v as i128,
        Value::Int16(v) => *v as i128,
        Value::UInt16(v) => *v as i128,
        Value::Int32(v) => *v as i128,
        Value::UInt32(v) => *v as i128,
        Value::Int64(v) => *v as i128,
        Value::UInt64(v) => *v as i128,
        _ => return None,
    })
}

fn from_integer(v: i128, to: TypeCode, checked: bool) -> Result<Value, ExceptionRef> {
    macro_rules! narrow {
        ($ty:ty, $variant:ident) => {
            if checked {
                <$ty>::try_from(v)
                    .map(Value::$variant)
                    .map_err(|_| Exception::overflow())
            } else {
                Ok(Value::$variant(v as $ty))
            }
        };
    }

    match to {
        TypeCode::Char => narrow!(u16, Char),
        TypeCode::SByte => narrow!(i8, SByte),
        TypeCode::Byte => narrow!(u8, Byte),
        TypeCode::Int16 => narrow!(i16, Int16),
        TypeCode::UInt16 => narrow!(u16, UInt16),
        TypeCode::Int32 => narrow!(i32, Int32),
        TypeCode::UInt32 => narrow!(u32, UInt32),
        TypeCode::Int64 => narrow!(i64, Int64),
        TypeCode::UInt64 => narrow!(u64, UInt64),
        TypeCode::Single => Ok(Value::Single(v as f32)),
        TypeCode::Double => Ok(Value::Double(v as f64)),
        _ => unreachable!("conversion to {} is not numeric", to),
    }
}

fn from_float(v: f64, to: TypeCode, checked: bool) -> Result<Value, ExceptionRef> {
    macro_rules! checked_signed {
        ($ty:ty, $variant:ident) => {{
            let t = v.trunc();
            if t >= <$ty>::MIN as f64 && t < -(<$ty>::MIN as f64) {
                Ok(Value::$variant(t as $ty))
            } else {
                Err(Exception::overflow())
            }
        }};
    }
    macro_rules! checked_unsigned {
        ($ty:ty, $variant:ident) => {{
            let t = v.trunc();
            if t > -1.0 && t < <$ty>::MAX as f64 + 1.0 {
                Ok(Value::$variant(t as $ty))
            } else {
                Err(Exception::overflow())
            }
        }};
    }

    if checked && to.is_integer() {
        // NaN fails every range comparison below.
        return match to {
            TypeCode::Char => checked_unsigned!(u16, Char),
            TypeCode::SByte => checked_signed!(i8, SByte),
            TypeCode::Byte => checked_unsigned!(u8, Byte),
            TypeCode::Int16 => checked_signed!(i16, Int16),
            TypeCode::UInt16 => checked_unsigned!(u16, UInt16),
            TypeCode::Int32 => checked_signed!(i32, Int32),
            TypeCode::UInt32 => checked_unsigned!(u32, UInt32),
            TypeCode::Int64 => checked_signed!(i64, Int64),
            _ => checked_unsigned!(u64, UInt64),
        };
    }

    Ok(match to {
        TypeCode::Char => Value::Char(v as i32 as u16),
        TypeCode::SByte => Value::SByte(v as i32 as i8),
        TypeCode::Byte => Value::Byte(v as i32 as u8),
        TypeCode::Int16 => Value::Int16(v as i32 as i16),
        TypeCode::UInt16 => Value::UInt16(v as i32 as u16),
        TypeCode::Int32 => Value::Int32(v as i32),
        TypeCode::UInt32 => Value::UInt32(v as u32),
        TypeCode::Int64 => Value::Int64(v as i64),
        TypeCode::UInt64 => Value::UInt64(v as u64),
        TypeCode::Single => Value::Single(v as f32),
        TypeCode::Double => Value::Double(v),
        _ => unreachable!("conversion to {} is not numeric", to),
    })
}

/// Converts a non-null `value` of code `from` into code `to`.
pub(crate) fn convert(value: &Value, from: TypeCode, to: TypeCode, checked: bool) -> Result<Value, ExceptionRef> {
    if value.type_code() != from {
        return Err(Exception::invalid_cast(format!(
            "Unable to convert a value of type {} as {}",
            value.type_name(),
            from
        )));
    }
    match value {
        Value::Single(v) => from_float(*v as f64, to, checked),
        Value::Double(v) => from_float(*v, to, checked),
        other => match integer_operand(other) {
            Some(v) => from_integer(v, to, checked),
            None => unreachable!("conversion from {} is not numeric", from),
        },
    }
}

pub(crate) fn run(
    from: TypeCode,
    to: TypeCode,
    checked: bool,
    lifted: bool,
    frame: &mut Frame<'_>,
) -> InstrResult {
    let value = frame.pop();
    if value.is_null() {
        debug_assert!(lifted, "null reached a non-lifted conversion {} -> {}", from, to);
        frame.push(Value::Null);
    } else {
        frame.push(convert(&value, from, to, checked)?);
    }
    Ok(1)
}

static CONVERT: Flyweights<{ TypeCode::COUNT * TypeCode::COUNT * 4 }> = Flyweights::new();

/// Shared conversion instruction from `from` to `to`.
///
/// `lifted` marks a conversion between nullable types where null passes through.
pub fn create(from: &Type, to: &Type, checked: bool, lifted: bool) -> Arc<Instruction> {
    let (from_code, to_code) = (from.type_code(), to.type_code());
    assert!(
        from_code.is_numeric() && to_code.is_numeric(),
        "no numeric conversion from {} to {}",
        from,
        to
    );
    let index = ((from_code.index() * TypeCode::COUNT + to_code.index()) * 2 + checked as usize) * 2
        + lifted as usize;
    CONVERT.get_or_init(index, || Instruction::Convert {
        from: from_code,
        to: to_code,
        checked,
        lifted,
    })
}
