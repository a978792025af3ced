use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::ExceptionRef;
use crate::types::{Type, TypeCode};

/// A runtime value on the operand stack, in a local slot or in a cell.
///
/// `Null` doubles as the null reference and the empty `Nullable<T>`.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    /// UTF-16 code unit
    Char(u16),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    String(Arc<str>),
    Object(Arc<Mutex<Object>>),
    Array(Arc<Mutex<ArrayObject>>),
    Exception(ExceptionRef),
    /// Slot holding a boxed local
    Cell(CellId),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn string(s: &str) -> Value {
        Value::String(Arc::from(s))
    }

    /// Primitive code of the value; `Object` for heap values, `Empty` for null.
    pub fn type_code(&self) -> TypeCode {
        match self {
            Value::Null => TypeCode::Empty,
            Value::Bool(_) => TypeCode::Boolean,
            Value::Char(_) => TypeCode::Char,
            Value::SByte(_) => TypeCode::SByte,
            Value::Byte(_) => TypeCode::Byte,
            Value::Int16(_) => TypeCode::Int16,
            Value::UInt16(_) => TypeCode::UInt16,
            Value::Int32(_) => TypeCode::Int32,
            Value::UInt32(_) => TypeCode::UInt32,
            Value::Int64(_) => TypeCode::Int64,
            Value::UInt64(_) => TypeCode::UInt64,
            Value::Single(_) => TypeCode::Single,
            Value::Double(_) => TypeCode::Double,
            Value::String(_) => TypeCode::String,
            Value::Object(_) | Value::Array(_) | Value::Exception(_) | Value::Cell(_) => {
                TypeCode::Object
            }
        }
    }

    /// Runtime type of a non-null value.
    pub fn runtime_type(&self) -> Option<Type> {
        match self {
            Value::Null | Value::Cell(_) => None,
            Value::Object(obj) => Some(obj.lock().ty.clone()),
            Value::Array(arr) => Some(Type::array(arr.lock().element_type.clone())),
            Value::Exception(exc) => Some(exc.ty().clone()),
            primitive => Some(Type::primitive(primitive.type_code())),
        }
    }

    pub fn type_name(&self) -> String {
        match self.runtime_type() {
            Some(ty) => ty.name().to_string(),
            None if self.is_null() => "null".to_string(),
            None => "cell".to_string(),
        }
    }

    /// Identity comparison for heap values; primitives and strings compare by value.
    pub fn reference_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Arc::ptr_eq(a, b),
            _ => self == other,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_exception(&self) -> Option<&ExceptionRef> {
        match self {
            Value::Exception(exc) => Some(exc),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::SByte(a), Value::SByte(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::UInt16(a), Value::UInt16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Single(a), Value::Single(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Arc::ptr_eq(a, b),
            (Value::Cell(a), Value::Cell(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => match char::from_u32(*c as u32) {
                Some(ch) => write!(f, "'{}'", ch),
                None => write!(f, "'\\u{:04x}'", c),
            },
            Value::SByte(n) => write!(f, "{}", n),
            Value::Byte(n) => write!(f, "{}", n),
            Value::Int16(n) => write!(f, "{}", n),
            Value::UInt16(n) => write!(f, "{}", n),
            Value::Int32(n) => write!(f, "{}", n),
            Value::UInt32(n) => write!(f, "{}", n),
            Value::Int64(n) => write!(f, "{}", n),
            Value::UInt64(n) => write!(f, "{}", n),
            Value::Single(n) => write!(f, "{}", n),
            Value::Double(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Object(obj) => write!(f, "<{}>", obj.lock().ty),
            Value::Array(arr) => {
                let arr = arr.lock();
                write!(f, "{}[{}]", arr.element_type, arr.items.len())
            }
            Value::Exception(exc) => write!(f, "{}", exc),
            Value::Cell(id) => write!(f, "<cell {}>", id.0),
        }
    }
}

/// Instance of a class or struct type with positional fields.
#[derive(Debug)]
pub struct Object {
    pub ty: Type,
    pub fields: Vec<Value>,
}

impl Object {
    pub fn new(ty: Type, fields: Vec<Value>) -> Self {
        Self { ty, fields }
    }
}

#[derive(Debug)]
pub struct ArrayObject {
    pub element_type: Type,
    pub items: Vec<Value>,
}

impl ArrayObject {
    pub fn new(element_type: Type, items: Vec<Value>) -> Self {
        Self {
            element_type,
            items,
        }
    }
}

/// Conversion between Rust scalars and `Value`.
pub trait Primitive: Copy + PartialOrd + 'static {
    const CODE: TypeCode;

    fn from_value(value: &Value) -> Option<Self>;
    fn into_value(self) -> Value;
}

macro_rules! impl_primitive {
    ($($ty:ty => $variant:ident, $code:ident;)*) => {
        $(
            impl Primitive for $ty {
                const CODE: TypeCode = TypeCode::$code;

                #[inline]
                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }

                #[inline]
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }
        )*
    };
}

impl_primitive! {
    bool => Bool, Boolean;
    i8 => SByte, SByte;
    u8 => Byte, Byte;
    i16 => Int16, Int16;
    u16 => UInt16, UInt16;
    i32 => Int32, Int32;
    u32 => UInt32, UInt32;
    i64 => Int64, Int64;
    u64 => UInt64, UInt64;
    f32 => Single, Single;
    f64 => Double, Double;
}

/// `u16` already maps to `UInt16`; chars travel through this wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Char16(pub u16);

impl Primitive for Char16 {
    const CODE: TypeCode = TypeCode::Char;

    #[inline]
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Char(c) => Some(Char16(*c)),
            _ => None,
        }
    }

    #[inline]
    fn into_value(self) -> Value {
        Value::Char(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(pub(crate) usize);

/// Storage for boxed locals and closure variables.
///
/// Cloning shares the arena, so a closure built by one frame observes
/// writes made by another. Released slots are handed out again by `alloc`.
#[derive(Debug, Clone, Default)]
pub struct CellArena(Rc<RefCell<CellSlots>>);

#[derive(Debug, Default)]
struct CellSlots {
    values: Vec<Value>,
    free: Vec<usize>,
}

impl CellArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&self, value: Value) -> CellId {
        let mut slots = self.0.borrow_mut();
        match slots.free.pop() {
            Some(slot) => {
                slots.values[slot] = value;
                CellId(slot)
            }
            None => {
                slots.values.push(value);
                CellId(slots.values.len() - 1)
            }
        }
    }

    /// Returns a cell to the arena. The id must not be used afterwards.
    pub fn release(&self, id: CellId) {
        let mut slots = self.0.borrow_mut();
        debug_assert!(!slots.free.contains(&id.0), "cell {} released twice", id.0);
        slots.values[id.0] = Value::Null;
        slots.free.push(id.0);
    }

    pub fn get(&self, id: CellId) -> Value {
        self.0.borrow().values[id.0].clone()
    }

    pub fn set(&self, id: CellId, value: Value) {
        self.0.borrow_mut().values[id.0] = value;
    }

    /// Number of slots, live or released.
    pub fn len(&self) -> usize {
        self.0.borrow().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cells allocated and not yet released.
    pub fn live(&self) -> usize {
        let slots = self.0.borrow();
        slots.values.len() - slots.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_equality() {
        let ty = Type::class("Node", None, Vec::new());
        let a = Value::Object(Arc::new(Mutex::new(Object::new(ty.clone(), Vec::new()))));
        let b = Value::Object(Arc::new(Mutex::new(Object::new(ty, Vec::new()))));
        assert!(a.reference_equals(&a.clone()));
        assert!(!a.reference_equals(&b));
        assert!(Value::Null.reference_equals(&Value::Null));
        assert!(!Value::Null.reference_equals(&a));
        assert!(Value::string("x").reference_equals(&Value::string("x")));
    }

    #[test]
    fn test_cells_are_shared_between_clones() {
        let arena = CellArena::new();
        let id = arena.alloc(Value::Int32(1));
        let other = arena.clone();
        other.set(id, Value::Int32(2));
        assert_eq!(arena.get(id), Value::Int32(2));
    }

    #[test]
    fn test_released_cells_are_reused() {
        let arena = CellArena::new();
        let a = arena.alloc(Value::Int32(1));
        let b = arena.alloc(Value::Int32(2));
        arena.release(a);
        assert_eq!(arena.live(), 1);
        let c = arena.alloc(Value::Int32(3));
        assert_eq!(c, a);
        assert_eq!(arena.get(c), Value::Int32(3));
        assert_eq!(arena.get(b), Value::Int32(2));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_primitive_round_trip_rejects_other_types() {
        assert_eq!(i32::from_value(&Value::Int32(7)), Some(7));
        assert_eq!(i32::from_value(&Value::Int64(7)), None);
        assert_eq!(Char16::from_value(&Value::Char(65)), Some(Char16(65)));
        assert_eq!(u16::from_value(&Value::Char(65)), None);
    }

    #[test]
    fn test_runtime_type() {
        assert_eq!(Value::Int16(3).runtime_type(), Some(Type::primitive(TypeCode::Int16)));
        assert_eq!(Value::Null.runtime_type(), None);
        assert_eq!(Value::Null.type_name(), "null");
    }
}
