// Runtime type model: primitive codes, nullable primitives, classes, structs and arrays.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::ExceptionKind;
use crate::vm::value::{Object, Value};

/// Primitive type tag used to select typed instruction variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeCode {
    Empty,
    Object,
    Boolean,
    Char,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
    String,
}

impl TypeCode {
    pub const COUNT: usize = 15;

    pub const ALL: [TypeCode; TypeCode::COUNT] = [
        TypeCode::Empty,
        TypeCode::Object,
        TypeCode::Boolean,
        TypeCode::Char,
        TypeCode::SByte,
        TypeCode::Byte,
        TypeCode::Int16,
        TypeCode::UInt16,
        TypeCode::Int32,
        TypeCode::UInt32,
        TypeCode::Int64,
        TypeCode::UInt64,
        TypeCode::Single,
        TypeCode::Double,
        TypeCode::String,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeCode::Empty => "Void",
            TypeCode::Object => "Object",
            TypeCode::Boolean => "Boolean",
            TypeCode::Char => "Char",
            TypeCode::SByte => "SByte",
            TypeCode::Byte => "Byte",
            TypeCode::Int16 => "Int16",
            TypeCode::UInt16 => "UInt16",
            TypeCode::Int32 => "Int32",
            TypeCode::UInt32 => "UInt32",
            TypeCode::Int64 => "Int64",
            TypeCode::UInt64 => "UInt64",
            TypeCode::Single => "Single",
            TypeCode::Double => "Double",
            TypeCode::String => "String",
        }
    }

    /// Integral codes, `Char` included.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeCode::Char
                | TypeCode::SByte
                | TypeCode::Byte
                | TypeCode::Int16
                | TypeCode::UInt16
                | TypeCode::Int32
                | TypeCode::UInt32
                | TypeCode::Int64
                | TypeCode::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeCode::Single | TypeCode::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_value_type(self) -> bool {
        self.is_numeric() || self == TypeCode::Boolean
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub enum TypeKind {
    Primitive(TypeCode),
    Nullable(TypeCode),
    Class,
    Struct,
    Array(Type),
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Type,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug)]
pub struct TypeData {
    name: String,
    kind: TypeKind,
    base: Option<Type>,
    fields: Vec<FieldInfo>,
}

/// Shared handle to a runtime type.
///
/// Primitive and nullable types are process-wide singletons. Classes and
/// structs compare by identity, arrays by element type.
#[derive(Debug, Clone)]
pub struct Type(Arc<TypeData>);

fn primitive_table() -> &'static [Type] {
    static PRIMITIVES: OnceLock<Vec<Type>> = OnceLock::new();
    PRIMITIVES.get_or_init(|| {
        TypeCode::ALL
            .iter()
            .map(|&code| Type::from_data(code.name().to_string(), TypeKind::Primitive(code), None, Vec::new()))
            .collect()
    })
}

fn nullable_table() -> &'static [Type] {
    static NULLABLES: OnceLock<Vec<Type>> = OnceLock::new();
    NULLABLES.get_or_init(|| {
        TypeCode::ALL
            .iter()
            .map(|&code| {
                Type::from_data(
                    format!("Nullable<{}>", code.name()),
                    TypeKind::Nullable(code),
                    None,
                    Vec::new(),
                )
            })
            .collect()
    })
}

fn exception_table() -> &'static [Type] {
    static EXCEPTIONS: OnceLock<Vec<Type>> = OnceLock::new();
    EXCEPTIONS.get_or_init(|| {
        let mut built: Vec<Type> = Vec::with_capacity(ExceptionKind::ALL.len());
        // Parents precede children in `ExceptionKind::ALL`.
        for kind in ExceptionKind::ALL {
            let base = kind.parent().map(|parent| built[parent as usize].clone());
            built.push(Type::from_data(
                kind.name().to_string(),
                TypeKind::Class,
                base,
                Vec::new(),
            ));
        }
        built
    })
}

impl Type {
    fn from_data(name: String, kind: TypeKind, base: Option<Type>, fields: Vec<FieldInfo>) -> Self {
        Type(Arc::new(TypeData {
            name,
            kind,
            base,
            fields,
        }))
    }

    pub fn primitive(code: TypeCode) -> Type {
        primitive_table()[code.index()].clone()
    }

    /// `Nullable<T>` over a primitive value type.
    pub fn nullable(code: TypeCode) -> Type {
        assert!(
            code.is_value_type(),
            "Nullable<{}> is not a valid type",
            code.name()
        );
        nullable_table()[code.index()].clone()
    }

    pub fn void() -> Type {
        Type::primitive(TypeCode::Empty)
    }

    pub fn object() -> Type {
        Type::primitive(TypeCode::Object)
    }

    pub fn boolean() -> Type {
        Type::primitive(TypeCode::Boolean)
    }

    pub fn int32() -> Type {
        Type::primitive(TypeCode::Int32)
    }

    pub fn int64() -> Type {
        Type::primitive(TypeCode::Int64)
    }

    pub fn double() -> Type {
        Type::primitive(TypeCode::Double)
    }

    pub fn string() -> Type {
        Type::primitive(TypeCode::String)
    }

    pub(crate) fn exception_kind(kind: ExceptionKind) -> Type {
        exception_table()[kind as usize].clone()
    }

    /// A reference type. Classes without an explicit base derive from `Object`.
    pub fn class(name: impl Into<String>, base: Option<Type>, fields: Vec<FieldInfo>) -> Type {
        let name = name.into();
        if let Some(base) = &base {
            assert!(
                matches!(base.0.kind, TypeKind::Class),
                "class {} cannot derive from {}",
                name,
                base.name()
            );
        }
        Type::from_data(name, TypeKind::Class, base, fields)
    }

    /// A user exception class deriving from `base` (an exception class).
    pub fn exception(name: impl Into<String>, base: Option<Type>) -> Type {
        let base = base.unwrap_or_else(|| ExceptionKind::Exception.ty());
        assert!(base.is_exception(), "{} is not an exception type", base.name());
        Type::from_data(name.into(), TypeKind::Class, Some(base), Vec::new())
    }

    /// A value type with fields; every default value is a fresh instance.
    pub fn structure(name: impl Into<String>, fields: Vec<FieldInfo>) -> Type {
        Type::from_data(name.into(), TypeKind::Struct, None, fields)
    }

    pub fn array(element: Type) -> Type {
        let name = format!("{}[]", element.name());
        Type::from_data(name, TypeKind::Array(element), None, Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn base(&self) -> Option<&Type> {
        self.0.base.as_ref()
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.0.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.0.fields.iter().position(|field| field.name == name)
    }

    /// The non-nullable primitive code; `Object` for every non-primitive type.
    pub fn type_code(&self) -> TypeCode {
        match &self.0.kind {
            TypeKind::Primitive(code) | TypeKind::Nullable(code) => *code,
            _ => TypeCode::Object,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self.0.kind, TypeKind::Nullable(_))
    }

    pub fn is_value_type(&self) -> bool {
        match &self.0.kind {
            TypeKind::Primitive(code) => code.is_value_type(),
            TypeKind::Nullable(_) | TypeKind::Struct => true,
            TypeKind::Class | TypeKind::Array(_) => false,
        }
    }

    /// True when values of this type may be null.
    pub fn accepts_null(&self) -> bool {
        !self.is_value_type() || self.is_nullable()
    }

    pub fn element_type(&self) -> Option<&Type> {
        match &self.0.kind {
            TypeKind::Array(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        ExceptionKind::Exception.ty().is_assignable_from(self)
    }

    /// Whether a value of type `other` can be stored in a location of this type.
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        match &self.0.kind {
            TypeKind::Primitive(TypeCode::Object) => return other.type_code() != TypeCode::Empty,
            TypeKind::Nullable(code) => {
                return matches!(other.0.kind, TypeKind::Primitive(c) if c == *code)
            }
            _ => {}
        }
        let mut current = other.base();
        while let Some(ty) = current {
            if ty == self {
                return true;
            }
            current = ty.base();
        }
        false
    }

    pub fn is_instance(&self, value: &Value) -> bool {
        value
            .runtime_type()
            .is_some_and(|runtime| self.is_assignable_from(&runtime))
    }

    pub fn default_value(&self) -> Value {
        match &self.0.kind {
            TypeKind::Primitive(code) => match code {
                TypeCode::Boolean => Value::Bool(false),
                TypeCode::Char => Value::Char(0),
                TypeCode::SByte => Value::SByte(0),
                TypeCode::Byte => Value::Byte(0),
                TypeCode::Int16 => Value::Int16(0),
                TypeCode::UInt16 => Value::UInt16(0),
                TypeCode::Int32 => Value::Int32(0),
                TypeCode::UInt32 => Value::UInt32(0),
                TypeCode::Int64 => Value::Int64(0),
                TypeCode::UInt64 => Value::UInt64(0),
                TypeCode::Single => Value::Single(0.0),
                TypeCode::Double => Value::Double(0.0),
                TypeCode::Empty | TypeCode::Object | TypeCode::String => Value::Null,
            },
            TypeKind::Struct => {
                let fields = self.0.fields.iter().map(|f| f.ty.default_value()).collect();
                Value::Object(Arc::new(Mutex::new(Object::new(self.clone(), fields))))
            }
            TypeKind::Nullable(_) | TypeKind::Class | TypeKind::Array(_) => Value::Null,
        }
    }

    /// The shared default for primitives, `None` when a fresh value is required or the default is null.
    pub fn primitive_default(&self) -> Option<Value> {
        match &self.0.kind {
            TypeKind::Primitive(code) if code.is_value_type() => Some(self.default_value()),
            _ => None,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&self.0.kind, &other.0.kind) {
            (TypeKind::Primitive(a), TypeKind::Primitive(b)) => a == b,
            (TypeKind::Nullable(a), TypeKind::Nullable(b)) => a == b,
            (TypeKind::Array(a), TypeKind::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_types_are_shared() {
        let a = Type::int32();
        let b = Type::primitive(TypeCode::Int32);
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_eq!(Type::nullable(TypeCode::Int32).type_code(), TypeCode::Int32);
        assert!(Type::nullable(TypeCode::Int32).is_nullable());
    }

    #[test]
    fn test_assignability() {
        let int = Type::int32();
        let nullable = Type::nullable(TypeCode::Int32);
        assert!(nullable.is_assignable_from(&int));
        assert!(!int.is_assignable_from(&nullable));
        assert!(Type::object().is_assignable_from(&int));

        let animal = Type::class("Animal", None, Vec::new());
        let dog = Type::class("Dog", Some(animal.clone()), Vec::new());
        assert!(animal.is_assignable_from(&dog));
        assert!(!dog.is_assignable_from(&animal));
        assert_ne!(animal, Type::class("Animal", None, Vec::new()));
    }

    #[test]
    fn test_user_exception_derives_from_exception() {
        let custom = Type::exception("ParseError", None);
        assert!(custom.is_exception());
        assert!(ExceptionKind::Exception.ty().is_assignable_from(&custom));
        assert!(!ExceptionKind::SystemException.ty().is_assignable_from(&custom));
    }

    #[test]
    fn test_struct_default_is_fresh() {
        let point = Type::structure(
            "Point",
            vec![FieldInfo::new("x", Type::int32()), FieldInfo::new("y", Type::int32())],
        );
        let a = point.default_value();
        let b = point.default_value();
        assert!(!a.reference_equals(&b));
        assert!(point.primitive_default().is_none());
        assert_eq!(Type::double().primitive_default(), Some(Value::Double(0.0)));
    }

    #[test]
    fn test_array_types_compare_structurally() {
        assert_eq!(Type::array(Type::int32()), Type::array(Type::int32()));
        assert_eq!(Type::array(Type::int32()).name(), "Int32[]");
    }
}
