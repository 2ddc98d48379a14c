use std::cell::RefCell;
use std::rc::Rc;

use super::types::{NumKind, StructType, Type};

pub type ArrayRef = Rc<RefCell<ArrayValue>>;
pub type StructRef = Rc<RefCell<StructValue>>;

/// A runtime value. Arrays and structs are shared references.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(Rc<str>),
    Array(ArrayRef),
    Struct(StructRef),
    Void,
}

/// Fixed-size buffer of one numeric kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub kind: NumKind,
    pub elements: Vec<Value>,
}

impl ArrayValue {
    pub fn zeroed(kind: NumKind, len: usize) -> Self {
        Self {
            kind,
            elements: vec![Value::zero(kind); len],
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Field values in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub ty: Rc<StructType>,
    pub fields: Vec<Value>,
}

impl StructValue {
    pub fn new(ty: &Rc<StructType>) -> Self {
        Self {
            ty: Rc::clone(ty),
            fields: ty.members.values().map(Value::zero_of).collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.ty
            .member(name)
            .and_then(|(index, _)| self.fields.get(index))
    }
}

impl Value {
    pub fn zero(kind: NumKind) -> Value {
        match kind {
            NumKind::I32 => Value::I32(0),
            NumKind::U32 => Value::U32(0),
            NumKind::I64 => Value::I64(0),
            NumKind::U64 => Value::U64(0),
            NumKind::F32 => Value::F32(0.0),
            NumKind::F64 => Value::F64(0.0),
        }
    }

    /// The default value of a scalar slot or struct member.
    pub fn zero_of(ty: &Type) -> Value {
        match ty {
            Type::Num(kind) => Value::zero(*kind),
            Type::Bool => Value::Bool(false),
            Type::Str => Value::Str(Rc::from("")),
            Type::Struct(st) => Value::new_struct(st),
            Type::Array(_) | Type::Function(_) | Type::Void => Value::Void,
        }
    }

    pub fn new_array(kind: NumKind, len: usize) -> Value {
        Value::Array(Rc::new(RefCell::new(ArrayValue::zeroed(kind, len))))
    }

    pub fn new_struct(ty: &Rc<StructType>) -> Value {
        Value::Struct(Rc::new(RefCell::new(StructValue::new(ty))))
    }

    /// A copy that shares no storage with `self`.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(arr) => Value::Array(Rc::new(RefCell::new(arr.borrow().clone()))),
            Value::Struct(st) => Value::Struct(Rc::new(RefCell::new(st.borrow().clone()))),
            other => other.clone(),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Value::I32(v) => *v,
            Value::U32(v) => *v as i32,
            Value::I64(v) => *v as i32,
            Value::U64(v) => *v as i32,
            Value::F32(v) => *v as i32,
            Value::F64(v) => *v as i32,
            Value::Bool(b) => i32::from(*b),
            _ => 0,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Value::I32(v) => *v as u32,
            Value::U32(v) => *v,
            Value::I64(v) => *v as u32,
            Value::U64(v) => *v as u32,
            Value::F32(v) => *v as u32,
            Value::F64(v) => *v as u32,
            Value::Bool(b) => u32::from(*b),
            _ => 0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::I32(v) => i64::from(*v),
            Value::U32(v) => i64::from(*v),
            Value::I64(v) => *v,
            Value::U64(v) => *v as i64,
            Value::F32(v) => *v as i64,
            Value::F64(v) => *v as i64,
            Value::Bool(b) => i64::from(*b),
            _ => 0,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match self {
            Value::I32(v) => *v as u64,
            Value::U32(v) => u64::from(*v),
            Value::I64(v) => *v as u64,
            Value::U64(v) => *v,
            Value::F32(v) => *v as u64,
            Value::F64(v) => *v as u64,
            Value::Bool(b) => u64::from(*b),
            _ => 0,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn as_f32(&self) -> f32 {
        match self {
            Value::I32(v) => *v as f32,
            Value::U32(v) => *v as f32,
            Value::I64(v) => *v as f32,
            Value::U64(v) => *v as f32,
            Value::F32(v) => *v,
            Value::F64(v) => *v as f32,
            Value::Bool(b) => f32::from(u8::from(*b)),
            _ => 0.0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::I32(v) => f64::from(*v),
            Value::U32(v) => f64::from(*v),
            Value::I64(v) => *v as f64,
            Value::U64(v) => *v as f64,
            Value::F32(v) => f64::from(*v),
            Value::F64(v) => *v,
            Value::Bool(b) => f64::from(u8::from(*b)),
            _ => 0.0,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::F32(v) => *v != 0.0,
            Value::F64(v) => *v != 0.0,
            other => other.as_u64() != 0,
        }
    }

    /// Native numeric conversion with C truncation/widening.
    pub fn convert(&self, kind: NumKind) -> Value {
        match kind {
            NumKind::I32 => Value::I32(self.as_i32()),
            NumKind::U32 => Value::U32(self.as_u32()),
            NumKind::I64 => Value::I64(self.as_i64()),
            NumKind::U64 => Value::U64(self.as_u64()),
            NumKind::F32 => Value::F32(self.as_f32()),
            NumKind::F64 => Value::F64(self.as_f64()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn conversions_truncate_and_wrap() {
        assert_eq!(Value::I64(0x1_0000_0005).convert(NumKind::I32), Value::I32(5));
        assert_eq!(Value::I32(-1).convert(NumKind::U32), Value::U32(u32::MAX));
        assert_eq!(Value::F64(3.9).convert(NumKind::I32), Value::I32(3));
        assert_eq!(Value::U32(7).convert(NumKind::F64), Value::F64(7.0));
        assert_eq!(Value::Bool(true).convert(NumKind::I64), Value::I64(1));
    }

    #[test]
    fn truthiness() {
        assert!(Value::I32(-3).as_bool());
        assert!(!Value::U64(0).as_bool());
        assert!(Value::F64(0.5).as_bool());
        assert!(!Value::F32(0.0).as_bool());
    }

    #[test]
    fn struct_defaults_follow_member_kinds() {
        let mut members = IndexMap::new();
        members.insert("isPow".to_string(), Type::I32);
        members.insert("ratio".to_string(), Type::F64);
        members.insert("flag".to_string(), Type::Bool);
        let ty = Rc::new(StructType {
            name: "r".into(),
            members,
        });
        let value = StructValue::new(&ty);
        assert_eq!(value.fields, vec![Value::I32(0), Value::F64(0.0), Value::Bool(false)]);
        assert_eq!(value.field("ratio"), Some(&Value::F64(0.0)));
    }

    #[test]
    fn deep_copy_does_not_alias() {
        let original = Value::new_array(NumKind::I32, 2);
        let copy = original.deep_copy();
        if let Value::Array(arr) = &copy {
            arr.borrow_mut().elements[0] = Value::I32(9);
        }
        let Value::Array(arr) = &original else { panic!() };
        assert_eq!(arr.borrow().elements[0], Value::I32(0));
    }
}
