use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// The six numeric kinds in promotion order, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NumKind {
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl NumKind {
    pub const ALL: [NumKind; 6] = [
        NumKind::I32,
        NumKind::U32,
        NumKind::I64,
        NumKind::U64,
        NumKind::F32,
        NumKind::F64,
    ];

    pub fn is_float(self) -> bool {
        matches!(self, NumKind::F32 | NumKind::F64)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float()
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, NumKind::U32 | NumKind::U64)
    }

    pub fn bits(self) -> u32 {
        match self {
            NumKind::I32 | NumKind::U32 | NumKind::F32 => 32,
            NumKind::I64 | NumKind::U64 | NumKind::F64 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NumKind::I32 => "i32",
            NumKind::U32 => "u32",
            NumKind::I64 => "i64",
            NumKind::U64 => "u64",
            NumKind::F32 => "f32",
            NumKind::F64 => "f64",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Num(NumKind),
    Bool,
    Str,
    Array(Box<Type>),
    Function(Rc<FunctionType>),
    Struct(Rc<StructType>),
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Type,
}

/// A declared struct: ordered members, compared by name and member order.
#[derive(Debug, Clone)]
pub struct StructType {
    pub name: String,
    pub members: IndexMap<String, Type>,
}

impl PartialEq for StructType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.members.iter().eq(other.members.iter())
    }
}

impl StructType {
    /// Offset and type of a member.
    pub fn member(&self, name: &str) -> Option<(usize, &Type)> {
        self.members.get_full(name).map(|(index, _, ty)| (index, ty))
    }
}

/// Operand types that have no common numeric type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeError {
    pub left: Type,
    pub right: Type,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no common numeric type for {} and {}", self.left, self.right)
    }
}

impl std::error::Error for TypeError {}

impl Type {
    pub const I32: Type = Type::Num(NumKind::I32);
    pub const U32: Type = Type::Num(NumKind::U32);
    pub const I64: Type = Type::Num(NumKind::I64);
    pub const U64: Type = Type::Num(NumKind::U64);
    pub const F32: Type = Type::Num(NumKind::F32);
    pub const F64: Type = Type::Num(NumKind::F64);

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Num(_))
    }

    pub fn num_kind(&self) -> Option<NumKind> {
        match self {
            Type::Num(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Whether values of this type live in a heap slot rather than a scalar slot.
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Array(_) | Type::Struct(_))
    }

    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Member lookup on struct types.
    pub fn member(&self, name: &str) -> Option<(usize, &Type)> {
        match self {
            Type::Struct(st) => st.member(name),
            _ => None,
        }
    }
}

/// The higher-ranked numeric kind of the two operands.
pub fn promote(left: &Type, right: &Type) -> Result<Type, TypeError> {
    match (left, right) {
        (Type::Num(a), Type::Num(b)) => Ok(Type::Num((*a).max(*b))),
        _ => Err(TypeError {
            left: left.clone(),
            right: right.clone(),
        }),
    }
}

/// Assignment compatibility: structurally equal, or both numeric.
pub fn can_assign(target: &Type, value: &Type) -> bool {
    target == value || (target.is_numeric() && value.is_numeric())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Num(kind) => write!(f, "{}", kind.name()),
            Type::Bool => write!(f, "bool"),
            Type::Str => write!(f, "string"),
            Type::Array(elem) => write!(f, "{elem}[]"),
            Type::Function(func) => {
                write!(f, "{}(", func.ret)?;
                for (i, p) in func.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")
            }
            Type::Struct(st) => write!(f, "struct {}", st.name),
            Type::Void => write!(f, "void"),
        }
    }
}
