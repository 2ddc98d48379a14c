//! Native operation tables.
//!
//! Lowering picks one function pointer per operator node from these tables
//! based on the promoted operand kind; evaluation then calls it directly.
//! Operands always arrive already converted to that kind.

use super::ast::BinOp;
use super::types::NumKind;
use super::value::Value;

pub type BinaryFn = fn(&Value, &Value) -> Value;
pub type UnaryFn = fn(&Value) -> Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Algebraic family of a syntactic binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpFamily {
    Arithmetic(Arith),
    Bitwise(Arith),
    Relational(Compare),
    /// `&&` when true, `||` when false.
    Logical(bool),
}

pub fn family(op: BinOp) -> OpFamily {
    match op {
        BinOp::Add => OpFamily::Arithmetic(Arith::Add),
        BinOp::Sub => OpFamily::Arithmetic(Arith::Sub),
        BinOp::Mul => OpFamily::Arithmetic(Arith::Mul),
        BinOp::Div => OpFamily::Arithmetic(Arith::Div),
        BinOp::Mod => OpFamily::Arithmetic(Arith::Rem),
        BinOp::Shl => OpFamily::Bitwise(Arith::Shl),
        BinOp::Shr => OpFamily::Bitwise(Arith::Shr),
        BinOp::BitAnd => OpFamily::Bitwise(Arith::BitAnd),
        BinOp::BitOr => OpFamily::Bitwise(Arith::BitOr),
        BinOp::BitXor => OpFamily::Bitwise(Arith::BitXor),
        BinOp::Lt => OpFamily::Relational(Compare::Lt),
        BinOp::Le => OpFamily::Relational(Compare::Le),
        BinOp::Gt => OpFamily::Relational(Compare::Gt),
        BinOp::Ge => OpFamily::Relational(Compare::Ge),
        BinOp::Eq => OpFamily::Relational(Compare::Eq),
        BinOp::Ne => OpFamily::Relational(Compare::Ne),
        BinOp::And => OpFamily::Logical(true),
        BinOp::Or => OpFamily::Logical(false),
    }
}

// Integer division and remainder by zero yield 0.
macro_rules! int_arith {
    ($op:expr, $variant:ident, $get:ident) => {
        match $op {
            Arith::Add => (|a: &Value, b: &Value| Value::$variant(a.$get().wrapping_add(b.$get()))) as BinaryFn,
            Arith::Sub => (|a: &Value, b: &Value| Value::$variant(a.$get().wrapping_sub(b.$get()))) as BinaryFn,
            Arith::Mul => (|a: &Value, b: &Value| Value::$variant(a.$get().wrapping_mul(b.$get()))) as BinaryFn,
            Arith::Div => (|a: &Value, b: &Value| {
                let d = b.$get();
                Value::$variant(if d == 0 { 0 } else { a.$get().wrapping_div(d) })
            }) as BinaryFn,
            Arith::Rem => (|a: &Value, b: &Value| {
                let d = b.$get();
                Value::$variant(if d == 0 { 0 } else { a.$get().wrapping_rem(d) })
            }) as BinaryFn,
            Arith::Shl => (|a: &Value, b: &Value| Value::$variant(a.$get().wrapping_shl(b.as_u32()))) as BinaryFn,
            Arith::Shr => (|a: &Value, b: &Value| Value::$variant(a.$get().wrapping_shr(b.as_u32()))) as BinaryFn,
            Arith::BitAnd => (|a: &Value, b: &Value| Value::$variant(a.$get() & b.$get())) as BinaryFn,
            Arith::BitOr => (|a: &Value, b: &Value| Value::$variant(a.$get() | b.$get())) as BinaryFn,
            Arith::BitXor => (|a: &Value, b: &Value| Value::$variant(a.$get() ^ b.$get())) as BinaryFn,
        }
    };
}

macro_rules! float_arith {
    ($op:expr, $variant:ident, $get:ident) => {
        match $op {
            Arith::Add => Some((|a: &Value, b: &Value| Value::$variant(a.$get() + b.$get())) as BinaryFn),
            Arith::Sub => Some((|a: &Value, b: &Value| Value::$variant(a.$get() - b.$get())) as BinaryFn),
            Arith::Mul => Some((|a: &Value, b: &Value| Value::$variant(a.$get() * b.$get())) as BinaryFn),
            Arith::Div => Some((|a: &Value, b: &Value| Value::$variant(a.$get() / b.$get())) as BinaryFn),
            _ => None,
        }
    };
}

macro_rules! comparisons {
    ($op:expr, $get:ident) => {
        match $op {
            Compare::Lt => (|a: &Value, b: &Value| Value::Bool(a.$get() < b.$get())) as BinaryFn,
            Compare::Le => (|a: &Value, b: &Value| Value::Bool(a.$get() <= b.$get())) as BinaryFn,
            Compare::Gt => (|a: &Value, b: &Value| Value::Bool(a.$get() > b.$get())) as BinaryFn,
            Compare::Ge => (|a: &Value, b: &Value| Value::Bool(a.$get() >= b.$get())) as BinaryFn,
            Compare::Eq => (|a: &Value, b: &Value| Value::Bool(a.$get() == b.$get())) as BinaryFn,
            Compare::Ne => (|a: &Value, b: &Value| Value::Bool(a.$get() != b.$get())) as BinaryFn,
        }
    };
}

/// The arithmetic or bitwise operation for `kind`, or `None` when the
/// kind does not support it (`%`, shifts and bit operators on floats).
pub fn arith(op: Arith, kind: NumKind) -> Option<BinaryFn> {
    match kind {
        NumKind::I32 => Some(int_arith!(op, I32, as_i32)),
        NumKind::U32 => Some(int_arith!(op, U32, as_u32)),
        NumKind::I64 => Some(int_arith!(op, I64, as_i64)),
        NumKind::U64 => Some(int_arith!(op, U64, as_u64)),
        NumKind::F32 => float_arith!(op, F32, as_f32),
        NumKind::F64 => float_arith!(op, F64, as_f64),
    }
}

pub fn compare(op: Compare, kind: NumKind) -> BinaryFn {
    match kind {
        NumKind::I32 => comparisons!(op, as_i32),
        NumKind::U32 => comparisons!(op, as_u32),
        NumKind::I64 => comparisons!(op, as_i64),
        NumKind::U64 => comparisons!(op, as_u64),
        NumKind::F32 => comparisons!(op, as_f32),
        NumKind::F64 => comparisons!(op, as_f64),
    }
}

/// `==` and `!=` between two bools.
pub fn compare_bool(op: Compare) -> Option<BinaryFn> {
    match op {
        Compare::Eq => Some((|a: &Value, b: &Value| Value::Bool(a.as_bool() == b.as_bool())) as BinaryFn),
        Compare::Ne => Some((|a: &Value, b: &Value| Value::Bool(a.as_bool() != b.as_bool())) as BinaryFn),
        _ => None,
    }
}

pub fn negate(kind: NumKind) -> UnaryFn {
    match kind {
        NumKind::I32 => (|a: &Value| Value::I32(a.as_i32().wrapping_neg())) as UnaryFn,
        NumKind::U32 => (|a: &Value| Value::U32(a.as_u32().wrapping_neg())) as UnaryFn,
        NumKind::I64 => (|a: &Value| Value::I64(a.as_i64().wrapping_neg())) as UnaryFn,
        NumKind::U64 => (|a: &Value| Value::U64(a.as_u64().wrapping_neg())) as UnaryFn,
        NumKind::F32 => (|a: &Value| Value::F32(-a.as_f32())) as UnaryFn,
        NumKind::F64 => (|a: &Value| Value::F64(-a.as_f64())) as UnaryFn,
    }
}

pub fn bit_not(kind: NumKind) -> Option<UnaryFn> {
    let op: UnaryFn = match kind {
        NumKind::I32 => |a: &Value| Value::I32(!a.as_i32()),
        NumKind::U32 => |a: &Value| Value::U32(!a.as_u32()),
        NumKind::I64 => |a: &Value| Value::I64(!a.as_i64()),
        NumKind::U64 => |a: &Value| Value::U64(!a.as_u64()),
        NumKind::F32 | NumKind::F64 => return None,
    };
    Some(op)
}

pub fn logical_not(value: &Value) -> Value {
    Value::Bool(!value.as_bool())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn apply(op: Arith, kind: NumKind, a: Value, b: Value) -> Value {
        arith(op, kind).unwrap()(&a, &b)
    }

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(
            apply(Arith::Add, NumKind::I32, Value::I32(i32::MAX), Value::I32(1)),
            Value::I32(i32::MIN)
        );
        assert_eq!(
            apply(Arith::Sub, NumKind::U32, Value::U32(0), Value::U32(1)),
            Value::U32(u32::MAX)
        );
        assert_eq!(
            apply(Arith::Div, NumKind::I64, Value::I64(i64::MIN), Value::I64(-1)),
            Value::I64(i64::MIN)
        );
    }

    #[test]
    fn integer_division_by_zero_is_zero() {
        assert_eq!(apply(Arith::Div, NumKind::I32, Value::I32(7), Value::I32(0)), Value::I32(0));
        assert_eq!(apply(Arith::Rem, NumKind::U64, Value::U64(7), Value::U64(0)), Value::U64(0));
    }

    #[test]
    fn float_division_is_ieee() {
        let Value::F64(v) = apply(Arith::Div, NumKind::F64, Value::F64(1.0), Value::F64(0.0)) else {
            panic!()
        };
        assert!(v.is_infinite());
    }

    #[test]
    fn shifts_mask_and_respect_sign() {
        assert_eq!(apply(Arith::Shl, NumKind::U32, Value::U32(1), Value::U32(33)), Value::U32(2));
        assert_eq!(apply(Arith::Shr, NumKind::I32, Value::I32(-8), Value::I32(1)), Value::I32(-4));
        assert_eq!(
            apply(Arith::Shr, NumKind::U32, Value::U32(0x8000_0000), Value::U32(31)),
            Value::U32(1)
        );
    }

    #[test]
    fn floats_have_no_bitwise_or_remainder() {
        assert!(arith(Arith::Rem, NumKind::F64).is_none());
        assert!(arith(Arith::BitXor, NumKind::F32).is_none());
        assert!(bit_not(NumKind::F64).is_none());
    }

    #[test]
    fn comparisons_use_the_kind() {
        let lt = compare(Compare::Lt, NumKind::U32);
        assert_eq!(lt(&Value::U32(u32::MAX), &Value::U32(1)), Value::Bool(false));
        let lt = compare(Compare::Lt, NumKind::I32);
        assert_eq!(lt(&Value::I32(-1), &Value::I32(1)), Value::Bool(true));
    }

    #[test]
    fn family_table() {
        assert_eq!(family(BinOp::Mod), OpFamily::Arithmetic(Arith::Rem));
        assert_eq!(family(BinOp::Shl), OpFamily::Bitwise(Arith::Shl));
        assert_eq!(family(BinOp::Ne), OpFamily::Relational(Compare::Ne));
        assert_eq!(family(BinOp::Or), OpFamily::Logical(false));
    }

    #[test]
    fn negation_wraps() {
        assert_eq!(negate(NumKind::I32)(&Value::I32(i32::MIN)), Value::I32(i32::MIN));
        assert_eq!(negate(NumKind::F32)(&Value::F32(2.0)), Value::F32(-2.0));
        assert_eq!(logical_not(&Value::I32(0)), Value::Bool(true));
    }
}
