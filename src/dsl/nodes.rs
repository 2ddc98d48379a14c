//! Typed, directly evaluable program produced by lowering.
//!
//! Every expression node carries the one type it was resolved to. Operator
//! nodes hold the native function picked for their operand kind, so the
//! evaluator never inspects types.

use std::rc::Rc;

use super::ast::Span;
use super::builtins::BuiltinOp;
use super::ops::{BinaryFn, UnaryFn};
use super::scope::{FrameLayout, FuncId, SlotRef};
use super::types::{FunctionType, NumKind, StructType, Type};
use super::value::Value;

/// A lowered translation unit.
#[derive(Debug)]
pub struct Program {
    pub functions: Vec<Function>,
    pub globals: FrameLayout,
    /// Global initializers in source order, run once before `main`.
    pub init: Vec<TypedStmt>,
    pub main: Option<FuncId>,
}

impl Program {
    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id)
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub ty: Rc<FunctionType>,
    pub layout: FrameLayout,
    /// `None` for a prototype that was never defined.
    pub body: Option<TypedStmt>,
    pub span: Span,
}

#[derive(Debug)]
pub struct TypedStmt {
    pub kind: TypedStmtKind,
    pub span: Span,
}

#[derive(Debug)]
pub enum TypedStmtKind {
    Expr(TypedExpr),
    Block(Vec<TypedStmt>),
    If {
        condition: TypedExpr,
        then_branch: Box<TypedStmt>,
        else_branch: Option<Box<TypedStmt>>,
    },
    /// `step` runs after the body and after `continue`.
    While {
        condition: TypedExpr,
        body: Box<TypedStmt>,
        step: Option<TypedExpr>,
    },
    DoWhile {
        body: Box<TypedStmt>,
        condition: TypedExpr,
    },
    Break,
    Continue,
    Return(Option<TypedExpr>),
    /// Allocate a zeroed array into a heap slot.
    NewArray {
        slot: SlotRef,
        kind: NumKind,
        len: TypedExpr,
    },
    NewStruct {
        slot: SlotRef,
        ty: Rc<StructType>,
    },
    /// Store an existing array/struct reference in a heap slot.
    BindHeap {
        slot: SlotRef,
        value: TypedExpr,
    },
}

/// A storage location an expression reads or writes.
#[derive(Debug)]
pub enum Place {
    Slot(SlotRef),
    /// A whole array or struct.
    Heap(SlotRef),
    Element {
        array: SlotRef,
        index: Box<TypedExpr>,
    },
    Field {
        owner: SlotRef,
        field: usize,
    },
}

#[derive(Debug)]
pub struct TypedExpr {
    pub kind: TypedExprKind,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug)]
pub enum TypedExprKind {
    Literal(Value),
    Load(Place),
    Argument(usize),
    /// Write and yield the stored value. A struct `Heap` target copies the
    /// fields in place.
    Assign {
        place: Place,
        value: Box<TypedExpr>,
    },
    /// `place = place op rhs` with the place evaluated once. The old value
    /// is converted to `operand` before `op`, the result back to the
    /// place's type. Yields the old value when `postfix` is set.
    Update {
        place: Place,
        op: BinaryFn,
        operand: NumKind,
        rhs: Box<TypedExpr>,
        postfix: bool,
    },
    Convert {
        value: Box<TypedExpr>,
        to: NumKind,
    },
    /// Numeric to bool.
    Truthy(Box<TypedExpr>),
    Binary {
        op: BinaryFn,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Unary {
        op: UnaryFn,
        operand: Box<TypedExpr>,
    },
    /// Short-circuit `&&` (`and`) or `||`.
    Logical {
        and: bool,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Conditional {
        condition: Box<TypedExpr>,
        then_expr: Box<TypedExpr>,
        else_expr: Box<TypedExpr>,
    },
    Comma {
        first: Box<TypedExpr>,
        second: Box<TypedExpr>,
    },
    Call {
        function: FuncId,
        args: Vec<TypedExpr>,
    },
    Builtin {
        op: BuiltinOp,
        args: Vec<TypedExpr>,
    },
    /// Struct value copy that shares nothing with its source.
    DeepCopy(Box<TypedExpr>),
}

impl TypedExpr {
    pub fn new(kind: TypedExprKind, ty: Type, span: Span) -> Self {
        Self { kind, ty, span }
    }

    pub fn literal(value: Value, ty: Type, span: Span) -> Self {
        Self::new(TypedExprKind::Literal(value), ty, span)
    }
}

impl TypedStmt {
    pub fn new(kind: TypedStmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}
