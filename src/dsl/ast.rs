//! Generic C-like syntax tree produced by the parser.
//!
//! Nothing here is resolved: identifiers are plain names and types are the
//! declaration specifiers as written. Lowering turns this into typed nodes.

/// Source span for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A complete source file after inclusion.
#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub enum Item {
    Function(FunctionDef),
    Declaration(Declaration),
}

/// `int f(int a, long b[]) { ... }` or a prototype when `body` is `None`.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub return_type: TypeSpec,
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub body: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub ty: TypeSpec,
    pub name: String,
    /// Declared as `T name[]` or `T name[N]`.
    pub array: bool,
    pub span: Span,
}

/// Declaration specifiers, as written.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    Float,
    Double,
    Bool,
    Void,
    /// A typedef or struct tag referenced by name.
    Named(String),
    /// `struct Tag { ... }` with an inline member list.
    Struct(StructSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructSpec {
    pub tag: Option<String>,
    pub members: Vec<MemberDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberDecl {
    pub ty: TypeSpec,
    pub name: String,
    pub array: bool,
    pub span: Span,
}

/// `typedef`? specifiers declarator (, declarator)* `;`
#[derive(Debug, Clone)]
pub struct Declaration {
    pub typedef: bool,
    pub spec: TypeSpec,
    pub declarators: Vec<Declarator>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: String,
    /// `name[len]`
    pub array_len: Option<Expr>,
    pub init: Option<Expr>,
    pub span: Span,
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Compound(Block),
    Expr(Expr),
    Declaration(Declaration),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Empty,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(IntLiteral),
    FloatLit { value: f64, single: bool },
    CharLit(u32),
    StrLit(String),
    BoolLit(bool),
    Ident(String),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `target = value` when `op` is `None`, `target op= value` otherwise.
    Assign {
        op: Option<BinOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    IncDec {
        increment: bool,
        prefix: bool,
        operand: Box<Expr>,
    },
    Call {
        name: String,
        name_span: Span,
        args: Vec<Expr>,
    },
    Subscript {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        owner: Box<Expr>,
        field: String,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Cast {
        ty: TypeSpec,
        operand: Box<Expr>,
    },
    Comma {
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// An integer literal with its C suffix flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntLiteral {
    pub value: u64,
    pub unsigned: bool,
    pub long: bool,
    /// Hex or octal; these may pick an unsigned kind without a suffix.
    pub radix_literal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}
