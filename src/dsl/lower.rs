//! Semantic analysis: resolves names and types over the syntax tree and
//! emits the typed node tree. The first error aborts the whole unit.

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use super::ast::*;
use super::builtins::{lookup_builtin, BuiltinFn, BuiltinOp, ParamSig, STREAMS};
use super::error::CompileError;
use super::nodes::*;
use super::ops::{self, OpFamily};
use super::parser::{builtin_alias, BUILTIN_TYPE_ALIASES};
use super::scope::{FrameLayout, FuncId, ScopeArena, ScopeId, SlotRef, Storage, Symbol};
use super::types::{can_assign, promote, FunctionType, NumKind, StructType, Type};
use super::value::Value;

/// Lower a parsed translation unit into an evaluable program.
pub fn lower(unit: &TranslationUnit) -> Result<Program, CompileError> {
    let mut lowerer = Lowerer::new();
    let root = lowerer.scopes.root();
    for item in &unit.items {
        match item {
            Item::Function(def) => lowerer.lower_function(root, def)?,
            Item::Declaration(decl) => {
                let stmts = lowerer.lower_declaration(root, decl)?;
                lowerer.init.extend(stmts);
            }
        }
    }

    let main = match lowerer.scopes.resolve(root, "main") {
        Some(Symbol {
            storage: Storage::Function(id),
            ..
        }) => Some(*id),
        _ => None,
    };
    Ok(Program {
        globals: lowerer.scopes.layout(root),
        functions: lowerer.functions,
        init: lowerer.init,
        main,
    })
}

struct FunctionContext {
    ret: Type,
    loop_depth: usize,
}

struct Lowerer {
    scopes: ScopeArena,
    functions: Vec<Function>,
    init: Vec<TypedStmt>,
    current: Option<FunctionContext>,
}

/// Kind an operand takes part in arithmetic as; bool widens to i32.
fn arith_kind(ty: &Type) -> Option<NumKind> {
    match ty {
        Type::Num(kind) => Some(*kind),
        Type::Bool => Some(NumKind::I32),
        _ => None,
    }
}

fn is_condition(ty: &Type) -> bool {
    ty.is_numeric() || *ty == Type::Bool
}

fn primitive(spec: &TypeSpec) -> Option<Type> {
    let ty = match spec {
        TypeSpec::Int => Type::I32,
        TypeSpec::UnsignedInt => Type::U32,
        TypeSpec::Long => Type::I64,
        TypeSpec::UnsignedLong => Type::U64,
        TypeSpec::Float => Type::F32,
        TypeSpec::Double => Type::F64,
        TypeSpec::Bool => Type::Bool,
        TypeSpec::Void => Type::Void,
        TypeSpec::Named(_) | TypeSpec::Struct(_) => return None,
    };
    Some(ty)
}

/// First kind in C's candidate list that can hold the literal.
fn literal_kind(lit: IntLiteral) -> NumKind {
    let candidates: &[NumKind] = match (lit.unsigned, lit.long) {
        (true, true) => &[NumKind::U64],
        (true, false) => &[NumKind::U32, NumKind::U64],
        (false, true) => &[NumKind::I64, NumKind::U64],
        (false, false) if lit.radix_literal => {
            &[NumKind::I32, NumKind::U32, NumKind::I64, NumKind::U64]
        }
        (false, false) => &[NumKind::I32, NumKind::I64, NumKind::U64],
    };
    candidates
        .iter()
        .copied()
        .find(|kind| match kind {
            NumKind::I32 => lit.value <= i32::MAX as u64,
            NumKind::U32 => lit.value <= u64::from(u32::MAX),
            NumKind::I64 => lit.value <= i64::MAX as u64,
            _ => true,
        })
        .unwrap_or(NumKind::U64)
}

/// Convert to `kind`, folding literals.
fn convert(expr: TypedExpr, kind: NumKind) -> TypedExpr {
    if expr.ty == Type::Num(kind) {
        return expr;
    }
    let span = expr.span;
    if let TypedExprKind::Literal(value) = &expr.kind {
        return TypedExpr::literal(value.convert(kind), Type::Num(kind), span);
    }
    TypedExpr::new(
        TypedExprKind::Convert {
            value: Box::new(expr),
            to: kind,
        },
        Type::Num(kind),
        span,
    )
}

/// Implicit conversion for assignment, initialization, arguments and return.
fn coerce(expr: TypedExpr, target: &Type) -> Result<TypedExpr, CompileError> {
    if expr.ty == *target {
        return Ok(expr);
    }
    if can_assign(target, &expr.ty) {
        if let Some(kind) = target.num_kind() {
            return Ok(convert(expr, kind));
        }
    }
    match (target, &expr.ty) {
        (Type::Num(kind), Type::Bool) => Ok(convert(expr, *kind)),
        (Type::Bool, Type::Num(_)) => {
            let span = expr.span;
            Ok(TypedExpr::new(
                TypedExprKind::Truthy(Box::new(expr)),
                Type::Bool,
                span,
            ))
        }
        _ => Err(CompileError::mismatch(
            format!("cannot convert {} to {}", expr.ty, target),
            expr.span,
        )),
    }
}

impl Lowerer {
    fn new() -> Self {
        let mut scopes = ScopeArena::new();
        let root = scopes.root();
        for (name, handle) in STREAMS {
            // fresh arena: no duplicates possible
            let _ = scopes.define_constant(root, name, Type::I32, Value::I32(*handle));
        }
        for name in BUILTIN_TYPE_ALIASES {
            if let Some(ty) = builtin_alias(name).as_ref().and_then(primitive) {
                scopes.define_type(root, name, ty);
            }
        }
        Self {
            scopes,
            functions: Vec::new(),
            init: Vec::new(),
            current: None,
        }
    }

    // ── Types ─────────────────────────────────────────────────────

    fn resolve_type(
        &mut self,
        scope: ScopeId,
        spec: &TypeSpec,
        name_hint: Option<&str>,
        span: Span,
    ) -> Result<Type, CompileError> {
        if let Some(ty) = primitive(spec) {
            return Ok(ty);
        }
        match spec {
            TypeSpec::Named(name) => self
                .scopes
                .resolve_type(scope, name)
                .cloned()
                .ok_or_else(|| CompileError::unknown(name, span)),
            TypeSpec::Struct(st) => self.lower_struct(scope, st, name_hint),
            _ => Err(CompileError::mismatch("invalid type", span)),
        }
    }

    fn lower_struct(
        &mut self,
        scope: ScopeId,
        spec: &StructSpec,
        name_hint: Option<&str>,
    ) -> Result<Type, CompileError> {
        let mut members = IndexMap::new();
        for member in &spec.members {
            let ty = self.resolve_type(scope, &member.ty, None, member.span)?;
            if member.array || !is_condition(&ty) {
                return Err(CompileError::mismatch(
                    format!("struct member '{}' must be numeric or bool", member.name),
                    member.span,
                ));
            }
            if members.insert(member.name.clone(), ty).is_some() {
                return Err(CompileError::duplicate(&member.name, member.span));
            }
        }
        let name = spec
            .tag
            .as_deref()
            .or(name_hint)
            .unwrap_or("<anonymous>")
            .to_string();
        let ty = Type::Struct(Rc::new(StructType { name, members }));
        if let Some(tag) = &spec.tag {
            self.scopes.define_type(scope, tag, ty.clone());
        }
        Ok(ty)
    }

    // ── Declarations ──────────────────────────────────────────────

    fn lower_declaration(
        &mut self,
        scope: ScopeId,
        decl: &Declaration,
    ) -> Result<Vec<TypedStmt>, CompileError> {
        let hint = decl.declarators.first().map(|d| d.name.as_str()).filter(|_| decl.typedef);
        let base = self.resolve_type(scope, &decl.spec, hint, decl.span)?;

        if decl.typedef {
            for declarator in &decl.declarators {
                if declarator.array_len.is_some() || declarator.init.is_some() {
                    return Err(CompileError::unsupported(
                        "typedef of arrays or with an initializer is not supported",
                        declarator.span,
                    ));
                }
                self.scopes.define_type(scope, &declarator.name, base.clone());
            }
            return Ok(Vec::new());
        }

        let mut stmts = Vec::new();
        for declarator in &decl.declarators {
            if base == Type::Void {
                return Err(CompileError::mismatch(
                    format!("variable '{}' declared void", declarator.name),
                    declarator.span,
                ));
            }
            stmts.extend(self.lower_declarator(scope, &base, declarator)?);
        }
        Ok(stmts)
    }

    fn lower_declarator(
        &mut self,
        scope: ScopeId,
        base: &Type,
        declarator: &Declarator,
    ) -> Result<Vec<TypedStmt>, CompileError> {
        let span = declarator.span;
        let name = declarator.name.as_str();

        if let Some(len) = &declarator.array_len {
            let Some(kind) = base.num_kind() else {
                return Err(CompileError::mismatch(
                    format!("array '{name}' must have a numeric element type, not {base}"),
                    span,
                ));
            };
            if declarator.init.is_some() {
                return Err(CompileError::invalid_target(
                    format!("array '{name}' cannot be initialized"),
                    span,
                ));
            }
            let len = self.lower_expr(scope, len)?;
            let Some(len_kind) = arith_kind(&len.ty).filter(|k| k.is_integer()) else {
                return Err(CompileError::mismatch(
                    format!("size of array '{name}' must be an integer, not {}", len.ty),
                    len.span,
                ));
            };
            let len = convert(convert(len, len_kind), NumKind::I64);
            let slot = self.define_slot(scope, name, Type::Array(Box::new(base.clone())), span)?;
            return Ok(vec![TypedStmt::new(
                TypedStmtKind::NewArray { slot, kind, len },
                span,
            )]);
        }

        if let Type::Struct(st) = base {
            let init = match &declarator.init {
                Some(init) => Some(self.lower_expr(scope, init)?),
                None => None,
            };
            let slot = self.define_slot(scope, name, base.clone(), span)?;
            let mut stmts = vec![TypedStmt::new(
                TypedStmtKind::NewStruct {
                    slot,
                    ty: Rc::clone(st),
                },
                span,
            )];
            if let Some(init) = init {
                if init.ty != *base {
                    return Err(CompileError::mismatch(
                        format!("cannot initialize {base} from {}", init.ty),
                        init.span,
                    ));
                }
                let assign = TypedExpr::new(
                    TypedExprKind::Assign {
                        place: Place::Heap(slot),
                        value: Box::new(init),
                    },
                    base.clone(),
                    span,
                );
                stmts.push(TypedStmt::new(TypedStmtKind::Expr(assign), span));
            }
            return Ok(stmts);
        }

        let value = match &declarator.init {
            Some(init) => {
                let init = self.lower_expr(scope, init)?;
                coerce(init, base)?
            }
            None => TypedExpr::literal(Value::zero_of(base), base.clone(), span),
        };
        let slot = match self.scopes.define(scope, name, base.clone()) {
            Ok(Symbol {
                storage: Storage::Slot(slot),
                ..
            }) => slot,
            Ok(_) => return Err(CompileError::mismatch(format!("'{name}' is not a scalar"), span)),
            Err(_) => return Err(CompileError::duplicate(name, span)),
        };
        let assign = TypedExpr::new(
            TypedExprKind::Assign {
                place: Place::Slot(slot),
                value: Box::new(value),
            },
            base.clone(),
            span,
        );
        Ok(vec![TypedStmt::new(TypedStmtKind::Expr(assign), span)])
    }

    /// Define an array or struct and return its heap slot.
    fn define_slot(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: Type,
        span: Span,
    ) -> Result<SlotRef, CompileError> {
        match self.scopes.define(scope, name, ty) {
            Ok(Symbol {
                storage: Storage::Heap(slot),
                ..
            }) => Ok(slot),
            Ok(_) => Err(CompileError::mismatch(format!("'{name}' is not an array or struct"), span)),
            Err(_) => Err(CompileError::duplicate(name, span)),
        }
    }

    // ── Functions ─────────────────────────────────────────────────

    fn param_type(&mut self, scope: ScopeId, param: &ParamDecl) -> Result<Type, CompileError> {
        let ty = self.resolve_type(scope, &param.ty, None, param.span)?;
        if param.array {
            return match ty {
                Type::Num(_) => Ok(Type::Array(Box::new(ty))),
                other => Err(CompileError::mismatch(
                    format!("array parameter '{}' must have a numeric element type, not {other}", param.name),
                    param.span,
                )),
            };
        }
        if ty == Type::Void {
            return Err(CompileError::mismatch(
                format!("parameter '{}' declared void", param.name),
                param.span,
            ));
        }
        Ok(ty)
    }

    fn lower_function(&mut self, root: ScopeId, def: &FunctionDef) -> Result<(), CompileError> {
        let ret = self.resolve_type(root, &def.return_type, None, def.span)?;
        let params = def
            .params
            .iter()
            .map(|p| self.param_type(root, p))
            .collect::<Result<Vec<_>, _>>()?;
        let fty = Rc::new(FunctionType {
            params,
            ret: ret.clone(),
        });

        let id = self.declare_function(root, def, &fty)?;
        let Some(body) = &def.body else {
            return Ok(());
        };

        let scope = self.scopes.function_scope(root);
        let mut stmts = Vec::with_capacity(def.params.len() + body.len());
        for (index, (param, ty)) in def.params.iter().zip(&fty.params).enumerate() {
            if param.name.is_empty() {
                continue;
            }
            let symbol = self
                .scopes
                .define(scope, &param.name, ty.clone())
                .map_err(|_| CompileError::duplicate(&param.name, param.span))?;
            let argument = TypedExpr::new(TypedExprKind::Argument(index), ty.clone(), param.span);
            let stmt = match symbol.storage {
                Storage::Heap(slot) => {
                    let value = if matches!(ty, Type::Struct(_)) {
                        TypedExpr::new(
                            TypedExprKind::DeepCopy(Box::new(argument)),
                            ty.clone(),
                            param.span,
                        )
                    } else {
                        argument
                    };
                    TypedStmtKind::BindHeap { slot, value }
                }
                Storage::Slot(slot) => TypedStmtKind::Expr(TypedExpr::new(
                    TypedExprKind::Assign {
                        place: Place::Slot(slot),
                        value: Box::new(argument),
                    },
                    ty.clone(),
                    param.span,
                )),
                _ => continue,
            };
            stmts.push(TypedStmt::new(stmt, param.span));
        }

        self.current = Some(FunctionContext { ret, loop_depth: 0 });
        let lowered = self.lower_block(scope, body);
        self.current = None;
        stmts.extend(lowered?);

        let layout = self.scopes.layout(scope);
        debug!(
            function = %def.name,
            slots = layout.slots,
            heap_slots = layout.heap_slots,
            "lowered function"
        );
        if let Some(function) = self.functions.get_mut(id) {
            function.layout = layout;
            function.body = Some(TypedStmt::new(TypedStmtKind::Block(stmts), def.span));
            function.span = def.span;
        }
        Ok(())
    }

    /// Register the function symbol, merging with an earlier prototype.
    fn declare_function(
        &mut self,
        root: ScopeId,
        def: &FunctionDef,
        fty: &Rc<FunctionType>,
    ) -> Result<FuncId, CompileError> {
        match self.scopes.resolve_local(root, &def.name) {
            Some(Symbol {
                storage: Storage::Function(id),
                ty: Type::Function(existing),
                ..
            }) => {
                let id = *id;
                if **existing != **fty {
                    return Err(CompileError::mismatch(
                        format!(
                            "conflicting types for '{}': {} vs {}",
                            def.name,
                            Type::Function(Rc::clone(existing)),
                            Type::Function(Rc::clone(fty))
                        ),
                        def.span,
                    ));
                }
                let defined = self.functions.get(id).is_some_and(|f| f.body.is_some());
                if defined && def.body.is_some() {
                    return Err(CompileError::duplicate(&def.name, def.span));
                }
                Ok(id)
            }
            Some(_) => Err(CompileError::duplicate(&def.name, def.span)),
            None => {
                let id = self.functions.len();
                self.functions.push(Function {
                    name: def.name.clone(),
                    ty: Rc::clone(fty),
                    layout: FrameLayout::default(),
                    body: None,
                    span: def.span,
                });
                self.scopes
                    .define_function(root, &def.name, Type::Function(Rc::clone(fty)), id)
                    .map_err(|_| CompileError::duplicate(&def.name, def.span))?;
                Ok(id)
            }
        }
    }

    // ── Statements ────────────────────────────────────────────────

    fn lower_block(&mut self, scope: ScopeId, block: &[Stmt]) -> Result<Vec<TypedStmt>, CompileError> {
        block.iter().map(|stmt| self.lower_stmt(scope, stmt)).collect()
    }

    fn lower_condition(&mut self, scope: ScopeId, expr: &Expr) -> Result<TypedExpr, CompileError> {
        let cond = self.lower_expr(scope, expr)?;
        if !is_condition(&cond.ty) {
            return Err(CompileError::mismatch(
                format!("condition must be numeric or bool, not {}", cond.ty),
                cond.span,
            ));
        }
        Ok(cond)
    }

    fn lower_loop_body(&mut self, scope: ScopeId, body: &Stmt) -> Result<TypedStmt, CompileError> {
        if let Some(ctx) = self.current.as_mut() {
            ctx.loop_depth += 1;
        }
        let child = self.scopes.child(scope);
        let lowered = self.lower_stmt(child, body);
        if let Some(ctx) = self.current.as_mut() {
            ctx.loop_depth -= 1;
        }
        lowered
    }

    fn in_loop(&self) -> bool {
        self.current.as_ref().is_some_and(|ctx| ctx.loop_depth > 0)
    }

    fn lower_stmt(&mut self, scope: ScopeId, stmt: &Stmt) -> Result<TypedStmt, CompileError> {
        let span = stmt.span;
        let kind = match &stmt.kind {
            StmtKind::Compound(block) => {
                let child = self.scopes.child(scope);
                TypedStmtKind::Block(self.lower_block(child, block)?)
            }
            StmtKind::Expr(expr) => TypedStmtKind::Expr(self.lower_expr(scope, expr)?),
            StmtKind::Declaration(decl) => TypedStmtKind::Block(self.lower_declaration(scope, decl)?),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let condition = self.lower_condition(scope, cond)?;
                let then_scope = self.scopes.child(scope);
                let then_branch = Box::new(self.lower_stmt(then_scope, then_branch)?);
                let else_branch = match else_branch {
                    Some(stmt) => {
                        let else_scope = self.scopes.child(scope);
                        Some(Box::new(self.lower_stmt(else_scope, stmt)?))
                    }
                    None => None,
                };
                TypedStmtKind::If {
                    condition,
                    then_branch,
                    else_branch,
                }
            }
            StmtKind::While { cond, body } => {
                let condition = self.lower_condition(scope, cond)?;
                let body = Box::new(self.lower_loop_body(scope, body)?);
                TypedStmtKind::While {
                    condition,
                    body,
                    step: None,
                }
            }
            StmtKind::DoWhile { body, cond } => {
                let body = Box::new(self.lower_loop_body(scope, body)?);
                let condition = self.lower_condition(scope, cond)?;
                TypedStmtKind::DoWhile { body, condition }
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                // { init; while (cond) { body } step }
                let for_scope = self.scopes.child(scope);
                let mut stmts = Vec::with_capacity(2);
                if let Some(init) = init {
                    stmts.push(self.lower_stmt(for_scope, init)?);
                }
                let condition = match cond {
                    Some(cond) => self.lower_condition(for_scope, cond)?,
                    None => TypedExpr::literal(Value::Bool(true), Type::Bool, span),
                };
                let step = match step {
                    Some(step) => Some(self.lower_expr(for_scope, step)?),
                    None => None,
                };
                let body = Box::new(self.lower_loop_body(for_scope, body)?);
                stmts.push(TypedStmt::new(
                    TypedStmtKind::While {
                        condition,
                        body,
                        step,
                    },
                    span,
                ));
                TypedStmtKind::Block(stmts)
            }
            StmtKind::Return(value) => self.lower_return(scope, value.as_ref(), span)?,
            StmtKind::Break | StmtKind::Continue => {
                let is_break = matches!(stmt.kind, StmtKind::Break);
                if !self.in_loop() {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(CompileError::mismatch(
                        format!("'{word}' statement not within a loop"),
                        span,
                    ));
                }
                if is_break {
                    TypedStmtKind::Break
                } else {
                    TypedStmtKind::Continue
                }
            }
            StmtKind::Empty => TypedStmtKind::Block(Vec::new()),
        };
        Ok(TypedStmt::new(kind, span))
    }

    fn lower_return(
        &mut self,
        scope: ScopeId,
        value: Option<&Expr>,
        span: Span,
    ) -> Result<TypedStmtKind, CompileError> {
        let ret = self
            .current
            .as_ref()
            .map_or(Type::Void, |ctx| ctx.ret.clone());
        match (value, &ret) {
            (None, Type::Void) => Ok(TypedStmtKind::Return(None)),
            (Some(_), Type::Void) => Err(CompileError::mismatch(
                "void function should not return a value",
                span,
            )),
            (None, _) => Err(CompileError::mismatch(
                format!("non-void function must return a value of type {ret}"),
                span,
            )),
            (Some(expr), _) => {
                let value = self.lower_expr(scope, expr)?;
                Ok(TypedStmtKind::Return(Some(coerce(value, &ret)?)))
            }
        }
    }

    // ── Expressions ───────────────────────────────────────────────

    fn lower_expr(&mut self, scope: ScopeId, expr: &Expr) -> Result<TypedExpr, CompileError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::IntLit(lit) => {
                let kind = literal_kind(*lit);
                Ok(TypedExpr::literal(
                    Value::U64(lit.value).convert(kind),
                    Type::Num(kind),
                    span,
                ))
            }
            ExprKind::FloatLit { value, single } => {
                let (value, ty) = if *single {
                    (Value::F32(*value as f32), Type::F32)
                } else {
                    (Value::F64(*value), Type::F64)
                };
                Ok(TypedExpr::literal(value, ty, span))
            }
            ExprKind::CharLit(c) => Ok(TypedExpr::literal(Value::I32(*c as i32), Type::I32, span)),
            ExprKind::StrLit(s) => Ok(TypedExpr::literal(
                Value::Str(Rc::from(s.as_str())),
                Type::Str,
                span,
            )),
            ExprKind::BoolLit(b) => Ok(TypedExpr::literal(Value::Bool(*b), Type::Bool, span)),
            ExprKind::Ident(name) => self.lower_ident(scope, name, span),
            ExprKind::Binary { op, left, right } => {
                let left = self.lower_expr(scope, left)?;
                let right = self.lower_expr(scope, right)?;
                binary(*op, left, right, span)
            }
            ExprKind::Assign {
                op: None,
                target,
                value,
            } => self.lower_assign(scope, target, value, span),
            ExprKind::Assign {
                op: Some(op),
                target,
                value,
            } => {
                let rhs = self.lower_expr(scope, value)?;
                self.lower_update(scope, *op, target, rhs, false, span)
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.lower_expr(scope, operand)?;
                unary(*op, operand, span)
            }
            ExprKind::IncDec {
                increment,
                prefix,
                operand,
            } => {
                let op = if *increment { BinOp::Add } else { BinOp::Sub };
                let one = TypedExpr::literal(Value::I32(1), Type::I32, span);
                self.lower_update(scope, op, operand, one, !prefix, span)
            }
            ExprKind::Call {
                name,
                name_span,
                args,
            } => self.lower_call(scope, name, *name_span, args, span),
            ExprKind::Subscript { .. } | ExprKind::Field { .. } => {
                let (place, ty) = self.lower_place(scope, expr)?;
                Ok(TypedExpr::new(TypedExprKind::Load(place), ty, span))
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                let condition = self.lower_condition(scope, cond)?;
                let then_expr = self.lower_expr(scope, then_expr)?;
                let else_expr = self.lower_expr(scope, else_expr)?;
                let (then_expr, else_expr, ty) = unify(then_expr, else_expr, span)?;
                Ok(TypedExpr::new(
                    TypedExprKind::Conditional {
                        condition: Box::new(condition),
                        then_expr: Box::new(then_expr),
                        else_expr: Box::new(else_expr),
                    },
                    ty,
                    span,
                ))
            }
            ExprKind::Cast { ty, operand } => {
                let target = self.resolve_type(scope, ty, None, span)?;
                let operand = self.lower_expr(scope, operand)?;
                cast(operand, &target, span)
            }
            ExprKind::Comma { left, right } => {
                let first = self.lower_expr(scope, left)?;
                let second = self.lower_expr(scope, right)?;
                let ty = second.ty.clone();
                Ok(TypedExpr::new(
                    TypedExprKind::Comma {
                        first: Box::new(first),
                        second: Box::new(second),
                    },
                    ty,
                    span,
                ))
            }
        }
    }

    fn lower_ident(&self, scope: ScopeId, name: &str, span: Span) -> Result<TypedExpr, CompileError> {
        let symbol = self
            .scopes
            .resolve(scope, name)
            .ok_or_else(|| CompileError::unknown(name, span))?;
        let kind = match &symbol.storage {
            Storage::Slot(slot) => TypedExprKind::Load(Place::Slot(*slot)),
            Storage::Heap(slot) => TypedExprKind::Load(Place::Heap(*slot)),
            Storage::Constant(value) => TypedExprKind::Literal(value.clone()),
            Storage::Function(_) => {
                return Err(CompileError::mismatch(
                    format!("function '{name}' used as a value"),
                    span,
                ))
            }
        };
        Ok(TypedExpr::new(kind, symbol.ty.clone(), span))
    }

    /// Resolve a writable or addressable location.
    fn lower_place(&mut self, scope: ScopeId, expr: &Expr) -> Result<(Place, Type), CompileError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Ident(name) => {
                let symbol = self
                    .scopes
                    .resolve(scope, name)
                    .ok_or_else(|| CompileError::unknown(name, span))?;
                match &symbol.storage {
                    Storage::Slot(slot) => Ok((Place::Slot(*slot), symbol.ty.clone())),
                    Storage::Heap(slot) => Ok((Place::Heap(*slot), symbol.ty.clone())),
                    Storage::Constant(_) | Storage::Function(_) => Err(CompileError::invalid_target(
                        format!("cannot assign to '{name}'"),
                        span,
                    )),
                }
            }
            ExprKind::Subscript { base, index } => {
                let (slot, ty) = self.heap_variable(scope, base)?;
                let Some(elem) = ty.element().cloned() else {
                    return Err(CompileError::mismatch(
                        format!("subscripted value is not an array (it is {ty})"),
                        base.span,
                    ));
                };
                let index = self.lower_expr(scope, index)?;
                let Some(kind) = arith_kind(&index.ty).filter(|k| k.is_integer()) else {
                    return Err(CompileError::mismatch(
                        format!("array index must be an integer, not {}", index.ty),
                        index.span,
                    ));
                };
                let index = convert(convert(index, kind), NumKind::I64);
                Ok((
                    Place::Element {
                        array: slot,
                        index: Box::new(index),
                    },
                    elem,
                ))
            }
            ExprKind::Field { owner, field } => {
                let (slot, ty) = self.heap_variable(scope, owner)?;
                let Some((index, member)) = ty.member(field) else {
                    return Err(match ty {
                        Type::Struct(_) => CompileError::unknown_member(&ty, field, span),
                        _ => CompileError::mismatch(
                            format!("member access on non-struct type {ty}"),
                            owner.span,
                        ),
                    });
                };
                let member = member.clone();
                Ok((Place::Field { owner: slot, field: index }, member))
            }
            _ => Err(CompileError::invalid_target("expression is not assignable", span)),
        }
    }

    /// The heap slot behind an array or struct variable.
    fn heap_variable(
        &self,
        scope: ScopeId,
        expr: &Expr,
    ) -> Result<(SlotRef, Type), CompileError> {
        let ExprKind::Ident(name) = &expr.kind else {
            return Err(CompileError::unsupported(
                "only named arrays and structs can be subscripted or accessed",
                expr.span,
            ));
        };
        let symbol = self
            .scopes
            .resolve(scope, name)
            .ok_or_else(|| CompileError::unknown(name, expr.span))?;
        match &symbol.storage {
            Storage::Heap(slot) => Ok((*slot, symbol.ty.clone())),
            _ => Err(CompileError::mismatch(
                format!("'{name}' is not an array or struct (it is {})", symbol.ty),
                expr.span,
            )),
        }
    }

    fn lower_assign(
        &mut self,
        scope: ScopeId,
        target: &Expr,
        value: &Expr,
        span: Span,
    ) -> Result<TypedExpr, CompileError> {
        let (place, ty) = self.lower_place(scope, target)?;
        if matches!(ty, Type::Array(_)) {
            return Err(CompileError::invalid_target("arrays cannot be assigned", target.span));
        }
        let value = self.lower_expr(scope, value)?;
        let value = if matches!(ty, Type::Struct(_)) {
            if value.ty != ty {
                return Err(CompileError::mismatch(
                    format!("cannot assign {} to {ty}", value.ty),
                    value.span,
                ));
            }
            value
        } else {
            coerce(value, &ty)?
        };
        Ok(TypedExpr::new(
            TypedExprKind::Assign {
                place,
                value: Box::new(value),
            },
            ty,
            span,
        ))
    }

    /// `target op= rhs`, `++`/`--`: `target = target op rhs` with the
    /// target location evaluated once.
    fn lower_update(
        &mut self,
        scope: ScopeId,
        op: BinOp,
        target: &Expr,
        rhs: TypedExpr,
        postfix: bool,
        span: Span,
    ) -> Result<TypedExpr, CompileError> {
        let (place, ty) = self.lower_place(scope, target)?;
        let Some(target_kind) = ty.num_kind() else {
            return Err(CompileError::unsupported(
                format!("operator '{}' needs a numeric target, not {ty}", op.symbol()),
                target.span,
            ));
        };
        let Some(rhs_kind) = arith_kind(&rhs.ty) else {
            return Err(CompileError::unsupported(
                format!("invalid operands to '{}': {ty} and {}", op.symbol(), rhs.ty),
                rhs.span,
            ));
        };
        let (arith, is_shift) = match ops::family(op) {
            OpFamily::Arithmetic(a) => (a, false),
            OpFamily::Bitwise(a) => (a, matches!(a, ops::Arith::Shl | ops::Arith::Shr)),
            OpFamily::Relational(_) | OpFamily::Logical(_) => {
                return Err(CompileError::unsupported(
                    format!("'{}' is not a compound assignment operator", op.symbol()),
                    span,
                ))
            }
        };
        let operand = if is_shift { target_kind } else { target_kind.max(rhs_kind) };
        let bitwise = matches!(ops::family(op), OpFamily::Bitwise(_));
        let func = ops::arith(arith, operand)
            .filter(|_| !bitwise || (operand.is_integer() && rhs_kind.is_integer()))
            .ok_or_else(|| unsupported_op(op, &ty, &rhs.ty, span))?;
        let rhs = if is_shift { convert(rhs, rhs_kind) } else { convert(rhs, operand) };
        Ok(TypedExpr::new(
            TypedExprKind::Update {
                place,
                op: func,
                operand,
                rhs: Box::new(rhs),
                postfix,
            },
            ty,
            span,
        ))
    }

    // ── Calls ─────────────────────────────────────────────────────

    fn lower_args(&mut self, scope: ScopeId, args: &[Expr]) -> Result<Vec<TypedExpr>, CompileError> {
        args.iter().map(|arg| self.lower_expr(scope, arg)).collect()
    }

    fn lower_call(
        &mut self,
        scope: ScopeId,
        name: &str,
        name_span: Span,
        args: &[Expr],
        span: Span,
    ) -> Result<TypedExpr, CompileError> {
        if let Some(builtin) = lookup_builtin(name) {
            return self.lower_builtin(scope, builtin, args, span);
        }

        let symbol = self
            .scopes
            .resolve(scope, name)
            .ok_or_else(|| CompileError::unknown(name, name_span))?;
        let (Storage::Function(id), Type::Function(fty)) = (&symbol.storage, &symbol.ty) else {
            return Err(CompileError::mismatch(
                format!("'{name}' is not a function"),
                name_span,
            ));
        };
        let (id, fty) = (*id, Rc::clone(fty));
        if args.len() != fty.params.len() {
            return Err(CompileError::mismatch(
                format!(
                    "function '{name}' expects {} argument(s), got {}",
                    fty.params.len(),
                    args.len()
                ),
                span,
            ));
        }

        let mut lowered = Vec::with_capacity(args.len());
        for (arg, param) in self.lower_args(scope, args)?.into_iter().zip(&fty.params) {
            let arg = match param {
                Type::Array(_) | Type::Struct(_) => {
                    if arg.ty != *param {
                        return Err(CompileError::mismatch(
                            format!("argument of type {} where {param} is expected", arg.ty),
                            arg.span,
                        ));
                    }
                    arg
                }
                _ => coerce(arg, param)?,
            };
            lowered.push(arg);
        }
        Ok(TypedExpr::new(
            TypedExprKind::Call {
                function: id,
                args: lowered,
            },
            fty.ret.clone(),
            span,
        ))
    }

    fn lower_builtin(
        &mut self,
        scope: ScopeId,
        builtin: &BuiltinFn,
        args: &[Expr],
        span: Span,
    ) -> Result<TypedExpr, CompileError> {
        let arity_ok = if builtin.variadic {
            args.len() >= builtin.params.len()
        } else {
            args.len() == builtin.params.len()
        };
        if !arity_ok {
            return Err(CompileError::mismatch(
                format!(
                    "builtin '{}' expects {}{} argument(s), got {}",
                    builtin.name,
                    if builtin.variadic { "at least " } else { "" },
                    builtin.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        if builtin.op == BuiltinOp::SyncR {
            return self.lower_sync_r(scope, builtin, span);
        }

        let mut lowered = Vec::with_capacity(args.len());
        for (i, arg) in self.lower_args(scope, args)?.into_iter().enumerate() {
            let arg = match builtin.params.get(i).map(|(_, sig)| *sig) {
                Some(ParamSig::Num(kind)) if arith_kind(&arg.ty).is_some() => convert(arg, kind),
                Some(ParamSig::Str) if arg.ty == Type::Str => arg,
                Some(ParamSig::Array) if matches!(arg.ty, Type::Array(_)) => arg,
                None if arg.ty == Type::Bool => convert(arg, NumKind::I32),
                None if arg.ty.is_numeric() || arg.ty == Type::Str => arg,
                expected => {
                    let wanted = match expected {
                        Some(ParamSig::Num(kind)) => kind.name(),
                        Some(ParamSig::Str) => "string",
                        Some(ParamSig::Array) => "array",
                        None => "number or string",
                    };
                    return Err(CompileError::mismatch(
                        format!(
                            "argument {} of '{}' must be {wanted}, not {}",
                            i + 1,
                            builtin.name,
                            arg.ty
                        ),
                        arg.span,
                    ));
                }
            };
            lowered.push(arg);
        }
        Ok(TypedExpr::new(
            TypedExprKind::Builtin {
                op: builtin.op,
                args: lowered,
            },
            builtin.ret.ty(),
            span,
        ))
    }

    /// `sync_r()` reads the variable `r` visible at the call site.
    fn lower_sync_r(
        &self,
        scope: ScopeId,
        builtin: &BuiltinFn,
        span: Span,
    ) -> Result<TypedExpr, CompileError> {
        let mut args = Vec::new();
        if let Some(symbol) = self.scopes.resolve(scope, "r") {
            let usable = match (&symbol.storage, &symbol.ty) {
                (Storage::Heap(_), Type::Struct(st)) => {
                    st.member("isPow").is_some() && st.member("isBounty").is_some()
                }
                (Storage::Heap(_), Type::Array(elem)) => {
                    elem.num_kind().is_some_and(NumKind::is_integer)
                }
                _ => false,
            };
            let (true, Storage::Heap(slot)) = (usable, &symbol.storage) else {
                return Err(CompileError::mismatch(
                    format!(
                        "sync_r needs 'r' to be a struct with isPow and isBounty or an integer array, not {}",
                        symbol.ty
                    ),
                    span,
                ));
            };
            args.push(TypedExpr::new(
                TypedExprKind::Load(Place::Heap(*slot)),
                symbol.ty.clone(),
                span,
            ));
        }
        Ok(TypedExpr::new(
            TypedExprKind::Builtin {
                op: builtin.op,
                args,
            },
            builtin.ret.ty(),
            span,
        ))
    }
}

fn unsupported_op(op: BinOp, left: &Type, right: &Type, span: Span) -> CompileError {
    CompileError::unsupported(
        format!("invalid operands to '{}': {left} and {right}", op.symbol()),
        span,
    )
}

/// Promote both operands of an arithmetic or relational operator.
fn promote_operands(
    op: BinOp,
    left: &TypedExpr,
    right: &TypedExpr,
    span: Span,
) -> Result<NumKind, CompileError> {
    let widen = |ty: &Type| if *ty == Type::Bool { Type::I32 } else { ty.clone() };
    match promote(&widen(&left.ty), &widen(&right.ty)) {
        Ok(ty) => ty
            .num_kind()
            .ok_or_else(|| unsupported_op(op, &left.ty, &right.ty, span)),
        Err(err) => Err(CompileError::unsupported(
            format!("invalid operands to '{}': {err}", op.symbol()),
            span,
        )),
    }
}

fn binary(op: BinOp, left: TypedExpr, right: TypedExpr, span: Span) -> Result<TypedExpr, CompileError> {
    let (kind, ty) = match ops::family(op) {
        OpFamily::Logical(and) => {
            if !is_condition(&left.ty) || !is_condition(&right.ty) {
                return Err(unsupported_op(op, &left.ty, &right.ty, span));
            }
            let kind = TypedExprKind::Logical {
                and,
                left: Box::new(left),
                right: Box::new(right),
            };
            return Ok(TypedExpr::new(kind, Type::Bool, span));
        }
        OpFamily::Relational(cmp) => {
            let both_bool = left.ty == Type::Bool && right.ty == Type::Bool;
            if let Some(func) = ops::compare_bool(cmp).filter(|_| both_bool) {
                (func, Type::Bool)
            } else {
                let kind = promote_operands(op, &left, &right, span)?;
                let func = ops::compare(cmp, kind);
                return Ok(TypedExpr::new(
                    TypedExprKind::Binary {
                        op: func,
                        left: Box::new(convert(left, kind)),
                        right: Box::new(convert(right, kind)),
                    },
                    Type::Bool,
                    span,
                ));
            }
        }
        OpFamily::Arithmetic(arith) => {
            let kind = promote_operands(op, &left, &right, span)?;
            let func = ops::arith(arith, kind)
                .ok_or_else(|| unsupported_op(op, &left.ty, &right.ty, span))?;
            return Ok(TypedExpr::new(
                TypedExprKind::Binary {
                    op: func,
                    left: Box::new(convert(left, kind)),
                    right: Box::new(convert(right, kind)),
                },
                Type::Num(kind),
                span,
            ));
        }
        OpFamily::Bitwise(arith) => {
            let (Some(lk), Some(rk)) = (arith_kind(&left.ty), arith_kind(&right.ty)) else {
                return Err(unsupported_op(op, &left.ty, &right.ty, span));
            };
            if lk.is_float() || rk.is_float() {
                return Err(unsupported_op(op, &left.ty, &right.ty, span));
            }
            // shifts take the left operand's kind
            let (kind, right_kind) = if matches!(arith, ops::Arith::Shl | ops::Arith::Shr) {
                (lk, rk)
            } else {
                let kind = lk.max(rk);
                (kind, kind)
            };
            let func = ops::arith(arith, kind)
                .ok_or_else(|| unsupported_op(op, &left.ty, &right.ty, span))?;
            return Ok(TypedExpr::new(
                TypedExprKind::Binary {
                    op: func,
                    left: Box::new(convert(left, kind)),
                    right: Box::new(convert(right, right_kind)),
                },
                Type::Num(kind),
                span,
            ));
        }
    };
    Ok(TypedExpr::new(
        TypedExprKind::Binary {
            op: kind,
            left: Box::new(left),
            right: Box::new(right),
        },
        ty,
        span,
    ))
}

fn unary(op: UnaryOp, operand: TypedExpr, span: Span) -> Result<TypedExpr, CompileError> {
    if op == UnaryOp::Not {
        if !is_condition(&operand.ty) {
            return Err(CompileError::unsupported(
                format!("invalid operand to '!': {}", operand.ty),
                span,
            ));
        }
        return Ok(TypedExpr::new(
            TypedExprKind::Unary {
                op: ops::logical_not,
                operand: Box::new(operand),
            },
            Type::Bool,
            span,
        ));
    }

    let Some(kind) = arith_kind(&operand.ty) else {
        return Err(CompileError::unsupported(
            format!("invalid operand to unary operator: {}", operand.ty),
            span,
        ));
    };
    let func = match op {
        UnaryOp::Plus => return Ok(convert(operand, kind)),
        UnaryOp::Neg => ops::negate(kind),
        UnaryOp::BitNot => ops::bit_not(kind).ok_or_else(|| {
            CompileError::unsupported(format!("invalid operand to '~': {}", operand.ty), span)
        })?,
        UnaryOp::Not => ops::logical_not,
    };
    Ok(TypedExpr::new(
        TypedExprKind::Unary {
            op: func,
            operand: Box::new(convert(operand, kind)),
        },
        Type::Num(kind),
        span,
    ))
}

/// Common type of the two arms of `?:`.
fn unify(
    then_expr: TypedExpr,
    else_expr: TypedExpr,
    span: Span,
) -> Result<(TypedExpr, TypedExpr, Type), CompileError> {
    if then_expr.ty == else_expr.ty {
        let ty = then_expr.ty.clone();
        return Ok((then_expr, else_expr, ty));
    }
    match (arith_kind(&then_expr.ty), arith_kind(&else_expr.ty)) {
        (Some(a), Some(b)) => {
            let kind = a.max(b);
            Ok((convert(then_expr, kind), convert(else_expr, kind), Type::Num(kind)))
        }
        _ => Err(CompileError::mismatch(
            format!(
                "conditional arms have incompatible types {} and {}",
                then_expr.ty, else_expr.ty
            ),
            span,
        )),
    }
}

fn cast(operand: TypedExpr, target: &Type, span: Span) -> Result<TypedExpr, CompileError> {
    match target {
        Type::Num(kind) if arith_kind(&operand.ty).is_some() => Ok(convert(operand, *kind)),
        Type::Bool if is_condition(&operand.ty) => coerce(operand, target),
        Type::Void => Ok(TypedExpr { ty: Type::Void, ..operand }),
        _ => Err(CompileError::mismatch(
            format!("cannot cast {} to {target}", operand.ty),
            span,
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;
    use crate::dsl::{lexer, parser};

    fn check(src: &str) -> Program {
        let unit = parser::parse(lexer::lex(src).unwrap()).unwrap();
        lower(&unit).unwrap()
    }

    fn check_err(src: &str) -> CompileError {
        let unit = parser::parse(lexer::lex(src).unwrap()).unwrap();
        match lower(&unit) {
            Ok(_) => panic!("expected a lowering error"),
            Err(e) => e,
        }
    }

    #[test]
    fn literal_kinds() {
        let lit = |value, unsigned, long, radix_literal| IntLiteral {
            value,
            unsigned,
            long,
            radix_literal,
        };
        assert_eq!(literal_kind(lit(5, false, false, false)), NumKind::I32);
        assert_eq!(literal_kind(lit(3_000_000_000, false, false, false)), NumKind::I64);
        assert_eq!(literal_kind(lit(0xFFFF_FFFF, false, false, true)), NumKind::U32);
        assert_eq!(literal_kind(lit(u64::MAX, false, false, false)), NumKind::U64);
        assert_eq!(literal_kind(lit(1, true, false, false)), NumKind::U32);
        assert_eq!(literal_kind(lit(1, false, true, false)), NumKind::I64);
        assert_eq!(literal_kind(lit(1, true, true, false)), NumKind::U64);
    }

    #[test]
    fn registers_main_and_globals() {
        let program = check("int g = 3; long buf[4];\nint main() { return g; }");
        assert_eq!(program.main, Some(0));
        assert_eq!(program.globals.slots, 1);
        assert_eq!(program.globals.heap_slots, 1);
        assert_eq!(program.init.len(), 2);
    }

    #[test]
    fn binary_promotes_to_higher_kind() {
        let program = check("long f(int a, long b) { return a + b; }");
        let body = program.functions[0].body.as_ref().unwrap();
        let TypedStmtKind::Block(stmts) = &body.kind else { panic!() };
        let TypedStmtKind::Return(Some(ret)) = &stmts[2].kind else { panic!() };
        assert_eq!(ret.ty, Type::I64);
        let TypedExprKind::Binary { left, .. } = &ret.kind else { panic!() };
        assert!(matches!(left.kind, TypedExprKind::Convert { to: NumKind::I64, .. }));
    }

    #[test]
    fn sibling_blocks_get_distinct_slots() {
        let program = check("void f() { { int a; } { int b; } int c; }");
        assert_eq!(program.functions[0].layout.slots, 3);
    }

    #[test]
    fn do_while_body_is_lowered_once() {
        let program = check("void f() { int n = 0; do { int arr[2]; n++; } while (n < 3); }");
        assert_eq!(program.functions[0].layout.heap_slots, 1);
    }

    #[test]
    fn duplicate_symbol() {
        let err = check_err("void f() { int x; long x; }");
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol);
    }

    #[test]
    fn shadowing_in_inner_block_is_allowed() {
        check("void f() { int x = 1; { int x = 2; } }");
    }

    #[test]
    fn unknown_identifier() {
        assert_eq!(check_err("int f() { return y; }").kind, ErrorKind::UnknownIdentifier);
        assert_eq!(check_err("void f() { g(); }").kind, ErrorKind::UnknownIdentifier);
    }

    #[test]
    fn unsupported_operations() {
        assert_eq!(check_err("void f() { double d = 1.5 % 2.0; }").kind, ErrorKind::UnsupportedOperation);
        assert_eq!(check_err("void f() { float x = 1.0f; x <<= 2; }").kind, ErrorKind::UnsupportedOperation);
        assert_eq!(
            check_err("struct P { int a; }; void f() { struct P p; int x = p + 1; }").kind,
            ErrorKind::UnsupportedOperation
        );
    }

    #[test]
    fn invalid_assignment_targets() {
        assert_eq!(check_err("void f() { int a; a + 1 = 3; }").kind, ErrorKind::InvalidAssignmentTarget);
        assert_eq!(
            check_err("void f() { int a[2]; int b[2]; a = b; }").kind,
            ErrorKind::InvalidAssignmentTarget
        );
        assert_eq!(check_err("void f() { stdout = 3; }").kind, ErrorKind::InvalidAssignmentTarget);
    }

    #[test]
    fn type_mismatches() {
        assert_eq!(check_err("void f() { return 1; }").kind, ErrorKind::TypeMismatch);
        assert_eq!(check_err("int f() { return; }").kind, ErrorKind::TypeMismatch);
        assert_eq!(check_err("void f() { break; }").kind, ErrorKind::TypeMismatch);
        assert_eq!(check_err("int g(int a); void f() { g(1, 2); }").kind, ErrorKind::TypeMismatch);
        assert_eq!(check_err("void f() { int x = \"s\"; }").kind, ErrorKind::TypeMismatch);
        assert_eq!(check_err("void f() { sqrt(\"s\"); }").kind, ErrorKind::TypeMismatch);
        assert_eq!(check_err("int g(int a); long g(int a) { return a; }").kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn prototype_then_definition() {
        let program = check("int twice(int v);\nint main() { return twice(2); }\nint twice(int v) { return v * 2; }");
        assert_eq!(program.functions.len(), 2);
        assert!(program.functions.iter().all(|f| f.body.is_some()));
    }

    #[test]
    fn redefinition_is_duplicate() {
        let err = check_err("int f() { return 1; }\nint f() { return 2; }");
        assert_eq!(err.kind, ErrorKind::DuplicateSymbol);
    }

    #[test]
    fn typedef_struct_and_alias() {
        let program = check(
            "typedef struct { int isPow; int isBounty; } R;\ntypedef unsigned long word;\nvoid f() { R r; word w = 1; r.isPow = w; }",
        );
        assert_eq!(program.functions[0].layout.heap_slots, 1);
        assert_eq!(program.functions[0].layout.slots, 1);
    }

    #[test]
    fn unknown_struct_member() {
        let err = check_err("struct P { int a; }; void f() { struct P p; p.b = 1; }");
        assert_eq!(err.kind, ErrorKind::UnknownIdentifier);
    }

    #[test]
    fn sync_r_requires_a_usable_r() {
        check("void f() { sync_r(); }");
        check("void f() { int r[2]; sync_r(); }");
        let err = check_err("void f() { double r = 1.0; sync_r(); }");
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn builtins_shadow_user_symbols() {
        let program = check("double sqrt(double x) { return x; }\ndouble f() { return sqrt(4.0); }");
        let body = program.functions[1].body.as_ref().unwrap();
        let TypedStmtKind::Block(stmts) = &body.kind else { panic!() };
        let TypedStmtKind::Return(Some(ret)) = &stmts[0].kind else { panic!() };
        assert!(matches!(ret.kind, TypedExprKind::Builtin { op: BuiltinOp::Sqrt, .. }));
    }
}
