use std::collections::HashSet;

use super::ast::*;
use super::error::CompileError;
use super::lexer::{SpannedToken, Token};

/// Type names every translation unit can use without declaring them.
pub const BUILTIN_TYPE_ALIASES: &[&str] = &[
    "uint", "ulong", "int32_t", "uint32_t", "int64_t", "uint64_t", "size_t",
];

/// The specifier a predeclared alias stands for.
pub fn builtin_alias(name: &str) -> Option<TypeSpec> {
    let spec = match name {
        "uint" | "uint32_t" => TypeSpec::UnsignedInt,
        "ulong" | "uint64_t" | "size_t" => TypeSpec::UnsignedLong,
        "int32_t" => TypeSpec::Int,
        "int64_t" => TypeSpec::Long,
        _ => return None,
    };
    Some(spec)
}

pub fn parse(tokens: Vec<SpannedToken>) -> Result<TranslationUnit, Vec<CompileError>> {
    let mut parser = Parser::new(tokens);
    parser.parse_translation_unit()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    errors: Vec<CompileError>,
    /// Typedef names and struct tags seen so far; decides declaration vs
    /// expression and cast vs parenthesized expression.
    type_names: HashSet<String>,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
            type_names: BUILTIN_TYPE_ALIASES
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
        }
    }

    fn parse_translation_unit(&mut self) -> Result<TranslationUnit, Vec<CompileError>> {
        let mut items = Vec::new();

        while !self.at_eof() {
            if matches!(self.peek(), Token::Semi) {
                self.advance();
                continue;
            }
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(e) => {
                    self.errors.push(e);
                    self.recover_to_semicolon();
                }
            }
        }

        if self.errors.is_empty() {
            Ok(TranslationUnit { items })
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map_or(&Token::Eof, |t| &t.token)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.pos).map_or(Span::new(0, 0), |t| t.span)
    }

    /// Span of the most recently consumed token.
    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(Span::new(0, 0), |t| t.span)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len().saturating_sub(1) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<Span, CompileError> {
        if self.peek() == expected {
            let sp = self.span();
            self.advance();
            Ok(sp)
        } else {
            Err(CompileError::parser(
                format!("Expected {what}, got {:?}", self.peek()),
                self.span(),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), CompileError> {
        if let Token::Ident(name) = self.peek().clone() {
            let sp = self.span();
            self.advance();
            Ok((name, sp))
        } else {
            Err(CompileError::parser(
                format!("Expected identifier, got {:?}", self.peek()),
                self.span(),
            ))
        }
    }

    fn recover_to_semicolon(&mut self) {
        while !matches!(self.peek(), Token::Semi | Token::RBrace | Token::Eof) {
            self.advance();
        }
        self.advance();
    }

    fn is_type_name(&self, token: &Token) -> bool {
        matches!(token, Token::Ident(name) if self.type_names.contains(name))
    }

    /// Whether the tokens at the cursor start a declaration.
    fn at_declaration(&self) -> bool {
        let tok = self.peek();
        if tok.is_type_keyword() || matches!(tok, Token::Qualifier | Token::Typedef) {
            return true;
        }
        matches!(tok, Token::Ident(_)) && matches!(self.peek_at(1), Token::Ident(_))
    }

    /// Whether `( ...` at the cursor is a cast.
    fn at_cast(&self) -> bool {
        if !matches!(self.peek(), Token::LParen) {
            return false;
        }
        let next = self.peek_at(1);
        next.is_type_keyword()
            || matches!(next, Token::Qualifier)
            || (self.is_type_name(next) && matches!(self.peek_at(2), Token::RParen))
    }

    // ── Declarations ──────────────────────────────────────────────

    fn skip_qualifiers(&mut self) {
        while matches!(self.peek(), Token::Qualifier) {
            self.advance();
        }
    }

    /// Parse declaration specifiers. Returns whether `typedef` was present.
    fn parse_specifiers(&mut self) -> Result<(bool, TypeSpec), CompileError> {
        self.skip_qualifiers();
        let typedef = self.eat(&Token::Typedef);
        self.skip_qualifiers();
        let spec = self.parse_type_spec()?;
        Ok((typedef, spec))
    }

    fn parse_type_spec(&mut self) -> Result<TypeSpec, CompileError> {
        self.skip_qualifiers();
        let start = self.span();

        if matches!(self.peek(), Token::Struct) {
            let spec = self.parse_struct_spec()?;
            self.skip_qualifiers();
            return Ok(spec);
        }
        if let Token::Ident(name) = self.peek().clone() {
            if self.type_names.contains(&name) {
                self.advance();
                self.skip_qualifiers();
                return Ok(TypeSpec::Named(name));
            }
        }

        let (mut signed, mut unsigned, mut longs) = (false, false, 0u8);
        let (mut int_like, mut float, mut double, mut boolean, mut void) =
            (false, false, false, false, false);
        loop {
            match self.peek() {
                Token::SignedTy => signed = true,
                Token::UnsignedTy => unsigned = true,
                Token::LongTy => longs += 1,
                Token::IntTy | Token::ShortTy | Token::CharTy => int_like = true,
                Token::FloatTy => float = true,
                Token::DoubleTy => double = true,
                Token::BoolTy => boolean = true,
                Token::VoidTy => void = true,
                Token::Qualifier => {}
                _ => break,
            }
            self.advance();
        }

        if signed && unsigned {
            return Err(CompileError::parser(
                "Both 'signed' and 'unsigned' in declaration specifiers",
                start.merge(self.prev_span()),
            ));
        }
        let spec = if void {
            TypeSpec::Void
        } else if boolean {
            TypeSpec::Bool
        } else if double {
            TypeSpec::Double
        } else if float {
            TypeSpec::Float
        } else if longs > 0 {
            if unsigned {
                TypeSpec::UnsignedLong
            } else {
                TypeSpec::Long
            }
        } else if unsigned {
            TypeSpec::UnsignedInt
        } else if int_like || signed {
            TypeSpec::Int
        } else {
            return Err(CompileError::parser(
                format!("Expected type, got {:?}", self.peek()),
                start,
            ));
        };
        Ok(spec)
    }

    fn parse_struct_spec(&mut self) -> Result<TypeSpec, CompileError> {
        let start = self.expect(&Token::Struct, "'struct'")?;
        let tag = if let Token::Ident(name) = self.peek().clone() {
            self.advance();
            self.type_names.insert(name.clone());
            Some(name)
        } else {
            None
        };

        if !self.eat(&Token::LBrace) {
            return match tag {
                Some(tag) => Ok(TypeSpec::Named(tag)),
                None => Err(CompileError::parser(
                    "Expected struct tag or member list",
                    self.span(),
                )),
            };
        }

        let mut members = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            let member_start = self.span();
            let ty = self.parse_type_spec()?;
            loop {
                let (name, name_span) = self.expect_ident()?;
                let mut array = false;
                if self.eat(&Token::LBracket) {
                    array = true;
                    while !matches!(self.peek(), Token::RBracket | Token::Eof) {
                        self.advance();
                    }
                    self.expect(&Token::RBracket, "']'")?;
                }
                members.push(MemberDecl {
                    ty: ty.clone(),
                    name,
                    array,
                    span: member_start.merge(name_span),
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::Semi, "';' after struct member")?;
        }
        let end = self.expect(&Token::RBrace, "'}'")?;
        Ok(TypeSpec::Struct(StructSpec {
            tag,
            members,
            span: start.merge(end),
        }))
    }

    fn parse_item(&mut self) -> Result<Item, CompileError> {
        let start = self.span();
        let (typedef, spec) = self.parse_specifiers()?;

        if !typedef
            && matches!(self.peek(), Token::Ident(_))
            && matches!(self.peek_at(1), Token::LParen)
        {
            let (name, _) = self.expect_ident()?;
            return self.parse_function(start, spec, name).map(Item::Function);
        }

        self.parse_declaration_rest(start, typedef, spec)
            .map(Item::Declaration)
    }

    fn parse_declaration(&mut self) -> Result<Declaration, CompileError> {
        let start = self.span();
        let (typedef, spec) = self.parse_specifiers()?;
        self.parse_declaration_rest(start, typedef, spec)
    }

    fn parse_declaration_rest(
        &mut self,
        start: Span,
        typedef: bool,
        spec: TypeSpec,
    ) -> Result<Declaration, CompileError> {
        let mut declarators = Vec::new();
        if !matches!(self.peek(), Token::Semi) {
            loop {
                declarators.push(self.parse_declarator(typedef)?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        let end = self.expect(&Token::Semi, "';' after declaration")?;
        Ok(Declaration {
            typedef,
            spec,
            declarators,
            span: start.merge(end),
        })
    }

    fn parse_declarator(&mut self, typedef: bool) -> Result<Declarator, CompileError> {
        let (name, name_span) = self.expect_ident()?;
        if typedef {
            self.type_names.insert(name.clone());
        }
        let mut array_len = None;
        if self.eat(&Token::LBracket) {
            array_len = Some(self.parse_assignment()?);
            self.expect(&Token::RBracket, "']'")?;
        }
        let mut init = None;
        if self.eat(&Token::Eq) {
            if matches!(self.peek(), Token::LBrace) {
                return Err(CompileError::parser(
                    "Brace initializers are not supported",
                    self.span(),
                ));
            }
            init = Some(self.parse_assignment()?);
        }
        Ok(Declarator {
            name,
            array_len,
            init,
            span: name_span.merge(self.prev_span()),
        })
    }

    fn parse_function(
        &mut self,
        start: Span,
        return_type: TypeSpec,
        name: String,
    ) -> Result<FunctionDef, CompileError> {
        self.expect(&Token::LParen, "'('")?;
        let mut params = Vec::new();
        let void_only = matches!(self.peek(), Token::VoidTy) && matches!(self.peek_at(1), Token::RParen);
        if void_only {
            self.advance();
        }
        if !matches!(self.peek(), Token::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "')'")?;

        if self.eat(&Token::Semi) {
            return Ok(FunctionDef {
                return_type,
                name,
                params,
                body: None,
                span: start.merge(self.prev_span()),
            });
        }

        let body = self.parse_block()?;
        Ok(FunctionDef {
            return_type,
            name,
            params,
            body: Some(body),
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_param(&mut self) -> Result<ParamDecl, CompileError> {
        let start = self.span();
        let ty = self.parse_type_spec()?;
        let name = if let Token::Ident(name) = self.peek().clone() {
            self.advance();
            name
        } else {
            String::new()
        };
        let mut array = false;
        if self.eat(&Token::LBracket) {
            array = true;
            while !matches!(self.peek(), Token::RBracket | Token::Eof) {
                self.advance();
            }
            self.expect(&Token::RBracket, "']'")?;
        }
        Ok(ParamDecl {
            ty,
            name,
            array,
            span: start.merge(self.prev_span()),
        })
    }

    // ── Statements ────────────────────────────────────────────────

    fn parse_block(&mut self) -> Result<Block, CompileError> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        let start = self.span();
        let kind = match self.peek() {
            Token::LBrace => StmtKind::Compound(self.parse_block()?),
            Token::Semi => {
                self.advance();
                StmtKind::Empty
            }
            Token::If => {
                self.advance();
                self.expect(&Token::LParen, "'(' after 'if'")?;
                let cond = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                let then_branch = Box::new(self.parse_stmt()?);
                let else_branch = if self.eat(&Token::Else) {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            Token::While => {
                self.advance();
                self.expect(&Token::LParen, "'(' after 'while'")?;
                let cond = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                let body = Box::new(self.parse_stmt()?);
                StmtKind::While { cond, body }
            }
            Token::Do => {
                self.advance();
                let body = Box::new(self.parse_stmt()?);
                self.expect(&Token::While, "'while' after do body")?;
                self.expect(&Token::LParen, "'('")?;
                let cond = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                self.expect(&Token::Semi, "';'")?;
                StmtKind::DoWhile { body, cond }
            }
            Token::For => self.parse_for()?,
            Token::Return => {
                self.advance();
                let value = if matches!(self.peek(), Token::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&Token::Semi, "';' after return")?;
                StmtKind::Return(value)
            }
            Token::Break => {
                self.advance();
                self.expect(&Token::Semi, "';' after break")?;
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                self.expect(&Token::Semi, "';' after continue")?;
                StmtKind::Continue
            }
            _ if self.at_declaration() => StmtKind::Declaration(self.parse_declaration()?),
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&Token::Semi, "';' after expression")?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt {
            kind,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind, CompileError> {
        self.advance();
        self.expect(&Token::LParen, "'(' after 'for'")?;

        let init_start = self.span();
        let init = if self.eat(&Token::Semi) {
            None
        } else if self.at_declaration() {
            let decl = self.parse_declaration()?;
            Some(Box::new(Stmt {
                kind: StmtKind::Declaration(decl),
                span: init_start.merge(self.prev_span()),
            }))
        } else {
            let expr = self.parse_expr()?;
            self.expect(&Token::Semi, "';' in for")?;
            Some(Box::new(Stmt {
                kind: StmtKind::Expr(expr),
                span: init_start.merge(self.prev_span()),
            }))
        };

        let cond = if matches!(self.peek(), Token::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::Semi, "';' in for")?;

        let step = if matches!(self.peek(), Token::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::RParen, "')'")?;

        let body = Box::new(self.parse_stmt()?);
        Ok(StmtKind::For {
            init,
            cond,
            step,
            body,
        })
    }

    // ── Expressions ───────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_assignment()?;
        while self.eat(&Token::Comma) {
            let right = self.parse_assignment()?;
            let span = left.span.merge(right.span);
            left = Expr {
                kind: ExprKind::Comma {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }
        Ok(left)
    }

    fn parse_assignment(&mut self) -> Result<Expr, CompileError> {
        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Eq => None,
            Token::CompoundAssign(sym) => Some(compound_op(sym)),
            _ => return Ok(target),
        };
        self.advance();
        let value = self.parse_assignment()?;
        let span = target.span.merge(value.span);
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr, CompileError> {
        let cond = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expr()?;
        self.expect(&Token::Colon, "':' in conditional expression")?;
        let else_expr = self.parse_conditional()?;
        let span = cond.span.merge(else_expr.span);
        Ok(Expr {
            kind: ExprKind::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        })
    }

    fn parse_left_assoc(
        &mut self,
        level: &[(Token, BinOp)],
        next: fn(&mut Self) -> Result<Expr, CompileError>,
    ) -> Result<Expr, CompileError> {
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in level {
                if self.peek() == token {
                    self.advance();
                    let right = next(self)?;
                    let span = left.span.merge(right.span);
                    left = Expr {
                        kind: ExprKind::Binary {
                            op: *op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        span,
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(&[(Token::OrOr, BinOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(&[(Token::AndAnd, BinOp::And)], Self::parse_bit_or)
    }

    fn parse_bit_or(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(&[(Token::Pipe, BinOp::BitOr)], Self::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(&[(Token::Caret, BinOp::BitXor)], Self::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(&[(Token::Amp, BinOp::BitAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(
            &[(Token::EqEq, BinOp::Eq), (Token::Ne, BinOp::Ne)],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(
            &[
                (Token::Lt, BinOp::Lt),
                (Token::Le, BinOp::Le),
                (Token::Gt, BinOp::Gt),
                (Token::Ge, BinOp::Ge),
            ],
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(
            &[(Token::Shl, BinOp::Shl), (Token::Shr, BinOp::Shr)],
            Self::parse_add,
        )
    }

    fn parse_add(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
            Self::parse_mul,
        )
    }

    fn parse_mul(&mut self) -> Result<Expr, CompileError> {
        self.parse_left_assoc(
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::Percent, BinOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let start = self.span();
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Bang => UnaryOp::Not,
            Token::Tilde => UnaryOp::BitNot,
            Token::PlusPlus | Token::MinusMinus => {
                let increment = matches!(self.peek(), Token::PlusPlus);
                self.advance();
                let operand = self.parse_unary()?;
                let span = start.merge(operand.span);
                return Ok(Expr {
                    kind: ExprKind::IncDec {
                        increment,
                        prefix: true,
                        operand: Box::new(operand),
                    },
                    span,
                });
            }
            Token::LParen if self.at_cast() => {
                self.advance();
                let ty = self.parse_type_spec()?;
                self.expect(&Token::RParen, "')' after cast type")?;
                let operand = self.parse_unary()?;
                let span = start.merge(operand.span);
                return Ok(Expr {
                    kind: ExprKind::Cast {
                        ty,
                        operand: Box::new(operand),
                    },
                    span,
                });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        let span = start.merge(operand.span);
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let end = self.expect(&Token::RBracket, "']'")?;
                    let span = expr.span.merge(end);
                    expr = Expr {
                        kind: ExprKind::Subscript {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                Token::Dot => {
                    self.advance();
                    let (field, field_span) = self.expect_ident()?;
                    let span = expr.span.merge(field_span);
                    expr = Expr {
                        kind: ExprKind::Field {
                            owner: Box::new(expr),
                            field,
                        },
                        span,
                    };
                }
                Token::PlusPlus | Token::MinusMinus => {
                    let increment = matches!(self.peek(), Token::PlusPlus);
                    let end = self.span();
                    self.advance();
                    let span = expr.span.merge(end);
                    expr = Expr {
                        kind: ExprKind::IncDec {
                            increment,
                            prefix: false,
                            operand: Box::new(expr),
                        },
                        span,
                    };
                }
                Token::LParen if matches!(expr.kind, ExprKind::Ident(_)) => {
                    if let ExprKind::Ident(name) = &expr.kind {
                        let name = name.clone();
                        let name_span = expr.span;
                        self.advance();
                        let args = self.parse_args()?;
                        let span = name_span.merge(self.prev_span());
                        expr = Expr {
                            kind: ExprKind::Call {
                                name,
                                name_span,
                                args,
                            },
                            span,
                        };
                    }
                }
                Token::LParen => {
                    return Err(CompileError::parser(
                        "Only named functions can be called",
                        self.span(),
                    ));
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut args = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            args.push(self.parse_assignment()?);
            while self.eat(&Token::Comma) {
                args.push(self.parse_assignment()?);
            }
        }
        self.expect(&Token::RParen, "')' after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let span = self.span();
        let kind = match self.peek().clone() {
            Token::Int(lit) => ExprKind::IntLit(lit),
            Token::Float { value, single } => ExprKind::FloatLit { value, single },
            Token::Char(c) => ExprKind::CharLit(c),
            Token::String(s) => {
                // Adjacent string literals concatenate.
                let mut text = s;
                self.advance();
                while let Token::String(more) = self.peek().clone() {
                    text.push_str(&more);
                    self.advance();
                }
                return Ok(Expr {
                    kind: ExprKind::StrLit(text),
                    span: span.merge(self.prev_span()),
                });
            }
            Token::True => ExprKind::BoolLit(true),
            Token::False => ExprKind::BoolLit(false),
            Token::Ident(name) => ExprKind::Ident(name),
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                let end = self.expect(&Token::RParen, "')'")?;
                return Ok(Expr {
                    kind: inner.kind,
                    span: span.merge(end),
                });
            }
            other => {
                return Err(CompileError::parser(
                    format!("Expected expression, got {other:?}"),
                    span,
                ));
            }
        };
        self.advance();
        Ok(Expr { kind, span })
    }
}

fn compound_op(symbol: &str) -> BinOp {
    match symbol {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        "<<" => BinOp::Shl,
        ">>" => BinOp::Shr,
        "&" => BinOp::BitAnd,
        "|" => BinOp::BitOr,
        _ => BinOp::BitXor,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::lexer::lex;

    fn parse_str(s: &str) -> TranslationUnit {
        let tokens = lex(s).unwrap();
        parse(tokens).unwrap()
    }

    fn main_body(s: &str) -> Block {
        let unit = parse_str(s);
        match unit.items.into_iter().last().unwrap() {
            Item::Function(f) => f.body.unwrap(),
            Item::Declaration(_) => panic!("expected function"),
        }
    }

    fn expr_of(stmt: &Stmt) -> &Expr {
        match &stmt.kind {
            StmtKind::Expr(e) => e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn parse_function_and_prototype() {
        let unit = parse_str("int add(int a, int b);\nint add(int a, int b) { return a + b; }");
        assert_eq!(unit.items.len(), 2);
        let Item::Function(proto) = &unit.items[0] else { panic!() };
        assert!(proto.body.is_none());
        assert_eq!(proto.params.len(), 2);
        let Item::Function(def) = &unit.items[1] else { panic!() };
        assert_eq!(def.name, "add");
        assert_eq!(def.body.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn parse_void_parameter_list() {
        let unit = parse_str("void f(void) {}");
        let Item::Function(f) = &unit.items[0] else { panic!() };
        assert!(f.params.is_empty());
        assert_eq!(f.return_type, TypeSpec::Void);
    }

    #[test]
    fn parse_type_specifier_combinations() {
        let unit = parse_str("unsigned long long a; long b; unsigned c; short d; long double e;");
        let specs: Vec<TypeSpec> = unit
            .items
            .iter()
            .map(|i| match i {
                Item::Declaration(d) => d.spec.clone(),
                Item::Function(_) => panic!(),
            })
            .collect();
        assert_eq!(
            specs,
            vec![
                TypeSpec::UnsignedLong,
                TypeSpec::Long,
                TypeSpec::UnsignedInt,
                TypeSpec::Int,
                TypeSpec::Double,
            ]
        );
    }

    #[test]
    fn parse_array_and_multiple_declarators() {
        let body = main_body("int main() { int a[10], n = 3, m; }");
        let StmtKind::Declaration(decl) = &body[0].kind else { panic!() };
        assert_eq!(decl.declarators.len(), 3);
        assert!(decl.declarators[0].array_len.is_some());
        assert!(decl.declarators[1].init.is_some());
    }

    #[test]
    fn parse_struct_and_typedef() {
        let unit = parse_str(
            "struct R { int isPow; int isBounty; };\ntypedef unsigned int word;\nword w;\nstruct R r;",
        );
        assert_eq!(unit.items.len(), 4);
        let Item::Declaration(s) = &unit.items[0] else { panic!() };
        let TypeSpec::Struct(spec) = &s.spec else { panic!() };
        assert_eq!(spec.tag.as_deref(), Some("R"));
        assert_eq!(spec.members.len(), 2);
        let Item::Declaration(t) = &unit.items[1] else { panic!() };
        assert!(t.typedef);
        let Item::Declaration(w) = &unit.items[2] else { panic!() };
        assert_eq!(w.spec, TypeSpec::Named("word".into()));
        let Item::Declaration(r) = &unit.items[3] else { panic!() };
        assert_eq!(r.spec, TypeSpec::Named("R".into()));
    }

    #[test]
    fn parse_precedence() {
        let body = main_body("void main() { x = 1 + 2 * 3 << 1; }");
        let ExprKind::Assign { value, .. } = &expr_of(&body[0]).kind else { panic!() };
        let ExprKind::Binary { op, left, .. } = &value.kind else { panic!() };
        assert_eq!(*op, BinOp::Shl);
        let ExprKind::Binary { op, right, .. } = &left.kind else { panic!() };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parse_compound_assignment_is_right_associative() {
        let body = main_body("void main() { a = b += 2; }");
        let ExprKind::Assign { op, value, .. } = &expr_of(&body[0]).kind else { panic!() };
        assert!(op.is_none());
        assert!(matches!(value.kind, ExprKind::Assign { op: Some(BinOp::Add), .. }));
    }

    #[test]
    fn parse_postfix_and_prefix_increment() {
        let body = main_body("void main() { y = x++; --y; }");
        let ExprKind::Assign { value, .. } = &expr_of(&body[0]).kind else { panic!() };
        assert!(matches!(
            value.kind,
            ExprKind::IncDec { increment: true, prefix: false, .. }
        ));
        assert!(matches!(
            expr_of(&body[1]).kind,
            ExprKind::IncDec { increment: false, prefix: true, .. }
        ));
    }

    #[test]
    fn parse_cast_versus_parenthesized() {
        let body = main_body("void main() { a = (long)b; c = (b) - 1; d = (uint32_t)c; }");
        let ExprKind::Assign { value, .. } = &expr_of(&body[0]).kind else { panic!() };
        assert!(matches!(value.kind, ExprKind::Cast { ty: TypeSpec::Long, .. }));
        let ExprKind::Assign { value, .. } = &expr_of(&body[1]).kind else { panic!() };
        assert!(matches!(value.kind, ExprKind::Binary { op: BinOp::Sub, .. }));
        let ExprKind::Assign { value, .. } = &expr_of(&body[2]).kind else { panic!() };
        assert!(matches!(value.kind, ExprKind::Cast { .. }));
    }

    #[test]
    fn parse_for_with_declaration() {
        let body = main_body("void main() { for (int i = 0; i < 3; i++) { } }");
        let StmtKind::For { init, cond, step, .. } = &body[0].kind else { panic!() };
        assert!(matches!(init.as_ref().unwrap().kind, StmtKind::Declaration(_)));
        assert!(cond.is_some());
        assert!(step.is_some());
    }

    #[test]
    fn parse_empty_for_clauses() {
        let body = main_body("void main() { for (;;) break; }");
        let StmtKind::For { init, cond, step, .. } = &body[0].kind else { panic!() };
        assert!(init.is_none() && cond.is_none() && step.is_none());
    }

    #[test]
    fn parse_do_while_and_conditional() {
        let body = main_body("void main() { do { x = c ? 1 : 2; } while (x < 3); }");
        assert!(matches!(body[0].kind, StmtKind::DoWhile { .. }));
    }

    #[test]
    fn parse_field_subscript_and_call() {
        let body = main_body("void main() { r.isPow = check_pow(a[0], a[1], 0, 0); }");
        let ExprKind::Assign { target, value, .. } = &expr_of(&body[0]).kind else { panic!() };
        assert!(matches!(target.kind, ExprKind::Field { .. }));
        let ExprKind::Call { name, args, .. } = &value.kind else { panic!() };
        assert_eq!(name, "check_pow");
        assert_eq!(args.len(), 4);
        assert!(matches!(args[0].kind, ExprKind::Subscript { .. }));
    }

    #[test]
    fn adjacent_strings_concatenate() {
        let body = main_body(r#"void main() { printf("a" "b"); }"#);
        let ExprKind::Call { args, .. } = &expr_of(&body[0]).kind else { panic!() };
        assert!(matches!(&args[0].kind, ExprKind::StrLit(s) if s == "ab"));
    }

    #[test]
    fn errors_from_several_items_are_collected() {
        let tokens = lex("int a = ; int b = ;").unwrap();
        let errs = parse(tokens).unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn brace_initializer_is_rejected() {
        let tokens = lex("int a[2] = {1, 2};").unwrap();
        assert!(parse(tokens).is_err());
    }
}
