use super::ast::{IntLiteral, Span};
use super::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(IntLiteral),
    Float { value: f64, single: bool },
    Char(u32),
    String(String),
    True,
    False,

    // Identifiers & keywords
    Ident(String),
    If,
    Else,
    While,
    Do,
    For,
    Return,
    Break,
    Continue,
    Struct,
    Typedef,
    /// `const`, `static`, `volatile`, `extern`, `inline`
    Qualifier,

    // Type keywords
    IntTy,
    ShortTy,
    CharTy,
    LongTy,
    SignedTy,
    UnsignedTy,
    FloatTy,
    DoubleTy,
    BoolTy,
    VoidTy,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Question,
    Colon,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
    Eq,
    /// `+=`, `<<=`, ... carrying the operator character(s).
    CompoundAssign(&'static str),

    Eof,
}

impl Token {
    pub fn is_type_keyword(&self) -> bool {
        matches!(
            self,
            Token::IntTy
                | Token::ShortTy
                | Token::CharTy
                | Token::LongTy
                | Token::SignedTy
                | Token::UnsignedTy
                | Token::FloatTy
                | Token::DoubleTy
                | Token::BoolTy
                | Token::VoidTy
                | Token::Struct
        )
    }
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

pub fn lex(source: &str) -> Result<Vec<SpannedToken>, Vec<CompileError>> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize()
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<SpannedToken>,
    errors: Vec<CompileError>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn tokenize(&mut self) -> Result<Vec<SpannedToken>, Vec<CompileError>> {
        while self.pos < self.bytes.len() {
            self.skip_whitespace_and_comments();
            if self.pos >= self.bytes.len() {
                break;
            }

            let start = self.pos;
            let ch = self.bytes[self.pos];

            match ch {
                b'(' => self.single(Token::LParen),
                b')' => self.single(Token::RParen),
                b'{' => self.single(Token::LBrace),
                b'}' => self.single(Token::RBrace),
                b'[' => self.single(Token::LBracket),
                b']' => self.single(Token::RBracket),
                b';' => self.single(Token::Semi),
                b',' => self.single(Token::Comma),
                b'?' => self.single(Token::Question),
                b':' => self.single(Token::Colon),
                b'~' => self.single(Token::Tilde),
                b'.' if self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit) => {
                    self.lex_number(start);
                }
                b'.' => self.single(Token::Dot),
                b'+' => self.operator(&[("++", Token::PlusPlus), ("+=", Token::CompoundAssign("+"))], Token::Plus),
                b'-' => self.operator(&[("--", Token::MinusMinus), ("-=", Token::CompoundAssign("-"))], Token::Minus),
                b'*' => self.operator(&[("*=", Token::CompoundAssign("*"))], Token::Star),
                b'/' => self.operator(&[("/=", Token::CompoundAssign("/"))], Token::Slash),
                b'%' => self.operator(&[("%=", Token::CompoundAssign("%"))], Token::Percent),
                b'^' => self.operator(&[("^=", Token::CompoundAssign("^"))], Token::Caret),
                b'&' => self.operator(&[("&&", Token::AndAnd), ("&=", Token::CompoundAssign("&"))], Token::Amp),
                b'|' => self.operator(&[("||", Token::OrOr), ("|=", Token::CompoundAssign("|"))], Token::Pipe),
                b'=' => self.operator(&[("==", Token::EqEq)], Token::Eq),
                b'!' => self.operator(&[("!=", Token::Ne)], Token::Bang),
                b'<' => self.operator(
                    &[("<<=", Token::CompoundAssign("<<")), ("<<", Token::Shl), ("<=", Token::Le)],
                    Token::Lt,
                ),
                b'>' => self.operator(
                    &[(">>=", Token::CompoundAssign(">>")), (">>", Token::Shr), (">=", Token::Ge)],
                    Token::Gt,
                ),
                b'"' => {
                    self.pos += 1;
                    self.lex_string(start);
                }
                b'\'' => {
                    self.pos += 1;
                    self.lex_char(start);
                }
                b'0'..=b'9' => self.lex_number(start),
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_ident(start),
                b'#' => {
                    self.errors.push(CompileError::lexer(
                        "Preprocessor directive survived inclusion",
                        Span::new(start, start + 1),
                    ));
                    self.pos += 1;
                }
                _ => {
                    let ch = self.source[start..].chars().next().unwrap_or('?');
                    self.errors.push(CompileError::lexer(
                        format!("Unexpected character: '{ch}'"),
                        Span::new(start, start + ch.len_utf8()),
                    ));
                    self.pos += ch.len_utf8();
                }
            }
        }

        self.tokens.push(SpannedToken {
            token: Token::Eof,
            span: Span::new(self.pos, self.pos),
        });

        if self.errors.is_empty() {
            Ok(std::mem::take(&mut self.tokens))
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn push(&mut self, token: Token, start: usize, end: usize) {
        self.tokens.push(SpannedToken {
            token,
            span: Span::new(start, end),
        });
    }

    fn single(&mut self, token: Token) {
        let start = self.pos;
        self.pos += 1;
        self.push(token, start, self.pos);
    }

    /// Longest match among `candidates` (listed longest first), else `fallback`.
    fn operator(&mut self, candidates: &[(&str, Token)], fallback: Token) {
        let start = self.pos;
        let bytes = self.bytes;
        let rest = &bytes[self.pos..];
        for (text, token) in candidates {
            if rest.starts_with(text.as_bytes()) {
                self.pos += text.len();
                self.push(token.clone(), start, self.pos);
                return;
            }
        }
        self.pos += 1;
        self.push(fallback, start, self.pos);
    }

    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' => self.pos += 1,
                b'/' if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                b'/' if self.bytes.get(self.pos + 1) == Some(&b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        if self.pos + 1 >= self.bytes.len() {
                            self.errors.push(CompileError::lexer(
                                "Unterminated block comment",
                                Span::new(start, self.bytes.len()),
                            ));
                            self.pos = self.bytes.len();
                            break;
                        }
                        if self.bytes[self.pos] == b'*' && self.bytes[self.pos + 1] == b'/' {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    /// Read one possibly-escaped character of a string or char literal.
    fn read_char_in_literal(&mut self, start: usize) -> Option<u32> {
        let ch = self.source[self.pos..].chars().next()?;
        self.pos += ch.len_utf8();
        if ch != '\\' {
            return Some(u32::from(ch));
        }
        let escape = self.peek()?;
        self.pos += 1;
        let value = match escape {
            b'n' => u32::from(b'\n'),
            b't' => u32::from(b'\t'),
            b'r' => u32::from(b'\r'),
            b'0' => 0,
            b'a' => 7,
            b'b' => 8,
            b'f' => 12,
            b'v' => 11,
            b'\\' => u32::from(b'\\'),
            b'\'' => u32::from(b'\''),
            b'"' => u32::from(b'"'),
            b'x' => {
                let hex_start = self.pos;
                while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                    self.pos += 1;
                }
                match u32::from_str_radix(&self.source[hex_start..self.pos], 16) {
                    Ok(v) => v & 0xFF,
                    Err(_) => {
                        self.errors.push(CompileError::lexer(
                            "Invalid \\x escape",
                            Span::new(start, self.pos),
                        ));
                        0
                    }
                }
            }
            other => {
                self.errors.push(CompileError::lexer(
                    format!("Unknown escape sequence: '\\{}'", other as char),
                    Span::new(self.pos - 2, self.pos),
                ));
                u32::from(other)
            }
        };
        Some(value)
    }

    fn lex_string(&mut self, start: usize) {
        let mut s = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                None | Some(b'\n') => {
                    self.errors.push(CompileError::lexer(
                        "Unterminated string literal",
                        Span::new(start, self.pos),
                    ));
                    break;
                }
                Some(_) => {
                    if let Some(c) = self.read_char_in_literal(start) {
                        s.push(char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER));
                    }
                }
            }
        }
        self.push(Token::String(s), start, self.pos);
    }

    fn lex_char(&mut self, start: usize) {
        let value = match self.peek() {
            Some(b'\'') | None => None,
            Some(_) => self.read_char_in_literal(start),
        };
        if self.peek() == Some(b'\'') && value.is_some() {
            self.pos += 1;
            self.push(Token::Char(value.unwrap_or(0)), start, self.pos);
        } else {
            self.errors.push(CompileError::lexer(
                "Malformed character literal",
                Span::new(start, self.pos),
            ));
        }
    }

    fn lex_number(&mut self, start: usize) {
        let hex = self.bytes[self.pos] == b'0'
            && matches!(self.bytes.get(self.pos + 1), Some(b'x' | b'X'));
        if hex {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = &self.source[digits_start..self.pos];
            let parsed = u64::from_str_radix(digits, 16);
            self.finish_integer(start, parsed.ok(), true);
            return;
        }

        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }

        let text = &self.source[start..self.pos];
        if is_float {
            let single = matches!(self.peek(), Some(b'f' | b'F'));
            if single || matches!(self.peek(), Some(b'l' | b'L')) {
                self.pos += 1;
            }
            match text.parse::<f64>() {
                Ok(value) => self.push(Token::Float { value, single }, start, self.pos),
                Err(_) => self.errors.push(CompileError::lexer(
                    format!("Invalid float: {text}"),
                    Span::new(start, self.pos),
                )),
            }
            return;
        }

        let octal = text.len() > 1 && text.starts_with('0');
        let parsed = if octal {
            u64::from_str_radix(&text[1..], 8).ok()
        } else {
            text.parse::<u64>().ok()
        };
        self.finish_integer(start, parsed, octal);
    }

    fn finish_integer(&mut self, start: usize, value: Option<u64>, radix_literal: bool) {
        let mut unsigned = false;
        let mut long = false;
        while let Some(b) = self.peek() {
            match b {
                b'u' | b'U' => unsigned = true,
                b'l' | b'L' => long = true,
                _ => break,
            }
            self.pos += 1;
        }
        if self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
                self.pos += 1;
            }
            self.errors.push(CompileError::lexer(
                format!("Invalid number: {}", &self.source[start..self.pos]),
                Span::new(start, self.pos),
            ));
            return;
        }
        match value {
            Some(value) => self.push(
                Token::Int(IntLiteral {
                    value,
                    unsigned,
                    long,
                    radix_literal,
                }),
                start,
                self.pos,
            ),
            None => self.errors.push(CompileError::lexer(
                format!("Integer literal out of range: {}", &self.source[start..self.pos]),
                Span::new(start, self.pos),
            )),
        }
    }

    fn lex_ident(&mut self, start: usize) {
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric() || self.bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
        let word = &self.source[start..self.pos];
        let token = match word {
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "do" => Token::Do,
            "for" => Token::For,
            "return" => Token::Return,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "struct" => Token::Struct,
            "typedef" => Token::Typedef,
            "true" => Token::True,
            "false" => Token::False,
            "const" | "static" | "volatile" | "extern" | "inline" => Token::Qualifier,
            "int" => Token::IntTy,
            "short" => Token::ShortTy,
            "char" => Token::CharTy,
            "long" => Token::LongTy,
            "signed" => Token::SignedTy,
            "unsigned" => Token::UnsignedTy,
            "float" => Token::FloatTy,
            "double" => Token::DoubleTy,
            "bool" | "_Bool" => Token::BoolTy,
            "void" => Token::VoidTy,
            _ => Token::Ident(word.to_string()),
        };
        self.push(token, start, self.pos);
    }
}
