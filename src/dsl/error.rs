use super::ast::Span;

/// A front-end or lowering error with source location.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexer,
    Parser,
    Preprocessor,
    DuplicateSymbol,
    UnknownIdentifier,
    UnsupportedOperation,
    InvalidAssignmentTarget,
    TypeMismatch,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Lexer => "lexer",
            ErrorKind::Parser => "parser",
            ErrorKind::Preprocessor => "preprocessor",
            ErrorKind::DuplicateSymbol => "duplicate symbol",
            ErrorKind::UnknownIdentifier => "unknown identifier",
            ErrorKind::UnsupportedOperation => "unsupported operation",
            ErrorKind::InvalidAssignmentTarget => "invalid assignment target",
            ErrorKind::TypeMismatch => "type mismatch",
        }
    }
}

impl CompileError {
    fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
        }
    }

    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Lexer, message, span)
    }

    pub fn parser(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Parser, message, span)
    }

    pub fn preprocessor(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Preprocessor, message, span)
    }

    pub fn duplicate(name: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::DuplicateSymbol,
            format!("identifier '{name}' already exists in this scope"),
            span,
        )
    }

    pub fn unknown(name: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::UnknownIdentifier,
            format!("undefined identifier '{name}'"),
            span,
        )
    }

    pub fn unknown_member(owner: &impl std::fmt::Display, member: &str, span: Span) -> Self {
        Self::new(
            ErrorKind::UnknownIdentifier,
            format!("{owner} has no member named '{member}'"),
            span,
        )
    }

    pub fn unsupported(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::UnsupportedOperation, message, span)
    }

    pub fn invalid_target(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::InvalidAssignmentTarget, message, span)
    }

    pub fn mismatch(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::TypeMismatch, message, span)
    }

    /// Format the error with source context: position, message, and the
    /// offending text.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let snippet = source
            .get(self.span.start..self.span.end.min(source.len()))
            .map(|s| s.lines().next().unwrap_or("").trim())
            .unwrap_or("");
        if snippet.is_empty() {
            format!("[{}] line {}:{}: {}", self.kind.label(), line, col, self.message)
        } else {
            format!(
                "[{}] line {}:{}: {} (at `{}`)",
                self.kind.label(),
                line,
                col,
                self.message,
                snippet,
            )
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// Render every diagnostic against `source`, one per line.
pub fn render_all(errors: &[CompileError], source: &str) -> String {
    errors
        .iter()
        .map(|e| e.format_with_source(source))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors raised while evaluating a lowered program. All are fatal to the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("invalid array size {size}")]
    InvalidArraySize { size: i64 },
    #[error("array or struct used before its declaration ran")]
    UninitializedHeapSlot,
    #[error("call depth limit of {limit} exceeded")]
    StackOverflow { limit: usize },
    #[error("function '{name}' is declared but never defined")]
    MissingFunctionBody { name: String },
    #[error("output error: {0}")]
    Output(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Output(e.to_string())
    }
}

/// A runtime error with the active script functions, innermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeFailure {
    pub error: RuntimeError,
    pub stack: Vec<String>,
}

impl From<RuntimeError> for RuntimeFailure {
    fn from(error: RuntimeError) -> Self {
        Self {
            error,
            stack: Vec::new(),
        }
    }
}

impl std::fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.stack.is_empty() {
            write!(f, " (in {})", self.stack.join(" <- "))?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeFailure {}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn formats_line_column_and_snippet() {
        let source = "int x;\nint x;\n";
        let err = CompileError::duplicate("x", Span::new(11, 12));
        assert_eq!(
            err.format_with_source(source),
            "[duplicate symbol] line 2:5: identifier 'x' already exists in this scope (at `x`)"
        );
    }

    #[test]
    fn runtime_failure_lists_stack() {
        let failure = RuntimeFailure {
            error: RuntimeError::IndexOutOfRange { index: 5, len: 3 },
            stack: vec!["fill".into(), "main".into()],
        };
        assert_eq!(
            failure.to_string(),
            "index 5 out of range for array of length 3 (in fill <- main)"
        );
    }

    #[test]
    fn empty_span_has_no_snippet() {
        let err = CompileError::parser("Expected ';'", Span::new(3, 3));
        assert_eq!(err.format_with_source("abc"), "[parser] line 1:4: Expected ';'");
    }
}
