//! Error types for parsing and compilation.

use crate::span::{offset_to_line_col, Span};
use thiserror::Error;

/// Error during lexing/parsing.
#[derive(Debug, Clone, Error)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// 1-based line of the span start.
    pub line: usize,
    /// 1-based column of the span start.
    pub column: usize,
    /// What the parser expected at this point.
    pub expected: String,
    /// What it found instead.
    pub found: String,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}:{}", self.message, self.line, self.column)
    }
}

impl ParseError {
    /// Create an "expected X, found Y" error located in `source`.
    pub fn at(
        source: &str,
        span: Span,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        let expected = expected.into();
        let found = found.into();
        let (line, column) = offset_to_line_col(source, span.start);
        Self {
            message: format!("expected {}, found {}", expected, found),
            span,
            line,
            column,
            expected,
            found,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let mut result = format!("error: {}\n", self.message);
        result.push_str(&format!("  --> line {}:{}\n", self.line, self.column));
        push_source_excerpt(&mut result, source, self.span);

        if let Some(hint) = &self.hint {
            result.push_str(&format!("   = hint: {}\n", hint));
        }

        result
    }
}

/// Error during statement compilation.
#[derive(Debug, Clone, Error)]
pub struct CompileError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Error kind for programmatic handling.
    pub kind: CompileErrorKind,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Kinds of compilation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Unknown entity type.
    UnknownEntity,
    /// Path segment that is not a property of the type it is applied to.
    UnknownProperty,
    /// Identification variable that no FROM item or join declares.
    UnresolvedAlias,
    /// Identification variable declared twice in the same scope.
    DuplicateAlias,
    /// Statement structure the compiler cannot handle.
    InvalidStatement,
    /// Access rule that does not fit the type model.
    InvalidRule,
}

impl CompileError {
    /// Create a new compile error.
    pub fn new(message: impl Into<String>, span: Span, kind: CompileErrorKind) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
        }
    }

    /// Create an unknown entity error.
    pub fn unknown_entity(entity: &str, span: Span) -> Self {
        Self::new(
            format!("unknown entity '{}'", entity),
            span,
            CompileErrorKind::UnknownEntity,
        )
    }

    /// Create an unknown property error.
    pub fn unknown_property(entity: &str, property: &str, span: Span) -> Self {
        Self::new(
            format!("unknown property '{}' on entity '{}'", property, entity),
            span,
            CompileErrorKind::UnknownProperty,
        )
    }

    /// Create an unresolved alias error.
    pub fn unresolved_alias(alias: &str, span: Span) -> Self {
        Self::new(
            format!("unresolved alias '{}'", alias),
            span,
            CompileErrorKind::UnresolvedAlias,
        )
    }

    /// Create a duplicate alias error.
    pub fn duplicate_alias(alias: &str, span: Span) -> Self {
        Self::new(
            format!("alias '{}' is declared more than once", alias),
            span,
            CompileErrorKind::DuplicateAlias,
        )
    }

    /// Create an invalid statement error.
    pub fn invalid_statement(message: impl Into<String>, span: Span) -> Self {
        Self::new(message, span, CompileErrorKind::InvalidStatement)
    }

    /// Create an invalid rule error.
    pub fn invalid_rule(message: impl Into<String>, span: Span) -> Self {
        Self::new(message, span, CompileErrorKind::InvalidRule)
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut result = format!("error[{:?}]: {}\n", self.kind, self.message);
        result.push_str(&format!("  --> line {}:{}\n", line, col));
        push_source_excerpt(&mut result, source, self.span);
        result
    }
}

fn push_source_excerpt(result: &mut String, source: &str, span: Span) {
    let (line, col) = offset_to_line_col(source, span.start);
    let Some(source_line) = source.lines().nth(line - 1) else {
        return;
    };

    result.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));
    for _ in 0..col {
        result.push(' ');
    }
    result.push('^');

    let available = source_line.chars().count().saturating_sub(col) + 1;
    for _ in 1..span.len().min(available) {
        result.push('~');
    }
    result.push('\n');
}

/// A combined error type for the public API.
#[derive(Debug, Clone, Error)]
pub enum LangError {
    /// Parse error.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    /// Compile error.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
}

impl LangError {
    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        match self {
            LangError::Parse(e) => e.format_with_source(source),
            LangError::Compile(e) => e.format_with_source(source),
        }
    }

    /// Get the span of the error.
    pub fn span(&self) -> Span {
        match self {
            LangError::Parse(e) => e.span,
            LangError::Compile(e) => e.span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_location() {
        let source = "SELECT d\nFROM Document d WHERE d.owner == 'x'";
        let err = ParseError::at(source, Span::new(39, 40), "an expression", "'='")
            .with_hint("use '=' for equality comparison");

        assert_eq!(err.line, 2);
        assert_eq!(err.column, 31);
        assert_eq!(err.expected, "an expression");
        assert_eq!(err.to_string(), "expected an expression, found '=' at 2:31");

        let formatted = err.format_with_source(source);
        assert!(formatted.contains("line 2:31"));
        assert!(formatted.contains("hint: use '=' for equality"));
    }

    #[test]
    fn test_compile_error_formatting() {
        let source = "SELECT d FROM Document d WHERE d.missing = 1";
        let err = CompileError::unknown_property("Document", "missing", Span::new(31, 40));
        assert_eq!(err.kind, CompileErrorKind::UnknownProperty);

        let formatted = err.format_with_source(source);
        assert!(formatted.contains("error[UnknownProperty]"));
        assert!(formatted.contains("line 1:32"));
        assert!(formatted.contains("^~~~~~~~"));
    }

    #[test]
    fn test_lang_error_span() {
        let err: LangError = CompileError::unresolved_alias("x", Span::new(3, 4)).into();
        assert_eq!(err.span(), Span::new(3, 4));
        assert!(err.to_string().starts_with("compile error: unresolved alias"));
    }
}
