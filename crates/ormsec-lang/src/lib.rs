//! ormsec query and access rule language
//!
//! This crate provides the parser, printer and statement compiler for the
//! JPQL subset that ormsec secures, together with the access rule superset
//! administrators write rules in.
//!
//! # Statements
//!
//! ```text
//! SELECT d FROM Document d WHERE d.owner = :owner
//! SELECT NEW com.example.Row(d.title, COUNT(t)) FROM Document d JOIN d.tags t GROUP BY d.title
//! UPDATE Document d SET d.title = 'draft' WHERE d.id = ?1
//! DELETE FROM Document d WHERE d.archived = TRUE
//! ```
//!
//! # Access rules
//!
//! ```text
//! GRANT READ ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL
//! GRANT READ UPDATE ACCESS TO ClientDetails cd WHERE EXISTS
//!     (SELECT s FROM Staffing s WHERE s.client = cd.client AND s.employee.name = CURRENT_PRINCIPAL)
//! GRANT ACCESS TO PublicNote n
//! ```
//!
//! # Usage
//!
//! ```rust
//! use ormsec_lang::{parse, parse_and_compile};
//!
//! let statement = parse("select d from Document d where d.owner = :owner").unwrap();
//! assert_eq!(
//!     statement.to_string(),
//!     "SELECT d FROM Document d WHERE d.owner = :owner"
//! );
//!
//! let compiled = parse_and_compile("SELECT d FROM Document d WHERE d.owner = :owner").unwrap();
//! assert_eq!(compiled.selected_paths, vec!["d"]);
//! ```

pub mod ast;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod printer;
pub mod span;

// Re-export main types
pub use ast::{AccessKind, AggregateFunction, Node, NodeKind, TrimSpec};
pub use compiler::{CompiledStatement, Compiler, StatementKind, TypeDefinition};
pub use error::{CompileError, CompileErrorKind, LangError, ParseError};
pub use model::{PropertyType, TypeModel};
pub use span::{Position, Span};

/// Parse a source string into a statement or access rule tree.
///
/// # Example
///
/// ```rust
/// use ormsec_lang::{parse, NodeKind};
///
/// let statement = parse("SELECT d FROM Document d").unwrap();
/// assert_eq!(statement.kind, NodeKind::SelectStatement);
/// ```
pub fn parse(source: &str) -> Result<Node, ParseError> {
    parser::parse(source)
}

/// Parse a source string that must contain exactly one access rule.
pub fn parse_rule(source: &str) -> Result<Node, ParseError> {
    parser::parse_rule(source)
}

/// Compile a parsed statement without a type model.
pub fn compile(statement: Node) -> Result<CompiledStatement, CompileError> {
    Compiler::new().compile(statement)
}

/// Parse and compile a source string in one step.
///
/// # Example
///
/// ```rust
/// use ormsec_lang::parse_and_compile;
///
/// let compiled = parse_and_compile("SELECT d.title FROM Document d").unwrap();
/// assert_eq!(compiled.selected_paths, vec!["d.title"]);
/// ```
pub fn parse_and_compile(source: &str) -> Result<CompiledStatement, LangError> {
    let statement = parse(source)?;
    let compiled = compile(statement)?;
    Ok(compiled)
}

/// Parse and compile a source string, validating it against `model`.
pub fn parse_and_compile_with(
    source: &str,
    model: &dyn TypeModel,
) -> Result<CompiledStatement, LangError> {
    let statement = parse(source)?;
    let compiled = Compiler::with_model(model).compile(statement)?;
    Ok(compiled)
}

/// Tokenize a source string (for debugging/testing).
///
/// # Example
///
/// ```rust
/// use ormsec_lang::tokenize;
///
/// let tokens = tokenize("SELECT d FROM Document d").unwrap();
/// assert_eq!(tokens.len(), 5);
/// ```
pub fn tokenize(source: &str) -> Result<Vec<lexer::SpannedToken>, ParseError> {
    lexer::tokenize(source)
}
