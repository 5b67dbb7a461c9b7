//! Core error types.

use ormsec_lang::{AccessKind, CompileError, LangError, ParseError};
use thiserror::Error;

/// Errors raised while compiling rules, evaluating conditions and checking access.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed rule or query text.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Unknown type, alias or property in a rule or query.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// A live object does not match the mapping model.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// The in-memory evaluator cannot decide an expression.
    #[error("not evaluatable: {0}")]
    NotEvaluatable(String),

    /// No access rule grants the requested access.
    #[error("{kind} access to {entity} denied")]
    AccessDenied {
        entity: String,
        kind: AccessKind,
        #[source]
        cause: Option<Box<Error>>,
    },

    /// Bad arity or an unmatched `check_now`.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Error raised by the security context provider.
    #[error("security error: {0}")]
    Security(String),

    /// Error raised by the underlying persistence session.
    #[error("session error: {0}")]
    Session(String),

    /// Invalid configuration or rule source.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Access denied without an underlying cause.
    pub fn access_denied(entity: impl Into<String>, kind: AccessKind) -> Self {
        Error::AccessDenied {
            entity: entity.into(),
            kind,
            cause: None,
        }
    }

    /// Whether this error must reach the caller unchanged.
    pub fn is_security_error(&self) -> bool {
        matches!(self, Error::AccessDenied { .. } | Error::Security(_))
    }
}

impl From<LangError> for Error {
    fn from(err: LangError) -> Self {
        match err {
            LangError::Parse(e) => Error::Parse(e),
            LangError::Compile(e) => Error::Compile(e),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
