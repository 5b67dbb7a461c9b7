//! Lexer for the query and access rule language using logos.
//!
//! Words are lexed uniformly and classified into keywords afterwards, so
//! keywords stay case-insensitive and contextual words such as `READ` or
//! `TO` remain usable as identifiers. Literal tokens keep their source text
//! verbatim because rewritten queries are reprinted from the tree.

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Token types for the query language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    /// Identifier or keyword, original spelling.
    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Word(String),

    /// Single-quoted string literal including its quotes (`''` escapes a quote).
    #[regex(r"'([^']|'')*'", |lex| lex.slice().to_string())]
    String(String),

    /// Integer literal text.
    #[regex(r"[0-9]+", |lex| lex.slice().to_string())]
    Integer(String),

    /// Decimal literal text.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().to_string())]
    Decimal(String),

    /// Named input parameter without the leading colon.
    #[regex(r":[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice()[1..].to_string())]
    NamedParameter(String),

    /// Positional input parameter index.
    #[regex(r"\?[0-9]+", |lex| lex.slice()[1..].parse::<u32>().ok())]
    PositionalParameter(u32),

    // Comparison operators
    #[token("=")]
    Eq,
    #[token("<>")]
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // Arithmetic operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

impl Token {
    /// The keyword this token spells, if any.
    pub fn keyword(&self) -> Option<Keyword> {
        match self {
            Token::Word(word) => Keyword::from_word(word),
            _ => None,
        }
    }

    /// Whether this token is the given keyword.
    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.keyword() == Some(keyword)
    }

    /// Human-readable description used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Word(w) => format!("'{}'", w),
            Token::String(s) => s.clone(),
            Token::Integer(i) | Token::Decimal(i) => i.clone(),
            Token::NamedParameter(p) => format!(":{}", p),
            Token::PositionalParameter(p) => format!("?{}", p),
            Token::Eq => "'='".into(),
            Token::Ne => "'<>'".into(),
            Token::Le => "'<='".into(),
            Token::Ge => "'>='".into(),
            Token::Lt => "'<'".into(),
            Token::Gt => "'>'".into(),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Dot => "'.'".into(),
            Token::Comma => "','".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
        }
    }
}

macro_rules! keywords {
    ($( $variant:ident => $text:literal, reserved = $reserved:literal; )*) => {
        /// Keywords of the query and rule language.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $( $variant, )*
        }

        impl Keyword {
            /// Classify a word, ignoring ASCII case.
            pub fn from_word(word: &str) -> Option<Keyword> {
                $(
                    if word.eq_ignore_ascii_case($text) {
                        return Some(Keyword::$variant);
                    }
                )*
                None
            }

            /// Canonical upper-case spelling.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Keyword::$variant => $text, )*
                }
            }

            /// Reserved keywords can never be used as identification variables.
            pub fn is_reserved(self) -> bool {
                match self {
                    $( Keyword::$variant => $reserved, )*
                }
            }
        }
    };
}

keywords! {
    Select => "SELECT", reserved = true;
    From => "FROM", reserved = true;
    Where => "WHERE", reserved = true;
    Group => "GROUP", reserved = true;
    By => "BY", reserved = true;
    Having => "HAVING", reserved = true;
    Order => "ORDER", reserved = true;
    Asc => "ASC", reserved = true;
    Desc => "DESC", reserved = true;
    Distinct => "DISTINCT", reserved = true;
    And => "AND", reserved = true;
    Or => "OR", reserved = true;
    Not => "NOT", reserved = true;
    Between => "BETWEEN", reserved = true;
    In => "IN", reserved = true;
    Like => "LIKE", reserved = true;
    Escape => "ESCAPE", reserved = true;
    Is => "IS", reserved = true;
    Null => "NULL", reserved = true;
    Empty => "EMPTY", reserved = true;
    Member => "MEMBER", reserved = true;
    Of => "OF", reserved = true;
    Exists => "EXISTS", reserved = true;
    Join => "JOIN", reserved = true;
    Inner => "INNER", reserved = true;
    Left => "LEFT", reserved = true;
    Outer => "OUTER", reserved = true;
    Fetch => "FETCH", reserved = true;
    As => "AS", reserved = true;
    New => "NEW", reserved = true;
    True => "TRUE", reserved = true;
    False => "FALSE", reserved = true;
    Update => "UPDATE", reserved = true;
    Delete => "DELETE", reserved = true;
    Set => "SET", reserved = true;
    CurrentDate => "CURRENT_DATE", reserved = true;
    CurrentTime => "CURRENT_TIME", reserved = true;
    CurrentTimestamp => "CURRENT_TIMESTAMP", reserved = true;
    CurrentPrincipal => "CURRENT_PRINCIPAL", reserved = true;
    CurrentRoles => "CURRENT_ROLES", reserved = true;
    CurrentTenant => "CURRENT_TENANT", reserved = true;
    Grant => "GRANT", reserved = false;
    Access => "ACCESS", reserved = false;
    To => "TO", reserved = false;
    Create => "CREATE", reserved = false;
    Read => "READ", reserved = false;
    Leading => "LEADING", reserved = false;
    Trailing => "TRAILING", reserved = false;
    Both => "BOTH", reserved = false;
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenize a source string into spanned tokens.
///
/// Fails on the first character sequence that is not a valid token.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span: Span = lexer.span().into();
        match result {
            Ok(token) => tokens.push(SpannedToken { token, span }),
            Err(()) => {
                return Err(ParseError::at(
                    source,
                    span,
                    "a valid token",
                    format!("'{}'", lexer.slice()),
                ))
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_select_statement() {
        let tokens = kinds("SELECT d FROM Document d");
        assert_eq!(tokens.len(), 5);
        assert!(tokens[0].is_keyword(Keyword::Select));
        assert_eq!(tokens[1], Token::Word("d".to_string()));
        assert!(tokens[2].is_keyword(Keyword::From));
        assert_eq!(tokens[3], Token::Word("Document".to_string()));
    }

    #[test]
    fn test_keywords_ignore_case() {
        let tokens = kinds("select Where current_principal");
        assert!(tokens[0].is_keyword(Keyword::Select));
        assert!(tokens[1].is_keyword(Keyword::Where));
        assert!(tokens[2].is_keyword(Keyword::CurrentPrincipal));
    }

    #[test]
    fn test_contextual_keywords_are_not_reserved() {
        assert!(!Keyword::Read.is_reserved());
        assert!(!Keyword::To.is_reserved());
        assert!(Keyword::Select.is_reserved());
        assert_eq!(Keyword::from_word("grant"), Some(Keyword::Grant));
        assert_eq!(Keyword::from_word("owner"), None);
    }

    #[test]
    fn test_literals_keep_source_text() {
        let tokens = kinds(r"'it''s' 'abc\_de' 42 3.25");
        assert_eq!(tokens[0], Token::String("'it''s'".to_string()));
        assert_eq!(tokens[1], Token::String(r"'abc\_de'".to_string()));
        assert_eq!(tokens[2], Token::Integer("42".to_string()));
        assert_eq!(tokens[3], Token::Decimal("3.25".to_string()));
    }

    #[test]
    fn test_parameters() {
        let tokens = kinds("d.owner = :owner AND d.id = ?1");
        assert!(tokens.contains(&Token::NamedParameter("owner".to_string())));
        assert!(tokens.contains(&Token::PositionalParameter(1)));
    }

    #[test]
    fn test_operators() {
        let tokens = kinds("a <> b != c <= d >= e < f > g + h - i * j / k");
        assert_eq!(tokens.iter().filter(|t| **t == Token::Ne).count(), 2);
        assert!(tokens.contains(&Token::Le));
        assert!(tokens.contains(&Token::Ge));
        assert!(tokens.contains(&Token::Lt));
        assert!(tokens.contains(&Token::Gt));
        assert!(tokens.contains(&Token::Slash));
    }

    #[test]
    fn test_spans() {
        let tokens = tokenize("SELECT  d").unwrap();
        assert_eq!(tokens[1].span, Span::new(8, 9));
    }

    #[test]
    fn test_invalid_token() {
        let err = tokenize("SELECT d FROM Document d WHERE d.name = #").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 41);
        assert_eq!(err.found, "'#'");
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("d.name = 'abc").is_err());
    }
}
