//! Abstract Syntax Tree for queries and access rules.
//!
//! The tree is a uniform [`Node`] with a [`NodeKind`] and an ordered child
//! list. Terminals carry their text. Equality ignores spans so that trees
//! parsed from different sources (or built by the rewriter) compare by
//! structure only.

use crate::span::Span;
use std::fmt;

/// Access kinds an access rule can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessKind {
    Create,
    Read,
    Update,
    Delete,
}

impl AccessKind {
    /// All access kinds, in declaration order.
    pub const ALL: [AccessKind; 4] = [
        AccessKind::Create,
        AccessKind::Read,
        AccessKind::Update,
        AccessKind::Delete,
    ];

    /// Upper-case keyword for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            AccessKind::Create => "CREATE",
            AccessKind::Read => "READ",
            AccessKind::Update => "UPDATE",
            AccessKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate functions allowed in select and having clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Avg,
    Max,
    Min,
    Sum,
    Count,
}

impl AggregateFunction {
    /// Classify a function name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        [
            AggregateFunction::Avg,
            AggregateFunction::Max,
            AggregateFunction::Min,
            AggregateFunction::Sum,
            AggregateFunction::Count,
        ]
        .into_iter()
        .find(|f| f.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Count => "COUNT",
        }
    }
}

/// Which side(s) TRIM removes characters from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrimSpec {
    Leading,
    Trailing,
    #[default]
    Both,
}

impl TrimSpec {
    pub fn as_str(self) -> &'static str {
        match self {
            TrimSpec::Leading => "LEADING",
            TrimSpec::Trailing => "TRAILING",
            TrimSpec::Both => "BOTH",
        }
    }
}

/// The kind of an AST node.
///
/// Child layout per kind:
///
/// | kind | children |
/// |---|---|
/// | `SelectStatement` | select clause, from clause, where?, group by?, having?, order by? |
/// | `UpdateStatement` | update clause, set clause, where? |
/// | `DeleteStatement` | delete clause, where? |
/// | `AccessRule` | abstract schema name, identifier, where? |
/// | `Subselect` | select clause, from clause, where?, group by?, having? |
/// | `FromItem` | abstract schema name, identifier, joins... |
/// | `InnerJoin` / `OuterJoin` | path, identifier? |
/// | `Path` | root expression, path segments... |
/// | `Like` | value, pattern, escape? |
/// | `Trim` | trim character?, text |
/// | `Substring` | text, start, length? |
/// | `Locate` | search, text, start? |
/// | `In` | value, items... (or a single subselect) |
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // Statements
    SelectStatement,
    UpdateStatement,
    DeleteStatement,
    AccessRule { kinds: Vec<AccessKind> },
    Subselect,

    // Clauses
    SelectClause { distinct: bool },
    FromClause,
    FromItem,
    InnerJoin { fetch: bool },
    OuterJoin { fetch: bool },
    WhereClause,
    GroupByClause,
    HavingClause,
    OrderByClause,
    OrderByItem { descending: bool },
    UpdateClause,
    DeleteClause,
    SetClause,
    Assignment,

    // Select expressions
    Constructor(String),
    Aggregate { function: AggregateFunction, distinct: bool },

    // Logic
    Or,
    And,
    Not,
    Brackets,

    // Conditions
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Between,
    In,
    Like,
    IsNull,
    IsEmpty,
    MemberOf,
    Exists,

    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Negative,
    Mod,
    Abs,
    Sqrt,
    Size,

    // Strings
    Concat,
    Substring,
    Trim { spec: Option<TrimSpec> },
    Upper,
    Lower,
    Length,
    Locate,

    // Temporal
    CurrentDate,
    CurrentTime,
    CurrentTimestamp,

    // Security context
    CurrentPrincipal,
    CurrentRoles,
    CurrentTenant,

    // Terminals
    AbstractSchemaName(String),
    Identifier(String),
    PathSegment(String),
    Path,
    NamedParameter(String),
    PositionalParameter(u32),
    /// Source text including quotes.
    StringLiteral(String),
    IntegerLiteral(String),
    DecimalLiteral(String),
    BooleanLiteral(bool),
    Null,
}

impl NodeKind {
    /// Whether nodes of this kind produce a truth value.
    pub fn is_condition(&self) -> bool {
        matches!(
            self,
            NodeKind::Or
                | NodeKind::And
                | NodeKind::Not
                | NodeKind::Equals
                | NodeKind::NotEquals
                | NodeKind::LessThan
                | NodeKind::LessOrEqual
                | NodeKind::GreaterThan
                | NodeKind::GreaterOrEqual
                | NodeKind::Between
                | NodeKind::In
                | NodeKind::Like
                | NodeKind::IsNull
                | NodeKind::IsEmpty
                | NodeKind::MemberOf
                | NodeKind::Exists
        )
    }

    /// Whether this is a binary comparison operator.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            NodeKind::Equals
                | NodeKind::NotEquals
                | NodeKind::LessThan
                | NodeKind::LessOrEqual
                | NodeKind::GreaterThan
                | NodeKind::GreaterOrEqual
        )
    }

    /// Whether this is a leaf that carries no children.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeKind::AbstractSchemaName(_)
                | NodeKind::Identifier(_)
                | NodeKind::PathSegment(_)
                | NodeKind::NamedParameter(_)
                | NodeKind::PositionalParameter(_)
                | NodeKind::StringLiteral(_)
                | NodeKind::IntegerLiteral(_)
                | NodeKind::DecimalLiteral(_)
                | NodeKind::BooleanLiteral(_)
                | NodeKind::Null
                | NodeKind::CurrentDate
                | NodeKind::CurrentTime
                | NodeKind::CurrentTimestamp
                | NodeKind::CurrentPrincipal
                | NodeKind::CurrentRoles
                | NodeKind::CurrentTenant
        )
    }
}

/// A node of the syntax tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<Node>,
    pub span: Span,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.children == other.children
    }
}

impl Node {
    /// Create a node.
    pub fn new(kind: NodeKind, children: Vec<Node>, span: Span) -> Self {
        Self {
            kind,
            children,
            span,
        }
    }

    /// Create a node without source location, as the rewriter does.
    pub fn synthetic(kind: NodeKind, children: Vec<Node>) -> Self {
        Self::new(kind, children, Span::default())
    }

    /// Create a leaf node.
    pub fn leaf(kind: NodeKind, span: Span) -> Self {
        Self::new(kind, Vec::new(), span)
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self::synthetic(NodeKind::Identifier(name.into()), Vec::new())
    }

    pub fn named_parameter(name: impl Into<String>) -> Self {
        Self::synthetic(NodeKind::NamedParameter(name.into()), Vec::new())
    }

    pub fn integer(value: i64) -> Self {
        Self::synthetic(NodeKind::IntegerLiteral(value.to_string()), Vec::new())
    }

    /// A path from `root` through `segments`; a bare root when there are none.
    pub fn path<S: Into<String>>(root: Node, segments: impl IntoIterator<Item = S>) -> Self {
        let segments: Vec<Node> = segments
            .into_iter()
            .map(|s| Self::synthetic(NodeKind::PathSegment(s.into()), Vec::new()))
            .collect();
        if segments.is_empty() {
            return root;
        }
        let mut children = Vec::with_capacity(segments.len() + 1);
        children.push(root);
        children.extend(segments);
        Self::synthetic(NodeKind::Path, children)
    }

    /// Parse a dotted path string such as `d.owner.name`.
    pub fn path_from_str(path: &str) -> Self {
        let mut parts = path.split('.');
        let root = Node::identifier(parts.next().unwrap_or_default());
        Node::path(root, parts)
    }

    /// Wrap in brackets unless already bracketed.
    pub fn bracketed(self) -> Self {
        if self.kind == NodeKind::Brackets {
            self
        } else {
            Self::synthetic(NodeKind::Brackets, vec![self])
        }
    }

    pub fn binary(kind: NodeKind, left: Node, right: Node) -> Self {
        Self::synthetic(kind, vec![left, right])
    }

    /// N-ary AND; a single operand is returned unchanged.
    pub fn and(operands: Vec<Node>) -> Self {
        Self::nary(NodeKind::And, operands)
    }

    /// N-ary OR; a single operand is returned unchanged.
    pub fn or(operands: Vec<Node>) -> Self {
        Self::nary(NodeKind::Or, operands)
    }

    fn nary(kind: NodeKind, mut operands: Vec<Node>) -> Self {
        if operands.len() == 1 {
            operands.remove(0)
        } else {
            Self::synthetic(kind, operands)
        }
    }

    /// The always-false condition `1 = 0`.
    pub fn always_false() -> Self {
        Self::binary(NodeKind::Equals, Node::integer(1), Node::integer(0))
    }

    /// Child at `index`, if present.
    pub fn child(&self, index: usize) -> Option<&Node> {
        self.children.get(index)
    }

    /// First direct child of the given kind.
    pub fn find_child(&self, predicate: impl Fn(&NodeKind) -> bool) -> Option<&Node> {
        self.children.iter().find(|c| predicate(&c.kind))
    }

    /// Mutable access to the first direct child of the given kind.
    pub fn find_child_mut(&mut self, predicate: impl Fn(&NodeKind) -> bool) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| predicate(&c.kind))
    }

    /// Text carried by a terminal node.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::AbstractSchemaName(s)
            | NodeKind::Identifier(s)
            | NodeKind::PathSegment(s)
            | NodeKind::NamedParameter(s)
            | NodeKind::StringLiteral(s)
            | NodeKind::IntegerLiteral(s)
            | NodeKind::DecimalLiteral(s) => Some(s),
            _ => None,
        }
    }

    /// Name of an identifier node.
    pub fn as_identifier(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// Dotted form of an identifier or an identifier-rooted path.
    pub fn path_string(&self) -> Option<String> {
        match &self.kind {
            NodeKind::Identifier(name) => Some(name.clone()),
            NodeKind::Path => {
                let mut result = self.children.first()?.path_string()?;
                for segment in self.children.iter().skip(1) {
                    result.push('.');
                    result.push_str(segment.text()?);
                }
                Some(result)
            }
            _ => None,
        }
    }

    /// Root alias of an identifier or path node.
    pub fn root_alias(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Identifier(name) => Some(name),
            NodeKind::Path => self.children.first()?.root_alias(),
            _ => None,
        }
    }

    /// Segments after the root of a path node.
    pub fn path_segments(&self) -> Vec<&str> {
        match &self.kind {
            NodeKind::Path => self.children.iter().skip(1).filter_map(|c| c.text()).collect(),
            _ => Vec::new(),
        }
    }

    /// Aliases declared by the FROM clause of a statement or subselect,
    /// range variables before their joins.
    pub fn declared_aliases(&self) -> Vec<&str> {
        let Some(from) = self.find_child(|k| *k == NodeKind::FromClause) else {
            return Vec::new();
        };
        let mut aliases = Vec::new();
        for item in &from.children {
            if let Some(alias) = item.child(1).and_then(Node::as_identifier) {
                aliases.push(alias);
            }
        }
        for item in &from.children {
            for join in item.children.iter().skip(2) {
                if let Some(alias) = join.child(1).and_then(Node::as_identifier) {
                    aliases.push(alias);
                }
            }
        }
        aliases
    }

    /// Unescaped value of a string literal.
    pub fn string_value(&self) -> Option<String> {
        match &self.kind {
            NodeKind::StringLiteral(raw) => Some(unquote(raw)),
            _ => None,
        }
    }

    /// Pre-order traversal. The visitor returns `false` to skip a node's children.
    pub fn walk<'a>(&'a self, visitor: &mut impl FnMut(&'a Node) -> bool) {
        if visitor(self) {
            for child in &self.children {
                child.walk(visitor);
            }
        }
    }

    /// Mutable pre-order traversal. The visitor returns `false` to skip a node's children.
    pub fn walk_mut(&mut self, visitor: &mut impl FnMut(&mut Node) -> bool) {
        if visitor(self) {
            for child in &mut self.children {
                child.walk_mut(visitor);
            }
        }
    }

    /// All nodes in the subtree (self included) matching `predicate`.
    pub fn collect<'a>(&'a self, predicate: impl Fn(&Node) -> bool) -> Vec<&'a Node> {
        let mut found = Vec::new();
        self.walk(&mut |node| {
            if predicate(node) {
                found.push(node);
            }
            true
        });
        found
    }

    /// Whether the subtree contains a node matching `predicate`.
    pub fn contains(&self, predicate: impl Fn(&Node) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |node| {
            if predicate(node) {
                found = true;
            }
            !found
        });
        found
    }
}

/// Strip the quotes of a string literal and collapse doubled quotes.
pub fn unquote(raw: &str) -> String {
    let inner = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(raw);
    inner.replace("''", "'")
}

/// Quote a string as a literal, doubling embedded quotes.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_spans() {
        let a = Node::leaf(NodeKind::Identifier("d".into()), Span::new(7, 8));
        let b = Node::identifier("d");
        assert_eq!(a, b);
        assert_ne!(a, Node::identifier("e"));
    }

    #[test]
    fn test_path_helpers() {
        let path = Node::path_from_str("d.owner.name");
        assert_eq!(path.kind, NodeKind::Path);
        assert_eq!(path.path_string().as_deref(), Some("d.owner.name"));
        assert_eq!(path.root_alias(), Some("d"));
        assert_eq!(path.path_segments(), vec!["owner", "name"]);

        let bare = Node::path_from_str("d");
        assert_eq!(bare, Node::identifier("d"));
    }

    #[test]
    fn test_declared_aliases() {
        let statement = crate::parser::parse(
            "SELECT d FROM Document d JOIN d.tags t, Folder f LEFT JOIN f.owner o",
        )
        .unwrap();
        assert_eq!(statement.declared_aliases(), vec!["d", "f", "t", "o"]);
        assert!(Node::identifier("d").declared_aliases().is_empty());
    }

    #[test]
    fn test_nary_single_operand() {
        let cond = Node::always_false();
        assert_eq!(Node::and(vec![cond.clone()]), cond);
        assert_eq!(Node::or(vec![cond.clone(), cond.clone()]).children.len(), 2);
    }

    #[test]
    fn test_collect_and_contains() {
        let tree = Node::and(vec![
            Node::binary(
                NodeKind::Equals,
                Node::path_from_str("d.owner"),
                Node::named_parameter("owner"),
            ),
            Node::always_false(),
        ]);
        let params = tree.collect(|n| matches!(n.kind, NodeKind::NamedParameter(_)));
        assert_eq!(params.len(), 1);
        assert!(tree.contains(|n| matches!(n.kind, NodeKind::IntegerLiteral(_))));
        assert!(!tree.contains(|n| n.kind == NodeKind::Exists));
    }

    #[test]
    fn test_quote_roundtrip() {
        assert_eq!(quote("it's"), "'it''s'");
        assert_eq!(unquote("'it''s'"), "it's");
    }

    #[test]
    fn test_keywords_from_names() {
        assert_eq!(AggregateFunction::from_name("count"), Some(AggregateFunction::Count));
        assert_eq!(AggregateFunction::from_name("median"), None);
        assert_eq!(TrimSpec::default(), TrimSpec::Both);
    }
}
