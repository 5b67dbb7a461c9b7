//! Compiles parsed statements: alias scopes, path validation, selected
//! paths and parameter indexes.

use crate::ast::*;
use crate::error::CompileError;
use crate::model::TypeModel;
use crate::span::Span;
use std::collections::BTreeSet;

/// The kind of a compiled statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Update,
    Delete,
    AccessRule,
    Subselect,
}

/// An identification variable and the type it ranges over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    /// The alias.
    pub alias: String,
    /// Entity type name, when known.
    pub type_name: Option<String>,
    /// Dotted join path for join aliases (`c.staffings`).
    pub join_path: Option<String>,
    /// Inner join (or a plain range variable); `false` for outer joins.
    pub inner: bool,
    /// Fetch join.
    pub fetch: bool,
}

impl TypeDefinition {
    /// A range variable declared in FROM, UPDATE, DELETE or GRANT.
    pub fn range(alias: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            type_name: Some(type_name.into()),
            join_path: None,
            inner: true,
            fetch: false,
        }
    }

    /// Whether this alias is introduced by a join.
    pub fn is_join(&self) -> bool {
        self.join_path.is_some()
    }
}

/// A normalised statement with its scopes and indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    /// The normalised statement tree.
    pub statement: Node,
    pub kind: StatementKind,
    /// Aliases in declaration order.
    pub type_definitions: Vec<TypeDefinition>,
    /// Dotted paths of the selected expressions (aggregate and constructor
    /// arguments unwrapped).
    pub selected_paths: Vec<String>,
    /// The WHERE condition, without its clause node.
    pub where_clause: Option<Node>,
    /// Named parameters referenced anywhere, subselects included.
    pub named_parameters: BTreeSet<String>,
    /// Number of distinct positional parameters.
    pub positional_parameter_count: usize,
    /// Result class of a `SELECT NEW` statement.
    pub constructor_type: Option<String>,
    /// Nested subselects, compiled in document order.
    pub subselects: Vec<CompiledStatement>,
}

impl CompiledStatement {
    /// Type definition of an alias.
    pub fn type_definition(&self, alias: &str) -> Option<&TypeDefinition> {
        self.type_definitions.iter().find(|d| d.alias == alias)
    }

    /// All declared aliases.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.type_definitions.iter().map(|d| d.alias.as_str())
    }

    /// Aliases of the selected paths, deduplicated, in selection order.
    pub fn selected_aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = Vec::new();
        for path in &self.selected_paths {
            let alias = path.split('.').next().unwrap_or(path);
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        aliases
    }
}

/// Statement compiler with an optional type model.
///
/// Without a model only alias scoping is checked; entity and property
/// names are taken on trust.
#[derive(Clone, Copy, Default)]
pub struct Compiler<'m> {
    model: Option<&'m dyn TypeModel>,
}

impl<'m> Compiler<'m> {
    /// A compiler that does not validate against a type model.
    pub fn new() -> Self {
        Self { model: None }
    }

    /// A compiler validating against `model`.
    pub fn with_model(model: &'m dyn TypeModel) -> Self {
        Self { model: Some(model) }
    }

    /// Compile a SELECT, UPDATE, DELETE or GRANT statement.
    pub fn compile(&self, mut statement: Node) -> Result<CompiledStatement, CompileError> {
        normalize(&mut statement);
        let kind = match statement.kind {
            NodeKind::SelectStatement => StatementKind::Select,
            NodeKind::UpdateStatement => StatementKind::Update,
            NodeKind::DeleteStatement => StatementKind::Delete,
            NodeKind::AccessRule { .. } => StatementKind::AccessRule,
            NodeKind::Subselect => StatementKind::Subselect,
            _ => {
                return Err(CompileError::invalid_statement(
                    "expected a SELECT, UPDATE, DELETE or GRANT statement",
                    statement.span,
                ))
            }
        };
        self.compile_scoped(statement, kind, &[])
    }

    /// Compile a subselect node whose free aliases come from `outer`.
    pub fn compile_subselect(
        &self,
        subselect: &Node,
        outer: &[TypeDefinition],
    ) -> Result<CompiledStatement, CompileError> {
        if subselect.kind != NodeKind::Subselect {
            return Err(CompileError::invalid_statement(
                "expected a subselect",
                subselect.span,
            ));
        }
        let mut statement = subselect.clone();
        normalize(&mut statement);
        self.compile_scoped(statement, StatementKind::Subselect, outer)
    }

    fn compile_scoped(
        &self,
        statement: Node,
        kind: StatementKind,
        outer: &[TypeDefinition],
    ) -> Result<CompiledStatement, CompileError> {
        let type_definitions = self.declare_aliases(&statement, kind, outer)?;

        let mut scope: Vec<TypeDefinition> = outer.to_vec();
        scope.extend(type_definitions.iter().cloned());

        let mut subselects = Vec::new();
        for clause in &statement.children {
            self.validate_clause(clause, &scope, &mut subselects)?;
        }

        let selected_paths = match kind {
            StatementKind::Select | StatementKind::Subselect => statement
                .find_child(|k| matches!(k, NodeKind::SelectClause { .. }))
                .map(selected_paths)
                .unwrap_or_default(),
            _ => type_definitions
                .first()
                .map(|d| vec![d.alias.clone()])
                .unwrap_or_default(),
        };

        let constructor_type = statement
            .find_child(|k| matches!(k, NodeKind::SelectClause { .. }))
            .and_then(|select| select.children.first())
            .and_then(|item| match &item.kind {
                NodeKind::Constructor(type_name) => Some(type_name.clone()),
                _ => None,
            });

        let where_clause = statement
            .find_child(|k| *k == NodeKind::WhereClause)
            .and_then(|clause| clause.children.first())
            .cloned();

        let mut named_parameters = BTreeSet::new();
        let mut positional = BTreeSet::new();
        statement.walk(&mut |node| {
            match &node.kind {
                NodeKind::NamedParameter(name) => {
                    named_parameters.insert(name.clone());
                }
                NodeKind::PositionalParameter(index) => {
                    positional.insert(*index);
                }
                _ => {}
            }
            true
        });

        Ok(CompiledStatement {
            statement,
            kind,
            type_definitions,
            selected_paths,
            where_clause,
            named_parameters,
            positional_parameter_count: positional.len(),
            constructor_type,
            subselects,
        })
    }

    /// Collect the aliases a statement declares.
    fn declare_aliases(
        &self,
        statement: &Node,
        kind: StatementKind,
        outer: &[TypeDefinition],
    ) -> Result<Vec<TypeDefinition>, CompileError> {
        let ranges: Vec<&Node> = match kind {
            StatementKind::Select | StatementKind::Subselect => statement
                .find_child(|k| *k == NodeKind::FromClause)
                .map(|from| from.children.iter().collect())
                .unwrap_or_default(),
            StatementKind::Update => statement
                .find_child(|k| *k == NodeKind::UpdateClause)
                .into_iter()
                .collect(),
            StatementKind::Delete => statement
                .find_child(|k| *k == NodeKind::DeleteClause)
                .into_iter()
                .collect(),
            StatementKind::AccessRule => vec![statement],
        };

        let mut declared: Vec<TypeDefinition> = Vec::new();

        // Range variables first so that joins may refer to any of them.
        for range in &ranges {
            let (Some(entity), Some(alias)) = (range.child(0), range.child(1)) else {
                return Err(CompileError::invalid_statement(
                    "expected an entity name and an alias",
                    range.span,
                ));
            };
            let (NodeKind::AbstractSchemaName(entity_name), NodeKind::Identifier(alias_name)) =
                (&entity.kind, &alias.kind)
            else {
                return Err(CompileError::invalid_statement(
                    "expected an entity name and an alias",
                    range.span,
                ));
            };
            if let Some(model) = self.model {
                if !model.has_entity(entity_name) {
                    return Err(if kind == StatementKind::AccessRule {
                        CompileError::invalid_rule(
                            format!("access rule refers to unknown entity '{}'", entity_name),
                            entity.span,
                        )
                    } else {
                        CompileError::unknown_entity(entity_name, entity.span)
                    });
                }
            }
            declare(
                &mut declared,
                TypeDefinition::range(alias_name, entity_name),
                alias.span,
            )?;
        }

        for range in &ranges {
            for join in range.children.iter().skip(2) {
                let (inner, fetch) = match join.kind {
                    NodeKind::InnerJoin { fetch } => (true, fetch),
                    NodeKind::OuterJoin { fetch } => (false, fetch),
                    _ => continue,
                };
                let Some(path) = join.child(0) else {
                    continue;
                };

                let mut scope: Vec<TypeDefinition> = outer.to_vec();
                scope.extend(declared.iter().cloned());
                let type_name = self.resolve_expression_type(path, &scope)?;

                // Fetch joins may omit the alias.
                let Some(alias) = join.child(1) else {
                    continue;
                };
                let Some(alias_name) = alias.as_identifier() else {
                    continue;
                };
                declare(
                    &mut declared,
                    TypeDefinition {
                        alias: alias_name.to_string(),
                        type_name,
                        join_path: path.path_string(),
                        inner,
                        fetch,
                    },
                    alias.span,
                )?;
            }
        }

        Ok(declared)
    }

    fn validate_clause(
        &self,
        clause: &Node,
        scope: &[TypeDefinition],
        subselects: &mut Vec<CompiledStatement>,
    ) -> Result<(), CompileError> {
        match clause.kind {
            NodeKind::FromClause => Ok(()),
            NodeKind::UpdateClause | NodeKind::DeleteClause => Ok(()),
            NodeKind::AbstractSchemaName(_) | NodeKind::Identifier(_) => Ok(()),
            _ => self.validate_expression(clause, scope, subselects),
        }
    }

    fn validate_expression(
        &self,
        node: &Node,
        scope: &[TypeDefinition],
        subselects: &mut Vec<CompiledStatement>,
    ) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Identifier(name) => {
                resolve_alias(name, scope, node.span)?;
                Ok(())
            }
            NodeKind::Path => {
                self.resolve_expression_type(node, scope)?;
                for child in &node.children {
                    if !matches!(child.kind, NodeKind::Identifier(_) | NodeKind::PathSegment(_)) {
                        self.validate_expression(child, scope, subselects)?;
                    }
                }
                Ok(())
            }
            NodeKind::Subselect => {
                let compiled = self.compile_scoped(node.clone(), StatementKind::Subselect, scope)?;
                subselects.push(compiled);
                Ok(())
            }
            _ => {
                for child in &node.children {
                    self.validate_expression(child, scope, subselects)?;
                }
                Ok(())
            }
        }
    }

    /// Entity type an identifier or path evaluates to, if the model knows it.
    fn resolve_expression_type(
        &self,
        node: &Node,
        scope: &[TypeDefinition],
    ) -> Result<Option<String>, CompileError> {
        let (root, segments): (&Node, &[Node]) = match node.kind {
            NodeKind::Path => match node.children.split_first() {
                Some((root, segments)) => (root, segments),
                None => return Ok(None),
            },
            _ => (node, &[]),
        };
        let NodeKind::Identifier(alias) = &root.kind else {
            return Ok(None);
        };
        let definition = resolve_alias(alias, scope, root.span)?;
        let (Some(model), Some(type_name)) = (self.model, definition.type_name.as_ref()) else {
            return Ok(None);
        };

        let mut current = Some(type_name.clone());
        let mut previous = alias.as_str();
        for segment in segments {
            let Some(name) = segment.text() else {
                return Ok(None);
            };
            // A basic property cannot be navigated any further.
            let Some(owner) = current.take() else {
                return Err(CompileError::unknown_property(previous, name, segment.span));
            };
            match model.property_type(&owner, name) {
                Some(property) => current = property.target().map(str::to_string),
                None => return Err(CompileError::unknown_property(&owner, name, segment.span)),
            }
            previous = name;
        }
        Ok(current)
    }
}

fn declare(
    declared: &mut Vec<TypeDefinition>,
    definition: TypeDefinition,
    span: Span,
) -> Result<(), CompileError> {
    if declared.iter().any(|d| d.alias == definition.alias) {
        return Err(CompileError::duplicate_alias(&definition.alias, span));
    }
    declared.push(definition);
    Ok(())
}

fn resolve_alias<'a>(
    alias: &str,
    scope: &'a [TypeDefinition],
    span: Span,
) -> Result<&'a TypeDefinition, CompileError> {
    // Innermost declarations shadow outer ones.
    scope
        .iter()
        .rev()
        .find(|d| d.alias == alias)
        .ok_or_else(|| CompileError::unresolved_alias(alias, span))
}

/// Dotted paths of a select clause's items.
fn selected_paths(select: &Node) -> Vec<String> {
    fn collect(node: &Node, paths: &mut Vec<String>) {
        match &node.kind {
            NodeKind::Identifier(_) | NodeKind::Path => {
                if let Some(path) = node.path_string() {
                    paths.push(path);
                }
            }
            NodeKind::Aggregate { .. } | NodeKind::Constructor(_) | NodeKind::Brackets => {
                for child in &node.children {
                    collect(child, paths);
                }
            }
            _ => {}
        }
    }

    let mut paths = Vec::new();
    for item in &select.children {
        collect(item, &mut paths);
    }
    paths
}

fn is_atomic(kind: &NodeKind) -> bool {
    kind.is_terminal()
        || matches!(
            kind,
            NodeKind::Path
                | NodeKind::Brackets
                | NodeKind::Subselect
                | NodeKind::Aggregate { .. }
                | NodeKind::Mod
                | NodeKind::Abs
                | NodeKind::Sqrt
                | NodeKind::Size
                | NodeKind::Concat
                | NodeKind::Substring
                | NodeKind::Trim { .. }
                | NodeKind::Upper
                | NodeKind::Lower
                | NodeKind::Length
                | NodeKind::Locate
        )
}

/// Flatten nested AND/OR and drop brackets around atomic expressions.
pub fn normalize(node: &mut Node) {
    for child in &mut node.children {
        normalize(child);
    }

    if matches!(node.kind, NodeKind::And | NodeKind::Or) {
        let kind = node.kind.clone();
        let children = std::mem::take(&mut node.children);
        for child in children {
            if child.kind == kind {
                node.children.extend(child.children);
            } else {
                node.children.push(child);
            }
        }
    }

    if node.kind == NodeKind::Brackets
        && node.children.len() == 1
        && is_atomic(&node.children[0].kind)
    {
        let inner = node.children.remove(0);
        *node = inner;
    }
}

/// Compile a statement, optionally validating against a type model.
pub fn compile(
    statement: Node,
    model: Option<&dyn TypeModel>,
) -> Result<CompiledStatement, CompileError> {
    match model {
        Some(model) => Compiler::with_model(model).compile(statement),
        None => Compiler::new().compile(statement),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;
    use crate::model::tests::TestModel;
    use crate::parser::parse;

    fn compile_with_model(source: &str) -> Result<CompiledStatement, CompileError> {
        let model = TestModel::documents();
        Compiler::with_model(&model).compile(parse(source).unwrap())
    }

    #[test]
    fn test_compile_select() {
        let compiled =
            compile_with_model("SELECT d FROM Document d WHERE d.owner = :owner").unwrap();
        assert_eq!(compiled.kind, StatementKind::Select);
        assert_eq!(
            compiled.type_definitions,
            vec![TypeDefinition::range("d", "Document")]
        );
        assert_eq!(compiled.selected_paths, vec!["d"]);
        assert_eq!(compiled.where_clause.unwrap().kind, NodeKind::Equals);
        assert!(compiled.named_parameters.contains("owner"));
        assert_eq!(compiled.positional_parameter_count, 0);
    }

    #[test]
    fn test_join_types() {
        let compiled = compile_with_model(
            "SELECT t.name FROM Document d INNER JOIN d.tags t LEFT OUTER JOIN d.folder f",
        )
        .unwrap();
        let tag = compiled.type_definition("t").unwrap();
        assert_eq!(tag.type_name.as_deref(), Some("Tag"));
        assert_eq!(tag.join_path.as_deref(), Some("d.tags"));
        assert!(tag.inner);

        let folder = compiled.type_definition("f").unwrap();
        assert_eq!(folder.type_name.as_deref(), Some("Folder"));
        assert!(!folder.inner);
        assert_eq!(compiled.selected_aliases(), vec!["t"]);
    }

    #[test]
    fn test_unresolved_alias() {
        let err = compile_with_model("SELECT d FROM Document d WHERE x.owner = 'a'").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnresolvedAlias);
        assert_eq!(err.span, Span::new(31, 32));

        let err = Compiler::new()
            .compile(parse("SELECT e FROM Document d").unwrap())
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnresolvedAlias);
    }

    #[test]
    fn test_unknown_property() {
        let err = compile_with_model("SELECT d FROM Document d WHERE d.folder.missing = 1")
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnknownProperty);
        assert!(err.message.contains("'missing' on entity 'Folder'"));

        // basic properties end a path
        let err = compile_with_model("SELECT d FROM Document d WHERE d.title.length = 1")
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnknownProperty);

        // the last segment may be entity-valued
        assert!(compile_with_model("SELECT d.folder FROM Document d").is_ok());
    }

    #[test]
    fn test_unknown_entity_and_duplicate_alias() {
        let err = compile_with_model("SELECT x FROM Missing x").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnknownEntity);

        let err = compile_with_model("SELECT d FROM Document d, Folder d").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::DuplicateAlias);

        let err = compile_with_model("GRANT READ ACCESS TO Missing m").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidRule);
    }

    #[test]
    fn test_subselect_sees_outer_aliases() {
        let compiled = compile_with_model(
            "SELECT d FROM Document d WHERE EXISTS \
             (SELECT f FROM Folder f WHERE f = d.folder AND f.name = ?1)",
        )
        .unwrap();
        assert_eq!(compiled.subselects.len(), 1);
        let subselect = &compiled.subselects[0];
        assert_eq!(subselect.kind, StatementKind::Subselect);
        assert_eq!(subselect.selected_paths, vec!["f"]);
        assert_eq!(subselect.type_definitions.len(), 1);
        assert_eq!(compiled.positional_parameter_count, 1);

        let outer = compiled.type_definitions.clone();
        let node = compiled.where_clause.as_ref().unwrap().children[0].clone();
        let recompiled = Compiler::new().compile_subselect(&node, &outer).unwrap();
        assert_eq!(recompiled.where_clause, subselect.where_clause);

        let err = Compiler::new().compile_subselect(&node, &[]).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnresolvedAlias);
    }

    #[test]
    fn test_constructor_and_aggregates() {
        let compiled = compile_with_model(
            "SELECT NEW com.example.Row(d.title, COUNT(t)) FROM Document d JOIN d.tags t GROUP BY d.title",
        )
        .unwrap();
        assert_eq!(compiled.constructor_type.as_deref(), Some("com.example.Row"));
        assert_eq!(compiled.selected_paths, vec!["d.title", "t"]);
        assert_eq!(compiled.selected_aliases(), vec!["d", "t"]);
    }

    #[test]
    fn test_access_rule_and_mutations() {
        let rule = compile_with_model(
            "GRANT READ ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL",
        )
        .unwrap();
        assert_eq!(rule.kind, StatementKind::AccessRule);
        assert_eq!(rule.selected_paths, vec!["d"]);

        let update = compile_with_model("UPDATE Document d SET d.title = 'x' WHERE d.id = 1").unwrap();
        assert_eq!(update.kind, StatementKind::Update);
        assert_eq!(update.selected_paths, vec!["d"]);

        let delete = compile_with_model("DELETE FROM Document d").unwrap();
        assert_eq!(delete.kind, StatementKind::Delete);
        assert!(delete.where_clause.is_none());
    }

    #[test]
    fn test_normalization() {
        let compiled = compile_with_model(
            "SELECT d FROM Document d WHERE (d.owner) = 'a' AND (d.title = 'x' AND (d.id = 1))",
        )
        .unwrap();
        let condition = compiled.where_clause.unwrap();
        assert_eq!(condition.kind, NodeKind::And);
        assert_eq!(condition.children[0].children[0], Node::path_from_str("d.owner"));
        // bracketed conjunctions stay grouped
        assert_eq!(condition.children[1].kind, NodeKind::Brackets);

        let mut synthetic = Node::and(vec![
            Node::and(vec![Node::always_false(), Node::always_false()]),
            Node::always_false(),
        ]);
        normalize(&mut synthetic);
        assert_eq!(synthetic.children.len(), 3);
    }
}
