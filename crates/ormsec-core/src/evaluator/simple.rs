//! Subselect evaluation by alias substitution.
//!
//! A subselect such as
//!
//! ```text
//! SELECT f FROM Folder f JOIN f.documents x WHERE f = d.folder AND x.owner = :owner
//! ```
//!
//! can be evaluated without a database when every range alias is pinned
//! by an equality with an expression of the outer scope (`f = d.folder`).
//! The candidates of each alias are enumerated from those expressions,
//! join aliases are walked from their parents, and the WHERE clause is
//! evaluated for every combination.

use super::{EvaluationParameters, QueryEvaluator, SubselectEvaluator};
use crate::entity::identity_key;
use crate::error::{Error, Result};
use crate::value::Value;
use ormsec_lang::{CompiledStatement, Node, NodeKind, TypeDefinition};
use std::collections::HashSet;

/// Upper bound on the number of alias combinations tried.
const MAX_VARIANTS: usize = 10_000;

/// Evaluates subselects in memory by substituting constrained aliases.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleSubselectEvaluator;

/// How the candidates of one subselect alias are produced.
#[derive(Debug)]
struct Replacement<'s> {
    definition: &'s TypeDefinition,
    expression: Node,
    /// Subselect aliases the expression refers to.
    depends_on: HashSet<String>,
}

type Variant = Vec<(String, Value)>;

impl SubselectEvaluator for SimpleSubselectEvaluator {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn evaluate(
        &self,
        evaluator: &QueryEvaluator,
        subselect: &CompiledStatement,
        params: &EvaluationParameters<'_>,
    ) -> Result<Vec<Value>> {
        if has_aggregation(&subselect.statement) {
            return Err(not_evaluatable("aggregating subselect"));
        }

        // Subselect aliases shadow outer ones.
        let mut outer = params.clone();
        for definition in &subselect.type_definitions {
            outer.unbind_alias(&definition.alias);
        }

        if let Some(condition) = &subselect.where_clause {
            if evaluator.evaluate_condition(condition, &outer)?.is_false() {
                return Ok(Vec::new());
            }
        }

        let replacements = replacements(subselect)?;
        let variants = enumerate(evaluator, &outer, replacements)?;

        let mut rows = Vec::new();
        for variant in variants {
            let bound = bind(&outer, &variant);
            let accepted = match &subselect.where_clause {
                Some(condition) => {
                    let result = evaluator.evaluate_condition(condition, &bound)?;
                    if result.is_undefined() {
                        return Err(not_evaluatable("condition undefined for a candidate"));
                    }
                    result.is_true()
                }
                None => true,
            };
            if accepted {
                rows.push(project(evaluator, subselect, &bound)?);
            }
        }
        Ok(rows)
    }
}

fn not_evaluatable(reason: impl Into<String>) -> Error {
    Error::NotEvaluatable(reason.into())
}

fn has_aggregation(statement: &Node) -> bool {
    statement.children.iter().any(|clause| match clause.kind {
        NodeKind::GroupByClause | NodeKind::HavingClause => true,
        NodeKind::SelectClause { .. } => {
            clause.contains(|n| matches!(n.kind, NodeKind::Aggregate { .. }))
        }
        _ => false,
    })
}

/// Top-level conjuncts of a condition.
fn conjuncts(condition: &Node) -> Vec<&Node> {
    match condition.kind {
        NodeKind::And => condition.children.iter().flat_map(conjuncts).collect(),
        NodeKind::Brackets if condition.children.len() == 1 => conjuncts(&condition.children[0]),
        _ => vec![condition],
    }
}

/// Aliases among `aliases` that `expression` refers to, outside nested subselects.
fn referenced_aliases(expression: &Node, aliases: &HashSet<&str>) -> HashSet<String> {
    let mut found = HashSet::new();
    expression.walk(&mut |node| match &node.kind {
        NodeKind::Subselect => false,
        NodeKind::Identifier(name) => {
            if aliases.contains(name.as_str()) {
                found.insert(name.clone());
            }
            true
        }
        _ => true,
    });
    found
}

/// One replacement per subselect alias, in declaration order.
///
/// Range aliases are pinned by `alias = expression` conjuncts of the WHERE
/// clause; join aliases are produced by their join path.
fn replacements(subselect: &CompiledStatement) -> Result<Vec<Replacement<'_>>> {
    let aliases: HashSet<&str> = subselect.aliases().collect();
    let conjuncts = subselect
        .where_clause
        .as_ref()
        .map(conjuncts)
        .unwrap_or_default();

    let mut replacements = Vec::with_capacity(subselect.type_definitions.len());
    for definition in &subselect.type_definitions {
        let expression = match &definition.join_path {
            Some(path) => Some(Node::path_from_str(path)),
            // Prefer equalities with the fewest subselect aliases on the other side.
            None => conjuncts
                .iter()
                .filter_map(|c| pinned_by(c, &definition.alias, &aliases))
                .min_by_key(|e| referenced_aliases(e, &aliases).len()),
        };
        let Some(expression) = expression else {
            return Err(not_evaluatable(format!(
                "no replacement for alias '{}'",
                definition.alias
            )));
        };
        let depends_on = referenced_aliases(&expression, &aliases);
        replacements.push(Replacement {
            definition,
            expression,
            depends_on,
        });
    }
    Ok(replacements)
}

/// The expression `alias` is equated with in `condition`, if any.
fn pinned_by(condition: &Node, alias: &str, aliases: &HashSet<&str>) -> Option<Node> {
    if condition.kind != NodeKind::Equals || condition.children.len() != 2 {
        return None;
    }
    let (left, right) = (&condition.children[0], &condition.children[1]);
    let other = if left.as_identifier() == Some(alias) {
        right
    } else if right.as_identifier() == Some(alias) {
        left
    } else {
        return None;
    };
    if referenced_aliases(other, aliases).contains(alias) {
        return None;
    }
    Some(other.clone())
}

fn bind<'a>(outer: &EvaluationParameters<'a>, variant: &Variant) -> EvaluationParameters<'a> {
    let mut params = outer.clone();
    for (alias, value) in variant {
        params.bind_alias(alias.clone(), value.clone());
    }
    params
}

/// Build the alias combinations, binding each alias once its dependencies are bound.
fn enumerate(
    evaluator: &QueryEvaluator,
    outer: &EvaluationParameters<'_>,
    mut pending: Vec<Replacement<'_>>,
) -> Result<Vec<Variant>> {
    let mut variants: Vec<Variant> = vec![Vec::new()];
    let mut bound: HashSet<String> = HashSet::new();

    while !pending.is_empty() {
        let Some(next) = pending
            .iter()
            .position(|r| r.depends_on.iter().all(|d| bound.contains(d)))
        else {
            return Err(not_evaluatable("cyclic alias replacements"));
        };
        let replacement = pending.remove(next);
        let definition = replacement.definition;

        let mut expanded = Vec::new();
        for variant in &variants {
            let params = bind(outer, variant);
            let Some(value) = evaluator.evaluate(&replacement.expression, &params)?.into_value() else {
                return Err(not_evaluatable(format!(
                    "replacement for alias '{}' is undefined",
                    definition.alias
                )));
            };
            let candidates = candidates(evaluator, definition, value);
            if candidates.is_empty() && !definition.inner {
                let mut variant = variant.clone();
                variant.push((definition.alias.clone(), Value::Null));
                expanded.push(variant);
            }
            for candidate in candidates {
                let mut variant = variant.clone();
                variant.push((definition.alias.clone(), candidate));
                expanded.push(variant);
            }
            if expanded.len() > MAX_VARIANTS {
                return Err(not_evaluatable("too many alias combinations"));
            }
        }
        variants = expanded;
        bound.insert(definition.alias.clone());
    }
    Ok(variants)
}

/// Instances of the alias type among `value`, each entity once.
fn candidates(evaluator: &QueryEvaluator, definition: &TypeDefinition, value: Value) -> Vec<Value> {
    let mut seen = HashSet::new();
    value
        .into_items()
        .into_iter()
        .filter(|candidate| match (candidate, &definition.type_name) {
            (Value::Entity(entity), Some(type_name)) => {
                evaluator.mapping().is_instance(entity.as_ref(), type_name)
                    && seen.insert(identity_key(entity))
            }
            (Value::Entity(entity), None) => seen.insert(identity_key(entity)),
            (_, Some(_)) => false,
            (_, None) => true,
        })
        .collect()
}

/// Project the selected paths of one accepted combination.
fn project(
    evaluator: &QueryEvaluator,
    subselect: &CompiledStatement,
    params: &EvaluationParameters<'_>,
) -> Result<Value> {
    let mut values = Vec::with_capacity(subselect.selected_paths.len());
    for path in &subselect.selected_paths {
        let Some(value) = evaluator
            .evaluate(&Node::path_from_str(path), params)?
            .into_value()
        else {
            return Err(not_evaluatable(format!("selected path '{}' is undefined", path)));
        };
        values.push(value);
    }
    Ok(match values.len() {
        1 => values.remove(0),
        _ => Value::Tuple(values),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DynamicEntity, EntityRef};
    use crate::evaluator::Evaluated;
    use crate::mapping::{ClassMapping, MappingInformation};
    use crate::security::SecurityContext;
    use ormsec_lang::Compiler;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn mapping() -> Arc<MappingInformation> {
        Arc::new(
            MappingInformation::new()
                .with_class(
                    ClassMapping::new("Document")
                        .with_id("id")
                        .with_basic("owner")
                        .with_single("folder", "Folder"),
                )
                .with_class(
                    ClassMapping::new("Folder")
                        .with_id("id")
                        .with_basic("name")
                        .with_collection("documents", "Document")
                        .with_collection("editors", "User"),
                )
                .with_class(ClassMapping::new("User").with_id("id").with_basic("name")),
        )
    }

    fn user(id: i64, name: &str) -> Value {
        Value::Entity(DynamicEntity::new("User").with_id("id", id).with("name", name).into_ref())
    }

    fn graph() -> EntityRef {
        let folder = Arc::new(
            DynamicEntity::new("Folder")
                .with_id("id", 1)
                .with("name", "shared")
                .with("editors", vec![user(1, "alice"), user(2, "bob")]),
        );
        let doc = DynamicEntity::new("Document")
            .with_id("id", 10)
            .with("owner", "carol")
            .with("folder", Value::Entity(folder.clone()))
            .into_ref();
        let other = DynamicEntity::new("Document")
            .with_id("id", 11)
            .with("owner", "dave")
            .with("folder", Value::Entity(folder.clone()))
            .into_ref();
        folder.set(
            "documents",
            vec![Value::Entity(doc.clone()), Value::Entity(other)],
        );
        doc
    }

    fn evaluator() -> QueryEvaluator {
        QueryEvaluator::new(mapping()).with_strategy(SimpleSubselectEvaluator)
    }

    fn evaluate(condition: &str, context: &SecurityContext) -> Evaluated {
        let source = format!("GRANT READ ACCESS TO Document d WHERE {}", condition);
        let mapping = mapping();
        let rule = Compiler::with_model(mapping.as_ref())
            .compile(ormsec_lang::parse(&source).unwrap())
            .unwrap();
        let params = EvaluationParameters::new()
            .with_context(context)
            .with_alias("d", Value::Entity(graph()));
        evaluator()
            .evaluate_condition(rule.where_clause.as_ref().unwrap(), &params)
            .unwrap()
    }

    fn subselect(condition: &str) -> (CompiledStatement, Vec<TypeDefinition>) {
        let source = format!("SELECT d FROM Document d WHERE {}", condition);
        let mapping = mapping();
        let compiled = Compiler::with_model(mapping.as_ref())
            .compile(ormsec_lang::parse(&source).unwrap())
            .unwrap();
        let outer = compiled.type_definitions.clone();
        (compiled.subselects[0].clone(), outer)
    }

    #[test]
    fn test_pinned_alias_with_join() {
        let alice = SecurityContext::new("alice");
        let condition = "EXISTS (SELECT f FROM Folder f JOIN f.editors e \
                         WHERE f = d.folder AND e.name = CURRENT_PRINCIPAL)";
        assert!(evaluate(condition, &alice).is_true());
        assert!(evaluate(condition, &SecurityContext::new("mallory")).is_false());
    }

    #[test]
    fn test_reversed_equality_and_projection() {
        let context = SecurityContext::new("alice");
        assert!(evaluate(
            "'dave' IN (SELECT x.owner FROM Folder f JOIN f.documents x WHERE d.folder = f)",
            &context
        )
        .is_true());
        assert!(evaluate(
            "'erin' IN (SELECT x.owner FROM Folder f JOIN f.documents x WHERE d.folder = f)",
            &context
        )
        .is_false());
    }

    #[test]
    fn test_deterministically_false_subselect() {
        let context = SecurityContext::new("alice");
        // no replacement for f, but the WHERE clause is FALSE regardless
        assert!(evaluate(
            "EXISTS (SELECT f FROM Folder f WHERE f.name = 'x' AND 1 = 0)",
            &context
        )
        .is_false());
    }

    #[test]
    fn test_missing_replacement_is_not_evaluatable() {
        let (compiled, _) = subselect("EXISTS (SELECT f FROM Folder f WHERE f.name = 'shared')");
        let params = EvaluationParameters::new().with_alias("d", Value::Entity(graph()));
        let err = SimpleSubselectEvaluator
            .evaluate(&evaluator(), &compiled, &params)
            .unwrap_err();
        assert!(matches!(err, Error::NotEvaluatable(ref m) if m.contains("'f'")));

        // and the evaluator turns that into undefined
        let context = SecurityContext::new("alice");
        assert!(evaluate(
            "EXISTS (SELECT f FROM Folder f WHERE f.name = 'shared')",
            &context
        )
        .is_undefined());
    }

    #[test]
    fn test_dependent_replacements_and_tuples() {
        let (compiled, _) = subselect(
            "EXISTS (SELECT f, g.name FROM Folder f, Folder g WHERE g = f AND f = d.folder)",
        );
        let params = EvaluationParameters::new().with_alias("d", Value::Entity(graph()));
        let rows = SimpleSubselectEvaluator
            .evaluate(&evaluator(), &compiled, &params)
            .unwrap();
        assert_eq!(rows.len(), 1);
        let Value::Tuple(row) = &rows[0] else {
            panic!("expected a tuple");
        };
        assert_eq!(row[1], Value::from("shared"));

        let described: HashMap<String, String> = replacements(&compiled)
            .unwrap()
            .iter()
            .map(|r| (r.definition.alias.clone(), r.expression.to_string()))
            .collect();
        assert_eq!(described["g"], "f");
        assert_eq!(described["f"], "d.folder");
    }

    #[test]
    fn test_type_filtering_drops_foreign_candidates() {
        // d.folder is a Folder, never a Document
        let context = SecurityContext::new("alice");
        assert!(evaluate(
            "EXISTS (SELECT x FROM Document x WHERE x = d.folder)",
            &context
        )
        .is_false());
    }

    #[test]
    fn test_aggregates_are_not_evaluatable() {
        let (compiled, _) =
            subselect("EXISTS (SELECT COUNT(f) FROM Folder f WHERE f = d.folder)");
        let params = EvaluationParameters::new().with_alias("d", Value::Entity(graph()));
        assert!(matches!(
            SimpleSubselectEvaluator.evaluate(&evaluator(), &compiled, &params),
            Err(Error::NotEvaluatable(_))
        ));
    }

    #[test]
    fn test_too_many_combinations_are_not_evaluatable() {
        let editors: Vec<Value> = (0..101).map(|i| user(i, "editor")).collect();
        let folder = DynamicEntity::new("Folder")
            .with_id("id", 2)
            .with("name", "crowded")
            .with("editors", editors)
            .into_ref();
        let doc = DynamicEntity::new("Document")
            .with_id("id", 20)
            .with("owner", "carol")
            .with("folder", Value::Entity(folder))
            .into_ref();
        let params = EvaluationParameters::new().with_alias("d", Value::Entity(doc));

        // 101 x 101 editor pairs
        let (pairs, _) = subselect(
            "EXISTS (SELECT e FROM Folder f JOIN f.editors e JOIN f.editors e2 WHERE f = d.folder)",
        );
        let err = SimpleSubselectEvaluator
            .evaluate(&evaluator(), &pairs, &params)
            .unwrap_err();
        assert!(matches!(err, Error::NotEvaluatable(ref m) if m.contains("too many")));

        let (single, _) =
            subselect("EXISTS (SELECT e FROM Folder f JOIN f.editors e WHERE f = d.folder)");
        let rows = SimpleSubselectEvaluator
            .evaluate(&evaluator(), &single, &params)
            .unwrap();
        assert_eq!(rows.len(), 101);
    }
}
