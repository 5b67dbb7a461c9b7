//! Subselect evaluation through a persistence session.
//!
//! The subselect is turned into a standalone query: every reference to an
//! alias of the enclosing scope, every security context function and every
//! positional parameter is replaced by a named parameter bound to its
//! current value, and the query is handed to a [`QueryExecutor`].

use super::{EvaluationParameters, QueryEvaluator, SubselectEvaluator};
use crate::error::{Error, Result};
use crate::value::Value;
use ormsec_lang::{CompiledStatement, Node, NodeKind};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Runs a query against the backing store.
///
/// Implementations return one value per result row; rows selecting more
/// than one expression are [`Value::Tuple`]s.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, query: &str, parameters: &HashMap<String, Value>) -> Result<Vec<Value>>;
}

/// Delegates subselects to a [`QueryExecutor`].
#[derive(Clone, Default)]
pub struct SessionSubselectEvaluator {
    executor: Option<Arc<dyn QueryExecutor>>,
}

impl SessionSubselectEvaluator {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor: Some(executor),
        }
    }

    /// A strategy without a session; it never evaluates anything.
    pub fn none() -> Self {
        Self { executor: None }
    }
}

impl fmt::Debug for SessionSubselectEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSubselectEvaluator")
            .field("connected", &self.executor.is_some())
            .finish()
    }
}

impl SubselectEvaluator for SessionSubselectEvaluator {
    fn name(&self) -> &'static str {
        "session"
    }

    fn evaluate(
        &self,
        evaluator: &QueryEvaluator,
        subselect: &CompiledStatement,
        params: &EvaluationParameters<'_>,
    ) -> Result<Vec<Value>> {
        let Some(executor) = &self.executor else {
            return Err(Error::NotEvaluatable("no persistence session".into()));
        };

        let (query, parameters) = standalone_query(evaluator, subselect, params)?;
        tracing::trace!(query = %query, parameters = parameters.len(), "executing subselect");
        executor.execute(&query, &parameters)
    }
}

/// The subselect as a SELECT statement plus its parameter bindings.
pub(crate) fn standalone_query(
    evaluator: &QueryEvaluator,
    subselect: &CompiledStatement,
    params: &EvaluationParameters<'_>,
) -> Result<(String, HashMap<String, Value>)> {
    let mut statement = subselect.statement.clone();
    statement.kind = NodeKind::SelectStatement;

    let mut binder = Binder {
        evaluator,
        params,
        taken: subselect.named_parameters.clone(),
        bound: HashMap::new(),
        parameters: HashMap::new(),
    };
    for name in &subselect.named_parameters {
        let Some(value) = params.named(name) else {
            return Err(Error::NotEvaluatable(format!("parameter :{} is not bound", name)));
        };
        binder.parameters.insert(name.clone(), value.clone());
    }

    let declared: HashSet<String> = subselect.aliases().map(str::to_string).collect();
    for clause in &mut statement.children {
        binder.rewrite(clause, &declared)?;
    }
    Ok((statement.to_string(), binder.parameters))
}

struct Binder<'e, 'p, 'a> {
    evaluator: &'e QueryEvaluator,
    params: &'p EvaluationParameters<'a>,
    taken: BTreeSet<String>,
    /// Parameter names by replaced expression text, so repeats share one.
    bound: HashMap<String, String>,
    parameters: HashMap<String, Value>,
}

impl Binder<'_, '_, '_> {
    fn rewrite(&mut self, node: &mut Node, declared: &HashSet<String>) -> Result<()> {
        match &node.kind {
            NodeKind::Subselect => {
                let mut inner = declared.clone();
                inner.extend(node.declared_aliases().into_iter().map(str::to_string));
                for child in &mut node.children {
                    self.rewrite(child, &inner)?;
                }
                return Ok(());
            }
            NodeKind::InnerJoin { .. } | NodeKind::OuterJoin { .. } => {
                let correlated = node
                    .child(0)
                    .and_then(Node::root_alias)
                    .is_some_and(|alias| !declared.contains(alias));
                if correlated {
                    return Err(Error::NotEvaluatable(
                        "subselect joins over an outer alias".into(),
                    ));
                }
                return Ok(());
            }
            NodeKind::Identifier(_) | NodeKind::Path => {
                if let Some(alias) = node.root_alias() {
                    if !declared.contains(alias) {
                        let prefix = format!("outer_{}", alias);
                        let value = self.outer_value(node, alias)?;
                        *node = self.parameter(node.to_string(), &prefix, value);
                    }
                }
                return Ok(());
            }
            NodeKind::CurrentPrincipal | NodeKind::CurrentRoles | NodeKind::CurrentTenant => {
                let Some(context) = self.params.context() else {
                    return Err(Error::NotEvaluatable("no security context".into()));
                };
                let (prefix, value) = match node.kind {
                    NodeKind::CurrentPrincipal => ("current_principal", context.principal_value()),
                    NodeKind::CurrentRoles => ("current_roles", context.roles_value()),
                    _ => ("current_tenant", context.tenant_value()),
                };
                *node = self.parameter(node.to_string(), prefix, value);
                return Ok(());
            }
            NodeKind::PositionalParameter(index) => {
                let index = *index;
                let Some(value) = self.params.positional(index) else {
                    return Err(Error::NotEvaluatable(format!("parameter ?{} is not bound", index)));
                };
                let value = value.clone();
                *node = self.parameter(node.to_string(), &format!("positional_{}", index), value);
                return Ok(());
            }
            _ => {}
        }
        for child in &mut node.children {
            self.rewrite(child, declared)?;
        }
        Ok(())
    }

    fn outer_value(&self, node: &Node, alias: &str) -> Result<Value> {
        if self.params.alias(alias).is_none() {
            return Err(Error::NotEvaluatable(format!(
                "outer alias '{}' is not bound",
                alias
            )));
        }
        self.evaluator
            .evaluate(node, self.params)?
            .into_value()
            .ok_or_else(|| Error::NotEvaluatable(format!("'{}' is undefined", node)))
    }

    /// A named parameter node for `value`, reusing the name of an equal expression.
    fn parameter(&mut self, expression: String, prefix: &str, value: Value) -> Node {
        if let Some(name) = self.bound.get(&expression) {
            return Node::named_parameter(name.clone());
        }
        let mut name = prefix.to_string();
        let mut suffix = 0;
        while self.taken.contains(&name) {
            suffix += 1;
            name = format!("{}{}", prefix, suffix);
        }
        self.taken.insert(name.clone());
        self.bound.insert(expression, name.clone());
        self.parameters.insert(name.clone(), value);
        Node::named_parameter(name)
    }
}
