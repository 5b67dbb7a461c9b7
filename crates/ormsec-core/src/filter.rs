//! Query rewriting and per-object access decisions.
//!
//! [`EntityFilter::filter_query`] restricts a query so that it only returns
//! objects the current user may access. For every selected entity path the
//! conditions of the matching access rules are spliced into the WHERE
//! clause, with the rule's subject alias replaced by the selected path and
//! the security context bound as named parameters:
//!
//! ```text
//! GRANT READ ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL
//!
//! SELECT d FROM Document d
//!   => SELECT d FROM Document d WHERE (d.owner = :cp0)     {cp0: "alice"}
//! ```
//!
//! [`EntityFilter::is_accessible`] answers the same question for a single
//! object already in memory.

use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::evaluator::{EvaluationParameters, QueryEvaluator};
use crate::mapping::{MappingInformation, PropertyKind};
use crate::rules::{AccessRule, AccessRules};
use crate::security::SecurityContext;
use crate::value::Value;
use dashmap::DashMap;
use ormsec_lang::{AccessKind, CompiledStatement, Compiler, Node, NodeKind, StatementKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Compiled statements shared between filters, keyed by query text.
pub type StatementCache = Arc<DashMap<String, Arc<CompiledStatement>>>;

/// A rewritten query.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    /// The restricted query; `None` when no result can be accessible.
    pub query: Option<String>,
    /// Bindings for the parameters the restriction introduced.
    pub parameters: HashMap<String, Value>,
    pub selected_paths: Vec<String>,
    /// Result class of a `SELECT NEW` query.
    pub constructor_arg_return_type: Option<String>,
}

impl FilterResult {
    /// Whether the query is known to return nothing accessible.
    pub fn is_always_empty(&self) -> bool {
        self.query.is_none()
    }

    /// Replace the positional parameters of the rewritten query by named
    /// parameters bound to `values`.
    ///
    /// Stores that only accept named bindings execute the result as is.
    pub fn bind_positional(&mut self, values: &BTreeMap<u32, Value>) -> Result<()> {
        let Some(query) = &self.query else {
            return Ok(());
        };
        let mut statement = ormsec_lang::parse(query)?;

        let mut taken: HashSet<String> = self.parameters.keys().cloned().collect();
        statement.walk(&mut |node| {
            if let NodeKind::NamedParameter(name) = &node.kind {
                taken.insert(name.clone());
            }
            true
        });

        let mut names: BTreeMap<u32, String> = BTreeMap::new();
        let mut unbound = None;
        statement.walk_mut(&mut |node| {
            let NodeKind::PositionalParameter(index) = node.kind else {
                return true;
            };
            if !values.contains_key(&index) {
                unbound.get_or_insert(index);
                return false;
            }
            let name = names.entry(index).or_insert_with(|| {
                let mut name = format!("positional_{}", index);
                while taken.contains(&name) {
                    name.push('_');
                }
                taken.insert(name.clone());
                name
            });
            *node = Node::named_parameter(name.clone());
            false
        });
        if let Some(index) = unbound {
            return Err(Error::InvariantViolation(format!(
                "parameter ?{} is not bound",
                index
            )));
        }
        if names.is_empty() {
            return Ok(());
        }

        for (index, name) in names {
            if let Some(value) = values.get(&index) {
                self.parameters.insert(name, value.clone());
            }
        }
        self.query = Some(statement.to_string());
        Ok(())
    }
}

/// Counters of the work done by a filter and its access managers.
#[derive(Debug, Default)]
pub struct FilterStatistics {
    evaluations: AtomicU64,
    read_cache_hits: AtomicU64,
    read_cache_misses: AtomicU64,
    statement_cache_hits: AtomicU64,
    statement_cache_misses: AtomicU64,
    queries_filtered: AtomicU64,
}

/// Point-in-time copy of [`FilterStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub evaluations: u64,
    pub read_cache_hits: u64,
    pub read_cache_misses: u64,
    pub statement_cache_hits: u64,
    pub statement_cache_misses: u64,
    pub queries_filtered: u64,
}

impl FilterStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one rule evaluation against an object.
    pub fn record_evaluation(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_cache_hit(&self) {
        self.read_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_cache_miss(&self) {
        self.read_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_statement_cache(&self, hit: bool) {
        let counter = if hit {
            &self.statement_cache_hits
        } else {
            &self.statement_cache_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_query(&self) {
        self.queries_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn read_cache_hits(&self) -> u64 {
        self.read_cache_hits.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            evaluations: self.evaluations(),
            read_cache_hits: self.read_cache_hits(),
            read_cache_misses: self.read_cache_misses.load(Ordering::Relaxed),
            statement_cache_hits: self.statement_cache_hits.load(Ordering::Relaxed),
            statement_cache_misses: self.statement_cache_misses.load(Ordering::Relaxed),
            queries_filtered: self.queries_filtered.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.evaluations,
            &self.read_cache_hits,
            &self.read_cache_misses,
            &self.statement_cache_hits,
            &self.statement_cache_misses,
            &self.queries_filtered,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Outcome of evaluating a rule before any object is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaticOutcome {
    Granted,
    Denied,
    Depends,
}

/// Rewrites queries and decides access to single objects.
#[derive(Clone)]
pub struct EntityFilter {
    mapping: Arc<MappingInformation>,
    rules: Arc<AccessRules>,
    evaluator: QueryEvaluator,
    statements: StatementCache,
    statistics: Arc<FilterStatistics>,
}

impl EntityFilter {
    pub fn new(
        mapping: Arc<MappingInformation>,
        rules: Arc<AccessRules>,
        evaluator: QueryEvaluator,
    ) -> Self {
        Self {
            mapping,
            rules,
            evaluator,
            statements: Arc::new(DashMap::new()),
            statistics: Arc::new(FilterStatistics::new()),
        }
    }

    /// Share a statement cache with other filters.
    pub fn with_statement_cache(mut self, statements: StatementCache) -> Self {
        self.statements = statements;
        self
    }

    /// Share statistics with other filters.
    pub fn with_statistics(mut self, statistics: Arc<FilterStatistics>) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn mapping(&self) -> &Arc<MappingInformation> {
        &self.mapping
    }

    pub fn rules(&self) -> &AccessRules {
        &self.rules
    }

    pub fn evaluator(&self) -> &QueryEvaluator {
        &self.evaluator
    }

    pub fn statistics(&self) -> &Arc<FilterStatistics> {
        &self.statistics
    }

    /// Parse and compile a query, or fetch it from the statement cache.
    pub fn compile(&self, query: &str) -> Result<Arc<CompiledStatement>> {
        if let Some(compiled) = self.statements.get(query) {
            self.statistics.record_statement_cache(true);
            return Ok(compiled.clone());
        }
        self.statistics.record_statement_cache(false);
        let statement = ormsec_lang::parse(query)?;
        let compiled = Arc::new(Compiler::with_model(self.mapping.as_ref()).compile(statement)?);
        self.statements
            .insert(query.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Restrict `query` to the objects `context` may access with `kind`.
    ///
    /// UPDATE and DELETE statements are always checked against UPDATE and
    /// DELETE rules respectively.
    pub fn filter_query(
        &self,
        query: &str,
        kind: AccessKind,
        context: &SecurityContext,
    ) -> Result<FilterResult> {
        let compiled = self.compile(query)?;
        self.statistics.record_query();
        let kind = match compiled.kind {
            StatementKind::Update => AccessKind::Update,
            StatementKind::Delete => AccessKind::Delete,
            _ => kind,
        };

        let mut result = FilterResult {
            query: None,
            parameters: HashMap::new(),
            selected_paths: compiled.selected_paths.clone(),
            constructor_arg_return_type: compiled.constructor_type.clone(),
        };

        let reserved = query_aliases(&compiled);
        let mut binder = ContextBinder::new(context, &compiled);
        let mut restrictions = Vec::new();

        for (path, type_name) in self.restricted_paths(&compiled) {
            let rules = self.rules.rules_for_type(&self.mapping, &type_name, kind);
            let mut conditions = Vec::new();
            let mut granted = false;
            for rule in &rules {
                match self.static_outcome(rule, context)? {
                    StaticOutcome::Granted => {
                        granted = true;
                        break;
                    }
                    StaticOutcome::Denied => {}
                    StaticOutcome::Depends => {
                        conditions.push(instantiate(rule, &path, &reserved, &mut binder));
                    }
                }
            }
            if granted {
                continue;
            }
            if conditions.is_empty() {
                tracing::debug!(
                    query = %query,
                    path = %path,
                    entity = %type_name,
                    kind = %kind,
                    rules = rules.len(),
                    "no access rule can grant access, query is always empty"
                );
                return Ok(result);
            }
            let disjunction = conditions.into_iter().map(Node::bracketed).collect();
            restrictions.push(Node::or(disjunction).bracketed());
        }

        let mut statement = compiled.statement.clone();
        if !restrictions.is_empty() {
            let mut conjuncts = Vec::with_capacity(restrictions.len() + 1);
            if let Some(existing) = &compiled.where_clause {
                conjuncts.push(existing.clone().bracketed());
            }
            conjuncts.extend(restrictions);
            set_where(&mut statement, Node::and(conjuncts));
        }

        let rewritten = statement.to_string();
        tracing::debug!(
            original = %query,
            rewritten = %rewritten,
            parameters = binder.parameters.len(),
            "filtered query"
        );
        result.query = Some(rewritten);
        result.parameters = binder.parameters;
        Ok(result)
    }

    /// Whether some rule grants `kind` on `entity`.
    ///
    /// An undefined outcome denies access.
    pub fn is_accessible(
        &self,
        kind: AccessKind,
        entity: &EntityRef,
        context: &SecurityContext,
    ) -> Result<bool> {
        let rules = self.rules.rules_for(entity.entity_name(), kind);
        let mut undefined = false;
        for rule in rules {
            let Some(condition) = rule.condition() else {
                return Ok(true);
            };
            self.statistics.record_evaluation();
            let params = context_parameters(context)
                .with_alias(rule.alias.clone(), Value::Entity(entity.clone()));
            let result = self.evaluator.evaluate_condition(condition, &params)?;
            if result.is_true() {
                tracing::trace!(
                    entity = %self.mapping.describe(entity.as_ref()),
                    kind = %kind,
                    rule = %rule.source,
                    "access granted"
                );
                return Ok(true);
            }
            undefined |= result.is_undefined();
        }
        if undefined {
            tracing::warn!(
                entity = %self.mapping.describe(entity.as_ref()),
                kind = %kind,
                "access rules undefined for object, denying access"
            );
        } else {
            tracing::trace!(
                entity = %self.mapping.describe(entity.as_ref()),
                kind = %kind,
                rules = rules.len(),
                "access denied"
            );
        }
        Ok(false)
    }

    /// Entity paths to restrict: for every selected path, its longest
    /// prefix that navigates single-valued associations only.
    fn restricted_paths(&self, compiled: &CompiledStatement) -> Vec<(String, String)> {
        let mut restricted: Vec<(String, String)> = Vec::new();
        for selected in &compiled.selected_paths {
            let mut segments = selected.split('.');
            let Some(alias) = segments.next() else {
                continue;
            };
            let Some(mut type_name) = compiled
                .type_definition(alias)
                .and_then(|d| d.type_name.clone())
            else {
                continue;
            };
            let mut path = alias.to_string();
            for segment in segments {
                match self.mapping.property(&type_name, segment).map(|p| &p.kind) {
                    Some(PropertyKind::SingleValued { target }) => {
                        path.push('.');
                        path.push_str(segment);
                        type_name = target.clone();
                    }
                    _ => break,
                }
            }
            if !restricted.iter().any(|(p, _)| *p == path) {
                restricted.push((path, type_name));
            }
        }
        restricted
    }

    /// Evaluate a rule with only the security context bound.
    fn static_outcome(&self, rule: &AccessRule, context: &SecurityContext) -> Result<StaticOutcome> {
        let Some(condition) = rule.condition() else {
            return Ok(StaticOutcome::Granted);
        };
        let result = self
            .evaluator
            .evaluate_condition(condition, &context_parameters(context))?;
        Ok(if result.is_true() {
            StaticOutcome::Granted
        } else if result.is_false() {
            StaticOutcome::Denied
        } else {
            StaticOutcome::Depends
        })
    }
}

/// Evaluation parameters binding the context and its attributes.
fn context_parameters(context: &SecurityContext) -> EvaluationParameters<'_> {
    let mut params = EvaluationParameters::new().with_context(context);
    for (name, value) in &context.attributes {
        params = params.with_named(name.clone(), value.clone());
    }
    params
}

/// Every alias the query declares, subselects included.
fn query_aliases(compiled: &CompiledStatement) -> HashSet<String> {
    let mut aliases: HashSet<String> = compiled.aliases().map(str::to_string).collect();
    compiled.statement.walk(&mut |node| {
        if node.kind == NodeKind::Subselect {
            aliases.extend(node.declared_aliases().into_iter().map(str::to_string));
        }
        true
    });
    aliases
}

/// First of `base0`, `base1`, ... not in `taken`.
fn fresh_name(base: &str, taken: &HashSet<String>) -> String {
    (0..)
        .map(|i| format!("{}{}", base, i))
        .find(|name| !taken.contains(name))
        .unwrap_or_else(|| base.to_string())
}

/// The rule condition rewritten for the query path `path`.
fn instantiate(
    rule: &AccessRule,
    path: &str,
    reserved: &HashSet<String>,
    binder: &mut ContextBinder<'_>,
) -> Node {
    let Some(condition) = rule.condition() else {
        return Node::synthetic(NodeKind::BooleanLiteral(true), Vec::new());
    };
    let mut condition = condition.clone();

    if let Some(missing) = binder.unbindable(&condition) {
        tracing::warn!(
            rule = %rule.source,
            parameter = %missing,
            "rule parameter has no value in the security context, rule grants nothing"
        );
        return Node::always_false();
    }

    let mut reserved = reserved.clone();
    rename_colliding_aliases(&mut condition, &mut reserved);
    substitute_alias(&mut condition, &rule.alias, &Node::path_from_str(path));
    binder.bind(&mut condition);
    condition
}

/// Rename subselect aliases of a rule that the query already uses.
fn rename_colliding_aliases(node: &mut Node, reserved: &mut HashSet<String>) {
    if node.kind == NodeKind::Subselect {
        let declared: Vec<String> = node
            .declared_aliases()
            .into_iter()
            .map(str::to_string)
            .collect();
        for alias in declared {
            if reserved.contains(&alias) {
                let renamed = fresh_name(&alias, reserved);
                rename_alias(node, &alias, &renamed);
                reserved.insert(renamed);
            } else {
                reserved.insert(alias);
            }
        }
    }
    for child in &mut node.children {
        rename_colliding_aliases(child, reserved);
    }
}

fn rename_alias(node: &mut Node, from: &str, to: &str) {
    node.walk_mut(&mut |n| {
        if n.as_identifier() == Some(from) {
            n.kind = NodeKind::Identifier(to.to_string());
        }
        true
    });
}

/// Replace `alias` by `replacement`, grafting path tails onto it.
fn substitute_alias(node: &mut Node, alias: &str, replacement: &Node) {
    match node.kind {
        NodeKind::Subselect if node.declared_aliases().contains(&alias) => {}
        NodeKind::Identifier(ref name) if name == alias => *node = replacement.clone(),
        NodeKind::Path if node.root_alias() == Some(alias) => {
            let tail = node.children.split_off(1);
            node.children = match replacement.kind {
                NodeKind::Path => replacement.children.clone(),
                _ => vec![replacement.clone()],
            };
            node.children.extend(tail);
        }
        _ => {
            for child in &mut node.children {
                substitute_alias(child, alias, replacement);
            }
        }
    }
}

/// Replaces security context references by named parameters.
struct ContextBinder<'c> {
    context: &'c SecurityContext,
    taken: HashSet<String>,
    /// Parameter name by bound source, reused across the rules of one query.
    names: HashMap<String, String>,
    role_names: Option<Vec<String>>,
    parameters: HashMap<String, Value>,
}

impl<'c> ContextBinder<'c> {
    fn new(context: &'c SecurityContext, compiled: &CompiledStatement) -> Self {
        Self {
            context,
            taken: compiled.named_parameters.iter().cloned().collect(),
            names: HashMap::new(),
            role_names: None,
            parameters: HashMap::new(),
        }
    }

    /// A parameter of the condition the context cannot bind.
    fn unbindable(&self, condition: &Node) -> Option<String> {
        condition
            .collect(|n| {
                matches!(n.kind, NodeKind::PositionalParameter(_))
                    || matches!(&n.kind, NodeKind::NamedParameter(name)
                        if self.context.get_attribute(name).is_none())
            })
            .first()
            .map(|n| n.to_string())
    }

    fn parameter(&mut self, source: String, base: &str, value: Value) -> Node {
        if let Some(name) = self.names.get(&source) {
            return Node::named_parameter(name.clone());
        }
        let name = fresh_name(base, &self.taken);
        self.taken.insert(name.clone());
        self.names.insert(source, name.clone());
        self.parameters.insert(name.clone(), value);
        Node::named_parameter(name)
    }

    fn role_parameters(&mut self) -> Vec<Node> {
        if self.role_names.is_none() {
            let mut names = Vec::new();
            for role in &self.context.roles {
                let name = fresh_name("cr", &self.taken);
                self.taken.insert(name.clone());
                self.parameters.insert(name.clone(), role.clone());
                names.push(name);
            }
            self.role_names = Some(names);
        }
        self.role_names
            .iter()
            .flatten()
            .map(|name| Node::named_parameter(name.clone()))
            .collect()
    }

    fn bind(&mut self, node: &mut Node) {
        match &node.kind {
            NodeKind::In
                if node.children.len() == 2
                    && node.children[1].kind == NodeKind::CurrentRoles =>
            {
                if self.context.roles.is_empty() {
                    *node = Node::always_false();
                    return;
                }
                node.children.truncate(1);
                let roles = self.role_parameters();
                node.children.extend(roles);
                self.bind(&mut node.children[0]);
                return;
            }
            NodeKind::CurrentPrincipal => {
                *node = self.parameter("principal".into(), "cp", self.context.principal_value());
                return;
            }
            NodeKind::CurrentTenant => {
                *node = self.parameter("tenant".into(), "ct", self.context.tenant_value());
                return;
            }
            NodeKind::CurrentRoles => {
                *node = self.parameter("roles".into(), "crs", self.context.roles_value());
                return;
            }
            NodeKind::NamedParameter(name) => {
                let value = self
                    .context
                    .get_attribute(name)
                    .cloned()
                    .unwrap_or(Value::Null);
                let base = name.clone();
                *node = self.parameter(format!(":{}", base), &base, value);
                return;
            }
            _ => {}
        }
        for child in &mut node.children {
            self.bind(child);
        }
    }
}

/// Replace or insert the WHERE clause of a statement.
fn set_where(statement: &mut Node, condition: Node) {
    if let Some(clause) = statement.find_child_mut(|k| *k == NodeKind::WhereClause) {
        clause.children = vec![condition];
        return;
    }
    let position = statement
        .children
        .iter()
        .position(|c| {
            matches!(
                c.kind,
                NodeKind::FromClause | NodeKind::SetClause | NodeKind::DeleteClause
            )
        })
        .map_or(statement.children.len(), |p| p + 1);
    statement
        .children
        .insert(position, Node::synthetic(NodeKind::WhereClause, vec![condition]));
}
