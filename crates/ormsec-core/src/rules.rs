//! Access rule compilation and lookup.
//!
//! A rule such as
//!
//! ```text
//! GRANT READ UPDATE ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL
//! ```
//!
//! is parsed, validated against the mapping model and expanded into one
//! [`AccessRule`] per concrete entity type it covers. Rules on an
//! interface or abstract class therefore apply to every implementor, and
//! rules on a class also apply to its concrete subclasses.

use crate::error::Result;
use crate::mapping::MappingInformation;
use ormsec_lang::{
    AccessKind, CompileError, CompiledStatement, Compiler, Node, NodeKind,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// One compiled access rule for one concrete entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRule {
    /// Position of the source rule; expansions of one rule share it.
    pub rule_id: usize,
    /// Rule text as configured.
    pub source: String,
    /// Type named in the rule.
    pub declared_type: String,
    /// Concrete type this expansion applies to.
    pub entity_name: String,
    /// Alias the protected object is bound to.
    pub alias: String,
    /// Granted access kinds.
    pub kinds: BTreeSet<AccessKind>,
    /// The compiled rule statement.
    pub statement: Arc<CompiledStatement>,
}

impl AccessRule {
    /// Whether this rule grants `kind`.
    pub fn grants(&self, kind: AccessKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Rule condition; `None` grants unconditionally.
    pub fn condition(&self) -> Option<&Node> {
        self.statement.where_clause.as_ref()
    }

    /// Path of the protected object, the rule's subject alias.
    pub fn selected_path(&self) -> &str {
        &self.alias
    }
}

/// Compiles rule texts against a mapping model.
pub struct AccessRulesCompiler<'m> {
    mapping: &'m MappingInformation,
}

impl<'m> AccessRulesCompiler<'m> {
    pub fn new(mapping: &'m MappingInformation) -> Self {
        Self { mapping }
    }

    /// Compile one rule into its per-type expansions.
    pub fn compile(&self, rule_id: usize, source: &str) -> Result<Vec<AccessRule>> {
        let rule = ormsec_lang::parse_rule(source)?;
        let NodeKind::AccessRule { kinds } = &rule.kind else {
            return Err(CompileError::invalid_rule("expected a GRANT statement", rule.span).into());
        };
        let kinds: BTreeSet<AccessKind> = if kinds.is_empty() {
            AccessKind::ALL.into_iter().collect()
        } else {
            kinds.iter().copied().collect()
        };

        let (Some(type_node), Some(alias)) = (rule.child(0), rule.child(1)) else {
            return Err(CompileError::invalid_rule("expected an entity type and an alias", rule.span).into());
        };
        let NodeKind::AbstractSchemaName(declared_type) = &type_node.kind else {
            return Err(CompileError::invalid_rule("expected an entity type", type_node.span).into());
        };
        let Some(alias) = alias.as_identifier() else {
            return Err(CompileError::invalid_rule("expected an alias", alias.span).into());
        };

        let concrete = self.mapping.resolve_class_mappings(declared_type);
        if concrete.is_empty() {
            return Err(CompileError::invalid_rule(
                format!(
                    "access rule refers to unknown entity '{}'",
                    declared_type
                ),
                type_node.span,
            )
            .into());
        }

        let compiler = Compiler::with_model(self.mapping);
        let mut expansions = Vec::with_capacity(concrete.len());
        for class in concrete {
            let mut statement = rule.clone();
            statement.children[0].kind = NodeKind::AbstractSchemaName(class.name.clone());
            let compiled = compiler.compile(statement)?;
            expansions.push(AccessRule {
                rule_id,
                source: source.to_string(),
                declared_type: declared_type.clone(),
                entity_name: class.name.clone(),
                alias: alias.to_string(),
                kinds: kinds.clone(),
                statement: Arc::new(compiled),
            });
        }

        tracing::debug!(
            rule = %source,
            declared_type = %declared_type,
            expansions = expansions.len(),
            "compiled access rule"
        );
        Ok(expansions)
    }

    /// Compile a rule set into a registry.
    pub fn compile_all<S: AsRef<str>>(&self, sources: &[S]) -> Result<AccessRules> {
        let mut rules = Vec::new();
        for (rule_id, source) in sources.iter().enumerate() {
            rules.extend(self.compile(rule_id, source.as_ref())?);
        }
        tracing::debug!(
            sources = sources.len(),
            rules = rules.len(),
            "compiled access rule set"
        );
        Ok(AccessRules::new(rules))
    }
}

/// Immutable registry of compiled rules, indexed by (concrete type, kind).
#[derive(Debug, Default)]
pub struct AccessRules {
    rules: Vec<Arc<AccessRule>>,
    index: HashMap<(String, AccessKind), Vec<Arc<AccessRule>>>,
}

impl AccessRules {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        let rules: Vec<Arc<AccessRule>> = rules.into_iter().map(Arc::new).collect();
        let mut index: HashMap<(String, AccessKind), Vec<Arc<AccessRule>>> = HashMap::new();
        for rule in &rules {
            for kind in &rule.kinds {
                index
                    .entry((rule.entity_name.clone(), *kind))
                    .or_default()
                    .push(rule.clone());
            }
        }
        Self { rules, index }
    }

    /// Rules granting `kind` on the concrete type `entity_name`.
    pub fn rules_for(&self, entity_name: &str, kind: AccessKind) -> &[Arc<AccessRule>] {
        self.index
            .get(&(entity_name.to_string(), kind))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Rules usable to restrict a query over `type_name`.
    ///
    /// A query over an abstract type returns objects of several concrete
    /// types, so only rules covering every one of them qualify; one
    /// expansion per source rule is returned.
    pub fn rules_for_type(
        &self,
        mapping: &MappingInformation,
        type_name: &str,
        kind: AccessKind,
    ) -> Vec<Arc<AccessRule>> {
        let concrete: Vec<&str> = mapping
            .resolve_class_mappings(type_name)
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        let Some((first, rest)) = concrete.split_first() else {
            return self.rules_for(type_name, kind).to_vec();
        };

        let mut seen = HashSet::new();
        self.rules_for(first, kind)
            .iter()
            .filter(|rule| {
                rest.iter().all(|other| {
                    self.rules_for(other, kind)
                        .iter()
                        .any(|r| r.rule_id == rule.rule_id)
                })
            })
            .filter(|rule| seen.insert(rule.rule_id))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AccessRule>> {
        self.rules.iter()
    }

    /// Number of compiled expansions.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
