//! The binding environment of one evaluation call.

use crate::security::SecurityContext;
use crate::value::Value;
use chrono::{Local, NaiveDateTime};
use ormsec_lang::TypeDefinition;
use std::collections::HashMap;

/// Alias, parameter and context bindings for one evaluation.
///
/// The wall clock is captured once at construction so that every
/// `CURRENT_*` function of one call sees the same instant.
#[derive(Debug, Clone)]
pub struct EvaluationParameters<'a> {
    aliases: HashMap<String, Value>,
    named: HashMap<String, Value>,
    positional: HashMap<u32, Value>,
    context: Option<&'a SecurityContext>,
    now: NaiveDateTime,
}

impl<'a> EvaluationParameters<'a> {
    pub fn new() -> Self {
        Self {
            aliases: HashMap::new(),
            named: HashMap::new(),
            positional: HashMap::new(),
            context: None,
            now: Local::now().naive_local(),
        }
    }

    /// Bind the security context.
    pub fn with_context(mut self, context: &'a SecurityContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind_alias(alias, value);
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn with_named_parameters(mut self, parameters: &HashMap<String, Value>) -> Self {
        self.named
            .extend(parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_positional(mut self, index: u32, value: impl Into<Value>) -> Self {
        self.positional.insert(index, value.into());
        self
    }

    /// Use a fixed clock instead of the wall clock.
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    pub fn bind_alias(&mut self, alias: impl Into<String>, value: impl Into<Value>) {
        self.aliases.insert(alias.into(), value.into());
    }

    pub fn unbind_alias(&mut self, alias: &str) -> Option<Value> {
        self.aliases.remove(alias)
    }

    pub fn alias(&self, name: &str) -> Option<&Value> {
        self.aliases.get(name)
    }

    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    pub fn named_parameters(&self) -> &HashMap<String, Value> {
        &self.named
    }

    pub fn positional(&self, index: u32) -> Option<&Value> {
        self.positional.get(&index)
    }

    pub fn context(&self) -> Option<&'a SecurityContext> {
        self.context
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Bound aliases as type definitions, for compiling subselects.
    pub(crate) fn scope(&self) -> Vec<TypeDefinition> {
        self.aliases
            .iter()
            .map(|(alias, value)| TypeDefinition {
                alias: alias.clone(),
                type_name: value.as_entity().map(|e| e.entity_name().to_string()),
                join_path: None,
                inner: true,
                fetch: false,
            })
            .collect()
    }
}

impl Default for EvaluationParameters<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::DynamicEntity;

    #[test]
    fn test_bindings() {
        let context = SecurityContext::new("alice");
        let doc = DynamicEntity::new("Document").with_id("id", 1).into_ref();
        let params = EvaluationParameters::new()
            .with_context(&context)
            .with_alias("d", Value::Entity(doc))
            .with_named("owner", "alice")
            .with_positional(1, 5);

        assert!(params.alias("d").is_some());
        assert!(params.alias("x").is_none());
        assert_eq!(params.named("owner"), Some(&Value::from("alice")));
        assert_eq!(params.positional(1), Some(&Value::Integer(5)));
        assert_eq!(params.context().unwrap().principal_value(), Value::from("alice"));

        let scope = params.scope();
        assert_eq!(scope.len(), 1);
        assert_eq!(scope[0].type_name.as_deref(), Some("Document"));
    }

    #[test]
    fn test_clock_is_captured_once() {
        let params = EvaluationParameters::new();
        let first = params.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(params.clone().now(), first);
    }
}
