//! The caller identity access rules are evaluated against.

use crate::value::Value;
use std::collections::HashMap;

/// Identity of the caller a session acts for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityContext {
    /// Bound to `CURRENT_PRINCIPAL`; null when anonymous.
    pub principal: Option<Value>,
    /// Bound to `CURRENT_ROLES`.
    pub roles: Vec<Value>,
    /// Bound to `CURRENT_TENANT`.
    pub tenant: Option<Value>,
    /// Values for the named parameters of access rules.
    pub attributes: HashMap<String, Value>,
}

impl SecurityContext {
    /// Create a context for an authenticated principal.
    pub fn new(principal: impl Into<Value>) -> Self {
        Self {
            principal: Some(principal.into()),
            ..Self::default()
        }
    }

    /// Create a context without principal, roles or tenant.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<Value>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_roles<R: Into<Value>>(mut self, roles: impl IntoIterator<Item = R>) -> Self {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<Value>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Add an attribute usable as a named rule parameter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal.is_none()
    }

    /// Value of `CURRENT_PRINCIPAL`.
    pub fn principal_value(&self) -> Value {
        self.principal.clone().unwrap_or(Value::Null)
    }

    /// Value of `CURRENT_ROLES`.
    pub fn roles_value(&self) -> Value {
        Value::Collection(self.roles.clone())
    }

    /// Value of `CURRENT_TENANT`.
    pub fn tenant_value(&self) -> Value {
        self.tenant.clone().unwrap_or(Value::Null)
    }

    pub fn has_role(&self, role: impl Into<Value>) -> bool {
        let role = role.into();
        self.roles.contains(&role)
    }

    pub fn get_attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_values() {
        let context = SecurityContext::new("alice")
            .with_roles(["editor", "reviewer"])
            .with_tenant("acme")
            .with_attribute("department", 42);

        assert!(!context.is_anonymous());
        assert_eq!(context.principal_value(), Value::from("alice"));
        assert_eq!(
            context.roles_value(),
            Value::Collection(vec![Value::from("editor"), Value::from("reviewer")])
        );
        assert_eq!(context.tenant_value(), Value::from("acme"));
        assert!(context.has_role("reviewer"));
        assert!(!context.has_role("admin"));
        assert_eq!(context.get_attribute("department"), Some(&Value::Integer(42)));
    }

    #[test]
    fn test_anonymous() {
        let context = SecurityContext::anonymous();
        assert!(context.is_anonymous());
        assert_eq!(context.principal_value(), Value::Null);
        assert_eq!(context.tenant_value(), Value::Null);
        assert_eq!(context.roles_value(), Value::Collection(vec![]));
    }
}
