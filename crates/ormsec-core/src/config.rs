//! Security layer configuration.

use crate::error::{Error, Result};
use crate::evaluator::{
    QueryEvaluator, QueryExecutor, SessionSubselectEvaluator, SimpleSubselectEvaluator,
    SubselectEvaluator,
};
use crate::mapping::MappingInformation;
use crate::rules::{AccessRules, AccessRulesCompiler};
use crate::security::{SecurityContextProvider, ThreadLocalSecurityContext};
use ormsec_lang::AccessKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Subselect strategies, in the order they are tried by default.
pub const DEFAULT_EVALUATORS: [EvaluatorKind; 2] =
    [EvaluatorKind::Simple, EvaluatorKind::PersistenceSession];

/// A subselect evaluation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    /// In-memory alias substitution.
    Simple,
    /// Query through the persistence session.
    PersistenceSession,
}

/// Source of access rule texts.
pub trait AccessRulesProvider: Send + Sync {
    fn access_rules(&self) -> Result<Vec<String>>;
}

/// Rules given in code.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessRulesProvider {
    rules: Vec<String>,
}

impl StaticAccessRulesProvider {
    pub fn new<S: Into<String>>(rules: impl IntoIterator<Item = S>) -> Self {
        Self {
            rules: rules.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rules.push(rule.into());
        self
    }
}

impl AccessRulesProvider for StaticAccessRulesProvider {
    fn access_rules(&self) -> Result<Vec<String>> {
        Ok(self.rules.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulesDocument {
    rules: Vec<String>,
}

/// Rules read from a JSON document of the form `{"rules": ["GRANT ...", ...]}`.
#[derive(Debug, Clone)]
pub struct JsonAccessRulesProvider {
    document: String,
}

impl JsonAccessRulesProvider {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
        }
    }

    /// Read the document from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read access rules from {}: {}", path.display(), e))
        })?;
        Ok(Self::new(document))
    }
}

impl AccessRulesProvider for JsonAccessRulesProvider {
    fn access_rules(&self) -> Result<Vec<String>> {
        let document: RulesDocument = serde_json::from_str(&self.document)
            .map_err(|e| Error::Configuration(format!("invalid access rules document: {}", e)))?;
        Ok(document.rules)
    }
}

/// Builds the errors the security layer raises.
pub trait ExceptionFactory: Send + Sync {
    fn access_denied(&self, entity: &str, kind: AccessKind, cause: Option<Error>) -> Error;

    fn mapping_error(&self, message: String) -> Error;
}

/// Raises the crate's own error variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionFactory;

impl ExceptionFactory for DefaultExceptionFactory {
    fn access_denied(&self, entity: &str, kind: AccessKind, cause: Option<Error>) -> Error {
        Error::AccessDenied {
            entity: entity.to_string(),
            kind,
            cause: cause.map(Box::new),
        }
    }

    fn mapping_error(&self, message: String) -> Error {
        Error::Mapping(message)
    }
}

/// Configuration of a secure session factory.
#[derive(Clone)]
pub struct Configuration {
    /// Where sessions get the current user from.
    pub security_context: Arc<dyn SecurityContextProvider>,
    pub access_rules: Arc<dyn AccessRulesProvider>,
    pub exception_factory: Arc<dyn ExceptionFactory>,
    /// Subselect strategies in the order they are tried.
    pub evaluators: Vec<EvaluatorKind>,
    /// Remember READ decisions per object for the life of a session.
    pub cache_read_access: bool,
}

impl Configuration {
    /// Thread-local security context, no rules, both strategies, read cache on.
    pub fn new() -> Self {
        Self {
            security_context: Arc::new(ThreadLocalSecurityContext),
            access_rules: Arc::new(StaticAccessRulesProvider::default()),
            exception_factory: Arc::new(DefaultExceptionFactory),
            evaluators: DEFAULT_EVALUATORS.to_vec(),
            cache_read_access: true,
        }
    }

    /// Set the security context provider.
    pub fn with_security_context(mut self, provider: impl SecurityContextProvider + 'static) -> Self {
        self.security_context = Arc::new(provider);
        self
    }

    /// Set the access rules provider.
    pub fn with_access_rules(mut self, provider: impl AccessRulesProvider + 'static) -> Self {
        self.access_rules = Arc::new(provider);
        self
    }

    /// Set the exception factory.
    pub fn with_exception_factory(mut self, factory: impl ExceptionFactory + 'static) -> Self {
        self.exception_factory = Arc::new(factory);
        self
    }

    /// Set the subselect strategies, tried in the given order.
    pub fn with_evaluators(mut self, evaluators: impl IntoIterator<Item = EvaluatorKind>) -> Self {
        self.evaluators = evaluators.into_iter().collect();
        self
    }

    /// Enable or disable the per-session read cache.
    pub fn with_read_cache(mut self, enabled: bool) -> Self {
        self.cache_read_access = enabled;
        self
    }

    /// Load and compile the configured rules against `mapping`.
    pub fn compile_rules(&self, mapping: &MappingInformation) -> Result<AccessRules> {
        let sources = self.access_rules.access_rules()?;
        AccessRulesCompiler::new(mapping).compile_all(&sources)
    }

    /// An evaluator with the configured strategies; `executor` backs the
    /// persistence session strategy.
    pub fn evaluator(
        &self,
        mapping: Arc<MappingInformation>,
        executor: Option<Arc<dyn QueryExecutor>>,
    ) -> QueryEvaluator {
        let strategies: Vec<Arc<dyn SubselectEvaluator>> = self
            .evaluators
            .iter()
            .map(|kind| -> Arc<dyn SubselectEvaluator> {
                match kind {
                    EvaluatorKind::Simple => Arc::new(SimpleSubselectEvaluator),
                    EvaluatorKind::PersistenceSession => Arc::new(match &executor {
                        Some(executor) => SessionSubselectEvaluator::new(executor.clone()),
                        None => SessionSubselectEvaluator::none(),
                    }),
                }
            })
            .collect();
        QueryEvaluator::new(mapping).with_strategies(strategies)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("evaluators", &self.evaluators)
            .field("cache_read_access", &self.cache_read_access)
            .finish_non_exhaustive()
    }
}
