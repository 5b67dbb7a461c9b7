//! Secure persistence sessions.
//!
//! A [`SecureSessionFactory`] compiles the configured access rules once and
//! hands out [`SecureSession`]s. Each session wraps a [`PersistenceSession`]
//! provided by the persistence layer: queries are rewritten before they are
//! executed, and objects passing through `find`, `persist`, `merge`,
//! `remove` and `refresh` are checked by the session's [`AccessManager`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ormsec_core::{
    AccessKind, AccessManager, AccessRules, Configuration, EntityFilter, EntityRef, Error,
    FilterStatistics, MappingInformation, QueryExecutor, Result, SecurityContext,
    SecurityContextProvider, StatementCache, Value,
};

use crate::query::SecureQuery;

/// The persistence operations a secure session delegates to.
///
/// Implemented by the persistence layer; the security layer never talks to
/// the store in any other way.
pub trait PersistenceSession: Send + Sync {
    /// Load an object by entity name and identifier.
    fn find(&self, entity_name: &str, id: &Value) -> Result<Option<EntityRef>>;

    fn persist(&self, entity: &EntityRef) -> Result<()>;

    /// Merge detached state and return the managed object.
    fn merge(&self, entity: &EntityRef) -> Result<EntityRef>;

    fn remove(&self, entity: &EntityRef) -> Result<()>;

    /// Reload the state of a managed object.
    fn refresh(&self, entity: &EntityRef) -> Result<()>;

    /// Run a query with named parameters and return its rows.
    fn execute_query(&self, query: &str, parameters: &HashMap<String, Value>)
        -> Result<Vec<Value>>;
}

/// Lets the persistence-session subselect strategy query through a session.
struct SessionExecutor(Arc<dyn PersistenceSession>);

impl QueryExecutor for SessionExecutor {
    fn execute(&self, query: &str, parameters: &HashMap<String, Value>) -> Result<Vec<Value>> {
        self.0.execute_query(query, parameters)
    }
}

/// Creates secure sessions sharing one compiled rule set.
pub struct SecureSessionFactory {
    configuration: Configuration,
    mapping: Arc<MappingInformation>,
    rules: Arc<AccessRules>,
    statements: StatementCache,
    statistics: Arc<FilterStatistics>,
}

impl SecureSessionFactory {
    /// Load and compile the configured access rules against `mapping`.
    ///
    /// Fails on the first rule that does not parse or compile.
    pub fn new(configuration: Configuration, mapping: MappingInformation) -> Result<Self> {
        let rules = configuration.compile_rules(&mapping)?;
        tracing::debug!(rules = rules.len(), "secure session factory ready");
        Ok(Self {
            configuration,
            mapping: Arc::new(mapping),
            rules: Arc::new(rules),
            statements: StatementCache::default(),
            statistics: Arc::new(FilterStatistics::new()),
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn mapping(&self) -> &Arc<MappingInformation> {
        &self.mapping
    }

    pub fn rules(&self) -> &AccessRules {
        &self.rules
    }

    /// Counters shared by all sessions of this factory.
    pub fn statistics(&self) -> &Arc<FilterStatistics> {
        &self.statistics
    }

    /// Wrap `session` in a secure session.
    pub fn create_session(&self, session: Arc<dyn PersistenceSession>) -> SecureSession {
        let executor: Arc<dyn QueryExecutor> = Arc::new(SessionExecutor(session.clone()));
        let evaluator = self
            .configuration
            .evaluator(self.mapping.clone(), Some(executor));
        let filter = EntityFilter::new(self.mapping.clone(), self.rules.clone(), evaluator)
            .with_statement_cache(self.statements.clone())
            .with_statistics(self.statistics.clone());
        SecureSession {
            session,
            context: self.configuration.security_context.clone(),
            access: AccessManager::new(filter, &self.configuration),
        }
    }
}

impl fmt::Debug for SecureSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSessionFactory")
            .field("configuration", &self.configuration)
            .field("rules", &self.rules.len())
            .field("cached_statements", &self.statements.len())
            .finish()
    }
}

/// A persistence session that enforces the access rules.
///
/// One session serves one unit of work; it is not meant to be shared
/// between threads.
pub struct SecureSession {
    session: Arc<dyn PersistenceSession>,
    context: Arc<dyn SecurityContextProvider>,
    access: AccessManager,
}

impl SecureSession {
    pub fn access_manager(&self) -> &AccessManager {
        &self.access
    }

    pub fn access_manager_mut(&mut self) -> &mut AccessManager {
        &mut self.access
    }

    /// The wrapped session, for operations that need no checks.
    pub fn delegate(&self) -> &Arc<dyn PersistenceSession> {
        &self.session
    }

    /// The security context of the current user.
    pub fn security_context(&self) -> Result<SecurityContext> {
        self.context.security_context()
    }

    /// Load an object; fails unless it is readable.
    ///
    /// Objects loaded while checks are delayed are checked at the matching
    /// [`check_now`](Self::check_now).
    pub fn find(&mut self, entity_name: &str, id: impl Into<Value>) -> Result<Option<EntityRef>> {
        let id = id.into();
        self.access.delay_checks();
        let found = self.session.find(entity_name, &id);
        let recorded = match &found {
            Ok(Some(entity)) => self.access.check_access(AccessKind::Read, entity),
            _ => Ok(()),
        };
        // always unwind the delay opened above
        let checked = self.access.check_now();
        let found = found?;
        recorded?;
        checked?;
        Ok(found)
    }

    /// Make a new object persistent; requires CREATE access.
    pub fn persist(&mut self, entity: &EntityRef) -> Result<()> {
        self.access.check_access(AccessKind::Create, entity)?;
        self.session.persist(entity)
    }

    /// Merge an object's state; requires UPDATE access to the merged state.
    pub fn merge(&mut self, entity: &EntityRef) -> Result<EntityRef> {
        self.access.check_access(AccessKind::Update, entity)?;
        self.session.merge(entity)
    }

    /// Remove an object; requires DELETE access.
    pub fn remove(&mut self, entity: &EntityRef) -> Result<()> {
        self.access.check_access(AccessKind::Delete, entity)?;
        self.session.remove(entity)
    }

    /// Reload an object; the reloaded state must be readable.
    pub fn refresh(&mut self, entity: &EntityRef) -> Result<()> {
        self.session.refresh(entity)?;
        self.access.check_access(AccessKind::Read, entity)
    }

    /// Start batching access checks.
    pub fn delay_checks(&mut self) {
        self.access.delay_checks();
    }

    /// Run the batched access checks when the outermost delay ends.
    pub fn check_now(&mut self) -> Result<()> {
        self.access.check_now()
    }

    /// A query whose results are restricted to accessible objects.
    pub fn create_query(&self, query: impl Into<String>) -> SecureQuery<'_> {
        SecureQuery::new(self, query.into())
    }

    /// A named query of the mapping model.
    pub fn create_named_query(&self, name: &str) -> Result<SecureQuery<'_>> {
        let query = self
            .access
            .filter()
            .mapping()
            .named_query(name)
            .ok_or_else(|| Error::Configuration(format!("unknown named query {}", name)))?;
        Ok(SecureQuery::new(self, query.to_string()))
    }

    pub(crate) fn filter(&self) -> &EntityFilter {
        self.access.filter()
    }

    pub(crate) fn execute(
        &self,
        query: &str,
        parameters: &HashMap<String, Value>,
    ) -> Result<Vec<Value>> {
        self.session.execute_query(query, parameters)
    }
}

impl fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureSession")
            .field("mode", &self.access.mode())
            .field("delay_depth", &self.access.delay_depth())
            .finish_non_exhaustive()
    }
}
