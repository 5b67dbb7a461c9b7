//! Queries restricted by the access rules.

use std::collections::{BTreeMap, HashMap};

use ormsec_core::{AccessKind, Error, FilterResult, Result, Value};

use crate::session::SecureSession;

/// A query created by a [`SecureSession`].
///
/// The query text is rewritten for the current user when it is executed,
/// so parameters and the security context are read at that point.
pub struct SecureQuery<'s> {
    session: &'s SecureSession,
    query: String,
    parameters: HashMap<String, Value>,
    positional: BTreeMap<u32, Value>,
}

impl<'s> SecureQuery<'s> {
    pub(crate) fn new(session: &'s SecureSession, query: String) -> Self {
        Self {
            session,
            query,
            parameters: HashMap::new(),
            positional: BTreeMap::new(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Bind a named parameter.
    pub fn set_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Bind a positional parameter such as `?1`.
    ///
    /// Positional parameters reach the persistence session as named
    /// parameters of the rewritten query.
    pub fn set_positional_parameter(mut self, index: u32, value: impl Into<Value>) -> Self {
        self.positional.insert(index, value.into());
        self
    }

    /// The rewritten query for the current user, without executing it.
    pub fn filtered(&self) -> Result<FilterResult> {
        let context = self.session.security_context()?;
        self.session
            .filter()
            .filter_query(&self.query, AccessKind::Read, &context)
    }

    /// Execute and return all rows.
    ///
    /// When no rule grants access the store is not queried at all.
    pub fn get_result_list(&self) -> Result<Vec<Value>> {
        let mut filtered = self.filtered()?;
        if filtered.is_always_empty() {
            tracing::trace!(query = %self.query, "no access, skipping execution");
            return Ok(Vec::new());
        }
        for (name, value) in &self.parameters {
            filtered
                .parameters
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        filtered.bind_positional(&self.positional)?;
        match &filtered.query {
            Some(query) => self.session.execute(query, &filtered.parameters),
            None => Ok(Vec::new()),
        }
    }

    /// Execute and return the only row, if any.
    pub fn get_single_result(&self) -> Result<Option<Value>> {
        let mut rows = self.get_result_list()?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(Error::InvariantViolation(format!(
                "expected at most one result, got {}",
                n
            ))),
        }
    }
}
