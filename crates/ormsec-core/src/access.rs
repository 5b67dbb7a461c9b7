//! Per-session access checks.

use crate::config::{Configuration, ExceptionFactory};
use crate::entity::{identity_key, DynamicEntity, EntityRef};
use crate::error::{Error, Result};
use crate::filter::EntityFilter;
use crate::security::SecurityContextProvider;
use crate::value::Value;
use indexmap::IndexMap;
use ormsec_lang::AccessKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether checks are performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    #[default]
    Checking,
    Disabled,
}

/// Decides and enforces access for one session.
///
/// Checks can be batched: between [`delay_checks`](Self::delay_checks)
/// and the matching [`check_now`](Self::check_now), [`check_access`](Self::check_access)
/// only records what has to be checked. Delays nest; the recorded checks
/// run when the outermost delay ends.
pub struct AccessManager {
    filter: EntityFilter,
    context: Arc<dyn SecurityContextProvider>,
    exceptions: Arc<dyn ExceptionFactory>,
    cache_read_access: bool,
    mode: CheckMode,
    delay_depth: usize,
    pending: IndexMap<(usize, AccessKind), EntityRef>,
    /// READ decisions by (entity name, id).
    read_cache: HashMap<(String, Value), bool>,
    ignored: HashMap<(usize, AccessKind), EntityRef>,
}

impl AccessManager {
    pub fn new(filter: EntityFilter, configuration: &Configuration) -> Self {
        Self {
            filter,
            context: configuration.security_context.clone(),
            exceptions: configuration.exception_factory.clone(),
            cache_read_access: configuration.cache_read_access,
            mode: CheckMode::Checking,
            delay_depth: 0,
            pending: IndexMap::new(),
            read_cache: HashMap::new(),
            ignored: HashMap::new(),
        }
    }

    pub fn filter(&self) -> &EntityFilter {
        &self.filter
    }

    pub fn mode(&self) -> CheckMode {
        self.mode
    }

    /// Nesting depth of [`delay_checks`](Self::delay_checks).
    pub fn delay_depth(&self) -> usize {
        self.delay_depth
    }

    /// Number of checks waiting for [`check_now`](Self::check_now).
    pub fn pending_checks(&self) -> usize {
        self.pending.len()
    }

    /// Whether the current user may access `entity` with `kind`.
    pub fn is_accessible(&mut self, kind: AccessKind, entity: &EntityRef) -> Result<bool> {
        if self.mode == CheckMode::Disabled
            || self.ignored.contains_key(&(identity_key(entity), kind))
        {
            return Ok(true);
        }

        let key = match (kind, self.cache_read_access) {
            (AccessKind::Read, true) => self
                .filter
                .mapping()
                .id_of(entity.as_ref())
                .map(|id| (entity.entity_name().to_string(), id)),
            _ => None,
        };
        if let Some(key) = &key {
            if let Some(&accessible) = self.read_cache.get(key) {
                self.filter.statistics().record_read_cache_hit();
                return Ok(accessible);
            }
            self.filter.statistics().record_read_cache_miss();
        }

        let context = self.context.security_context()?;
        let accessible = self.filter.is_accessible(kind, entity, &context)?;
        if let Some(key) = key {
            self.read_cache.insert(key, accessible);
        }
        Ok(accessible)
    }

    /// Whether the current user may access an object of `entity_name`
    /// that would be created with `properties`.
    ///
    /// The object is built only for the check; its decision is not cached.
    pub fn is_accessible_new<K, V>(
        &self,
        kind: AccessKind,
        entity_name: &str,
        properties: impl IntoIterator<Item = (K, V)>,
    ) -> Result<bool>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mapping = self.filter.mapping();
        if mapping.class_mapping(entity_name).is_none() {
            return Err(Error::Mapping(format!("unknown entity '{}'", entity_name)));
        }
        if self.mode == CheckMode::Disabled {
            return Ok(true);
        }
        let mut transient = DynamicEntity::new(entity_name);
        let id_property = mapping.id_property(entity_name);
        for (name, value) in properties {
            let name = name.into();
            transient = if id_property == Some(name.as_str()) {
                transient.with_id(name, value)
            } else {
                transient.with(name, value)
            };
        }
        let context = self.context.security_context()?;
        self.filter.is_accessible(kind, &transient.into_ref(), &context)
    }

    /// Fail unless the current user may access `entity` with `kind`.
    ///
    /// While checks are delayed the check is only recorded.
    pub fn check_access(&mut self, kind: AccessKind, entity: &EntityRef) -> Result<()> {
        if self.mode == CheckMode::Disabled {
            return Ok(());
        }
        if self.delay_depth > 0 {
            self.pending
                .entry((identity_key(entity), kind))
                .or_insert_with(|| entity.clone());
            return Ok(());
        }
        self.enforce(kind, entity)
    }

    /// Start recording checks instead of performing them.
    pub fn delay_checks(&mut self) {
        self.delay_depth += 1;
    }

    /// End one level of delay; at the outermost level run the recorded checks.
    ///
    /// The first failing check aborts; the remaining ones are discarded.
    pub fn check_now(&mut self) -> Result<()> {
        if self.delay_depth == 0 {
            return Err(Error::InvariantViolation(
                "check_now called without a matching delay_checks".into(),
            ));
        }
        self.delay_depth -= 1;
        if self.delay_depth > 0 {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.pending);
        tracing::trace!(checks = pending.len(), "running delayed access checks");
        for ((_, kind), entity) in pending {
            self.enforce(kind, &entity)?;
        }
        Ok(())
    }

    pub fn enable_checks(&mut self) {
        self.mode = CheckMode::Checking;
    }

    /// Turn checks off, for trusted code paths.
    pub fn disable_checks(&mut self) {
        self.mode = CheckMode::Disabled;
    }

    /// Skip `kind` checks for the given objects from now on.
    pub fn ignore_checks<'e>(
        &mut self,
        kind: AccessKind,
        entities: impl IntoIterator<Item = &'e EntityRef>,
    ) {
        for entity in entities {
            self.ignored
                .insert((identity_key(entity), kind), entity.clone());
        }
    }

    /// The readable objects among `entities`, in order.
    pub fn filter_readable(
        &mut self,
        entities: impl IntoIterator<Item = EntityRef>,
    ) -> Result<Vec<EntityRef>> {
        let mut readable = Vec::new();
        for entity in entities {
            if self.is_accessible(AccessKind::Read, &entity)? {
                readable.push(entity);
            }
        }
        Ok(readable)
    }

    /// Forget cached READ decisions.
    pub fn clear_cache(&mut self) {
        self.read_cache.clear();
    }

    fn enforce(&mut self, kind: AccessKind, entity: &EntityRef) -> Result<()> {
        match self.is_accessible(kind, entity) {
            Ok(true) => Ok(()),
            Ok(false) => {
                let name = self.filter.mapping().describe(entity.as_ref());
                tracing::debug!(entity = %name, kind = %kind, "access denied");
                Err(self.exceptions.access_denied(&name, kind, None))
            }
            Err(e) if e.is_security_error() => Err(e),
            Err(e) => {
                let name = self.filter.mapping().describe(entity.as_ref());
                tracing::debug!(entity = %name, kind = %kind, error = %e, "access check failed");
                Err(self.exceptions.access_denied(&name, kind, Some(e)))
            }
        }
    }
}
