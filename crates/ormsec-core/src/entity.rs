//! Live entity objects as seen by the evaluator.

use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An entity object handed out by the persistence session.
///
/// The security layer only reads entities: it needs the mapped type name
/// and property values by name.
pub trait Entity: Send + Sync {
    /// Mapped entity type name.
    fn entity_name(&self) -> &str;

    /// Current value of a property; `None` if the object has no such property.
    fn property(&self, name: &str) -> Option<Value>;

    /// Persistent identity, if assigned.
    fn identity(&self) -> Option<Value> {
        None
    }
}

impl fmt::Debug for dyn Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.entity_name())
            .field("identity", &self.identity())
            .finish()
    }
}

/// Shared handle to an entity.
pub type EntityRef = Arc<dyn Entity>;

/// Address of the entity object, used as an identity key.
pub fn identity_key(entity: &EntityRef) -> usize {
    Arc::as_ptr(entity) as *const () as usize
}

/// A map-backed entity.
///
/// Properties can be set after the entity is shared, which is how cyclic
/// graphs (a folder and its documents) are built.
pub struct DynamicEntity {
    name: String,
    id_property: Option<String>,
    properties: RwLock<HashMap<String, Value>>,
}

impl DynamicEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_property: None,
            properties: RwLock::new(HashMap::new()),
        }
    }

    /// Set the identity property and its value.
    pub fn with_id(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        let property = property.into();
        self.properties.get_mut().insert(property.clone(), value.into());
        self.id_property = Some(property);
        self
    }

    /// Set a property value.
    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.get_mut().insert(property.into(), value.into());
        self
    }

    /// Set a property value on a shared entity.
    pub fn set(&self, property: impl Into<String>, value: impl Into<Value>) {
        self.properties.write().insert(property.into(), value.into());
    }

    pub fn into_ref(self) -> EntityRef {
        Arc::new(self)
    }
}

impl Entity for DynamicEntity {
    fn entity_name(&self) -> &str {
        &self.name
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.properties.read().get(name).cloned()
    }

    fn identity(&self) -> Option<Value> {
        let property = self.id_property.as_ref()?;
        self.property(property)
    }
}

impl fmt::Debug for DynamicEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicEntity")
            .field("name", &self.name)
            .field("identity", &self.identity())
            .finish()
    }
}
