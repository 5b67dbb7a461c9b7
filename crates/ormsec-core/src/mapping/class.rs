//! Class and property mappings.

use serde::{Deserialize, Serialize};

/// How a property navigates the entity graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyKind {
    /// Scalar value.
    Basic,
    /// Reference to one entity.
    SingleValued { target: String },
    /// Collection of entities.
    CollectionValued { target: String },
}

/// A mapped property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMapping {
    pub name: String,
    #[serde(flatten)]
    pub kind: PropertyKind,
}

impl PropertyMapping {
    pub fn basic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Basic,
        }
    }

    pub fn single_valued(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::SingleValued {
                target: target.into(),
            },
        }
    }

    pub fn collection_valued(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::CollectionValued {
                target: target.into(),
            },
        }
    }

    /// Entity type this property navigates to.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Basic => None,
            PropertyKind::SingleValued { target } | PropertyKind::CollectionValued { target } => {
                Some(target)
            }
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, PropertyKind::CollectionValued { .. })
    }
}

/// Mapping of one entity type, abstract class or interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMapping {
    /// Entity name used in queries and rules.
    pub name: String,
    /// Mapped superclass.
    #[serde(default)]
    pub superclass: Option<String>,
    /// Implemented interfaces.
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Abstract classes and interfaces have no instances of their own.
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    /// Name of the identity property, inherited when absent.
    #[serde(default)]
    pub id_property: Option<String>,
    /// Properties declared on this class.
    #[serde(default)]
    pub properties: Vec<PropertyMapping>,
}

impl ClassMapping {
    /// Create a concrete class mapping.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            interfaces: Vec::new(),
            is_abstract: false,
            id_property: None,
            properties: Vec::new(),
        }
    }

    /// Create an abstract mapping, used for interfaces and abstract base classes.
    pub fn new_abstract(name: impl Into<String>) -> Self {
        Self {
            is_abstract: true,
            ..Self::new(name)
        }
    }

    pub fn with_superclass(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Declare the identity property (a basic property).
    pub fn with_id(mut self, property: impl Into<String>) -> Self {
        let property = property.into();
        self.properties.push(PropertyMapping::basic(property.clone()));
        self.id_property = Some(property);
        self
    }

    pub fn with_property(mut self, property: PropertyMapping) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_basic(self, name: impl Into<String>) -> Self {
        self.with_property(PropertyMapping::basic(name))
    }

    pub fn with_single(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_property(PropertyMapping::single_valued(name, target))
    }

    pub fn with_collection(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_property(PropertyMapping::collection_valued(name, target))
    }

    /// Property declared on this class (not inherited).
    pub fn declared_property(&self, name: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|p| p.name == name)
    }
}
