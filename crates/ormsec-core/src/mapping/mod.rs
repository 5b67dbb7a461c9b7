//! The entity mapping model.
//!
//! The mapping is produced by an external loader (annotations, XML, a
//! JSON document) and handed over as [`MappingInformation`]. It answers
//! the questions the compiler, path evaluator and rule registry ask:
//! which types exist, which properties they have, which concrete types an
//! abstract type or interface stands for, and how to read an entity's id.

mod class;

pub use class::{ClassMapping, PropertyKind, PropertyMapping};

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::value::Value;
use indexmap::IndexMap;
use ormsec_lang::{PropertyType, TypeModel};
use serde::Deserialize;
use std::collections::HashSet;

/// Serialized form of the mapping model.
#[derive(Debug, Deserialize)]
struct MappingDocument {
    classes: Vec<ClassMapping>,
    #[serde(default)]
    named_queries: IndexMap<String, String>,
}

/// All class mappings of a persistence unit plus its named queries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "MappingDocument")]
pub struct MappingInformation {
    classes: IndexMap<String, ClassMapping>,
    named_queries: IndexMap<String, String>,
}

impl From<MappingDocument> for MappingInformation {
    fn from(document: MappingDocument) -> Self {
        Self {
            classes: document
                .classes
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
            named_queries: document.named_queries,
        }
    }
}

impl MappingInformation {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a mapping from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid mapping document: {}", e)))
    }

    /// Add a class mapping, replacing one with the same name.
    pub fn with_class(mut self, class: ClassMapping) -> Self {
        self.add_class(class);
        self
    }

    pub fn add_class(&mut self, class: ClassMapping) {
        self.classes.insert(class.name.clone(), class);
    }

    /// Register a named query.
    pub fn with_named_query(mut self, name: impl Into<String>, query: impl Into<String>) -> Self {
        self.named_queries.insert(name.into(), query.into());
        self
    }

    pub fn class_mapping(&self, name: &str) -> Option<&ClassMapping> {
        self.classes.get(name)
    }

    pub fn class_mappings(&self) -> impl Iterator<Item = &ClassMapping> {
        self.classes.values()
    }

    pub fn named_query(&self, name: &str) -> Option<&str> {
        self.named_queries.get(name).map(String::as_str)
    }

    /// The class and its mapped ancestors, nearest first.
    fn lineage<'a>(&'a self, name: &str) -> Vec<&'a ClassMapping> {
        let mut lineage = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.classes.get(name);
        while let Some(class) = current {
            if !seen.insert(class.name.as_str()) {
                break;
            }
            lineage.push(class);
            current = class
                .superclass
                .as_deref()
                .and_then(|s| self.classes.get(s));
        }
        lineage
    }

    /// Whether `sub` is `sup`, inherits from it or implements it.
    pub fn is_assignable(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        let mut pending: Vec<&str> = vec![sub];
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(name) = pending.pop() {
            if !seen.insert(name) {
                continue;
            }
            let Some(class) = self.classes.get(name) else {
                continue;
            };
            for parent in class.superclass.iter().chain(class.interfaces.iter()) {
                if parent == sup {
                    return true;
                }
                pending.push(parent);
            }
        }
        false
    }

    /// Whether `entity` is an instance of the named type.
    pub fn is_instance(&self, entity: &dyn Entity, type_name: &str) -> bool {
        self.is_assignable(entity.entity_name(), type_name)
    }

    /// Concrete class mappings a type name stands for: the class itself
    /// when concrete, plus every concrete subclass and implementor.
    pub fn resolve_class_mappings(&self, type_name: &str) -> Vec<&ClassMapping> {
        self.classes
            .values()
            .filter(|c| !c.is_abstract && self.is_assignable(&c.name, type_name))
            .collect()
    }

    /// Property of a type, searching the superclass chain.
    pub fn property(&self, type_name: &str, property: &str) -> Option<&PropertyMapping> {
        self.lineage(type_name)
            .into_iter()
            .find_map(|c| c.declared_property(property))
    }

    /// Name of the identity property of a type, searching the superclass chain.
    pub fn id_property(&self, type_name: &str) -> Option<&str> {
        self.lineage(type_name)
            .into_iter()
            .find_map(|c| c.id_property.as_deref())
    }

    /// Identity value of an entity according to its mapping.
    pub fn id_of(&self, entity: &dyn Entity) -> Option<Value> {
        let id = match self.id_property(entity.entity_name()) {
            Some(property) => entity.property(property),
            None => entity.identity(),
        }?;
        (!id.is_null()).then_some(id)
    }

    /// `Type#id` for diagnostics, or just the type name when the id is unknown.
    pub fn describe(&self, entity: &dyn Entity) -> String {
        match self.id_of(entity) {
            Some(id) => format!("{}#{}", entity.entity_name(), id),
            None => entity.entity_name().to_string(),
        }
    }
}

impl TypeModel for MappingInformation {
    fn has_entity(&self, entity: &str) -> bool {
        self.classes.contains_key(entity)
            || self
                .classes
                .values()
                .any(|c| c.interfaces.iter().any(|i| i == entity))
    }

    fn property_type(&self, entity: &str, property: &str) -> Option<PropertyType> {
        let mapping = self.property(entity, property)?;
        Some(match &mapping.kind {
            PropertyKind::Basic => PropertyType::Basic,
            PropertyKind::SingleValued { target } => PropertyType::Entity(target.clone()),
            PropertyKind::CollectionValued { target } => PropertyType::Collection(target.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::DynamicEntity;

    fn mapping() -> MappingInformation {
        MappingInformation::new()
            .with_class(
                ClassMapping::new_abstract("Item")
                    .with_id("id")
                    .with_basic("owner"),
            )
            .with_class(
                ClassMapping::new("Document")
                    .with_superclass("Item")
                    .with_interface("Owned")
                    .with_single("folder", "Folder"),
            )
            .with_class(
                ClassMapping::new("SecretDocument")
                    .with_superclass("Document")
                    .with_basic("level"),
            )
            .with_class(
                ClassMapping::new("Folder")
                    .with_id("id")
                    .with_interface("Owned")
                    .with_collection("documents", "Document"),
            )
            .with_named_query("Document.all", "SELECT d FROM Document d")
    }

    #[test]
    fn test_resolve_class_mappings() {
        let mapping = mapping();
        let names = |t: &str| -> Vec<String> {
            mapping
                .resolve_class_mappings(t)
                .into_iter()
                .map(|c| c.name.clone())
                .collect()
        };
        assert_eq!(names("Item"), vec!["Document", "SecretDocument"]);
        assert_eq!(names("Owned"), vec!["Document", "SecretDocument", "Folder"]);
        assert_eq!(names("SecretDocument"), vec!["SecretDocument"]);
        assert!(names("Missing").is_empty());
    }

    #[test]
    fn test_inherited_properties() {
        let mapping = mapping();
        assert!(mapping.property("SecretDocument", "owner").is_some());
        assert_eq!(mapping.id_property("SecretDocument"), Some("id"));
        assert_eq!(
            mapping.property_type("SecretDocument", "folder"),
            Some(PropertyType::Entity("Folder".into()))
        );
        assert!(mapping.property("Folder", "level").is_none());
        assert!(mapping.has_entity("Owned"));
        assert!(!mapping.has_entity("Missing"));
    }

    #[test]
    fn test_instances_and_ids() {
        let mapping = mapping();
        let secret = DynamicEntity::new("SecretDocument").with("id", 9);
        assert!(mapping.is_instance(&secret, "Item"));
        assert!(mapping.is_instance(&secret, "Owned"));
        assert!(!mapping.is_instance(&secret, "Folder"));
        assert_eq!(mapping.id_of(&secret), Some(Value::Integer(9)));
        assert_eq!(mapping.describe(&secret), "SecretDocument#9");

        let unsaved = DynamicEntity::new("Document");
        assert_eq!(mapping.id_of(&unsaved), None);
        assert_eq!(mapping.describe(&unsaved), "Document");
    }

    #[test]
    fn test_superclass_cycle_terminates() {
        let mapping = MappingInformation::new()
            .with_class(ClassMapping::new("A").with_superclass("B"))
            .with_class(ClassMapping::new("B").with_superclass("A"));
        assert!(mapping.property("A", "missing").is_none());
        assert!(!mapping.is_assignable("A", "C"));
    }

    #[test]
    fn test_from_json() {
        let mapping = MappingInformation::from_json(
            r#"{
                "classes": [
                    {"name": "Document", "id_property": "id",
                     "properties": [{"name": "id", "kind": "basic"}]}
                ],
                "named_queries": {"Document.all": "SELECT d FROM Document d"}
            }"#,
        )
        .unwrap();
        assert!(mapping.class_mapping("Document").is_some());
        assert_eq!(mapping.named_query("Document.all"), Some("SELECT d FROM Document d"));

        let err = MappingInformation::from_json("{").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_named_queries() {
        assert_eq!(
            mapping().named_query("Document.all"),
            Some("SELECT d FROM Document d")
        );
        assert_eq!(mapping().named_query("missing"), None);
    }
}
