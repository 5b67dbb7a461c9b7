//! The type model the compiler validates statements against.

/// Shape of a property as far as path navigation is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyType {
    /// A scalar value; paths end here.
    Basic,
    /// A reference to a single entity of the named type.
    Entity(String),
    /// A collection of entities of the named type.
    Collection(String),
}

impl PropertyType {
    /// Entity type reached through this property, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            PropertyType::Basic => None,
            PropertyType::Entity(target) | PropertyType::Collection(target) => Some(target),
        }
    }
}

/// Entity types and their properties.
pub trait TypeModel {
    /// Whether an entity type with this name exists.
    fn has_entity(&self, entity: &str) -> bool;

    /// Type of `property` on `entity`, including inherited properties.
    fn property_type(&self, entity: &str, property: &str) -> Option<PropertyType>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Small in-memory model used by the compiler tests.
    #[derive(Default)]
    pub(crate) struct TestModel {
        entities: HashMap<String, HashMap<String, PropertyType>>,
    }

    impl TestModel {
        pub(crate) fn with_entity(mut self, name: &str, properties: &[(&str, PropertyType)]) -> Self {
            self.entities.insert(
                name.to_string(),
                properties
                    .iter()
                    .map(|(p, t)| (p.to_string(), t.clone()))
                    .collect(),
            );
            self
        }

        pub(crate) fn documents() -> Self {
            TestModel::default()
                .with_entity(
                    "Document",
                    &[
                        ("id", PropertyType::Basic),
                        ("title", PropertyType::Basic),
                        ("owner", PropertyType::Basic),
                        ("folder", PropertyType::Entity("Folder".into())),
                        ("tags", PropertyType::Collection("Tag".into())),
                    ],
                )
                .with_entity(
                    "Folder",
                    &[
                        ("name", PropertyType::Basic),
                        ("documents", PropertyType::Collection("Document".into())),
                    ],
                )
                .with_entity("Tag", &[("name", PropertyType::Basic)])
        }
    }

    impl TypeModel for TestModel {
        fn has_entity(&self, entity: &str) -> bool {
            self.entities.contains_key(entity)
        }

        fn property_type(&self, entity: &str, property: &str) -> Option<PropertyType> {
            self.entities.get(entity)?.get(property).cloned()
        }
    }

    #[test]
    fn test_property_targets() {
        let model = TestModel::documents();
        assert!(model.has_entity("Folder"));
        assert_eq!(
            model.property_type("Document", "tags").unwrap().target(),
            Some("Tag")
        );
        assert_eq!(model.property_type("Document", "title").unwrap().target(), None);
        assert!(model.property_type("Document", "missing").is_none());
    }
}
