//! Navigation of entity graphs along dotted property paths.

use crate::entity::{identity_key, EntityRef};
use crate::error::{Error, Result};
use crate::mapping::MappingInformation;
use crate::value::Value;
use std::collections::HashSet;

/// Walks entity graphs along paths such as `folder.owner.name`.
///
/// Paths given here do not include the root alias; the caller resolves the
/// alias and passes the bound value as the root.
#[derive(Clone, Copy)]
pub struct PathEvaluator<'m> {
    mapping: &'m MappingInformation,
}

impl<'m> PathEvaluator<'m> {
    pub fn new(mapping: &'m MappingInformation) -> Self {
        Self { mapping }
    }

    /// Evaluate a path on a single root.
    ///
    /// A null intermediate value yields null. Once a collection-valued
    /// property is crossed the result is the flattened collection of
    /// everything reachable from it.
    pub fn evaluate(&self, root: &Value, path: &str) -> Result<Value> {
        let mut current = root.clone();
        let mut segments = segments(path);
        while let Some(segment) = segments.next() {
            current = match current {
                Value::Null => return Ok(Value::Null),
                Value::Collection(items) => {
                    let rest: Vec<&str> = std::iter::once(segment).chain(segments).collect();
                    let values = self.evaluate_all(&items, &rest.join("."))?;
                    return Ok(Value::Collection(values));
                }
                other => self.step(&other, segment)?,
            };
        }
        Ok(current)
    }

    /// Evaluate a path on every root, collecting the non-null results.
    ///
    /// Collection-valued intermediate and final properties are flattened
    /// one level; null values are skipped. An entity reached from more
    /// than one value of the previous step is yielded once.
    pub fn evaluate_all(&self, roots: &[Value], path: &str) -> Result<Vec<Value>> {
        let mut current: Vec<Value> = roots
            .iter()
            .filter(|v| !v.is_null())
            .cloned()
            .collect();
        for segment in segments(path) {
            let merging = current.len() > 1;
            let mut visited = HashSet::new();
            let mut next = Vec::with_capacity(current.len());
            let mut push = |value: Value| {
                let first_visit = match &value {
                    Value::Null => false,
                    Value::Entity(entity) if merging => visited.insert(identity_key(entity)),
                    _ => true,
                };
                if first_visit {
                    next.push(value);
                }
            };
            for value in &current {
                match self.step(value, segment)? {
                    Value::Collection(items) => items.into_iter().for_each(&mut push),
                    other => push(other),
                }
            }
            current = next;
        }
        Ok(current)
    }

    /// Read one property of an entity value.
    fn step(&self, value: &Value, segment: &str) -> Result<Value> {
        let Value::Entity(entity) = value else {
            return Err(Error::Mapping(format!(
                "cannot navigate '{}' on a {} value",
                segment,
                value.type_name()
            )));
        };
        self.read_property(entity, segment)
    }

    fn read_property(&self, entity: &EntityRef, property: &str) -> Result<Value> {
        let name = entity.entity_name();
        match self.mapping.class_mapping(name) {
            Some(_) => {
                if self.mapping.property(name, property).is_none() {
                    return Err(unknown_property(name, property));
                }
                Ok(entity.property(property).unwrap_or(Value::Null))
            }
            // Unmapped objects are read as far as they expose the property.
            None => entity
                .property(property)
                .ok_or_else(|| unknown_property(name, property)),
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

fn unknown_property(entity: &str, property: &str) -> Error {
    Error::Mapping(format!(
        "unknown property '{}' on entity '{}'",
        property, entity
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::DynamicEntity;
    use crate::mapping::ClassMapping;
    use std::sync::Arc;

    fn mapping() -> MappingInformation {
        MappingInformation::new()
            .with_class(
                ClassMapping::new("Document")
                    .with_id("id")
                    .with_basic("title")
                    .with_single("folder", "Folder")
                    .with_collection("tags", "Tag"),
            )
            .with_class(
                ClassMapping::new("Folder")
                    .with_id("id")
                    .with_basic("name")
                    .with_single("parent", "Folder")
                    .with_collection("documents", "Document"),
            )
            .with_class(ClassMapping::new("Tag").with_id("id").with_basic("name"))
    }

    fn tag(name: &str) -> Value {
        Value::Entity(DynamicEntity::new("Tag").with_id("id", name).with("name", name).into_ref())
    }

    fn graph() -> (Value, Value) {
        let root = Arc::new(DynamicEntity::new("Folder").with_id("id", 1).with("name", "root"));
        let folder = Arc::new(
            DynamicEntity::new("Folder")
                .with_id("id", 2)
                .with("name", "docs")
                .with("parent", Value::Entity(root.clone())),
        );
        let doc = DynamicEntity::new("Document")
            .with_id("id", 10)
            .with("title", "readme")
            .with("folder", Value::Entity(folder.clone()))
            .with("tags", vec![tag("a"), tag("b")])
            .into_ref();
        let orphan = DynamicEntity::new("Document")
            .with_id("id", 11)
            .with("title", "orphan")
            .with("folder", Value::Null)
            .with("tags", Vec::<Value>::new())
            .into_ref();
        folder.set("documents", vec![Value::Entity(doc.clone()), Value::Entity(orphan.clone())]);
        (Value::Entity(doc), Value::Entity(orphan))
    }

    #[test]
    fn test_single_valued_paths() {
        let mapping = mapping();
        let evaluator = PathEvaluator::new(&mapping);
        let (doc, orphan) = graph();

        assert_eq!(
            evaluator.evaluate(&doc, "folder.parent.name").unwrap(),
            Value::from("root")
        );
        assert_eq!(evaluator.evaluate(&orphan, "folder.name").unwrap(), Value::Null);
        assert_eq!(evaluator.evaluate(&doc, "").unwrap(), doc);
    }

    #[test]
    fn test_collection_paths() {
        let mapping = mapping();
        let evaluator = PathEvaluator::new(&mapping);
        let (doc, orphan) = graph();

        assert_eq!(
            evaluator.evaluate(&doc, "tags.name").unwrap(),
            Value::Collection(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(
            evaluator
                .evaluate_all(&[doc.clone(), orphan.clone(), Value::Null], "folder.name")
                .unwrap(),
            vec![Value::from("docs")]
        );
        assert_eq!(
            evaluator.evaluate_all(&[doc, orphan], "tags").unwrap().len(),
            2
        );
    }

    #[test]
    fn test_path_associativity() {
        let mapping = mapping();
        let evaluator = PathEvaluator::new(&mapping);
        let (doc, _) = graph();

        let folder = evaluator.evaluate(&doc, "folder").unwrap();
        assert_eq!(
            evaluator.evaluate(&folder, "parent.name").unwrap(),
            evaluator.evaluate(&doc, "folder.parent.name").unwrap()
        );
        let documents = evaluator.evaluate_all(&[folder], "documents").unwrap();
        assert_eq!(
            evaluator.evaluate_all(&documents, "title").unwrap(),
            vec![Value::from("readme"), Value::from("orphan")]
        );
    }

    #[test]
    fn test_shared_entities_are_yielded_once() {
        let mapping = mapping();
        let evaluator = PathEvaluator::new(&mapping);
        let (doc, orphan) = graph();

        let folder = evaluator.evaluate(&doc, "folder").unwrap();
        let sibling = DynamicEntity::new("Document")
            .with_id("id", 12)
            .with("title", "sibling")
            .with("folder", folder.clone())
            .with("tags", Vec::<Value>::new())
            .into_ref();
        let roots = [doc.clone(), Value::Entity(sibling)];
        assert_eq!(
            evaluator.evaluate_all(&roots, "folder").unwrap(),
            vec![folder.clone()]
        );

        // the cycle back to the folder does not multiply candidates
        assert_eq!(
            evaluator.evaluate_all(&roots, "folder.documents.folder").unwrap(),
            vec![folder]
        );

        // equal plain values are kept
        assert_eq!(
            evaluator.evaluate_all(&[doc, orphan], "title").unwrap().len(),
            2
        );
    }

    #[test]
    fn test_unknown_segment() {
        let mapping = mapping();
        let evaluator = PathEvaluator::new(&mapping);
        let (doc, _) = graph();

        let err = evaluator.evaluate(&doc, "folder.missing").unwrap_err();
        assert!(matches!(err, Error::Mapping(ref m) if m.contains("'missing' on entity 'Folder'")));
        assert!(evaluator.evaluate(&doc, "title.length").is_err());
    }
}
