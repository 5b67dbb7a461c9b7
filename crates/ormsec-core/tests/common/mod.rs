//! Shared fixture: a document/client domain and an in-memory store.

#![allow(dead_code)]

use chrono::NaiveDate;
use ormsec_core::lang::{Node, NodeKind};
use ormsec_core::{
    ClassMapping, Configuration, DynamicEntity, EntityFilter, EntityRef, EvaluationParameters,
    MappingInformation, QueryEvaluator, QueryExecutor, Result, StaticAccessRulesProvider, Value,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

pub const ALICE: &str = "alice@example.com";
pub const BOB: &str = "bob@example.com";

pub fn mapping() -> MappingInformation {
    MappingInformation::new()
        .with_class(
            ClassMapping::new("Document")
                .with_id("id")
                .with_basic("title")
                .with_basic("owner")
                .with_basic("level")
                .with_single("folder", "Folder")
                .with_collection("tags", "Tag"),
        )
        .with_class(
            ClassMapping::new("Folder")
                .with_id("id")
                .with_basic("name")
                .with_basic("owner")
                .with_collection("documents", "Document"),
        )
        .with_class(ClassMapping::new("Tag").with_id("id").with_basic("name"))
        .with_class(ClassMapping::new("Client").with_id("id").with_basic("name"))
        .with_class(
            ClassMapping::new("ClientDetails")
                .with_id("id")
                .with_basic("notes")
                .with_single("client", "Client"),
        )
        .with_class(ClassMapping::new("Employee").with_id("id").with_basic("email"))
        .with_class(
            ClassMapping::new("ClientStaffing")
                .with_id("id")
                .with_basic("endDate")
                .with_single("client", "Client")
                .with_single("employee", "Employee"),
        )
}

/// Executes SELECT statements over a list of entities with the in-memory
/// evaluator. Subselects the evaluator cannot resolve alone come back to
/// the store itself.
pub struct InMemoryStore {
    mapping: Arc<MappingInformation>,
    entities: RwLock<Vec<EntityRef>>,
    executed: AtomicUsize,
    this: Weak<InMemoryStore>,
}

impl InMemoryStore {
    pub fn new(mapping: Arc<MappingInformation>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            mapping,
            entities: RwLock::new(Vec::new()),
            executed: AtomicUsize::new(0),
            this: this.clone(),
        })
    }

    pub fn mapping(&self) -> &Arc<MappingInformation> {
        &self.mapping
    }

    pub fn add(&self, entity: EntityRef) -> EntityRef {
        self.entities.write().push(entity.clone());
        entity
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }

    fn executor(&self) -> Option<Arc<dyn QueryExecutor>> {
        self.this
            .upgrade()
            .map(|store| store as Arc<dyn QueryExecutor>)
    }

    /// An evaluator using both strategies, the session one backed by this store.
    pub fn evaluator(&self) -> QueryEvaluator {
        Configuration::new().evaluator(self.mapping.clone(), self.executor())
    }

    /// An entity filter for `rules` over this store.
    pub fn filter(&self, rules: &[&str]) -> EntityFilter {
        let configuration =
            Configuration::new().with_access_rules(StaticAccessRulesProvider::new(rules.iter().copied()));
        let compiled = configuration
            .compile_rules(&self.mapping)
            .expect("rules compile");
        EntityFilter::new(self.mapping.clone(), Arc::new(compiled), self.evaluator())
    }

    fn candidates(&self, type_name: Option<&str>) -> Vec<Value> {
        self.entities
            .read()
            .iter()
            .filter(|e| type_name.map_or(true, |t| self.mapping.is_instance(e.as_ref(), t)))
            .map(|e| Value::Entity(e.clone()))
            .collect()
    }
}

impl QueryExecutor for InMemoryStore {
    fn execute(&self, query: &str, parameters: &HashMap<String, Value>) -> Result<Vec<Value>> {
        self.executed.fetch_add(1, Ordering::Relaxed);
        let compiled = ormsec_core::lang::parse_and_compile_with(query, self.mapping.as_ref())?;
        let evaluator = self.evaluator();

        let mut rows = vec![EvaluationParameters::new().with_named_parameters(parameters)];
        for definition in &compiled.type_definitions {
            let mut next = Vec::new();
            for row in &rows {
                let candidates = match &definition.join_path {
                    Some(path) => evaluator
                        .evaluate(&Node::path_from_str(path), row)?
                        .into_value()
                        .unwrap_or(Value::Null)
                        .into_items(),
                    None => self.candidates(definition.type_name.as_deref()),
                };
                if candidates.is_empty() && !definition.inner {
                    next.push(row.clone().with_alias(definition.alias.clone(), Value::Null));
                }
                for candidate in candidates {
                    next.push(row.clone().with_alias(definition.alias.clone(), candidate));
                }
            }
            rows = next;
        }

        let distinct = compiled
            .statement
            .find_child(|k| matches!(k, NodeKind::SelectClause { distinct: true }))
            .is_some();
        let mut results: Vec<Value> = Vec::new();
        for row in rows {
            if let Some(condition) = &compiled.where_clause {
                if !evaluator.evaluate_condition(condition, &row)?.is_true() {
                    continue;
                }
            }
            let mut values = Vec::new();
            for path in &compiled.selected_paths {
                let value = evaluator
                    .evaluate(&Node::path_from_str(path), &row)?
                    .into_value()
                    .unwrap_or(Value::Null);
                values.push(value);
            }
            let value = match values.len() {
                1 => values.remove(0),
                _ => Value::Tuple(values),
            };
            if !distinct || !results.contains(&value) {
                results.push(value);
            }
        }
        Ok(results)
    }
}

/// Handles to the populated domain.
pub struct Domain {
    pub store: Arc<InMemoryStore>,
    pub documents: Vec<EntityRef>,
    pub folders: Vec<EntityRef>,
    pub tags: Vec<EntityRef>,
    pub details: Vec<EntityRef>,
    pub staffings: Vec<EntityRef>,
}

fn entity(entity: &Arc<DynamicEntity>) -> Value {
    Value::Entity(entity.clone())
}

/// Populate a store:
///
/// - documents 1 (alice, home folder), 2 (bob, shared), 3 (alice, shared)
///   and 4 (no owner, no folder);
/// - clients 1 to 3 with details sharing their ids;
/// - alice staffed on client 1 (open) and client 2 (ended), bob on client 3.
pub fn domain() -> Domain {
    let store = InMemoryStore::new(Arc::new(mapping()));

    let public = Arc::new(DynamicEntity::new("Tag").with_id("id", 1).with("name", "public"));
    let secret = Arc::new(DynamicEntity::new("Tag").with_id("id", 2).with("name", "secret"));

    let home = Arc::new(
        DynamicEntity::new("Folder")
            .with_id("id", 1)
            .with("name", "home")
            .with("owner", ALICE),
    );
    let shared = Arc::new(
        DynamicEntity::new("Folder")
            .with_id("id", 2)
            .with("name", "shared")
            .with("owner", BOB),
    );

    let document = |id: i64, title: &str, owner: Option<&str>, level: i64| {
        DynamicEntity::new("Document")
            .with_id("id", id)
            .with("title", title)
            .with("owner", owner)
            .with("level", level)
    };
    let doc1 = Arc::new(
        document(1, "plan", Some(ALICE), 1)
            .with("folder", entity(&home))
            .with("tags", vec![entity(&public)]),
    );
    let doc2 = Arc::new(
        document(2, "budget", Some(BOB), 3)
            .with("folder", entity(&shared))
            .with("tags", vec![entity(&secret)]),
    );
    let doc3 = Arc::new(
        document(3, "minutes", Some(ALICE), 2)
            .with("folder", entity(&shared))
            .with("tags", vec![entity(&public), entity(&secret)]),
    );
    let doc4 = Arc::new(document(4, "draft", None, 0));
    home.set("documents", vec![entity(&doc1)]);
    shared.set("documents", vec![entity(&doc2), entity(&doc3)]);

    let alice = Arc::new(DynamicEntity::new("Employee").with_id("id", 1).with("email", ALICE));
    let bob = Arc::new(DynamicEntity::new("Employee").with_id("id", 2).with("email", BOB));

    let mut details = Vec::new();
    let mut clients = Vec::new();
    for (id, name) in [(1, "Acme"), (2, "Globex"), (3, "Initech")] {
        let client = Arc::new(DynamicEntity::new("Client").with_id("id", id).with("name", name));
        details.push(Arc::new(
            DynamicEntity::new("ClientDetails")
                .with_id("id", id)
                .with("notes", format!("{} notes", name))
                .with("client", entity(&client)),
        ));
        clients.push(client);
    }

    let ended = NaiveDate::from_ymd_opt(2020, 1, 31).map(Value::Date);
    let staffing = |id: i64, client: &Arc<DynamicEntity>, employee: &Arc<DynamicEntity>, end: Option<Value>| {
        Arc::new(
            DynamicEntity::new("ClientStaffing")
                .with_id("id", id)
                .with("client", entity(client))
                .with("employee", entity(employee))
                .with("endDate", end.unwrap_or(Value::Null)),
        )
    };
    let staffings = vec![
        staffing(1, &clients[0], &alice, None),
        staffing(2, &clients[1], &alice, ended),
        staffing(3, &clients[2], &bob, None),
    ];

    let add = |e: &Arc<DynamicEntity>| -> EntityRef { store.add(e.clone()) };
    let tags = vec![add(&public), add(&secret)];
    let folders = vec![add(&home), add(&shared)];
    let documents = vec![add(&doc1), add(&doc2), add(&doc3), add(&doc4)];
    add(&alice);
    add(&bob);
    clients.iter().for_each(|c| {
        add(c);
    });
    let details = details.iter().map(add).collect();
    let staffings = staffings.iter().map(add).collect();

    Domain {
        store,
        documents,
        folders,
        tags,
        details,
        staffings,
    }
}

/// Describe entity values as `Type#id`, sorted, for comparisons.
pub fn describe_all(store: &InMemoryStore, values: &[Value]) -> Vec<String> {
    let mut described: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::Entity(e) => store.mapping().describe(e.as_ref()),
            other => other.to_string(),
        })
        .collect();
    described.sort();
    described
}
