//! Rewritten queries return exactly the objects the in-memory check grants.

mod common;

use common::{describe_all, domain, Domain, ALICE, BOB};
use ormsec_core::{
    AccessKind, AccessManager, Configuration, EntityFilter, QueryExecutor, SecurityContext,
    StaticSecurityContext, Value,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;

const RULE_SETS: &[&[&str]] = &[
    &["GRANT READ ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL"],
    &["GRANT READ ACCESS TO Document d WHERE d.folder.owner = CURRENT_PRINCIPAL"],
    &[
        "GRANT READ ACCESS TO Document d WHERE d.level < 2",
        "GRANT READ ACCESS TO Document d WHERE 'auditor' IN (CURRENT_ROLES)",
        "GRANT READ ACCESS TO Folder f WHERE f.owner = CURRENT_PRINCIPAL",
    ],
    &["GRANT READ ACCESS TO Document d WHERE EXISTS \
       (SELECT f FROM Folder f WHERE f = d.folder AND f.owner = CURRENT_PRINCIPAL)"],
    &["GRANT READ ACCESS TO ClientDetails cd WHERE cd.id IN \
       (SELECT cs.client.id FROM ClientStaffing cs \
        WHERE cs.employee.email = CURRENT_PRINCIPAL AND cs.endDate IS NULL)"],
];

const QUERIES: &[&str] = &[
    "SELECT d FROM Document d",
    "SELECT d FROM Document d WHERE d.level > 0",
    "SELECT DISTINCT d FROM Document d JOIN d.tags t WHERE t.name = 'secret'",
    "SELECT f FROM Folder f",
    "SELECT cd FROM ClientDetails cd",
];

fn contexts() -> Vec<SecurityContext> {
    vec![
        SecurityContext::new(ALICE),
        SecurityContext::new(BOB).with_role("staff"),
        SecurityContext::anonymous().with_role("auditor"),
    ]
}

fn filtered(domain: &Domain, filter: &EntityFilter, query: &str, context: &SecurityContext) -> Vec<String> {
    let result = filter
        .filter_query(query, AccessKind::Read, context)
        .unwrap();
    match result.query {
        Some(rewritten) => {
            let rows = domain.store.execute(&rewritten, &result.parameters).unwrap();
            describe_all(&domain.store, &rows)
        }
        None => Vec::new(),
    }
}

fn checked(domain: &Domain, filter: &EntityFilter, query: &str, context: &SecurityContext) -> Vec<String> {
    let rows = domain.store.execute(query, &HashMap::new()).unwrap();
    let readable: Vec<Value> = rows
        .into_iter()
        .filter(|row| match row {
            Value::Entity(e) => filter
                .is_accessible(AccessKind::Read, e, context)
                .unwrap(),
            _ => false,
        })
        .collect();
    describe_all(&domain.store, &readable)
}

#[test]
fn rewritten_queries_agree_with_access_checks() {
    let domain = domain();
    for rules in RULE_SETS {
        let filter = domain.store.filter(rules);
        for context in contexts() {
            for query in QUERIES {
                assert_eq!(
                    filtered(&domain, &filter, query, &context),
                    checked(&domain, &filter, query, &context),
                    "rules {:?}, principal {}, query {}",
                    rules,
                    context.principal_value(),
                    query
                );
            }
        }
    }
}

#[test]
fn read_cache_agrees_with_uncached_checks() {
    let domain = domain();
    let everything: Vec<_> = domain
        .documents
        .iter()
        .chain(&domain.folders)
        .chain(&domain.details)
        .cloned()
        .collect();

    for rules in RULE_SETS {
        for context in contexts() {
            let readable = |cache: bool| -> Vec<String> {
                let configuration = Configuration::new()
                    .with_security_context(StaticSecurityContext::new(context.clone()))
                    .with_read_cache(cache);
                let mut manager = AccessManager::new(domain.store.filter(rules), &configuration);
                // the second pass is served from the cache when enabled
                manager.filter_readable(everything.clone()).unwrap();
                let readable = manager.filter_readable(everything.clone()).unwrap();
                let values: Vec<Value> = readable.into_iter().map(Value::Entity).collect();
                describe_all(&domain.store, &values)
            };
            assert_eq!(readable(true), readable(false));
        }
    }
}
