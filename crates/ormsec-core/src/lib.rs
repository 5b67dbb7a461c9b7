//! ormsec Core - Access rules, evaluation, query rewriting and access checks.
//!
//! Access rules are compiled against the [`MappingInformation`] of the
//! persistence layer. Queries are rewritten by the [`EntityFilter`] so the
//! store only returns accessible objects; objects already in memory are
//! checked by the [`AccessManager`] with the three-valued
//! [`QueryEvaluator`].

pub mod access;
pub mod config;
pub mod entity;
pub mod error;
pub mod evaluator;
pub mod filter;
pub mod mapping;
pub mod path;
pub mod rules;
pub mod security;
pub mod value;

pub use access::{AccessManager, CheckMode};
pub use config::{
    AccessRulesProvider, Configuration, DefaultExceptionFactory, EvaluatorKind, ExceptionFactory,
    JsonAccessRulesProvider, StaticAccessRulesProvider,
};
pub use entity::{DynamicEntity, Entity, EntityRef};
pub use error::{Error, Result};
pub use evaluator::{
    Evaluated, EvaluationParameters, QueryEvaluator, QueryExecutor, SessionSubselectEvaluator,
    SimpleSubselectEvaluator, SubselectEvaluator,
};
pub use filter::{EntityFilter, FilterResult, FilterStatistics, StatementCache, StatisticsSnapshot};
pub use mapping::{ClassMapping, MappingInformation, PropertyKind, PropertyMapping};
pub use path::PathEvaluator;
pub use rules::{AccessRule, AccessRules, AccessRulesCompiler};
pub use security::{
    SecurityContext, SecurityContextProvider, StaticSecurityContext, ThreadLocalSecurityContext,
};
pub use value::Value;

/// Re-export the query and rule language.
pub use ormsec_lang as lang;
pub use ormsec_lang::AccessKind;
