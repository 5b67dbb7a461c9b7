//! ormsec - Row-level access control for object/relational persistence.
//!
//! Access rules are written in a query-like language and compiled against
//! the mapping model of the persistence layer:
//!
//! ```text
//! GRANT READ ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL
//! ```
//!
//! A [`SecureSession`] splices the rules into every query it executes and
//! checks the objects it loads and mutates.
//!
//! # Quick Start
//!
//! ```ignore
//! use ormsec::{Configuration, SecureSessionFactory, StaticAccessRulesProvider};
//!
//! let configuration = Configuration::new().with_access_rules(StaticAccessRulesProvider::new([
//!     "GRANT READ ACCESS TO Document d WHERE d.owner = CURRENT_PRINCIPAL",
//! ]));
//! let factory = SecureSessionFactory::new(configuration, mapping)?;
//!
//! let session = factory.create_session(persistence_session);
//! let documents = session
//!     .create_query("SELECT d FROM Document d")
//!     .get_result_list()?;
//! ```

pub mod query;
pub mod session;

pub use query::SecureQuery;
pub use session::{PersistenceSession, SecureSession, SecureSessionFactory};

pub use ormsec_core::{
    AccessKind, AccessManager, AccessRulesProvider, CheckMode, ClassMapping, Configuration,
    DefaultExceptionFactory, DynamicEntity, Entity, EntityRef, Error, EvaluatorKind,
    ExceptionFactory, FilterResult, FilterStatistics, JsonAccessRulesProvider,
    MappingInformation, Result, SecurityContext, SecurityContextProvider,
    StaticAccessRulesProvider, StaticSecurityContext, StatisticsSnapshot,
    ThreadLocalSecurityContext, Value,
};

/// Re-export the query and rule language.
pub use ormsec_lang as lang;
