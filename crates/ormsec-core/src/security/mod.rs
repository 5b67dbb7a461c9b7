//! Security context handling.
//!
//! The caller's identity reaches the security layer as an explicit
//! [`SecurityContext`] value: principal, roles, optional tenant and
//! free-form attributes. Access rules refer to it through
//! `CURRENT_PRINCIPAL`, `CURRENT_ROLES`, `CURRENT_TENANT` and named
//! parameters.
//!
//! Sessions obtain the context from a [`SecurityContextProvider`]. The
//! [`ThreadLocalSecurityContext`] adapter serves applications that set the
//! current user at a request boundary.
//!
//! # Example
//!
//! ```
//! use ormsec_core::security::{SecurityContext, SecurityContextProvider, ThreadLocalSecurityContext};
//!
//! let context = SecurityContext::new("alice").with_role("editor");
//! let provider = ThreadLocalSecurityContext;
//! ThreadLocalSecurityContext::run_as(context, || {
//!     let current = provider.security_context().unwrap();
//!     assert!(current.has_role("editor"));
//! });
//! ```

pub mod context;
pub mod provider;

pub use context::SecurityContext;
pub use provider::{SecurityContextProvider, StaticSecurityContext, ThreadLocalSecurityContext};
