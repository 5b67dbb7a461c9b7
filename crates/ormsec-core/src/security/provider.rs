//! Sources of the current security context.

use super::context::SecurityContext;
use crate::error::Result;
use std::cell::RefCell;

/// Supplies the security context for the current call.
pub trait SecurityContextProvider: Send + Sync {
    fn security_context(&self) -> Result<SecurityContext>;
}

/// Always returns the same context.
#[derive(Debug, Clone, Default)]
pub struct StaticSecurityContext {
    context: SecurityContext,
}

impl StaticSecurityContext {
    pub fn new(context: SecurityContext) -> Self {
        Self { context }
    }
}

impl SecurityContextProvider for StaticSecurityContext {
    fn security_context(&self) -> Result<SecurityContext> {
        Ok(self.context.clone())
    }
}

thread_local! {
    static CURRENT: RefCell<Option<SecurityContext>> = const { RefCell::new(None) };
}

/// Reads the context installed on the current thread; anonymous when none is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLocalSecurityContext;

impl ThreadLocalSecurityContext {
    /// Install a context for the current thread, returning the previous one.
    pub fn set(context: SecurityContext) -> Option<SecurityContext> {
        CURRENT.with(|current| current.borrow_mut().replace(context))
    }

    /// Remove the context of the current thread.
    pub fn clear() -> Option<SecurityContext> {
        CURRENT.with(|current| current.borrow_mut().take())
    }

    /// Run `f` with `context` installed, restoring the previous context afterwards.
    pub fn run_as<T>(context: SecurityContext, f: impl FnOnce() -> T) -> T {
        struct Restore(Option<SecurityContext>);

        impl Drop for Restore {
            fn drop(&mut self) {
                let previous = self.0.take();
                CURRENT.with(|current| *current.borrow_mut() = previous);
            }
        }

        let _restore = Restore(Self::set(context));
        f()
    }
}

impl SecurityContextProvider for ThreadLocalSecurityContext {
    fn security_context(&self) -> Result<SecurityContext> {
        Ok(CURRENT
            .with(|current| current.borrow().clone())
            .unwrap_or_else(SecurityContext::anonymous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_static_provider() {
        let provider = StaticSecurityContext::new(SecurityContext::new("alice"));
        assert_eq!(
            provider.security_context().unwrap().principal,
            Some(Value::from("alice"))
        );
    }

    #[test]
    fn test_thread_local_run_as_restores() {
        let provider = ThreadLocalSecurityContext;
        assert!(provider.security_context().unwrap().is_anonymous());

        ThreadLocalSecurityContext::run_as(SecurityContext::new("alice"), || {
            assert_eq!(
                provider.security_context().unwrap().principal_value(),
                Value::from("alice")
            );
            ThreadLocalSecurityContext::run_as(SecurityContext::new("bob"), || {
                assert_eq!(
                    provider.security_context().unwrap().principal_value(),
                    Value::from("bob")
                );
            });
            assert_eq!(
                provider.security_context().unwrap().principal_value(),
                Value::from("alice")
            );
        });
        assert!(provider.security_context().unwrap().is_anonymous());
    }

    #[test]
    fn test_thread_local_is_per_thread() {
        ThreadLocalSecurityContext::set(SecurityContext::new("alice"));
        let other = std::thread::spawn(|| {
            ThreadLocalSecurityContext
                .security_context()
                .unwrap()
                .is_anonymous()
        })
        .join()
        .unwrap();
        assert!(other);
        assert_eq!(
            ThreadLocalSecurityContext::clear().and_then(|c| c.principal),
            Some(Value::from("alice"))
        );
    }
}
