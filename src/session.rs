//! Per-thread ambient session for callers that cannot thread a
//! `SessionContext` through their own code.
//!
//! The stores never read this; they take `Option<&SessionContext>`. Use
//! `get()` at the boundary (a CLI invocation, a request handler) and pass the
//! result down explicitly.

use std::cell::RefCell;

use time::Date;

pub use tenantledger_core::session::{resolve_tenant, SessionContext, SessionUpdate, DEFAULT_TENANT};

thread_local! {
    static CURRENT: RefCell<Option<SessionContext>> = const { RefCell::new(None) };
}

/// Replaces the calling thread's session.
pub fn set(tenant_name: &str, action_date: Date, value_date: Date, user_id: &str, user_name: &str) {
    set_context(SessionContext::new(tenant_name, action_date, value_date, user_id, user_name));
}

pub fn set_context(context: SessionContext) {
    CURRENT.with(|current| *current.borrow_mut() = Some(context));
}

/// A copy of the calling thread's session, if one was set.
pub fn get() -> Option<SessionContext> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Merges `update` into the current session. No-op when none is set.
pub fn update(update: SessionUpdate) {
    CURRENT.with(|current| {
        if let Some(context) = current.borrow_mut().as_mut() {
            context.apply(update);
        }
    });
}

pub fn clear() -> Option<SessionContext> {
    CURRENT.with(|current| current.borrow_mut().take())
}

/// Runs `f` with `context` installed, then restores whatever was there
/// before, including on unwind.
pub fn scoped<T>(context: SessionContext, f: impl FnOnce() -> T) -> T {
    struct Restore(Option<SessionContext>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            let _ = CURRENT.try_with(|current| *current.borrow_mut() = previous);
        }
    }

    let previous = CURRENT.with(|current| current.borrow_mut().replace(context));
    let _restore = Restore(previous);
    f()
}
