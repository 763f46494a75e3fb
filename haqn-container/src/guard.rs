//! Scoped acquisition: enter a scope for the length of a unit of work.
//!
//! ```rust
//! use haqn_container::prelude::*;
//!
//! let registry = FeatureRegistry::new();
//! registry.provide_in("request-id", Scope::Request, || 17u64);
//!
//! let id = registry.scopes().in_request(|| registry.get_as::<u64>("request-id"))??;
//! assert_eq!(*id, 17);
//!
//! // Outside the request the feature has no scope to live in.
//! assert!(registry.get("request-id").is_err());
//! # Ok::<(), HaqnError>(())
//! ```

use std::fmt;
use std::marker::PhantomData;

use tracing::warn;

use crate::context::{Context, ContextLock, ScopeManager};
use crate::error::Result;
use crate::scope::Scope;

/// Keeps a scope entered on the current worker until dropped.
///
/// Dropping the guard exits the scope, also while unwinding from a panic.
/// The guard is `!Send`: the scope belongs to the worker that entered it.
#[must_use = "the scope is exited as soon as the guard is dropped"]
pub struct ScopeGuard {
    manager: ScopeManager,
    scope: Scope,
    active: bool,
    _worker: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The context backing the guarded scope.
    pub fn context(&self) -> Result<Context> {
        self.manager.context(&self.scope)
    }

    /// Exits now, reporting a failure instead of logging it.
    pub fn exit(mut self) -> Result<()> {
        self.active = false;
        self.manager.exit_scope(&self.scope)
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(e) = self.manager.exit_scope(&self.scope) {
            warn!(scope = %self.scope, error = %e, "Scope guard could not exit its scope");
        }
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("scope", &self.scope)
            .field("active", &self.active)
            .finish()
    }
}

impl ScopeManager {
    /// Enters `scope` with a fresh context until the guard drops.
    pub fn enter(&self, scope: impl Into<Scope>) -> Result<ScopeGuard> {
        self.enter_with(scope, None, None)
    }

    /// Enters `scope` with `context` (and `lock`, when shared) until the
    /// guard drops. See [`ScopeManager::enter_scope_with`].
    pub fn enter_with(
        &self,
        scope: impl Into<Scope>,
        context: Option<Context>,
        lock: Option<ContextLock>,
    ) -> Result<ScopeGuard> {
        let scope = scope.into();
        self.enter_scope_with(scope.clone(), context, lock)?;
        Ok(ScopeGuard {
            manager: self.clone(),
            scope,
            active: true,
            _worker: PhantomData,
        })
    }

    /// Runs `f` with `scope` entered.
    pub fn scoped<R>(&self, scope: impl Into<Scope>, f: impl FnOnce() -> R) -> Result<R> {
        let guard = self.enter(scope)?;
        let out = f();
        guard.exit()?;
        Ok(out)
    }

    /// Runs `f` as one request: [`Scope::Request`] is entered before and
    /// exited after, so every request gets its own request-scoped
    /// instances.
    pub fn in_request<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.scoped(Scope::Request, f)
    }
}
