//! Feature lifetime scopes.
//!
//! Scopes determine how long a resolved feature instance is reused:
//! - [`Scope::Process`]: one instance for the whole process, shared by all workers
//! - [`Scope::Worker`]: one instance per worker thread (the default)
//! - [`Scope::Call`]: a new instance on every request, never cached
//! - [`Scope::Request`], [`Scope::Session`] and [`Scope::Custom`]: one instance
//!   per entered scope; the caller decides when the scope starts and ends
//!
//! Process and Worker are installed on every worker automatically. Every
//! other cached scope has to be entered through the
//! [`ScopeManager`](crate::context::ScopeManager) first.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Defines the lifetime of a feature instance.
///
/// Scopes are written and parsed by name, so they can live in
/// configuration files:
///
/// ```
/// use haqn_container::scope::Scope;
///
/// assert_eq!(Scope::from("Process"), Scope::Process);
/// assert_eq!(Scope::from("tenant"), Scope::custom("tenant"));
/// assert_eq!(Scope::Request.to_string(), "Request");
/// assert!(!Scope::Call.is_cached());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scope {
    /// One instance shared by every worker of the process.
    ///
    /// Creation is serialized by the process-wide lock so concurrent first
    /// requests still build a single instance.
    ///
    /// # When to use
    /// - Connection pools
    /// - Configuration snapshots
    Process,

    /// One instance per worker thread.
    ///
    /// No lock is taken: each worker has a private cache.
    #[default]
    Worker,

    /// A fresh instance on every request. Nothing is cached and no scope
    /// needs to be entered.
    Call,

    /// One instance per request, between `enter_scope` and `exit_scope`.
    Request,

    /// One instance per session. Pass the session's own context back in on
    /// every entry to keep its instances.
    Session,

    /// A user-defined scope, identified by name.
    Custom(Arc<str>),
}

impl Scope {
    /// Creates a user-defined scope. Built-in names map to their variant.
    pub fn custom(name: impl AsRef<str>) -> Self {
        Scope::from(name.as_ref())
    }

    /// Returns the scope name.
    pub fn name(&self) -> &str {
        match self {
            Scope::Process => "Process",
            Scope::Worker => "Worker",
            Scope::Call => "Call",
            Scope::Request => "Request",
            Scope::Session => "Session",
            Scope::Custom(name) => &**name,
        }
    }

    /// Returns `true` if this scope caches instances.
    ///
    /// Only [`Scope::Call`] does not.
    #[inline]
    pub fn is_cached(&self) -> bool {
        !matches!(self, Scope::Call)
    }

    /// Returns `true` for the scopes every worker starts with.
    #[inline]
    pub fn is_preinstalled(&self) -> bool {
        matches!(self, Scope::Process | Scope::Worker)
    }

    /// Returns `true` for all variants except [`Scope::Custom`].
    #[inline]
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Scope::Custom(_))
    }
}

impl From<&str> for Scope {
    fn from(name: &str) -> Self {
        match name {
            "Process" => Scope::Process,
            "Worker" => Scope::Worker,
            "Call" => Scope::Call,
            "Request" => Scope::Request,
            "Session" => Scope::Session,
            other => Scope::Custom(Arc::from(other)),
        }
    }
}

impl From<String> for Scope {
    fn from(name: String) -> Self {
        Scope::from(name.as_str())
    }
}

impl From<&Scope> for Scope {
    fn from(scope: &Scope) -> Self {
        scope.clone()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.name().to_string()
    }
}

impl AsRef<str> for Scope {
    fn as_ref(&self) -> &str {
        self.name()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_round_trip() {
        for scope in [
            Scope::Process,
            Scope::Worker,
            Scope::Call,
            Scope::Request,
            Scope::Session,
        ] {
            assert_eq!(Scope::from(scope.name()), scope);
            assert!(scope.is_builtin());
        }
    }

    #[test]
    fn unknown_names_are_custom() {
        let scope = Scope::from("oops");
        assert_eq!(scope, Scope::Custom(Arc::from("oops")));
        assert!(!scope.is_builtin());
        assert_eq!(scope.name(), "oops");
    }

    #[test]
    fn custom_with_builtin_name_is_builtin() {
        assert_eq!(Scope::custom("Session"), Scope::Session);
    }

    #[test]
    fn only_call_is_uncached() {
        assert!(Scope::Process.is_cached());
        assert!(Scope::Worker.is_cached());
        assert!(Scope::custom("tenant").is_cached());
        assert!(!Scope::Call.is_cached());
    }

    #[test]
    fn preinstalled_scopes() {
        assert!(Scope::Process.is_preinstalled());
        assert!(Scope::Worker.is_preinstalled());
        assert!(!Scope::Request.is_preinstalled());
        assert!(!Scope::Call.is_preinstalled());
    }

    #[test]
    fn default_is_worker() {
        assert_eq!(Scope::default(), Scope::Worker);
    }

    #[test]
    fn serializes_as_name() {
        let json = serde_json::to_string(&Scope::Session).unwrap();
        assert_eq!(json, "\"Session\"");

        let scope: Scope = serde_json::from_str("\"tenant\"").unwrap();
        assert_eq!(scope, Scope::custom("tenant"));
    }
}
