//! Error types for haqn operations.
//!
//! Every failure is reported synchronously to the caller; nothing is
//! retried or recovered inside the container. Scope and feature errors
//! carry enough context to fix the call site without a debugger.

use std::fmt;

use haqn_support::rendering::{render_bullets, render_scope_stack};

use crate::key::FeatureKey;
use crate::scope::Scope;

/// Boxed error raised by user code (factories, thunks, function bodies).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all haqn operations.
#[derive(Debug, thiserror::Error)]
pub enum HaqnError {
    /// The scope is not entered on the calling worker.
    #[error("{}", .0)]
    UndefinedScope(UndefinedScopeError),

    /// The scope is already entered on the calling worker.
    #[error("{}", .0)]
    ScopeAlreadyEntered(ScopeAlreadyEnteredError),

    /// No factory was provided for the requested feature.
    #[error("{}", .0)]
    MissingFeature(MissingFeatureError),

    /// The callable's signature cannot be bound.
    #[error("{}", .0)]
    UnsupportedSignature(UnsupportedSignatureError),

    /// A parameter received a value twice in one call.
    #[error("{function}() got multiple values for argument `{parameter}`")]
    DuplicateArgument { function: String, parameter: String },

    /// A parameter without a default received no value.
    #[error("{function}() missing required argument `{parameter}`")]
    MissingArgument { function: String, parameter: String },

    /// A keyword (or frozen name) does not match any parameter.
    #[error("{function}() got an unexpected argument `{parameter}`")]
    UnexpectedArgument { function: String, parameter: String },

    /// More positional arguments than free parameters.
    #[error("{function}() takes {expected} positional argument(s) but {given} were given")]
    TooManyArguments {
        function: String,
        expected: usize,
        given: usize,
    },

    /// A value had another type than the one asked for.
    #[error("Type mismatch for {subject}: expected {expected}")]
    TypeMismatch {
        subject: String,
        expected: &'static str,
    },

    /// A weak registry handle outlived its registry.
    #[error("The feature registry was dropped\n  Hint: keep a FeatureRegistry handle alive while injected functions are called")]
    RegistryDropped,

    /// A factory, thunk or function body failed.
    #[error("{source}")]
    Failed {
        #[source]
        source: BoxError,
    },
}

impl HaqnError {
    /// Wraps an error raised by user code.
    pub fn failed(source: impl Into<BoxError>) -> Self {
        HaqnError::Failed {
            source: source.into(),
        }
    }

    pub(crate) fn undefined_scope(scope: &Scope, entered: Vec<Scope>) -> Self {
        HaqnError::UndefinedScope(UndefinedScopeError {
            scope: scope.clone(),
            entered,
        })
    }

    pub(crate) fn already_entered(scope: &Scope) -> Self {
        HaqnError::ScopeAlreadyEntered(ScopeAlreadyEnteredError {
            scope: scope.clone(),
        })
    }
}

/// Error when a scope is used on a worker that has not entered it.
#[derive(Debug)]
pub struct UndefinedScopeError {
    /// The scope that was requested.
    pub scope: Scope,
    /// Scopes entered on the calling worker, oldest first.
    pub entered: Vec<Scope>,
}

impl fmt::Display for UndefinedScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No scope defined for {} on this worker", self.scope)?;
        write!(f, "\n  Entered scopes: {}", render_scope_stack(&self.entered))?;
        write!(
            f,
            "\n  Hint: enter it first with ScopeManager::enter_scope({:?}) or ScopeManager::enter",
            self.scope.name()
        )
    }
}

/// Error when a scope is entered twice on the same worker.
#[derive(Debug)]
pub struct ScopeAlreadyEnteredError {
    pub scope: Scope,
}

impl fmt::Display for ScopeAlreadyEnteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope {} already entered on this worker", self.scope)?;
        write!(
            f,
            "\n  Hint: exit it first, or use clear_scope() to reset its instances"
        )
    }
}

/// Error when no factory was provided for a feature.
#[derive(Debug)]
pub struct MissingFeatureError {
    /// The feature that was requested.
    pub key: FeatureKey,
    /// Registered features with a similar label.
    pub suggestions: Vec<String>,
}

impl fmt::Display for MissingFeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No feature provided for {}", self.key)?;

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:{}", render_bullets(&self.suggestions))?;
        }

        write!(f, "\n  Hint: did you forget to call provide({})?", self.key)
    }
}

/// Error when a callable cannot be bound.
#[derive(Debug)]
pub struct UnsupportedSignatureError {
    pub function: String,
    pub reason: String,
}

impl fmt::Display for UnsupportedSignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cannot bind {}(): {}", self.function, self.reason)
    }
}

/// Convenient Result type for haqn operations.
pub type Result<T> = std::result::Result<T, HaqnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_scope_lists_entered_scopes() {
        let err = HaqnError::undefined_scope(&Scope::Request, vec![Scope::Worker, Scope::Process]);

        let msg = format!("{err}");
        assert!(msg.contains("No scope defined for Request"));
        assert!(msg.contains("Worker → Process"));
    }

    #[test]
    fn already_entered_display() {
        let err = HaqnError::already_entered(&Scope::custom("tenant"));
        assert!(format!("{err}").contains("tenant already entered"));
    }

    #[test]
    fn missing_feature_with_suggestions() {
        let err = HaqnError::MissingFeature(MissingFeatureError {
            key: FeatureKey::name("IMaler"),
            suggestions: vec!["IMailer".to_string()],
        });

        let msg = format!("{err}");
        assert!(msg.contains("No feature provided for \"IMaler\""));
        assert!(msg.contains("Did you mean"));
        assert!(msg.contains("- IMailer"));
    }

    #[test]
    fn missing_feature_without_suggestions() {
        let err = HaqnError::MissingFeature(MissingFeatureError {
            key: FeatureKey::name("IClock"),
            suggestions: vec![],
        });
        assert!(!format!("{err}").contains("Did you mean"));
    }

    #[test]
    fn failed_keeps_the_user_error() {
        let io = std::io::Error::other("disk full");
        let err = HaqnError::failed(io);
        assert_eq!(err.to_string(), "disk full");

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk full");
    }

    #[test]
    fn argument_errors_name_the_parameter() {
        let err = HaqnError::DuplicateArgument {
            function: "add".into(),
            parameter: "b".into(),
        };
        assert_eq!(err.to_string(), "add() got multiple values for argument `b`");
    }

    #[test]
    fn registry_dropped_has_a_hint() {
        let msg = HaqnError::RegistryDropped.to_string();
        assert!(msg.starts_with("The feature registry was dropped"));
        assert!(msg.contains("Hint:"));
    }
}
