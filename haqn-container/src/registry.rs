//! # The feature registry
//!
//! Maps a [`FeatureKey`] to the factory that builds it and the [`Scope`]
//! its instances live in. Resolution goes through the registry's
//! [`ScopeManager`], which owns the instance caches.
//!
//! ```text
//! provide(key, scope, factory) ──> FeatureDescriptor
//!                                        │
//! get(key) ── descriptor ──> ScopeManager::get_or_create(scope, key, factory)
//!                                        │
//!                               cached or freshly built Value
//! ```
//!
//! # Examples
//! ```rust
//! use haqn_container::prelude::*;
//!
//! struct Mailer {
//!     host: String,
//! }
//!
//! let registry = FeatureRegistry::new();
//! registry.provide_in("mailer", Scope::Process, || Mailer {
//!     host: "smtp.local".into(),
//! });
//!
//! let mailer = registry.get_as::<Mailer>("mailer")?;
//! assert_eq!(mailer.host, "smtp.local");
//! # Ok::<(), HaqnError>(())
//! ```

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use haqn_support::rendering::suggest_similar;
use tracing::{debug, instrument, trace};

use crate::bind::{Args, Function};
use crate::context::{ScopeManager, WeakScopeManager};
use crate::error::{HaqnError, MissingFeatureError, Result};
use crate::key::FeatureKey;
use crate::scope::Scope;
use crate::settings::RegistrySettings;
use crate::value::Value;

/// Zero-argument producer of a feature instance.
///
/// `Arc` so descriptors can be cloned out of the registry and run without
/// holding any of its locks.
pub type Factory = Arc<dyn Fn() -> Result<Value> + Send + Sync>;

/// How to build a feature, and how long its instances live.
#[derive(Clone)]
pub struct FeatureDescriptor {
    pub factory: Factory,
    pub scope: Scope,
}

impl fmt::Debug for FeatureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureDescriptor")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

// ============================================================
// RegistryBuilder
// ============================================================

/// Builds a [`FeatureRegistry`].
///
/// ```rust
/// use haqn_container::prelude::*;
///
/// let registry = FeatureRegistry::builder()
///     .default_scope(Scope::Process)
///     .max_suggestions(5)
///     .build();
/// assert_eq!(registry.settings().default_scope, Scope::Process);
/// ```
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    settings: RegistrySettings,
    scopes: Option<ScopeManager>,
}

impl RegistryBuilder {
    /// Replaces all settings at once, e.g. with deserialized ones.
    pub fn settings(mut self, settings: RegistrySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Scope used by [`FeatureRegistry::provide`].
    pub fn default_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.settings.default_scope = scope.into();
        self
    }

    pub fn max_suggestions(mut self, max: usize) -> Self {
        self.settings.max_suggestions = max;
        self
    }

    /// Resolves through `scopes` instead of a private manager.
    ///
    /// Registries sharing a manager share every cached instance.
    pub fn scope_manager(mut self, scopes: ScopeManager) -> Self {
        self.scopes = Some(scopes);
        self
    }

    pub fn build(self) -> FeatureRegistry {
        debug!(
            default_scope = %self.settings.default_scope,
            shared_scopes = self.scopes.is_some(),
            "Building feature registry"
        );
        FeatureRegistry {
            features: Arc::new(DashMap::new()),
            scopes: self.scopes.unwrap_or_default(),
            settings: Arc::new(self.settings),
        }
    }
}

// ============================================================
// FeatureRegistry
// ============================================================

/// Feature key → (factory, scope).
///
/// Cheap to clone; clones are the same registry. Safe to use from any
/// number of workers at once. No internal guard is held while a factory
/// runs, so factories may themselves call [`get`](Self::get) or
/// [`provide`](Self::provide).
#[derive(Clone)]
pub struct FeatureRegistry {
    features: Arc<DashMap<FeatureKey, FeatureDescriptor>>,
    scopes: ScopeManager,
    settings: Arc<RegistrySettings>,
}

impl FeatureRegistry {
    /// Creates a registry with default settings and its own scope manager.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The manager owning this registry's instance caches.
    pub fn scopes(&self) -> &ScopeManager {
        &self.scopes
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Returns a handle that does not keep this registry alive.
    ///
    /// Closures stored inside the registry (factories, injected thunks)
    /// hold this instead of a clone, which would keep the registry and
    /// every cached instance alive forever.
    pub fn downgrade(&self) -> WeakFeatureRegistry {
        WeakFeatureRegistry {
            features: Arc::downgrade(&self.features),
            scopes: self.scopes.downgrade(),
            settings: Arc::downgrade(&self.settings),
        }
    }

    // ── Registration ──

    /// Provides `key` in the default scope.
    pub fn provide<T, F>(&self, key: impl Into<FeatureKey>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let scope = self.settings.default_scope.clone();
        self.provide_in(key, scope, factory);
    }

    /// Provides `key` in `scope`.
    ///
    /// Replaces any earlier descriptor for `key`. Instances already cached
    /// stay until their scope is cleared or exited. The scope is checked
    /// when the feature is first resolved, not here.
    pub fn provide_in<T, F>(&self, key: impl Into<FeatureKey>, scope: impl Into<Scope>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.install(key.into(), scope.into(), Arc::new(move || Ok(Value::new(factory()))));
    }

    /// Provides `key` in `scope` with a factory that may fail.
    ///
    /// A failure reaches the [`get`](Self::get) caller unchanged and nothing
    /// is cached, so the next `get` calls the factory again.
    pub fn try_provide_in<T, F>(&self, key: impl Into<FeatureKey>, scope: impl Into<Scope>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        self.install(
            key.into(),
            scope.into(),
            Arc::new(move || factory().map(Value::new)),
        );
    }

    /// Provides `key` in `scope`, built by calling `function` with no
    /// arguments.
    ///
    /// Typically `function` has its parameters injected with
    /// [`Inject`](crate::inject::Inject), so building the feature resolves
    /// its own dependencies.
    pub fn provide_function(&self, key: impl Into<FeatureKey>, scope: impl Into<Scope>, function: Function) {
        self.install(
            key.into(),
            scope.into(),
            Arc::new(move || function.call(Args::new())),
        );
    }

    fn install(&self, key: FeatureKey, scope: Scope, factory: Factory) {
        debug!(key = %key, scope = %scope, "Provided feature");
        let replaced = self.features.insert(key, FeatureDescriptor { factory, scope });
        drop(replaced);
    }

    /// Removes every descriptor. Cached instances are not touched.
    pub fn clear(&self) {
        let count = self.features.len();
        self.features.clear();
        debug!(count, "Cleared feature registry");
    }

    // ── Resolution ──

    /// Returns the instance of `key` for the calling worker.
    ///
    /// # Errors
    /// - [`HaqnError::MissingFeature`] if nothing provides `key`
    /// - [`HaqnError::UndefinedScope`] if its scope is not entered here
    /// - whatever the factory fails with
    #[instrument(skip_all, fields(key))]
    pub fn get(&self, key: impl Into<FeatureKey>) -> Result<Value> {
        let key = key.into();
        tracing::Span::current().record("key", tracing::field::display(&key));

        let descriptor = self.descriptor(&key).ok_or_else(|| self.missing(&key))?;
        trace!(scope = %descriptor.scope, "Resolving feature");

        self.scopes
            .get_or_create(&descriptor.scope, &key, || (descriptor.factory)())
    }

    /// Like [`get`](Self::get), downcast to `T`.
    pub fn get_as<T: Any + Send + Sync>(&self, key: impl Into<FeatureKey>) -> Result<Arc<T>> {
        let key = key.into();
        self.get(&key)?.expect_type::<T>(&key)
    }

    fn missing(&self, key: &FeatureKey) -> HaqnError {
        let labels: Vec<String> = self
            .features
            .iter()
            .map(|entry| entry.key().label().into_owned())
            .collect();
        let available: Vec<&str> = labels.iter().map(String::as_str).collect();

        HaqnError::MissingFeature(MissingFeatureError {
            key: key.clone(),
            suggestions: suggest_similar(&key.label(), &available, self.settings.max_suggestions),
        })
    }

    // ── Inspection ──

    /// A copy of the descriptor for `key`.
    pub fn descriptor(&self, key: &FeatureKey) -> Option<FeatureDescriptor> {
        self.features.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &FeatureKey) -> bool {
        self.features.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Provided keys, in no particular order.
    pub fn keys(&self) -> Vec<FeatureKey> {
        self.features.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// A [`FeatureRegistry`] handle that does not keep it alive.
#[derive(Clone, Debug)]
pub struct WeakFeatureRegistry {
    features: Weak<DashMap<FeatureKey, FeatureDescriptor>>,
    scopes: WeakScopeManager,
    settings: Weak<RegistrySettings>,
}

impl WeakFeatureRegistry {
    /// Returns the registry if some [`FeatureRegistry`] handle still exists.
    pub fn upgrade(&self) -> Option<FeatureRegistry> {
        Some(FeatureRegistry {
            features: self.features.upgrade()?,
            scopes: self.scopes.upgrade()?,
            settings: self.settings.upgrade()?,
        })
    }

    /// Like [`FeatureRegistry::get`], failing with
    /// [`HaqnError::RegistryDropped`] once the registry is gone.
    pub fn get(&self, key: impl Into<FeatureKey>) -> Result<Value> {
        self.upgrade().ok_or(HaqnError::RegistryDropped)?.get(key)
    }
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRegistry")
            .field("features", &self.features.len())
            .field("settings", &self.settings)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Everything needed to provide, resolve and inject features.
pub mod prelude {
    pub use super::{FeatureDescriptor, FeatureRegistry, RegistryBuilder, WeakFeatureRegistry};
    pub use crate::bind::{
        Args, BoundArgument, CallArguments, FrozenArguments, Function, Signature, bind,
        late_binding,
    };
    pub use crate::context::{Context, ContextLock, ScopeManager, WeakScopeManager};
    pub use crate::error::{HaqnError, Result};
    pub use crate::guard::ScopeGuard;
    pub use crate::inject::{Attr, Inject};
    pub use crate::key::FeatureKey;
    pub use crate::scope::Scope;
    pub use crate::settings::RegistrySettings;
    pub use crate::value::Value;
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
