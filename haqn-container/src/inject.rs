//! Injection helpers over [`FeatureRegistry::get`] and [`bind`](crate::bind::bind).
//!
//! - [`Attr`] is a typed field accessor: a struct keeps an `Attr<T>` and
//!   resolves it against a registry when it needs the feature.
//! - [`Inject`] freezes function parameters to late-bound feature lookups,
//!   so every call resolves them again in the caller's scopes.
//!
//! # Examples
//! ```rust
//! use haqn_container::prelude::*;
//!
//! let registry = FeatureRegistry::new();
//! registry.provide("greeting", || String::from("hello"));
//!
//! let greet = Function::new("greet", Signature::new(["greeting", "name"]), |args| {
//!     let greeting = args.get::<String>("greeting")?;
//!     Ok(Value::new(format!("{greeting} {}", args.get::<&str>("name")?)))
//! });
//!
//! let greet = Inject::new(&registry).param("greeting", "greeting").apply(&greet)?;
//! let out = greet.call_as::<String>(Args::new().arg("world"))?;
//! assert_eq!(*out, "hello world");
//! # Ok::<(), HaqnError>(())
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use crate::bind::{BoundArgument, FrozenArguments, Function};
use crate::error::Result;
use crate::key::FeatureKey;
use crate::registry::FeatureRegistry;

/// A feature-backed field.
///
/// ```rust
/// use haqn_container::prelude::*;
/// use std::sync::Arc;
///
/// struct Client {
///     service: Attr<String>,
/// }
///
/// let registry = FeatureRegistry::new();
/// registry.provide("IService", || String::from("service"));
///
/// let client = Client { service: Attr::new("IService") };
/// let first: Arc<String> = client.service.get(&registry)?;
/// assert!(Arc::ptr_eq(&first, &client.service.get(&registry)?));
/// # Ok::<(), HaqnError>(())
/// ```
pub struct Attr<T> {
    key: FeatureKey,
    _type: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Attr<T> {
    pub fn new(key: impl Into<FeatureKey>) -> Self {
        Self {
            key: key.into(),
            _type: PhantomData,
        }
    }

    pub fn key(&self) -> &FeatureKey {
        &self.key
    }

    /// Resolves the feature in the calling worker's scopes.
    pub fn get(&self, registry: &FeatureRegistry) -> Result<Arc<T>> {
        registry.get_as::<T>(&self.key)
    }
}

impl<T> Clone for Attr<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Attr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Attr").field(&self.key).finish()
    }
}

/// Freezes parameters of a [`Function`] to features of a registry.
///
/// Applying to an already injected function adds to its injections:
/// stacked `Inject`s compose in any order.
#[derive(Clone)]
pub struct Inject {
    registry: FeatureRegistry,
    params: Vec<(String, FeatureKey)>,
}

impl Inject {
    pub fn new(registry: &FeatureRegistry) -> Self {
        Self {
            registry: registry.clone(),
            params: Vec::new(),
        }
    }

    /// Injects feature `key` into parameter `name`.
    pub fn param(mut self, name: &str, key: impl Into<FeatureKey>) -> Self {
        self.params.push((name.to_string(), key.into()));
        self
    }

    /// Returns `function` with the parameters injected.
    ///
    /// The injected function only holds a weak handle to the registry, so
    /// it can be provided back into that registry. Calling it after the
    /// last registry handle is dropped fails with
    /// [`HaqnError::RegistryDropped`](crate::error::HaqnError::RegistryDropped).
    ///
    /// # Errors
    /// Same as [`bind`](crate::bind::bind): the function must not be
    /// variadic and every parameter name must exist.
    pub fn apply(&self, function: &Function) -> Result<Function> {
        let frozen = self
            .params
            .iter()
            .fold(FrozenArguments::new(), |frozen, (name, key)| {
                let registry = self.registry.downgrade();
                let key = key.clone();
                frozen.with(name, BoundArgument::deferred(move || registry.get(&key)))
            });

        trace!(function = function.name(), injected = frozen.len(), "Injecting parameters");
        function.bind(frozen)
    }
}

impl fmt::Debug for Inject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inject").field("params", &self.params).finish()
    }
}
