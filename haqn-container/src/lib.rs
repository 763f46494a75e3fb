//! Core of haqn: scoped feature resolution and argument binding.
//!
//! - [`context`] keeps per-scope instance caches and the per-worker scope stacks
//! - [`registry`] maps feature keys to factories and scopes
//! - [`bind`](mod@bind) is partial application with late-bound arguments
//! - [`guard`] and [`inject`] are thin helpers over the three above

pub mod bind;
pub mod context;
pub mod error;
pub mod guard;
pub mod inject;
pub mod key;
pub mod registry;
pub mod scope;
pub mod settings;
pub mod value;

pub use bind::{bind, late_binding};
pub use error::{HaqnError, Result};
pub use key::FeatureKey;
pub use registry::{FeatureRegistry, prelude};
pub use scope::Scope;
pub use value::Value;
