//! Type-erased instances and argument values.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use crate::error::{HaqnError, Result};

/// A shared, type-erased value.
///
/// Feature instances, frozen arguments and call results are all `Value`s.
/// Cloning is a reference-count bump; two clones are the *same* instance
/// (see [`Value::ptr_eq`]).
///
/// # Examples
/// ```
/// use haqn_container::value::Value;
///
/// let a = Value::new(41u32);
/// let b = a.clone();
/// assert!(a.ptr_eq(&b));
/// assert_eq!(a.downcast_ref::<u32>(), Some(&41));
/// assert!(a.downcast_ref::<i64>().is_none());
/// ```
#[derive(Clone)]
pub struct Value(Arc<dyn Any + Send + Sync>);

impl Value {
    /// Wraps `value`.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Value(Arc::new(value))
    }

    /// Wraps an existing `Arc` without re-allocating.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Value(value)
    }

    /// Returns `true` if the inner value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        (*self.0).is::<T>()
    }

    /// Borrows the inner value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).downcast_ref::<T>()
    }

    /// Returns a typed handle to the inner value.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Like [`Value::downcast`], but fails with
    /// [`HaqnError::TypeMismatch`] naming `subject`.
    pub fn expect_type<T: Any + Send + Sync>(&self, subject: impl fmt::Display) -> Result<Arc<T>> {
        self.downcast::<T>().ok_or_else(|| HaqnError::TypeMismatch {
            subject: subject.to_string(),
            expected: type_name::<T>(),
        })
    }

    /// Returns `true` if both values are the same instance.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}
