//! # Generic argument binder
//!
//! Partial application for callables whose parameters are declared by
//! name. Unlike a plain closure capture, a frozen parameter may sit
//! anywhere in the signature: the caller's positional arguments skip over
//! it and fill the remaining parameters from left to right.
//!
//! A frozen value is either concrete or *deferred*: a thunk called afresh
//! on every call (late binding), which is how injected features are
//! re-resolved per call.
//!
//! ```text
//! add(a, b)  ──bind(a = 1)──>  add'(b)
//!
//! add'(2)          == add(1, 2)
//! add'(b = 3)      == add(1, 3)
//! add'(a = 2, b=3) == add(2, 3)     keywords override frozen values
//! add'(1, b = 1)   -> DuplicateArgument("b")
//! ```
//!
//! # Examples
//! ```rust
//! use haqn_container::prelude::*;
//!
//! let add = Function::new("add", Signature::new(["a", "b"]), |args| {
//!     let a = *args.get::<i64>("a")?;
//!     let b = *args.get::<i64>("b")?;
//!     Ok(Value::new(a + 2 * b))
//! });
//!
//! let add_one = bind(&add, FrozenArguments::new().value("b", 1i64))?;
//! let out = add_one.call(Args::new().arg(2i64))?;
//! assert_eq!(out.downcast_ref::<i64>(), Some(&4));
//! # Ok::<(), HaqnError>(())
//! ```

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::{HaqnError, Result, UnsupportedSignatureError};
use crate::value::Value;

// ============================================================
// Signature
// ============================================================

/// A formal parameter.
#[derive(Clone)]
pub struct Parameter {
    name: Arc<str>,
    default: Option<Value>,
}

impl Parameter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.default.is_some() {
            write!(f, "{}=…", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// The declared shape of a [`Function`].
///
/// ```
/// use haqn_container::bind::Signature;
///
/// // def handler(self, request, retries=3, *extra, **options)
/// let sig = Signature::method("self", ["request"])
///     .param_default("retries", 3u32)
///     .variadic("extra")
///     .keywords("options");
/// assert_eq!(sig.names(), vec!["self", "request", "retries"]);
/// assert!(sig.has_receiver());
/// ```
#[derive(Clone, Default)]
pub struct Signature {
    params: Vec<Parameter>,
    receiver: bool,
    variadic: Option<Arc<str>>,
    keywords: Option<Arc<str>>,
}

impl Signature {
    /// Parameters without defaults, in order.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sig = Signature::default();
        for name in names {
            sig = sig.param(name.as_ref());
        }
        sig
    }

    /// A method: `receiver` comes first, then `names`.
    pub fn method<I, S>(receiver: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sig = Signature::new(std::iter::once(receiver.to_string()).chain(
            names.into_iter().map(|name| name.as_ref().to_string()),
        ));
        sig.receiver = true;
        sig
    }

    /// Appends a parameter without default.
    pub fn param(mut self, name: &str) -> Self {
        self.params.push(Parameter {
            name: Arc::from(name),
            default: None,
        });
        self
    }

    /// Appends a parameter with a default value.
    pub fn param_default<T: Any + Send + Sync>(mut self, name: &str, default: T) -> Self {
        self.params.push(Parameter {
            name: Arc::from(name),
            default: Some(Value::new(default)),
        });
        self
    }

    /// Accepts any number of extra positional arguments under `name`.
    /// Such a signature cannot be bound.
    pub fn variadic(mut self, name: &str) -> Self {
        self.variadic = Some(Arc::from(name));
        self
    }

    /// Collects unknown keyword arguments under `name`.
    pub fn keywords(mut self, name: &str) -> Self {
        self.keywords = Some(Arc::from(name));
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(Parameter::name).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| &*p.name == name)
    }

    /// Returns `true` if the first parameter is a method receiver.
    pub fn has_receiver(&self) -> bool {
        self.receiver && !self.params.is_empty()
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic.is_some()
    }

    pub fn accepts_keywords(&self) -> bool {
        self.keywords.is_some()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.params.iter().map(|p| format!("{p:?}")).collect();
        if let Some(rest) = &self.variadic {
            parts.push(format!("*{rest}"));
        }
        if let Some(options) = &self.keywords {
            parts.push(format!("**{options}"));
        }
        write!(f, "({})", parts.join(", "))
    }
}

// ============================================================
// Arguments
// ============================================================

/// Arguments supplied by a caller.
#[derive(Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg<T: Any + Send + Sync>(self, value: T) -> Self {
        self.arg_value(Value::new(value))
    }

    pub fn arg_value(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    /// Adds a keyword argument.
    pub fn kwarg<T: Any + Send + Sync>(self, name: &str, value: T) -> Self {
        self.kwarg_value(name, Value::new(value))
    }

    pub fn kwarg_value(mut self, name: &str, value: Value) -> Self {
        self.keywords.push((name.to_string(), value));
        self
    }
}

/// Arguments after binding, as seen by a function body.
pub struct CallArguments {
    function: Arc<str>,
    values: Vec<(Arc<str>, Value)>,
    rest: Vec<Value>,
    extra: Vec<(String, Value)>,
}

impl CallArguments {
    /// The value bound to parameter `name`.
    pub fn value(&self, name: &str) -> Result<&Value> {
        self.values
            .iter()
            .find(|(param, _)| &**param == name)
            .map(|(_, value)| value)
            .ok_or_else(|| HaqnError::UnexpectedArgument {
                function: self.function.to_string(),
                parameter: name.to_string(),
            })
    }

    /// Borrows parameter `name` as a `T`.
    pub fn get<T: Any>(&self, name: &str) -> Result<&T> {
        self.value(name)?
            .downcast_ref::<T>()
            .ok_or_else(|| self.mismatch::<T>(name))
    }

    /// Shared handle to parameter `name` as a `T`.
    pub fn arc<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.value(name)?
            .downcast::<T>()
            .ok_or_else(|| self.mismatch::<T>(name))
    }

    /// Extra positional arguments, for variadic signatures.
    pub fn rest(&self) -> &[Value] {
        &self.rest
    }

    /// Unknown keyword arguments, for signatures with a keyword sink.
    pub fn extra(&self) -> &[(String, Value)] {
        &self.extra
    }

    fn mismatch<T>(&self, name: &str) -> HaqnError {
        HaqnError::TypeMismatch {
            subject: format!("argument `{name}` of {}()", self.function),
            expected: type_name::<T>(),
        }
    }
}

// ============================================================
// Frozen arguments
// ============================================================

/// Zero-argument producer of a late-bound value.
pub type Thunk = Arc<dyn Fn() -> Result<Value> + Send + Sync>;

/// A frozen parameter value.
#[derive(Clone)]
pub enum BoundArgument {
    /// Passed as is on every call.
    Value(Value),
    /// Called on every call; the result is never cached.
    Deferred(Thunk),
}

impl BoundArgument {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        BoundArgument::Value(Value::new(value))
    }

    /// A fallible late-bound value, such as a feature lookup.
    pub fn deferred<F>(thunk: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        BoundArgument::Deferred(Arc::new(thunk))
    }

    fn resolve(&self) -> Result<Value> {
        match self {
            BoundArgument::Value(value) => Ok(value.clone()),
            BoundArgument::Deferred(thunk) => thunk(),
        }
    }
}

impl fmt::Debug for BoundArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundArgument::Value(value) => f.debug_tuple("Value").field(value).finish(),
            BoundArgument::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Marks `thunk` for re-evaluation on every call.
///
/// ```
/// use haqn_container::prelude::*;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let echo = Function::new("echo", Signature::new(["n"]), |args| {
///     Ok(Value::new(*args.get::<u32>("n")?))
/// });
///
/// let counter = Arc::new(AtomicU32::new(0));
/// let tick = {
///     let counter = counter.clone();
///     late_binding(move || counter.fetch_add(1, Ordering::SeqCst))
/// };
/// let next = echo.bind(FrozenArguments::new().with("n", tick))?;
///
/// assert_eq!(next.call(Args::new())?.downcast_ref::<u32>(), Some(&0));
/// assert_eq!(next.call(Args::new())?.downcast_ref::<u32>(), Some(&1));
/// # Ok::<(), HaqnError>(())
/// ```
pub fn late_binding<T, F>(thunk: F) -> BoundArgument
where
    T: Any + Send + Sync,
    F: Fn() -> T + Send + Sync + 'static,
{
    BoundArgument::deferred(move || Ok(Value::new(thunk())))
}

/// Parameter name → frozen value. Inserting a name twice keeps the last.
#[derive(Clone, Default)]
pub struct FrozenArguments {
    entries: Vec<(Arc<str>, BoundArgument)>,
}

impl FrozenArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freezes `name` to a concrete value.
    pub fn value<T: Any + Send + Sync>(self, name: &str, value: T) -> Self {
        self.with(name, BoundArgument::value(value))
    }

    /// Freezes `name` to a late-bound value.
    pub fn late<T, F>(self, name: &str, thunk: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.with(name, late_binding(thunk))
    }

    pub fn with(mut self, name: &str, argument: BoundArgument) -> Self {
        self.insert(Arc::from(name), argument);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(param, _)| &**param == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| &**name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: Arc<str>, argument: BoundArgument) {
        match self.entries.iter_mut().find(|(param, _)| *param == name) {
            Some(slot) => slot.1 = argument,
            None => self.entries.push((name, argument)),
        }
    }

    fn merge(&mut self, other: FrozenArguments) {
        for (name, argument) in other.entries {
            self.insert(name, argument);
        }
    }
}

impl fmt::Debug for FrozenArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, arg)| (&**name, arg)))
            .finish()
    }
}

// ============================================================
// Function
// ============================================================

type Body = Arc<dyn Fn(&CallArguments) -> Result<Value> + Send + Sync>;

/// A callable with a declared [`Signature`].
///
/// Binding never copies the body: every `Function` derived from one
/// [`Function::new`] shares it (see [`Function::same_origin`]) and carries
/// the union of everything frozen along the way.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    signature: Arc<Signature>,
    body: Body,
    receiver: Option<Value>,
    frozen: FrozenArguments,
}

impl Function {
    pub fn new<F>(name: &str, signature: Signature, body: F) -> Self
    where
        F: Fn(&CallArguments) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            signature: Arc::new(signature),
            body: Arc::new(body),
            receiver: None,
            frozen: FrozenArguments::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full declared signature, frozen parameters included.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// What has been frozen so far.
    pub fn frozen(&self) -> &FrozenArguments {
        &self.frozen
    }

    /// Returns `true` if the receiver is attached.
    pub fn is_bound_method(&self) -> bool {
        self.receiver.is_some()
    }

    /// Parameters a caller still has to (or may) supply, in order.
    pub fn free_parameters(&self) -> Vec<&str> {
        self.signature
            .parameters()
            .iter()
            .enumerate()
            .filter(|(index, p)| !self.is_frozen(*index, p))
            .map(|(_, p)| p.name())
            .collect()
    }

    /// Returns `true` if both functions derive from the same original.
    pub fn same_origin(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }

    /// Attaches the receiver of a method, like taking a bound method from
    /// an instance. The receiver is frozen for good: it cannot be passed
    /// again, positionally or by keyword, and it cannot be attached once the
    /// receiver parameter is already frozen.
    pub fn with_receiver(&self, receiver: Value) -> Result<Function> {
        if !self.signature.has_receiver() {
            return Err(self.unsupported("it has no receiver parameter"));
        }
        let name = &self.signature.params[0].name;
        if self.receiver.is_some() || self.frozen.contains(name) {
            return Err(self.duplicate(name));
        }
        Ok(Function {
            receiver: Some(receiver),
            ..self.clone()
        })
    }

    /// Freezes parameters; see [`bind`].
    pub fn bind(&self, frozen: FrozenArguments) -> Result<Function> {
        if let Some(rest) = &self.signature.variadic {
            return Err(self.unsupported(&format!(
                "variable positional parameter `*{rest}` cannot be combined with frozen parameters"
            )));
        }

        for name in frozen.names() {
            match self.signature.position(name) {
                None => return Err(self.unexpected(name)),
                Some(0) if self.receiver.is_some() => return Err(self.duplicate(name)),
                Some(_) => {}
            }
        }

        let mut merged = self.frozen.clone();
        merged.merge(frozen);
        trace!(function = %self.name, frozen = ?merged, "Bound function");

        Ok(Function {
            frozen: merged,
            ..self.clone()
        })
    }

    /// Calls the function.
    ///
    /// Deferred values are resolved first, on every call. Positional
    /// arguments then fill the parameters that are not frozen, left to
    /// right. Keywords may name any parameter, frozen or not; naming one
    /// already filled positionally is a [`HaqnError::DuplicateArgument`].
    /// Whatever is still empty takes its frozen value, then its default.
    pub fn call(&self, args: Args) -> Result<Value> {
        let resolved = self
            .frozen
            .entries
            .iter()
            .map(|(name, argument)| Ok((name.clone(), argument.resolve()?)))
            .collect::<Result<Vec<_>>>()?;

        let params = self.signature.parameters();
        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        let mut supplied = vec![false; params.len()];

        let given = args.positional.len();
        let mut positional = args.positional.into_iter();
        for (index, param) in params.iter().enumerate() {
            if self.is_frozen(index, param) {
                continue;
            }
            match positional.next() {
                Some(value) => {
                    slots[index] = Some(value);
                    supplied[index] = true;
                }
                None => break,
            }
        }

        let rest: Vec<Value> = positional.collect();
        if !rest.is_empty() && !self.signature.is_variadic() {
            return Err(HaqnError::TooManyArguments {
                function: self.name.to_string(),
                expected: self.free_parameters().len(),
                given,
            });
        }

        let mut extra: Vec<(String, Value)> = Vec::new();
        for (name, value) in args.keywords {
            match self.signature.position(&name) {
                Some(index) => {
                    if supplied[index] || (index == 0 && self.receiver.is_some()) {
                        return Err(self.duplicate(&name));
                    }
                    slots[index] = Some(value);
                    supplied[index] = true;
                }
                None if self.signature.accepts_keywords() => {
                    if extra.iter().any(|(seen, _)| *seen == name) {
                        return Err(self.duplicate(&name));
                    }
                    extra.push((name, value));
                }
                None => return Err(self.unexpected(&name)),
            }
        }

        if let Some(receiver) = &self.receiver {
            slots[0] = Some(receiver.clone());
        }
        for (name, value) in resolved {
            if let Some(index) = self.signature.position(&name) {
                slots[index].get_or_insert(value);
            }
        }

        let mut values = Vec::with_capacity(params.len());
        for (param, slot) in params.iter().zip(slots) {
            let value = match slot.or_else(|| param.default.clone()) {
                Some(value) => value,
                None => {
                    return Err(HaqnError::MissingArgument {
                        function: self.name.to_string(),
                        parameter: param.name.to_string(),
                    });
                }
            };
            values.push((param.name.clone(), value));
        }

        trace!(function = %self.name, args = values.len(), "Calling function");
        (self.body)(&CallArguments {
            function: self.name.clone(),
            values,
            rest,
            extra,
        })
    }

    /// Calls the function and downcasts the result.
    pub fn call_as<T: Any + Send + Sync>(&self, args: Args) -> Result<Arc<T>> {
        self.call(args)?
            .expect_type::<T>(format!("result of {}()", self.name))
    }

    fn is_frozen(&self, index: usize, param: &Parameter) -> bool {
        (index == 0 && self.receiver.is_some()) || self.frozen.contains(&param.name)
    }

    fn unsupported(&self, reason: &str) -> HaqnError {
        HaqnError::UnsupportedSignature(UnsupportedSignatureError {
            function: self.name.to_string(),
            reason: reason.to_string(),
        })
    }

    fn duplicate(&self, parameter: &str) -> HaqnError {
        HaqnError::DuplicateArgument {
            function: self.name.to_string(),
            parameter: parameter.to_string(),
        }
    }

    fn unexpected(&self, parameter: &str) -> HaqnError {
        HaqnError::UnexpectedArgument {
            function: self.name.to_string(),
            parameter: parameter.to_string(),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("frozen", &self.frozen)
            .field("bound_method", &self.receiver.is_some())
            .finish()
    }
}

/// Returns `function` with the parameters in `frozen` fixed.
///
/// Binding an already bound function extends its frozen set, so stacked
/// bindings end up with the union of all frozen parameters whatever the
/// order they were applied in; a name frozen twice keeps the later value.
///
/// # Errors
/// - [`HaqnError::UnsupportedSignature`] if the signature is variadic
/// - [`HaqnError::UnexpectedArgument`] if a frozen name is not a parameter
/// - [`HaqnError::DuplicateArgument`] if it names an attached receiver
pub fn bind(function: &Function, frozen: FrozenArguments) -> Result<Function> {
    function.bind(frozen)
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
