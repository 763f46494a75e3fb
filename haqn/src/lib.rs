//! # haqn — scoped feature injection for Rust
//!
//! Provide features under a key, resolve them per lifetime scope, and
//! inject them into functions as late-bound arguments.
//!
//! ```rust
//! use haqn::prelude::*;
//!
//! let registry = FeatureRegistry::new();
//! registry.provide_in("db-url", Scope::Process, || String::from("postgres://localhost/app"));
//!
//! let connect = Function::new("connect", Signature::new(["url", "timeout"]), |args| {
//!     Ok(Value::new(format!("{} ({}s)", args.get::<String>("url")?, args.get::<u32>("timeout")?)))
//! });
//! let connect = Inject::new(&registry).param("url", "db-url").apply(&connect)?;
//!
//! let conn = connect.call_as::<String>(Args::new().arg(5u32))?;
//! assert_eq!(*conn, "postgres://localhost/app (5s)");
//! # Ok::<(), HaqnError>(())
//! ```

pub use haqn_container::*;
pub use haqn_support::*;
