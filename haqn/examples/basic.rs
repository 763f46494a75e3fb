//! Basic tour of haqn: scopes, requests and injected parameters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use haqn::prelude::*;

// === Define your traits and types ===

trait Logger: Send + Sync {
    fn log(&self, msg: &str);
}

struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, msg: &str) {
        println!("[LOG] {msg}");
    }
}

struct RequestId(u64);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("haqn=debug,haqn_container=debug")
        .init();

    let registry = FeatureRegistry::builder()
        .default_scope(Scope::Worker)
        .build();

    // Logger: one for the whole process
    registry.provide_in(FeatureKey::of::<dyn Logger>(), Scope::Process, || {
        Arc::new(ConsoleLogger) as Arc<dyn Logger>
    });

    // Request id: one per request
    let next_id = Arc::new(AtomicU64::new(1));
    registry.provide_in("request-id", Scope::Request, move || {
        RequestId(next_id.fetch_add(1, Ordering::SeqCst))
    });

    // Scratch buffer: one per worker thread
    registry.provide("scratch", || String::with_capacity(64));

    // A handler with two injected parameters and one supplied by the caller
    let handler = Function::new("handle", Signature::new(["logger", "request", "path"]), |args| {
        let logger = args.get::<Arc<dyn Logger>>("logger")?;
        let request = args.get::<RequestId>("request")?;
        let path = args.get::<&str>("path")?;
        logger.log(&format!("request #{} → {path}", request.0));
        Ok(Value::new(request.0))
    });
    let handler = Inject::new(&registry)
        .param("logger", FeatureKey::of::<dyn Logger>())
        .param("request", "request-id")
        .apply(&handler)?;

    // === Two requests on this worker ===
    for path in ["/users/42", "/users/7"] {
        let id = registry
            .scopes()
            .in_request(|| handler.call_as::<u64>(Args::new().arg(path)))??;
        println!("🆔 handled request {id}");
    }

    // === Worker scope differs across threads ===
    let here = registry.get("scratch")?;
    let there = thread::scope(|s| s.spawn(|| registry.get("scratch")).join())
        .map_err(|_| HaqnError::failed("worker thread panicked"))??;
    println!("🧵 same scratch buffer across workers: {}", here.ptr_eq(&there));

    // === Outside a request there is no request id ===
    if let Err(e) = registry.get("request-id") {
        println!("\n{e}");
    }

    println!("\n🎉 Everything works!");
    Ok(())
}
