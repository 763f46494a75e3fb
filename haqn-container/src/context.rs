//! # The context store
//!
//! Instance caches for entered scopes, and the per-worker stack that says
//! which scopes are entered.
//!
//! # Architecture
//! ```text
//! ScopeManager (Send + Sync, cheap to clone)
//!   ├── process Context + ContextLock      shared by every worker
//!   └── per worker thread id: ContextStack
//!         Worker   → private Context, no lock
//!         Process  → the shared Context, the shared lock
//!         Request  → entered by the caller, exited by the caller
//!         ...
//! ```
//!
//! A worker's stack is created on its first operation against a manager
//! and dropped when the worker thread ends, when the worker calls
//! [`ScopeManager::release_worker`], or with the manager itself. Nothing is global: two
//! managers share process-wide instances only when they were built with
//! the same [`Context`] through [`ScopeManager::with_process`].
//!
//! # Examples
//! ```rust
//! use haqn_container::prelude::*;
//!
//! let scopes = ScopeManager::new();
//! let key = FeatureKey::name("request-id");
//!
//! scopes.enter_scope(Scope::Request)?;
//! let first = scopes.get_or_create(&Scope::Request, &key, || Ok(Value::new(7u64)))?;
//! let again = scopes.get_or_create(&Scope::Request, &key, || Ok(Value::new(8u64)))?;
//! assert!(first.ptr_eq(&again));
//! scopes.exit_scope(Scope::Request)?;
//!
//! assert!(scopes.get_or_create(&Scope::Request, &key, || Ok(Value::new(9u64))).is_err());
//! # Ok::<(), HaqnError>(())
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, instrument, trace};

use crate::error::{HaqnError, Result};
use crate::key::FeatureKey;
use crate::scope::Scope;
use crate::value::Value;

// ============================================================
// Context
// ============================================================

/// The instance cache behind one entered scope.
///
/// Clones share the same mapping. Hand the same `Context` to several
/// workers (with a [`ContextLock`]) to share instances between them, or
/// keep it after exiting a scope and pass it back in on the next entry to
/// restore its instances.
#[derive(Clone, Default)]
pub struct Context {
    instances: Arc<DashMap<FeatureKey, Value>>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached instance for `key`.
    pub fn get(&self, key: &FeatureKey) -> Option<Value> {
        self.instances.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &FeatureKey) -> bool {
        self.instances.contains_key(key)
    }

    /// Stores `value` under `key`, returning the previous instance.
    pub fn insert(&self, key: impl Into<FeatureKey>, value: Value) -> Option<Value> {
        self.instances.insert(key.into(), value)
    }

    /// Removes and returns the instance under `key`.
    pub fn remove(&self, key: &FeatureKey) -> Option<Value> {
        self.instances.remove(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Keys currently cached, in no particular order.
    pub fn keys(&self) -> Vec<FeatureKey> {
        self.instances.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes every instance.
    ///
    /// Instances are dropped after the map's shard locks are released, so
    /// a `Drop` impl may touch this context again.
    pub fn clear(&self) {
        let drained: Vec<Value> = self
            .keys()
            .iter()
            .filter_map(|key| self.remove(key))
            .collect();
        drop(drained);
    }

    /// Returns `true` if both handles share one mapping.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.instances, &other.instances)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("instances", &self.instances.len())
            .finish()
    }
}

// ============================================================
// ContextLock
// ============================================================

/// Lock serializing instance creation in a shared [`Context`].
///
/// The lock is re-entrant on the thread holding it, so a factory running
/// under it may resolve further features of the same scope. A factory
/// that never returns blocks every other worker waiting on this lock.
#[derive(Clone)]
pub struct ContextLock(Arc<ReentrantMutex<()>>);

impl ContextLock {
    pub fn new() -> Self {
        ContextLock(Arc::new(ReentrantMutex::new(())))
    }

    /// Blocks until the lock is held by the calling thread.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.0.lock()
    }

    pub fn ptr_eq(&self, other: &ContextLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for ContextLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContextLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextLock").finish()
    }
}

// ============================================================
// ContextStack (per worker)
// ============================================================

struct StackEntry {
    scope: Scope,
    context: Context,
    lock: Option<ContextLock>,
}

/// Scopes entered on one worker, oldest first. A scope appears at most once.
#[derive(Default)]
struct ContextStack {
    entries: Vec<StackEntry>,
}

impl ContextStack {
    fn find(&self, scope: &Scope) -> Option<&StackEntry> {
        self.entries.iter().find(|entry| &entry.scope == scope)
    }

    /// Hands the entry back when its scope is already on the stack.
    fn push(&mut self, entry: StackEntry) -> std::result::Result<(), StackEntry> {
        if self.find(&entry.scope).is_some() {
            return Err(entry);
        }
        self.entries.push(entry);
        Ok(())
    }

    fn remove(&mut self, scope: &Scope) -> Option<StackEntry> {
        let index = self.entries.iter().position(|entry| &entry.scope == scope)?;
        Some(self.entries.remove(index))
    }

    fn scopes(&self) -> Vec<Scope> {
        self.entries.iter().map(|entry| entry.scope.clone()).collect()
    }
}

/// Managers the current thread has a stack in. On thread exit the thread's
/// stacks are removed from every manager still alive.
struct WorkerState {
    thread: ThreadId,
    managers: RefCell<Vec<Weak<ManagerInner>>>,
}

impl WorkerState {
    fn register(&self, manager: &Arc<ManagerInner>) {
        let weak = Arc::downgrade(manager);
        let mut managers = self.managers.borrow_mut();
        managers.retain(|m| m.strong_count() > 0);
        if !managers.iter().any(|m| m.ptr_eq(&weak)) {
            managers.push(weak);
        }
    }
}

impl Drop for WorkerState {
    fn drop(&mut self) {
        for manager in self.managers.get_mut().drain(..) {
            if let Some(inner) = manager.upgrade() {
                let stack = inner.stacks.remove(&self.thread);
                drop(stack);
            }
        }
    }
}

thread_local! {
    static WORKER: WorkerState = WorkerState {
        thread: thread::current().id(),
        managers: RefCell::new(Vec::new()),
    };
}

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================
// ScopeManager
// ============================================================

/// Owns the scope stacks of every worker that uses it.
///
/// Every operation acts on the *calling* worker's stack. Cheap to clone;
/// clones are the same manager. Dropping the last handle drops the stacks
/// of all workers, with every instance they cache.
#[derive(Clone)]
pub struct ScopeManager {
    inner: Arc<ManagerInner>,
}

/// A handle that does not keep the manager alive.
#[derive(Clone, Debug)]
pub struct WeakScopeManager {
    inner: Weak<ManagerInner>,
}

impl WeakScopeManager {
    /// Returns the manager if some [`ScopeManager`] handle still exists.
    pub fn upgrade(&self) -> Option<ScopeManager> {
        self.inner.upgrade().map(|inner| ScopeManager { inner })
    }
}

struct ManagerInner {
    id: u64,
    process: Context,
    process_lock: ContextLock,
    stacks: DashMap<ThreadId, ContextStack>,
}

impl ManagerInner {
    fn install(&self) -> ContextStack {
        trace!(manager = self.id, "Installing scope stack for worker");
        ContextStack {
            entries: vec![
                StackEntry {
                    scope: Scope::Worker,
                    context: Context::new(),
                    lock: None,
                },
                StackEntry {
                    scope: Scope::Process,
                    context: self.process.clone(),
                    lock: Some(self.process_lock.clone()),
                },
            ],
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        debug!(manager = self.id, workers = self.stacks.len(), "Dropped scope manager");
    }
}

fn current_thread() -> ThreadId {
    WORKER
        .try_with(|worker| worker.thread)
        .unwrap_or_else(|_| thread::current().id())
}

impl ScopeManager {
    /// Creates a manager with its own process-wide context.
    pub fn new() -> Self {
        Self::with_process(Context::new(), ContextLock::new())
    }

    /// Creates a manager whose [`Scope::Process`] context is `context`,
    /// guarded by `lock`.
    ///
    /// Build the pair once at process start and hand it to every manager
    /// that must see the same process-wide instances.
    pub fn with_process(context: Context, lock: ContextLock) -> Self {
        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);
        debug!(manager = id, "Created scope manager");
        Self {
            inner: Arc::new(ManagerInner {
                id,
                process: context,
                process_lock: lock,
                stacks: DashMap::new(),
            }),
        }
    }

    /// The shared [`Scope::Process`] context.
    pub fn process_context(&self) -> Context {
        self.inner.process.clone()
    }

    /// The lock guarding the process context.
    pub fn process_lock(&self) -> ContextLock {
        self.inner.process_lock.clone()
    }

    /// Returns a handle that does not keep this manager alive.
    pub fn downgrade(&self) -> WeakScopeManager {
        WeakScopeManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Runs `f` on the calling worker's stack, installing it if needed.
    ///
    /// `f` must not run user code or drop contexts: a map shard is locked.
    fn with_stack<R>(&self, f: impl FnOnce(&mut ContextStack) -> R) -> R {
        let thread = current_thread();
        if let Some(mut stack) = self.inner.stacks.get_mut(&thread) {
            return f(&mut stack);
        }

        // Only this thread inserts under its own id.
        let _ = WORKER.try_with(|worker| worker.register(&self.inner));
        let mut stack = self
            .inner
            .stacks
            .entry(thread)
            .or_insert_with(|| self.inner.install());
        f(&mut stack)
    }

    /// Drops the calling worker's stack: every scope it entered and its
    /// Worker-scoped instances. The next operation starts from a fresh
    /// stack, as on a new thread.
    ///
    /// Pooled threads call this between units of work. Threads that exit
    /// release their stacks on their own.
    pub fn release_worker(&self) {
        let released = self.inner.stacks.remove(&current_thread());
        if let Some((_, stack)) = released {
            debug!(manager = self.inner.id, scopes = stack.entries.len(), "Released worker stack");
            drop(stack);
        }
    }

    fn entry(&self, scope: &Scope) -> Result<(Context, Option<ContextLock>)> {
        self.with_stack(|stack| {
            stack
                .find(scope)
                .map(|entry| (entry.context.clone(), entry.lock.clone()))
        })
        .ok_or_else(|| self.undefined(scope))
    }

    fn undefined(&self, scope: &Scope) -> HaqnError {
        HaqnError::undefined_scope(scope, self.entered_scopes())
    }

    /// Enters `scope` on the calling worker with a fresh context.
    ///
    /// # Errors
    /// [`HaqnError::ScopeAlreadyEntered`] if the worker already entered it.
    pub fn enter_scope(&self, scope: impl Into<Scope>) -> Result<()> {
        self.enter_scope_with(scope, None, None)
    }

    /// Enters `scope` on the calling worker.
    ///
    /// `context` reinstalls an earlier context (a session's, for example)
    /// instead of a fresh one. `lock` must be given when the context is
    /// shared with other workers.
    pub fn enter_scope_with(
        &self,
        scope: impl Into<Scope>,
        context: Option<Context>,
        lock: Option<ContextLock>,
    ) -> Result<()> {
        let scope = scope.into();
        let entry = StackEntry {
            scope: scope.clone(),
            context: context.unwrap_or_default(),
            lock,
        };

        let rejected = self.with_stack(|stack| stack.push(entry).err());
        if rejected.is_some() {
            return Err(HaqnError::already_entered(&scope));
        }

        debug!(scope = %scope, "Entered scope");
        Ok(())
    }

    /// Exits `scope` on the calling worker and drops its context.
    ///
    /// # Errors
    /// [`HaqnError::UndefinedScope`] if the worker has not entered it.
    pub fn exit_scope(&self, scope: impl Into<Scope>) -> Result<()> {
        let scope = scope.into();
        let removed = self.with_stack(|stack| stack.remove(&scope));

        match removed {
            Some(entry) => {
                debug!(scope = %scope, instances = entry.context.len(), "Exited scope");
                drop(entry);
                Ok(())
            }
            None => Err(self.undefined(&scope)),
        }
    }

    /// Drops every instance cached in `scope`, keeping the scope entered.
    ///
    /// Clearing [`Scope::Call`] does nothing.
    #[instrument(skip_all)]
    pub fn clear_scope(&self, scope: impl Into<Scope>) -> Result<()> {
        let scope = scope.into();
        if !scope.is_cached() {
            return Ok(());
        }

        let (context, lock) = self.entry(&scope)?;
        let _guard = lock.as_ref().map(ContextLock::lock);
        let cleared = context.len();
        context.clear();

        debug!(scope = %scope, cleared, "Cleared scope");
        Ok(())
    }

    /// Returns the context installed for `scope` on the calling worker.
    ///
    /// [`Scope::Call`] always yields a new, empty context.
    pub fn context(&self, scope: impl Into<Scope>) -> Result<Context> {
        let scope = scope.into();
        if !scope.is_cached() {
            return Ok(Context::new());
        }
        self.entry(&scope).map(|(context, _)| context)
    }

    /// Returns `true` if `scope` is on the calling worker's stack.
    pub fn is_entered(&self, scope: impl Into<Scope>) -> bool {
        let scope = scope.into();
        self.with_stack(|stack| stack.find(&scope).is_some())
    }

    /// Scopes entered on the calling worker, oldest first.
    pub fn entered_scopes(&self) -> Vec<Scope> {
        self.with_stack(|stack| stack.scopes())
    }

    /// Returns the instance of `key` in `scope`, building it with
    /// `factory` when absent.
    ///
    /// [`Scope::Call`] calls `factory` every time and caches nothing.
    /// Otherwise a cache hit returns without locking; a miss takes the
    /// scope's lock (if any), looks again, and only then calls `factory`,
    /// so concurrent callers sharing the context build one instance.
    /// A failing factory leaves the key absent.
    ///
    /// # Errors
    /// - [`HaqnError::UndefinedScope`] if the worker has not entered `scope`
    /// - whatever `factory` returns
    pub fn get_or_create<F>(&self, scope: &Scope, key: &FeatureKey, factory: F) -> Result<Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        if !scope.is_cached() {
            trace!(scope = %scope, key = %key, "Building uncached instance");
            return factory();
        }

        let (context, lock) = self.entry(scope)?;
        if let Some(instance) = context.get(key) {
            trace!(scope = %scope, key = %key, "Cache hit");
            return Ok(instance);
        }

        let _guard = lock.as_ref().map(ContextLock::lock);
        if let Some(instance) = context.get(key) {
            trace!(scope = %scope, key = %key, "Cache hit after lock");
            return Ok(instance);
        }

        let instance = factory()?;
        context.insert(key.clone(), instance.clone());
        debug!(scope = %scope, key = %key, "Created instance");
        Ok(instance)
    }
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeManager")
            .field("id", &self.inner.id)
            .field("process_instances", &self.inner.process.len())
            .finish()
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Barrier, mpsc};
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn store(manager: &ScopeManager, scope: impl Into<Scope>, key: &str, value: &'static str) -> Result<Value> {
        manager.get_or_create(&scope.into(), &FeatureKey::name(key), || Ok(Value::new(value)))
    }

    fn run_in_thread<R: Send>(f: impl FnOnce() -> R + Send) -> R {
        thread::scope(|s| s.spawn(f).join().unwrap())
    }

    #[test]
    fn process_scope_is_shared_between_workers() {
        let manager = ScopeManager::new();
        store(&manager, Scope::Process, "test", "test").unwrap();

        let context = manager.context(Scope::Process).unwrap();
        assert!(context.contains(&FeatureKey::name("test")));

        let seen = run_in_thread(|| {
            manager
                .context(Scope::Process)
                .unwrap()
                .get(&FeatureKey::name("test"))
        });
        assert!(seen.is_some());
    }

    #[test]
    fn call_scope_caches_nothing() {
        let manager = ScopeManager::new();
        let a = store(&manager, Scope::Call, "test", "test").unwrap();
        let b = store(&manager, Scope::Call, "test", "test").unwrap();

        assert!(!a.ptr_eq(&b));
        assert!(manager.context(Scope::Call).unwrap().is_empty());
    }

    #[test]
    fn worker_scope_is_private_to_the_worker() {
        let manager = ScopeManager::new();
        store(&manager, Scope::Worker, "test", "test").unwrap();
        assert_eq!(manager.context(Scope::Worker).unwrap().len(), 1);

        let other = run_in_thread(|| manager.context(Scope::Worker).unwrap().len());
        assert_eq!(other, 0);
    }

    #[test]
    fn undeclared_scope_fails() {
        let manager = ScopeManager::new();
        match manager.context("MyScope") {
            Err(HaqnError::UndefinedScope(e)) => {
                assert_eq!(e.scope, Scope::custom("MyScope"));
                assert_eq!(e.entered, vec![Scope::Worker, Scope::Process]);
            }
            other => panic!("Expected UndefinedScope, got: {other:?}"),
        }
        assert!(matches!(
            store(&manager, "MyScope", "test", "test"),
            Err(HaqnError::UndefinedScope(_))
        ));
    }

    #[test]
    fn enter_then_exit_scope() {
        let manager = ScopeManager::new();
        manager.enter_scope("MyScope").unwrap();
        store(&manager, "MyScope", "test", "test").unwrap();
        assert_eq!(manager.context("MyScope").unwrap().len(), 1);

        manager.exit_scope("MyScope").unwrap();
        assert!(matches!(
            manager.context("MyScope"),
            Err(HaqnError::UndefinedScope(_))
        ));
    }

    #[test]
    fn entering_twice_fails() {
        let manager = ScopeManager::new();
        manager.enter_scope("MyScope").unwrap();
        assert!(matches!(
            manager.enter_scope("MyScope"),
            Err(HaqnError::ScopeAlreadyEntered(_))
        ));
        assert!(matches!(
            manager.enter_scope(Scope::Worker),
            Err(HaqnError::ScopeAlreadyEntered(_))
        ));
    }

    #[test]
    fn exiting_unknown_scope_fails() {
        let manager = ScopeManager::new();
        assert!(matches!(
            manager.exit_scope("MyScope"),
            Err(HaqnError::UndefinedScope(_))
        ));
    }

    #[test]
    fn entering_with_an_existing_context() {
        let manager = ScopeManager::new();
        let session = Context::new();
        session.insert("test", Value::new("test"));

        manager
            .enter_scope_with(Scope::Session, Some(session.clone()), None)
            .unwrap();
        let installed = manager.context(Scope::Session).unwrap();
        assert!(installed.ptr_eq(&session));

        let value = store(&manager, Scope::Session, "test", "other").unwrap();
        assert_eq!(value.downcast_ref::<&str>(), Some(&"test"));

        manager.exit_scope(Scope::Session).unwrap();
        assert!(!manager.is_entered(Scope::Session));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn entered_scopes_keep_entry_order() {
        let manager = ScopeManager::new();
        manager.enter_scope(Scope::Session).unwrap();
        manager.enter_scope(Scope::Request).unwrap();
        assert_eq!(
            manager.entered_scopes(),
            vec![Scope::Worker, Scope::Process, Scope::Session, Scope::Request]
        );

        manager.exit_scope(Scope::Session).unwrap();
        assert_eq!(
            manager.entered_scopes(),
            vec![Scope::Worker, Scope::Process, Scope::Request]
        );
    }

    #[test]
    fn entering_is_per_worker() {
        let manager = ScopeManager::new();
        manager.enter_scope(Scope::Request).unwrap();

        let entered_elsewhere = run_in_thread(|| manager.is_entered(Scope::Request));
        assert!(!entered_elsewhere);

        // The other worker may enter its own Request scope meanwhile.
        run_in_thread(|| {
            manager.enter_scope(Scope::Request).unwrap();
            manager.exit_scope(Scope::Request).unwrap();
        });
        assert!(manager.is_entered(Scope::Request));
    }

    #[test]
    fn clear_scope_keeps_the_scope() {
        let manager = ScopeManager::new();
        let first = store(&manager, Scope::Process, "test", "test").unwrap();
        manager.clear_scope(Scope::Process).unwrap();

        assert!(manager.context(Scope::Process).unwrap().is_empty());
        let second = store(&manager, Scope::Process, "test", "test").unwrap();
        assert!(!first.ptr_eq(&second));

        assert!(manager.clear_scope(Scope::Call).is_ok());
        assert!(matches!(
            manager.clear_scope(Scope::Request),
            Err(HaqnError::UndefinedScope(_))
        ));
    }

    #[test]
    fn failing_factory_is_not_cached() {
        let manager = ScopeManager::new();
        let key = FeatureKey::name("flaky");

        let err = manager
            .get_or_create(&Scope::Worker, &key, || Err(HaqnError::failed("boom")))
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(!manager.context(Scope::Worker).unwrap().contains(&key));

        let value = manager
            .get_or_create(&Scope::Worker, &key, || Ok(Value::new(1u8)))
            .unwrap();
        assert_eq!(value.downcast_ref::<u8>(), Some(&1));
    }

    #[test]
    fn concurrent_first_access_builds_once() {
        const WORKERS: usize = 8;

        let manager = ScopeManager::new();
        let key = FeatureKey::name("pool");
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(WORKERS);

        let instances: Vec<Value> = thread::scope(|s| {
            let mut handles = Vec::with_capacity(WORKERS);
            for _ in 0..WORKERS {
                handles.push(s.spawn(|| {
                    barrier.wait();
                    manager
                        .get_or_create(&Scope::Process, &key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(Value::new(String::from("pool")))
                        })
                        .unwrap()
                }));
            }
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|v| v.ptr_eq(&instances[0])));
    }

    #[test]
    fn shared_custom_context_builds_once() {
        const WORKERS: usize = 6;

        let manager = ScopeManager::new();
        let tenant = Context::new();
        let lock = ContextLock::new();
        let key = FeatureKey::name("tenant-config");
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(WORKERS);

        thread::scope(|s| {
            for _ in 0..WORKERS {
                s.spawn(|| {
                    manager
                        .enter_scope_with("tenant", Some(tenant.clone()), Some(lock.clone()))
                        .unwrap();
                    barrier.wait();
                    manager
                        .get_or_create(&Scope::custom("tenant"), &key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(10));
                            Ok(Value::new(42u32))
                        })
                        .unwrap();
                    manager.exit_scope("tenant").unwrap();
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tenant.len(), 1);
    }

    #[test]
    fn process_factory_may_resolve_process_features() {
        let manager = ScopeManager::new();
        let outer = FeatureKey::name("outer");
        let inner = FeatureKey::name("inner");

        let value = manager
            .get_or_create(&Scope::Process, &outer, || {
                let dep = manager.get_or_create(&Scope::Process, &inner, || Ok(Value::new(2u32)))?;
                let dep = dep.downcast_ref::<u32>().copied().unwrap_or_default();
                Ok(Value::new(dep * 10))
            })
            .unwrap();

        assert_eq!(value.downcast_ref::<u32>(), Some(&20));
        assert_eq!(manager.process_context().len(), 2);
    }

    #[test]
    fn managers_share_process_instances_only_when_told() {
        let context = Context::new();
        let lock = ContextLock::new();
        let a = ScopeManager::with_process(context.clone(), lock.clone());
        let b = ScopeManager::with_process(context.clone(), lock);
        let c = ScopeManager::new();

        let from_a = store(&a, Scope::Process, "clock", "a").unwrap();
        let from_b = store(&b, Scope::Process, "clock", "b").unwrap();
        let from_c = store(&c, Scope::Process, "clock", "c").unwrap();

        assert!(from_a.ptr_eq(&from_b));
        assert!(!from_a.ptr_eq(&from_c));
        assert!(a.process_context().ptr_eq(&context));
    }

    #[test]
    fn managers_have_separate_worker_stacks() {
        let a = ScopeManager::new();
        let b = ScopeManager::new();
        a.enter_scope(Scope::Request).unwrap();
        assert!(a.is_entered(Scope::Request));
        assert!(!b.is_entered(Scope::Request));
    }

    #[test]
    fn context_clear_and_remove() {
        let context = Context::new();
        context.insert("a", Value::new(1u8));
        context.insert("b", Value::new(2u8));
        assert_eq!(context.len(), 2);

        assert!(context.remove(&FeatureKey::name("a")).is_some());
        assert_eq!(context.keys(), vec![FeatureKey::name("b")]);

        context.clear();
        assert!(context.is_empty());
    }

    fn pooled_string(manager: &ScopeManager, key: &str) -> std::sync::Weak<String> {
        let value = manager
            .get_or_create(&Scope::Worker, &FeatureKey::name(key), || {
                Ok(Value::new(String::from(key)))
            })
            .unwrap();
        Arc::downgrade(&value.downcast::<String>().unwrap())
    }

    #[test]
    fn dropping_the_manager_releases_stacks_of_live_workers() {
        let manager = ScopeManager::new();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let worker = {
            let manager = manager.clone();
            thread::spawn(move || {
                let pool = pooled_string(&manager, "pool");
                drop(manager);
                ready_tx.send(pool).unwrap();
                // Stay alive like a pooled thread.
                done_rx.recv().unwrap();
            })
        };

        let pool = ready_rx.recv().unwrap();
        assert!(pool.upgrade().is_some());

        drop(manager);
        assert!(pool.upgrade().is_none());

        done_tx.send(()).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn exiting_thread_releases_its_stack() {
        let manager = ScopeManager::new();
        let pool = run_in_thread(|| pooled_string(&manager, "pool"));
        assert!(pool.upgrade().is_none());
        assert!(manager.is_entered(Scope::Worker));
    }

    #[test]
    fn release_worker_starts_a_fresh_stack() {
        let manager = ScopeManager::new();
        manager.enter_scope(Scope::Request).unwrap();
        let pool = pooled_string(&manager, "pool");
        let shared = manager
            .get_or_create(&Scope::Process, &FeatureKey::name("shared"), || Ok(Value::new(1u8)))
            .unwrap();

        manager.release_worker();
        assert!(pool.upgrade().is_none());
        assert!(!manager.is_entered(Scope::Request));
        assert_eq!(
            manager.entered_scopes(),
            vec![Scope::Worker, Scope::Process]
        );

        let again = manager
            .get_or_create(&Scope::Process, &FeatureKey::name("shared"), || Ok(Value::new(2u8)))
            .unwrap();
        assert!(shared.ptr_eq(&again));
    }

    #[test]
    fn weak_handle_follows_the_manager() {
        let manager = ScopeManager::new();
        let weak = manager.downgrade();
        assert!(weak.upgrade().is_some());
        drop(manager);
        assert!(weak.upgrade().is_none());
    }
}
