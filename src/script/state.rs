//==================================================
// File: script/state.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Interpreter process and sub-interpreter states
// Objective: Share one execution lock and one native module registry while
//            giving every sub-interpreter its own namespaces and error slot
//==================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use tracing::{debug, trace};

use super::builtins;
use super::error::{Builtin, ScriptException, TraceEntry};
use super::value::{Module, ModuleOrigin, ModuleRef, Raised, ScriptResult, Value};

/// Lambda nesting allowed before `RuntimeError` is raised.
pub const MAX_RECURSION_DEPTH: usize = 100;

/// Nested expression evaluations allowed, across calls, before
/// `MemoryError` is raised.
pub const MAX_EVAL_NESTING: usize = 300;

//==================================================
// Section 1.0 - Native module registry
//==================================================

/// Native modules loaded once per process and shared by every
/// sub-interpreter.
pub struct ExtensionRegistry {
    modules: RwLock<BTreeMap<String, ModuleRef>>,
}

impl ExtensionRegistry {
    fn new() -> Self {
        let registry = Self {
            modules: RwLock::new(BTreeMap::new()),
        };
        registry.register(builtins::math_module());
        registry
    }

    pub fn register(&self, module: ModuleRef) {
        trace!(module = module.name(), "native module registered");
        self.modules.write().insert(module.name().to_string(), module);
    }

    pub fn get(&self, name: &str) -> Option<ModuleRef> {
        self.modules.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    fn clear(&self) {
        self.modules.write().clear();
    }
}

//==================================================
// Section 2.0 - Process runtime
//==================================================

/// The interpreter process: one execution lock, one "current state" slot.
pub struct ScriptRuntime {
    lock: ReentrantMutex<()>,
    current: Mutex<Option<Arc<ThreadState>>>,
    extensions: Arc<ExtensionRegistry>,
    next_state: AtomicU64,
    live_states: AtomicUsize,
    finalized: AtomicBool,
}

impl ScriptRuntime {
    pub fn new() -> Arc<Self> {
        debug!("script runtime initialised");
        Arc::new(Self {
            lock: ReentrantMutex::new(()),
            current: Mutex::new(None),
            extensions: Arc::new(ExtensionRegistry::new()),
            next_state: AtomicU64::new(1),
            live_states: AtomicUsize::new(0),
            finalized: AtomicBool::new(false),
        })
    }

    /// Blocks until the calling thread holds the execution lock. Re-entrant on
    /// the owning thread.
    pub fn acquire(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Installs `state` as current and returns the one it replaced.
    ///
    /// Callers must hold the execution lock.
    pub fn swap(&self, state: Option<Arc<ThreadState>>) -> Option<Arc<ThreadState>> {
        std::mem::replace(&mut *self.current.lock(), state)
    }

    pub fn current(&self) -> Option<Arc<ThreadState>> {
        self.current.lock().clone()
    }

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    pub fn live_interpreters(&self) -> usize {
        self.live_states.load(Ordering::SeqCst)
    }

    /// Creates a sub-interpreter with fresh `__main__` and builtins namespaces.
    pub fn new_interpreter(&self) -> Arc<ThreadState> {
        let id = self.next_state.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(ThreadState::new(id, self.extensions.clone()));
        self.live_states.fetch_add(1, Ordering::SeqCst);
        debug!(state = id, "sub-interpreter created");
        state
    }

    /// Tears a sub-interpreter down. Its namespaces are emptied so lambda and
    /// module cycles are broken.
    pub fn end_interpreter(&self, state: &ThreadState) {
        state.teardown();
        self.live_states.fetch_sub(1, Ordering::SeqCst);
        debug!(state = state.id(), "sub-interpreter ended");
    }

    /// Drops the native module registry. Idempotent.
    pub fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        let _lock = self.acquire();
        self.swap(None);
        self.extensions.clear();
        debug!("script runtime finalized");
    }
}

//==================================================
// Section 3.0 - Sub-interpreter state
//==================================================

pub struct ThreadState {
    id: u64,
    modules: RwLock<BTreeMap<String, ModuleRef>>,
    builtins: ModuleRef,
    main: ModuleRef,
    error: Mutex<Option<ScriptException>>,
    depth: AtomicUsize,
    nesting: AtomicUsize,
    extensions: Arc<ExtensionRegistry>,
}

impl ThreadState {
    fn new(id: u64, extensions: Arc<ExtensionRegistry>) -> Self {
        let builtins = Module::new("builtins", ModuleOrigin::Builtins);
        builtins::install(&builtins);
        let main = Module::new("__main__", ModuleOrigin::Main);
        main.set("__name__", Value::text("__main__"));
        let mut modules = BTreeMap::new();
        modules.insert("builtins".to_string(), builtins.clone());
        modules.insert("__main__".to_string(), main.clone());
        Self {
            id,
            modules: RwLock::new(modules),
            builtins,
            main,
            error: Mutex::new(None),
            depth: AtomicUsize::new(0),
            nesting: AtomicUsize::new(0),
            extensions,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn main(&self) -> &ModuleRef {
        &self.main
    }

    pub fn builtins(&self) -> &ModuleRef {
        &self.builtins
    }

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    // module table

    pub fn module(&self, name: &str) -> Option<ModuleRef> {
        self.modules.read().get(name).cloned()
    }

    pub fn add_module(&self, module: ModuleRef) {
        self.modules
            .write()
            .insert(module.name().to_string(), module);
    }

    /// Returns the module registered under `name`, creating it with `origin`
    /// when absent.
    pub fn module_or_insert(&self, name: &str, origin: ModuleOrigin) -> ModuleRef {
        self.modules
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Module::new(name, origin))
            .clone()
    }

    // pending error slot

    /// Sets a pending error of a builtin type.
    pub fn raise(&self, builtin: Builtin, message: impl Into<String>) -> Raised {
        self.raise_exception(ScriptException::new(builtin.get(), message))
    }

    /// Replaces the pending error.
    pub fn raise_exception(&self, exception: ScriptException) -> Raised {
        trace!(state = self.id, error = %exception.render(), "script error raised");
        *self.error.lock() = Some(exception);
        Raised
    }

    pub fn error_occurred(&self) -> bool {
        self.error.lock().is_some()
    }

    /// `true` when the pending error is (a subtype of) `builtin`.
    pub fn error_matches(&self, builtin: Builtin) -> bool {
        self.error
            .lock()
            .as_ref()
            .is_some_and(|err| err.is(builtin))
    }

    /// Takes the pending error, leaving the slot clear.
    pub fn fetch_error(&self) -> Option<ScriptException> {
        self.error.lock().take()
    }

    pub fn clear_error(&self) {
        *self.error.lock() = None;
    }

    pub(crate) fn push_trace(&self, file: &str, line: usize) {
        if let Some(err) = self.error.lock().as_mut() {
            err.trace.push(TraceEntry {
                file: file.to_string(),
                line,
            });
        }
    }

    // recursion

    pub(crate) fn enter_call(&self) -> ScriptResult<DepthGuard<'_>> {
        DepthGuard::enter(&self.depth, MAX_RECURSION_DEPTH)
            .ok_or_else(|| self.raise(Builtin::Runtime, "maximum recursion depth exceeded"))
    }

    /// Counts one level of expression evaluation so deep trees fail with
    /// `MemoryError` instead of exhausting the native stack.
    pub(crate) fn enter_expression(&self) -> ScriptResult<DepthGuard<'_>> {
        DepthGuard::enter(&self.nesting, MAX_EVAL_NESTING)
            .ok_or_else(|| self.raise(Builtin::Memory, "expression nested too deeply"))
    }

    fn teardown(&self) {
        let modules = std::mem::take(&mut *self.modules.write());
        for module in modules.values() {
            if module.origin() != ModuleOrigin::Native {
                module.clear();
            }
        }
        self.main.clear();
        self.builtins.clear();
        self.clear_error();
    }
}

impl std::fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ThreadState({})", self.id)
    }
}

pub(crate) struct DepthGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> DepthGuard<'a> {
    fn enter(counter: &'a AtomicUsize, limit: usize) -> Option<Self> {
        let depth = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > limit {
            counter.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self { counter })
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpreters_have_separate_namespaces() {
        let runtime = ScriptRuntime::new();
        let a = runtime.new_interpreter();
        let b = runtime.new_interpreter();
        a.main().set("x", Value::Int(1));
        assert!(a.main().contains("x"));
        assert!(!b.main().contains("x"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn native_modules_are_shared() {
        let runtime = ScriptRuntime::new();
        let a = runtime.new_interpreter();
        let b = runtime.new_interpreter();
        let left = a.extensions().get("math").expect("math");
        let right = b.extensions().get("math").expect("math");
        assert!(Arc::ptr_eq(&left, &right));
    }

    #[test]
    fn swap_returns_previous_state() {
        let runtime = ScriptRuntime::new();
        let state = runtime.new_interpreter();
        let _lock = runtime.acquire();
        assert!(runtime.swap(Some(state.clone())).is_none());
        let previous = runtime.swap(None).expect("previous");
        assert_eq!(previous.id(), state.id());
    }

    #[test]
    fn pending_error_is_taken_once() {
        let runtime = ScriptRuntime::new();
        let state = runtime.new_interpreter();
        let _ = state.raise(Builtin::Value, "bad");
        assert!(state.error_matches(Builtin::Value));
        assert!(state.error_matches(Builtin::Base));
        assert!(state.fetch_error().is_some());
        assert!(!state.error_occurred());
    }

    #[test]
    fn recursion_limit_raises_runtime_error() {
        let runtime = ScriptRuntime::new();
        let state = runtime.new_interpreter();
        let mut guards = Vec::new();
        for _ in 0..MAX_RECURSION_DEPTH {
            guards.push(state.enter_call().expect("within limit"));
        }
        assert!(state.enter_call().is_err());
        assert!(state.error_matches(Builtin::Runtime));
        drop(guards);
        state.clear_error();
        assert!(state.enter_call().is_ok());
    }

    #[test]
    fn expression_nesting_limit_raises_memory_error() {
        let runtime = ScriptRuntime::new();
        let state = runtime.new_interpreter();
        let guards: Vec<_> = (0..MAX_EVAL_NESTING)
            .map(|_| state.enter_expression().expect("within limit"))
            .collect();
        assert!(state.enter_expression().is_err());
        assert!(state.error_matches(Builtin::Memory));
        drop(guards);
        state.clear_error();
        assert!(state.enter_expression().is_ok());
    }
}
