//==================================================
// File: context/mod.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Execution Context Manager
// Objective: Create, drive and close isolated sub-interpreters, running every
//            Host-facing operation inside the shared lock/swap bracket and
//            translating errors in both directions
//==================================================

mod guard;

pub use guard::ExecutionGuard;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::bridge::exceptions::process_script_exception;
use crate::bridge::{ClassProxy, ContextLink, Interop, module as bridge_module};
use crate::error::{BridgeError, BridgeResult};
use crate::host::{ClassRef, GlobalRef, HostRef};
use crate::import_hook::ImportHook;
use crate::script::{
    Builtin, CompileMode, Module, ModuleOrigin, ModuleRef, ScriptResult, ScriptRuntime,
    ThreadState, Value, exec,
};
use crate::types::JavaKind;

//==================================================
// Section 1.0 - Handles and values
//==================================================

/// Opaque id of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(u64);

impl ContextHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Durable per-context reference to a Script value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptHandle(u64);

impl ScriptHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    Complete,
    Incomplete,
}

/// A Host value bound into a namespace by [`ContextManager::set_global`].
#[derive(Debug, Clone)]
pub enum GlobalValue {
    Object(Option<HostRef>),
    Class(ClassRef),
    Str(Option<String>),
    Int(i32),
    Long(i64),
    Double(f64),
    Float(f32),
}

/// What [`ContextManager::invoke_callable`] calls.
#[derive(Debug, Clone, Copy)]
pub enum Callable<'a> {
    /// A dotted name looked up in the context's top-level namespace.
    Named(&'a str),
    Handle(ScriptHandle),
    /// An attribute of the value behind a handle.
    Method(ScriptHandle, &'a str),
}

/// Options applied to every new context.
#[derive(Debug, Clone)]
pub struct ContextDefaults {
    pub print_stack: bool,
    pub bridge_module: String,
}

impl Default for ContextDefaults {
    fn default() -> Self {
        Self {
            print_stack: false,
            bridge_module: "embed".to_string(),
        }
    }
}

//==================================================
// Section 2.0 - Contexts
//==================================================

pub struct ExecutionContext {
    id: u64,
    state: Arc<ThreadState>,
    link: Arc<ContextLink>,
    loader_ref: Mutex<Option<GlobalRef>>,
    handles: Mutex<HashMap<u64, Value>>,
    next_handle: AtomicU64,
    closed: AtomicBool,
}

impl ExecutionContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> &Arc<ThreadState> {
        &self.state
    }

    pub fn print_stack(&self) -> bool {
        self.link.print_stack()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn store(&self, value: Value) -> ScriptHandle {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().insert(id, value);
        ScriptHandle(id)
    }

    fn handle_value(&self, handle: ScriptHandle) -> Option<Value> {
        self.handles.lock().get(&handle.0).cloned()
    }

    fn handle_module(&self, handle: Option<ScriptHandle>) -> BridgeResult<ModuleRef> {
        match handle {
            None => Ok(self.state.main().clone()),
            Some(handle) => match self.handle_value(handle) {
                Some(Value::Module(module)) => Ok(module),
                _ => Err(BridgeError::InvalidModule),
            },
        }
    }
}

/// Registry of live contexts and the Host-facing operations on them.
pub struct ContextManager {
    runtime: Arc<ScriptRuntime>,
    interop: Arc<Interop>,
    hook: Arc<ImportHook>,
    defaults: ContextDefaults,
    contexts: RwLock<HashMap<u64, Arc<ExecutionContext>>>,
    next_context: AtomicU64,
}

impl ContextManager {
    pub fn new(runtime: Arc<ScriptRuntime>, interop: Arc<Interop>, defaults: ContextDefaults) -> Self {
        let hook = ImportHook::new(&interop);
        Self {
            runtime,
            interop,
            hook,
            defaults,
            contexts: RwLock::new(HashMap::new()),
            next_context: AtomicU64::new(1),
        }
    }

    pub fn runtime(&self) -> &Arc<ScriptRuntime> {
        &self.runtime
    }

    pub fn live_contexts(&self) -> usize {
        self.contexts.read().len()
    }

    fn context(&self, handle: ContextHandle) -> BridgeResult<Arc<ExecutionContext>> {
        self.contexts
            .read()
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| BridgeError::thread_state(format!("context {} is not open", handle.0)))
    }

    fn check_loader(&self, loader: Option<HostRef>) -> BridgeResult<HostRef> {
        let loader = loader.ok_or(BridgeError::InvalidClassLoader)?;
        let host = self.interop.host();
        let Some(loader_class) = host.lookup_class("java.lang.ClassLoader") else {
            return Err(BridgeError::InvalidClassLoader);
        };
        if !host.is_assignable_from(loader.class(), &loader_class) {
            return Err(BridgeError::InvalidClassLoader);
        }
        Ok(loader)
    }

    /// Pending Script error as a [`BridgeError`].
    fn translate(&self, ctx: &ExecutionContext) -> BridgeError {
        process_script_exception(&ctx.state, ctx.print_stack()).unwrap_or_else(|| {
            warn!(context = ctx.id, "script failure without a pending error");
            BridgeError::Script {
                kind: Builtin::Runtime.name().to_string(),
                message: format!("{}: unknown error", Builtin::Runtime.name()),
                mapped_class: None,
                cause: None,
            }
        })
    }

    /// The lock/swap bracket every operation runs in.
    fn with_context<R>(
        &self,
        handle: ContextHandle,
        work: impl FnOnce(&ExecutionContext) -> ScriptResult<R>,
    ) -> BridgeResult<R> {
        let ctx = self.context(handle)?;
        let _guard = ExecutionGuard::enter(&self.runtime, &ctx.state)?;
        if ctx.is_closed() {
            return Err(BridgeError::thread_state(format!("context {} is closed", ctx.id)));
        }
        if let Some(err) = self.interop.host_error() {
            return Err(err);
        }
        work(ctx.as_ref()).map_err(|_| self.translate(&ctx))
    }

    //==================================================
    // Section 3.0 - Lifecycle
    //==================================================

    pub fn create_context(&self, class_loader: Option<HostRef>) -> BridgeResult<ContextHandle> {
        let loader = self.check_loader(class_loader)?;
        if self.runtime.is_finalized() {
            return Err(BridgeError::thread_state("script runtime is finalized"));
        }
        let _lock = self.runtime.acquire();
        let id = self.next_context.fetch_add(1, Ordering::SeqCst);
        let state = self.runtime.new_interpreter();
        let module = bridge_module::create(&self.interop, &self.defaults.bridge_module);
        state.add_module(module.clone());
        self.hook.install(&state);
        let loader_ref = self.interop.host().new_global_ref(&loader);
        let link = Arc::new(ContextLink::new(id, self.defaults.print_stack, module, loader));
        self.interop.attach(state.id(), link.clone());
        let ctx = Arc::new(ExecutionContext {
            id,
            state,
            link,
            loader_ref: Mutex::new(Some(loader_ref)),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        info!(context = id, state = ctx.state.id(), "execution context created");
        self.contexts.write().insert(id, ctx);
        Ok(ContextHandle(id))
    }

    pub fn close(&self, handle: ContextHandle) -> BridgeResult<()> {
        let ctx = self.context(handle)?;
        let _guard = ExecutionGuard::enter(&self.runtime, &ctx.state)?;
        self.contexts.write().remove(&handle.0);
        self.teardown(&ctx);
        Ok(())
    }

    fn teardown(&self, ctx: &ExecutionContext) {
        if ctx.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let released = std::mem::take(&mut *ctx.handles.lock());
        drop(released);
        self.interop.detach(ctx.state.id());
        if let Some(reference) = ctx.loader_ref.lock().take() {
            self.interop.host().delete_global_ref(reference);
        }
        ctx.state.clear_error();
        self.runtime.end_interpreter(&ctx.state);
        info!(context = ctx.id, "execution context closed");
    }

    /// Closes every open context.
    pub fn close_all(&self) {
        let drained: Vec<Arc<ExecutionContext>> =
            self.contexts.write().drain().map(|(_, ctx)| ctx).collect();
        for ctx in drained {
            match ExecutionGuard::enter(&self.runtime, &ctx.state) {
                Ok(_guard) => self.teardown(&ctx),
                Err(err) => warn!(context = ctx.id, %err, "context left open at shutdown"),
            }
        }
    }

    //==================================================
    // Section 4.0 - Execution
    //==================================================

    /// Executes a script file in the context's top-level namespace.
    pub fn run(&self, handle: ContextHandle, path: &Path) -> BridgeResult<()> {
        let source = std::fs::read_to_string(path).map_err(|err| BridgeError::ScriptFile {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let filename = path.display().to_string();
        debug!(context = handle.0, file = %filename, "running script file");
        self.with_context(handle, |ctx| {
            exec::exec_source(&ctx.state, &source, CompileMode::File, &filename, ctx.state.main())
                .map(|_| ())
        })
    }

    /// Whether `source` is a complete interactive statement. Syntax errors mean
    /// more input is needed and are swallowed.
    pub fn compile_check(&self, handle: ContextHandle, source: &str) -> BridgeResult<CompileStatus> {
        let ctx = self.context(handle)?;
        self.with_context(handle, |ctx| {
            match exec::compile(&ctx.state, source, CompileMode::Single, "<stdin>") {
                Ok(_) => Ok(CompileStatus::Complete),
                Err(raised) => {
                    if ctx.state.error_matches(Builtin::Syntax) {
                        ctx.state.clear_error();
                        Ok(CompileStatus::Incomplete)
                    } else {
                        Err(raised)
                    }
                }
            }
        })
        .inspect(|status| debug!(context = ctx.id, ?status, "compile check"))
    }

    /// Runs one interactive statement.
    pub fn eval(&self, handle: ContextHandle, source: &str) -> BridgeResult<()> {
        self.with_context(handle, |ctx| {
            exec::exec_source(&ctx.state, source, CompileMode::Single, "<string>", ctx.state.main())
                .map(|_| ())
        })
    }

    /// Evaluates an expression, optionally inside a module created earlier, and
    /// boxes the result for the Host. `None` stands for a null result.
    pub fn eval_for_value(
        &self,
        handle: ContextHandle,
        expression: &str,
        module: Option<ScriptHandle>,
    ) -> BridgeResult<Option<HostRef>> {
        let ctx = self.context(handle)?;
        let globals = ctx.handle_module(module)?;
        self.with_context(handle, |ctx| {
            let value = exec::exec_source(&ctx.state, expression, CompileMode::Eval, "<string>", &globals)?;
            self.interop.box_value(&ctx.state, &value)
        })
    }

    /// Evaluates an expression and keeps the result as a Script handle.
    pub fn eval_for_handle(&self, handle: ContextHandle, expression: &str) -> BridgeResult<ScriptHandle> {
        self.with_context(handle, |ctx| {
            let value = exec::exec_source(
                &ctx.state,
                expression,
                CompileMode::Eval,
                "<string>",
                ctx.state.main(),
            )?;
            Ok(ctx.store(value))
        })
    }

    /// Calls a Script callable with Host arguments whose kinds are given by
    /// `type_ids`, and boxes the result.
    pub fn invoke_callable(
        &self,
        handle: ContextHandle,
        callable: Callable<'_>,
        args: &[Option<HostRef>],
        type_ids: &[i32],
    ) -> BridgeResult<Option<HostRef>> {
        let mut kinds = Vec::with_capacity(type_ids.len());
        for &id in type_ids {
            match JavaKind::from_id(id) {
                Ok(kind) if kind.is_none_or(JavaKind::is_reference) => kinds.push(kind),
                _ => return Err(BridgeError::UnhandledTypeId(id)),
            }
        }
        if kinds.len() != args.len() {
            return Err(BridgeError::TypeMismatch {
                position: kinds.len().min(args.len()) + 1,
                message: format!(
                    "invoke: {} arguments but {} type ids",
                    args.len(),
                    kinds.len()
                ),
            });
        }
        let ctx = self.context(handle)?;
        let target = match callable {
            Callable::Named(_) => None,
            Callable::Handle(script) | Callable::Method(script, _) => {
                Some(ctx.handle_value(script).ok_or_else(|| {
                    BridgeError::thread_state(format!("script handle {} is not live", script.0))
                })?)
            }
        };
        self.with_context(handle, |ctx| {
            let ts = &ctx.state;
            let callee = match (&target, callable) {
                (Some(value), Callable::Method(_, name)) => exec::get_attr(ts, value, name)?,
                (Some(value), _) => value.clone(),
                (None, Callable::Named(name)) => resolve_dotted(ts, ctx.state.main(), name)?,
                (None, _) => return Err(ts.raise(Builtin::Runtime, "missing callable")),
            };
            let mut converted = Vec::with_capacity(args.len());
            for (arg, kind) in args.iter().zip(&kinds) {
                converted.push(match kind {
                    None => Value::None,
                    Some(kind) => self.interop.unbox(ts, arg.clone(), *kind)?,
                });
            }
            let result = exec::call(ts, &callee, &converted)?;
            self.interop.box_value(ts, &result)
        })
    }

    //==================================================
    // Section 5.0 - Namespaces
    //==================================================

    /// Creates a module bound under `name` in the top-level namespace, or in
    /// the namespace of `on`. Re-creating a name replaces the prior binding.
    pub fn create_module(
        &self,
        handle: ContextHandle,
        name: &str,
        on: Option<ScriptHandle>,
    ) -> BridgeResult<ScriptHandle> {
        let ctx = self.context(handle)?;
        let parent = ctx.handle_module(on)?;
        self.with_context(handle, |ctx| {
            let qualified = match on {
                Some(_) => format!("{}.{}", parent.name(), name),
                None => name.to_string(),
            };
            let module = Module::new(qualified.clone(), ModuleOrigin::Created);
            module.set("__name__", Value::text(&qualified));
            ctx.state.add_module(module.clone());
            parent.set(name, Value::Module(module.clone()));
            debug!(context = ctx.id, module = %qualified, "module created");
            Ok(ctx.store(Value::Module(module)))
        })
    }

    pub fn set_class_loader(&self, handle: ContextHandle, class_loader: Option<HostRef>) -> BridgeResult<()> {
        let loader = self.check_loader(class_loader)?;
        self.with_context(handle, |ctx| {
            let host = self.interop.host();
            let fresh = host.new_global_ref(&loader);
            if let Some(old) = ctx.loader_ref.lock().replace(fresh) {
                host.delete_global_ref(old);
            }
            ctx.link.set_class_loader(loader.clone());
            debug!(context = ctx.id, "class loader replaced");
            Ok(())
        })
    }

    /// Binds a Host value under `name`, in the top-level namespace or in the
    /// namespace of `target`.
    pub fn set_global(
        &self,
        handle: ContextHandle,
        name: &str,
        value: GlobalValue,
        target: Option<ScriptHandle>,
    ) -> BridgeResult<()> {
        let ctx = self.context(handle)?;
        let namespace = ctx.handle_module(target)?;
        self.with_context(handle, |ctx| {
            let converted = match value {
                GlobalValue::Object(object) => self.interop.unbox_object(&ctx.state, object)?,
                GlobalValue::Class(class) => Value::Foreign(Arc::new(ClassProxy::new(&self.interop, class))),
                GlobalValue::Str(text) => text.map(Value::text).unwrap_or(Value::None),
                GlobalValue::Int(v) => Value::Int(v as i64),
                GlobalValue::Long(v) => Value::Long(v),
                GlobalValue::Double(v) => Value::Float(v),
                GlobalValue::Float(v) => Value::Float(v as f64),
            };
            namespace.set(name, converted);
            Ok(())
        })
    }

    pub fn set_print_stack(&self, handle: ContextHandle, flag: bool) -> BridgeResult<()> {
        let ctx = self.context(handle)?;
        ctx.link.set_print_stack(flag);
        Ok(())
    }

    /// Drops a Script handle. Unknown handles are ignored.
    pub fn release_handle(&self, handle: ContextHandle, script: ScriptHandle) -> BridgeResult<()> {
        self.with_context(handle, |ctx| {
            let released = ctx.handles.lock().remove(&script.0);
            drop(released);
            Ok(())
        })
    }

    /// Renders the value behind a Script handle with `str()`.
    pub fn handle_text(&self, handle: ContextHandle, script: ScriptHandle) -> BridgeResult<String> {
        self.with_context(handle, |ctx| match ctx.handle_value(script) {
            Some(value) => exec::to_text(&ctx.state, &value),
            None => Err(ctx.state.raise(Builtin::Name, format!("handle {} is not live", script.0))),
        })
    }
}

fn resolve_dotted(ts: &ThreadState, globals: &ModuleRef, name: &str) -> ScriptResult<Value> {
    let mut parts = name.split('.');
    let first = parts.next().unwrap_or(name);
    let mut value = globals
        .get(first)
        .or_else(|| ts.builtins().get(first))
        .ok_or_else(|| ts.raise(Builtin::Name, format!("name '{first}' is not defined")))?;
    for part in parts {
        value = exec::get_attr(ts, &value, part)?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostEnv, HostValue, InProcessHost};
    use crate::types::TypeCache;

    struct Fixture {
        host: Arc<InProcessHost>,
        manager: ContextManager,
    }

    fn fixture() -> Fixture {
        let host = InProcessHost::new();
        let types = Arc::new(TypeCache::new(host.clone()));
        let interop = Interop::new(host.clone(), types, true);
        let manager = ContextManager::new(ScriptRuntime::new(), interop, ContextDefaults::default());
        Fixture { host, manager }
    }

    fn open(f: &Fixture) -> ContextHandle {
        f.manager
            .create_context(Some(f.host.system_class_loader()))
            .expect("context")
    }

    #[test]
    fn links_follow_context_lifetime() {
        let f = fixture();
        let first = open(&f);
        let second = open(&f);
        assert_eq!(f.manager.interop.live_links(), 2);
        f.manager.close(first).expect("close");
        assert_eq!(f.manager.interop.live_links(), 1);
        f.manager.eval(second, "import embed").expect("bridge module through the link");
        f.manager.close(second).expect("close");
        assert_eq!(f.manager.interop.live_links(), 0);
    }

    #[test]
    fn loader_must_be_a_class_loader() {
        let f = fixture();
        assert!(matches!(
            f.manager.create_context(None),
            Err(BridgeError::InvalidClassLoader)
        ));
        let not_loader = f.host.new_string("loader");
        assert!(matches!(
            f.manager.create_context(Some(not_loader)),
            Err(BridgeError::InvalidClassLoader)
        ));
    }

    #[test]
    fn compile_check_distinguishes_incomplete_input() {
        let f = fixture();
        let ctx = open(&f);
        assert_eq!(f.manager.compile_check(ctx, "x = 1").expect("check"), CompileStatus::Complete);
        assert_eq!(f.manager.compile_check(ctx, "x = (1 +").expect("check"), CompileStatus::Incomplete);
        let deep = format!("{}1{}", "(".repeat(400), ")".repeat(400));
        assert!(matches!(
            f.manager.compile_check(ctx, &deep),
            Err(BridgeError::OutOfMemory(_))
        ));
    }

    #[test]
    fn eval_for_value_in_created_module() {
        let f = fixture();
        let ctx = open(&f);
        let config = f.manager.create_module(ctx, "config", None).expect("module");
        f.manager
            .set_global(ctx, "depth", GlobalValue::Int(3), Some(config))
            .expect("set");
        let depth = f
            .manager
            .eval_for_value(ctx, "depth * 2", Some(config))
            .expect("eval")
            .expect("non-null");
        assert!(matches!(depth.boxed(), Some(HostValue::Int(6))));
        let via_main = f
            .manager
            .eval_for_value(ctx, "config.depth", None)
            .expect("eval")
            .expect("non-null");
        assert!(matches!(via_main.boxed(), Some(HostValue::Int(3))));
    }

    #[test]
    fn nested_modules_form_packages() {
        let f = fixture();
        let ctx = open(&f);
        let outer = f.manager.create_module(ctx, "pkg", None).expect("pkg");
        f.manager.create_module(ctx, "inner", Some(outer)).expect("inner");
        f.manager
            .set_global(ctx, "flag", GlobalValue::Str(Some("on".into())), None)
            .expect("flag");
        let name = f.manager.eval_for_handle(ctx, "pkg.inner.__name__").expect("name");
        assert_eq!(f.manager.handle_text(ctx, name).expect("text"), "pkg.inner");
        let bogus = f.manager.eval_for_handle(ctx, "flag").expect("flag handle");
        assert!(matches!(
            f.manager.create_module(ctx, "x", Some(bogus)),
            Err(BridgeError::InvalidModule)
        ));
    }

    #[test]
    fn invoke_callable_checks_type_ids() {
        let f = fixture();
        let ctx = open(&f);
        f.manager.eval(ctx, "greet = lambda who: 'hi ' + who").expect("define");
        let who = f.host.new_string("ada");
        let result = f
            .manager
            .invoke_callable(ctx, Callable::Named("greet"), &[Some(who)], &[JavaKind::String.id()])
            .expect("invoke")
            .expect("non-null");
        assert_eq!(result.as_str(), Some("hi ada"));
        assert!(matches!(
            f.manager
                .invoke_callable(ctx, Callable::Named("greet"), &[None], &[JavaKind::Int.id()]),
            Err(BridgeError::UnhandledTypeId(1))
        ));
    }

    #[test]
    fn closed_context_rejects_operations() {
        let f = fixture();
        let ctx = open(&f);
        f.manager.close(ctx).expect("close");
        assert!(matches!(
            f.manager.eval(ctx, "1"),
            Err(BridgeError::ThreadStateUnavailable(_))
        ));
        assert!(matches!(
            f.manager.close(ctx),
            Err(BridgeError::ThreadStateUnavailable(_))
        ));
        assert_eq!(f.manager.runtime().live_interpreters(), 0);
    }

    #[test]
    fn print_stack_follows_flag() {
        let f = fixture();
        let ctx = open(&f);
        f.manager.set_print_stack(ctx, true).expect("flag");
        f.manager.eval(ctx, "import java.util.ArrayList").expect("import");
        let before = f.host.describe_count();
        let err = f
            .manager
            .eval(ctx, "ArrayList().get(0)")
            .expect_err("index out of bounds");
        assert!(matches!(err, BridgeError::Script { .. }));
        assert_eq!(f.host.describe_count(), before + 1);
        assert!(!f.host.exception_check());
    }
}
