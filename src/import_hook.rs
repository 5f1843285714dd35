//==================================================
// File: import_hook.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Resolve Script imports against Host packages
// Objective: Replace the builtin `__import__` so that names the native import
//            machinery cannot find are looked up as Host package or class
//            paths through the context's class loader
//==================================================

use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::bridge::{ClassProxy, ContextLink, Interop};
use crate::host::{CLASS_LIST_CLASS, HostResult, HostValue, MethodRef};
use crate::script::builtins::{default_import, import_name};
use crate::script::{
    Builtin, ErrorDetail, ModuleOrigin, ScriptException, ScriptResult, ThreadState, Value,
};

//==================================================
// Section 1.0 - Allow-list
//==================================================

/// The `fromlist` argument of `__import__`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowList {
    Everything,
    Only(Vec<String>),
}

impl AllowList {
    fn from_value(value: Option<&Value>) -> AllowList {
        let Some(Value::Tuple(items)) = value else {
            return AllowList::Everything;
        };
        let names: Vec<String> = items
            .iter()
            .filter_map(|item| item.as_text().map(str::to_string))
            .collect();
        if names.is_empty() || names.iter().any(|name| name == "*") {
            AllowList::Everything
        } else {
            AllowList::Only(names)
        }
    }

    fn permits(&self, simple_name: &str) -> bool {
        match self {
            AllowList::Everything => true,
            AllowList::Only(names) => names.iter().any(|name| name == simple_name),
        }
    }
}

//==================================================
// Section 2.0 - Hook
//==================================================

/// The replacement import entry, shared by every context of a process.
pub struct ImportHook {
    interop: Weak<Interop>,
    class_list: OnceCell<MethodRef>,
}

impl ImportHook {
    pub fn new(interop: &Arc<Interop>) -> Arc<Self> {
        Arc::new(Self {
            interop: Arc::downgrade(interop),
            class_list: OnceCell::new(),
        })
    }

    /// Rebinds `__import__` in the builtins namespace of `ts`.
    pub fn install(self: &Arc<Self>, ts: &ThreadState) {
        let hook = self.clone();
        ts.builtins().set(
            "__import__",
            Value::native("__import__", move |ts, args| hook.import(ts, args)),
        );
        trace!(state = ts.id(), "import hook installed");
    }

    fn import(&self, ts: &ThreadState, args: &[Value]) -> ScriptResult<Value> {
        let native = default_import(ts, args);
        if native.is_ok() || !ts.error_matches(Builtin::Import) {
            return native;
        }
        ts.clear_error();
        let path = import_name(ts, args)?;
        let allow = AllowList::from_value(args.get(3));
        let Some(interop) = self.interop.upgrade() else {
            return Err(ts.raise(Builtin::Runtime, "bridge has been shut down"));
        };
        let Some(link) = interop.link(ts.id()) else {
            return Err(unresolved(ts, path));
        };
        self.import_host_path(&interop, &link, ts, path, &allow)
    }

    fn list_members(&self, interop: &Interop, package: &str) -> HostResult<Vec<String>> {
        let host = interop.host();
        let method = self.class_list.get_or_try_init(|| {
            let class = host.find_class(CLASS_LIST_CLASS)?;
            host.get_method(&class, "get", &["java.lang.String"])
        })?;
        let listed = host.call_method(None, method, &[HostValue::Ref(host.new_string(package))])?;
        let Some(array) = listed.into_ref() else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for element in host.array_elements(&array)? {
            if let Some(name) = element.as_ref() {
                names.push(host.string_chars(name)?);
            }
        }
        Ok(names)
    }

    fn import_host_path(
        &self,
        interop: &Arc<Interop>,
        link: &ContextLink,
        ts: &ThreadState,
        path: &str,
        allow: &AllowList,
    ) -> ScriptResult<Value> {
        let members = self
            .list_members(interop, path)
            .map_err(|_| interop.process_import_exception(ts).unwrap_or_else(|| unresolved(ts, path)))?;
        let loader = link.class_loader();
        let host = interop.host();
        let mut bound = Vec::new();
        for member in &members {
            let simple = member.rsplit('.').next().unwrap_or(member);
            if !allow.permits(simple) {
                continue;
            }
            match interop.load_class(&loader, member) {
                Ok(class) => bound.push((simple.to_string(), class)),
                Err(_) => {
                    host.exception_clear();
                    trace!(class = %member, "listed class not loadable");
                }
            }
        }

        if bound.is_empty() {
            // `import a.b.Class` names a class inside a listed package
            if let Some((parent, simple)) = path.rsplit_once('.') {
                let parent_members = self
                    .list_members(interop, parent)
                    .map_err(|_| interop.process_import_exception(ts).unwrap_or_else(|| unresolved(ts, path)))?;
                if parent_members.iter().any(|member| member == path) {
                    match interop.load_class(&loader, path) {
                        Ok(class) => {
                            debug!(path, "import resolved to host class");
                            return Ok(Value::Foreign(Arc::new(ClassProxy::new(interop, class))));
                        }
                        Err(_) => {
                            host.exception_clear();
                            trace!(class = simple, "listed class not loadable");
                        }
                    }
                }
            }
            debug!(path, "import unresolved");
            return Err(unresolved(ts, path));
        }

        let module = ts.module_or_insert(path, ModuleOrigin::HostPackage);
        for (simple, class) in bound {
            if !module.contains(&simple) {
                module.set(simple, Value::Foreign(Arc::new(ClassProxy::new(interop, class))));
            }
        }
        debug!(path, members = module.names().len(), "host package imported");
        Ok(Value::Module(module))
    }
}

fn unresolved(ts: &ThreadState, path: &str) -> crate::script::Raised {
    ts.raise_exception(
        ScriptException::new(Builtin::Import.get(), format!("No module named {path}"))
            .with_detail(ErrorDetail::ImportPath(path.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::module;
    use crate::host::{ClassBuilder, HostEnv, InProcessHost};
    use crate::script::{CompileMode, ScriptRuntime, exec};
    use crate::types::TypeCache;

    struct Fixture {
        host: Arc<InProcessHost>,
        _interop: Arc<Interop>,
        ts: Arc<ThreadState>,
    }

    fn fixture(packages: Option<&[&str]>) -> Fixture {
        let host = InProcessHost::new();
        let types = Arc::new(TypeCache::new(host.clone()));
        let interop = Interop::new(host.clone(), types, true);
        let ts = ScriptRuntime::new().new_interpreter();
        let loader = match packages {
            Some(packages) => host.restricted_class_loader(packages),
            None => host.system_class_loader(),
        };
        let bridge_module = module::create(&interop, "embed");
        interop.attach(ts.id(), Arc::new(ContextLink::new(1, false, bridge_module, loader)));
        ImportHook::new(&interop).install(&ts);
        Fixture {
            host,
            _interop: interop,
            ts,
        }
    }

    fn run(f: &Fixture, source: &str) -> ScriptResult<Value> {
        exec::exec_source(&f.ts, source, CompileMode::File, "<test>", f.ts.main())
    }

    #[test]
    fn native_modules_take_the_fast_path() {
        let f = fixture(None);
        run(&f, "import math").expect("math");
        assert!(matches!(f.ts.main().get("math"), Some(Value::Module(_))));
    }

    #[test]
    fn class_path_binds_class_proxy() {
        let f = fixture(None);
        run(&f, "import java.util.ArrayList").expect("import");
        let bound = f.ts.main().get("ArrayList").expect("bound");
        assert!(bound.foreign::<ClassProxy>().is_some());
    }

    #[test]
    fn package_import_and_from_list() {
        let f = fixture(None);
        run(&f, "from java.lang import Math, Integer").expect("from import");
        assert!(f.ts.main().get("Math").is_some());
        let package = f.ts.module("java.lang").expect("package module");
        assert!(package.contains("Math"));
        assert!(!package.contains("String"));
        run(&f, "from java.lang import String").expect("second import");
        assert!(package.contains("String"));
    }

    #[test]
    fn unknown_path_is_unresolved() {
        let f = fixture(None);
        assert!(run(&f, "import nonexistent.pkg.Thing").is_err());
        let err = f.ts.fetch_error().expect("pending");
        assert!(err.is(Builtin::Import));
        assert_eq!(err.detail, Some(ErrorDetail::ImportPath("nonexistent.pkg.Thing".into())));
    }

    #[test]
    fn allow_list_excluding_only_member_is_unresolved() {
        let f = fixture(None);
        f.host.list_in_package("demo.only", "Missing");
        let object = f.host.find_class("java.lang.Object").expect("Object");
        f.host.register_class(
            ClassBuilder::new("demo.single.Widget").extends(&object).build(),
        );
        run(&f, "from demo.single import Widget").expect("widget");
        assert!(run(&f, "from demo.single import Gadget").is_err());
        assert!(f.ts.fetch_error().expect("pending").is(Builtin::Import));
        assert!(run(&f, "import demo.only").is_err());
        assert!(f.ts.fetch_error().expect("pending").is(Builtin::Import));
        assert!(!f.host.exception_check());
    }

    #[test]
    fn restricted_loader_skips_unloadable_members() {
        let f = fixture(Some(&["java.util"]));
        assert!(run(&f, "import java.lang").is_err());
        assert!(f.ts.fetch_error().expect("pending").is(Builtin::Import));
        run(&f, "import java.util").expect("java.util");
    }
}
