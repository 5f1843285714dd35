//! The bridge module injected into every execution context.

use std::sync::{Arc, Weak};

use tracing::trace;

use super::Interop;
use super::proxy::ClassProxy;
use crate::script::{Builtin, Module, ModuleOrigin, ModuleRef, ScriptResult, ThreadState, Value};
use crate::types::JavaKind;

fn upgrade(ts: &ThreadState, interop: &Weak<Interop>) -> ScriptResult<Arc<Interop>> {
    interop
        .upgrade()
        .ok_or_else(|| ts.raise(Builtin::Runtime, "bridge has been shut down"))
}

fn class_name<'a>(ts: &ThreadState, function: &str, args: &'a [Value]) -> ScriptResult<&'a str> {
    match args {
        [Value::Text(name)] => Ok(name),
        _ => Err(ts.raise(
            Builtin::Type,
            format!("{function}() takes exactly one string argument"),
        )),
    }
}

/// Builds the bridge module: class lookup natives, `printStack` and the
/// `<KIND>_ID` constants.
pub fn create(interop: &Arc<Interop>, name: &str) -> ModuleRef {
    let module = Module::new(name, ModuleOrigin::Created);
    module.set("__name__", Value::text(name));

    let weak = Arc::downgrade(interop);
    module.set("findClass", Value::native("findClass", move |ts, args| {
        let interop = upgrade(ts, &weak)?;
        let name = class_name(ts, "findClass", args)?;
        let Some(link) = interop.link(ts.id()) else {
            return Err(ts.raise(Builtin::Runtime, "no execution context is active"));
        };
        let class = interop
            .load_class(&link.class_loader(), &name.replace('/', "."))
            .map_err(|thrown| interop.drain(ts, thrown))?;
        trace!(class = class.name(), context = link.context_id(), "findClass");
        Ok(Value::Foreign(Arc::new(ClassProxy::new(&interop, class))))
    }));

    let weak = Arc::downgrade(interop);
    module.set("forName", Value::native("forName", move |ts, args| {
        let interop = upgrade(ts, &weak)?;
        let name = class_name(ts, "forName", args)?;
        let class = interop
            .host()
            .find_class(name)
            .map_err(|thrown| interop.drain(ts, thrown))?;
        Ok(Value::Foreign(Arc::new(ClassProxy::new(&interop, class))))
    }));

    let weak = Arc::downgrade(interop);
    module.set("printStack", Value::native("printStack", move |ts, args| {
        let interop = upgrade(ts, &weak)?;
        let [flag] = args else {
            return Err(ts.raise(Builtin::Type, "printStack() takes exactly one argument"));
        };
        if let Some(link) = interop.link(ts.id()) {
            link.set_print_stack(flag.truthy());
        }
        Ok(Value::None)
    }));

    for kind in JavaKind::ALL {
        module.set(format!("{}_ID", kind.name()), Value::Int(kind.id() as i64));
    }
    module.set("NULL_ID", Value::Int(JavaKind::NULL_ID as i64));
    module
}
