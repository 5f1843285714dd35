//==================================================
// File: bridge/proxy.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Script views of Host objects, classes and methods
// Objective: Resolve members lazily, pick overloads by argument shape and
//            convert every argument and result through the value bridge
//==================================================

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::trace;

use super::array::ArrayProxy;
use super::collections::HostContainer;
use super::exceptions::raise_bridge_error;
use super::Interop;
use crate::host::{ClassRef, FieldRef, GlobalRef, HostRef, HostValue, MethodRef};
use crate::script::{Builtin, Foreign, ScriptResult, ThreadState, Value};
use crate::types::JavaKind;

//==================================================
// Section 1.0 - Member tables
//==================================================

#[derive(Default)]
struct Members {
    methods: BTreeMap<String, Vec<MethodRef>>,
    fields: BTreeMap<String, FieldRef>,
}

impl Members {
    fn collect(interop: &Interop, class: &ClassRef, statics_only: bool) -> Members {
        let host = interop.host();
        let mut members = Members::default();
        for method in host.methods(class) {
            if statics_only && !method.is_static {
                continue;
            }
            members
                .methods
                .entry(method.name.clone())
                .or_default()
                .push(method);
        }
        for field in host.fields(class) {
            if statics_only && !field.is_static {
                continue;
            }
            members.fields.insert(field.name.clone(), field);
        }
        trace!(
            class = class.name(),
            methods = members.methods.len(),
            fields = members.fields.len(),
            "members resolved"
        );
        members
    }

    fn names(&self) -> Vec<String> {
        self.methods.keys().chain(self.fields.keys()).cloned().collect()
    }
}

fn name_tuple<'a>(names: impl Iterator<Item = &'a String>) -> Value {
    Value::tuple(names.map(Value::text).collect())
}

/// Host object behind a proxy value, if any.
pub fn host_object_of(value: &Value) -> Option<HostRef> {
    if let Some(object) = value.foreign::<ObjectProxy>() {
        return Some(object.object().clone());
    }
    if let Some(class) = value.foreign::<ClassProxy>() {
        return Some(class.mirror().clone());
    }
    value.foreign::<ArrayProxy>().map(|array| array.array().clone())
}

fn read_field(
    interop: &Arc<Interop>,
    ts: &ThreadState,
    target: Option<&HostRef>,
    field: &FieldRef,
) -> ScriptResult<Value> {
    let host = interop.host();
    let class = host.field_type(field).map_err(|thrown| interop.drain(ts, thrown))?;
    let kind = interop
        .types()
        .classify(&class)
        .map_err(|err| raise_bridge_error(ts, err))?;
    let value = host
        .get_field(target, field)
        .map_err(|thrown| interop.drain(ts, thrown))?;
    interop.to_script(ts, value, kind)
}

fn write_field(
    interop: &Interop,
    ts: &ThreadState,
    target: Option<&HostRef>,
    field: &FieldRef,
    value: &Value,
) -> ScriptResult<()> {
    let host = interop.host();
    let class = host.field_type(field).map_err(|thrown| interop.drain(ts, thrown))?;
    let kind = interop
        .types()
        .classify(&class)
        .map_err(|err| raise_bridge_error(ts, err))?;
    let converted = interop.coerce(ts, value, &class, kind, 1)?;
    host.set_field(target, field, converted)
        .map_err(|thrown| interop.drain(ts, thrown))
}

fn no_such_field(ts: &ThreadState) -> crate::script::Raised {
    ts.raise(Builtin::Attribute, "No such field.")
}

fn host_equals(interop: &Interop, ts: &ThreadState, object: &HostRef, other: &Value) -> ScriptResult<bool> {
    match host_object_of(other) {
        Some(other) => interop
            .host()
            .equals(object, &other)
            .map_err(|thrown| interop.drain(ts, thrown)),
        None => Ok(false),
    }
}

//==================================================
// Section 2.0 - Object proxy
//==================================================

/// Script view of a Host object. Holds a durable reference released on drop.
pub struct ObjectProxy {
    interop: Arc<Interop>,
    object: HostRef,
    class: ClassRef,
    reference: Option<GlobalRef>,
    members: OnceCell<Members>,
}

impl ObjectProxy {
    pub fn new(interop: &Arc<Interop>, object: HostRef) -> Self {
        let reference = interop.host().new_global_ref(&object);
        Self {
            interop: interop.clone(),
            class: object.class().clone(),
            object,
            reference: Some(reference),
            members: OnceCell::new(),
        }
    }

    pub fn object(&self) -> &HostRef {
        &self.object
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    fn members(&self) -> &Members {
        self.members
            .get_or_init(|| Members::collect(&self.interop, &self.class, false))
    }

    fn container(&self) -> Option<HostContainer<'_>> {
        self.interop.container(&self.object, &self.class)
    }
}

impl Drop for ObjectProxy {
    fn drop(&mut self) {
        if let Some(reference) = self.reference.take() {
            self.interop.host().delete_global_ref(reference);
        }
    }
}

impl Foreign for ObjectProxy {
    fn type_name(&self) -> &str {
        "host_object"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, ts: &ThreadState, name: &str) -> ScriptResult<Value> {
        let members = self.members();
        match name {
            "__name__" => return Ok(Value::text(self.class.name())),
            "__methods__" => return Ok(name_tuple(members.methods.keys())),
            "__members__" => return Ok(name_tuple(members.fields.keys())),
            _ => {}
        }
        if let Some(field) = members.fields.get(name) {
            return read_field(&self.interop, ts, Some(&self.object), field);
        }
        if let Some(overloads) = members.methods.get(name) {
            return Ok(Value::Foreign(Arc::new(MethodProxy::new(
                &self.interop,
                name,
                Some(self.object.clone()),
                overloads.clone(),
            ))));
        }
        Err(ts.raise(
            Builtin::Attribute,
            format!("'{}' object has no attribute '{}'", self.class.simple_name(), name),
        ))
    }

    fn set_attr(&self, ts: &ThreadState, name: &str, value: Value) -> ScriptResult<()> {
        match self.members().fields.get(name) {
            Some(field) => write_field(&self.interop, ts, Some(&self.object), field, &value),
            None => Err(no_such_field(ts)),
        }
    }

    fn get_item(&self, ts: &ThreadState, index: &Value) -> ScriptResult<Value> {
        if let Some(container) = self.container() {
            if let Some(found) = container.get_item(ts, index)? {
                return Ok(found);
            }
        }
        Err(ts.raise(
            Builtin::Type,
            format!("'{}' object is not subscriptable", self.class.simple_name()),
        ))
    }

    fn set_item(&self, ts: &ThreadState, index: &Value, value: Value) -> ScriptResult<()> {
        if let Some(container) = self.container() {
            if container.set_item(ts, index, value)? {
                return Ok(());
            }
        }
        Err(ts.raise(
            Builtin::Type,
            format!("'{}' object does not support item assignment", self.class.simple_name()),
        ))
    }

    fn len(&self, ts: &ThreadState) -> ScriptResult<usize> {
        if let Some(container) = self.container() {
            if let Some(len) = container.len(ts)? {
                return Ok(len);
            }
        }
        Err(ts.raise(
            Builtin::Type,
            format!("object of type '{}' has no len()", self.class.simple_name()),
        ))
    }

    fn contains(&self, ts: &ThreadState, item: &Value) -> ScriptResult<bool> {
        if let Some(container) = self.container() {
            if let Some(found) = container.contains(ts, item)? {
                return Ok(found);
            }
        }
        Err(ts.raise(
            Builtin::Type,
            format!("argument of type '{}' is not iterable", self.class.simple_name()),
        ))
    }

    fn to_number(&self, ts: &ThreadState) -> ScriptResult<Option<Value>> {
        match self.container() {
            Some(container) => container.to_number(ts),
            None => Ok(None),
        }
    }

    fn to_text(&self, ts: &ThreadState) -> ScriptResult<String> {
        self.interop
            .host()
            .to_string(&self.object)
            .map_err(|thrown| self.interop.drain(ts, thrown))
    }

    fn equals(&self, ts: &ThreadState, other: &Value) -> ScriptResult<bool> {
        host_equals(&self.interop, ts, &self.object, other)
    }

    fn attr_names(&self) -> Vec<String> {
        self.members().names()
    }
}

//==================================================
// Section 3.0 - Class proxy
//==================================================

/// Script view of a Host class: static members, and a constructor when called.
pub struct ClassProxy {
    interop: Arc<Interop>,
    class: ClassRef,
    mirror: HostRef,
    reference: Option<GlobalRef>,
    members: OnceCell<Members>,
}

impl ClassProxy {
    pub fn new(interop: &Arc<Interop>, class: ClassRef) -> Self {
        let host = interop.host();
        let mirror = host.class_mirror(&class);
        let reference = host.new_global_ref(&mirror);
        Self {
            interop: interop.clone(),
            class,
            mirror,
            reference: Some(reference),
            members: OnceCell::new(),
        }
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// The `java.lang.Class` instance describing this class.
    pub fn mirror(&self) -> &HostRef {
        &self.mirror
    }

    fn members(&self) -> &Members {
        self.members
            .get_or_init(|| Members::collect(&self.interop, &self.class, true))
    }
}

impl Drop for ClassProxy {
    fn drop(&mut self) {
        if let Some(reference) = self.reference.take() {
            self.interop.host().delete_global_ref(reference);
        }
    }
}

impl Foreign for ClassProxy {
    fn type_name(&self) -> &str {
        "host_class"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, ts: &ThreadState, name: &str) -> ScriptResult<Value> {
        let members = self.members();
        match name {
            "__name__" => return Ok(Value::text(self.class.name())),
            "__methods__" => return Ok(name_tuple(members.methods.keys())),
            "__members__" => return Ok(name_tuple(members.fields.keys())),
            _ => {}
        }
        if let Some(field) = members.fields.get(name) {
            return read_field(&self.interop, ts, None, field);
        }
        if let Some(overloads) = members.methods.get(name) {
            return Ok(Value::Foreign(Arc::new(MethodProxy::new(
                &self.interop,
                name,
                None,
                overloads.clone(),
            ))));
        }
        // instance methods are listed so the error can say what went wrong
        let instance_method = self
            .interop
            .host()
            .methods(&self.class)
            .iter()
            .any(|method| method.name == name);
        if instance_method {
            return Err(ts.raise(
                Builtin::Runtime,
                "Instantiate this class before calling an object method.",
            ));
        }
        Err(ts.raise(
            Builtin::Attribute,
            format!("type object '{}' has no attribute '{}'", self.class.simple_name(), name),
        ))
    }

    fn set_attr(&self, ts: &ThreadState, name: &str, value: Value) -> ScriptResult<()> {
        match self.members().fields.get(name) {
            Some(field) => write_field(&self.interop, ts, None, field, &value),
            None => Err(no_such_field(ts)),
        }
    }

    fn call(&self, ts: &ThreadState, args: &[Value]) -> ScriptResult<Value> {
        let constructors = self.interop.host().constructors(&self.class);
        if constructors.is_empty() {
            return Err(ts.raise(Builtin::Type, "No public constructor"));
        }
        let ctor = select_overload(&self.interop, ts, &constructors, args)?;
        let converted = coerce_args(&self.interop, ts, &ctor, args)?;
        let object = self
            .interop
            .host()
            .new_object(&self.class, &ctor, &converted)
            .map_err(|thrown| self.interop.drain(ts, thrown))?;
        trace!(class = self.class.name(), "host object constructed");
        Ok(Value::Foreign(Arc::new(ObjectProxy::new(&self.interop, object))))
    }

    fn to_text(&self, _ts: &ThreadState) -> ScriptResult<String> {
        Ok(format!("<host_class '{}'>", self.class.name()))
    }

    fn equals(&self, _ts: &ThreadState, other: &Value) -> ScriptResult<bool> {
        Ok(other
            .foreign::<ClassProxy>()
            .is_some_and(|other| other.class.id() == self.class.id()))
    }

    fn attr_names(&self) -> Vec<String> {
        self.members().names()
    }
}

//==================================================
// Section 4.0 - Methods and overloads
//==================================================

/// A named method bound to its receiver, with every overload of that name.
pub struct MethodProxy {
    interop: Arc<Interop>,
    name: String,
    target: Option<HostRef>,
    overloads: Vec<MethodRef>,
}

impl MethodProxy {
    pub fn new(interop: &Arc<Interop>, name: &str, target: Option<HostRef>, overloads: Vec<MethodRef>) -> Self {
        Self {
            interop: interop.clone(),
            name: name.to_string(),
            target,
            overloads,
        }
    }
}

impl Foreign for MethodProxy {
    fn type_name(&self) -> &str {
        "host_method"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, ts: &ThreadState, name: &str) -> ScriptResult<Value> {
        match name {
            "__name__" => Ok(Value::text(&self.name)),
            _ => Err(ts.raise(
                Builtin::Attribute,
                format!("'host_method' object has no attribute '{name}'"),
            )),
        }
    }

    fn call(&self, ts: &ThreadState, args: &[Value]) -> ScriptResult<Value> {
        let method = select_overload(&self.interop, ts, &self.overloads, args)?;
        if !method.is_static && self.target.is_none() {
            return Err(ts.raise(
                Builtin::Runtime,
                "Instantiate this class before calling an object method.",
            ));
        }
        invoke(&self.interop, ts, self.target.as_ref(), &method, args)
    }

    fn to_text(&self, _ts: &ThreadState) -> ScriptResult<String> {
        Ok(format!("<host_method {}>", self.name))
    }
}

/// Picks the overload to call.
///
/// A single overload is always chosen so that arity and argument errors name
/// the offending position. Otherwise candidates of matching arity are tried in
/// declaration order and the first whose every parameter accepts its
/// argument wins.
fn select_overload(
    interop: &Interop,
    ts: &ThreadState,
    overloads: &[MethodRef],
    args: &[Value],
) -> ScriptResult<MethodRef> {
    if let [only] = overloads {
        return Ok(only.clone());
    }
    let candidates: Vec<&MethodRef> = overloads
        .iter()
        .filter(|method| method.arity() == args.len())
        .collect();
    if let [only] = candidates.as_slice() {
        return Ok((*only).clone());
    }
    for candidate in candidates {
        let params = interop
            .host()
            .parameter_types(candidate)
            .map_err(|thrown| interop.drain(ts, thrown))?;
        let mut accepted = true;
        for (arg, param) in args.iter().zip(&params) {
            let kind = interop
                .types()
                .classify(param)
                .map_err(|err| raise_bridge_error(ts, err))?;
            if !interop.matches(arg, param, kind) {
                accepted = false;
                break;
            }
        }
        if accepted {
            trace!(method = ?candidate, "overload selected");
            return Ok(candidate.clone());
        }
    }
    Err(ts.raise(Builtin::Runtime, "Matching overloaded method not found."))
}

fn coerce_args(
    interop: &Interop,
    ts: &ThreadState,
    method: &MethodRef,
    args: &[Value],
) -> ScriptResult<Vec<HostValue>> {
    if args.len() != method.arity() {
        return Err(ts.raise(
            Builtin::Runtime,
            format!(
                "Invalid number of arguments: {}, expected {}.",
                args.len(),
                method.arity()
            ),
        ));
    }
    let params = interop
        .host()
        .parameter_types(method)
        .map_err(|thrown| interop.drain(ts, thrown))?;
    let mut converted = Vec::with_capacity(args.len());
    for (index, (arg, param)) in args.iter().zip(&params).enumerate() {
        let kind = interop
            .types()
            .classify(param)
            .map_err(|err| raise_bridge_error(ts, err))?;
        converted.push(interop.coerce(ts, arg, param, kind, index + 1)?);
    }
    Ok(converted)
}

/// Calls `method` with Script arguments and converts the result by the
/// declared return kind.
pub fn invoke(
    interop: &Arc<Interop>,
    ts: &ThreadState,
    target: Option<&HostRef>,
    method: &MethodRef,
    args: &[Value],
) -> ScriptResult<Value> {
    interop.register_exceptions(ts, method);
    let converted = coerce_args(interop, ts, method, args)?;
    let host = interop.host();
    let result = host
        .call_method(target, method, &converted)
        .map_err(|thrown| interop.drain(ts, thrown))?;
    let return_class = host
        .return_type(method)
        .map_err(|thrown| interop.drain(ts, thrown))?;
    let kind = interop
        .types()
        .classify(&return_class)
        .map_err(|err| raise_bridge_error(ts, err))?;
    if kind == JavaKind::Void {
        return Ok(Value::None);
    }
    interop.to_script(ts, result, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostEnv, InProcessHost};
    use crate::script::{ScriptRuntime, exec};
    use crate::types::TypeCache;

    struct Fixture {
        host: Arc<InProcessHost>,
        interop: Arc<Interop>,
        ts: Arc<ThreadState>,
    }

    fn fixture() -> Fixture {
        let host = InProcessHost::new();
        let types = Arc::new(TypeCache::new(host.clone()));
        let interop = Interop::new(host.clone(), types, true);
        let ts = ScriptRuntime::new().new_interpreter();
        Fixture { host, interop, ts }
    }

    fn class(f: &Fixture, name: &str) -> Value {
        let class = f.host.find_class(name).expect("class");
        Value::Foreign(Arc::new(ClassProxy::new(&f.interop, class)))
    }

    #[test]
    fn overloads_follow_argument_shape() {
        let f = fixture();
        let math = class(&f, "java.lang.Math");
        let max = exec::get_attr(&f.ts, &math, "max").expect("max");
        let ints = exec::call(&f.ts, &max, &[Value::Int(3), Value::Int(9)]).expect("int max");
        assert!(matches!(ints, Value::Int(9)));
        let doubles = exec::call(&f.ts, &max, &[Value::Float(1.5), Value::Float(0.5)]).expect("double max");
        assert!(matches!(doubles, Value::Float(x) if x == 1.5));
        let longs = exec::call(&f.ts, &max, &[Value::Long(2), Value::Int(1)]).expect("long max");
        assert!(matches!(longs, Value::Long(2)));
    }

    #[test]
    fn unmatched_overload_is_reported() {
        let f = fixture();
        let math = class(&f, "java.lang.Math");
        let max = exec::get_attr(&f.ts, &math, "max").expect("max");
        assert!(exec::call(&f.ts, &max, &[Value::text("a"), Value::Int(1)]).is_err());
        let err = f.ts.fetch_error().expect("pending");
        assert_eq!(err.render(), "RuntimeError: Matching overloaded method not found.");
    }

    #[test]
    fn constructed_list_round_trips_elements() {
        let f = fixture();
        let list_class = class(&f, "java.util.ArrayList");
        let list = exec::call(&f.ts, &list_class, &[]).expect("construct");
        let add = exec::get_attr(&f.ts, &list, "add").expect("add");
        exec::call(&f.ts, &add, &[Value::text("a")]).expect("add a");
        exec::call(&f.ts, &add, &[Value::text("b")]).expect("add b");
        assert!(exec::call(&f.ts, &add, &[Value::Int(2)]).is_err());
        assert_eq!(
            f.ts.fetch_error().expect("pending").message.as_deref(),
            Some("Expected object parameter at 1.")
        );
        let size = exec::get_attr(&f.ts, &list, "size").expect("size");
        assert!(matches!(exec::call(&f.ts, &size, &[]), Ok(Value::Int(2))));
        let get = exec::get_attr(&f.ts, &list, "get").expect("get");
        let first = exec::call(&f.ts, &get, &[Value::Int(0)]).expect("get 0");
        assert_eq!(first.as_text(), Some("a"));
        assert_eq!(exec::to_text(&f.ts, &list).expect("text"), "[a, b]");
    }

    #[test]
    fn arity_and_instance_errors() {
        let f = fixture();
        let integer = class(&f, "java.lang.Integer");
        let parse = exec::get_attr(&f.ts, &integer, "parseInt").expect("parseInt");
        assert!(exec::call(&f.ts, &parse, &[]).is_err());
        assert_eq!(
            f.ts.fetch_error().expect("pending").render(),
            "RuntimeError: Invalid number of arguments: 0, expected 1."
        );
        let list_class = class(&f, "java.util.ArrayList");
        assert!(exec::get_attr(&f.ts, &list_class, "size").is_err());
        assert_eq!(
            f.ts.fetch_error().expect("pending").message.as_deref(),
            Some("Instantiate this class before calling an object method.")
        );
    }

    #[test]
    fn interfaces_have_no_constructor() {
        let f = fixture();
        let list = class(&f, "java.util.List");
        assert!(exec::call(&f.ts, &list, &[]).is_err());
        assert_eq!(
            f.ts.fetch_error().expect("pending").render(),
            "TypeError: No public constructor"
        );
    }

    #[test]
    fn static_fields_read_through_class_proxy() {
        let f = fixture();
        let integer = class(&f, "java.lang.Integer");
        let members = exec::get_attr(&f.ts, &integer, "__members__").expect("members");
        assert_eq!(exec::repr(&f.ts, &members).expect("repr"), "('TYPE',)");
        let mirror = exec::get_attr(&f.ts, &integer, "TYPE").expect("TYPE");
        assert_eq!(
            exec::get_attr(&f.ts, &mirror, "__name__").expect("name").as_text(),
            Some("int")
        );
        assert!(exec::set_attr(&f.ts, &integer, "MAX", Value::Int(1)).is_err());
        assert_eq!(
            f.ts.fetch_error().expect("pending").render(),
            "AttributeError: No such field."
        );
    }

    #[test]
    fn proxies_release_their_references() {
        let f = fixture();
        let before = f.host.live_global_refs();
        {
            let list = class(&f, "java.util.ArrayList");
            let _object = exec::call(&f.ts, &list, &[]).expect("construct");
            assert!(f.host.live_global_refs() > before);
        }
        f.interop.release();
        f.interop.types().release();
        assert_eq!(f.host.live_global_refs(), 0);
    }
}
