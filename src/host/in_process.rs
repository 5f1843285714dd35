//==================================================
// File: host/in_process.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Reference Host runtime living in the same process as the bridge
// Objective: Back the HostEnv seam with a class registry, Rust-implemented
//            members, counted durable references and thread-keyed
//            pending exceptions
//==================================================

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::bootstrap;
use super::class::{MethodBody, Payload};
use super::{
    ClassRef, FieldRef, GlobalRef, HostClass, HostEnv, HostField, HostMethod, HostObject, HostRef,
    HostResult, HostValue, MethodRef, Throw, Thrown,
};

/// Package name to the dotted class names the class-list service reports.
pub(crate) type PackageIndex = Arc<RwLock<BTreeMap<String, BTreeSet<String>>>>;

/// State behind a `java.lang.ClassLoader` instance.
#[derive(Debug, Clone)]
pub struct LoaderSpec {
    /// `None` loads every registered class; otherwise only classes whose
    /// package starts with one of the prefixes.
    pub packages: Option<Vec<String>>,
}

impl LoaderSpec {
    pub fn permits(&self, class_name: &str) -> bool {
        match &self.packages {
            None => true,
            Some(prefixes) => prefixes
                .iter()
                .any(|prefix| class_name.starts_with(prefix.as_str())),
        }
    }
}

//==================================================
// Section 1.0 - Host state
//==================================================

pub struct InProcessHost {
    classes: RwLock<HashMap<String, ClassRef>>,
    arrays: Mutex<HashMap<u64, ClassRef>>,
    mirrors: Mutex<HashMap<u64, HostRef>>,
    packages: PackageIndex,
    pending: Mutex<HashMap<ThreadId, HostRef>>,
    globals: Mutex<HashMap<u64, HostRef>>,
    next_global: AtomicU64,
    globals_created: AtomicU64,
    globals_deleted: AtomicU64,
    described: AtomicU64,
}

impl InProcessHost {
    /// Creates a host with the bootstrap class library installed.
    pub fn new() -> Arc<Self> {
        let host = Arc::new(Self {
            classes: RwLock::new(HashMap::new()),
            arrays: Mutex::new(HashMap::new()),
            mirrors: Mutex::new(HashMap::new()),
            packages: Arc::new(RwLock::new(BTreeMap::new())),
            pending: Mutex::new(HashMap::new()),
            globals: Mutex::new(HashMap::new()),
            next_global: AtomicU64::new(1),
            globals_created: AtomicU64::new(0),
            globals_deleted: AtomicU64::new(0),
            described: AtomicU64::new(0),
        });
        bootstrap::install(&host);
        debug!(classes = host.classes.read().len(), "in-process host ready");
        host
    }

    /// Makes `class` visible to `find_class`, class loaders and the class-list service.
    pub fn register_class(&self, class: ClassRef) {
        if !class.is_primitive() {
            if let Some((package, _)) = class.name().rsplit_once('.') {
                self.packages
                    .write()
                    .entry(package.to_string())
                    .or_default()
                    .insert(class.name().to_string());
            }
        }
        trace!(class = class.name(), "class registered");
        self.classes.write().insert(class.name().to_string(), class);
    }

    /// Adds a name to the class-list service without registering a class, the
    /// way a package index can mention classes missing from the classpath.
    pub fn list_in_package(&self, package: &str, class_name: &str) {
        self.packages
            .write()
            .entry(package.to_string())
            .or_default()
            .insert(format!("{package}.{class_name}"));
    }

    pub(crate) fn package_index(&self) -> PackageIndex {
        self.packages.clone()
    }

    pub fn system_class_loader(&self) -> HostRef {
        self.new_loader(LoaderSpec { packages: None })
    }

    /// Loader that only resolves classes under the given package prefixes.
    pub fn restricted_class_loader(&self, packages: &[&str]) -> HostRef {
        self.new_loader(LoaderSpec {
            packages: Some(packages.iter().map(|p| p.to_string()).collect()),
        })
    }

    fn new_loader(&self, spec: LoaderSpec) -> HostRef {
        let class = self.require("java.lang.ClassLoader");
        HostObject::new(class, Payload::native(spec))
    }

    /// Wraps a primitive in its wrapper class (`Int` becomes `java.lang.Integer`).
    pub fn new_boxed(&self, value: HostValue) -> Option<HostRef> {
        let wrapper = match value {
            HostValue::Boolean(_) => "java.lang.Boolean",
            HostValue::Byte(_) => "java.lang.Byte",
            HostValue::Char(_) => "java.lang.Character",
            HostValue::Short(_) => "java.lang.Short",
            HostValue::Int(_) => "java.lang.Integer",
            HostValue::Long(_) => "java.lang.Long",
            HostValue::Float(_) => "java.lang.Float",
            HostValue::Double(_) => "java.lang.Double",
            HostValue::Ref(object) => return Some(object),
            HostValue::Null | HostValue::Void => return None,
        };
        Some(HostObject::new(self.require(wrapper), Payload::Boxed(value)))
    }

    /// Instantiates a throwable without making it pending.
    pub fn new_throwable(&self, class_name: &str, message: Option<&str>, cause: Option<HostRef>) -> HostRef {
        let class = self
            .lookup_class(class_name)
            .unwrap_or_else(|| self.require("java.lang.RuntimeException"));
        HostObject::new(
            class,
            Payload::Throwable {
                message: message.map(str::to_string),
                cause,
            },
        )
    }

    pub fn live_global_refs(&self) -> usize {
        self.globals.lock().len()
    }

    pub fn global_refs_created(&self) -> u64 {
        self.globals_created.load(Ordering::SeqCst)
    }

    pub fn global_refs_deleted(&self) -> u64 {
        self.globals_deleted.load(Ordering::SeqCst)
    }

    /// Number of times a pending exception was described to the console.
    pub fn describe_count(&self) -> u64 {
        self.described.load(Ordering::SeqCst)
    }

    pub(crate) fn require(&self, name: &str) -> ClassRef {
        match self.classes.read().get(name) {
            Some(class) => class.clone(),
            None => panic!("bootstrap class {name} missing"),
        }
    }

    //==================================================
    // Section 2.0 - Dispatch helpers
    //==================================================

    fn ancestry(&self, class: &ClassRef) -> Vec<ClassRef> {
        let mut chain = Vec::new();
        let mut cursor = Some(class.clone());
        while let Some(current) = cursor {
            cursor = current.superclass().cloned();
            chain.push(current);
        }
        chain
    }

    fn implements(&self, class: &ClassRef, target: &ClassRef) -> bool {
        class.interfaces().iter().any(|interface| {
            interface.id() == target.id() || self.implements(interface, target)
        })
    }

    fn resolve_virtual(&self, receiver: &ClassRef, method: &MethodRef) -> MethodRef {
        self.methods(receiver)
            .into_iter()
            .find(|candidate| candidate.same_signature(method) && !candidate.is_static)
            .unwrap_or_else(|| method.clone())
    }

    fn raise(&self, throw: Throw) -> Thrown {
        match throw {
            Throw::New { class, message } => {
                let throwable = self.new_throwable(&class, message.as_deref(), None);
                self.throw(throwable)
            }
            Throw::Object(throwable) => self.throw(throwable),
            Throw::Pending => {
                if !self.exception_check() {
                    let throwable = self.new_throwable(
                        "java.lang.RuntimeException",
                        Some("method failed without a pending exception"),
                        None,
                    );
                    self.throw(throwable);
                }
                Thrown
            }
        }
    }

    fn throw_named(&self, class: &str, message: &str) -> Thrown {
        self.raise(Throw::new(class, message))
    }

    fn render_throwable(&self, throwable: &HostRef) -> String {
        match throwable.throwable_message() {
            Some(message) => format!("{}: {}", throwable.class().name(), message),
            None => throwable.class().name().to_string(),
        }
    }

    fn array_payload<'a>(&self, array: &'a HostRef) -> HostResult<&'a Mutex<Vec<HostValue>>> {
        match array.payload() {
            Payload::Array(elements) => Ok(elements),
            _ => Err(self.throw_named(
                "java.lang.IllegalArgumentException",
                "Argument is not an array",
            )),
        }
    }
}

//==================================================
// Section 3.0 - HostEnv implementation
//==================================================

impl HostEnv for InProcessHost {
    fn lookup_class(&self, name: &str) -> Option<ClassRef> {
        let name = name.replace('/', ".");
        if let Some(component) = name.strip_suffix("[]") {
            let component = self.lookup_class(component)?;
            return Some(self.array_class(&component));
        }
        self.classes.read().get(&name).cloned()
    }

    fn find_class(&self, name: &str) -> HostResult<ClassRef> {
        self.lookup_class(name)
            .ok_or_else(|| self.throw_named("java.lang.NoClassDefFoundError", name))
    }

    fn array_class(&self, component: &ClassRef) -> ClassRef {
        let object = self.require("java.lang.Object");
        self.arrays
            .lock()
            .entry(component.id())
            .or_insert_with(|| HostClass::array_of(component, &object))
            .clone()
    }

    fn class_mirror(&self, class: &ClassRef) -> HostRef {
        let class_class = self.require("java.lang.Class");
        self.mirrors
            .lock()
            .entry(class.id())
            .or_insert_with(|| HostObject::new(class_class, Payload::Mirror(class.clone())))
            .clone()
    }

    fn is_assignable_from(&self, from: &ClassRef, to: &ClassRef) -> bool {
        if from.id() == to.id() {
            return true;
        }
        if from.is_primitive() || to.is_primitive() {
            return false;
        }
        if to.name() == "java.lang.Object" {
            return true;
        }
        if let (Some(a), Some(b)) = (from.component(), to.component()) {
            if a.is_primitive() || b.is_primitive() {
                return a.id() == b.id();
            }
            return self.is_assignable_from(a, b);
        }
        self.ancestry(from)
            .iter()
            .any(|ancestor| ancestor.id() == to.id() || self.implements(ancestor, to))
    }

    fn get_method(&self, class: &ClassRef, name: &str, params: &[&str]) -> HostResult<MethodRef> {
        self.methods(class)
            .into_iter()
            .find(|m| m.name == name && m.params.iter().map(String::as_str).eq(params.iter().copied()))
            .ok_or_else(|| {
                self.throw_named(
                    "java.lang.NoSuchMethodError",
                    &format!("{}.{}({})", class.name(), name, params.join(", ")),
                )
            })
    }

    fn get_constructor(&self, class: &ClassRef, params: &[&str]) -> HostResult<MethodRef> {
        self.constructors(class)
            .into_iter()
            .find(|m| m.params.iter().map(String::as_str).eq(params.iter().copied()))
            .ok_or_else(|| {
                self.throw_named(
                    "java.lang.NoSuchMethodError",
                    &format!("{}.<init>({})", class.name(), params.join(", ")),
                )
            })
    }

    fn methods(&self, class: &ClassRef) -> Vec<MethodRef> {
        let mut visible: Vec<MethodRef> = Vec::new();
        let mut pending_interfaces = Vec::new();
        for ancestor in self.ancestry(class) {
            for method in ancestor.declared_methods() {
                if !visible.iter().any(|seen| seen.same_signature(method)) {
                    visible.push(method.clone());
                }
            }
            pending_interfaces.extend(ancestor.interfaces().iter().cloned());
        }
        while let Some(interface) = pending_interfaces.pop() {
            for method in interface.declared_methods() {
                if !visible.iter().any(|seen| seen.same_signature(method)) {
                    visible.push(method.clone());
                }
            }
            pending_interfaces.extend(interface.interfaces().iter().cloned());
        }
        visible
    }

    fn constructors(&self, class: &ClassRef) -> Vec<MethodRef> {
        class.declared_constructors().to_vec()
    }

    fn fields(&self, class: &ClassRef) -> Vec<FieldRef> {
        let mut visible: Vec<FieldRef> = Vec::new();
        for ancestor in self.ancestry(class) {
            for field in ancestor.declared_fields() {
                if !visible.iter().any(|seen| seen.name == field.name) {
                    visible.push(field.clone());
                }
            }
        }
        visible
    }

    fn parameter_types(&self, method: &HostMethod) -> HostResult<Vec<ClassRef>> {
        method.params.iter().map(|name| self.find_class(name)).collect()
    }

    fn return_type(&self, method: &HostMethod) -> HostResult<ClassRef> {
        self.find_class(&method.return_type)
    }

    fn field_type(&self, field: &HostField) -> HostResult<ClassRef> {
        self.find_class(&field.type_name)
    }

    fn exception_types(&self, method: &HostMethod) -> HostResult<Vec<ClassRef>> {
        method.exceptions.iter().map(|name| self.find_class(name)).collect()
    }

    fn call_method(
        &self,
        target: Option<&HostRef>,
        method: &MethodRef,
        args: &[HostValue],
    ) -> HostResult<HostValue> {
        if args.len() != method.arity() {
            return Err(self.throw_named(
                "java.lang.IllegalArgumentException",
                "wrong number of arguments",
            ));
        }
        let (receiver, method) = if method.is_static {
            (None, method.clone())
        } else {
            let Some(target) = target else {
                return Err(self.throw_named("java.lang.NullPointerException", &method.name));
            };
            (Some(target), self.resolve_virtual(target.class(), method))
        };
        match &method.body {
            MethodBody::Native(body) => body(self, receiver, args).map_err(|throw| self.raise(throw)),
            MethodBody::Constructor(_) => Err(self.throw_named(
                "java.lang.IllegalArgumentException",
                "constructors are invoked through new_object",
            )),
        }
    }

    fn new_object(
        &self,
        class: &ClassRef,
        ctor: &MethodRef,
        args: &[HostValue],
    ) -> HostResult<HostRef> {
        if class.is_interface() || class.is_primitive() || class.is_array() {
            return Err(self.throw_named("java.lang.InstantiationException", class.name()));
        }
        if args.len() != ctor.arity() {
            return Err(self.throw_named(
                "java.lang.IllegalArgumentException",
                "wrong number of arguments",
            ));
        }
        match &ctor.body {
            MethodBody::Constructor(body) => {
                let payload = body(self, class, args).map_err(|throw| self.raise(throw))?;
                Ok(HostObject::new(class.clone(), payload))
            }
            MethodBody::Native(_) => Err(self.throw_named(
                "java.lang.IllegalArgumentException",
                "not a constructor",
            )),
        }
    }

    fn get_field(&self, target: Option<&HostRef>, field: &FieldRef) -> HostResult<HostValue> {
        if field.is_static {
            return Ok(field.static_value.lock().clone());
        }
        let Some(target) = target else {
            return Err(self.throw_named("java.lang.NullPointerException", &field.name));
        };
        match target.payload() {
            Payload::Plain(values) => Ok(values.lock().get(&field.name).cloned().unwrap_or_default()),
            _ => Err(self.throw_named("java.lang.IllegalArgumentException", &field.name)),
        }
    }

    fn set_field(
        &self,
        target: Option<&HostRef>,
        field: &FieldRef,
        value: HostValue,
    ) -> HostResult<()> {
        if field.is_static {
            *field.static_value.lock() = value;
            return Ok(());
        }
        let Some(target) = target else {
            return Err(self.throw_named("java.lang.NullPointerException", &field.name));
        };
        match target.payload() {
            Payload::Plain(values) => {
                values.lock().insert(field.name.clone(), value);
                Ok(())
            }
            _ => Err(self.throw_named("java.lang.IllegalArgumentException", &field.name)),
        }
    }

    fn new_string(&self, text: &str) -> HostRef {
        HostObject::new(self.require("java.lang.String"), Payload::Str(text.to_string()))
    }

    fn string_chars(&self, string: &HostRef) -> HostResult<String> {
        string
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.throw_named("java.lang.ClassCastException", string.class().name()))
    }

    fn new_array(&self, component: &ClassRef, elements: Vec<HostValue>) -> HostRef {
        HostObject::new(self.array_class(component), Payload::Array(Mutex::new(elements)))
    }

    fn array_length(&self, array: &HostRef) -> HostResult<usize> {
        Ok(self.array_payload(array)?.lock().len())
    }

    fn array_elements(&self, array: &HostRef) -> HostResult<Vec<HostValue>> {
        Ok(self.array_payload(array)?.lock().clone())
    }

    fn release_array_elements(
        &self,
        array: &HostRef,
        elements: Vec<HostValue>,
        commit: bool,
    ) -> HostResult<()> {
        let storage = self.array_payload(array)?;
        if commit {
            let mut storage = storage.lock();
            if storage.len() != elements.len() {
                drop(storage);
                return Err(self.throw_named(
                    "java.lang.IndexOutOfBoundsException",
                    "array length changed while pinned",
                ));
            }
            *storage = elements;
        }
        Ok(())
    }

    fn to_string(&self, object: &HostRef) -> HostResult<String> {
        if let Some(text) = object.as_str() {
            return Ok(text.to_string());
        }
        let object_class = self.require("java.lang.Object");
        let method = self.get_method(&object_class, "toString", &[])?;
        let rendered = self.call_method(Some(object), &method, &[])?;
        match rendered.as_ref() {
            Some(string) => self.string_chars(string),
            None => Ok("null".to_string()),
        }
    }

    fn equals(&self, a: &HostRef, b: &HostRef) -> HostResult<bool> {
        let object_class = self.require("java.lang.Object");
        let method = self.get_method(&object_class, "equals", &["java.lang.Object"])?;
        let result = self.call_method(Some(a), &method, &[HostValue::Ref(b.clone())])?;
        Ok(matches!(result, HostValue::Boolean(true)))
    }

    fn new_global_ref(&self, object: &HostRef) -> GlobalRef {
        let id = self.next_global.fetch_add(1, Ordering::SeqCst);
        self.globals.lock().insert(id, object.clone());
        self.globals_created.fetch_add(1, Ordering::SeqCst);
        GlobalRef::new(id, object.clone())
    }

    fn delete_global_ref(&self, reference: GlobalRef) {
        if self.globals.lock().remove(&reference.id()).is_some() {
            self.globals_deleted.fetch_add(1, Ordering::SeqCst);
        } else {
            tracing::warn!(id = reference.id(), "deleting unknown global reference");
        }
    }

    fn exception_check(&self) -> bool {
        self.pending.lock().contains_key(&thread::current().id())
    }

    fn exception_occurred(&self) -> Option<HostRef> {
        self.pending.lock().get(&thread::current().id()).cloned()
    }

    fn exception_clear(&self) {
        self.pending.lock().remove(&thread::current().id());
    }

    fn exception_describe(&self) {
        let Some(throwable) = self.exception_occurred() else {
            return;
        };
        self.described.fetch_add(1, Ordering::SeqCst);
        let current = thread::current();
        eprintln!(
            "Exception in thread \"{}\" {}",
            current.name().unwrap_or("unnamed"),
            self.render_throwable(&throwable)
        );
        let mut cause = throwable.throwable_cause().cloned();
        while let Some(next) = cause {
            eprintln!("Caused by: {}", self.render_throwable(&next));
            cause = next.throwable_cause().cloned();
        }
    }

    fn throw(&self, throwable: HostRef) -> Thrown {
        trace!(class = throwable.class().name(), "host exception pending");
        self.pending.lock().insert(thread::current().id(), throwable);
        Thrown
    }

    fn throw_new(&self, class: &ClassRef, message: &str) -> Thrown {
        let throwable = HostObject::new(
            class.clone(),
            Payload::Throwable {
                message: Some(message.to_string()),
                cause: None,
            },
        );
        self.throw(throwable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_is_assignable_to_number_and_object() {
        let host = InProcessHost::new();
        let integer = host.find_class("java.lang.Integer").expect("Integer");
        let number = host.find_class("java.lang.Number").expect("Number");
        let object = host.find_class("java.lang.Object").expect("Object");
        let string = host.find_class("java.lang.String").expect("String");
        assert!(host.is_assignable_from(&integer, &number));
        assert!(host.is_assignable_from(&integer, &object));
        assert!(!host.is_assignable_from(&number, &integer));
        assert!(!host.is_assignable_from(&integer, &string));
    }

    #[test]
    fn array_classes_are_cached_per_component() {
        let host = InProcessHost::new();
        let int = host.find_class("int").expect("int");
        let a = host.array_class(&int);
        let b = host.find_class("int[]").expect("int[]");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_array());
    }

    #[test]
    fn missing_class_leaves_exception_pending() {
        let host = InProcessHost::new();
        assert!(host.find_class("does.not.Exist").is_err());
        assert!(host.exception_check());
        let pending = host.exception_occurred().expect("pending");
        assert_eq!(pending.class().name(), "java.lang.NoClassDefFoundError");
        host.exception_clear();
        assert!(!host.exception_check());
    }

    #[test]
    fn to_string_dispatches_virtually() {
        let host = InProcessHost::new();
        let boxed = host.new_boxed(HostValue::Int(7)).expect("boxed");
        assert_eq!(host.to_string(&boxed).expect("toString"), "7");
    }

    #[test]
    fn global_refs_are_counted() {
        let host = InProcessHost::new();
        let text = host.new_string("held");
        let reference = host.new_global_ref(&text);
        assert_eq!(host.live_global_refs(), 1);
        host.delete_global_ref(reference);
        assert_eq!(host.live_global_refs(), 0);
        assert_eq!(host.global_refs_deleted(), 1);
    }

    #[test]
    fn restricted_loader_refuses_foreign_packages() {
        let host = InProcessHost::new();
        let loader = host.restricted_class_loader(&["java.util"]);
        let loader_class = host.find_class("java.lang.ClassLoader").expect("loader");
        let load = host
            .get_method(&loader_class, "loadClass", &["java.lang.String"])
            .expect("loadClass");
        let name = HostValue::Ref(host.new_string("java.lang.Integer"));
        assert!(host.call_method(Some(&loader), &load, &[name]).is_err());
        let pending = host.exception_occurred().expect("pending");
        assert_eq!(pending.class().name(), "java.lang.ClassNotFoundException");
        host.exception_clear();

        let name = HostValue::Ref(host.new_string("java.util.ArrayList"));
        let loaded = host.call_method(Some(&loader), &load, &[name]).expect("loaded");
        let mirror = loaded.as_ref().and_then(|m| m.as_mirror().cloned()).expect("mirror");
        assert_eq!(mirror.name(), "java.util.ArrayList");
    }

    #[test]
    fn map_interface_methods_dispatch_to_the_implementation() {
        let host = InProcessHost::new();
        let map_class = host.find_class("java.util.Map").expect("Map");
        let hash_map = host.find_class("java.util.HashMap").expect("HashMap");
        let ctor = host.get_constructor(&hash_map, &[]).expect("ctor");
        let map = host.new_object(&hash_map, &ctor, &[]).expect("map");
        let object = "java.lang.Object";
        let put = host.get_method(&map_class, "put", &[object, object]).expect("put");
        let get = host.get_method(&map_class, "get", &[object]).expect("get");
        let size = host.get_method(&map_class, "size", &[]).expect("size");

        let key = || HostValue::Ref(host.new_string("k"));
        let value = HostValue::Ref(host.new_string("v"));
        host.call_method(Some(&map), &put, &[key(), value]).expect("put");
        let replaced = host
            .call_method(Some(&map), &put, &[key(), HostValue::Ref(host.new_string("w"))])
            .expect("replace");
        let previous = replaced.as_ref().expect("previous");
        assert_eq!(host.string_chars(previous).expect("chars"), "v");
        assert!(matches!(host.call_method(Some(&map), &size, &[]), Ok(HostValue::Int(1))));
        let found = host.call_method(Some(&map), &get, &[key()]).expect("get");
        assert_eq!(host.to_string(found.as_ref().expect("ref")).expect("text"), "w");
        assert_eq!(host.to_string(&map).expect("toString"), "{k=w}");
    }

    #[test]
    fn interface_methods_without_an_implementation_throw() {
        let host = InProcessHost::new();
        let collection = host.find_class("java.util.Collection").expect("Collection");
        let size = host.get_method(&collection, "size", &[]).expect("size");
        let object = host.find_class("java.lang.Object").expect("Object");
        let ctor = host.get_constructor(&object, &[]).expect("ctor");
        let plain = host.new_object(&object, &ctor, &[]).expect("object");
        assert!(host.call_method(Some(&plain), &size, &[]).is_err());
        let pending = host.exception_occurred().expect("pending");
        assert_eq!(pending.class().name(), "java.lang.AbstractMethodError");
        host.exception_clear();
    }
}
