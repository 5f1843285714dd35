//! Reflective data model for Host classes, members and objects.
//!
//! Classes are immutable once built. Member types are recorded by name and
//! resolved through [`HostEnv`](super::HostEnv) on demand so that a class may
//! mention itself (or classes registered later) in its own signatures.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{HostEnv, HostValue, Thrown};

pub type ClassRef = Arc<HostClass>;
pub type HostRef = Arc<HostObject>;
pub type MethodRef = Arc<HostMethod>;
pub type FieldRef = Arc<HostField>;

/// Body of a method or static method.
pub type NativeFn =
    Arc<dyn Fn(&dyn HostEnv, Option<&HostRef>, &[HostValue]) -> Result<HostValue, Throw> + Send + Sync>;

/// Body of a constructor: produces the payload of the freshly allocated object.
pub type ConstructorFn =
    Arc<dyn Fn(&dyn HostEnv, &ClassRef, &[HostValue]) -> Result<Payload, Throw> + Send + Sync>;

fn next_identity() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

//==================================================
// Section 1.0 - Throw descriptors
//==================================================

/// How a method body reports failure back to the host.
#[derive(Debug, Clone)]
pub enum Throw {
    /// Instantiate `class` with `message` and make it pending.
    New {
        class: String,
        message: Option<String>,
    },
    /// Make an existing throwable pending.
    Object(HostRef),
    /// Something the body called already left a throwable pending.
    Pending,
}

impl Throw {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Throw::New {
            class: class.into(),
            message: Some(message.into()),
        }
    }

    pub fn bare(class: impl Into<String>) -> Self {
        Throw::New {
            class: class.into(),
            message: None,
        }
    }
}

impl From<Thrown> for Throw {
    fn from(_: Thrown) -> Self {
        Throw::Pending
    }
}

//==================================================
// Section 2.0 - Classes
//==================================================

#[derive(Debug, Clone)]
pub enum ClassKind {
    Primitive,
    Array { component: ClassRef },
    Interface,
    Concrete,
}

pub struct HostClass {
    id: u64,
    name: String,
    kind: ClassKind,
    superclass: Option<ClassRef>,
    interfaces: Vec<ClassRef>,
    constructors: Vec<MethodRef>,
    methods: Vec<MethodRef>,
    fields: Vec<FieldRef>,
}

impl HostClass {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Dotted binary name, `int` for primitives and `T[]` for arrays.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> &ClassKind {
        &self.kind
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, ClassKind::Primitive)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ClassKind::Array { .. })
    }

    pub fn is_interface(&self) -> bool {
        matches!(self.kind, ClassKind::Interface)
    }

    pub fn component(&self) -> Option<&ClassRef> {
        match &self.kind {
            ClassKind::Array { component } => Some(component),
            _ => None,
        }
    }

    pub fn superclass(&self) -> Option<&ClassRef> {
        self.superclass.as_ref()
    }

    pub fn interfaces(&self) -> &[ClassRef] {
        &self.interfaces
    }

    pub fn declared_constructors(&self) -> &[MethodRef] {
        &self.constructors
    }

    pub fn declared_methods(&self) -> &[MethodRef] {
        &self.methods
    }

    pub fn declared_fields(&self) -> &[FieldRef] {
        &self.fields
    }

    pub(crate) fn primitive(name: &str) -> ClassRef {
        Arc::new(HostClass {
            id: next_identity(),
            name: name.to_string(),
            kind: ClassKind::Primitive,
            superclass: None,
            interfaces: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        })
    }

    pub(crate) fn array_of(component: &ClassRef, object: &ClassRef) -> ClassRef {
        Arc::new(HostClass {
            id: next_identity(),
            name: format!("{}[]", component.name()),
            kind: ClassKind::Array {
                component: component.clone(),
            },
            superclass: Some(object.clone()),
            interfaces: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        })
    }
}

impl PartialEq for HostClass {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HostClass {}

impl fmt::Debug for HostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostClass({})", self.name)
    }
}

//==================================================
// Section 3.0 - Members
//==================================================

#[derive(Clone)]
pub enum MethodBody {
    Native(NativeFn),
    Constructor(ConstructorFn),
}

pub struct HostMethod {
    pub name: String,
    pub declaring_class: String,
    pub params: Vec<String>,
    pub return_type: String,
    pub is_static: bool,
    pub exceptions: Vec<String>,
    pub(crate) body: MethodBody,
}

impl HostMethod {
    pub fn is_constructor(&self) -> bool {
        matches!(self.body, MethodBody::Constructor(_))
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// `true` when both describe the same name and parameter list.
    pub fn same_signature(&self, other: &HostMethod) -> bool {
        self.name == other.name && self.params == other.params
    }
}

impl fmt::Debug for HostMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.declaring_class,
            self.name,
            self.params.join(", ")
        )
    }
}

pub struct HostField {
    pub name: String,
    pub declaring_class: String,
    pub type_name: String,
    pub is_static: bool,
    pub(crate) static_value: Mutex<HostValue>,
}

impl fmt::Debug for HostField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.declaring_class, self.name, self.type_name)
    }
}

//==================================================
// Section 4.0 - Objects
//==================================================

/// Storage behind a Host object.
pub enum Payload {
    /// Instance fields of an ordinary object.
    Plain(Mutex<HashMap<String, HostValue>>),
    /// Primitive wrapper (`java.lang.Integer` and friends).
    Boxed(HostValue),
    Str(String),
    Array(Mutex<Vec<HostValue>>),
    /// `java.lang.Class` instance describing another class.
    Mirror(ClassRef),
    Throwable {
        message: Option<String>,
        cause: Option<HostRef>,
    },
    /// Arbitrary Rust state owned by a natively implemented class.
    Native(Box<dyn Any + Send + Sync>),
}

impl Payload {
    /// Instance fields initialised to the defaults of their declared types,
    /// walking the superclass chain.
    pub fn plain_for(class: &ClassRef) -> Payload {
        let mut values = HashMap::new();
        let mut cursor = Some(class.clone());
        while let Some(current) = cursor {
            for field in current.declared_fields().iter().filter(|f| !f.is_static) {
                values
                    .entry(field.name.clone())
                    .or_insert_with(|| HostValue::default_for(&field.type_name));
            }
            cursor = current.superclass().cloned();
        }
        Payload::Plain(Mutex::new(values))
    }

    pub fn native<T: Any + Send + Sync>(state: T) -> Payload {
        Payload::Native(Box::new(state))
    }
}

pub struct HostObject {
    identity: u64,
    class: ClassRef,
    payload: Payload,
}

impl HostObject {
    pub(crate) fn new(class: ClassRef, payload: Payload) -> HostRef {
        Arc::new(HostObject {
            identity: next_identity(),
            class,
            payload,
        })
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_mirror(&self) -> Option<&ClassRef> {
        match &self.payload {
            Payload::Mirror(class) => Some(class),
            _ => None,
        }
    }

    pub fn boxed(&self) -> Option<&HostValue> {
        match &self.payload {
            Payload::Boxed(value) => Some(value),
            _ => None,
        }
    }

    pub fn native<T: Any>(&self) -> Option<&T> {
        match &self.payload {
            Payload::Native(state) => state.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn throwable_message(&self) -> Option<&str> {
        match &self.payload {
            Payload::Throwable { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    pub fn throwable_cause(&self) -> Option<&HostRef> {
        match &self.payload {
            Payload::Throwable { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Str(text) => write!(f, "{:?}", text),
            Payload::Boxed(value) => write!(f, "{}({:?})", self.class.simple_name(), value),
            Payload::Mirror(class) => write!(f, "class {}", class.name()),
            _ => write!(f, "{}@{:x}", self.class.name(), self.identity),
        }
    }
}

//==================================================
// Section 5.0 - Class builder
//==================================================

/// Fluent construction of a [`HostClass`].
///
/// ```ignore
/// let point = ClassBuilder::new("demo.Point")
///     .extends(&object)
///     .field("x", "int")
///     .constructor(&[], |_, class, _| Ok(Payload::plain_for(class)))
///     .build();
/// ```
pub struct ClassBuilder {
    name: String,
    kind: ClassKind,
    superclass: Option<ClassRef>,
    interfaces: Vec<ClassRef>,
    constructors: Vec<HostMethod>,
    methods: Vec<HostMethod>,
    fields: Vec<HostField>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ClassKind::Concrete,
            superclass: None,
            interfaces: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: &ClassRef) -> Self {
        self.superclass = Some(parent.clone());
        self
    }

    pub fn implements(mut self, interface: &ClassRef) -> Self {
        self.interfaces.push(interface.clone());
        self
    }

    pub fn interface(mut self) -> Self {
        self.kind = ClassKind::Interface;
        self
    }

    pub fn constructor<F>(mut self, params: &[&str], body: F) -> Self
    where
        F: Fn(&dyn HostEnv, &ClassRef, &[HostValue]) -> Result<Payload, Throw> + Send + Sync + 'static,
    {
        self.constructors.push(HostMethod {
            name: "<init>".to_string(),
            declaring_class: self.name.clone(),
            params: to_strings(params),
            return_type: "void".to_string(),
            is_static: false,
            exceptions: Vec::new(),
            body: MethodBody::Constructor(Arc::new(body)),
        });
        self
    }

    pub fn method<F>(self, name: &str, params: &[&str], return_type: &str, body: F) -> Self
    where
        F: Fn(&dyn HostEnv, Option<&HostRef>, &[HostValue]) -> Result<HostValue, Throw>
            + Send
            + Sync
            + 'static,
    {
        self.push_method(name, params, return_type, false, Arc::new(body))
    }

    pub fn static_method<F>(self, name: &str, params: &[&str], return_type: &str, body: F) -> Self
    where
        F: Fn(&dyn HostEnv, Option<&HostRef>, &[HostValue]) -> Result<HostValue, Throw>
            + Send
            + Sync
            + 'static,
    {
        self.push_method(name, params, return_type, true, Arc::new(body))
    }

    /// Declares an interface method; implementing classes supply the body.
    pub fn abstract_method(self, name: &str, params: &[&str], return_type: &str) -> Self {
        let owner = self.name.clone();
        let method = name.to_string();
        self.method(name, params, return_type, move |_, _, _| {
            Err(Throw::new("java.lang.AbstractMethodError", format!("{owner}.{method}")))
        })
    }

    /// Declares thrown exception types on the most recently added method.
    pub fn throws(mut self, classes: &[&str]) -> Self {
        if let Some(last) = self.methods.last_mut() {
            last.exceptions.extend(classes.iter().map(|c| c.to_string()));
        }
        self
    }

    pub fn field(mut self, name: &str, type_name: &str) -> Self {
        self.fields.push(HostField {
            name: name.to_string(),
            declaring_class: self.name.clone(),
            type_name: type_name.to_string(),
            is_static: false,
            static_value: Mutex::new(HostValue::Void),
        });
        self
    }

    pub fn static_field(mut self, name: &str, type_name: &str, value: HostValue) -> Self {
        self.fields.push(HostField {
            name: name.to_string(),
            declaring_class: self.name.clone(),
            type_name: type_name.to_string(),
            is_static: true,
            static_value: Mutex::new(value),
        });
        self
    }

    pub fn build(self) -> ClassRef {
        Arc::new(HostClass {
            id: next_identity(),
            name: self.name,
            kind: self.kind,
            superclass: self.superclass,
            interfaces: self.interfaces,
            constructors: self.constructors.into_iter().map(Arc::new).collect(),
            methods: self.methods.into_iter().map(Arc::new).collect(),
            fields: self.fields.into_iter().map(Arc::new).collect(),
        })
    }

    fn push_method(
        mut self,
        name: &str,
        params: &[&str],
        return_type: &str,
        is_static: bool,
        body: NativeFn,
    ) -> Self {
        self.methods.push(HostMethod {
            name: name.to_string(),
            declaring_class: self.name.clone(),
            params: to_strings(params),
            return_type: return_type.to_string(),
            is_static,
            exceptions: Vec::new(),
            body: MethodBody::Native(body),
        });
        self
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
