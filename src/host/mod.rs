//==================================================
// File: host/mod.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Describe the Host runtime the bridge is embedded in
// Objective: Expose class loading, reflection, durable references and the
//            per-thread pending exception slot behind one trait seam
//==================================================

mod bootstrap;
pub mod class;
pub mod in_process;

use std::fmt;

pub use class::{
    ClassBuilder, ClassKind, ClassRef, FieldRef, HostClass, HostField, HostMethod, HostObject,
    HostRef, MethodRef, Payload, Throw,
};
pub use in_process::InProcessHost;

/// Name of the class-enumeration service class.
pub const CLASS_LIST_CLASS: &str = "solvra.embed.ClassList";
/// Host exception that carries translated Script errors.
pub const EMBED_EXCEPTION_CLASS: &str = "solvra.embed.EmbedException";

//==================================================
// Section 1.0 - Values
//==================================================

/// Marker returned by fallible Host calls: a throwable is now pending on the
/// calling thread and must be drained through the exception bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thrown;

pub type HostResult<T> = Result<T, Thrown>;

/// A Host call argument or result.
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Void,
    Null,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(HostRef),
}

impl HostValue {
    /// Zero value for a field or array slot of the named type.
    pub fn default_for(type_name: &str) -> HostValue {
        match type_name {
            "boolean" => HostValue::Boolean(false),
            "byte" => HostValue::Byte(0),
            "char" => HostValue::Char(0),
            "short" => HostValue::Short(0),
            "int" => HostValue::Int(0),
            "long" => HostValue::Long(0),
            "float" => HostValue::Float(0.0),
            "double" => HostValue::Double(0.0),
            _ => HostValue::Null,
        }
    }

    pub fn from_ref(object: Option<HostRef>) -> HostValue {
        object.map(HostValue::Ref).unwrap_or(HostValue::Null)
    }

    pub fn as_ref(&self) -> Option<&HostRef> {
        match self {
            HostValue::Ref(object) => Some(object),
            _ => None,
        }
    }

    pub fn into_ref(self) -> Option<HostRef> {
        match self {
            HostValue::Ref(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            HostValue::Byte(v) => Some(v as i64),
            HostValue::Char(v) => Some(v as i64),
            HostValue::Short(v) => Some(v as i64),
            HostValue::Int(v) => Some(v as i64),
            HostValue::Long(v) => Some(v),
            HostValue::Boolean(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            HostValue::Float(v) => Some(v as f64),
            HostValue::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Void => write!(f, "void"),
            HostValue::Null => write!(f, "null"),
            HostValue::Boolean(v) => write!(f, "{v}"),
            HostValue::Byte(v) => write!(f, "{v}b"),
            HostValue::Char(v) => write!(f, "'{}'", char::from_u32(*v as u32).unwrap_or('?')),
            HostValue::Short(v) => write!(f, "{v}s"),
            HostValue::Int(v) => write!(f, "{v}"),
            HostValue::Long(v) => write!(f, "{v}L"),
            HostValue::Float(v) => write!(f, "{v}f"),
            HostValue::Double(v) => write!(f, "{v}d"),
            HostValue::Ref(object) => write!(f, "{:?}", object),
        }
    }
}

/// A durable reference. Move-only so it can be released at most once.
#[derive(Debug)]
pub struct GlobalRef {
    id: u64,
    object: HostRef,
}

impl GlobalRef {
    pub(crate) fn new(id: u64, object: HostRef) -> Self {
        Self { id, object }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn object(&self) -> &HostRef {
        &self.object
    }
}

//==================================================
// Section 2.0 - Host environment seam
//==================================================

/// Everything the bridge consumes from the Host runtime.
///
/// Fallible calls follow the Host's own convention: on failure a throwable is
/// left pending on the calling thread and [`Thrown`] is returned. Callers that
/// swallow a failure must clear the pending slot themselves.
pub trait HostEnv: Send + Sync {
    // classes
    fn lookup_class(&self, name: &str) -> Option<ClassRef>;
    fn find_class(&self, name: &str) -> HostResult<ClassRef>;
    fn array_class(&self, component: &ClassRef) -> ClassRef;
    fn class_mirror(&self, class: &ClassRef) -> HostRef;
    fn is_assignable_from(&self, from: &ClassRef, to: &ClassRef) -> bool;

    // reflection
    fn get_method(&self, class: &ClassRef, name: &str, params: &[&str]) -> HostResult<MethodRef>;
    fn get_constructor(&self, class: &ClassRef, params: &[&str]) -> HostResult<MethodRef>;
    fn methods(&self, class: &ClassRef) -> Vec<MethodRef>;
    fn constructors(&self, class: &ClassRef) -> Vec<MethodRef>;
    fn fields(&self, class: &ClassRef) -> Vec<FieldRef>;
    fn parameter_types(&self, method: &HostMethod) -> HostResult<Vec<ClassRef>>;
    fn return_type(&self, method: &HostMethod) -> HostResult<ClassRef>;
    fn field_type(&self, field: &HostField) -> HostResult<ClassRef>;
    fn exception_types(&self, method: &HostMethod) -> HostResult<Vec<ClassRef>>;

    // invocation
    fn call_method(
        &self,
        target: Option<&HostRef>,
        method: &MethodRef,
        args: &[HostValue],
    ) -> HostResult<HostValue>;
    fn new_object(&self, class: &ClassRef, ctor: &MethodRef, args: &[HostValue])
    -> HostResult<HostRef>;
    fn get_field(&self, target: Option<&HostRef>, field: &FieldRef) -> HostResult<HostValue>;
    fn set_field(&self, target: Option<&HostRef>, field: &FieldRef, value: HostValue)
    -> HostResult<()>;

    // objects
    fn new_string(&self, text: &str) -> HostRef;
    fn string_chars(&self, string: &HostRef) -> HostResult<String>;
    fn new_array(&self, component: &ClassRef, elements: Vec<HostValue>) -> HostRef;
    fn array_length(&self, array: &HostRef) -> HostResult<usize>;
    fn array_elements(&self, array: &HostRef) -> HostResult<Vec<HostValue>>;
    fn release_array_elements(
        &self,
        array: &HostRef,
        elements: Vec<HostValue>,
        commit: bool,
    ) -> HostResult<()>;
    fn to_string(&self, object: &HostRef) -> HostResult<String>;
    fn equals(&self, a: &HostRef, b: &HostRef) -> HostResult<bool>;

    // durable references
    fn new_global_ref(&self, object: &HostRef) -> GlobalRef;
    fn delete_global_ref(&self, reference: GlobalRef);

    // pending exception slot of the calling thread
    fn exception_check(&self) -> bool;
    fn exception_occurred(&self) -> Option<HostRef>;
    fn exception_clear(&self);
    fn exception_describe(&self);
    fn throw(&self, throwable: HostRef) -> Thrown;
    fn throw_new(&self, class: &ClassRef, message: &str) -> Thrown;
}
