//! Runtime values of the embedded Script language.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::ast::Expr;
use super::error::{Builtin, ErrorTypeRef};
use super::state::ThreadState;

/// Error marker: the exception now sits in the thread state's pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Raised;

pub type ScriptResult<T> = Result<T, Raised>;

pub type NativeFn = Arc<dyn Fn(&ThreadState, &[Value]) -> ScriptResult<Value> + Send + Sync>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    /// Machine integer.
    Int(i64),
    /// Extended integer, written with an `L` suffix.
    Long(i64),
    Float(f64),
    Text(Arc<str>),
    Tuple(Arc<Vec<Value>>),
    Module(ModuleRef),
    Native(Arc<NativeFunction>),
    Lambda(Arc<Lambda>),
    ErrorType(ErrorTypeRef),
    ErrorInstance(Arc<ErrorInstance>),
    Foreign(Arc<dyn Foreign>),
}

impl Value {
    pub fn text(text: impl AsRef<str>) -> Value {
        Value::Text(Arc::from(text.as_ref()))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::new(items))
    }

    pub fn native<F>(name: &str, func: F) -> Value
    where
        F: Fn(&ThreadState, &[Value]) -> ScriptResult<Value> + Send + Sync + 'static,
    {
        Value::Native(Arc::new(NativeFunction {
            name: name.to_string(),
            func: Arc::new(func),
        }))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn foreign<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Foreign(object) => object.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Long(_) => "long".into(),
            Value::Float(_) => "float".into(),
            Value::Text(_) => "str".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Module(_) => "module".into(),
            Value::Native(_) => "builtin_function".into(),
            Value::Lambda(_) => "function".into(),
            Value::ErrorType(_) => "type".into(),
            Value::ErrorInstance(instance) => instance.error_type.qualified_name(),
            Value::Foreign(object) => object.type_name().to_string(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) | Value::Long(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(t) => !t.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Rendering used by `repr` and the interactive echo.
    pub fn repr(&self) -> Option<String> {
        Some(match self {
            Value::None => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(i) => i.to_string(),
            Value::Long(i) => format!("{i}L"),
            Value::Float(f) => format_float(*f),
            Value::Text(t) => format!("'{}'", t.replace('\'', "\\'")),
            Value::Tuple(items) => {
                let parts: Option<Vec<String>> = items.iter().map(Value::repr).collect();
                let parts = parts?;
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Value::Module(module) => format!("<module '{}'>", module.name()),
            Value::Native(native) => format!("<built-in function {}>", native.name),
            Value::Lambda(_) => "<function <lambda>>".into(),
            Value::ErrorType(ty) => format!("{:?}", ty),
            Value::ErrorInstance(instance) => match &instance.message {
                Some(message) => format!("{}('{}')", instance.error_type.qualified_name(), message),
                None => format!("{}()", instance.error_type.qualified_name()),
            },
            Value::Foreign(_) => return None,
        })
    }
}

pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repr() {
            Some(text) => f.write_str(&text),
            None => write!(f, "<{} object>", self.type_name()),
        }
    }
}

//==================================================
// Section 1.0 - Callables
//==================================================

pub struct NativeFunction {
    pub name: String,
    pub func: NativeFn,
}

pub struct Lambda {
    pub params: Vec<String>,
    pub body: Arc<Expr>,
    pub globals: ModuleRef,
}

pub struct ErrorInstance {
    pub error_type: ErrorTypeRef,
    pub message: Option<String>,
}

//==================================================
// Section 2.0 - Modules
//==================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOrigin {
    Main,
    Builtins,
    /// Shared native extension module.
    Native,
    /// Created by the Host through the context manager.
    Created,
    /// Synthesized by the import hook from a Host package.
    HostPackage,
}

pub type ModuleRef = Arc<Module>;

/// A namespace. `BTreeMap` keeps `*` imports and member listings ordered.
pub struct Module {
    name: String,
    origin: ModuleOrigin,
    dict: RwLock<BTreeMap<String, Value>>,
}

impl Module {
    pub fn new(name: impl Into<String>, origin: ModuleOrigin) -> ModuleRef {
        Arc::new(Module {
            name: name.into(),
            origin,
            dict: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.dict.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.dict.write().insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.dict.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.dict.write().remove(key)
    }

    pub fn names(&self) -> Vec<String> {
        self.dict.read().keys().cloned().collect()
    }

    pub fn public_entries(&self) -> Vec<(String, Value)> {
        self.dict
            .read()
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Drops every binding; breaks lambda/module reference cycles at teardown.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.dict.write());
        drop(drained);
    }
}

//==================================================
// Section 3.0 - Foreign objects
//==================================================

/// Script view of an object owned by another runtime.
///
/// Default methods raise the error Script code would see for an object that
/// lacks the capability.
pub trait Foreign: Send + Sync + 'static {
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    fn get_attr(&self, ts: &ThreadState, name: &str) -> ScriptResult<Value>;

    fn set_attr(&self, ts: &ThreadState, name: &str, _value: Value) -> ScriptResult<()> {
        Err(ts.raise(
            Builtin::Attribute,
            format!("'{}' object attribute '{}' is read-only", self.type_name(), name),
        ))
    }

    fn call(&self, ts: &ThreadState, _args: &[Value]) -> ScriptResult<Value> {
        Err(ts.raise(
            Builtin::Type,
            format!("'{}' object is not callable", self.type_name()),
        ))
    }

    fn get_item(&self, ts: &ThreadState, _index: &Value) -> ScriptResult<Value> {
        Err(ts.raise(
            Builtin::Type,
            format!("'{}' object is not subscriptable", self.type_name()),
        ))
    }

    fn set_item(&self, ts: &ThreadState, _index: &Value, _value: Value) -> ScriptResult<()> {
        Err(ts.raise(
            Builtin::Type,
            format!("'{}' object does not support item assignment", self.type_name()),
        ))
    }

    fn len(&self, ts: &ThreadState) -> ScriptResult<usize> {
        Err(ts.raise(
            Builtin::Type,
            format!("object of type '{}' has no len()", self.type_name()),
        ))
    }

    fn contains(&self, ts: &ThreadState, _item: &Value) -> ScriptResult<bool> {
        Err(ts.raise(
            Builtin::Type,
            format!("argument of type '{}' is not iterable", self.type_name()),
        ))
    }

    /// Numeric value used by arithmetic and comparisons, when the object has one.
    fn to_number(&self, _ts: &ThreadState) -> ScriptResult<Option<Value>> {
        Ok(None)
    }

    fn to_text(&self, ts: &ThreadState) -> ScriptResult<String>;

    fn equals(&self, _ts: &ThreadState, other: &Value) -> ScriptResult<bool> {
        Ok(match other {
            Value::Foreign(other) => std::ptr::addr_eq(self as *const Self, Arc::as_ptr(other)),
            _ => false,
        })
    }

    fn attr_names(&self) -> Vec<String> {
        Vec::new()
    }
}
