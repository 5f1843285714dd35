//==================================================
// File: bridge/convert.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Value bridge between Host references and Script values
// Objective: Classify, unbox, box and coerce with member lookups resolved
//            once per process
//==================================================

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::array::ArrayProxy;
use super::exceptions::raise_bridge_error;
use super::proxy::{ClassProxy, ObjectProxy};
use super::Interop;
use crate::host::{ClassRef, GlobalRef, HostEnv, HostRef, HostResult, HostValue, MethodRef};
use crate::script::{Builtin, ErrorDetail, ScriptException, ScriptResult, ThreadState, Value, exec};
use crate::types::{JavaKind, TokenName};

//==================================================
// Section 1.0 - Cached member lookups
//==================================================

struct Constructor {
    class: ClassRef,
    ctor: MethodRef,
}

struct BoxingTable {
    boolean: Constructor,
    integer: Constructor,
    long: Constructor,
    double: Constructor,
}

/// Member identifiers resolved on first use and reused for the life of the
/// process.
#[derive(Default)]
pub struct ConversionCache {
    boxing: OnceCell<BoxingTable>,
    accessors: OnceCell<HashMap<JavaKind, MethodRef>>,
    load_class: OnceCell<MethodRef>,
    held: Mutex<Vec<GlobalRef>>,
}

impl ConversionCache {
    pub(crate) fn release(&self, host: &dyn HostEnv) {
        let held = std::mem::take(&mut *self.held.lock());
        let released = held.len();
        for reference in held {
            host.delete_global_ref(reference);
        }
        debug!(released, "conversion cache released");
    }
}

/// Accessor used to unbox each wrapper kind.
const ACCESSORS: [(JavaKind, &str, &str); 8] = [
    (JavaKind::Boolean, "java.lang.Boolean", "booleanValue"),
    (JavaKind::Char, "java.lang.Character", "charValue"),
    (JavaKind::Byte, "java.lang.Number", "intValue"),
    (JavaKind::Short, "java.lang.Number", "intValue"),
    (JavaKind::Int, "java.lang.Number", "intValue"),
    (JavaKind::Long, "java.lang.Number", "longValue"),
    (JavaKind::Float, "java.lang.Number", "floatValue"),
    (JavaKind::Double, "java.lang.Number", "doubleValue"),
];

fn char_text(code: u16) -> String {
    char::decode_utf16([code])
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

impl Interop {
    fn constructor(&self, class_name: &str, param: &str) -> HostResult<Constructor> {
        let host = self.host();
        let class = host.find_class(class_name)?;
        let ctor = host.get_constructor(&class, &[param])?;
        self.cache
            .held
            .lock()
            .push(host.new_global_ref(&host.class_mirror(&class)));
        Ok(Constructor { class, ctor })
    }

    fn boxing(&self) -> HostResult<&BoxingTable> {
        self.cache.boxing.get_or_try_init(|| {
            let table = BoxingTable {
                boolean: self.constructor("java.lang.Boolean", "boolean")?,
                integer: self.constructor("java.lang.Integer", "int")?,
                long: self.constructor("java.lang.Long", "long")?,
                double: self.constructor("java.lang.Double", "double")?,
            };
            trace!("boxing constructors resolved");
            Ok(table)
        })
    }

    fn accessor(&self, kind: JavaKind) -> HostResult<Option<&MethodRef>> {
        let table = self.cache.accessors.get_or_try_init(|| {
            let host = self.host();
            let mut table = HashMap::new();
            for (kind, class_name, method) in ACCESSORS {
                let class = host.find_class(class_name)?;
                table.insert(kind, host.get_method(&class, method, &[])?);
            }
            trace!(accessors = table.len(), "unboxing accessors resolved");
            Ok(table)
        })?;
        Ok(table.get(&kind))
    }

    /// Loads `name` through `loader.loadClass(String)`.
    pub fn load_class(&self, loader: &HostRef, name: &str) -> HostResult<ClassRef> {
        let host = self.host();
        let method = self.cache.load_class.get_or_try_init(|| {
            let class = host.find_class("java.lang.ClassLoader")?;
            host.get_method(&class, "loadClass", &["java.lang.String"])
        })?;
        let name_ref = host.new_string(name);
        let loaded = host.call_method(Some(loader), method, &[HostValue::Ref(name_ref)])?;
        match loaded.as_ref().and_then(|mirror| mirror.as_mirror()) {
            Some(class) => Ok(class.clone()),
            None => {
                let missing = host.find_class("java.lang.ClassNotFoundException")?;
                Err(host.throw_new(&missing, name))
            }
        }
    }

    //==================================================
    // Section 2.0 - Host to Script
    //==================================================

    /// Kind of a Host object by its runtime class. `None` stands for null.
    pub fn classify_object(&self, object: Option<&HostRef>) -> crate::error::BridgeResult<Option<JavaKind>> {
        match object {
            None => Ok(None),
            Some(object) => self.types.classify(object.class()).map(Some),
        }
    }

    /// Converts a reference of a known kind into a Script value.
    pub fn unbox(self: &Arc<Self>, ts: &ThreadState, object: Option<HostRef>, kind: JavaKind) -> ScriptResult<Value> {
        let Some(object) = object else {
            return Ok(Value::None);
        };
        let host = self.host();
        match kind {
            JavaKind::Array => Ok(Value::Foreign(Arc::new(ArrayProxy::new(self, object)))),
            JavaKind::String => host
                .string_chars(&object)
                .map(Value::text)
                .map_err(|thrown| self.drain(ts, thrown)),
            JavaKind::Class => match object.as_mirror().cloned() {
                Some(class) => Ok(Value::Foreign(Arc::new(ClassProxy::new(self, class)))),
                None => Ok(Value::Foreign(Arc::new(ObjectProxy::new(self, object)))),
            },
            JavaKind::Object | JavaKind::Void => Ok(Value::Foreign(Arc::new(ObjectProxy::new(self, object)))),
            primitive => {
                let accessor = match self.accessor(primitive) {
                    Ok(Some(accessor)) => accessor,
                    Ok(None) => return Err(ts.raise(Builtin::Runtime, "invalid typeid")),
                    Err(thrown) => return Err(self.drain(ts, thrown)),
                };
                let value = host
                    .call_method(Some(&object), accessor, &[])
                    .map_err(|thrown| self.drain(ts, thrown))?;
                self.to_script(ts, value, primitive)
            }
        }
    }

    /// Classifies `object` by its runtime class and unboxes it.
    pub fn unbox_object(self: &Arc<Self>, ts: &ThreadState, object: Option<HostRef>) -> ScriptResult<Value> {
        match self.classify_object(object.as_ref()) {
            Ok(Some(kind)) => self.unbox(ts, object, kind),
            Ok(None) => Ok(Value::None),
            Err(err) => Err(raise_bridge_error(ts, err)),
        }
    }

    /// Converts a method result, field or array element into a Script value.
    /// Primitives follow their own tag; references are classified by their
    /// runtime class unless declared as arrays or classes.
    pub fn to_script(self: &Arc<Self>, ts: &ThreadState, value: HostValue, kind: JavaKind) -> ScriptResult<Value> {
        Ok(match value {
            HostValue::Void | HostValue::Null => Value::None,
            HostValue::Boolean(b) => Value::Bool(b),
            HostValue::Byte(v) => Value::Int(v as i64),
            HostValue::Short(v) => Value::Int(v as i64),
            HostValue::Int(v) => Value::Int(v as i64),
            HostValue::Long(v) => Value::Long(v),
            HostValue::Float(v) => Value::Float(v as f64),
            HostValue::Double(v) => Value::Float(v),
            HostValue::Char(c) => Value::text(char_text(c)),
            HostValue::Ref(object) => match kind {
                JavaKind::Array | JavaKind::Class => return self.unbox(ts, Some(object), kind),
                _ => return self.unbox_object(ts, Some(object)),
            },
        })
    }

    //==================================================
    // Section 3.0 - Script to Host
    //==================================================

    fn construct(&self, ts: &ThreadState, ctor: &Constructor, arg: HostValue) -> ScriptResult<HostRef> {
        self.host()
            .new_object(&ctor.class, &ctor.ctor, &[arg])
            .map_err(|thrown| self.drain(ts, thrown))
    }

    /// Converts a Script value into a Host object; `None` becomes null.
    ///
    /// Values with no Host counterpart are stringified.
    pub fn box_value(&self, ts: &ThreadState, value: &Value) -> ScriptResult<Option<HostRef>> {
        if value.is_none() {
            return Ok(None);
        }
        if let Some(class) = value.foreign::<ClassProxy>() {
            return Ok(Some(class.mirror().clone()));
        }
        if let Some(object) = value.foreign::<ObjectProxy>() {
            return Ok(Some(object.object().clone()));
        }
        if let Some(array) = value.foreign::<ArrayProxy>() {
            array.release_pinned(ts, true)?;
            return Ok(Some(array.array().clone()));
        }
        let table = self.boxing().map_err(|thrown| self.drain(ts, thrown))?;
        let boxed = match value {
            Value::Text(text) => self.host().new_string(text),
            Value::Bool(b) => self.construct(ts, &table.boolean, HostValue::Boolean(*b))?,
            Value::Int(i) => match i32::try_from(*i) {
                Ok(small) => self.construct(ts, &table.integer, HostValue::Int(small))?,
                Err(_) => self.construct(ts, &table.long, HostValue::Long(*i))?,
            },
            Value::Long(i) => self.construct(ts, &table.long, HostValue::Long(*i))?,
            Value::Float(f) => self.construct(ts, &table.double, HostValue::Double(*f))?,
            other => {
                let text = exec::to_text(ts, other)?;
                self.host().new_string(&text)
            }
        };
        Ok(Some(boxed))
    }

    fn string_class(&self) -> Option<ClassRef> {
        self.types
            .resolve(TokenName::String)
            .ok()
            .map(|token| token.class().clone())
    }

    fn assignable(&self, from: &ClassRef, to: &ClassRef) -> bool {
        self.host().is_assignable_from(from, to)
    }

    /// Host object and class behind an object or class proxy.
    fn proxied(&self, value: &Value) -> Option<(HostRef, ClassRef)> {
        if let Some(object) = value.foreign::<ObjectProxy>() {
            return Some((object.object().clone(), object.class().clone()));
        }
        if let Some(class) = value.foreign::<ClassProxy>() {
            let mirror = class.mirror().clone();
            let mirror_class = mirror.class().clone();
            return Some((mirror, mirror_class));
        }
        if let Some(array) = value.foreign::<ArrayProxy>() {
            return Some((array.array().clone(), array.class().clone()));
        }
        None
    }

    /// Whether `value` can be passed for a parameter of `kind` declared as
    /// `param`. Overload resolution scores candidates with this.
    pub fn matches(&self, value: &Value, param: &ClassRef, kind: JavaKind) -> bool {
        match kind {
            JavaKind::Char => value.as_text().is_some_and(|text| text.chars().count() == 1),
            JavaKind::String => {
                value.is_none()
                    || value.as_text().is_some()
                    || self
                        .proxied(value)
                        .is_some_and(|(_, class)| self.assignable(&class, param))
            }
            JavaKind::Array => {
                value.is_none()
                    || value
                        .foreign::<ArrayProxy>()
                        .is_some_and(|array| self.assignable(array.class(), param))
            }
            JavaKind::Class => value.is_none() || value.foreign::<ClassProxy>().is_some(),
            JavaKind::Object => {
                if value.is_none() {
                    return true;
                }
                if let Some((_, class)) = self.proxied(value) {
                    return self.assignable(&class, param);
                }
                value.as_text().is_some()
                    && self
                        .string_class()
                        .is_some_and(|string| self.assignable(&string, param))
            }
            JavaKind::Byte | JavaKind::Short | JavaKind::Int => {
                matches!(value, Value::Int(_) | Value::Bool(_))
            }
            JavaKind::Float | JavaKind::Double => matches!(value, Value::Float(_)),
            JavaKind::Long => matches!(value, Value::Long(_) | Value::Int(_) | Value::Bool(_)),
            JavaKind::Boolean => matches!(value, Value::Int(_) | Value::Bool(_)),
            JavaKind::Void => false,
        }
    }

    /// Converts an argument for a parameter of `kind`. `position` is 1-based
    /// and reported in the `TypeError` raised on mismatch.
    pub fn coerce(
        &self,
        ts: &ThreadState,
        value: &Value,
        param: &ClassRef,
        kind: JavaKind,
        position: usize,
    ) -> ScriptResult<HostValue> {
        let mismatch = |message: String| {
            ts.raise_exception(
                ScriptException::new(Builtin::Type.get(), message)
                    .with_detail(ErrorDetail::Position(position)),
            )
        };
        let integer = match value {
            Value::Int(i) | Value::Long(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        };
        match kind {
            JavaKind::Char => match value.as_text() {
                Some(text) if text.chars().count() == 1 => {
                    let mut units = [0u16; 2];
                    let first = text.chars().next().unwrap_or_default();
                    Ok(HostValue::Char(first.encode_utf16(&mut units)[0]))
                }
                _ => Err(mismatch(format!("Expected char parameter at {position}"))),
            },
            JavaKind::String => {
                if value.is_none() {
                    return Ok(HostValue::Null);
                }
                if let Some(text) = value.as_text() {
                    return Ok(HostValue::Ref(self.host().new_string(text)));
                }
                match (self.proxied(value), self.string_class()) {
                    (Some((object, class)), Some(string)) if self.assignable(&class, &string) => {
                        Ok(HostValue::Ref(object))
                    }
                    _ => Err(mismatch(format!("Expected string parameter at {position}."))),
                }
            }
            JavaKind::Array => {
                if value.is_none() {
                    return Ok(HostValue::Null);
                }
                let Some(array) = value.foreign::<ArrayProxy>() else {
                    return Err(mismatch(format!("Expected jarray parameter at {position}.")));
                };
                if !self.assignable(array.class(), param) {
                    return Err(mismatch(format!(
                        "Incompatible array type at parameter {position}."
                    )));
                }
                // the callee owns the storage for the duration of the call
                array.release_pinned(ts, true)?;
                Ok(HostValue::Ref(array.array().clone()))
            }
            JavaKind::Class => {
                if value.is_none() {
                    return Ok(HostValue::Null);
                }
                match value.foreign::<ClassProxy>() {
                    Some(class) => Ok(HostValue::Ref(class.mirror().clone())),
                    None => Err(mismatch(format!("Expected class parameter at {position}."))),
                }
            }
            JavaKind::Object => {
                if value.is_none() {
                    return Ok(HostValue::Null);
                }
                if let Some(text) = value.as_text() {
                    let fits = self
                        .string_class()
                        .is_some_and(|string| self.assignable(&string, param));
                    if !fits {
                        return Err(mismatch(format!(
                            "Tried to set a string on an incomparable parameter {position}."
                        )));
                    }
                    return Ok(HostValue::Ref(self.host().new_string(text)));
                }
                let Some((object, class)) = self.proxied(value) else {
                    return Err(mismatch(format!("Expected object parameter at {position}.")));
                };
                if !self.assignable(&class, param) {
                    return Err(mismatch(format!("Incorrect object type at {position}.")));
                }
                if let Some(array) = value.foreign::<ArrayProxy>() {
                    array.release_pinned(ts, true)?;
                }
                Ok(HostValue::Ref(object))
            }
            JavaKind::Byte | JavaKind::Short | JavaKind::Int if !matches!(value, Value::Long(_)) => {
                let Some(i) = integer else {
                    return Err(mismatch(primitive_message(kind, position)));
                };
                Ok(match kind {
                    JavaKind::Byte => HostValue::Byte(i as i8),
                    JavaKind::Short => HostValue::Short(i as i16),
                    _ => HostValue::Int(i as i32),
                })
            }
            JavaKind::Float | JavaKind::Double => match value {
                Value::Float(f) if kind == JavaKind::Float => Ok(HostValue::Float(*f as f32)),
                Value::Float(f) => Ok(HostValue::Double(*f)),
                _ => Err(mismatch(primitive_message(kind, position))),
            },
            JavaKind::Long => match integer {
                Some(i) => Ok(HostValue::Long(i)),
                None => Err(mismatch(primitive_message(kind, position))),
            },
            JavaKind::Boolean if !matches!(value, Value::Long(_)) => match integer {
                Some(i) => Ok(HostValue::Boolean(i > 0)),
                None => Err(mismatch(primitive_message(kind, position))),
            },
            JavaKind::Void => Err(mismatch(format!("Unknown java type at {position}."))),
            _ => Err(mismatch(primitive_message(kind, position))),
        }
    }
}

fn primitive_message(kind: JavaKind, position: usize) -> String {
    format!(
        "Expected {} parameter at {position}.",
        kind.primitive_name().unwrap_or("object")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InProcessHost;
    use crate::script::ScriptRuntime;
    use crate::types::TypeCache;

    fn setup() -> (Arc<InProcessHost>, Arc<Interop>, Arc<ThreadState>) {
        let host = InProcessHost::new();
        let types = Arc::new(TypeCache::new(host.clone()));
        let interop = Interop::new(host.clone(), types, true);
        let runtime = ScriptRuntime::new();
        (host, interop, runtime.new_interpreter())
    }

    #[test]
    fn wrappers_unbox_by_kind() {
        let (host, interop, ts) = setup();
        let short = host.new_boxed(HostValue::Short(7));
        assert!(matches!(interop.unbox_object(&ts, short), Ok(Value::Int(7))));
        let ch = host.new_boxed(HostValue::Char('x' as u16));
        let text = interop.unbox_object(&ts, ch).expect("char");
        assert_eq!(text.as_text(), Some("x"));
        assert!(matches!(interop.unbox_object(&ts, None), Ok(Value::None)));
    }

    #[test]
    fn wide_integers_box_to_long() {
        let (_host, interop, ts) = setup();
        let small = interop.box_value(&ts, &Value::Int(5)).expect("box").expect("ref");
        assert_eq!(small.class().name(), "java.lang.Integer");
        let wide = interop
            .box_value(&ts, &Value::Int(i64::from(i32::MAX) + 1))
            .expect("box")
            .expect("ref");
        assert_eq!(wide.class().name(), "java.lang.Long");
    }

    #[test]
    fn unknown_values_box_as_text() {
        let (host, interop, ts) = setup();
        let tuple = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let boxed = interop.box_value(&ts, &tuple).expect("box").expect("ref");
        assert_eq!(host.string_chars(&boxed).expect("string"), "(1, 2)");
    }

    #[test]
    fn boolean_coercion_tests_sign() {
        let (host, interop, ts) = setup();
        let boolean = host.find_class("boolean").expect("boolean");
        let coerced = interop
            .coerce(&ts, &Value::Int(-3), &boolean, JavaKind::Boolean, 1)
            .expect("coerce");
        assert!(matches!(coerced, HostValue::Boolean(false)));
        let coerced = interop
            .coerce(&ts, &Value::Int(2), &boolean, JavaKind::Boolean, 1)
            .expect("coerce");
        assert!(matches!(coerced, HostValue::Boolean(true)));
    }

    #[test]
    fn char_parameters_need_single_character_text() {
        let (host, interop, ts) = setup();
        let ch = host.find_class("char").expect("char");
        assert!(interop.matches(&Value::text("a"), &ch, JavaKind::Char));
        assert!(!interop.matches(&Value::text("ab"), &ch, JavaKind::Char));
        assert!(interop.coerce(&ts, &Value::text("ab"), &ch, JavaKind::Char, 3).is_err());
        let err = ts.fetch_error().expect("pending");
        assert_eq!(err.message.as_deref(), Some("Expected char parameter at 3"));
        assert_eq!(err.detail, Some(ErrorDetail::Position(3)));
    }

    #[test]
    fn text_is_an_object_only_where_strings_fit() {
        let (host, interop, ts) = setup();
        let object = host.find_class("java.lang.Object").expect("Object");
        let number = host.find_class("java.lang.Number").expect("Number");
        assert!(interop.matches(&Value::text("s"), &object, JavaKind::Object));
        assert!(!interop.matches(&Value::text("s"), &number, JavaKind::Object));
        assert!(interop.coerce(&ts, &Value::text("s"), &number, JavaKind::Object, 2).is_err());
        assert_eq!(
            ts.fetch_error().expect("pending").message.as_deref(),
            Some("Tried to set a string on an incomparable parameter 2.")
        );
    }
}
