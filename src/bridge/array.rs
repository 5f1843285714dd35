//! Script view of a Host array.
//!
//! Element access pins a copy of the array's storage; writes land in the copy
//! and reach the Host when the pin is released with `commit`. Passing the
//! array back to the Host, or dropping the proxy, releases the pin.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{trace, warn};

use super::exceptions::raise_bridge_error;
use super::Interop;
use crate::host::{ClassRef, GlobalRef, HostRef, HostValue};
use crate::script::{Builtin, Foreign, ScriptResult, ThreadState, Value, exec};
use crate::types::JavaKind;

struct Pinned {
    elements: Vec<HostValue>,
    dirty: bool,
}

pub struct ArrayProxy {
    interop: Arc<Interop>,
    array: HostRef,
    class: ClassRef,
    component: OnceCell<(ClassRef, JavaKind)>,
    reference: Option<GlobalRef>,
    pinned: Mutex<Option<Pinned>>,
}

impl ArrayProxy {
    pub fn new(interop: &Arc<Interop>, array: HostRef) -> Self {
        let reference = interop.host().new_global_ref(&array);
        Self {
            interop: interop.clone(),
            class: array.class().clone(),
            array,
            component: OnceCell::new(),
            reference: Some(reference),
            pinned: Mutex::new(None),
        }
    }

    pub fn array(&self) -> &HostRef {
        &self.array
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.lock().is_some()
    }

    fn component(&self, ts: &ThreadState) -> ScriptResult<&(ClassRef, JavaKind)> {
        self.component.get_or_try_init(|| {
            let Some(component) = self.class.component().cloned() else {
                return Err(ts.raise(Builtin::Type, "object is not an array"));
            };
            let kind = self
                .interop
                .types()
                .classify(&component)
                .map_err(|err| raise_bridge_error(ts, err))?;
            Ok((component, kind))
        })
    }

    fn index(&self, ts: &ThreadState, index: &Value, len: usize) -> ScriptResult<usize> {
        let raw = match index {
            Value::Int(i) | Value::Long(i) => *i,
            Value::Bool(b) => *b as i64,
            other => {
                return Err(ts.raise(
                    Builtin::Type,
                    format!("array indices must be integers, not {}", other.type_name()),
                ));
            }
        };
        let resolved = if raw < 0 { raw + len as i64 } else { raw };
        if resolved < 0 || resolved >= len as i64 {
            return Err(ts.raise(Builtin::Index, "array index out of range"));
        }
        Ok(resolved as usize)
    }

    /// Runs `f` against the pinned storage, pinning it first if needed.
    fn with_pinned<R>(
        &self,
        ts: &ThreadState,
        f: impl FnOnce(&mut Pinned) -> ScriptResult<R>,
    ) -> ScriptResult<R> {
        let mut slot = self.pinned.lock();
        if slot.is_none() {
            let elements = self
                .interop
                .host()
                .array_elements(&self.array)
                .map_err(|thrown| self.interop.drain(ts, thrown))?;
            trace!(len = elements.len(), "array pinned");
            *slot = Some(Pinned {
                elements,
                dirty: false,
            });
        }
        match slot.as_mut() {
            Some(pinned) => f(pinned),
            None => Err(ts.raise(Builtin::Runtime, "array storage unavailable")),
        }
    }

    /// Releases the pinned copy. With `commit`, pending writes are copied back
    /// to the Host array first.
    pub fn release_pinned(&self, ts: &ThreadState, commit: bool) -> ScriptResult<()> {
        let Some(pinned) = self.pinned.lock().take() else {
            return Ok(());
        };
        let commit = commit && pinned.dirty;
        trace!(commit, "array released");
        self.interop
            .host()
            .release_array_elements(&self.array, pinned.elements, commit)
            .map_err(|thrown| self.interop.drain(ts, thrown))
    }
}

impl Drop for ArrayProxy {
    fn drop(&mut self) {
        let host = self.interop.host();
        if let Some(pinned) = self.pinned.get_mut().take() {
            if host
                .release_array_elements(&self.array, pinned.elements, pinned.dirty)
                .is_err()
            {
                warn!(class = self.class.name(), "array release failed during drop");
                host.exception_clear();
            }
        }
        if let Some(reference) = self.reference.take() {
            host.delete_global_ref(reference);
        }
    }
}

impl Foreign for ArrayProxy {
    fn type_name(&self) -> &str {
        "host_array"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, ts: &ThreadState, name: &str) -> ScriptResult<Value> {
        match name {
            "__name__" => Ok(Value::text(self.class.name())),
            _ => Err(ts.raise(
                Builtin::Attribute,
                format!("'host_array' object has no attribute '{name}'"),
            )),
        }
    }

    fn get_item(&self, ts: &ThreadState, index: &Value) -> ScriptResult<Value> {
        let kind = self.component(ts)?.1;
        let element = self.with_pinned(ts, |pinned| {
            let at = self.index(ts, index, pinned.elements.len())?;
            Ok(pinned.elements[at].clone())
        })?;
        self.interop.to_script(ts, element, kind)
    }

    fn set_item(&self, ts: &ThreadState, index: &Value, value: Value) -> ScriptResult<()> {
        let (component, kind) = self.component(ts)?.clone();
        let converted = self.interop.coerce(ts, &value, &component, kind, 1)?;
        self.with_pinned(ts, |pinned| {
            let at = self.index(ts, index, pinned.elements.len())?;
            pinned.elements[at] = converted;
            pinned.dirty = true;
            Ok(())
        })
    }

    fn len(&self, ts: &ThreadState) -> ScriptResult<usize> {
        if let Some(pinned) = self.pinned.lock().as_ref() {
            return Ok(pinned.elements.len());
        }
        self.interop
            .host()
            .array_length(&self.array)
            .map_err(|thrown| self.interop.drain(ts, thrown))
    }

    fn to_text(&self, ts: &ThreadState) -> ScriptResult<String> {
        let len = self.len(ts)?;
        let mut parts = Vec::with_capacity(len);
        for at in 0..len {
            let element = self.get_item(ts, &Value::Int(at as i64))?;
            parts.push(exec::repr(ts, &element)?);
        }
        Ok(format!("[{}]", parts.join(", ")))
    }

    fn equals(&self, _ts: &ThreadState, other: &Value) -> ScriptResult<bool> {
        Ok(other
            .foreign::<ArrayProxy>()
            .is_some_and(|other| other.array.identity() == self.array.identity()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostEnv, InProcessHost};
    use crate::script::ScriptRuntime;
    use crate::types::TypeCache;

    fn int_array(values: &[i32]) -> (Arc<InProcessHost>, Arc<Interop>, Arc<ThreadState>, HostRef) {
        let host = InProcessHost::new();
        let types = Arc::new(TypeCache::new(host.clone()));
        let interop = Interop::new(host.clone(), types, true);
        let ts = ScriptRuntime::new().new_interpreter();
        let int = host.find_class("int").expect("int");
        let array = host.new_array(&int, values.iter().copied().map(HostValue::Int).collect());
        (host, interop, ts, array)
    }

    #[test]
    fn writes_reach_host_on_commit() {
        let (host, interop, ts, array) = int_array(&[1, 2, 3]);
        let proxy = ArrayProxy::new(&interop, array.clone());
        proxy.set_item(&ts, &Value::Int(-1), Value::Int(30)).expect("set");
        assert!(proxy.is_pinned());
        let before = host.array_elements(&array).expect("elements");
        assert!(matches!(before[2], HostValue::Int(3)));
        proxy.release_pinned(&ts, true).expect("release");
        let after = host.array_elements(&array).expect("elements");
        assert!(matches!(after[2], HostValue::Int(30)));
    }

    #[test]
    fn abandoned_writes_are_discarded() {
        let (host, interop, ts, array) = int_array(&[1]);
        let proxy = ArrayProxy::new(&interop, array.clone());
        proxy.set_item(&ts, &Value::Int(0), Value::Int(9)).expect("set");
        proxy.release_pinned(&ts, false).expect("release");
        assert!(matches!(host.array_elements(&array).expect("elements")[0], HostValue::Int(1)));
        assert!(matches!(proxy.get_item(&ts, &Value::Int(0)), Ok(Value::Int(1))));
    }

    #[test]
    fn index_and_element_errors() {
        let (_host, interop, ts, array) = int_array(&[1, 2]);
        let proxy = ArrayProxy::new(&interop, array);
        assert!(proxy.get_item(&ts, &Value::Int(2)).is_err());
        assert!(ts.fetch_error().expect("pending").is(Builtin::Index));
        assert!(proxy.set_item(&ts, &Value::Int(0), Value::text("x")).is_err());
        assert_eq!(
            ts.fetch_error().expect("pending").render(),
            "TypeError: Expected int parameter at 1."
        );
        assert_eq!(proxy.to_text(&ts).expect("text"), "[1, 2]");
    }

    #[test]
    fn drop_commits_and_releases_reference() {
        let (host, interop, ts, array) = int_array(&[5]);
        interop.types().preload().expect("preload");
        let live = host.live_global_refs();
        {
            let proxy = ArrayProxy::new(&interop, array.clone());
            proxy.set_item(&ts, &Value::Int(0), Value::Int(6)).expect("set");
        }
        assert!(matches!(host.array_elements(&array).expect("elements")[0], HostValue::Int(6)));
        assert_eq!(host.live_global_refs(), live);
    }
}
