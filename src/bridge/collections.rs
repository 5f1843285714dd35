//==================================================
// File: bridge/collections.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Container and number behaviour of Host objects
// Objective: Drive len(), indexing, membership and arithmetic on object
//            proxies through the Collection, List, Map and Number methods
//            their class implements
//==================================================

use std::sync::Arc;

use tracing::trace;

use super::proxy::invoke;
use super::Interop;
use crate::host::{ClassRef, HostRef, HostResult, MethodRef};
use crate::script::{Builtin, ScriptResult, ThreadState, Value, exec};

const OBJECT: &str = "java.lang.Object";

/// Host interface an object is driven through. Checked in declaration
/// order, so a List is never treated as a plain Collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    List,
    Map,
    Collection,
    Number,
}

impl Protocol {
    const ALL: [Protocol; 4] = [Protocol::List, Protocol::Map, Protocol::Collection, Protocol::Number];

    fn interface(self) -> &'static str {
        match self {
            Protocol::List => "java.util.List",
            Protocol::Map => "java.util.Map",
            Protocol::Collection => "java.util.Collection",
            Protocol::Number => "java.lang.Number",
        }
    }

    fn methods(self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            Protocol::List => &[
                ("size", &[]),
                ("contains", &[OBJECT]),
                ("get", &["int"]),
                ("set", &["int", OBJECT]),
            ],
            Protocol::Map => &[
                ("size", &[]),
                ("containsKey", &[OBJECT]),
                ("get", &[OBJECT]),
                ("put", &[OBJECT, OBJECT]),
            ],
            Protocol::Collection => &[("size", &[]), ("contains", &[OBJECT])],
            Protocol::Number => &[("doubleValue", &[])],
        }
    }
}

struct ProtocolEntry {
    protocol: Protocol,
    interface: ClassRef,
    methods: Vec<MethodRef>,
}

/// Protocol interfaces the Host provides, resolved on first use.
pub struct ProtocolTable {
    entries: Vec<ProtocolEntry>,
}

impl ProtocolTable {
    fn resolve(interop: &Interop) -> ProtocolTable {
        let host = interop.host();
        let mut entries = Vec::new();
        for protocol in Protocol::ALL {
            let resolved: HostResult<_> = host.find_class(protocol.interface()).and_then(|interface| {
                let methods = protocol
                    .methods()
                    .iter()
                    .map(|(name, params)| host.get_method(&interface, name, params))
                    .collect::<HostResult<Vec<_>>>()?;
                Ok((interface, methods))
            });
            match resolved {
                Ok((interface, methods)) => entries.push(ProtocolEntry {
                    protocol,
                    interface,
                    methods,
                }),
                Err(_) => {
                    host.exception_clear();
                    trace!(interface = protocol.interface(), "protocol unavailable");
                }
            }
        }
        ProtocolTable { entries }
    }
}

impl Interop {
    /// `object` seen through the first protocol its class implements.
    pub(super) fn container<'a>(
        self: &'a Arc<Self>,
        object: &'a HostRef,
        class: &ClassRef,
    ) -> Option<HostContainer<'a>> {
        let table = self.protocols.get_or_init(|| ProtocolTable::resolve(self));
        let host = self.host();
        let entry = table
            .entries
            .iter()
            .find(|entry| host.is_assignable_from(class, &entry.interface))?;
        Some(HostContainer {
            interop: self,
            object,
            entry,
        })
    }
}

/// A Host object bound to its protocol methods. Every operation returns
/// `None` when the protocol has no such operation.
pub(super) struct HostContainer<'a> {
    interop: &'a Arc<Interop>,
    object: &'a HostRef,
    entry: &'a ProtocolEntry,
}

impl HostContainer<'_> {
    fn call(&self, ts: &ThreadState, name: &str, args: &[Value]) -> ScriptResult<Option<Value>> {
        let Some(method) = self.entry.methods.iter().find(|m| m.name == name) else {
            return Ok(None);
        };
        invoke(self.interop, ts, Some(self.object), method, args).map(Some)
    }

    pub fn len(&self, ts: &ThreadState) -> ScriptResult<Option<usize>> {
        match self.call(ts, "size", &[])? {
            Some(Value::Int(size)) => Ok(Some(usize::try_from(size).unwrap_or(0))),
            Some(other) => Err(ts.raise(
                Builtin::Type,
                format!("size() returned '{}'", other.type_name()),
            )),
            None => Ok(None),
        }
    }

    pub fn get_item(&self, ts: &ThreadState, key: &Value) -> ScriptResult<Option<Value>> {
        match self.entry.protocol {
            Protocol::List => {
                let at = self.list_index(ts, key)?;
                self.call(ts, "get", &[Value::Int(at as i64)])
            }
            Protocol::Map => {
                let Some(found) = self.call(ts, "get", &[key.clone()])? else {
                    return Ok(None);
                };
                // A null value is only a miss when the key is absent.
                if found.is_none() && self.contains(ts, key)? != Some(true) {
                    let key = exec::to_text(ts, key)?;
                    return Err(ts.raise(Builtin::Key, key));
                }
                Ok(Some(found))
            }
            Protocol::Collection | Protocol::Number => Ok(None),
        }
    }

    pub fn set_item(&self, ts: &ThreadState, key: &Value, value: Value) -> ScriptResult<bool> {
        let replaced = match self.entry.protocol {
            Protocol::List => {
                let at = self.list_index(ts, key)?;
                self.call(ts, "set", &[Value::Int(at as i64), value])?
            }
            Protocol::Map => self.call(ts, "put", &[key.clone(), value])?,
            Protocol::Collection | Protocol::Number => None,
        };
        Ok(replaced.is_some())
    }

    pub fn contains(&self, ts: &ThreadState, item: &Value) -> ScriptResult<Option<bool>> {
        let name = match self.entry.protocol {
            Protocol::Map => "containsKey",
            _ => "contains",
        };
        Ok(self.call(ts, name, &[item.clone()])?.map(|found| found.truthy()))
    }

    pub fn to_number(&self, ts: &ThreadState) -> ScriptResult<Option<Value>> {
        match self.call(ts, "doubleValue", &[])? {
            Some(Value::Float(value)) => Ok(Some(Value::Float(value))),
            _ => Ok(None),
        }
    }

    fn list_index(&self, ts: &ThreadState, key: &Value) -> ScriptResult<usize> {
        let len = self.len(ts)?.unwrap_or(0);
        exec::index_of(ts, key, len)
    }
}
