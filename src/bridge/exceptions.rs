//==================================================
// File: bridge/exceptions.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Carry pending errors across the Host/Script boundary
// Objective: Capture, clear and re-raise errors in the other runtime with a
//            `type: value` message, a preserved cause and an optional trace
//            on the diagnostic stream
//==================================================

use tracing::{debug, trace, warn};

use super::Interop;
use crate::error::BridgeError;
use crate::host::{EMBED_EXCEPTION_CLASS, HostMethod, HostRef, HostResult, HostValue, Thrown};
use crate::script::{Builtin, ErrorDetail, ErrorType, ErrorTypeRef, Raised, ScriptException, ThreadState, Value};

const OUT_OF_MEMORY_CLASS: &str = "java.lang.OutOfMemoryError";

/// Simple class name a rendered Host message starts with:
/// `java.lang.NumberFormatException: For input string` gives
/// `NumberFormatException`.
fn mapped_name(message: &str) -> &str {
    let head = message.split(':').next().unwrap_or(message).trim();
    head.rsplit('.').next().unwrap_or(head)
}

//==================================================
// Section 1.0 - Host to Script
//==================================================

impl Interop {
    fn print_stack_for(&self, ts: &ThreadState) -> bool {
        self.link(ts.id()).is_some_and(|link| link.print_stack())
    }

    /// Takes the pending Host throwable, clearing the Host slot. Its message is
    /// the throwable's `toString()`.
    fn capture_host(&self, ts: &ThreadState) -> Option<(HostRef, String)> {
        let host = self.host();
        if !host.exception_check() {
            return None;
        }
        if self.print_stack_for(ts) {
            host.exception_describe();
        }
        let throwable = host.exception_occurred();
        host.exception_clear();
        let throwable = throwable?;
        let message = match host.to_string(&throwable) {
            Ok(message) => message,
            Err(_) => {
                host.exception_clear();
                throwable.class().name().to_string()
            }
        };
        Some((throwable, message))
    }

    fn mapped_type(&self, ts: &ThreadState, message: &str) -> Option<ErrorTypeRef> {
        if !self.mapped_exceptions {
            return None;
        }
        let link = self.link(ts.id())?;
        match link.bridge_module().get(mapped_name(message)) {
            Some(Value::ErrorType(error_type)) => Some(error_type),
            _ => None,
        }
    }

    /// Translates a pending Host throwable into a pending Script error.
    ///
    /// Returns `None` when nothing was pending.
    pub fn process_host_exception(&self, ts: &ThreadState) -> Option<Raised> {
        let (throwable, message) = self.capture_host(ts)?;
        let error_type = if throwable.class().name() == OUT_OF_MEMORY_CLASS {
            Builtin::Memory.get()
        } else {
            self.mapped_type(ts, &message)
                .unwrap_or_else(|| Builtin::Runtime.get())
        };
        debug!(
            state = ts.id(),
            host_class = throwable.class().name(),
            script_type = %error_type.qualified_name(),
            "host exception translated"
        );
        Some(ts.raise_exception(
            ScriptException::new(error_type, message).with_cause(throwable),
        ))
    }

    /// Like [`Interop::process_host_exception`] but always raises `ImportError`.
    pub fn process_import_exception(&self, ts: &ThreadState) -> Option<Raised> {
        let (throwable, message) = self.capture_host(ts)?;
        debug!(state = ts.id(), host_class = throwable.class().name(), "host exception during import");
        Some(ts.raise_exception(
            ScriptException::new(Builtin::Import.get(), message).with_cause(throwable),
        ))
    }

    /// Converts a failed Host call into a Script error.
    pub fn drain(&self, ts: &ThreadState, _thrown: Thrown) -> Raised {
        match self.process_host_exception(ts) {
            Some(raised) => raised,
            None => {
                warn!(state = ts.id(), "host call failed with nothing pending");
                ts.raise(Builtin::Runtime, "host call failed")
            }
        }
    }

    /// Registers the declared exception types of `method` in the bridge
    /// module of the current context so mapped errors can be caught by name.
    pub fn register_exceptions(&self, ts: &ThreadState, method: &HostMethod) {
        if !self.mapped_exceptions || method.exceptions.is_empty() {
            return;
        }
        let Some(link) = self.link(ts.id()) else {
            return;
        };
        let host = self.host();
        let classes = match host.exception_types(method) {
            Ok(classes) => classes,
            Err(_) => {
                host.exception_clear();
                trace!(method = ?method, "declared exceptions unresolvable");
                return;
            }
        };
        let module = link.bridge_module();
        for class in classes {
            let name = class.simple_name();
            if module.contains(name) {
                continue;
            }
            let error_type = ErrorType::mapped(class.name(), module.name(), &Builtin::Runtime.get());
            trace!(class = class.name(), module = module.name(), "exception type registered");
            module.set(name, Value::ErrorType(error_type));
        }
    }

    /// Drains a pending Host throwable outside of any Script frame.
    pub fn host_error(&self) -> Option<BridgeError> {
        let host = self.host();
        if !host.exception_check() {
            return None;
        }
        let throwable = host.exception_occurred();
        host.exception_clear();
        let throwable = throwable?;
        let message = host.to_string(&throwable).unwrap_or_else(|_| {
            host.exception_clear();
            throwable.class().name().to_string()
        });
        Some(BridgeError::HostException {
            class: throwable.class().name().to_string(),
            message,
        })
    }

    //==================================================
    // Section 2.0 - Script to Host
    //==================================================

    /// Makes `err` pending on the Host as an `EmbedException`, chaining the
    /// original Host cause when there is one.
    pub fn throw_into_host(&self, err: &BridgeError) -> Thrown {
        let host = self.host();
        let cause = match err {
            BridgeError::Script { cause, .. } => cause.clone(),
            _ => None,
        };
        let build = || -> HostResult<HostRef> {
            let class = host.find_class(EMBED_EXCEPTION_CLASS)?;
            let ctor = host.get_constructor(&class, &["java.lang.String", "java.lang.Throwable"])?;
            let message = HostValue::Ref(host.new_string(&err.to_string()));
            host.new_object(&class, &ctor, &[message, HostValue::from_ref(cause.clone())])
        };
        match build() {
            Ok(throwable) => {
                debug!(category = err.category(), "script error thrown into host");
                host.throw(throwable)
            }
            Err(thrown) => thrown,
        }
    }
}

/// Turns a pending Script error into a [`BridgeError`], clearing it.
///
/// The trace goes to stderr only when `print_stack` is set, and to the `debug`
/// log either way; it never becomes part of the message.
pub fn process_script_exception(ts: &ThreadState, print_stack: bool) -> Option<BridgeError> {
    let exception = ts.fetch_error()?;
    let rendered_trace = exception.render_trace();
    if print_stack {
        eprintln!("{rendered_trace}");
    }
    debug!(state = ts.id(), trace = %rendered_trace, "script exception captured");
    let message = exception.render();
    let err = if exception.is(Builtin::Syntax) {
        BridgeError::ScriptSyntax { message }
    } else if exception.is(Builtin::Memory) {
        BridgeError::OutOfMemory(message)
    } else if exception.is(Builtin::Import) {
        let path = match &exception.detail {
            Some(ErrorDetail::ImportPath(path)) => path.clone(),
            _ => exception.message.clone().unwrap_or_default(),
        };
        BridgeError::ImportUnresolved { path, message }
    } else if let Some(ErrorDetail::Position(position)) = exception.detail {
        // carries the coercion text alone, without the `TypeError: ` prefix
        let message = exception.message.clone().unwrap_or(message);
        BridgeError::TypeMismatch { position, message }
    } else {
        BridgeError::Script {
            kind: exception.error_type.qualified_name(),
            message,
            mapped_class: exception.error_type.host_class().map(str::to_string),
            cause: exception.cause,
        }
    };
    Some(err)
}

/// Raises a bridge-level failure as a Script error of the closest kind.
pub fn raise_bridge_error(ts: &ThreadState, err: BridgeError) -> Raised {
    let message = err.to_string();
    match err {
        BridgeError::OutOfMemory(_) => ts.raise(Builtin::Memory, message),
        BridgeError::ImportUnresolved { path, .. } => ts.raise_exception(
            ScriptException::new(Builtin::Import.get(), message).with_detail(ErrorDetail::ImportPath(path)),
        ),
        BridgeError::TypeMismatch { position, .. } => ts.raise_exception(
            ScriptException::new(Builtin::Type.get(), message).with_detail(ErrorDetail::Position(position)),
        ),
        BridgeError::ScriptSyntax { .. } => ts.raise(Builtin::Syntax, message),
        _ => ts.raise(Builtin::Runtime, message),
    }
}
