//==================================================
// File: script/error.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Script-side error types and pending exceptions
// Objective: Give every raised error a type, message, trace and optional
//            Host cause, with stable diagnostic codes per family
//==================================================

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::host::HostRef;

//==================================================
// Section 1.0 - Diagnostic codes
//==================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Syntax,
    ModuleResolution,
    TypeMismatch,
    InvalidOperation,
    RuntimePanic,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Syntax => "E001",
            ErrorCode::ModuleResolution => "E002",
            ErrorCode::TypeMismatch => "E003",
            ErrorCode::InvalidOperation => "E004",
            ErrorCode::RuntimePanic => "E005",
        }
    }
}

//==================================================
// Section 2.0 - Error types
//==================================================

pub type ErrorTypeRef = Arc<ErrorType>;

/// A raisable error class. Builtin types have no module; registered Host
/// exception types live in the bridge module.
pub struct ErrorType {
    name: String,
    module: Option<String>,
    base: Option<ErrorTypeRef>,
    code: ErrorCode,
    host_class: Option<String>,
}

impl ErrorType {
    pub fn new(name: impl Into<String>, module: Option<&str>, base: &ErrorTypeRef) -> ErrorTypeRef {
        Arc::new(ErrorType {
            name: name.into(),
            module: module.map(str::to_string),
            base: Some(base.clone()),
            code: base.code,
            host_class: None,
        })
    }

    /// A type standing for the Host exception class `host_class`.
    pub fn mapped(host_class: &str, module: &str, base: &ErrorTypeRef) -> ErrorTypeRef {
        let name = host_class.rsplit('.').next().unwrap_or(host_class);
        Arc::new(ErrorType {
            name: name.to_string(),
            module: Some(module.to_string()),
            base: Some(base.clone()),
            code: base.code,
            host_class: Some(host_class.to_string()),
        })
    }

    fn root(name: &str, code: ErrorCode, base: Option<&ErrorTypeRef>) -> ErrorTypeRef {
        Arc::new(ErrorType {
            name: name.to_string(),
            module: None,
            base: base.cloned(),
            code,
            host_class: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `module.Name` for registered types, bare `Name` for builtins.
    pub fn qualified_name(&self) -> String {
        match &self.module {
            Some(module) => format!("{module}.{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn host_class(&self) -> Option<&str> {
        self.host_class.as_deref()
    }

    pub fn is_subtype_of(&self, other: &ErrorType) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.base
            .as_ref()
            .is_some_and(|base| base.is_subtype_of(other))
    }
}

impl fmt::Debug for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.qualified_name())
    }
}

/// Builtin error families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Base,
    Runtime,
    Type,
    Import,
    Syntax,
    Name,
    Attribute,
    ZeroDivision,
    Value,
    Index,
    Key,
    Overflow,
    Memory,
}

impl Builtin {
    pub const ALL: [Builtin; 13] = [
        Builtin::Base,
        Builtin::Runtime,
        Builtin::Type,
        Builtin::Import,
        Builtin::Syntax,
        Builtin::Name,
        Builtin::Attribute,
        Builtin::ZeroDivision,
        Builtin::Value,
        Builtin::Index,
        Builtin::Key,
        Builtin::Overflow,
        Builtin::Memory,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Base => "Exception",
            Builtin::Runtime => "RuntimeError",
            Builtin::Type => "TypeError",
            Builtin::Import => "ImportError",
            Builtin::Syntax => "SyntaxError",
            Builtin::Name => "NameError",
            Builtin::Attribute => "AttributeError",
            Builtin::ZeroDivision => "ZeroDivisionError",
            Builtin::Value => "ValueError",
            Builtin::Index => "IndexError",
            Builtin::Key => "KeyError",
            Builtin::Overflow => "OverflowError",
            Builtin::Memory => "MemoryError",
        }
    }

    pub fn get(self) -> ErrorTypeRef {
        BUILTINS[&self].clone()
    }
}

static BUILTINS: Lazy<HashMap<Builtin, ErrorTypeRef>> = Lazy::new(|| {
    let base = ErrorType::root("Exception", ErrorCode::RuntimePanic, None);
    let mut table = HashMap::new();
    for builtin in Builtin::ALL {
        let code = match builtin {
            Builtin::Base => {
                table.insert(builtin, base.clone());
                continue;
            }
            Builtin::Syntax => ErrorCode::Syntax,
            Builtin::Import => ErrorCode::ModuleResolution,
            Builtin::Type => ErrorCode::TypeMismatch,
            Builtin::Name
            | Builtin::Attribute
            | Builtin::ZeroDivision
            | Builtin::Value
            | Builtin::Index
            | Builtin::Key
            | Builtin::Overflow => ErrorCode::InvalidOperation,
            Builtin::Runtime | Builtin::Memory => ErrorCode::RuntimePanic,
        };
        table.insert(builtin, ErrorType::root(builtin.name(), code, Some(&base)));
    }
    table
});

//==================================================
// Section 3.0 - Raised exceptions
//==================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub file: String,
    pub line: usize,
}

/// Extra structure carried alongside the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    /// 1-based offending argument position.
    Position(usize),
    /// Dotted path an import could not resolve.
    ImportPath(String),
}

/// A raised Script error: what sits in a thread state's pending slot.
#[derive(Debug, Clone)]
pub struct ScriptException {
    pub error_type: ErrorTypeRef,
    pub message: Option<String>,
    pub trace: Vec<TraceEntry>,
    pub cause: Option<HostRef>,
    pub detail: Option<ErrorDetail>,
}

impl ScriptException {
    pub fn new(error_type: ErrorTypeRef, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: Some(message.into()),
            trace: Vec::new(),
            cause: None,
            detail: None,
        }
    }

    pub fn bare(error_type: ErrorTypeRef) -> Self {
        Self {
            error_type,
            message: None,
            trace: Vec::new(),
            cause: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_cause(mut self, cause: HostRef) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn is(&self, builtin: Builtin) -> bool {
        self.error_type.is_subtype_of(&builtin.get())
    }

    /// `type: value` when a message is present, else `type`.
    pub fn render(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {}", self.error_type.qualified_name(), message),
            None => self.error_type.qualified_name(),
        }
    }

    /// Traceback text for the diagnostic stream. Never part of `render`.
    pub fn render_trace(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for entry in self.trace.iter().rev() {
            out.push_str(&format!("  File \"{}\", line {}\n", entry.file, entry.line));
        }
        out.push_str(&self.render());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_codes_follow_families() {
        assert_eq!(Builtin::Syntax.get().code().as_str(), "E001");
        assert_eq!(Builtin::Import.get().code().as_str(), "E002");
        assert_eq!(Builtin::Type.get().code().as_str(), "E003");
        assert_eq!(Builtin::Name.get().code().as_str(), "E004");
        assert_eq!(Builtin::Runtime.get().code().as_str(), "E005");
    }

    #[test]
    fn registered_types_inherit_and_qualify() {
        let mapped = ErrorType::new("NumberFormatException", Some("embed"), &Builtin::Runtime.get());
        assert!(mapped.is_subtype_of(&Builtin::Runtime.get()));
        assert!(mapped.is_subtype_of(&Builtin::Base.get()));
        assert!(!mapped.is_subtype_of(&Builtin::Import.get()));
        assert_eq!(mapped.qualified_name(), "embed.NumberFormatException");
        assert_eq!(mapped.host_class(), None);
        let host = ErrorType::mapped("java.lang.ArithmeticException", "embed", &Builtin::Runtime.get());
        assert_eq!(host.name(), "ArithmeticException");
        assert_eq!(host.host_class(), Some("java.lang.ArithmeticException"));
    }

    #[test]
    fn render_prefers_type_and_value() {
        let err = ScriptException::new(Builtin::Name.get(), "name 'y' is not defined");
        assert_eq!(err.render(), "NameError: name 'y' is not defined");
        assert_eq!(ScriptException::bare(Builtin::Memory.get()).render(), "MemoryError");
    }
}
