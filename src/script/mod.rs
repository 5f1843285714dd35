//==================================================
// File: script/mod.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Embedded Script runtime
// Objective: Small dynamically typed language with sub-interpreters, a
//            shared execution lock and a replaceable import entry point
//==================================================

pub mod ast;
pub mod builtins;
pub mod error;
pub mod exec;
pub mod parser;
pub mod state;
pub mod tokenizer;
pub mod value;

pub use error::{Builtin, ErrorDetail, ErrorType, ErrorTypeRef, ScriptException};
pub use exec::{CompileMode, CompiledCode};
pub use state::{ExtensionRegistry, ScriptRuntime, ThreadState};
pub use value::{Foreign, Module, ModuleOrigin, ModuleRef, Raised, ScriptResult, Value};
