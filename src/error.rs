//==================================================
// File: error.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Error taxonomy reported to the Host side of the bridge
// Objective: Keep each failure class distinct so callers can react to it
//==================================================

use std::path::PathBuf;

use thiserror::Error;

use crate::host::HostRef;
use crate::types::JavaKind;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    #[error("Invalid Classloader.")]
    InvalidClassLoader,
    /// The context is closed, unknown, or cannot be swapped in on this thread.
    #[error("thread state unavailable: {0}")]
    ThreadStateUnavailable(String),
    #[error("{message}")]
    ScriptSyntax { message: String },
    /// A Script error translated for the Host. `message` is `type: value`;
    /// `mapped_class` names the Host exception the type was matched to.
    #[error("{message}")]
    Script {
        kind: String,
        message: String,
        mapped_class: Option<String>,
        cause: Option<HostRef>,
    },
    /// A Host exception drained outside of any Script frame.
    #[error("{message}")]
    HostException { class: String, message: String },
    #[error("{message}")]
    TypeMismatch { position: usize, message: String },
    #[error("{message}")]
    ImportUnresolved { path: String, message: String },
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("type token for {kind} unavailable: {reason}")]
    TypeUnavailable { kind: JavaKind, reason: String },
    #[error("Couldn't open script file. {}: {reason}", .path.display())]
    ScriptFile { path: PathBuf, reason: String },
    #[error("Invalid onModule.")]
    InvalidModule,
    #[error("invoke: Unhandled typeid {0}")]
    UnhandledTypeId(i32),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn thread_state(detail: impl Into<String>) -> Self {
        BridgeError::ThreadStateUnavailable(detail.into())
    }

    /// Short category label used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            BridgeError::InvalidClassLoader => "invalid-classloader",
            BridgeError::ThreadStateUnavailable(_) => "thread-state",
            BridgeError::ScriptSyntax { .. } => "syntax",
            BridgeError::Script { .. } => "script",
            BridgeError::HostException { .. } => "host",
            BridgeError::TypeMismatch { .. } => "type-mismatch",
            BridgeError::ImportUnresolved { .. } => "import",
            BridgeError::OutOfMemory(_) => "out-of-memory",
            BridgeError::TypeUnavailable { .. } => "type-unavailable",
            BridgeError::ScriptFile { .. } => "script-file",
            BridgeError::InvalidModule => "invalid-module",
            BridgeError::UnhandledTypeId(_) => "typeid",
            BridgeError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_host_conventions() {
        assert_eq!(BridgeError::InvalidClassLoader.to_string(), "Invalid Classloader.");
        assert_eq!(BridgeError::InvalidModule.to_string(), "Invalid onModule.");
        let err = BridgeError::ScriptFile {
            path: PathBuf::from("missing.svs"),
            reason: "not found".into(),
        };
        assert_eq!(err.to_string(), "Couldn't open script file. missing.svs: not found");
        assert_eq!(
            BridgeError::UnhandledTypeId(5).to_string(),
            "invoke: Unhandled typeid 5"
        );
    }
}
