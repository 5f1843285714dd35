//==================================================
// File: lib.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: SolvraEmbed library root
// Objective: Expose the Host/Script embedding bridge: type cache, value and
//            exception bridges, execution contexts and the import hook
//==================================================

pub mod bridge;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod host;
pub mod import_hook;
pub mod logging;
pub mod script;
pub mod types;

pub use config::BridgeConfig;
pub use context::{
    Callable, CompileStatus, ContextHandle, ContextManager, ExecutionGuard, GlobalValue,
    ScriptHandle,
};
pub use embed::{Bridge, initialize_process, shutdown_process};
pub use error::{BridgeError, BridgeResult};
pub use host::{HostEnv, HostRef, HostValue, InProcessHost};
pub use types::{JavaKind, TokenName, TypeCache};
