//==================================================
// File: embed.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Host-facing entry point of the embedding bridge
// Objective: Wire the Host, type cache, interop core, Script runtime and
//            context manager together and own their process lifecycle
//==================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::bridge::Interop;
use crate::config::BridgeConfig;
use crate::context::{ContextDefaults, ContextManager};
use crate::error::BridgeResult;
use crate::host::HostEnv;
use crate::script::ScriptRuntime;
use crate::types::TypeCache;

//==================================================
// Section 1.0 - Bridge
//==================================================

/// One embedding of the Script runtime into a Host.
pub struct Bridge {
    config: BridgeConfig,
    host: Arc<dyn HostEnv>,
    types: Arc<TypeCache>,
    interop: Arc<Interop>,
    contexts: ContextManager,
    shut_down: AtomicBool,
}

impl Bridge {
    pub fn new(host: Arc<dyn HostEnv>, config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let types = Arc::new(TypeCache::new(host.clone()));
        let interop = Interop::new(host.clone(), types.clone(), config.mapped_exceptions);
        let defaults = ContextDefaults {
            print_stack: config.print_stack,
            bridge_module: config.bridge_module.clone(),
        };
        let contexts = ContextManager::new(ScriptRuntime::new(), interop.clone(), defaults);
        info!(
            bridge_module = %config.bridge_module,
            mapped_exceptions = interop.mapped_exceptions(),
            "bridge initialised"
        );
        Ok(Self {
            config,
            host,
            types,
            interop,
            contexts,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn HostEnv> {
        &self.host
    }

    pub fn types(&self) -> &Arc<TypeCache> {
        &self.types
    }

    pub fn interop(&self) -> &Arc<Interop> {
        &self.interop
    }

    /// Every Host-facing context operation.
    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Closes every context, then releases cached Host references and
    /// finalizes the Script runtime. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.contexts.close_all();
        self.interop.release();
        self.types.release();
        self.contexts.runtime().finalize();
        info!("bridge shut down");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            warn!("bridge dropped without shutdown");
            self.shutdown();
        }
    }
}

//==================================================
// Section 2.0 - Process singleton
//==================================================

static PROCESS: Lazy<Mutex<Option<Arc<Bridge>>>> = Lazy::new(|| Mutex::new(None));

/// Creates the process-wide bridge, or returns the live one unchanged.
pub fn initialize_process(host: Arc<dyn HostEnv>, config: BridgeConfig) -> BridgeResult<Arc<Bridge>> {
    let mut slot = PROCESS.lock();
    if let Some(bridge) = slot.as_ref() {
        return Ok(bridge.clone());
    }
    let bridge = Arc::new(Bridge::new(host, config)?);
    *slot = Some(bridge.clone());
    Ok(bridge)
}

pub fn process() -> Option<Arc<Bridge>> {
    PROCESS.lock().clone()
}

/// Shuts the process-wide bridge down. A no-op when none is live.
pub fn shutdown_process() {
    let bridge = PROCESS.lock().take();
    if let Some(bridge) = bridge {
        bridge.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InProcessHost;

    #[test]
    fn shutdown_releases_every_reference() {
        let host = InProcessHost::new();
        let bridge = Bridge::new(host.clone(), BridgeConfig::default()).expect("bridge");
        let manager = bridge.contexts();
        let ctx = manager
            .create_context(Some(host.system_class_loader()))
            .expect("context");
        manager.eval(ctx, "from java.lang import Integer").expect("import");
        manager.eval(ctx, "t = Integer.TYPE").expect("static field");
        bridge.shutdown();
        bridge.shutdown();
        assert_eq!(host.live_global_refs(), 0);
        assert_eq!(manager.live_contexts(), 0);
        assert!(manager.runtime().is_finalized());
        assert!(bridge.interop().live_links() == 0);
    }

    #[test]
    fn rejects_invalid_module_name() {
        let config = BridgeConfig::default().with_bridge_module("1bad");
        assert!(Bridge::new(InProcessHost::new(), config).is_err());
    }
}
