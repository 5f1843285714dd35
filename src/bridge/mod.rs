//==================================================
// File: bridge/mod.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Shared core of the Host/Script bridge
// Objective: One process-wide registry for the Host, the type cache, cached
//            member lookups and the live-context map, injected into every
//            proxy and conversion
//==================================================

pub mod array;
pub mod collections;
pub mod convert;
pub mod exceptions;
pub mod module;
pub mod proxy;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::trace;

use crate::host::{HostEnv, HostRef};
use crate::script::ModuleRef;
use crate::types::TypeCache;
use collections::ProtocolTable;

pub use array::ArrayProxy;
pub use convert::ConversionCache;
pub use proxy::{ClassProxy, MethodProxy, ObjectProxy};

//==================================================
// Section 1.0 - Per-context link
//==================================================

/// The parts of an execution context the bridge consults while that
/// context's interpreter state is current.
pub struct ContextLink {
    context_id: u64,
    print_stack: AtomicBool,
    bridge_module: ModuleRef,
    class_loader: RwLock<HostRef>,
}

impl ContextLink {
    pub fn new(context_id: u64, print_stack: bool, bridge_module: ModuleRef, class_loader: HostRef) -> Self {
        Self {
            context_id,
            print_stack: AtomicBool::new(print_stack),
            bridge_module,
            class_loader: RwLock::new(class_loader),
        }
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    pub fn print_stack(&self) -> bool {
        self.print_stack.load(Ordering::SeqCst)
    }

    pub fn set_print_stack(&self, flag: bool) {
        self.print_stack.store(flag, Ordering::SeqCst);
    }

    pub fn bridge_module(&self) -> &ModuleRef {
        &self.bridge_module
    }

    pub fn class_loader(&self) -> HostRef {
        self.class_loader.read().clone()
    }

    pub(crate) fn set_class_loader(&self, loader: HostRef) {
        *self.class_loader.write() = loader;
    }
}

//==================================================
// Section 2.0 - Interop core
//==================================================

/// Process-wide bridge state.
///
/// Value conversion lives in [`convert`], error translation in
/// [`exceptions`]; both are `impl Interop` blocks so every caller shares one
/// set of cached lookups.
pub struct Interop {
    host: Arc<dyn HostEnv>,
    types: Arc<TypeCache>,
    cache: ConversionCache,
    protocols: OnceCell<ProtocolTable>,
    mapped_exceptions: bool,
    /// Written only while the execution lock is held (context creation and
    /// teardown). The inner lock lets natives read it without re-entering.
    links: RwLock<HashMap<u64, Arc<ContextLink>>>,
}

impl Interop {
    pub fn new(host: Arc<dyn HostEnv>, types: Arc<TypeCache>, mapped_exceptions: bool) -> Arc<Self> {
        Arc::new(Self {
            host,
            types,
            cache: ConversionCache::default(),
            protocols: OnceCell::new(),
            mapped_exceptions: cfg!(feature = "mapped-exceptions") && mapped_exceptions,
            links: RwLock::new(HashMap::new()),
        })
    }

    pub fn host(&self) -> &dyn HostEnv {
        self.host.as_ref()
    }

    pub fn types(&self) -> &TypeCache {
        &self.types
    }

    pub fn mapped_exceptions(&self) -> bool {
        self.mapped_exceptions
    }

    /// Link of the context whose interpreter state has id `state_id`.
    pub fn link(&self, state_id: u64) -> Option<Arc<ContextLink>> {
        self.links.read().get(&state_id).cloned()
    }

    pub(crate) fn attach(&self, state_id: u64, link: Arc<ContextLink>) {
        trace!(state = state_id, context = link.context_id(), "context linked");
        self.links.write().insert(state_id, link);
    }

    pub(crate) fn detach(&self, state_id: u64) -> Option<Arc<ContextLink>> {
        trace!(state = state_id, "context unlinked");
        self.links.write().remove(&state_id)
    }

    pub fn live_links(&self) -> usize {
        self.links.read().len()
    }

    /// Drops cached member lookups and the durable references they hold.
    pub fn release(&self) {
        self.cache.release(self.host());
    }
}
