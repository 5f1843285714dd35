//==================================================
// File: types/mod.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Canonical identities for the Host's primitive and core classes
// Objective: Resolve each token once per process, share it between threads,
//            and release every durable reference at shutdown
//==================================================

mod kind;

pub use kind::JavaKind;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::host::{ClassRef, GlobalRef, HostEnv, HostValue};

//==================================================
// Section 1.0 - Token names
//==================================================

/// One entry per class the classifier compares against, in classification
/// priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenName {
    Int,
    Short,
    Double,
    Float,
    Boolean,
    Long,
    String,
    Void,
    Char,
    Byte,
    Class,
    Object,
}

impl TokenName {
    /// Priority order used by the classifier. Changing it changes results.
    pub const PRIORITY: [TokenName; 10] = [
        TokenName::Int,
        TokenName::Short,
        TokenName::Double,
        TokenName::Float,
        TokenName::Boolean,
        TokenName::Long,
        TokenName::String,
        TokenName::Void,
        TokenName::Char,
        TokenName::Byte,
    ];

    pub const ALL: [TokenName; 12] = [
        TokenName::Int,
        TokenName::Short,
        TokenName::Double,
        TokenName::Float,
        TokenName::Boolean,
        TokenName::Long,
        TokenName::String,
        TokenName::Void,
        TokenName::Char,
        TokenName::Byte,
        TokenName::Class,
        TokenName::Object,
    ];

    pub fn kind(self) -> JavaKind {
        match self {
            TokenName::Int => JavaKind::Int,
            TokenName::Short => JavaKind::Short,
            TokenName::Double => JavaKind::Double,
            TokenName::Float => JavaKind::Float,
            TokenName::Boolean => JavaKind::Boolean,
            TokenName::Long => JavaKind::Long,
            TokenName::String => JavaKind::String,
            TokenName::Void => JavaKind::Void,
            TokenName::Char => JavaKind::Char,
            TokenName::Byte => JavaKind::Byte,
            TokenName::Class => JavaKind::Class,
            TokenName::Object => JavaKind::Object,
        }
    }

    /// Class looked up to resolve this token.
    fn class_name(self) -> &'static str {
        match self {
            TokenName::Int => "java.lang.Integer",
            TokenName::Short => "java.lang.Short",
            TokenName::Double => "java.lang.Double",
            TokenName::Float => "java.lang.Float",
            TokenName::Boolean => "java.lang.Boolean",
            TokenName::Long => "java.lang.Long",
            TokenName::String => "java.lang.String",
            TokenName::Void => "java.lang.Void",
            TokenName::Char => "java.lang.Character",
            TokenName::Byte => "java.lang.Byte",
            TokenName::Class => "java.lang.Class",
            TokenName::Object => "java.lang.Object",
        }
    }

    fn has_primitive(self) -> bool {
        !matches!(
            self,
            TokenName::String | TokenName::Class | TokenName::Object
        )
    }
}

//==================================================
// Section 2.0 - Tokens
//==================================================

/// Canonical identity of one Host type. `primitive` is the class published in
/// the wrapper's `TYPE` field; `class` is the wrapper (or the class itself for
/// String, Class and Object).
pub struct TypeToken {
    name: TokenName,
    class: ClassRef,
    primitive: Option<ClassRef>,
    held: Vec<GlobalRef>,
}

impl TypeToken {
    pub fn name(&self) -> TokenName {
        self.name
    }

    pub fn kind(&self) -> JavaKind {
        self.name.kind()
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    pub fn primitive(&self) -> Option<&ClassRef> {
        self.primitive.as_ref()
    }

    /// `true` when `class` is the primitive or the wrapper this token names.
    pub fn identifies(&self, class: &ClassRef) -> bool {
        class.id() == self.class.id()
            || self
                .primitive
                .as_ref()
                .is_some_and(|primitive| primitive.id() == class.id())
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeToken")
            .field("name", &self.name)
            .field("class", &self.class.name())
            .field("primitive", &self.primitive.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

enum Slot {
    Ready(Arc<TypeToken>),
    Unavailable(String),
}

//==================================================
// Section 3.0 - Cache
//==================================================

/// Process-wide cache of [`TypeToken`]s.
///
/// Lookups take the read lock; a miss upgrades to the write lock and checks
/// again before resolving so concurrent first use resolves exactly once.
pub struct TypeCache {
    host: Arc<dyn HostEnv>,
    slots: RwLock<HashMap<TokenName, Slot>>,
}

impl TypeCache {
    pub fn new(host: Arc<dyn HostEnv>) -> Self {
        Self {
            host,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &Arc<dyn HostEnv> {
        &self.host
    }

    pub fn resolve(&self, name: TokenName) -> BridgeResult<Arc<TypeToken>> {
        if let Some(slot) = self.slots.read().get(&name) {
            return slot_result(name, slot);
        }
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(&name) {
            return slot_result(name, slot);
        }
        let slot = match self.load(name) {
            Ok(token) => {
                debug!(token = ?name, class = token.class.name(), "type token resolved");
                Slot::Ready(Arc::new(token))
            }
            Err(reason) => {
                warn!(token = ?name, %reason, "type token unavailable");
                Slot::Unavailable(reason)
            }
        };
        let result = slot_result(name, &slot);
        slots.insert(name, slot);
        result
    }

    /// Resolves every token up front.
    pub fn preload(&self) -> BridgeResult<()> {
        for name in TokenName::ALL {
            self.resolve(name)?;
        }
        Ok(())
    }

    /// Classifies a Host class into its semantic kind.
    ///
    /// Tokens are compared in [`TokenName::PRIORITY`] order, then arrays, then
    /// anything assignable to `Class`, then the generic object arm.
    pub fn classify(&self, class: &ClassRef) -> BridgeResult<JavaKind> {
        for name in TokenName::PRIORITY {
            if self.resolve(name)?.identifies(class) {
                return Ok(name.kind());
            }
        }
        if class.is_array() {
            return Ok(JavaKind::Array);
        }
        let class_token = self.resolve(TokenName::Class)?;
        if self.host.is_assignable_from(class, class_token.class()) {
            return Ok(JavaKind::Class);
        }
        self.resolve(TokenName::Object)?;
        Ok(JavaKind::Object)
    }

    /// Deletes the durable references of every resolved token.
    pub fn release(&self) {
        let drained: Vec<Slot> = self.slots.write().drain().map(|(_, slot)| slot).collect();
        let mut released = 0usize;
        for slot in drained {
            if let Slot::Ready(token) = slot {
                match Arc::try_unwrap(token) {
                    Ok(token) => {
                        for reference in token.held {
                            self.host.delete_global_ref(reference);
                            released += 1;
                        }
                    }
                    Err(shared) => {
                        warn!(token = ?shared.name, "type token still borrowed at release");
                    }
                }
            }
        }
        debug!(released, "type tokens released");
    }

    fn load(&self, name: TokenName) -> Result<TypeToken, String> {
        let host = &self.host;
        let class = host.find_class(name.class_name()).map_err(|_| {
            host.exception_clear();
            format!("class {} not found", name.class_name())
        })?;
        let mut held = vec![host.new_global_ref(&host.class_mirror(&class))];
        let primitive = if name.has_primitive() {
            let field = host
                .fields(&class)
                .into_iter()
                .find(|f| f.is_static && f.name == "TYPE")
                .ok_or_else(|| format!("{} has no TYPE field", class.name()))?;
            let value = host.get_field(None, &field).map_err(|_| {
                host.exception_clear();
                format!("reading {}.TYPE failed", class.name())
            })?;
            let mirror = match value {
                HostValue::Ref(mirror) => mirror,
                _ => return Err(format!("{}.TYPE is not a class", class.name())),
            };
            let primitive = mirror
                .as_mirror()
                .cloned()
                .ok_or_else(|| format!("{}.TYPE is not a class", class.name()))?;
            held.push(host.new_global_ref(&mirror));
            Some(primitive)
        } else {
            None
        };
        Ok(TypeToken {
            name,
            class,
            primitive,
            held,
        })
    }
}

fn slot_result(name: TokenName, slot: &Slot) -> BridgeResult<Arc<TypeToken>> {
    match slot {
        Slot::Ready(token) => Ok(token.clone()),
        Slot::Unavailable(reason) => Err(BridgeError::TypeUnavailable {
            kind: name.kind(),
            reason: reason.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ClassBuilder, InProcessHost};
    use std::thread;

    fn cache() -> (Arc<InProcessHost>, TypeCache) {
        let host = InProcessHost::new();
        let cache = TypeCache::new(host.clone());
        (host, cache)
    }

    #[test]
    fn primitive_and_wrapper_share_a_kind() {
        let (host, cache) = cache();
        let int = host.find_class("int").expect("int");
        let integer = host.find_class("java.lang.Integer").expect("Integer");
        assert_eq!(cache.classify(&int).expect("int"), JavaKind::Int);
        assert_eq!(cache.classify(&integer).expect("Integer"), JavaKind::Int);
    }

    #[test]
    fn fallback_arms_follow_array_class_object_order() {
        let (host, cache) = cache();
        let int = host.find_class("int").expect("int");
        let int_array = host.array_class(&int);
        let class = host.find_class("java.lang.Class").expect("Class");
        let list = host.find_class("java.util.ArrayList").expect("ArrayList");
        assert_eq!(cache.classify(&int_array).expect("array"), JavaKind::Array);
        assert_eq!(cache.classify(&class).expect("class"), JavaKind::Class);
        assert_eq!(cache.classify(&list).expect("list"), JavaKind::Object);
    }

    #[test]
    fn concurrent_resolution_yields_one_token() {
        let (_host, cache) = cache();
        let cache = Arc::new(cache);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || cache.resolve(TokenName::Long).expect("long"))
            })
            .collect();
        let tokens: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();
        assert!(tokens.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn missing_type_field_marks_kind_unavailable() {
        let host = InProcessHost::new();
        let object = host.find_class("java.lang.Object").expect("Object");
        // A registry whose Short wrapper lost its TYPE field.
        host.register_class(ClassBuilder::new("java.lang.Short").extends(&object).build());
        let cache = TypeCache::new(host.clone());
        let int = host.find_class("int").expect("int");
        assert_eq!(cache.classify(&int).expect("int wins first"), JavaKind::Int);
        let string = host.find_class("java.lang.String").expect("String");
        let err = cache.classify(&string).expect_err("short unavailable");
        assert!(matches!(
            err,
            BridgeError::TypeUnavailable {
                kind: JavaKind::Short,
                ..
            }
        ));
        assert!(!host.exception_check());
    }

    #[test]
    fn release_deletes_held_references() {
        let (host, cache) = cache();
        cache.preload().expect("preload");
        assert!(host.live_global_refs() > 0);
        cache.release();
        assert_eq!(host.live_global_refs(), 0);
    }
}
