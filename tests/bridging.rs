use std::sync::Arc;
use std::thread;

use solvra_embed::host::{ClassBuilder, Payload, Throw};
use solvra_embed::{
    Bridge, BridgeConfig, BridgeError, ContextHandle, GlobalValue, HostEnv, HostValue,
    InProcessHost, TokenName, TypeCache,
};

fn bridge_with(config: BridgeConfig) -> (Arc<InProcessHost>, Bridge, ContextHandle) {
    let host = InProcessHost::new();
    let bridge = Bridge::new(host.clone(), config).expect("bridge");
    let ctx = bridge
        .contexts()
        .create_context(Some(host.system_class_loader()))
        .expect("context");
    (host, bridge, ctx)
}

fn bridge() -> (Arc<InProcessHost>, Bridge, ContextHandle) {
    bridge_with(BridgeConfig::default())
}

fn register_calc(host: &InProcessHost) {
    let object = host.find_class("java.lang.Object").expect("Object");
    host.register_class(
        ClassBuilder::new("demo.Calc")
            .extends(&object)
            .static_method("sum3", &["int", "int", "int"], "int", |_, _, args| {
                let mut total = 0i32;
                for arg in args {
                    match arg {
                        HostValue::Int(v) => total += v,
                        _ => return Err(Throw::bare("java.lang.IllegalArgumentException")),
                    }
                }
                Ok(HostValue::Int(total))
            })
            .build(),
    );
}

#[test]
fn type_tokens_resolve_to_one_instance() {
    let host = InProcessHost::new();
    let cache = Arc::new(TypeCache::new(host));
    let tokens: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || cache.resolve(TokenName::Int).expect("int token"))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|worker| worker.join().expect("join"))
        .collect();
    for token in &tokens[1..] {
        assert!(Arc::ptr_eq(&tokens[0], token));
    }
}

#[test]
fn wrappers_round_trip_with_their_kind() {
    let (host, bridge, ctx) = bridge();
    let manager = bridge.contexts();
    for (name, value, class) in [
        ("i", HostValue::Int(7), "java.lang.Integer"),
        ("l", HostValue::Long(7), "java.lang.Long"),
        ("d", HostValue::Double(1.5), "java.lang.Double"),
        ("b", HostValue::Boolean(true), "java.lang.Boolean"),
    ] {
        manager
            .set_global(ctx, name, GlobalValue::Object(host.new_boxed(value)), None)
            .expect("set");
        let back = manager
            .eval_for_value(ctx, name, None)
            .expect("eval")
            .expect("non-null");
        assert_eq!(back.class().name(), class, "round trip of {name}");
    }
    let wide = manager
        .eval_for_value(ctx, "3000000000", None)
        .expect("eval")
        .expect("non-null");
    assert_eq!(wide.class().name(), "java.lang.Long");
}

#[test]
fn text_is_accepted_for_string_parameters() {
    let (_host, bridge, ctx) = bridge();
    let manager = bridge.contexts();
    manager.eval(ctx, "from java.lang import Integer").expect("import");
    let parsed = manager
        .eval_for_value(ctx, "Integer.parseInt(' 12 ')", None)
        .expect("parse")
        .expect("non-null");
    assert!(matches!(parsed.boxed(), Some(HostValue::Int(12))));
}

#[test]
fn coercion_failure_reports_offending_position() {
    let (host, bridge, ctx) = bridge();
    register_calc(&host);
    let manager = bridge.contexts();
    manager.eval(ctx, "import demo.Calc").expect("import class");
    let ok = manager
        .eval_for_value(ctx, "Calc.sum3(1, 2, 3)", None)
        .expect("sum")
        .expect("non-null");
    assert!(matches!(ok.boxed(), Some(HostValue::Int(6))));
    match manager.eval(ctx, "Calc.sum3(1, 'two', 3)") {
        Err(BridgeError::TypeMismatch { position, message }) => {
            assert_eq!(position, 2);
            assert_eq!(message, "Expected int parameter at 2.");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn host_exceptions_surface_as_script_errors() {
    let (host, bridge, ctx) = bridge_with(BridgeConfig::default().with_mapped_exceptions(false));
    let manager = bridge.contexts();
    manager.eval(ctx, "from java.lang import Integer").expect("import");
    match manager.eval(ctx, "Integer.parseInt('x')") {
        Err(BridgeError::Script { kind, message, cause, .. }) => {
            assert_eq!(kind, "RuntimeError");
            assert_eq!(
                message,
                "RuntimeError: java.lang.NumberFormatException: For input string: \"x\""
            );
            let cause = cause.expect("host cause");
            assert_eq!(cause.class().name(), "java.lang.NumberFormatException");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!host.exception_check());
    manager.eval(ctx, "n = Integer.parseInt('5')").expect("context still usable");
}

#[cfg(feature = "mapped-exceptions")]
#[test]
fn mapped_exceptions_use_bridge_module_types() {
    let (_host, bridge, ctx) = bridge();
    let manager = bridge.contexts();
    manager.eval(ctx, "from java.lang import Integer").expect("import");
    match manager.eval(ctx, "Integer.parseInt('x')") {
        Err(BridgeError::Script { kind, mapped_class, .. }) => {
            assert_eq!(kind, "embed.NumberFormatException");
            assert_eq!(mapped_class.as_deref(), Some("java.lang.NumberFormatException"));
        }
        other => panic!("unexpected {other:?}"),
    }
    manager.eval(ctx, "import embed").expect("bridge module");
    let name = manager
        .eval_for_value(ctx, "embed.NumberFormatException.__name__", None)
        .expect("registered")
        .expect("non-null");
    assert_eq!(name.as_str(), Some("NumberFormatException"));
}

#[test]
fn script_errors_keep_their_type_name() {
    let (_host, bridge, ctx) = bridge();
    match bridge.contexts().eval(ctx, "raise ValueError('nope')") {
        Err(BridgeError::Script { kind, message, mapped_class, .. }) => {
            assert_eq!(kind, "ValueError");
            assert_eq!(message, "ValueError: nope");
            assert!(mapped_class.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn imports_resolve_host_packages_and_classes() {
    let (_host, bridge, ctx) = bridge();
    let manager = bridge.contexts();
    manager.eval(ctx, "import java.util.ArrayList").expect("class import");
    manager.eval(ctx, "items = ArrayList()").expect("construct");
    manager.eval(ctx, "items.add('a')").expect("add");
    manager.eval(ctx, "items.add('b')").expect("add");
    let text = manager
        .eval_for_value(ctx, "str(items)", None)
        .expect("str")
        .expect("non-null");
    assert_eq!(text.as_str(), Some("[a, b]"));
    let first = manager
        .eval_for_value(ctx, "items.get(0)", None)
        .expect("get")
        .expect("non-null");
    assert_eq!(first.as_str(), Some("a"));

    manager.eval(ctx, "from java.lang import Math").expect("from import");
    let max = manager
        .eval_for_value(ctx, "Math.max(2.5, 1.0)", None)
        .expect("max")
        .expect("non-null");
    assert!(matches!(max.boxed(), Some(HostValue::Double(v)) if *v == 2.5));
}

#[test]
fn unresolved_imports_raise_import_errors() {
    let (host, bridge, ctx) = bridge();
    host.list_in_package("demo.ghost", "Phantom");
    let manager = bridge.contexts();
    match manager.eval(ctx, "import nowhere.at.all") {
        Err(BridgeError::ImportUnresolved { path, .. }) => assert_eq!(path, "nowhere.at.all"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        manager.eval(ctx, "from java.lang import Nonexistent"),
        Err(BridgeError::ImportUnresolved { .. })
    ));
    assert!(matches!(
        manager.eval(ctx, "import demo.ghost"),
        Err(BridgeError::ImportUnresolved { .. })
    ));
    assert!(!host.exception_check());
}

#[test]
fn durable_references_are_released() {
    let (host, bridge, ctx) = bridge();
    let manager = bridge.contexts();
    manager.eval(ctx, "import java.util.ArrayList").expect("import");
    manager.eval(ctx, "items = ArrayList()").expect("construct");
    let handle = manager.eval_for_handle(ctx, "items").expect("handle");
    manager.release_handle(ctx, handle).expect("release");
    manager.close(ctx).expect("close");
    bridge.shutdown();
    assert_eq!(host.live_global_refs(), 0);
    assert_eq!(host.global_refs_created(), host.global_refs_deleted());
}

#[test]
fn host_lists_support_len_indexing_and_membership() {
    let (_host, bridge, ctx) = bridge();
    let manager = bridge.contexts();
    manager.eval(ctx, "from java.util import ArrayList").expect("import");
    manager.eval(ctx, "items = ArrayList()").expect("construct");
    manager.eval(ctx, "items.add('a')").expect("add");
    manager.eval(ctx, "items.add('b')").expect("add");

    let size = manager.eval_for_value(ctx, "len(items)", None).expect("len").expect("non-null");
    assert!(matches!(size.boxed(), Some(HostValue::Int(2))));
    let last = manager.eval_for_value(ctx, "items[-1]", None).expect("index").expect("non-null");
    assert_eq!(last.as_str(), Some("b"));

    manager.eval(ctx, "items[0] = 'z'").expect("assign");
    let text = manager.eval_for_value(ctx, "str(items)", None).expect("str").expect("non-null");
    assert_eq!(text.as_str(), Some("[z, b]"));
    let found = manager
        .eval_for_value(ctx, "'b' in items and 'a' not in items", None)
        .expect("membership")
        .expect("non-null");
    assert!(matches!(found.boxed(), Some(HostValue::Boolean(true))));

    match manager.eval(ctx, "items[2]") {
        Err(BridgeError::Script { kind, .. }) => assert_eq!(kind, "IndexError"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn host_maps_support_lookup_assignment_and_missing_keys() {
    let (_host, bridge, ctx) = bridge();
    let manager = bridge.contexts();
    manager.eval(ctx, "from java.util import HashMap").expect("import");
    manager.eval(ctx, "table = HashMap()").expect("construct");
    manager.eval(ctx, "table['one'] = 'uno'").expect("put");
    manager.eval(ctx, "table['two'] = 'dos'").expect("put");
    manager.eval(ctx, "table['one'] = 'eins'").expect("replace");

    let size = manager.eval_for_value(ctx, "len(table)", None).expect("len").expect("non-null");
    assert!(matches!(size.boxed(), Some(HostValue::Int(2))));
    let one = manager.eval_for_value(ctx, "table['one']", None).expect("get").expect("non-null");
    assert_eq!(one.as_str(), Some("eins"));
    let has = manager
        .eval_for_value(ctx, "'two' in table", None)
        .expect("membership")
        .expect("non-null");
    assert!(matches!(has.boxed(), Some(HostValue::Boolean(true))));

    match manager.eval(ctx, "table['three']") {
        Err(BridgeError::Script { kind, message, .. }) => {
            assert_eq!(kind, "KeyError");
            assert_eq!(message, "KeyError: three");
        }
        other => panic!("unexpected {other:?}"),
    }
    manager.eval(ctx, "table['none'] = None").expect("null value");
    let stored = manager.eval_for_value(ctx, "table['none']", None).expect("present null");
    assert!(stored.is_none());
}

#[test]
fn plain_host_objects_are_not_containers() {
    let (_host, bridge, ctx) = bridge();
    let manager = bridge.contexts();
    manager.eval(ctx, "from java.lang import Object").expect("import");
    manager.eval(ctx, "thing = Object()").expect("construct");
    for source in ["len(thing)", "thing[0]", "1 in thing", "thing + 1"] {
        match manager.eval(ctx, source) {
            Err(BridgeError::Script { kind, .. }) => assert_eq!(kind, "TypeError", "{source}"),
            other => panic!("{source}: unexpected {other:?}"),
        }
    }
}

#[test]
fn host_numbers_join_script_arithmetic() {
    let (host, bridge, ctx) = bridge();
    let number = host.find_class("java.lang.Number").expect("Number");
    host.register_class(
        ClassBuilder::new("demo.Ratio")
            .extends(&number)
            .constructor(&["double"], |_, _, args| {
                Ok(Payload::Boxed(args.first().cloned().unwrap_or(HostValue::Double(0.0))))
            })
            .build(),
    );
    let manager = bridge.contexts();
    manager.eval(ctx, "import demo.Ratio").expect("import");
    manager.eval(ctx, "half = Ratio(0.5)").expect("construct");
    for (source, expected) in [("half + 1", 1.5), ("2 * half", 1.0), ("-half", -0.5), ("float(half)", 0.5)] {
        let value = manager
            .eval_for_value(ctx, source, None)
            .expect(source)
            .expect("non-null");
        assert!(
            matches!(value.boxed(), Some(HostValue::Double(v)) if *v == expected),
            "{source}"
        );
    }
    let smaller = manager
        .eval_for_value(ctx, "half < 1", None)
        .expect("compare")
        .expect("non-null");
    assert!(matches!(smaller.boxed(), Some(HostValue::Boolean(true))));
}

#[test]
fn narrow_host_primitives_widen_to_script_numbers_and_text() {
    let (host, bridge, ctx) = bridge();
    let manager = bridge.contexts();
    for (name, value, class) in [
        ("s", HostValue::Short(-3), "java.lang.Integer"),
        ("y", HostValue::Byte(12), "java.lang.Integer"),
        ("c", HostValue::Char('q' as u16), "java.lang.String"),
        ("f", HostValue::Float(0.25), "java.lang.Double"),
    ] {
        manager
            .set_global(ctx, name, GlobalValue::Object(host.new_boxed(value)), None)
            .expect("set");
        let back = manager
            .eval_for_value(ctx, name, None)
            .expect("eval")
            .expect("non-null");
        assert_eq!(back.class().name(), class, "widening of {name}");
    }
    let sum = manager
        .eval_for_value(ctx, "s + y", None)
        .expect("sum")
        .expect("non-null");
    assert!(matches!(sum.boxed(), Some(HostValue::Int(9))));
    let text = manager.eval_for_value(ctx, "c", None).expect("char").expect("non-null");
    assert_eq!(text.as_str(), Some("q"));
    let float = manager.eval_for_value(ctx, "f", None).expect("float").expect("non-null");
    assert!(matches!(float.boxed(), Some(HostValue::Double(v)) if *v == 0.25));
}
