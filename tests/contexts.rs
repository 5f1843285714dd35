use std::io::Write;
use std::sync::Arc;
use std::thread;

use solvra_embed::{
    Bridge, BridgeConfig, BridgeError, Callable, CompileStatus, ContextHandle, GlobalValue,
    HostEnv, HostValue, InProcessHost, JavaKind,
};
use solvra_embed::script::parser::{MAX_EXPRESSION_DEPTH, MAX_TREE_HEIGHT};

fn bridge() -> (Arc<InProcessHost>, Bridge) {
    let host = InProcessHost::new();
    let bridge = Bridge::new(host.clone(), BridgeConfig::default()).expect("bridge");
    (host, bridge)
}

fn open(host: &InProcessHost, bridge: &Bridge) -> ContextHandle {
    bridge
        .contexts()
        .create_context(Some(host.system_class_loader()))
        .expect("context")
}

fn int_result(value: Option<solvra_embed::HostRef>) -> Option<i32> {
    match value?.boxed() {
        Some(HostValue::Int(v)) => Some(*v),
        _ => None,
    }
}

#[test]
fn eval_updates_state_until_close() {
    let (host, bridge) = bridge();
    let manager = bridge.contexts();
    let ctx = open(&host, &bridge);
    manager.eval(ctx, "x = 42").expect("assign");
    manager.eval(ctx, "x = x + 1").expect("increment");
    let value = manager.eval_for_value(ctx, "x", None).expect("eval");
    assert_eq!(int_result(value), Some(43));

    manager.close(ctx).expect("close");
    assert!(matches!(
        manager.eval_for_value(ctx, "x", None),
        Err(BridgeError::ThreadStateUnavailable(_))
    ));
}

#[test]
fn globals_set_from_the_host_feed_expressions() {
    let (host, bridge) = bridge();
    let manager = bridge.contexts();
    let ctx = open(&host, &bridge);
    manager.set_global(ctx, "x", GlobalValue::Int(42), None).expect("set");
    let value = manager
        .eval_for_value(ctx, "x+1", None)
        .expect("eval")
        .expect("non-null");
    assert_eq!(value.class().name(), "java.lang.Integer");
    assert!(matches!(value.boxed(), Some(HostValue::Int(43))));
}

#[test]
fn deepest_accepted_input_evaluates_on_a_small_stack() {
    let worker = thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(|| {
            let (host, bridge) = bridge();
            let manager = bridge.contexts();
            let ctx = open(&host, &bridge);
            let depth = MAX_EXPRESSION_DEPTH - 1;

            let parens = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
            let one = manager.eval_for_value(ctx, &parens, None).expect("parens");
            assert_eq!(int_result(one), Some(1));

            manager.eval(ctx, "f = lambda v: v").expect("define");
            let calls = format!("{}1{}", "f(".repeat(depth), ")".repeat(depth));
            let one = manager.eval_for_value(ctx, &calls, None).expect("calls");
            assert_eq!(int_result(one), Some(1));

            let chain = format!("1{}", " + 1".repeat(MAX_TREE_HEIGHT - 1));
            let total = manager.eval_for_value(ctx, &chain, None).expect("chain");
            assert_eq!(int_result(total), Some(MAX_TREE_HEIGHT as i32));

            let deeper = format!("{}1{}", "(".repeat(depth + 1), ")".repeat(depth + 1));
            assert!(matches!(
                manager.eval_for_value(ctx, &deeper, None),
                Err(BridgeError::OutOfMemory(_))
            ));
            let longer = format!("{chain} + 1");
            assert!(matches!(
                manager.eval_for_value(ctx, &longer, None),
                Err(BridgeError::OutOfMemory(_))
            ));
            manager.eval(ctx, "still = 1").expect("context survives");
        })
        .expect("spawn");
    worker.join().expect("no stack overflow");
}

#[test]
fn oversized_string_repetition_is_refused() {
    let (host, bridge) = bridge();
    let manager = bridge.contexts();
    let ctx = open(&host, &bridge);
    assert!(matches!(
        manager.eval(ctx, "s = 'ab' * 9223372036854775807"),
        Err(BridgeError::OutOfMemory(_))
    ));
    let small = manager
        .eval_for_value(ctx, "'ab' * 2", None)
        .expect("small")
        .expect("non-null");
    assert_eq!(small.as_str(), Some("abab"));
}

#[test]
fn contexts_have_separate_namespaces() {
    let (host, bridge) = bridge();
    let manager = bridge.contexts();
    let a = open(&host, &bridge);
    let b = open(&host, &bridge);
    manager.eval(a, "shared = 1").expect("a");
    let err = manager.eval(b, "shared").expect_err("undefined in b");
    match err {
        BridgeError::Script { kind, message, .. } => {
            assert_eq!(kind, "NameError");
            assert!(message.contains("shared"));
        }
        other => panic!("unexpected {other:?}"),
    }
    manager.close(a).expect("close a");
    manager.eval(b, "still = 2").expect("b survives");
}

#[test]
fn threads_drive_their_own_contexts() {
    let (host, bridge) = bridge();
    let bridge = Arc::new(bridge);
    let workers: Vec<_> = (0..4)
        .map(|n| {
            let bridge = bridge.clone();
            let loader = host.system_class_loader();
            thread::spawn(move || {
                let manager = bridge.contexts();
                let ctx = manager.create_context(Some(loader)).expect("context");
                manager.eval(ctx, &format!("total = {n}")).expect("seed");
                for _ in 0..25 {
                    manager.eval(ctx, "total = total + 1").expect("step");
                }
                let total = manager.eval_for_value(ctx, "total", None).expect("read");
                manager.close(ctx).expect("close");
                total.and_then(|r| r.boxed().and_then(HostValue::as_i64))
            })
        })
        .collect();
    let mut totals: Vec<i64> = workers
        .into_iter()
        .map(|w| w.join().expect("join").expect("int"))
        .collect();
    totals.sort();
    assert_eq!(totals, vec![25, 26, 27, 28]);
    assert_eq!(bridge.contexts().live_contexts(), 0);
}

#[test]
fn run_reports_missing_files_and_executes_scripts() {
    let (host, bridge) = bridge();
    let manager = bridge.contexts();
    let ctx = open(&host, &bridge);
    let err = manager
        .run(ctx, std::path::Path::new("/nonexistent/script.svs"))
        .expect_err("missing");
    assert!(err.to_string().starts_with("Couldn't open script file."));

    let mut file = tempfile::NamedTempFile::new().expect("temp");
    writeln!(file, "from java.lang import Math").expect("write");
    writeln!(file, "best = Math.max(3, 9)").expect("write");
    manager.run(ctx, file.path()).expect("run");
    let best = manager.eval_for_value(ctx, "best", None).expect("best");
    assert_eq!(int_result(best), Some(9));
}

#[test]
fn compile_check_reports_incomplete_input() {
    let (host, bridge) = bridge();
    let manager = bridge.contexts();
    let ctx = open(&host, &bridge);
    assert_eq!(
        manager.compile_check(ctx, "total = (1 +").expect("check"),
        CompileStatus::Incomplete
    );
    assert_eq!(
        manager.compile_check(ctx, "total = (1 +\n 2)").expect("check"),
        CompileStatus::Complete
    );
    let err = manager.eval(ctx, "total = (1 +").expect_err("syntax");
    assert!(matches!(err, BridgeError::ScriptSyntax { .. }));
}

#[test]
fn invoke_callable_passes_host_arguments() {
    let (host, bridge) = bridge();
    let manager = bridge.contexts();
    let ctx = open(&host, &bridge);
    manager
        .eval(ctx, "describe = lambda v, n: str(v) + ':' + str(n)")
        .expect("define");
    let list = host.new_string("abc");
    let result = manager
        .invoke_callable(
            ctx,
            Callable::Named("describe"),
            &[Some(list), None],
            &[JavaKind::String.id(), JavaKind::NULL_ID],
        )
        .expect("invoke")
        .expect("non-null");
    assert_eq!(result.as_str(), Some("abc:None"));

    let handle = manager.eval_for_handle(ctx, "lambda: 7").expect("lambda handle");
    let seven = manager
        .invoke_callable(ctx, Callable::Handle(handle), &[], &[])
        .expect("invoke handle");
    assert_eq!(int_result(seven), Some(7));
    manager.release_handle(ctx, handle).expect("release");
    assert!(manager.invoke_callable(ctx, Callable::Handle(handle), &[], &[]).is_err());

    assert!(matches!(
        manager.invoke_callable(ctx, Callable::Named("describe"), &[None], &[JavaKind::Double.id()]),
        Err(BridgeError::UnhandledTypeId(6))
    ));
}

#[test]
fn modules_nest_and_receive_globals() {
    let (host, bridge) = bridge();
    let manager = bridge.contexts();
    let ctx = open(&host, &bridge);
    let app = manager.create_module(ctx, "app", None).expect("app");
    let settings = manager.create_module(ctx, "settings", Some(app)).expect("settings");
    manager
        .set_global(ctx, "retries", GlobalValue::Long(5), Some(settings))
        .expect("long");
    manager
        .set_global(ctx, "label", GlobalValue::Str(None), Some(settings))
        .expect("null string");
    let boxed = host.new_boxed(HostValue::Short(3));
    manager
        .set_global(ctx, "small", GlobalValue::Object(boxed), None)
        .expect("object");

    let retries = manager
        .eval_for_value(ctx, "app.settings.retries", None)
        .expect("retries")
        .expect("non-null");
    assert_eq!(retries.class().name(), "java.lang.Long");
    assert!(manager.eval_for_value(ctx, "label", Some(settings)).expect("label").is_none());
    let small = manager
        .eval_for_value(ctx, "small", None)
        .expect("small")
        .expect("non-null");
    assert_eq!(small.class().name(), "java.lang.Integer");
}

#[test]
fn class_loader_can_be_replaced() {
    let (host, bridge) = bridge();
    let manager = bridge.contexts();
    let ctx = manager
        .create_context(Some(host.restricted_class_loader(&["java.util"])))
        .expect("context");
    manager.eval(ctx, "import embed").expect("bridge module");
    assert!(manager.eval(ctx, "m = embed.findClass('java.lang.Math')").is_err());
    manager
        .set_class_loader(ctx, Some(host.system_class_loader()))
        .expect("replace");
    manager.eval(ctx, "m = embed.findClass('java.lang.Math')").expect("now visible");
    assert!(matches!(
        manager.set_class_loader(ctx, None),
        Err(BridgeError::InvalidClassLoader)
    ));
    manager.close(ctx).expect("close");
    drop(bridge);
    assert_eq!(host.live_global_refs(), 0);
}

#[test]
fn process_lifecycle_is_idempotent() {
    let host = InProcessHost::new();
    let first = solvra_embed::initialize_process(host.clone(), BridgeConfig::default()).expect("init");
    let second = solvra_embed::initialize_process(host.clone(), BridgeConfig::default()).expect("again");
    assert!(Arc::ptr_eq(&first, &second));
    let ctx = first
        .contexts()
        .create_context(Some(host.system_class_loader()))
        .expect("context");
    solvra_embed::shutdown_process();
    solvra_embed::shutdown_process();
    assert!(first.is_shut_down());
    assert!(first.contexts().eval(ctx, "1").is_err());
}
