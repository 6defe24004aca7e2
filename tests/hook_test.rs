use leaveflow::compiler::core::Compiler;
use leaveflow::compiler::loader::{DefinitionLoader, InMemorySource};
use leaveflow::dsl::builder::ProcessBuilder;
use leaveflow::error::EngineError;
use leaveflow::hooks::builtin::{LogHook, TableHook};
use leaveflow::runtime::definition::ProcessDefinition;
use leaveflow::runtime::engine::{Engine, EngineConfig};
use leaveflow::runtime::instance::Variables;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn vars(pairs: &[(&str, Value)]) -> Variables {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn engine() -> Engine {
    Engine::with_loader(EngineConfig::default(), DefinitionLoader::new(Arc::new(InMemorySource::new())))
}

/// start -> find_manager (hook) -> manager_approval (assigned to `manager`) -> end
fn manager_lookup_definition() -> ProcessDefinition {
    let model = ProcessBuilder::new("leave/manager_lookup")
        .start("start")
        .automatic_task("find_manager", "Find Manager")
            .hook("get_direct_manager", vec![json!("${employee}")])
            .output("manager")
            .build()
        .user_task_for("manager_approval", "Manager Approval", "manager")
        .end("end")
        .connect("start", "find_manager")
        .connect("find_manager", "manager_approval")
        .connect("manager_approval", "end")
        .build();
    Compiler::new().compile(model).expect("Compilation failed")
}

fn directory() -> TableHook {
    let table = BTreeMap::from([("ann@example.com".to_string(), json!("bob@example.com"))]);
    TableHook::new("get_direct_manager", table)
}

#[test]
fn test_hook_output_lands_in_variables() {
    let mut engine = engine();
    engine.register_hook(Arc::new(directory()));
    let definition = manager_lookup_definition();

    let (instance, ready) = engine
        .start(&definition, vars(&[("employee", json!("ann@example.com"))]))
        .unwrap();
    assert_eq!(instance.variables().get("manager"), Some(&json!("bob@example.com")));
    assert_eq!(ready[0].assigned_to.as_deref(), Some("bob@example.com"));
}

#[test]
fn test_missing_hook_is_reported() {
    let definition = manager_lookup_definition();
    let err = engine()
        .start(&definition, vars(&[("employee", json!("ann@example.com"))]))
        .unwrap_err();
    assert!(matches!(err, EngineError::HookNotRegistered(name) if name == "get_direct_manager"));
}

#[test]
fn test_hook_failure_stops_before_the_node_and_resume_continues() {
    let mut engine = engine();
    engine
        .hooks_mut()
        .register_fn("get_direct_manager", |_, _| Err(anyhow::anyhow!("directory offline")));
    let definition = manager_lookup_definition();

    // 1. Advance fails at the automatic task
    let mut instance = engine.instantiate(&definition, vars(&[("employee", json!("ann@example.com"))]));
    let err = engine.resume(&definition, &mut instance).unwrap_err();
    match &err {
        EngineError::HookExecutionError { hook, node, .. } => {
            assert_eq!(hook, "get_direct_manager");
            assert_eq!(node, "find_manager");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // 2. Nothing from the failing node was applied
    let active: Vec<_> = instance.active_tokens().map(|t| t.node.as_str()).collect();
    assert_eq!(active, vec!["find_manager"]);
    assert!(!instance.variables().contains_key("manager"));
    let failed = instance.clone();
    assert!(engine.resume(&definition, &mut instance).is_err());
    assert_eq!(instance, failed);

    // 3. Fix the hook and resume from the same state
    engine.register_hook(Arc::new(directory()));
    let ready = engine.resume(&definition, &mut instance).unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].assigned_to.as_deref(), Some("bob@example.com"));
}

#[test]
fn test_failed_assignment_discards_hook_output() {
    let model = ProcessBuilder::new("leave/partial")
        .start("start")
        .automatic_task("lookup", "Lookup")
            .hook("get_direct_manager", vec![json!("${employee}")])
            .output("manager")
            .assign("quota", "remaining_days - days")
            .build()
        .user_task("approve", "Approve")
        .end("end")
        .connect("start", "lookup")
        .connect("lookup", "approve")
        .connect("approve", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let mut engine = engine();
    engine.register_hook(Arc::new(directory()));

    // `remaining_days` is missing, so the assignment fails after the hook ran
    let mut instance = engine.instantiate(&definition, vars(&[("employee", json!("ann@example.com")), ("days", json!(2))]));
    let err = engine.resume(&definition, &mut instance).unwrap_err();
    assert!(matches!(err, EngineError::HookExecutionError { ref node, .. } if node == "lookup"));
    assert!(!instance.variables().contains_key("manager"));
    assert!(!instance.variables().contains_key("quota"));
}

#[test]
fn test_hook_failure_in_complete_keeps_task_completion() {
    let model = ProcessBuilder::new("leave/notify")
        .start("start")
        .user_task("approve", "Approve")
        .automatic_task("notify", "Notify")
            .hook("send_notice", vec![json!("${employee}")])
            .build()
        .end("end")
        .connect("start", "approve")
        .connect("approve", "notify")
        .connect("notify", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = engine();
    let counter = calls.clone();
    engine.hooks_mut().register_fn("send_notice", move |_, _| {
        // fails on the first call only
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("mail server unavailable")
        }
        Ok(Value::Null)
    });

    let (mut instance, ready) = engine.start(&definition, Variables::new()).unwrap();
    let err = engine
        .complete_task(&definition, &mut instance, ready[0].id, vars(&[("approved", json!(true))]))
        .unwrap_err();
    assert!(matches!(err, EngineError::HookExecutionError { .. }));
    assert_eq!(instance.variables().get("approved"), Some(&json!(true)));
    assert!(engine.list_ready_tasks(&definition, &instance).is_empty());

    engine.resume(&definition, &mut instance).unwrap();
    assert!(instance.is_completed());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_condition_hook_routes_gateway() {
    let model = ProcessBuilder::new("leave/vip")
        .start("start")
        .exclusive_gateway("route")
        .user_task("fast", "Fast Track")
        .user_task("normal", "Normal")
        .end("end")
        .connect("start", "route")
        .connect_if_hook("route", "fast", "is_vip", vec![json!("${employee}")])
        .connect_default("route", "normal")
        .connect("fast", "end")
        .connect("normal", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let mut engine = engine();
    engine
        .hooks_mut()
        .register_fn("is_vip", |args, _| Ok(json!(args.first() == Some(&json!("ceo@example.com")))));

    let (_, ready) = engine
        .start(&definition, vars(&[("employee", json!("ceo@example.com"))]))
        .unwrap();
    assert_eq!(ready[0].name, "Fast Track");

    let (_, ready) = engine
        .start(&definition, vars(&[("employee", json!("ann@example.com"))]))
        .unwrap();
    assert_eq!(ready[0].name, "Normal");
}

#[test]
fn test_hook_sees_resolved_args_and_variables() {
    let model = ProcessBuilder::new("leave/args")
        .start("start")
        .automatic_task("log", "Log")
            .hook("log", vec![json!("leave requested")])
            .build()
        .automatic_task("echo", "Echo")
            .hook("echo", vec![json!({"who": "${employee}", "days": "${days}"})])
            .output("echoed")
            .build()
        .end("end")
        .connect("start", "log")
        .connect("log", "echo")
        .connect("echo", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let mut engine = engine();
    engine.register_hook(Arc::new(LogHook));
    engine.hooks_mut().register_fn("echo", |args, variables| {
        assert!(variables.contains_key("employee"));
        Ok(args[0].clone())
    });

    let (instance, _) = engine
        .start(&definition, vars(&[("employee", json!("ann")), ("days", json!(3))]))
        .unwrap();
    assert!(instance.is_completed());
    assert_eq!(instance.variables().get("echoed"), Some(&json!({"who": "ann", "days": 3})));
}
