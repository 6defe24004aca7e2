use leaveflow::compiler::core::Compiler;
use leaveflow::compiler::loader::{DefinitionLoader, InMemorySource};
use leaveflow::dsl::builder::{ProcessBuilder, user_task_node};
use leaveflow::error::EngineError;
use leaveflow::runtime::definition::ProcessDefinition;
use leaveflow::runtime::engine::{Engine, EngineConfig};
use leaveflow::runtime::instance::{HistoryEvent, ProcessInstance, Variables};
use leaveflow::runtime::snapshot;
use serde_json::json;
use std::sync::Arc;

fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn engine_with(config: EngineConfig) -> Engine {
    Engine::with_loader(config, DefinitionLoader::new(Arc::new(InMemorySource::new())))
}

fn engine() -> Engine {
    engine_with(EngineConfig::default())
}

fn escalation_definition() -> ProcessDefinition {
    let model = ProcessBuilder::new("leave/escalation")
        .start("start")
        .exclusive_gateway("route")
        .user_task("escalated", "EscalatedApproval")
        .user_task("basic", "BasicApproval")
        .end("end")
        .connect("start", "route")
        .connect_if("route", "escalated", "${amount} > 50")
        .connect_default("route", "basic")
        .connect("escalated", "end")
        .connect("basic", "end")
        .build();
    Compiler::new().compile(model).expect("Compilation failed")
}

fn task_names(engine: &Engine, definition: &ProcessDefinition, instance: &ProcessInstance) -> Vec<String> {
    engine
        .list_ready_tasks(definition, instance)
        .into_iter()
        .map(|t| t.name)
        .collect()
}

#[test]
fn test_exclusive_gateway_routes_on_amount() {
    let engine = engine();
    let definition = escalation_definition();

    let (_, high) = engine.start(&definition, vars(&[("amount", json!(100))])).unwrap();
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].name, "EscalatedApproval");

    let (_, low) = engine.start(&definition, vars(&[("amount", json!(10))])).unwrap();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].name, "BasicApproval");
}

#[test]
fn test_exclusive_gateway_is_deterministic() {
    let engine = engine();
    let definition = escalation_definition();

    for _ in 0..20 {
        let (_, ready) = engine.start(&definition, vars(&[("amount", json!(51))])).unwrap();
        assert_eq!(ready[0].name, "EscalatedApproval");
    }
}

#[test]
fn test_unevaluable_condition_stops_the_step() {
    let engine = engine();
    let definition = escalation_definition();

    // a string amount is a type error, not a reason to take the default
    let err = engine.start(&definition, vars(&[("amount", json!("100"))])).unwrap_err();
    match err {
        EngineError::HookExecutionError { hook, node, .. } => {
            assert_eq!(hook, "condition route->escalated");
            assert_eq!(node, "route");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // missing variable: the token stays in front of the gateway
    let mut instance = engine.instantiate(&definition, Variables::new());
    let err = engine.resume(&definition, &mut instance).unwrap_err();
    assert!(matches!(err, EngineError::HookExecutionError { .. }));
    let waiting: Vec<&str> = instance.active_tokens().map(|t| t.node.as_str()).collect();
    assert_eq!(waiting, vec!["route"]);
    assert!(task_names(&engine, &definition, &instance).is_empty());

    instance = engine.instantiate(&definition, vars(&[("amount", json!(75))]));
    let ready = engine.resume(&definition, &mut instance).unwrap();
    assert_eq!(ready[0].name, "EscalatedApproval");
}

#[test]
fn test_first_matching_condition_wins() {
    let model = ProcessBuilder::new("leave/tiers")
        .start("start")
        .exclusive_gateway("route")
        .user_task("director", "Director")
        .user_task("manager", "Manager")
        .user_task("auto", "Auto")
        .end("end")
        .connect("start", "route")
        .connect_if("route", "director", "days > 10")
        .connect_if("route", "manager", "days > 2")
        .connect_default("route", "auto")
        .connect("director", "end")
        .connect("manager", "end")
        .connect("auto", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let engine = engine();

    let route = |days: i64| {
        let (_, ready) = engine.start(&definition, vars(&[("days", json!(days))])).unwrap();
        ready[0].name.clone()
    };
    assert_eq!(route(15), "Director");
    assert_eq!(route(5), "Manager");
    assert_eq!(route(1), "Auto");
}

#[test]
fn test_no_matching_flow() {
    let model = ProcessBuilder::new("leave/strict")
        .start("start")
        .exclusive_gateway("route")
        .user_task("sick", "Sick Leave")
        .user_task("annual", "Annual Leave")
        .end("end")
        .connect("start", "route")
        .connect_if("route", "sick", "kind == \"sick\"")
        .connect_if("route", "annual", "kind == \"annual\"")
        .connect("sick", "end")
        .connect("annual", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();

    let err = engine()
        .start(&definition, vars(&[("kind", json!("unpaid"))]))
        .unwrap_err();
    assert!(matches!(err, EngineError::NoMatchingFlow { node } if node == "route"));
}

#[test]
fn test_user_task_outgoing_conditions_see_completion_data() {
    let model = ProcessBuilder::new("leave/decision")
        .start("start")
        .user_task("approve", "Approve")
        .user_task("rework", "Rework")
        .end("end")
        .connect("start", "approve")
        .connect_if("approve", "rework", "approved == false")
        .connect_default("approve", "end")
        .connect("rework", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let engine = engine();

    let (mut instance, ready) = engine.start(&definition, Variables::new()).unwrap();
    let completion = engine
        .complete_task(&definition, &mut instance, ready[0].id, vars(&[("approved", json!(false))]))
        .unwrap();
    assert_eq!(completion.ready_tasks[0].name, "Rework");
}

fn three_way_review() -> ProcessDefinition {
    let model = ProcessBuilder::new("leave/three_way")
        .start("start")
        .parallel_gateway("fork")
        .user_task("hr", "HR")
        .user_task("manager", "Manager")
        .user_task("finance", "Finance")
        .parallel_gateway("join")
        .user_task("archive", "Archive")
        .end("end")
        .connect("start", "fork")
        .connect("fork", "hr")
        .connect("fork", "manager")
        .connect("fork", "finance")
        .connect("hr", "join")
        .connect("manager", "join")
        .connect("finance", "join")
        .connect("join", "archive")
        .connect("archive", "end")
        .build();
    Compiler::new().compile(model).unwrap()
}

#[test]
fn test_parallel_join_waits_for_every_branch_in_any_order() {
    let engine = engine();
    let definition = three_way_review();
    let orders = [
        ["HR", "Manager", "Finance"],
        ["HR", "Finance", "Manager"],
        ["Manager", "HR", "Finance"],
        ["Manager", "Finance", "HR"],
        ["Finance", "HR", "Manager"],
        ["Finance", "Manager", "HR"],
    ];

    for order in orders {
        let (mut instance, ready) = engine.start(&definition, Variables::new()).unwrap();
        assert_eq!(ready.len(), 3);

        for (step, name) in order.iter().enumerate() {
            let task = engine
                .list_ready_tasks(&definition, &instance)
                .into_iter()
                .find(|t| t.name == *name)
                .expect("task should be ready");
            let completion = engine
                .complete_task(&definition, &mut instance, task.id, Variables::new())
                .unwrap();

            let archive = completion.ready_tasks.iter().filter(|t| t.name == "Archive").count();
            if step < 2 {
                assert_eq!(archive, 0, "join fired early for order {:?}", order);
                assert_eq!(completion.ready_tasks.len(), 2 - step);
            } else {
                assert_eq!(completion.ready_tasks.len(), 1);
                assert_eq!(archive, 1);
            }
        }
        assert!(instance.joins().is_empty());
    }
}

#[test]
fn test_parallel_block_sugar() {
    let model = ProcessBuilder::new("leave/block")
        .start("start")
        .parallel(
            "review",
            vec![vec![user_task_node("legal", "Legal")], vec![user_task_node("payroll", "Payroll")]],
        )
        .end("end")
        .connect("start", "review")
        .connect("review", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let engine = engine();

    let (mut instance, ready) = engine.start(&definition, Variables::new()).unwrap();
    assert_eq!(task_names(&engine, &definition, &instance), vec!["Legal", "Payroll"]);

    engine.complete_task(&definition, &mut instance, ready[1].id, Variables::new()).unwrap();
    assert!(!instance.is_completed());
    let completion = engine
        .complete_task(&definition, &mut instance, ready[0].id, Variables::new())
        .unwrap();
    assert!(completion.completed);

    let joined = instance
        .history()
        .iter()
        .filter(|e| matches!(e, HistoryEvent::TokensJoined { node, .. } if node == "review_join"))
        .count();
    assert_eq!(joined, 1);
}

#[test]
fn test_gateway_joins_then_forks() {
    // start -> fork -> (a | b) -> sync -> (c | d) -> join -> end
    let model = ProcessBuilder::new("leave/relay")
        .start("start")
        .parallel_gateway("fork")
        .user_task("a", "A")
        .user_task("b", "B")
        .parallel_gateway("sync")
        .user_task("c", "C")
        .user_task("d", "D")
        .parallel_gateway("join")
        .end("end")
        .connect("start", "fork")
        .connect("fork", "a")
        .connect("fork", "b")
        .connect("a", "sync")
        .connect("b", "sync")
        .connect("sync", "c")
        .connect("sync", "d")
        .connect("c", "join")
        .connect("d", "join")
        .connect("join", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let engine = engine();

    let (mut instance, ready) = engine.start(&definition, Variables::new()).unwrap();
    engine.complete_task(&definition, &mut instance, ready[0].id, Variables::new()).unwrap();
    assert_eq!(task_names(&engine, &definition, &instance), vec!["B"]);

    let completion = engine
        .complete_task(&definition, &mut instance, ready[1].id, Variables::new())
        .unwrap();
    let names: Vec<_> = completion.ready_tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["C", "D"]);

    for task in completion.ready_tasks {
        engine.complete_task(&definition, &mut instance, task.id, Variables::new()).unwrap();
    }
    assert!(instance.is_completed());
}

#[test]
fn test_exclusive_merge_gateway() {
    let model = ProcessBuilder::new("leave/merge")
        .start("start")
        .exclusive_gateway("route")
        .user_task("long", "Long")
        .user_task("short", "Short")
        .exclusive_gateway("merge")
        .user_task("notify", "Notify")
        .end("end")
        .connect("start", "route")
        .connect_if("route", "long", "days > 5")
        .connect_default("route", "short")
        .connect("long", "merge")
        .connect("short", "merge")
        .connect("merge", "notify")
        .connect("notify", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let engine = engine();

    let (mut instance, ready) = engine.start(&definition, vars(&[("days", json!(2))])).unwrap();
    assert_eq!(ready[0].name, "Short");
    let completion = engine
        .complete_task(&definition, &mut instance, ready[0].id, Variables::new())
        .unwrap();
    assert_eq!(completion.ready_tasks[0].name, "Notify");
}

#[test]
fn test_automatic_cycle_exceeds_budget() {
    // start -> bump -> check --(counter < 1000000)--> bump, default -> end
    let model = ProcessBuilder::new("leave/spin")
        .var("counter", 0)
        .start("start")
        .automatic_task("bump", "Bump")
            .assign("counter", "counter + 1")
            .build()
        .exclusive_gateway("check")
        .end("end")
        .connect("start", "bump")
        .connect("bump", "check")
        .connect_if("check", "bump", "counter < 1000000")
        .connect_default("check", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let engine = engine_with(EngineConfig {
        max_transitions: 50,
        ..EngineConfig::default()
    });

    let err = engine.start(&definition, Variables::new()).unwrap_err();
    assert!(matches!(err, EngineError::ExecutionBudgetExceeded { limit: 50 }));
}

#[test]
fn test_budget_allows_bounded_cycles() {
    let model = ProcessBuilder::new("leave/bounded")
        .var("counter", 0)
        .start("start")
        .automatic_task("bump", "Bump")
            .assign("counter", "counter + 1")
            .build()
        .exclusive_gateway("check")
        .end("end")
        .connect("start", "bump")
        .connect("bump", "check")
        .connect_if("check", "bump", "counter < 10")
        .connect_default("check", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();

    let (instance, ready) = engine().start(&definition, Variables::new()).unwrap();
    assert!(ready.is_empty());
    assert!(instance.is_completed());
    assert_eq!(instance.variables().get("counter"), Some(&json!(10)));
}

#[test]
fn test_unfired_join_keeps_instance_running() {
    // fork -> {a -> join, route --skip--> shortcut / default -> join}, join -> end
    let model = ProcessBuilder::new("leave/shortcut")
        .start("start")
        .parallel_gateway("fork")
        .user_task("a", "A")
        .exclusive_gateway("route")
        .parallel_gateway("join")
        .end("shortcut")
        .end("end")
        .connect("start", "fork")
        .connect("fork", "a")
        .connect("fork", "route")
        .connect("a", "join")
        .connect_if("route", "shortcut", "skip == true")
        .connect_default("route", "join")
        .connect("join", "end")
        .build();
    let definition = Compiler::new().compile(model).unwrap();
    let engine = engine();

    let (mut instance, ready) = engine.start(&definition, vars(&[("skip", json!(true))])).unwrap();
    assert_eq!(ready.len(), 1);
    let completion = engine
        .complete_task(&definition, &mut instance, ready[0].id, Variables::new())
        .unwrap();

    // the join holds a's arrival and never fires
    assert!(!completion.completed);
    assert!(!instance.is_completed());
    assert!(completion.ready_tasks.is_empty());
    assert!(instance.joins()["join"].has_arrived("a->join"));
    assert!(!instance
        .history()
        .iter()
        .any(|e| matches!(e, HistoryEvent::InstanceCompleted { .. })));

    // the waiting join survives a snapshot
    let restored = snapshot::deserialize(&snapshot::serialize(&instance), &definition).unwrap();
    assert_eq!(restored, instance);

    // without the shortcut both branches meet and the instance completes
    let (mut instance, ready) = engine.start(&definition, vars(&[("skip", json!(false))])).unwrap();
    let completion = engine
        .complete_task(&definition, &mut instance, ready[0].id, Variables::new())
        .unwrap();
    assert!(completion.completed);
    assert!(instance.joins().is_empty());
}
