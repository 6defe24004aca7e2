use leaveflow::compiler::expander::Expander;
use leaveflow::dsl::builder::{ProcessBuilder, assign_node, user_task_node};
use leaveflow::dsl::{Branch, Node, NodeType};
use leaveflow::error::EngineError;

fn has_flow(model: &leaveflow::dsl::ProcessModel, source: &str, target: &str) -> bool {
    model.flows.iter().any(|f| f.source == source && f.target == target)
}

#[test]
fn test_expand_parallel_block() {
    // 1. Build model with a Parallel block
    // start -> review [legal | payroll -> calc] -> end
    let model = ProcessBuilder::new("leave/parallel")
        .start("start")
        .parallel(
            "review",
            vec![
                vec![user_task_node("legal", "Legal")],
                vec![user_task_node("payroll", "Payroll"), assign_node("calc", "total", "days * 8")],
            ],
        )
        .end("end")
        .connect("start", "review")
        .connect("review", "end")
        .build();

    // 2. Expand
    let expanded = Expander::new().expand(model).expect("Expansion failed");

    // 3. Assertions
    // start, review_fork, legal, payroll, calc, review_join, end
    assert_eq!(expanded.nodes.len(), 7);
    assert!(!expanded.nodes.iter().any(|n| n.id == "review"));
    for gateway in ["review_fork", "review_join"] {
        let node = expanded.nodes.iter().find(|n| n.id == gateway).expect("gateway not found");
        assert_eq!(node.kind, NodeType::ParallelGateway);
    }

    // Outer flows redirected
    assert!(has_flow(&expanded, "start", "review_fork"));
    assert!(has_flow(&expanded, "review_join", "end"));

    // Branch chains
    assert!(has_flow(&expanded, "review_fork", "legal"));
    assert!(has_flow(&expanded, "review_fork", "payroll"));
    assert!(has_flow(&expanded, "payroll", "calc"));
    assert!(has_flow(&expanded, "legal", "review_join"));
    assert!(has_flow(&expanded, "calc", "review_join"));
    assert_eq!(expanded.flows.len(), 7);
}

#[test]
fn test_expand_nested_and_empty_branches() {
    let inner = Node {
        id: "checks".to_string(),
        name: None,
        kind: NodeType::Parallel {
            branches: vec![
                Branch { nodes: vec![user_task_node("id_check", "ID Check")] },
                Branch { nodes: vec![user_task_node("balance_check", "Balance Check")] },
            ],
        },
    };
    let model = ProcessBuilder::new("leave/nested")
        .start("start")
        .parallel("outer", vec![vec![inner], vec![]])
        .end("end")
        .connect("start", "outer")
        .connect("outer", "end")
        .build();

    let expanded = Expander::new().expand(model).unwrap();

    assert!(expanded.nodes.iter().all(|n| !matches!(n.kind, NodeType::Parallel { .. })));
    assert!(has_flow(&expanded, "outer_fork", "checks_fork"));
    assert!(has_flow(&expanded, "checks_join", "outer_join"));
    assert!(has_flow(&expanded, "checks_fork", "id_check"));
    assert!(has_flow(&expanded, "balance_check", "checks_join"));
    // the empty branch links the outer gateways directly
    assert!(has_flow(&expanded, "outer_fork", "outer_join"));
}

#[test]
fn test_expand_rejects_block_without_branches() {
    let model = ProcessBuilder::new("leave/empty_block")
        .start("start")
        .parallel("nothing", vec![])
        .end("end")
        .connect("start", "nothing")
        .connect("nothing", "end")
        .build();

    let err = Expander::new().expand(model).unwrap_err();
    assert!(matches!(err, EngineError::DefinitionInvalid { reason, .. } if reason.contains("nothing")));
}

#[test]
fn test_models_without_blocks_are_unchanged() {
    let model = ProcessBuilder::new("leave/plain")
        .start("start")
        .end("end")
        .connect("start", "end")
        .build();
    assert_eq!(Expander::new().expand(model.clone()).unwrap(), model);
}
