use crate::dsl::{Branch, Flow, Node, NodeType, ProcessModel};
use crate::error::{EngineError, Result};

/// Rewrites `Parallel` blocks into plain gateways:
/// `<id>_fork` (ParallelGateway) -> each branch chained linearly -> `<id>_join`.
pub struct Expander;

impl Expander {
    pub fn new() -> Self {
        Self
    }

    pub fn expand(&self, model: ProcessModel) -> Result<ProcessModel> {
        let mut model = model;
        // nested blocks surface as top-level nodes after one pass
        while model.nodes.iter().any(|n| matches!(n.kind, NodeType::Parallel { .. })) {
            model = self.expand_once(model)?;
        }
        Ok(model)
    }

    fn expand_once(&self, model: ProcessModel) -> Result<ProcessModel> {
        let mut new_nodes = Vec::with_capacity(model.nodes.len());
        let mut new_flows = model.flows.clone();

        for node in model.nodes {
            if let NodeType::Parallel { branches } = node.kind {
                self.expand_parallel(&model.id, node.id, branches, &mut new_nodes, &mut new_flows)?;
            } else {
                new_nodes.push(node);
            }
        }

        Ok(ProcessModel {
            nodes: new_nodes,
            flows: new_flows,
            ..model
        })
    }

    fn expand_parallel(
        &self,
        model_id: &str,
        parallel_id: String,
        branches: Vec<Branch>,
        new_nodes: &mut Vec<Node>,
        new_flows: &mut Vec<Flow>,
    ) -> Result<()> {
        if branches.is_empty() {
            return Err(EngineError::invalid(
                model_id,
                format!("parallel block '{}' has no branches", parallel_id),
            ));
        }

        let fork_id = format!("{}_fork", parallel_id);
        let join_id = format!("{}_join", parallel_id);

        new_nodes.push(gateway(&fork_id));
        for branch in branches {
            let Some(head) = branch.nodes.first().map(|n| n.id.clone()) else {
                // an empty branch connects the gateways directly
                new_flows.push(plain_flow(&fork_id, &join_id));
                continue;
            };
            let tail = branch.nodes[branch.nodes.len() - 1].id.clone();

            new_flows.push(plain_flow(&fork_id, &head));
            for pair in branch.nodes.windows(2) {
                new_flows.push(plain_flow(&pair[0].id, &pair[1].id));
            }
            new_flows.push(plain_flow(&tail, &join_id));
            new_nodes.extend(branch.nodes);
        }
        new_nodes.push(gateway(&join_id));

        // Redirect outer flows: into the block -> fork, out of the block -> join.
        for flow in new_flows.iter_mut() {
            if flow.target == parallel_id {
                flow.target = fork_id.clone();
            }
            if flow.source == parallel_id {
                flow.source = join_id.clone();
            }
        }

        Ok(())
    }
}

impl Default for Expander {
    fn default() -> Self {
        Self::new()
    }
}

fn gateway(id: &str) -> Node {
    Node {
        id: id.to_string(),
        name: None,
        kind: NodeType::ParallelGateway,
    }
}

fn plain_flow(source: &str, target: &str) -> Flow {
    Flow {
        id: None,
        source: source.to_string(),
        target: target.to_string(),
        condition: None,
        condition_hook: None,
    }
}
